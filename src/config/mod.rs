//! Configuration module

pub mod settings;

pub use settings::{
    GenerationConfig, LoggingConfig, ModelConfig, ModelKind, OutputConfig, ProcessingConfig,
    ProviderConfig, ProvidersConfig, Settings,
};
