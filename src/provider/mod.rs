//! Provider module - adapter trait, shared HTTP plumbing, concrete adapters
//! and the registry

pub mod fal_ai;
pub mod http;
pub mod openai;
pub mod rate_limit;
pub mod registry;
pub mod replicate;
pub mod together_ai;
pub mod traits;

pub use registry::ProviderRegistry;
pub use traits::{ImageProvider, ModelSpec};
