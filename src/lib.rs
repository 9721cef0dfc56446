//! Icon Forge
//!
//! Fans image generation out across several AI providers, skips models that
//! fail systemically, and turns the results into transparent icons.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod postprocess;
pub mod provider;
pub mod storage;

pub use error::{AppError, Result};
