//! Common traits and types for image generation providers

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::Result;

/// A resolved `provider:model` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec {
    pub provider: String,
    pub model: String,
}

impl ModelSpec {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// The `provider:model` key used for fail-fast grouping
    pub fn key(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// Capability contract every image generation provider implements.
///
/// `generate` always behaves as one blocking call from the caller's point of
/// view: providers with queue/poll APIs run the whole poll loop internally,
/// download the result and return the saved file path. Errors carry a
/// normalised message so the scheduler can classify systemic failures.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Static list of models this provider serves
    fn catalog(&self) -> Vec<String>;

    /// Check if a model belongs to the catalog
    fn supports_model(&self, model: &str) -> bool {
        self.catalog().iter().any(|m| m == model)
    }

    /// Cheap reachability/auth check. Never fails; problems are logged and
    /// reported as `false`.
    async fn probe(&self) -> bool;

    /// Generate one image and persist it, returning the file path
    async fn generate(&self, prompt: &str, prompt_id: &str, model: &str) -> Result<PathBuf>;
}
