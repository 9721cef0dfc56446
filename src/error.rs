//! Common error types for the generation orchestrator

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Transport failure, reduced to its kind so request URLs never reach
    /// the failure classifier
    #[error("network error: {0}")]
    HttpClient(String),

    #[error("No image providers are available; check API keys")]
    NoProvidersAvailable,

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Invalid prompt catalogue: {0}")]
    InvalidPrompts(String),

    #[error("No valid prompts found")]
    NoPrompts,

    #[error("No valid models specified")]
    NoModels,

    /// Provider failure, already normalised into a classifiable message
    #[error("{0}")]
    Provider(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Configuration errors abort a run before any provider is called.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AppError::Config(_)
                | AppError::InvalidPrompts(_)
                | AppError::NoProvidersAvailable
                | AppError::NoPrompts
                | AppError::NoModels
        )
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connection failed"
        } else if err.is_decode() {
            "malformed response body"
        } else if err.is_body() {
            "response body interrupted"
        } else if err.is_redirect() {
            "too many redirects"
        } else if err.is_builder() {
            "invalid request"
        } else {
            "request failed"
        };
        tracing::debug!(error = %err.without_url(), kind, "HTTP transport error");
        AppError::HttpClient(kind.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
