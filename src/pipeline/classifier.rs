//! Systemic failure classification

use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider error classes that imply every further call to the same model
/// will fail as well
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    RateLimit,
    Auth,
    Quota,
    Unavailable,
    NotFound,
}

const PATTERNS: [(FailureCategory, &[&str]); 5] = [
    (FailureCategory::RateLimit, &["rate limit", "429"]),
    (FailureCategory::Auth, &["unauthorized", "401", "invalid api key"]),
    (FailureCategory::Quota, &["quota", "insufficient"]),
    (FailureCategory::Unavailable, &["503", "service unavailable"]),
    (FailureCategory::NotFound, &["model not found", "404"]),
];

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::RateLimit => "rate_limit",
            FailureCategory::Auth => "auth",
            FailureCategory::Quota => "quota",
            FailureCategory::Unavailable => "unavailable",
            FailureCategory::NotFound => "not_found",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an error message, case-insensitively. First matching category
/// wins; `None` means the failure is transient or prompt-specific.
pub fn classify(message: &str) -> Option<FailureCategory> {
    let message = message.to_lowercase();
    PATTERNS
        .iter()
        .find(|(_, needles)| needles.iter().any(|needle| message.contains(needle)))
        .map(|(category, _)| *category)
}

pub fn is_systemic(message: &str) -> bool {
    classify(message).is_some()
}
