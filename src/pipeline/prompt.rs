//! Prompt catalogue loading

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::error::{AppError, Result};

/// A generation prompt, identified by `id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(alias = "prompt")]
    pub text: String,
}

impl Prompt {
    pub fn new(id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            text: text.into(),
        }
    }
}

/// Either a bare list of prompts or `{ "prompts": [...] }`
#[derive(Deserialize)]
#[serde(untagged)]
enum PromptCatalog {
    List(Vec<Prompt>),
    Wrapped { prompts: Vec<Prompt> },
}

impl PromptCatalog {
    fn into_prompts(self) -> Vec<Prompt> {
        match self {
            PromptCatalog::List(prompts) => prompts,
            PromptCatalog::Wrapped { prompts } => prompts,
        }
    }
}

/// Load prompts from a JSON or YAML file (chosen by extension)
pub async fn load_prompts(path: &Path) -> Result<Vec<Prompt>> {
    let raw = tokio::fs::read_to_string(path).await?;
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);

    let prompts = parse_prompts(&raw, is_yaml)?;
    info!(path = %path.display(), count = prompts.len(), "Loaded prompts");
    Ok(prompts)
}

/// Parse a prompt catalogue, rejecting duplicate ids
pub fn parse_prompts(raw: &str, yaml: bool) -> Result<Vec<Prompt>> {
    let catalog: PromptCatalog = if yaml {
        serde_yaml::from_str(raw)?
    } else {
        serde_json::from_str(raw)?
    };
    let prompts = catalog.into_prompts();

    let mut seen = HashSet::new();
    for prompt in &prompts {
        if !seen.insert(prompt.id.as_str()) {
            return Err(AppError::InvalidPrompts(format!(
                "duplicate prompt id '{}'",
                prompt.id
            )));
        }
    }

    Ok(prompts)
}
