//! Generation tasks, results, and the task expander

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::pipeline::prompt::Prompt;
use crate::provider::{ModelSpec, ProviderRegistry};

/// One (prompt, model) pair to execute
#[derive(Debug, Clone)]
pub struct GenerationTask {
    pub prompt: Prompt,
    pub spec: ModelSpec,
}

impl GenerationTask {
    pub fn model_key(&self) -> String {
        self.spec.key()
    }
}

/// Outcome of one executed task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub success: bool,
    pub prompt_id: String,
    pub model_key: String,
    pub file_path: Option<PathBuf>,
    pub error: Option<String>,
    /// Seconds spent on the task
    pub duration: f64,
}

impl GenerationResult {
    pub fn succeeded(task: &GenerationTask, file_path: PathBuf, duration: f64) -> Self {
        Self {
            success: true,
            prompt_id: task.prompt.id.clone(),
            model_key: task.model_key(),
            file_path: Some(file_path),
            error: None,
            duration,
        }
    }

    pub fn failed(task: &GenerationTask, error: impl Into<String>, duration: f64) -> Self {
        Self {
            success: false,
            prompt_id: task.prompt.id.clone(),
            model_key: task.model_key(),
            file_path: None,
            error: Some(error.into()),
            duration,
        }
    }
}

/// Which models a run should use
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelection {
    /// Every model of every initialized provider
    All,
    /// Explicit `provider:model` or bare `model` specs
    Explicit(Vec<String>),
}

impl ModelSelection {
    /// Parse a comma separated list, e.g. `flux_dev,openai:dalle3`
    pub fn from_list(list: &str) -> Self {
        ModelSelection::Explicit(split_list(list))
    }
}

/// Split a comma separated list, dropping blank entries
pub fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Build the prompt × model task list.
///
/// Model specs that fail to resolve are dropped with a warning, as are
/// prompts repeating an earlier id. Fails with
/// `NoPrompts` / `NoModels` before any provider is called when either side
/// ends up empty.
pub fn expand(
    registry: &ProviderRegistry,
    prompts: Vec<Prompt>,
    prompt_filter: Option<&[String]>,
    selection: &ModelSelection,
) -> Result<Vec<GenerationTask>> {
    let mut prompts: Vec<Prompt> = match prompt_filter {
        Some(ids) if !ids.is_empty() => prompts
            .into_iter()
            .filter(|p| ids.iter().any(|id| id == &p.id))
            .collect(),
        _ => prompts,
    };

    let mut seen_ids = HashSet::new();
    prompts.retain(|prompt| {
        let first = seen_ids.insert(prompt.id.clone());
        if !first {
            warn!(prompt_id = %prompt.id, "Skipping prompt with duplicate id");
        }
        first
    });

    if prompts.is_empty() {
        return Err(AppError::NoPrompts);
    }

    let mut specs: Vec<ModelSpec> = Vec::new();
    match selection {
        ModelSelection::All => {
            for (provider, models) in registry.available_models() {
                for model in models {
                    specs.push(ModelSpec::new(provider.clone(), model));
                }
            }
        }
        ModelSelection::Explicit(requested) => {
            for model_spec in requested {
                match registry.resolve(model_spec) {
                    Ok(spec) => specs.push(spec),
                    Err(e) => {
                        warn!(model_spec = %model_spec, error = %e, "Skipping invalid model spec")
                    }
                }
            }
        }
    }

    // `flux_dev` and `together_ai:flux_dev` resolve to the same key
    let mut seen = HashSet::new();
    specs.retain(|spec| seen.insert(spec.key()));

    if specs.is_empty() {
        return Err(AppError::NoModels);
    }

    info!(
        prompts = prompts.len(),
        models = specs.len(),
        tasks = prompts.len() * specs.len(),
        "Expanded generation tasks"
    );

    let mut tasks = Vec::with_capacity(prompts.len() * specs.len());
    for prompt in &prompts {
        for spec in &specs {
            tasks.push(GenerationTask {
                prompt: prompt.clone(),
                spec: spec.clone(),
            });
        }
    }
    Ok(tasks)
}
