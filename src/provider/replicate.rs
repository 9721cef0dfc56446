//! Replicate provider (official and versioned community models)
//!
//! Replicate is prediction based: a prediction is created, then polled until
//! it reaches a terminal status. Community models need a version id, resolved
//! once per model and cached on disk across runs.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ModelConfig, ModelKind, ProviderConfig};
use crate::error::{AppError, Result};
use crate::provider::http::{
    check_status, malformed, model_not_found, undecodable, AdapterOptions, PollPolicy,
    ProviderHttp,
};
use crate::provider::traits::ImageProvider;
use crate::storage::ImageStore;

pub const PROVIDER_NAME: &str = "replicate";
const DEFAULT_BASE_URL: &str = "https://api.replicate.com/v1";
const VERSION_CACHE_FILE: &str = "replicate_versions.json";

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct VersionList {
    #[serde(default)]
    results: Vec<VersionEntry>,
}

#[derive(Debug, Deserialize)]
struct VersionEntry {
    id: String,
}

pub struct ReplicateProvider {
    api_key: String,
    base_url: String,
    http: ProviderHttp,
    store: ImageStore,
    poll: PollPolicy,
    models: BTreeMap<String, ModelConfig>,
    versions: RwLock<HashMap<String, String>>,
    version_cache_file: PathBuf,
}

impl ReplicateProvider {
    pub fn new(config: &ProviderConfig, options: &AdapterOptions) -> Result<Self> {
        let api_key = config
            .credential()
            .ok_or_else(|| AppError::Internal(format!("API key required for {}", PROVIDER_NAME)))?
            .to_string();

        let version_cache_file = options.cache_dir.join(VERSION_CACHE_FILE);
        let versions = load_version_cache(&version_cache_file);

        Ok(Self {
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            http: ProviderHttp::new(
                PROVIDER_NAME,
                options.request_timeout,
                options.retry,
                config.requests_per_minute,
            )?,
            store: options.store.clone(),
            poll: options.poll,
            models: config.models.clone(),
            versions: RwLock::new(versions),
            version_cache_file,
        })
    }

    fn input(&self, model: &ModelConfig, prompt: &str) -> Value {
        let mut input = Map::new();
        input.insert("prompt".into(), json!(model.render_prompt(prompt)));
        if let Some(width) = model.width {
            input.insert("width".into(), json!(width));
        }
        if let Some(height) = model.height {
            input.insert("height".into(), json!(height));
        }
        model.merge_extra(&mut input);
        Value::Object(input)
    }

    async fn create_prediction(&self, model: &ModelConfig, prompt: &str) -> Result<Prediction> {
        let input = self.input(model, prompt);

        let (url, body) = match model.kind.unwrap_or(ModelKind::Official) {
            ModelKind::Official => (
                format!("{}/models/{}/predictions", self.base_url, model.endpoint),
                json!({ "input": input }),
            ),
            ModelKind::Community => {
                let version = self.resolve_version(&model.endpoint).await?;
                (
                    format!("{}/predictions", self.base_url),
                    json!({ "version": version, "input": input }),
                )
            }
        };

        let response = self
            .http
            .send(|client| client.post(&url).bearer_auth(&self.api_key).json(&body))
            .await?;
        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| undecodable(PROVIDER_NAME, e))
    }

    /// Latest version id for a community model, cached in memory and on disk
    async fn resolve_version(&self, model_name: &str) -> Result<String> {
        if let Some(version) = self.versions.read().get(model_name) {
            return Ok(version.clone());
        }

        let url = format!("{}/models/{}/versions?limit=1", self.base_url, model_name);
        let response = self
            .http
            .send(|client| client.get(&url).bearer_auth(&self.api_key))
            .await?;
        let list: VersionList = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| undecodable(PROVIDER_NAME, e))?;

        let version = list
            .results
            .into_iter()
            .next()
            .map(|entry| entry.id)
            .ok_or_else(|| {
                AppError::Provider(format!("Could not resolve version for {}", model_name))
            })?;

        info!(provider = PROVIDER_NAME, model = %model_name, version = %version, "Resolved model version");

        let snapshot = {
            let mut versions = self.versions.write();
            versions.insert(model_name.to_string(), version.clone());
            versions.clone()
        };
        self.save_version_cache(&snapshot).await;

        Ok(version)
    }

    async fn save_version_cache(&self, versions: &HashMap<String, String>) {
        let write = async {
            if let Some(parent) = self.version_cache_file.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let json = serde_json::to_vec_pretty(versions)?;
            tokio::fs::write(&self.version_cache_file, json).await?;
            Ok::<(), AppError>(())
        };
        if let Err(e) = write.await {
            warn!(provider = PROVIDER_NAME, error = %e, "Failed to save version cache");
        }
    }

    /// Poll until the prediction reaches a terminal status or the deadline passes
    async fn wait_for_completion(&self, mut prediction: Prediction) -> Result<String> {
        let url = format!("{}/predictions/{}", self.base_url, prediction.id);
        let deadline = Instant::now() + self.poll.deadline;

        loop {
            match prediction.status.as_str() {
                "succeeded" => return extract_output(prediction.output),
                "failed" | "canceled" => {
                    let detail = match prediction.error {
                        Some(Value::String(message)) => message,
                        Some(other) => other.to_string(),
                        None => "Unknown error".to_string(),
                    };
                    return Err(AppError::Provider(format!(
                        "Prediction {}: {}",
                        prediction.status, detail
                    )));
                }
                status => {
                    debug!(provider = PROVIDER_NAME, id = %prediction.id, status = %status, "Prediction pending");
                }
            }

            if Instant::now() + self.poll.interval > deadline {
                warn!(
                    provider = PROVIDER_NAME,
                    id = %prediction.id,
                    timeout_secs = self.poll.deadline.as_secs(),
                    "Prediction polling timed out"
                );
                return Err(AppError::Timeout(
                    "Replicate prediction did not finish before the poll deadline".to_string(),
                ));
            }
            tokio::time::sleep(self.poll.interval).await;

            let response = self
                .http
                .send(|client| client.get(&url).bearer_auth(&self.api_key))
                .await?;
            prediction = check_status(response)
                .await?
                .json()
                .await
                .map_err(|e| undecodable(PROVIDER_NAME, e))?;
        }
    }
}

fn extract_output(output: Option<Value>) -> Result<String> {
    match output {
        Some(Value::String(url)) => Ok(url),
        Some(Value::Array(items)) => items
            .into_iter()
            .find_map(|item| match item {
                Value::String(url) => Some(url),
                _ => None,
            })
            .ok_or_else(|| malformed(PROVIDER_NAME, "empty output list")),
        Some(other) => Err(malformed(PROVIDER_NAME, format!("unexpected output {}", other))),
        None => Err(malformed(PROVIDER_NAME, "prediction succeeded without output")),
    }
}

fn load_version_cache(path: &std::path::Path) -> HashMap<String, String> {
    if !path.exists() {
        return HashMap::new();
    }
    match std::fs::read(path)
        .map_err(AppError::from)
        .and_then(|bytes| serde_json::from_slice(&bytes).map_err(AppError::from))
    {
        Ok(cache) => cache,
        Err(e) => {
            warn!(provider = PROVIDER_NAME, error = %e, "Failed to load version cache");
            HashMap::new()
        }
    }
}

#[async_trait]
impl ImageProvider for ReplicateProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn catalog(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    async fn probe(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        match self
            .http
            .client()
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(provider = PROVIDER_NAME, status = %response.status(), "Connection test failed");
                false
            }
            Err(e) => {
                warn!(provider = PROVIDER_NAME, error = %e, "Connection test failed");
                false
            }
        }
    }

    async fn generate(&self, prompt: &str, prompt_id: &str, model: &str) -> Result<PathBuf> {
        let model_config = self
            .models
            .get(model)
            .ok_or_else(|| model_not_found(PROVIDER_NAME, model))?;

        let prediction = self.create_prediction(model_config, prompt).await?;
        debug!(provider = PROVIDER_NAME, id = %prediction.id, model = %model, "Prediction created");

        let output_url = self.wait_for_completion(prediction).await?;

        self.http
            .save_image(&self.store, prompt_id, model, &output_url)
            .await
    }
}
