//! OpenAI DALL-E provider

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::config::{ModelConfig, ProviderConfig};
use crate::error::{AppError, Result};
use crate::provider::http::{
    check_status, model_not_found, undecodable, AdapterOptions, ImagesResponse, ProviderHttp,
};
use crate::provider::traits::ImageProvider;
use crate::storage::ImageStore;

pub const PROVIDER_NAME: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiProvider {
    api_key: String,
    base_url: String,
    http: ProviderHttp,
    store: ImageStore,
    models: BTreeMap<String, ModelConfig>,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig, options: &AdapterOptions) -> Result<Self> {
        let api_key = config
            .credential()
            .ok_or_else(|| AppError::Internal(format!("API key required for {}", PROVIDER_NAME)))?
            .to_string();

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
            models: config.models.clone(),
        })
    }

    fn payload(&self, model: &ModelConfig, prompt: &str) -> Value {
        let mut payload = Map::new();
        payload.insert("model".into(), json!(model.endpoint));
        payload.insert("prompt".into(), json!(model.render_prompt(prompt)));
        payload.insert("n".into(), json!(model.n.unwrap_or(1)));
        if let Some(size) = &model.size {
            payload.insert("size".into(), json!(size));
        }
        if let Some(quality) = &model.quality {
            payload.insert("quality".into(), json!(quality));
        }
        model.merge_extra(&mut payload);
        Value::Object(payload)
    }
}

#[async_trait]
impl ImageProvider for OpenAiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn catalog(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    async fn probe(&self) -> bool {
        // Listing models confirms both reachability and the key
        let url = format!("{}/v1/models", self.base_url);
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

        let url = format!("{}/v1/images/generations", self.base_url);
        let payload = self.payload(model_config, prompt);

        debug!(provider = PROVIDER_NAME, model = %model, prompt_id = %prompt_id, "Submitting generation");

        let response = self
            .http
            .send(|client| client.post(&url).bearer_auth(&self.api_key).json(&payload))
            .await?;
        let body: ImagesResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| undecodable(PROVIDER_NAME, e))?;

        let reference = body
            .first_reference()
            .ok_or_else(|| AppError::Provider("No image data in response".to_string()))?;

        self.http
            .save_image(&self.store, prompt_id, model, &reference)
            .await
    }
}
