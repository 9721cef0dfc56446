//! Fal.ai provider
//!
//! Requests go to the queue endpoint first. The queue either answers with the
//! images directly or with a `response_url` that is polled until the result is
//! ready. When the queue path yields nothing the direct endpoint is tried.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{ModelConfig, ProviderConfig};
use crate::error::{AppError, Result};
use crate::provider::http::{
    check_status, model_not_found, undecodable, AdapterOptions, PollPolicy, ProviderHttp,
};
use crate::provider::traits::ImageProvider;
use crate::storage::ImageStore;

pub const PROVIDER_NAME: &str = "fal_ai";
const DEFAULT_BASE_URL: &str = "https://fal.run";
const DEFAULT_QUEUE_URL: &str = "https://queue.fal.run";
const PROBE_ENDPOINT: &str = "fal-ai/flux/schnell";

#[derive(Debug, Default, Deserialize)]
struct FalResponse {
    #[serde(default)]
    images: Vec<FalImage>,
    #[serde(default)]
    response_url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    detail: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FalImage {
    url: String,
}

impl FalResponse {
    fn first_image(self) -> Option<String> {
        self.images.into_iter().next().map(|image| image.url)
    }
}

pub struct FalAiProvider {
    api_key: String,
    base_url: String,
    queue_url: String,
    http: ProviderHttp,
    store: ImageStore,
    poll: PollPolicy,
    models: BTreeMap<String, ModelConfig>,
}

impl FalAiProvider {
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
            queue_url: config
                .queue_url
                .clone()
                .unwrap_or_else(|| DEFAULT_QUEUE_URL.to_string()),
            http: ProviderHttp::new(
                PROVIDER_NAME,
                options.request_timeout,
                options.retry,
                config.requests_per_minute,
            )?,
            store: options.store.clone(),
            poll: options.poll,
            models: config.models.clone(),
        })
    }

    /// Fal.ai uses "Key" rather than "Bearer"
    fn auth_header(&self) -> String {
        format!("Key {}", self.api_key)
    }

    fn payload(&self, model: &ModelConfig, prompt: &str) -> Value {
        let mut payload = Map::new();
        payload.insert("prompt".into(), json!(model.render_prompt(prompt)));
        if let (Some(width), Some(height)) = (model.width, model.height) {
            payload.insert("image_size".into(), json!({ "width": width, "height": height }));
        }
        model.merge_extra(&mut payload);
        Value::Object(payload)
    }

    /// Queue path. `Ok(None)` means the queue gave no usable result and the
    /// direct endpoint should be tried.
    async fn generate_queued(&self, endpoint: &str, payload: &Value) -> Result<Option<String>> {
        let url = format!("{}/{}", self.queue_url, endpoint);
        let auth = self.auth_header();
        let response = self
            .http
            .send(|client| {
                client
                    .post(&url)
                    .header(reqwest::header::AUTHORIZATION, &auth)
                    .json(payload)
            })
            .await?;

        if !response.status().is_success() {
            debug!(provider = PROVIDER_NAME, status = %response.status(), "Queue submit rejected");
            return Ok(None);
        }

        let body: FalResponse = response
            .json()
            .await
            .map_err(|e| undecodable(PROVIDER_NAME, e))?;

        if !body.images.is_empty() {
            return Ok(body.first_image());
        }

        match body.response_url {
            Some(response_url) => Ok(self.poll_queue(&response_url).await),
            None => Ok(None),
        }
    }

    /// Poll the queue result URL. Returns `None` on timeout or on a poll
    /// error so the caller can fall back.
    async fn poll_queue(&self, response_url: &str) -> Option<String> {
        let deadline = Instant::now() + self.poll.deadline;
        let auth = self.auth_header();

        while Instant::now() < deadline {
            let response = match self
                .http
                .client()
                .get(response_url)
                .header(reqwest::header::AUTHORIZATION, &auth)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(provider = PROVIDER_NAME, error = %e, "Queue polling error");
                    return None;
                }
            };

            match response.status() {
                StatusCode::OK => {
                    let body: FalResponse = match response.json().await {
                        Ok(body) => body,
                        Err(e) => {
                            warn!(provider = PROVIDER_NAME, error = %e, "Unreadable poll response");
                            return None;
                        }
                    };
                    let completed = body.status.as_deref() == Some("COMPLETED");
                    if completed || !body.images.is_empty() {
                        return body.first_image();
                    }
                }
                StatusCode::ACCEPTED => {}
                StatusCode::BAD_REQUEST => {
                    let body: FalResponse = response.json().await.unwrap_or_default();
                    let in_progress = body
                        .detail
                        .as_ref()
                        .map(|detail| detail.to_string().to_lowercase().contains("still in progress"))
                        .unwrap_or(false);
                    if !in_progress {
                        warn!(provider = PROVIDER_NAME, "Queue poll rejected");
                        return None;
                    }
                }
                status => {
                    warn!(provider = PROVIDER_NAME, status = %status, "Queue poll failed");
                    return None;
                }
            }

            tokio::time::sleep(self.poll.interval).await;
        }

        warn!(
            provider = PROVIDER_NAME,
            timeout_secs = self.poll.deadline.as_secs(),
            "Queue polling timed out"
        );
        None
    }

    async fn generate_direct(&self, endpoint: &str, payload: &Value) -> Result<String> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let auth = self.auth_header();
        let response = self
            .http
            .send(|client| {
                client
                    .post(&url)
                    .header(reqwest::header::AUTHORIZATION, &auth)
                    .json(payload)
            })
            .await?;

        let body: FalResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| undecodable(PROVIDER_NAME, e))?;

        body.first_image()
            .ok_or_else(|| AppError::Provider("Fal.ai generation failed: no images in response".to_string()))
    }
}

#[async_trait]
impl ImageProvider for FalAiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn catalog(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    async fn probe(&self) -> bool {
        // An empty payload is rejected by validation without generating
        // anything; only auth failures and outages count against the provider
        let url = format!("{}/{}", self.base_url, PROBE_ENDPOINT);
        match self
            .http
            .client()
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .json(&json!({}))
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                let ok = !(status == StatusCode::UNAUTHORIZED
                    || status == StatusCode::FORBIDDEN
                    || status.is_server_error());
                if !ok {
                    warn!(provider = PROVIDER_NAME, status = %status, "Connection test failed");
                }
                ok
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
        let payload = self.payload(model_config, prompt);

        let image_url = match self.generate_queued(&model_config.endpoint, &payload).await? {
            Some(url) => url,
            None => {
                debug!(provider = PROVIDER_NAME, model = %model, "Falling back to direct endpoint");
                self.generate_direct(&model_config.endpoint, &payload).await?
            }
        };

        self.http
            .save_image(&self.store, prompt_id, model, &image_url)
            .await
    }
}
