//! Shared HTTP plumbing for provider adapters: retries, throttling, status
//! normalisation and image download.

use rand::Rng;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::provider::rate_limit::{self, SharedRateLimiter};
use crate::storage::{base64, detect_image_format, extension_from_url, ImageStore};

const MAX_ERROR_BODY: usize = 300;

/// Adapter-local retry with exponential backoff and jitter
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// `base * 2^attempt` plus up to one `base` of jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ms = self.base_delay.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        exp + Duration::from_millis(jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Poll loop budget for queue-based providers
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: Duration::from_secs(120),
        }
    }
}

/// Options shared by every adapter built from settings
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub poll: PollPolicy,
    pub store: ImageStore,
    pub cache_dir: PathBuf,
}

/// HTTP client wrapper owned by one adapter
#[derive(Clone)]
pub struct ProviderHttp {
    provider: String,
    client: Client,
    retry: RetryPolicy,
    limiter: Option<SharedRateLimiter>,
}

impl ProviderHttp {
    pub fn new(
        provider: &str,
        timeout: Duration,
        retry: RetryPolicy,
        requests_per_minute: Option<u32>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(30)))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            provider: provider.to_string(),
            client,
            retry,
            limiter: rate_limit::per_minute(requests_per_minute),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send a provider API request, retrying connection failures, timeouts
    /// and transient 5xx responses. Non-transient statuses are returned to
    /// the caller. Subject to the provider's throttle.
    pub async fn send<F>(&self, make_request: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        self.send_with(make_request, true).await
    }

    async fn send_with<F>(&self, make_request: F, throttled: bool) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            if let (true, Some(limiter)) = (throttled, &self.limiter) {
                limiter.until_ready().await;
            }

            let outcome = make_request(&self.client).send().await;
            let retryable = match &outcome {
                Ok(response) => is_transient_status(response.status()),
                Err(e) => e.is_connect() || e.is_timeout(),
            };

            if !retryable || attempt >= self.retry.max_retries {
                return outcome.map_err(AppError::from);
            }

            let delay = self.retry.delay_for(attempt);
            match &outcome {
                Ok(response) => warn!(
                    provider = %self.provider,
                    status = %response.status(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Transient response, retrying"
                ),
                Err(e) => warn!(
                    provider = %self.provider,
                    error = %e,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Request failed, retrying"
                ),
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Fetch image bytes from a URL
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        // Downloads hit the provider's CDN, not the metered API
        let response = self.send_with(|client| client.get(url), false).await?;
        let response = check_status(response).await?;
        let bytes = response.bytes().await?;
        debug!(provider = %self.provider, url = %url, size = bytes.len(), "Downloaded image");
        Ok(bytes.to_vec())
    }

    /// Persist an image reference (URL or data URL) under the deterministic
    /// `{prompt_id}_{model}_{timestamp}` name
    pub async fn save_image(
        &self,
        store: &ImageStore,
        prompt_id: &str,
        model: &str,
        reference: &str,
    ) -> Result<PathBuf> {
        if base64::is_data_url(reference) {
            return store.save_base64(prompt_id, model, reference).await;
        }

        let data = self.download(reference).await?;
        let extension = match extension_from_url(reference) {
            "png" => detect_image_format(&data).unwrap_or("png"),
            explicit => explicit,
        };
        store.save(prompt_id, model, &data, extension).await
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::INTERNAL_SERVER_ERROR | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Turn a non-2xx response into a normalised provider error
pub async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::Provider(normalize_status(status, &body)))
}

/// Map an HTTP status into a message the failure classifier recognises
pub fn normalize_status(status: StatusCode, body: &str) -> String {
    let body = truncate(body.trim());
    match status.as_u16() {
        429 => format!("rate limit exceeded (429): {}", body),
        401 | 403 => format!("401 unauthorized: invalid api key ({}): {}", status.as_u16(), body),
        402 => format!("quota exceeded: insufficient credits (402): {}", body),
        503 => format!("503 service unavailable: {}", body),
        404 => format!("404 model not found: {}", body),
        _ => format!("API error {}: {}", status.as_u16(), body),
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Error for a model that is not in the adapter's catalog
pub fn model_not_found(provider: &str, model: &str) -> AppError {
    AppError::Provider(format!("Model not found: {} (provider {})", model, provider))
}

/// Error for a provider response that does not have the expected shape
pub fn malformed(provider: &str, detail: impl std::fmt::Display) -> AppError {
    AppError::Provider(format!("Malformed {} response: {}", provider, detail))
}

/// Error for a response body that could not be decoded as JSON
pub fn undecodable(provider: &str, err: reqwest::Error) -> AppError {
    debug!(provider = %provider, error = %err.without_url(), "Undecodable response body");
    malformed(provider, "body is not the expected JSON")
}

/// OpenAI-style `{"data": [{"url": ..} | {"b64_json": ..}]}` body
#[derive(Debug, Deserialize)]
pub struct ImagesResponse {
    #[serde(default)]
    pub data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
pub struct ImageData {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "base64")]
    pub b64_json: Option<String>,
}

impl ImagesResponse {
    /// First usable image reference; inline payloads become data URLs
    pub fn first_reference(self) -> Option<String> {
        self.data.into_iter().find_map(|image| {
            image.url.or_else(|| {
                image
                    .b64_json
                    .map(|b64| format!("data:image/png;base64,{}", b64))
            })
        })
    }
}
