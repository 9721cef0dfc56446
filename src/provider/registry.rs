//! Provider registry: discovers which providers are usable and resolves model
//! specs to `provider:model` pairs.

use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::error::{AppError, Result};
use crate::provider::http::{AdapterOptions, PollPolicy, RetryPolicy};
use crate::provider::traits::{ImageProvider, ModelSpec};
use crate::provider::{fal_ai, openai, replicate, together_ai};
use crate::storage::ImageStore;

/// A configured provider slot. `adapter` is `None` when the provider has no
/// credential (or could not be constructed) and is never probed.
struct ProviderEntry {
    name: String,
    adapter: Option<Arc<dyn ImageProvider>>,
}

/// Registry of image providers in registration order
pub struct ProviderRegistry {
    entries: Vec<ProviderEntry>,
    /// Cached availability; `Some` once `initialize` has run
    status: Mutex<Option<BTreeMap<String, bool>>>,
    /// Names of providers that passed their probe, in registration order
    live: RwLock<Vec<String>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            status: Mutex::new(None),
            live: RwLock::new(Vec::new()),
        }
    }

    /// Register a provider slot. Pass `None` for a provider whose credential
    /// is missing so it still shows up as unavailable.
    pub fn register(&mut self, name: impl Into<String>, adapter: Option<Arc<dyn ImageProvider>>) {
        self.entries.push(ProviderEntry {
            name: name.into(),
            adapter,
        });
    }

    /// Build the registry from configuration. Providers without a credential
    /// or disabled in config are registered as unavailable.
    pub fn from_settings(settings: &Settings) -> Self {
        let options = AdapterOptions {
            request_timeout: settings.generation.request_timeout(),
            retry: RetryPolicy {
                max_retries: settings.generation.max_retries,
                base_delay: settings.generation.retry_base_delay(),
            },
            poll: PollPolicy {
                interval: settings.generation.poll_interval(),
                deadline: settings.generation.poll_timeout(),
            },
            store: ImageStore::new(settings.output.raw_dir.clone()),
            cache_dir: settings.output.cache_dir.clone(),
        };

        let mut registry = Self::new();
        for (name, config) in settings.providers.iter() {
            if !config.enabled || config.credential().is_none() {
                registry.register(name, None);
                continue;
            }

            let adapter: Result<Arc<dyn ImageProvider>> = match name {
                together_ai::PROVIDER_NAME => together_ai::TogetherAiProvider::new(config, &options)
                    .map(|p| Arc::new(p) as Arc<dyn ImageProvider>),
                replicate::PROVIDER_NAME => replicate::ReplicateProvider::new(config, &options)
                    .map(|p| Arc::new(p) as Arc<dyn ImageProvider>),
                openai::PROVIDER_NAME => openai::OpenAiProvider::new(config, &options)
                    .map(|p| Arc::new(p) as Arc<dyn ImageProvider>),
                fal_ai::PROVIDER_NAME => fal_ai::FalAiProvider::new(config, &options)
                    .map(|p| Arc::new(p) as Arc<dyn ImageProvider>),
                other => Err(AppError::Internal(format!("Unknown provider: {}", other))),
            };

            match adapter {
                Ok(adapter) => registry.register(name, Some(adapter)),
                Err(e) => {
                    error!(provider = %name, error = %e, "Failed to construct provider");
                    registry.register(name, None);
                }
            }
        }
        registry
    }

    /// Probe every provider that has a credential, once. Later calls return
    /// the cached availability map without probing again.
    pub async fn initialize(&self) -> BTreeMap<String, bool> {
        let mut status = self.status.lock().await;
        if let Some(cached) = status.as_ref() {
            return cached.clone();
        }

        let probes = self.entries.iter().map(|entry| async move {
            let available = match &entry.adapter {
                Some(adapter) => adapter.probe().await,
                None => false,
            };
            (entry.name.clone(), entry.adapter.is_some(), available)
        });
        let outcomes = join_all(probes).await;

        let mut availability = BTreeMap::new();
        let mut live = Vec::new();
        for (name, has_credential, available) in outcomes {
            if available {
                info!(provider = %name, "Provider initialized");
                live.push(name.clone());
            } else if has_credential {
                warn!(provider = %name, "Provider connection test failed");
            }
            availability.insert(name, available);
        }

        info!(
            working = live.len(),
            total = availability.len(),
            "Provider registry initialized"
        );

        *self.live.write() = live;
        *status = Some(availability.clone());
        availability
    }

    /// Forget the cached availability so the next `initialize` probes again
    pub async fn reset(&self) {
        *self.status.lock().await = None;
        self.live.write().clear();
    }

    /// Adapter for an initialized provider
    pub fn get(&self, provider: &str) -> Option<Arc<dyn ImageProvider>> {
        if !self.live.read().iter().any(|name| name == provider) {
            return None;
        }
        self.entries
            .iter()
            .find(|entry| entry.name == provider)
            .and_then(|entry| entry.adapter.clone())
    }

    /// Models by initialized provider, in registration order
    pub fn available_models(&self) -> Vec<(String, Vec<String>)> {
        self.live_adapters()
            .map(|(name, adapter)| (name.to_string(), adapter.catalog()))
            .collect()
    }

    /// Total number of models across initialized providers
    pub fn model_count(&self) -> usize {
        self.live_adapters()
            .map(|(_, adapter)| adapter.catalog().len())
            .sum()
    }

    /// Resolve `provider:model` or a bare `model` against initialized providers
    pub fn resolve(&self, model_spec: &str) -> Result<ModelSpec> {
        let model_spec = model_spec.trim();

        if let Some((provider, model)) = model_spec.split_once(':') {
            let adapter = self.get(provider).ok_or_else(|| {
                AppError::InvalidModel(format!("Provider '{}' not available", provider))
            })?;
            if !adapter.supports_model(model) {
                return Err(AppError::InvalidModel(format!(
                    "Model '{}' not valid for provider '{}'",
                    model, provider
                )));
            }
            return Ok(ModelSpec::new(provider, model));
        }

        self.live_adapters()
            .find(|(_, adapter)| adapter.supports_model(model_spec))
            .map(|(name, _)| ModelSpec::new(name, model_spec))
            .ok_or_else(|| {
                AppError::InvalidModel(format!(
                    "Model '{}' not found in any available provider",
                    model_spec
                ))
            })
    }

    fn live_adapters(&self) -> impl Iterator<Item = (&str, &Arc<dyn ImageProvider>)> {
        let live = self.live.read().clone();
        self.entries.iter().filter_map(move |entry| {
            let adapter = entry.adapter.as_ref()?;
            live.contains(&entry.name)
                .then_some((entry.name.as_str(), adapter))
        })
    }
}
