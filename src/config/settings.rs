//! Application settings and configuration management

use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Provider names in registration order. Bare model names resolve against
/// providers in this order.
pub const PROVIDER_ORDER: [&str; 4] = ["together_ai", "replicate", "openai", "fal_ai"];

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Generation / scheduling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Overall budget for one task, covering submit, polling and download
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: Option<u64>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_prompts_file")]
    pub prompts_file: String,
}

fn default_max_workers() -> usize {
    4
}

fn default_request_timeout() -> u64 {
    120
}

fn default_task_timeout() -> Option<u64> {
    Some(300)
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    1000
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_poll_timeout() -> u64 {
    120
}

fn default_prompts_file() -> String {
    "config/prompts.json".to_string()
}

impl GenerationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            request_timeout_secs: default_request_timeout(),
            task_timeout_secs: default_task_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            poll_interval_ms: default_poll_interval(),
            poll_timeout_secs: default_poll_timeout(),
            prompts_file: default_prompts_file(),
        }
    }
}

/// Output directory layout
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,
    #[serde(default = "default_icons_dir")]
    pub icons_dir: PathBuf,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

fn default_raw_dir() -> PathBuf {
    PathBuf::from("output/raw")
}

fn default_processed_dir() -> PathBuf {
    PathBuf::from("output/processed")
}

fn default_icons_dir() -> PathBuf {
    PathBuf::from("output/icons")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

impl OutputConfig {
    /// Create every output directory
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.raw_dir,
            &self.processed_dir,
            &self.icons_dir,
            &self.logs_dir,
            &self.cache_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            raw_dir: default_raw_dir(),
            processed_dir: default_processed_dir(),
            icons_dir: default_icons_dir(),
            logs_dir: default_logs_dir(),
            cache_dir: default_cache_dir(),
        }
    }
}

/// Post-processing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_true")]
    pub remove_background: bool,
    #[serde(default = "default_true")]
    pub create_ico: bool,
    #[serde(default = "default_ico_sizes")]
    pub ico_sizes: Vec<u32>,
    /// argv template for background removal; `{input}` and `{output}` are substituted
    #[serde(default = "default_background_command")]
    pub background_command: Vec<String>,
    /// argv template for icon packaging; also substitutes `{sizes}`
    #[serde(default = "default_icon_command")]
    pub icon_command: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_ico_sizes() -> Vec<u32> {
    vec![16, 32, 48, 64, 128, 256]
}

fn default_background_command() -> Vec<String> {
    ["rembg", "i", "{input}", "{output}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_icon_command() -> Vec<String> {
    [
        "magick",
        "{input}",
        "-define",
        "icon:auto-resize={sizes}",
        "{output}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            remove_background: true,
            create_ico: true,
            ico_sizes: default_ico_sizes(),
            background_command: default_background_command(),
            icon_command: default_icon_command(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Replicate distinguishes official models from versioned community models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Official,
    Community,
}

/// Per-model request shaping. Fixed fields cover what the built-in adapters
/// understand; `extra` is merged into the payload last.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ModelConfig {
    /// Provider-side model identifier or endpoint path
    pub endpoint: String,
    #[serde(default)]
    pub kind: Option<ModelKind>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub steps: Option<u32>,
    #[serde(default)]
    pub n: Option<u32>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub prompt_prefix: Option<String>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl ModelConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    fn square(mut self, side: u32) -> Self {
        self.width = Some(side);
        self.height = Some(side);
        self
    }

    fn steps(mut self, steps: u32) -> Self {
        self.steps = Some(steps);
        self.n = Some(1);
        self
    }

    fn kind(mut self, kind: ModelKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Prompt text as sent to the provider
    pub fn render_prompt(&self, prompt: &str) -> String {
        match &self.prompt_prefix {
            Some(prefix) => format!("{}{}", prefix, prompt),
            None => prompt.to_string(),
        }
    }

    /// Merge the escape-hatch parameters into a request payload
    pub fn merge_extra(&self, payload: &mut Map<String, Value>) {
        for (key, value) in &self.extra {
            payload.insert(key.clone(), value.clone());
        }
    }
}

/// Configuration for one provider
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Queue endpoint for providers with a queue-submit API
    #[serde(default)]
    pub queue_url: Option<String>,
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfig>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            base_url: None,
            queue_url: None,
            requests_per_minute: None,
            models: BTreeMap::new(),
        }
    }
}

impl ProviderConfig {
    /// The credential, if one is configured and non-blank
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// All known providers
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub together_ai: ProviderConfig,
    #[serde(default)]
    pub replicate: ProviderConfig,
    #[serde(default)]
    pub openai: ProviderConfig,
    #[serde(default)]
    pub fal_ai: ProviderConfig,
}

impl ProvidersConfig {
    /// Providers in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ProviderConfig)> {
        PROVIDER_ORDER.into_iter().zip([
            &self.together_ai,
            &self.replicate,
            &self.openai,
            &self.fal_ai,
        ])
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = (&'static str, &mut ProviderConfig)> {
        PROVIDER_ORDER.into_iter().zip([
            &mut self.together_ai,
            &mut self.replicate,
            &mut self.openai,
            &mut self.fal_ai,
        ])
    }

    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        self.iter().find(|(n, _)| *n == name).map(|(_, c)| c)
    }

    /// Fill in built-in catalogues and conventional credential variables
    fn apply_defaults(&mut self) {
        for (name, provider) in self.iter_mut() {
            if provider.models.is_empty() {
                provider.models = default_catalog(name);
            }
            if provider.credential().is_none() {
                if let Some(var) = credential_env_var(name) {
                    if let Ok(value) = std::env::var(var) {
                        provider.api_key = Some(value);
                    }
                }
            }
        }
    }
}

/// Conventional environment variable holding a provider's credential
pub fn credential_env_var(provider: &str) -> Option<&'static str> {
    match provider {
        "together_ai" => Some("TOGETHER_API_KEY"),
        "replicate" => Some("REPLICATE_API_TOKEN"),
        "openai" => Some("OPENAI_API_KEY"),
        "fal_ai" => Some("FAL_KEY"),
        _ => None,
    }
}

/// Built-in model catalogue for a provider
pub fn default_catalog(provider: &str) -> BTreeMap<String, ModelConfig> {
    let entries: Vec<(&str, ModelConfig)> = match provider {
        "together_ai" => {
            let mut lora = ModelConfig::new("black-forest-labs/FLUX.1-dev-lora")
                .square(1024)
                .steps(30);
            lora.extra.insert("response_format".into(), json!("url"));
            lora.extra.insert(
                "image_loras".into(),
                json!([{
                    "path": "https://huggingface.co/Shakker-Labs/FLUX.1-dev-LoRA-Logo-Design",
                    "scale": 0.8
                }]),
            );
            vec![
                (
                    "flux_dev",
                    ModelConfig::new("black-forest-labs/FLUX.1-dev")
                        .square(1024)
                        .steps(30),
                ),
                ("flux_lora", lora),
                (
                    "flux_schnell",
                    ModelConfig::new("black-forest-labs/FLUX.1-schnell")
                        .square(1024)
                        .steps(4),
                ),
            ]
        }
        "replicate" => vec![
            (
                "galleri5_icons",
                ModelConfig::new("galleri5/icons").kind(ModelKind::Community),
            ),
            (
                "flux_schnell",
                ModelConfig::new("black-forest-labs/flux-schnell").kind(ModelKind::Official),
            ),
            (
                "ideogram_v2",
                ModelConfig::new("ideogram-ai/ideogram-v2").kind(ModelKind::Official),
            ),
            (
                "recraft_svg",
                ModelConfig::new("recraft-ai/recraft-v3-svg").kind(ModelKind::Official),
            ),
        ],
        "openai" => vec![(
            "dalle3",
            ModelConfig {
                endpoint: "dall-e-3".into(),
                size: Some("1024x1024".into()),
                quality: Some("standard".into()),
                n: Some(1),
                prompt_prefix: Some("logo, minimalist, ".into()),
                ..Default::default()
            },
        )],
        "fal_ai" => vec![
            ("flux_dev", ModelConfig::new("fal-ai/flux/dev")),
            ("recraft", ModelConfig::new("fal-ai/recraft-20b")),
            ("flux_schnell", ModelConfig::new("fal-ai/flux/schnell")),
        ],
        _ => vec![],
    };

    entries
        .into_iter()
        .map(|(name, config)| (name.to_string(), config))
        .collect()
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        // A missing .env is normal
        let _ = dotenvy::dotenv();

        let config = Config::builder()
            .set_default("generation.max_workers", default_max_workers() as i64)?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", default_log_format())?
            .add_source(
                File::with_name(path.as_ref().to_str().unwrap_or("config/default"))
                    .required(false),
            )
            // Override with environment variables (prefixed with ICON_FORGE__)
            .add_source(
                Environment::with_prefix("ICON_FORGE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.providers.apply_defaults();
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.generation.max_workers == 0 {
            return Err(AppError::Config(config::ConfigError::Message(
                "generation.max_workers must be at least 1".to_string(),
            )));
        }

        for (provider, provider_config) in self.providers.iter() {
            for (model, model_config) in &provider_config.models {
                if model_config.endpoint.trim().is_empty() {
                    return Err(AppError::Config(config::ConfigError::Message(format!(
                        "Model '{}:{}' has an empty endpoint",
                        provider, model
                    ))));
                }
            }
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        let mut providers = ProvidersConfig::default();
        for (name, provider) in providers.iter_mut() {
            provider.models = default_catalog(name);
        }

        Self {
            generation: GenerationConfig::default(),
            output: OutputConfig::default(),
            processing: ProcessingConfig::default(),
            logging: LoggingConfig::default(),
            providers,
        }
    }
}
