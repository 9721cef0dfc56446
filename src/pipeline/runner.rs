//! End-to-end generation pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{AppError, Result};
use crate::pipeline::ledger::FailureLedger;
use crate::pipeline::prompt::{load_prompts, Prompt};
use crate::pipeline::scheduler::{FailFastScheduler, SchedulerConfig};
use crate::pipeline::stats::RunStatistics;
use crate::pipeline::task::{expand, GenerationResult, ModelSelection};
use crate::postprocess::{PostProcessor, ProcessingOutput};
use crate::provider::ProviderRegistry;
use crate::storage::collect_images;

/// File the latest report is written to, under the logs directory
pub const REPORT_FILE: &str = "last_generation_results.json";

/// Parameters of one generation run
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub selection: ModelSelection,
    /// Restrict to these prompt ids; `None` runs every prompt
    pub prompt_ids: Option<Vec<String>>,
    /// Overrides `generation.max_workers`
    pub max_workers: Option<usize>,
}

impl GenerationRequest {
    pub fn all_models() -> Self {
        Self {
            selection: ModelSelection::All,
            prompt_ids: None,
            max_workers: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub statistics: RunStatistics,
    pub results: Vec<GenerationResult>,
}

impl GenerationReport {
    /// Paths of every successfully generated image
    pub fn generated_files(&self) -> Vec<PathBuf> {
        self.results
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.file_path.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub images_generated: usize,
    pub images_processed: usize,
    pub ico_files_created: usize,
    pub total_time: f64,
}

/// Generation followed by post-processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub generation: GenerationReport,
    pub processing: ProcessingOutput,
    pub summary: PipelineSummary,
}

pub struct GenerationPipeline {
    settings: Settings,
    registry: Arc<ProviderRegistry>,
    post: PostProcessor,
}

impl GenerationPipeline {
    /// Build the registry and post-processing stages from configuration
    pub fn new(settings: Settings) -> Self {
        let registry = Arc::new(ProviderRegistry::from_settings(&settings));
        let post = PostProcessor::from_config(&settings.processing, &settings.output);
        Self::with_components(settings, registry, post)
    }

    pub fn with_components(settings: Settings, registry: Arc<ProviderRegistry>, post: PostProcessor) -> Self {
        Self {
            settings,
            registry,
            post,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Probe providers (once) and fail if none is usable
    pub async fn initialize(&self) -> Result<BTreeMap<String, bool>> {
        let status = self.registry.initialize().await;
        if !status.values().any(|available| *available) {
            return Err(AppError::NoProvidersAvailable);
        }
        info!(
            providers = status.values().filter(|a| **a).count(),
            models = self.registry.model_count(),
            "Pipeline initialized"
        );
        Ok(status)
    }

    /// Prompts from the configured catalogue file
    pub async fn load_prompts(&self) -> Result<Vec<Prompt>> {
        load_prompts(Path::new(&self.settings.generation.prompts_file)).await
    }

    /// Run a generation over the configured prompt catalogue
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationReport> {
        self.initialize().await?;
        let prompts = self.load_prompts().await?;
        self.generate_with_prompts(prompts, request).await
    }

    /// Run a generation over the given prompts.
    ///
    /// Configuration errors (no providers, prompts or models) are returned
    /// before any provider call; every other failure ends up in the report.
    pub async fn generate_with_prompts(
        &self,
        prompts: Vec<Prompt>,
        request: &GenerationRequest,
    ) -> Result<GenerationReport> {
        self.initialize().await?;

        let tasks = expand(
            &self.registry,
            prompts,
            request.prompt_ids.as_deref(),
            &request.selection,
        )?;
        let total_tasks = tasks.len();

        let scheduler = FailFastScheduler::new(
            self.registry.clone(),
            SchedulerConfig {
                max_concurrency: request
                    .max_workers
                    .unwrap_or(self.settings.generation.max_workers),
                task_timeout: self.settings.generation.task_timeout(),
            },
        );

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(run_id = %run_id, tasks = total_tasks, "Starting generation");

        let ledger = FailureLedger::new();
        let clock = Instant::now();
        let results = scheduler.execute(tasks, &ledger).await;
        let total_time = clock.elapsed().as_secs_f64();

        let statistics = RunStatistics::from_results(&results, total_tasks, total_time, &ledger);
        info!(
            run_id = %run_id,
            successful = statistics.successful,
            executed = statistics.executed,
            skipped = statistics.skipped,
            total_time = format!("{:.1}", total_time),
            "Generation complete"
        );
        if !statistics.failed_models.is_empty() {
            warn!(failed_models = ?statistics.failed_models, "Models skipped after systemic failures");
        }

        Ok(GenerationReport {
            run_id,
            started_at,
            statistics,
            results,
        })
    }

    /// Post-process specific files
    pub async fn process(&self, paths: &[PathBuf], remove_bg: bool, create_ico: bool) -> ProcessingOutput {
        self.post.run(paths, remove_bg, create_ico).await
    }

    /// Post-process every image in `dir` (the raw directory by default)
    pub async fn process_directory(
        &self,
        dir: Option<&Path>,
        remove_bg: bool,
        create_ico: bool,
    ) -> Result<ProcessingOutput> {
        let dir = dir.unwrap_or(&self.settings.output.raw_dir);
        if !dir.is_dir() {
            return Err(AppError::Processing(format!(
                "Input directory not found: {}",
                dir.display()
            )));
        }

        let files = collect_images(dir).await?;
        if files.is_empty() {
            warn!(dir = %dir.display(), "No images found to process");
            return Ok(ProcessingOutput::default());
        }
        info!(dir = %dir.display(), files = files.len(), "Processing images");
        Ok(self.process(&files, remove_bg, create_ico).await)
    }

    /// Generate, then post-process the images that were produced
    pub async fn run_complete(
        &self,
        request: &GenerationRequest,
        remove_bg: bool,
        create_ico: bool,
    ) -> Result<PipelineReport> {
        let generation = self.generate(request).await?;
        Ok(self.finish(generation, remove_bg, create_ico).await)
    }

    /// Post-process a finished generation and summarise both phases
    pub async fn finish(&self, generation: GenerationReport, remove_bg: bool, create_ico: bool) -> PipelineReport {
        let files = generation.generated_files();
        let processing = self.process(&files, remove_bg, create_ico).await;

        let summary = PipelineSummary {
            images_generated: generation.statistics.successful,
            images_processed: processing.processed.len(),
            ico_files_created: processing.icons.len(),
            total_time: generation.statistics.total_time,
        };

        PipelineReport {
            generation,
            processing,
            summary,
        }
    }

    /// Write a report as pretty JSON to `{logs_dir}/last_generation_results.json`
    pub async fn save_report<T: Serialize>(&self, report: &T) -> Result<PathBuf> {
        let logs_dir = &self.settings.output.logs_dir;
        tokio::fs::create_dir_all(logs_dir).await?;
        let path = logs_dir.join(REPORT_FILE);
        let body = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(&path, body).await?;
        info!(path = %path.display(), "Saved run report");
        Ok(path)
    }
}
