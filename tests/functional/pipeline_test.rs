//! Functional tests for the end-to-end generation pipeline

#[path = "../common/mod.rs"]
mod common;

use async_trait::async_trait;
use common::{prompts, registry_with, Behavior, MockProvider};
use icon_forge::config::Settings;
use icon_forge::error::AppError;
use icon_forge::pipeline::{GenerationPipeline, GenerationReport, GenerationRequest, ModelSelection};
use icon_forge::postprocess::{BatchProcessor, PostProcessor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Pretends to convert every file with a matching extension
struct RenameStage {
    extensions: &'static [&'static str],
    suffix: &'static str,
}

#[async_trait]
impl BatchProcessor for RenameStage {
    fn name(&self) -> &str {
        "rename"
    }

    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext))
    }

    async fn process_batch(&self, paths: &[PathBuf], out_dir: &Path) -> Vec<PathBuf> {
        paths
            .iter()
            .filter(|p| self.supports(p))
            .map(|p| {
                let stem = p.file_stem().unwrap().to_string_lossy();
                out_dir.join(format!("{}{}", stem, self.suffix))
            })
            .collect()
    }
}

fn settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.output.raw_dir = dir.join("raw");
    settings.output.processed_dir = dir.join("processed");
    settings.output.icons_dir = dir.join("icons");
    settings.output.logs_dir = dir.join("logs");
    settings.output.cache_dir = dir.join("cache");
    settings.generation.prompts_file = dir.join("prompts.yaml").to_string_lossy().into_owned();
    settings
}

fn post_processor(dir: &Path) -> PostProcessor {
    PostProcessor::new(
        Some(Arc::new(RenameStage {
            extensions: &["png", "jpg"],
            suffix: "_nobg.png",
        })),
        Some(Arc::new(RenameStage {
            extensions: &["png"],
            suffix: ".ico",
        })),
        dir.join("processed"),
        dir.join("icons"),
    )
}

async fn pipeline(dir: &Path, providers: &[Arc<MockProvider>]) -> GenerationPipeline {
    let registry = registry_with(providers).await;
    GenerationPipeline::with_components(settings(dir), registry, post_processor(dir))
}

fn request(models: &str) -> GenerationRequest {
    GenerationRequest {
        selection: ModelSelection::from_list(models),
        prompt_ids: None,
        max_workers: Some(2),
    }
}

#[tokio::test]
async fn test_no_live_providers_is_fatal() {
    let dir = TempDir::new().unwrap();
    let offline = Arc::new(
        MockProvider::new("openai")
            .model("dalle3", Behavior::Succeed)
            .unreachable(),
    );
    let pipeline = pipeline(dir.path(), &[offline.clone()]).await;

    let err = pipeline
        .generate_with_prompts(prompts(2), &GenerationRequest::all_models())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NoProvidersAvailable));
    assert!(offline.calls().is_empty());
}

#[tokio::test]
async fn test_fail_fast_run_statistics() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(
        MockProvider::new("together_ai")
            .model("model_a", Behavior::Succeed)
            .model("model_b", Behavior::Fail("401 unauthorized".into()))
            .model("model_c", Behavior::Succeed),
    );
    let pipeline = pipeline(dir.path(), &[provider]).await;

    let report = pipeline
        .generate_with_prompts(prompts(2), &GenerationRequest::all_models())
        .await
        .unwrap();
    let stats = &report.statistics;

    assert_eq!(stats.total_tasks, 6);
    assert_eq!(stats.executed, 5);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.successful, 4);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.failed_models, vec!["together_ai:model_b"]);
    assert_eq!(report.results.len(), 5);
    assert_eq!(report.generated_files().len(), 4);
}

#[tokio::test]
async fn test_each_run_gets_a_fresh_ledger() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(
        MockProvider::new("openai").model("dalle3", Behavior::Fail("rate limit exceeded (429)".into())),
    );
    let pipeline = pipeline(dir.path(), &[provider.clone()]).await;

    for _ in 0..2 {
        let report = pipeline
            .generate_with_prompts(prompts(3), &request("dalle3"))
            .await
            .unwrap();
        assert_eq!(report.statistics.executed, 1);
        assert_eq!(report.statistics.skipped, 2);
    }
    assert_eq!(provider.calls_for("dalle3"), 2);
}

#[tokio::test]
async fn test_unresolvable_models_fail_before_any_call() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new("openai").model("dalle3", Behavior::Succeed));
    let pipeline = pipeline(dir.path(), &[provider.clone()]).await;

    let err = pipeline
        .generate_with_prompts(prompts(2), &request("nonexistent_model"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NoModels));
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn test_generate_loads_prompt_catalogue() {
    let dir = TempDir::new().unwrap();
    tokio::fs::write(
        dir.path().join("prompts.yaml"),
        "prompts:\n  - id: fox\n    title: Fox\n    prompt: a red fox\n  - id: owl\n    prompt: an owl\n",
    )
    .await
    .unwrap();

    let provider = Arc::new(MockProvider::new("openai").model("dalle3", Behavior::Succeed));
    let pipeline = pipeline(dir.path(), &[provider.clone()]).await;

    let request = GenerationRequest {
        selection: ModelSelection::All,
        prompt_ids: Some(vec!["owl".to_string()]),
        max_workers: None,
    };
    let report = pipeline.generate(&request).await.unwrap();

    assert_eq!(report.statistics.total_tasks, 1);
    assert_eq!(provider.calls(), vec![("owl".to_string(), "dalle3".to_string())]);
}

#[tokio::test]
async fn test_run_complete_processes_generated_files() {
    let dir = TempDir::new().unwrap();
    tokio::fs::write(
        dir.path().join("prompts.yaml"),
        "- id: p1\n  prompt: one\n- id: p2\n  prompt: two\n",
    )
    .await
    .unwrap();

    let provider = Arc::new(
        MockProvider::new("together_ai")
            .model("flux_dev", Behavior::Succeed)
            .model("broken", Behavior::FailFor(vec!["p2".into()], "connection reset".into())),
    );
    let pipeline = pipeline(dir.path(), &[provider]).await;

    let report = pipeline
        .run_complete(&GenerationRequest::all_models(), true, true)
        .await
        .unwrap();

    assert_eq!(report.summary.images_generated, 3);
    assert_eq!(report.summary.images_processed, 3);
    assert_eq!(report.summary.ico_files_created, 3);
    assert!(report
        .processing
        .icons
        .contains(&dir.path().join("icons/p1_flux_dev_nobg.ico")));
}

#[tokio::test]
async fn test_report_is_persisted() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new("openai").model("dalle3", Behavior::Succeed));
    let pipeline = pipeline(dir.path(), &[provider]).await;

    let report = pipeline
        .generate_with_prompts(prompts(2), &request("openai:dalle3"))
        .await
        .unwrap();
    let path = pipeline.save_report(&report).await.unwrap();

    assert_eq!(path, dir.path().join("logs/last_generation_results.json"));
    let saved: GenerationReport =
        serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
    assert_eq!(saved.run_id, report.run_id);
    assert_eq!(saved.statistics, report.statistics);
    assert_eq!(saved.results.len(), 2);
}

#[tokio::test]
async fn test_process_directory() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("raw");
    tokio::fs::create_dir_all(&raw).await.unwrap();
    for name in ["a.png", "b.svg", "notes.txt"] {
        tokio::fs::write(raw.join(name), b"x").await.unwrap();
    }

    let provider = Arc::new(MockProvider::new("openai").model("dalle3", Behavior::Succeed));
    let pipeline = pipeline(dir.path(), &[provider]).await;

    let output = pipeline.process_directory(None, true, true).await.unwrap();
    assert_eq!(output.processed, vec![dir.path().join("processed/a_nobg.png")]);
    // svg skips background removal and is not an icon source either
    assert_eq!(output.icons, vec![dir.path().join("icons/a_nobg.ico")]);

    let missing = pipeline
        .process_directory(Some(&dir.path().join("nope")), true, true)
        .await;
    assert!(missing.is_err());
}
