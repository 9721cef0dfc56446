//! Fail-fast scheduler
//!
//! Tasks are grouped by `provider:model`. Each group starts with one task run
//! on its own; if that task fails systemically (rate limit, auth, quota,
//! outage, missing model) the rest of the group is skipped. Otherwise the
//! remaining tasks run on a bounded pool. A systemic failure seen inside the
//! pool marks the model for the rest of the run, but tasks already submitted
//! in that batch still run to completion.

use futures::stream::{FuturesUnordered, StreamExt};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::pipeline::classifier::classify;
use crate::pipeline::ledger::FailureLedger;
use crate::pipeline::task::{GenerationResult, GenerationTask};
use crate::provider::ProviderRegistry;

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of tasks in flight within a model group
    pub max_concurrency: usize,
    /// Overall budget for one task, on top of the adapter's own timeouts
    pub task_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            task_timeout: Some(Duration::from_secs(300)),
        }
    }
}

pub struct FailFastScheduler {
    registry: Arc<ProviderRegistry>,
    config: SchedulerConfig,
}

impl FailFastScheduler {
    pub fn new(registry: Arc<ProviderRegistry>, config: SchedulerConfig) -> Self {
        Self { registry, config }
    }

    /// Run every task, returning one result per executed task in completion
    /// order. Skipped tasks produce no result. The ledger is reset first.
    pub async fn execute(
        &self,
        tasks: Vec<GenerationTask>,
        ledger: &FailureLedger,
    ) -> Vec<GenerationResult> {
        ledger.reset();

        let groups = group_by_model(tasks);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut results = Vec::new();

        for (model_key, group) in groups {
            if ledger.contains(&model_key) {
                warn!(model_key = %model_key, skipped = group.len(), "Model already failed, skipping group");
                continue;
            }

            let mut remaining = group.into_iter();
            let Some(first) = remaining.next() else {
                continue;
            };

            let first_result = self.run_task(first).await;
            let systemic = record_failure(ledger, &first_result);
            results.push(first_result);

            let rest: Vec<GenerationTask> = remaining.collect();
            if systemic {
                warn!(
                    model_key = %model_key,
                    skipped = rest.len(),
                    "Systemic failure on first task, skipping remaining tasks for model"
                );
                continue;
            }
            if rest.is_empty() {
                continue;
            }

            debug!(model_key = %model_key, tasks = rest.len(), "Submitting batch to worker pool");

            let mut in_flight: FuturesUnordered<_> = rest
                .into_iter()
                .map(|task| {
                    let semaphore = semaphore.clone();
                    async move {
                        let _permit = match semaphore.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => {
                                return GenerationResult::failed(
                                    &task,
                                    "Failed to acquire worker permit",
                                    0.0,
                                )
                            }
                        };
                        self.run_task(task).await
                    }
                })
                .collect();

            while let Some(result) = in_flight.next().await {
                record_failure(ledger, &result);
                results.push(result);
            }
        }

        results
    }

    /// Execute one task. Provider errors, timeouts and panics all become a
    /// failed result.
    async fn run_task(&self, task: GenerationTask) -> GenerationResult {
        let started = Instant::now();

        let Some(adapter) = self.registry.get(&task.spec.provider) else {
            return GenerationResult::failed(
                &task,
                format!("Generator not available: {}", task.spec.provider),
                0.0,
            );
        };

        info!(
            provider = %task.spec.provider,
            model = %task.spec.model,
            prompt_id = %task.prompt.id,
            "Generating"
        );

        let prompt = task.prompt.text.clone();
        let prompt_id = task.prompt.id.clone();
        let model = task.spec.model.clone();
        let task_timeout = self.config.task_timeout;

        let handle = tokio::spawn(async move {
            let call = adapter.generate(&prompt, &prompt_id, &model);
            match task_timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(AppError::Timeout(
                        "task did not finish within its time limit".to_string(),
                    )),
                },
                None => call.await,
            }
        });

        let outcome = handle.await;
        let duration = started.elapsed().as_secs_f64();

        match outcome {
            Ok(Ok(path)) => {
                info!(
                    model_key = %task.model_key(),
                    prompt_id = %task.prompt.id,
                    duration_secs = format!("{:.2}", duration),
                    "Generation succeeded"
                );
                GenerationResult::succeeded(&task, path, duration)
            }
            Ok(Err(e)) => {
                error!(
                    model_key = %task.model_key(),
                    prompt_id = %task.prompt.id,
                    error = %e,
                    "Generation failed"
                );
                GenerationResult::failed(&task, e.to_string(), duration)
            }
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    join_error.to_string()
                };
                error!(
                    model_key = %task.model_key(),
                    prompt_id = %task.prompt.id,
                    error = %message,
                    "Generation task aborted"
                );
                GenerationResult::failed(&task, format!("Internal error: {}", message), duration)
            }
        }
    }
}

/// Group tasks by model key, keeping the order in which models first appear
pub fn group_by_model(tasks: Vec<GenerationTask>) -> Vec<(String, Vec<GenerationTask>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<GenerationTask>)> = Vec::new();

    for task in tasks {
        let key = task.model_key();
        match index.get(&key) {
            Some(&i) => groups[i].1.push(task),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![task]));
            }
        }
    }

    groups
}

/// Mark the model in the ledger if `result` is a systemic failure
fn record_failure(ledger: &FailureLedger, result: &GenerationResult) -> bool {
    if result.success {
        return false;
    }
    let Some(category) = result.error.as_deref().and_then(classify) else {
        return false;
    };
    if ledger.mark(&result.model_key, category) {
        warn!(
            model_key = %result.model_key,
            category = %category,
            "Model marked as failed for this run"
        );
    }
    true
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
