//! Generation pipeline - prompt expansion, fail-fast scheduling and reporting

pub mod classifier;
pub mod ledger;
pub mod prompt;
pub mod runner;
pub mod scheduler;
pub mod stats;
pub mod task;

pub use classifier::{classify, is_systemic, FailureCategory};
pub use ledger::FailureLedger;
pub use prompt::{load_prompts, parse_prompts, Prompt};
pub use runner::{
    GenerationPipeline, GenerationReport, GenerationRequest, PipelineReport, PipelineSummary,
};
pub use scheduler::{FailFastScheduler, SchedulerConfig};
pub use stats::RunStatistics;
pub use task::{expand, split_list, GenerationResult, GenerationTask, ModelSelection};
