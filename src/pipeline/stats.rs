//! Run statistics

use serde::{Deserialize, Serialize};

use crate::pipeline::ledger::FailureLedger;
use crate::pipeline::task::GenerationResult;

/// Snapshot of one generation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total_tasks: usize,
    pub executed: usize,
    pub skipped: usize,
    pub successful: usize,
    pub failed: usize,
    /// `successful / executed`, 0 when nothing ran
    pub success_rate: f64,
    /// Wall clock seconds across the scheduling phase
    pub total_time: f64,
    pub avg_time_per_image: f64,
    pub failed_models: Vec<String>,
}

impl RunStatistics {
    /// Aggregate results. Order of `results` does not matter.
    pub fn from_results(
        results: &[GenerationResult],
        total_tasks: usize,
        total_time: f64,
        ledger: &FailureLedger,
    ) -> Self {
        let executed = results.len();
        let successful = results.iter().filter(|r| r.success).count();
        let (success_rate, avg_time_per_image) = if executed == 0 {
            (0.0, 0.0)
        } else {
            (
                successful as f64 / executed as f64,
                total_time / executed as f64,
            )
        };

        Self {
            total_tasks,
            executed,
            skipped: total_tasks.saturating_sub(executed),
            successful,
            failed: executed - successful,
            success_rate,
            total_time,
            avg_time_per_image,
            failed_models: ledger.failed_models(),
        }
    }

    pub fn empty() -> Self {
        Self::from_results(&[], 0, 0.0, &FailureLedger::new())
    }
}
