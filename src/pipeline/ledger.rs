//! Run-scoped record of models that failed systemically

use dashmap::DashMap;

use crate::pipeline::classifier::FailureCategory;

/// Set of `provider:model` keys marked as systemically broken during a run.
///
/// Concurrent workers may mark the same model; the first category recorded
/// is kept. Entries are never removed except by [`FailureLedger::reset`] at
/// the start of a run.
#[derive(Debug, Default)]
pub struct FailureLedger {
    failed: DashMap<String, FailureCategory>,
}

impl FailureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a model as failed. Returns `true` if it was not marked before.
    pub fn mark(&self, model_key: &str, category: FailureCategory) -> bool {
        let mut inserted = false;
        self.failed.entry(model_key.to_string()).or_insert_with(|| {
            inserted = true;
            category
        });
        inserted
    }

    pub fn contains(&self, model_key: &str) -> bool {
        self.failed.contains_key(model_key)
    }

    pub fn category(&self, model_key: &str) -> Option<FailureCategory> {
        self.failed.get(model_key).map(|entry| *entry.value())
    }

    /// Failed model keys, sorted
    pub fn failed_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.failed.iter().map(|entry| entry.key().clone()).collect();
        models.sort();
        models
    }

    pub fn len(&self) -> usize {
        self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn reset(&self) {
        self.failed.clear();
    }
}
