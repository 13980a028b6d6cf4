//! Dataset generations used to invalidate cached results.
//!
//! Every registered dataset carries a generation counter starting at zero. A
//! write bumps the counter and produces a [`GenerationToken`]; cached results
//! planned against an older generation of that dataset become stale.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{PipelineError, PipelineResult};

/// Identifies the generation a dataset reached after a write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenerationToken {
    pub dataset: String,
    pub generation: u64,
}

/// Generations of the datasets a plan reads, captured at planning time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationSnapshot {
    generations: BTreeMap<String, u64>,
}

impl GenerationSnapshot {
    pub fn generation_of(&self, dataset: &str) -> Option<u64> {
        self.generations.get(dataset).copied()
    }

    /// Whether this snapshot predates `token`.
    pub fn is_stale_for(&self, token: &GenerationToken) -> bool {
        self.generations
            .get(&token.dataset)
            .is_some_and(|g| *g < token.generation)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.generations.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }
}

/// Registry of known datasets and their current generations.
#[derive(Debug, Default)]
pub struct DatasetCatalog {
    generations: RwLock<FxHashMap<String, u64>>,
}

impl DatasetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dataset. Returns false if it was already known.
    pub fn register(&self, dataset: impl Into<String>) -> bool {
        let dataset = dataset.into();
        let mut generations = self.generations.write();
        if generations.contains_key(&dataset) {
            return false;
        }
        tracing::debug!(dataset = %dataset, "Dataset registered");
        generations.insert(dataset, 0);
        true
    }

    pub fn contains(&self, dataset: &str) -> bool {
        self.generations.read().contains_key(dataset)
    }

    pub fn generation(&self, dataset: &str) -> Option<u64> {
        self.generations.read().get(dataset).copied()
    }

    /// Record a write to `dataset`, advancing its generation.
    pub fn record_write(&self, dataset: &str) -> PipelineResult<GenerationToken> {
        let mut generations = self.generations.write();
        let generation = generations
            .get_mut(dataset)
            .ok_or_else(|| PipelineError::Validation(format!("unknown dataset '{}'", dataset)))?;
        *generation += 1;
        Ok(GenerationToken {
            dataset: dataset.to_string(),
            generation: *generation,
        })
    }

    /// Capture the current generations of `datasets`.
    pub fn snapshot<'a>(
        &self,
        datasets: impl IntoIterator<Item = &'a String>,
    ) -> PipelineResult<GenerationSnapshot> {
        let generations = self.generations.read();
        let mut snapshot = BTreeMap::new();
        for dataset in datasets {
            let generation = generations.get(dataset).ok_or_else(|| {
                PipelineError::Validation(format!("unknown dataset '{}'", dataset))
            })?;
            snapshot.insert(dataset.clone(), *generation);
        }
        Ok(GenerationSnapshot {
            generations: snapshot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_write() {
        let catalog = DatasetCatalog::new();
        assert!(catalog.register("users"));
        assert!(!catalog.register("users"));
        assert_eq!(catalog.generation("users"), Some(0));

        let token = catalog.record_write("users").unwrap();
        assert_eq!(token.generation, 1);
        assert_eq!(catalog.generation("users"), Some(1));
    }

    #[test]
    fn test_write_to_unknown_dataset() {
        let catalog = DatasetCatalog::new();
        assert!(matches!(
            catalog.record_write("ghost"),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn test_snapshot_staleness() {
        let catalog = DatasetCatalog::new();
        catalog.register("users");
        catalog.register("orders");

        let reads = vec!["users".to_string()];
        let snapshot = catalog.snapshot(&reads).unwrap();
        assert_eq!(snapshot.generation_of("users"), Some(0));

        let orders = catalog.record_write("orders").unwrap();
        assert!(!snapshot.is_stale_for(&orders));

        let users = catalog.record_write("users").unwrap();
        assert!(snapshot.is_stale_for(&users));
    }

    #[test]
    fn test_snapshot_unknown_dataset() {
        let catalog = DatasetCatalog::new();
        let reads = vec!["ghost".to_string()];
        assert!(catalog.snapshot(&reads).is_err());
    }
}
