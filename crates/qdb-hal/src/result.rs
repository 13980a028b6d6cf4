//! Outcome distributions returned by repeated runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Observed outcome counts from repeated runs of one operation.
///
/// Keys are kept ordered so that iteration, and therefore mode selection, is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    counts: BTreeMap<String, u64>,
}

impl Counts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `n` observations of `outcome`.
    pub fn insert(&mut self, outcome: impl Into<String>, n: u64) {
        if n == 0 {
            return;
        }
        *self.counts.entry(outcome.into()).or_insert(0) += n;
    }

    /// Fold another distribution into this one.
    pub fn merge(&mut self, other: &Counts) {
        for (outcome, n) in &other.counts {
            self.insert(outcome.clone(), *n);
        }
    }

    pub fn get(&self, outcome: &str) -> u64 {
        self.counts.get(outcome).copied().unwrap_or(0)
    }

    /// Total number of observations.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Most frequent outcome. Ties go to the lexicographically smallest key.
    pub fn mode(&self) -> Option<(&str, u64)> {
        let mut best: Option<(&str, u64)> = None;
        for (outcome, &n) in &self.counts {
            match best {
                Some((_, best_n)) if n <= best_n => {}
                _ => best = Some((outcome.as_str(), n)),
            }
        }
        best
    }

    /// Observed frequency of `outcome`, in `[0, 1]`.
    pub fn frequency(&self, outcome: &str) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.get(outcome) as f64 / total as f64
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, u64)> for Counts {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        let mut counts = Counts::new();
        for (outcome, n) in iter {
            counts.insert(outcome, n);
        }
        counts
    }
}
