//! Declarative simulator descriptions, loadable from configuration files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::SimBackend;
use crate::error::SimResult;

/// How a simulator produces outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SimMode {
    /// Fixed output per operation.
    Exact {
        #[serde(default)]
        outputs: BTreeMap<String, String>,
    },
    /// Weighted random outcomes.
    Sampled {
        outcomes: BTreeMap<String, f64>,
        #[serde(default)]
        seed: u64,
    },
}

/// A simulator backend description.
///
/// ```yaml
/// name: sampler
/// mode: sampled
/// outcomes: { "42": 0.9, "7": 0.1 }
/// seed: 3
/// latency_ms: 5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimSpec {
    pub name: String,
    #[serde(flatten)]
    pub mode: SimMode,
    /// Simulated latency per backend call.
    #[serde(default)]
    pub latency_ms: u64,
    /// Advertise cooperative cancellation.
    #[serde(default)]
    pub cancel: bool,
    /// Number of leading calls that fail with a transient error.
    #[serde(default)]
    pub transient_failures: u32,
}

impl SimSpec {
    /// Build the described backend.
    pub fn build(&self) -> SimResult<SimBackend> {
        let backend = match &self.mode {
            SimMode::Exact { outputs } => {
                let mut backend = SimBackend::exact(&self.name);
                for (operation, output) in outputs {
                    backend = backend.with_output(operation, output);
                }
                backend
            }
            SimMode::Sampled { outcomes, seed } => SimBackend::sampled(
                &self.name,
                outcomes.iter().map(|(k, v)| (k.clone(), *v)).collect(),
                *seed,
            )?,
        };

        Ok(backend
            .with_latency(Duration::from_millis(self.latency_ms))
            .with_cancel(self.cancel)
            .with_transient_failures(self.transient_failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdb_hal::{Backend, OperationRequest};

    #[test]
    fn test_parse_sampled_spec() {
        let spec: SimSpec = serde_yaml::from_str(
            "name: sampler\nmode: sampled\noutcomes: { \"42\": 0.9, \"7\": 0.1 }\nseed: 3\nlatency_ms: 5\n",
        )
        .unwrap();
        assert_eq!(spec.latency_ms, 5);
        assert!(!spec.cancel);
        match &spec.mode {
            SimMode::Sampled { outcomes, seed } => {
                assert_eq!(outcomes.len(), 2);
                assert_eq!(*seed, 3);
            }
            other => panic!("expected sampled mode, got {:?}", other),
        }
        assert!(spec.build().unwrap().capabilities().features.run_repeated);
    }

    #[tokio::test]
    async fn test_exact_spec_outputs() {
        let spec: SimSpec =
            serde_yaml::from_str("name: exact\nmode: exact\noutputs: { lookup: alice }\n").unwrap();
        let backend = spec.build().unwrap();
        let out = backend
            .run_once(&OperationRequest::new("lookup"))
            .await
            .unwrap();
        assert_eq!(out, "alice");
    }

    #[test]
    fn test_empty_distribution_rejected() {
        let spec: SimSpec = serde_yaml::from_str("name: s\nmode: sampled\noutcomes: {}\n").unwrap();
        assert!(spec.build().is_err());
    }
}
