//! The backend trait and capability descriptors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HalResult;
use crate::request::OperationRequest;
use crate::result::Counts;

/// Execution features a backend supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    /// Native batched invocations via [`Backend::run_repeated`].
    pub run_repeated: bool,
    /// The backend can be stopped between invocations without corrupting
    /// its state.
    pub cancel: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            run_repeated: false,
            cancel: false,
        }
    }
}

/// Static description of a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Backend name.
    pub name: String,
    /// Whether outputs are samples that must be aggregated over repetitions.
    pub probabilistic: bool,
    /// Supported execution features.
    pub features: Features,
    /// Operations this backend accepts. Empty means any.
    pub operations: Vec<String>,
}

impl Capabilities {
    /// Capabilities of a deterministic backend.
    pub fn deterministic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            probabilistic: false,
            features: Features::default(),
            operations: Vec::new(),
        }
    }

    /// Capabilities of a sampling backend with native batching.
    pub fn probabilistic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            probabilistic: true,
            features: Features {
                run_repeated: true,
                cancel: false,
            },
            operations: Vec::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: bool) -> Self {
        self.features.cancel = cancel;
        self
    }

    pub fn with_run_repeated(mut self, run_repeated: bool) -> Self {
        self.features.run_repeated = run_repeated;
        self
    }

    pub fn with_operations(mut self, operations: Vec<String>) -> Self {
        self.operations = operations;
        self
    }

    /// Whether the backend accepts `operation`.
    pub fn supports_operation(&self, operation: &str) -> bool {
        self.operations.is_empty() || self.operations.iter().any(|op| op == operation)
    }
}

/// A backend that runs planned operations.
///
/// Implementations must be safe to share between worker tasks; the pipeline
/// holds them behind `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend name, used in logs and plans.
    fn name(&self) -> &str;

    /// Static capabilities.
    fn capabilities(&self) -> &Capabilities;

    /// Run the operation once and return its output.
    ///
    /// For probabilistic backends the output is a single sample.
    async fn run_once(&self, request: &OperationRequest) -> HalResult<String>;

    /// Run the operation `repetitions` times and return the outcome counts.
    ///
    /// The default implementation loops over [`Backend::run_once`]; backends
    /// with native batching override it and set `features.run_repeated`.
    async fn run_repeated(&self, request: &OperationRequest, repetitions: u32) -> HalResult<Counts> {
        tracing::trace!(backend = self.name(), repetitions, "Emulating repeated run");
        let mut counts = Counts::new();
        for _ in 0..repetitions {
            let outcome = self.run_once(request).await?;
            counts.insert(outcome, 1);
        }
        Ok(counts)
    }
}
