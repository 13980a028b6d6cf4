//! In-process simulator backend.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use qdb_hal::{Backend, Capabilities, Counts, HalError, HalResult, OperationRequest};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;

use crate::error::{SimError, SimResult};

enum Mode {
    Exact(FxHashMap<String, String>),
    Sampled {
        /// Outcomes with cumulative normalized weights.
        cumulative: Vec<(String, f64)>,
        rng: Mutex<StdRng>,
    },
}

/// Local simulator backend.
pub struct SimBackend {
    caps: Capabilities,
    mode: Mode,
    latency: Duration,
    failures_left: AtomicU32,
    invocations: AtomicU64,
    history: Mutex<Vec<OperationRequest>>,
}

impl SimBackend {
    /// A deterministic simulator.
    ///
    /// Operations without a configured output answer with
    /// `operation(name=value,...)`.
    pub fn exact(name: impl Into<String>) -> Self {
        Self::with_mode(Capabilities::deterministic(name), Mode::Exact(FxHashMap::default()))
    }

    /// A sampling simulator drawing from `outcomes` (weights need not sum to 1).
    pub fn sampled(name: impl Into<String>, outcomes: Vec<(String, f64)>, seed: u64) -> SimResult<Self> {
        let name = name.into();
        if outcomes.is_empty() {
            return Err(SimError::EmptyDistribution(name));
        }
        for (outcome, weight) in &outcomes {
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(SimError::InvalidWeight {
                    outcome: outcome.clone(),
                    weight: *weight,
                });
            }
        }

        let total: f64 = outcomes.iter().map(|(_, w)| w).sum();
        let mut acc = 0.0;
        let cumulative = outcomes
            .into_iter()
            .map(|(outcome, weight)| {
                acc += weight / total;
                (outcome, acc)
            })
            .collect();

        Ok(Self::with_mode(
            Capabilities::probabilistic(name),
            Mode::Sampled {
                cumulative,
                rng: Mutex::new(StdRng::seed_from_u64(seed)),
            },
        ))
    }

    fn with_mode(caps: Capabilities, mode: Mode) -> Self {
        Self {
            caps,
            mode,
            latency: Duration::ZERO,
            failures_left: AtomicU32::new(0),
            invocations: AtomicU64::new(0),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Fix the output of `operation` (exact mode only).
    pub fn with_output(mut self, operation: impl Into<String>, output: impl Into<String>) -> Self {
        if let Mode::Exact(outputs) = &mut self.mode {
            outputs.insert(operation.into(), output.into());
        }
        self
    }

    /// Sleep this long on every backend call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Advertise cooperative cancellation support.
    pub fn with_cancel(mut self, cancel: bool) -> Self {
        self.caps = self.caps.with_cancel(cancel);
        self
    }

    /// Fail the next `n` calls with [`HalError::Transient`].
    pub fn with_transient_failures(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Restrict the operations this backend accepts.
    pub fn with_operations(mut self, operations: Vec<String>) -> Self {
        self.caps = self.caps.with_operations(operations);
        self
    }

    /// Number of individual runs served so far (a batch of `n` counts `n`).
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Requests served so far, in arrival order. Batches appear once.
    pub fn history(&self) -> Vec<OperationRequest> {
        self.history.lock().clone()
    }

    async fn prepare(&self, request: &OperationRequest) -> HalResult<()> {
        if !self.caps.supports_operation(&request.operation) {
            return Err(HalError::UnsupportedOperation(request.operation.clone()));
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            tracing::debug!(backend = %self.caps.name, operation = %request.operation, "Injecting transient failure");
            return Err(HalError::Transient(format!(
                "simulated failure in '{}'",
                request.operation
            )));
        }
        self.history.lock().push(request.clone());
        Ok(())
    }

    fn sample(&self, cumulative: &[(String, f64)], rng: &Mutex<StdRng>) -> String {
        let r: f64 = rng.lock().r#gen();
        cumulative
            .iter()
            .find(|(_, bound)| r < *bound)
            .or_else(|| cumulative.last())
            .map(|(outcome, _)| outcome.clone())
            .unwrap_or_default()
    }
}

fn describe(request: &OperationRequest) -> String {
    let params: Vec<String> = request
        .params
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect();
    format!("{}({})", request.operation, params.join(","))
}

#[async_trait]
impl Backend for SimBackend {
    fn name(&self) -> &str {
        &self.caps.name
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    async fn run_once(&self, request: &OperationRequest) -> HalResult<String> {
        self.prepare(request).await?;
        self.invocations.fetch_add(1, Ordering::SeqCst);

        let output = match &self.mode {
            Mode::Exact(outputs) => outputs
                .get(&request.operation)
                .cloned()
                .unwrap_or_else(|| describe(request)),
            Mode::Sampled { cumulative, rng } => self.sample(cumulative, rng),
        };
        tracing::trace!(backend = %self.caps.name, operation = %request.operation, %output, "Simulated run");
        Ok(output)
    }

    async fn run_repeated(&self, request: &OperationRequest, repetitions: u32) -> HalResult<Counts> {
        if repetitions == 0 {
            return Err(HalError::InvalidRequest(
                "repetitions must be at least 1".into(),
            ));
        }
        self.prepare(request).await?;
        self.invocations
            .fetch_add(u64::from(repetitions), Ordering::SeqCst);

        let mut counts = Counts::new();
        match &self.mode {
            Mode::Exact(outputs) => {
                let output = outputs
                    .get(&request.operation)
                    .cloned()
                    .unwrap_or_else(|| describe(request));
                counts.insert(output, u64::from(repetitions));
            }
            Mode::Sampled { cumulative, rng } => {
                for _ in 0..repetitions {
                    counts.insert(self.sample(cumulative, rng), 1);
                }
            }
        }
        Ok(counts)
    }
}
