//! Plan execution against backends.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use qdb_hal::{Backend, Counts, HalError};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ExecutorConfig;
use crate::dataset::GenerationSnapshot;
use crate::planner::{ExecutionPlan, Step};

/// Raw output of an executed plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub strategy: String,
    pub backend: String,
    /// Terminal output of a deterministic backend.
    pub output: Option<String>,
    /// Observed distribution of a probabilistic backend.
    pub distribution: Option<Counts>,
    /// Repetitions of the terminal step actually run.
    pub repetitions: u32,
    pub units_consumed: u64,
    /// Outputs of the non-terminal steps, as `(operation, output)`.
    pub step_outputs: Vec<(String, String)>,
    /// Failures tolerated after enough samples were collected.
    pub partial_failures: Vec<String>,
    /// Dataset generations the plan was made against.
    pub generations: GenerationSnapshot,
    pub elapsed: Duration,
}

impl ExecutionResult {
    pub fn is_partial(&self) -> bool {
        !self.partial_failures.is_empty()
    }

    /// Rough in-memory footprint, used for cache accounting.
    pub fn approx_size_bytes(&self) -> u64 {
        let strings = self.strategy.len()
            + self.backend.len()
            + self.output.as_ref().map_or(0, String::len)
            + self
                .step_outputs
                .iter()
                .map(|(op, out)| op.len() + out.len())
                .sum::<usize>()
            + self.partial_failures.iter().map(String::len).sum::<usize>();
        let distribution = self
            .distribution
            .as_ref()
            .map_or(0, |d| d.iter().map(|(k, _)| k.len() + 8).sum::<usize>());
        (std::mem::size_of::<Self>() + strings + distribution) as u64
    }
}

/// Why a plan stopped before producing a result.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    #[error("execution cancelled")]
    Cancelled,

    #[error("step '{step}' failed: {source}")]
    Backend {
        step: String,
        #[source]
        source: HalError,
    },
}

impl ExecutionError {
    /// Attribute a backend error to `step`. A backend reporting its own
    /// cancellation ends the run as cancelled.
    fn from_backend(step: &str, source: HalError) -> Self {
        match source {
            HalError::Cancelled => ExecutionError::Cancelled,
            source => ExecutionError::Backend {
                step: step.to_string(),
                source,
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutionError::Cancelled => false,
            ExecutionError::Backend { source, .. } => source.is_retryable(),
        }
    }
}

/// Runs execution plans step by step.
#[derive(Debug, Clone)]
pub struct Executor {
    config: ExecutorConfig,
    units: Arc<AtomicU64>,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            units: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Backend units consumed by every execution so far, including failed
    /// attempts.
    pub fn units_consumed(&self) -> u64 {
        self.units.load(Ordering::Relaxed)
    }

    /// Execute `plan`.
    ///
    /// Cancellation is observed between steps and between batches, and only
    /// when the backend declares cooperative cancellation. Otherwise the run
    /// completes and the caller decides what to do with the result.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, ExecutionError> {
        let start = Instant::now();
        let backend = plan.strategy().backend();
        let caps = backend.capabilities();
        let cooperative = caps.features.cancel;

        let mut run = Run {
            units: 0,
            shared: &self.units,
        };
        let mut step_outputs = Vec::new();
        let mut output = None;
        let mut distribution = None;
        let mut repetitions = 0;
        let mut partial_failures = Vec::new();

        for step in plan.steps() {
            if cooperative && cancel.is_cancelled() {
                tracing::debug!(strategy = %plan.strategy_id(), step = %step.operation, "Execution cancelled at step boundary");
                return Err(ExecutionError::Cancelled);
            }

            if step.terminal && caps.probabilistic {
                let sampled = self
                    .sample(backend.as_ref(), step, cancel, cooperative, &mut run)
                    .await?;
                repetitions = sampled.repetitions;
                partial_failures = sampled.failures;
                distribution = Some(sampled.counts);
            } else {
                let out = backend
                    .run_once(&step.request())
                    .await
                    .map_err(|source| ExecutionError::from_backend(&step.operation, source))?;
                run.charge(step.unit_cost);
                if step.terminal {
                    repetitions = 1;
                    output = Some(out);
                } else {
                    step_outputs.push((step.operation.clone(), out));
                }
            }
        }

        let elapsed = start.elapsed();
        tracing::debug!(
            strategy = %plan.strategy_id(),
            backend = %caps.name,
            repetitions,
            units = run.units,
            elapsed_ms = elapsed.as_millis() as u64,
            "Plan executed"
        );

        Ok(ExecutionResult {
            strategy: plan.strategy_id().to_string(),
            backend: caps.name.clone(),
            output,
            distribution,
            repetitions,
            units_consumed: run.units,
            step_outputs,
            partial_failures,
            generations: plan.generations().clone(),
            elapsed,
        })
    }

    /// Run a probabilistic terminal step in batches until the repetition cap
    /// or until the mode frequency is known precisely enough.
    async fn sample(
        &self,
        backend: &dyn Backend,
        step: &Step,
        cancel: &CancellationToken,
        cooperative: bool,
        run: &mut Run<'_>,
    ) -> Result<Sampled, ExecutionError> {
        let cap = step.repetitions.max(1);
        let min = self.config.min_repetitions.min(cap);
        let batch_size = if backend.capabilities().features.run_repeated {
            self.config.batch_size
        } else {
            1
        };
        let request = step.request();

        let mut counts = Counts::new();
        let mut taken = 0u32;
        let mut failures = Vec::new();

        while taken < cap {
            if cooperative && cancel.is_cancelled() {
                tracing::debug!(step = %step.operation, taken, "Sampling cancelled between batches");
                return Err(ExecutionError::Cancelled);
            }

            let batch = batch_size.min(cap - taken);
            let result = if batch_size == 1 {
                backend
                    .run_once(&request)
                    .await
                    .map(|out| Counts::from_iter([(out, 1)]))
            } else {
                backend.run_repeated(&request, batch).await
            };

            match result {
                Ok(observed) => {
                    counts.merge(&observed);
                    taken += batch;
                    run.charge(step.unit_cost.saturating_mul(u64::from(batch)));
                }
                Err(HalError::Cancelled) => {
                    tracing::debug!(step = %step.operation, taken, "Backend cancelled the run");
                    return Err(ExecutionError::Cancelled);
                }
                Err(source) if taken > 0 && taken >= min => {
                    tracing::warn!(
                        step = %step.operation,
                        taken,
                        error = %source,
                        "Batch failed after enough samples, keeping partial result"
                    );
                    failures.push(format!("batch after {} samples: {}", taken, source));
                    break;
                }
                Err(source) => {
                    return Err(ExecutionError::from_backend(&step.operation, source));
                }
            }

            if taken >= min && self.converged(&counts) {
                tracing::trace!(step = %step.operation, taken, "Confidence target reached");
                break;
            }
        }

        Ok(Sampled {
            counts,
            repetitions: taken,
            failures,
        })
    }

    /// Whether the confidence half-width of the mode frequency is within the
    /// target.
    fn converged(&self, counts: &Counts) -> bool {
        let n = counts.total();
        let Some((_, mode)) = counts.mode() else {
            return false;
        };
        let p = mode as f64 / n as f64;
        half_width(p, n, self.config.z) <= self.config.target_half_width
    }
}

/// Normal-approximation half-width `z * sqrt(p(1-p)/n)`.
pub fn half_width(p: f64, n: u64, z: f64) -> f64 {
    if n == 0 {
        return f64::INFINITY;
    }
    z * (p * (1.0 - p) / n as f64).sqrt()
}

struct Sampled {
    counts: Counts,
    repetitions: u32,
    failures: Vec<String>,
}

struct Run<'a> {
    units: u64,
    shared: &'a AtomicU64,
}

impl Run<'_> {
    fn charge(&mut self, units: u64) {
        self.units = self.units.saturating_add(units);
        self.shared.fetch_add(units, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetCatalog;
    use crate::job::JobDescription;
    use crate::planner::Planner;
    use crate::registry::{LinearCostModel, Strategy, StrategyRegistry};
    use async_trait::async_trait;
    use qdb_adapter_sim::SimBackend;
    use qdb_hal::{Capabilities, HalResult, OperationRequest};
    use std::sync::atomic::AtomicU32;

    fn plan_for(backend: Arc<dyn Backend>, stages: &[&str], max_reps: u32) -> ExecutionPlan {
        let mut registry = StrategyRegistry::new();
        registry
            .register(
                Strategy::new("s", "op", LinearCostModel::new(0.0), backend)
                    .with_stages(stages.iter().map(|s| s.to_string()).collect()),
            )
            .unwrap();
        Planner::new(Arc::new(registry), Arc::new(DatasetCatalog::new()), max_reps)
            .plan(&JobDescription::new("op"))
            .unwrap()
    }

    fn config(max: u32, min: u32, batch: u32, target: f64) -> ExecutorConfig {
        ExecutorConfig {
            max_repetitions: max,
            min_repetitions: min,
            batch_size: batch,
            target_half_width: target,
            z: 1.96,
        }
    }

    #[tokio::test]
    async fn test_deterministic_plan() {
        let backend = Arc::new(SimBackend::exact("exact").with_output("op", "42"));
        let plan = plan_for(backend.clone(), &["prepare", "op"], 10);
        let executor = Executor::new(ExecutorConfig::default());

        let result = executor
            .execute(&plan, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.output.as_deref(), Some("42"));
        assert!(result.distribution.is_none());
        assert_eq!(result.repetitions, 1);
        assert_eq!(result.units_consumed, 2);
        assert_eq!(result.step_outputs, vec![("prepare".to_string(), "prepare()".to_string())]);
        assert_eq!(executor.units_consumed(), 2);
        assert_eq!(backend.invocations(), 2);
    }

    #[tokio::test]
    async fn test_certain_outcome_exits_at_min_repetitions() {
        let backend = Arc::new(SimBackend::sampled("s", vec![("1".into(), 1.0)], 3).unwrap());
        let plan = plan_for(backend.clone(), &["op"], 1_000);
        let executor = Executor::new(config(1_000, 100, 50, 0.02));

        let result = executor
            .execute(&plan, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.repetitions, 100);
        assert_eq!(result.distribution.unwrap().get("1"), 100);
        assert_eq!(result.units_consumed, 100);
        assert_eq!(backend.invocations(), 100);
    }

    #[tokio::test]
    async fn test_uncertain_outcome_runs_to_cap() {
        let backend = Arc::new(
            SimBackend::sampled("s", vec![("0".into(), 1.0), ("1".into(), 1.0)], 3).unwrap(),
        );
        let plan = plan_for(backend, &["op"], 200);
        let executor = Executor::new(config(200, 10, 50, 0.001));

        let result = executor
            .execute(&plan, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.repetitions, 200);
        assert_eq!(result.distribution.unwrap().total(), 200);
    }

    #[test]
    fn test_half_width() {
        assert_eq!(half_width(1.0, 100, 1.96), 0.0);
        assert!((half_width(0.5, 100, 2.0) - 0.1).abs() < 1e-12);
        assert!(half_width(0.5, 0, 1.96).is_infinite());
    }

    /// Sampling backend without native batching that alternates outcomes and
    /// fails after `ok` runs.
    struct Failing {
        caps: Capabilities,
        ok: u32,
        calls: AtomicU32,
        error: HalError,
    }

    impl Failing {
        fn new(ok: u32) -> Self {
            Self {
                caps: Capabilities::probabilistic("failing").with_run_repeated(false),
                ok,
                calls: AtomicU32::new(0),
                error: HalError::Fatal("device lost".into()),
            }
        }

        fn with_error(mut self, error: HalError) -> Self {
            self.error = error;
            self
        }
    }

    #[async_trait]
    impl Backend for Failing {
        fn name(&self) -> &str {
            &self.caps.name
        }

        fn capabilities(&self) -> &Capabilities {
            &self.caps
        }

        async fn run_once(&self, _request: &OperationRequest) -> HalResult<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.ok {
                Ok(if call % 2 == 0 { "x" } else { "y" }.into())
            } else {
                Err(self.error.clone())
            }
        }
    }

    #[tokio::test]
    async fn test_failure_after_min_yields_partial_result() {
        let plan = plan_for(Arc::new(Failing::new(5)), &["op"], 100);
        let executor = Executor::new(config(100, 5, 10, 0.0));

        let result = executor
            .execute(&plan, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.repetitions, 5);
        assert!(result.is_partial());
    }

    #[tokio::test]
    async fn test_failure_before_min_is_an_error() {
        let plan = plan_for(Arc::new(Failing::new(3)), &["op"], 100);
        let executor = Executor::new(config(100, 5, 10, 0.0));

        let err = executor
            .execute(&plan, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Backend { .. }));
        assert!(!err.is_retryable());
        assert_eq!(executor.units_consumed(), 3);
    }

    #[tokio::test]
    async fn test_backend_cancellation_is_not_a_partial_result() {
        let plan = plan_for(
            Arc::new(Failing::new(20).with_error(HalError::Cancelled)),
            &["op"],
            100,
        );
        let executor = Executor::new(config(100, 5, 10, 0.0));

        let err = executor
            .execute(&plan, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::Cancelled);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_backend_cancellation_in_deterministic_step() {
        let plan = plan_for(
            Arc::new(Failing::new(0).with_error(HalError::Cancelled)),
            &["warm", "op"],
            100,
        );
        let err = Executor::new(ExecutorConfig::default())
            .execute(&plan, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::Cancelled);
    }

    #[tokio::test]
    async fn test_cooperative_cancel_stops_before_first_step() {
        let backend = Arc::new(SimBackend::exact("exact").with_cancel(true));
        let plan = plan_for(backend.clone(), &["op"], 1);
        let token = CancellationToken::new();
        token.cancel();

        let err = Executor::new(ExecutorConfig::default())
            .execute(&plan, &token)
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::Cancelled);
        assert_eq!(backend.invocations(), 0);
    }

    #[tokio::test]
    async fn test_non_cooperative_backend_runs_to_completion() {
        let backend = Arc::new(SimBackend::exact("exact"));
        let plan = plan_for(backend.clone(), &["op"], 1);
        let token = CancellationToken::new();
        token.cancel();

        let result = Executor::new(ExecutorConfig::default())
            .execute(&plan, &token)
            .await;
        assert!(result.is_ok());
        assert_eq!(backend.invocations(), 1);
    }
}
