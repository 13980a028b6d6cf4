//! Strategy registry and cost models.
//!
//! A [`Strategy`] binds an operation kind to a cost model and the backend that
//! runs it. The registry keeps strategies in registration order; that order is
//! the planner's final tie-break.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use qdb_hal::Backend;
use rustc_hash::FxHashMap;

use crate::error::{PipelineError, PipelineResult};
use crate::job::JobDescription;

/// Estimated cost of a step or plan.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostEstimate {
    /// Backend resource units.
    pub units: u64,
    pub latency: Duration,
    /// Expected error or variance of the output. Zero for exact backends.
    pub variance: f64,
}

impl CostEstimate {
    pub fn new(units: u64, latency: Duration) -> Self {
        Self {
            units,
            latency,
            variance: 0.0,
        }
    }

    /// Cost of running this estimate `repetitions` times and averaging.
    pub fn repeated(self, repetitions: u32) -> Self {
        let reps = repetitions.max(1);
        Self {
            units: self.units.saturating_mul(u64::from(reps)),
            latency: self.latency.saturating_mul(reps),
            variance: self.variance / f64::from(reps),
        }
    }

    /// Sum of two sequential estimates.
    pub fn then(self, other: CostEstimate) -> Self {
        Self {
            units: self.units.saturating_add(other.units),
            latency: self.latency.saturating_add(other.latency),
            variance: self.variance + other.variance,
        }
    }
}

/// Estimates the cost of running one stage of a strategy for a job.
///
/// Implemented for closures of the form `Fn(&str, &JobDescription) -> CostEstimate`,
/// where the first argument is the stage's backend operation.
pub trait CostModel: Send + Sync {
    fn estimate(&self, operation: &str, job: &JobDescription) -> CostEstimate;
}

impl<F> CostModel for F
where
    F: Fn(&str, &JobDescription) -> CostEstimate + Send + Sync,
{
    fn estimate(&self, operation: &str, job: &JobDescription) -> CostEstimate {
        self(operation, job)
    }
}

/// Cost linear in the declared input size.
///
/// `units = base_units + ceil(multiplier * input_size)` and
/// `latency = latency_per_unit * units`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearCostModel {
    pub base_units: u64,
    pub multiplier: f64,
    pub latency_per_unit: Duration,
    pub variance: f64,
}

impl LinearCostModel {
    pub fn new(multiplier: f64) -> Self {
        Self {
            base_units: 1,
            multiplier,
            latency_per_unit: Duration::from_millis(1),
            variance: 0.0,
        }
    }

    pub fn with_base_units(mut self, base_units: u64) -> Self {
        self.base_units = base_units;
        self
    }

    pub fn with_latency_per_unit(mut self, latency: Duration) -> Self {
        self.latency_per_unit = latency;
        self
    }

    pub fn with_variance(mut self, variance: f64) -> Self {
        self.variance = variance;
        self
    }
}

impl CostModel for LinearCostModel {
    fn estimate(&self, _operation: &str, job: &JobDescription) -> CostEstimate {
        let scaled = (self.multiplier * job.input_size as f64).ceil();
        let scaled = if scaled.is_finite() && scaled > 0.0 {
            scaled.min(u64::MAX as f64) as u64
        } else {
            0
        };
        let units = self.base_units.saturating_add(scaled);
        CostEstimate {
            units,
            latency: self
                .latency_per_unit
                .saturating_mul(u32::try_from(units).unwrap_or(u32::MAX)),
            variance: self.variance,
        }
    }
}

/// A way of executing one operation kind on one backend.
pub struct Strategy {
    id: String,
    operation_kind: String,
    stages: Vec<String>,
    required_params: Vec<String>,
    cost_model: Box<dyn CostModel>,
    backend: Arc<dyn Backend>,
}

impl Strategy {
    /// A single-stage strategy whose backend operation is the operation kind.
    pub fn new(
        id: impl Into<String>,
        operation_kind: impl Into<String>,
        cost_model: impl CostModel + 'static,
        backend: Arc<dyn Backend>,
    ) -> Self {
        let operation_kind = operation_kind.into();
        Self {
            id: id.into(),
            stages: vec![operation_kind.clone()],
            operation_kind,
            required_params: Vec::new(),
            cost_model: Box::new(cost_model),
            backend,
        }
    }

    /// Replace the backend operations run for this strategy, in order. The
    /// last stage is the terminal step.
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Parameters a job must carry for this strategy to apply.
    pub fn with_required_params(mut self, params: Vec<String>) -> Self {
        self.required_params = params;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn operation_kind(&self) -> &str {
        &self.operation_kind
    }

    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    pub fn required_params(&self) -> &[String] {
        &self.required_params
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn estimate(&self, operation: &str, job: &JobDescription) -> CostEstimate {
        self.cost_model.estimate(operation, job)
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy")
            .field("id", &self.id)
            .field("operation_kind", &self.operation_kind)
            .field("stages", &self.stages)
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Strategies keyed by operation kind.
#[derive(Debug, Default)]
pub struct StrategyRegistry {
    strategies: Vec<Arc<Strategy>>,
    by_kind: FxHashMap<String, Vec<usize>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy. Ids must be unique and every stage must be
    /// accepted by the strategy's backend.
    pub fn register(&mut self, strategy: Strategy) -> PipelineResult<()> {
        if strategy.id.is_empty() || strategy.operation_kind.is_empty() {
            return Err(PipelineError::Config(
                "strategy id and operation kind must be non-empty".into(),
            ));
        }
        if self.get(&strategy.id).is_some() {
            return Err(PipelineError::Config(format!(
                "duplicate strategy id '{}'",
                strategy.id
            )));
        }
        if strategy.stages.is_empty() {
            return Err(PipelineError::Config(format!(
                "strategy '{}' has no stages",
                strategy.id
            )));
        }
        let caps = strategy.backend.capabilities();
        if let Some(stage) = strategy
            .stages
            .iter()
            .find(|stage| !caps.supports_operation(stage))
        {
            return Err(PipelineError::Config(format!(
                "backend '{}' does not support stage '{}' of strategy '{}'",
                caps.name, stage, strategy.id
            )));
        }

        tracing::debug!(
            strategy = %strategy.id,
            operation = %strategy.operation_kind,
            backend = %strategy.backend.name(),
            "Strategy registered"
        );
        let index = self.strategies.len();
        self.by_kind
            .entry(strategy.operation_kind.clone())
            .or_default()
            .push(index);
        self.strategies.push(Arc::new(strategy));
        Ok(())
    }

    /// Strategies for `operation_kind`, in registration order.
    pub fn candidates<'a>(&'a self, operation_kind: &str) -> impl Iterator<Item = &'a Arc<Strategy>> + 'a {
        self.by_kind
            .get(operation_kind)
            .into_iter()
            .flatten()
            .map(|&i| &self.strategies[i])
    }

    pub fn contains_kind(&self, operation_kind: &str) -> bool {
        self.by_kind.contains_key(operation_kind)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Strategy>> {
        self.strategies.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
