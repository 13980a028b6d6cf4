//! Cost-based planning.
//!
//! The planner validates a [`JobDescription`], costs every strategy registered
//! for its operation kind and picks the cheapest one that fits the job's
//! constraints. Planning is pure: it never touches a backend.

use std::sync::Arc;
use std::time::Duration;

use qdb_hal::{OperationRequest, Param};
use rustc_hash::FxHashSet;

use crate::dataset::{DatasetCatalog, GenerationSnapshot};
use crate::error::{PipelineError, PipelineResult};
use crate::job::JobDescription;
use crate::registry::{CostEstimate, Strategy, StrategyRegistry};

/// One backend invocation in a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Backend operation.
    pub operation: String,
    pub params: Vec<(String, Param)>,
    /// Estimated units of a single run.
    pub unit_cost: u64,
    /// Planned repetitions (upper bound for probabilistic terminal steps).
    pub repetitions: u32,
    /// Estimate for all planned repetitions.
    pub estimate: CostEstimate,
    /// Whether this step produces the job's result.
    pub terminal: bool,
}

impl Step {
    /// The backend request for this step.
    pub fn request(&self) -> OperationRequest {
        OperationRequest {
            operation: self.operation.clone(),
            params: self.params.clone(),
        }
    }
}

/// The chosen strategy for a job, with its cost estimate.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    strategy: Arc<Strategy>,
    steps: Vec<Step>,
    estimate: CostEstimate,
    generations: GenerationSnapshot,
}

impl ExecutionPlan {
    pub fn strategy(&self) -> &Arc<Strategy> {
        &self.strategy
    }

    pub fn strategy_id(&self) -> &str {
        self.strategy.id()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn estimate(&self) -> CostEstimate {
        self.estimate
    }

    pub fn units(&self) -> u64 {
        self.estimate.units
    }

    pub fn latency(&self) -> Duration {
        self.estimate.latency
    }

    /// Dataset generations observed when the plan was made.
    pub fn generations(&self) -> &GenerationSnapshot {
        &self.generations
    }
}

/// Chooses an [`ExecutionPlan`] for each job.
#[derive(Debug, Clone)]
pub struct Planner {
    registry: Arc<StrategyRegistry>,
    catalog: Arc<DatasetCatalog>,
    max_repetitions: u32,
}

impl Planner {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        catalog: Arc<DatasetCatalog>,
        max_repetitions: u32,
    ) -> Self {
        Self {
            registry,
            catalog,
            max_repetitions: max_repetitions.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<StrategyRegistry> {
        &self.registry
    }

    /// Validate `job` and choose the cheapest strategy that fits its
    /// constraints.
    pub fn plan(&self, job: &JobDescription) -> PipelineResult<ExecutionPlan> {
        self.validate(job)?;
        let generations = self.catalog.snapshot(&job.reads)?;

        let applicable: Vec<&Arc<Strategy>> = self
            .registry
            .candidates(&job.operation)
            .filter(|s| {
                s.required_params()
                    .iter()
                    .all(|name| job.param(name).is_some())
            })
            .collect();
        if applicable.is_empty() {
            let missing = self
                .registry
                .candidates(&job.operation)
                .flat_map(|s| s.required_params().iter())
                .find(|name| job.param(name).is_none())
                .cloned()
                .unwrap_or_default();
            return Err(PipelineError::Validation(format!(
                "operation '{}' requires parameter '{}'",
                job.operation, missing
            )));
        }

        let mut best: Option<(&Arc<Strategy>, Vec<Step>, CostEstimate)> = None;
        for strategy in applicable {
            let (steps, estimate) = self.cost(strategy, job);
            let fits = estimate.units <= job.constraints.max_units
                && job
                    .constraints
                    .max_latency
                    .is_none_or(|max| estimate.latency <= max);
            tracing::trace!(
                strategy = %strategy.id(),
                units = estimate.units,
                latency_ms = estimate.latency.as_millis() as u64,
                fits,
                "Costed strategy"
            );
            if !fits {
                continue;
            }
            let better = match &best {
                None => true,
                Some((_, _, current)) => {
                    (estimate.units, estimate.latency) < (current.units, current.latency)
                }
            };
            if better {
                best = Some((strategy, steps, estimate));
            }
        }

        let (strategy, steps, estimate) = best.ok_or_else(|| {
            PipelineError::InfeasibleJob(format!(
                "no strategy for '{}' fits within {} units{}",
                job.operation,
                job.constraints.max_units,
                job.constraints
                    .max_latency
                    .map(|l| format!(" and {} ms", l.as_millis()))
                    .unwrap_or_default()
            ))
        })?;

        tracing::debug!(
            job = %job.display_name(),
            strategy = %strategy.id(),
            units = estimate.units,
            "Plan selected"
        );
        Ok(ExecutionPlan {
            strategy: Arc::clone(strategy),
            steps,
            estimate,
            generations,
        })
    }

    fn validate(&self, job: &JobDescription) -> PipelineResult<()> {
        if job.operation.is_empty() {
            return Err(PipelineError::Validation(
                "operation kind must not be empty".into(),
            ));
        }
        if !self.registry.contains_kind(&job.operation) {
            return Err(PipelineError::Validation(format!(
                "unknown operation '{}'",
                job.operation
            )));
        }

        let mut seen = FxHashSet::default();
        for (name, value) in &job.params {
            if name.is_empty() {
                return Err(PipelineError::Validation(
                    "parameter names must not be empty".into(),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(PipelineError::Validation(format!(
                    "duplicate parameter '{}'",
                    name
                )));
            }
            if let Param::Float(v) = value {
                if !v.is_finite() {
                    return Err(PipelineError::Validation(format!(
                        "parameter '{}' is not a finite number",
                        name
                    )));
                }
            }
        }

        if let Some(unknown) = job.reads.iter().find(|d| !self.catalog.contains(d)) {
            return Err(PipelineError::Validation(format!(
                "unknown dataset '{}'",
                unknown
            )));
        }
        if job.constraints.max_units == 0 {
            return Err(PipelineError::Validation(
                "max_units must be positive".into(),
            ));
        }
        Ok(())
    }

    fn cost(&self, strategy: &Strategy, job: &JobDescription) -> (Vec<Step>, CostEstimate) {
        let probabilistic = strategy.backend().capabilities().probabilistic;
        let last = strategy.stages().len().saturating_sub(1);

        let mut total = CostEstimate::default();
        let mut steps = Vec::with_capacity(strategy.stages().len());
        for (i, operation) in strategy.stages().iter().enumerate() {
            let terminal = i == last;
            let single = strategy.estimate(operation, job);
            let repetitions = if terminal && probabilistic {
                self.max_repetitions
            } else {
                1
            };
            let estimate = single.repeated(repetitions);
            total = total.then(estimate);
            steps.push(Step {
                operation: operation.clone(),
                params: job.params.clone(),
                unit_cost: single.units,
                repetitions,
                estimate,
                terminal,
            });
        }
        (steps, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LinearCostModel;
    use qdb_adapter_sim::SimBackend;
    use qdb_hal::Backend;

    fn exact() -> Arc<dyn Backend> {
        Arc::new(SimBackend::exact("exact"))
    }

    fn sampled() -> Arc<dyn Backend> {
        Arc::new(SimBackend::sampled("sampled", vec![("0".into(), 1.0)], 1).unwrap())
    }

    fn planner(strategies: Vec<Strategy>) -> Planner {
        let mut registry = StrategyRegistry::new();
        for s in strategies {
            registry.register(s).unwrap();
        }
        let catalog = DatasetCatalog::new();
        catalog.register("users");
        Planner::new(Arc::new(registry), Arc::new(catalog), 10)
    }

    #[test]
    fn test_picks_cheapest_strategy() {
        let planner = planner(vec![
            Strategy::new("scan", "lookup", LinearCostModel::new(1.0), exact()),
            Strategy::new("index", "lookup", LinearCostModel::new(0.5), exact()),
        ]);
        let job = JobDescription::new("lookup").with_input_size(100);

        let plan = planner.plan(&job).unwrap();
        assert_eq!(plan.strategy_id(), "index");
        assert_eq!(plan.units(), 51);
        assert_eq!(plan.steps().len(), 1);
        assert!(plan.steps()[0].terminal);
    }

    #[test]
    fn test_ties_go_to_first_registered() {
        let planner = planner(vec![
            Strategy::new("first", "lookup", LinearCostModel::new(1.0), exact()),
            Strategy::new("second", "lookup", LinearCostModel::new(1.0), exact()),
        ]);
        let plan = planner.plan(&JobDescription::new("lookup")).unwrap();
        assert_eq!(plan.strategy_id(), "first");
    }

    #[test]
    fn test_latency_breaks_unit_ties() {
        let slow = LinearCostModel::new(1.0).with_latency_per_unit(Duration::from_millis(5));
        let fast = LinearCostModel::new(1.0).with_latency_per_unit(Duration::from_millis(1));
        let planner = planner(vec![
            Strategy::new("slow", "lookup", slow, exact()),
            Strategy::new("fast", "lookup", fast, exact()),
        ]);
        let plan = planner.plan(&JobDescription::new("lookup")).unwrap();
        assert_eq!(plan.strategy_id(), "fast");
    }

    #[test]
    fn test_probabilistic_terminal_step_costed_at_max_repetitions() {
        let planner = planner(vec![
            Strategy::new("sample", "estimate", LinearCostModel::new(0.0), sampled())
                .with_stages(vec!["prepare".into(), "estimate".into()]),
        ]);
        let plan = planner.plan(&JobDescription::new("estimate")).unwrap();

        let steps = plan.steps();
        assert_eq!(steps[0].repetitions, 1);
        assert!(!steps[0].terminal);
        assert_eq!(steps[1].repetitions, 10);
        assert_eq!(plan.units(), 1 + 10);
    }

    #[test]
    fn test_infeasible_when_every_strategy_exceeds_budget() {
        let planner = planner(vec![
            Strategy::new("a", "lookup", LinearCostModel::new(1.0), exact()),
            Strategy::new("b", "lookup", LinearCostModel::new(2.0), exact()),
        ]);
        let job = JobDescription::new("lookup").with_input_size(50).with_budget(10);
        assert!(matches!(
            planner.plan(&job),
            Err(PipelineError::InfeasibleJob(_))
        ));
    }

    #[test]
    fn test_max_latency_filters_candidates() {
        let planner = planner(vec![
            Strategy::new("a", "lookup", LinearCostModel::new(1.0), exact()),
        ]);
        let job = JobDescription::new("lookup")
            .with_input_size(50)
            .with_max_latency(Duration::from_millis(10));
        assert!(matches!(
            planner.plan(&job),
            Err(PipelineError::InfeasibleJob(_))
        ));
    }

    #[test]
    fn test_validation_errors() {
        let planner = planner(vec![
            Strategy::new("a", "lookup", LinearCostModel::new(1.0), exact())
                .with_required_params(vec!["key".into()]),
        ]);
        let cases = vec![
            JobDescription::new(""),
            JobDescription::new("unknown"),
            JobDescription::new("lookup").with_param("key", 1).with_param("key", 2),
            JobDescription::new("lookup").with_param("", 1),
            JobDescription::new("lookup").with_param("key", f64::NAN),
            JobDescription::new("lookup"),
            JobDescription::new("lookup").with_param("key", 1).reading("ghost"),
            JobDescription::new("lookup").with_param("key", 1).with_budget(0),
        ];
        for job in cases {
            let result = planner.plan(&job);
            assert!(
                matches!(result, Err(PipelineError::Validation(_))),
                "expected validation error for {:?}, got {:?}",
                job,
                result.map(|p| p.strategy_id().to_string())
            );
        }
    }

    #[test]
    fn test_plan_records_generations() {
        let planner = planner(vec![
            Strategy::new("a", "lookup", LinearCostModel::new(1.0), exact()),
        ]);
        let plan = planner
            .plan(&JobDescription::new("lookup").reading("users"))
            .unwrap();
        assert_eq!(plan.generations().generation_of("users"), Some(0));
    }
}
