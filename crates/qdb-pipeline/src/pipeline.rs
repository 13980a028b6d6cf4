//! The submission front end tying planner, scheduler and cache together.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::cache::{CacheStats, ResultCache};
use crate::config::PipelineConfig;
use crate::dataset::{DatasetCatalog, GenerationToken};
use crate::error::{PipelineError, PipelineResult};
use crate::executor::Executor;
use crate::fingerprint::{Fingerprint, fingerprint};
use crate::interpreter::{CallerResult, Interpreter};
use crate::job::{JobDescription, JobState};
use crate::planner::{ExecutionPlan, Planner};
use crate::registry::{Strategy, StrategyRegistry};
use crate::runner::JobRunner;
use crate::scheduler::{CancelOutcome, JobHandle, Scheduler, SchedulerStats};

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    strategies: Vec<Strategy>,
    datasets: Vec<String>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            strategies: Vec::new(),
            datasets: Vec::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.datasets.push(dataset.into());
        self
    }

    /// Validate the configuration, register strategies and start the
    /// scheduler. Must be called within a Tokio runtime.
    pub fn build(self) -> PipelineResult<Pipeline> {
        self.config.validate()?;

        let mut registry = StrategyRegistry::new();
        for strategy in self.strategies {
            registry.register(strategy)?;
        }
        let catalog = Arc::new(DatasetCatalog::new());
        for dataset in self.datasets {
            catalog.register(dataset);
        }

        let planner = Planner::new(
            Arc::new(registry),
            Arc::clone(&catalog),
            self.config.executor.max_repetitions,
        );
        let cache = Arc::new(ResultCache::new(self.config.cache.clone()));
        let interpreter = Interpreter::new(self.config.interpreter.clone());
        let executor = Executor::new(self.config.executor.clone());
        let runner = JobRunner::new(
            executor.clone(),
            interpreter.clone(),
            Arc::clone(&cache),
            self.config.retry.clone(),
        );
        let scheduler = Scheduler::spawn(self.config.scheduler.clone(), runner);

        tracing::info!(
            strategies = planner.registry().len(),
            max_concurrency = self.config.scheduler.max_concurrency,
            cache = self.config.cache.enabled,
            "Pipeline started"
        );

        Ok(Pipeline {
            planner,
            catalog,
            cache,
            interpreter,
            executor,
            scheduler,
            closed: AtomicBool::new(false),
        })
    }
}

/// Deferred-execution pipeline.
///
/// Jobs are planned and fingerprinted synchronously on submission; cache hits
/// return an already completed handle, everything else is queued for
/// admission.
pub struct Pipeline {
    planner: Planner,
    catalog: Arc<DatasetCatalog>,
    cache: Arc<ResultCache>,
    interpreter: Interpreter,
    executor: Executor,
    scheduler: Scheduler,
    /// Set once shutdown begins; cache hits are refused from then on.
    closed: AtomicBool,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Plan `job` without executing it.
    pub fn plan(&self, job: &JobDescription) -> PipelineResult<ExecutionPlan> {
        self.planner.plan(job)
    }

    /// Plan and fingerprint `job` without executing it.
    pub fn explain(&self, job: &JobDescription) -> PipelineResult<(ExecutionPlan, Fingerprint)> {
        let plan = self.planner.plan(job)?;
        let fp = fingerprint(job, &plan);
        Ok((plan, fp))
    }

    /// Submit `job`. Validation, planning, budget and deadline errors are
    /// returned here; execution errors arrive through the handle.
    pub async fn submit(&self, job: JobDescription) -> PipelineResult<JobHandle> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PipelineError::SchedulerClosed);
        }
        let (plan, fp) = self.explain(&job)?;

        if let Some(hit) = self.cache.get(&fp) {
            if hit.generations == *plan.generations() {
                let mut result = self.interpreter.interpret(&hit)?;
                result.from_cache = true;
                result.units_consumed = 0;
                tracing::info!(
                    job = %job.display_name(),
                    fingerprint = %fp.short(),
                    "Served from cache"
                );
                return Ok(JobHandle::completed(fp, Arc::new(result)));
            }
            self.cache.remove(&fp);
        }

        self.scheduler
            .submit(Arc::new(job), Arc::new(plan), fp)
            .await
    }

    pub async fn cancel(&self, handle: &JobHandle) -> PipelineResult<CancelOutcome> {
        handle.cancel().await
    }

    pub fn status(&self, handle: &JobHandle) -> JobState {
        handle.status()
    }

    pub async fn result(
        &self,
        handle: &JobHandle,
        block: bool,
        timeout: Option<Duration>,
    ) -> PipelineResult<Arc<CallerResult>> {
        handle.result(block, timeout).await
    }

    /// Register a dataset jobs may read. Returns false if already known.
    pub fn register_dataset(&self, dataset: impl Into<String>) -> bool {
        self.catalog.register(dataset)
    }

    /// Record a write to `dataset` and drop cached results that read an
    /// older generation of it.
    pub fn record_write(&self, dataset: &str) -> PipelineResult<GenerationToken> {
        let token = self.catalog.record_write(dataset)?;
        let removed = self.cache.invalidate(&token);
        tracing::info!(
            dataset,
            generation = token.generation,
            invalidated = removed,
            "Dataset written"
        );
        Ok(token)
    }

    pub fn pause_admission(&self) -> PipelineResult<()> {
        self.scheduler.pause()
    }

    pub fn resume_admission(&self) -> PipelineResult<()> {
        self.scheduler.resume()
    }

    /// Cancel queued jobs and wait for running jobs to finish.
    pub async fn shutdown(&self) -> PipelineResult<()> {
        self.closed.store(true, Ordering::Release);
        self.scheduler.shutdown().await
    }

    /// Backend units consumed by all executions, including failed attempts.
    pub fn units_consumed(&self) -> u64 {
        self.executor.units_consumed()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub async fn scheduler_stats(&self) -> PipelineResult<SchedulerStats> {
        self.scheduler.stats().await
    }
}
