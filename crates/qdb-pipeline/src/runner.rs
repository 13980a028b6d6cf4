//! Runs one admitted job to a terminal outcome.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::{PutOutcome, ResultCache};
use crate::config::RetryPolicy;
use crate::error::PipelineError;
use crate::executor::{ExecutionError, Executor};
use crate::fingerprint::Fingerprint;
use crate::interpreter::{CallerResult, Interpreter};
use crate::job::JobId;
use crate::planner::ExecutionPlan;

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(Arc<CallerResult>),
    Failed(PipelineError),
    Cancelled,
}

/// Executes plans with retries, interprets and caches their results.
#[derive(Debug, Clone)]
pub struct JobRunner {
    executor: Executor,
    interpreter: Interpreter,
    cache: Arc<ResultCache>,
    retry: RetryPolicy,
}

impl JobRunner {
    pub fn new(
        executor: Executor,
        interpreter: Interpreter,
        cache: Arc<ResultCache>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            executor,
            interpreter,
            cache,
            retry,
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub async fn run(
        &self,
        id: JobId,
        fingerprint: Fingerprint,
        plan: &ExecutionPlan,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let backend = plan.strategy().backend().name().to_string();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.executor.execute(plan, cancel).await {
                Ok(result) => {
                    if cancel.is_cancelled() {
                        tracing::debug!(job_id = %id, "Discarding result of cancelled job");
                        return JobOutcome::Cancelled;
                    }
                    let result = Arc::new(result);
                    let caller = match self.interpreter.interpret(&result) {
                        Ok(caller) => caller,
                        Err(e) => return JobOutcome::Failed(e),
                    };
                    match self.cache.put(fingerprint, result) {
                        PutOutcome::Stored => {
                            tracing::trace!(job_id = %id, fingerprint = %fingerprint.short(), "Result cached")
                        }
                        outcome => {
                            tracing::trace!(job_id = %id, ?outcome, "Result not cached")
                        }
                    }
                    return JobOutcome::Completed(Arc::new(caller));
                }
                Err(ExecutionError::Cancelled) => return JobOutcome::Cancelled,
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= self.retry.max_attempts {
                tracing::warn!(job_id = %id, backend = %backend, attempt, error = %err, "Job failed");
                return JobOutcome::Failed(PipelineError::BackendExecution {
                    backend,
                    attempts: attempt,
                    message: err.to_string(),
                });
            }

            let delay = self.retry.backoff(attempt);
            tracing::warn!(
                job_id = %id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after transient failure"
            );
            tokio::select! {
                _ = cancel.cancelled() => return JobOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
