//! Error types for the query pipeline.

use thiserror::Error;

use crate::job::JobId;

/// Errors surfaced by the pipeline.
///
/// Validation, planning and deadline errors are returned synchronously from
/// submission. Execution errors are delivered through the job handle, which is
/// why the type is `Clone`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Infeasible job: {0}")]
    InfeasibleJob(String),

    #[error(
        "Deadline infeasible: earliest completion in {earliest_ms} ms, deadline in {deadline_ms} ms"
    )]
    DeadlineInfeasible { earliest_ms: u64, deadline_ms: u64 },

    #[error("Backend '{backend}' failed after {attempts} attempt(s): {message}")]
    BackendExecution {
        backend: String,
        attempts: u32,
        message: String,
    },

    #[error("Job {0} was cancelled")]
    Cancelled(JobId),

    #[error("Timed out waiting for job {0}")]
    Timeout(JobId),

    #[error("Cannot interpret result: {0}")]
    Interpretation(String),

    #[error("Queue is full ({0} jobs)")]
    QueueFull(usize),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Scheduler is shut down")]
    SchedulerClosed,
}

impl PipelineError {
    /// Whether the error was raised before the job was scheduled.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PipelineError::Validation(_)
                | PipelineError::InfeasibleJob(_)
                | PipelineError::DeadlineInfeasible { .. }
                | PipelineError::QueueFull(_)
        )
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
