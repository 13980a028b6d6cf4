//! qdb deferred-execution query pipeline.
//!
//! Callers describe work declaratively as a [`JobDescription`]. The pipeline
//! chooses a strategy by cost, fingerprints the job, serves repeated work from
//! a result cache and otherwise queues it for admission under a shared
//! resource budget. Admitted jobs run on backends implementing
//! [`qdb_hal::Backend`]; probabilistic outputs are repeated until the answer is
//! confident enough and reduced to a single [`CallerResult`].
//!
//! # Features
//!
//! - **Cost-based planning**: cheapest registered strategy within the job's
//!   unit and latency limits
//! - **Priority scheduling**: priority aging, earliest deadline first within a
//!   priority, FIFO otherwise
//! - **Deadline admission**: infeasible deadlines are rejected at submission
//! - **Result cache**: LRU with byte and entry limits, TTL and dataset
//!   generation invalidation
//! - **Retries**: bounded exponential backoff for transient backend errors
//!
//! # Example
//!
//! ```ignore
//! use qdb_pipeline::{JobDescription, LinearCostModel, Pipeline, PipelineConfig, Priority, Strategy};
//!
//! let pipeline = Pipeline::builder(PipelineConfig::default())
//!     .with_strategy(Strategy::new("index", "lookup", LinearCostModel::new(0.01), backend))
//!     .with_dataset("users")
//!     .build()?;
//!
//! let job = JobDescription::new("lookup")
//!     .with_param("key", 7)
//!     .reading("users")
//!     .with_priority(Priority::high());
//! let handle = pipeline.submit(job).await?;
//! let result = handle.result(true, None).await?;
//! println!("{} ({:.2})", result.value, result.confidence);
//! ```

pub mod budget;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod interpreter;
pub mod job;
pub mod pipeline;
pub mod planner;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod scheduler;

// Re-exports
pub use budget::{BudgetLease, ResourceBudget};
pub use cache::{CacheEntry, CacheStats, PutOutcome, ResultCache};
pub use config::{
    AgingConfig, CacheConfig, ExecutorConfig, InterpreterConfig, PipelineConfig, RetryPolicy,
    SchedulerConfig,
};
pub use dataset::{DatasetCatalog, GenerationSnapshot, GenerationToken};
pub use error::{PipelineError, PipelineResult};
pub use executor::{ExecutionError, ExecutionResult, Executor};
pub use fingerprint::{Fingerprint, fingerprint};
pub use interpreter::{CallerResult, Interpreter, ResultQuality};
pub use job::{JobDescription, JobId, JobState, Priority, ResourceConstraints};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use planner::{ExecutionPlan, Planner, Step};
pub use queue::{PriorityQueue, ScheduledJob};
pub use registry::{CostEstimate, CostModel, LinearCostModel, Strategy, StrategyRegistry};
pub use runner::{JobOutcome, JobRunner};
pub use scheduler::{CancelOutcome, JobHandle, JobSnapshot, Scheduler, SchedulerStats};
