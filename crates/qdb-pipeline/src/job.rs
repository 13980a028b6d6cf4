//! Job descriptions, priorities and lifecycle states.

use std::fmt;
use std::time::Duration;

use qdb_hal::Param;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job priority. Higher values are scheduled first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(pub u32);

impl Priority {
    pub const LOW: Priority = Priority(0);
    pub const NORMAL: Priority = Priority(50);
    pub const HIGH: Priority = Priority(100);
    pub const CRITICAL: Priority = Priority(200);

    pub fn low() -> Self {
        Self::LOW
    }

    pub fn normal() -> Self {
        Self::NORMAL
    }

    pub fn high() -> Self {
        Self::HIGH
    }

    pub fn critical() -> Self {
        Self::CRITICAL
    }

    /// Priority raised by `boost`, saturating.
    pub fn boosted(self, boost: u32) -> Self {
        Priority(self.0.saturating_add(boost))
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Priority::LOW => write!(f, "low"),
            Priority::NORMAL => write!(f, "normal"),
            Priority::HIGH => write!(f, "high"),
            Priority::CRITICAL => write!(f, "critical"),
            Priority(p) => write!(f, "{}", p),
        }
    }
}

/// Resource limits a plan must fit within.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceConstraints {
    /// Maximum backend units the job may consume.
    pub max_units: u64,
    /// Maximum estimated latency, if bounded.
    pub max_latency: Option<Duration>,
}

impl ResourceConstraints {
    pub fn new(max_units: u64) -> Self {
        Self {
            max_units,
            max_latency: None,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(u64::MAX)
    }
}

impl Default for ResourceConstraints {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// A declarative description of requested work.
///
/// Built by the caller and handed to the pipeline by value; the pipeline never
/// mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescription {
    /// Operation kind, used to look up strategies.
    pub operation: String,
    /// Named parameters.
    pub params: Vec<(String, Param)>,
    /// Declared input size, the driver of every cost model.
    pub input_size: u64,
    /// Datasets the job reads. Writes to these invalidate cached results.
    pub reads: Vec<String>,
    pub constraints: ResourceConstraints,
    pub priority: Priority,
    /// Deadline relative to submission.
    pub deadline: Option<Duration>,
    /// Free-form label for logs. Not part of the job's identity.
    pub label: Option<String>,
}

impl JobDescription {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            params: Vec::new(),
            input_size: 0,
            reads: Vec::new(),
            constraints: ResourceConstraints::default(),
            priority: Priority::default(),
            deadline: None,
            label: None,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Param>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn with_input_size(mut self, input_size: u64) -> Self {
        self.input_size = input_size;
        self
    }

    pub fn reading(mut self, dataset: impl Into<String>) -> Self {
        self.reads.push(dataset.into());
        self
    }

    pub fn with_budget(mut self, max_units: u64) -> Self {
        self.constraints.max_units = max_units;
        self
    }

    pub fn with_max_latency(mut self, max_latency: Duration) -> Self {
        self.constraints.max_latency = Some(max_latency);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    /// Label if set, otherwise the operation kind.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.operation)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    Admitted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Admitted => write!(f, "admitted"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}
