//! YAML workload files.
//!
//! A workload describes simulator backends, the strategies registered on
//! them and a batch of jobs to submit:
//!
//! ```yaml
//! pipeline:
//!   scheduler: { max_concurrency: 2 }
//! datasets: [users]
//! backends:
//!   - name: exact
//!     mode: exact
//!     outputs: { lookup: alice }
//! strategies:
//!   - id: index
//!     operation: lookup
//!     backend: exact
//!     cost: { multiplier: 0.01 }
//! jobs:
//!   - operation: lookup
//!     params: { key: 7 }
//!     reads: [users]
//!     priority: 10
//! rounds: 2
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use qdb_adapter_sim::SimSpec;
use qdb_hal::{Backend, Param};
use qdb_pipeline::{JobDescription, LinearCostModel, Pipeline, PipelineConfig, Priority, Strategy};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Workload {
    pub pipeline: PipelineConfig,
    pub datasets: Vec<String>,
    pub backends: Vec<SimSpec>,
    pub strategies: Vec<StrategySpec>,
    pub jobs: Vec<JobSpec>,
    /// Number of times the job list is submitted.
    pub rounds: u32,
    /// Datasets written between rounds.
    pub writes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySpec {
    pub id: String,
    pub operation: String,
    pub backend: String,
    #[serde(default)]
    pub stages: Vec<String>,
    #[serde(default)]
    pub required_params: Vec<String>,
    #[serde(default)]
    pub cost: CostSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostSpec {
    pub base_units: u64,
    pub multiplier: f64,
    pub latency_per_unit_ms: u64,
    pub variance: f64,
}

impl Default for CostSpec {
    fn default() -> Self {
        Self {
            base_units: 1,
            multiplier: 0.0,
            latency_per_unit_ms: 1,
            variance: 0.0,
        }
    }
}

impl CostSpec {
    fn model(&self) -> LinearCostModel {
        LinearCostModel::new(self.multiplier)
            .with_base_units(self.base_units)
            .with_latency_per_unit(Duration::from_millis(self.latency_per_unit_ms))
            .with_variance(self.variance)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub operation: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, Param>,
    #[serde(default)]
    pub input_size: u64,
    #[serde(default)]
    pub reads: Vec<String>,
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    #[serde(default)]
    pub max_units: Option<u64>,
    #[serde(default)]
    pub max_latency_ms: Option<u64>,
}

impl JobSpec {
    pub fn to_job(&self) -> JobDescription {
        let mut job = JobDescription::new(&self.operation).with_input_size(self.input_size);
        for (name, value) in &self.params {
            job = job.with_param(name.clone(), value.clone());
        }
        for dataset in &self.reads {
            job = job.reading(dataset.clone());
        }
        if let Some(label) = &self.label {
            job = job.with_label(label.clone());
        }
        if let Some(priority) = self.priority {
            job = job.with_priority(Priority(priority));
        }
        if let Some(deadline) = self.deadline_ms {
            job = job.with_deadline(Duration::from_millis(deadline));
        }
        if let Some(max_units) = self.max_units {
            job = job.with_budget(max_units);
        }
        if let Some(max_latency) = self.max_latency_ms {
            job = job.with_max_latency(Duration::from_millis(max_latency));
        }
        job
    }
}

impl Workload {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workload {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid workload {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut workload: Workload = serde_yaml::from_str(text)?;
        workload.rounds = workload.rounds.max(1);
        workload.pipeline.validate()?;
        Ok(workload)
    }

    /// Build the simulator backends and the pipeline. Must be called within
    /// a Tokio runtime.
    pub fn build(&self) -> Result<Pipeline> {
        let mut backends: FxHashMap<&str, Arc<dyn Backend>> = FxHashMap::default();
        for spec in &self.backends {
            let backend = spec
                .build()
                .with_context(|| format!("Failed to build backend '{}'", spec.name))?;
            if backends.insert(&spec.name, Arc::new(backend)).is_some() {
                bail!("Duplicate backend '{}'", spec.name);
            }
        }

        let mut builder = Pipeline::builder(self.pipeline.clone());
        for dataset in &self.datasets {
            builder = builder.with_dataset(dataset.clone());
        }
        for spec in &self.strategies {
            let backend = backends.get(spec.backend.as_str()).with_context(|| {
                format!(
                    "Strategy '{}' refers to unknown backend '{}'",
                    spec.id, spec.backend
                )
            })?;
            let mut strategy = Strategy::new(
                spec.id.clone(),
                spec.operation.clone(),
                spec.cost.model(),
                Arc::clone(backend),
            )
            .with_required_params(spec.required_params.clone());
            if !spec.stages.is_empty() {
                strategy = strategy.with_stages(spec.stages.clone());
            }
            builder = builder.with_strategy(strategy);
        }

        Ok(builder.build()?)
    }

    pub fn jobs(&self) -> impl Iterator<Item = JobDescription> + '_ {
        self.jobs.iter().map(JobSpec::to_job)
    }
}
