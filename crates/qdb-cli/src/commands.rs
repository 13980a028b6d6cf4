//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use futures::future::join_all;
use qdb_pipeline::{CallerResult, JobHandle, PipelineConfig, PipelineError};
use serde::Serialize;

use crate::output::{
    self, OutputFormat, print_error, print_header, print_result, print_section, print_success,
    print_warning,
};
use crate::workload::Workload;

/// Outcome of one submitted job, as reported by `qdb run`.
#[derive(Debug, Serialize)]
pub struct JobReport {
    pub round: u32,
    pub job: String,
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CallerResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub jobs: Vec<JobReport>,
    pub units_consumed: u64,
    pub cache: qdb_pipeline::CacheStats,
}

/// Run every job in the workload and collect the outcomes.
pub async fn run_workload(workload: &Workload, timeout: Option<Duration>) -> Result<RunReport> {
    let started_at = Local::now().to_rfc3339();
    let pipeline = workload.build()?;
    let mut reports = Vec::new();

    for round in 1..=workload.rounds {
        if round > 1 {
            for dataset in &workload.writes {
                pipeline.record_write(dataset)?;
            }
        }

        let mut submitted: Vec<(String, Result<JobHandle, PipelineError>)> = Vec::new();
        for job in workload.jobs() {
            let name = job.display_name().to_string();
            submitted.push((name, pipeline.submit(job).await));
        }

        let outcomes = join_all(submitted.iter().map(|(_, handle)| async move {
            match handle {
                Ok(handle) => handle.result(true, timeout).await,
                Err(err) => Err(err.clone()),
            }
        }))
        .await;

        for ((job, handle), outcome) in submitted.into_iter().zip(outcomes) {
            let fingerprint = handle.as_ref().ok().map(|h| h.fingerprint().short());
            let (result, error) = match outcome {
                Ok(result) => (Some(Arc::unwrap_or_clone(result)), None),
                Err(err) => (None, Some(err.to_string())),
            };
            reports.push(JobReport {
                round,
                job,
                fingerprint,
                result,
                error,
            });
        }
    }

    pipeline.shutdown().await?;
    tracing::debug!(jobs = reports.len(), "Workload finished");

    Ok(RunReport {
        started_at,
        jobs: reports,
        units_consumed: pipeline.units_consumed(),
        cache: pipeline.cache_stats(),
    })
}

pub async fn run(path: &Path, format: OutputFormat, timeout: Option<Duration>) -> Result<()> {
    let workload = Workload::load(path)?;
    let report = run_workload(&workload, timeout).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&report)?),
        OutputFormat::Human => print_run_report(path, &report),
    }
    Ok(())
}

fn print_run_report(path: &Path, report: &RunReport) {
    print_header(&format!("qdb run {}", path.display()));
    print_result("Started", &report.started_at);

    for job in &report.jobs {
        print_section(&format!("Round {} · {}", job.round, job.job));
        if let Some(fingerprint) = &job.fingerprint {
            print_result("Fingerprint", fingerprint);
        }
        match (&job.result, &job.error) {
            (Some(result), _) => {
                print_result("Value", &result.value);
                print_result("Confidence", format!("{:.3}", result.confidence));
                print_result("Strategy", &result.strategy);
                print_result("Repetitions", result.repetitions);
                print_result("Units", result.units_consumed);
                if result.from_cache {
                    print_success("served from cache");
                }
                if result.is_low_confidence() {
                    print_warning(&format!("{} result", result.quality));
                }
                for failure in &result.partial_failures {
                    print_warning(failure);
                }
            }
            (None, Some(error)) => print_error(error),
            (None, None) => {}
        }
    }

    print_section("Summary");
    print_result("Units consumed", report.units_consumed);
    print_result("Cache entries", report.cache.entries);
    print_result(
        "Cache hit rate",
        format!("{:.1}%", report.cache.hit_rate() * 100.0),
    );
    println!();
}

#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub job: String,
    pub strategy: String,
    pub fingerprint: String,
    pub units: u64,
    pub latency_ms: u128,
    pub steps: Vec<StepReport>,
}

#[derive(Debug, Serialize)]
pub struct StepReport {
    pub operation: String,
    pub repetitions: u32,
    pub units: u64,
    pub terminal: bool,
}

/// Plan every job in the workload without executing it.
pub fn plan_workload(workload: &Workload) -> Result<Vec<Result<PlanReport, String>>> {
    let pipeline = workload.build()?;
    let reports = workload
        .jobs()
        .map(|job| -> Result<PlanReport, String> {
            let (plan, fingerprint) = pipeline.explain(&job).map_err(|e| e.to_string())?;
            Ok(PlanReport {
                job: job.display_name().to_string(),
                strategy: plan.strategy_id().to_string(),
                fingerprint: fingerprint.to_string(),
                units: plan.units(),
                latency_ms: plan.latency().as_millis(),
                steps: plan
                    .steps()
                    .iter()
                    .map(|step| StepReport {
                        operation: step.operation.clone(),
                        repetitions: step.repetitions,
                        units: step.estimate.units,
                        terminal: step.terminal,
                    })
                    .collect(),
            })
        })
        .collect();
    Ok(reports)
}

pub fn plan(path: &Path, format: OutputFormat) -> Result<()> {
    let workload = Workload::load(path)?;
    let reports = plan_workload(&workload)?;

    match format {
        OutputFormat::Json | OutputFormat::Yaml => {
            let values: Vec<serde_json::Value> = reports
                .iter()
                .map(|r| match r {
                    Ok(plan) => serde_json::to_value(plan),
                    Err(error) => Ok(serde_json::json!({ "error": error })),
                })
                .collect::<Result<_, _>>()?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&values)?);
            } else {
                print!("{}", serde_yaml::to_string(&values)?);
            }
        }
        OutputFormat::Human => {
            print_header(&format!("qdb plan {}", path.display()));
            for (spec, report) in workload.jobs.iter().zip(&reports) {
                match report {
                    Ok(plan) => {
                        print_section(&plan.job);
                        print_result("Strategy", &plan.strategy);
                        print_result("Fingerprint", &plan.fingerprint[..16]);
                        print_result("Units", plan.units);
                        print_result("Latency", output::millis(plan.latency_ms));
                        for step in &plan.steps {
                            let marker = if step.terminal { "→" } else { "·" };
                            println!(
                                "    {} {} ×{} ({} units)",
                                marker, step.operation, step.repetitions, step.units
                            );
                        }
                    }
                    Err(error) => {
                        print_section(spec.label.as_deref().unwrap_or(&spec.operation));
                        print_error(error);
                    }
                }
            }
            println!();
        }
    }
    Ok(())
}

/// Print the default pipeline configuration.
pub fn config() -> Result<()> {
    print!("{}", serde_yaml::to_string(&PipelineConfig::default())?);
    Ok(())
}
