//! Turns raw execution output into caller-facing results.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::InterpreterConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::executor::ExecutionResult;

/// Trustworthiness of a [`CallerResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultQuality {
    Authoritative,
    /// Confidence fell below the configured floor.
    LowConfidence,
}

impl fmt::Display for ResultQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultQuality::Authoritative => write!(f, "authoritative"),
            ResultQuality::LowConfidence => write!(f, "low-confidence"),
        }
    }
}

/// The answer delivered to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallerResult {
    /// Point estimate: the deterministic output or the most frequent outcome.
    pub value: String,
    pub confidence: f64,
    pub variance: f64,
    pub quality: ResultQuality,
    pub repetitions: u32,
    /// Outcomes at or above the significance threshold with their
    /// frequencies, most frequent first.
    pub outcomes: Vec<(String, f64)>,
    pub strategy: String,
    pub from_cache: bool,
    pub partial_failures: Vec<String>,
    /// Units spent producing this result. Zero when served from cache.
    pub units_consumed: u64,
}

impl CallerResult {
    pub fn is_low_confidence(&self) -> bool {
        self.quality == ResultQuality::LowConfidence
    }
}

/// Converts [`ExecutionResult`]s into [`CallerResult`]s.
#[derive(Debug, Clone, Default)]
pub struct Interpreter {
    config: InterpreterConfig,
}

impl Interpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        Self { config }
    }

    pub fn interpret(&self, result: &ExecutionResult) -> PipelineResult<CallerResult> {
        let (value, confidence, variance, outcomes) = match (&result.distribution, &result.output) {
            (Some(counts), _) => {
                let total = counts.total();
                let (mode, hits) = counts.mode().ok_or_else(|| {
                    PipelineError::Interpretation(format!(
                        "strategy '{}' produced an empty distribution",
                        result.strategy
                    ))
                })?;
                let p = hits as f64 / total as f64;

                let mut outcomes: Vec<(String, f64)> = counts
                    .iter()
                    .map(|(outcome, n)| (outcome.to_string(), n as f64 / total as f64))
                    .filter(|(_, freq)| *freq >= self.config.significance_threshold)
                    .collect();
                outcomes.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

                (mode.to_string(), p, p * (1.0 - p) / total as f64, outcomes)
            }
            (None, Some(output)) => (output.clone(), 1.0, 0.0, vec![(output.clone(), 1.0)]),
            (None, None) => {
                return Err(PipelineError::Interpretation(format!(
                    "strategy '{}' produced no output",
                    result.strategy
                )));
            }
        };

        let quality = if confidence < self.config.confidence_floor {
            tracing::debug!(strategy = %result.strategy, confidence, "Low-confidence result");
            ResultQuality::LowConfidence
        } else {
            ResultQuality::Authoritative
        };

        Ok(CallerResult {
            value,
            confidence,
            variance,
            quality,
            repetitions: result.repetitions,
            outcomes,
            strategy: result.strategy.clone(),
            from_cache: false,
            partial_failures: result.partial_failures.clone(),
            units_consumed: result.units_consumed,
        })
    }
}
