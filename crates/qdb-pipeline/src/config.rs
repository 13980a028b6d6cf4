//! Static pipeline configuration.
//!
//! The configuration is supplied once at startup and never changes while the
//! pipeline runs. Every section deserializes with defaults, so a config file
//! only needs the values it overrides. Durations are expressed in milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub scheduler: SchedulerConfig,
    pub retry: RetryPolicy,
    pub cache: CacheConfig,
    pub executor: ExecutorConfig,
    pub interpreter: InterpreterConfig,
}

impl PipelineConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> PipelineResult<()> {
        self.scheduler.validate()?;
        self.retry.validate()?;
        self.cache.validate()?;
        self.executor.validate()?;
        self.interpreter.validate()
    }
}

fn invalid(message: impl Into<String>) -> PipelineError {
    PipelineError::Config(message.into())
}

/// Admission control settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of jobs that may run at once.
    pub max_concurrency: usize,
    /// Total backend units shared by all running jobs.
    pub total_units: u64,
    /// Maximum number of queued jobs.
    pub max_queued: usize,
    pub aging: AgingConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            total_units: 100_000,
            max_queued: 10_000,
            aging: AgingConfig::default(),
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> PipelineResult<()> {
        if self.max_concurrency == 0 {
            return Err(invalid("scheduler.max_concurrency must be at least 1"));
        }
        if self.total_units == 0 {
            return Err(invalid("scheduler.total_units must be at least 1"));
        }
        if self.max_queued == 0 {
            return Err(invalid("scheduler.max_queued must be at least 1"));
        }
        if self.aging.enabled && self.aging.interval_ms == 0 {
            return Err(invalid("scheduler.aging.interval_ms must be positive"));
        }
        Ok(())
    }
}

/// Priority aging: a queued job gains `step` priority per `interval_ms` of
/// waiting, up to `max_boost`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgingConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub step: u32,
    pub max_boost: u32,
}

impl Default for AgingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1_000,
            step: 10,
            max_boost: 200,
        }
    }
}

impl AgingConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Priority boost earned after waiting `waited`.
    pub fn boost(&self, waited: Duration) -> u32 {
        if !self.enabled || self.interval_ms == 0 {
            return 0;
        }
        let intervals = waited.as_millis() / u128::from(self.interval_ms);
        let boost = intervals.saturating_mul(u128::from(self.step));
        u32::try_from(boost).unwrap_or(u32::MAX).min(self.max_boost)
    }
}

/// Bounded retry with exponential backoff for transient backend errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 50,
            multiplier: 2.0,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }

    fn validate(&self) -> PipelineResult<()> {
        if self.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(invalid("retry.multiplier must be >= 1.0"));
        }
        Ok(())
    }
}

/// Result cache limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub max_bytes: u64,
    /// Entries older than this are treated as absent. `None` disables expiry.
    pub ttl_ms: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1_000,
            max_bytes: 100 * 1024 * 1024,
            ttl_ms: Some(3_600_000),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }

    fn validate(&self) -> PipelineResult<()> {
        if self.enabled && self.max_entries == 0 {
            return Err(invalid("cache.max_entries must be at least 1"));
        }
        if self.enabled && self.max_bytes == 0 {
            return Err(invalid("cache.max_bytes must be at least 1"));
        }
        Ok(())
    }
}

/// Repetition settings for probabilistic backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Hard cap on repetitions of a terminal step.
    pub max_repetitions: u32,
    /// Samples required before early exit is considered.
    pub min_repetitions: u32,
    /// Repetitions requested per backend call.
    pub batch_size: u32,
    /// Stop once the confidence half-width of the mode frequency is at most
    /// this value.
    pub target_half_width: f64,
    /// Normal quantile for the confidence interval (1.96 for 95%).
    pub z: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_repetitions: 1_000,
            min_repetitions: 100,
            batch_size: 100,
            target_half_width: 0.02,
            z: 1.96,
        }
    }
}

impl ExecutorConfig {
    fn validate(&self) -> PipelineResult<()> {
        if self.max_repetitions == 0 {
            return Err(invalid("executor.max_repetitions must be at least 1"));
        }
        if self.min_repetitions > self.max_repetitions {
            return Err(invalid(
                "executor.min_repetitions cannot exceed executor.max_repetitions",
            ));
        }
        if self.batch_size == 0 {
            return Err(invalid("executor.batch_size must be at least 1"));
        }
        if self.target_half_width.is_nan()
            || self.target_half_width < 0.0
            || !self.z.is_finite()
            || self.z <= 0.0
        {
            return Err(invalid(
                "executor.target_half_width must be >= 0 and executor.z positive",
            ));
        }
        Ok(())
    }
}

/// Result interpretation thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Results with lower confidence are flagged as low confidence.
    pub confidence_floor: f64,
    /// Outcomes rarer than this are omitted from the reported distribution.
    pub significance_threshold: f64,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.5,
            significance_threshold: 0.05,
        }
    }
}

impl InterpreterConfig {
    fn validate(&self) -> PipelineResult<()> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.confidence_floor) || !in_unit(self.significance_threshold) {
            return Err(invalid("interpreter thresholds must lie in [0, 1]"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = PipelineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.scheduler.max_concurrency, 4);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.cache.ttl(), Some(Duration::from_secs(3600)));
        assert_eq!(cfg.executor.max_repetitions, 1_000);
        assert_eq!(cfg.interpreter.significance_threshold, 0.05);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.scheduler.max_concurrency = 0;
        assert!(matches!(cfg.validate(), Err(PipelineError::Config(_))));

        let mut cfg = PipelineConfig::default();
        cfg.executor.min_repetitions = cfg.executor.max_repetitions + 1;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.interpreter.confidence_floor = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.retry.max_attempts = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.cache.enabled = false;
        cfg.cache.max_entries = 0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 100,
            multiplier: 2.0,
            max_backoff_ms: 300,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(300));
        assert_eq!(policy.backoff(10), Duration::from_millis(300));
    }

    #[test]
    fn test_aging_boost() {
        let aging = AgingConfig {
            enabled: true,
            interval_ms: 100,
            step: 25,
            max_boost: 60,
        };
        assert_eq!(aging.boost(Duration::from_millis(99)), 0);
        assert_eq!(aging.boost(Duration::from_millis(100)), 25);
        assert_eq!(aging.boost(Duration::from_millis(250)), 50);
        assert_eq!(aging.boost(Duration::from_secs(10)), 60);
        assert_eq!(AgingConfig::disabled().boost(Duration::from_secs(10)), 0);
    }
}
