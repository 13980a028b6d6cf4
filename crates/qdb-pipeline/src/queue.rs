//! Priority queue of jobs awaiting admission.
//!
//! Ordering is evaluated at a given instant because aging makes a job's
//! effective priority grow while it waits:
//!
//! 1. higher effective priority first,
//! 2. then earlier absolute deadline (jobs without one go last),
//! 3. then arrival order.

use std::cmp::{Ordering, Reverse};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::AgingConfig;
use crate::fingerprint::Fingerprint;
use crate::job::{JobDescription, JobId, Priority};
use crate::planner::ExecutionPlan;

/// A planned job with its admission metadata.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub id: JobId,
    pub job: Arc<JobDescription>,
    pub plan: Arc<ExecutionPlan>,
    pub fingerprint: Fingerprint,
    /// Base priority, before aging.
    pub priority: Priority,
    pub arrival: Instant,
    /// Absolute deadline.
    pub deadline: Option<Instant>,
    /// Arrival sequence number.
    pub seq: u64,
}

impl ScheduledJob {
    pub fn effective_priority(&self, aging: &AgingConfig, now: Instant) -> Priority {
        self.priority
            .boosted(aging.boost(now.saturating_duration_since(self.arrival)))
    }
}

type SortKey = (Reverse<Priority>, Reverse<Option<Reverse<Instant>>>, u64);

fn sort_key(priority: Priority, deadline: Option<Instant>, seq: u64) -> SortKey {
    // Some(earlier) sorts before Some(later), which sorts before None.
    (Reverse(priority), Reverse(deadline.map(Reverse)), seq)
}

/// Jobs waiting for admission.
#[derive(Debug)]
pub struct PriorityQueue {
    jobs: Vec<ScheduledJob>,
    aging: AgingConfig,
}

impl PriorityQueue {
    pub fn new(aging: AgingConfig) -> Self {
        Self {
            jobs: Vec::new(),
            aging,
        }
    }

    pub fn push(&mut self, job: ScheduledJob) {
        self.jobs.push(job);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn key(&self, job: &ScheduledJob, now: Instant) -> SortKey {
        sort_key(job.effective_priority(&self.aging, now), job.deadline, job.seq)
    }

    fn head_index(&self, now: Instant) -> Option<usize> {
        self.jobs
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| self.key(a, now).cmp(&self.key(b, now)))
            .map(|(i, _)| i)
    }

    /// The job that would be admitted next at `now`.
    pub fn peek_next(&self, now: Instant) -> Option<&ScheduledJob> {
        self.head_index(now).map(|i| &self.jobs[i])
    }

    pub fn pop_next(&mut self, now: Instant) -> Option<ScheduledJob> {
        self.head_index(now).map(|i| self.jobs.swap_remove(i))
    }

    pub fn remove(&mut self, id: JobId) -> Option<ScheduledJob> {
        let index = self.jobs.iter().position(|j| j.id == id)?;
        Some(self.jobs.swap_remove(index))
    }

    /// All queued jobs in admission order at `now`.
    pub fn ordered(&self, now: Instant) -> Vec<&ScheduledJob> {
        let mut jobs: Vec<&ScheduledJob> = self.jobs.iter().collect();
        jobs.sort_by_key(|j| self.key(j, now));
        jobs
    }

    /// Zero-based position of `id` in admission order at `now`.
    pub fn position(&self, id: JobId, now: Instant) -> Option<usize> {
        self.ordered(now).iter().position(|j| j.id == id)
    }

    /// Estimated latency of the queued jobs that would be admitted before a
    /// job arriving at `now` with `priority` and `deadline`.
    pub fn latency_ahead_of(
        &self,
        priority: Priority,
        deadline: Option<Instant>,
        now: Instant,
    ) -> Duration {
        let incoming = sort_key(priority, deadline, u64::MAX);
        self.jobs
            .iter()
            .filter(|j| self.key(j, now).cmp(&incoming) == Ordering::Less)
            .map(|j| j.plan.latency())
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    /// Remove and return every queued job.
    pub fn drain(&mut self) -> Vec<ScheduledJob> {
        std::mem::take(&mut self.jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetCatalog;
    use crate::fingerprint::fingerprint;
    use crate::planner::Planner;
    use crate::registry::{LinearCostModel, Strategy, StrategyRegistry};
    use qdb_adapter_sim::SimBackend;

    fn plan() -> Arc<ExecutionPlan> {
        let mut registry = StrategyRegistry::new();
        registry
            .register(Strategy::new(
                "s",
                "op",
                LinearCostModel::new(0.0),
                Arc::new(SimBackend::exact("exact")),
            ))
            .unwrap();
        let planner = Planner::new(Arc::new(registry), Arc::new(DatasetCatalog::new()), 1);
        Arc::new(planner.plan(&JobDescription::new("op")).unwrap())
    }

    fn job(
        seq: u64,
        priority: Priority,
        arrival: Instant,
        deadline: Option<Instant>,
    ) -> ScheduledJob {
        let job = JobDescription::new("op");
        let plan = plan();
        ScheduledJob {
            id: JobId::new(),
            fingerprint: fingerprint(&job, &plan),
            job: Arc::new(job),
            plan,
            priority,
            arrival,
            deadline,
            seq,
        }
    }

    #[test]
    fn test_priority_then_fifo() {
        let now = Instant::now();
        let mut queue = PriorityQueue::new(AgingConfig::disabled());
        let low = job(0, Priority::low(), now, None);
        let high_a = job(1, Priority::high(), now, None);
        let high_b = job(2, Priority::high(), now, None);
        let (low_id, a_id, b_id) = (low.id, high_a.id, high_b.id);
        queue.push(low);
        queue.push(high_a);
        queue.push(high_b);

        assert_eq!(queue.position(a_id, now), Some(0));
        assert_eq!(queue.pop_next(now).unwrap().id, a_id);
        assert_eq!(queue.pop_next(now).unwrap().id, b_id);
        assert_eq!(queue.pop_next(now).unwrap().id, low_id);
        assert!(queue.pop_next(now).is_none());
    }

    #[test]
    fn test_earlier_deadline_wins_within_priority() {
        let now = Instant::now();
        let mut queue = PriorityQueue::new(AgingConfig::disabled());
        let none = job(0, Priority::normal(), now, None);
        let late = job(1, Priority::normal(), now, Some(now + Duration::from_secs(60)));
        let soon = job(2, Priority::normal(), now, Some(now + Duration::from_secs(5)));
        let ids = [soon.id, late.id, none.id];
        queue.push(none);
        queue.push(late);
        queue.push(soon);

        let order: Vec<JobId> = queue.ordered(now).iter().map(|j| j.id).collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn test_overtaking_without_aging() {
        let start = Instant::now();
        let mut queue = PriorityQueue::new(AgingConfig::disabled());
        let old_low = job(0, Priority::low(), start, None);
        let later = start + Duration::from_secs(3600);
        let new_high = job(1, Priority::high(), later, None);
        let high_id = new_high.id;
        queue.push(old_low);
        queue.push(new_high);

        assert_eq!(queue.peek_next(later).unwrap().id, high_id);
    }

    #[test]
    fn test_aging_lets_old_job_win() {
        let aging = AgingConfig {
            enabled: true,
            interval_ms: 1_000,
            step: 10,
            max_boost: 200,
        };
        let start = Instant::now();
        let mut queue = PriorityQueue::new(aging);
        let old_low = job(0, Priority::low(), start, None);
        let low_id = old_low.id;
        queue.push(old_low);

        let later = start + Duration::from_secs(11);
        let new_high = job(1, Priority::high(), later, None);
        let high_id = new_high.id;
        queue.push(new_high);

        // 11 intervals give the old job 110 > 100.
        assert_eq!(queue.peek_next(later).unwrap().id, low_id);
        assert_eq!(queue.position(high_id, later), Some(1));
    }

    #[test]
    fn test_latency_ahead_counts_only_jobs_ordered_first() {
        let now = Instant::now();
        let mut queue = PriorityQueue::new(AgingConfig::disabled());
        queue.push(job(0, Priority::high(), now, None));
        queue.push(job(1, Priority::low(), now, None));
        let per_job = plan().latency();

        assert_eq!(
            queue.latency_ahead_of(Priority::normal(), None, now),
            per_job
        );
        assert_eq!(
            queue.latency_ahead_of(Priority::low(), None, now),
            per_job * 2
        );
        assert_eq!(
            queue.latency_ahead_of(Priority::critical(), None, now),
            Duration::ZERO
        );
    }

    #[test]
    fn test_remove_and_drain() {
        let now = Instant::now();
        let mut queue = PriorityQueue::new(AgingConfig::disabled());
        let a = job(0, Priority::normal(), now, None);
        let id = a.id;
        queue.push(a);
        queue.push(job(1, Priority::normal(), now, None));

        assert!(queue.remove(id).is_some());
        assert!(queue.remove(id).is_none());
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.is_empty());
    }
}
