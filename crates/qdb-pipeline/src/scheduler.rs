//! Admission control.
//!
//! A single task owns the priority queue and every job state transition.
//! Callers, workers and handles talk to it over an mpsc channel; requests that
//! need an answer carry a oneshot reply. Each job publishes its snapshot on a
//! `watch` channel that backs [`JobHandle::status`] and [`JobHandle::result`].
//!
//! Admission is strict head-of-line: when the queue head does not fit in the
//! remaining budget, nothing behind it is admitted until units are released.

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::budget::{BudgetLease, ResourceBudget};
use crate::config::SchedulerConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::fingerprint::Fingerprint;
use crate::interpreter::CallerResult;
use crate::job::{JobDescription, JobId, JobState};
use crate::planner::ExecutionPlan;
use crate::queue::{PriorityQueue, ScheduledJob};
use crate::runner::{JobOutcome, JobRunner};

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub id: JobId,
    pub state: JobState,
    /// Set once the job reaches a terminal state.
    pub outcome: Option<JobOutcome>,
}

impl JobSnapshot {
    fn new(id: JobId, state: JobState) -> Self {
        Self {
            id,
            state,
            outcome: None,
        }
    }
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still queued and is now cancelled.
    Cancelled,
    /// The job was admitted; it stops at the next step boundary or its result
    /// is discarded.
    Pending,
    AlreadyFinished(JobState),
}

/// Scheduler counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub paused: bool,
    pub units_in_use: u64,
    pub units_capacity: u64,
}

enum Command {
    Submit {
        job: ScheduledSubmission,
        reply: oneshot::Sender<PipelineResult<watch::Receiver<JobSnapshot>>>,
    },
    Cancel {
        id: JobId,
        reply: oneshot::Sender<Option<CancelOutcome>>,
    },
    Started {
        id: JobId,
    },
    Finished {
        id: JobId,
        outcome: JobOutcome,
    },
    Pause,
    Resume,
    Stats {
        reply: oneshot::Sender<SchedulerStats>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct ScheduledSubmission {
    id: JobId,
    job: Arc<JobDescription>,
    plan: Arc<ExecutionPlan>,
    fingerprint: Fingerprint,
}

/// Handle to a submitted job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    fingerprint: Fingerprint,
    rx: watch::Receiver<JobSnapshot>,
    commands: Option<mpsc::UnboundedSender<Command>>,
}

impl JobHandle {
    /// A handle for a job that completed without being scheduled.
    pub(crate) fn completed(fingerprint: Fingerprint, result: Arc<CallerResult>) -> Self {
        let id = JobId::new();
        let (_tx, rx) = watch::channel(JobSnapshot {
            id,
            state: JobState::Completed,
            outcome: Some(JobOutcome::Completed(result)),
        });
        Self {
            id,
            fingerprint,
            rx,
            commands: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn status(&self) -> JobState {
        self.rx.borrow().state
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.rx.borrow().clone()
    }

    /// The job's result.
    ///
    /// Without `block`, an unfinished job yields [`PipelineError::Timeout`]
    /// immediately. With `block`, waits up to `timeout`, or indefinitely when
    /// `timeout` is `None`.
    pub async fn result(
        &self,
        block: bool,
        timeout: Option<Duration>,
    ) -> PipelineResult<Arc<CallerResult>> {
        let snapshot = if !block {
            self.snapshot()
        } else {
            let mut rx = self.rx.clone();
            let waited = match timeout {
                Some(limit) => {
                    tokio::time::timeout(limit, rx.wait_for(|s| s.state.is_terminal()))
                        .await
                        .map_err(|_| PipelineError::Timeout(self.id))?
                        .map(|s| s.clone())
                }
                None => rx
                    .wait_for(|s| s.state.is_terminal())
                    .await
                    .map(|s| s.clone()),
            };
            waited.map_err(|_| PipelineError::SchedulerClosed)?
        };

        match snapshot.outcome {
            Some(JobOutcome::Completed(result)) => Ok(result),
            Some(JobOutcome::Failed(err)) => Err(err),
            Some(JobOutcome::Cancelled) => Err(PipelineError::Cancelled(self.id)),
            None => Err(PipelineError::Timeout(self.id)),
        }
    }

    /// Request cancellation.
    pub async fn cancel(&self) -> PipelineResult<CancelOutcome> {
        let state = self.status();
        if state.is_terminal() {
            return Ok(CancelOutcome::AlreadyFinished(state));
        }
        let commands = self
            .commands
            .as_ref()
            .ok_or(PipelineError::SchedulerClosed)?;
        let (reply, rx) = oneshot::channel();
        commands
            .send(Command::Cancel { id: self.id, reply })
            .map_err(|_| PipelineError::SchedulerClosed)?;
        let outcome = rx.await.map_err(|_| PipelineError::SchedulerClosed)?;
        Ok(outcome.unwrap_or_else(|| CancelOutcome::AlreadyFinished(self.status())))
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Submit { job, .. } => write!(f, "Submit({})", job.id),
            Command::Cancel { id, .. } => write!(f, "Cancel({})", id),
            Command::Started { id } => write!(f, "Started({})", id),
            Command::Finished { id, .. } => write!(f, "Finished({})", id),
            Command::Pause => write!(f, "Pause"),
            Command::Resume => write!(f, "Resume"),
            Command::Stats { .. } => write!(f, "Stats"),
            Command::Shutdown { .. } => write!(f, "Shutdown"),
        }
    }
}

/// Handle to the admission-control task.
#[derive(Debug, Clone)]
pub struct Scheduler {
    commands: mpsc::UnboundedSender<Command>,
}

impl Scheduler {
    /// Start the admission-control task. Must be called within a Tokio
    /// runtime.
    pub fn spawn(config: SchedulerConfig, runner: JobRunner) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let actor = Actor {
            budget: ResourceBudget::new(config.total_units),
            queue: PriorityQueue::new(config.aging.clone()),
            config,
            runner,
            jobs: FxHashMap::default(),
            active: FxHashMap::default(),
            next_seq: 0,
            paused: false,
            closing: None,
            stats: SchedulerStats::default(),
            commands: commands.downgrade(),
        };
        tokio::spawn(actor.run(rx));
        Self { commands }
    }

    /// Queue a planned job.
    pub async fn submit(
        &self,
        job: Arc<JobDescription>,
        plan: Arc<ExecutionPlan>,
        fingerprint: Fingerprint,
    ) -> PipelineResult<JobHandle> {
        let id = JobId::new();
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            job: ScheduledSubmission {
                id,
                job,
                plan,
                fingerprint,
            },
            reply,
        })?;
        let status = rx.await.map_err(|_| PipelineError::SchedulerClosed)??;
        Ok(JobHandle {
            id,
            fingerprint,
            rx: status,
            commands: Some(self.commands.clone()),
        })
    }

    /// Stop admitting queued jobs. Running jobs are unaffected.
    pub fn pause(&self) -> PipelineResult<()> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> PipelineResult<()> {
        self.send(Command::Resume)
    }

    pub async fn stats(&self) -> PipelineResult<SchedulerStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply })?;
        rx.await.map_err(|_| PipelineError::SchedulerClosed)
    }

    /// Cancel queued jobs, signal running ones and wait for them to finish.
    pub async fn shutdown(&self) -> PipelineResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply })?;
        rx.await.map_err(|_| PipelineError::SchedulerClosed)
    }

    fn send(&self, command: Command) -> PipelineResult<()> {
        self.commands
            .send(command)
            .map_err(|_| PipelineError::SchedulerClosed)
    }
}

struct JobEntry {
    state: JobState,
    status: watch::Sender<JobSnapshot>,
    cancel: CancellationToken,
}

struct ActiveJob {
    admitted_at: Instant,
    latency: Duration,
}

struct Actor {
    config: SchedulerConfig,
    runner: JobRunner,
    budget: ResourceBudget,
    queue: PriorityQueue,
    jobs: FxHashMap<JobId, JobEntry>,
    active: FxHashMap<JobId, ActiveJob>,
    next_seq: u64,
    paused: bool,
    /// Shutdown waiters, set once shutdown has begun.
    closing: Option<Vec<oneshot::Sender<()>>>,
    stats: SchedulerStats,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!(
            max_concurrency = self.config.max_concurrency,
            total_units = self.config.total_units,
            "Scheduler started"
        );

        while let Some(command) = rx.recv().await {
            tracing::trace!(?command, "Scheduler command");
            match command {
                Command::Submit { job, reply } => {
                    let _ = reply.send(self.submit(job));
                }
                Command::Cancel { id, reply } => {
                    let _ = reply.send(self.cancel(id));
                }
                Command::Started { id } => {
                    self.set_state(id, JobState::Running);
                }
                Command::Finished { id, outcome } => {
                    self.active.remove(&id);
                    self.finish(id, outcome);
                }
                Command::Pause => {
                    tracing::info!("Admission paused");
                    self.paused = true;
                }
                Command::Resume => {
                    if self.closing.is_none() {
                        tracing::info!("Admission resumed");
                        self.paused = false;
                    }
                }
                Command::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                Command::Shutdown { reply } => {
                    self.begin_shutdown(reply);
                }
            }

            if self.closing.is_some() {
                if self.active.is_empty() {
                    break;
                }
            } else {
                self.admit();
            }
        }

        for waiter in self.closing.take().into_iter().flatten() {
            let _ = waiter.send(());
        }
        tracing::debug!("Scheduler stopped");
    }

    fn submit(
        &mut self,
        submission: ScheduledSubmission,
    ) -> PipelineResult<watch::Receiver<JobSnapshot>> {
        if self.closing.is_some() {
            return Err(PipelineError::SchedulerClosed);
        }
        let ScheduledSubmission {
            id,
            job,
            plan,
            fingerprint,
        } = submission;

        if plan.units() > self.budget.capacity() {
            return Err(PipelineError::InfeasibleJob(format!(
                "plan needs {} units but the budget holds {}",
                plan.units(),
                self.budget.capacity()
            )));
        }
        if self.queue.len() >= self.config.max_queued {
            return Err(PipelineError::QueueFull(self.queue.len()));
        }

        let now = Instant::now();
        // A deadline past the clock's range never binds.
        let deadline = job.deadline.and_then(|d| now.checked_add(d));
        if let Some(relative) = job.deadline {
            let earliest = self
                .earliest_start(&job, deadline, now)
                .saturating_add(plan.latency());
            if earliest > relative {
                tracing::debug!(
                    job_id = %id,
                    earliest_ms = earliest.as_millis() as u64,
                    deadline_ms = relative.as_millis() as u64,
                    "Rejecting job with infeasible deadline"
                );
                return Err(PipelineError::DeadlineInfeasible {
                    earliest_ms: earliest.as_millis() as u64,
                    deadline_ms: relative.as_millis() as u64,
                });
            }
        }

        let (status, rx) = watch::channel(JobSnapshot::new(id, JobState::Queued));
        self.jobs.insert(
            id,
            JobEntry {
                state: JobState::Queued,
                status,
                cancel: CancellationToken::new(),
            },
        );
        let seq = self.next_seq;
        self.next_seq += 1;

        tracing::info!(
            job_id = %id,
            job = %job.display_name(),
            strategy = %plan.strategy_id(),
            priority = %job.priority,
            units = plan.units(),
            "Job queued"
        );
        self.queue.push(ScheduledJob {
            id,
            priority: job.priority,
            job,
            plan,
            fingerprint,
            arrival: now,
            deadline,
            seq,
        });
        Ok(rx)
    }

    /// Estimated wait before a new job could start: latency of the queued
    /// jobs ahead of it plus the remaining latency of running jobs, spread
    /// across the worker slots.
    fn earliest_start(
        &self,
        job: &JobDescription,
        deadline: Option<Instant>,
        now: Instant,
    ) -> Duration {
        let ahead = self.queue.latency_ahead_of(job.priority, deadline, now);
        if ahead.is_zero() && self.active.len() < self.config.max_concurrency {
            return Duration::ZERO;
        }
        let running = self
            .active
            .values()
            .map(|a| {
                a.latency
                    .saturating_sub(now.saturating_duration_since(a.admitted_at))
            })
            .fold(Duration::ZERO, Duration::saturating_add);
        let slots = u32::try_from(self.config.max_concurrency).unwrap_or(u32::MAX);
        ahead.saturating_add(running) / slots
    }

    fn admit(&mut self) {
        while !self.paused && self.active.len() < self.config.max_concurrency {
            let now = Instant::now();
            let Some(head) = self.queue.peek_next(now) else {
                break;
            };

            if let Some(deadline) = head.deadline {
                if head.plan.latency() > deadline.saturating_duration_since(now) {
                    let id = head.id;
                    let earliest_ms = head.plan.latency().as_millis() as u64;
                    let deadline_ms = deadline.saturating_duration_since(now).as_millis() as u64;
                    self.queue.remove(id);
                    tracing::warn!(job_id = %id, "Deadline can no longer be met");
                    self.finish(
                        id,
                        JobOutcome::Failed(PipelineError::DeadlineInfeasible {
                            earliest_ms,
                            deadline_ms,
                        }),
                    );
                    continue;
                }
            }

            let Some(lease) = self.budget.try_acquire(head.plan.units()) else {
                tracing::trace!(
                    job_id = %head.id,
                    units = head.plan.units(),
                    available = self.budget.available(),
                    "Queue head waiting for budget"
                );
                break;
            };
            let Some(job) = self.queue.pop_next(now) else {
                break;
            };
            self.start(job, lease, now);
        }
    }

    fn start(&mut self, job: ScheduledJob, lease: BudgetLease, now: Instant) {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let Some(cancel) = self.jobs.get(&job.id).map(|e| e.cancel.clone()) else {
            return;
        };
        self.set_state(job.id, JobState::Admitted);
        self.active.insert(
            job.id,
            ActiveJob {
                admitted_at: now,
                latency: job.plan.latency(),
            },
        );
        tracing::info!(
            job_id = %job.id,
            units = lease.units(),
            waited_ms = now.saturating_duration_since(job.arrival).as_millis() as u64,
            "Job admitted"
        );

        let runner = self.runner.clone();
        tokio::spawn(async move {
            let id = job.id;
            let outcome = if cancel.is_cancelled() {
                JobOutcome::Cancelled
            } else {
                let _ = commands.send(Command::Started { id });
                runner.run(id, job.fingerprint, &job.plan, &cancel).await
            };
            drop(lease);
            let _ = commands.send(Command::Finished { id, outcome });
        });
    }

    fn cancel(&mut self, id: JobId) -> Option<CancelOutcome> {
        let entry = self.jobs.get(&id)?;
        match entry.state {
            JobState::Queued => {
                self.queue.remove(id);
                self.finish(id, JobOutcome::Cancelled);
                Some(CancelOutcome::Cancelled)
            }
            // Admitted jobs hold a lease; their worker reports the outcome.
            JobState::Admitted | JobState::Running => {
                tracing::debug!(job_id = %id, state = %entry.state, "Cancellation requested for started job");
                entry.cancel.cancel();
                Some(CancelOutcome::Pending)
            }
            state => Some(CancelOutcome::AlreadyFinished(state)),
        }
    }

    fn begin_shutdown(&mut self, reply: oneshot::Sender<()>) {
        if let Some(waiters) = self.closing.as_mut() {
            waiters.push(reply);
            return;
        }
        tracing::info!(
            queued = self.queue.len(),
            running = self.active.len(),
            "Scheduler shutting down"
        );
        self.paused = true;
        self.closing = Some(vec![reply]);
        for job in self.queue.drain() {
            self.finish(job.id, JobOutcome::Cancelled);
        }
        for id in self.active.keys() {
            if let Some(entry) = self.jobs.get(id) {
                entry.cancel.cancel();
            }
        }
    }

    fn set_state(&mut self, id: JobId, state: JobState) {
        if let Some(entry) = self.jobs.get_mut(&id) {
            if entry.state.is_terminal() {
                return;
            }
            entry.state = state;
            entry.status.send_modify(|s| s.state = state);
        }
    }

    fn finish(&mut self, id: JobId, outcome: JobOutcome) {
        let Some(entry) = self.jobs.remove(&id) else {
            return;
        };
        let state = match &outcome {
            JobOutcome::Completed(_) => {
                self.stats.completed += 1;
                JobState::Completed
            }
            JobOutcome::Failed(err) => {
                self.stats.failed += 1;
                tracing::warn!(job_id = %id, error = %err, "Job failed");
                JobState::Failed
            }
            JobOutcome::Cancelled => {
                self.stats.cancelled += 1;
                JobState::Cancelled
            }
        };
        tracing::info!(job_id = %id, %state, "Job finished");
        entry.status.send_replace(JobSnapshot {
            id,
            state,
            outcome: Some(outcome),
        });
    }

    fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queued: self.queue.len(),
            running: self.active.len(),
            paused: self.paused,
            units_in_use: self.budget.in_use(),
            units_capacity: self.budget.capacity(),
            ..self.stats.clone()
        }
    }
}
