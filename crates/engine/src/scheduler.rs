// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Per-backend priority queue + scheduler (spec.md §4.5, C5).

use loom_core::{BackendKind, JobId, QueueEntry};
use parking_lot::Mutex;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

/// Outcome of [`Scheduler::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    StartNow,
    Queued { position: usize, estimated_wait_seconds: u64 },
    /// Queue saturation (spec.md §5 "queue length >= maxQueueSize rejects
    /// with QueueFull").
    Rejected,
}

struct BackendSchedule {
    max_concurrent: usize,
    queue_max: usize,
    active: HashMap<JobId, Instant>,
    waiting: BinaryHeap<QueueEntry>,
    moving_avg_duration_ms: f64,
}

impl BackendSchedule {
    fn new(max_concurrent: usize) -> Self {
        Self::with_queue_max(max_concurrent, usize::MAX)
    }

    fn with_queue_max(max_concurrent: usize, queue_max: usize) -> Self {
        Self {
            max_concurrent,
            queue_max,
            active: HashMap::new(),
            waiting: BinaryHeap::new(),
            // Seeded so the first estimate isn't zero (spec.md §4.5's wait
            // estimate divides by this).
            moving_avg_duration_ms: 30_000.0,
        }
    }

    fn rank(&self, job_id: &JobId) -> Option<usize> {
        let mut ordered: Vec<&QueueEntry> = self.waiting.iter().collect();
        ordered.sort_by(|a, b| b.cmp(a));
        ordered.iter().position(|e| &e.job_id == job_id).map(|idx| idx + 1)
    }

    fn estimated_wait_seconds(&self, position: usize) -> u64 {
        let active = self.active.len().max(1);
        let queue_rounds = position.div_ceil(active) as f64;
        ((queue_rounds * self.moving_avg_duration_ms) / 1000.0).ceil() as u64
    }
}

/// Holds one [`BackendSchedule`] per [`BackendKind`], guarded by a single
/// mutex per backend kind the way the teacher's runtime guards per-resource
/// state (spec.md §5 "guarded by a single mutex per backend kind").
pub struct Scheduler {
    schedules: Mutex<HashMap<BackendKind, BackendSchedule>>,
}

impl Scheduler {
    pub fn new(cli_max_concurrent: usize, dsl_max_concurrent: usize) -> Self {
        let mut schedules = HashMap::new();
        schedules.insert(BackendKind::Cli, BackendSchedule::new(cli_max_concurrent));
        schedules.insert(BackendKind::Dsl, BackendSchedule::new(dsl_max_concurrent));
        schedules.insert(BackendKind::Custom, BackendSchedule::new(1));
        Self { schedules: Mutex::new(schedules) }
    }

    /// Construct with real `queueMax` bounds enforced per backend (spec.md
    /// §6.4 `cli.queueMax`/`dsl.queueMax`, §5 "Queue saturation ...
    /// rejects with QueueFull"). `Scheduler::new` leaves the queue
    /// unbounded, which is what the unit tests above rely on.
    pub fn with_queue_limits(
        cli_max_concurrent: usize,
        cli_queue_max: usize,
        dsl_max_concurrent: usize,
        dsl_queue_max: usize,
    ) -> Self {
        let mut schedules = HashMap::new();
        schedules.insert(
            BackendKind::Cli,
            BackendSchedule::with_queue_max(cli_max_concurrent, cli_queue_max),
        );
        schedules.insert(
            BackendKind::Dsl,
            BackendSchedule::with_queue_max(dsl_max_concurrent, dsl_queue_max),
        );
        schedules.insert(BackendKind::Custom, BackendSchedule::new(1));
        Self { schedules: Mutex::new(schedules) }
    }

    /// Admit a newly submitted job: start immediately if capacity allows,
    /// otherwise enqueue and report its position (spec.md §4.5 "On submit").
    pub fn submit(&self, kind: BackendKind, job_id: JobId, priority: i32, enqueued_at: Instant) -> Admission {
        let mut schedules = self.schedules.lock();
        let schedule = schedules.entry(kind).or_insert_with(|| BackendSchedule::new(1));
        if schedule.active.len() < schedule.max_concurrent {
            schedule.active.insert(job_id, Instant::now());
            Admission::StartNow
        } else if schedule.waiting.len() >= schedule.queue_max {
            Admission::Rejected
        } else {
            schedule.waiting.push(QueueEntry::new(job_id, priority, enqueued_at));
            let position = schedule.rank(&job_id).unwrap_or(schedule.waiting.len());
            let estimated_wait_seconds = schedule.estimated_wait_seconds(position);
            Admission::Queued { position, estimated_wait_seconds }
        }
    }

    /// Re-derive `(queuePosition, estimatedWaitSeconds)` for a still-queued
    /// job, for the periodic heartbeat (spec.md §4.5 "heartbeat their
    /// position into state").
    pub fn queue_status(&self, kind: BackendKind, job_id: &JobId) -> Option<(usize, u64)> {
        let schedules = self.schedules.lock();
        let schedule = schedules.get(&kind)?;
        let position = schedule.rank(job_id)?;
        Some((position, schedule.estimated_wait_seconds(position)))
    }

    /// Remove a queued (not yet running) job, e.g. on cancel. Returns
    /// `true` if it was found waiting.
    pub fn remove_queued(&self, kind: BackendKind, job_id: &JobId) -> bool {
        let mut schedules = self.schedules.lock();
        let Some(schedule) = schedules.get_mut(&kind) else { return false };
        let before = schedule.waiting.len();
        let remaining: BinaryHeap<QueueEntry> =
            schedule.waiting.drain().filter(|e| &e.job_id != job_id).collect();
        schedule.waiting = remaining;
        schedule.waiting.len() != before
    }

    /// A running job reached a terminal state: free its active slot, update
    /// the moving average, and pop the next highest-priority waiter if any
    /// (spec.md §4.5 "On job terminal").
    pub fn complete(&self, kind: BackendKind, job_id: &JobId, duration_ms: u64) -> Option<JobId> {
        let mut schedules = self.schedules.lock();
        let schedule = schedules.get_mut(&kind)?;
        schedule.active.remove(job_id);
        // Exponential moving average, alpha = 0.2.
        schedule.moving_avg_duration_ms =
            schedule.moving_avg_duration_ms * 0.8 + duration_ms as f64 * 0.2;
        let next = schedule.waiting.pop()?;
        schedule.active.insert(next.job_id, Instant::now());
        Some(next.job_id)
    }

    /// Active job count for a backend kind (spec.md §8 "active jobs per
    /// backend ≤ maxConcurrent").
    pub fn active_count(&self, kind: BackendKind) -> usize {
        self.schedules.lock().get(&kind).map(|s| s.active.len()).unwrap_or(0)
    }

    /// Waiting (queued, not yet running) job count for a backend kind
    /// (spec.md §6.1 `health()`'s `queueSize`).
    pub fn waiting_count(&self, kind: BackendKind) -> usize {
        self.schedules.lock().get(&kind).map(|s| s.waiting.len()).unwrap_or(0)
    }

    /// Drain every queued job across all backends for shutdown (spec.md
    /// §4.5 "On shutdown, queued jobs transition to
    /// `cancelled(errorKind=Shutdown)`").
    pub fn drain_all_queued(&self) -> Vec<(BackendKind, JobId)> {
        let mut schedules = self.schedules.lock();
        let mut drained = Vec::new();
        for (kind, schedule) in schedules.iter_mut() {
            for entry in schedule.waiting.drain() {
                drained.push((*kind, entry.job_id));
            }
        }
        drained
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
