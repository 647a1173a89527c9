use super::*;
use loom_core::{BackendKind, JobId};
use std::time::Instant;

fn job() -> JobId {
    JobId::new()
}

#[test]
fn starts_immediately_while_under_capacity() {
    let scheduler = Scheduler::new(2, 1);
    let a = job();
    let admission = scheduler.submit(BackendKind::Cli, a, 0, Instant::now());
    assert_eq!(admission, Admission::StartNow);
    assert_eq!(scheduler.active_count(BackendKind::Cli), 1);
}

#[test]
fn queues_once_capacity_is_reached() {
    let scheduler = Scheduler::new(1, 1);
    let a = job();
    let b = job();
    assert_eq!(scheduler.submit(BackendKind::Cli, a, 0, Instant::now()), Admission::StartNow);
    match scheduler.submit(BackendKind::Cli, b, 0, Instant::now()) {
        Admission::Queued { position, .. } => assert_eq!(position, 1),
        other => panic!("expected Queued, got {other:?}"),
    }
}

#[test]
fn higher_priority_jobs_rank_ahead_of_lower_priority() {
    let scheduler = Scheduler::new(1, 1);
    let running = job();
    scheduler.submit(BackendKind::Cli, running, 0, Instant::now());

    let low = job();
    let high = job();
    scheduler.submit(BackendKind::Cli, low, 0, Instant::now());
    scheduler.submit(BackendKind::Cli, high, 10, Instant::now());

    assert_eq!(scheduler.queue_status(BackendKind::Cli, &high).map(|(pos, _)| pos), Some(1));
    assert_eq!(scheduler.queue_status(BackendKind::Cli, &low).map(|(pos, _)| pos), Some(2));
}

#[test]
fn equal_priority_preserves_fifo_order() {
    let scheduler = Scheduler::new(1, 1);
    let running = job();
    scheduler.submit(BackendKind::Cli, running, 0, Instant::now());

    let t0 = Instant::now();
    let first = job();
    let second = job();
    scheduler.submit(BackendKind::Cli, first, 5, t0);
    scheduler.submit(BackendKind::Cli, second, 5, t0 + std::time::Duration::from_millis(5));

    assert_eq!(scheduler.queue_status(BackendKind::Cli, &first).map(|(pos, _)| pos), Some(1));
    assert_eq!(scheduler.queue_status(BackendKind::Cli, &second).map(|(pos, _)| pos), Some(2));
}

#[test]
fn completing_a_job_admits_the_next_highest_priority_waiter() {
    let scheduler = Scheduler::new(1, 1);
    let running = job();
    scheduler.submit(BackendKind::Cli, running, 0, Instant::now());

    let low = job();
    let high = job();
    scheduler.submit(BackendKind::Cli, low, 0, Instant::now());
    scheduler.submit(BackendKind::Cli, high, 10, Instant::now());

    let admitted = scheduler.complete(BackendKind::Cli, &running, 1_000);
    assert_eq!(admitted, Some(high));
    assert_eq!(scheduler.active_count(BackendKind::Cli), 1);
    assert_eq!(scheduler.queue_status(BackendKind::Cli, &low).map(|(pos, _)| pos), Some(1));
}

#[test]
fn remove_queued_cancels_a_waiting_job_without_touching_active_set() {
    let scheduler = Scheduler::new(1, 1);
    let running = job();
    scheduler.submit(BackendKind::Cli, running, 0, Instant::now());
    let waiting = job();
    scheduler.submit(BackendKind::Cli, waiting, 0, Instant::now());

    assert!(scheduler.remove_queued(BackendKind::Cli, &waiting));
    assert!(scheduler.queue_status(BackendKind::Cli, &waiting).is_none());
    assert_eq!(scheduler.active_count(BackendKind::Cli), 1);
}

#[test]
fn drain_all_queued_empties_every_backend_waiting_list() {
    let scheduler = Scheduler::new(1, 1);
    let cli_running = job();
    scheduler.submit(BackendKind::Cli, cli_running, 0, Instant::now());
    let cli_waiting = job();
    scheduler.submit(BackendKind::Cli, cli_waiting, 0, Instant::now());

    let dsl_waiting = job();
    let dsl_running = job();
    scheduler.submit(BackendKind::Dsl, dsl_running, 0, Instant::now());
    scheduler.submit(BackendKind::Dsl, dsl_waiting, 0, Instant::now());

    let drained = scheduler.drain_all_queued();
    assert_eq!(drained.len(), 2);
    assert!(drained.contains(&(BackendKind::Cli, cli_waiting)));
    assert!(drained.contains(&(BackendKind::Dsl, dsl_waiting)));
    // Active jobs are untouched by draining the queue.
    assert_eq!(scheduler.active_count(BackendKind::Cli), 1);
    assert_eq!(scheduler.active_count(BackendKind::Dsl), 1);
}

#[test]
fn queue_saturation_rejects_admission() {
    let scheduler = Scheduler::with_queue_limits(1, 1, 1, 1);
    let running = job();
    scheduler.submit(BackendKind::Cli, running, 0, Instant::now());
    let waiting = job();
    assert!(matches!(
        scheduler.submit(BackendKind::Cli, waiting, 0, Instant::now()),
        Admission::Queued { .. }
    ));
    let overflow = job();
    assert_eq!(scheduler.submit(BackendKind::Cli, overflow, 0, Instant::now()), Admission::Rejected);
}

#[test]
fn independent_backend_kinds_do_not_share_capacity() {
    let scheduler = Scheduler::new(1, 1);
    let cli_job = job();
    let dsl_job = job();
    assert_eq!(scheduler.submit(BackendKind::Cli, cli_job, 0, Instant::now()), Admission::StartNow);
    assert_eq!(scheduler.submit(BackendKind::Dsl, dsl_job, 0, Instant::now()), Admission::StartNow);
}
