// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Per-topic pub-sub with monotonic sequencing (spec.md §4.6, C6).

use loom_core::Event;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// An [`Event`] tagged with its per-topic monotonic sequence number (spec.md
/// §4.6 "each event on a topic carries a strictly increasing sequence
/// number").
#[derive(Debug, Clone)]
pub struct SequencedEvent {
    pub seq: u64,
    pub event: Event,
}

struct Topic {
    sender: broadcast::Sender<SequencedEvent>,
    next_seq: u64,
    /// Latest progress snapshot, synthesized as a `job:snapshot` event for
    /// subscribers that join after the topic already has history (spec.md
    /// §4.6 "late subscribers receive a synthesized snapshot event").
    last_snapshot: Option<Event>,
}

impl Topic {
    fn new(capacity: usize) -> Self {
        Self { sender: broadcast::channel(capacity).0, next_seq: 0, last_snapshot: None }
    }
}

/// Result of subscribing to a topic: a snapshot (if one exists) followed by
/// the live receiver.
pub struct Subscription {
    pub snapshot: Option<SequencedEvent>,
    pub receiver: broadcast::Receiver<SequencedEvent>,
}

/// Bounded, drop-oldest pub-sub keyed by topic string (job id, workflow
/// execution id, etc). Built directly on `tokio::sync::broadcast`: its
/// native `RecvError::Lagged(n)` is exactly the spec's "bounded outbound
/// queue, drop oldest" semantics, surfaced to callers as
/// [`Event::JobDropped`].
pub struct EventBus {
    capacity: usize,
    topics: Mutex<HashMap<String, Topic>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, topics: Mutex::new(HashMap::new()) }
    }

    /// Publish an event to `topic`, recording it as the latest snapshot when
    /// it is itself a `job:snapshot` (or another state-carrying event the
    /// caller designates via [`EventBus::publish_with_snapshot`]).
    pub fn publish(&self, topic: &str, event: Event) -> u64 {
        self.publish_with_snapshot(topic, event, None)
    }

    /// Publish an event, optionally updating the synthesized late-subscriber
    /// snapshot to `snapshot` (spec.md §4.6).
    pub fn publish_with_snapshot(&self, topic: &str, event: Event, snapshot: Option<Event>) -> u64 {
        let mut topics = self.topics.lock();
        let entry = topics.entry(topic.to_string()).or_insert_with(|| Topic::new(self.capacity));
        let seq = entry.next_seq;
        entry.next_seq += 1;
        if let Some(snapshot) = snapshot {
            entry.last_snapshot = Some(snapshot);
        }
        // No active subscribers is not an error; the event is simply dropped.
        let _ = entry.sender.send(SequencedEvent { seq, event });
        seq
    }

    /// Subscribe to `topic`, receiving a synthesized snapshot first if the
    /// topic already has state.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let mut topics = self.topics.lock();
        let entry = topics.entry(topic.to_string()).or_insert_with(|| Topic::new(self.capacity));
        let receiver = entry.sender.subscribe();
        let snapshot = entry
            .last_snapshot
            .clone()
            .map(|event| SequencedEvent { seq: entry.next_seq.saturating_sub(1), event });
        Subscription { snapshot, receiver }
    }

    /// Subscribe to `topic`, using `snapshot` (built by the caller from the
    /// job/execution's current state) as the late-subscriber replay event
    /// instead of whatever the topic's own `last_snapshot` holds (spec.md
    /// §4.6 "late subscribers receive a synthesized snapshot event"). The
    /// caller's state is always at least as current as anything recorded on
    /// the bus, so it is used unconditionally rather than merged with
    /// `last_snapshot`.
    pub fn subscribe_with_snapshot(&self, topic: &str, snapshot: Event) -> Subscription {
        let mut topics = self.topics.lock();
        let entry = topics.entry(topic.to_string()).or_insert_with(|| Topic::new(self.capacity));
        let receiver = entry.sender.subscribe();
        let seq = entry.next_seq.saturating_sub(1);
        Subscription { snapshot: Some(SequencedEvent { seq, event: snapshot }), receiver }
    }

    /// Drop a topic's state entirely, e.g. once a job/workflow is terminal
    /// and fully drained (bounds unbounded memory growth).
    pub fn retire(&self, topic: &str) {
        self.topics.lock().remove(topic);
    }
}

/// Receive the next event off a subscription, translating a broadcast lag
/// into [`Event::JobDropped`] rather than surfacing the channel error
/// (spec.md §4.6 "drop oldest ... deliver a `job:dropped` marker").
pub async fn recv_or_dropped(
    job_id: loom_core::JobId,
    receiver: &mut broadcast::Receiver<SequencedEvent>,
) -> Option<SequencedEvent> {
    loop {
        match receiver.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                return Some(SequencedEvent { seq: 0, event: Event::JobDropped { job_id, dropped: n } });
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
#[path = "event_bus_tests.rs"]
mod tests;
