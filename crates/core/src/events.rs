// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Observer events.
//!
//! Cache and scheduler state changes are emitted to an `EventPublisher`
//! collaborator through a bounded, non-blocking `crossbeam-channel` sink:
//! a full channel drops the event and counts it rather than stalling the
//! build.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::ids::{ActionId, TargetId};

/// A build-lifecycle event emitted by the cache coordinator or scheduler.
#[derive(Debug, Clone)]
pub enum Event {
    CacheHit { target: TargetId },
    CacheMiss { target: TargetId },
    CacheUpdate { target: TargetId },
    ActionHit { action: ActionId },
    ActionMiss { action: ActionId },
    RemotePush { key: String },
    GcComplete { removed: usize, bytes_reclaimed: u64 },
}

/// Sink half of the event channel. Cloneable; every clone shares the
/// underlying bounded queue and the drop counter.
#[derive(Clone)]
pub struct EventPublisher {
    sender: Sender<Event>,
    dropped: std::sync::Arc<AtomicU64>,
}

impl EventPublisher {
    /// Create a bounded channel pair. `capacity` of 0 makes every publish a
    /// best-effort no-op unless a receiver is actively polling.
    pub fn bounded(capacity: usize) -> (Self, Receiver<Event>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        (
            Self {
                sender,
                dropped: std::sync::Arc::new(AtomicU64::new(0)),
            },
            receiver,
        )
    }

    /// Publish `event`. Never blocks: a full channel silently drops the
    /// event and increments the drop counter.
    pub fn publish(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("event dropped: channel full");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("event dropped: no receiver");
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
