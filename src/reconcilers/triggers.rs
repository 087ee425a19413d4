// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deduplicated background pollers that re-trigger reconciliation.
//!
//! Some readiness signals, such as a workload API server starting to answer, never
//! produce a watch event on the management cluster. The cluster reconciler therefore
//! starts an online poller through [`TriggerRegistry::start_if_absent`]. The registry
//! guarantees at most one live poller per key (the resource UID):
//!
//! 1. check-and-insert the key under a mutex; return `false` if it was present
//! 2. spawn one task that polls [`OnlinePoll::ready`] every interval
//! 3. once ready, send one event on the trigger channel (fed to `Controller::reconcile_on`)
//! 4. keep polling [`OnlinePoll::recorded`] until the transition is durably recorded
//! 5. remove the key
//!
//! The mutex is only held for the set operation, never across an `.await`. The key is
//! removed by a drop guard, so a panicking poller does not leave a stale entry behind.
//! The registry is process-local; after a restart the next reconcile restarts the
//! poller if it is still needed.

use crate::metrics;
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Predicates polled by an online poller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OnlinePoll: Send + Sync + 'static {
    /// Returns `true` once the awaited external state is reached.
    async fn ready(&self) -> bool;

    /// Returns `true` once the transition is recorded and the poller can stop.
    async fn recorded(&self) -> bool;
}

type ActiveKeys = Arc<Mutex<HashSet<String>>>;

fn lock(keys: &ActiveKeys) -> std::sync::MutexGuard<'_, HashSet<String>> {
    keys.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the poller key when the poller task ends, however it ends.
struct ActiveGuard {
    keys: ActiveKeys,
    key: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        lock(&self.keys).remove(&self.key);
        metrics::record_poller_finished();
        debug!("Online poller for {} finished", self.key);
    }
}

/// Registry of running online pollers.
#[derive(Clone)]
pub struct TriggerRegistry<T> {
    active: ActiveKeys,
    interval: Duration,
    sender: UnboundedSender<T>,
}

impl<T: Send + 'static> TriggerRegistry<T> {
    /// Create a registry polling every `interval` and the receiving end of its
    /// trigger channel.
    #[must_use]
    pub fn new(interval: Duration) -> (Self, UnboundedReceiver<T>) {
        let (sender, receiver) = unbounded();
        (
            Self {
                active: Arc::new(Mutex::new(HashSet::new())),
                interval,
                sender,
            },
            receiver,
        )
    }

    /// Start a poller for `key` unless one is already running.
    ///
    /// Returns `true` if this call started the poller. `event` is sent on the trigger
    /// channel exactly once, when `poll.ready()` first returns `true`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_if_absent<P: OnlinePoll>(&self, key: &str, event: T, poll: P) -> bool {
        if !lock(&self.active).insert(key.to_string()) {
            debug!("Online poller for {} already running", key);
            return false;
        }

        info!("Starting online poller for {}", key);
        metrics::record_poller_started();
        let guard = ActiveGuard {
            keys: self.active.clone(),
            key: key.to_string(),
        };
        let sender = self.sender.clone();
        let interval = self.interval;

        tokio::spawn(async move {
            while !poll.ready().await {
                tokio::time::sleep(interval).await;
            }

            if sender.unbounded_send(event).is_err() {
                warn!("Trigger channel closed, dropping event for {}", guard.key);
            } else {
                metrics::record_trigger_sent();
                info!("Online poller for {} observed readiness", guard.key);
            }

            while !poll.recorded().await {
                tokio::time::sleep(interval).await;
            }
            drop(guard);
        });

        true
    }

    /// Number of running pollers.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn active(&self) -> usize {
        lock(&self.active).len()
    }
}

#[cfg(test)]
#[path = "triggers_tests.rs"]
mod triggers_tests;
