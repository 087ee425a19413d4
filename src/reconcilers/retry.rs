// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Exponential backoff for failed reconciles.
//!
//! [`ErrorBackoff`] tracks consecutive reconcile failures per object and hands the
//! controller's `error_policy` a growing requeue delay (5s doubling up to 5 minutes).
//! A successful reconcile resets the object's counter, including the one that releases
//! a deleted object's finalizer. An object deleted while failing is never reconciled
//! again, so counters idle for longer than twice the maximum delay are dropped.
//!
//! Remote calls made inside a reconcile are never retried in place. A transient
//! failure ([`is_retryable_http_status`]) fails the reconcile and the requeue delay
//! above spaces out the next attempt.

use crate::constants::{ERROR_BACKOFF_INITIAL_SECS, ERROR_BACKOFF_MAX_SECS};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Backoff multiplier (exponential growth factor)
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor to prevent thundering herd (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// Failure counters idle for longer than this belong to objects that are gone.
const IDLE_FAILURE_TTL: Duration = Duration::from_secs(2 * ERROR_BACKOFF_MAX_SECS);

/// Simple exponential backoff implementation.
///
/// Provides exponential backoff with randomization (jitter) to prevent thundering herd.
pub struct ExponentialBackoff {
    /// Initial interval duration
    pub initial_interval: Duration,
    /// Maximum interval duration
    pub max_interval: Duration,
    /// Backoff multiplier (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    pub randomization_factor: f64,
}

impl ExponentialBackoff {
    fn new(
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            initial_interval,
            max_interval,
            multiplier,
            randomization_factor,
        }
    }

    /// Interval for the `attempt`-th consecutive failure (0-based), without jitter.
    #[must_use]
    pub fn interval_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        if secs.is_finite() {
            Duration::from_secs_f64(secs).min(self.max_interval)
        } else {
            self.max_interval
        }
    }

    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        // random::<f64>() is uniform in [0, 1)
        let jittered = secs - delta + rand::random::<f64>() * 2.0 * delta;

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Backoff schedule for failed reconciles.
///
/// - **Initial interval**: 5 seconds
/// - **Max interval**: 5 minutes
/// - **Multiplier**: 2.0
/// - **Randomization**: ±10%
#[must_use]
pub fn reconcile_error_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_secs(ERROR_BACKOFF_INITIAL_SECS),
        Duration::from_secs(ERROR_BACKOFF_MAX_SECS),
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// Per-object consecutive failure counter feeding the controller's error policy.
#[derive(Default)]
pub struct ErrorBackoff {
    failures: Mutex<HashMap<String, (u32, Instant)>>,
}

impl ErrorBackoff {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for `key` and return the requeue delay to use.
    pub fn next_delay(&self, key: &str) -> Duration {
        self.next_delay_at(key, Instant::now())
    }

    fn next_delay_at(&self, key: &str, now: Instant) -> Duration {
        let attempt = {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            failures.retain(|k, (_, last)| {
                k == key || now.saturating_duration_since(*last) < IDLE_FAILURE_TTL
            });
            let entry = failures.entry(key.to_string()).or_insert((0, now));
            let attempt = entry.0;
            *entry = (attempt.saturating_add(1), now);
            attempt
        };
        let backoff = reconcile_error_backoff();
        let delay = backoff.apply_jitter(backoff.interval_for(attempt));
        debug!(key = key, attempt = attempt, delay = ?delay, "Reconcile error backoff");
        delay
    }

    /// Forget the failures of `key` after a successful reconcile.
    pub fn reset(&self, key: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Consecutive failures currently recorded for `key`.
    #[must_use]
    pub fn failures(&self, key: &str) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, |(count, _)| *count)
    }

    /// Number of objects with recorded failures.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Determine if an HTTP status code is retryable.
///
/// - **429** (Too Many Requests)
/// - **500**, **502**, **503**, **504**
#[must_use]
pub fn is_retryable_http_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
