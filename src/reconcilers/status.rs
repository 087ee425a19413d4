// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers and the `Ready` summary reduction.
//!
//! Every managed resource carries an ordered list of named conditions. Reconcilers
//! mark individual conditions with [`mark_true`] / [`mark_false`], and the patcher
//! rolls them up into the `Ready` summary with [`summarize`] right before persisting.
//!
//! # Condition Format
//!
//! - `type`: The aspect of the resource being reported (e.g. `VCenterAvailable`)
//! - `status`: `True`, `False`, or `Unknown`
//! - `severity`: `Error`, `Warning` or `Info` for `False` conditions
//! - `reason`: A programmatic identifier (CamelCase)
//! - `message`: A human-readable explanation
//! - `lastTransitionTime`: RFC3339 timestamp of the last status change
//!
//! # Summary Rule
//!
//! - any `False` condition makes `Ready` `False`; the worst severity wins and, among
//!   equally severe conditions, the most recent transition wins
//! - otherwise any `Unknown` condition makes `Ready` `Unknown`
//! - otherwise `Ready` is `True`
//!
//! # Example
//!
//! ```rust,no_run
//! use capv_engine::crd::{Condition, ConditionSeverity};
//! use capv_engine::reconcilers::status::{create_condition, summarize};
//!
//! let conditions = vec![
//!     create_condition("VCenterAvailable", "True", None, "", ""),
//!     create_condition(
//!         "LoadBalancerAvailable",
//!         "False",
//!         Some(ConditionSeverity::Warning),
//!         "LoadBalancerProvisioning",
//!         "waiting for address",
//!     ),
//! ];
//! let ready = summarize(&conditions);
//! assert_eq!(ready.status, "False");
//! ```

use crate::crd::{Condition, ConditionSeverity};
use crate::status_reasons::{CONDITION_TYPE_READY, STATUS_FALSE, STATUS_TRUE, STATUS_UNKNOWN};
use chrono::{DateTime, Utc};

/// Resources that expose a mutable list of status conditions.
pub trait Conditioned {
    /// Current conditions, empty when the resource has no status yet.
    fn conditions(&self) -> &[Condition];

    /// Mutable conditions, creating the status block if necessary.
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
}

/// Create a new condition with the current timestamp.
///
/// Empty `reason` or `message` strings are stored as absent.
///
/// # Arguments
///
/// * `condition_type` - The type of condition (e.g. `Ready`, `VMProvisioned`)
/// * `status` - `True`, `False` or `Unknown`
/// * `severity` - Severity, only meaningful for `False`
/// * `reason` - A programmatic identifier in `CamelCase`
/// * `message` - A human-readable explanation
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    severity: Option<ConditionSeverity>,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        severity,
        reason: (!reason.is_empty()).then(|| reason.to_string()),
        message: (!message.is_empty()).then(|| message.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Find a condition by type.
#[must_use]
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Insert or replace a condition, keeping list order stable.
///
/// The existing `lastTransitionTime` is preserved when the status does not change,
/// so re-marking a condition with the same status never produces a write.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.r#type == condition.r#type)
    {
        Some(existing) => {
            if existing.status == condition.status {
                condition
                    .last_transition_time
                    .clone_from(&existing.last_transition_time);
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// Returns `true` when two conditions are equal ignoring `lastTransitionTime`.
#[must_use]
pub fn conditions_equal(a: &Condition, b: &Condition) -> bool {
    a.r#type == b.r#type
        && a.status == b.status
        && a.severity == b.severity
        && a.reason == b.reason
        && a.message == b.message
}

/// Mark a condition `True`.
pub fn mark_true<K: Conditioned>(obj: &mut K, condition_type: &str) {
    set_condition(
        obj.conditions_mut(),
        create_condition(condition_type, STATUS_TRUE, None, "", ""),
    );
}

/// Mark a condition `False` with a reason, severity and message.
pub fn mark_false<K: Conditioned>(
    obj: &mut K,
    condition_type: &str,
    reason: &str,
    severity: ConditionSeverity,
    message: &str,
) {
    set_condition(
        obj.conditions_mut(),
        create_condition(condition_type, STATUS_FALSE, Some(severity), reason, message),
    );
}

/// Mark a condition `Unknown`.
pub fn mark_unknown<K: Conditioned>(obj: &mut K, condition_type: &str, reason: &str, message: &str) {
    set_condition(
        obj.conditions_mut(),
        create_condition(condition_type, STATUS_UNKNOWN, None, reason, message),
    );
}

/// Returns `true` when the condition exists with status `True`.
#[must_use]
pub fn is_true<K: Conditioned>(obj: &K, condition_type: &str) -> bool {
    find_condition(obj.conditions(), condition_type).is_some_and(|c| c.status == STATUS_TRUE)
}

/// Returns `true` when the condition exists with status `False`.
#[must_use]
pub fn is_false<K: Conditioned>(obj: &K, condition_type: &str) -> bool {
    find_condition(obj.conditions(), condition_type).is_some_and(|c| c.status == STATUS_FALSE)
}

fn transition_time(condition: &Condition) -> Option<DateTime<Utc>> {
    condition
        .last_transition_time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Reduce named conditions to the `Ready` summary condition.
///
/// Any existing `Ready` entry is ignored. The returned condition carries the current
/// time; [`set_condition`] keeps the previous time when the status is unchanged.
#[must_use]
pub fn summarize(conditions: &[Condition]) -> Condition {
    let relevant = || conditions.iter().filter(|c| c.r#type != CONDITION_TYPE_READY);

    let worst_false = relevant()
        .filter(|c| c.status == STATUS_FALSE)
        .fold(None::<&Condition>, |best, c| match best {
            Some(b) if (c.severity, transition_time(c)) <= (b.severity, transition_time(b)) => {
                Some(b)
            }
            _ => Some(c),
        });

    if let Some(worst) = worst_false {
        return Condition {
            r#type: CONDITION_TYPE_READY.to_string(),
            status: STATUS_FALSE.to_string(),
            severity: worst.severity,
            reason: worst.reason.clone(),
            message: worst.message.clone(),
            last_transition_time: Some(Utc::now().to_rfc3339()),
        };
    }

    if let Some(unknown) = relevant().find(|c| c.status == STATUS_UNKNOWN) {
        return Condition {
            r#type: CONDITION_TYPE_READY.to_string(),
            status: STATUS_UNKNOWN.to_string(),
            severity: None,
            reason: unknown.reason.clone(),
            message: unknown.message.clone(),
            last_transition_time: Some(Utc::now().to_rfc3339()),
        };
    }

    create_condition(CONDITION_TYPE_READY, STATUS_TRUE, None, "", "")
}

/// Recompute and store the `Ready` summary of a resource.
pub fn set_summary<K: Conditioned>(obj: &mut K) {
    let ready = summarize(obj.conditions());
    set_condition(obj.conditions_mut(), ready);
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
