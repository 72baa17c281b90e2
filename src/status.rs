//! Status conditions of an owning object.
//!
//! An owner carries at most one condition per [`ConditionType`]. The
//! [`StatusTracker`] is the only thing that writes them: it keeps the
//! `lastTransitionTime` stable while the status does not change and bumps
//! `lastUpdateTime` on every write.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ArgumentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// The desired children have been written to the store.
    Applied,
    /// The children report healthy.
    Ready,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionType::Applied => f.write_str("Applied"),
            ConditionType::Ready => f.write_str("Ready"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => f.write_str("True"),
            ConditionStatus::False => f.write_str("False"),
            ConditionStatus::Unknown => f.write_str("Unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    fn unknown(kind: ConditionType) -> Self {
        Self {
            kind,
            status: ConditionStatus::Unknown,
            reason: String::new(),
            message: String::new(),
            last_update_time: None,
            last_transition_time: None,
        }
    }
}

/// Ordered condition list, unique per type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: ConditionType) -> Option<&Condition> {
        self.0.iter().find(|condition| condition.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copies the condition of one type into its own list, so that it can be
    /// worked on independently of the other types.
    pub fn slot(&self, kind: ConditionType) -> Conditions {
        Conditions(self.get(kind).cloned().into_iter().collect())
    }

    /// Writes back every condition of `other`, in place when a condition of
    /// that type already exists, appended otherwise.
    pub fn merge(&mut self, other: Conditions) {
        for condition in other.0 {
            match self.0.iter_mut().find(|c| c.kind == condition.kind) {
                Some(existing) => *existing = condition,
                None => self.0.push(condition),
            }
        }
    }
}

/// Status sub-resource shared by every component kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub conditions: Conditions,
}

/// Source of "now" for condition timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Mutex::new(start))
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct StatusTracker {
    clock: Arc<dyn Clock>,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl StatusTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Returns the condition of `kind`, or a synthetic `Unknown` one.
    pub fn get_condition(&self, conditions: &Conditions, kind: ConditionType) -> Condition {
        conditions
            .get(kind)
            .cloned()
            .unwrap_or_else(|| Condition::unknown(kind))
    }

    pub fn get_condition_status(
        &self,
        conditions: &Conditions,
        kind: ConditionType,
    ) -> ConditionStatus {
        self.get_condition(conditions, kind).status
    }

    /// Upserts a condition. `reasons` holds at most a reason and a message.
    pub fn update_condition(
        &self,
        conditions: &mut Conditions,
        kind: ConditionType,
        status: ConditionStatus,
        reasons: &[&str],
    ) -> Result<(), ArgumentError> {
        let (reason, message) = match reasons {
            [] => ("", ""),
            [reason] => (*reason, ""),
            [reason, message] => (*reason, *message),
            _ => return Err(ArgumentError(reasons.len())),
        };

        let now = self.clock.now();

        if let Some(condition) = conditions.0.iter_mut().find(|c| c.kind == kind) {
            condition.last_update_time = Some(now);

            if condition.last_transition_time.is_none() || condition.status != status {
                condition.last_transition_time = Some(now);
            }

            condition.status = status;
            condition.reason = reason.to_string();
            condition.message = message.to_string();

            return Ok(());
        }

        conditions.0.push(Condition {
            kind,
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_update_time: Some(now),
            last_transition_time: Some(now),
        });

        Ok(())
    }
}
