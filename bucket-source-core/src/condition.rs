//! Status conditions.
//!
//! [`Conditions`] is an ordered list keyed by condition type. Setting a
//! condition replaces an existing one of the same type in place, so the
//! display order stays stable across reconciles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Remote fetch succeeded.
pub const SOURCE_AVAILABLE: &str = "SourceAvailable";
/// Local artifact is valid and mapped to storage.
pub const ARTIFACT_AVAILABLE: &str = "ArtifactAvailable";
/// Aggregate of the two above.
pub const READY: &str = "Ready";

pub const NO_ARTIFACT_FOUND_REASON: &str = "NoArtifactFound";
pub const AUTHENTICATION_FAILED_REASON: &str = "AuthenticationFailed";
pub const BUCKET_OPERATION_FAILED_REASON: &str = "BucketOperationFailed";
pub const BUCKET_OPERATION_SUCCEEDED_REASON: &str = "BucketOperationSucceeded";
pub const STORAGE_OPERATION_FAILED_REASON: &str = "StorageOperationFailed";
pub const SUCCEEDED_REASON: &str = "Succeeded";
pub const PROGRESSING_REASON: &str = "Progressing";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub observed_generation: i64,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
        observed_generation: i64,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            observed_generation,
            last_transition_time: Utc::now(),
        }
    }

    /// Compares everything but the transition timestamp.
    pub fn matches(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    /// Insert or replace by type. The transition time is carried over when the
    /// status did not change.
    pub fn set(&mut self, mut condition: Condition) {
        match self.0.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.0.push(condition),
        }
    }

    pub fn mark_true(&mut self, type_: &str, reason: &str, message: impl Into<String>, generation: i64) {
        self.set(Condition::new(type_, ConditionStatus::True, reason, message, generation));
    }

    pub fn mark_false(&mut self, type_: &str, reason: &str, message: impl Into<String>, generation: i64) {
        self.set(Condition::new(type_, ConditionStatus::False, reason, message, generation));
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    pub fn has(&self, type_: &str) -> bool {
        self.get(type_).is_some()
    }

    pub fn is_true(&self, type_: &str) -> bool {
        self.get(type_).is_some_and(|c| c.status == ConditionStatus::True)
    }

    pub fn is_false(&self, type_: &str) -> bool {
        self.get(type_).is_some_and(|c| c.status == ConditionStatus::False)
    }

    pub fn delete(&mut self, type_: &str) {
        self.0.retain(|c| c.type_ != type_);
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
}

/// Derive `Ready` from the source and artifact conditions.
///
/// The first `False` condition wins and its reason and message are copied.
/// When both are `True`, `Ready` mirrors the artifact condition. Anything
/// else means the resource is still being worked on.
pub fn summarize_ready(conditions: &mut Conditions, generation: i64) {
    let dependencies = [SOURCE_AVAILABLE, ARTIFACT_AVAILABLE];

    if let Some(failed) = dependencies
        .iter()
        .filter_map(|t| conditions.get(t))
        .find(|c| c.status == ConditionStatus::False)
        .cloned()
    {
        conditions.mark_false(READY, &failed.reason, failed.message, generation);
        return;
    }

    if dependencies.iter().all(|t| conditions.is_true(t)) {
        let message = conditions
            .get(ARTIFACT_AVAILABLE)
            .map(|c| c.message.clone())
            .unwrap_or_default();
        conditions.mark_true(READY, SUCCEEDED_REASON, message, generation);
        return;
    }

    conditions.set(Condition::new(
        READY,
        ConditionStatus::Unknown,
        PROGRESSING_REASON,
        "Reconciliation in progress",
        generation,
    ));
}
