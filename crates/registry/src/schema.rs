use std::time::Duration;

use chrono::{DateTime, Utc};
use parsing::ParsingReport;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{RegistryError, Result};

pub type ModelId = Uuid;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ModelStatus {
    New,
    InProgress,
    Completed,
    Failed,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::New => "new",
            ModelStatus::InProgress => "in_progress",
            ModelStatus::Completed => "completed",
            ModelStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ModelStatus::Completed | ModelStatus::Failed)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelEntry {
    pub model_id: ModelId,
    pub status: ModelStatus,
    pub created_time: DateTime<Utc>,
    pub completed_time: Option<DateTime<Utc>>,
    pub parsing_report: Option<ParsingReport>,
    pub error_message: Option<String>,

    // Claim held while InProgress
    pub owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Bumped on every accepted write; transports compare-and-swap on it.
    pub version: u64,
}

/// A requested status change. `owner` is the worker making the request.
#[derive(Clone, Debug)]
pub enum StatusUpdate {
    InProgress { owner: String, lease: Duration },
    Completed { owner: String, report: Option<ParsingReport> },
    Failed { owner: String, error_message: String },
    /// Hand a claimed entry back so another attempt can pick it up.
    Reset { owner: String },
}

impl ModelEntry {
    pub fn new(model_id: ModelId, now: DateTime<Utc>) -> Self {
        Self {
            model_id,
            status: ModelStatus::New,
            created_time: now,
            completed_time: None,
            parsing_report: None,
            error_message: None,
            owner: None,
            lease_expires_at: None,
            version: 0,
        }
    }

    fn held_by(&self, owner: &str) -> bool {
        self.status == ModelStatus::InProgress && self.owner.as_deref() == Some(owner)
    }

    fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ModelStatus::InProgress && self.lease_expires_at.map_or(true, |t| t <= now)
    }

    fn claimable_by(&self, owner: &str, now: DateTime<Utc>) -> bool {
        self.status == ModelStatus::New || self.held_by(owner) || self.lease_expired(now)
    }

    /// Apply `update` if the current state allows it, otherwise `Conflict`
    /// and the entry is left untouched.
    pub fn apply(&mut self, update: &StatusUpdate, now: DateTime<Utc>) -> Result<()> {
        let allowed = match update {
            StatusUpdate::InProgress { owner, .. } | StatusUpdate::Failed { owner, .. } => {
                self.claimable_by(owner, now)
            }
            StatusUpdate::Completed { owner, .. } | StatusUpdate::Reset { owner } => self.held_by(owner),
        };
        if !allowed {
            return Err(RegistryError::Conflict { model_id: self.model_id, status: self.status });
        }

        match update {
            StatusUpdate::InProgress { owner, lease } => {
                let lease = chrono::Duration::from_std(*lease).unwrap_or_else(|_| chrono::Duration::days(365));
                self.status = ModelStatus::InProgress;
                self.owner = Some(owner.clone());
                self.lease_expires_at = Some(now + lease);
                self.error_message = None;
            }
            StatusUpdate::Completed { report, .. } => {
                self.status = ModelStatus::Completed;
                self.completed_time = Some(now);
                self.parsing_report = report.clone();
                self.error_message = None;
                self.release_claim();
            }
            StatusUpdate::Failed { error_message, .. } => {
                self.status = ModelStatus::Failed;
                self.completed_time = Some(now);
                self.error_message = Some(error_message.clone());
                self.release_claim();
            }
            StatusUpdate::Reset { .. } => {
                self.status = ModelStatus::New;
                self.release_claim();
            }
        }

        self.version += 1;
        Ok(())
    }

    fn release_claim(&mut self) {
        self.owner = None;
        self.lease_expires_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn claim(owner: &str) -> StatusUpdate {
        StatusUpdate::InProgress { owner: owner.into(), lease: Duration::from_secs(60) }
    }

    fn in_progress(owner: &str, now: DateTime<Utc>) -> ModelEntry {
        let mut e = ModelEntry::new(Uuid::new_v4(), now);
        e.apply(&claim(owner), now).unwrap();
        e
    }

    #[test]
    fn test_new_entry_can_be_claimed() {
        let now = Utc::now();
        let e = in_progress("w1", now);
        assert_eq!(e.status, ModelStatus::InProgress);
        assert_eq!(e.owner.as_deref(), Some("w1"));
        assert_eq!(e.lease_expires_at, Some(now + chrono::Duration::seconds(60)));
        assert_eq!(e.version, 1);
    }

    #[test]
    fn test_claim_by_other_owner_conflicts() {
        let now = Utc::now();
        let mut e = in_progress("w1", now);
        let err = e.apply(&claim("w2"), now).unwrap_err();
        assert!(matches!(err, RegistryError::Conflict { status: ModelStatus::InProgress, .. }));
        assert_eq!(e.owner.as_deref(), Some("w1"));
        assert_eq!(e.version, 1);
    }

    #[test]
    fn test_expired_lease_can_be_taken_over() {
        let now = Utc::now();
        let mut e = in_progress("w1", now);
        let later = now + chrono::Duration::seconds(61);
        e.apply(&claim("w2"), later).unwrap();
        assert_eq!(e.owner.as_deref(), Some("w2"));
    }

    #[test]
    fn test_completed_is_never_reclaimed() {
        let now = Utc::now();
        let mut e = in_progress("w1", now);
        e.apply(&StatusUpdate::Completed { owner: "w1".into(), report: None }, now).unwrap();

        assert!(e.apply(&claim("w1"), now).is_err());
        assert!(e
            .apply(&StatusUpdate::Failed { owner: "w1".into(), error_message: "boom".into() }, now)
            .is_err());
        assert_eq!(e.status, ModelStatus::Completed);
        assert!(e.completed_time.is_some());
        assert!(e.owner.is_none());
    }

    #[test]
    fn test_stale_worker_cannot_complete() {
        let now = Utc::now();
        let mut e = in_progress("w1", now);
        let later = now + chrono::Duration::seconds(120);
        e.apply(&claim("w2"), later).unwrap();

        let err = e.apply(&StatusUpdate::Completed { owner: "w1".into(), report: None }, later);
        assert!(err.is_err());
        assert_eq!(e.status, ModelStatus::InProgress);
    }

    #[test]
    fn test_new_entry_can_be_failed() {
        let now = Utc::now();
        let mut e = ModelEntry::new(Uuid::new_v4(), now);
        e.apply(&StatusUpdate::Failed { owner: "w1".into(), error_message: "poison".into() }, now)
            .unwrap();
        assert_eq!(e.status, ModelStatus::Failed);
        assert_eq!(e.error_message.as_deref(), Some("poison"));
    }

    #[test]
    fn test_reset_returns_to_new() {
        let now = Utc::now();
        let mut e = in_progress("w1", now);
        assert!(e.apply(&StatusUpdate::Reset { owner: "w2".into() }, now).is_err());
        e.apply(&StatusUpdate::Reset { owner: "w1".into() }, now).unwrap();
        assert_eq!(e.status, ModelStatus::New);
        assert!(e.owner.is_none());
        assert!(e.lease_expires_at.is_none());
    }
}
