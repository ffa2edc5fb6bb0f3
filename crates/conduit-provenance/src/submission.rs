//! Asynchronous submission handles and their registry.
//!
//! A submission is created `Pending`, moved to `Running` by the worker that
//! picks it up, and ends `Complete`, `Failed` or `Canceled`. The status lives
//! in an atomic; the outcome is a write-once slot set before the terminal
//! transition, so a reader that observes `Complete` always sees the result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::authorization::Identity;
use crate::error::{ProvenanceError, Result};

// MARK: - Status

/// Lifecycle state of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum SubmissionStatus {
    Pending = 0,
    Running = 1,
    Complete = 2,
    Failed = 3,
    Canceled = 4,
}

impl SubmissionStatus {
    /// Whether the submission has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionStatus::Complete | SubmissionStatus::Failed | SubmissionStatus::Canceled
        )
    }

    /// Check if transition to target is valid.
    pub fn can_transition_to(&self, target: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        matches!(
            (self, target),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Canceled)
                | (Running, Complete)
                | (Running, Failed)
                | (Running, Canceled)
        )
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => SubmissionStatus::Pending,
            1 => SubmissionStatus::Running,
            2 => SubmissionStatus::Complete,
            3 => SubmissionStatus::Failed,
            _ => SubmissionStatus::Canceled,
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionStatus::Pending => write!(f, "PENDING"),
            SubmissionStatus::Running => write!(f, "RUNNING"),
            SubmissionStatus::Complete => write!(f, "COMPLETE"),
            SubmissionStatus::Failed => write!(f, "FAILED"),
            SubmissionStatus::Canceled => write!(f, "CANCELED"),
        }
    }
}

// MARK: - Submission Id

/// Caller-opaque submission identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionId(Uuid);

impl SubmissionId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// MARK: - Submission

/// Handle for one piece of asynchronous work producing an `R`.
#[derive(Debug)]
pub struct Submission<R> {
    id: SubmissionId,
    submitter: Identity,
    submitted_at: DateTime<Utc>,
    status: AtomicU8,
    percent_complete: AtomicU8,
    outcome: OnceLock<std::result::Result<R, String>>,
    finished_at: OnceLock<DateTime<Utc>>,
}

impl<R> Submission<R> {
    /// Create a pending submission owned by `submitter`.
    pub fn new(submitter: Identity) -> Self {
        Self {
            id: SubmissionId::new(),
            submitter,
            submitted_at: Utc::now(),
            status: AtomicU8::new(SubmissionStatus::Pending as u8),
            percent_complete: AtomicU8::new(0),
            outcome: OnceLock::new(),
            finished_at: OnceLock::new(),
        }
    }

    pub fn id(&self) -> SubmissionId {
        self.id
    }

    pub fn submitter(&self) -> &Identity {
        &self.submitter
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// Current status.
    pub fn status(&self) -> SubmissionStatus {
        SubmissionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Progress in percent, `100` once complete.
    pub fn percent_complete(&self) -> u8 {
        self.percent_complete.load(Ordering::Relaxed)
    }

    /// When the submission reached a terminal state.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at.get().copied()
    }

    /// The result, exposed only once `Complete`.
    pub fn result(&self) -> Option<&R> {
        if self.status() != SubmissionStatus::Complete {
            return None;
        }
        self.outcome.get().and_then(|outcome| outcome.as_ref().ok())
    }

    /// The failure message, exposed only once `Failed`.
    pub fn error(&self) -> Option<&str> {
        if self.status() != SubmissionStatus::Failed {
            return None;
        }
        self.outcome
            .get()
            .and_then(|outcome| outcome.as_ref().err())
            .map(String::as_str)
    }

    /// Whether the submission was canceled.
    pub fn is_canceled(&self) -> bool {
        self.status() == SubmissionStatus::Canceled
    }

    fn transition(&self, from: SubmissionStatus, to: SubmissionStatus) -> bool {
        if !from.can_transition_to(to) {
            return false;
        }
        let swapped = self
            .status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped && to.is_terminal() {
            let _ = self.finished_at.set(Utc::now());
        }
        swapped
    }

    /// Claim the submission for execution. Fails if it was canceled first.
    pub fn start(&self) -> bool {
        self.transition(SubmissionStatus::Pending, SubmissionStatus::Running)
    }

    /// Record progress.
    pub fn set_progress(&self, percent: u8) {
        self.percent_complete.store(percent.min(100), Ordering::Relaxed);
    }

    /// Store the result and mark the submission complete.
    ///
    /// Returns `false` (discarding the result) if it was canceled meanwhile.
    pub fn complete(&self, result: R) -> bool {
        if self.status() != SubmissionStatus::Running {
            return false;
        }
        if self.outcome.set(Ok(result)).is_err() {
            return false;
        }
        let done = self.transition(SubmissionStatus::Running, SubmissionStatus::Complete);
        if done {
            self.set_progress(100);
        }
        done
    }

    /// Store an error message and mark the submission failed.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        let current = self.status();
        if current.is_terminal() {
            return false;
        }
        if self.outcome.set(Err(message.into())).is_err() {
            return false;
        }
        self.transition(current, SubmissionStatus::Failed)
    }

    /// Cancel unless already terminal. Returns whether this call canceled it.
    pub fn cancel(&self) -> bool {
        self.transition(SubmissionStatus::Pending, SubmissionStatus::Canceled)
            || self.transition(SubmissionStatus::Running, SubmissionStatus::Canceled)
    }
}

// MARK: - Registry

/// Concurrent map from submission id to handle.
#[derive(Debug)]
pub struct SubmissionRegistry<R> {
    kind: &'static str,
    submissions: Mutex<HashMap<SubmissionId, Arc<Submission<R>>>>,
}

impl<R> SubmissionRegistry<R> {
    /// Create an empty registry; `kind` names the submissions in errors.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            submissions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<SubmissionId, Arc<Submission<R>>>>> {
        self.submissions
            .lock()
            .map_err(|e| ProvenanceError::Storage(format!("submission registry poisoned: {}", e)))
    }

    /// Register a new pending submission for `submitter`.
    pub fn create(&self, submitter: Identity) -> Result<Arc<Submission<R>>> {
        let submission = Arc::new(Submission::new(submitter));
        self.lock()?.insert(submission.id(), Arc::clone(&submission));
        Ok(submission)
    }

    /// Look up a submission on behalf of `identity`.
    ///
    /// Unknown or purged ids are `NotFound`; another identity's submission is
    /// `Unauthorized`.
    pub fn retrieve(&self, id: SubmissionId, identity: &Identity) -> Result<Arc<Submission<R>>> {
        let submission = self
            .lock()?
            .get(&id)
            .cloned()
            .ok_or_else(|| ProvenanceError::NotFound(format!("{} submission {}", self.kind, id)))?;

        if submission.submitter() != identity {
            return Err(ProvenanceError::unauthorized(
                identity.name(),
                format!("{} submission {}", self.kind, id),
            ));
        }
        Ok(submission)
    }

    /// Cancel a submission on behalf of `identity`.
    pub fn cancel(&self, id: SubmissionId, identity: &Identity) -> Result<Arc<Submission<R>>> {
        let submission = self.retrieve(id, identity)?;
        if submission.cancel() {
            tracing::debug!("Canceled {} submission {}", self.kind, id);
        }
        Ok(submission)
    }

    /// Drop terminal submissions that finished more than `retention` ago.
    pub fn purge_expired(&self, retention: Duration) -> Result<usize> {
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return Ok(0);
        };
        let mut submissions = self.lock()?;
        let before = submissions.len();
        submissions.retain(|_, s| match s.finished_at() {
            Some(finished) => !s.status().is_terminal() || finished > cutoff,
            None => true,
        });
        Ok(before - submissions.len())
    }

    /// Number of tracked submissions.
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_complete() {
        let submission: Submission<u32> = Submission::new(Identity::new("alice"));
        assert_eq!(submission.status(), SubmissionStatus::Pending);
        assert!(submission.result().is_none());

        assert!(submission.start());
        assert!(submission.result().is_none());
        assert!(submission.complete(7));

        assert_eq!(submission.status(), SubmissionStatus::Complete);
        assert_eq!(submission.result(), Some(&7));
        assert_eq!(submission.percent_complete(), 100);
        assert!(submission.finished_at().is_some());
        assert!(!submission.cancel());
    }

    #[test]
    fn test_cancel_discards_late_result() {
        let submission: Submission<u32> = Submission::new(Identity::new("alice"));
        assert!(submission.start());
        assert!(submission.cancel());

        assert!(!submission.complete(7));
        assert_eq!(submission.status(), SubmissionStatus::Canceled);
        assert!(submission.result().is_none());
    }

    #[test]
    fn test_cancel_before_start_prevents_run() {
        let submission: Submission<u32> = Submission::new(Identity::new("alice"));
        assert!(submission.cancel());
        assert!(!submission.start());
    }

    #[test]
    fn test_fail_records_message() {
        let submission: Submission<u32> = Submission::new(Identity::new("alice"));
        submission.start();
        assert!(submission.fail("cycle detected"));
        assert_eq!(submission.status(), SubmissionStatus::Failed);
        assert_eq!(submission.error(), Some("cycle detected"));
        assert!(submission.result().is_none());
    }

    #[test]
    fn test_registry_isolation() {
        let registry: SubmissionRegistry<u32> = SubmissionRegistry::new("query");
        let submission = registry.create(Identity::new("alice")).unwrap();

        assert!(registry.retrieve(submission.id(), &Identity::new("alice")).is_ok());

        let err = registry
            .retrieve(submission.id(), &Identity::new("bob"))
            .unwrap_err();
        assert!(err.is_unauthorized());

        let err = registry
            .retrieve(SubmissionId::new(), &Identity::new("alice"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_purge_keeps_running_submissions() {
        let registry: SubmissionRegistry<u32> = SubmissionRegistry::new("query");
        let done = registry.create(Identity::new("alice")).unwrap();
        done.start();
        done.complete(1);
        let running = registry.create(Identity::new("alice")).unwrap();
        running.start();

        assert_eq!(registry.purge_expired(Duration::seconds(-1)).unwrap(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry
            .retrieve(running.id(), &Identity::new("alice"))
            .is_ok());
    }
}
