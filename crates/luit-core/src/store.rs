//! The `ReportStore` and `AssignmentStore` traits and supporting types.
//!
//! Implemented by storage backends (`luit-store-sqlite`, and the in-process
//! [`MemoryStore`](crate::memory::MemoryStore)). The engines depend on these
//! traits only.
//!
//! Every mutating call is atomic per record. Updates carry the status the
//! caller read; the store rejects the write with [`StoreError::Conflict`] if
//! the record has moved on since.
//!
//! The engines bound each call with a timeout. An elapsed timeout surfaces as
//! [`StoreError::Unavailable`] but does not cancel a write the backend has
//! already handed to its connection, so the write may still commit. Callers
//! that retry after an `Unavailable` must re-read the record first; the
//! status preconditions above then turn a duplicate write into a conflict
//! instead of a second transition.

use std::future::Future;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::{
  assignment::{Assignment, AssignmentStatus, LabDocument},
  error::{BoxError, Entity, Error},
  locality::LocalityKey,
  report::{LabFindings, Report, ReportStatus},
};

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("record not found")]
  NotFound,

  /// A compare-and-set precondition failed, or a uniqueness rule was hit.
  #[error("write conflict")]
  Conflict,

  #[error("store unavailable: {0}")]
  Unavailable(#[source] BoxError),
}

impl StoreError {
  pub fn unavailable(source: impl Into<BoxError>) -> Self { Self::Unavailable(source.into()) }

  /// Lift into the engine error, naming the operation and record involved.
  pub fn into_error(self, op: &'static str, entity: Entity, key: impl ToString) -> Error {
    match self {
      Self::NotFound => Error::NotFound { entity, key: key.to_string() },
      Self::Conflict => Error::conflict(entity, key),
      Self::Unavailable(source) => {
        let key = key.to_string();
        warn!(op, %entity, %key, error = %source, "dependency unavailable");
        Error::DependencyUnavailable { op, key, source }
      }
    }
  }
}

// ─── Queries and patches ─────────────────────────────────────────────────────

/// An indexed report field for [`ReportStore::query_reports`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportField {
  Locality(LocalityKey),
  /// Matches the normalized `district_id`.
  District(String),
  Status(ReportStatus),
  Assignment(Uuid),
}

/// A partial update to a report. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportPatch {
  pub status:               Option<ReportStatus>,
  pub active:               Option<bool>,
  pub pending_lab_approval: Option<bool>,
  pub phc_marked_clean_at:  Option<DateTime<Utc>>,
  pub lab_findings:         Option<LabFindings>,
  pub assignment_id:        Option<Uuid>,
  pub last_transition_at:   Option<DateTime<Utc>>,
  /// Added to `upvote_count` by the store, never read-modify-written.
  pub upvotes:              u64,
}

impl ReportPatch {
  pub fn apply(&self, report: &mut Report) {
    if let Some(status) = self.status {
      report.status = status;
    }
    if let Some(active) = self.active {
      report.active = active;
    }
    if let Some(pending) = self.pending_lab_approval {
      report.pending_lab_approval = pending;
    }
    if let Some(at) = self.phc_marked_clean_at {
      report.phc_marked_clean_at = Some(at);
    }
    if let Some(findings) = &self.lab_findings {
      report.lab_findings = Some(findings.clone());
    }
    if let Some(id) = self.assignment_id {
      report.assignment_id = Some(id);
    }
    if let Some(at) = self.last_transition_at {
      report.last_transition_at = at;
    }
    report.upvote_count = report.upvote_count.saturating_add(self.upvotes);
  }
}

/// A partial update to an assignment. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentPatch {
  pub status:      Option<AssignmentStatus>,
  pub test_result: Option<LabDocument>,
  pub solution:    Option<LabDocument>,
  pub final_notes: Option<String>,
  pub updated_at:  Option<DateTime<Utc>>,
}

impl AssignmentPatch {
  pub fn apply(&self, assignment: &mut Assignment) {
    if let Some(status) = self.status {
      assignment.status = status;
    }
    if let Some(doc) = &self.test_result {
      assignment.test_result = Some(doc.clone());
    }
    if let Some(doc) = &self.solution {
      assignment.solution = Some(doc.clone());
    }
    if let Some(notes) = &self.final_notes {
      assignment.final_notes = Some(notes.clone());
    }
    if let Some(at) = self.updated_at {
      assignment.updated_at = at;
    }
  }
}

// ─── Traits ──────────────────────────────────────────────────────────────────

/// Durable storage for reports.
///
/// An `Unavailable` result does not prove nothing was written; see the
/// module docs before retrying.
pub trait ReportStore: Send + Sync {
  /// Persist a new report. [`StoreError::Conflict`] if the id is taken.
  fn create_report(
    &self,
    report: Report,
  ) -> impl Future<Output = Result<Uuid, StoreError>> + Send + '_;

  fn get_report(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Report, StoreError>> + Send + '_;

  /// Apply `patch` atomically. When `expected` is given the write only
  /// happens if the stored status still equals it.
  fn update_report(
    &self,
    id: Uuid,
    expected: Option<ReportStatus>,
    patch: ReportPatch,
  ) -> impl Future<Output = Result<Report, StoreError>> + Send + '_;

  fn query_reports(
    &self,
    field: ReportField,
  ) -> impl Future<Output = Result<Vec<Report>, StoreError>> + Send + '_;

  /// Reports with `active = true`.
  fn active_reports(&self) -> impl Future<Output = Result<Vec<Report>, StoreError>> + Send + '_;

  fn all_reports(&self) -> impl Future<Output = Result<Vec<Report>, StoreError>> + Send + '_;
}

/// Durable storage for assignments.
///
/// Like [`ReportStore`], an `Unavailable` result may hide a committed write;
/// re-read with [`open_assignment_for`](Self::open_assignment_for) or
/// [`get_assignment`](Self::get_assignment) before retrying.
pub trait AssignmentStore: Send + Sync {
  /// Persist a new assignment and bind its members in one commit.
  ///
  /// Every id in `member_report_ids` must name a report that is still
  /// `reported` and not bound to any assignment. Each one gets `bind`
  /// applied with `assignment_id` set to the new assignment.
  /// [`StoreError::Conflict`] if an open assignment already exists for the
  /// locality or any member fails the check; nothing is written then.
  fn form_assignment(
    &self,
    assignment: Assignment,
    bind: ReportPatch,
  ) -> impl Future<Output = Result<Assignment, StoreError>> + Send + '_;

  fn get_assignment(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Assignment, StoreError>> + Send + '_;

  /// Compare-and-set on status, as [`ReportStore::update_report`].
  fn update_assignment(
    &self,
    id: Uuid,
    expected: Option<AssignmentStatus>,
    patch: AssignmentPatch,
  ) -> impl Future<Output = Result<Assignment, StoreError>> + Send + '_;

  /// Add a member to an open assignment. Appending an existing member is a
  /// no-op; appending to a resolved assignment is a conflict.
  fn append_member(
    &self,
    id: Uuid,
    report_id: Uuid,
  ) -> impl Future<Output = Result<Assignment, StoreError>> + Send + '_;

  fn assignments_by_status(
    &self,
    status: AssignmentStatus,
  ) -> impl Future<Output = Result<Vec<Assignment>, StoreError>> + Send + '_;

  /// The non-resolved assignment for a locality, if any.
  fn open_assignment_for(
    &self,
    key: LocalityKey,
  ) -> impl Future<Output = Result<Option<Assignment>, StoreError>> + Send + '_;
}
