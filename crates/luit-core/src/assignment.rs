//! Assignment: a locality-level group of reports escalated to lab workflow.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  geo::Coordinates,
  locality::LocalityKey,
  report::Severity,
};

/// Assignment lifecycle:
/// `pending_lab_visit → test_result_uploaded → solution_provided →
/// confirmed_clean → resolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
  PendingLabVisit,
  TestResultUploaded,
  SolutionProvided,
  ConfirmedClean,
  Resolved,
}

impl AssignmentStatus {
  pub const ALL: [Self; 5] = [
    Self::PendingLabVisit,
    Self::TestResultUploaded,
    Self::SolutionProvided,
    Self::ConfirmedClean,
    Self::Resolved,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::PendingLabVisit => "pending_lab_visit",
      Self::TestResultUploaded => "test_result_uploaded",
      Self::SolutionProvided => "solution_provided",
      Self::ConfirmedClean => "confirmed_clean",
      Self::Resolved => "resolved",
    }
  }

  /// Open assignments accept new members; at most one exists per locality.
  pub fn is_open(self) -> bool { self != Self::Resolved }
}

impl FromStr for AssignmentStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|status| status.as_str() == s)
      .ok_or_else(|| Error::Validation(format!("unknown assignment status: {s:?}")))
  }
}

impl fmt::Display for AssignmentStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A lab document (test result or solution) held in external storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabDocument {
  pub reference:   String,
  pub notes:       Option<String>,
  pub recorded_at: DateTime<Utc>,
}

/// Input for the lab upload transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLabDocument {
  pub reference: String,
  pub notes:     Option<String>,
}

impl NewLabDocument {
  pub(crate) fn validate(&self) -> Result<()> {
    if self.reference.trim().is_empty() {
      return Err(Error::Validation("document reference must not be empty".into()));
    }
    Ok(())
  }

  pub(crate) fn recorded(self, at: DateTime<Utc>) -> LabDocument {
    LabDocument { reference: self.reference, notes: self.notes, recorded_at: at }
  }
}

/// A cluster of reports sharing a locality, escalated as one unit of lab work.
///
/// Owns the membership relation only; member reports live in the report store
/// and point back through `Report::assignment_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
  pub assignment_id:           Uuid,
  pub locality_key:            LocalityKey,
  /// Append-only while open; at least the quorum at creation.
  pub member_report_ids:       Vec<Uuid>,
  pub status:                  AssignmentStatus,
  /// Computed once at creation and not recentred as members join.
  pub representative_location: Coordinates,
  /// Highest member severity at creation.
  pub severity:                Severity,
  pub district:                Option<String>,
  pub district_id:             Option<String>,
  pub area_name:               Option<String>,
  pub test_result:             Option<LabDocument>,
  pub solution:                Option<LabDocument>,
  pub final_notes:             Option<String>,
  pub created_at:              DateTime<Utc>,
  pub updated_at:              DateTime<Utc>,
}
