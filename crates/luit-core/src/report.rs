//! Report: a single public contamination report and its lifecycle fields.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, geo::Coordinates, locality::LocalityKey};

// ─── Enumerations ────────────────────────────────────────────────────────────

/// How severe the reporter judges the contamination to be.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  #[serde(alias = "Low", alias = "LOW")]
  Low,
  #[serde(alias = "Medium", alias = "MEDIUM")]
  Medium,
  #[serde(alias = "High", alias = "HIGH")]
  High,
}

impl Severity {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Low => "low",
      Self::Medium => "medium",
      Self::High => "high",
    }
  }
}

impl FromStr for Severity {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "low" => Ok(Self::Low),
      "medium" => Ok(Self::Medium),
      "high" => Ok(Self::High),
      _ => Err(Error::Validation(format!("unknown severity: {s:?}"))),
    }
  }
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// The kind of water source the report concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
  River,
  Pond,
  Well,
  TubeWell,
  Lake,
  Canal,
  Other,
}

impl SourceType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::River => "river",
      Self::Pond => "pond",
      Self::Well => "well",
      Self::TubeWell => "tube_well",
      Self::Lake => "lake",
      Self::Canal => "canal",
      Self::Other => "other",
    }
  }
}

impl FromStr for SourceType {
  type Err = Error;

  /// Accepts both the stored form (`tube_well`) and display labels
  /// (`Tube Well`).
  fn from_str(s: &str) -> Result<Self> {
    let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
    match normalized.as_str() {
      "river" => Ok(Self::River),
      "pond" => Ok(Self::Pond),
      "well" => Ok(Self::Well),
      "tube_well" | "tubewell" => Ok(Self::TubeWell),
      "lake" => Ok(Self::Lake),
      "canal" => Ok(Self::Canal),
      "other" => Ok(Self::Other),
      _ => Err(Error::Validation(format!("unknown source type: {s:?}"))),
    }
  }
}

/// Lifecycle state of a report.
///
/// `reported → escalated → resolved`, with `clean` reachable from `escalated`
/// when the report's Assignment is certified clean by a lab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
  Reported,
  Escalated,
  Resolved,
  Clean,
}

impl ReportStatus {
  pub const ALL: [Self; 4] =
    [Self::Reported, Self::Escalated, Self::Resolved, Self::Clean];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Reported => "reported",
      Self::Escalated => "escalated",
      Self::Resolved => "resolved",
      Self::Clean => "clean",
    }
  }

  /// Terminal states are retained for history but never matched by
  /// proximity queries.
  pub fn is_terminal(self) -> bool { matches!(self, Self::Resolved | Self::Clean) }
}

impl FromStr for ReportStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|status| status.as_str() == s)
      .ok_or_else(|| Error::Validation(format!("unknown report status: {s:?}")))
  }
}

impl fmt::Display for ReportStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

// ─── Lab findings ────────────────────────────────────────────────────────────

/// Lab test-result and solution references attached to an escalated report.
/// References point into external document storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabFindings {
  pub test_result_ref: Option<String>,
  pub solution_ref:    Option<String>,
  pub notes:           Option<String>,
  pub lab_name:        Option<String>,
  pub recorded_at:     DateTime<Utc>,
}

/// Input for `lab_confirm_contaminated`; `recorded_at` is set by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewLabFindings {
  pub test_result_ref: Option<String>,
  pub solution_ref:    Option<String>,
  pub notes:           Option<String>,
  pub lab_name:        Option<String>,
}

impl NewLabFindings {
  pub(crate) fn validate(&self) -> Result<()> {
    let present = |r: &Option<String>| r.as_deref().is_some_and(|s| !s.trim().is_empty());
    if !present(&self.test_result_ref) && !present(&self.solution_ref) {
      return Err(Error::Validation(
        "lab findings need a test result or a solution reference".into(),
      ));
    }
    Ok(())
  }

  pub(crate) fn recorded(self, at: DateTime<Utc>) -> LabFindings {
    LabFindings {
      test_result_ref: self.test_result_ref,
      solution_ref:    self.solution_ref,
      notes:           self.notes,
      lab_name:        self.lab_name,
      recorded_at:     at,
    }
  }
}

// ─── Report ──────────────────────────────────────────────────────────────────

/// A contamination report. Never deleted; terminal states are kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
  pub report_id:            Uuid,
  pub problem:              String,
  pub source_type:          SourceType,
  pub severity:             Severity,
  pub location:             Option<Coordinates>,
  pub area_name:            Option<String>,
  pub district:             Option<String>,
  /// Normalized form of `district`, see
  /// [`normalize_district_id`](crate::locality::normalize_district_id).
  pub district_id:          Option<String>,
  /// Immutable once set.
  pub locality_key:         Option<LocalityKey>,
  /// Opaque reference to an externally stored photo.
  pub image_ref:            Option<String>,
  pub status:               ReportStatus,
  /// Eligible for proximity matching. False exactly when `status` is terminal.
  pub active:               bool,
  /// Set by a PHC clean marking; cleared when the lab approves.
  pub pending_lab_approval: bool,
  /// When a PHC last marked the report clean. Never cleared.
  pub phc_marked_clean_at:  Option<DateTime<Utc>>,
  pub lab_findings:         Option<LabFindings>,
  pub upvote_count:         u64,
  /// The Assignment this report was escalated into (lookup only).
  pub assignment_id:        Option<Uuid>,
  pub created_at:           DateTime<Utc>,
  pub last_transition_at:   DateTime<Utc>,
}

impl Report {
  pub fn is_located(&self) -> bool { self.location.is_some() }
}

// ─── NewReport ───────────────────────────────────────────────────────────────

/// Input to `submit`. Identity, status and timestamps are assigned by the
/// engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReport {
  pub problem:     String,
  pub source_type: SourceType,
  pub severity:    Severity,
  pub location:    Option<Coordinates>,
  pub area_name:   Option<String>,
  pub district:    Option<String>,
  pub pin_code:    Option<String>,
  pub image_ref:   Option<String>,
}

impl NewReport {
  /// Convenience constructor with all optional fields unset.
  pub fn new(problem: impl Into<String>, source_type: SourceType, severity: Severity) -> Self {
    Self {
      problem: problem.into(),
      source_type,
      severity,
      location: None,
      area_name: None,
      district: None,
      pin_code: None,
      image_ref: None,
    }
  }

  pub fn at(mut self, location: Coordinates) -> Self {
    self.location = Some(location);
    self
  }

  pub fn pin(mut self, pin_code: impl Into<String>) -> Self {
    self.pin_code = Some(pin_code.into());
    self
  }

  pub fn in_district(mut self, district: impl Into<String>) -> Self {
    self.district = Some(district.into());
    self
  }
}
