//! Encoding and decoding helpers between domain types and the plain
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, UUIDs hyphenated lowercase strings,
//! enumerations their `as_str` form, and lab documents compact JSON.

use chrono::{DateTime, Utc};
use luit_core::{
  assignment::{Assignment, AssignmentStatus, LabDocument},
  geo::Coordinates,
  locality::LocalityKey,
  report::{LabFindings, Report, ReportStatus, Severity, SourceType},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_coordinates(
  column: &'static str,
  latitude: Option<f64>,
  longitude: Option<f64>,
) -> Result<Option<Coordinates>> {
  match (latitude, longitude) {
    (Some(lat), Some(lon)) => {
      Coordinates::new(lat, lon).map(Some).map_err(|e| Error::decode(column, e))
    }
    (None, None) => Ok(None),
    _ => Err(Error::decode(column, "latitude and longitude must both be set")),
  }
}

fn decode_key(s: &str) -> Result<LocalityKey> {
  LocalityKey::parse(s).map_err(|e| Error::decode("locality_key", e))
}

// ─── Lab documents ───────────────────────────────────────────────────────────

pub fn encode_findings(findings: &LabFindings) -> Result<String> {
  Ok(serde_json::to_string(findings)?)
}

pub fn encode_document(doc: &LabDocument) -> Result<String> { Ok(serde_json::to_string(doc)?) }

fn decode_json<T: serde::de::DeserializeOwned>(s: Option<&str>) -> Result<Option<T>> {
  s.map(serde_json::from_str).transpose().map_err(Error::from)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `reports` row.
pub struct RawReport {
  pub report_id:            String,
  pub problem:              String,
  pub source_type:          String,
  pub severity:             String,
  pub latitude:             Option<f64>,
  pub longitude:            Option<f64>,
  pub area_name:            Option<String>,
  pub district:             Option<String>,
  pub district_id:          Option<String>,
  pub locality_key:         Option<String>,
  pub image_ref:            Option<String>,
  pub status:               String,
  pub active:               bool,
  pub pending_lab_approval: bool,
  pub phc_marked_clean_at:  Option<String>,
  pub lab_findings:         Option<String>,
  pub upvote_count:         i64,
  pub assignment_id:        Option<String>,
  pub created_at:           String,
  pub last_transition_at:   String,
}

impl RawReport {
  pub fn into_report(self) -> Result<Report> {
    Ok(Report {
      report_id:            decode_uuid(&self.report_id)?,
      problem:              self.problem,
      source_type:          self
        .source_type
        .parse::<SourceType>()
        .map_err(|e| Error::decode("source_type", e))?,
      severity:             self
        .severity
        .parse::<Severity>()
        .map_err(|e| Error::decode("severity", e))?,
      location:             decode_coordinates("latitude", self.latitude, self.longitude)?,
      area_name:            self.area_name,
      district:             self.district,
      district_id:          self.district_id,
      locality_key:         self.locality_key.as_deref().map(decode_key).transpose()?,
      image_ref:            self.image_ref,
      status:               self
        .status
        .parse::<ReportStatus>()
        .map_err(|e| Error::decode("status", e))?,
      active:               self.active,
      pending_lab_approval: self.pending_lab_approval,
      phc_marked_clean_at:  self.phc_marked_clean_at.as_deref().map(decode_dt).transpose()?,
      lab_findings:         decode_json(self.lab_findings.as_deref())?,
      upvote_count:         u64::try_from(self.upvote_count)
        .map_err(|e| Error::decode("upvote_count", e))?,
      assignment_id:        self.assignment_id.as_deref().map(decode_uuid).transpose()?,
      created_at:           decode_dt(&self.created_at)?,
      last_transition_at:   decode_dt(&self.last_transition_at)?,
    })
  }
}

/// Raw values read from an `assignments` row plus its members in order.
pub struct RawAssignment {
  pub assignment_id: String,
  pub locality_key:  String,
  pub status:        String,
  pub rep_latitude:  f64,
  pub rep_longitude: f64,
  pub severity:      String,
  pub district:      Option<String>,
  pub district_id:   Option<String>,
  pub area_name:     Option<String>,
  pub test_result:   Option<String>,
  pub solution:      Option<String>,
  pub final_notes:   Option<String>,
  pub created_at:    String,
  pub updated_at:    String,
  pub members:       Vec<String>,
}

impl RawAssignment {
  pub fn into_assignment(self) -> Result<Assignment> {
    let representative_location =
      decode_coordinates("rep_latitude", Some(self.rep_latitude), Some(self.rep_longitude))?
        .ok_or_else(|| Error::decode("rep_latitude", "missing"))?;
    Ok(Assignment {
      assignment_id: decode_uuid(&self.assignment_id)?,
      locality_key: decode_key(&self.locality_key)?,
      member_report_ids: self
        .members
        .iter()
        .map(|id| decode_uuid(id))
        .collect::<Result<_>>()?,
      status: self
        .status
        .parse::<AssignmentStatus>()
        .map_err(|e| Error::decode("status", e))?,
      representative_location,
      severity: self.severity.parse::<Severity>().map_err(|e| Error::decode("severity", e))?,
      district: self.district,
      district_id: self.district_id,
      area_name: self.area_name,
      test_result: decode_json(self.test_result.as_deref())?,
      solution: decode_json(self.solution.as_deref())?,
      final_notes: self.final_notes,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}
