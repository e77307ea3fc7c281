//! The report state machine.
//!
//! [`transition`] is a pure function from `(report, event, role, now)` to the
//! conditional write that realises the event, or the [`Guard`] that rejects
//! it. [`LifecycleEngine`] resolves the caller, reads the record, runs the
//! pure step and commits the result with a compare-and-set on status, so a
//! rejected event never writes anything.
//!
//! ```text
//! (none) ── submit ──▶ reported ── escalate ──▶ escalated ── lab_approve_clean ──▶ resolved
//!                                                   │  ▲
//!                                    phc_mark_clean │  │ lab_confirm_contaminated
//!                                                   ▼  │
//!                                                escalated ── certify_clean ──▶ clean
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
  Error, Result,
  assignment::Assignment,
  config::EscalationPolicy,
  geo::Coordinates,
  error::{Entity, Guard},
  locality::{LocalityKey, normalize_district_id},
  report::{NewLabFindings, NewReport, Report, ReportStatus},
  role::{RoleResolver, Role},
  store::{AssignmentStore, ReportPatch, ReportStore, StoreError},
  tracker::Tracker,
};

// ─── Events ──────────────────────────────────────────────────────────────────

/// An event applied to a single report.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
  Escalate,
  PhcMarkClean,
  LabApproveClean,
  LabConfirmContaminated(NewLabFindings),
  /// Issued by the aggregation engine when a lab confirms an assignment clean.
  CertifyClean,
  Upvote,
}

impl ReportEvent {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Escalate => "escalate",
      Self::PhcMarkClean => "phc_mark_clean",
      Self::LabApproveClean => "lab_approve_clean",
      Self::LabConfirmContaminated(_) => "lab_confirm_contaminated",
      Self::CertifyClean => "certify_clean",
      Self::Upvote => "upvote",
    }
  }

  pub fn required_role(&self) -> Option<Role> {
    match self {
      Self::Escalate | Self::PhcMarkClean => Some(Role::Phc),
      Self::LabApproveClean | Self::LabConfirmContaminated(_) | Self::CertifyClean => {
        Some(Role::Lab)
      }
      Self::Upvote => None,
    }
  }
}

/// The conditional write realising an accepted event.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
  /// Status the stored record must still hold; `None` for unconditional writes.
  pub expected: Option<ReportStatus>,
  pub patch:    ReportPatch,
}

fn expect_state(report: &Report, expected: ReportStatus) -> Result<(), Guard> {
  if report.status == expected {
    Ok(())
  } else {
    Err(Guard::State {
      expected: expected.to_string(),
      actual:   report.status.to_string(),
    })
  }
}

/// Decide whether `event` may be applied to `report` by a caller holding
/// `role`. The role guard is checked before any state guard.
pub fn transition(
  report: &Report,
  event: &ReportEvent,
  role: Role,
  now: DateTime<Utc>,
) -> Result<Transition, Guard> {
  match event.required_role() {
    Some(required) if required != role => {
      return Err(Guard::Role { required, actual: role });
    }
    _ => {}
  }

  let moved = |status: ReportStatus| ReportPatch {
    status: Some(status),
    active: Some(!status.is_terminal()),
    last_transition_at: Some(now),
    ..ReportPatch::default()
  };

  match event {
    ReportEvent::Escalate => {
      expect_state(report, ReportStatus::Reported)?;
      if report.location.is_none() {
        return Err(Guard::MissingField { field: "location" });
      }
      if report.locality_key.is_none() {
        return Err(Guard::MissingField { field: "locality_key" });
      }
      Ok(Transition {
        expected: Some(ReportStatus::Reported),
        patch:    moved(ReportStatus::Escalated),
      })
    }
    ReportEvent::PhcMarkClean => {
      expect_state(report, ReportStatus::Escalated)?;
      Ok(Transition {
        expected: Some(ReportStatus::Escalated),
        patch:    ReportPatch {
          pending_lab_approval: Some(true),
          phc_marked_clean_at: Some(now),
          ..ReportPatch::default()
        },
      })
    }
    ReportEvent::LabApproveClean => {
      expect_state(report, ReportStatus::Escalated)?;
      if !report.pending_lab_approval {
        return Err(Guard::Precondition {
          reason: "no PHC clean marking is awaiting lab approval".into(),
        });
      }
      Ok(Transition {
        expected: Some(ReportStatus::Escalated),
        patch:    ReportPatch {
          pending_lab_approval: Some(false),
          ..moved(ReportStatus::Resolved)
        },
      })
    }
    ReportEvent::LabConfirmContaminated(findings) => {
      expect_state(report, ReportStatus::Escalated)?;
      Ok(Transition {
        expected: Some(ReportStatus::Escalated),
        patch:    ReportPatch {
          lab_findings: Some(findings.clone().recorded(now)),
          ..ReportPatch::default()
        },
      })
    }
    ReportEvent::CertifyClean => {
      expect_state(report, ReportStatus::Escalated)?;
      Ok(Transition {
        expected: Some(ReportStatus::Escalated),
        patch:    ReportPatch {
          pending_lab_approval: Some(false),
          ..moved(ReportStatus::Clean)
        },
      })
    }
    ReportEvent::Upvote => Ok(Transition {
      expected: None,
      patch:    ReportPatch { upvotes: 1, ..ReportPatch::default() },
    }),
  }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// The outcome of [`LifecycleEngine::submit`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
  pub report:     Report,
  /// The assignment the report was escalated into, if quorum was reached.
  pub assignment: Option<Assignment>,
}

pub struct LifecycleEngine<'a, S, R> {
  pub(crate) tracker: &'a Tracker<S, R>,
}

impl<S, R> LifecycleEngine<'_, S, R>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  /// Record a new report. Any caller may submit.
  ///
  /// Under the automatic escalation policy a located, keyed report
  /// immediately takes part in quorum formation for its locality.
  pub async fn submit(&self, identity: &str, new: NewReport) -> Result<Submission> {
    let t = self.tracker;
    t.resolve_caller(identity).await?;

    let problem = new.problem.trim();
    if problem.is_empty() {
      return Err(Error::Validation("problem description must not be empty".into()));
    }
    if let Some(point) = new.location {
      Coordinates::new(point.latitude, point.longitude)?;
    }
    let locality_key = match new.pin_code.as_deref().map(str::trim) {
      Some(pin) if !pin.is_empty() => Some(LocalityKey::parse(pin)?),
      _ => new.location.and_then(|point| t.directory.locate(point)),
    };
    let district = new.district.map(|d| d.trim().to_owned()).filter(|d| !d.is_empty());
    let district_id = district.as_deref().map(normalize_district_id);

    let now = t.now();
    let report = Report {
      report_id: Uuid::new_v4(),
      problem: problem.to_owned(),
      source_type: new.source_type,
      severity: new.severity,
      location: new.location,
      area_name: new.area_name,
      district,
      district_id,
      locality_key,
      image_ref: new.image_ref,
      status: ReportStatus::Reported,
      active: true,
      pending_lab_approval: false,
      phc_marked_clean_at: None,
      lab_findings: None,
      upvote_count: 0,
      assignment_id: None,
      created_at: now,
      last_transition_at: now,
    };
    let id = report.report_id;
    t.call(t.store.create_report(report.clone()))
      .await
      .map_err(|e| e.into_error("create_report", Entity::Report, id))?;
    debug!(report_id = %id, locality = ?report.locality_key, "report submitted");

    let eligible = t.config.escalation == EscalationPolicy::Automatic
      && report.is_located()
      && report.locality_key.is_some();
    if !eligible {
      return Ok(Submission { report, assignment: None });
    }

    let assignment = t.aggregation().on_submit(&report).await?;
    let report = self.fetch(id).await?;
    Ok(Submission { report, assignment })
  }

  /// Escalate a reported report into its locality's assignment, forming one
  /// if quorum is now met.
  pub async fn escalate(&self, identity: &str, id: Uuid) -> Result<Report> {
    self.tracker.aggregation().escalate_report(identity, id).await
  }

  pub async fn phc_mark_clean(&self, identity: &str, id: Uuid) -> Result<Report> {
    self.apply(identity, id, ReportEvent::PhcMarkClean).await
  }

  pub async fn lab_approve_clean(&self, identity: &str, id: Uuid) -> Result<Report> {
    self.apply(identity, id, ReportEvent::LabApproveClean).await
  }

  pub async fn lab_confirm_contaminated(
    &self,
    identity: &str,
    id: Uuid,
    findings: NewLabFindings,
  ) -> Result<Report> {
    findings.validate()?;
    self.apply(identity, id, ReportEvent::LabConfirmContaminated(findings)).await
  }

  pub async fn upvote(&self, identity: &str, id: Uuid) -> Result<Report> {
    self.apply(identity, id, ReportEvent::Upvote).await
  }

  async fn apply(&self, identity: &str, id: Uuid, event: ReportEvent) -> Result<Report> {
    let caller = self.tracker.resolve_caller(identity).await?;
    let report = self.fetch(id).await?;
    self.commit(&report, &event, caller.role).await
  }

  // ── Internal ──────────────────────────────────────────────────────────

  pub(crate) async fn fetch(&self, id: Uuid) -> Result<Report> {
    let t = self.tracker;
    t.call(t.store.get_report(id))
      .await
      .map_err(|e| e.into_error("get_report", Entity::Report, id))
  }

  /// Run the pure transition against `report` and commit it.
  pub(crate) async fn commit(
    &self,
    report: &Report,
    event: &ReportEvent,
    role: Role,
  ) -> Result<Report> {
    let t = self.tracker;
    let id = report.report_id;
    let step = transition(report, event, role, t.now()).map_err(|guard| {
      debug!(report_id = %id, event = event.name(), %guard, "transition rejected");
      Error::invalid(Entity::Report, id, event.name(), guard)
    })?;
    self.write(id, event.name(), step).await
  }

  pub(crate) async fn write(
    &self,
    id: Uuid,
    op: &'static str,
    step: Transition,
  ) -> Result<Report> {
    let t = self.tracker;
    let updated = t
      .call(t.store.update_report(id, step.expected, step.patch))
      .await
      .map_err(|e| match e {
        StoreError::Conflict => {
          debug!(report_id = %id, op, "lost status race");
          Error::conflict(Entity::Report, id)
        }
        other => other.into_error(op, Entity::Report, id),
      })?;
    if updated.status.is_terminal() {
      info!(report_id = %id, status = %updated.status, op, "report closed");
    }
    Ok(updated)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::{
    geo::Coordinates,
    report::{Severity, SourceType},
  };

  fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap() }

  fn report(status: ReportStatus) -> Report {
    Report {
      report_id: Uuid::new_v4(),
      problem: "oily film on the water".into(),
      source_type: SourceType::Pond,
      severity: Severity::Medium,
      location: Some(Coordinates::new(26.18, 91.75).unwrap()),
      area_name: None,
      district: None,
      district_id: None,
      locality_key: Some(LocalityKey::parse("781001").unwrap()),
      image_ref: None,
      status,
      active: !status.is_terminal(),
      pending_lab_approval: false,
      phc_marked_clean_at: None,
      lab_findings: None,
      upvote_count: 0,
      assignment_id: None,
      created_at: now(),
      last_transition_at: now(),
    }
  }

  #[test]
  fn role_is_checked_before_state() {
    let r = report(ReportStatus::Resolved);
    let guard = transition(&r, &ReportEvent::Escalate, Role::Public, now()).unwrap_err();
    assert_eq!(guard, Guard::Role { required: Role::Phc, actual: Role::Public });
  }

  #[test]
  fn escalate_requires_location_then_key() {
    let mut r = report(ReportStatus::Reported);
    r.location = None;
    let guard = transition(&r, &ReportEvent::Escalate, Role::Phc, now()).unwrap_err();
    assert_eq!(guard, Guard::MissingField { field: "location" });

    let mut r = report(ReportStatus::Reported);
    r.locality_key = None;
    let guard = transition(&r, &ReportEvent::Escalate, Role::Phc, now()).unwrap_err();
    assert_eq!(guard, Guard::MissingField { field: "locality_key" });
  }

  #[test]
  fn escalate_moves_status_and_stamps_time() {
    let r = report(ReportStatus::Reported);
    let step = transition(&r, &ReportEvent::Escalate, Role::Phc, now()).unwrap();
    assert_eq!(step.expected, Some(ReportStatus::Reported));
    assert_eq!(step.patch.status, Some(ReportStatus::Escalated));
    assert_eq!(step.patch.active, Some(true));
    assert_eq!(step.patch.last_transition_at, Some(now()));
  }

  #[test]
  fn phc_mark_clean_keeps_status() {
    let r = report(ReportStatus::Escalated);
    let step = transition(&r, &ReportEvent::PhcMarkClean, Role::Phc, now()).unwrap();
    assert_eq!(step.patch.status, None);
    assert_eq!(step.patch.last_transition_at, None);
    assert_eq!(step.patch.pending_lab_approval, Some(true));
    assert_eq!(step.patch.phc_marked_clean_at, Some(now()));
  }

  #[test]
  fn lab_approval_needs_a_prior_phc_marking() {
    let mut r = report(ReportStatus::Escalated);
    let guard =
      transition(&r, &ReportEvent::LabApproveClean, Role::Lab, now()).unwrap_err();
    assert!(matches!(guard, Guard::Precondition { .. }));

    r.pending_lab_approval = true;
    let step = transition(&r, &ReportEvent::LabApproveClean, Role::Lab, now()).unwrap();
    let mut after = r.clone();
    step.patch.apply(&mut after);
    assert_eq!(after.status, ReportStatus::Resolved);
    assert!(!after.active);
    assert!(!after.pending_lab_approval);
  }

  #[test]
  fn phc_cannot_approve_its_own_marking() {
    let mut r = report(ReportStatus::Escalated);
    r.pending_lab_approval = true;
    let guard =
      transition(&r, &ReportEvent::LabApproveClean, Role::Phc, now()).unwrap_err();
    assert_eq!(guard, Guard::Role { required: Role::Lab, actual: Role::Phc });
  }

  #[test]
  fn certify_clean_is_terminal() {
    let r = report(ReportStatus::Escalated);
    let step = transition(&r, &ReportEvent::CertifyClean, Role::Lab, now()).unwrap();
    let mut after = r.clone();
    step.patch.apply(&mut after);
    assert_eq!(after.status, ReportStatus::Clean);
    assert!(!after.active);
  }

  #[test]
  fn upvote_is_unconditional_in_any_state() {
    for status in ReportStatus::ALL {
      let r = report(status);
      let step = transition(&r, &ReportEvent::Upvote, Role::Public, now()).unwrap();
      assert_eq!(step.expected, None);
      assert_eq!(step.patch.upvotes, 1);
      assert_eq!(step.patch.status, None);
    }
  }
}
