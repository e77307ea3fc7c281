//! Locality grouping: quorum detection, Assignment formation and the
//! Assignment's own lab-driven lifecycle.
//!
//! At most one open Assignment exists per locality; the store enforces this
//! on `form_assignment`, so two submissions racing across the quorum line
//! produce one Assignment and one loser that joins it. Formation inserts the
//! Assignment and escalates its members in the same commit.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
  Error, Result,
  assignment::{Assignment, AssignmentStatus, NewLabDocument},
  error::{Entity, Guard},
  lifecycle::{ReportEvent, transition},
  locality::LocalityKey,
  report::{Report, ReportStatus},
  role::{Caller, Role, RoleResolver},
  store::{AssignmentPatch, AssignmentStore, ReportField, ReportPatch, ReportStore, StoreError},
  tracker::Tracker,
};

// ─── Assignment transitions ──────────────────────────────────────────────────

/// A lab action on an assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentEvent {
  UploadTestResult(NewLabDocument),
  ProvideSolution(NewLabDocument),
  ConfirmClean { notes: Option<String> },
  Resolve,
}

impl AssignmentEvent {
  pub fn name(&self) -> &'static str {
    match self {
      Self::UploadTestResult(_) => "upload_test_result",
      Self::ProvideSolution(_) => "provide_solution",
      Self::ConfirmClean { .. } => "confirm_clean",
      Self::Resolve => "resolve",
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentTransition {
  pub expected: AssignmentStatus,
  pub patch:    AssignmentPatch,
}

fn expect_one_of(
  assignment: &Assignment,
  accepted: &[AssignmentStatus],
) -> Result<AssignmentStatus, Guard> {
  if accepted.contains(&assignment.status) {
    return Ok(assignment.status);
  }
  let expected = accepted.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" | ");
  Err(Guard::State { expected, actual: assignment.status.to_string() })
}

/// Decide whether a lab `event` may move `assignment` forward, given the
/// current state of its member reports.
pub fn assignment_transition(
  assignment: &Assignment,
  members: &[Report],
  event: &AssignmentEvent,
  role: Role,
  now: DateTime<Utc>,
) -> Result<AssignmentTransition, Guard> {
  use AssignmentStatus::*;

  if role != Role::Lab {
    return Err(Guard::Role { required: Role::Lab, actual: role });
  }
  let to = |status: AssignmentStatus| AssignmentPatch {
    status: Some(status),
    updated_at: Some(now),
    ..AssignmentPatch::default()
  };

  match event {
    AssignmentEvent::UploadTestResult(doc) => {
      let expected = expect_one_of(assignment, &[PendingLabVisit])?;
      Ok(AssignmentTransition {
        expected,
        patch: AssignmentPatch {
          test_result: Some(doc.clone().recorded(now)),
          ..to(TestResultUploaded)
        },
      })
    }
    AssignmentEvent::ProvideSolution(doc) => {
      let expected = expect_one_of(assignment, &[PendingLabVisit, TestResultUploaded])?;
      Ok(AssignmentTransition {
        expected,
        patch: AssignmentPatch {
          solution: Some(doc.clone().recorded(now)),
          ..to(SolutionProvided)
        },
      })
    }
    AssignmentEvent::ConfirmClean { notes } => {
      let expected = expect_one_of(assignment, &[TestResultUploaded, SolutionProvided])?;
      if !members.iter().any(|r| r.phc_marked_clean_at.is_some()) {
        return Err(Guard::Precondition {
          reason: "no member report has been marked clean by a PHC".into(),
        });
      }
      Ok(AssignmentTransition {
        expected,
        patch: AssignmentPatch { final_notes: notes.clone(), ..to(ConfirmedClean) },
      })
    }
    AssignmentEvent::Resolve => {
      let expected = expect_one_of(assignment, &[ConfirmedClean])?;
      let active = members.iter().filter(|r| r.active).count();
      if active > 0 {
        return Err(Guard::Precondition {
          reason: format!("{active} member report(s) are still active"),
        });
      }
      Ok(AssignmentTransition { expected, patch: to(Resolved) })
    }
  }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// The result of an attempt to form an assignment for a locality.
#[derive(Debug)]
pub(crate) enum Formation {
  /// Too few qualifying reports.
  NotReady { have: usize },
  Created(Assignment),
  /// A concurrent writer opened the locality's assignment first.
  Lost(Assignment),
}

/// A formation attempt before it reaches the store.
enum Draft {
  Short { have: usize },
  Ready(Assignment, ReportPatch),
}

/// Snapshots retaken when a member moves under a formation attempt.
const FORM_ATTEMPTS: usize = 3;

/// Reports that count toward quorum for `key`.
fn qualifies(report: &Report, key: &LocalityKey) -> bool {
  report.status == ReportStatus::Reported
    && report.active
    && report.is_located()
    && report.assignment_id.is_none()
    && report.locality_key.as_ref() == Some(key)
}

pub struct AggregationEngine<'a, S, R> {
  pub(crate) tracker: &'a Tracker<S, R>,
}

impl<S, R> AggregationEngine<'_, S, R>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  // ── Escalation ────────────────────────────────────────────────────────

  /// Called after a located, keyed submission under the automatic policy.
  /// Joins the open assignment for the locality, or forms one at quorum.
  pub(crate) async fn on_submit(&self, report: &Report) -> Result<Option<Assignment>> {
    let Some(key) = report.locality_key.clone() else {
      return Ok(None);
    };
    if let Some(open) = self.open_for(&key).await? {
      return self.join(&open, report, Caller::system().role, false).await.map(Some);
    }
    match self.try_form(report).await? {
      Formation::NotReady { have } => {
        // Members bound by a concurrent formation drop out of the snapshot.
        if let Some(open) = self.open_for(&key).await? {
          return self.join(&open, report, Caller::system().role, false).await.map(Some);
        }
        debug!(locality = %key, have, need = self.tracker.config.quorum, "below quorum");
        Ok(None)
      }
      Formation::Created(assignment) => Ok(Some(assignment)),
      Formation::Lost(open) => {
        self.join(&open, report, Caller::system().role, false).await.map(Some)
      }
    }
  }

  /// PHC-initiated `escalate`.
  pub async fn escalate_report(&self, identity: &str, id: Uuid) -> Result<Report> {
    let t = self.tracker;
    let caller = t.resolve_caller(identity).await?;
    let lifecycle = t.lifecycle();
    let report = lifecycle.fetch(id).await?;

    let event = ReportEvent::Escalate;
    transition(&report, &event, caller.role, t.now()).map_err(|guard| {
      debug!(report_id = %id, %guard, "escalate rejected");
      Error::invalid(Entity::Report, id, event.name(), guard)
    })?;
    let Some(key) = report.locality_key.clone() else {
      return Err(Error::invalid(
        Entity::Report,
        id,
        event.name(),
        Guard::MissingField { field: "locality_key" },
      ));
    };

    if let Some(open) = self.open_for(&key).await? {
      self.join(&open, &report, caller.role, true).await?;
      return lifecycle.fetch(id).await;
    }
    match self.try_form(&report).await? {
      Formation::Created(_) => lifecycle.fetch(id).await,
      Formation::Lost(_) => Err(Error::conflict(Entity::Report, id)),
      Formation::NotReady { have } => Err(Error::invalid(
        Entity::Report,
        id,
        event.name(),
        Guard::Precondition {
          reason: format!(
            "quorum not met ({have} of {} qualifying reports)",
            t.config.quorum
          ),
        },
      )),
    }
  }

  async fn open_for(&self, key: &LocalityKey) -> Result<Option<Assignment>> {
    let t = self.tracker;
    t.call(t.store.open_assignment_for(key.clone()))
      .await
      .map_err(|e| e.into_error("open_assignment_for", Entity::Assignment, key))
  }

  /// Snapshot the qualifying reports for the trigger's locality and, if
  /// quorum holds, form the assignment with every member escalated into it.
  ///
  /// Formation is a single store commit, so a failure leaves either no
  /// assignment or a fully bound one. A member that moves between the
  /// snapshot and the commit aborts it; the snapshot is then retaken.
  pub(crate) async fn try_form(&self, trigger: &Report) -> Result<Formation> {
    let t = self.tracker;
    let Some(key) = trigger.locality_key.clone() else {
      return Ok(Formation::NotReady { have: 0 });
    };

    for attempt in 1..=FORM_ATTEMPTS {
      let (assignment, bind) = match self.gather(trigger, &key).await? {
        Draft::Ready(assignment, bind) => (assignment, bind),
        Draft::Short { have } => return Ok(Formation::NotReady { have }),
      };
      let aid = assignment.assignment_id;

      match t.call(t.store.form_assignment(assignment, bind)).await {
        Ok(formed) => {
          info!(
            assignment_id = %aid,
            locality = %key,
            members = formed.member_report_ids.len(),
            severity = %formed.severity,
            "assignment formed"
          );
          return Ok(Formation::Created(formed));
        }
        Err(StoreError::Conflict) => {
          if let Some(open) = self.open_for(&key).await? {
            debug!(locality = %key, "assignment already opened concurrently");
            return Ok(Formation::Lost(open));
          }
          debug!(locality = %key, attempt, "member moved before formation committed");
        }
        Err(e) => return Err(e.into_error("form_assignment", Entity::Assignment, aid)),
      }
    }
    Err(Error::conflict(Entity::Assignment, &key))
  }

  /// Build the assignment a formation attempt would commit, plus the patch
  /// that escalates its members.
  async fn gather(&self, trigger: &Report, key: &LocalityKey) -> Result<Draft> {
    let t = self.tracker;
    let quorum = t.config.quorum;

    let snapshot = t
      .call(t.store.query_reports(ReportField::Locality(key.clone())))
      .await
      .map_err(|e| e.into_error("query_reports", Entity::Report, key))?;
    let candidates: Vec<Report> = snapshot.into_iter().filter(|r| qualifies(r, key)).collect();
    if candidates.len() < quorum {
      return Ok(Draft::Short { have: candidates.len() });
    }

    let mut members = Vec::with_capacity(candidates.len());
    for candidate in candidates {
      let id = candidate.report_id;
      match t.call(t.store.get_report(id)).await {
        Ok(fresh) if qualifies(&fresh, key) => members.push(fresh),
        Ok(_) | Err(StoreError::NotFound) => {}
        Err(e) => return Err(e.into_error("get_report", Entity::Report, id)),
      }
    }
    if members.len() < quorum {
      debug!(locality = %key, have = members.len(), need = quorum, "quorum lost on re-verify");
      return Ok(Draft::Short { have: members.len() });
    }
    members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.report_id.cmp(&b.report_id)));

    let now = t.now();
    let Some(representative_location) = trigger
      .location
      .or_else(|| t.directory.centre(key))
      .or_else(|| members.iter().find_map(|r| r.location))
    else {
      return Ok(Draft::Short { have: members.len() });
    };
    let Some(lead) = members.first() else {
      return Ok(Draft::Short { have: 0 });
    };
    let bind = transition(lead, &ReportEvent::Escalate, Caller::system().role, now)
      .map_err(|guard| Error::invalid(Entity::Report, lead.report_id, "escalate", guard))?
      .patch;

    let severity = members.iter().map(|r| r.severity).max().unwrap_or(trigger.severity);
    let assignment = Assignment {
      assignment_id: Uuid::new_v4(),
      locality_key: key.clone(),
      member_report_ids: members.iter().map(|r| r.report_id).collect(),
      status: AssignmentStatus::PendingLabVisit,
      representative_location,
      severity,
      district: trigger.district.clone(),
      district_id: trigger.district_id.clone(),
      area_name: trigger.area_name.clone(),
      test_result: None,
      solution: None,
      final_notes: None,
      created_at: now,
      updated_at: now,
    };
    Ok(Draft::Ready(assignment, bind))
  }

  /// Add `report` to the open `assignment` and escalate it. When `strict`,
  /// losing the status race is reported as a conflict.
  async fn join(
    &self,
    assignment: &Assignment,
    report: &Report,
    role: Role,
    strict: bool,
  ) -> Result<Assignment> {
    let t = self.tracker;
    let id = report.report_id;
    let aid = assignment.assignment_id;
    let mut step = transition(report, &ReportEvent::Escalate, role, t.now())
      .map_err(|guard| Error::invalid(Entity::Report, id, "escalate", guard))?;
    step.patch.assignment_id = Some(aid);

    let joined = t
      .call(t.store.append_member(aid, id))
      .await
      .map_err(|e| e.into_error("append_member", Entity::Assignment, aid))?;
    match t.lifecycle().write(id, "escalate", step).await {
      Ok(_) => {
        debug!(report_id = %id, assignment_id = %aid, "report joined assignment");
        Ok(joined)
      }
      Err(Error::Conflict { .. }) if !strict => Ok(joined),
      Err(e) => Err(e),
    }
  }

  // ── Assignment lifecycle ──────────────────────────────────────────────

  pub async fn upload_test_result(
    &self,
    identity: &str,
    id: Uuid,
    doc: NewLabDocument,
  ) -> Result<Assignment> {
    doc.validate()?;
    self.apply(identity, id, AssignmentEvent::UploadTestResult(doc)).await
  }

  pub async fn provide_solution(
    &self,
    identity: &str,
    id: Uuid,
    doc: NewLabDocument,
  ) -> Result<Assignment> {
    doc.validate()?;
    self.apply(identity, id, AssignmentEvent::ProvideSolution(doc)).await
  }

  /// Certify the locality clean. Every member still escalated is moved to
  /// `clean` before the assignment itself advances.
  ///
  /// The member writes and the assignment write are separate commits. If
  /// the assignment write fails, or loses its status check to a concurrent
  /// lab action, the members stay `clean` while the assignment keeps its
  /// old status. Calling again completes it: members already closed are
  /// skipped and their `phc_marked_clean_at` still satisfies the guard.
  pub async fn confirm_clean(
    &self,
    identity: &str,
    id: Uuid,
    notes: Option<String>,
  ) -> Result<Assignment> {
    self.apply(identity, id, AssignmentEvent::ConfirmClean { notes }).await
  }

  pub async fn resolve(&self, identity: &str, id: Uuid) -> Result<Assignment> {
    self.apply(identity, id, AssignmentEvent::Resolve).await
  }

  pub async fn get(&self, id: Uuid) -> Result<Assignment> {
    let t = self.tracker;
    t.call(t.store.get_assignment(id))
      .await
      .map_err(|e| e.into_error("get_assignment", Entity::Assignment, id))
  }

  async fn members(&self, assignment: &Assignment) -> Result<Vec<Report>> {
    let lifecycle = self.tracker.lifecycle();
    let mut members = Vec::with_capacity(assignment.member_report_ids.len());
    for id in &assignment.member_report_ids {
      members.push(lifecycle.fetch(*id).await?);
    }
    Ok(members)
  }

  async fn apply(
    &self,
    identity: &str,
    id: Uuid,
    event: AssignmentEvent,
  ) -> Result<Assignment> {
    let t = self.tracker;
    let caller = t.resolve_caller(identity).await?;
    let assignment = self.get(id).await?;
    let members = self.members(&assignment).await?;

    let step = assignment_transition(&assignment, &members, &event, caller.role, t.now())
      .map_err(|guard| {
        debug!(assignment_id = %id, event = event.name(), %guard, "transition rejected");
        Error::invalid(Entity::Assignment, id, event.name(), guard)
      })?;

    if matches!(event, AssignmentEvent::ConfirmClean { .. }) {
      let lifecycle = t.lifecycle();
      for member in members.iter().filter(|r| r.status == ReportStatus::Escalated) {
        match lifecycle.commit(member, &ReportEvent::CertifyClean, Role::Lab).await {
          Ok(_) => {}
          Err(Error::Conflict { .. }) => {
            let fresh = lifecycle.fetch(member.report_id).await?;
            if fresh.status == ReportStatus::Escalated {
              return Err(Error::conflict(Entity::Report, member.report_id));
            }
          }
          Err(e) => return Err(e),
        }
      }
    }

    let updated = t
      .call(t.store.update_assignment(id, Some(step.expected), step.patch))
      .await
      .map_err(|e| e.into_error(event.name(), Entity::Assignment, id))?;
    info!(assignment_id = %id, status = %updated.status, event = event.name(), "assignment advanced");
    Ok(updated)
  }
}
