//! Read-side views for the PHC and lab dashboards.

use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  assignment::{Assignment, AssignmentStatus},
  error::Entity,
  geo::Coordinates,
  locality::{LocalityKey, normalize_district_id},
  report::{Report, ReportStatus, Severity},
  role::{Role, RoleResolver},
  store::{AssignmentStore, ReportField, ReportStore},
  tracker::Tracker,
};

// ─── View types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportFilter {
  pub status:   Option<ReportStatus>,
  /// Free-form district name; matched on its normalized id.
  pub district: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SolutionSource {
  Report,
  Assignment,
}

/// A lab solution on record, for reuse by PHCs facing a similar problem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolutionRecord {
  pub source:       SolutionSource,
  pub id:           Uuid,
  pub locality_key: Option<LocalityKey>,
  pub district:     Option<String>,
  pub area_name:    Option<String>,
  pub problem:      Option<String>,
  pub solution_ref: String,
  pub notes:        Option<String>,
  pub recorded_at:  DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
  pub total_reports:  usize,
  pub active_reports: usize,
  /// Reports closed as resolved or certified clean.
  pub clean_reports:  usize,
}

/// A located report as a map point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hotspot {
  pub report_id: Uuid,
  pub location:  Coordinates,
  pub status:    ReportStatus,
  pub severity:  Severity,
  pub area_name: Option<String>,
  pub active:    bool,
}

fn queue_priority(status: ReportStatus) -> u8 {
  match status {
    ReportStatus::Escalated => 0,
    ReportStatus::Reported => 1,
    ReportStatus::Resolved | ReportStatus::Clean => 2,
  }
}

fn newest_first(reports: &mut [Report]) {
  reports.sort_by_key(|r| (Reverse(r.created_at), r.report_id));
}

// ─── Listings ────────────────────────────────────────────────────────────────

pub struct Listings<'a, S, R> {
  pub(crate) tracker: &'a Tracker<S, R>,
}

impl<S, R> Listings<'_, S, R>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  pub async fn get_report(&self, id: Uuid) -> Result<Report> {
    self.tracker.lifecycle().fetch(id).await
  }

  pub async fn get_assignment(&self, id: Uuid) -> Result<Assignment> {
    self.tracker.aggregation().get(id).await
  }

  async fn reports_in(&self, district: Option<&str>) -> Result<Vec<Report>> {
    let t = self.tracker;
    let district_id = district.map(normalize_district_id).filter(|d| !d.is_empty());
    let result = match district_id {
      Some(id) => t.call(t.store.query_reports(ReportField::District(id))).await,
      None => t.call(t.store.all_reports()).await,
    };
    result.map_err(|e| e.into_error("list_reports", Entity::Report, district.unwrap_or("*")))
  }

  /// Reports matching `filter`, newest first.
  pub async fn list_reports(&self, filter: ReportFilter) -> Result<Vec<Report>> {
    let mut reports = self.reports_in(filter.district.as_deref()).await?;
    if let Some(status) = filter.status {
      reports.retain(|r| r.status == status);
    }
    newest_first(&mut reports);
    Ok(reports)
  }

  /// A PHC's view of its own district: escalated first, then reported, then
  /// closed; newest first within each group.
  pub async fn district_queue(&self, identity: &str) -> Result<Vec<Report>> {
    let caller = self.tracker.resolve_caller(identity).await?;
    if caller.role != Role::Phc {
      return Err(Error::Forbidden { action: "district_queue", role: caller.role });
    }
    let Some(district) = caller.district.as_deref() else {
      return Err(Error::Validation("caller has no district on record".into()));
    };
    let mut reports = self.reports_in(Some(district)).await?;
    reports.sort_by_key(|r| (queue_priority(r.status), Reverse(r.created_at), r.report_id));
    Ok(reports)
  }

  /// A lab's work queue: escalated reports in its district (all districts if
  /// it has none), most recently moved first.
  pub async fn lab_queue(&self, identity: &str) -> Result<Vec<Report>> {
    let caller = self.tracker.resolve_caller(identity).await?;
    if caller.role != Role::Lab {
      return Err(Error::Forbidden { action: "lab_queue", role: caller.role });
    }
    let mut reports = self.reports_in(caller.district.as_deref()).await?;
    reports.retain(|r| r.status == ReportStatus::Escalated || r.pending_lab_approval);
    reports.sort_by_key(|r| (Reverse(r.last_transition_at), r.report_id));
    Ok(reports)
  }

  pub async fn list_assignments(
    &self,
    status: Option<AssignmentStatus>,
  ) -> Result<Vec<Assignment>> {
    let t = self.tracker;
    let statuses = match status {
      Some(status) => vec![status],
      None => AssignmentStatus::ALL.to_vec(),
    };
    let mut assignments = Vec::new();
    for status in statuses {
      let batch = t
        .call(t.store.assignments_by_status(status))
        .await
        .map_err(|e| e.into_error("list_assignments", Entity::Assignment, status))?;
      assignments.extend(batch);
    }
    assignments.sort_by_key(|a| (Reverse(a.created_at), a.assignment_id));
    Ok(assignments)
  }

  /// Lab solutions recorded on reports and assignments, newest first.
  pub async fn solutions(&self, district: Option<&str>) -> Result<Vec<SolutionRecord>> {
    let district_id = district.map(normalize_district_id);
    let reports = self.reports_in(district).await?;
    let mut records: Vec<SolutionRecord> = reports
      .into_iter()
      .filter_map(|r| {
        let findings = r.lab_findings?;
        let solution_ref = findings.solution_ref.filter(|s| !s.trim().is_empty())?;
        Some(SolutionRecord {
          source: SolutionSource::Report,
          id: r.report_id,
          locality_key: r.locality_key,
          district: r.district,
          area_name: r.area_name,
          problem: Some(r.problem),
          solution_ref,
          notes: findings.notes,
          recorded_at: findings.recorded_at,
        })
      })
      .collect();

    let assignments = self.list_assignments(None).await?;
    records.extend(assignments.into_iter().filter_map(|a| {
      if district_id.is_some() && a.district_id != district_id {
        return None;
      }
      let solution = a.solution?;
      Some(SolutionRecord {
        source: SolutionSource::Assignment,
        id: a.assignment_id,
        locality_key: Some(a.locality_key),
        district: a.district,
        area_name: a.area_name,
        problem: None,
        solution_ref: solution.reference,
        notes: solution.notes,
        recorded_at: solution.recorded_at,
      })
    }));
    records.sort_by_key(|r| (Reverse(r.recorded_at), r.id));
    Ok(records)
  }

  pub async fn statistics(&self, district: Option<&str>) -> Result<Statistics> {
    let reports = self.reports_in(district).await?;
    Ok(Statistics {
      total_reports:  reports.len(),
      active_reports: reports.iter().filter(|r| r.active).count(),
      clean_reports:  reports.iter().filter(|r| r.status.is_terminal()).count(),
    })
  }

  pub async fn hotspots(&self, district: Option<&str>) -> Result<Vec<Hotspot>> {
    let mut reports = self.reports_in(district).await?;
    newest_first(&mut reports);
    Ok(
      reports
        .into_iter()
        .filter_map(|r| {
          Some(Hotspot {
            report_id: r.report_id,
            location:  r.location?,
            status:    r.status,
            severity:  r.severity,
            area_name: r.area_name,
            active:    r.active,
          })
        })
        .collect(),
    )
  }
}
