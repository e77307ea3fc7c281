//! An in-process store for tests and single-node embedding.

use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
  assignment::{Assignment, AssignmentStatus},
  locality::LocalityKey,
  report::{Report, ReportStatus},
  store::{
    AssignmentPatch, AssignmentStore, ReportField, ReportPatch, ReportStore, StoreError,
  },
};

#[derive(Debug, Default)]
struct Inner {
  reports:     BTreeMap<Uuid, Report>,
  assignments: BTreeMap<Uuid, Assignment>,
}

/// Both store traits over a single lock. Each call takes the lock once and
/// never awaits while holding it, so every operation is atomic.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
  inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }
}

fn matches(report: &Report, field: &ReportField) -> bool {
  match field {
    ReportField::Locality(key) => report.locality_key.as_ref() == Some(key),
    ReportField::District(id) => report.district_id.as_deref() == Some(id.as_str()),
    ReportField::Status(status) => report.status == *status,
    ReportField::Assignment(id) => report.assignment_id == Some(*id),
  }
}

impl ReportStore for MemoryStore {
  async fn create_report(&self, report: Report) -> Result<Uuid, StoreError> {
    let mut inner = self.inner.write().await;
    if inner.reports.contains_key(&report.report_id) {
      return Err(StoreError::Conflict);
    }
    let id = report.report_id;
    inner.reports.insert(id, report);
    Ok(id)
  }

  async fn get_report(&self, id: Uuid) -> Result<Report, StoreError> {
    self.inner.read().await.reports.get(&id).cloned().ok_or(StoreError::NotFound)
  }

  async fn update_report(
    &self,
    id: Uuid,
    expected: Option<ReportStatus>,
    patch: ReportPatch,
  ) -> Result<Report, StoreError> {
    let mut inner = self.inner.write().await;
    let report = inner.reports.get_mut(&id).ok_or(StoreError::NotFound)?;
    if expected.is_some_and(|status| status != report.status) {
      return Err(StoreError::Conflict);
    }
    patch.apply(report);
    Ok(report.clone())
  }

  async fn query_reports(&self, field: ReportField) -> Result<Vec<Report>, StoreError> {
    let inner = self.inner.read().await;
    Ok(inner.reports.values().filter(|r| matches(r, &field)).cloned().collect())
  }

  async fn active_reports(&self) -> Result<Vec<Report>, StoreError> {
    let inner = self.inner.read().await;
    Ok(inner.reports.values().filter(|r| r.active).cloned().collect())
  }

  async fn all_reports(&self) -> Result<Vec<Report>, StoreError> {
    Ok(self.inner.read().await.reports.values().cloned().collect())
  }
}

impl AssignmentStore for MemoryStore {
  async fn form_assignment(
    &self,
    assignment: Assignment,
    bind: ReportPatch,
  ) -> Result<Assignment, StoreError> {
    let mut inner = self.inner.write().await;
    let taken = inner.assignments.contains_key(&assignment.assignment_id)
      || inner
        .assignments
        .values()
        .any(|a| a.status.is_open() && a.locality_key == assignment.locality_key);
    if taken {
      return Err(StoreError::Conflict);
    }
    // Check every member before touching any of them.
    for id in &assignment.member_report_ids {
      match inner.reports.get(id) {
        Some(r) if r.status == ReportStatus::Reported && r.assignment_id.is_none() => {}
        _ => return Err(StoreError::Conflict),
      }
    }

    let bind = ReportPatch { assignment_id: Some(assignment.assignment_id), ..bind };
    for id in &assignment.member_report_ids {
      if let Some(report) = inner.reports.get_mut(id) {
        bind.apply(report);
      }
    }
    inner.assignments.insert(assignment.assignment_id, assignment.clone());
    Ok(assignment)
  }

  async fn get_assignment(&self, id: Uuid) -> Result<Assignment, StoreError> {
    self.inner.read().await.assignments.get(&id).cloned().ok_or(StoreError::NotFound)
  }

  async fn update_assignment(
    &self,
    id: Uuid,
    expected: Option<AssignmentStatus>,
    patch: AssignmentPatch,
  ) -> Result<Assignment, StoreError> {
    let mut inner = self.inner.write().await;
    let assignment = inner.assignments.get_mut(&id).ok_or(StoreError::NotFound)?;
    if expected.is_some_and(|status| status != assignment.status) {
      return Err(StoreError::Conflict);
    }
    patch.apply(assignment);
    Ok(assignment.clone())
  }

  async fn append_member(&self, id: Uuid, report_id: Uuid) -> Result<Assignment, StoreError> {
    let mut inner = self.inner.write().await;
    let assignment = inner.assignments.get_mut(&id).ok_or(StoreError::NotFound)?;
    if !assignment.status.is_open() {
      return Err(StoreError::Conflict);
    }
    if !assignment.member_report_ids.contains(&report_id) {
      assignment.member_report_ids.push(report_id);
    }
    Ok(assignment.clone())
  }

  async fn assignments_by_status(
    &self,
    status: AssignmentStatus,
  ) -> Result<Vec<Assignment>, StoreError> {
    let inner = self.inner.read().await;
    Ok(inner.assignments.values().filter(|a| a.status == status).cloned().collect())
  }

  async fn open_assignment_for(
    &self,
    key: LocalityKey,
  ) -> Result<Option<Assignment>, StoreError> {
    let inner = self.inner.read().await;
    Ok(
      inner
        .assignments
        .values()
        .find(|a| a.status.is_open() && a.locality_key == key)
        .cloned(),
    )
  }
}
