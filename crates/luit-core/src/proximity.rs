//! Distance-bounded queries over reports and assignments.
//!
//! Both queries are full scans: a bounding-box prefilter followed by an exact
//! haversine check. Store "not found" is treated as an empty data set, since
//! an empty contamination map is a safe answer for a public-facing check.

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use crate::{
  Result,
  assignment::{Assignment, AssignmentStatus},
  config::check_radius,
  error::Entity,
  geo::{BoundingBox, Coordinates, haversine_km},
  report::Report,
  role::RoleResolver,
  store::{AssignmentStore, ReportStore, StoreError},
  tracker::Tracker,
};

/// A report and its distance from the query point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyReport {
  #[serde(flatten)]
  pub report:      Report,
  pub distance_km: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyAssignment {
  #[serde(flatten)]
  pub assignment:  Assignment,
  pub distance_km: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Contamination {
  Clean,
  Contaminated,
}

/// The answer to "is this point inside a contaminated zone?".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaStatus {
  pub status:      Contamination,
  pub radius_km:   f64,
  /// Active assignments within the radius, nearest first.
  pub assignments: Vec<NearbyAssignment>,
}

fn or_empty<T>(result: Result<Vec<T>, StoreError>) -> Result<Vec<T>, StoreError> {
  match result {
    Err(StoreError::NotFound) => Ok(Vec::new()),
    other => other,
  }
}

pub struct ProximityIndex<'a, S, R> {
  pub(crate) tracker: &'a Tracker<S, R>,
}

impl<S, R> ProximityIndex<'_, S, R>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  /// Reports of any status within `radius_km` (default from config) of
  /// `point`, nearest first; ties go to the older report.
  pub async fn nearby(
    &self,
    point: Coordinates,
    radius_km: Option<f64>,
  ) -> Result<Vec<NearbyReport>> {
    let t = self.tracker;
    let radius = check_radius(radius_km.unwrap_or(t.config.nearby_radius_km))?;
    let reports = or_empty(t.call(t.store.all_reports()).await)
      .map_err(|e| e.into_error("nearby", Entity::Report, "*"))?;

    let bbox = BoundingBox::around(point, radius);
    let mut hits: Vec<NearbyReport> = reports
      .into_iter()
      .filter_map(|report| {
        let location = report.location?;
        if !bbox.contains(location) {
          return None;
        }
        let distance_km = haversine_km(point, location);
        (distance_km <= radius).then_some(NearbyReport { report, distance_km })
      })
      .collect();
    hits.sort_by(|a, b| {
      a.distance_km
        .total_cmp(&b.distance_km)
        .then(a.report.created_at.cmp(&b.report.created_at))
    });
    Ok(hits)
  }

  /// Contaminated iff an active assignment's representative location lies
  /// within `radius_km` (default from config) of `point`.
  ///
  /// An assignment is active while it is open and at least one of its member
  /// reports is active.
  pub async fn area_status(
    &self,
    point: Coordinates,
    radius_km: Option<f64>,
  ) -> Result<AreaStatus> {
    let t = self.tracker;
    let radius = check_radius(radius_km.unwrap_or(t.config.area_radius_km))?;

    let active_reports = or_empty(t.call(t.store.active_reports()).await)
      .map_err(|e| e.into_error("area_status", Entity::Report, "*"))?;
    let live: HashSet<Uuid> = active_reports.iter().filter_map(|r| r.assignment_id).collect();

    let bbox = BoundingBox::around(point, radius);
    let mut assignments = Vec::new();
    for status in AssignmentStatus::ALL.into_iter().filter(|s| s.is_open()) {
      let open = or_empty(t.call(t.store.assignments_by_status(status)).await)
        .map_err(|e| e.into_error("area_status", Entity::Assignment, status))?;
      for assignment in open {
        if !live.contains(&assignment.assignment_id)
          || !bbox.contains(assignment.representative_location)
        {
          continue;
        }
        let distance_km = haversine_km(point, assignment.representative_location);
        if distance_km <= radius {
          assignments.push(NearbyAssignment { assignment, distance_km });
        }
      }
    }
    assignments.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));

    let status = if assignments.is_empty() {
      Contamination::Clean
    } else {
      Contamination::Contaminated
    };
    Ok(AreaStatus { status, radius_km: radius, assignments })
  }
}
