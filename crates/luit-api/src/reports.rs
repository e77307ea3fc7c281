//! Handlers for `/reports` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/reports` | Optional `?status=` and `?district=`; newest first |
//! | `POST` | `/reports` | Body: [`NewReport`]; returns 201 + [`Submission`] |
//! | `GET`  | `/reports/nearby` | `?latitude&longitude[&radius_km]` |
//! | `GET`  | `/reports/:id` | 404 if not found |
//! | `POST` | `/reports/:id/upvote` | Any caller |
//! | `POST` | `/reports/:id/escalate` | PHC |
//! | `POST` | `/reports/:id/mark-clean` | PHC |
//! | `POST` | `/reports/:id/approve-clean` | Lab |
//! | `POST` | `/reports/:id/lab-findings` | Lab; body: [`NewLabFindings`] |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use luit_core::{
  Tracker,
  geo::Coordinates,
  lifecycle::Submission,
  listings::ReportFilter,
  proximity::NearbyReport,
  report::{NewLabFindings, NewReport, Report},
  role::RoleResolver,
  store::{AssignmentStore, ReportStore},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::ApiError, identity::Identity};

type Shared<S, R> = State<Arc<Tracker<S, R>>>;

// ─── List ─────────────────────────────────────────────────────────────────────

/// `GET /reports[?status=<status>][&district=<name>]`
pub async fn list<S, R>(
  State(tracker): Shared<S, R>,
  Query(filter): Query<ReportFilter>,
) -> Result<Json<Vec<Report>>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  Ok(Json(tracker.listings().list_reports(filter).await?))
}

// ─── Submit ───────────────────────────────────────────────────────────────────

/// `POST /reports`
pub async fn submit<S, R>(
  State(tracker): Shared<S, R>,
  identity: Identity,
  Json(body): Json<NewReport>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  let submission: Submission = tracker.lifecycle().submit(identity.as_str(), body).await?;
  Ok((StatusCode::CREATED, Json(submission)))
}

// ─── Nearby ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PointParams {
  pub latitude:  f64,
  pub longitude: f64,
  /// Falls back to the configured radius for the query.
  pub radius_km: Option<f64>,
}

impl PointParams {
  pub fn point(&self) -> Result<Coordinates, ApiError> {
    Ok(Coordinates::new(self.latitude, self.longitude)?)
  }
}

/// `GET /reports/nearby?latitude=<lat>&longitude=<lon>[&radius_km=<km>]`
pub async fn nearby<S, R>(
  State(tracker): Shared<S, R>,
  Query(params): Query<PointParams>,
) -> Result<Json<Vec<NearbyReport>>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  let point = params.point()?;
  Ok(Json(tracker.proximity().nearby(point, params.radius_km).await?))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /reports/:id`
pub async fn get_one<S, R>(
  State(tracker): Shared<S, R>,
  Path(id): Path<Uuid>,
) -> Result<Json<Report>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  Ok(Json(tracker.listings().get_report(id).await?))
}

// ─── Transitions ──────────────────────────────────────────────────────────────

/// `POST /reports/:id/upvote`
pub async fn upvote<S, R>(
  State(tracker): Shared<S, R>,
  identity: Identity,
  Path(id): Path<Uuid>,
) -> Result<Json<Report>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  Ok(Json(tracker.lifecycle().upvote(identity.as_str(), id).await?))
}

/// `POST /reports/:id/escalate`
pub async fn escalate<S, R>(
  State(tracker): Shared<S, R>,
  identity: Identity,
  Path(id): Path<Uuid>,
) -> Result<Json<Report>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  Ok(Json(tracker.lifecycle().escalate(identity.as_str(), id).await?))
}

/// `POST /reports/:id/mark-clean`
pub async fn mark_clean<S, R>(
  State(tracker): Shared<S, R>,
  identity: Identity,
  Path(id): Path<Uuid>,
) -> Result<Json<Report>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  Ok(Json(tracker.lifecycle().phc_mark_clean(identity.as_str(), id).await?))
}

/// `POST /reports/:id/approve-clean`
pub async fn approve_clean<S, R>(
  State(tracker): Shared<S, R>,
  identity: Identity,
  Path(id): Path<Uuid>,
) -> Result<Json<Report>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  Ok(Json(tracker.lifecycle().lab_approve_clean(identity.as_str(), id).await?))
}

/// `POST /reports/:id/lab-findings` with a test-result and/or solution
/// reference; returns the report to the PHC as still escalated.
pub async fn lab_findings<S, R>(
  State(tracker): Shared<S, R>,
  identity: Identity,
  Path(id): Path<Uuid>,
  Json(body): Json<NewLabFindings>,
) -> Result<Json<Report>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  let report = tracker
    .lifecycle()
    .lab_confirm_contaminated(identity.as_str(), id, body)
    .await?;
  Ok(Json(report))
}
