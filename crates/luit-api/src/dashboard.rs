//! Read-only views for maps and PHC/lab dashboards.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/area-status` | `?latitude&longitude[&radius_km]` |
//! | `GET`  | `/queues/district` | PHC only; the caller's own district |
//! | `GET`  | `/queues/lab` | Lab only |
//! | `GET`  | `/solutions` | Optional `?district=` |
//! | `GET`  | `/statistics` | Optional `?district=` |
//! | `GET`  | `/hotspots` | Optional `?district=` |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
};
use luit_core::{
  Tracker,
  listings::{Hotspot, SolutionRecord, Statistics},
  proximity::AreaStatus,
  report::Report,
  role::RoleResolver,
  store::{AssignmentStore, ReportStore},
};
use serde::Deserialize;

use crate::{error::ApiError, identity::Identity, reports::PointParams};

type Shared<S, R> = State<Arc<Tracker<S, R>>>;

#[derive(Debug, Default, Deserialize)]
pub struct DistrictParams {
  pub district: Option<String>,
}

/// `GET /area-status?latitude=<lat>&longitude=<lon>[&radius_km=<km>]`
pub async fn area_status<S, R>(
  State(tracker): Shared<S, R>,
  Query(params): Query<PointParams>,
) -> Result<Json<AreaStatus>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  let point = params.point()?;
  Ok(Json(tracker.proximity().area_status(point, params.radius_km).await?))
}

// ─── Queues ───────────────────────────────────────────────────────────────────

/// `GET /queues/district`
pub async fn district_queue<S, R>(
  State(tracker): Shared<S, R>,
  identity: Identity,
) -> Result<Json<Vec<Report>>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  Ok(Json(tracker.listings().district_queue(identity.as_str()).await?))
}

/// `GET /queues/lab`
pub async fn lab_queue<S, R>(
  State(tracker): Shared<S, R>,
  identity: Identity,
) -> Result<Json<Vec<Report>>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  Ok(Json(tracker.listings().lab_queue(identity.as_str()).await?))
}

// ─── Aggregates ───────────────────────────────────────────────────────────────

/// `GET /solutions[?district=<name>]`
pub async fn solutions<S, R>(
  State(tracker): Shared<S, R>,
  Query(params): Query<DistrictParams>,
) -> Result<Json<Vec<SolutionRecord>>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  Ok(Json(tracker.listings().solutions(params.district.as_deref()).await?))
}

/// `GET /statistics[?district=<name>]`
pub async fn statistics<S, R>(
  State(tracker): Shared<S, R>,
  Query(params): Query<DistrictParams>,
) -> Result<Json<Statistics>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  Ok(Json(tracker.listings().statistics(params.district.as_deref()).await?))
}

/// `GET /hotspots[?district=<name>]`
pub async fn hotspots<S, R>(
  State(tracker): Shared<S, R>,
  Query(params): Query<DistrictParams>,
) -> Result<Json<Vec<Hotspot>>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  Ok(Json(tracker.listings().hotspots(params.district.as_deref()).await?))
}
