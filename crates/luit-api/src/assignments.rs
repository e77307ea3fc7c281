//! Handlers for `/assignments` endpoints. Every write is lab-only.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/assignments` | Optional `?status=` |
//! | `GET`  | `/assignments/:id` | 404 if not found |
//! | `POST` | `/assignments/:id/test-result` | Body: [`NewLabDocument`] |
//! | `POST` | `/assignments/:id/solution` | Body: [`NewLabDocument`] |
//! | `POST` | `/assignments/:id/confirm-clean` | Body: `{"notes":"..."}` (optional) |
//! | `POST` | `/assignments/:id/resolve` | 409 while a member report is active |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
};
use luit_core::{
  Tracker,
  assignment::{Assignment, AssignmentStatus, NewLabDocument},
  role::RoleResolver,
  store::{AssignmentStore, ReportStore},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::ApiError, identity::Identity};

type Shared<S, R> = State<Arc<Tracker<S, R>>>;

// ─── Read ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub status: Option<AssignmentStatus>,
}

/// `GET /assignments[?status=<status>]`
pub async fn list<S, R>(
  State(tracker): Shared<S, R>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Assignment>>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  Ok(Json(tracker.listings().list_assignments(params.status).await?))
}

/// `GET /assignments/:id`
pub async fn get_one<S, R>(
  State(tracker): Shared<S, R>,
  Path(id): Path<Uuid>,
) -> Result<Json<Assignment>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  Ok(Json(tracker.listings().get_assignment(id).await?))
}

// ─── Lab workflow ─────────────────────────────────────────────────────────────

/// `POST /assignments/:id/test-result`
pub async fn test_result<S, R>(
  State(tracker): Shared<S, R>,
  identity: Identity,
  Path(id): Path<Uuid>,
  Json(body): Json<NewLabDocument>,
) -> Result<Json<Assignment>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  let assignment = tracker
    .aggregation()
    .upload_test_result(identity.as_str(), id, body)
    .await?;
  Ok(Json(assignment))
}

/// `POST /assignments/:id/solution`
pub async fn solution<S, R>(
  State(tracker): Shared<S, R>,
  identity: Identity,
  Path(id): Path<Uuid>,
  Json(body): Json<NewLabDocument>,
) -> Result<Json<Assignment>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  let assignment = tracker
    .aggregation()
    .provide_solution(identity.as_str(), id, body)
    .await?;
  Ok(Json(assignment))
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfirmBody {
  #[serde(default)]
  pub notes: Option<String>,
}

/// `POST /assignments/:id/confirm-clean`
pub async fn confirm_clean<S, R>(
  State(tracker): Shared<S, R>,
  identity: Identity,
  Path(id): Path<Uuid>,
  Json(body): Json<ConfirmBody>,
) -> Result<Json<Assignment>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  let assignment = tracker
    .aggregation()
    .confirm_clean(identity.as_str(), id, body.notes)
    .await?;
  Ok(Json(assignment))
}

/// `POST /assignments/:id/resolve`
pub async fn resolve<S, R>(
  State(tracker): Shared<S, R>,
  identity: Identity,
  Path(id): Path<Uuid>,
) -> Result<Json<Assignment>, ApiError>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  Ok(Json(tracker.aggregation().resolve(identity.as_str(), id).await?))
}
