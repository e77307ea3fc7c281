//! JSON REST API for Luit.
//!
//! Exposes an axum [`Router`] over a [`Tracker`] backed by any report and
//! assignment store. Callers identify themselves with an opaque bearer token
//! which the tracker's role resolver maps to a role; requests without one act
//! as the public.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", luit_api::api_router(tracker.clone()))
//! ```

pub mod assignments;
pub mod dashboard;
pub mod error;
pub mod identity;
pub mod reports;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use luit_core::{
  Tracker,
  role::RoleResolver,
  store::{AssignmentStore, ReportStore},
};

pub use error::ApiError;
pub use identity::Identity;

/// Build a fully-materialised API router for `tracker`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, R>(tracker: Arc<Tracker<S, R>>) -> Router<()>
where
  S: ReportStore + AssignmentStore + 'static,
  R: RoleResolver + 'static,
{
  Router::new()
    // Reports
    .route("/reports", get(reports::list::<S, R>).post(reports::submit::<S, R>))
    .route("/reports/nearby", get(reports::nearby::<S, R>))
    .route("/reports/{id}", get(reports::get_one::<S, R>))
    .route("/reports/{id}/upvote", post(reports::upvote::<S, R>))
    .route("/reports/{id}/escalate", post(reports::escalate::<S, R>))
    .route("/reports/{id}/mark-clean", post(reports::mark_clean::<S, R>))
    .route("/reports/{id}/approve-clean", post(reports::approve_clean::<S, R>))
    .route("/reports/{id}/lab-findings", post(reports::lab_findings::<S, R>))
    // Assignments
    .route("/assignments", get(assignments::list::<S, R>))
    .route("/assignments/{id}", get(assignments::get_one::<S, R>))
    .route("/assignments/{id}/test-result", post(assignments::test_result::<S, R>))
    .route("/assignments/{id}/solution", post(assignments::solution::<S, R>))
    .route("/assignments/{id}/confirm-clean", post(assignments::confirm_clean::<S, R>))
    .route("/assignments/{id}/resolve", post(assignments::resolve::<S, R>))
    // Dashboards
    .route("/area-status", get(dashboard::area_status::<S, R>))
    .route("/queues/district", get(dashboard::district_queue::<S, R>))
    .route("/queues/lab", get(dashboard::lab_queue::<S, R>))
    .route("/solutions", get(dashboard::solutions::<S, R>))
    .route("/statistics", get(dashboard::statistics::<S, R>))
    .route("/hotspots", get(dashboard::hotspots::<S, R>))
    .with_state(tracker)
}
