//! HTTP server wiring for Luit: configuration, token-based role resolution
//! and the top-level router.

pub mod config;
pub mod tokens;

use std::sync::Arc;

use anyhow::Context as _;
use axum::{Router, routing::get};
use luit_core::Tracker;
use luit_store_sqlite::SqliteStore;
use tower_http::trace::TraceLayer;

pub use config::ServerConfig;
pub use tokens::TokenRoleResolver;

pub type AppTracker = Tracker<SqliteStore, TokenRoleResolver>;

/// Assemble a tracker over `store` from the configured engine settings,
/// accounts and PIN directory.
pub fn tracker(cfg: &ServerConfig, store: SqliteStore) -> anyhow::Result<AppTracker> {
  let roles = TokenRoleResolver::from_users(&cfg.users).context("invalid [[users]] entry")?;
  let directory = cfg.directory()?;
  tracing::info!(
    users = roles.len(),
    localities = directory.len(),
    quorum = cfg.engine.quorum,
    "engine configured"
  );
  let tracker = Tracker::new(store, roles, cfg.engine.clone())
    .context("invalid [engine] settings")?
    .with_directory(Arc::new(directory));
  Ok(tracker)
}

/// The full application: the JSON API under `/api` plus a liveness check.
pub fn router(tracker: Arc<AppTracker>) -> Router {
  Router::new()
    .route("/health", get(|| async { "ok" }))
    .nest("/api", luit_api::api_router(tracker))
    .layer(TraceLayer::new_for_http())
}
