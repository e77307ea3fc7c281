//! `Tracker`: the explicitly constructed root that the engines hang off.
//!
//! A tracker owns its store, role resolver, clock and locality directory. It
//! holds no process-wide state; construct as many as needed.

use std::{future::Future, sync::Arc};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::{
  Error, Result,
  aggregation::AggregationEngine,
  clock::{Clock, SystemClock},
  config::EngineConfig,
  lifecycle::LifecycleEngine,
  listings::Listings,
  locality::{LocalityDirectory, NoDirectory},
  proximity::ProximityIndex,
  role::{Caller, RoleResolver},
  store::{AssignmentStore, ReportStore, StoreError},
};

pub struct Tracker<S, R> {
  pub(crate) store:     S,
  pub(crate) roles:     R,
  pub(crate) clock:     Arc<dyn Clock>,
  pub(crate) directory: Arc<dyn LocalityDirectory>,
  pub(crate) config:    EngineConfig,
}

impl<S, R> Tracker<S, R>
where
  S: ReportStore + AssignmentStore,
  R: RoleResolver,
{
  /// Build a tracker with the system clock and no locality directory.
  /// Fails if `config` does not validate.
  pub fn new(store: S, roles: R, config: EngineConfig) -> Result<Self> {
    config.validate()?;
    Ok(Self {
      store,
      roles,
      clock: Arc::new(SystemClock),
      directory: Arc::new(NoDirectory),
      config,
    })
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn with_directory(mut self, directory: Arc<dyn LocalityDirectory>) -> Self {
    self.directory = directory;
    self
  }

  pub fn config(&self) -> &EngineConfig { &self.config }

  pub fn store(&self) -> &S { &self.store }

  // ── Engines ───────────────────────────────────────────────────────────

  pub fn lifecycle(&self) -> LifecycleEngine<'_, S, R> { LifecycleEngine { tracker: self } }

  pub fn aggregation(&self) -> AggregationEngine<'_, S, R> {
    AggregationEngine { tracker: self }
  }

  pub fn proximity(&self) -> ProximityIndex<'_, S, R> { ProximityIndex { tracker: self } }

  pub fn listings(&self) -> Listings<'_, S, R> { Listings { tracker: self } }

  // ── Shared plumbing ───────────────────────────────────────────────────

  pub(crate) fn now(&self) -> DateTime<Utc> { self.clock.now() }

  /// Run a dependency call under the configured timeout. An elapsed timer is
  /// reported as the dependency being unavailable.
  pub(crate) async fn call<T, F>(&self, fut: F) -> Result<T, StoreError>
  where
    F: Future<Output = Result<T, StoreError>>,
  {
    match tokio::time::timeout(self.config.call_timeout(), fut).await {
      Ok(result) => result,
      Err(elapsed) => Err(StoreError::unavailable(elapsed)),
    }
  }

  /// Ask the resolver who `identity` is.
  pub async fn resolve_caller(&self, identity: &str) -> Result<Caller> {
    self.call(self.roles.resolve(identity)).await.map_err(|e| {
      let source = match e {
        StoreError::Unavailable(source) => source,
        other => other.into(),
      };
      warn!(error = %source, "role resolver unavailable");
      Error::DependencyUnavailable { op: "resolve_role", key: "caller".into(), source }
    })
  }
}
