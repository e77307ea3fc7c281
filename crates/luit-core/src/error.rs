//! Error types for `luit-core`.
//!
//! Every failure surfaced by the engines is one of five kinds: a missing
//! record, a rejected transition, a lost optimistic-concurrency race, an
//! unavailable dependency, or malformed input. Rejected transitions carry a
//! [`Guard`] so callers can explain *why* an event was refused.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::role::Role;

/// Boxed source error from a dependency (store, resolver, timer).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The kind of record an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
  Report,
  Assignment,
}

impl fmt::Display for Entity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Report => "report",
      Self::Assignment => "assignment",
    })
  }
}

// ─── Guards ──────────────────────────────────────────────────────────────────

/// The guard that rejected an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Guard {
  /// The caller holds the wrong role.
  Role { required: Role, actual: Role },
  /// The record is not in a state that accepts the event.
  State { expected: String, actual: String },
  /// A field the event depends on has not been set.
  MissingField { field: &'static str },
  /// A cross-record precondition does not hold.
  Precondition { reason: String },
}

impl fmt::Display for Guard {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Role { required, actual } => {
        write!(f, "requires role {required}, caller is {actual}")
      }
      Self::State { expected, actual } => {
        write!(f, "expected state {expected}, found {actual}")
      }
      Self::MissingField { field } => write!(f, "missing required field `{field}`"),
      Self::Precondition { reason } => f.write_str(reason),
    }
  }
}

// ─── Error ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum Error {
  #[error("{entity} not found: {key}")]
  NotFound { entity: Entity, key: String },

  #[error("cannot apply `{event}` to {entity} {key}: {guard}")]
  InvalidTransition {
    entity: Entity,
    key:    String,
    event:  &'static str,
    guard:  Guard,
  },

  #[error("concurrent write on {entity} {key}; re-read and retry")]
  Conflict { entity: Entity, key: String },

  #[error("{op} on {key}: dependency unavailable: {source}")]
  DependencyUnavailable {
    op:     &'static str,
    key:    String,
    #[source]
    source: BoxError,
  },

  #[error("{action} is not available to {role} callers")]
  Forbidden { action: &'static str, role: Role },

  #[error("validation error: {0}")]
  Validation(String),
}

impl Error {
  pub(crate) fn invalid(
    entity: Entity,
    key: impl ToString,
    event: &'static str,
    guard: Guard,
  ) -> Self {
    Self::InvalidTransition { entity, key: key.to_string(), event, guard }
  }

  pub(crate) fn conflict(entity: Entity, key: impl ToString) -> Self {
    Self::Conflict { entity, key: key.to_string() }
  }

  /// The rejecting guard, if this is an [`Error::InvalidTransition`].
  pub fn guard(&self) -> Option<&Guard> {
    match self {
      Self::InvalidTransition { guard, .. } => Some(guard),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
