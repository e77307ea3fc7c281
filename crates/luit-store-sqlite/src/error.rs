//! Error type for `luit-store-sqlite`.

use luit_core::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored value no longer decodes into its domain type.
  #[error("decode error in column `{column}`: {reason}")]
  Decode { column: &'static str, reason: String },
}

impl Error {
  pub(crate) fn decode(column: &'static str, reason: impl ToString) -> Self {
    Self::Decode { column, reason: reason.to_string() }
  }

  /// Whether SQLite rejected the write on a PRIMARY KEY, UNIQUE or CHECK
  /// constraint.
  pub fn is_constraint_violation(&self) -> bool {
    matches!(
      self,
      Self::Database(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(failure, _)))
        if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
  }
}

impl From<Error> for StoreError {
  fn from(e: Error) -> Self {
    if e.is_constraint_violation() {
      StoreError::Conflict
    } else {
      StoreError::unavailable(e)
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
