//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use luit_core::error::{Error as CoreError, Guard};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("unauthorized: {0}")]
  Unauthorized(String),

  #[error(transparent)]
  Core(#[from] CoreError),
}

impl ApiError {
  fn status(&self) -> StatusCode {
    match self {
      Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
      Self::Core(e) => match e {
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::Forbidden { .. } => StatusCode::FORBIDDEN,
        CoreError::InvalidTransition { guard: Guard::Role { .. }, .. } => StatusCode::FORBIDDEN,
        CoreError::InvalidTransition { .. } | CoreError::Conflict { .. } => StatusCode::CONFLICT,
        CoreError::DependencyUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
      },
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      tracing::error!(error = %self, "request failed");
    }
    let guard = match &self {
      Self::Core(e) => e.guard(),
      Self::Unauthorized(_) => None,
    };
    let body = json!({ "error": self.to_string(), "guard": guard });
    (status, Json(body)).into_response()
  }
}
