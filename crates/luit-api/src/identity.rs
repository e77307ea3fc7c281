//! Bearer-token extractor.

use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};

use crate::error::ApiError;

/// The opaque identity a request carries, taken from
/// `Authorization: Bearer <token>`. Empty when the header is absent, which
/// the role resolver treats as a public caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity(pub String);

impl Identity {
  pub fn as_str(&self) -> &str { &self.0 }
}

/// Read the bearer token from `headers`.
pub fn bearer_token(headers: &HeaderMap) -> Result<Identity, ApiError> {
  let Some(value) = headers.get(header::AUTHORIZATION) else {
    return Ok(Identity::default());
  };
  let value = value
    .to_str()
    .map_err(|_| ApiError::Unauthorized("authorization header is not ASCII".into()))?;
  let token = value
    .strip_prefix("Bearer ")
    .ok_or_else(|| ApiError::Unauthorized("expected a bearer token".into()))?;
  Ok(Identity(token.trim().to_owned()))
}

impl<S> FromRequestParts<S> for Identity
where
  S: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    bearer_token(&parts.headers)
  }
}
