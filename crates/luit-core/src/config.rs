//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Who moves a report from `reported` to `escalated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationPolicy {
  /// Quorum on submission escalates the whole locality; later reports join
  /// the open Assignment as they arrive.
  #[default]
  Automatic,
  /// Submissions stay `reported` until a PHC escalates them.
  PhcConfirmed,
}

/// Tunables for the engines. Deserialised from the server's `[engine]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Reports needed in one locality before an Assignment is formed.
  pub quorum:           usize,
  /// Default radius for `nearby`.
  pub nearby_radius_km: f64,
  /// Default radius for `area_status`.
  pub area_radius_km:   f64,
  /// Upper bound on every store and resolver call.
  pub call_timeout_ms:  u64,
  pub escalation:       EscalationPolicy,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      quorum:           5,
      nearby_radius_km: 5.0,
      area_radius_km:   1.0,
      call_timeout_ms:  5_000,
      escalation:       EscalationPolicy::default(),
    }
  }
}

impl EngineConfig {
  pub fn validate(&self) -> Result<()> {
    if self.quorum == 0 {
      return Err(Error::Validation("quorum must be at least 1".into()));
    }
    for (name, radius) in [
      ("nearby_radius_km", self.nearby_radius_km),
      ("area_radius_km", self.area_radius_km),
    ] {
      check_radius(radius).map_err(|_| {
        Error::Validation(format!("{name} must be a positive number, got {radius}"))
      })?;
    }
    if self.call_timeout_ms == 0 {
      return Err(Error::Validation("call_timeout_ms must be positive".into()));
    }
    Ok(())
  }

  pub fn call_timeout(&self) -> Duration { Duration::from_millis(self.call_timeout_ms) }
}

/// Accept a search radius only if it is finite and strictly positive.
pub(crate) fn check_radius(radius_km: f64) -> Result<f64> {
  if radius_km.is_finite() && radius_km > 0.0 {
    Ok(radius_km)
  } else {
    Err(Error::Validation(format!("radius must be a positive number of km, got {radius_km}")))
  }
}
