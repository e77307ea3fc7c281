//! Caller roles and the `RoleResolver` boundary.
//!
//! The core never infers a role from request content. Every operation takes an
//! opaque identity token and asks the resolver who is calling.

use std::{collections::HashMap, fmt, future::Future, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result, store::StoreError};

/// The three actors of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  /// Public Health Centre: triages reports and marks areas clean.
  Phc,
  /// Testing laboratory: uploads results and certifies areas clean.
  Lab,
  /// Anyone else; may submit and upvote.
  Public,
}

impl Role {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Phc => "phc",
      Self::Lab => "lab",
      Self::Public => "public",
    }
  }
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Role {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "phc" => Ok(Self::Phc),
      "lab" => Ok(Self::Lab),
      "public" => Ok(Self::Public),
      _ => Err(Error::Validation(format!("unknown role: {s:?}"))),
    }
  }
}

/// A resolved caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
  pub role:     Role,
  /// The district a PHC or lab serves, as entered at registration.
  pub district: Option<String>,
}

impl Caller {
  pub fn public() -> Self { Self { role: Role::Public, district: None } }

  pub fn new(role: Role, district: impl Into<String>) -> Self {
    Self { role, district: Some(district.into()) }
  }

  /// The implicit PHC authority under which quorum escalation runs.
  pub(crate) fn system() -> Self { Self { role: Role::Phc, district: None } }
}

/// Maps an identity token to a [`Caller`].
///
/// Unknown identities should resolve to [`Caller::public`]; errors are
/// reserved for the resolver itself being unavailable.
pub trait RoleResolver: Send + Sync {
  fn resolve<'a>(
    &'a self,
    identity: &'a str,
  ) -> impl Future<Output = Result<Caller, StoreError>> + Send + 'a;
}

/// A fixed identity table, for tests and embedders that manage identities
/// themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticRoleResolver {
  callers: HashMap<String, Caller>,
}

impl StaticRoleResolver {
  pub fn new() -> Self { Self::default() }

  pub fn with(mut self, identity: impl Into<String>, caller: Caller) -> Self {
    self.callers.insert(identity.into(), caller);
    self
  }
}

impl RoleResolver for StaticRoleResolver {
  async fn resolve<'a>(&'a self, identity: &'a str) -> Result<Caller, StoreError> {
    Ok(self.callers.get(identity).cloned().unwrap_or_else(Caller::public))
  }
}
