//! Bearer-token role resolution backed by the `[[users]]` table.

use std::collections::HashMap;

use anyhow::bail;
use luit_core::{
  role::{Caller, Role, RoleResolver},
  store::StoreError,
};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::UserEntry;

/// Lowercase hex SHA-256 of `token`, as stored in `token_sha256`.
pub fn hash_token(token: &str) -> String { hex::encode(Sha256::digest(token.as_bytes())) }

/// Resolves a bearer token by the hash of its value. Unknown and empty
/// tokens resolve to the public role.
#[derive(Debug, Clone, Default)]
pub struct TokenRoleResolver {
  callers: HashMap<String, Caller>,
}

impl TokenRoleResolver {
  pub fn from_users(users: &[UserEntry]) -> anyhow::Result<Self> {
    let mut callers = HashMap::with_capacity(users.len());
    for user in users {
      let digest = user.token_sha256.trim().to_ascii_lowercase();
      if digest.len() != 64 || hex::decode(&digest).is_err() {
        bail!("token_sha256 {:?} is not a hex SHA-256 digest", user.token_sha256);
      }
      let district = user.district.clone().filter(|d| !d.trim().is_empty());
      if user.role == Role::Phc && district.is_none() {
        warn!(token = %&digest[..8], "PHC account has no district; its queue will be empty");
      }
      if callers.insert(digest, Caller { role: user.role, district }).is_some() {
        bail!("token_sha256 {:?} is listed twice", user.token_sha256);
      }
    }
    Ok(Self { callers })
  }

  pub fn len(&self) -> usize { self.callers.len() }

  pub fn is_empty(&self) -> bool { self.callers.is_empty() }
}

impl RoleResolver for TokenRoleResolver {
  async fn resolve<'a>(&'a self, identity: &'a str) -> Result<Caller, StoreError> {
    if identity.is_empty() {
      return Ok(Caller::public());
    }
    Ok(self.callers.get(&hash_token(identity)).cloned().unwrap_or_else(Caller::public))
  }
}
