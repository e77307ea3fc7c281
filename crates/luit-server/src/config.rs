//! Server configuration, deserialised from `config.toml` and `LUIT_*`
//! environment variables.
//!
//! ```toml
//! host       = "0.0.0.0"
//! port       = 8080
//! store_path = "~/.local/share/luit/luit.db"
//!
//! [engine]
//! quorum     = 5
//! escalation = "automatic"
//!
//! [[users]]
//! token_sha256 = "<output of --hash-token>"
//! role         = "phc"
//! district     = "Kamrup Metropolitan"
//!
//! [[localities]]
//! pin       = "781001"
//! latitude  = 26.1833
//! longitude = 91.7467
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use config::{Config, ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};
use luit_core::{
  config::EngineConfig,
  geo::Coordinates,
  locality::{LocalityKey, PinDirectory},
  role::Role,
};
use serde::Deserialize;

/// Runtime server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:       String,
  #[serde(default = "default_port")]
  pub port:       u16,
  #[serde(default = "default_store_path")]
  pub store_path: PathBuf,
  #[serde(default)]
  pub engine:     EngineConfig,
  /// Registered PHC and lab accounts.
  #[serde(default)]
  pub users:      Vec<UserEntry>,
  /// Known PIN centres, used to attribute reports submitted without a PIN.
  #[serde(default)]
  pub localities: Vec<LocalityEntry>,
}

/// A registered account. Only the SHA-256 of its bearer token is stored.
#[derive(Debug, Clone, Deserialize)]
pub struct UserEntry {
  pub token_sha256: String,
  pub role:         Role,
  #[serde(default)]
  pub district:     Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalityEntry {
  pub pin:       String,
  pub latitude:  f64,
  pub longitude: f64,
}

fn default_host() -> String { "127.0.0.1".into() }

fn default_port() -> u16 { 8080 }

fn default_store_path() -> PathBuf { PathBuf::from("luit.db") }

impl ServerConfig {
  /// Read `path` (if it exists) overlaid with `LUIT_*` environment variables.
  /// Nested keys use a double underscore, e.g. `LUIT_ENGINE__QUORUM=3`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let builder = Config::builder().add_source(File::from(path).required(false));
    Self::finish(builder, true)
  }

  /// Parse a TOML document without consulting the environment.
  pub fn from_toml(source: &str) -> anyhow::Result<Self> {
    let builder = Config::builder().add_source(File::from_str(source, FileFormat::Toml));
    Self::finish(builder, false)
  }

  fn finish(builder: ConfigBuilder<DefaultState>, with_env: bool) -> anyhow::Result<Self> {
    let builder = if with_env {
      builder.add_source(
        Environment::with_prefix("LUIT")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
    } else {
      builder
    };
    let cfg: Self = builder
      .build()
      .context("failed to read configuration")?
      .try_deserialize()
      .context("failed to deserialise ServerConfig")?;
    cfg.engine.validate().context("invalid [engine] settings")?;
    Ok(cfg)
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  /// `store_path` with a leading `~` expanded to the user's home directory.
  pub fn store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }

  /// Build the PIN directory from `[[localities]]`.
  pub fn directory(&self) -> anyhow::Result<PinDirectory> {
    self
      .localities
      .iter()
      .map(|entry| -> anyhow::Result<(LocalityKey, Coordinates)> {
        let key = LocalityKey::parse(&entry.pin)
          .with_context(|| format!("invalid locality PIN {:?}", entry.pin))?;
        let centre = Coordinates::new(entry.latitude, entry.longitude)
          .with_context(|| format!("invalid centre for PIN {}", entry.pin))?;
        Ok((key, centre))
      })
      .collect()
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
