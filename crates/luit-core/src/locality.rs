//! Locality keys and the PIN directory.
//!
//! Reports are clustered by postal PIN code. The directory is an external
//! reference dataset consulted read-only: it supplies the centre of a PIN
//! (for an Assignment's fallback location) and the PIN covering a point (for
//! reports submitted without one).

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  geo::{Coordinates, haversine_km},
};

/// How far from a PIN centre [`PinDirectory::locate`] still attributes a point.
pub const LOCATE_RADIUS_KM: f64 = 10.0;

/// A normalized six-digit postal PIN used to group co-located reports.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct LocalityKey(String);

impl LocalityKey {
  /// Normalize a PIN: whitespace is dropped and exactly six ASCII digits must
  /// remain.
  pub fn parse(pin: &str) -> Result<Self> {
    let digits: String = pin.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
      return Err(Error::Validation(format!(
        "PIN code {pin:?} must be six digits"
      )));
    }
    Ok(Self(digits))
  }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for LocalityKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl TryFrom<String> for LocalityKey {
  type Error = Error;

  fn try_from(value: String) -> Result<Self> { Self::parse(&value) }
}

impl From<LocalityKey> for String {
  fn from(key: LocalityKey) -> Self { key.0 }
}

/// Normalize a district name into a stable identifier:
/// `"Kamrup Metropolitan"` becomes `"kamrup_metropolitan"`.
pub fn normalize_district_id(district: &str) -> String {
  let mut out = String::with_capacity(district.len());
  let mut pending_sep = false;
  for c in district.trim().chars().flat_map(char::to_lowercase) {
    if c.is_ascii_alphanumeric() {
      if pending_sep && !out.is_empty() {
        out.push('_');
      }
      pending_sep = false;
      out.push(c);
    } else {
      pending_sep = true;
    }
  }
  out
}

// ─── Directory ───────────────────────────────────────────────────────────────

/// Read-only PIN reference data.
pub trait LocalityDirectory: Send + Sync {
  /// The centre point of `key`, if known.
  fn centre(&self, key: &LocalityKey) -> Option<Coordinates>;

  /// The PIN whose area covers `point`, if any.
  fn locate(&self, point: Coordinates) -> Option<LocalityKey>;
}

/// A directory that knows nothing; reports must carry their own PIN.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDirectory;

impl LocalityDirectory for NoDirectory {
  fn centre(&self, _: &LocalityKey) -> Option<Coordinates> { None }

  fn locate(&self, _: Coordinates) -> Option<LocalityKey> { None }
}

/// An in-memory table of PIN centres. A point is attributed to the nearest
/// centre within [`LOCATE_RADIUS_KM`].
#[derive(Debug, Clone, Default)]
pub struct PinDirectory {
  centres: BTreeMap<LocalityKey, Coordinates>,
}

impl PinDirectory {
  pub fn new() -> Self { Self::default() }

  pub fn insert(&mut self, key: LocalityKey, centre: Coordinates) {
    self.centres.insert(key, centre);
  }

  pub fn len(&self) -> usize { self.centres.len() }

  pub fn is_empty(&self) -> bool { self.centres.is_empty() }
}

impl FromIterator<(LocalityKey, Coordinates)> for PinDirectory {
  fn from_iter<I: IntoIterator<Item = (LocalityKey, Coordinates)>>(iter: I) -> Self {
    Self { centres: iter.into_iter().collect() }
  }
}

impl LocalityDirectory for PinDirectory {
  fn centre(&self, key: &LocalityKey) -> Option<Coordinates> {
    self.centres.get(key).copied()
  }

  fn locate(&self, point: Coordinates) -> Option<LocalityKey> {
    self
      .centres
      .iter()
      .map(|(key, centre)| (key, haversine_km(point, *centre)))
      .filter(|(_, d)| *d <= LOCATE_RADIUS_KM)
      .min_by(|a, b| a.1.total_cmp(&b.1))
      .map(|(key, _)| key.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pin_normalization() {
    assert_eq!(LocalityKey::parse(" 781 001 ").unwrap().as_str(), "781001");
    assert!(LocalityKey::parse("78100").is_err());
    assert!(LocalityKey::parse("7810011").is_err());
    assert!(LocalityKey::parse("78100a").is_err());
  }

  #[test]
  fn pin_deserialization_validates() {
    let key: LocalityKey = serde_json::from_str("\"781001\"").unwrap();
    assert_eq!(key.as_str(), "781001");
    assert!(serde_json::from_str::<LocalityKey>("\"abc\"").is_err());
  }

  #[test]
  fn district_ids() {
    assert_eq!(normalize_district_id("Kamrup Metropolitan"), "kamrup_metropolitan");
    assert_eq!(
      normalize_district_id("  South Salmara-Mankachar "),
      "south_salmara_mankachar"
    );
    assert_eq!(normalize_district_id("--Dima  Hasao--"), "dima_hasao");
  }

  #[test]
  fn directory_locates_nearest_centre() {
    let dir: PinDirectory = [
      (LocalityKey::parse("781001").unwrap(), Coordinates::new(26.18, 91.75).unwrap()),
      (LocalityKey::parse("781005").unwrap(), Coordinates::new(26.14, 91.79).unwrap()),
    ]
    .into_iter()
    .collect();

    let near_first = Coordinates::new(26.181, 91.751).unwrap();
    assert_eq!(dir.locate(near_first).unwrap().as_str(), "781001");

    let far = Coordinates::new(27.5, 94.9).unwrap();
    assert!(dir.locate(far).is_none());
  }
}
