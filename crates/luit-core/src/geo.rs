//! Great-circle distance and bounding-box containment on a spherical Earth.
//!
//! Pure functions only. Distances use the haversine form, which stays accurate
//! over the multi-kilometre ranges reports are queried at; the bounding box is
//! a cheap conservative prefilter and never replaces the distance check.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS-84 latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
  pub latitude:  f64,
  pub longitude: f64,
}

impl Coordinates {
  /// Validated constructor; rejects non-finite or out-of-range values.
  pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
      return Err(Error::Validation(format!(
        "latitude {latitude} outside [-90, 90]"
      )));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
      return Err(Error::Validation(format!(
        "longitude {longitude} outside [-180, 180]"
      )));
    }
    Ok(Self { latitude, longitude })
  }
}

/// Haversine great-circle distance between `a` and `b` in kilometres.
///
/// The intermediate term is clamped to `[0, 1]` so rounding near antipodal
/// points or the poles cannot push `asin` out of its domain. The longitude
/// difference enters only through `sin²(Δλ/2)`, which is periodic, so pairs
/// straddling the ±180° seam need no special casing.
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
  let lat1 = a.latitude.to_radians();
  let lat2 = b.latitude.to_radians();
  let d_lat = lat2 - lat1;
  let d_lon = (b.longitude - a.longitude).to_radians();

  let h = (d_lat / 2.0).sin().powi(2)
    + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

  2.0 * EARTH_RADIUS_KM * h.clamp(0.0, 1.0).sqrt().asin()
}

/// Wrap a longitude into `[-180, 180)`.
fn wrap_longitude(longitude: f64) -> f64 {
  (longitude + 180.0).rem_euclid(360.0) - 180.0
}

// ─── BoundingBox ─────────────────────────────────────────────────────────────

/// A latitude/longitude rectangle. When `west > east` the box crosses the
/// antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub south: f64,
  pub west:  f64,
  pub north: f64,
  pub east:  f64,
}

impl BoundingBox {
  /// The whole globe.
  pub const WORLD: Self = Self {
    south: -90.0,
    west:  -180.0,
    north: 90.0,
    east:  180.0,
  };

  /// The smallest box enclosing the spherical cap of `radius_km` around
  /// `centre`. Caps touching a pole span every longitude.
  pub fn around(centre: Coordinates, radius_km: f64) -> Self {
    let angular = radius_km / EARTH_RADIUS_KM;
    if angular >= std::f64::consts::PI {
      return Self::WORLD;
    }

    let d_lat = angular.to_degrees();
    let south = centre.latitude - d_lat;
    let north = centre.latitude + d_lat;
    if south <= -90.0 || north >= 90.0 {
      return Self {
        south: south.max(-90.0),
        west:  -180.0,
        north: north.min(90.0),
        east:  180.0,
      };
    }

    // Maximum longitude offset of a cap: asin(sin δ / cos φ).
    let ratio = angular.sin() / centre.latitude.to_radians().cos();
    if ratio >= 1.0 {
      return Self { south, west: -180.0, north, east: 180.0 };
    }
    let d_lon = ratio.asin().to_degrees();

    Self {
      south,
      west: wrap_longitude(centre.longitude - d_lon),
      north,
      east: wrap_longitude(centre.longitude + d_lon),
    }
  }

  /// Whether `point` lies inside the box (edges inclusive).
  pub fn contains(&self, point: Coordinates) -> bool {
    if point.latitude < self.south || point.latitude > self.north {
      return false;
    }
    if self.west <= -180.0 && self.east >= 180.0 {
      return true;
    }

    let lon = if point.longitude >= 180.0 {
      wrap_longitude(point.longitude)
    } else {
      point.longitude
    };
    if self.west <= self.east {
      (self.west..=self.east).contains(&lon)
    } else {
      lon >= self.west || lon <= self.east
    }
  }
}
