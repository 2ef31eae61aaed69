//! Geometry engine: great-circle distance and circle membership.
//!
//! Everything here is pure and synchronous. Inputs are not range-checked;
//! callers validate coordinates with [`Coordinate::validate`] first.

use serde::{Deserialize, Serialize};

use crate::{ValidationError, zone::SafeZone};

/// Mean earth radius used by the spherical approximation.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A WGS-84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
  pub latitude:  f64,
  pub longitude: f64,
}

impl Coordinate {
  pub fn new(latitude: f64, longitude: f64) -> Self {
    Self { latitude, longitude }
  }

  /// Reject non-finite values and anything outside `[-90, 90]` /
  /// `[-180, 180]`.
  pub fn validate(&self) -> Result<(), ValidationError> {
    if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
      return Err(ValidationError::LatitudeOutOfRange(self.latitude));
    }
    if !self.longitude.is_finite()
      || !(-180.0..=180.0).contains(&self.longitude)
    {
      return Err(ValidationError::LongitudeOutOfRange(self.longitude));
    }
    Ok(())
  }
}

/// Haversine distance between `a` and `b` in meters. NaN in, NaN out.
pub fn haversine_distance_meters(a: Coordinate, b: Coordinate) -> f64 {
  let phi_a = a.latitude.to_radians();
  let phi_b = b.latitude.to_radians();
  let d_phi = (b.latitude - a.latitude).to_radians();
  let d_lambda = (b.longitude - a.longitude).to_radians();

  let h = (d_phi / 2.0).sin().powi(2)
    + phi_a.cos() * phi_b.cos() * (d_lambda / 2.0).sin().powi(2);

  // Rounding can push `h` a hair past 1 for antipodal points.
  2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// `true` when `point` lies within `zone`; the boundary counts as inside.
pub fn is_within_zone(point: Coordinate, zone: &SafeZone) -> bool {
  haversine_distance_meters(point, zone.center) <= zone.radius_meters
}

#[cfg(test)]
pub(crate) mod tests {
  use chrono::Utc;
  use uuid::Uuid;

  use super::*;

  /// A point `meters` due north of `origin`.
  pub(crate) fn north_of(origin: Coordinate, meters: f64) -> Coordinate {
    Coordinate::new(
      origin.latitude + (meters / EARTH_RADIUS_METERS).to_degrees(),
      origin.longitude,
    )
  }

  pub(crate) fn zone_at(center: Coordinate, radius_meters: f64) -> SafeZone {
    SafeZone {
      id: Uuid::new_v4(),
      subject_id: Uuid::new_v4(),
      name: "Home".into(),
      center,
      radius_meters,
      is_active: true,
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  const LISBON: Coordinate = Coordinate {
    latitude:  38.7223,
    longitude: -9.1393,
  };

  #[test]
  fn distance_to_self_is_zero() {
    for c in [LISBON, Coordinate::new(0.0, 0.0), Coordinate::new(-89.9, 179.9)] {
      assert_eq!(haversine_distance_meters(c, c), 0.0);
    }
  }

  #[test]
  fn distance_is_symmetric() {
    let pairs = [
      (LISBON, Coordinate::new(41.1579, -8.6291)),
      (Coordinate::new(-33.86, 151.2), Coordinate::new(51.5, -0.12)),
      (Coordinate::new(0.0, 179.5), Coordinate::new(0.0, -179.5)),
    ];
    for (a, b) in pairs {
      assert_eq!(haversine_distance_meters(a, b), haversine_distance_meters(b, a));
    }
  }

  #[test]
  fn lisbon_to_porto_is_roughly_274_km() {
    let d = haversine_distance_meters(LISBON, Coordinate::new(41.1579, -8.6291));
    assert!((d - 274_000.0).abs() < 2_000.0, "distance was {d}");
  }

  #[test]
  fn nan_propagates() {
    let d = haversine_distance_meters(Coordinate::new(f64::NAN, 0.0), LISBON);
    assert!(d.is_nan());
  }

  #[test]
  fn center_is_within_zone() {
    assert!(is_within_zone(LISBON, &zone_at(LISBON, 500.0)));
  }

  #[test]
  fn boundary_is_inclusive() {
    let zone = zone_at(LISBON, 500.0);
    assert!(is_within_zone(north_of(LISBON, 499.999), &zone));
    assert!(!is_within_zone(north_of(LISBON, 500.1), &zone));

    // A zone whose radius is exactly the measured distance contains the point.
    let point = north_of(LISBON, 500.0);
    let exact = zone_at(LISBON, haversine_distance_meters(point, LISBON));
    assert!(is_within_zone(point, &exact));
  }

  #[test]
  fn validate_rejects_out_of_range() {
    assert!(LISBON.validate().is_ok());
    assert!(Coordinate::new(90.0, 180.0).validate().is_ok());
    assert_eq!(
      Coordinate::new(90.5, 0.0).validate(),
      Err(ValidationError::LatitudeOutOfRange(90.5))
    );
    assert_eq!(
      Coordinate::new(0.0, -180.5).validate(),
      Err(ValidationError::LongitudeOutOfRange(-180.5))
    );
    assert!(Coordinate::new(f64::NAN, 0.0).validate().is_err());
    assert!(Coordinate::new(0.0, f64::INFINITY).validate().is_err());
  }
}
