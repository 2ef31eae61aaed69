//! Safe zones: caregiver-defined circular geofences.
//!
//! Zones are reference data owned by the caregiver. The evaluator always
//! reads the latest committed set; it never holds on to a copy between fixes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ValidationError, geo::Coordinate};

/// Smallest radius a caregiver may configure.
pub const MIN_RADIUS_METERS: f64 = 10.0;
/// Largest radius a caregiver may configure.
pub const MAX_RADIUS_METERS: f64 = 5_000.0;

// ─── SafeZone ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeZone {
  pub id:            Uuid,
  pub subject_id:    Uuid,
  pub name:          String,
  pub center:        Coordinate,
  pub radius_meters: f64,
  /// Inactive zones are kept for the caregiver but never evaluated.
  pub is_active:     bool,
  pub created_at:    DateTime<Utc>,
  pub updated_at:    DateTime<Utc>,
}

impl SafeZone {
  /// Whether this zone can take part in evaluation at all. A zone with a
  /// non-positive radius should never have been stored, but if one shows up
  /// it is ignored rather than treated as an error.
  pub fn is_evaluable(&self) -> bool {
    self.is_active && self.radius_meters.is_finite() && self.radius_meters > 0.0
  }
}

// ─── NewSafeZone ─────────────────────────────────────────────────────────────

/// Input to [`crate::store::MonitorStore::create_zone`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSafeZone {
  pub subject_id:    Uuid,
  pub name:          String,
  pub center:        Coordinate,
  pub radius_meters: f64,
  #[serde(default = "default_active")]
  pub is_active:     bool,
}

fn default_active() -> bool { true }

impl NewSafeZone {
  pub fn new(
    subject_id: Uuid,
    name: impl Into<String>,
    center: Coordinate,
    radius_meters: f64,
  ) -> Self {
    Self {
      subject_id,
      name: name.into(),
      center,
      radius_meters,
      is_active: true,
    }
  }

  pub fn validate(&self) -> Result<(), ValidationError> {
    validate_definition(&self.name, self.center, self.radius_meters)
  }
}

// ─── SafeZonePatch ───────────────────────────────────────────────────────────

/// A partial edit. Absent fields are left unchanged; the merged result is
/// validated as a whole.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafeZonePatch {
  pub name:          Option<String>,
  pub center:        Option<Coordinate>,
  pub radius_meters: Option<f64>,
  pub is_active:     Option<bool>,
}

impl SafeZonePatch {
  /// Apply the patch to `zone`, stamping `updated_at`. Fails without touching
  /// `zone` if the merged definition is invalid.
  pub fn apply(
    self,
    zone: &mut SafeZone,
    now: DateTime<Utc>,
  ) -> Result<(), ValidationError> {
    let name = self.name.unwrap_or_else(|| zone.name.clone());
    let center = self.center.unwrap_or(zone.center);
    let radius = self.radius_meters.unwrap_or(zone.radius_meters);
    validate_definition(&name, center, radius)?;

    zone.name = name.trim().to_owned();
    zone.center = center;
    zone.radius_meters = radius;
    if let Some(active) = self.is_active {
      zone.is_active = active;
    }
    zone.updated_at = now;
    Ok(())
  }
}

fn validate_definition(
  name: &str,
  center: Coordinate,
  radius_meters: f64,
) -> Result<(), ValidationError> {
  if name.trim().is_empty() {
    return Err(ValidationError::EmptyName);
  }
  center.validate()?;
  if !(MIN_RADIUS_METERS..=MAX_RADIUS_METERS).contains(&radius_meters) {
    return Err(ValidationError::RadiusOutOfRange(radius_meters));
  }
  Ok(())
}
