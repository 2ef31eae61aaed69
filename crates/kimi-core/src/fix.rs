//! Position fixes: timestamped GPS readings reported by a subject's device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Coordinate;

/// An immutable location report. Fixes are ordered by `recorded_at` (device
/// time), never by arrival time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
  pub fix_id:        Uuid,
  pub subject_id:    Uuid,
  pub position:      Coordinate,
  /// Horizontal accuracy in meters, when the device reports it.
  pub accuracy:      Option<f64>,
  /// Battery percentage, 0-100.
  pub battery_level: Option<u8>,
  pub recorded_at:   DateTime<Utc>,
}

/// Input to [`crate::store::MonitorStore::record_fix`]. The store assigns
/// `fix_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPositionFix {
  pub subject_id:    Uuid,
  pub position:      Coordinate,
  pub accuracy:      Option<f64>,
  pub battery_level: Option<u8>,
  pub recorded_at:   DateTime<Utc>,
}

impl NewPositionFix {
  pub fn new(
    subject_id: Uuid,
    position: Coordinate,
    recorded_at: DateTime<Utc>,
  ) -> Self {
    Self {
      subject_id,
      position,
      accuracy: None,
      battery_level: None,
      recorded_at,
    }
  }
}
