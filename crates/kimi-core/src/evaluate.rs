//! Geofence evaluator: membership of one point against a zone set.
//!
//! Stateless: continuity between fixes is the job of [`crate::breach`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  geo::{Coordinate, haversine_distance_meters},
  zone::SafeZone,
};

/// A zone that does not contain the evaluated point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
  pub safe_zone_id:                Uuid,
  pub name:                        String,
  pub distance_from_center_meters: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
  /// `true` iff at least one evaluable zone contains the point.
  pub is_in_any_safe_zone: bool,
  pub violated_zones:      Vec<Violation>,
  /// Ids of evaluable zones that contain the point.
  pub contained_zones:     Vec<Uuid>,
}

/// Evaluate `point` for `subject_id` against `zones`.
///
/// Zones belonging to another subject, inactive zones and zones with a
/// non-positive radius are ignored. With nothing left to evaluate the result
/// is "not in any safe zone" with no violations.
pub fn evaluate(
  subject_id: Uuid,
  point: Coordinate,
  zones: &[SafeZone],
) -> Evaluation {
  let mut evaluation = Evaluation::default();

  for zone in zones
    .iter()
    .filter(|z| z.subject_id == subject_id && z.is_evaluable())
  {
    let distance = haversine_distance_meters(point, zone.center);
    if distance <= zone.radius_meters {
      evaluation.is_in_any_safe_zone = true;
      evaluation.contained_zones.push(zone.id);
    } else {
      evaluation.violated_zones.push(Violation {
        safe_zone_id:                zone.id,
        name:                        zone.name.clone(),
        distance_from_center_meters: distance,
      });
    }
  }

  evaluation
}
