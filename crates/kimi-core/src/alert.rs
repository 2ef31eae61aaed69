//! Alerts: persisted notifications for a caregiver.
//!
//! An alert is written once by the recorder. Afterwards the only mutation is
//! an acknowledgement (`acknowledged_at`); `message` and `metadata` never
//! change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result, evaluate::Violation, fix::PositionFix, subject::Subject,
};

// ─── Classification ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
  GeofenceBreach,
  LowBattery,
  AbnormalHeartRate,
  FallDetected,
}

impl AlertType {
  /// The string stored in the `alert_type` column.
  /// Must match the `rename_all = "snake_case"` serde tags above.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::GeofenceBreach => "geofence_breach",
      Self::LowBattery => "low_battery",
      Self::AbnormalHeartRate => "abnormal_heart_rate",
      Self::FallDetected => "fall_detected",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "geofence_breach" => Ok(Self::GeofenceBreach),
      "low_battery" => Ok(Self::LowBattery),
      "abnormal_heart_rate" => Ok(Self::AbnormalHeartRate),
      "fall_detected" => Ok(Self::FallDetected),
      other => Err(Error::UnknownAlertType(other.to_owned())),
    }
  }
}

/// Declaration order matters: `High` sorts above `Medium` above `Low`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Low,
  Medium,
  High,
}

impl Severity {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Low => "low",
      Self::Medium => "medium",
      Self::High => "high",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "low" => Ok(Self::Low),
      "medium" => Ok(Self::Medium),
      "high" => Ok(Self::High),
      other => Err(Error::UnknownSeverity(other.to_owned())),
    }
  }
}

// ─── Alert ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
  pub id:              Uuid,
  pub subject_id:      Uuid,
  pub caregiver_id:    Uuid,
  pub alert_type:      AlertType,
  pub severity:        Severity,
  pub message:         String,
  pub metadata:        serde_json::Value,
  /// Server-assigned.
  pub created_at:      DateTime<Utc>,
  pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Alert {
  pub fn is_acknowledged(&self) -> bool { self.acknowledged_at.is_some() }
}

/// An unacknowledged alert joined with the subject it concerns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAlert {
  #[serde(flatten)]
  pub alert:        Alert,
  pub subject_name: String,
  pub device_id:    String,
}

// ─── NewAlert ────────────────────────────────────────────────────────────────

/// Input to the store's alert insert. `id` and `created_at` are assigned by
/// the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlert {
  pub subject_id:   Uuid,
  pub caregiver_id: Uuid,
  pub alert_type:   AlertType,
  pub severity:     Severity,
  pub message:      String,
  pub metadata:     serde_json::Value,
}

/// Metadata attached to every `geofence_breach` alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceMetadata {
  pub safe_zone_id:         Uuid,
  pub safe_zone_name:       String,
  pub distance_from_center: f64,
  pub latitude:             f64,
  pub longitude:            f64,
}

impl NewAlert {
  /// A high-severity breach alert for `violation`, observed at `fix`.
  pub fn geofence_breach(
    subject: &Subject,
    fix: &PositionFix,
    violation: &Violation,
  ) -> Self {
    let metadata = GeofenceMetadata {
      safe_zone_id:         violation.safe_zone_id,
      safe_zone_name:       violation.name.clone(),
      distance_from_center: violation.distance_from_center_meters,
      latitude:             fix.position.latitude,
      longitude:            fix.position.longitude,
    };

    Self {
      subject_id:   subject.subject_id,
      caregiver_id: subject.caregiver_id,
      alert_type:   AlertType::GeofenceBreach,
      severity:     Severity::High,
      message:      format!("Left safe zone: {}", violation.name),
      metadata:     serde_json::to_value(metadata)
        .unwrap_or(serde_json::Value::Null),
    }
  }

  /// A medium-severity alert raised when the device battery drops below
  /// `threshold` percent.
  pub fn low_battery(
    subject: &Subject,
    fix: &PositionFix,
    level: u8,
    threshold: u8,
  ) -> Self {
    Self {
      subject_id:   subject.subject_id,
      caregiver_id: subject.caregiver_id,
      alert_type:   AlertType::LowBattery,
      severity:     Severity::Medium,
      message:      format!("Battery low: {level}%"),
      metadata:     serde_json::json!({
        "battery_level": level,
        "threshold":     threshold,
        "latitude":      fix.position.latitude,
        "longitude":     fix.position.longitude,
      }),
    }
  }
}
