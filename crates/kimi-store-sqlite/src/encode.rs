//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings with a fixed nine-digit fraction
//! and a `Z` suffix, so that lexicographic order in SQL matches time order.
//! UUIDs are stored as hyphenated lowercase strings. Alert metadata is compact
//! JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use kimi_core::{
  alert::{Alert, AlertType, PendingAlert, Severity},
  fix::PositionFix,
  geo::Coordinate,
  subject::Subject,
  zone::SafeZone,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Column lists ─────────────────────────────────────────────────────────────

pub const SUBJECT_COLUMNS: &str =
  "subject_id, caregiver_id, full_name, device_id, created_at";

pub const ZONE_COLUMNS: &str = "zone_id, subject_id, name, latitude, longitude, \
                                radius_meters, is_active, created_at, updated_at";

pub const FIX_COLUMNS: &str = "fix_id, subject_id, latitude, longitude, accuracy, \
                               battery_level, recorded_at";

pub const ALERT_COLUMNS: &str = "alert_id, subject_id, caregiver_id, alert_type, \
                                 severity, message, metadata, created_at, \
                                 acknowledged_at";

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `subjects` row.
pub struct RawSubject {
  pub subject_id:   String,
  pub caregiver_id: String,
  pub full_name:    String,
  pub device_id:    String,
  pub created_at:   String,
}

impl RawSubject {
  /// Read from a row selected with [`SUBJECT_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      subject_id:   row.get(0)?,
      caregiver_id: row.get(1)?,
      full_name:    row.get(2)?,
      device_id:    row.get(3)?,
      created_at:   row.get(4)?,
    })
  }

  pub fn into_subject(self) -> Result<Subject> {
    Ok(Subject {
      subject_id:   decode_uuid(&self.subject_id)?,
      caregiver_id: decode_uuid(&self.caregiver_id)?,
      full_name:    self.full_name,
      device_id:    self.device_id,
      created_at:   decode_dt(&self.created_at)?,
    })
  }
}

/// A `safe_zones` row.
pub struct RawZone {
  pub zone_id:       String,
  pub subject_id:    String,
  pub name:          String,
  pub latitude:      f64,
  pub longitude:     f64,
  pub radius_meters: f64,
  pub is_active:     bool,
  pub created_at:    String,
  pub updated_at:    String,
}

impl RawZone {
  /// Read from a row selected with [`ZONE_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      zone_id:       row.get(0)?,
      subject_id:    row.get(1)?,
      name:          row.get(2)?,
      latitude:      row.get(3)?,
      longitude:     row.get(4)?,
      radius_meters: row.get(5)?,
      is_active:     row.get(6)?,
      created_at:    row.get(7)?,
      updated_at:    row.get(8)?,
    })
  }

  pub fn into_zone(self) -> Result<SafeZone> {
    Ok(SafeZone {
      id:            decode_uuid(&self.zone_id)?,
      subject_id:    decode_uuid(&self.subject_id)?,
      name:          self.name,
      center:        Coordinate::new(self.latitude, self.longitude),
      radius_meters: self.radius_meters,
      is_active:     self.is_active,
      created_at:    decode_dt(&self.created_at)?,
      updated_at:    decode_dt(&self.updated_at)?,
    })
  }
}

/// A `position_fixes` row.
pub struct RawFix {
  pub fix_id:        String,
  pub subject_id:    String,
  pub latitude:      f64,
  pub longitude:     f64,
  pub accuracy:      Option<f64>,
  pub battery_level: Option<u8>,
  pub recorded_at:   String,
}

impl RawFix {
  /// Read from a row selected with [`FIX_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      fix_id:        row.get(0)?,
      subject_id:    row.get(1)?,
      latitude:      row.get(2)?,
      longitude:     row.get(3)?,
      accuracy:      row.get(4)?,
      battery_level: row.get(5)?,
      recorded_at:   row.get(6)?,
    })
  }

  pub fn into_fix(self) -> Result<PositionFix> {
    Ok(PositionFix {
      fix_id:        decode_uuid(&self.fix_id)?,
      subject_id:    decode_uuid(&self.subject_id)?,
      position:      Coordinate::new(self.latitude, self.longitude),
      accuracy:      self.accuracy,
      battery_level: self.battery_level,
      recorded_at:   decode_dt(&self.recorded_at)?,
    })
  }
}

/// An `alerts` row.
pub struct RawAlert {
  pub alert_id:        String,
  pub subject_id:      String,
  pub caregiver_id:    String,
  pub alert_type:      String,
  pub severity:        String,
  pub message:         String,
  pub metadata:        String,
  pub created_at:      String,
  pub acknowledged_at: Option<String>,
}

impl RawAlert {
  /// Read from a row selected with [`ALERT_COLUMNS`], starting at column
  /// `offset`.
  pub fn from_row(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Self> {
    Ok(Self {
      alert_id:        row.get(offset)?,
      subject_id:      row.get(offset + 1)?,
      caregiver_id:    row.get(offset + 2)?,
      alert_type:      row.get(offset + 3)?,
      severity:        row.get(offset + 4)?,
      message:         row.get(offset + 5)?,
      metadata:        row.get(offset + 6)?,
      created_at:      row.get(offset + 7)?,
      acknowledged_at: row.get(offset + 8)?,
    })
  }

  pub fn into_alert(self) -> Result<Alert> {
    Ok(Alert {
      id:              decode_uuid(&self.alert_id)?,
      subject_id:      decode_uuid(&self.subject_id)?,
      caregiver_id:    decode_uuid(&self.caregiver_id)?,
      alert_type:      AlertType::parse(&self.alert_type)?,
      severity:        Severity::parse(&self.severity)?,
      message:         self.message,
      metadata:        serde_json::from_str(&self.metadata)?,
      created_at:      decode_dt(&self.created_at)?,
      acknowledged_at: self
        .acknowledged_at
        .as_deref()
        .map(decode_dt)
        .transpose()?,
    })
  }
}

/// An `alerts` row joined with the subject's name and device.
pub struct RawPendingAlert {
  pub alert:        RawAlert,
  pub subject_name: String,
  pub device_id:    String,
}

impl RawPendingAlert {
  pub fn into_pending(self) -> Result<PendingAlert> {
    Ok(PendingAlert {
      alert:        self.alert.into_alert()?,
      subject_name: self.subject_name,
      device_id:    self.device_id,
    })
  }
}
