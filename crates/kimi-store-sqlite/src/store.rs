//! [`SqliteStore`]: the SQLite implementation of [`MonitorStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use kimi_core::{
  alert::{Alert, NewAlert, PendingAlert},
  breach::{BreachKey, BreachTable},
  fix::{NewPositionFix, PositionFix},
  store::MonitorStore,
  subject::{NewSubject, Subject},
  zone::{NewSafeZone, SafeZone, SafeZonePatch},
};

use crate::{
  Error, Result,
  encode::{
    ALERT_COLUMNS, FIX_COLUMNS, RawAlert, RawFix, RawPendingAlert, RawSubject,
    RawZone, SUBJECT_COLUMNS, ZONE_COLUMNS, encode_dt, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A monitor store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store: useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn ensure_subject(&self, subject_id: Uuid) -> Result<()> {
    let id_str = encode_uuid(subject_id);
    let exists: bool = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM subjects WHERE subject_id = ?1",
              rusqlite::params![id_str],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;

    if exists { Ok(()) } else { Err(Error::SubjectNotFound(subject_id)) }
  }

  /// Write every mutable column of `zone` back to its row. With
  /// `reset_breach` the zone's breach flag is dropped in the same
  /// transaction.
  async fn write_zone(&self, zone: &SafeZone, reset_breach: bool) -> Result<()> {
    let id_str     = encode_uuid(zone.id);
    let key_str    = BreachKey::Zone(zone.id).to_string();
    let name       = zone.name.clone();
    let latitude   = zone.center.latitude;
    let longitude  = zone.center.longitude;
    let radius     = zone.radius_meters;
    let is_active  = zone.is_active;
    let updated_at = encode_dt(zone.updated_at);

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "UPDATE safe_zones
              SET name = ?2, latitude = ?3, longitude = ?4,
                  radius_meters = ?5, is_active = ?6, updated_at = ?7
            WHERE zone_id = ?1",
          rusqlite::params![
            id_str, name, latitude, longitude, radius, is_active, updated_at
          ],
        )?;
        if reset_breach {
          tx.execute(
            "DELETE FROM breach_state WHERE breach_key = ?1",
            rusqlite::params![key_str],
          )?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

/// Build the alert row for `input` with a fresh id and timestamp.
fn new_alert(input: NewAlert) -> Alert {
  Alert {
    id:              Uuid::new_v4(),
    subject_id:      input.subject_id,
    caregiver_id:    input.caregiver_id,
    alert_type:      input.alert_type,
    severity:        input.severity,
    message:         input.message,
    metadata:        input.metadata,
    created_at:      Utc::now(),
    acknowledged_at: None,
  }
}

fn insert_alert_row(conn: &rusqlite::Connection, alert: &Alert) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO alerts (
       alert_id, subject_id, caregiver_id, alert_type, severity,
       message, metadata, created_at, acknowledged_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)",
    rusqlite::params![
      encode_uuid(alert.id),
      encode_uuid(alert.subject_id),
      encode_uuid(alert.caregiver_id),
      alert.alert_type.as_str(),
      alert.severity.as_str(),
      alert.message,
      alert.metadata.to_string(),
      encode_dt(alert.created_at),
    ],
  )?;
  Ok(())
}

// ─── MonitorStore impl ───────────────────────────────────────────────────────

impl MonitorStore for SqliteStore {
  type Error = Error;

  // ── Subjects ──────────────────────────────────────────────────────────────

  async fn add_subject(&self, input: NewSubject) -> Result<Subject> {
    let subject = Subject {
      subject_id:   Uuid::new_v4(),
      caregiver_id: input.caregiver_id,
      full_name:    input.full_name,
      device_id:    input.device_id,
      created_at:   Utc::now(),
    };

    let id_str        = encode_uuid(subject.subject_id);
    let caregiver_str = encode_uuid(subject.caregiver_id);
    let name          = subject.full_name.clone();
    let device        = subject.device_id.clone();
    let at_str        = encode_dt(subject.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO subjects (subject_id, caregiver_id, full_name, device_id, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![id_str, caregiver_str, name, device, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(subject)
  }

  async fn get_subject(&self, id: Uuid) -> Result<Option<Subject>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawSubject> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {SUBJECT_COLUMNS} FROM subjects WHERE subject_id = ?1"),
              rusqlite::params![id_str],
              RawSubject::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSubject::into_subject).transpose()
  }

  async fn list_subjects(&self) -> Result<Vec<Subject>> {
    let raws: Vec<RawSubject> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {SUBJECT_COLUMNS} FROM subjects ORDER BY created_at"
        ))?;
        let rows = stmt
          .query_map([], RawSubject::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSubject::into_subject).collect()
  }

  // ── Safe zones ────────────────────────────────────────────────────────────

  async fn create_zone(&self, input: NewSafeZone) -> Result<SafeZone> {
    input.validate()?;
    self.ensure_subject(input.subject_id).await?;

    let now = Utc::now();
    let zone = SafeZone {
      id:            Uuid::new_v4(),
      subject_id:    input.subject_id,
      name:          input.name.trim().to_owned(),
      center:        input.center,
      radius_meters: input.radius_meters,
      is_active:     input.is_active,
      created_at:    now,
      updated_at:    now,
    };

    let id_str      = encode_uuid(zone.id);
    let subject_str = encode_uuid(zone.subject_id);
    let name        = zone.name.clone();
    let latitude    = zone.center.latitude;
    let longitude   = zone.center.longitude;
    let radius      = zone.radius_meters;
    let is_active   = zone.is_active;
    let at_str      = encode_dt(now);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO safe_zones (
             zone_id, subject_id, name, latitude, longitude,
             radius_meters, is_active, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
          rusqlite::params![
            id_str, subject_str, name, latitude, longitude, radius, is_active,
            at_str
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(zone)
  }

  async fn get_zone(&self, id: Uuid) -> Result<Option<SafeZone>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawZone> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {ZONE_COLUMNS} FROM safe_zones WHERE zone_id = ?1"),
              rusqlite::params![id_str],
              RawZone::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawZone::into_zone).transpose()
  }

  async fn list_zones(
    &self,
    subject_id:       Uuid,
    include_inactive: bool,
  ) -> Result<Vec<SafeZone>> {
    let subject_str = encode_uuid(subject_id);

    let raws: Vec<RawZone> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ZONE_COLUMNS} FROM safe_zones
            WHERE subject_id = ?1 AND (?2 OR is_active = 1)
            ORDER BY created_at"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![subject_str, include_inactive],
            RawZone::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawZone::into_zone).collect()
  }

  async fn update_zone(&self, id: Uuid, patch: SafeZonePatch) -> Result<SafeZone> {
    let mut zone = self.get_zone(id).await?.ok_or(Error::ZoneNotFound(id))?;
    let was_active = zone.is_active;
    patch.apply(&mut zone, Utc::now())?;
    // An inactive zone is never evaluated, so its flag could not be re-armed
    // by a fix inside it. Toggling the zone starts it from a clear flag.
    self.write_zone(&zone, zone.is_active != was_active).await?;
    Ok(zone)
  }

  async fn delete_zone(&self, id: Uuid) -> Result<()> {
    let id_str  = encode_uuid(id);
    let key_str = BreachKey::Zone(id).to_string();

    let deleted: usize = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let n = tx.execute(
          "DELETE FROM safe_zones WHERE zone_id = ?1",
          rusqlite::params![id_str],
        )?;
        tx.execute(
          "DELETE FROM breach_state WHERE breach_key = ?1",
          rusqlite::params![key_str],
        )?;
        tx.commit()?;
        Ok(n)
      })
      .await?;

    if deleted == 0 { Err(Error::ZoneNotFound(id)) } else { Ok(()) }
  }

  // ── Position fixes ────────────────────────────────────────────────────────

  async fn record_fix(&self, input: NewPositionFix) -> Result<PositionFix> {
    input.position.validate().map_err(Error::Validation)?;
    self.ensure_subject(input.subject_id).await?;

    let fix = PositionFix {
      fix_id:        Uuid::new_v4(),
      subject_id:    input.subject_id,
      position:      input.position,
      accuracy:      input.accuracy,
      battery_level: input.battery_level,
      recorded_at:   input.recorded_at,
    };

    let id_str      = encode_uuid(fix.fix_id);
    let subject_str = encode_uuid(fix.subject_id);
    let latitude    = fix.position.latitude;
    let longitude   = fix.position.longitude;
    let accuracy    = fix.accuracy;
    let battery     = fix.battery_level;
    let at_str      = encode_dt(fix.recorded_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO position_fixes (
             fix_id, subject_id, latitude, longitude, accuracy,
             battery_level, recorded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            id_str, subject_str, latitude, longitude, accuracy, battery, at_str
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(fix)
  }

  async fn latest_fix(&self, subject_id: Uuid) -> Result<Option<PositionFix>> {
    let subject_str = encode_uuid(subject_id);

    let raw: Option<RawFix> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {FIX_COLUMNS} FROM position_fixes
                  WHERE subject_id = ?1
                  ORDER BY recorded_at DESC, rowid DESC
                  LIMIT 1"
              ),
              rusqlite::params![subject_str],
              RawFix::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawFix::into_fix).transpose()
  }

  async fn fixes_since(
    &self,
    subject_id: Uuid,
    after:      DateTime<Utc>,
  ) -> Result<Vec<PositionFix>> {
    let subject_str = encode_uuid(subject_id);
    let after_str   = encode_dt(after);

    let raws: Vec<RawFix> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {FIX_COLUMNS} FROM position_fixes
            WHERE subject_id = ?1 AND recorded_at > ?2
            ORDER BY recorded_at ASC, rowid ASC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![subject_str, after_str], RawFix::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawFix::into_fix).collect()
  }

  // ── Alerts ────────────────────────────────────────────────────────────────

  async fn insert_alert(&self, input: NewAlert) -> Result<Alert> {
    let alert = new_alert(input);
    let row = alert.clone();

    self
      .conn
      .call(move |conn| {
        insert_alert_row(conn, &row)?;
        Ok(())
      })
      .await?;

    Ok(alert)
  }

  async fn record_breach(&self, input: NewAlert, key: BreachKey) -> Result<Option<Alert>> {
    let alert = new_alert(input);
    let row = alert.clone();
    let key_str = key.to_string();

    let flipped: bool = self
      .conn
      .call(move |conn| {
        // IMMEDIATE takes the write lock up front, so two stores sharing the
        // file cannot both see the flag clear.
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let changed = tx.execute(
          "INSERT INTO breach_state (subject_id, breach_key, breached, updated_at)
           VALUES (?1, ?2, 1, ?3)
           ON CONFLICT (subject_id, breach_key)
           DO UPDATE SET breached = 1, updated_at = excluded.updated_at
           WHERE breach_state.breached = 0",
          rusqlite::params![
            encode_uuid(row.subject_id),
            key_str,
            encode_dt(row.created_at),
          ],
        )?;
        if changed == 0 {
          return Ok(false);
        }
        insert_alert_row(&tx, &row)?;
        tx.commit()?;
        Ok(true)
      })
      .await?;

    Ok(flipped.then_some(alert))
  }

  async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawAlert> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE alert_id = ?1"),
              rusqlite::params![id_str],
              |row| RawAlert::from_row(row, 0),
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawAlert::into_alert).transpose()
  }

  async fn acknowledge_alert(&self, id: Uuid, at: DateTime<Utc>) -> Result<Alert> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(at);

    // A second acknowledgement keeps the first timestamp.
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE alerts SET acknowledged_at = ?2
            WHERE alert_id = ?1 AND acknowledged_at IS NULL",
          rusqlite::params![id_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    self.get_alert(id).await?.ok_or(Error::AlertNotFound(id))
  }

  async fn pending_alerts(&self, caregiver_id: Uuid) -> Result<Vec<PendingAlert>> {
    let caregiver_str = encode_uuid(caregiver_id);

    let raws: Vec<RawPendingAlert> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT
             a.alert_id, a.subject_id, a.caregiver_id, a.alert_type, a.severity,
             a.message, a.metadata, a.created_at, a.acknowledged_at,
             s.full_name, s.device_id
           FROM alerts a
           JOIN subjects s ON s.subject_id = a.subject_id
           WHERE a.caregiver_id = ?1 AND a.acknowledged_at IS NULL
           ORDER BY a.created_at DESC, a.rowid DESC",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![caregiver_str], |row| {
            Ok(RawPendingAlert {
              alert:        RawAlert::from_row(row, 0)?,
              subject_name: row.get(9)?,
              device_id:    row.get(10)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawPendingAlert::into_pending).collect()
  }

  // ── Breach state ──────────────────────────────────────────────────────────

  async fn breach_table(&self, subject_id: Uuid) -> Result<BreachTable> {
    let subject_str = encode_uuid(subject_id);

    let rows: Vec<(String, bool)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT breach_key, breached FROM breach_state WHERE subject_id = ?1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![subject_str], |row| {
            Ok((row.get(0)?, row.get(1)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(key, breached)| Ok::<_, Error>((key.parse::<BreachKey>()?, breached)))
      .collect()
  }

  async fn clear_breaches(&self, subject_id: Uuid, keys: Vec<BreachKey>) -> Result<()> {
    if keys.is_empty() {
      return Ok(());
    }

    let subject_str = encode_uuid(subject_id);
    let key_strs: Vec<String> = keys.iter().map(BreachKey::to_string).collect();
    let at_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for key in &key_strs {
          tx.execute(
            "UPDATE breach_state SET breached = 0, updated_at = ?3
              WHERE subject_id = ?1 AND breach_key = ?2",
            rusqlite::params![subject_str, key, at_str],
          )?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
