//! The `MonitorStore` trait: the external relational store as seen by the
//! geofence pipeline.
//!
//! The trait is implemented by storage backends (e.g. `kimi-store-sqlite`).
//! Higher layers (`kimi-monitor`, `kimi-api`) depend on this abstraction, not
//! on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  Classify,
  alert::{Alert, NewAlert, PendingAlert},
  breach::{BreachKey, BreachTable},
  fix::{NewPositionFix, PositionFix},
  subject::{NewSubject, Subject},
  zone::{NewSafeZone, SafeZone, SafeZonePatch},
};

/// Abstraction over the persistent store.
///
/// Alerts are append-only apart from the acknowledgement timestamp. Breach
/// flags live here rather than in process memory so that several monitor
/// instances sharing a store agree on what has already been alerted.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait MonitorStore: Send + Sync {
  type Error: std::error::Error + Classify + Send + Sync + 'static;

  // ── Subjects ──────────────────────────────────────────────────────────

  fn add_subject(
    &self,
    input: NewSubject,
  ) -> impl Future<Output = Result<Subject, Self::Error>> + Send + '_;

  /// Retrieve a subject by UUID. Returns `None` if not found.
  fn get_subject(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Subject>, Self::Error>> + Send + '_;

  fn list_subjects(
    &self,
  ) -> impl Future<Output = Result<Vec<Subject>, Self::Error>> + Send + '_;

  // ── Safe zones ────────────────────────────────────────────────────────

  /// Validate and persist a new zone. Fails with a validation error for a
  /// malformed definition and with "subject not found" for an unknown
  /// subject.
  fn create_zone(
    &self,
    input: NewSafeZone,
  ) -> impl Future<Output = Result<SafeZone, Self::Error>> + Send + '_;

  fn get_zone(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<SafeZone>, Self::Error>> + Send + '_;

  fn list_zones(
    &self,
    subject_id: Uuid,
    include_inactive: bool,
  ) -> impl Future<Output = Result<Vec<SafeZone>, Self::Error>> + Send + '_;

  /// The latest committed set of active zones for a subject.
  fn active_zones(
    &self,
    subject_id: Uuid,
  ) -> impl Future<Output = Result<Vec<SafeZone>, Self::Error>> + Send + '_ {
    self.list_zones(subject_id, false)
  }

  /// Apply a partial edit; the merged zone is validated before it is written.
  /// Deactivating or reactivating a zone also clears its breach flag.
  fn update_zone(
    &self,
    id: Uuid,
    patch: SafeZonePatch,
  ) -> impl Future<Output = Result<SafeZone, Self::Error>> + Send + '_;

  /// Delete a zone together with any breach flag recorded against it.
  fn delete_zone(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Position fixes ────────────────────────────────────────────────────

  fn record_fix(
    &self,
    input: NewPositionFix,
  ) -> impl Future<Output = Result<PositionFix, Self::Error>> + Send + '_;

  /// The fix with the greatest `recorded_at` for a subject.
  fn latest_fix(
    &self,
    subject_id: Uuid,
  ) -> impl Future<Output = Result<Option<PositionFix>, Self::Error>> + Send + '_;

  /// Fixes recorded strictly after `after`, oldest first.
  fn fixes_since(
    &self,
    subject_id: Uuid,
    after: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<PositionFix>, Self::Error>> + Send + '_;

  // ── Alerts ────────────────────────────────────────────────────────────

  /// Insert an alert. `id` and `created_at` are assigned by the store.
  fn insert_alert(
    &self,
    input: NewAlert,
  ) -> impl Future<Output = Result<Alert, Self::Error>> + Send + '_;

  /// Flag `key` as breached for the alert's subject and insert the alert, in
  /// one transaction. Either both happen or neither does.
  ///
  /// The flag is flipped only if it is currently clear. When it is already
  /// set (another monitor recorded this breach first) nothing is written and
  /// `None` is returned.
  fn record_breach(
    &self,
    input: NewAlert,
    key: BreachKey,
  ) -> impl Future<Output = Result<Option<Alert>, Self::Error>> + Send + '_;

  fn get_alert(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Alert>, Self::Error>> + Send + '_;

  /// Set `acknowledged_at` if it is not already set, and return the alert.
  fn acknowledge_alert(
    &self,
    id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Alert, Self::Error>> + Send + '_;

  /// Unacknowledged alerts for a caregiver, newest first, joined with the
  /// subject's display name and device id.
  fn pending_alerts(
    &self,
    caregiver_id: Uuid,
  ) -> impl Future<Output = Result<Vec<PendingAlert>, Self::Error>> + Send + '_;

  // ── Breach state ──────────────────────────────────────────────────────

  fn breach_table(
    &self,
    subject_id: Uuid,
  ) -> impl Future<Output = Result<BreachTable, Self::Error>> + Send + '_;

  /// Reset the given flags to "not breached".
  fn clear_breaches(
    &self,
    subject_id: Uuid,
    keys: Vec<BreachKey>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
