//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{Duration, Utc};
use kimi_core::{
  Classify, RetryStrategy, ValidationError,
  alert::{AlertType, NewAlert, Severity},
  breach::BreachKey,
  fix::NewPositionFix,
  geo::Coordinate,
  store::MonitorStore,
  subject::{NewSubject, Subject},
  zone::{NewSafeZone, SafeZonePatch},
};
use uuid::Uuid;

use crate::{Error, SqliteStore};

const HOME: Coordinate = Coordinate {
  latitude:  38.7223,
  longitude: -9.1393,
};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

async fn subject(s: &SqliteStore) -> Subject {
  s.add_subject(NewSubject {
    caregiver_id: Uuid::new_v4(),
    full_name:    "Ester Marques".into(),
    device_id:    "watch-01".into(),
  })
  .await
  .unwrap()
}

fn note(subject: &Subject, message: &str) -> NewAlert {
  NewAlert {
    subject_id:   subject.subject_id,
    caregiver_id: subject.caregiver_id,
    alert_type:   AlertType::FallDetected,
    severity:     Severity::High,
    message:      message.into(),
    metadata:     serde_json::json!({}),
  }
}

// ─── Subjects ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn add_and_get_subject() {
  let s = store().await;
  let subject = subject(&s).await;

  let fetched = s.get_subject(subject.subject_id).await.unwrap().unwrap();
  assert_eq!(fetched, subject);
  assert!(s.get_subject(Uuid::new_v4()).await.unwrap().is_none());
  assert_eq!(s.list_subjects().await.unwrap().len(), 1);
}

// ─── Safe zones ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_zone_round_trips() {
  let s = store().await;
  let subject = subject(&s).await;

  let zone = s
    .create_zone(NewSafeZone::new(subject.subject_id, "  Home ", HOME, 250.0))
    .await
    .unwrap();
  assert_eq!(zone.name, "Home");
  assert!(zone.is_active);

  let fetched = s.get_zone(zone.id).await.unwrap().unwrap();
  assert_eq!(fetched, zone);
}

#[tokio::test]
async fn create_zone_rejects_invalid_radius() {
  let s = store().await;
  let subject = subject(&s).await;

  let err = s
    .create_zone(NewSafeZone::new(subject.subject_id, "Home", HOME, 5.0))
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Validation(ValidationError::RadiusOutOfRange(r)) if r == 5.0
  ));
  assert!(s.list_zones(subject.subject_id, true).await.unwrap().is_empty());
}

#[tokio::test]
async fn create_zone_for_unknown_subject_fails() {
  let s = store().await;
  let missing = Uuid::new_v4();
  let err = s
    .create_zone(NewSafeZone::new(missing, "Home", HOME, 100.0))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::SubjectNotFound(id) if id == missing));
}

#[tokio::test]
async fn active_zones_skip_inactive() {
  let s = store().await;
  let subject = subject(&s).await;

  s.create_zone(NewSafeZone::new(subject.subject_id, "Home", HOME, 200.0))
    .await
    .unwrap();
  let park = s
    .create_zone(NewSafeZone {
      is_active: false,
      ..NewSafeZone::new(subject.subject_id, "Park", HOME, 800.0)
    })
    .await
    .unwrap();

  let active = s.active_zones(subject.subject_id).await.unwrap();
  assert_eq!(active.len(), 1);
  assert_eq!(active[0].name, "Home");

  let all = s.list_zones(subject.subject_id, true).await.unwrap();
  assert_eq!(all.len(), 2);
  assert!(all.iter().any(|z| z.id == park.id));
}

#[tokio::test]
async fn update_zone_applies_patch() {
  let s = store().await;
  let subject = subject(&s).await;
  let zone = s
    .create_zone(NewSafeZone::new(subject.subject_id, "Home", HOME, 200.0))
    .await
    .unwrap();

  let updated = s
    .update_zone(zone.id, SafeZonePatch {
      radius_meters: Some(400.0),
      is_active: Some(false),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(updated.radius_meters, 400.0);
  assert!(!updated.is_active);
  assert!(updated.updated_at >= zone.updated_at);

  let fetched = s.get_zone(zone.id).await.unwrap().unwrap();
  assert_eq!(fetched, updated);

  let err = s
    .update_zone(zone.id, SafeZonePatch {
      radius_meters: Some(9_000.0),
      ..Default::default()
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(_)));
  assert_eq!(s.get_zone(zone.id).await.unwrap().unwrap().radius_meters, 400.0);
}

#[tokio::test]
async fn delete_zone_drops_its_breach_flag() {
  let s = store().await;
  let subject = subject(&s).await;
  let zone = s
    .create_zone(NewSafeZone::new(subject.subject_id, "Home", HOME, 200.0))
    .await
    .unwrap();

  s.record_breach(note(&subject, "left"), BreachKey::Zone(zone.id))
    .await
    .unwrap();
  s.delete_zone(zone.id).await.unwrap();

  assert!(s.get_zone(zone.id).await.unwrap().is_none());
  let table = s.breach_table(subject.subject_id).await.unwrap();
  assert!(!table.is_breached(BreachKey::Zone(zone.id)));

  let err = s.delete_zone(zone.id).await.unwrap_err();
  assert!(matches!(err, Error::ZoneNotFound(_)));
}

async fn is_breached(s: &SqliteStore, subject: &Subject, key: BreachKey) -> bool {
  s.breach_table(subject.subject_id).await.unwrap().is_breached(key)
}

#[tokio::test]
async fn toggling_a_zone_clears_its_breach_flag() {
  let s = store().await;
  let subject = subject(&s).await;
  let zone = s
    .create_zone(NewSafeZone::new(subject.subject_id, "Home", HOME, 200.0))
    .await
    .unwrap();
  let key = BreachKey::Zone(zone.id);

  s.record_breach(note(&subject, "left"), key).await.unwrap();

  // A rename leaves the flag alone.
  s.update_zone(zone.id, SafeZonePatch {
    name: Some("House".into()),
    ..Default::default()
  })
  .await
  .unwrap();
  assert!(is_breached(&s, &subject, key).await);

  s.update_zone(zone.id, SafeZonePatch {
    is_active: Some(false),
    ..Default::default()
  })
  .await
  .unwrap();
  assert!(!is_breached(&s, &subject, key).await);

  s.record_breach(note(&subject, "left"), key).await.unwrap();
  s.update_zone(zone.id, SafeZonePatch {
    is_active: Some(true),
    ..Default::default()
  })
  .await
  .unwrap();
  assert!(!is_breached(&s, &subject, key).await);
}

// ─── Position fixes ──────────────────────────────────────────────────────────

#[tokio::test]
async fn latest_fix_is_by_recorded_at() {
  let s = store().await;
  let subject = subject(&s).await;
  let now = Utc::now();

  s.record_fix(NewPositionFix::new(subject.subject_id, HOME, now))
    .await
    .unwrap();
  // Arrives later but was recorded earlier.
  s.record_fix(NewPositionFix::new(
    subject.subject_id,
    HOME,
    now - Duration::minutes(3),
  ))
  .await
  .unwrap();

  let latest = s.latest_fix(subject.subject_id).await.unwrap().unwrap();
  assert_eq!(latest.recorded_at, now);
}

#[tokio::test]
async fn fixes_since_is_exclusive_and_ascending() {
  let s = store().await;
  let subject = subject(&s).await;
  let t0 = Utc::now() - Duration::minutes(10);

  for minutes in [3, 1, 2, 0] {
    s.record_fix(NewPositionFix {
      battery_level: Some(50),
      accuracy: Some(4.5),
      ..NewPositionFix::new(subject.subject_id, HOME, t0 + Duration::minutes(minutes))
    })
    .await
    .unwrap();
  }

  let fixes = s.fixes_since(subject.subject_id, t0).await.unwrap();
  let times: Vec<_> = fixes.iter().map(|f| f.recorded_at).collect();
  assert_eq!(times, [
    t0 + Duration::minutes(1),
    t0 + Duration::minutes(2),
    t0 + Duration::minutes(3),
  ]);
  assert_eq!(fixes[0].battery_level, Some(50));
  assert_eq!(fixes[0].accuracy, Some(4.5));
}

#[tokio::test]
async fn record_fix_rejects_bad_coordinates() {
  let s = store().await;
  let subject = subject(&s).await;
  let err = s
    .record_fix(NewPositionFix::new(
      subject.subject_id,
      Coordinate::new(91.0, 0.0),
      Utc::now(),
    ))
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Validation(ValidationError::LatitudeOutOfRange(_))
  ));
}

// ─── Alerts ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pending_alerts_newest_first_with_subject() {
  let s = store().await;
  let subject = subject(&s).await;

  let first = s.insert_alert(note(&subject, "first")).await.unwrap();
  let second = s.insert_alert(note(&subject, "second")).await.unwrap();

  let pending = s.pending_alerts(subject.caregiver_id).await.unwrap();
  assert_eq!(pending.len(), 2);
  assert_eq!(pending[0].alert.id, second.id);
  assert_eq!(pending[1].alert.id, first.id);
  assert_eq!(pending[0].subject_name, "Ester Marques");
  assert_eq!(pending[0].device_id, "watch-01");

  assert!(s.pending_alerts(Uuid::new_v4()).await.unwrap().is_empty());
}

#[tokio::test]
async fn acknowledge_keeps_first_timestamp() {
  let s = store().await;
  let subject = subject(&s).await;
  let alert = s.insert_alert(note(&subject, "fall")).await.unwrap();

  let at = Utc::now();
  let acked = s.acknowledge_alert(alert.id, at).await.unwrap();
  assert_eq!(acked.acknowledged_at, Some(at));

  let again = s
    .acknowledge_alert(alert.id, at + Duration::minutes(5))
    .await
    .unwrap();
  assert_eq!(again.acknowledged_at, Some(at));

  assert!(s.pending_alerts(subject.caregiver_id).await.unwrap().is_empty());

  let err = s.acknowledge_alert(Uuid::new_v4(), at).await.unwrap_err();
  assert!(matches!(err, Error::AlertNotFound(_)));
}

#[tokio::test]
async fn metadata_survives_storage() {
  let s = store().await;
  let subject = subject(&s).await;
  let input = NewAlert {
    metadata: serde_json::json!({ "safe_zone_name": "Home", "latitude": 38.7 }),
    ..note(&subject, "left")
  };
  let alert = s.insert_alert(input.clone()).await.unwrap();
  let fetched = s.get_alert(alert.id).await.unwrap().unwrap();
  assert_eq!(fetched.metadata, input.metadata);
  assert_eq!(fetched.alert_type, AlertType::FallDetected);
  assert_eq!(fetched.severity, Severity::High);
}

// ─── Breach state ────────────────────────────────────────────────────────────

#[tokio::test]
async fn record_breach_sets_flag_with_alert() {
  let s = store().await;
  let subject = subject(&s).await;
  let zone_key = BreachKey::Zone(Uuid::new_v4());

  assert!(s.breach_table(subject.subject_id).await.unwrap().breached().next().is_none());

  let alert = s
    .record_breach(note(&subject, "left"), zone_key)
    .await
    .unwrap()
    .expect("flag was clear");
  assert!(s.get_alert(alert.id).await.unwrap().is_some());

  // A second writer that still saw the flag clear gets nothing.
  let dup = s.record_breach(note(&subject, "left"), zone_key).await.unwrap();
  assert!(dup.is_none());
  assert_eq!(s.pending_alerts(subject.caregiver_id).await.unwrap().len(), 1);

  let table = s.breach_table(subject.subject_id).await.unwrap();
  assert!(table.is_breached(zone_key));
  assert!(!table.is_breached(BreachKey::LowBattery));

  s.clear_breaches(subject.subject_id, vec![zone_key]).await.unwrap();
  let table = s.breach_table(subject.subject_id).await.unwrap();
  assert!(!table.is_breached(zone_key));

  // Re-breaching after a re-arm flips the existing row back.
  let again = s.record_breach(note(&subject, "left again"), zone_key).await.unwrap();
  assert!(again.is_some());
  assert!(s.breach_table(subject.subject_id).await.unwrap().is_breached(zone_key));
}

#[tokio::test]
async fn failed_breach_leaves_no_flag() {
  let s = store().await;
  let subject = subject(&s).await;
  // The subject foreign key makes the insert fail inside the transaction.
  let orphan = NewAlert {
    subject_id: Uuid::new_v4(),
    ..note(&subject, "orphan")
  };

  let err = s
    .record_breach(orphan, BreachKey::LowBattery)
    .await
    .unwrap_err();
  assert_eq!(err.retry_strategy(), RetryStrategy::Fail);
  assert!(s.pending_alerts(subject.caregiver_id).await.unwrap().is_empty());
  assert!(
    !s.breach_table(subject.subject_id)
      .await
      .unwrap()
      .is_breached(BreachKey::LowBattery)
  );
}
