//! Turns one position fix into persisted breach alerts.
//!
//! Zones and breach flags are read fresh from the store for every fix. A
//! breach flag is only ever set in the same transaction that stores its
//! alert, so a failed write leaves the flag clear and the next fix for the
//! subject raises the alert again.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use kimi_core::{
  alert::{Alert, NewAlert},
  breach::{BatteryTransition, BreachKey, plan_battery_transition, plan_zone_transitions},
  evaluate::evaluate,
  fix::PositionFix,
  store::MonitorStore,
  subject::Subject,
};
use uuid::Uuid;

use crate::{AlertHub, Error, Result, RetryPolicy};

/// Battery percentage below which a low-battery alert is raised.
pub const DEFAULT_LOW_BATTERY_THRESHOLD: u8 = 20;

/// How long a subject's worker waits for a fix before it is retired.
pub const DEFAULT_WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
  pub retry:                 RetryPolicy,
  pub low_battery_threshold: u8,
  pub worker_idle_timeout:   Duration,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      retry:                 RetryPolicy::default(),
      low_battery_threshold: DEFAULT_LOW_BATTERY_THRESHOLD,
      worker_idle_timeout:   DEFAULT_WORKER_IDLE_TIMEOUT,
    }
  }
}

pub struct Recorder<S> {
  store:  Arc<S>,
  alerts: AlertHub,
  config: MonitorConfig,
}

impl<S: MonitorStore> Recorder<S> {
  pub fn new(store: Arc<S>, alerts: AlertHub, config: MonitorConfig) -> Self {
    Self {
      store,
      alerts,
      config,
    }
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  pub fn config(&self) -> &MonitorConfig { &self.config }

  pub fn retry_policy(&self) -> &RetryPolicy { &self.config.retry }

  /// Evaluate `fix` and record whatever it changes. Returns the alerts that
  /// were stored (and published).
  ///
  /// Every breach is attempted even if an earlier one fails; the last error
  /// is returned after the rest have been handled.
  pub async fn process(&self, fix: &PositionFix) -> Result<Vec<Alert>> {
    let store = &*self.store;
    let retry = &self.config.retry;
    let subject_id = fix.subject_id;

    let subject = retry
      .run("load subject", || store.get_subject(subject_id))
      .await?
      .ok_or(Error::SubjectNotFound(subject_id))?;
    let zones = retry
      .run("load active zones", || store.active_zones(subject_id))
      .await?;
    for zone in zones.iter().filter(|z| !z.is_evaluable()) {
      tracing::warn!(zone_id = %zone.id, radius = zone.radius_meters, "ignoring zone with unusable radius");
    }
    let table = retry
      .run("load breach state", || store.breach_table(subject_id))
      .await?;

    let evaluation = evaluate(subject_id, fix.position, &zones);
    let plan = plan_zone_transitions(&evaluation, &table);

    let mut rearm = plan.rearm;
    let mut raise: Vec<(NewAlert, BreachKey)> = plan
      .raise
      .iter()
      .map(|v| {
        let key = BreachKey::Zone(v.safe_zone_id);
        (NewAlert::geofence_breach(&subject, fix, v), key)
      })
      .collect();

    match plan_battery_transition(fix, self.config.low_battery_threshold, &table) {
      BatteryTransition::Raise(level) => raise.push((
        NewAlert::low_battery(&subject, fix, level, self.config.low_battery_threshold),
        BreachKey::LowBattery,
      )),
      BatteryTransition::Rearm => rearm.push(BreachKey::LowBattery),
      BatteryTransition::Unchanged => {}
    }

    if !rearm.is_empty() {
      tracing::debug!(%subject_id, keys = ?rearm, "re-arming breach flags");
      retry
        .run("re-arm breach flags", || store.clear_breaches(subject_id, rearm.clone()))
        .await?;
    }

    let mut recorded = Vec::with_capacity(raise.len());
    let mut failure = None;
    for (alert, key) in raise {
      match self.record(&subject, alert, key).await {
        Ok(Some(stored)) => recorded.push(stored),
        Ok(None) => {}
        Err(e) => failure = Some(e),
      }
    }

    match failure {
      Some(e) => Err(e),
      None => Ok(recorded),
    }
  }

  /// Store one breach. `None` means another monitor already recorded it.
  async fn record(
    &self,
    subject: &Subject,
    alert: NewAlert,
    key: BreachKey,
  ) -> Result<Option<Alert>> {
    let store = &*self.store;
    let result = self
      .config
      .retry
      .run("record alert", || store.record_breach(alert.clone(), key))
      .await;

    match result {
      Ok(None) => {
        tracing::debug!(
          subject_id = %subject.subject_id,
          breach = %key,
          "breach already recorded elsewhere"
        );
        Ok(None)
      }
      Ok(Some(stored)) => {
        tracing::info!(
          subject_id = %subject.subject_id,
          alert_id = %stored.id,
          breach = %key,
          "{}",
          stored.message
        );
        self.alerts.publish(stored.clone());
        Ok(Some(stored))
      }
      Err(e) => {
        tracing::error!(
          subject_id = %subject.subject_id,
          breach = %key,
          error = %e,
          "alert not recorded; it will be raised again on the next fix"
        );
        Err(e)
      }
    }
  }

  /// Fixes a worker has not seen yet: everything after `watermark`, or just
  /// the latest fix when the worker has seen nothing.
  pub async fn fixes_after(
    &self,
    subject_id: Uuid,
    watermark: Option<DateTime<Utc>>,
  ) -> Result<Vec<PositionFix>> {
    let store = &*self.store;
    let retry = &self.config.retry;
    match watermark {
      Some(after) => {
        retry
          .run("load missed fixes", || store.fixes_since(subject_id, after))
          .await
      }
      None => Ok(
        retry
          .run("load latest fix", || store.latest_fix(subject_id))
          .await?
          .into_iter()
          .collect(),
      ),
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;
  use kimi_core::{
    alert::{AlertType, GeofenceMetadata, Severity},
    fix::NewPositionFix,
    geo::Coordinate,
    subject::NewSubject,
    zone::NewSafeZone,
  };
  use kimi_store_sqlite::SqliteStore;

  use super::*;
  use crate::tests::{BusyBreaches, subject_at_home};

  const HOME: Coordinate = Coordinate {
    latitude:  38.7223,
    longitude: -9.1393,
  };
  // ~1.1 km north of HOME.
  const AWAY: Coordinate = Coordinate {
    latitude:  38.7323,
    longitude: -9.1393,
  };

  struct Harness {
    store:    Arc<SqliteStore>,
    recorder: Recorder<SqliteStore>,
    subject:  Subject,
    t0:       DateTime<Utc>,
  }

  impl Harness {
    async fn new() -> Self {
      let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
      let subject = store
        .add_subject(NewSubject {
          caregiver_id: Uuid::new_v4(),
          full_name:    "Ester".into(),
          device_id:    "watch-01".into(),
        })
        .await
        .unwrap();
      store
        .create_zone(NewSafeZone::new(subject.subject_id, "Home", HOME, 500.0))
        .await
        .unwrap();
      let recorder =
        Recorder::new(store.clone(), AlertHub::new(16), MonitorConfig::default());
      Self {
        store,
        recorder,
        subject,
        t0: Utc::now(),
      }
    }

    async fn fix_at(&self, minute: i64, at: Coordinate, battery: Option<u8>) -> PositionFix {
      self
        .store
        .record_fix(NewPositionFix {
          battery_level: battery,
          ..NewPositionFix::new(
            self.subject.subject_id,
            at,
            self.t0 + Duration::minutes(minute),
          )
        })
        .await
        .unwrap()
    }

    async fn alerts(&self) -> usize {
      self
        .store
        .pending_alerts(self.subject.caregiver_id)
        .await
        .unwrap()
        .len()
    }
  }

  #[tokio::test]
  async fn breach_is_alerted_once_until_rearmed() {
    let h = Harness::new().await;

    let out = h.fix_at(0, AWAY, None).await;
    let first = h.recorder.process(&out).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].alert_type, AlertType::GeofenceBreach);
    assert_eq!(first[0].severity, Severity::High);
    let meta: GeofenceMetadata = serde_json::from_value(first[0].metadata.clone()).unwrap();
    assert_eq!(meta.safe_zone_name, "Home");
    assert!(meta.distance_from_center > 500.0);

    let still_out = h.fix_at(1, AWAY, None).await;
    assert!(h.recorder.process(&still_out).await.unwrap().is_empty());
    assert_eq!(h.alerts().await, 1);

    let back = h.fix_at(2, HOME, None).await;
    assert!(h.recorder.process(&back).await.unwrap().is_empty());

    let out_again = h.fix_at(3, AWAY, None).await;
    assert_eq!(h.recorder.process(&out_again).await.unwrap().len(), 1);
    assert_eq!(h.alerts().await, 2);
  }

  #[tokio::test]
  async fn racing_recorders_raise_one_alert() {
    let h = Harness::new().await;
    let other = Recorder::new(h.store.clone(), AlertHub::new(16), MonitorConfig::default());

    let out = h.fix_at(0, AWAY, None).await;
    let (a, b) = tokio::join!(h.recorder.process(&out), other.process(&out));
    assert_eq!(a.unwrap().len() + b.unwrap().len(), 1);
    assert_eq!(h.alerts().await, 1);
  }

  #[tokio::test]
  async fn reactivated_zone_alerts_on_new_excursion() {
    let h = Harness::new().await;
    let zone = h.store.active_zones(h.subject.subject_id).await.unwrap().remove(0);
    let set_active = |active| kimi_core::zone::SafeZonePatch {
      is_active: Some(active),
      ..Default::default()
    };

    let out = h.fix_at(0, AWAY, None).await;
    assert_eq!(h.recorder.process(&out).await.unwrap().len(), 1);

    // Switched off while the subject is still outside.
    h.store.update_zone(zone.id, set_active(false)).await.unwrap();
    let back = h.fix_at(1, HOME, None).await;
    assert!(h.recorder.process(&back).await.unwrap().is_empty());
    h.store.update_zone(zone.id, set_active(true)).await.unwrap();

    let out_again = h.fix_at(2, AWAY, None).await;
    assert_eq!(h.recorder.process(&out_again).await.unwrap().len(), 1);
    let still_out = h.fix_at(3, AWAY, None).await;
    assert!(h.recorder.process(&still_out).await.unwrap().is_empty());
    assert_eq!(h.alerts().await, 2);
  }

  async fn busy_recorder(busy: u32) -> (Arc<BusyBreaches>, Recorder<BusyBreaches>, Subject) {
    let inner = SqliteStore::open_in_memory().await.unwrap();
    let subject = subject_at_home(&inner).await;
    let store = Arc::new(BusyBreaches::new(inner, busy));
    let config = MonitorConfig {
      retry: RetryPolicy::new(3, std::time::Duration::from_millis(1)),
      ..MonitorConfig::default()
    };
    let recorder = Recorder::new(store.clone(), AlertHub::new(16), config);
    (store, recorder, subject)
  }

  async fn fix_away(store: &BusyBreaches, subject: &Subject, minute: i64) -> PositionFix {
    store
      .record_fix(NewPositionFix::new(
        subject.subject_id,
        AWAY,
        Utc::now() + Duration::minutes(minute),
      ))
      .await
      .unwrap()
  }

  #[tokio::test]
  async fn transient_breach_failures_are_retried() {
    let (store, recorder, subject) = busy_recorder(2).await;

    let out = fix_away(&store, &subject, 0).await;
    let alerts = recorder.process(&out).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(store.busy.load(std::sync::atomic::Ordering::SeqCst), 0);

    let zone_id = store.active_zones(subject.subject_id).await.unwrap()[0].id;
    let table = store.breach_table(subject.subject_id).await.unwrap();
    assert!(table.is_breached(BreachKey::Zone(zone_id)));
  }

  #[tokio::test]
  async fn exhausted_breach_is_raised_by_next_fix() {
    let (store, recorder, subject) = busy_recorder(3).await;

    let out = fix_away(&store, &subject, 0).await;
    let err = recorder.process(&out).await.unwrap_err();
    assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }));
    assert!(store.pending_alerts(subject.caregiver_id).await.unwrap().is_empty());
    let table = store.breach_table(subject.subject_id).await.unwrap();
    assert!(table.breached().next().is_none());

    let still_out = fix_away(&store, &subject, 1).await;
    assert_eq!(recorder.process(&still_out).await.unwrap().len(), 1);
    let again = fix_away(&store, &subject, 2).await;
    assert!(recorder.process(&again).await.unwrap().is_empty());
    assert_eq!(store.pending_alerts(subject.caregiver_id).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn zone_edits_apply_to_the_next_fix() {
    let h = Harness::new().await;
    let zone = h.store.active_zones(h.subject.subject_id).await.unwrap().remove(0);
    h.store
      .update_zone(zone.id, kimi_core::zone::SafeZonePatch {
        radius_meters: Some(2_000.0),
        ..Default::default()
      })
      .await
      .unwrap();

    let fix = h.fix_at(0, AWAY, None).await;
    assert!(h.recorder.process(&fix).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn low_battery_is_alerted_once_per_low_period() {
    let h = Harness::new().await;

    let low = h.fix_at(0, HOME, Some(15)).await;
    let alerts = h.recorder.process(&low).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::LowBattery);
    assert_eq!(alerts[0].severity, Severity::Medium);
    assert_eq!(alerts[0].metadata["battery_level"], 15);

    let lower = h.fix_at(1, HOME, Some(10)).await;
    assert!(h.recorder.process(&lower).await.unwrap().is_empty());

    let charged = h.fix_at(2, HOME, Some(80)).await;
    assert!(h.recorder.process(&charged).await.unwrap().is_empty());

    let low_again = h.fix_at(3, HOME, Some(19)).await;
    assert_eq!(h.recorder.process(&low_again).await.unwrap().len(), 1);
    assert_eq!(h.alerts().await, 2);
  }

  #[tokio::test]
  async fn stored_alerts_are_published() {
    let h = Harness::new().await;
    let mut sub = h.recorder.alerts.subscribe(h.subject.caregiver_id);

    let out = h.fix_at(0, AWAY, None).await;
    let stored = h.recorder.process(&out).await.unwrap();
    assert_eq!(
      sub.next().await,
      Some(crate::AlertEvent::Alert(stored[0].clone()))
    );
  }

  #[tokio::test]
  async fn unknown_subject_is_an_error() {
    let h = Harness::new().await;
    let mut fix = h.fix_at(0, AWAY, None).await;
    fix.subject_id = Uuid::new_v4();
    let err = h.recorder.process(&fix).await.unwrap_err();
    assert!(matches!(err, Error::SubjectNotFound(_)));
  }

  #[tokio::test]
  async fn fixes_after_uses_watermark() {
    let h = Harness::new().await;
    let a = h.fix_at(0, HOME, None).await;
    let b = h.fix_at(1, HOME, None).await;
    let c = h.fix_at(2, HOME, None).await;
    let id = h.subject.subject_id;

    let latest = h.recorder.fixes_after(id, None).await.unwrap();
    assert_eq!(latest, [c.clone()]);

    let missed = h.recorder.fixes_after(id, Some(a.recorded_at)).await.unwrap();
    assert_eq!(missed, [b, c]);
  }
}
