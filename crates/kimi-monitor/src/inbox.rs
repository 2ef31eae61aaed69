//! Caregiver-side alert state.
//!
//! [`CaregiverInbox`] is the in-memory list a connected caregiver sees, with
//! its unread count. [`CaregiverSession`] keeps one inbox in step with the
//! store and the live [`AlertHub`] feed.

use std::{
  collections::HashSet,
  sync::Arc,
};

use chrono::{DateTime, Utc};
use kimi_core::{
  alert::{Alert, PendingAlert},
  store::MonitorStore,
};
use uuid::Uuid;

use crate::{AlertEvent, AlertHub, AlertSubscription, Error, Result, RetryPolicy};

// ─── Inbox ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CaregiverInbox {
  /// Newest first.
  alerts:    Vec<Alert>,
  unread:    HashSet<Uuid>,
  dismissed: HashSet<Uuid>,
}

impl CaregiverInbox {
  pub fn new() -> Self { Self::default() }

  /// Active alerts, newest first.
  pub fn alerts(&self) -> &[Alert] { &self.alerts }

  /// Active alerts, highest severity first, newest first within a severity.
  pub fn by_severity(&self) -> Vec<&Alert> {
    let mut sorted: Vec<&Alert> = self.alerts.iter().collect();
    sorted.sort_by(|a, b| b.severity.cmp(&a.severity));
    sorted
  }

  pub fn unread(&self) -> usize { self.unread.len() }

  pub fn get(&self, id: Uuid) -> Option<&Alert> {
    self.alerts.iter().find(|a| a.id == id)
  }

  /// Add a pushed alert. Seeing the same alert twice changes nothing, except
  /// that a known alert arriving acknowledged is marked read.
  pub fn upsert(&mut self, alert: Alert) {
    if self.dismissed.contains(&alert.id) {
      return;
    }

    if let Some(existing) = self.alerts.iter_mut().find(|a| a.id == alert.id) {
      if existing.acknowledged_at.is_none() && alert.acknowledged_at.is_some() {
        existing.acknowledged_at = alert.acknowledged_at;
        self.unread.remove(&alert.id);
      }
      return;
    }

    if !alert.is_acknowledged() {
      self.unread.insert(alert.id);
    }
    let at = self
      .alerts
      .partition_point(|a| (a.created_at, a.id) > (alert.created_at, alert.id));
    self.alerts.insert(at, alert);
  }

  /// Mark an alert read locally. Returns `false` for an unknown id.
  pub fn acknowledge(&mut self, id: Uuid, at: DateTime<Utc>) -> bool {
    let Some(alert) = self.alerts.iter_mut().find(|a| a.id == id) else {
      return false;
    };
    alert.acknowledged_at.get_or_insert(at);
    self.unread.remove(&id);
    true
  }

  /// Hide an alert from this inbox. The stored record is untouched.
  pub fn dismiss(&mut self, id: Uuid) {
    self.alerts.retain(|a| a.id != id);
    self.unread.remove(&id);
    self.dismissed.insert(id);
  }

  /// Replace the contents with the store's pending list.
  pub fn reconcile(&mut self, pending: Vec<PendingAlert>) {
    self.alerts.clear();
    self.unread.clear();
    for p in pending {
      self.upsert(p.alert);
    }
  }
}

// ─── Session ─────────────────────────────────────────────────────────────────

pub struct CaregiverSession<S> {
  store:        Arc<S>,
  retry:        RetryPolicy,
  inbox:        CaregiverInbox,
  subscription: AlertSubscription,
}

impl<S: MonitorStore> CaregiverSession<S> {
  /// Subscribe to `hub` and load the pending list. The subscription is taken
  /// first so nothing stored in between is missed.
  pub async fn connect(
    store: Arc<S>,
    hub: &AlertHub,
    caregiver_id: Uuid,
    retry: RetryPolicy,
  ) -> Result<Self> {
    let mut session = Self {
      subscription: hub.subscribe(caregiver_id),
      store,
      retry,
      inbox: CaregiverInbox::new(),
    };
    session.refresh().await?;
    tracing::debug!(%caregiver_id, pending = session.inbox.alerts().len(), "caregiver connected");
    Ok(session)
  }

  pub fn caregiver_id(&self) -> Uuid { self.subscription.caregiver_id() }

  pub fn inbox(&self) -> &CaregiverInbox { &self.inbox }

  /// Re-fetch the pending list and replace the inbox with it.
  pub async fn refresh(&mut self) -> Result<()> {
    let store = &*self.store;
    let caregiver_id = self.caregiver_id();
    let pending = self
      .retry
      .run("load pending alerts", || store.pending_alerts(caregiver_id))
      .await?;
    self.inbox.reconcile(pending);
    Ok(())
  }

  /// Acknowledge in the store first, then mirror the stored timestamp in the
  /// inbox.
  pub async fn acknowledge(&mut self, id: Uuid) -> Result<Alert> {
    let store = &*self.store;
    let caregiver_id = self.caregiver_id();
    self
      .retry
      .run("load alert", || store.get_alert(id))
      .await?
      .filter(|a| a.caregiver_id == caregiver_id)
      .ok_or(Error::AlertNotFound(id))?;

    let stored = self
      .retry
      .run("acknowledge alert", || store.acknowledge_alert(id, Utc::now()))
      .await?;
    if let Some(at) = stored.acknowledged_at {
      self.inbox.acknowledge(id, at);
    }
    Ok(stored)
  }

  pub fn dismiss(&mut self, id: Uuid) { self.inbox.dismiss(id); }

  /// Wait for the next push and apply it. Returns `false` once the hub is
  /// closed.
  pub async fn pump(&mut self) -> Result<bool> {
    match self.subscription.next().await {
      Some(AlertEvent::Alert(alert)) => {
        self.inbox.upsert(alert);
        Ok(true)
      }
      Some(AlertEvent::Gap) => {
        self.refresh().await?;
        Ok(true)
      }
      None => Ok(false),
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;
  use kimi_core::alert::Severity;

  use super::*;
  use crate::delivery::tests::alert_for;

  fn pending(alert: Alert) -> PendingAlert {
    PendingAlert {
      alert,
      subject_name: "Ester".into(),
      device_id: "watch-01".into(),
    }
  }

  #[test]
  fn upsert_is_idempotent() {
    let mut inbox = CaregiverInbox::new();
    let alert = alert_for(Uuid::new_v4());
    inbox.upsert(alert.clone());
    inbox.upsert(alert.clone());
    assert_eq!(inbox.alerts().len(), 1);
    assert_eq!(inbox.unread(), 1);
  }

  #[test]
  fn acknowledged_alert_never_counts() {
    let mut inbox = CaregiverInbox::new();
    let mut alert = alert_for(Uuid::new_v4());
    alert.acknowledged_at = Some(Utc::now());
    inbox.upsert(alert);
    assert_eq!(inbox.unread(), 0);
  }

  #[test]
  fn acknowledge_decrements_once() {
    let mut inbox = CaregiverInbox::new();
    let me = Uuid::new_v4();
    let (a, b) = (alert_for(me), alert_for(me));
    inbox.upsert(a.clone());
    inbox.upsert(b);

    let at = Utc::now();
    assert!(inbox.acknowledge(a.id, at));
    assert!(inbox.acknowledge(a.id, at + Duration::minutes(1)));
    assert_eq!(inbox.unread(), 1);
    assert_eq!(inbox.get(a.id).unwrap().acknowledged_at, Some(at));

    assert!(!inbox.acknowledge(Uuid::new_v4(), at));
    assert_eq!(inbox.unread(), 1);
  }

  #[test]
  fn dismiss_drops_unread_and_stays_dismissed() {
    let mut inbox = CaregiverInbox::new();
    let alert = alert_for(Uuid::new_v4());
    inbox.upsert(alert.clone());
    inbox.dismiss(alert.id);
    assert!(inbox.alerts().is_empty());
    assert_eq!(inbox.unread(), 0);

    inbox.upsert(alert);
    assert!(inbox.alerts().is_empty());
  }

  #[test]
  fn ordering_newest_and_by_severity() {
    let mut inbox = CaregiverInbox::new();
    let me = Uuid::new_v4();
    let t0 = Utc::now();

    let old_high = Alert {
      created_at: t0 - Duration::minutes(10),
      ..alert_for(me)
    };
    let new_low = Alert {
      severity: Severity::Low,
      created_at: t0,
      ..alert_for(me)
    };
    let mid_medium = Alert {
      severity: Severity::Medium,
      created_at: t0 - Duration::minutes(5),
      ..alert_for(me)
    };
    for a in [mid_medium.clone(), old_high.clone(), new_low.clone()] {
      inbox.upsert(a);
    }

    let newest: Vec<_> = inbox.alerts().iter().map(|a| a.id).collect();
    assert_eq!(newest, [new_low.id, mid_medium.id, old_high.id]);

    let ranked: Vec<_> = inbox.by_severity().iter().map(|a| a.id).collect();
    assert_eq!(ranked, [old_high.id, mid_medium.id, new_low.id]);
  }

  #[test]
  fn reconcile_replaces_and_recounts() {
    let mut inbox = CaregiverInbox::new();
    let me = Uuid::new_v4();
    let stale = alert_for(me);
    inbox.upsert(stale.clone());

    let missed = alert_for(me);
    inbox.reconcile(vec![pending(missed.clone())]);
    assert_eq!(inbox.alerts().len(), 1);
    assert_eq!(inbox.alerts()[0].id, missed.id);
    assert_eq!(inbox.unread(), 1);
  }
}
