//! Alert fan-out to connected caregivers.

use kimi_core::alert::Alert;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
  Alert(Alert),
  /// Pushes were dropped; re-fetch the pending list.
  Gap,
}

/// Broadcasts every newly stored alert. Each subscription filters to one
/// caregiver.
#[derive(Debug, Clone)]
pub struct AlertHub {
  tx: broadcast::Sender<Alert>,
}

impl AlertHub {
  pub fn new(capacity: usize) -> Self {
    let (tx, _) = broadcast::channel(capacity.max(1));
    Self { tx }
  }

  /// Returns the number of live subscriptions the alert reached, of any
  /// caregiver.
  pub fn publish(&self, alert: Alert) -> usize {
    let id = alert.id;
    let receivers = self.tx.send(alert).unwrap_or(0);
    tracing::debug!(alert_id = %id, receivers, "alert published");
    receivers
  }

  pub fn subscribe(&self, caregiver_id: Uuid) -> AlertSubscription {
    AlertSubscription {
      caregiver_id,
      rx: self.tx.subscribe(),
    }
  }
}

#[derive(Debug)]
pub struct AlertSubscription {
  caregiver_id: Uuid,
  rx:           broadcast::Receiver<Alert>,
}

impl AlertSubscription {
  pub fn caregiver_id(&self) -> Uuid { self.caregiver_id }

  /// The next alert for this caregiver, a gap marker, or `None` once the hub
  /// is gone.
  pub async fn next(&mut self) -> Option<AlertEvent> {
    loop {
      match self.rx.recv().await {
        Ok(alert) if alert.caregiver_id == self.caregiver_id => {
          return Some(AlertEvent::Alert(alert));
        }
        Ok(_) => continue,
        Err(broadcast::error::RecvError::Lagged(missed)) => {
          tracing::warn!(
            caregiver_id = %self.caregiver_id,
            missed,
            "alert subscription lagged"
          );
          return Some(AlertEvent::Gap);
        }
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }
}
