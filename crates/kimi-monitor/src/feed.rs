//! The position-fix feed: the push channel the monitor listens on.

use std::future::Future;

use kimi_core::fix::PositionFix;
use tokio::sync::broadcast;

/// One item delivered by a fix feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
  Fix(PositionFix),
  /// Events may have been missed (disconnect or a slow consumer). The
  /// consumer must reconcile against the store.
  Gap,
}

/// A source of position fixes.
pub trait FixFeed: Send + Sync {
  type Subscription: FixSubscription;

  fn subscribe(&self) -> Self::Subscription;
}

pub trait FixSubscription: Send {
  /// The next event, or `None` once the feed is closed for good.
  fn next(&mut self) -> impl Future<Output = Option<FeedEvent>> + Send + '_;
}

// ─── In-process hub ──────────────────────────────────────────────────────────

/// In-process fix feed over a bounded broadcast channel. Subscribers that
/// fall more than `capacity` fixes behind observe a [`FeedEvent::Gap`].
#[derive(Debug, Clone)]
pub struct FixHub {
  tx: broadcast::Sender<PositionFix>,
}

impl FixHub {
  pub fn new(capacity: usize) -> Self {
    let (tx, _) = broadcast::channel(capacity.max(1));
    Self { tx }
  }

  /// Publish a fix to every current subscriber. Returns how many received it.
  pub fn publish(&self, fix: PositionFix) -> usize {
    self.tx.send(fix).unwrap_or(0)
  }
}

impl FixFeed for FixHub {
  type Subscription = HubSubscription;

  fn subscribe(&self) -> HubSubscription {
    HubSubscription {
      rx: self.tx.subscribe(),
    }
  }
}

#[derive(Debug)]
pub struct HubSubscription {
  rx: broadcast::Receiver<PositionFix>,
}

impl FixSubscription for HubSubscription {
  async fn next(&mut self) -> Option<FeedEvent> {
    match self.rx.recv().await {
      Ok(fix) => Some(FeedEvent::Fix(fix)),
      Err(broadcast::error::RecvError::Lagged(missed)) => {
        tracing::warn!(missed, "fix feed lagged");
        Some(FeedEvent::Gap)
      }
      Err(broadcast::error::RecvError::Closed) => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use kimi_core::geo::Coordinate;
  use uuid::Uuid;

  use super::*;

  fn fix() -> PositionFix {
    PositionFix {
      fix_id:        Uuid::new_v4(),
      subject_id:    Uuid::new_v4(),
      position:      Coordinate::new(38.7223, -9.1393),
      accuracy:      None,
      battery_level: None,
      recorded_at:   Utc::now(),
    }
  }

  #[tokio::test]
  async fn delivers_fixes_in_order() {
    let hub = FixHub::new(8);
    let mut sub = hub.subscribe();
    let (a, b) = (fix(), fix());
    assert_eq!(hub.publish(a.clone()), 1);
    hub.publish(b.clone());

    assert_eq!(sub.next().await, Some(FeedEvent::Fix(a)));
    assert_eq!(sub.next().await, Some(FeedEvent::Fix(b)));
  }

  #[tokio::test]
  async fn lagging_subscriber_sees_gap() {
    let hub = FixHub::new(2);
    let mut sub = hub.subscribe();
    for _ in 0..5 {
      hub.publish(fix());
    }

    assert_eq!(sub.next().await, Some(FeedEvent::Gap));
    assert!(matches!(sub.next().await, Some(FeedEvent::Fix(_))));
  }

  #[tokio::test]
  async fn publish_without_subscribers_is_fine() {
    let hub = FixHub::new(2);
    assert_eq!(hub.publish(fix()), 0);
  }

  #[tokio::test]
  async fn closed_when_hub_dropped() {
    let hub = FixHub::new(2);
    let mut sub = hub.subscribe();
    drop(hub);
    assert_eq!(sub.next().await, None);
  }
}
