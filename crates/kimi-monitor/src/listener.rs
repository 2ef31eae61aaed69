//! The location ingestion listener.
//!
//! [`Monitor::run`] reads the fix feed and hands each fix to a worker task
//! owned by the fix's subject. A worker processes its subject's fixes one at
//! a time, in `recorded_at` order, and remembers the newest timestamp it has
//! handled (its watermark). Fixes at or before the watermark are duplicates
//! or late arrivals and are dropped.
//!
//! A worker reconciles against the store when it starts and whenever the
//! feed reports a gap, so fixes missed while disconnected are still
//! evaluated.
//!
//! A fix whose processing ran out of retries is held by the worker and
//! processed again, ahead of newer fixes, the next time the worker wakes.
//! A worker that sees nothing for the configured idle timeout removes
//! itself; the subject's next fix starts a fresh one.

use std::{
  collections::HashMap,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
};

use chrono::{DateTime, Utc};
use kimi_core::{fix::PositionFix, store::MonitorStore};
use tokio::{
  sync::{Mutex, mpsc},
  task::JoinHandle,
};
use uuid::Uuid;

use crate::{
  AlertHub, Error, FeedEvent, FixSubscription, MonitorConfig, Recorder, Result,
};

/// Upper bound on fixes a worker holds for another attempt.
const MAX_HELD_FIXES: usize = 32;

enum Command {
  Fix(PositionFix),
  Reconcile,
}

struct Worker {
  /// Distinguishes this worker from a later one for the same subject.
  generation: u64,
  tx:         mpsc::UnboundedSender<Command>,
  handle:     JoinHandle<()>,
}

type Workers = Arc<Mutex<HashMap<Uuid, Worker>>>;

pub struct Monitor<S> {
  recorder:    Arc<Recorder<S>>,
  workers:     Workers,
  generations: AtomicU64,
}

impl<S: MonitorStore + 'static> Monitor<S> {
  pub fn new(store: Arc<S>, alerts: AlertHub, config: MonitorConfig) -> Self {
    Self {
      recorder:    Arc::new(Recorder::new(store, alerts, config)),
      workers:     Arc::default(),
      generations: AtomicU64::new(0),
    }
  }

  /// Consume `feed` until it closes.
  pub async fn run<F: FixSubscription>(&self, mut feed: F) {
    tracing::info!("monitor listening for position fixes");

    while let Some(event) = feed.next().await {
      match event {
        FeedEvent::Fix(fix) => self.dispatch(fix).await,
        FeedEvent::Gap => {
          tracing::warn!("fix feed reported a gap; reconciling all subjects");
          if let Err(e) = self.reconcile_all().await {
            tracing::error!(error = %e, "reconciliation after gap failed");
          }
        }
      }
    }

    tracing::info!("fix feed closed");
  }

  /// Start a worker for `subject_id` now instead of on its first fix. The
  /// worker immediately catches up on the subject's latest fix.
  pub async fn watch(&self, subject_id: Uuid) {
    let mut workers = self.workers.lock().await;
    self.ensure_worker(&mut workers, subject_id);
  }

  /// Number of subjects with a live worker.
  pub async fn watched(&self) -> usize {
    self.workers.lock().await.len()
  }

  /// Stop every worker. Fixes still queued are discarded; they are picked up
  /// again from the store when a worker next reconciles.
  pub async fn shutdown(&self) {
    let mut workers = self.workers.lock().await;
    for (subject_id, worker) in workers.drain() {
      tracing::debug!(%subject_id, "stopping worker");
      worker.handle.abort();
    }
  }

  async fn dispatch(&self, fix: PositionFix) {
    let mut workers = self.workers.lock().await;
    let subject_id = fix.subject_id;
    let worker = self.ensure_worker(&mut workers, subject_id);
    if let Err(mpsc::error::SendError(Command::Fix(fix))) =
      worker.tx.send(Command::Fix(fix))
    {
      // The worker is gone; a fresh one reconciles from the store on start,
      // which covers this fix too.
      tracing::warn!(%subject_id, fix_id = %fix.fix_id, "worker stopped; restarting");
      workers.remove(&subject_id);
      self.ensure_worker(&mut workers, subject_id);
    }
  }

  async fn reconcile_all(&self) -> Result<()> {
    let store = self.recorder.store().clone();
    let subjects = self
      .recorder
      .retry_policy()
      .run("list subjects", || store.list_subjects())
      .await?;

    let mut workers = self.workers.lock().await;
    for subject in subjects {
      let subject_id = subject.subject_id;
      if let Some(worker) = workers.get(&subject_id) {
        if worker.tx.send(Command::Reconcile).is_ok() {
          continue;
        }
        workers.remove(&subject_id);
      }
      self.ensure_worker(&mut workers, subject_id);
    }
    Ok(())
  }

  fn ensure_worker<'a>(
    &self,
    workers: &'a mut HashMap<Uuid, Worker>,
    subject_id: Uuid,
  ) -> &'a Worker {
    workers.entry(subject_id).or_insert_with(|| {
      tracing::debug!(%subject_id, "starting worker");
      let generation = self.generations.fetch_add(1, Ordering::Relaxed);
      let (tx, rx) = mpsc::unbounded_channel();
      let handle = tokio::spawn(run_worker(
        self.recorder.clone(),
        self.workers.clone(),
        subject_id,
        generation,
        rx,
      ));
      Worker {
        generation,
        tx,
        handle,
      }
    })
  }
}

async fn run_worker<S: MonitorStore + 'static>(
  recorder: Arc<Recorder<S>>,
  workers: Workers,
  subject_id: Uuid,
  generation: u64,
  mut rx: mpsc::UnboundedReceiver<Command>,
) {
  let idle_timeout = recorder.config().worker_idle_timeout;
  let mut watermark: Option<DateTime<Utc>> = None;
  let mut held: Vec<PositionFix> = Vec::new();
  let mut reconcile = true;

  loop {
    let mut batch = Vec::new();

    if !reconcile {
      let next = if held.is_empty() {
        match tokio::time::timeout(idle_timeout, rx.recv()).await {
          Ok(next) => next,
          Err(_) => {
            if retire(&workers, subject_id, generation, &rx).await {
              break;
            }
            continue;
          }
        }
      } else {
        rx.recv().await
      };
      match next {
        Some(cmd) => absorb(cmd, &mut batch, &mut reconcile),
        None => break,
      }
    }
    while let Ok(cmd) = rx.try_recv() {
      absorb(cmd, &mut batch, &mut reconcile);
    }

    if reconcile {
      reconcile = false;
      match recorder.fixes_after(subject_id, watermark).await {
        Ok(missed) => {
          if !missed.is_empty() {
            tracing::debug!(%subject_id, count = missed.len(), "caught up on missed fixes");
          }
          batch.extend(missed);
        }
        Err(e) => tracing::error!(%subject_id, error = %e, "could not reconcile fixes"),
      }
    }

    let fresh = order_batch(batch, watermark);
    let retrying = std::mem::take(&mut held);
    for fix in retrying.into_iter().chain(fresh) {
      watermark = watermark.max(Some(fix.recorded_at));

      if let Err(e) = fix.position.validate() {
        tracing::warn!(%subject_id, fix_id = %fix.fix_id, error = %e, "skipping invalid fix");
        continue;
      }
      match recorder.process(&fix).await {
        Ok(_) => {}
        Err(e @ Error::RetriesExhausted { .. }) => {
          tracing::error!(%subject_id, fix_id = %fix.fix_id, error = %e, "holding fix for another attempt");
          if held.len() == MAX_HELD_FIXES {
            let dropped = held.remove(0);
            tracing::warn!(%subject_id, fix_id = %dropped.fix_id, "too many held fixes; dropping the oldest");
          }
          held.push(fix);
        }
        Err(e) => {
          tracing::error!(%subject_id, fix_id = %fix.fix_id, error = %e, "failed to process fix");
        }
      }
    }
  }

  tracing::debug!(%subject_id, "worker stopped");
}

/// Remove an idle worker from the map. Senders hold the map lock, so once
/// the entry is gone under that lock nothing more can reach `rx`. Returns
/// `false` if a command arrived in the meantime.
async fn retire(
  workers: &Mutex<HashMap<Uuid, Worker>>,
  subject_id: Uuid,
  generation: u64,
  rx: &mpsc::UnboundedReceiver<Command>,
) -> bool {
  let mut workers = workers.lock().await;
  if !rx.is_empty() {
    return false;
  }
  if workers
    .get(&subject_id)
    .is_some_and(|w| w.generation == generation)
  {
    workers.remove(&subject_id);
    tracing::debug!(%subject_id, "retiring idle worker");
  }
  true
}

fn absorb(cmd: Command, batch: &mut Vec<PositionFix>, reconcile: &mut bool) {
  match cmd {
    Command::Fix(fix) => batch.push(fix),
    Command::Reconcile => *reconcile = true,
  }
}

/// Sort a batch by `recorded_at` and drop everything at or before
/// `watermark`, including repeats within the batch.
pub(crate) fn order_batch(
  mut batch: Vec<PositionFix>,
  watermark: Option<DateTime<Utc>>,
) -> Vec<PositionFix> {
  batch.sort_by_key(|f| f.recorded_at);
  let mut mark = watermark;
  batch.retain(|fix| {
    let fresh = mark.is_none_or(|m| fix.recorded_at > m);
    if fresh {
      mark = Some(fix.recorded_at);
    } else {
      tracing::debug!(
        subject_id = %fix.subject_id,
        fix_id = %fix.fix_id,
        "dropping duplicate or late fix"
      );
    }
    fresh
  });
  batch
}

#[cfg(test)]
mod tests {
  use chrono::Duration;
  use kimi_core::geo::Coordinate;

  use super::*;

  fn fix_at(t: DateTime<Utc>) -> PositionFix {
    PositionFix {
      fix_id:        Uuid::new_v4(),
      subject_id:    Uuid::nil(),
      position:      Coordinate::new(38.7223, -9.1393),
      accuracy:      None,
      battery_level: None,
      recorded_at:   t,
    }
  }

  #[test]
  fn shuffled_batch_is_sorted() {
    let t0 = Utc::now();
    let batch = [3, 0, 2, 1]
      .map(|m| fix_at(t0 + Duration::seconds(m)))
      .to_vec();
    let times: Vec<_> = order_batch(batch, None)
      .iter()
      .map(|f| (f.recorded_at - t0).num_seconds())
      .collect();
    assert_eq!(times, [0, 1, 2, 3]);
  }

  #[test]
  fn late_and_repeated_fixes_are_dropped() {
    let t0 = Utc::now();
    let dup = fix_at(t0 + Duration::seconds(5));
    let batch = vec![
      fix_at(t0 - Duration::seconds(1)),
      fix_at(t0),
      dup.clone(),
      dup.clone(),
      fix_at(t0 + Duration::seconds(6)),
    ];
    let kept = order_batch(batch, Some(t0));
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0], dup);
  }
}
