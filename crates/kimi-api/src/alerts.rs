//! Handlers for caregiver alerts.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/caregivers/{id}/alerts` | Unacknowledged alerts, newest first |
//! | `GET`  | `/caregivers/{id}/alerts/stream` | Server-sent events, see [`stream`] |
//! | `POST` | `/alerts/{id}/acknowledge` | Returns the alert; acknowledging twice keeps the first time |

use std::{convert::Infallible, sync::Arc};

use axum::{
  Json,
  extract::{Path, State},
  response::sse::{Event, KeepAlive, Sse},
};
use chrono::Utc;
use futures::{Stream, StreamExt as _, stream};
use kimi_core::{
  alert::{Alert, PendingAlert},
  store::MonitorStore,
};
use kimi_monitor::{AlertEvent, AlertSubscription};
use serde::Serialize;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

fn sse_event(kind: &str, payload: &impl Serialize) -> Result<Event, ApiError> {
  Ok(Event::default().event(kind).data(serde_json::to_string(payload)?))
}

/// `GET /caregivers/{id}/alerts`
pub async fn pending<S: MonitorStore>(
  State(state): State<AppState<S>>,
  Path(caregiver_id): Path<Uuid>,
) -> Result<Json<Vec<PendingAlert>>, ApiError> {
  let pending = state
    .store
    .pending_alerts(caregiver_id)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(pending))
}

/// `POST /alerts/{id}/acknowledge`
pub async fn acknowledge<S: MonitorStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Alert>, ApiError> {
  state
    .store
    .get_alert(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("alert {id} not found")))?;

  let alert = state
    .store
    .acknowledge_alert(id, Utc::now())
    .await
    .map_err(ApiError::store)?;
  tracing::info!(alert_id = %id, "alert acknowledged");
  Ok(Json(alert))
}

/// `GET /caregivers/{id}/alerts/stream`
///
/// Opens with a `snapshot` event carrying the pending list, then sends one
/// `alert` event per new alert. If pushes are dropped the stream sends a fresh
/// `snapshot`, so a client can always replace its list with the latest
/// snapshot and apply alerts on top.
pub async fn stream<S: MonitorStore + 'static>(
  State(state): State<AppState<S>>,
  Path(caregiver_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
  // Subscribe before the snapshot so nothing stored in between is lost.
  let subscription = state.alerts.subscribe(caregiver_id);
  let pending = state
    .store
    .pending_alerts(caregiver_id)
    .await
    .map_err(ApiError::store)?;
  let snapshot = sse_event("snapshot", &pending)?;
  tracing::debug!(%caregiver_id, pending = pending.len(), "alert stream opened");

  let live = stream::unfold(
    (subscription, state.store.clone()),
    |(mut subscription, store)| async move {
      let event = next_event(&mut subscription, &store).await?;
      Some((Ok::<_, Infallible>(event), (subscription, store)))
    },
  );

  Ok(
    Sse::new(stream::once(async { Ok::<_, Infallible>(snapshot) }).chain(live))
      .keep_alive(KeepAlive::default()),
  )
}

/// `None` ends the stream; the client is expected to reconnect.
async fn next_event<S: MonitorStore>(
  subscription: &mut AlertSubscription,
  store: &Arc<S>,
) -> Option<Event> {
  let caregiver_id = subscription.caregiver_id();
  let event = match subscription.next().await? {
    AlertEvent::Alert(alert) => sse_event("alert", &alert),
    AlertEvent::Gap => match store.pending_alerts(caregiver_id).await {
      Ok(pending) => sse_event("snapshot", &pending),
      Err(e) => Err(ApiError::store(e)),
    },
  };

  event
    .inspect_err(|e| tracing::error!(%caregiver_id, error = %e, "closing alert stream"))
    .ok()
}
