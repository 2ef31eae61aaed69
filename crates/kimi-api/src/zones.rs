//! Handlers for safe-zone endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/subjects/{id}/zones` | Optional `?include_inactive=true` |
//! | `GET`    | `/subjects/{id}/geofence` | `?latitude=…&longitude=…`; evaluates a point against the active zones |
//! | `POST`   | `/zones` | 400 with the validation message on a bad definition |
//! | `PATCH`  | `/zones/{id}` | Partial update; the merged zone is validated |
//! | `DELETE` | `/zones/{id}` | 204; 404 if not found |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::Utc;
use kimi_core::{
  evaluate::{Evaluation, evaluate},
  geo::Coordinate,
  store::MonitorStore,
  zone::{NewSafeZone, SafeZone, SafeZonePatch},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, error::ApiError, subjects::require_subject};

async fn require_zone<S: MonitorStore>(store: &S, id: Uuid) -> Result<SafeZone, ApiError> {
  store
    .get_zone(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("safe zone {id} not found")))
}

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  #[serde(default)]
  pub include_inactive: bool,
}

/// `GET /subjects/{id}/zones[?include_inactive=true]`
pub async fn list<S: MonitorStore>(
  State(state): State<AppState<S>>,
  Path(subject_id): Path<Uuid>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<SafeZone>>, ApiError> {
  require_subject(&*state.store, subject_id).await?;
  let zones = state
    .store
    .list_zones(subject_id, params.include_inactive)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(zones))
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// `POST /zones`
pub async fn create<S: MonitorStore>(
  State(state): State<AppState<S>>,
  Json(body): Json<NewSafeZone>,
) -> Result<impl IntoResponse, ApiError> {
  body.validate()?;
  require_subject(&*state.store, body.subject_id).await?;

  let zone = state.store.create_zone(body).await.map_err(ApiError::store)?;
  tracing::info!(zone_id = %zone.id, subject_id = %zone.subject_id, "safe zone created");
  Ok((StatusCode::CREATED, Json(zone)))
}

// ─── Update ───────────────────────────────────────────────────────────────────

/// `PATCH /zones/{id}`
pub async fn update<S: MonitorStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
  Json(patch): Json<SafeZonePatch>,
) -> Result<Json<SafeZone>, ApiError> {
  let mut preview = require_zone(&*state.store, id).await?;
  patch.clone().apply(&mut preview, Utc::now())?;

  let zone = state
    .store
    .update_zone(id, patch)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(zone))
}

// ─── Delete ───────────────────────────────────────────────────────────────────

/// `DELETE /zones/{id}`
pub async fn delete_one<S: MonitorStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
  require_zone(&*state.store, id).await?;
  state.store.delete_zone(id).await.map_err(ApiError::store)?;
  tracing::info!(zone_id = %id, "safe zone deleted");
  Ok(StatusCode::NO_CONTENT)
}

// ─── Ad-hoc check ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CheckParams {
  pub latitude:  f64,
  pub longitude: f64,
}

/// `GET /subjects/{id}/geofence?latitude=…&longitude=…`
pub async fn check<S: MonitorStore>(
  State(state): State<AppState<S>>,
  Path(subject_id): Path<Uuid>,
  Query(params): Query<CheckParams>,
) -> Result<Json<Evaluation>, ApiError> {
  let point = Coordinate::new(params.latitude, params.longitude);
  point.validate()?;
  require_subject(&*state.store, subject_id).await?;

  let zones = state
    .store
    .active_zones(subject_id)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(evaluate(subject_id, point, &zones)))
}
