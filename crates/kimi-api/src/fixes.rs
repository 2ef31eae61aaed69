//! Handlers for position fixes.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/fixes` | Stores the fix, then publishes it to the monitor |
//! | `GET`  | `/subjects/{id}/fixes/latest` | 404 if the subject has no fix |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::{DateTime, Utc};
use kimi_core::{
  fix::{NewPositionFix, PositionFix},
  geo::Coordinate,
  store::MonitorStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, error::ApiError, subjects::require_subject};

/// Body of `POST /fixes`, in the device's flat wire shape.
#[derive(Debug, Deserialize)]
pub struct FixBody {
  pub subject_id:    Uuid,
  pub latitude:      f64,
  pub longitude:     f64,
  pub accuracy:      Option<f64>,
  pub battery_level: Option<u8>,
  /// Device time; defaults to the time of receipt.
  pub recorded_at:   Option<DateTime<Utc>>,
}

/// `POST /fixes`
pub async fn create<S: MonitorStore>(
  State(state): State<AppState<S>>,
  Json(body): Json<FixBody>,
) -> Result<impl IntoResponse, ApiError> {
  let position = Coordinate::new(body.latitude, body.longitude);
  position.validate()?;
  if body.battery_level.is_some_and(|b| b > 100) {
    return Err(ApiError::BadRequest(
      "battery_level must be between 0 and 100".into(),
    ));
  }
  require_subject(&*state.store, body.subject_id).await?;

  let fix = state
    .store
    .record_fix(NewPositionFix {
      subject_id: body.subject_id,
      position,
      accuracy: body.accuracy,
      battery_level: body.battery_level,
      recorded_at: body.recorded_at.unwrap_or_else(Utc::now),
    })
    .await
    .map_err(ApiError::store)?;

  let listeners = state.fixes.publish(fix.clone());
  tracing::debug!(fix_id = %fix.fix_id, listeners, "fix recorded");
  Ok((StatusCode::CREATED, Json(fix)))
}

/// `GET /subjects/{id}/fixes/latest`
pub async fn latest<S: MonitorStore>(
  State(state): State<AppState<S>>,
  Path(subject_id): Path<Uuid>,
) -> Result<Json<PositionFix>, ApiError> {
  require_subject(&*state.store, subject_id).await?;
  let fix = state
    .store
    .latest_fix(subject_id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("no fix recorded for subject {subject_id}")))?;
  Ok(Json(fix))
}
