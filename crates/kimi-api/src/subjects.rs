//! Handlers for `/subjects` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/subjects` | |
//! | `POST` | `/subjects` | Body: `{"caregiver_id":"…","full_name":"…","device_id":"…"}` |
//! | `GET`  | `/subjects/{id}` | 404 if not found |
//! | `GET`  | `/subjects/{id}/status` | Last fix, staleness, containment, pending alert count |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::Utc;
use kimi_core::{
  status::SubjectStatus,
  store::MonitorStore,
  subject::{NewSubject, Subject},
};
use uuid::Uuid;

use crate::{AppState, error::ApiError};

/// Look a subject up or fail with 404.
pub(crate) async fn require_subject<S: MonitorStore>(
  store: &S,
  id: Uuid,
) -> Result<Subject, ApiError> {
  store
    .get_subject(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("subject {id} not found")))
}

// ─── List ─────────────────────────────────────────────────────────────────────

/// `GET /subjects`
pub async fn list<S: MonitorStore>(
  State(state): State<AppState<S>>,
) -> Result<Json<Vec<Subject>>, ApiError> {
  let subjects = state.store.list_subjects().await.map_err(ApiError::store)?;
  Ok(Json(subjects))
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// `POST /subjects`
pub async fn create<S: MonitorStore>(
  State(state): State<AppState<S>>,
  Json(body): Json<NewSubject>,
) -> Result<impl IntoResponse, ApiError> {
  if body.full_name.trim().is_empty() {
    return Err(ApiError::BadRequest("full_name must not be empty".into()));
  }
  let subject = state.store.add_subject(body).await.map_err(ApiError::store)?;
  tracing::info!(subject_id = %subject.subject_id, "subject registered");
  Ok((StatusCode::CREATED, Json(subject)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /subjects/{id}`
pub async fn get_one<S: MonitorStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Subject>, ApiError> {
  Ok(Json(require_subject(&*state.store, id).await?))
}

// ─── Status ───────────────────────────────────────────────────────────────────

/// `GET /subjects/{id}/status`
pub async fn status<S: MonitorStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<SubjectStatus>, ApiError> {
  let store = &*state.store;
  let subject = require_subject(store, id).await?;
  let last_fix = store.latest_fix(id).await.map_err(ApiError::store)?;
  let zones = store.active_zones(id).await.map_err(ApiError::store)?;
  let pending = store
    .pending_alerts(subject.caregiver_id)
    .await
    .map_err(ApiError::store)?
    .iter()
    .filter(|p| p.alert.subject_id == id)
    .count();

  Ok(Json(SubjectStatus::compute(
    subject,
    last_fix,
    &zones,
    pending,
    Utc::now(),
  )))
}
