//! JSON REST API for the KIMI geofence monitor.
//!
//! Exposes an axum [`Router`] backed by any [`kimi_core::store::MonitorStore`].
//! Fixes posted here are stored and then published to the monitor's fix feed;
//! caregivers receive new alerts over a server-sent event stream.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", kimi_api::api_router(state))
//! ```

pub mod alerts;
pub mod error;
pub mod fixes;
pub mod subjects;
pub mod zones;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, patch, post},
};
use kimi_core::store::MonitorStore;
use kimi_monitor::{AlertHub, FixHub};

pub use error::ApiError;

/// Shared state threaded through all handlers.
pub struct AppState<S> {
  pub store:  Arc<S>,
  pub fixes:  FixHub,
  pub alerts: AlertHub,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      store:  self.store.clone(),
      fixes:  self.fixes.clone(),
      alerts: self.alerts.clone(),
    }
  }
}

/// Build a fully-materialised API router.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(state: AppState<S>) -> Router<()>
where
  S: MonitorStore + 'static,
{
  Router::new()
    // Subjects
    .route("/subjects", get(subjects::list::<S>).post(subjects::create::<S>))
    .route("/subjects/{id}", get(subjects::get_one::<S>))
    .route("/subjects/{id}/status", get(subjects::status::<S>))
    .route("/subjects/{id}/zones", get(zones::list::<S>))
    .route("/subjects/{id}/geofence", get(zones::check::<S>))
    .route("/subjects/{id}/fixes/latest", get(fixes::latest::<S>))
    // Safe zones
    .route("/zones", post(zones::create::<S>))
    .route(
      "/zones/{id}",
      patch(zones::update::<S>).delete(zones::delete_one::<S>),
    )
    // Fixes
    .route("/fixes", post(fixes::create::<S>))
    // Alerts
    .route("/caregivers/{id}/alerts", get(alerts::pending::<S>))
    .route("/caregivers/{id}/alerts/stream", get(alerts::stream::<S>))
    .route("/alerts/{id}/acknowledge", post(alerts::acknowledge::<S>))
    .with_state(state)
}
