//! Subject: the monitored person ("loved one").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A monitored person and the caregiver their alerts are routed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
  pub subject_id:   Uuid,
  pub caregiver_id: Uuid,
  pub full_name:    String,
  /// Identifier of the reporting device (watch, phone).
  pub device_id:    String,
  pub created_at:   DateTime<Utc>,
}

/// Input to [`crate::store::MonitorStore::add_subject`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubject {
  pub caregiver_id: Uuid,
  pub full_name:    String,
  pub device_id:    String,
}
