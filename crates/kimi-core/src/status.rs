//! The computed "subject at a glance" read model, never stored.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  evaluate::{Evaluation, evaluate},
  fix::PositionFix,
  subject::Subject,
  zone::SafeZone,
};

/// A fix older than this many minutes is shown as stale.
pub const STALE_AFTER_MINUTES: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectStatus {
  pub subject:        Subject,
  pub last_fix:       Option<PositionFix>,
  /// `true` when there is no fix or the last one is older than
  /// [`STALE_AFTER_MINUTES`].
  pub is_stale:       bool,
  /// Evaluation of the last fix against the current active zones; empty when
  /// there is no fix.
  pub evaluation:     Evaluation,
  pub pending_alerts: usize,
  pub as_of:          DateTime<Utc>,
}

impl SubjectStatus {
  pub fn compute(
    subject: Subject,
    last_fix: Option<PositionFix>,
    active_zones: &[SafeZone],
    pending_alerts: usize,
    as_of: DateTime<Utc>,
  ) -> Self {
    let is_stale = last_fix
      .as_ref()
      .is_none_or(|f| as_of - f.recorded_at > Duration::minutes(STALE_AFTER_MINUTES));
    let evaluation = last_fix
      .as_ref()
      .map(|f| evaluate(subject.subject_id, f.position, active_zones))
      .unwrap_or_default();

    Self {
      subject,
      last_fix,
      is_stale,
      evaluation,
      pending_alerts,
      as_of,
    }
  }
}
