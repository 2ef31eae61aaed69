//! Error types for `kimi-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::zone::{MAX_RADIUS_METERS, MIN_RADIUS_METERS};

#[derive(Debug, Error)]
pub enum Error {
  #[error("subject not found: {0}")]
  SubjectNotFound(Uuid),

  #[error("safe zone not found: {0}")]
  ZoneNotFound(Uuid),

  #[error("alert not found: {0}")]
  AlertNotFound(Uuid),

  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error("unknown alert type: {0:?}")]
  UnknownAlertType(String),

  #[error("unknown severity: {0:?}")]
  UnknownSeverity(String),

  #[error("unknown breach key: {0:?}")]
  UnknownBreachKey(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// A malformed safe-zone definition or coordinate. Rejected before it can
/// reach the evaluator; the message is shown to the caregiver as-is.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
  #[error(
    "radius must be between {MIN_RADIUS_METERS} and {MAX_RADIUS_METERS} meters, got {0}"
  )]
  RadiusOutOfRange(f64),

  #[error("latitude must be between -90 and 90, got {0}")]
  LatitudeOutOfRange(f64),

  #[error("longitude must be between -180 and 180, got {0}")]
  LongitudeOutOfRange(f64),

  #[error("safe zone name must not be empty")]
  EmptyName,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

// ─── Retry classification ────────────────────────────────────────────────────

/// Whether an operation that failed with a given error is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
  /// Transient failure (timeout, busy database, dropped connection).
  Retry,
  /// Permanent failure; repeating the call cannot succeed.
  Fail,
}

/// Implemented by store errors so the pipeline can tell transient failures
/// from permanent ones.
pub trait Classify {
  fn retry_strategy(&self) -> RetryStrategy;
}

impl Classify for Error {
  fn retry_strategy(&self) -> RetryStrategy { RetryStrategy::Fail }
}
