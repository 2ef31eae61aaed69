//! Error type for `kimi-store-sqlite`.

use kimi_core::{Classify, RetryStrategy, ValidationError};
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] kimi_core::Error),

  #[error("invalid safe zone: {0}")]
  Validation(#[from] ValidationError),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("subject not found: {0}")]
  SubjectNotFound(uuid::Uuid),

  #[error("safe zone not found: {0}")]
  ZoneNotFound(uuid::Uuid),

  #[error("alert not found: {0}")]
  AlertNotFound(uuid::Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Classify for Error {
  /// Busy or locked databases and a closed connection thread are transient;
  /// everything else (constraints, decoding, missing rows) is permanent.
  fn retry_strategy(&self) -> RetryStrategy {
    match self {
      Error::Database(tokio_rusqlite::Error::ConnectionClosed) => {
        RetryStrategy::Retry
      }
      Error::Database(tokio_rusqlite::Error::Rusqlite(e)) => {
        match e.sqlite_error_code() {
          Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            RetryStrategy::Retry
          }
          _ => RetryStrategy::Fail,
        }
      }
      _ => RetryStrategy::Fail,
    }
  }
}
