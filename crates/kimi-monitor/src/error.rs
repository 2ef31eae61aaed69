//! Error type for `kimi-monitor`.

use thiserror::Error;
use uuid::Uuid;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  /// A store call failed with an error that is not worth repeating.
  #[error("store error: {0}")]
  Store(#[source] BoxError),

  #[error("{operation} failed after {attempts} attempts: {source}")]
  RetriesExhausted {
    operation: String,
    attempts:  u32,
    #[source]
    source:    BoxError,
  },

  #[error("subject not found: {0}")]
  SubjectNotFound(Uuid),

  #[error("alert not found: {0}")]
  AlertNotFound(Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
