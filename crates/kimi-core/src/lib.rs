//! Core types and trait definitions for the KIMI geofence monitor.
//!
//! This crate is deliberately free of HTTP, database and runtime
//! dependencies. It holds the geometry, the stateless evaluator, the
//! breach-state bookkeeping and the [`store::MonitorStore`] abstraction that
//! every other crate builds on.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod alert;
pub mod breach;
pub mod error;
pub mod evaluate;
pub mod fix;
pub mod geo;
pub mod status;
pub mod store;
pub mod subject;
pub mod zone;

pub use error::{Classify, Error, Result, RetryStrategy, ValidationError};
