//! The runtime half of the geofence pipeline: the fix feed, per-subject
//! workers, the persistent breach recorder and the caregiver alert fan-out.

#![allow(async_fn_in_trait)]

pub mod delivery;
pub mod error;
pub mod feed;
pub mod inbox;
pub mod listener;
pub mod recorder;
pub mod retry;

pub use delivery::{AlertEvent, AlertHub, AlertSubscription};
pub use error::{Error, Result};
pub use feed::{FeedEvent, FixFeed, FixHub, FixSubscription};
pub use inbox::{CaregiverInbox, CaregiverSession};
pub use listener::Monitor;
pub use recorder::{MonitorConfig, Recorder};
pub use retry::RetryPolicy;
