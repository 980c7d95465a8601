//! Dispatch and tracking engine: pricing, nearest-driver matching, the
//! booking lifecycle, live position fan-out and scheduled-booking promotion.

pub mod booking;
pub mod clock;
pub mod config;
pub mod error;
pub mod fleet;
pub mod matching;
pub mod model;
pub mod pricing;
pub mod scheduler;
pub mod service;
pub mod simulator;
pub mod spatial;
pub mod store;
pub mod tracking;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use booking::{Actor, Booking, BookingEvent, BookingStateMachine, BookingStatus};
pub use config::DispatchConfig;
pub use error::{DispatchError, DispatchResult};
pub use service::{BookingRequest, DispatchService};
