//! Live position tracking: the last-known-position cache and the per-booking
//! topics that fan position updates out to the rider and driver.

pub mod cache;
pub mod channel;

pub use cache::{InMemoryLocationCache, LocationCache};
pub use channel::{PositionOrigin, Subscription, TrackingChannel, TrackingEvent};
