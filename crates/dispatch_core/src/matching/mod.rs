pub mod nearest;
pub mod types;

pub use nearest::DriverMatcher;
pub use types::{Availability, MatchCandidate};
