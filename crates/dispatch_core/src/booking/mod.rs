//! Bookings: the record, the transition table and the state machine that
//! applies transitions together with their availability side effects.

pub mod machine;
pub mod states;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{BookingId, Location, UserId, VehicleClass, VehicleId};

pub use machine::{BookingStateMachine, Promotion};
pub use states::{transition, BookingEvent, BookingStatus};

/// One recorded status change. `from` is `None` for the creating transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub from: Option<BookingStatus>,
    pub to: BookingStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: BookingId,
    pub rider: UserId,
    /// Bound driver. A bound driver and vehicle are always claimed in the fleet
    /// until the booking reaches a terminal state.
    pub driver: Option<UserId>,
    pub vehicle: Option<VehicleId>,
    pub vehicle_class: VehicleClass,
    pub pickup: Location,
    pub dropoff: Location,
    pub status: BookingStatus,
    pub price: f64,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub driver_rating: Option<u8>,
    pub has_incident: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by the store on every write.
    pub version: u64,
    pub history: Vec<StatusChange>,
}

impl Booking {
    pub fn is_party(&self, user: UserId) -> bool {
        self.rider == user || self.driver == Some(user)
    }

    pub fn is_driven_by(&self, user: UserId) -> bool {
        self.driver == Some(user)
    }

    /// Sequence of statuses this booking has passed through, oldest first.
    pub fn status_walk(&self) -> Vec<BookingStatus> {
        self.history.iter().map(|change| change.to).collect()
    }
}

/// Validated, priced input to [`BookingStateMachine::create`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewBooking {
    pub rider: UserId,
    /// Already claimed in the fleet when present.
    pub assignment: Option<(UserId, VehicleId)>,
    pub vehicle_class: VehicleClass,
    pub pickup: Location,
    pub dropoff: Location,
    pub price: f64,
    pub scheduled_time: Option<DateTime<Utc>>,
}

/// Who is asking for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Rider(UserId),
    Driver(UserId),
    Admin(UserId),
    /// Scheduler, simulator and other in-process components.
    System,
}

impl Actor {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::Rider(id) | Self::Driver(id) | Self::Admin(id) => Some(*id),
            Self::System => None,
        }
    }
}
