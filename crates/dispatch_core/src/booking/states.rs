use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};

/// Booking lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Scheduled,
    Pending,
    Assigned,
    EnRoute,
    GoodsCollected,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 7] = [
        Self::Scheduled,
        Self::Pending,
        Self::Assigned,
        Self::EnRoute,
        Self::GoodsCollected,
        Self::Completed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::EnRoute => "en_route",
            Self::GoodsCollected => "goods_collected",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// States in which a driver is on the job and may publish positions.
    pub fn is_active_trip(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Assigned | Self::EnRoute | Self::GoodsCollected
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DispatchError::validation(format!("unknown booking status {s:?}")))
    }
}

/// Events that drive booking transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingEvent {
    /// Scheduler found the booking due and bound a driver.
    Promote,
    /// Driver reports heading to pickup.
    StartEnRoute,
    /// Driver reports pickup done.
    CollectGoods,
    /// Driver marks the job done.
    Complete,
    Cancel,
}

impl BookingEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Promote => "promote",
            Self::StartEnRoute => "start_en_route",
            Self::CollectGoods => "collect_goods",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
        }
    }

    /// Event that moves a booking into `target`.
    pub fn for_target(target: BookingStatus) -> DispatchResult<Self> {
        match target {
            BookingStatus::Assigned => Ok(Self::Promote),
            BookingStatus::EnRoute => Ok(Self::StartEnRoute),
            BookingStatus::GoodsCollected => Ok(Self::CollectGoods),
            BookingStatus::Completed => Ok(Self::Complete),
            BookingStatus::Cancelled => Ok(Self::Cancel),
            BookingStatus::Scheduled | BookingStatus::Pending => Err(DispatchError::validation(
                format!("{target} is only reachable by creating a booking"),
            )),
        }
    }
}

impl fmt::Display for BookingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_type())
    }
}

/// The transition table. Pure; side effects live in the state machine.
pub fn transition(from: BookingStatus, event: BookingEvent) -> DispatchResult<BookingStatus> {
    use BookingEvent as E;
    use BookingStatus as S;

    let to = match (from, event) {
        (S::Scheduled, E::Promote) => S::Assigned,
        (S::Pending | S::Assigned, E::StartEnRoute) => S::EnRoute,
        (S::EnRoute, E::CollectGoods) => S::GoodsCollected,
        (S::GoodsCollected | S::Assigned, E::Complete) => S::Completed,
        (S::Pending | S::Assigned | S::Scheduled, E::Cancel) => S::Cancelled,
        _ => return Err(DispatchError::InvalidTransition { from, event }),
    };
    Ok(to)
}
