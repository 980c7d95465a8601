//! Booking persistence.
//!
//! Writes are versioned: [`BookingStore::replace`] succeeds only when the
//! stored version still matches the caller's, which makes every transition a
//! compare-and-swap on the booking record.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::booking::{Booking, BookingStatus};
use crate::error::{DispatchError, DispatchResult};
use crate::model::{BookingId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingQuery {
    All,
    Rider(UserId),
    Driver(UserId),
}

impl BookingQuery {
    fn matches(&self, booking: &Booking) -> bool {
        match self {
            Self::All => true,
            Self::Rider(id) => booking.rider == *id,
            Self::Driver(id) => booking.driver == Some(*id),
        }
    }
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert(&self, booking: Booking) -> DispatchResult<Booking>;

    async fn get(&self, id: BookingId) -> DispatchResult<Option<Booking>>;

    /// Store `booking` if the stored copy is still at `booking.version`.
    /// Returns the stored record with its bumped version.
    async fn replace(&self, booking: Booking) -> DispatchResult<Booking>;

    /// Matching bookings, newest first.
    async fn list(&self, query: BookingQuery) -> DispatchResult<Vec<Booking>>;

    /// `scheduled` bookings whose scheduled time is before `until`, overdue
    /// ones included, earliest first.
    async fn scheduled_before(&self, until: DateTime<Utc>) -> DispatchResult<Vec<Booking>>;
}

#[derive(Default)]
pub struct InMemoryBookingStore {
    bookings: RwLock<HashMap<BookingId, Booking>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn insert(&self, mut booking: Booking) -> DispatchResult<Booking> {
        let mut bookings = self.bookings.write();
        if bookings.contains_key(&booking.id) {
            return Err(DispatchError::conflict(format!(
                "booking {} already exists",
                booking.id
            )));
        }
        booking.version = 1;
        bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn get(&self, id: BookingId) -> DispatchResult<Option<Booking>> {
        Ok(self.bookings.read().get(&id).cloned())
    }

    async fn replace(&self, mut booking: Booking) -> DispatchResult<Booking> {
        let mut bookings = self.bookings.write();
        let stored = bookings
            .get_mut(&booking.id)
            .ok_or_else(|| DispatchError::not_found("booking", booking.id))?;
        if stored.version != booking.version {
            return Err(DispatchError::conflict(format!(
                "booking {} changed concurrently (expected version {}, found {})",
                booking.id, booking.version, stored.version
            )));
        }
        booking.version += 1;
        *stored = booking.clone();
        Ok(booking)
    }

    async fn list(&self, query: BookingQuery) -> DispatchResult<Vec<Booking>> {
        let mut found: Vec<Booking> = self
            .bookings
            .read()
            .values()
            .filter(|booking| query.matches(booking))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn scheduled_before(&self, until: DateTime<Utc>) -> DispatchResult<Vec<Booking>> {
        let mut due: Vec<Booking> = self
            .bookings
            .read()
            .values()
            .filter(|booking| booking.status == BookingStatus::Scheduled)
            .filter(|booking| {
                booking
                    .scheduled_time
                    .is_some_and(|at| at < until)
            })
            .cloned()
            .collect();
        due.sort_by_key(|booking| booking.scheduled_time);
        Ok(due)
    }
}
