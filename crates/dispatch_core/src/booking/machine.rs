use std::sync::Arc;

use dashmap::DashSet;
use tracing::{info, warn};

use super::states::{transition, BookingEvent, BookingStatus};
use super::{Actor, Booking, NewBooking, StatusChange};
use crate::clock::SharedClock;
use crate::error::{DispatchError, DispatchResult};
use crate::fleet::Fleet;
use crate::matching::DriverMatcher;
use crate::model::{BookingId, UserId, VehicleId};
use crate::store::{BookingQuery, BookingStore};
use crate::tracking::TrackingChannel;

/// Attempts at a compare-and-swap write before a concurrent writer wins.
const MAX_WRITE_ATTEMPTS: usize = 3;

/// Outcome of promoting a due booking.
#[derive(Debug, Clone, PartialEq)]
pub enum Promotion {
    /// Bound to a driver and moved to `assigned`.
    Assigned(Booking),
    /// No driver could be found, so the booking was cancelled.
    Unmatched(Booking),
}

/// Marks a booking as being promoted for as long as it lives.
struct PromotionGuard<'a> {
    promoting: &'a DashSet<BookingId>,
    id: BookingId,
}

impl Drop for PromotionGuard<'_> {
    fn drop(&mut self) {
        self.promoting.remove(&self.id);
    }
}

/// Owns the booking lifecycle.
///
/// Every transition is a versioned write; availability is released only by
/// the writer whose compare-and-swap moved the booking into a terminal state,
/// so release happens exactly once per booking.
pub struct BookingStateMachine {
    store: Arc<dyn BookingStore>,
    fleet: Arc<Fleet>,
    tracking: Arc<TrackingChannel>,
    clock: SharedClock,
    /// Bookings with a promotion in flight.
    promoting: DashSet<BookingId>,
}

impl BookingStateMachine {
    pub fn new(
        store: Arc<dyn BookingStore>,
        fleet: Arc<Fleet>,
        tracking: Arc<TrackingChannel>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            fleet,
            tracking,
            clock,
            promoting: DashSet::new(),
        }
    }

    pub async fn get(&self, id: BookingId) -> DispatchResult<Booking> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| DispatchError::not_found("booking", id))
    }

    pub async fn list(&self, query: BookingQuery) -> DispatchResult<Vec<Booking>> {
        self.store.list(query).await
    }

    /// Persist a new booking as `scheduled` (future time) or `pending`.
    ///
    /// If an assignment is supplied it must already be claimed; it is released
    /// again when the booking cannot be stored.
    pub async fn create(&self, new: NewBooking) -> DispatchResult<Booking> {
        let now = self.clock.now();
        let status = match new.scheduled_time {
            Some(at) if at <= now => {
                self.release_assignment(&new);
                return Err(DispatchError::validation(
                    "scheduled time must be in the future",
                ));
            }
            Some(_) => BookingStatus::Scheduled,
            None => BookingStatus::Pending,
        };
        if !new.price.is_finite() || new.price <= 0.0 {
            self.release_assignment(&new);
            return Err(DispatchError::validation("price must be positive"));
        }

        let booking = Booking {
            id: BookingId::new(),
            rider: new.rider,
            driver: new.assignment.map(|(driver, _)| driver),
            vehicle: new.assignment.map(|(_, vehicle)| vehicle),
            vehicle_class: new.vehicle_class,
            pickup: new.pickup.clone(),
            dropoff: new.dropoff.clone(),
            status,
            price: new.price,
            scheduled_time: new.scheduled_time,
            start_time: None,
            end_time: None,
            driver_rating: None,
            has_incident: false,
            created_at: now,
            updated_at: now,
            version: 0,
            history: vec![StatusChange {
                from: None,
                to: status,
                at: now,
            }],
        };

        match self.store.insert(booking).await {
            Ok(stored) => {
                info!(
                    booking_id = %stored.id,
                    rider_id = %stored.rider,
                    driver_id = ?stored.driver,
                    status = %stored.status,
                    price = stored.price,
                    "booking created"
                );
                Ok(stored)
            }
            Err(err) => {
                self.release_assignment(&new);
                Err(err)
            }
        }
    }

    fn release_assignment(&self, new: &NewBooking) {
        if let Some((driver, vehicle)) = new.assignment {
            self.fleet.release(Some(driver), Some(vehicle));
        }
    }

    fn authorize(actor: Actor, booking: &Booking, event: BookingEvent) -> DispatchResult<()> {
        match actor {
            Actor::System | Actor::Admin(_) => Ok(()),
            Actor::Driver(id) if booking.is_driven_by(id) => {
                if event == BookingEvent::Promote {
                    Err(DispatchError::unauthorized(
                        "only the scheduler promotes scheduled bookings",
                    ))
                } else {
                    Ok(())
                }
            }
            Actor::Driver(id) => Err(DispatchError::unauthorized(format!(
                "driver {id} is not assigned to booking {}",
                booking.id
            ))),
            Actor::Rider(id) if booking.rider == id && event == BookingEvent::Cancel => Ok(()),
            Actor::Rider(id) => Err(DispatchError::unauthorized(format!(
                "rider {id} may not {event} booking {}",
                booking.id
            ))),
        }
    }

    /// Apply `event` on behalf of `actor`, retrying when a concurrent writer
    /// got there first.
    pub async fn apply(
        &self,
        id: BookingId,
        event: BookingEvent,
        actor: Actor,
        reason: Option<&str>,
    ) -> DispatchResult<Booking> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let booking = self.get(id).await?;
            Self::authorize(actor, &booking, event)?;
            let to = transition(booking.status, event)?;
            if booking.driver.is_none()
                && matches!(event, BookingEvent::StartEnRoute | BookingEvent::Promote)
            {
                return Err(DispatchError::validation(format!(
                    "booking {id} has no driver bound"
                )));
            }

            let from = booking.status;
            let updated = self.advance(booking, to);
            match self.store.replace(updated).await {
                Ok(stored) => {
                    info!(
                        booking_id = %id,
                        event = %event,
                        from = %from,
                        to = %stored.status,
                        "booking transitioned"
                    );
                    self.after_commit(&stored, reason).await;
                    return Ok(stored);
                }
                Err(err) if err.is_retryable() && attempt < MAX_WRITE_ATTEMPTS => {
                    warn!(booking_id = %id, attempt, "booking changed concurrently, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Move a booking to `target` via the matching event.
    pub async fn update_status(
        &self,
        id: BookingId,
        target: BookingStatus,
        actor: Actor,
    ) -> DispatchResult<Booking> {
        let event = BookingEvent::for_target(target)?;
        self.apply(id, event, actor, None).await
    }

    pub async fn cancel(&self, id: BookingId, actor: Actor, reason: &str) -> DispatchResult<Booking> {
        self.apply(id, BookingEvent::Cancel, actor, Some(reason)).await
    }

    /// Promote a due `scheduled` booking to `assigned`, claiming the nearest
    /// driver first when none is bound yet. When no driver can be found the
    /// booking is cancelled with `unmatched_reason` instead.
    ///
    /// Only one promotion per booking runs at a time; a second caller gets
    /// `Conflict` without touching the fleet.
    pub async fn promote(
        &self,
        id: BookingId,
        matcher: &DriverMatcher,
        unmatched_reason: &str,
    ) -> DispatchResult<Promotion> {
        if !self.promoting.insert(id) {
            return Err(DispatchError::conflict(format!(
                "booking {id} is already being promoted"
            )));
        }
        let _guard = PromotionGuard {
            promoting: &self.promoting,
            id,
        };

        let booking = self.get(id).await?;
        let to = transition(booking.status, BookingEvent::Promote)?;

        let (driver, vehicle, claimed_here) = match (booking.driver, booking.vehicle) {
            (Some(driver), Some(vehicle)) => (driver, vehicle, false),
            _ => match Self::claim_for(&booking, matcher) {
                Ok((driver, vehicle)) => (driver, vehicle, true),
                Err(DispatchError::NoDriverAvailable { radius_m }) => {
                    warn!(booking_id = %id, radius_m, "no driver for due booking, cancelling");
                    return self
                        .cancel_unmatched(booking, unmatched_reason)
                        .await
                        .map(Promotion::Unmatched);
                }
                Err(err) => return Err(err),
            },
        };

        let mut updated = self.advance(booking, to);
        updated.driver = Some(driver);
        updated.vehicle = Some(vehicle);
        match self.store.replace(updated).await {
            Ok(stored) => {
                info!(
                    booking_id = %id,
                    driver_id = %driver,
                    vehicle_id = %vehicle,
                    "scheduled booking promoted"
                );
                Ok(Promotion::Assigned(stored))
            }
            Err(err) => {
                if claimed_here {
                    self.fleet.release(Some(driver), Some(vehicle));
                }
                Err(err)
            }
        }
    }

    fn claim_for(
        booking: &Booking,
        matcher: &DriverMatcher,
    ) -> DispatchResult<(UserId, VehicleId)> {
        let candidate =
            matcher.claim_nearest(booking.pickup.coordinates, Some(booking.vehicle_class))?;
        let vehicle = candidate.vehicle.ok_or(DispatchError::NoDriverAvailable {
            radius_m: matcher.default_radius_m(),
        })?;
        Ok((candidate.driver, vehicle))
    }

    /// Cancel `booking` only if the stored record is still the `scheduled`
    /// one read at `booking.version`. A single write: any concurrent change
    /// wins and this returns `Conflict`.
    pub(crate) async fn cancel_unmatched(
        &self,
        booking: Booking,
        reason: &str,
    ) -> DispatchResult<Booking> {
        if booking.status != BookingStatus::Scheduled {
            return Err(DispatchError::InvalidTransition {
                from: booking.status,
                event: BookingEvent::Promote,
            });
        }
        let to = transition(booking.status, BookingEvent::Cancel)?;
        let updated = self.advance(booking, to);
        let stored = self.store.replace(updated).await?;
        info!(booking_id = %stored.id, reason, "unmatched scheduled booking cancelled");
        self.after_commit(&stored, Some(reason)).await;
        Ok(stored)
    }

    /// Rider's rating of the driver, accepted once the booking is completed.
    pub async fn rate_driver(
        &self,
        id: BookingId,
        rider: UserId,
        rating: u8,
    ) -> DispatchResult<Booking> {
        if !(1..=5).contains(&rating) {
            return Err(DispatchError::validation("rating must be between 1 and 5"));
        }
        let mut booking = self.get(id).await?;
        if booking.rider != rider {
            return Err(DispatchError::unauthorized(format!(
                "only the rider of booking {id} can rate its driver"
            )));
        }
        if booking.status != BookingStatus::Completed {
            return Err(DispatchError::validation("only completed bookings can be rated"));
        }
        booking.driver_rating = Some(rating);
        booking.updated_at = self.clock.now();
        self.store.replace(booking).await
    }

    /// Flag an incident on a booking. Any party may report one.
    pub async fn report_incident(&self, id: BookingId, actor: Actor) -> DispatchResult<Booking> {
        let mut booking = self.get(id).await?;
        if let Some(user) = actor.user_id() {
            if !booking.is_party(user) && !matches!(actor, Actor::Admin(_)) {
                return Err(DispatchError::unauthorized(format!(
                    "user {user} is not a party to booking {id}"
                )));
            }
        }
        booking.has_incident = true;
        booking.updated_at = self.clock.now();
        let stored = self.store.replace(booking).await?;
        warn!(booking_id = %id, "incident reported");
        Ok(stored)
    }

    fn advance(&self, mut booking: Booking, to: BookingStatus) -> Booking {
        let now = self.clock.now();
        match to {
            BookingStatus::EnRoute => booking.start_time = Some(now),
            BookingStatus::Completed => booking.end_time = Some(now),
            _ => {}
        }
        booking.history.push(StatusChange {
            from: Some(booking.status),
            to,
            at: now,
        });
        booking.status = to;
        booking.updated_at = now;
        booking
    }

    /// Side effects of a committed transition. The transition itself already
    /// stands, so failures here are logged rather than returned.
    async fn after_commit(&self, booking: &Booking, reason: Option<&str>) {
        if !booking.status.is_terminal() {
            return;
        }
        self.fleet.release(booking.driver, booking.vehicle);
        let result = match booking.status {
            BookingStatus::Completed => self.tracking.ride_completed(booking.id).await,
            _ => {
                self.tracking
                    .booking_cancelled(booking.id, reason.unwrap_or("cancelled"))
                    .await
            }
        };
        if let Err(err) = result {
            warn!(booking_id = %booking.id, error = %err, "tracking cleanup failed");
        }
    }
}
