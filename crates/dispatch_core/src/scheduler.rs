//! Promotion of due `scheduled` bookings.
//!
//! Each tick promotes every booking still in `scheduled` whose time falls
//! before `now + lookahead`. Overdue bookings, such as ones missed while the
//! process was down or scheduled closer than one tick ahead, are promoted
//! late. A booking for which no driver can be found is cancelled and the
//! rider notified on the booking's topic; any other failure leaves the
//! booking `scheduled` for a later tick. One booking failing never stops the
//! rest of the tick.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::booking::{BookingStateMachine, BookingStatus, Promotion};
use crate::clock::SharedClock;
use crate::config::SchedulerConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::matching::DriverMatcher;
use crate::model::BookingId;
use crate::store::BookingStore;

pub const NO_DRIVER_REASON: &str = "no driver available for scheduled pickup";

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub scanned: usize,
    pub promoted: Vec<BookingId>,
    pub cancelled: Vec<BookingId>,
    /// Already handled elsewhere by the time this tick reached them.
    pub skipped: Vec<BookingId>,
    /// Left `scheduled` after an infrastructure error.
    pub failed: Vec<BookingId>,
}

pub struct Scheduler {
    store: Arc<dyn BookingStore>,
    machine: Arc<BookingStateMachine>,
    matcher: Arc<DriverMatcher>,
    clock: SharedClock,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn BookingStore>,
        machine: Arc<BookingStateMachine>,
        matcher: Arc<DriverMatcher>,
        clock: SharedClock,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            machine,
            matcher,
            clock,
            config,
        }
    }

    pub async fn tick(&self) -> DispatchResult<TickReport> {
        self.tick_at(self.clock.now()).await
    }

    /// One complete pass over the bookings due at `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> DispatchResult<TickReport> {
        let until = now + self.config.lookahead();
        let due = self.store.scheduled_before(until).await?;
        let mut report = TickReport {
            scanned: due.len(),
            ..TickReport::default()
        };

        for booking in due {
            let id = booking.id;
            if booking.status != BookingStatus::Scheduled {
                report.skipped.push(id);
                continue;
            }
            match self
                .machine
                .promote(id, &self.matcher, NO_DRIVER_REASON)
                .await
            {
                Ok(Promotion::Assigned(_)) => report.promoted.push(id),
                Ok(Promotion::Unmatched(_)) => report.cancelled.push(id),
                Err(err @ (DispatchError::InvalidTransition { .. } | DispatchError::Conflict(_))) => {
                    debug!(booking_id = %id, error = %err, "booking promoted or changed concurrently");
                    report.skipped.push(id);
                }
                Err(err) => {
                    error!(booking_id = %id, error = %err, "failed to promote booking; will retry next tick");
                    report.failed.push(id);
                }
            }
        }

        info!(
            scanned = report.scanned,
            promoted = report.promoted.len(),
            cancelled = report.cancelled.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "scheduler tick finished"
        );
        Ok(report)
    }

    /// Run ticks on a fixed period until the task is aborted. A slow tick
    /// skips the missed periods instead of bursting.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.tick();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(err) = self.tick().await {
                    error!(error = %err, "scheduler tick failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::Booking;
    use crate::clock::Clock;
    use crate::model::GeoPoint;
    use crate::store::{BookingQuery, InMemoryBookingStore};
    use crate::test_helpers::{weekday_noon, TestHarness};
    use async_trait::async_trait;
    use chrono::Duration;
    use parking_lot::Mutex;

    /// Fails every write to one booking.
    struct FlakyStore {
        inner: InMemoryBookingStore,
        broken: Mutex<Option<BookingId>>,
    }

    #[async_trait]
    impl BookingStore for FlakyStore {
        async fn insert(&self, booking: Booking) -> DispatchResult<Booking> {
            self.inner.insert(booking).await
        }

        async fn get(&self, id: BookingId) -> DispatchResult<Option<Booking>> {
            self.inner.get(id).await
        }

        async fn replace(&self, booking: Booking) -> DispatchResult<Booking> {
            if *self.broken.lock() == Some(booking.id) {
                return Err(DispatchError::store("connection reset"));
            }
            self.inner.replace(booking).await
        }

        async fn list(&self, query: BookingQuery) -> DispatchResult<Vec<Booking>> {
            self.inner.list(query).await
        }

        async fn scheduled_before(&self, until: DateTime<Utc>) -> DispatchResult<Vec<Booking>> {
            self.inner.scheduled_before(until).await
        }
    }

    /// Holds every write for a while, so concurrent ticks overlap.
    struct SlowStore {
        inner: InMemoryBookingStore,
    }

    #[async_trait]
    impl BookingStore for SlowStore {
        async fn insert(&self, booking: Booking) -> DispatchResult<Booking> {
            self.inner.insert(booking).await
        }

        async fn get(&self, id: BookingId) -> DispatchResult<Option<Booking>> {
            self.inner.get(id).await
        }

        async fn replace(&self, booking: Booking) -> DispatchResult<Booking> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.inner.replace(booking).await
        }

        async fn list(&self, query: BookingQuery) -> DispatchResult<Vec<Booking>> {
            self.inner.list(query).await
        }

        async fn scheduled_before(&self, until: DateTime<Utc>) -> DispatchResult<Vec<Booking>> {
            self.inner.scheduled_before(until).await
        }
    }

    #[tokio::test]
    async fn promotes_due_booking_and_leaves_later_one() {
        let harness = TestHarness::new();
        let (driver, vehicle) = harness.driver("dora", GeoPoint::new(52.52, 13.405));
        let rider = harness.rider("rita");
        let now = harness.clock.now();

        let soon = harness
            .future_booking(rider, Some((driver, vehicle)), now + Duration::minutes(3))
            .await;
        let later = harness
            .future_booking(rider, None, now + Duration::minutes(10))
            .await;

        let report = harness.service.scheduler().tick().await.expect("tick");
        assert_eq!(report.promoted, vec![soon.id]);

        let soon = harness.service.booking(soon.id).await.expect("soon");
        let later = harness.service.booking(later.id).await.expect("later");
        assert_eq!(soon.status, BookingStatus::Assigned);
        assert_eq!(later.status, BookingStatus::Scheduled);
    }

    #[tokio::test]
    async fn second_tick_does_not_promote_again() {
        let harness = TestHarness::new();
        harness.driver("dora", GeoPoint::new(52.52, 13.405));
        let rider = harness.rider("rita");
        let now = harness.clock.now();
        let booking = harness
            .future_booking(rider, None, now + Duration::minutes(1))
            .await;

        let scheduler = harness.service.scheduler();
        let first = scheduler.tick_at(now).await.expect("first tick");
        let second = scheduler.tick_at(now).await.expect("second tick");
        assert_eq!(first.promoted, vec![booking.id]);
        assert!(second.promoted.is_empty());
        assert_eq!(second.scanned, 0);

        let stored = harness.service.booking(booking.id).await.expect("booking");
        assert_eq!(
            stored.status_walk(),
            vec![BookingStatus::Scheduled, BookingStatus::Assigned]
        );
        assert!(stored.driver.is_some());
    }

    #[tokio::test]
    async fn unmatched_booking_is_cancelled_and_rider_notified() {
        let harness = TestHarness::new();
        let rider = harness.rider("rita");
        let now = harness.clock.now();
        let booking = harness
            .future_booking(rider, None, now + Duration::minutes(2))
            .await;
        let mut subscription = harness
            .service
            .subscribe(booking.id, rider)
            .await
            .expect("rider subscribes");

        let report = harness.service.scheduler().tick().await.expect("tick");
        assert_eq!(report.cancelled, vec![booking.id]);

        let stored = harness.service.booking(booking.id).await.expect("booking");
        assert_eq!(stored.status, BookingStatus::Cancelled);
        let event = subscription.receiver.recv().await.expect("notification");
        assert_eq!(
            event,
            crate::tracking::TrackingEvent::BookingCancelled {
                reason: NO_DRIVER_REASON.to_string()
            }
        );
    }

    #[tokio::test]
    async fn store_failure_on_one_booking_does_not_stop_the_tick() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryBookingStore::new(),
            broken: Mutex::new(None),
        });
        let harness = TestHarness::with_store(store.clone());
        harness.driver("dora", GeoPoint::new(52.52, 13.405));
        harness.driver("dave", GeoPoint::new(52.53, 13.41));
        let rider = harness.rider("rita");
        let now = weekday_noon();

        let broken = harness
            .future_booking(rider, None, now + Duration::minutes(1))
            .await;
        let healthy = harness
            .future_booking(rider, None, now + Duration::minutes(2))
            .await;
        *store.broken.lock() = Some(broken.id);

        let report = harness.service.scheduler().tick_at(now).await.expect("tick");
        assert_eq!(report.failed, vec![broken.id]);
        assert_eq!(report.promoted, vec![healthy.id]);

        let left = harness.service.booking(broken.id).await.expect("booking");
        assert_eq!(left.status, BookingStatus::Scheduled);
        // The claim made for the failed promotion was handed back.
        assert_eq!(harness.service.drivers(true).len(), 1);
    }

    #[tokio::test]
    async fn booking_due_inside_one_tick_is_promoted_late() {
        let harness = TestHarness::new();
        let (driver, vehicle) = harness.driver("dora", GeoPoint::new(52.52, 13.405));
        let rider = harness.rider("rita");
        let now = harness.clock.now();
        let booking = harness
            .future_booking(rider, Some((driver, vehicle)), now + Duration::seconds(30))
            .await;

        let scheduler = harness.service.scheduler();
        let report = scheduler
            .tick_at(now + Duration::minutes(1))
            .await
            .expect("tick");
        assert_eq!(report.promoted, vec![booking.id]);
        let stored = harness.service.booking(booking.id).await.expect("booking");
        assert_eq!(stored.status, BookingStatus::Assigned);
        assert_eq!(stored.driver, Some(driver));

        let later = scheduler
            .tick_at(now + Duration::minutes(2))
            .await
            .expect("later tick");
        assert_eq!(later.scanned, 0);

        harness
            .service
            .cancel_booking(booking.id, crate::booking::Actor::Rider(rider))
            .await
            .expect("cancel");
        assert!(harness.service.driver(driver).expect("driver").available);
        assert!(harness.fleet.vehicle(vehicle).expect("vehicle").available);
    }

    #[tokio::test]
    async fn bookings_missed_while_down_are_handled_on_the_next_tick() {
        let harness = TestHarness::new();
        harness.driver("dora", GeoPoint::new(52.52, 13.405));
        let rider = harness.rider("rita");
        let now = harness.clock.now();
        let matched = harness
            .future_booking(rider, None, now + Duration::minutes(1))
            .await;
        let unmatched = harness
            .future_booking(rider, None, now + Duration::minutes(2))
            .await;

        let report = harness
            .service
            .scheduler()
            .tick_at(now + Duration::hours(3))
            .await
            .expect("tick");
        assert_eq!(report.promoted, vec![matched.id]);
        assert_eq!(report.cancelled, vec![unmatched.id]);
    }

    #[tokio::test]
    async fn overlapping_ticks_promote_once_and_never_cancel() {
        let store = Arc::new(SlowStore {
            inner: InMemoryBookingStore::new(),
        });
        let harness = TestHarness::with_store(store);
        harness.driver("dora", GeoPoint::new(52.52, 13.405));
        let rider = harness.rider("rita");
        let now = harness.clock.now();
        let booking = harness
            .future_booking(rider, None, now + Duration::minutes(1))
            .await;

        let first = harness.service.scheduler();
        let second = harness.service.scheduler();
        let (a, b) = tokio::join!(first.tick_at(now), second.tick_at(now));
        let (a, b) = (a.expect("first tick"), b.expect("second tick"));

        assert_eq!(a.promoted.len() + b.promoted.len(), 1);
        assert_eq!(a.skipped.len() + b.skipped.len(), 1);
        assert!(a.cancelled.is_empty() && b.cancelled.is_empty());

        let stored = harness.service.booking(booking.id).await.expect("booking");
        assert_eq!(
            stored.status_walk(),
            vec![BookingStatus::Scheduled, BookingStatus::Assigned]
        );
    }

    #[tokio::test]
    async fn unmatched_cancel_loses_to_a_concurrent_write() {
        let harness = TestHarness::new();
        let rider = harness.rider("rita");
        let now = harness.clock.now();
        let booking = harness
            .future_booking(rider, None, now + Duration::minutes(1))
            .await;
        let stale = harness.service.booking(booking.id).await.expect("booking");
        harness
            .service
            .report_incident(booking.id, crate::booking::Actor::Rider(rider))
            .await
            .expect("concurrent write");

        let err = harness
            .service
            .machine()
            .cancel_unmatched(stale, NO_DRIVER_REASON)
            .await
            .expect_err("stale version");
        assert!(err.is_retryable());
        let stored = harness.service.booking(booking.id).await.expect("booking");
        assert_eq!(stored.status, BookingStatus::Scheduled);
    }
}
