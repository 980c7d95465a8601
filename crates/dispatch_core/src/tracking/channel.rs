use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use super::cache::LocationCache;
use crate::booking::Booking;
use crate::error::{DispatchError, DispatchResult};
use crate::model::{BookingId, GeoPoint, UserId};
use crate::store::BookingStore;

/// Messages delivered to a booking's subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum TrackingEvent {
    LocationUpdate(GeoPoint),
    RideCompleted,
    BookingCancelled { reason: String },
}

/// Where a published position came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionOrigin {
    /// Reported by the driver's device.
    Driver(UserId),
    /// Produced in-process by the position simulator.
    Simulator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedKind {
    Driver,
    Simulator,
}

impl From<PositionOrigin> for FeedKind {
    fn from(origin: PositionOrigin) -> Self {
        match origin {
            PositionOrigin::Driver(_) => Self::Driver,
            PositionOrigin::Simulator => Self::Simulator,
        }
    }
}

struct Topic {
    sender: broadcast::Sender<TrackingEvent>,
    /// Serialises cache write + broadcast so the cached point is always the
    /// last one delivered.
    publish_lock: Mutex<()>,
}

/// A joined topic. Dropping it leaves the topic.
pub struct Subscription {
    pub booking_id: BookingId,
    /// Last cached position at join time.
    pub initial: Option<GeoPoint>,
    pub receiver: broadcast::Receiver<TrackingEvent>,
}

/// Per-booking publish/subscribe of live positions.
///
/// Only the booking's rider and bound driver may subscribe. Positions may be
/// published by the bound driver or the simulator, but not both: the first
/// origin to publish owns the booking's feed until the booking ends.
///
/// A booking's topic is torn down once its terminal status is stored. Both
/// `subscribe` and `publish` re-read the status after touching the topic, so
/// a call racing the teardown either sees its topic closed or removes what it
/// created itself.
pub struct TrackingChannel {
    store: Arc<dyn BookingStore>,
    cache: Arc<dyn LocationCache>,
    topics: DashMap<BookingId, Arc<Topic>>,
    feeds: DashMap<BookingId, FeedKind>,
    capacity: usize,
}

impl TrackingChannel {
    pub fn new(store: Arc<dyn BookingStore>, cache: Arc<dyn LocationCache>, capacity: usize) -> Self {
        Self {
            store,
            cache,
            topics: DashMap::new(),
            feeds: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn topic(&self, booking_id: BookingId) -> Arc<Topic> {
        self.topics
            .entry(booking_id)
            .or_insert_with(|| {
                let (sender, _) = broadcast::channel(self.capacity);
                Arc::new(Topic {
                    sender,
                    publish_lock: Mutex::new(()),
                })
            })
            .value()
            .clone()
    }

    async fn load(&self, booking_id: BookingId) -> DispatchResult<Booking> {
        self.store
            .get(booking_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("booking", booking_id))
    }

    fn closed(booking: &Booking) -> DispatchError {
        DispatchError::conflict(format!(
            "booking {} is {}; tracking is closed",
            booking.id, booking.status
        ))
    }

    /// Fails with `Conflict` when the booking ended after `topic` was taken,
    /// dropping the topic and anything created alongside it.
    async fn ensure_open(&self, booking_id: BookingId, topic: &Arc<Topic>) -> DispatchResult<()> {
        let booking = self.load(booking_id).await?;
        if !booking.status.is_terminal() {
            return Ok(());
        }
        self.topics
            .remove_if(&booking_id, |_, current| Arc::ptr_eq(current, topic));
        self.feeds.remove(&booking_id);
        self.cache.remove(booking_id).await?;
        debug!(booking_id = %booking_id, "discarded topic of a finished booking");
        Err(Self::closed(&booking))
    }

    /// Join a booking's topic as `actor`. Finished bookings have no topic to
    /// join and fail with `Conflict`.
    pub async fn subscribe(&self, booking_id: BookingId, actor: UserId) -> DispatchResult<Subscription> {
        let booking = self.load(booking_id).await?;
        if !booking.is_party(actor) {
            return Err(DispatchError::unauthorized(format!(
                "user {actor} is not a party to booking {booking_id}"
            )));
        }
        if booking.status.is_terminal() {
            return Err(Self::closed(&booking));
        }
        // Join before reading the cache so no update falls between the two.
        let topic = self.topic(booking_id);
        let receiver = topic.sender.subscribe();
        self.ensure_open(booking_id, &topic).await?;
        let initial = self.cache.get(booking_id).await?;
        debug!(booking_id = %booking_id, user_id = %actor, "subscribed to tracking topic");
        Ok(Subscription {
            booking_id,
            initial,
            receiver,
        })
    }

    /// Cache `point` as the booking's position and broadcast it.
    /// Returns the number of subscribers reached.
    pub async fn publish(
        &self,
        booking_id: BookingId,
        point: GeoPoint,
        origin: PositionOrigin,
    ) -> DispatchResult<usize> {
        point.validate()?;
        let booking = self.load(booking_id).await?;
        if !booking.status.is_active_trip() {
            return Err(Self::closed(&booking));
        }
        if let PositionOrigin::Driver(driver) = origin {
            if !booking.is_driven_by(driver) {
                return Err(DispatchError::unauthorized(format!(
                    "user {driver} is not the driver of booking {booking_id}"
                )));
            }
        }
        self.claim_feed(booking_id, origin)?;

        let topic = self.topic(booking_id);
        let _guard = topic.publish_lock.lock().await;
        self.cache.set(booking_id, point).await?;
        self.ensure_open(booking_id, &topic).await?;
        Ok(topic
            .sender
            .send(TrackingEvent::LocationUpdate(point))
            .unwrap_or(0))
    }

    fn claim_feed(&self, booking_id: BookingId, origin: PositionOrigin) -> DispatchResult<()> {
        let wanted = FeedKind::from(origin);
        match self.feeds.entry(booking_id) {
            Entry::Occupied(owner) if *owner.get() != wanted => Err(DispatchError::conflict(
                format!("booking {booking_id} is already fed by {:?}", owner.get()),
            )),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(wanted);
                Ok(())
            }
        }
    }

    /// Last known position, if any.
    pub async fn last_known(&self, booking_id: BookingId) -> DispatchResult<Option<GeoPoint>> {
        self.cache.get(booking_id).await
    }

    fn broadcast(&self, booking_id: BookingId, event: TrackingEvent) {
        if let Some(topic) = self.topics.get(&booking_id) {
            let _ = topic.sender.send(event);
        }
    }

    /// Signal completion to subscribers and tear the topic down.
    pub async fn ride_completed(&self, booking_id: BookingId) -> DispatchResult<()> {
        self.broadcast(booking_id, TrackingEvent::RideCompleted);
        info!(booking_id = %booking_id, "ride completed broadcast");
        self.close(booking_id).await
    }

    /// Tell subscribers the booking was cancelled and tear the topic down.
    pub async fn booking_cancelled(&self, booking_id: BookingId, reason: &str) -> DispatchResult<()> {
        self.broadcast(
            booking_id,
            TrackingEvent::BookingCancelled {
                reason: reason.to_string(),
            },
        );
        self.close(booking_id).await
    }

    /// Drop the topic, the feed owner and the cached position. Receivers see
    /// any buffered events, then a closed channel.
    pub async fn close(&self, booking_id: BookingId) -> DispatchResult<()> {
        self.topics.remove(&booking_id);
        self.feeds.remove(&booking_id);
        self.cache.remove(booking_id).await
    }
}
