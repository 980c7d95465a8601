//! Stand-in GPS feed for bookings without a real device.
//!
//! A [`PositionSource`] yields positions one tick at a time; the
//! [`PositionSimulator`] publishes them through the tracking channel as the
//! `Simulator` origin and completes the booking when the source runs dry.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::booking::{Actor, Booking, BookingEvent, BookingStateMachine, BookingStatus};
use crate::config::SimulatorConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::model::{BookingId, GeoPoint};
use crate::spatial::KM_PER_DEGREE;
use crate::tracking::{PositionOrigin, TrackingChannel};

/// Pull-based position feed. `None` means the vehicle has arrived.
pub trait PositionSource: Send {
    fn next_position(&mut self) -> Option<GeoPoint>;
}

/// Moves `step_km` per tick along the straight line to the destination.
#[derive(Debug, Clone)]
pub struct StraightLineRoute {
    current: GeoPoint,
    destination: GeoPoint,
    step_km: f64,
    tolerance_deg: f64,
    arrived: bool,
}

impl StraightLineRoute {
    pub fn new(origin: GeoPoint, destination: GeoPoint, step_km: f64, tolerance_deg: f64) -> Self {
        Self {
            current: origin,
            destination,
            step_km,
            tolerance_deg,
            arrived: false,
        }
    }

    pub fn current(&self) -> GeoPoint {
        self.current
    }

    pub fn has_arrived(&self) -> bool {
        self.arrived
    }

    fn within_tolerance(&self, point: GeoPoint) -> bool {
        (point.lat - self.destination.lat).abs() < self.tolerance_deg
            && (point.lng - self.destination.lng).abs() < self.tolerance_deg
    }
}

/// One step of `step_km` from `from` toward `to`, landing on `to` when it is
/// closer than a step. Longitude is scaled by the cosine of the latitude.
pub fn step_toward(from: GeoPoint, to: GeoPoint, step_km: f64) -> GeoPoint {
    let dlat = to.lat - from.lat;
    let dlng = to.lng - from.lng;
    let lng_scale = from.lat.to_radians().cos().max(1e-6);
    let remaining_km = (dlat * dlat + (dlng * lng_scale).powi(2)).sqrt() * KM_PER_DEGREE;
    if remaining_km <= step_km || remaining_km == 0.0 {
        return to;
    }
    let fraction = step_km / remaining_km;
    GeoPoint::new(from.lat + dlat * fraction, from.lng + dlng * fraction)
}

impl PositionSource for StraightLineRoute {
    fn next_position(&mut self) -> Option<GeoPoint> {
        if self.arrived {
            return None;
        }
        let mut next = step_toward(self.current, self.destination, self.step_km);
        if self.within_tolerance(next) {
            next = self.destination;
            self.arrived = true;
        }
        self.current = next;
        Some(next)
    }
}

#[derive(Clone)]
pub struct PositionSimulator {
    machine: Arc<BookingStateMachine>,
    tracking: Arc<TrackingChannel>,
    config: SimulatorConfig,
}

impl PositionSimulator {
    pub fn new(
        machine: Arc<BookingStateMachine>,
        tracking: Arc<TrackingChannel>,
        config: SimulatorConfig,
    ) -> Self {
        Self {
            machine,
            tracking,
            config,
        }
    }

    /// Pickup-to-dropoff route at the configured speed.
    pub fn route_for(&self, booking: &Booking) -> StraightLineRoute {
        StraightLineRoute::new(
            booking.pickup.coordinates,
            booking.dropoff.coordinates,
            self.config.step_km(),
            self.config.arrival_tolerance_deg,
        )
    }

    /// Simulate `booking` on its own task.
    pub fn spawn(&self, booking: &Booking) -> JoinHandle<()> {
        let simulator = self.clone();
        let route = self.route_for(booking);
        let booking_id = booking.id;
        tokio::spawn(async move {
            match simulator.run(booking_id, route).await {
                Ok(_) => info!(booking_id = %booking_id, "simulated ride finished"),
                Err(err) => warn!(booking_id = %booking_id, error = %err, "simulated ride stopped"),
            }
        })
    }

    /// Drive `booking_id` from its current state to `completed`, publishing
    /// one position per tick.
    pub async fn run<S: PositionSource>(
        &self,
        booking_id: BookingId,
        mut source: S,
    ) -> DispatchResult<Booking> {
        self.begin_trip(booking_id).await?;

        let mut ticker = interval(self.config.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(point) = source.next_position() else {
                break;
            };
            let reached = self
                .tracking
                .publish(booking_id, point, PositionOrigin::Simulator)
                .await?;
            debug!(
                booking_id = %booking_id,
                lat = point.lat,
                lng = point.lng,
                subscribers = reached,
                "simulated position published"
            );
        }

        self.machine
            .apply(booking_id, BookingEvent::Complete, Actor::System, None)
            .await
    }

    /// Walk the booking to `goods_collected` so the vehicle is carrying the
    /// load while it moves.
    async fn begin_trip(&self, booking_id: BookingId) -> DispatchResult<()> {
        loop {
            let booking = self.machine.get(booking_id).await?;
            let event = match booking.status {
                BookingStatus::Pending | BookingStatus::Assigned => BookingEvent::StartEnRoute,
                BookingStatus::EnRoute => BookingEvent::CollectGoods,
                BookingStatus::GoodsCollected => return Ok(()),
                status => {
                    return Err(DispatchError::conflict(format!(
                        "booking {booking_id} is {status} and cannot be simulated"
                    )))
                }
            };
            self.machine
                .apply(booking_id, event, Actor::System, None)
                .await?;
        }
    }
}
