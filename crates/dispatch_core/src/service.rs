//! Request-level dispatch operations: validate, price, claim, persist.
//!
//! [`DispatchService`] wires the components together and is what the outer
//! API layer talks to. Each operation returns a [`DispatchResult`], so every
//! failure surfaces as a structured error at this boundary.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::booking::{Actor, Booking, BookingStateMachine, BookingStatus, NewBooking};
use crate::clock::{system_clock, SharedClock};
use crate::config::DispatchConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::fleet::Fleet;
use crate::matching::{Availability, DriverMatcher, MatchCandidate};
use crate::model::{BookingId, Driver, GeoPoint, Location, Role, UserId, VehicleClass, VehicleId};
use crate::pricing::{PricingEngine, RandomDemand, SharedDemand};
use crate::scheduler::Scheduler;
use crate::simulator::PositionSimulator;
use crate::spatial::{fare_distance_km, GeoIndex};
use crate::store::{BookingQuery, BookingStore, InMemoryBookingStore};
use crate::tracking::{
    InMemoryLocationCache, LocationCache, PositionOrigin, Subscription, TrackingChannel,
};

/// A booking request as received from a rider.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    pub rider: UserId,
    pub driver: Option<UserId>,
    pub vehicle: Option<VehicleId>,
    /// Used when no vehicle is named; defaults to the pricing default class.
    pub vehicle_class: Option<VehicleClass>,
    pub pickup: Location,
    pub dropoff: Location,
    /// Caller's offer. The stored price is never below the computed fare.
    pub price: Option<f64>,
    pub scheduled_time: Option<DateTime<Utc>>,
    /// Claim the nearest available driver when none is named.
    pub auto_match: bool,
}

impl BookingRequest {
    pub fn new(rider: UserId, pickup: Location, dropoff: Location) -> Self {
        Self {
            rider,
            driver: None,
            vehicle: None,
            vehicle_class: None,
            pickup,
            dropoff,
            price: None,
            scheduled_time: None,
            auto_match: false,
        }
    }

    pub fn with_driver(mut self, driver: UserId, vehicle: VehicleId) -> Self {
        self.driver = Some(driver);
        self.vehicle = Some(vehicle);
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_class(mut self, class: VehicleClass) -> Self {
        self.vehicle_class = Some(class);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_time = Some(at);
        self
    }

    pub fn auto_matched(mut self) -> Self {
        self.auto_match = true;
        self
    }
}

/// How a new booking gets its driver.
enum Assignment {
    Manual { driver: UserId, vehicle: VehicleId },
    Nearest,
    Deferred,
}

pub struct DispatchService {
    config: DispatchConfig,
    fleet: Arc<Fleet>,
    store: Arc<dyn BookingStore>,
    tracking: Arc<TrackingChannel>,
    machine: Arc<BookingStateMachine>,
    matcher: Arc<DriverMatcher>,
    pricing: PricingEngine,
    demand: SharedDemand,
    clock: SharedClock,
    simulations: DashMap<BookingId, JoinHandle<()>>,
}

impl DispatchService {
    pub fn new(
        config: DispatchConfig,
        fleet: Arc<Fleet>,
        store: Arc<dyn BookingStore>,
        cache: Arc<dyn LocationCache>,
        demand: SharedDemand,
        clock: SharedClock,
    ) -> Self {
        let tracking = Arc::new(TrackingChannel::new(
            store.clone(),
            cache,
            config.tracking.topic_capacity,
        ));
        let machine = Arc::new(BookingStateMachine::new(
            store.clone(),
            fleet.clone(),
            tracking.clone(),
            clock.clone(),
        ));
        let matcher = Arc::new(DriverMatcher::new(fleet.clone(), config.matching.clone()));
        let pricing = PricingEngine::new(config.pricing.clone());
        Self {
            config,
            fleet,
            store,
            tracking,
            machine,
            matcher,
            pricing,
            demand,
            clock,
            simulations: DashMap::new(),
        }
    }

    /// Everything in memory, random demand, wall clock.
    pub fn in_memory(config: DispatchConfig) -> DispatchResult<Self> {
        let geo = GeoIndex::from_level(config.matching.index_resolution)?;
        let cache = InMemoryLocationCache::new(
            config.tracking.cache_capacity,
            config.tracking.cache_ttl(),
        );
        Ok(Self::new(
            config,
            Arc::new(Fleet::new(geo)),
            Arc::new(InMemoryBookingStore::new()),
            Arc::new(cache),
            Arc::new(RandomDemand::new(None)),
            system_clock(),
        ))
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn fleet(&self) -> &Arc<Fleet> {
        &self.fleet
    }

    pub fn machine(&self) -> &Arc<BookingStateMachine> {
        &self.machine
    }

    pub fn tracking(&self) -> &Arc<TrackingChannel> {
        &self.tracking
    }

    /// A scheduler sharing this service's components.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.store.clone(),
            self.machine.clone(),
            self.matcher.clone(),
            self.clock.clone(),
            self.config.scheduler.clone(),
        )
    }

    /// Map an authenticated user id to the actor it acts as.
    pub fn actor_for(&self, user: UserId) -> DispatchResult<Actor> {
        let account = self
            .fleet
            .account(user)
            .ok_or_else(|| DispatchError::unauthorized(format!("unknown user {user}")))?;
        Ok(match account.role {
            Role::Customer => Actor::Rider(user),
            Role::Driver => Actor::Driver(user),
            Role::Admin => Actor::Admin(user),
        })
    }

    /// Computed fare for a trip, before any caller offer is applied.
    pub fn quote(&self, pickup: GeoPoint, dropoff: GeoPoint, class: VehicleClass) -> DispatchResult<f64> {
        pickup.validate()?;
        dropoff.validate()?;
        let distance_km = fare_distance_km(pickup, dropoff);
        let demand = self.demand.current_demand();
        Ok(self
            .pricing
            .price(distance_km, class, demand, self.clock.now()))
    }

    /// Create an immediate booking in `pending`.
    pub async fn create_booking(&self, request: BookingRequest) -> DispatchResult<Booking> {
        if request.scheduled_time.is_some() {
            return Err(DispatchError::validation(
                "immediate bookings cannot carry a scheduled time",
            ));
        }
        self.create(request).await
    }

    /// Create a future booking in `scheduled`. The driver is optional; the
    /// scheduler binds one when the booking comes due.
    pub async fn create_future_booking(&self, request: BookingRequest) -> DispatchResult<Booking> {
        match request.scheduled_time {
            None => Err(DispatchError::validation("scheduledTime is required")),
            Some(at) if at <= self.clock.now() => Err(DispatchError::validation(
                "scheduled time must be in the future",
            )),
            Some(_) => self.create(request).await,
        }
    }

    async fn create(&self, request: BookingRequest) -> DispatchResult<Booking> {
        request.pickup.validate("pickup")?;
        request.dropoff.validate("dropoff")?;
        let rider = self
            .fleet
            .account(request.rider)
            .ok_or_else(|| DispatchError::not_found("rider", request.rider))?;
        if rider.role == Role::Driver {
            return Err(DispatchError::validation(format!(
                "user {} is a driver and cannot book rides",
                rider.id
            )));
        }

        let (assignment, class) = self.plan_assignment(&request)?;
        let floor = self.quote(
            request.pickup.coordinates,
            request.dropoff.coordinates,
            class,
        )?;
        let price = self.pricing.settle(request.price, floor)?;

        let claimed = match assignment {
            Assignment::Manual { driver, vehicle } => {
                self.fleet.claim(driver, vehicle)?;
                Some((driver, vehicle))
            }
            Assignment::Nearest => {
                let candidate = self
                    .matcher
                    .claim_nearest(request.pickup.coordinates, Some(class))?;
                candidate.vehicle.map(|vehicle| (candidate.driver, vehicle))
            }
            Assignment::Deferred => None,
        };

        self.machine
            .create(NewBooking {
                rider: request.rider,
                assignment: claimed,
                vehicle_class: class,
                pickup: request.pickup,
                dropoff: request.dropoff,
                price,
                scheduled_time: request.scheduled_time,
            })
            .await
    }

    /// Decide how the booking gets its driver and which class prices it.
    fn plan_assignment(&self, request: &BookingRequest) -> DispatchResult<(Assignment, VehicleClass)> {
        match (request.driver, request.vehicle) {
            (driver, Some(vehicle_id)) => {
                let vehicle = self
                    .fleet
                    .vehicle(vehicle_id)
                    .ok_or_else(|| DispatchError::not_found("vehicle", vehicle_id))?;
                let driver = driver.unwrap_or(vehicle.driver);
                if self.fleet.driver(driver).is_none() {
                    return Err(DispatchError::not_found("driver", driver));
                }
                if vehicle.driver != driver {
                    return Err(DispatchError::validation(format!(
                        "vehicle {vehicle_id} does not belong to driver {driver}"
                    )));
                }
                Ok((
                    Assignment::Manual {
                        driver,
                        vehicle: vehicle_id,
                    },
                    vehicle.class,
                ))
            }
            (Some(driver), None) => Err(DispatchError::validation(format!(
                "a vehicle is required when driver {driver} is named"
            ))),
            (None, None) => {
                let class = request
                    .vehicle_class
                    .unwrap_or(self.config.pricing.default_class);
                if request.auto_match {
                    Ok((Assignment::Nearest, class))
                } else if request.scheduled_time.is_some() {
                    Ok((Assignment::Deferred, class))
                } else {
                    Err(DispatchError::validation(
                        "name a driver and vehicle or set autoMatch",
                    ))
                }
            }
        }
    }

    /// Nearest available driver for a rider's pickup. Does not bind.
    pub fn match_driver(&self, rider: UserId, pickup: GeoPoint) -> DispatchResult<MatchCandidate> {
        if self.fleet.account(rider).is_none() {
            return Err(DispatchError::not_found("rider", rider));
        }
        self.matcher.find_nearest(
            pickup,
            self.config.matching.default_radius_m,
            Availability::Available,
        )
    }

    pub async fn booking(&self, id: BookingId) -> DispatchResult<Booking> {
        self.machine.get(id).await
    }

    pub async fn bookings(&self, query: BookingQuery) -> DispatchResult<Vec<Booking>> {
        self.machine.list(query).await
    }

    /// Driver's bookings that still hold them.
    pub async fn driver_jobs(&self, driver: UserId) -> DispatchResult<Vec<Booking>> {
        Ok(self
            .bookings(BookingQuery::Driver(driver))
            .await?
            .into_iter()
            .filter(|booking| !booking.status.is_terminal())
            .collect())
    }

    pub async fn update_status(
        &self,
        id: BookingId,
        target: BookingStatus,
        actor: Actor,
    ) -> DispatchResult<Booking> {
        let booking = self.machine.update_status(id, target, actor).await?;
        if booking.status.is_terminal() {
            self.stop_simulation(id);
        }
        Ok(booking)
    }

    /// Status change made from the driver's job list; only the bound driver
    /// may make it.
    pub async fn update_job_status(
        &self,
        id: BookingId,
        target: BookingStatus,
        driver: UserId,
    ) -> DispatchResult<Booking> {
        self.update_status(id, target, Actor::Driver(driver)).await
    }

    pub async fn cancel_booking(&self, id: BookingId, actor: Actor) -> DispatchResult<Booking> {
        let reason = match actor {
            Actor::Rider(_) => "cancelled by rider",
            Actor::Driver(_) => "cancelled by driver",
            Actor::Admin(_) => "cancelled by admin",
            Actor::System => "cancelled",
        };
        let booking = self.machine.cancel(id, actor, reason).await?;
        self.stop_simulation(id);
        Ok(booking)
    }

    pub async fn rate_driver(&self, id: BookingId, rider: UserId, rating: u8) -> DispatchResult<Booking> {
        self.machine.rate_driver(id, rider, rating).await
    }

    pub async fn report_incident(&self, id: BookingId, actor: Actor) -> DispatchResult<Booking> {
        self.machine.report_incident(id, actor).await
    }

    /// Driver-reported position for a booking; also moves the driver in the
    /// matcher's index.
    pub async fn report_location(
        &self,
        id: BookingId,
        driver: UserId,
        point: GeoPoint,
    ) -> DispatchResult<usize> {
        let reached = self
            .tracking
            .publish(id, point, PositionOrigin::Driver(driver))
            .await?;
        if let Err(err) = self.fleet.update_driver_position(driver, point) {
            warn!(driver_id = %driver, error = %err, "driver position not indexed");
        }
        Ok(reached)
    }

    /// Last known position of a booking.
    pub async fn location(&self, id: BookingId) -> DispatchResult<GeoPoint> {
        self.tracking
            .last_known(id)
            .await?
            .ok_or_else(|| DispatchError::not_found("location", id))
    }

    pub async fn subscribe(&self, id: BookingId, user: UserId) -> DispatchResult<Subscription> {
        self.tracking.subscribe(id, user).await
    }

    /// Start the position simulator for an active booking.
    pub async fn start_tracking(&self, id: BookingId, actor: Actor) -> DispatchResult<()> {
        let booking = self.machine.get(id).await?;
        if let Some(user) = actor.user_id() {
            if !booking.is_party(user) && !matches!(actor, Actor::Admin(_)) {
                return Err(DispatchError::unauthorized(format!(
                    "user {user} is not a party to booking {id}"
                )));
            }
        }
        if !booking.status.is_active_trip() || booking.driver.is_none() {
            return Err(DispatchError::conflict(format!(
                "booking {id} is {} and cannot be tracked",
                booking.status
            )));
        }

        match self.simulations.entry(id) {
            Entry::Occupied(running) if !running.get().is_finished() => {
                Err(DispatchError::conflict(format!(
                    "booking {id} is already being simulated"
                )))
            }
            entry => {
                let simulator = PositionSimulator::new(
                    self.machine.clone(),
                    self.tracking.clone(),
                    self.config.simulator.clone(),
                );
                let handle = simulator.spawn(&booking);
                match entry {
                    Entry::Occupied(mut finished) => {
                        finished.insert(handle);
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(handle);
                    }
                }
                info!(booking_id = %id, "position simulation started");
                Ok(())
            }
        }
    }

    fn stop_simulation(&self, id: BookingId) {
        if let Some((_, handle)) = self.simulations.remove(&id) {
            handle.abort();
        }
    }

    pub fn drivers(&self, only_available: bool) -> Vec<Driver> {
        self.fleet.drivers(only_available)
    }

    pub fn driver(&self, id: UserId) -> DispatchResult<Driver> {
        self.fleet
            .driver(id)
            .ok_or_else(|| DispatchError::not_found("driver", id))
    }

    /// Move a driver. Only the driver or an admin may.
    pub fn update_driver_position(
        &self,
        id: UserId,
        point: GeoPoint,
        actor: Actor,
    ) -> DispatchResult<Driver> {
        match actor {
            Actor::Driver(user) if user != id => Err(DispatchError::unauthorized(format!(
                "driver {user} cannot move driver {id}"
            ))),
            Actor::Rider(_) => Err(DispatchError::unauthorized("riders cannot move drivers")),
            _ => self.fleet.update_driver_position(id, point),
        }
    }

    /// Toggle a driver's availability. A driver still bound to a booking
    /// cannot go available; the check and the write happen under the fleet's
    /// lock.
    pub fn set_driver_availability(
        &self,
        id: UserId,
        available: bool,
        actor: Actor,
    ) -> DispatchResult<Driver> {
        match actor {
            Actor::Driver(user) if user != id => {
                return Err(DispatchError::unauthorized(format!(
                    "driver {user} cannot change driver {id}"
                )))
            }
            Actor::Rider(_) => {
                return Err(DispatchError::unauthorized(
                    "riders cannot change driver availability",
                ))
            }
            _ => {}
        }
        self.fleet.set_driver_availability(id, available)
    }
}
