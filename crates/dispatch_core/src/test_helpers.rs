//! Test helpers for common test setup and utilities.
//!
//! Shared by unit tests, the integration tests under `tests/` and the outer
//! API crate's tests. Everything here is deterministic: a manually driven
//! clock, fixed demand and fixed Berlin coordinates.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

use crate::booking::{Booking, BookingStatus, StatusChange};
use crate::clock::Clock;
use crate::config::DispatchConfig;
use crate::fleet::Fleet;
use crate::model::{
    Account, BookingId, Driver, GeoPoint, Location, Role, UserId, Vehicle, VehicleClass, VehicleId,
};
use crate::service::{BookingRequest, DispatchService};
use crate::simulator::PositionSource;
use crate::spatial::GeoIndex;
use crate::store::{BookingStore, InMemoryBookingStore};
use crate::tracking::InMemoryLocationCache;

pub use crate::pricing::FixedDemand;

/// Wednesday 2024-01-10 12:00 UTC: a weekday hour outside every peak window.
pub fn weekday_noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0)
        .single()
        .expect("valid fixed timestamp")
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(weekday_noon())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Replays a fixed list of positions.
#[derive(Debug, Clone)]
pub struct ScriptedPositions {
    points: VecDeque<GeoPoint>,
}

impl ScriptedPositions {
    pub fn new(points: Vec<GeoPoint>) -> Self {
        Self {
            points: points.into(),
        }
    }
}

impl PositionSource for ScriptedPositions {
    fn next_position(&mut self) -> Option<GeoPoint> {
        self.points.pop_front()
    }
}

pub fn alexanderplatz() -> Location {
    Location::new("Alexanderplatz, Berlin", GeoPoint::new(52.5219, 13.4132))
}

pub fn brandenburg_gate() -> Location {
    Location::new("Pariser Platz, Berlin", GeoPoint::new(52.5163, 13.3777))
}

/// A stored-shape `pending` booking with no driver, for store-level tests.
pub fn booking_fixture() -> Booking {
    let now = Utc::now();
    Booking {
        id: BookingId::new(),
        rider: UserId::new(),
        driver: None,
        vehicle: None,
        vehicle_class: VehicleClass::Sedan,
        pickup: alexanderplatz(),
        dropoff: brandenburg_gate(),
        status: BookingStatus::Pending,
        price: 12.5,
        scheduled_time: None,
        start_time: None,
        end_time: None,
        driver_rating: None,
        has_incident: false,
        created_at: now,
        updated_at: now,
        version: 0,
        history: vec![StatusChange {
            from: None,
            to: BookingStatus::Pending,
            at: now,
        }],
    }
}

pub fn register_rider(fleet: &Fleet, name: &str) -> UserId {
    let id = UserId::new();
    fleet.register_account(Account {
        id,
        username: name.to_string(),
        role: Role::Customer,
    });
    id
}

pub fn register_admin(fleet: &Fleet, name: &str) -> UserId {
    let id = UserId::new();
    fleet.register_account(Account {
        id,
        username: name.to_string(),
        role: Role::Admin,
    });
    id
}

/// An available driver at `position` owning one available vehicle of `class`.
pub fn register_driver(
    fleet: &Fleet,
    name: &str,
    position: GeoPoint,
    class: VehicleClass,
) -> (UserId, VehicleId) {
    let driver = Driver {
        id: UserId::new(),
        username: name.to_string(),
        available: true,
        position,
    };
    let vehicle = Vehicle {
        id: VehicleId::new(),
        driver: driver.id,
        class,
        capacity: 4,
        available: true,
    };
    fleet
        .register_driver(driver.clone())
        .expect("test driver registers");
    fleet
        .register_vehicle(vehicle.clone())
        .expect("test vehicle registers");
    (driver.id, vehicle.id)
}

/// A fully wired in-memory service on a manual clock with zero demand.
pub struct TestHarness {
    pub service: Arc<DispatchService>,
    pub clock: Arc<ManualClock>,
    pub fleet: Arc<Fleet>,
    pub cache: Arc<InMemoryLocationCache>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(DispatchConfig::default(), Arc::new(InMemoryBookingStore::new()))
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        Self::build(config, Arc::new(InMemoryBookingStore::new()))
    }

    pub fn with_store(store: Arc<dyn BookingStore>) -> Self {
        Self::build(DispatchConfig::default(), store)
    }

    fn build(config: DispatchConfig, store: Arc<dyn BookingStore>) -> Self {
        let clock = Arc::new(ManualClock::default());
        let geo = GeoIndex::from_level(config.matching.index_resolution)
            .expect("test resolution is valid");
        let fleet = Arc::new(Fleet::new(geo));
        let cache = Arc::new(InMemoryLocationCache::new(
            config.tracking.cache_capacity,
            config.tracking.cache_ttl(),
        ));
        let service = Arc::new(DispatchService::new(
            config,
            fleet.clone(),
            store,
            cache.clone(),
            Arc::new(FixedDemand(0.0)),
            clock.clone(),
        ));
        Self {
            service,
            clock,
            fleet,
            cache,
        }
    }

    pub fn rider(&self, name: &str) -> UserId {
        register_rider(&self.fleet, name)
    }

    pub fn admin(&self, name: &str) -> UserId {
        register_admin(&self.fleet, name)
    }

    /// Sedan driver at `position`.
    pub fn driver(&self, name: &str, position: GeoPoint) -> (UserId, VehicleId) {
        register_driver(&self.fleet, name, position, VehicleClass::Sedan)
    }

    /// Alexanderplatz to the Brandenburg Gate.
    pub fn request(&self, rider: UserId) -> BookingRequest {
        BookingRequest::new(rider, alexanderplatz(), brandenburg_gate())
    }

    /// A `pending` booking with `driver` claimed.
    pub async fn immediate_booking(
        &self,
        rider: UserId,
        driver: UserId,
        vehicle: VehicleId,
    ) -> Booking {
        self.service
            .create_booking(self.request(rider).with_driver(driver, vehicle))
            .await
            .expect("immediate booking")
    }

    /// A `scheduled` booking, optionally with a driver claimed up front.
    pub async fn future_booking(
        &self,
        rider: UserId,
        assignment: Option<(UserId, VehicleId)>,
        at: DateTime<Utc>,
    ) -> Booking {
        let mut request = self.request(rider).scheduled_at(at);
        if let Some((driver, vehicle)) = assignment {
            request = request.with_driver(driver, vehicle);
        }
        self.service
            .create_future_booking(request)
            .await
            .expect("future booking")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
