//! In-memory account, driver and vehicle directory.
//!
//! Account management proper lives outside the dispatch core; this directory
//! is the slice of it the core reads, plus the one write it owns: flipping
//! driver/vehicle availability. Claims are conditional updates made under the
//! directory's write lock, so two bookings can never bind the same driver.
//!
//! A driver's `available` flag is derived: on duty and not bound by a claim.
//! Going on duty is refused while a claim is outstanding, and releasing a
//! claim leaves an off-duty driver unavailable.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{DispatchError, DispatchResult};
use crate::model::{Account, Driver, GeoPoint, Role, UserId, Vehicle, VehicleClass, VehicleId};
use crate::spatial::{DriverIndex, GeoIndex};

/// Which drivers a radius query may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverFilter {
    /// Any driver account, regardless of availability.
    Any,
    /// Available drivers owning an available vehicle, optionally of one class.
    Available { class: Option<VehicleClass> },
}

/// A driver near a point, with the vehicle a booking would use.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverCandidate {
    pub driver: UserId,
    pub vehicle: Option<VehicleId>,
    pub distance_m: f64,
}

struct FleetState {
    accounts: HashMap<UserId, Account>,
    drivers: HashMap<UserId, Driver>,
    vehicles: HashMap<VehicleId, Vehicle>,
    /// Vehicles per driver in registration order.
    vehicles_by_driver: HashMap<UserId, Vec<VehicleId>>,
    /// Drivers holding a claim that has not been released.
    bound: HashSet<UserId>,
    off_duty: HashSet<UserId>,
    index: DriverIndex,
}

impl FleetState {
    fn first_vehicle(&self, driver: UserId, filter: DriverFilter) -> Option<VehicleId> {
        let owned = self.vehicles_by_driver.get(&driver)?;
        owned.iter().copied().find(|id| {
            let Some(vehicle) = self.vehicles.get(id) else {
                return false;
            };
            match filter {
                DriverFilter::Any => true,
                DriverFilter::Available { class } => {
                    vehicle.available && class.map_or(true, |c| c == vehicle.class)
                }
            }
        })
    }
}

pub struct Fleet {
    state: RwLock<FleetState>,
}

impl Fleet {
    pub fn new(geo: GeoIndex) -> Self {
        Self {
            state: RwLock::new(FleetState {
                accounts: HashMap::new(),
                drivers: HashMap::new(),
                vehicles: HashMap::new(),
                vehicles_by_driver: HashMap::new(),
                bound: HashSet::new(),
                off_duty: HashSet::new(),
                index: DriverIndex::new(geo),
            }),
        }
    }

    pub fn register_account(&self, account: Account) {
        self.state.write().accounts.insert(account.id, account);
    }

    /// Register a driver account with an initial position.
    pub fn register_driver(&self, driver: Driver) -> DispatchResult<()> {
        driver.position.validate()?;
        let mut state = self.state.write();
        state.index.upsert(driver.id, driver.position)?;
        state.accounts.insert(
            driver.id,
            Account {
                id: driver.id,
                username: driver.username.clone(),
                role: Role::Driver,
            },
        );
        if driver.available {
            state.off_duty.remove(&driver.id);
        } else {
            state.off_duty.insert(driver.id);
        }
        state.drivers.insert(driver.id, driver);
        Ok(())
    }

    pub fn register_vehicle(&self, vehicle: Vehicle) -> DispatchResult<()> {
        let mut state = self.state.write();
        if !state.drivers.contains_key(&vehicle.driver) {
            return Err(DispatchError::not_found("driver", vehicle.driver));
        }
        let owned = state.vehicles_by_driver.entry(vehicle.driver).or_default();
        if !owned.contains(&vehicle.id) {
            owned.push(vehicle.id);
        }
        state.vehicles.insert(vehicle.id, vehicle);
        Ok(())
    }

    pub fn account(&self, id: UserId) -> Option<Account> {
        self.state.read().accounts.get(&id).cloned()
    }

    pub fn driver(&self, id: UserId) -> Option<Driver> {
        self.state.read().drivers.get(&id).cloned()
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<Vehicle> {
        self.state.read().vehicles.get(&id).cloned()
    }

    pub fn drivers(&self, only_available: bool) -> Vec<Driver> {
        let state = self.state.read();
        let mut drivers: Vec<Driver> = state
            .drivers
            .values()
            .filter(|d| !only_available || d.available)
            .cloned()
            .collect();
        drivers.sort_by(|a, b| a.username.cmp(&b.username));
        drivers
    }

    pub fn update_driver_position(&self, id: UserId, position: GeoPoint) -> DispatchResult<Driver> {
        position.validate()?;
        let mut state = self.state.write();
        if !state.drivers.contains_key(&id) {
            return Err(DispatchError::not_found("driver", id));
        }
        state.index.upsert(id, position)?;
        let driver = state
            .drivers
            .get_mut(&id)
            .ok_or_else(|| DispatchError::not_found("driver", id))?;
        driver.position = position;
        Ok(driver.clone())
    }

    /// Put a driver on or off duty. Going on duty fails with `Conflict` while
    /// the driver is still bound to a booking.
    pub fn set_driver_availability(&self, id: UserId, available: bool) -> DispatchResult<Driver> {
        let mut state = self.state.write();
        if !state.drivers.contains_key(&id) {
            return Err(DispatchError::not_found("driver", id));
        }
        if available {
            if state.bound.contains(&id) {
                return Err(DispatchError::conflict(format!(
                    "driver {id} is still bound to a booking"
                )));
            }
            state.off_duty.remove(&id);
        } else {
            state.off_duty.insert(id);
        }
        let driver = state
            .drivers
            .get_mut(&id)
            .ok_or_else(|| DispatchError::not_found("driver", id))?;
        driver.available = available;
        Ok(driver.clone())
    }

    /// Atomically mark both driver and vehicle unavailable, only if both are
    /// currently available. Losers of a race get `Conflict`.
    pub fn claim(&self, driver_id: UserId, vehicle_id: VehicleId) -> DispatchResult<()> {
        let mut state = self.state.write();
        let vehicle = state
            .vehicles
            .get(&vehicle_id)
            .ok_or_else(|| DispatchError::not_found("vehicle", vehicle_id))?;
        if vehicle.driver != driver_id {
            return Err(DispatchError::validation(format!(
                "vehicle {vehicle_id} does not belong to driver {driver_id}"
            )));
        }
        let vehicle_available = vehicle.available;
        let driver = state
            .drivers
            .get(&driver_id)
            .ok_or_else(|| DispatchError::not_found("driver", driver_id))?;
        if !driver.available {
            return Err(DispatchError::conflict(format!(
                "driver {driver_id} is no longer available"
            )));
        }
        if !vehicle_available {
            return Err(DispatchError::conflict(format!(
                "vehicle {vehicle_id} is no longer available"
            )));
        }

        if let Some(driver) = state.drivers.get_mut(&driver_id) {
            driver.available = false;
        }
        if let Some(vehicle) = state.vehicles.get_mut(&vehicle_id) {
            vehicle.available = false;
        }
        state.bound.insert(driver_id);
        debug!(driver_id = %driver_id, vehicle_id = %vehicle_id, "claimed driver and vehicle");
        Ok(())
    }

    /// Hand a claim back. The vehicle becomes available again and so does the
    /// driver, unless they went off duty meanwhile. Unknown ids are ignored.
    pub fn release(&self, driver_id: Option<UserId>, vehicle_id: Option<VehicleId>) {
        let mut state = self.state.write();
        if let Some(id) = driver_id {
            state.bound.remove(&id);
            let on_duty = !state.off_duty.contains(&id);
            if let Some(driver) = state.drivers.get_mut(&id) {
                driver.available = on_duty;
            }
        }
        if let Some(vehicle) = vehicle_id.and_then(|id| state.vehicles.get_mut(&id)) {
            vehicle.available = true;
        }
        debug!(
            driver_id = ?driver_id,
            vehicle_id = ?vehicle_id,
            "released driver and vehicle"
        );
    }

    /// Drivers within `radius_m` of `point`, nearest first.
    pub fn candidates_near(
        &self,
        point: GeoPoint,
        radius_m: f64,
        filter: DriverFilter,
    ) -> DispatchResult<Vec<DriverCandidate>> {
        let state = self.state.read();
        let hits = state.index.within_radius(point, radius_m)?;
        Ok(hits
            .into_iter()
            .filter_map(|(driver_id, distance_m)| {
                let driver = state.drivers.get(&driver_id)?;
                let vehicle = state.first_vehicle(driver_id, filter);
                match filter {
                    DriverFilter::Any => Some(DriverCandidate {
                        driver: driver_id,
                        vehicle,
                        distance_m,
                    }),
                    DriverFilter::Available { .. } => {
                        (driver.available && vehicle.is_some()).then_some(DriverCandidate {
                            driver: driver_id,
                            vehicle,
                            distance_m,
                        })
                    }
                }
            })
            .collect())
    }
}

impl Default for Fleet {
    fn default() -> Self {
        Self::new(GeoIndex::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(name: &str, lat: f64, lng: f64) -> Driver {
        Driver {
            id: UserId::new(),
            username: name.to_string(),
            available: true,
            position: GeoPoint::new(lat, lng),
        }
    }

    fn vehicle_for(driver: &Driver, class: VehicleClass) -> Vehicle {
        Vehicle {
            id: VehicleId::new(),
            driver: driver.id,
            class,
            capacity: 4,
            available: true,
        }
    }

    #[test]
    fn claim_is_exclusive_until_release() {
        let fleet = Fleet::default();
        let d = driver("ada", 52.52, 13.405);
        let v = vehicle_for(&d, VehicleClass::Sedan);
        fleet.register_driver(d.clone()).expect("driver");
        fleet.register_vehicle(v.clone()).expect("vehicle");

        fleet.claim(d.id, v.id).expect("first claim");
        let err = fleet.claim(d.id, v.id).expect_err("second claim");
        assert!(err.is_retryable());
        assert!(!fleet.driver(d.id).expect("driver").available);
        assert!(!fleet.vehicle(v.id).expect("vehicle").available);

        fleet.release(Some(d.id), Some(v.id));
        assert!(fleet.driver(d.id).expect("driver").available);
        assert!(fleet.vehicle(v.id).expect("vehicle").available);
        fleet.claim(d.id, v.id).expect("claim after release");
    }

    #[test]
    fn claim_rejects_vehicle_of_another_driver() {
        let fleet = Fleet::default();
        let a = driver("a", 52.52, 13.405);
        let b = driver("b", 52.52, 13.405);
        let v = vehicle_for(&a, VehicleClass::Van);
        fleet.register_driver(a).expect("a");
        fleet.register_driver(b.clone()).expect("b");
        fleet.register_vehicle(v.clone()).expect("vehicle");

        let err = fleet.claim(b.id, v.id).expect_err("foreign vehicle");
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[test]
    fn available_filter_skips_busy_drivers_and_wrong_class() {
        let fleet = Fleet::default();
        let busy = driver("busy", 52.5201, 13.4051);
        let van = driver("van", 52.5202, 13.4052);
        let sedan = driver("sedan", 52.53, 13.41);
        for (d, class) in [
            (&busy, VehicleClass::Sedan),
            (&van, VehicleClass::Van),
            (&sedan, VehicleClass::Sedan),
        ] {
            fleet.register_driver(d.clone()).expect("driver");
            fleet.register_vehicle(vehicle_for(d, class)).expect("vehicle");
        }
        fleet.set_driver_availability(busy.id, false).expect("busy");

        let found = fleet
            .candidates_near(
                GeoPoint::new(52.52, 13.405),
                5_000.0,
                DriverFilter::Available {
                    class: Some(VehicleClass::Sedan),
                },
            )
            .expect("query");
        let ids: Vec<UserId> = found.iter().map(|c| c.driver).collect();
        assert_eq!(ids, vec![sedan.id]);

        let everyone = fleet
            .candidates_near(GeoPoint::new(52.52, 13.405), 5_000.0, DriverFilter::Any)
            .expect("query");
        assert_eq!(everyone.len(), 3);
        assert_eq!(everyone[0].driver, busy.id);
    }

    #[test]
    fn claimed_driver_cannot_go_on_duty_before_release() {
        let fleet = Fleet::default();
        let d = driver("ada", 52.52, 13.405);
        let v = vehicle_for(&d, VehicleClass::Sedan);
        fleet.register_driver(d.clone()).expect("driver");
        fleet.register_vehicle(v.clone()).expect("vehicle");

        // Claimed, but no booking stored yet.
        fleet.claim(d.id, v.id).expect("claim");
        let err = fleet.set_driver_availability(d.id, true).expect_err("bound");
        assert!(matches!(err, DispatchError::Conflict(_)));
        assert!(fleet.claim(d.id, v.id).is_err());

        fleet.release(Some(d.id), Some(v.id));
        assert!(fleet.set_driver_availability(d.id, true).expect("free").available);
    }

    #[test]
    fn release_keeps_an_off_duty_driver_unavailable() {
        let fleet = Fleet::default();
        let d = driver("ada", 52.52, 13.405);
        let v = vehicle_for(&d, VehicleClass::Sedan);
        fleet.register_driver(d.clone()).expect("driver");
        fleet.register_vehicle(v.clone()).expect("vehicle");

        fleet.claim(d.id, v.id).expect("claim");
        fleet.set_driver_availability(d.id, false).expect("off duty mid-trip");
        fleet.release(Some(d.id), Some(v.id));

        assert!(!fleet.driver(d.id).expect("driver").available);
        assert!(fleet.vehicle(v.id).expect("vehicle").available);
        fleet.set_driver_availability(d.id, true).expect("back on duty");
        fleet.claim(d.id, v.id).expect("claim again");
    }
}
