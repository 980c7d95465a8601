use std::sync::Arc;

use tracing::{debug, warn};

use super::types::{Availability, MatchCandidate};
use crate::config::MatchingConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::fleet::{DriverFilter, Fleet};
use crate::model::{GeoPoint, VehicleClass};

/// Nearest-driver matching over the fleet's H3 driver index.
///
/// Distances are great-circle. Equidistant drivers keep the index's order.
/// Finding a driver never changes driver state; [`DriverMatcher::claim_nearest`]
/// is the one entry point that binds, and it does so through the fleet's
/// conditional claim.
pub struct DriverMatcher {
    fleet: Arc<Fleet>,
    config: MatchingConfig,
}

impl DriverMatcher {
    pub fn new(fleet: Arc<Fleet>, config: MatchingConfig) -> Self {
        Self { fleet, config }
    }

    pub fn default_radius_m(&self) -> f64 {
        self.config.default_radius_m
    }

    /// Candidates within `max_radius_m` of `pickup`, nearest first.
    pub fn candidates(
        &self,
        pickup: GeoPoint,
        max_radius_m: f64,
        availability: Availability,
    ) -> DispatchResult<Vec<MatchCandidate>> {
        pickup.validate()?;
        if !max_radius_m.is_finite() || max_radius_m < 0.0 {
            return Err(DispatchError::validation(format!(
                "search radius {max_radius_m} must be a non-negative distance"
            )));
        }
        let filter = match availability {
            Availability::Any => DriverFilter::Any,
            Availability::Available => DriverFilter::Available { class: None },
            Availability::AvailableWithClass(class) => DriverFilter::Available { class: Some(class) },
        };
        Ok(self
            .fleet
            .candidates_near(pickup, max_radius_m, filter)?
            .into_iter()
            .map(MatchCandidate::from)
            .collect())
    }

    /// The closest qualifying driver, or `NoDriverAvailable`.
    pub fn find_nearest(
        &self,
        pickup: GeoPoint,
        max_radius_m: f64,
        availability: Availability,
    ) -> DispatchResult<MatchCandidate> {
        let nearest = self
            .candidates(pickup, max_radius_m, availability)?
            .into_iter()
            .next()
            .ok_or(DispatchError::NoDriverAvailable {
                radius_m: max_radius_m,
            })?;
        debug!(
            driver_id = %nearest.driver,
            distance_m = nearest.distance_m,
            "nearest driver found"
        );
        Ok(nearest)
    }

    /// Claim the nearest available driver with a vehicle, moving on to the
    /// next candidate whenever a claim loses a race.
    pub fn claim_nearest(
        &self,
        pickup: GeoPoint,
        class: Option<VehicleClass>,
    ) -> DispatchResult<MatchCandidate> {
        let availability = match class {
            Some(class) => Availability::AvailableWithClass(class),
            None => Availability::Available,
        };
        let radius_m = self.config.default_radius_m;
        let candidates = self.candidates(pickup, radius_m, availability)?;
        for candidate in candidates
            .into_iter()
            .take(self.config.max_candidate_attempts.max(1))
        {
            let Some(vehicle) = candidate.vehicle else {
                continue;
            };
            match self.fleet.claim(candidate.driver, vehicle) {
                Ok(()) => return Ok(candidate),
                Err(err) if err.is_retryable() => {
                    warn!(driver_id = %candidate.driver, error = %err, "lost driver claim, trying next candidate");
                }
                Err(err) => return Err(err),
            }
        }
        Err(DispatchError::NoDriverAvailable { radius_m })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Driver, UserId, Vehicle, VehicleId};

    fn add_driver(fleet: &Fleet, lat: f64, lng: f64, class: VehicleClass) -> (UserId, VehicleId) {
        let driver = Driver {
            id: UserId::new(),
            username: format!("driver-{lat}-{lng}"),
            available: true,
            position: GeoPoint::new(lat, lng),
        };
        let vehicle = Vehicle {
            id: VehicleId::new(),
            driver: driver.id,
            class,
            capacity: 4,
            available: true,
        };
        fleet.register_driver(driver.clone()).expect("driver");
        fleet.register_vehicle(vehicle.clone()).expect("vehicle");
        (driver.id, vehicle.id)
    }

    fn matcher(fleet: Arc<Fleet>) -> DriverMatcher {
        DriverMatcher::new(fleet, MatchingConfig::default())
    }

    #[test]
    fn finds_the_closest_driver_within_radius() {
        let fleet = Arc::new(Fleet::default());
        let (far, _) = add_driver(&fleet, 52.55, 13.45, VehicleClass::Sedan);
        let (near, _) = add_driver(&fleet, 52.521, 13.406, VehicleClass::Sedan);
        let m = matcher(fleet);

        let found = m
            .find_nearest(GeoPoint::new(52.52, 13.405), 10_000.0, Availability::Available)
            .expect("match");
        assert_eq!(found.driver, near);
        assert_ne!(found.driver, far);
    }

    #[test]
    fn nothing_in_radius_is_no_driver_available() {
        let fleet = Arc::new(Fleet::default());
        add_driver(&fleet, 48.85, 2.35, VehicleClass::Sedan);
        let m = matcher(fleet);

        let err = m
            .find_nearest(GeoPoint::new(52.52, 13.405), 10_000.0, Availability::Available)
            .expect_err("too far");
        assert!(matches!(err, DispatchError::NoDriverAvailable { .. }));
    }

    #[test]
    fn claim_nearest_skips_a_driver_that_was_taken() {
        let fleet = Arc::new(Fleet::default());
        let (near, near_vehicle) = add_driver(&fleet, 52.521, 13.406, VehicleClass::Sedan);
        let (next, _) = add_driver(&fleet, 52.53, 13.41, VehicleClass::Sedan);
        let m = matcher(fleet.clone());

        fleet.claim(near, near_vehicle).expect("someone else got there first");
        let claimed = m
            .claim_nearest(GeoPoint::new(52.52, 13.405), None)
            .expect("fallback match");
        assert_eq!(claimed.driver, next);
        assert!(!fleet.driver(next).expect("driver").available);
    }

    #[test]
    fn invalid_radius_is_rejected() {
        let m = matcher(Arc::new(Fleet::default()));
        let err = m
            .find_nearest(GeoPoint::new(0.0, 0.0), -5.0, Availability::Any)
            .expect_err("negative radius");
        assert!(matches!(err, DispatchError::Validation(_)));
    }
}
