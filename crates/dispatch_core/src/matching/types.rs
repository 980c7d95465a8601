use serde::Serialize;

use crate::fleet::DriverCandidate;
use crate::model::{UserId, VehicleClass, VehicleId};

/// Which drivers a match may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Every driver account, busy or not.
    Any,
    Available,
    AvailableWithClass(VehicleClass),
}

/// A driver near the pickup point.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub driver: UserId,
    pub vehicle: Option<VehicleId>,
    pub distance_m: f64,
}

impl From<DriverCandidate> for MatchCandidate {
    fn from(candidate: DriverCandidate) -> Self {
        Self {
            driver: candidate.driver,
            vehicle: candidate.vehicle,
            distance_m: candidate.distance_m,
        }
    }
}
