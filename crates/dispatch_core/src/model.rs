//! Identifiers, coordinates and the fleet entities the dispatch core reads.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DispatchError, DispatchResult};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = DispatchError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self).map_err(|_| {
                    DispatchError::validation(format!(
                        "{} is not a valid {}",
                        s,
                        stringify!($name)
                    ))
                })
            }
        }
    };
}

id_type!(
    /// Account id. Riders, drivers and admins share one id space.
    UserId
);
id_type!(VehicleId);
id_type!(BookingId);

/// WGS84 point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Rejects non-finite or out-of-range coordinates.
    pub fn validate(&self) -> DispatchResult<()> {
        if !self.lat.is_finite() || !self.lng.is_finite() {
            return Err(DispatchError::validation("coordinates must be finite numbers"));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(DispatchError::validation(format!(
                "latitude {} outside [-90, 90]",
                self.lat
            )));
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(DispatchError::validation(format!(
                "longitude {} outside [-180, 180]",
                self.lng
            )));
        }
        Ok(())
    }

    pub fn to_lat_lng(self) -> DispatchResult<h3o::LatLng> {
        h3o::LatLng::new(self.lat, self.lng)
            .map_err(|err| DispatchError::validation(format!("invalid coordinates: {err}")))
    }
}

impl From<h3o::LatLng> for GeoPoint {
    fn from(value: h3o::LatLng) -> Self {
        Self::new(value.lat(), value.lng())
    }
}

/// A named place: pickup or dropoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub address: String,
    pub coordinates: GeoPoint,
}

impl Location {
    pub fn new(address: impl Into<String>, coordinates: GeoPoint) -> Self {
        Self {
            address: address.into(),
            coordinates,
        }
    }

    pub fn validate(&self, label: &str) -> DispatchResult<()> {
        if self.address.trim().is_empty() {
            return Err(DispatchError::validation(format!("{label} address is required")));
        }
        self.coordinates
            .validate()
            .map_err(|err| DispatchError::validation(format!("{label}: {err}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Driver,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: UserId,
    pub username: String,
    pub role: Role,
}

/// Vehicle capacity class; keys the per-km fare table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Sedan,
    Suv,
    Van,
    Truck,
}

impl VehicleClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sedan => "sedan",
            Self::Suv => "suv",
            Self::Van => "van",
            Self::Truck => "truck",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: UserId,
    pub username: String,
    pub available: bool,
    pub position: GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub driver: UserId,
    pub class: VehicleClass,
    pub capacity: u32,
    pub available: bool,
}
