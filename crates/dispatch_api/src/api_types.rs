//! Request and response bodies for the HTTP endpoints.
//!
//! Field names are camelCase on the wire. No business logic lives here.

use chrono::{DateTime, Utc};
use dispatch_core::booking::Booking;
use dispatch_core::matching::MatchCandidate;
use dispatch_core::model::{Driver, GeoPoint, Location, UserId, VehicleClass, VehicleId};
use dispatch_core::{BookingRequest, BookingStatus};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// /bookings
// ---------------------------------------------------------------------------

/// Body of `POST /bookings` and `POST /bookings/future`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingBody {
    /// Rider the booking is for; defaults to the caller.
    pub user_id: Option<UserId>,
    pub driver_id: Option<UserId>,
    pub vehicle_id: Option<VehicleId>,
    pub vehicle_class: Option<VehicleClass>,
    pub pickup: Location,
    pub dropoff: Location,
    pub price: Option<f64>,
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auto_match: bool,
}

impl CreateBookingBody {
    pub fn into_request(self, rider: UserId) -> BookingRequest {
        BookingRequest {
            rider,
            driver: self.driver_id,
            vehicle: self.vehicle_id,
            vehicle_class: self.vehicle_class,
            pickup: self.pickup,
            dropoff: self.dropoff,
            price: self.price,
            scheduled_time: self.scheduled_time,
            auto_match: self.auto_match,
        }
    }
}

/// Only the pickup coordinates matter for matching.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchPickup {
    pub coordinates: GeoPoint,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchBody {
    pub user_id: Option<UserId>,
    pub pickup: MatchPickup,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusBody {
    pub status: BookingStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RatingBody {
    pub rating: u8,
}

/// Filters for `GET /bookings`. Without one, admins see everything and
/// everyone else sees their own bookings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingListQuery {
    pub rider_id: Option<UserId>,
    pub driver_id: Option<UserId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingResponse {
    pub success: bool,
    pub booking: Booking,
}

impl From<Booking> for BookingResponse {
    fn from(booking: Booking) -> Self {
        Self {
            success: true,
            booking,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingsResponse {
    pub success: bool,
    pub bookings: Vec<Booking>,
}

impl From<Vec<Booking>> for BookingsResponse {
    fn from(bookings: Vec<Booking>) -> Self {
        Self {
            success: true,
            bookings,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedDriver {
    pub id: UserId,
    pub username: String,
    pub position: GeoPoint,
    pub vehicle_id: Option<VehicleId>,
    pub distance_m: f64,
}

impl MatchedDriver {
    pub fn new(candidate: MatchCandidate, driver: Driver) -> Self {
        Self {
            id: candidate.driver,
            username: driver.username,
            position: driver.position,
            vehicle_id: candidate.vehicle,
            distance_m: candidate.distance_m,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchResponse {
    pub success: bool,
    pub driver: MatchedDriver,
}

// ---------------------------------------------------------------------------
// Locations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LocationResponse {
    pub success: bool,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationAccepted {
    pub success: bool,
    /// Subscribers the position reached.
    pub delivered: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// /drivers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityBody {
    pub available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriverResponse {
    pub success: bool,
    pub driver: Driver,
}

impl From<Driver> for DriverResponse {
    fn from(driver: Driver) -> Self {
        Self {
            success: true,
            driver,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DriversResponse {
    pub success: bool,
    pub drivers: Vec<Driver>,
}

impl From<Vec<Driver>> for DriversResponse {
    fn from(drivers: Vec<Driver>) -> Self {
        Self {
            success: true,
            drivers,
        }
    }
}
