#![allow(dead_code)]

use dispatch_core::booking::{Actor, BookingStatus};
use dispatch_core::model::{GeoPoint, UserId, VehicleId};
use dispatch_core::test_helpers::TestHarness;
use dispatch_core::Booking;

/// Drivers spread east of Alexanderplatz, nearest first.
pub fn driver_row(harness: &TestHarness, count: usize) -> Vec<(UserId, VehicleId)> {
    (0..count)
        .map(|i| {
            let position = GeoPoint::new(52.5219, 13.4132 + 0.002 * (i as f64 + 1.0));
            harness.driver(&format!("driver-{i}"), position)
        })
        .collect()
}

/// Drive a booking through every in-trip state as its driver.
pub async fn drive_to_completion(harness: &TestHarness, booking: &Booking) -> Booking {
    let driver = booking.driver.expect("booking has a driver");
    let mut current = booking.clone();
    for target in [
        BookingStatus::EnRoute,
        BookingStatus::GoodsCollected,
        BookingStatus::Completed,
    ] {
        current = harness
            .service
            .update_status(booking.id, target, Actor::Driver(driver))
            .await
            .expect("driver advances booking");
    }
    current
}

/// Whether each consecutive pair of statuses is an edge of the lifecycle.
pub fn is_valid_walk(walk: &[BookingStatus]) -> bool {
    use BookingStatus::*;
    let Some(first) = walk.first() else {
        return false;
    };
    if !matches!(first, Pending | Scheduled) {
        return false;
    }
    walk.windows(2).all(|pair| {
        matches!(
            (pair[0], pair[1]),
            (Scheduled, Assigned)
                | (Pending, EnRoute)
                | (Assigned, EnRoute)
                | (EnRoute, GoodsCollected)
                | (GoodsCollected, Completed)
                | (Assigned, Completed)
                | (Pending, Cancelled)
                | (Assigned, Cancelled)
                | (Scheduled, Cancelled)
        )
    })
}
