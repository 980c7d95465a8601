//! Router assembly.
//!
//! `build_router` is the single entry point; `main.rs` attaches middleware
//! layers so tests can drive the bare router.

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::{bookings, drivers, health, tracking_ws};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/bookings",
            get(bookings::list_bookings).post(bookings::create_booking),
        )
        .route("/bookings/future", post(bookings::create_future_booking))
        .route("/bookings/match", post(bookings::match_driver))
        .route(
            "/bookings/:id",
            get(bookings::get_booking).delete(bookings::cancel_booking),
        )
        .route("/bookings/:id/status", put(bookings::update_status))
        .route("/bookings/:id/track", post(bookings::start_tracking))
        .route(
            "/bookings/:id/location",
            get(bookings::get_location).post(bookings::report_location),
        )
        .route("/bookings/:id/rating", post(bookings::rate_driver))
        .route("/bookings/:id/incident", post(bookings::report_incident))
        .route("/drivers", get(drivers::list_drivers))
        .route("/drivers/available", get(drivers::available_drivers))
        .route("/drivers/jobs/:id/status", put(drivers::update_job_status))
        .route("/drivers/:id", get(drivers::get_driver))
        .route("/drivers/:id/location", post(drivers::update_location))
        .route("/drivers/:id/availability", put(drivers::set_availability))
        .route("/drivers/:id/jobs", get(drivers::driver_jobs))
        .route("/ws", get(tracking_ws::tracking_socket))
        .with_state(state)
}
