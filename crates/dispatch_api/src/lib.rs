//! HTTP and socket surface of the dispatch engine.
//!
//! Exposes the router, state and configuration for the binary and for the
//! integration tests.

pub mod api_types;
pub mod auth;
pub mod config;
pub mod errors;
pub mod extract;
pub mod handlers;
pub mod logging;
pub mod routes;
pub mod state;
