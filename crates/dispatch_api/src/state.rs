//! Shared handler state.

use std::sync::Arc;

use dispatch_core::DispatchService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DispatchService>,
}

impl AppState {
    pub fn new(service: Arc<DispatchService>) -> Self {
        Self { service }
    }
}
