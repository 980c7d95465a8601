use axum::Json;

use crate::api_types::HealthResponse;

pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        service: "dispatch-api",
        version: env!("CARGO_PKG_VERSION"),
    })
}
