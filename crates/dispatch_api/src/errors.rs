//! HTTP mapping of dispatch errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dispatch_core::DispatchError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("authentication required")]
    MissingCredentials,

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("invalid request: {0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Dispatch(err) => match err {
                DispatchError::Validation(_) => StatusCode::BAD_REQUEST,
                DispatchError::Unauthorized(_) => StatusCode::FORBIDDEN,
                DispatchError::NotFound { .. } | DispatchError::NoDriverAvailable { .. } => {
                    StatusCode::NOT_FOUND
                }
                DispatchError::Conflict(_) => StatusCode::CONFLICT,
                DispatchError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                DispatchError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::MissingCredentials | Self::InvalidCredentials(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Dispatch(err) => err.kind(),
            Self::MissingCredentials | Self::InvalidCredentials(_) => "unauthenticated",
            Self::BadRequest(_) => "bad_request",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = json!({
            "success": false,
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::booking::{BookingEvent, BookingStatus};

    #[test]
    fn dispatch_errors_map_to_expected_statuses() {
        let cases = [
            (DispatchError::validation("bad"), StatusCode::BAD_REQUEST),
            (DispatchError::unauthorized("no"), StatusCode::FORBIDDEN),
            (DispatchError::not_found("booking", "x"), StatusCode::NOT_FOUND),
            (
                DispatchError::NoDriverAvailable { radius_m: 10.0 },
                StatusCode::NOT_FOUND,
            ),
            (DispatchError::conflict("taken"), StatusCode::CONFLICT),
            (
                DispatchError::InvalidTransition {
                    from: BookingStatus::Completed,
                    event: BookingEvent::Cancel,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (DispatchError::store("down"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
        assert_eq!(ApiError::MissingCredentials.status(), StatusCode::UNAUTHORIZED);
    }
}
