//! Caller identity.
//!
//! Token issuance and verification live outside this service; a token here is
//! the caller's user id, sent as `Authorization: Bearer <id>` or, for socket
//! handshakes where browsers cannot set headers, as `?token=<id>`.

use axum::async_trait;
use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use dispatch_core::model::UserId;
use serde::Deserialize;

use crate::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

fn query_token(parts: &Parts) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(query)| query.token)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .or_else(|| query_token(parts))
            .filter(|token| !token.is_empty())
            .ok_or(ApiError::MissingCredentials)?;
        token
            .parse::<UserId>()
            .map(AuthUser)
            .map_err(|_| ApiError::InvalidCredentials("token is not a user id".to_string()))
    }
}
