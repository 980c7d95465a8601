//! `/bookings` endpoints.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use dispatch_core::model::{BookingId, GeoPoint, UserId};
use dispatch_core::store::BookingQuery;
use dispatch_core::Actor;
use tracing::info;

use super::{actor, ensure_self_or_admin, ensure_visible};
use crate::api_types::{
    BookingListQuery, BookingResponse, BookingsResponse, CreateBookingBody, LocationAccepted,
    LocationResponse, MatchBody, MatchResponse, MatchedDriver, MessageResponse, RatingBody,
    StatusBody,
};
use crate::auth::AuthUser;
use crate::errors::ApiResult;
use crate::extract::{ApiJson, ApiPath};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET /bookings
// ---------------------------------------------------------------------------

pub(crate) async fn list_bookings(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
    Query(filter): Query<BookingListQuery>,
) -> ApiResult<Json<BookingsResponse>> {
    let actor = actor(&st.service, user)?;
    let query = match (filter.rider_id, filter.driver_id, actor) {
        (Some(rider), _, _) => BookingQuery::Rider(rider),
        (None, Some(driver), _) => BookingQuery::Driver(driver),
        (None, None, Actor::Driver(id)) => BookingQuery::Driver(id),
        (None, None, Actor::Rider(id)) => BookingQuery::Rider(id),
        (None, None, Actor::Admin(_) | Actor::System) => BookingQuery::All,
    };
    match query {
        BookingQuery::Rider(target) | BookingQuery::Driver(target) => {
            ensure_self_or_admin(actor, target)?
        }
        BookingQuery::All => {}
    }
    Ok(Json(st.service.bookings(query).await?.into()))
}

// ---------------------------------------------------------------------------
// POST /bookings, POST /bookings/future
// ---------------------------------------------------------------------------

fn resolve_rider(actor: Actor, caller: UserId, requested: Option<UserId>) -> ApiResult<UserId> {
    let rider = requested.unwrap_or(caller);
    ensure_self_or_admin(actor, rider)?;
    Ok(rider)
}

pub(crate) async fn create_booking(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<CreateBookingBody>,
) -> ApiResult<(StatusCode, Json<BookingResponse>)> {
    let actor = actor(&st.service, user)?;
    let rider = resolve_rider(actor, user, body.user_id)?;
    let booking = st.service.create_booking(body.into_request(rider)).await?;
    info!(booking_id = %booking.id, rider_id = %rider, "booking created via api");
    Ok((StatusCode::CREATED, Json(booking.into())))
}

pub(crate) async fn create_future_booking(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<CreateBookingBody>,
) -> ApiResult<(StatusCode, Json<BookingResponse>)> {
    let actor = actor(&st.service, user)?;
    let rider = resolve_rider(actor, user, body.user_id)?;
    let booking = st
        .service
        .create_future_booking(body.into_request(rider))
        .await?;
    info!(booking_id = %booking.id, rider_id = %rider, "future booking created via api");
    Ok((StatusCode::CREATED, Json(booking.into())))
}

// ---------------------------------------------------------------------------
// POST /bookings/match
// ---------------------------------------------------------------------------

pub(crate) async fn match_driver(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<MatchBody>,
) -> ApiResult<Json<MatchResponse>> {
    let actor = actor(&st.service, user)?;
    let rider = resolve_rider(actor, user, body.user_id)?;
    let candidate = st.service.match_driver(rider, body.pickup.coordinates)?;
    let driver = st.service.driver(candidate.driver)?;
    Ok(Json(MatchResponse {
        success: true,
        driver: MatchedDriver::new(candidate, driver),
    }))
}

// ---------------------------------------------------------------------------
// /bookings/:id
// ---------------------------------------------------------------------------

pub(crate) async fn get_booking(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<BookingId>,
) -> ApiResult<Json<BookingResponse>> {
    let actor = actor(&st.service, user)?;
    let booking = st.service.booking(id).await?;
    ensure_visible(&booking, actor)?;
    Ok(Json(booking.into()))
}

pub(crate) async fn cancel_booking(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<BookingId>,
) -> ApiResult<Json<BookingResponse>> {
    let actor = actor(&st.service, user)?;
    Ok(Json(st.service.cancel_booking(id, actor).await?.into()))
}

pub(crate) async fn update_status(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<BookingId>,
    ApiJson(body): ApiJson<StatusBody>,
) -> ApiResult<Json<BookingResponse>> {
    let actor = actor(&st.service, user)?;
    Ok(Json(
        st.service.update_status(id, body.status, actor).await?.into(),
    ))
}

pub(crate) async fn start_tracking(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<BookingId>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    let actor = actor(&st.service, user)?;
    st.service.start_tracking(id, actor).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::ok("tracking started")),
    ))
}

pub(crate) async fn get_location(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<BookingId>,
) -> ApiResult<Json<LocationResponse>> {
    let actor = actor(&st.service, user)?;
    let booking = st.service.booking(id).await?;
    ensure_visible(&booking, actor)?;
    Ok(Json(LocationResponse {
        success: true,
        location: st.service.location(id).await?,
    }))
}

/// Non-socket fallback for driver position reports.
pub(crate) async fn report_location(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<BookingId>,
    ApiJson(point): ApiJson<GeoPoint>,
) -> ApiResult<Json<LocationAccepted>> {
    actor(&st.service, user)?;
    let delivered = st.service.report_location(id, user, point).await?;
    Ok(Json(LocationAccepted {
        success: true,
        delivered,
    }))
}

pub(crate) async fn rate_driver(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<BookingId>,
    ApiJson(body): ApiJson<RatingBody>,
) -> ApiResult<Json<BookingResponse>> {
    actor(&st.service, user)?;
    Ok(Json(
        st.service.rate_driver(id, user, body.rating).await?.into(),
    ))
}

pub(crate) async fn report_incident(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<BookingId>,
) -> ApiResult<Json<BookingResponse>> {
    let actor = actor(&st.service, user)?;
    Ok(Json(st.service.report_incident(id, actor).await?.into()))
}
