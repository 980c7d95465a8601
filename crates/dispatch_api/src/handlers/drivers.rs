//! `/drivers` endpoints.

use axum::extract::State;
use axum::Json;
use dispatch_core::model::{BookingId, GeoPoint, UserId};
use dispatch_core::{Actor, DispatchError};

use super::{actor, ensure_self_or_admin};
use crate::api_types::{
    AvailabilityBody, BookingResponse, BookingsResponse, DriverResponse, DriversResponse,
    StatusBody,
};
use crate::auth::AuthUser;
use crate::errors::ApiResult;
use crate::extract::{ApiJson, ApiPath};
use crate::state::AppState;

pub(crate) async fn list_drivers(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<DriversResponse>> {
    actor(&st.service, user)?;
    Ok(Json(st.service.drivers(false).into()))
}

pub(crate) async fn available_drivers(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<DriversResponse>> {
    actor(&st.service, user)?;
    Ok(Json(st.service.drivers(true).into()))
}

pub(crate) async fn get_driver(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<UserId>,
) -> ApiResult<Json<DriverResponse>> {
    actor(&st.service, user)?;
    Ok(Json(st.service.driver(id)?.into()))
}

pub(crate) async fn update_location(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<UserId>,
    ApiJson(point): ApiJson<GeoPoint>,
) -> ApiResult<Json<DriverResponse>> {
    let actor = actor(&st.service, user)?;
    Ok(Json(st.service.update_driver_position(id, point, actor)?.into()))
}

pub(crate) async fn set_availability(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<UserId>,
    ApiJson(body): ApiJson<AvailabilityBody>,
) -> ApiResult<Json<DriverResponse>> {
    let actor = actor(&st.service, user)?;
    Ok(Json(
        st.service
            .set_driver_availability(id, body.available, actor)?
            .into(),
    ))
}

/// Open jobs of a driver: their own, or anyone's for an admin.
pub(crate) async fn driver_jobs(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<UserId>,
) -> ApiResult<Json<BookingsResponse>> {
    let actor = actor(&st.service, user)?;
    ensure_self_or_admin(actor, id)?;
    Ok(Json(st.service.driver_jobs(id).await?.into()))
}

pub(crate) async fn update_job_status(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<BookingId>,
    ApiJson(body): ApiJson<StatusBody>,
) -> ApiResult<Json<BookingResponse>> {
    let Actor::Driver(driver) = actor(&st.service, user)? else {
        return Err(DispatchError::unauthorized("only drivers update job status").into());
    };
    Ok(Json(
        st.service
            .update_job_status(id, body.status, driver)
            .await?
            .into(),
    ))
}
