//! HTTP and socket handlers. Each handler resolves the caller to an
//! [`Actor`] first; an unknown caller is refused before anything else runs.

pub mod bookings;
pub mod drivers;
pub mod health;
pub mod tracking_ws;

use dispatch_core::booking::Booking;
use dispatch_core::model::UserId;
use dispatch_core::{Actor, DispatchError, DispatchService};

use crate::errors::ApiResult;

pub(crate) fn is_admin(actor: Actor) -> bool {
    matches!(actor, Actor::Admin(_) | Actor::System)
}

/// Parties to a booking and admins may read it.
pub(crate) fn ensure_visible(booking: &Booking, actor: Actor) -> ApiResult<()> {
    match actor.user_id() {
        Some(user) if !is_admin(actor) && !booking.is_party(user) => {
            Err(DispatchError::unauthorized(format!(
                "user {user} is not a party to booking {}",
                booking.id
            ))
            .into())
        }
        _ => Ok(()),
    }
}

/// Only admins may act on behalf of another user.
pub(crate) fn ensure_self_or_admin(actor: Actor, target: UserId) -> ApiResult<()> {
    match actor.user_id() {
        Some(user) if user != target && !is_admin(actor) => Err(DispatchError::unauthorized(
            format!("user {user} cannot act for user {target}"),
        )
        .into()),
        _ => Ok(()),
    }
}

pub(crate) fn actor(service: &DispatchService, user: UserId) -> ApiResult<Actor> {
    Ok(service.actor_for(user)?)
}
