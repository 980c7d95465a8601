//! Real-time tracking socket.
//!
//! Client frames:
//! `{"event":"subscribe","data":"<bookingId>"}` and
//! `{"event":"updateLocation","data":{"bookingId":"..","location":{"lat":..,"lng":..}}}`.
//!
//! Server frames: `subscribed`, `locationUpdate`, `rideCompleted`,
//! `bookingCancelled` and `error`. Errors go only to the connection whose
//! frame caused them.
//!
//! Each socket buffers at most `tracking.topic_capacity` outgoing frames. A
//! socket that falls further behind lags its topics like any slow subscriber
//! and skips to the newest positions.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use dispatch_core::model::{BookingId, GeoPoint, UserId};
use dispatch_core::tracking::{Subscription, TrackingEvent};
use dispatch_core::DispatchService;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::actor;
use crate::auth::AuthUser;
use crate::errors::ApiResult;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationReport {
    pub booking_id: BookingId,
    #[serde(alias = "point")]
    pub location: GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientFrame {
    Subscribe(BookingId),
    UpdateLocation(LocationReport),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    Subscribed { booking_id: BookingId },
    LocationUpdate(GeoPoint),
    RideCompleted,
    BookingCancelled { reason: String },
    Error(String),
}

impl From<TrackingEvent> for ServerFrame {
    fn from(event: TrackingEvent) -> Self {
        match event {
            TrackingEvent::LocationUpdate(point) => Self::LocationUpdate(point),
            TrackingEvent::RideCompleted => Self::RideCompleted,
            TrackingEvent::BookingCancelled { reason } => Self::BookingCancelled { reason },
        }
    }
}

/// Per-socket session state. Owns one forwarding task per joined topic;
/// dropping the connection stops them.
pub struct Connection {
    service: Arc<DispatchService>,
    user: UserId,
    outgoing: mpsc::Sender<ServerFrame>,
    forwarders: HashMap<BookingId, JoinHandle<()>>,
}

impl Connection {
    pub fn new(
        service: Arc<DispatchService>,
        user: UserId,
        outgoing: mpsc::Sender<ServerFrame>,
    ) -> Self {
        Self {
            service,
            user,
            outgoing,
            forwarders: HashMap::new(),
        }
    }

    pub fn subscriptions(&self) -> usize {
        self.forwarders
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Handle one text frame from the client.
    pub async fn handle_text(&mut self, text: &str) {
        let frame = match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => frame,
            Err(err) => {
                self.send(ServerFrame::Error(format!("malformed frame: {err}")));
                return;
            }
        };
        let outcome = match frame {
            ClientFrame::Subscribe(booking_id) => self.subscribe(booking_id).await,
            ClientFrame::UpdateLocation(report) => self
                .service
                .report_location(report.booking_id, self.user, report.location)
                .await
                .map(|_| ()),
        };
        if let Err(err) = outcome {
            debug!(user_id = %self.user, error = %err, "socket frame rejected");
            self.send(ServerFrame::Error(err.to_string()));
        }
    }

    async fn subscribe(&mut self, booking_id: BookingId) -> dispatch_core::DispatchResult<()> {
        let subscription = self.service.subscribe(booking_id, self.user).await?;
        self.send(ServerFrame::Subscribed { booking_id });
        let forwarder = tokio::spawn(forward(subscription, self.outgoing.clone()));
        if let Some(previous) = self.forwarders.insert(booking_id, forwarder) {
            previous.abort();
        }
        Ok(())
    }

    fn send(&self, frame: ServerFrame) {
        if let Err(TrySendError::Full(frame)) = self.outgoing.try_send(frame) {
            debug!(user_id = %self.user, ?frame, "socket buffer full, frame dropped");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for (_, handle) in self.forwarders.drain() {
            handle.abort();
        }
    }
}

/// Relay a topic to one socket until the topic closes or the socket goes away.
async fn forward(subscription: Subscription, outgoing: mpsc::Sender<ServerFrame>) {
    let Subscription {
        booking_id,
        initial,
        mut receiver,
    } = subscription;
    if let Some(point) = initial {
        if outgoing.send(ServerFrame::LocationUpdate(point)).await.is_err() {
            return;
        }
    }
    loop {
        match receiver.recv().await {
            Ok(event) => {
                if outgoing.send(event.into()).await.is_err() {
                    return;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(booking_id = %booking_id, skipped, "tracking subscriber lagged");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

// ---------------------------------------------------------------------------
// GET /ws
// ---------------------------------------------------------------------------

pub(crate) async fn tracking_socket(
    State(st): State<AppState>,
    AuthUser(user): AuthUser,
    upgrade: WebSocketUpgrade,
) -> ApiResult<Response> {
    actor(&st.service, user)?;
    let service = st.service.clone();
    Ok(upgrade.on_upgrade(move |socket| serve_socket(socket, service, user)))
}

async fn serve_socket(socket: WebSocket, service: Arc<DispatchService>, user: UserId) {
    info!(user_id = %user, "tracking socket connected");
    let (mut sink, mut stream) = socket.split();
    let capacity = service.config().tracking.topic_capacity.max(1);
    let (outgoing, mut frames) = mpsc::channel::<ServerFrame>(capacity);

    let writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "unserializable socket frame dropped");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut connection = Connection::new(service, user, outgoing);
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => connection.handle_text(&text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(user_id = %user, error = %err, "socket read failed");
                break;
            }
        }
    }
    drop(connection);
    writer.abort();
    info!(user_id = %user, "tracking socket closed");
}
