// =============================================================================
// WebSocket Handlers — quote fan-out and notification push
// =============================================================================
//
// Two endpoints:
//   /ws/quotes        — open; every raw upstream frame is forwarded.
//   /ws/notifications — bearer-token authenticated (header or ?token=); the
//                       authenticated user id keys the subscription.
//
// Both connections run a single select! loop combining the outbound queue,
// the ping ticker, and the inbound read with its deadline. Write deadline is
// 10 s per frame; the read deadline is 60 s, refreshed by any inbound
// traffic (pongs included); pings go out at 9/10 of the pong wait.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::auth::authenticate_token;
use crate::app_state::AppState;

const WRITE_WAIT: Duration = Duration::from_secs(10);
const PONG_WAIT: Duration = Duration::from_secs(60);
/// 9/10 of the pong wait.
const PING_PERIOD: Duration = Duration::from_secs(54);

// =============================================================================
// Quote fan-out (no auth)
// =============================================================================

pub async fn quotes_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_quote_viewer(socket, state))
}

async fn handle_quote_viewer(socket: WebSocket, state: Arc<AppState>) {
    let (viewer_id, mut frames) = state.quote_hub.subscribe();
    let (mut sender, mut receiver) = socket.split();

    let mut ping_interval = tokio::time::interval(PING_PERIOD);
    ping_interval.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            maybe_frame = frames.recv() => {
                match maybe_frame {
                    Some(frame) => {
                        if send_with_deadline(&mut sender, Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    // Evicted by the hub.
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if send_with_deadline(&mut sender, Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            inbound = read_with_deadline(&mut receiver) => {
                match inbound {
                    Inbound::Ping(data) => {
                        if send_with_deadline(&mut sender, Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Inbound::Traffic => {}
                    Inbound::Gone => break,
                }
            }
        }
    }

    state.quote_hub.unsubscribe(viewer_id);
}

// =============================================================================
// Notification push (authenticated)
// =============================================================================

#[derive(serde::Deserialize)]
pub struct NotifyWsQuery {
    token: Option<String>,
}

pub async fn notifications_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    axum::extract::Query(query): axum::extract::Query<NotifyWsQuery>,
    headers: axum::http::HeaderMap,
) -> impl IntoResponse {
    // Header takes precedence over the query parameter.
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or(query.token);

    let auth = match token.as_deref().map(|t| authenticate_token(t, &state.config.auth.jwt_secret)) {
        Some(Ok(auth)) => auth,
        _ => {
            warn!("notification ws rejected: missing or invalid token");
            return (StatusCode::UNAUTHORIZED, "invalid or missing token").into_response();
        }
    };

    info!(user_id = auth.user_id, "notification ws accepted");
    ws.on_upgrade(move |socket| handle_notification_viewer(socket, state, auth.user_id))
        .into_response()
}

async fn handle_notification_viewer(socket: WebSocket, state: Arc<AppState>, user_id: i64) {
    let (sink_id, mut queue) = state.notify_hub.register(user_id);
    let (mut sender, mut receiver) = socket.split();

    let mut ping_interval = tokio::time::interval(PING_PERIOD);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            maybe_notification = queue.recv() => {
                match maybe_notification {
                    Some(notification) => {
                        let json = match serde_json::to_string(&notification) {
                            Ok(json) => json,
                            Err(e) => {
                                // Not a connection fault; skip the frame.
                                warn!(error = %e, "notification serialise failed");
                                continue;
                            }
                        };
                        if send_with_deadline(&mut sender, Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if send_with_deadline(&mut sender, Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            inbound = read_with_deadline(&mut receiver) => {
                match inbound {
                    Inbound::Ping(data) => {
                        if send_with_deadline(&mut sender, Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Inbound::Traffic => {}
                    Inbound::Gone => break,
                }
            }
        }
    }

    state.notify_hub.unregister(user_id, sink_id);
    debug!(user_id, "notification ws closed");
}

// =============================================================================
// Shared frame plumbing
// =============================================================================

enum Inbound {
    /// Client ping to answer.
    Ping(Vec<u8>),
    /// Pong, text, or binary — refreshes the read deadline, nothing else.
    Traffic,
    /// Close, error, or read-deadline expiry.
    Gone,
}

/// One read bounded by the pong wait. Expiry evicts the connection.
async fn read_with_deadline(receiver: &mut SplitStream<WebSocket>) -> Inbound {
    match tokio::time::timeout(PONG_WAIT, receiver.next()).await {
        Ok(Some(Ok(Message::Ping(data)))) => Inbound::Ping(data),
        Ok(Some(Ok(Message::Close(_)))) => Inbound::Gone,
        Ok(Some(Ok(_))) => Inbound::Traffic,
        Ok(Some(Err(_))) | Ok(None) => Inbound::Gone,
        Err(_) => {
            debug!("viewer read deadline expired");
            Inbound::Gone
        }
    }
}

/// One write bounded by the write deadline.
async fn send_with_deadline(
    sender: &mut SplitSink<WebSocket, Message>,
    message: Message,
) -> Result<(), ()> {
    match tokio::time::timeout(WRITE_WAIT, sender.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "viewer write failed");
            Err(())
        }
        Err(_) => {
            debug!("viewer write deadline expired");
            Err(())
        }
    }
}
