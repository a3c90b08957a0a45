//! WebSocket upgrade handler and per-connection event loop.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::push::event::SubscriberId;
use crate::AppState;

use super::events::{ConnectionEvent, CLOSE_AUTH_FAILED, CLOSE_REPLACED, CLOSE_TOKEN_EXPIRED};

#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    pub token: String,
    /// Whether the client runtime wants native (structured) payloads.
    #[serde(default)]
    pub native: Option<bool>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/channel", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<ChannelQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, query))
}

async fn handle_connection(socket: WebSocket, state: AppState, query: ChannelQuery) {
    let (mut ws_tx, ws_rx) = socket.split();

    let attached = match state.hub.attach(&query.token, query.native) {
        Ok(attached) => attached,
        Err(e) => {
            tracing::debug!(error = %e, "channel attach rejected");
            let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, &e.to_string()).await;
            return;
        }
    };

    tracing::info!(
        subscriber = %attached.subscriber,
        connection_id = %attached.connection_id,
        native = ?query.native,
        "channel connection attached"
    );

    run_connection(&attached.subscriber, attached.events, ws_tx, ws_rx).await;

    state.hub.detach(&attached.subscriber, &attached.connection_id);

    tracing::info!(
        subscriber = %attached.subscriber,
        connection_id = %attached.connection_id,
        "channel connection ended"
    );
}

/// Forward hub events to the socket until either side goes away.
async fn run_connection(
    subscriber: &SubscriberId,
    mut events: mpsc::Receiver<ConnectionEvent>,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut ws_rx: SplitStream<WebSocket>,
) {
    loop {
        tokio::select! {
            // Clients only talk over HTTP; the socket is receive-only apart from control frames.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, %subscriber, "ws read error");
                        break;
                    }
                    Some(Ok(_)) => continue,
                }
            }

            event = events.recv() => {
                match event {
                    Some(ConnectionEvent::Message(payload)) => {
                        if ws_tx.send(Message::Text(payload.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Some(ConnectionEvent::TokenExpired) => {
                        let _ = send_close(&mut ws_tx, CLOSE_TOKEN_EXPIRED, "Token expired").await;
                        break;
                    }
                    None => {
                        let _ = send_close(&mut ws_tx, CLOSE_REPLACED, "Replaced by a newer connection").await;
                        break;
                    }
                }
            }
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
