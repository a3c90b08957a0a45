mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time;
use tokio_tungstenite::tungstenite;

use push_api::push::clock::ManualClock;
use push_api::push::encoder::StructuredEncoder;
use push_api::push::event::{EventFields, EventType, RawEvent, SubscriberId};
use push_api::AppState;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Helper: start an actual TCP server for WebSocket testing.
async fn start_ws_server(state: AppState) -> SocketAddr {
    let app = push_api::routes::router().with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

async fn default_server() -> (SocketAddr, AppState, Arc<ManualClock>) {
    let (state, clock) = common::test_state();
    let addr = start_ws_server(state.clone()).await;
    (addr, state, clock)
}

/// Helper: open a channel for `subscriber` and connect to it.
/// Returns once the hub has the connection attached.
async fn connect(addr: SocketAddr, state: &AppState, subscriber: &str, query: &str) -> WsStream {
    let token = state
        .registrar
        .open(&SubscriberId::new(subscriber))
        .await
        .expect("open channel");
    connect_with_token(addr, state, subscriber, token.as_str(), query).await
}

async fn connect_with_token(
    addr: SocketAddr,
    state: &AppState,
    subscriber: &str,
    token: &str,
    query: &str,
) -> WsStream {
    let url = format!("ws://{addr}/channel?token={token}{query}");
    let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    let subscriber = SubscriberId::new(subscriber);
    time::timeout(Duration::from_secs(5), async {
        while !state.hub.is_connected(&subscriber) {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timeout waiting for attach");

    ws_stream
}

async fn next_message(ws: &mut WsStream) -> tungstenite::Message {
    time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout waiting for message")
        .expect("stream ended")
        .expect("ws read error")
}

fn assert_closed_with(msg: tungstenite::Message, code: u16) {
    match msg {
        tungstenite::Message::Close(Some(frame)) => {
            assert_eq!(
                frame.code,
                tungstenite::protocol::frame::coding::CloseCode::from(code)
            );
        }
        other => panic!("Expected Close frame, got: {other:?}"),
    }
}

fn add_person() -> RawEvent {
    RawEvent::new(
        EventType::new("addPersonEvent"),
        EventFields::new().with("name", "John").with("age", 12),
    )
}

async fn subscribe(state: &AppState, subscriber: &str) {
    state
        .registrar
        .register_interest(
            &SubscriberId::new(subscriber),
            &EventType::new("addPersonEvent"),
            common::TTL_MINUTES,
        )
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pushed_event_arrives_as_text_frame() {
    let (addr, state, _clock) = default_server().await;
    let mut ws = connect(addr, &state, "s1", "").await;
    subscribe(&state, "s1").await;

    let result = state.push.push(&add_person()).await.unwrap();
    assert_eq!(result.succeeded, 1);

    let msg = next_message(&mut ws).await;
    assert_eq!(
        msg.into_text().expect("not text").as_str(),
        r#"{"name":"John","age":12,"event":"addPersonEvent"}"#
    );
}

#[tokio::test]
async fn native_client_receives_structured_payload() {
    let structured =
        StructuredEncoder::new().with_schema(EventType::new("addPersonEvent"), ["name", "age"]);
    let (state, _clock) = common::test_state_with(common::test_config(), structured);
    let addr = start_ws_server(state.clone()).await;

    let mut native = connect(addr, &state, "native", "&native=true").await;
    let mut web = connect(addr, &state, "web", "").await;
    subscribe(&state, "native").await;
    subscribe(&state, "web").await;

    let result = state.push.push(&add_person()).await.unwrap();
    assert_eq!(result.succeeded, 2);

    let msg = next_message(&mut native).await;
    assert_eq!(
        msg.into_text().unwrap().as_str(),
        r#"["addPersonEvent",1,["John",12]]"#
    );
    let msg = next_message(&mut web).await;
    assert_eq!(
        msg.into_text().unwrap().as_str(),
        r#"{"name":"John","age":12,"event":"addPersonEvent"}"#
    );
}

#[tokio::test]
async fn unknown_token_is_closed_with_4004() {
    let (addr, _state, _clock) = default_server().await;

    let url = format!("ws://{addr}/channel?token=cht_bogus");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    let msg = next_message(&mut ws).await;
    assert_closed_with(msg, 4004);
}

#[tokio::test]
async fn newer_connection_replaces_older_with_4009() {
    let (addr, state, _clock) = default_server().await;
    let token = state
        .registrar
        .open(&SubscriberId::new("s1"))
        .await
        .unwrap();

    let mut first = connect_with_token(addr, &state, "s1", token.as_str(), "").await;
    let mut second = connect_with_token(addr, &state, "s1", token.as_str(), "").await;

    assert_closed_with(next_message(&mut first).await, 4009);

    subscribe(&state, "s1").await;
    let result = state.push.push(&add_person()).await.unwrap();
    assert_eq!(result.succeeded, 1);
    assert!(next_message(&mut second).await.is_text());
}

#[tokio::test]
async fn expired_token_closes_connection_with_4008() {
    let (addr, state, clock) = default_server().await;
    let mut ws = connect(addr, &state, "s1", "").await;

    clock.advance(chrono::Duration::minutes(state.config.channel_token_minutes));
    assert_eq!(state.hub.expire_tokens(), 1);

    assert_closed_with(next_message(&mut ws).await, 4008);
    assert!(!state.hub.is_connected(&SubscriberId::new("s1")));
}
