//! WebSocket channel tests over a real listener, using the reconnecting
//! client transport

mod support;

use railguard_core::{ClientEvent, ServerEvent};
use railguard_detectors::DetectorRegistry;
use railguard_pipeline::RailSettings;
use railguard_server::AppState;
use railguard_transport::{ConnectionState, Inbound, Inbox, Transport, TransportConfig, WsConnector};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use support::{app, state, state_with_registry, Reply, SlowDetector};

async fn spawn_server() -> SocketAddr {
    serve(state(Reply::Fixed("Happy to help with that."))).await
}

async fn serve(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = app(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, session_id: &str) -> (Transport, Inbox) {
    let url = format!("ws://{addr}/ws?session_id={session_id}");
    let (transport, inbox) = Transport::connect(WsConnector::new(url), TransportConfig::default());
    tokio::time::timeout(
        Duration::from_secs(5),
        transport.wait_for(ConnectionState::Connected),
    )
    .await
    .unwrap()
    .unwrap();
    (transport, inbox)
}

/// Next event that is not a progress update
async fn next_terminal(inbox: &mut Inbox) -> ServerEvent {
    loop {
        let item = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        match item {
            Inbound::Event(ServerEvent::StatusUpdate { .. }) => continue,
            Inbound::Event(event) => return event,
            other => panic!("unexpected {other:?}"),
        }
    }
}

fn chat(session_id: &str, message_id: &str, text: &str) -> ClientEvent {
    ClientEvent::ChatMessage {
        session_id: Some(session_id.into()),
        message_id: Some(message_id.into()),
        text: text.into(),
        config: Default::default(),
    }
}

#[tokio::test]
async fn test_chat_over_websocket() {
    let addr = spawn_server().await;
    let (transport, mut inbox) = connect(addr, "ws1").await;

    transport.send(chat("ws1", "m1", "Hello, how are you?")).await.unwrap();
    match next_terminal(&mut inbox).await {
        ServerEvent::ChatResponse(outcome) => {
            assert_eq!(outcome.session_id, "ws1");
            assert_eq!(outcome.message_id, "m1");
            assert!(!outcome.blocked);
            assert_eq!(outcome.response, "Happy to help with that.");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_blocked_message_reports_reasons() {
    let addr = spawn_server().await;
    let (transport, mut inbox) = connect(addr, "ws2").await;

    transport
        .send(chat("ws2", "m1", "mail me at jane.doe@example.com"))
        .await
        .unwrap();
    match next_terminal(&mut inbox).await {
        ServerEvent::ChatResponse(outcome) => {
            assert!(outcome.blocked);
            assert_eq!(outcome.blocking_reasons, vec!["pii".to_string()]);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_detection_request_gets_result() {
    let addr = spawn_server().await;
    let (transport, mut inbox) = connect(addr, "ws3").await;

    let id = transport
        .send(ClientEvent::DetectionRequest {
            session_id: Some("ws3".into()),
            message_id: None,
            text: "call me at 555-123-4567".into(),
            detectors: Some(vec!["pii".into()]),
        })
        .await
        .unwrap();
    match next_terminal(&mut inbox).await {
        ServerEvent::DetectionResult {
            message_id,
            verdict,
            ..
        } => {
            assert_eq!(message_id, id);
            assert!(verdict.blocked);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_rejected_message_gets_error_event() {
    let addr = spawn_server().await;
    let (transport, mut inbox) = connect(addr, "ws4").await;

    transport.send(chat("ws4", "m1", "   ")).await.unwrap();
    match next_terminal(&mut inbox).await {
        ServerEvent::Error {
            message_id, code, ..
        } => {
            assert_eq!(message_id, "m1");
            assert_eq!(code, "invalid_request");
        }
        other => panic!("unexpected {other:?}"),
    }

    // Bound to ws4, so a message for another session is refused
    transport.send(chat("other", "m2", "hello")).await.unwrap();
    match next_terminal(&mut inbox).await {
        ServerEvent::Error { code, .. } => assert_eq!(code, "invalid_request"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_resubmission_is_redelivered_once_per_client() {
    let addr = spawn_server().await;
    let (transport, mut inbox) = connect(addr, "ws5").await;

    transport.send(chat("ws5", "m1", "hello")).await.unwrap();
    let first = next_terminal(&mut inbox).await;
    assert_eq!(first.event_type(), "chat_response");

    // The server replays the recorded outcome; the client drops the repeat
    transport.send(chat("ws5", "m1", "hello")).await.unwrap();
    transport.send(chat("ws5", "m2", "second")).await.unwrap();
    let next = next_terminal(&mut inbox).await;
    assert_eq!(next.message_id(), "m2");
}

#[tokio::test]
async fn test_resent_message_is_answered_on_new_connection() {
    let addr = serve(state(Reply::Delayed(
        Duration::from_millis(300),
        "Worth the wait.",
    )))
    .await;

    let (first, _first_inbox) = connect(addr, "ws6").await;
    first.send(chat("ws6", "m1", "hello")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    first.close().await;

    // Sent again from a fresh connection while the first run is still going
    let (second, mut inbox) = connect(addr, "ws6").await;
    second.send(chat("ws6", "m1", "hello")).await.unwrap();
    match next_terminal(&mut inbox).await {
        ServerEvent::ChatResponse(outcome) => {
            assert_eq!(outcome.message_id, "m1");
            assert_eq!(outcome.response, "Worth the wait.");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_slow_detection_does_not_hold_up_chat() {
    let mut registry = DetectorRegistry::builtin();
    registry.register(
        "fact_check",
        Arc::new(SlowDetector::new("fact_check", Duration::from_millis(500))),
    );
    let settings = RailSettings {
        input_detectors: vec!["toxicity".into(), "pii".into()],
        output_detectors: vec!["toxicity".into()],
        ..RailSettings::default()
    };
    let addr = serve(state_with_registry(
        registry,
        Reply::Fixed("Happy to help with that."),
        settings,
    ))
    .await;
    let (transport, mut inbox) = connect(addr, "ws7").await;

    transport
        .send(ClientEvent::DetectionRequest {
            session_id: Some("ws7".into()),
            message_id: Some("d1".into()),
            text: "the moon is made of cheese".into(),
            detectors: Some(vec!["fact_check".into()]),
        })
        .await
        .unwrap();
    transport.send(chat("ws7", "m1", "hello")).await.unwrap();

    let first = next_terminal(&mut inbox).await;
    assert_eq!(first.event_type(), "chat_response");
    let second = next_terminal(&mut inbox).await;
    assert_eq!(second.event_type(), "detection_result");
    assert_eq!(second.message_id(), "d1");
}
