//! Drives the real server over WebSocket connections on an ephemeral port

use futures::{SinkExt, StreamExt};
use scanrelay::app::{self, ServeError};
use scanrelay::authorization::SimulatedAuthorizer;
use scanrelay::config::{AuthorizerConfig, RelayConfig};
use scanrelay::lifecycle::ShutdownReason;
use scanrelay::liveness;
use scanrelay::state::AppState;
use scanrelay::types::Role;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    handle: JoinHandle<Result<ShutdownReason, ServeError>>,
}

async fn start_server(config: RelayConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let authorizer = SimulatedAuthorizer::new(AuthorizerConfig {
        delay: Duration::ZERO,
        approval_rate: 1.0,
        max_amount: None,
    });
    let state = Arc::new(AppState::new(config, Arc::new(authorizer)));
    let handle = tokio::spawn(app::serve(listener, state.clone()));
    TestServer {
        addr,
        state,
        handle,
    }
}

/// Connect and consume the welcome event
async fn open(addr: SocketAddr) -> Ws {
    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    let welcome = recv_json(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    ws
}

async fn send_json(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next text frame as JSON, skipping transport-level pings and pongs
async fn recv_json(ws: &mut Ws) -> Value {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("transport error");
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Expected text frame, got {:?}", other),
        }
    }
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_scan_flow_over_websockets() {
    let server = start_server(RelayConfig::default()).await;
    let mut client = open(server.addr).await;
    let mut device = open(server.addr).await;

    send_json(&mut client, json!({"type": "client_announce"})).await;
    assert_eq!(recv_json(&mut client).await["type"], "confirmation");

    send_json(&mut device, json!({"type": "device_announce", "device_id": "D1"})).await;
    assert_eq!(recv_json(&mut device).await["type"], "confirmation");
    let status = recv_json(&mut client).await;
    assert_eq!(status["type"], "status");
    assert_eq!(status["status"], "connected");
    assert_eq!(status["device_id"], "D1");

    send_json(
        &mut device,
        json!({"type": "scan_event", "scan_id": "S1", "device_id": "D1"}),
    )
    .await;
    let scan = recv_json(&mut client).await;
    assert_eq!(scan["type"], "scan_event");
    assert_eq!(scan["scan_id"], "S1");
    let receipt = recv_json(&mut device).await;
    assert_eq!(receipt["type"], "receipt");
    assert_eq!(receipt["scan_id"], "S1");

    send_json(
        &mut device,
        json!({"type": "authorization_request", "amount": 3.5, "scan_id": "S1"}),
    )
    .await;
    for ws in [&mut client, &mut device] {
        let result = recv_json(ws).await;
        assert_eq!(result["type"], "authorization_result");
        assert_eq!(result["outcome"], "approved");
        assert_eq!(result["scan_id"], "S1");
    }
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let server = start_server(RelayConfig::default()).await;
    let mut ws = open(server.addr).await;

    ws.send(Message::Text("definitely not json".into())).await.unwrap();
    let error = recv_json(&mut ws).await;
    assert_eq!(error["type"], "error");

    send_json(&mut ws, json!({"type": "heartbeat_probe"})).await;
    assert_eq!(recv_json(&mut ws).await["type"], "heartbeat_ack");
    assert_eq!(server.state.registry.len().await, 1);
}

#[tokio::test]
async fn test_device_close_notifies_clients_and_deregisters() {
    let server = start_server(RelayConfig::default()).await;
    let mut client = open(server.addr).await;
    let mut device = open(server.addr).await;

    send_json(&mut client, json!({"type": "client_announce"})).await;
    recv_json(&mut client).await;
    send_json(&mut device, json!({"type": "device_announce", "device_id": "D4"})).await;
    recv_json(&mut device).await;
    recv_json(&mut client).await;

    device.close(None).await.unwrap();

    let status = recv_json(&mut client).await;
    assert_eq!(status["type"], "status");
    assert_eq!(status["status"], "disconnected");
    assert_eq!(status["device_id"], "D4");

    let state = server.state.clone();
    wait_until(|| {
        let state = state.clone();
        async move { state.registry.len().await == 1 }
    })
    .await;
}

#[tokio::test]
async fn test_heartbeat_pong_refreshes_liveness() {
    let config = RelayConfig {
        heartbeat_interval: Duration::from_millis(200),
        ..RelayConfig::default()
    };
    let server = start_server(config).await;
    liveness::spawn_heartbeat_sweep(server.state.clone());
    let mut ws = open(server.addr).await;

    let id = server.state.registry.snapshot().await[0].id;
    let old = chrono::Utc::now() - chrono::Duration::seconds(300);
    server
        .state
        .registry
        .update(&id, |r| r.last_liveness = old)
        .await;

    let frame = tokio::time::timeout(WAIT, ws.next())
        .await
        .expect("no ping")
        .unwrap()
        .unwrap();
    assert!(matches!(frame, Message::Ping(_)), "got {:?}", frame);
    // tungstenite queues the pong reply; flushing writes it
    ws.flush().await.unwrap();

    let state = server.state.clone();
    wait_until(|| {
        let state = state.clone();
        async move { state.registry.get(&id).await.unwrap().last_liveness > old }
    })
    .await;
}

#[tokio::test]
async fn test_eviction_drops_socket_and_announces() {
    let server = start_server(RelayConfig::default()).await;
    let mut client = open(server.addr).await;
    let mut device = open(server.addr).await;

    send_json(&mut client, json!({"type": "client_announce"})).await;
    recv_json(&mut client).await;
    send_json(&mut device, json!({"type": "device_announce", "device_id": "D5"})).await;
    recv_json(&mut device).await;
    recv_json(&mut client).await;

    let device_record = server
        .state
        .registry
        .snapshot()
        .await
        .into_iter()
        .find(|r| r.role == Role::ScanDevice)
        .unwrap();
    server
        .state
        .registry
        .update(&device_record.id, |r| {
            r.last_liveness = chrono::Utc::now() - chrono::Duration::seconds(500)
        })
        .await;

    let evicted = liveness::evict_stale(&server.state, chrono::Utc::now()).await;
    assert_eq!(evicted.len(), 1);

    let status = recv_json(&mut client).await;
    assert_eq!(status["status"], "disconnected");
    assert_eq!(status["device_id"], "D5");

    // No close handshake: the socket just goes away
    let end = tokio::time::timeout(WAIT, device.next())
        .await
        .expect("device socket should be dropped");
    assert!(
        matches!(end, None | Some(Err(_))),
        "expected abrupt end, got {:?}",
        end
    );
    assert_eq!(server.state.registry.len().await, 1);
}

async fn expect_shutdown_close(ws: &mut Ws) {
    let frame = tokio::time::timeout(WAIT, ws.next())
        .await
        .expect("no close frame")
        .expect("stream ended before close")
        .expect("transport error");
    match frame {
        Message::Close(Some(close)) => {
            assert_eq!(u16::from(close.code), 1001);
            assert_eq!(close.reason.to_string(), "server shutting down");
        }
        other => panic!("Expected close frame, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_closes_every_connection_and_drains() {
    let server = start_server(RelayConfig::default()).await;
    let mut first = open(server.addr).await;
    let mut second = open(server.addr).await;

    server.state.shutdown.trigger(ShutdownReason::Signal);

    for ws in [&mut first, &mut second] {
        expect_shutdown_close(ws).await;
    }

    let result = tokio::time::timeout(Duration::from_secs(15), server.handle)
        .await
        .expect("serve should return")
        .unwrap();
    assert_eq!(result.unwrap(), ShutdownReason::Signal);
    assert!(server.state.registry.is_empty().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_never_skips_close_when_listener_stops_first() {
    // The listener finishing and the shutdown signal race on every round
    for _ in 0..20 {
        let server = start_server(RelayConfig::default()).await;
        let mut ws = open(server.addr).await;

        server.state.shutdown.trigger(ShutdownReason::Signal);
        expect_shutdown_close(&mut ws).await;

        let result = tokio::time::timeout(Duration::from_secs(15), server.handle)
            .await
            .expect("serve should return")
            .unwrap();
        assert_eq!(result.unwrap(), ShutdownReason::Signal);
        assert!(server.state.registry.is_empty().await);
    }
}
