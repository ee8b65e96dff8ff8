//! Integration tests for the observer WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use pbxwatch_ami::ManagerClient;
use pbxwatch_db::{create_pool, run_migrations, DbRuntimeSettings};
use pbxwatch_monitor::{Monitor, OperatorCommands};
use pbxwatch_server::{app, AppState};
use pbxwatch_types::{AgentState, AgentStatus, QueueStats, TenantId};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn setup_test_server() -> (SocketAddr, Arc<Monitor>) {
    let db_file = tempfile::NamedTempFile::new().unwrap();
    let db_path = db_file.path().to_str().unwrap().to_string();
    // Leak the tempfile so it persists for the duration of the test.
    std::mem::forget(db_file);

    let pool = create_pool(&db_path, DbRuntimeSettings::default()).unwrap();
    run_migrations(&pool.get().unwrap()).unwrap();

    let monitor = Arc::new(Monitor::new());
    let state = AppState {
        commands: OperatorCommands::new(monitor.clone(), ManagerClient::new(), pool),
        monitor: monitor.clone(),
        keepalive: Duration::from_secs(30),
    };

    let app = app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, monitor)
}

/// Reads frames until the next snapshot, skipping control frames.
async fn next_snapshot(ws: &mut Socket) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for snapshot")
            .expect("socket closed")
            .expect("read error");
        if let Message::Text(_) = msg {
            let json: Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
            assert_eq!(json["type"], "snapshot");
            return json;
        }
    }
}

#[tokio::test]
async fn snapshot_is_sent_on_connect() {
    let (addr, monitor) = setup_test_server().await;
    monitor.agents.update(
        TenantId(1),
        AgentState::new("101", AgentStatus::Idle).with_ip("10.0.0.5"),
    );

    let (mut ws, _) = connect_async(format!("ws://{}/ws/monitor?tenant=1", addr))
        .await
        .expect("failed to connect");

    let json = next_snapshot(&mut ws).await;
    assert_eq!(json["agents"]["101"]["status"], "idle");
    assert_eq!(json["agents"]["101"]["ipAddress"], "10.0.0.5");
    assert!(json["calls"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn store_changes_push_a_fresh_snapshot() {
    let (addr, monitor) = setup_test_server().await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws/monitor?tenant=1", addr))
        .await
        .expect("failed to connect");
    let initial = next_snapshot(&mut ws).await;
    assert!(initial["queues"].as_object().unwrap().is_empty());

    monitor.queues.update(TenantId(1), "support", |stats: &mut QueueStats| {
        stats.waiting = 2;
    });

    let updated = next_snapshot(&mut ws).await;
    assert_eq!(updated["queues"]["support"]["waiting"], 2);
}

#[tokio::test]
async fn header_tenant_is_honored_and_tenants_are_isolated() {
    let (addr, monitor) = setup_test_server().await;

    let mut request = format!("ws://{}/ws/monitor", addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("X-Tenant-Id", "2".parse().unwrap());
    let (mut ws, _) = connect_async(request).await.expect("failed to connect");
    let initial = next_snapshot(&mut ws).await;
    assert!(initial["agents"].as_object().unwrap().is_empty());

    // A change for tenant 1 must not reach a tenant 2 observer.
    monitor
        .agents
        .update(TenantId(1), AgentState::new("101", AgentStatus::Ringing));
    let quiet = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(quiet.is_err(), "tenant 2 observer received a frame for tenant 1");

    monitor
        .agents
        .update(TenantId(2), AgentState::new("201", AgentStatus::Idle));
    let json = next_snapshot(&mut ws).await;
    assert_eq!(json["agents"]["201"]["status"], "idle");
    assert!(json["agents"].get("101").is_none());
}

#[tokio::test]
async fn connect_without_tenant_is_rejected() {
    let (addr, _monitor) = setup_test_server().await;

    let err = connect_async(format!("ws://{}/ws/monitor", addr))
        .await
        .expect_err("upgrade without tenant must fail");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status().as_u16(), 401);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn closing_the_socket_unsubscribes() {
    let (addr, monitor) = setup_test_server().await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws/monitor?tenant=1", addr))
        .await
        .expect("failed to connect");
    next_snapshot(&mut ws).await;
    ws.close(None).await.unwrap();
    drop(ws);

    // The session releases its subscriptions once it sees the close.
    let mut released = false;
    for _ in 0..50 {
        monitor
            .agents
            .update(TenantId(1), AgentState::new("101", AgentStatus::Idle));
        if monitor.agents.subscriber_count(TenantId(1)) == 0 {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(released, "observer subscriptions were not released");
}
