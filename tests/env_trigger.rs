use std::sync::Arc;
use std::time::{Duration, Instant};

use realtime_ws::conn::{RealtimeClient, RealtimeClientArgs};
use realtime_ws::core::{ConnectionStatus, ProtocolPingPong, StaticToken, WsBufferConfig};
use realtime_ws::env::{EnvironmentSignal, EnvironmentTrigger};
use realtime_ws::testing::{MockTransport, NoReconnect};
use tokio::sync::mpsc;

type TestClient = RealtimeClient<MockTransport, NoReconnect, ProtocolPingPong>;

fn spawn_client(transport: MockTransport) -> TestClient {
    // NoReconnect keeps the manager down after a drop so every recovery seen
    // here is attributable to the environment trigger.
    RealtimeClient::spawn(RealtimeClientArgs {
        url: "ws://mock".to_string(),
        transport,
        policy: NoReconnect,
        ping: ProtocolPingPong::new(Duration::from_secs(60), Duration::from_secs(60)),
        enable_ping: false,
        buffers: WsBufferConfig::default(),
        credentials: Arc::new(StaticToken::default()),
    })
}

async fn wait_for(
    client: &TestClient,
    timeout: Duration,
    pred: impl Fn(&ConnectionStatus) -> bool,
) {
    let deadline = Instant::now() + timeout;
    loop {
        let status = client.status().await;
        if pred(&status) {
            return;
        }
        if Instant::now() >= deadline {
            panic!("timed out waiting for status (last={status:?})");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offline_is_diagnostic_only_and_online_wakes_the_connection() {
    let (transport, mut acceptor) = MockTransport::pair();
    let client = spawn_client(transport.clone());

    let (signals, rx) = mpsc::unbounded_channel();
    let trigger = EnvironmentTrigger::spawn(client.clone(), rx);

    // Offline performs no state change.
    signals.send(EnvironmentSignal::Offline).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = client.status().await;
    assert!(!status.is_connected && !status.is_reconnecting);
    assert_eq!(client.stats().await.offline_signals, 1);
    assert_eq!(transport.connect_count(), 0);

    // Online while disconnected triggers exactly one connect.
    signals.send(EnvironmentSignal::Online).unwrap();
    let _session = acceptor
        .accept_timeout(Duration::from_secs(1))
        .await
        .expect("online signal opens a session");
    wait_for(&client, Duration::from_secs(1), |s| s.is_connected).await;
    assert_eq!(transport.connect_count(), 1);

    // Wake signals while already connected are no-ops.
    signals.send(EnvironmentSignal::Online).unwrap();
    signals.send(EnvironmentSignal::Visible).unwrap();
    signals.send(EnvironmentSignal::Hidden).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.connect_count(), 1);

    trigger.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn visibility_restores_a_dropped_connection() {
    let (transport, mut acceptor) = MockTransport::pair();
    let client = spawn_client(transport.clone());

    let (signals, rx) = mpsc::unbounded_channel();
    let trigger = EnvironmentTrigger::spawn(client.clone(), rx);

    client.connect(None).await.unwrap();
    let mut session = acceptor.accept().await.unwrap();
    wait_for(&client, Duration::from_secs(1), |s| s.is_connected).await;

    // Server drops us; the no-retry policy parks the manager in Idle.
    session.drop_socket();
    wait_for(&client, Duration::from_secs(1), |s| {
        !s.is_connected && !s.is_reconnecting
    })
    .await;

    // Coming back to the foreground nudges a reconnect.
    signals.send(EnvironmentSignal::Visible).unwrap();
    let _session = acceptor
        .accept_timeout(Duration::from_secs(1))
        .await
        .expect("visibility nudge reopens the session");
    wait_for(&client, Duration::from_secs(1), |s| s.is_connected).await;
    assert_eq!(transport.connect_count(), 2);

    trigger.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn burst_of_wake_signals_opens_a_single_session() {
    let (transport, mut acceptor) = MockTransport::pair();
    transport.set_connect_delay(Duration::from_millis(100));
    let client = spawn_client(transport.clone());

    let (signals, rx) = mpsc::unbounded_channel();
    let trigger = EnvironmentTrigger::spawn(client.clone(), rx);

    // Visibility and network-online race in, as they do when a laptop wakes.
    signals.send(EnvironmentSignal::Visible).unwrap();
    signals.send(EnvironmentSignal::Online).unwrap();
    signals.send(EnvironmentSignal::Visible).unwrap();

    let _session = acceptor
        .accept_timeout(Duration::from_secs(1))
        .await
        .expect("one session opens");
    wait_for(&client, Duration::from_secs(1), |s| s.is_connected).await;

    assert_eq!(
        transport.connect_count(),
        1,
        "overlapping wake signals must collapse onto one attempt"
    );

    trigger.shutdown();
}
