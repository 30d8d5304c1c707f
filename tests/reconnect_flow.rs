use std::sync::Arc;
use std::time::{Duration, Instant};

use realtime_ws::conn::{RealtimeClient, RealtimeClientArgs};
use realtime_ws::core::{
    ConnectionStatus, Envelope, ExponentialBackoff, ProtocolPingPong, RealtimeError, StaticToken,
    WsBufferConfig, frame_bytes,
};
use realtime_ws::testing::MockTransport;
use sonic_rs::JsonValueTrait;

type TestClient = RealtimeClient<MockTransport, ExponentialBackoff, ProtocolPingPong>;

fn spawn_client(transport: MockTransport, policy: ExponentialBackoff) -> TestClient {
    RealtimeClient::spawn(RealtimeClientArgs {
        url: "ws://mock".to_string(),
        transport,
        policy,
        ping: ProtocolPingPong::new(Duration::from_secs(60), Duration::from_secs(60)),
        enable_ping: false,
        buffers: WsBufferConfig::default(),
        credentials: Arc::new(StaticToken::default()),
    })
}

fn fast_policy() -> ExponentialBackoff {
    // Slow enough for status polls to observe the reconnecting window, fast
    // enough to keep the tests snappy.
    ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(400), 2.0)
}

async fn wait_for(
    client: &TestClient,
    timeout: Duration,
    pred: impl Fn(&ConnectionStatus) -> bool,
) -> ConnectionStatus {
    let deadline = Instant::now() + timeout;
    loop {
        let status = client.status().await;
        if pred(&status) {
            return status;
        }
        if Instant::now() >= deadline {
            panic!("timed out waiting for status (last={status:?})");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transport_close_enters_reconnect_cycle_and_recovers() {
    let (transport, mut acceptor) = MockTransport::pair();
    let client = spawn_client(transport.clone(), fast_policy());

    client.connect(None).await.unwrap();
    let mut session = acceptor.accept().await.unwrap();

    let status = client.status().await;
    assert!(status.is_connected);
    assert_eq!(status.reconnect_attempts, 0);

    session.drop_socket();

    let status = wait_for(&client, Duration::from_secs(1), |s| {
        s.is_reconnecting && s.reconnect_attempts == 1
    })
    .await;
    assert!(!status.is_connected);

    // The scheduled retry opens a fresh session and the counter resets.
    let _session = acceptor
        .accept_timeout(Duration::from_secs(1))
        .await
        .expect("retry opens a fresh session");
    let status = wait_for(&client, Duration::from_secs(1), |s| s.is_connected).await;
    assert_eq!(status.reconnect_attempts, 0);
    assert!(transport.connect_count() >= 2);

    let stats = client.stats().await;
    assert!(stats.reconnects >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn first_connect_failure_retries_silently_until_success() {
    let (transport, mut acceptor) = MockTransport::pair();
    transport.fail_next_connects(2);
    let client = spawn_client(transport.clone(), fast_policy());

    // The originating call stays pending across the silent retries and
    // resolves on the first successful open.
    client
        .connect(None)
        .await
        .expect("resolves once a retry succeeds");
    let _session = acceptor.accept().await.unwrap();

    assert_eq!(transport.connect_count(), 3);
    let status = client.status().await;
    assert!(status.is_connected);
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(client.stats().await.reconnects, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn policy_exhaustion_rejects_the_originating_caller() {
    let (transport, _acceptor) = MockTransport::pair();
    transport.fail_next_connects(10);
    let policy = ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(5), 2.0)
        .with_max_attempts(2);
    let client = spawn_client(transport.clone(), policy);

    let err = client
        .connect(None)
        .await
        .expect_err("capped policy must give up");
    assert!(matches!(
        err,
        RealtimeError::RetriesExhausted { attempts: 2 }
    ));

    // Initial attempt plus two retries, then Idle.
    assert_eq!(transport.connect_count(), 3);
    let status = client.status().await;
    assert!(!status.is_connected);
    assert!(!status.is_reconnecting);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_before_connect_is_a_droppable_false() {
    let (transport, _acceptor) = MockTransport::pair();
    let client = spawn_client(transport, fast_policy());

    assert!(!client.send("chat.message", &"hello").await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_while_connected_reaches_the_wire() {
    let (transport, mut acceptor) = MockTransport::pair();
    let client = spawn_client(transport, fast_policy());

    client.connect(None).await.unwrap();
    let mut session = acceptor.accept().await.unwrap();

    assert!(client.send("chat.message", &"hello there").await);

    let frame = session
        .recv_outbound_timeout(Duration::from_secs(1))
        .await
        .expect("frame hits the wire");
    let envelope = Envelope::from_bytes(frame_bytes(&frame).unwrap()).unwrap();
    assert_eq!(envelope.kind, "chat.message");
    assert_eq!(envelope.data.as_str(), Some("hello there"));

    assert_eq!(client.stats().await.messages_out, 1);
}
