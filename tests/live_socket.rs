use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use realtime_ws::conn::{RealtimeClient, RealtimeClientArgs};
use realtime_ws::core::{
    ConnectionStatus, ExponentialBackoff, ProtocolPingPong, StaticToken, WsBufferConfig,
};
use realtime_ws::transport::tungstenite::TungsteniteTransport;
use sonic_rs::JsonValueTrait;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

type LiveClient = RealtimeClient<TungsteniteTransport, ExponentialBackoff, ProtocolPingPong>;

#[derive(Debug)]
enum ServerEvent {
    Connected {
        conn_id: usize,
        auth: Option<String>,
    },
    Data {
        conn_id: usize,
        text: String,
    },
    Disconnected {
        conn_id: usize,
    },
}

#[derive(Clone, Copy, Debug)]
enum ServerMode {
    KeepOpen,
    CloseFirstConnection(Duration),
}

async fn spawn_ws_server(mode: ServerMode) -> (SocketAddr, mpsc::UnboundedReceiver<ServerEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut conn_id = 0usize;
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            conn_id += 1;
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut auth = None;
                let mut ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
                    auth = req
                        .headers()
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    Ok(resp)
                })
                .await
                .unwrap();
                let _ = tx.send(ServerEvent::Connected { conn_id, auth });

                // Greet every connection with one envelope.
                let _ = ws
                    .send(Message::Text(
                        r#"{"type":"draw.result","data":{"round":7}}"#.into(),
                    ))
                    .await;

                let close_after = match mode {
                    ServerMode::CloseFirstConnection(delay) if conn_id == 1 => Some(delay),
                    _ => None,
                };

                if let Some(delay) = close_after {
                    tokio::time::sleep(delay).await;
                    let _ = ws.send(Message::Close(None)).await;
                } else {
                    while let Some(message) = ws.next().await {
                        match message {
                            Ok(Message::Text(text)) => {
                                let _ = tx.send(ServerEvent::Data {
                                    conn_id,
                                    text: text.as_str().to_string(),
                                });
                            }
                            Ok(Message::Close(_)) | Err(_) => break,
                            _ => {}
                        }
                    }
                }
                let _ = tx.send(ServerEvent::Disconnected { conn_id });
            });
        }
    });

    (addr, rx)
}

fn spawn_client(addr: SocketAddr) -> LiveClient {
    RealtimeClient::spawn(RealtimeClientArgs {
        url: format!("ws://{addr}"),
        transport: TungsteniteTransport::default(),
        policy: ExponentialBackoff::new(
            Duration::from_millis(10),
            Duration::from_millis(80),
            2.0,
        ),
        ping: ProtocolPingPong::new(Duration::from_secs(60), Duration::from_secs(60)),
        enable_ping: false,
        buffers: WsBufferConfig::default(),
        credentials: Arc::new(StaticToken::default()),
    })
}

async fn next_event(
    rx: &mut mpsc::UnboundedReceiver<ServerEvent>,
    timeout: Duration,
) -> ServerEvent {
    tokio::time::timeout(timeout, rx.recv())
        .await
        .expect("server event before timeout")
        .expect("server alive")
}

async fn wait_for(
    client: &LiveClient,
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
async fn roundtrip_over_a_real_socket_with_bearer_token() {
    let (addr, mut events) = spawn_ws_server(ServerMode::KeepOpen).await;
    let client = spawn_client(addr);

    let rounds = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&rounds);
    client.subscribe_fn("draw.result", move |envelope| {
        assert_eq!(envelope.data.get("round").as_i64(), Some(7));
        counter.fetch_add(1, Ordering::SeqCst);
    });

    client.connect(Some("secret")).await.unwrap();

    match next_event(&mut events, Duration::from_secs(2)).await {
        ServerEvent::Connected { auth, .. } => {
            assert_eq!(auth.as_deref(), Some("Bearer secret"));
        }
        other => panic!("expected connected event, got {other:?}"),
    }

    // The greeting envelope reaches the subscriber.
    let deadline = Instant::now() + Duration::from_secs(2);
    while rounds.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "greeting never dispatched");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // And an outbound send shows up server-side as a typed envelope.
    assert!(client.send("chat.message", &"hi").await);
    match next_event(&mut events, Duration::from_secs(2)).await {
        ServerEvent::Data { text, .. } => {
            assert!(text.contains(r#""type":"chat.message""#), "got {text}");
        }
        other => panic!("expected data event, got {other:?}"),
    }

    client.disconnect().await;
    match next_event(&mut events, Duration::from_secs(2)).await {
        ServerEvent::Disconnected { conn_id } => assert_eq!(conn_id, 1),
        other => panic!("expected disconnect event, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_close_is_recovered_by_the_reconnect_cycle() {
    let (addr, mut events) = spawn_ws_server(ServerMode::CloseFirstConnection(
        Duration::from_millis(50),
    ))
    .await;
    let client = spawn_client(addr);

    client.connect(None).await.unwrap();
    match next_event(&mut events, Duration::from_secs(2)).await {
        ServerEvent::Connected { conn_id, auth } => {
            assert_eq!(conn_id, 1);
            assert_eq!(auth, None);
        }
        other => panic!("expected first connection, got {other:?}"),
    }

    // The server hangs up; the client must come back on its own.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match next_event(&mut events, Duration::from_secs(5)).await {
            ServerEvent::Connected { conn_id: 2, .. } => break,
            _ => assert!(Instant::now() < deadline, "no reconnect observed"),
        }
    }

    wait_for(&client, Duration::from_secs(2), |s| {
        s.is_connected && s.reconnect_attempts == 0
    })
    .await;
    assert!(client.stats().await.reconnects >= 1);
}
