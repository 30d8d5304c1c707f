//! Reusable test utilities for driving the connection actor without a real
//! socket.
//!
//! [`MockTransport::pair`] yields the transport for the actor plus a
//! [`MockAcceptor`] the test holds: every connect attempt surfaces as a
//! [`MockSession`] the test can read outbound frames from, push inbound
//! frames into, or drop to simulate a server-side close. Unlike a single
//! channel pair, each attempt gets its own session, so reconnect flows can be
//! observed end to end.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Sink;
use tokio::sync::mpsc;

use crate::core::{Envelope, RealtimeError, ReconnectPolicy, WsBufferConfig, WsFrame};
use crate::transport::{WsTransport, WsTransportConnectFuture};

struct MockTransportInner {
    sessions_tx: mpsc::UnboundedSender<MockSession>,
    connects: AtomicUsize,
    fail_remaining: AtomicU32,
    connect_delay_ms: AtomicU64,
}

/// In-memory transport whose connect attempts are observable from tests.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockTransportInner>,
}

impl MockTransport {
    /// Build a transport + acceptor pair.
    pub fn pair() -> (Self, MockAcceptor) {
        let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Arc::new(MockTransportInner {
                    sessions_tx,
                    connects: AtomicUsize::new(0),
                    fail_remaining: AtomicU32::new(0),
                    connect_delay_ms: AtomicU64::new(0),
                }),
            },
            MockAcceptor { rx: sessions_rx },
        )
    }

    /// Delay every connect attempt, leaving a window for overlapping calls.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.inner
            .connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make the next `n` connect attempts fail with a handshake error.
    pub fn fail_next_connects(&self, n: u32) {
        self.inner.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Total connect attempts observed so far.
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }
}

impl WsTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(
        &self,
        _url: String,
        token: Option<String>,
        _buffers: WsBufferConfig,
    ) -> WsTransportConnectFuture<Self::Reader, Self::Writer> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            inner.connects.fetch_add(1, Ordering::SeqCst);

            let delay_ms = inner.connect_delay_ms.load(Ordering::SeqCst);
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            let failed = inner
                .fail_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(RealtimeError::ConnectionFailed(
                    "mock transport refused the connection".to_string(),
                ));
            }

            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<WsFrame>();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<WsFrame>();

            inner
                .sessions_tx
                .send(MockSession {
                    outbound_rx,
                    inbound_tx: Some(inbound_tx),
                    token,
                })
                .map_err(|_| {
                    RealtimeError::ConnectionFailed("mock acceptor dropped".to_string())
                })?;

            Ok((
                MockReader { rx: inbound_rx },
                MockWriter { tx: outbound_tx },
            ))
        })
    }
}

/// Test-side stream of sessions, one per successful connect attempt.
pub struct MockAcceptor {
    rx: mpsc::UnboundedReceiver<MockSession>,
}

impl MockAcceptor {
    pub async fn accept(&mut self) -> Option<MockSession> {
        self.rx.recv().await
    }

    pub async fn accept_timeout(&mut self, timeout: Duration) -> Option<MockSession> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .unwrap_or_default()
    }
}

/// Error surface for operations on [`MockSession`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MockSessionError {
    /// The server side of this session was intentionally dropped.
    SocketDropped,
    /// The actor side is no longer receiving inbound frames.
    ChannelClosed,
    /// The payload handed to `send_envelope` was not valid JSON.
    BadPayload,
}

impl std::fmt::Display for MockSessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockSessionError::SocketDropped => f.write_str("mock socket already dropped"),
            MockSessionError::ChannelClosed => f.write_str("mock actor channel is closed"),
            MockSessionError::BadPayload => f.write_str("mock payload is not valid JSON"),
        }
    }
}

impl std::error::Error for MockSessionError {}

/// Server-side handle for one connection attempt.
pub struct MockSession {
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
    inbound_tx: Option<mpsc::UnboundedSender<WsFrame>>,
    token: Option<String>,
}

impl MockSession {
    /// Bearer token the client attached to this attempt, if any.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Receive a frame written by the actor to the transport.
    pub async fn recv_outbound(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Push an inbound frame to the actor.
    pub fn send_inbound(&self, frame: WsFrame) -> Result<(), MockSessionError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockSessionError::SocketDropped);
        };
        tx.send(frame).map_err(|_| MockSessionError::ChannelClosed)
    }

    /// Push a `{type, data}` envelope with a raw JSON payload.
    pub fn send_envelope(&self, kind: &str, data_json: &str) -> Result<(), MockSessionError> {
        let data = sonic_rs::from_str(data_json).map_err(|_| MockSessionError::BadPayload)?;
        let frame = Envelope::new(kind, data)
            .to_frame()
            .map_err(|_| MockSessionError::BadPayload)?;
        self.send_inbound(frame)
    }

    /// Simulate a server-side socket drop: the actor's reader sees the
    /// stream end.
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }
}

/// Reader side of [`MockTransport`].
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl futures_util::Stream for MockReader {
    type Item = Result<WsFrame, RealtimeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.rx).poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Writer side of [`MockTransport`].
pub struct MockWriter {
    tx: mpsc::UnboundedSender<WsFrame>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = RealtimeError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        self.get_mut()
            .tx
            .send(item)
            .map_err(|_| RealtimeError::TransportError {
                context: "mock_write",
                error: "mock outbound channel closed".to_string(),
            })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Reconnect policy that never retries.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoReconnect;

impl ReconnectPolicy for NoReconnect {
    fn delay_for(&self, _attempt: u32) -> Duration {
        Duration::from_secs(24 * 60 * 60)
    }

    fn should_retry(&self, _attempt: u32) -> bool {
        false
    }
}
