use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::core::{RealtimeError, WsBufferConfig, WsFrame};

pub mod tungstenite;

/// Boxed future returned by [`WsTransport::connect`].
pub type WsTransportConnectFuture<R, W> =
    Pin<Box<dyn Future<Output = Result<(R, W), RealtimeError>> + Send>>;

/// Transport boundary for the connection manager.
///
/// One session is one `(Reader, Writer)` pair: the reader half yields inbound
/// frames until the peer goes away, the writer half accepts outbound frames.
/// Dropping both halves releases the underlying network resource. The trait
/// is intentionally minimal so implementations can be swapped (tokio-tungstenite
/// in production, channel pairs in tests) without touching lifecycle logic.
pub trait WsTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = Result<WsFrame, RealtimeError>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = RealtimeError> + Send + Unpin + 'static;

    /// Open a session against `url`, attaching `token` as bearer credentials
    /// when present.
    ///
    /// Failures surface only through the returned future, never synchronously.
    fn connect(
        &self,
        url: String,
        token: Option<String>,
        buffers: WsBufferConfig,
    ) -> WsTransportConnectFuture<Self::Reader, Self::Writer>;
}
