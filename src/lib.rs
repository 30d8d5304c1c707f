//! Connection and subscription core for realtime application clients.
//!
//! One long-lived WebSocket session shared by the whole app: a lifecycle
//! state machine with always-retry reconnects, a topic-based dispatcher
//! fanning inbound `{type, data}` envelopes out to subscribers, and
//! environment-driven reconnect nudges (page visibility, network
//! reachability). UI layers hold a [`RealtimeClient`] and poll its status;
//! transport failures never surface as exceptions past the first `connect`.

pub mod conn;
pub mod core;
pub mod dispatch;
pub mod env;
pub mod testing;
pub mod tls;
pub mod transport;

pub use crate::conn::{RealtimeClient, RealtimeClientArgs};
pub use crate::core::{
    ConnectionStats, ConnectionStatus, CredentialSource, Envelope, ExponentialBackoff,
    ProtocolPingPong, RealtimeError, RealtimeResult, ReconnectPolicy, StaticToken, TokenStore,
    WsBufferConfig, WsFrame,
};
pub use crate::dispatch::{Subscription, TopicHandler, TopicRouter};
pub use crate::env::{EnvironmentSignal, EnvironmentTrigger};
pub use crate::transport::WsTransport;
pub use crate::transport::tungstenite::TungsteniteTransport;
