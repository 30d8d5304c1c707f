use std::sync::Mutex;

use kameo::Reply;
use thiserror::Error;

/// Convenience result alias for connection-core operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Canonical error surface of the connection core.
///
/// Transient transport failures are absorbed by the reconnect loop and only
/// ever reach calling code through the originating `connect()` future; the
/// remaining variants cover encoding and actor plumbing.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error ({context}): {error}")]
    TransportError {
        context: &'static str,
        error: String,
    },

    #[error("Encode failed: {0}")]
    EncodeFailed(String),

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Connect cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Timeout: {context}")]
    Timeout { context: String },

    #[error("Actor error: {0}")]
    ActorError(String),
}

/// Internal lifecycle state of the connection manager.
///
/// `Idle` is both the initial state and the terminal state after an explicit
/// disconnect; `Connecting` covers the first attempt as well as retry
/// attempts re-entered from `Reconnecting`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnState {
    /// Read-only status snapshot handed to consumers.
    ///
    /// A retry attempt that has re-entered `Connecting` still reads as
    /// reconnecting: `attempts` is only reset once a session is established.
    pub fn status(self, attempts: u32) -> ConnectionStatus {
        ConnectionStatus {
            is_connected: self == ConnState::Connected,
            is_reconnecting: self == ConnState::Reconnecting
                || (self == ConnState::Connecting && attempts > 0),
            reconnect_attempts: attempts,
        }
    }
}

/// Poll-friendly connection status snapshot.
///
/// Owned and mutated exclusively by the connection manager; consumers only
/// ever see copies. `is_connected` and `is_reconnecting` are never both true.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Reply)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub is_reconnecting: bool,
    pub reconnect_attempts: u32,
}

/// Why a session went away. Feeds the reconnect log, never calling code.
#[derive(Debug, Clone)]
pub enum DisconnectCause {
    RemoteClosed,
    StalePing,
    ReadFailure { error: String },
    WriteFailure { error: String },
    HandshakeFailed { message: String },
}

/// Transport-independent sizing parameters for a websocket session.
#[derive(Clone, Copy, Debug)]
pub struct WsBufferConfig {
    pub max_message_bytes: usize,
    pub max_frame_bytes: usize,
    pub write_buffer_bytes: usize,
    pub max_write_buffer_bytes: usize,
}

impl Default for WsBufferConfig {
    fn default() -> Self {
        // Consumer-app envelopes are small; 1 MiB leaves generous headroom.
        Self {
            max_message_bytes: 1 << 20,
            max_frame_bytes: 1 << 20,
            write_buffer_bytes: 64 << 10,
            max_write_buffer_bytes: 128 << 10,
        }
    }
}

/// Source of the optional bearer token attached to connection attempts.
///
/// `connect(token)` takes precedence; the source is the fallback consulted
/// when no explicit token was supplied (e.g. a persisted credential).
pub trait CredentialSource: Send + Sync + 'static {
    fn token(&self) -> Option<String>;
}

/// Credential source backed by a fixed, possibly absent token.
#[derive(Clone, Debug, Default)]
pub struct StaticToken(pub Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }
}

impl CredentialSource for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// In-memory token store the application updates as credentials refresh.
#[derive(Debug, Default)]
pub struct TokenStore {
    token: Mutex<Option<String>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: Option<String>) {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = token;
    }
}

impl CredentialSource for TokenStore {
    fn token(&self) -> Option<String> {
        self.token.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
