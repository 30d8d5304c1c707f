use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sonic_rs::Value;

use super::frame::WsFrame;
use super::types::{RealtimeError, RealtimeResult};

/// One logical message on the shared channel: a topic identifier plus an
/// opaque payload.
///
/// The wire representation is a JSON text frame, `{"type": …, "data": …}`,
/// with `type` drawn from the topic set shared between client and server.
/// Envelopes are immutable once decoded and never retained after dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Serialize into a text frame for the wire.
    pub fn to_frame(&self) -> RealtimeResult<WsFrame> {
        let json =
            sonic_rs::to_string(self).map_err(|e| RealtimeError::EncodeFailed(e.to_string()))?;
        Ok(WsFrame::Text(Bytes::from(json)))
    }

    /// Decode an inbound payload.
    pub fn from_bytes(bytes: &[u8]) -> RealtimeResult<Self> {
        sonic_rs::from_slice(bytes).map_err(|e| RealtimeError::DecodeFailed(e.to_string()))
    }
}
