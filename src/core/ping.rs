use std::time::{Duration, Instant};

use bytes::Bytes;

use super::frame::WsFrame;

/// Result emitted by a ping strategy when processing inbound frames.
#[derive(Debug, Clone)]
pub enum PongResult {
    /// Not a keepalive frame; hand it to the dispatcher.
    NotPong,
    /// Our ping was answered, with the round-trip time when measurable.
    PongReceived(Option<Duration>),
    /// The server pinged us; the returned frame is the reply to write.
    Reply(WsFrame),
}

/// Keepalive contract driven by the connection manager's ping loop.
pub trait PingStrategy: Send + Sync + 'static {
    fn create_ping(&mut self) -> Option<WsFrame>;
    fn handle_inbound(&mut self, frame: &WsFrame) -> PongResult;
    fn is_stale(&self) -> bool;
    fn reset(&mut self);
    fn interval(&self) -> Duration;
    fn timeout(&self) -> Duration;
}

/// Standard websocket ping/pong operating on protocol control frames.
pub struct ProtocolPingPong {
    interval: Duration,
    timeout: Duration,
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
}

impl ProtocolPingPong {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            last_ping: None,
            last_pong: None,
        }
    }
}

impl Default for ProtocolPingPong {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(10))
    }
}

impl PingStrategy for ProtocolPingPong {
    fn create_ping(&mut self) -> Option<WsFrame> {
        self.last_ping = Some(Instant::now());
        Some(WsFrame::Ping(Bytes::new()))
    }

    fn handle_inbound(&mut self, frame: &WsFrame) -> PongResult {
        match frame {
            WsFrame::Pong(_) => {
                let now = Instant::now();
                let rtt = self
                    .last_ping
                    .map(|sent| now.saturating_duration_since(sent));
                self.last_pong = Some(now);
                PongResult::PongReceived(rtt)
            }
            WsFrame::Ping(payload) => PongResult::Reply(WsFrame::Pong(payload.clone())),
            _ => PongResult::NotPong,
        }
    }

    fn is_stale(&self) -> bool {
        let Some(last_ping) = self.last_ping else {
            return false;
        };
        if last_ping.elapsed() <= self.timeout {
            return false;
        }
        // Stale if no pong arrived after the most recent ping.
        match self.last_pong {
            Some(last_pong) => last_pong < last_ping,
            None => true,
        }
    }

    fn reset(&mut self) {
        self.last_ping = None;
        self.last_pong = None;
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
