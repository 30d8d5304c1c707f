use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use kameo::prelude::{Actor, ActorRef};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::warn;

use crate::core::{
    ConnectionStats, ConnectionStatus, CredentialSource, ExponentialBackoff, PingStrategy,
    ProtocolPingPong, RealtimeError, RealtimeResult, ReconnectPolicy, StaticToken, WsBufferConfig,
    WsFrame,
};
use crate::dispatch::{Subscription, TopicHandler, TopicRouter};
use crate::transport::WsTransport;
use crate::transport::tungstenite::TungsteniteTransport;

use super::actor::{
    ConnectRequest, ConnectionActor, ConnectionActorArgs, DisconnectRequest, GetStats, GetStatus,
    NetworkOffline, SendFrame,
};

/// Outbound wire shape; mirrors [`Envelope`](crate::core::Envelope) without
/// forcing the payload through an intermediate `Value`.
#[derive(Serialize)]
struct WireEnvelope<'a, D: Serialize> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a D,
}

/// Arguments for [`RealtimeClient::spawn`].
pub struct RealtimeClientArgs<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    pub url: String,
    pub transport: T,
    pub policy: R,
    pub ping: P,
    pub enable_ping: bool,
    pub buffers: WsBufferConfig,
    pub credentials: Arc<dyn CredentialSource>,
}

impl RealtimeClientArgs<TungsteniteTransport, ExponentialBackoff, ProtocolPingPong> {
    /// Production defaults: tungstenite over rustls, retry-forever backoff,
    /// protocol-level keepalive every 30s.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            transport: TungsteniteTransport::default(),
            policy: ExponentialBackoff::default(),
            ping: ProtocolPingPong::new(Duration::from_secs(30), Duration::from_secs(10)),
            enable_ping: true,
            buffers: WsBufferConfig::default(),
            credentials: Arc::new(StaticToken::default()),
        }
    }
}

/// Cheap cloneable handle to the connection core.
///
/// One instance (plus clones) serves the whole application session: UI layers
/// hold a reference and poll [`status`](RealtimeClient::status) on a fixed
/// interval for display rather than listening for push events.
pub struct RealtimeClient<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    actor: ActorRef<ConnectionActor<T, R, P>>,
    router: TopicRouter,
}

impl<T, R, P> Clone for RealtimeClient<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    fn clone(&self) -> Self {
        Self {
            actor: self.actor.clone(),
            router: self.router.clone(),
        }
    }
}

impl<T, R, P> RealtimeClient<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    /// Spawn the connection actor and return a handle to it.
    pub fn spawn(args: RealtimeClientArgs<T, R, P>) -> Self {
        let router = TopicRouter::new();
        let actor = ConnectionActor::spawn(ConnectionActorArgs {
            url: args.url,
            transport: args.transport,
            policy: args.policy,
            ping: args.ping,
            enable_ping: args.enable_ping,
            buffers: args.buffers,
            credentials: args.credentials,
            router: router.clone(),
        });
        Self { actor, router }
    }

    /// Connect (or attach to the attempt already in flight), optionally
    /// supplying a fresh bearer token.
    ///
    /// Resolves once the first successful open completes; rejects only when
    /// the reconnect policy gives up or the attempt is superseded. Automatic
    /// retries after a successful open never surface here — observe those via
    /// [`status`](RealtimeClient::status).
    pub async fn connect(&self, token: Option<&str>) -> RealtimeResult<()> {
        let (tx, rx) = oneshot::channel();
        self.actor
            .tell(ConnectRequest {
                token: token.map(str::to_owned),
                notify: Some(tx),
            })
            .send()
            .await
            .map_err(|_| RealtimeError::ActorError("connection actor unavailable".to_string()))?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(RealtimeError::ActorError(
                "connection actor dropped".to_string(),
            )),
        }
    }

    /// Fire-and-forget connect nudge: same idempotent path as
    /// [`connect`](RealtimeClient::connect), but without waiting for the
    /// outcome. Used by environment triggers.
    pub async fn nudge_connect(&self) {
        let _ = self
            .actor
            .tell(ConnectRequest {
                token: None,
                notify: None,
            })
            .send()
            .await;
    }

    /// Tear the connection down and cancel any pending retry. Never errors;
    /// safe to call from any state.
    pub async fn disconnect(&self) {
        let _ = self.actor.ask(DisconnectRequest).await;
    }

    /// Send one `{type, data}` message.
    ///
    /// Returns `true` once the frame was handed to an open transport, `false`
    /// otherwise — sending while disconnected is a droppable condition, not
    /// an error.
    pub async fn send(&self, kind: &str, data: impl Serialize) -> bool {
        let envelope = WireEnvelope { kind, data: &data };
        let json = match sonic_rs::to_string(&envelope) {
            Ok(json) => json,
            Err(err) => {
                warn!(topic = kind, error = %err, "failed to encode outbound message");
                return false;
            }
        };

        let frame = WsFrame::Text(Bytes::from(json));
        self.actor.ask(SendFrame { frame }).await.unwrap_or(false)
    }

    /// Read-only status snapshot; a dead actor reads as disconnected.
    pub async fn status(&self) -> ConnectionStatus {
        self.actor.ask(GetStatus).await.unwrap_or_default()
    }

    /// Diagnostics counters.
    pub async fn stats(&self) -> ConnectionStats {
        self.actor.ask(GetStats).await.unwrap_or_default()
    }

    /// Record an environment-reported offline transition. Diagnostic only.
    pub async fn report_offline(&self) {
        let _ = self.actor.tell(NetworkOffline).send().await;
    }

    /// Register `handler` for every message whose type equals `topic`.
    pub fn subscribe(&self, topic: impl Into<String>, handler: TopicHandler) -> Subscription {
        self.router.subscribe(topic, handler)
    }

    /// Closure-friendly [`subscribe`](RealtimeClient::subscribe).
    pub fn subscribe_fn<F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&crate::core::Envelope) + Send + Sync + 'static,
    {
        self.router.subscribe_fn(topic, handler)
    }

    /// Remove one `(topic, handler)` pair, or all handlers for `topic`.
    pub fn unsubscribe(&self, topic: &str, handler: Option<&TopicHandler>) {
        self.router.unsubscribe(topic, handler);
    }

    /// The underlying dispatcher, for callers composing their own fan-out.
    pub fn router(&self) -> &TopicRouter {
        &self.router
    }
}
