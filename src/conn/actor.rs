//! Connection lifecycle actor.
//!
//! The websocket IO loop runs outside the actor; the actor owns the state
//! machine, the retry bookkeeping, and the attempt epoch, and receives
//! frames and attempt outcomes as messages. Every transition runs to
//! completion before the next message is processed, so no two transitions
//! interleave.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use kameo::error::ActorStopReason;
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, PanicError, WeakActorRef};

use crate::core::{
    ConnState, ConnectionStats, ConnectionStatus, CredentialSource, DisconnectCause, Envelope,
    HealthMonitor, PingStrategy, PongResult, RealtimeError, RealtimeResult, ReconnectPolicy,
    RetryState, WsBufferConfig, WsFrame, frame_bytes, jitter_delay,
};
use crate::dispatch::TopicRouter;
use crate::transport::WsTransport;

/// Arguments for spawning a [`ConnectionActor`].
pub struct ConnectionActorArgs<T, R, P>
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
    pub router: TopicRouter,
}

struct ConnectWaiter {
    originating: bool,
    tx: oneshot::Sender<RealtimeResult<()>>,
}

/// The connection manager: one lifecycle state machine owning at most one
/// live transport session.
///
/// Attempt completions are tagged with the epoch they were spawned under;
/// a completion whose epoch was superseded by `disconnect()` or a fresh
/// `connect()` is dropped instead of resurrecting a closed session.
pub struct ConnectionActor<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    url: String,
    transport: T,
    policy: R,
    ping: P,
    enable_ping: bool,
    buffers: WsBufferConfig,
    credentials: Arc<dyn CredentialSource>,
    router: TopicRouter,
    health: HealthMonitor,

    state: ConnState,
    retry: RetryState,
    epoch: u64,
    last_token: Option<String>,
    connect_waiters: Vec<ConnectWaiter>,

    actor_ref: ActorRef<Self>,
    writer: Option<T::Writer>,
    reader_task: Option<JoinHandle<()>>,
    ping_task: Option<JoinHandle<()>>,
    retry_task: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<T, R, P> Actor for ConnectionActor<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    type Args = ConnectionActorArgs<T, R, P>;
    type Error = RealtimeError;

    fn name() -> &'static str {
        "ConnectionActor"
    }

    async fn on_start(args: Self::Args, ctx: ActorRef<Self>) -> RealtimeResult<Self> {
        let ConnectionActorArgs {
            url,
            transport,
            policy,
            ping,
            enable_ping,
            buffers,
            credentials,
            router,
        } = args;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            url,
            transport,
            policy,
            ping,
            enable_ping,
            buffers,
            credentials,
            router,
            health: HealthMonitor::new(),
            state: ConnState::Idle,
            retry: RetryState::default(),
            epoch: 0,
            last_token: None,
            connect_waiters: Vec::new(),
            actor_ref: ctx,
            writer: None,
            reader_task: None,
            ping_task: None,
            retry_task: None,
            shutdown_tx,
            shutdown_rx,
        })
    }

    async fn on_stop(
        &mut self,
        _ctx: WeakActorRef<Self>,
        _reason: ActorStopReason,
    ) -> RealtimeResult<()> {
        self.cancel_retry();
        self.stop_io_tasks();
        self.writer = None;
        self.fail_waiters(RealtimeError::Cancelled("connection actor stopped".to_string()));
        Ok(())
    }

    fn on_panic(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        err: PanicError,
    ) -> impl std::future::Future<Output = Result<std::ops::ControlFlow<ActorStopReason>, Self::Error>>
    + Send {
        async move {
            tracing::error!(error = ?err, "ConnectionActor panicked");
            Ok(std::ops::ControlFlow::Break(ActorStopReason::Panicked(err)))
        }
    }
}

// ---------------------------------------------------------------------------
// Public messages

/// Ask the manager to (re)connect, optionally supplying a fresh bearer token.
///
/// Idempotent: while an attempt is in flight the request attaches to it, and
/// while connected it resolves immediately. `notify` fires once the first
/// successful open completes or the policy gives up.
pub struct ConnectRequest {
    pub token: Option<String>,
    pub notify: Option<oneshot::Sender<RealtimeResult<()>>>,
}

/// Tear the connection down and stay down. Valid from any state.
pub struct DisconnectRequest;

/// Hand a frame to the open transport. Replies `false` when no session is
/// open; that is a droppable condition, not an error.
pub struct SendFrame {
    pub frame: WsFrame,
}

/// Read-only status snapshot.
pub struct GetStatus;

/// Diagnostics counters.
pub struct GetStats;

/// Environment reported the network offline. Diagnostic only.
pub struct NetworkOffline;

// ---------------------------------------------------------------------------
// Internal messages

pub(crate) struct SessionEstablished<T: WsTransport> {
    pub(crate) epoch: u64,
    pub(crate) reader: T::Reader,
    pub(crate) writer: T::Writer,
}

pub(crate) struct SessionFailed {
    pub(crate) epoch: u64,
    pub(crate) error: String,
}

pub(crate) struct SessionClosed {
    pub(crate) epoch: u64,
    pub(crate) cause: DisconnectCause,
}

pub(crate) struct InboundFrame {
    pub(crate) epoch: u64,
    pub(crate) frame: WsFrame,
}

pub(crate) struct AttemptRetry {
    pub(crate) epoch: u64,
}

pub(crate) struct PingTick {
    pub(crate) epoch: u64,
}

impl<T, R, P> KameoMessage<ConnectRequest> for ConnectionActor<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    type Reply = ();

    async fn handle(
        &mut self,
        msg: ConnectRequest,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.token.is_some() {
            self.last_token = msg.token;
        }

        match self.state {
            ConnState::Connected => {
                if let Some(tx) = msg.notify {
                    let _ = tx.send(Ok(()));
                }
            }
            ConnState::Connecting => {
                // Attach to the in-flight attempt; never a second session.
                if let Some(tx) = msg.notify {
                    self.push_waiter(tx, false);
                }
            }
            ConnState::Reconnecting => {
                // Supersede the scheduled retry and attempt right away.
                if let Some(tx) = msg.notify {
                    self.push_waiter(tx, false);
                }
                self.cancel_retry();
                debug!(url = %self.url, "connect request supersedes scheduled retry");
                self.state = ConnState::Connecting;
                self.spawn_attempt();
            }
            ConnState::Idle => {
                self.epoch = self.epoch.wrapping_add(1);
                self.retry.reset();
                if let Some(tx) = msg.notify {
                    self.push_waiter(tx, true);
                }
                self.state = ConnState::Connecting;
                self.spawn_attempt();
            }
        }
    }
}

impl<T, R, P> KameoMessage<DisconnectRequest> for ConnectionActor<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    type Reply = ();

    async fn handle(
        &mut self,
        _msg: DisconnectRequest,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        // Invalidate anything still in flight before touching the session.
        self.epoch = self.epoch.wrapping_add(1);
        self.cancel_retry();
        self.stop_io_tasks();

        if let Some(mut writer) = self.writer.take() {
            // Polite close; the peer may already be gone.
            let _ = writer.send(WsFrame::Close(None)).await;
            let _ = writer.close().await;
        }

        self.ping.reset();
        self.retry.reset();
        self.state = ConnState::Idle;
        self.fail_waiters(RealtimeError::Cancelled("superseded by disconnect".to_string()));
        info!(url = %self.url, "disconnected");
    }
}

impl<T, R, P> KameoMessage<SendFrame> for ConnectionActor<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    type Reply = bool;

    async fn handle(
        &mut self,
        msg: SendFrame,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.state != ConnState::Connected {
            return false;
        }
        let Some(writer) = self.writer.as_mut() else {
            return false;
        };

        match writer.send(msg.frame).await {
            Ok(()) => {
                self.health.record_sent();
                true
            }
            Err(err) => {
                // The session raced a close; report non-delivery and recover.
                let cause = DisconnectCause::WriteFailure {
                    error: err.to_string(),
                };
                self.connection_lost(cause);
                false
            }
        }
    }
}

impl<T, R, P> KameoMessage<GetStatus> for ConnectionActor<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    type Reply = ConnectionStatus;

    async fn handle(
        &mut self,
        _msg: GetStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.state.status(self.retry.attempts)
    }
}

impl<T, R, P> KameoMessage<GetStats> for ConnectionActor<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    type Reply = ConnectionStats;

    async fn handle(
        &mut self,
        _msg: GetStats,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.health.stats()
    }
}

impl<T, R, P> KameoMessage<NetworkOffline> for ConnectionActor<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    type Reply = ();

    async fn handle(
        &mut self,
        _msg: NetworkOffline,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        debug!(url = %self.url, "network offline reported; no action");
        self.health.record_offline_signal();
    }
}

impl<T, R, P> KameoMessage<SessionEstablished<T>> for ConnectionActor<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    type Reply = ();

    async fn handle(
        &mut self,
        msg: SessionEstablished<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.epoch != self.epoch || self.state != ConnState::Connecting {
            // Stale attempt superseded by disconnect() or a fresh connect();
            // dropping the halves releases the socket.
            debug!(
                url = %self.url,
                stale_epoch = msg.epoch,
                current_epoch = self.epoch,
                "dropping stale connection attempt"
            );
            return;
        }
        self.on_session_established(msg.reader, msg.writer);
    }
}

impl<T, R, P> KameoMessage<SessionFailed> for ConnectionActor<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    type Reply = ();

    async fn handle(
        &mut self,
        msg: SessionFailed,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.epoch != self.epoch || self.state != ConnState::Connecting {
            debug!(url = %self.url, error = %msg.error, "ignoring stale attempt failure");
            return;
        }
        self.health.record_error();
        let cause = DisconnectCause::HandshakeFailed { message: msg.error };
        self.schedule_reconnect(&cause);
    }
}

impl<T, R, P> KameoMessage<SessionClosed> for ConnectionActor<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    type Reply = ();

    async fn handle(
        &mut self,
        msg: SessionClosed,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.epoch != self.epoch || self.state != ConnState::Connected {
            return;
        }
        self.connection_lost(msg.cause);
    }
}

impl<T, R, P> KameoMessage<InboundFrame> for ConnectionActor<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    type Reply = ();

    async fn handle(
        &mut self,
        msg: InboundFrame,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.epoch != self.epoch || self.state != ConnState::Connected {
            return;
        }
        self.health.record_message();

        match self.ping.handle_inbound(&msg.frame) {
            PongResult::PongReceived(_) => {}
            PongResult::Reply(reply) => {
                if let Err(err) = self.write_frame(reply).await {
                    let cause = DisconnectCause::WriteFailure {
                        error: err.to_string(),
                    };
                    self.connection_lost(cause);
                }
            }
            PongResult::NotPong => {
                let Some(bytes) = frame_bytes(&msg.frame) else {
                    return;
                };
                match Envelope::from_bytes(bytes) {
                    Ok(envelope) => {
                        self.router.dispatch(&envelope);
                    }
                    Err(err) => {
                        self.health.record_error();
                        warn!(url = %self.url, error = %err, "dropping undecodable inbound frame");
                    }
                }
            }
        }
    }
}

impl<T, R, P> KameoMessage<AttemptRetry> for ConnectionActor<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    type Reply = ();

    async fn handle(
        &mut self,
        msg: AttemptRetry,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.epoch != self.epoch || self.state != ConnState::Reconnecting {
            return;
        }
        self.retry_task = None;
        self.state = ConnState::Connecting;
        self.spawn_attempt();
    }
}

impl<T, R, P> KameoMessage<PingTick> for ConnectionActor<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    type Reply = ();

    async fn handle(
        &mut self,
        msg: PingTick,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.epoch != self.epoch || self.state != ConnState::Connected {
            return;
        }

        if self.ping.is_stale() {
            self.connection_lost(DisconnectCause::StalePing);
            return;
        }

        if let Some(frame) = self.ping.create_ping()
            && let Err(err) = self.write_frame(frame).await
        {
            let cause = DisconnectCause::WriteFailure {
                error: err.to_string(),
            };
            self.connection_lost(cause);
        }
    }
}

// ---------------------------------------------------------------------------
// State machine internals

impl<T, R, P> ConnectionActor<T, R, P>
where
    T: WsTransport,
    R: ReconnectPolicy,
    P: PingStrategy,
{
    /// Write to the open session if there is one; a missing writer is not an
    /// error here (the caller already checked state).
    async fn write_frame(&mut self, frame: WsFrame) -> RealtimeResult<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.send(frame).await,
            None => Ok(()),
        }
    }

    fn push_waiter(&mut self, tx: oneshot::Sender<RealtimeResult<()>>, originating: bool) {
        self.connect_waiters.push(ConnectWaiter { originating, tx });
    }

    fn resolve_waiters(&mut self) {
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.tx.send(Ok(()));
        }
    }

    /// The originating caller gets the error; attached callers resolve
    /// without one and observe the outcome via status polling.
    fn fail_waiters(&mut self, error: RealtimeError) {
        let mut error = Some(error);
        for waiter in self.connect_waiters.drain(..) {
            let result = match (waiter.originating, error.take()) {
                (true, Some(error)) => Err(error),
                _ => Ok(()),
            };
            let _ = waiter.tx.send(result);
        }
    }

    fn cancel_retry(&mut self) {
        if let Some(task) = self.retry_task.take() {
            task.abort();
        }
    }

    fn stop_io_tasks(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.ping_task.take() {
            task.abort();
        }
    }

    fn reset_shutdown_channel(&mut self) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = shutdown_tx;
        self.shutdown_rx = shutdown_rx;
    }

    /// Open a transport session for the current epoch. The completion is
    /// delivered back as a message so the state check happens in the actor.
    fn spawn_attempt(&mut self) {
        let token = self.last_token.clone().or_else(|| self.credentials.token());
        let url = self.url.clone();
        let buffers = self.buffers;
        let transport = self.transport.clone();
        let actor_ref = self.actor_ref.clone();
        let epoch = self.epoch;

        tokio::spawn(async move {
            match transport.connect(url, token, buffers).await {
                Ok((reader, writer)) => {
                    let _ = actor_ref
                        .tell(SessionEstablished::<T> {
                            epoch,
                            reader,
                            writer,
                        })
                        .send()
                        .await;
                }
                Err(err) => {
                    let _ = actor_ref
                        .tell(SessionFailed {
                            epoch,
                            error: err.to_string(),
                        })
                        .send()
                        .await;
                }
            }
        });
    }

    fn on_session_established(&mut self, reader: T::Reader, writer: T::Writer) {
        info!(url = %self.url, "connection established");
        self.health.reset();
        self.retry.reset();
        self.ping.reset();
        self.state = ConnState::Connected;
        self.writer = Some(writer);
        self.reset_shutdown_channel();

        self.start_reader_loop(reader);
        if self.enable_ping {
            self.start_ping_loop();
        }

        self.resolve_waiters();
    }

    fn start_reader_loop(&mut self, mut reader: T::Reader) {
        let actor_ref = self.actor_ref.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let epoch = self.epoch;
        let url = self.url.clone();

        self.reader_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = shutdown_rx.changed() => {
                        if res.is_err() || *shutdown_rx.borrow_and_update() {
                            break;
                        }
                    }
                    frame = reader.next() => {
                        match frame {
                            Some(Ok(WsFrame::Close(frame))) => {
                                info!(url = %url, close = ?frame, "received close frame");
                                let _ = actor_ref
                                    .tell(SessionClosed { epoch, cause: DisconnectCause::RemoteClosed })
                                    .send()
                                    .await;
                                break;
                            }
                            Some(Ok(frame)) => {
                                if actor_ref
                                    .tell(InboundFrame { epoch, frame })
                                    .send()
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Some(Err(err)) => {
                                let cause = DisconnectCause::ReadFailure { error: err.to_string() };
                                let _ = actor_ref.tell(SessionClosed { epoch, cause }).send().await;
                                break;
                            }
                            None => {
                                let _ = actor_ref
                                    .tell(SessionClosed { epoch, cause: DisconnectCause::RemoteClosed })
                                    .send()
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
        }));
    }

    fn start_ping_loop(&mut self) {
        let actor_ref = self.actor_ref.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let interval = self.ping.interval();
        let epoch = self.epoch;

        self.ping_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a ping goes out one
            // full interval after connect.
            ticker.tick().await;
            loop {
                tokio::select! {
                    res = shutdown_rx.changed() => {
                        if res.is_err() || *shutdown_rx.borrow_and_update() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if actor_ref.tell(PingTick { epoch }).send().await.is_err() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    /// Tear down the live session and move into the retry cycle.
    fn connection_lost(&mut self, cause: DisconnectCause) {
        self.stop_io_tasks();
        self.writer = None;
        self.ping.reset();
        self.schedule_reconnect(&cause);
    }

    /// Decide, per the policy, whether and when the next attempt runs.
    fn schedule_reconnect(&mut self, cause: &DisconnectCause) {
        let next = self.retry.attempts.saturating_add(1);
        if !self.policy.should_retry(next) {
            warn!(
                url = %self.url,
                cause = ?cause,
                attempts = self.retry.attempts,
                "reconnect policy gave up"
            );
            self.state = ConnState::Idle;
            self.fail_waiters(RealtimeError::RetriesExhausted {
                attempts: self.retry.attempts,
            });
            return;
        }

        let since_last = self.retry.last_attempt_at.map(|at| at.elapsed());
        self.retry.record_attempt();
        self.health.increment_reconnect();
        self.state = ConnState::Reconnecting;

        let delay = jitter_delay(self.policy.delay_for(next));
        warn!(
            url = %self.url,
            cause = ?cause,
            attempt = next,
            delay_ms = delay.as_millis() as u64,
            since_last_attempt = ?since_last,
            "reconnect scheduled"
        );

        let actor_ref = self.actor_ref.clone();
        let epoch = self.epoch;
        self.cancel_retry();
        self.retry_task = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = actor_ref.tell(AttemptRetry { epoch }).send().await;
        }));
    }
}
