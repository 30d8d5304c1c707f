//! Environment-driven reconnect nudges.
//!
//! The hosting shell forwards page-visibility and network reachability
//! changes as [`EnvironmentSignal`]s; the trigger asks the connection manager
//! to reconnect when the app returns to the foreground or the network comes
//! back. Offline signals are diagnostic only — the reconnect policy already
//! reacts to the failed send or close that follows a real outage.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::conn::RealtimeClient;
use crate::core::{PingStrategy, ReconnectPolicy};
use crate::transport::WsTransport;

/// Signals the hosting environment can feed into the trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvironmentSignal {
    /// The page/app became visible again.
    Visible,
    /// The page/app was backgrounded. No action.
    Hidden,
    /// Network connectivity was reported restored.
    Online,
    /// Network connectivity was reported lost. Diagnostic only.
    Offline,
}

/// Handle to a spawned environment trigger task.
pub struct EnvironmentTrigger {
    task: JoinHandle<()>,
}

impl EnvironmentTrigger {
    /// Spawn a trigger that watches `signals` and nudges `client`.
    ///
    /// Each wake-worthy signal issues at most one connect nudge, and nudges
    /// go through the ordinary idempotent `connect()` path, so overlapping
    /// triggers collapse onto the single in-flight attempt instead of racing
    /// to open duplicate sessions.
    pub fn spawn<T, R, P>(
        client: RealtimeClient<T, R, P>,
        mut signals: mpsc::UnboundedReceiver<EnvironmentSignal>,
    ) -> Self
    where
        T: WsTransport,
        R: ReconnectPolicy,
        P: PingStrategy,
    {
        let task = tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                match signal {
                    EnvironmentSignal::Visible | EnvironmentSignal::Online => {
                        if client.status().await.is_connected {
                            continue;
                        }
                        info!(signal = ?signal, "wake signal while disconnected; nudging reconnect");
                        client.nudge_connect().await;
                    }
                    EnvironmentSignal::Hidden => {
                        debug!("page hidden; connection left as-is");
                    }
                    EnvironmentSignal::Offline => {
                        client.report_offline().await;
                    }
                }
            }
        });
        Self { task }
    }

    /// Stop watching signals. The connection itself is left untouched.
    pub fn shutdown(self) {
        self.task.abort();
    }
}
