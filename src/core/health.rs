use std::time::{Duration, Instant};

use kameo::Reply;

/// Diagnostics snapshot surfaced next to the connection status.
#[derive(Clone, Copy, Debug, Default, Reply)]
pub struct ConnectionStats {
    pub uptime: Duration,
    pub messages_in: u64,
    pub messages_out: u64,
    pub errors: u64,
    pub reconnects: u64,
    pub offline_signals: u64,
    pub last_message_age: Duration,
}

/// Counters tracking one logical connection across reconnects.
///
/// Totals accumulate for the lifetime of the manager; only the uptime and
/// staleness clocks restart when a fresh session is established.
#[derive(Debug)]
pub struct HealthMonitor {
    connection_started: Instant,
    last_message_received: Instant,
    messages_in: u64,
    messages_out: u64,
    errors: u64,
    reconnects: u64,
    offline_signals: u64,
}

impl HealthMonitor {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            connection_started: now,
            last_message_received: now,
            messages_in: 0,
            messages_out: 0,
            errors: 0,
            reconnects: 0,
            offline_signals: 0,
        }
    }

    /// Restart the uptime and staleness clocks for a fresh session.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.connection_started = now;
        self.last_message_received = now;
    }

    pub fn record_message(&mut self) {
        self.last_message_received = Instant::now();
        self.messages_in = self.messages_in.saturating_add(1);
    }

    pub fn record_sent(&mut self) {
        self.messages_out = self.messages_out.saturating_add(1);
    }

    pub fn record_error(&mut self) {
        self.errors = self.errors.saturating_add(1);
    }

    pub fn increment_reconnect(&mut self) {
        self.reconnects = self.reconnects.saturating_add(1);
    }

    /// Offline signals from the environment are diagnostic only; they never
    /// drive a state transition.
    pub fn record_offline_signal(&mut self) {
        self.offline_signals = self.offline_signals.saturating_add(1);
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            uptime: self.connection_started.elapsed(),
            messages_in: self.messages_in,
            messages_out: self.messages_out,
            errors: self.errors,
            reconnects: self.reconnects,
            offline_signals: self.offline_signals,
            last_message_age: self.last_message_received.elapsed(),
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut monitor = HealthMonitor::new();
        monitor.record_message();
        monitor.record_message();
        monitor.record_sent();
        monitor.record_error();
        monitor.increment_reconnect();
        monitor.record_offline_signal();

        let stats = monitor.stats();
        assert_eq!(stats.messages_in, 2);
        assert_eq!(stats.messages_out, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.reconnects, 1);
        assert_eq!(stats.offline_signals, 1);
    }

    #[test]
    fn reset_keeps_totals_but_restarts_clocks() {
        let mut monitor = HealthMonitor::new();
        monitor.record_message();
        monitor.last_message_received = Instant::now() - Duration::from_secs(60);

        assert!(monitor.stats().last_message_age >= Duration::from_secs(60));

        monitor.reset();
        let stats = monitor.stats();
        assert!(stats.last_message_age < Duration::from_secs(1));
        assert_eq!(stats.messages_in, 1);
    }
}
