use crate::market::types::StreamingStats;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct StatsAggregator {
    stats: StreamingStats,
    connection_started_at: Option<Instant>,
}

impl StatsAggregator {
    pub fn record_update(&mut self, event_time: DateTime<Utc>, now: DateTime<Utc>) {
        self.stats.messages_received = self.stats.messages_received.saturating_add(1);
        self.stats.last_update = Some(now);
        self.stats.latency_ms = signed_delta_ms(now, event_time).max(0);
    }

    pub fn record_reconnect_attempt(&mut self) {
        self.stats.reconnect_attempts = self.stats.reconnect_attempts.saturating_add(1);
    }

    /// Starts the uptime clock on the first transition into a connected state.
    pub fn mark_connected(&mut self, now: Instant) {
        if self.connection_started_at.is_none() {
            self.connection_started_at = Some(now);
            self.stats.uptime_ms = 0;
        }
        self.stats.connected = true;
    }

    pub fn mark_disconnected(&mut self) {
        self.connection_started_at = None;
        self.stats.connected = false;
    }

    pub fn tick_uptime(&mut self, now: Instant) {
        if !self.stats.connected {
            return;
        }
        if let Some(started) = self.connection_started_at {
            let elapsed = now.saturating_duration_since(started).as_millis();
            self.stats.uptime_ms = elapsed.min(u64::MAX as u128) as u64;
        }
    }

    pub fn snapshot(&self) -> StreamingStats {
        self.stats.clone()
    }

    pub fn stats(&self) -> &StreamingStats {
        &self.stats
    }
}

fn signed_delta_ms(lhs: DateTime<Utc>, rhs: DateTime<Utc>) -> i64 {
    lhs.signed_duration_since(rhs).num_milliseconds()
}
