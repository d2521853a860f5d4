//! Event source framework
//!
//! Normalizes heterogeneous intent feeds (websocket, server-sent events,
//! on-chain logs) into one subscription contract: `subscribe(handler)`
//! returns a detachable handle, and the handler is invoked once per
//! normalized message. Connection trouble stays inside the source, which
//! reconnects with capped exponential backoff; it never reaches the
//! handler.

pub mod onchain;
pub mod sse;
pub mod websocket;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use onchain::OnChainLogSource;
pub use sse::SseSource;
pub use websocket::WebSocketSource;

use crate::config::StreamSourceConfig;

/// Callback invoked with each normalized raw intent payload.
pub type IntentHandler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// A subscribable intent feed.
#[async_trait]
pub trait IntentSource: Send + Sync {
    /// Starts the feed. Returns a handle that stops it when closed.
    async fn subscribe(&self, handler: IntentHandler) -> Result<Subscription>;
}

/// Detachable subscription handle.
///
/// Closing stops liveness probing and tears the connection down without
/// triggering further reconnects. Intents already handed to the handler are
/// unaffected.
pub struct Subscription {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(shutdown: watch::Sender<bool>, handle: JoinHandle<()>) -> Self {
        Self { shutdown, handle }
    }

    /// Signals the source task to stop and detaches.
    pub fn close(self) {
        let _ = self.shutdown.send(true);
    }

    /// Signals the source task to stop and waits for it to finish.
    pub async fn close_and_join(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }

    /// Whether the source task has already terminated (e.g. after exhausting
    /// its reconnect budget).
    pub fn is_terminated(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Creates the shutdown channel pair for a source task.
pub(crate) fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Reconnect state: exponential backoff starting at a base delay, doubling
/// per attempt, giving up after a fixed attempt count. A successful
/// connection resets both counters.
#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    base_delay: Duration,
    max_attempts: u32,
    attempts: u32,
    delay: Duration,
}

impl ReconnectSchedule {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            attempts: 0,
            delay: base_delay,
        }
    }

    pub fn from_config(config: &StreamSourceConfig) -> Self {
        Self::new(
            Duration::from_millis(config.reconnect_delay_ms),
            config.max_reconnect_attempts,
        )
    }

    /// Delay to wait before the next reconnect attempt, or `None` when the
    /// attempt budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let delay = self.delay;
        self.attempts += 1;
        self.delay = self.delay.saturating_mul(2);
        Some(delay)
    }

    /// Resets after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay = self.base_delay;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps_at_attempt_budget() {
        let mut schedule = ReconnectSchedule::new(Duration::from_secs(1), 5);
        let delays: Vec<_> = std::iter::from_fn(|| schedule.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
            ]
        );
        assert_eq!(schedule.next_delay(), None);
    }

    #[test]
    fn success_resets_counter_and_delay() {
        let mut schedule = ReconnectSchedule::new(Duration::from_secs(1), 3);
        schedule.next_delay();
        schedule.next_delay();
        assert_eq!(schedule.attempts(), 2);
        schedule.reset();
        assert_eq!(schedule.attempts(), 0);
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(1)));
    }
}
