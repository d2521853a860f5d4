//! Streaming websocket intent source
//!
//! Holds a persistent duplex connection to a broadcast endpoint. Inbound
//! frames carry newline-delimited JSON; a frame that fails to parse is
//! logged and dropped without touching the connection. Liveness is probed
//! with pings on a fixed interval; a missing pong force-closes the
//! connection and enters the reconnect path.

use anyhow::Result;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::{shutdown_channel, IntentHandler, IntentSource, ReconnectSchedule, Subscription};
use crate::config::StreamSourceConfig;

/// Interval between liveness pings.
const PING_INTERVAL: Duration = Duration::from_secs(15);
/// Force-close if no pong arrives within this window after a ping.
const PONG_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why a connection ended.
enum ConnectionEnd {
    /// Remote closed or errored; reconnect.
    Reconnect,
    /// Shutdown was requested; stop for good.
    Shutdown,
}

pub struct WebSocketSource {
    url: String,
    schedule: ReconnectSchedule,
}

impl WebSocketSource {
    pub fn new(config: &StreamSourceConfig) -> Self {
        Self {
            url: config.url.clone(),
            schedule: ReconnectSchedule::from_config(config),
        }
    }
}

#[async_trait]
impl IntentSource for WebSocketSource {
    async fn subscribe(&self, handler: IntentHandler) -> Result<Subscription> {
        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let url = self.url.clone();
        let schedule = self.schedule.clone();

        let handle = tokio::spawn(run_source(url, schedule, handler, shutdown_rx));
        Ok(Subscription::new(shutdown_tx, handle))
    }
}

async fn run_source(
    url: String,
    mut schedule: ReconnectSchedule,
    handler: IntentHandler,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                info!(url = %url, "websocket connection established");
                schedule.reset();
                match run_connection(stream, &handler, &mut shutdown).await {
                    ConnectionEnd::Shutdown => {
                        info!(url = %url, "websocket source shut down");
                        return;
                    }
                    ConnectionEnd::Reconnect => {
                        info!(url = %url, "websocket connection closed");
                    }
                }
            }
            Err(e) => {
                error!(url = %url, error = %e, "failed to establish websocket connection");
            }
        }

        let Some(delay) = schedule.next_delay() else {
            error!(url = %url, "max reconnection attempts reached, giving up");
            return;
        };
        info!(
            url = %url,
            attempt = schedule.attempts(),
            delay_ms = delay.as_millis() as u64,
            "attempting to reconnect"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

async fn run_connection(
    stream: WsStream,
    handler: &IntentHandler,
    shutdown: &mut watch::Receiver<bool>,
) -> ConnectionEnd {
    let (mut sink, mut inbound) = stream.split();
    let mut ping_timer = tokio::time::interval(PING_INTERVAL);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick fires immediately; skip it so the first ping waits a full interval
    ping_timer.tick().await;

    let mut last_ping: Option<Instant> = None;

    loop {
        let pong_deadline = last_ping.map(|sent| sent + PONG_TIMEOUT);

        tokio::select! {
            message = inbound.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => dispatch_frame(text.as_bytes(), handler),
                    Some(Ok(Message::Binary(bytes))) => dispatch_frame(&bytes, handler),
                    Some(Ok(Message::Pong(_))) => {
                        if let Some(sent) = last_ping.take() {
                            debug!(latency_ms = sent.elapsed().as_millis() as u64, "websocket pong");
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            return ConnectionEnd::Reconnect;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return ConnectionEnd::Reconnect,
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "websocket error occurred");
                        return ConnectionEnd::Reconnect;
                    }
                }
            }
            _ = ping_timer.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    return ConnectionEnd::Reconnect;
                }
                last_ping = Some(Instant::now());
            }
            _ = maybe_sleep_until(pong_deadline) => {
                warn!("no pong received within timeout, closing connection");
                let _ = sink.send(Message::Close(None)).await;
                return ConnectionEnd::Reconnect;
            }
            _ = shutdown.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return ConnectionEnd::Shutdown;
            }
        }
    }
}

/// Splits a frame into newline-delimited JSON messages and hands each to the
/// handler. A message that fails to parse is dropped on its own.
fn dispatch_frame(frame: &[u8], handler: &IntentHandler) {
    for line in frame.split(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<serde_json::Value>(line) {
            Ok(value) => handler(value),
            Err(e) => {
                error!(error = %e, "error parsing message");
            }
        }
    }
}

async fn maybe_sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
