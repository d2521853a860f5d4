//! Server-push intent source
//!
//! Consumes a unidirectional `text/event-stream` feed. Events carry JSON
//! payloads in `data:` lines; events with an empty payload are heartbeats
//! and are not forwarded. Reconnects with the same capped exponential
//! backoff as the websocket source.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use super::{shutdown_channel, IntentHandler, IntentSource, ReconnectSchedule, Subscription};
use crate::config::StreamSourceConfig;

pub struct SseSource {
    url: String,
    schedule: ReconnectSchedule,
}

impl SseSource {
    pub fn new(config: &StreamSourceConfig) -> Self {
        Self {
            url: config.url.clone(),
            schedule: ReconnectSchedule::from_config(config),
        }
    }
}

#[async_trait]
impl IntentSource for SseSource {
    async fn subscribe(&self, handler: IntentHandler) -> Result<Subscription> {
        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;
        let url = self.url.clone();
        let schedule = self.schedule.clone();

        let handle = tokio::spawn(run_source(client, url, schedule, handler, shutdown_rx));
        Ok(Subscription::new(shutdown_tx, handle))
    }
}

enum ConnectionEnd {
    Reconnect,
    Shutdown,
}

async fn run_source(
    client: reqwest::Client,
    url: String,
    mut schedule: ReconnectSchedule,
    handler: IntentHandler,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        match open_stream(&client, &url).await {
            Ok(response) => {
                info!(url = %url, "sse connection established");
                schedule.reset();
                match run_connection(response, &handler, &mut shutdown).await {
                    ConnectionEnd::Shutdown => {
                        info!(url = %url, "sse source shut down");
                        return;
                    }
                    ConnectionEnd::Reconnect => {
                        info!(url = %url, "sse connection closed");
                    }
                }
            }
            Err(e) => {
                error!(url = %url, error = %e, "failed to establish sse connection");
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

async fn open_stream(client: &reqwest::Client, url: &str) -> Result<reqwest::Response> {
    let response = client
        .get(url)
        .header("Accept", "text/event-stream")
        .send()
        .await
        .context("Failed to open event stream")?;
    if !response.status().is_success() {
        anyhow::bail!("event stream returned status {}", response.status());
    }
    Ok(response)
}

async fn run_connection(
    response: reqwest::Response,
    handler: &IntentHandler,
    shutdown: &mut watch::Receiver<bool>,
) -> ConnectionEnd {
    let mut stream = response.bytes_stream();
    let mut parser = EventStreamParser::default();

    loop {
        tokio::select! {
            chunk = stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        for payload in parser.feed(&bytes) {
                            match serde_json::from_str::<serde_json::Value>(&payload) {
                                Ok(value) => handler(value),
                                Err(e) => {
                                    error!(error = %e, "error parsing message");
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "sse error occurred");
                        return ConnectionEnd::Reconnect;
                    }
                    None => return ConnectionEnd::Reconnect,
                }
            }
            _ = shutdown.changed() => return ConnectionEnd::Shutdown,
        }
    }
}

/// Incremental `text/event-stream` parser.
///
/// Accumulates `data:` lines until the blank line that terminates an event,
/// then yields the joined payload. Events with an empty payload (heartbeats)
/// are swallowed here.
#[derive(Default)]
struct EventStreamParser {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl EventStreamParser {
    fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data_lines.is_empty() {
                    let payload = self.data_lines.join("\n");
                    self.data_lines.clear();
                    if !payload.is_empty() {
                        events.push(payload);
                    }
                }
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data_lines.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
            // Comment lines and other fields (event:, id:, retry:) are ignored
        }

        events
    }
}
