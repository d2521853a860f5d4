//! On-chain event log intent source
//!
//! Polls a contract's event log through the chain-client boundary at a
//! configured interval, lagging the head by a confirmation depth.
//! Previously processed identifiers are deduplicated so a restarted scan or
//! an overlapping block range never double-delivers an intent. Each log is
//! decoded into the normalized intent shape by a protocol-supplied decoder.

use anyhow::Result;
use async_trait::async_trait;
use ethereum_types::{H160, H256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::{shutdown_channel, IntentHandler, IntentSource, Subscription};
use crate::chains::{abi, ChainClient, LogEntry, LogFilter};
use crate::config::OnChainSourceConfig;
use crate::intent::parse_address;

/// Decodes one raw log into the normalized intent payload.
pub type LogDecoder = Arc<dyn Fn(&LogEntry) -> Result<serde_json::Value> + Send + Sync>;

pub struct OnChainLogSource {
    client: Arc<dyn ChainClient>,
    address: H160,
    topic0: H256,
    poll_interval: Duration,
    confirmations: u64,
    initial_block: Option<u64>,
    processed_ids: Vec<String>,
    decoder: LogDecoder,
}

impl OnChainLogSource {
    pub fn new(
        config: &OnChainSourceConfig,
        client: Arc<dyn ChainClient>,
        decoder: LogDecoder,
    ) -> Result<Self> {
        let address = parse_address("sources.onchain.address", &config.address)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(Self {
            client,
            address,
            topic0: abi::event_topic(&config.event_signature),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            confirmations: config.confirmation_blocks,
            initial_block: config.initial_block,
            processed_ids: config.processed_ids.clone(),
            decoder,
        })
    }
}

#[async_trait]
impl IntentSource for OnChainLogSource {
    async fn subscribe(&self, handler: IntentHandler) -> Result<Subscription> {
        let (shutdown_tx, shutdown_rx) = shutdown_channel();

        let poller = Poller {
            client: Arc::clone(&self.client),
            address: self.address,
            topic0: self.topic0,
            poll_interval: self.poll_interval,
            confirmations: self.confirmations,
            initial_block: self.initial_block,
            processed: self.processed_ids.iter().cloned().collect(),
            decoder: Arc::clone(&self.decoder),
        };

        let handle = tokio::spawn(poller.run(handler, shutdown_rx));
        Ok(Subscription::new(shutdown_tx, handle))
    }
}

struct Poller {
    client: Arc<dyn ChainClient>,
    address: H160,
    topic0: H256,
    poll_interval: Duration,
    confirmations: u64,
    initial_block: Option<u64>,
    processed: HashSet<String>,
    decoder: LogDecoder,
}

impl Poller {
    async fn run(mut self, handler: IntentHandler, mut shutdown: watch::Receiver<bool>) {
        let chain_id = self.client.chain_id();
        info!(
            chain_id,
            address = ?self.address,
            poll_ms = self.poll_interval.as_millis() as u64,
            confirmations = self.confirmations,
            "listener started"
        );

        let mut next_from = self.initial_block;

        loop {
            if let Err(e) = self.poll_once(&handler, &mut next_from).await {
                error!(chain_id, error = %e, "failed to poll event log");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {
                    info!(chain_id, "onchain source shut down");
                    return;
                }
            }
        }
    }

    async fn poll_once(
        &mut self,
        handler: &IntentHandler,
        next_from: &mut Option<u64>,
    ) -> Result<()> {
        let head = self.client.latest_block_number().await?;
        let confirmed_head = head.saturating_sub(self.confirmations);
        let from_block = next_from.unwrap_or(confirmed_head);

        if from_block > confirmed_head {
            return Ok(());
        }

        let logs = self
            .client
            .get_logs(&LogFilter {
                address: self.address,
                topic0: self.topic0,
                from_block,
                to_block: confirmed_head,
            })
            .await?;

        if !logs.is_empty() {
            debug!(
                from_block,
                to_block = confirmed_head,
                count = logs.len(),
                "fetched event logs"
            );
        }

        for log in logs {
            let event_id = format!("0x{:x}:{}", log.transaction_hash, log.log_index);
            if !self.processed.insert(event_id.clone()) {
                continue;
            }
            match (self.decoder)(&log) {
                Ok(value) => handler(value),
                Err(e) => {
                    error!(event = %event_id, error = %e, "error parsing event log");
                }
            }
        }

        *next_from = Some(confirmed_head + 1);
        Ok(())
    }
}
