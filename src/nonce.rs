//! Per-chain transaction nonce sequencer
//!
//! Hands out transaction nonces such that concurrent submissions on the same
//! chain never collide and values are issued in request order. The first
//! request for a chain seeds the sequence from the chain's pending
//! transaction count; every request takes the current value and reserves the
//! next one. The caller always receives the value just reserved, never the
//! bumped successor.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::chains::ChainClients;

/// Sequencer owning nonce allocation state for the process lifetime.
pub struct NonceSequencer {
    chains: Arc<ChainClients>,
    // Tokio's mutex queues waiters fairly, which is what makes issuance
    // FIFO in request order. `None` means the chain is not seeded yet.
    sequences: Mutex<HashMap<u64, Arc<AsyncMutex<Option<u64>>>>>,
}

impl NonceSequencer {
    pub fn new(chains: Arc<ChainClients>) -> Self {
        Self {
            chains,
            sequences: Mutex::new(HashMap::new()),
        }
    }

    /// Reserves and returns the next nonce for a chain.
    ///
    /// If the chain has no seed yet, the current pending transaction count
    /// is fetched while holding the chain's slot, so queued callers observe
    /// the seeded value in order. A failed seed fetch issues nothing; the
    /// next caller retries.
    pub async fn next(&self, chain_id: u64) -> Result<u64> {
        let slot = {
            let mut sequences = self.sequences.lock().expect("nonce map poisoned");
            sequences
                .entry(chain_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
                .clone()
        };

        let mut state = slot.lock().await;
        if state.is_none() {
            let client = self.chains.get(chain_id)?;
            let seed = client
                .transaction_count(client.signer_address())
                .await
                .with_context(|| format!("Failed to seed nonce sequence for chain {chain_id}"))?;
            debug!(chain_id, seed, "seeded nonce sequence");
            *state = Some(seed);
        }

        let nonce = state.expect("seeded above");
        *state = Some(nonce + 1);
        Ok(nonce)
    }
}
