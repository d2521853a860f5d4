//! Chain access boundary
//!
//! The solver never builds raw RPC payloads in its pipeline; everything goes
//! through the `ChainClient` capability, implemented by the JSON-RPC client
//! in `rpc` and by in-process mocks in tests. `contracts` layers the few
//! typed contract calls the solver makes on top of that boundary.

pub mod abi;
pub mod contracts;
pub mod rpc;

use anyhow::Result;
use async_trait::async_trait;
use ethereum_types::{H160, H256, U256};
use std::collections::HashMap;
use std::sync::Arc;

pub use contracts::Contracts;
pub use rpc::RpcChainClient;

/// A typed transaction request. The core builds these; the client signs and
/// submits them.
#[derive(Debug, Clone, Default)]
pub struct TxRequest {
    pub to: H160,
    pub value: U256,
    pub data: Vec<u8>,
    pub gas_limit: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub nonce: Option<u64>,
}

/// Receipt of a submitted transaction.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub transaction_hash: H256,
    pub block_number: u64,
    pub success: bool,
}

/// A raw event log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub address: H160,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub transaction_hash: H256,
    pub log_index: u64,
}

/// Filter for a log query.
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub address: H160,
    pub topic0: H256,
    pub from_block: u64,
    pub to_block: u64,
}

/// Per-chain read and submission access.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain this client talks to.
    fn chain_id(&self) -> u64;

    /// Address fills are submitted from.
    fn signer_address(&self) -> H160;

    /// Current head block number.
    async fn latest_block_number(&self) -> Result<u64>;

    /// Base fee of the latest block; `None` on pre-EIP-1559 chains.
    async fn latest_base_fee(&self) -> Result<Option<U256>>;

    /// Native-currency balance of an account.
    async fn native_balance(&self, account: H160) -> Result<U256>;

    /// Read-only contract call.
    async fn call(&self, to: H160, data: Vec<u8>) -> Result<Vec<u8>>;

    /// Gas estimate for a transaction.
    async fn estimate_gas(&self, tx: &TxRequest) -> Result<U256>;

    /// Number of transactions sent from an account (pending included).
    async fn transaction_count(&self, account: H160) -> Result<u64>;

    /// Event logs matching a filter.
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>>;

    /// Signs, submits, and waits for a transaction receipt.
    async fn send_transaction(&self, tx: TxRequest) -> Result<TxReceipt>;
}

/// Registry of chain clients, keyed by chain id.
#[derive(Default)]
pub struct ChainClients {
    clients: HashMap<u64, Arc<dyn ChainClient>>,
}

impl ChainClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, client: Arc<dyn ChainClient>) {
        self.clients.insert(client.chain_id(), client);
    }

    pub fn get(&self, chain_id: u64) -> Result<&Arc<dyn ChainClient>> {
        self.clients
            .get(&chain_id)
            .ok_or_else(|| anyhow::anyhow!("no chain client configured for chain {}", chain_id))
    }

    pub fn contains(&self, chain_id: u64) -> bool {
        self.clients.contains_key(&chain_id)
    }
}
