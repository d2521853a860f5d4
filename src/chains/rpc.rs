//! JSON-RPC chain client
//!
//! Talks to an EVM node over HTTP JSON-RPC. Transaction signing stays on the
//! node side (`eth_sendTransaction` against an unlocked signer account), so
//! key custody never enters the solver process.

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethereum_types::{H160, H256, U256};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{ChainClient, LogEntry, LogFilter, TxReceipt, TxRequest};
use crate::config::ChainConfig;

/// Interval between receipt polls after submission.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Give up waiting for a receipt after this many polls.
const RECEIPT_POLL_ATTEMPTS: u32 = 60;

/// JSON-RPC request wrapper
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<serde_json::Value>,
    id: u64,
}

/// JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    #[allow(dead_code)]
    jsonrpc: String,
    result: Option<T>,
    error: Option<JsonRpcError>,
    #[allow(dead_code)]
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Block fields the solver reads.
#[derive(Debug, Deserialize)]
struct RpcBlock {
    #[serde(rename = "number")]
    _number: Option<String>,
    #[serde(rename = "baseFeePerGas")]
    base_fee_per_gas: Option<String>,
}

/// Log entry as returned by eth_getLogs.
#[derive(Debug, Deserialize)]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
    #[serde(rename = "transactionHash")]
    transaction_hash: String,
    #[serde(rename = "logIndex")]
    log_index: String,
}

/// Receipt fields the solver reads.
#[derive(Debug, Deserialize)]
struct RpcReceipt {
    #[serde(rename = "transactionHash")]
    transaction_hash: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
    status: Option<String>,
}

/// JSON-RPC implementation of the chain client boundary.
pub struct RpcChainClient {
    client: Client,
    base_url: String,
    chain_id: u64,
    signer_address: H160,
}

impl RpcChainClient {
    /// Creates a client for one configured chain.
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.rpc_url.clone(),
            chain_id: config.chain_id,
            signer_address: config.solver_address(),
        })
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };

        let response: JsonRpcResponse<T> = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {method} request"))?
            .json()
            .await
            .with_context(|| format!("Failed to parse {method} response"))?;

        if let Some(error) = response.error {
            anyhow::bail!("{} failed: {} ({})", method, error.message, error.code);
        }

        response
            .result
            .ok_or_else(|| anyhow::anyhow!("{} returned no result", method))
    }

    /// Like `request`, but `null` results are allowed (e.g. pending receipts).
    async fn request_optional<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<Option<T>> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };

        let response: JsonRpcResponse<T> = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {method} request"))?
            .json()
            .await
            .with_context(|| format!("Failed to parse {method} response"))?;

        if let Some(error) = response.error {
            anyhow::bail!("{} failed: {} ({})", method, error.message, error.code);
        }

        Ok(response.result)
    }

    fn tx_params(&self, tx: &TxRequest) -> serde_json::Value {
        let mut params = serde_json::json!({
            "from": format!("0x{:x}", self.signer_address),
            "to": format!("0x{:x}", tx.to),
            "value": format!("0x{:x}", tx.value),
            "data": format!("0x{}", hex::encode(&tx.data)),
        });
        if let Some(gas) = &tx.gas_limit {
            params["gas"] = serde_json::json!(format!("0x{gas:x}"));
        }
        if let Some(fee) = &tx.max_fee_per_gas {
            params["maxFeePerGas"] = serde_json::json!(format!("0x{fee:x}"));
        }
        if let Some(fee) = &tx.max_priority_fee_per_gas {
            params["maxPriorityFeePerGas"] = serde_json::json!(format!("0x{fee:x}"));
        }
        if let Some(nonce) = tx.nonce {
            params["nonce"] = serde_json::json!(format!("0x{nonce:x}"));
        }
        params
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn signer_address(&self) -> H160 {
        self.signer_address
    }

    async fn latest_block_number(&self) -> Result<u64> {
        let hex: String = self.request("eth_blockNumber", vec![]).await?;
        parse_hex_u64(&hex).context("Failed to parse block number")
    }

    async fn latest_base_fee(&self) -> Result<Option<U256>> {
        let block: RpcBlock = self
            .request(
                "eth_getBlockByNumber",
                vec![serde_json::json!("latest"), serde_json::json!(false)],
            )
            .await?;
        block
            .base_fee_per_gas
            .map(|fee| parse_hex_u256(&fee).context("Failed to parse base fee"))
            .transpose()
    }

    async fn native_balance(&self, account: H160) -> Result<U256> {
        let hex: String = self
            .request(
                "eth_getBalance",
                vec![
                    serde_json::json!(format!("0x{account:x}")),
                    serde_json::json!("latest"),
                ],
            )
            .await?;
        parse_hex_u256(&hex).context("Failed to parse balance")
    }

    async fn call(&self, to: H160, data: Vec<u8>) -> Result<Vec<u8>> {
        let hex: String = self
            .request(
                "eth_call",
                vec![
                    serde_json::json!({
                        "to": format!("0x{to:x}"),
                        "data": format!("0x{}", hex::encode(&data)),
                    }),
                    serde_json::json!("latest"),
                ],
            )
            .await?;
        let stripped = hex.strip_prefix("0x").unwrap_or(&hex);
        hex::decode(stripped).context("Failed to decode call return data")
    }

    async fn estimate_gas(&self, tx: &TxRequest) -> Result<U256> {
        let hex: String = self
            .request("eth_estimateGas", vec![self.tx_params(tx)])
            .await?;
        parse_hex_u256(&hex).context("Failed to parse gas estimate")
    }

    async fn transaction_count(&self, account: H160) -> Result<u64> {
        let hex: String = self
            .request(
                "eth_getTransactionCount",
                vec![
                    serde_json::json!(format!("0x{account:x}")),
                    serde_json::json!("pending"),
                ],
            )
            .await?;
        parse_hex_u64(&hex).context("Failed to parse transaction count")
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>> {
        let params = serde_json::json!({
            "address": format!("0x{:x}", filter.address),
            "topics": [format!("0x{:x}", filter.topic0)],
            "fromBlock": format!("0x{:x}", filter.from_block),
            "toBlock": format!("0x{:x}", filter.to_block),
        });
        let logs: Vec<RpcLog> = self.request("eth_getLogs", vec![params]).await?;

        let mut entries = Vec::with_capacity(logs.len());
        for log in logs {
            let topics = log
                .topics
                .iter()
                .map(|t| parse_hex_h256(t))
                .collect::<Result<Vec<_>>>()?;
            let data_hex = log.data.strip_prefix("0x").unwrap_or(&log.data);
            entries.push(LogEntry {
                address: parse_hex_h160(&log.address)?,
                topics,
                data: hex::decode(data_hex).context("Failed to decode log data")?,
                block_number: parse_hex_u64(&log.block_number)?,
                transaction_hash: parse_hex_h256(&log.transaction_hash)?,
                log_index: parse_hex_u64(&log.log_index)?,
            });
        }
        Ok(entries)
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<TxReceipt> {
        let tx_hash: String = self
            .request("eth_sendTransaction", vec![self.tx_params(&tx)])
            .await?;
        debug!(chain_id = self.chain_id, tx_hash = %tx_hash, "transaction submitted, awaiting receipt");

        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            let receipt: Option<RpcReceipt> = self
                .request_optional(
                    "eth_getTransactionReceipt",
                    vec![serde_json::json!(tx_hash)],
                )
                .await?;
            if let Some(receipt) = receipt {
                let success = receipt
                    .status
                    .as_deref()
                    .map(|s| parse_hex_u64(s).map(|v| v == 1))
                    .transpose()?
                    .unwrap_or(true);
                return Ok(TxReceipt {
                    transaction_hash: parse_hex_h256(&receipt.transaction_hash)?,
                    block_number: parse_hex_u64(&receipt.block_number)?,
                    success,
                });
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }

        anyhow::bail!("Timed out waiting for receipt of {}", tx_hash)
    }
}

fn parse_hex_u64(value: &str) -> Result<u64> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(stripped, 16).with_context(|| format!("invalid hex quantity '{value}'"))
}

fn parse_hex_u256(value: &str) -> Result<U256> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    let padded = if stripped.len() % 2 == 1 {
        format!("0{stripped}")
    } else {
        stripped.to_string()
    };
    let bytes =
        hex::decode(&padded).with_context(|| format!("invalid hex quantity '{value}'"))?;
    if bytes.len() > 32 {
        anyhow::bail!("hex quantity '{}' exceeds 256 bits", value);
    }
    Ok(U256::from_big_endian(&bytes))
}

fn parse_hex_h256(value: &str) -> Result<H256> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(stripped).with_context(|| format!("invalid hex hash '{value}'"))?;
    if bytes.len() != 32 {
        anyhow::bail!("expected 32-byte hash, got {} bytes", bytes.len());
    }
    Ok(H256::from_slice(&bytes))
}

fn parse_hex_h160(value: &str) -> Result<H160> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(stripped).with_context(|| format!("invalid hex address '{value}'"))?;
    if bytes.len() != 20 {
        anyhow::bail!("expected 20-byte address, got {} bytes", bytes.len());
    }
    Ok(H160::from_slice(&bytes))
}
