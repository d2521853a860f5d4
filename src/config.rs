//! Configuration Management Module
//!
//! Loads and validates solver configuration: supported chains with their
//! contract addresses and token tables, the allocator directory used for
//! signature verification, intent source endpoints, and price feed settings.

use ethereum_types::{H160, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::intent::{parse_address, parse_u256};

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all solver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Service-level settings (price feed, polling)
    pub service: ServiceConfig,
    /// Supported chains (use [[chain]] in TOML for multiple)
    #[serde(rename = "chain", default)]
    pub chains: Vec<ChainConfig>,
    /// Known allocators (use [[allocator]] in TOML for multiple)
    #[serde(rename = "allocator", default)]
    pub allocators: Vec<AllocatorConfig>,
    /// Intent source endpoints
    #[serde(default)]
    pub sources: SourcesConfig,
    /// Rule pipeline options
    #[serde(default)]
    pub rules: RulesConfig,
}

/// Service-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Price feed base URL (e.g., "https://api.coingecko.com/api/v3")
    pub price_feed_url: String,
    /// Price refresh interval in milliseconds
    #[serde(default = "default_price_refresh_ms")]
    pub price_refresh_ms: u64,
    /// Age past which a cached price sample is considered stale, in milliseconds
    #[serde(default = "default_price_stale_ms")]
    pub price_stale_ms: u64,
}

/// Configuration for a supported chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Human-readable name for the chain
    pub name: String,
    /// Unique chain identifier
    pub chain_id: u64,
    /// RPC endpoint URL
    pub rpc_url: String,
    /// Solver (signer) address on this chain
    pub solver_address: String,
    /// Supported arbiter contract address
    pub arbiter: String,
    /// Supported tribunal contract address
    pub tribunal: String,
    /// Registration/nonce registry contract address
    pub the_compact: String,
    /// Signing-domain prefix prepended to the claim hash before digesting
    /// (hex, typically 0x1901 followed by the 32-byte domain separator)
    pub prefix: String,
    /// Priority fee in wei used for fill transactions
    pub priority_fee_wei: u64,
    /// Minimum seconds a compact must have until expiration
    #[serde(default = "default_compact_expiration_buffer")]
    pub compact_expiration_buffer_secs: u64,
    /// Minimum seconds a mandate must have until expiration
    #[serde(default = "default_mandate_expiration_buffer")]
    pub mandate_expiration_buffer_secs: u64,
    /// Block explorer base URL, if any
    #[serde(default)]
    pub block_explorer: Option<String>,
    /// Token table for this chain
    pub tokens: ChainTokens,
}

/// Tokens the solver settles in on one chain.
///
/// The settlement calculator prices three kinds: the chain's native asset,
/// its wrapped form (interchangeable for pricing), and a 6-decimal stable
/// token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainTokens {
    pub native: TokenConfig,
    pub wrapped_native: TokenConfig,
    pub stable: TokenConfig,
}

/// A single supported token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub address: String,
    pub decimals: u32,
    /// Asset id on the price feed (e.g., "ethereum")
    pub price_feed_id: String,
}

/// A known allocator whose co-signature authorizes fund release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorConfig {
    pub name: String,
    /// Allocator identifier as registered on-chain (decimal string)
    pub id: String,
    /// Address the allocator signs with
    pub signing_address: String,
}

/// Intent source endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(rename = "websocket", default)]
    pub websockets: Vec<StreamSourceConfig>,
    #[serde(rename = "sse", default)]
    pub sse: Vec<StreamSourceConfig>,
    #[serde(rename = "onchain", default)]
    pub onchain: Vec<OnChainSourceConfig>,
}

/// A websocket or SSE intent source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSourceConfig {
    pub url: String,
    /// Reconnect attempts before giving up permanently
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Initial reconnect delay in milliseconds (doubles per attempt)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

/// An on-chain event log intent source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnChainSourceConfig {
    /// Chain to poll
    pub chain_id: u64,
    /// Contract emitting the intent events
    pub address: String,
    /// Event signature, e.g. "Broadcast(uint256,bytes)"
    pub event_signature: String,
    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Blocks to lag behind the head before processing a log
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,
    /// Block to start scanning from; defaults to the confirmed head at startup
    #[serde(default)]
    pub initial_block: Option<u64>,
    /// Event identifiers already processed in a previous run
    #[serde(default)]
    pub processed_ids: Vec<String>,
}

/// Rule pipeline options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Whether the protocol base rules run before any custom rules
    #[serde(default = "default_true")]
    pub keep_base_rules: bool,
    /// Names of registered custom rules to append, in order
    #[serde(default)]
    pub custom: Vec<String>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            keep_base_rules: true,
            custom: Vec::new(),
        }
    }
}

fn default_price_refresh_ms() -> u64 {
    10_000
}

fn default_price_stale_ms() -> u64 {
    30_000
}

fn default_compact_expiration_buffer() -> u64 {
    60
}

fn default_mandate_expiration_buffer() -> u64 {
    10
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_confirmation_blocks() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

// ============================================================================
// LOADING & VALIDATION
// ============================================================================

impl SolverConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path to config file. If None, uses the
    ///   SOLVER_CONFIG_PATH env var or `config/solver.toml`.
    pub fn load_from_path(path: Option<&str>) -> anyhow::Result<Self> {
        let config_path = path
            .map(|p| p.to_string())
            .or_else(|| std::env::var("SOLVER_CONFIG_PATH").ok())
            .unwrap_or_else(|| "config/solver.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: SolverConfig = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/solver.template.toml config/solver.toml\n\
                Then edit config/solver.toml with your actual values.",
                config_path
            ))
        }
    }

    /// Loads configuration from the default path.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from_path(None)
    }

    /// Looks up the configuration for a chain id.
    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    /// Whether a chain id is supported.
    pub fn is_supported_chain(&self, chain_id: u64) -> bool {
        self.chain(chain_id).is_some()
    }

    /// Resolves an allocator by its packed identifier.
    pub fn allocator_for_id(&self, id: &U256) -> Option<(&str, H160)> {
        self.allocators.iter().find_map(|a| {
            let entry_id = parse_u256("allocator.id", &a.id).ok()?;
            if entry_id == *id {
                let addr = parse_address("allocator.signing_address", &a.signing_address).ok()?;
                Some((a.name.as_str(), addr))
            } else {
                None
            }
        })
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// Checks:
    /// - At least one chain is configured, with unique chain IDs
    /// - All addresses and prefixes are well-formed hex
    /// - The stable token carries 6 decimals
    /// - Allocator ids are unique decimal integers
    /// - Sources reference configured chains
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chains.is_empty() {
            anyhow::bail!("Configuration error: At least one [[chain]] must be configured");
        }

        let mut seen_chains = HashSet::new();
        for chain in &self.chains {
            if !seen_chains.insert(chain.chain_id) {
                anyhow::bail!(
                    "Configuration error: duplicate chain ID {} ({})",
                    chain.chain_id,
                    chain.name
                );
            }
            chain.validate()?;
        }

        let mut seen_allocators = HashSet::new();
        for allocator in &self.allocators {
            let id = parse_u256("allocator.id", &allocator.id).map_err(|_| {
                anyhow::anyhow!(
                    "Configuration error: allocator {} has invalid id '{}'",
                    allocator.name,
                    allocator.id
                )
            })?;
            if !seen_allocators.insert(id) {
                anyhow::bail!(
                    "Configuration error: duplicate allocator id {}",
                    allocator.id
                );
            }
            parse_address("allocator.signing_address", &allocator.signing_address).map_err(
                |_| {
                    anyhow::anyhow!(
                        "Configuration error: allocator {} has invalid signing address '{}'",
                        allocator.name,
                        allocator.signing_address
                    )
                },
            )?;
        }

        for source in &self.sources.onchain {
            if !self.is_supported_chain(source.chain_id) {
                anyhow::bail!(
                    "Configuration error: onchain source references unknown chain {}",
                    source.chain_id
                );
            }
            parse_address("sources.onchain.address", &source.address).map_err(|_| {
                anyhow::anyhow!(
                    "Configuration error: onchain source has invalid address '{}'",
                    source.address
                )
            })?;
        }

        Ok(())
    }
}

impl ChainConfig {
    fn validate(&self) -> anyhow::Result<()> {
        for (label, addr) in [
            ("arbiter", &self.arbiter),
            ("tribunal", &self.tribunal),
            ("the_compact", &self.the_compact),
            ("solver_address", &self.solver_address),
        ] {
            parse_address("chain", addr).map_err(|_| {
                anyhow::anyhow!(
                    "Configuration error: chain {} has invalid {} address '{}'",
                    self.name,
                    label,
                    addr
                )
            })?;
        }

        self.prefix_bytes().map_err(|e| {
            anyhow::anyhow!(
                "Configuration error: chain {} has invalid prefix: {}",
                self.name,
                e
            )
        })?;

        for token in [
            &self.tokens.native,
            &self.tokens.wrapped_native,
            &self.tokens.stable,
        ] {
            parse_address("chain.tokens", &token.address).map_err(|_| {
                anyhow::anyhow!(
                    "Configuration error: chain {} token {} has invalid address '{}'",
                    self.name,
                    token.symbol,
                    token.address
                )
            })?;
        }

        if self.tokens.stable.decimals != 6 {
            anyhow::bail!(
                "Configuration error: chain {} stable token {} must have 6 decimals, got {}",
                self.name,
                self.tokens.stable.symbol,
                self.tokens.stable.decimals
            );
        }

        Ok(())
    }

    /// Decoded signing-domain prefix bytes.
    pub fn prefix_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let stripped = self.prefix.strip_prefix("0x").unwrap_or(&self.prefix);
        Ok(hex::decode(stripped)?)
    }

    /// Parsed arbiter address.
    pub fn arbiter_address(&self) -> H160 {
        parse_address("chain.arbiter", &self.arbiter).expect("validated at load")
    }

    /// Parsed tribunal address.
    pub fn tribunal_address(&self) -> H160 {
        parse_address("chain.tribunal", &self.tribunal).expect("validated at load")
    }

    /// Parsed registry contract address.
    pub fn the_compact_address(&self) -> H160 {
        parse_address("chain.the_compact", &self.the_compact).expect("validated at load")
    }

    /// Parsed solver signer address.
    pub fn solver_address(&self) -> H160 {
        parse_address("chain.solver_address", &self.solver_address).expect("validated at load")
    }

    /// Parsed native token address.
    pub fn native_token(&self) -> H160 {
        parse_address("chain.tokens.native", &self.tokens.native.address)
            .expect("validated at load")
    }

    /// Parsed wrapped-native token address.
    pub fn wrapped_native_token(&self) -> H160 {
        parse_address(
            "chain.tokens.wrapped_native",
            &self.tokens.wrapped_native.address,
        )
        .expect("validated at load")
    }

    /// Parsed stable token address.
    pub fn stable_token(&self) -> H160 {
        parse_address("chain.tokens.stable", &self.tokens.stable.address)
            .expect("validated at load")
    }

    /// Whether `token` is the chain's native asset or its wrapped form.
    pub fn is_native_or_wrapped(&self, token: &H160) -> bool {
        *token == self.native_token() || *token == self.wrapped_native_token()
    }

    /// Whether `token` appears anywhere in this chain's token table.
    pub fn supports_token(&self, token: &H160) -> bool {
        self.is_native_or_wrapped(token) || *token == self.stable_token()
    }

    /// Best-effort explorer link for a transaction hash.
    pub fn explorer_tx_url(&self, tx_hash: &str) -> Option<String> {
        self.block_explorer
            .as_ref()
            .map(|base| format!("{}/tx/{}", base.trim_end_matches('/'), tx_hash))
    }
}
