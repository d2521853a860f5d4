//! Shared test helpers
//!
//! Provides a programmable in-process chain client, a two-chain solver
//! configuration matching the reference vectors used across the test suite,
//! and a harness that wires up the full service stack against mocks.

use anyhow::Result;
use async_trait::async_trait;
use ethereum_types::{H160, H256, U256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use compact_solver::chains::{
    abi, ChainClient, ChainClients, Contracts, LogEntry, LogFilter, TxReceipt, TxRequest,
};
use compact_solver::config::SolverConfig;
use compact_solver::crypto::keccak256;
use compact_solver::filler::SolverServices;
use compact_solver::nonce::NonceSequencer;
use compact_solver::price::{PriceFeed, PriceService};
use compact_solver::settlement::SettlementCalculator;

pub const ORIGIN_CHAIN: u64 = 10;
pub const DEST_CHAIN: u64 = 8453;

/// Sponsor address of the reference vectors (recovered from the reference
/// signing key).
pub const SPONSOR: &str = "0x71562b71999873db5b286df957af199ec94617f7";
/// Allocator signing address of the reference vectors.
pub const ALLOCATOR_ADDR: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";
/// Allocator id packed into the reference lock id.
pub const ALLOCATOR_ID: &str = "1730150456036417775412616585";
/// 64-byte compact sponsor signature over the reference digest.
pub const SPONSOR_SIG64: &str = "0x4b3b2039aaf9cfeabf50c3c7b47b71db76b48abb259622c17b89ad3b5a235896409e4e2620aaeda60e80f970c86fb3325675a692b90b9c945797e22e9959be1a";
/// 65-byte form of the same sponsor signature.
pub const SPONSOR_SIG65: &str = "0x4b3b2039aaf9cfeabf50c3c7b47b71db76b48abb259622c17b89ad3b5a235896409e4e2620aaeda60e80f970c86fb3325675a692b90b9c945797e22e9959be1a1b";
/// 64-byte compact allocator signature over the reference digest.
pub const ALLOCATOR_SIG64: &str = "0x217c4efd7e06a3dfaac4a82b342e53d79ae9b8db9cab24adc37da86eb54c4e9666a98b24067f0626fed7ad4f9f6549c03459b15da7314169609e3db6219ba57f";
/// Expected claim hash of the reference request.
pub const CLAIM_HASH: &str = "0x14e6130ba522688a4e72e93bb1240cab75b94f75eff9e7bd043d9d0fbcb4901c";
/// Expected witness hash of the reference mandate.
pub const WITNESS_HASH: &str = "0xdd0814b692e2fb1f059f48f5340852b7a4fe5c470a02a0bde821693005cdd55a";
/// Signing-domain prefix configured for the origin chain.
pub const ORIGIN_PREFIX: &str =
    "0x1901b9000c72e3b572689a34bb3be4b5184e28fd7a282db7e37c1b38e6f4fafcaa7b";

// ============================================================================
// MOCK CHAIN CLIENT
// ============================================================================

/// Programmable chain client. Counts every chain access so tests can assert
/// that rejected intents never touched the chain.
pub struct MockChainClient {
    pub chain_id: u64,
    pub signer: H160,
    pub native_balance: U256,
    pub token_balance: U256,
    pub base_fee: Option<U256>,
    pub gas_estimate: U256,
    pub transaction_count: u64,
    pub nonce_consumed: bool,
    pub already_filled: bool,
    pub registration_active: bool,
    /// When set, contract calls fail with a transport error
    pub fail_calls: AtomicBool,
    /// When set, transaction-count fetches fail (nonce seed failures)
    pub fail_transaction_count: AtomicBool,
    /// Total chain accesses of any kind
    pub chain_calls: AtomicUsize,
    /// Submitted transactions, in submission order
    pub sent: Mutex<Vec<TxRequest>>,
    /// Logs returned from every log query
    pub logs: Mutex<Vec<LogEntry>>,
    /// Head block number; advances by one on every query
    pub head: AtomicU64,
}

impl MockChainClient {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            signer: H160::repeat_byte(0xcc),
            native_balance: eth(5),
            token_balance: eth(2),
            base_fee: Some(U256::from(1_000_000_000u64)),
            gas_estimate: U256::from(200_000u64),
            transaction_count: 7,
            nonce_consumed: false,
            already_filled: false,
            registration_active: false,
            fail_calls: AtomicBool::new(false),
            fail_transaction_count: AtomicBool::new(false),
            chain_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
            head: AtomicU64::new(1_000),
        }
    }

    pub fn calls(&self) -> usize {
        self.chain_calls.load(Ordering::SeqCst)
    }

    pub fn sent_transactions(&self) -> Vec<TxRequest> {
        self.sent.lock().unwrap().clone()
    }

    fn touch(&self) {
        self.chain_calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn word(value: U256) -> Vec<u8> {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    buf.to_vec()
}

fn bool_word(value: bool) -> Vec<u8> {
    word(U256::from(u8::from(value)))
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn signer_address(&self) -> H160 {
        self.signer
    }

    async fn latest_block_number(&self) -> Result<u64> {
        self.touch();
        Ok(self.head.fetch_add(1, Ordering::SeqCst))
    }

    async fn latest_base_fee(&self) -> Result<Option<U256>> {
        self.touch();
        Ok(self.base_fee)
    }

    async fn native_balance(&self, _account: H160) -> Result<U256> {
        self.touch();
        Ok(self.native_balance)
    }

    async fn call(&self, _to: H160, data: Vec<u8>) -> Result<Vec<u8>> {
        self.touch();
        if self.fail_calls.load(Ordering::SeqCst) {
            anyhow::bail!("mock transport failure");
        }
        let selector: [u8; 4] = data[..4].try_into().unwrap();
        if selector == abi::selector("balanceOf(address)") {
            Ok(word(self.token_balance))
        } else if selector == abi::selector("hasConsumedAllocatorNonce(uint256,address)") {
            Ok(bool_word(self.nonce_consumed))
        } else if selector == abi::selector("filled(bytes32)") {
            Ok(bool_word(self.already_filled))
        } else if selector == abi::selector("getRegistrationStatus(address,bytes32,bytes32)") {
            let mut out = bool_word(self.registration_active);
            out.extend_from_slice(&word(U256::from(4_102_444_800u64)));
            Ok(out)
        } else {
            anyhow::bail!("mock received unexpected call selector {:02x?}", selector)
        }
    }

    async fn estimate_gas(&self, _tx: &TxRequest) -> Result<U256> {
        self.touch();
        Ok(self.gas_estimate)
    }

    async fn transaction_count(&self, _account: H160) -> Result<u64> {
        self.touch();
        if self.fail_transaction_count.load(Ordering::SeqCst) {
            anyhow::bail!("mock seed fetch failure");
        }
        Ok(self.transaction_count)
    }

    async fn get_logs(&self, _filter: &LogFilter) -> Result<Vec<LogEntry>> {
        self.touch();
        Ok(self.logs.lock().unwrap().clone())
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<TxReceipt> {
        self.touch();
        let nonce = tx.nonce.unwrap_or_default();
        self.sent.lock().unwrap().push(tx);
        // Unique per (chain, nonce) so tests can tell receipts apart
        let mut seed = [0u8; 16];
        seed[..8].copy_from_slice(&self.chain_id.to_be_bytes());
        seed[8..].copy_from_slice(&nonce.to_be_bytes());
        Ok(TxReceipt {
            transaction_hash: keccak256(&seed),
            block_number: 1_001,
            success: true,
        })
    }
}

// ============================================================================
// CONFIGURATION AND REQUEST FIXTURES
// ============================================================================

/// Two-chain configuration matching the reference vectors: origin chain 10
/// (arbiter + signing prefix) and destination chain 8453 (tribunal).
pub fn test_config() -> SolverConfig {
    let toml = format!(
        r#"
        [service]
        price_feed_url = "http://127.0.0.1:0"

        [[chain]]
        name = "origin"
        chain_id = {ORIGIN_CHAIN}
        rpc_url = "http://127.0.0.1:8545"
        solver_address = "0xcccccccccccccccccccccccccccccccccccccccc"
        arbiter = "0x2602D9f66ec17F2dc770063F7B91821DD741F626"
        tribunal = "0x2602D9f66ec17F2dc770063F7B91821DD741F626"
        the_compact = "0x00000000000018DF021Ff2467dF97ff846E09f48"
        prefix = "{ORIGIN_PREFIX}"
        priority_fee_wei = 1

        [chain.tokens.native]
        symbol = "ETH"
        address = "0x0000000000000000000000000000000000000000"
        decimals = 18
        price_feed_id = "ethereum"

        [chain.tokens.wrapped_native]
        symbol = "WETH"
        address = "0x4200000000000000000000000000000000000006"
        decimals = 18
        price_feed_id = "ethereum"

        [chain.tokens.stable]
        symbol = "USDC"
        address = "0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85"
        decimals = 6
        price_feed_id = "usd-coin"

        [[chain]]
        name = "destination"
        chain_id = {DEST_CHAIN}
        rpc_url = "http://127.0.0.1:8546"
        solver_address = "0xcccccccccccccccccccccccccccccccccccccccc"
        arbiter = "0xfaBE453252ca8337b091ba01BB168030E2FE6c1F"
        tribunal = "0xfaBE453252ca8337b091ba01BB168030E2FE6c1F"
        the_compact = "0x00000000000018DF021Ff2467dF97ff846E09f48"
        prefix = "0x1901c0ffee72e3b572689a34bb3be4b5184e28fd7a282db7e37c1b38e6f4fafcaa7b"
        priority_fee_wei = 1

        [chain.tokens.native]
        symbol = "ETH"
        address = "0x0000000000000000000000000000000000000000"
        decimals = 18
        price_feed_id = "ethereum"

        [chain.tokens.wrapped_native]
        symbol = "WETH"
        address = "0x4200000000000000000000000000000000000006"
        decimals = 18
        price_feed_id = "ethereum"

        [chain.tokens.stable]
        symbol = "USDC"
        address = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
        decimals = 6
        price_feed_id = "usd-coin"

        [[allocator]]
        name = "autocator"
        id = "{ALLOCATOR_ID}"
        signing_address = "{ALLOCATOR_ADDR}"
        "#
    );
    let config: SolverConfig = toml::from_str(&toml).unwrap();
    config.validate().unwrap();
    config
}

/// The reference broadcast request: WETH claim on the origin chain settling
/// in WETH on the destination chain, sponsor-signed, allocator co-signed.
pub fn reference_request_json() -> serde_json::Value {
    serde_json::json!({
        "chainId": "10",
        "compact": {
            "arbiter": "0x2602D9f66ec17F2dc770063F7B91821DD741F626",
            "sponsor": SPONSOR,
            "nonce": "0x12d687",
            "expires": "4102444800",
            "id": "0x597259c28778192b4da9d894200000000000000000000000000000000000006",
            "amount": "1000000000000000000",
            "mandate": {
                "chainId": 8453,
                "tribunal": "0xfaBE453252ca8337b091ba01BB168030E2FE6c1F",
                "recipient": "0x3f8a2b9c4d5e6f708192a3b4c5d6e7f801234567",
                "expires": "4102445100",
                "token": "0x4200000000000000000000000000000000000006",
                "minimumAmount": "950000000000000000",
                "baselinePriorityFee": "100000000",
                "scalingFactor": "1000000000100000000",
                "salt": "0xabababababababababababababababababababababababababababababababab"
            }
        },
        "sponsorSignature": SPONSOR_SIG64,
        "allocatorSignature": ALLOCATOR_SIG64,
        "context": {
            "dispensation": "500000000000000",
            "dispensationUSD": "$1.25",
            "spotOutputAmount": "990000000000000000",
            "quoteOutputAmountDirect": "985000000000000000",
            "quoteOutputAmountNet": "980000000000000000",
            "witnessTypeString": "mandate",
            "witnessHash": WITNESS_HASH
        }
    })
}

// ============================================================================
// SERVICE HARNESS
// ============================================================================

struct StaticPriceFeed(f64);

#[async_trait]
impl PriceFeed for StaticPriceFeed {
    async fn price_usd(&self, _asset_id: &str) -> Result<f64> {
        Ok(self.0)
    }
}

pub struct TestHarness {
    pub services: Arc<SolverServices>,
    pub origin: Arc<MockChainClient>,
    pub dest: Arc<MockChainClient>,
}

/// Wires the full service stack against the two mock clients, with a static
/// 2000 USD native price.
pub async fn harness_with(
    origin: MockChainClient,
    dest: MockChainClient,
    config: SolverConfig,
) -> TestHarness {
    let origin = Arc::new(origin);
    let dest = Arc::new(dest);
    let config = Arc::new(config);

    let mut chains = ChainClients::new();
    chains.insert(origin.clone() as Arc<dyn ChainClient>);
    chains.insert(dest.clone() as Arc<dyn ChainClient>);
    let chains = Arc::new(chains);

    let contracts = Arc::new(Contracts::new(chains.clone(), config.clone()));

    let assets: HashMap<u64, String> = HashMap::from([
        (ORIGIN_CHAIN, "ethereum".to_string()),
        (DEST_CHAIN, "ethereum".to_string()),
    ]);
    let price = Arc::new(PriceService::new(
        Arc::new(StaticPriceFeed(2000.0)),
        assets,
        Duration::from_secs(10),
        Duration::from_secs(30),
    ));
    price.refresh_all().await;

    let nonces = Arc::new(NonceSequencer::new(chains.clone()));
    let settlement = Arc::new(SettlementCalculator::new(
        chains.clone(),
        contracts.clone(),
        price.clone(),
        config.clone(),
    ));

    let services = Arc::new(SolverServices {
        config,
        chains,
        contracts,
        price,
        nonces,
        settlement,
    });

    TestHarness {
        services,
        origin,
        dest,
    }
}

pub async fn harness() -> TestHarness {
    harness_with(
        MockChainClient::new(ORIGIN_CHAIN),
        MockChainClient::new(DEST_CHAIN),
        test_config(),
    )
    .await
}

/// 10^18 × n, as a U256.
pub fn eth(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}

/// Parses a 0x-prefixed 32-byte hash.
pub fn h256(s: &str) -> H256 {
    let bytes = hex::decode(s.strip_prefix("0x").unwrap()).unwrap();
    H256::from_slice(&bytes)
}
