//! Solver library for cross-chain intents
//!
//! Watches broadcast channels and on-chain logs for settlement intents,
//! validates and authenticates each one, and submits profitable fills.

pub mod chains;
pub mod config;
pub mod crypto;
pub mod filler;
pub mod intent;
pub mod nonce;
pub mod price;
pub mod protocol;
pub mod rules;
pub mod settlement;
pub mod sources;

// Re-export public types for convenience
pub use chains::{ChainClient, ChainClients, Contracts, RpcChainClient, TxReceipt, TxRequest};
pub use config::SolverConfig;
pub use crypto::{derive_claim_hash, verify_fill_request, AuthError};
pub use filler::{FillPipeline, Filler, IntentProtocol, Outcome, RejectReason, Rule, SolverServices};
pub use intent::{FillRequest, RawFillRequest};
pub use nonce::NonceSequencer;
pub use price::{HttpPriceFeed, PriceService};
pub use protocol::CompactProtocol;
pub use settlement::{SettlementCalculator, SettlementError, SettlementQuote};
pub use sources::{IntentSource, OnChainLogSource, SseSource, Subscription, WebSocketSource};
