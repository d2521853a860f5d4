//! Event source tests
//!
//! On-chain poller deduplication and teardown, exercised against the mock
//! chain client. Reconnect backoff and wire parsing are covered by unit
//! tests inside the source modules.

mod helpers;

use compact_solver::chains::{ChainClient, LogEntry};
use compact_solver::config::OnChainSourceConfig;
use compact_solver::crypto::keccak256;
use compact_solver::sources::{IntentHandler, IntentSource, OnChainLogSource};
use ethereum_types::{H160, H256};
use helpers::{MockChainClient, ORIGIN_CHAIN};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn source_config() -> OnChainSourceConfig {
    OnChainSourceConfig {
        chain_id: ORIGIN_CHAIN,
        address: "0x2602D9f66ec17F2dc770063F7B91821DD741F626".to_string(),
        event_signature: "Broadcast(bytes)".to_string(),
        poll_interval_ms: 10,
        confirmation_blocks: 2,
        initial_block: Some(1),
        processed_ids: Vec::new(),
    }
}

fn log_entry(tx_seed: u8, log_index: u64) -> LogEntry {
    LogEntry {
        address: H160::repeat_byte(0x26),
        topics: vec![H256::zero()],
        data: Vec::new(),
        block_number: 900,
        transaction_hash: keccak256(&[tx_seed]),
        log_index,
    }
}

fn counting_decoder() -> (
    compact_solver::sources::onchain::LogDecoder,
    Arc<AtomicUsize>,
) {
    let decoded = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&decoded);
    let decoder: compact_solver::sources::onchain::LogDecoder = Arc::new(move |_log| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({"ok": true}))
    });
    (decoder, decoded)
}

/// What is tested: logs returned on every poll are delivered to the handler
/// exactly once each, keyed by transaction hash and log index.
/// Why: overlapping block ranges and restarts must never double-deliver an
/// intent.
#[tokio::test]
async fn poller_deduplicates_repeated_logs() {
    let client = Arc::new(MockChainClient::new(ORIGIN_CHAIN));
    *client.logs.lock().unwrap() = vec![log_entry(1, 0), log_entry(1, 1), log_entry(2, 0)];

    let (decoder, _) = counting_decoder();
    let source = OnChainLogSource::new(
        &source_config(),
        Arc::clone(&client) as Arc<dyn ChainClient>,
        decoder,
    )
    .unwrap();

    let handled = Arc::new(AtomicUsize::new(0));
    let handler: IntentHandler = {
        let handled = Arc::clone(&handled);
        Arc::new(move |_value| {
            handled.fetch_add(1, Ordering::SeqCst);
        })
    };

    let subscription = source.subscribe(handler).await.unwrap();
    // Several poll intervals pass; the same three logs come back each time
    tokio::time::sleep(Duration::from_millis(100)).await;
    subscription.close_and_join().await;

    assert_eq!(handled.load(Ordering::SeqCst), 3);
}

/// What is tested: identifiers listed as already processed in configuration
/// are never delivered.
/// Why: a restarted scan resumes where the previous run left off.
#[tokio::test]
async fn preseeded_processed_ids_are_skipped() {
    let client = Arc::new(MockChainClient::new(ORIGIN_CHAIN));
    let seen = log_entry(1, 0);
    let fresh = log_entry(2, 0);
    let seen_id = format!("0x{:x}:{}", seen.transaction_hash, seen.log_index);
    *client.logs.lock().unwrap() = vec![seen, fresh];

    let mut config = source_config();
    config.processed_ids = vec![seen_id];

    let (decoder, _) = counting_decoder();
    let source = OnChainLogSource::new(
        &config,
        Arc::clone(&client) as Arc<dyn ChainClient>,
        decoder,
    )
    .unwrap();

    let handled = Arc::new(AtomicUsize::new(0));
    let handler: IntentHandler = {
        let handled = Arc::clone(&handled);
        Arc::new(move |_value| {
            handled.fetch_add(1, Ordering::SeqCst);
        })
    };

    let subscription = source.subscribe(handler).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    subscription.close_and_join().await;

    assert_eq!(handled.load(Ordering::SeqCst), 1);
}

/// What is tested: a decoder failure drops that log only; other logs are
/// still delivered, and the bad log is not retried.
/// Why: one malformed event must not wedge the feed.
#[tokio::test]
async fn decoder_failure_drops_single_log() {
    let client = Arc::new(MockChainClient::new(ORIGIN_CHAIN));
    *client.logs.lock().unwrap() = vec![log_entry(1, 0), log_entry(2, 0)];

    let decoder: compact_solver::sources::onchain::LogDecoder = Arc::new(|log| {
        if log.log_index == 0 && log.transaction_hash == keccak256(&[1]) {
            anyhow::bail!("unparseable")
        }
        Ok(serde_json::json!({"ok": true}))
    });
    let source = OnChainLogSource::new(
        &source_config(),
        Arc::clone(&client) as Arc<dyn ChainClient>,
        decoder,
    )
    .unwrap();

    let handled = Arc::new(AtomicUsize::new(0));
    let handler: IntentHandler = {
        let handled = Arc::clone(&handled);
        Arc::new(move |_value| {
            handled.fetch_add(1, Ordering::SeqCst);
        })
    };

    let subscription = source.subscribe(handler).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    subscription.close_and_join().await;

    assert_eq!(handled.load(Ordering::SeqCst), 1);
}

/// What is tested: closing the subscription stops polling; no further chain
/// calls are made afterwards.
/// Why: teardown must detach the source without leaking a poller.
#[tokio::test]
async fn closed_subscription_stops_polling() {
    let client = Arc::new(MockChainClient::new(ORIGIN_CHAIN));
    let (decoder, _) = counting_decoder();
    let source = OnChainLogSource::new(
        &source_config(),
        Arc::clone(&client) as Arc<dyn ChainClient>,
        decoder,
    )
    .unwrap();

    let handler: IntentHandler = Arc::new(|_value| {});
    let subscription = source.subscribe(handler).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    subscription.close_and_join().await;

    let calls_after_close = client.calls();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.calls(), calls_after_close);
}
