//! Base validation rules
//!
//! Ordered predicates over a parsed fill request. Rules are side-effect-free
//! except for read-only chain queries (nonce consumption, filled status,
//! registration). Expiration and table checks run first so a hopeless
//! intent is rejected before any chain call is made.

use std::time::{SystemTime, UNIX_EPOCH};

use ethereum_types::U256;

use crate::config::SolverConfig;
use crate::crypto;
use crate::filler::Rule;

/// Fallback expiration buffers when the origin chain is not configured; the
/// chain-support rule rejects such intents right after.
const DEFAULT_COMPACT_BUFFER_SECS: u64 = 60;
const DEFAULT_MANDATE_BUFFER_SECS: u64 = 10;

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn buffers(config: &SolverConfig, chain_id: u64) -> (u64, u64) {
    match config.chain(chain_id) {
        Some(chain) => (
            chain.compact_expiration_buffer_secs,
            chain.mandate_expiration_buffer_secs,
        ),
        None => (DEFAULT_COMPACT_BUFFER_SECS, DEFAULT_MANDATE_BUFFER_SECS),
    }
}

/// The full base rule list, in evaluation order.
pub fn base_rules() -> Vec<Rule> {
    vec![
        check_expirations(),
        validate_chains_and_tokens(),
        validate_arbiter_and_tribunal(),
        verify_nonce_unconsumed(),
        intent_not_filled(),
        verify_signatures(),
        enough_balance_on_destination(),
    ]
}

/// Rejects intents whose compact or mandate expires within the per-chain
/// minimum-remaining-time buffer. Pure clock-and-config check.
pub fn check_expirations() -> Rule {
    Rule::new("check_expirations", |request, services| {
        Box::pin(async move {
            let (compact_buffer, mandate_buffer) = buffers(&services.config, request.chain_id);
            let now = U256::from(now_unix());

            if request.compact.expires <= now + U256::from(compact_buffer) {
                return Err(format!(
                    "compact must have at least {compact_buffer} seconds until expiration"
                ));
            }
            if request.compact.mandate.expires <= now + U256::from(mandate_buffer) {
                return Err(format!(
                    "mandate must have at least {mandate_buffer} seconds until expiration"
                ));
            }

            Ok("intent is not expired".to_string())
        })
    })
}

/// Rejects intents on unsupported chains or with tokens outside the
/// configured token tables.
pub fn validate_chains_and_tokens() -> Rule {
    Rule::new("validate_chains_and_tokens", |request, services| {
        Box::pin(async move {
            let origin = services
                .config
                .chain(request.chain_id)
                .ok_or_else(|| format!("origin chain {} is not supported", request.chain_id))?;

            let mandate = &request.compact.mandate;
            let destination = services
                .config
                .chain(mandate.chain_id)
                .ok_or_else(|| format!("destination chain {} is not supported", mandate.chain_id))?;

            let claim_token = request.compact.claim_token();
            if !origin.supports_token(&claim_token) {
                return Err(format!(
                    "claim token 0x{:x} not supported on chain {}",
                    claim_token, request.chain_id
                ));
            }

            if !destination.supports_token(&mandate.token) {
                return Err(format!(
                    "destination token 0x{:x} not supported on chain {}",
                    mandate.token, mandate.chain_id
                ));
            }

            Ok("chains and tokens are ok".to_string())
        })
    })
}

/// Rejects intents addressed to unknown arbiter or tribunal contracts.
pub fn validate_arbiter_and_tribunal() -> Rule {
    Rule::new("validate_arbiter_and_tribunal", |request, services| {
        Box::pin(async move {
            let origin = services
                .config
                .chain(request.chain_id)
                .ok_or_else(|| format!("origin chain {} is not supported", request.chain_id))?;
            if request.compact.arbiter != origin.arbiter_address() {
                return Err(format!(
                    "unsupported arbiter address 0x{:x} on chain {}",
                    request.compact.arbiter, request.chain_id
                ));
            }

            let mandate = &request.compact.mandate;
            let destination = services
                .config
                .chain(mandate.chain_id)
                .ok_or_else(|| format!("destination chain {} is not supported", mandate.chain_id))?;
            if mandate.tribunal != destination.tribunal_address() {
                return Err(format!(
                    "unsupported tribunal address 0x{:x} on chain {}",
                    mandate.tribunal, mandate.chain_id
                ));
            }

            Ok("arbiter and tribunal are ok".to_string())
        })
    })
}

/// Rejects intents whose allocator nonce was already consumed on the origin
/// chain.
pub fn verify_nonce_unconsumed() -> Rule {
    Rule::new("verify_nonce_unconsumed", |request, services| {
        Box::pin(async move {
            let consumed = services
                .contracts
                .has_consumed_allocator_nonce(
                    request.chain_id,
                    request.compact.nonce,
                    request.compact.arbiter,
                )
                .await
                .map_err(|e| format!("failed to check nonce consumption: {e}"))?;

            if consumed {
                return Err("nonce has already been consumed".to_string());
            }

            Ok("nonce is ok".to_string())
        })
    })
}

/// Rejects intents whose claim hash is already marked filled on the
/// destination tribunal.
pub fn intent_not_filled() -> Rule {
    Rule::new("intent_not_filled", |request, services| {
        Box::pin(async move {
            let claim_hash = request
                .claim_hash
                .ok_or_else(|| "claim hash not derived".to_string())?;

            let filled = services
                .contracts
                .is_filled(
                    request.compact.mandate.chain_id,
                    request.compact.mandate.tribunal,
                    claim_hash,
                )
                .await
                .map_err(|e| format!("failed to check filled status: {e}"))?;

            if filled {
                return Err("intent already filled".to_string());
            }

            Ok("intent not yet filled".to_string())
        })
    })
}

/// Authenticates the request: sponsor signature or active registration, plus
/// the allocator co-signature. Failure reasons distinguish which leg failed.
pub fn verify_signatures() -> Rule {
    Rule::new("verify_signatures", |request, services| {
        Box::pin(async move {
            let auth = crypto::verify_fill_request(
                &request,
                &services.config,
                services.contracts.as_ref(),
            )
            .await
            .map_err(|e| e.to_string())?;

            Ok(format!(
                "signatures are ok, registration status: {}",
                if auth.onchain_registration {
                    "onchain"
                } else {
                    "offchain"
                }
            ))
        })
    })
}

/// Rejects intents the solver cannot cover on the destination chain at the
/// mandate minimum.
pub fn enough_balance_on_destination() -> Rule {
    Rule::new("enough_balance_on_destination", |request, services| {
        Box::pin(async move {
            let mandate = &request.compact.mandate;
            let client = services
                .chains
                .get(mandate.chain_id)
                .map_err(|e| e.to_string())?;

            let balance = services
                .contracts
                .token_balance(mandate.chain_id, mandate.token, client.signer_address())
                .await
                .map_err(|e| format!("failed to fetch destination balance: {e}"))?;

            if balance < mandate.minimum_amount {
                return Err(format!(
                    "insufficient balance on destination chain {} for token 0x{:x}",
                    mandate.chain_id, mandate.token
                ));
            }

            Ok("enough tokens to fulfill the intent".to_string())
        })
    })
}

/// Custom rule lookup by configured name.
///
/// Custom rules are registered in code and referenced from configuration;
/// an unknown name is a startup error, not a silent skip.
pub fn resolve_custom_rules(
    names: &[String],
    registry: &[(&'static str, fn() -> Rule)],
) -> anyhow::Result<Vec<Rule>> {
    let mut rules = Vec::with_capacity(names.len());
    for name in names {
        let factory = registry
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f)
            .ok_or_else(|| anyhow::anyhow!("unknown custom rule '{}'", name))?;
        rules.push(factory());
    }
    Ok(rules)
}
