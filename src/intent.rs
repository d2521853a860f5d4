//! Intent wire format and validated records
//!
//! Broadcast channels deliver fill requests as JSON with decimal-or-hex
//! string numerics. `RawFillRequest` mirrors that wire shape; `FillRequest`
//! is the strongly typed record the pipeline operates on. Parsing is the
//! only place raw input is touched: every address, hash, and integer field
//! is validated here and nowhere else.

use ethereum_types::{H160, H256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of low bits of a lock id that carry the claim token address.
const TOKEN_BITS: usize = 160;
/// Width of the allocator identifier packed above the token bits.
const ALLOCATOR_ID_BITS: usize = 92;

/// Errors produced while turning a raw broadcast payload into a `FillRequest`.
#[derive(Debug, Error)]
pub enum IntentError {
    #[error("field `{0}` is missing or empty")]
    MissingField(&'static str),
    #[error("field `{field}` is not a valid address: {value}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("field `{field}` is not a valid 32-byte hash: {value}")]
    InvalidHash { field: &'static str, value: String },
    #[error("field `{field}` is not a valid integer: {value}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("field `{field}` must be non-zero")]
    ZeroField { field: &'static str },
    #[error("field `{field}` is not valid hex: {value}")]
    InvalidHex { field: &'static str, value: String },
    #[error("malformed payload: {0}")]
    Malformed(String),
}

// ============================================================================
// WIRE SHAPES
// ============================================================================

/// Raw fill request as broadcast over websocket/SSE channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFillRequest {
    /// Origin chain id (decimal or hex string)
    #[serde(rename = "chainId")]
    pub chain_id: String,
    /// Compact message including the nested mandate
    pub compact: RawCompact,
    /// Sponsor signature (64-byte compact hex, `0x`, or absent)
    #[serde(rename = "sponsorSignature")]
    pub sponsor_signature: Option<String>,
    /// Allocator co-signature (64-byte compact hex)
    #[serde(rename = "allocatorSignature")]
    pub allocator_signature: String,
    /// Quote context supplied by the broadcaster
    pub context: RawFillContext,
}

/// Raw compact message fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCompact {
    pub arbiter: String,
    pub sponsor: String,
    pub nonce: String,
    pub expires: String,
    pub id: String,
    pub amount: String,
    pub mandate: RawMandate,
}

/// Raw mandate (destination-chain terms).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMandate {
    #[serde(rename = "chainId")]
    pub chain_id: u64,
    pub tribunal: String,
    pub recipient: String,
    pub expires: String,
    pub token: String,
    #[serde(rename = "minimumAmount")]
    pub minimum_amount: String,
    #[serde(rename = "baselinePriorityFee")]
    pub baseline_priority_fee: String,
    #[serde(rename = "scalingFactor")]
    pub scaling_factor: String,
    pub salt: String,
}

/// Raw quote context attached to a broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFillContext {
    pub dispensation: String,
    #[serde(rename = "dispensationUSD")]
    pub dispensation_usd: String,
    #[serde(rename = "spotOutputAmount")]
    pub spot_output_amount: Option<String>,
    #[serde(rename = "quoteOutputAmountDirect")]
    pub quote_output_amount_direct: Option<String>,
    #[serde(rename = "quoteOutputAmountNet")]
    pub quote_output_amount_net: Option<String>,
    #[serde(rename = "slippageBips")]
    pub slippage_bips: Option<u32>,
    #[serde(rename = "witnessTypeString")]
    pub witness_type_string: Option<String>,
    #[serde(rename = "witnessHash")]
    pub witness_hash: Option<String>,
}

// ============================================================================
// VALIDATED RECORDS
// ============================================================================

/// A validated cross-chain fill request. Immutable after parsing; the only
/// later mutation is attaching the derived claim hash exactly once.
#[derive(Debug, Clone)]
pub struct FillRequest {
    /// Origin chain id
    pub chain_id: u64,
    pub compact: Compact,
    /// Sponsor authorization; `None` means fall back to on-chain registration
    pub sponsor_signature: Option<Vec<u8>>,
    pub allocator_signature: Vec<u8>,
    pub context: FillContext,
    /// Derived claim hash, attached before signature verification
    pub claim_hash: Option<H256>,
}

#[derive(Debug, Clone)]
pub struct Compact {
    pub arbiter: H160,
    pub sponsor: H160,
    pub nonce: U256,
    pub expires: U256,
    pub id: U256,
    pub amount: U256,
    pub mandate: Mandate,
}

#[derive(Debug, Clone)]
pub struct Mandate {
    pub chain_id: u64,
    pub tribunal: H160,
    pub recipient: H160,
    pub expires: U256,
    pub token: H160,
    pub minimum_amount: U256,
    pub baseline_priority_fee: U256,
    pub scaling_factor: U256,
    pub salt: H256,
}

#[derive(Debug, Clone)]
pub struct FillContext {
    /// Dispensation owed to the solver, in origin-chain native units
    pub dispensation: U256,
    /// Dispensation expressed in USD (logging and conversion only)
    pub dispensation_usd: f64,
    pub spot_output_amount: Option<U256>,
    pub quote_output_amount_net: Option<U256>,
}

impl FillRequest {
    /// Parses and validates a raw broadcast payload.
    ///
    /// Mandatory integer fields must be present and non-zero; addresses must
    /// be 20-byte hex; the salt must be a 32-byte hash. A payload that fails
    /// any check is rejected before it reaches the rule pipeline.
    pub fn parse(raw: &RawFillRequest) -> Result<Self, IntentError> {
        let chain_id = parse_u256("chainId", &raw.chain_id)?;
        if chain_id > U256::from(u64::MAX) {
            return Err(IntentError::InvalidNumber {
                field: "chainId",
                value: raw.chain_id.clone(),
            });
        }

        let compact = Compact::parse(&raw.compact)?;

        let sponsor_signature = match raw.sponsor_signature.as_deref() {
            None | Some("") | Some("0x") => None,
            Some(sig) => Some(parse_hex_bytes("sponsorSignature", sig)?),
        };
        let allocator_signature =
            parse_hex_bytes("allocatorSignature", &raw.allocator_signature)?;
        if allocator_signature.is_empty() {
            return Err(IntentError::MissingField("allocatorSignature"));
        }

        Ok(Self {
            chain_id: chain_id.as_u64(),
            compact,
            sponsor_signature,
            allocator_signature,
            context: FillContext::parse(&raw.context)?,
            claim_hash: None,
        })
    }

    /// Attaches the derived claim hash. Must be called exactly once, before
    /// signature verification.
    pub fn attach_claim_hash(&mut self, hash: H256) {
        debug_assert!(self.claim_hash.is_none(), "claim hash already attached");
        self.claim_hash = Some(hash);
    }
}

impl Compact {
    fn parse(raw: &RawCompact) -> Result<Self, IntentError> {
        Ok(Self {
            arbiter: parse_address("compact.arbiter", &raw.arbiter)?,
            sponsor: parse_address("compact.sponsor", &raw.sponsor)?,
            nonce: parse_u256("compact.nonce", &raw.nonce)?,
            expires: parse_nonzero_u256("compact.expires", &raw.expires)?,
            id: parse_nonzero_u256("compact.id", &raw.id)?,
            amount: parse_nonzero_u256("compact.amount", &raw.amount)?,
            mandate: Mandate::parse(&raw.mandate)?,
        })
    }

    /// Token the claim pays out in: the low 160 bits of the lock id.
    pub fn claim_token(&self) -> H160 {
        let mut buf = [0u8; 32];
        self.id.to_big_endian(&mut buf);
        H160::from_slice(&buf[12..32])
    }

    /// Allocator identifier packed into the lock id above the token bits.
    pub fn allocator_id(&self) -> U256 {
        let mask = (U256::one() << ALLOCATOR_ID_BITS) - U256::one();
        (self.id >> TOKEN_BITS) & mask
    }
}

impl Mandate {
    fn parse(raw: &RawMandate) -> Result<Self, IntentError> {
        if raw.chain_id == 0 {
            return Err(IntentError::ZeroField {
                field: "mandate.chainId",
            });
        }
        Ok(Self {
            chain_id: raw.chain_id,
            tribunal: parse_address("mandate.tribunal", &raw.tribunal)?,
            recipient: parse_address("mandate.recipient", &raw.recipient)?,
            expires: parse_nonzero_u256("mandate.expires", &raw.expires)?,
            token: parse_address("mandate.token", &raw.token)?,
            minimum_amount: parse_nonzero_u256("mandate.minimumAmount", &raw.minimum_amount)?,
            baseline_priority_fee: parse_u256(
                "mandate.baselinePriorityFee",
                &raw.baseline_priority_fee,
            )?,
            scaling_factor: parse_u256("mandate.scalingFactor", &raw.scaling_factor)?,
            salt: parse_h256("mandate.salt", &raw.salt)?,
        })
    }
}

impl FillContext {
    fn parse(raw: &RawFillContext) -> Result<Self, IntentError> {
        let usd_str = raw.dispensation_usd.trim_start_matches('$');
        let dispensation_usd =
            usd_str
                .parse::<f64>()
                .map_err(|_| IntentError::InvalidNumber {
                    field: "context.dispensationUSD",
                    value: raw.dispensation_usd.clone(),
                })?;

        let spot_output_amount = raw
            .spot_output_amount
            .as_deref()
            .map(|s| parse_u256("context.spotOutputAmount", s))
            .transpose()?;
        let quote_output_amount_net = raw
            .quote_output_amount_net
            .as_deref()
            .map(|s| parse_u256("context.quoteOutputAmountNet", s))
            .transpose()?;

        Ok(Self {
            dispensation: parse_u256("context.dispensation", &raw.dispensation)?,
            dispensation_usd,
            spot_output_amount,
            quote_output_amount_net,
        })
    }
}

// ============================================================================
// PARSE HELPERS
// ============================================================================

/// Parses a decimal or `0x`-prefixed hex string into a `U256`.
pub fn parse_u256(field: &'static str, value: &str) -> Result<U256, IntentError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(IntentError::MissingField(field));
    }
    if let Some(hex_part) = value.strip_prefix("0x") {
        if hex_part.is_empty() || hex_part.len() > 64 {
            return Err(IntentError::InvalidNumber {
                field,
                value: value.to_string(),
            });
        }
        // Pad to an even number of nibbles before decoding
        let padded = if hex_part.len() % 2 == 1 {
            format!("0{hex_part}")
        } else {
            hex_part.to_string()
        };
        let bytes = hex::decode(&padded).map_err(|_| IntentError::InvalidNumber {
            field,
            value: value.to_string(),
        })?;
        Ok(U256::from_big_endian(&bytes))
    } else {
        U256::from_dec_str(value).map_err(|_| IntentError::InvalidNumber {
            field,
            value: value.to_string(),
        })
    }
}

fn parse_nonzero_u256(field: &'static str, value: &str) -> Result<U256, IntentError> {
    let parsed = parse_u256(field, value)?;
    if parsed.is_zero() {
        return Err(IntentError::ZeroField { field });
    }
    Ok(parsed)
}

/// Parses a 20-byte `0x`-prefixed address. Case is irrelevant after parsing
/// since `H160` stores raw bytes.
pub fn parse_address(field: &'static str, value: &str) -> Result<H160, IntentError> {
    let hex_part = value
        .strip_prefix("0x")
        .ok_or_else(|| IntentError::InvalidAddress {
            field,
            value: value.to_string(),
        })?;
    let bytes = hex::decode(hex_part).map_err(|_| IntentError::InvalidAddress {
        field,
        value: value.to_string(),
    })?;
    if bytes.len() != 20 {
        return Err(IntentError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
    Ok(H160::from_slice(&bytes))
}

/// Parses a 32-byte `0x`-prefixed hash.
pub fn parse_h256(field: &'static str, value: &str) -> Result<H256, IntentError> {
    let hex_part = value
        .strip_prefix("0x")
        .ok_or_else(|| IntentError::InvalidHash {
            field,
            value: value.to_string(),
        })?;
    let bytes = hex::decode(hex_part).map_err(|_| IntentError::InvalidHash {
        field,
        value: value.to_string(),
    })?;
    if bytes.len() != 32 {
        return Err(IntentError::InvalidHash {
            field,
            value: value.to_string(),
        });
    }
    Ok(H256::from_slice(&bytes))
}

fn parse_hex_bytes(field: &'static str, value: &str) -> Result<Vec<u8>, IntentError> {
    let hex_part = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(hex_part).map_err(|_| IntentError::InvalidHex {
        field,
        value: value.to_string(),
    })
}
