//! Intent authentication
//!
//! Recovers secp256k1 signers over the domain-prefixed claim hash and checks
//! them against the sponsor and allocator. A sponsor may authorize either by
//! signature or by an active on-chain registration; the allocator signature
//! is always required. Every failure mode carries its own reason so callers
//! can tell a sponsor problem from an allocator problem from RPC trouble.

use async_trait::async_trait;
use ethereum_types::{H160, H256, U256};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SolverConfig;
use crate::crypto::hash::{compact_typehash, keccak256};
use crate::intent::FillRequest;

/// Result of a registration-status query against the registry contract.
#[derive(Debug, Clone)]
pub struct RegistrationStatus {
    pub is_active: bool,
    pub expires: U256,
}

/// Read-only probe for on-chain sponsor registrations.
#[async_trait]
pub trait RegistrationProbe: Send + Sync {
    async fn registration_status(
        &self,
        chain_id: u64,
        sponsor: H160,
        claim_hash: H256,
        typehash: H256,
    ) -> anyhow::Result<RegistrationStatus>;
}

/// Authentication failures, each leg distinguished.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("claim hash must be derived before signature verification")]
    MissingClaimHash,
    #[error("chain {0} is not configured")]
    UnsupportedChain(u64),
    #[error("malformed sponsor signature: {0}")]
    SponsorSignatureMalformed(String),
    #[error("invalid sponsor signature: recovered {recovered:?}, expected {expected:?}")]
    SponsorSignatureInvalid { expected: H160, recovered: H160 },
    #[error("no sponsor signature provided and no active onchain registration found")]
    NoActiveRegistration,
    #[error("failed to check onchain registration status: {0}")]
    RegistrationCheckFailed(String),
    #[error("no allocator found for id {0}")]
    UnknownAllocator(String),
    #[error("malformed allocator signature: {0}")]
    AllocatorSignatureMalformed(String),
    #[error("invalid allocator signature: recovered {recovered:?}, expected {expected:?}")]
    AllocatorSignatureInvalid { expected: H160, recovered: H160 },
}

/// Successful verification outcome.
#[derive(Debug, Clone)]
pub struct Authentication {
    /// True when the sponsor authorized via on-chain registration rather
    /// than a signature.
    pub onchain_registration: bool,
}

/// Digest a signature commits to: keccak(prefix ‖ claim hash).
pub fn signing_digest(chain_prefix: &[u8], claim_hash: &H256) -> H256 {
    let mut message = Vec::with_capacity(chain_prefix.len() + 32);
    message.extend_from_slice(chain_prefix);
    message.extend_from_slice(claim_hash.as_bytes());
    keccak256(&message)
}

/// Recovers the signing address from a 64-byte compact (r ‖ yParityAndS) or
/// 65-byte (r ‖ s ‖ v) signature over `digest`.
pub fn recover_signer(digest: &H256, signature: &[u8]) -> Result<H160, String> {
    let (rs, y_parity) = match signature.len() {
        64 => {
            let mut rs = [0u8; 64];
            rs.copy_from_slice(signature);
            let y_parity = (rs[32] & 0x80) != 0;
            rs[32] &= 0x7f;
            (rs, y_parity)
        }
        65 => {
            let mut rs = [0u8; 64];
            rs.copy_from_slice(&signature[..64]);
            let y_parity = match signature[64] {
                0 | 27 => false,
                1 | 28 => true,
                v => return Err(format!("invalid recovery byte {v}")),
            };
            (rs, y_parity)
        }
        n => return Err(format!("signature must be 64 or 65 bytes, got {n}")),
    };

    let mut sig =
        EcdsaSignature::from_slice(&rs).map_err(|e| format!("invalid r/s values: {e}"))?;
    let mut recovery_byte = u8::from(y_parity);
    // Recovery requires a low-s signature; flip the parity if we normalize
    if let Some(normalized) = sig.normalize_s() {
        sig = normalized;
        recovery_byte ^= 1;
    }
    let recovery_id =
        RecoveryId::from_byte(recovery_byte).ok_or_else(|| "invalid recovery id".to_string())?;

    let verifying_key = VerifyingKey::recover_from_prehash(digest.as_bytes(), &sig, recovery_id)
        .map_err(|e| format!("recovery failed: {e}"))?;

    // Ethereum address: low 20 bytes of keccak over the uncompressed point
    let point = verifying_key.to_encoded_point(false);
    let hashed = keccak256(&point.as_bytes()[1..]);
    Ok(H160::from_slice(&hashed.as_bytes()[12..]))
}

/// Verifies sponsor and allocator authorization for a fill request.
///
/// The claim hash must already be attached. Sponsor verification prefers a
/// provided signature and falls back to the on-chain registration probe;
/// the allocator signature is checked unconditionally against the allocator
/// resolved from the lock id. Both legs must pass.
pub async fn verify_fill_request(
    request: &FillRequest,
    config: &SolverConfig,
    probe: &dyn RegistrationProbe,
) -> Result<Authentication, AuthError> {
    let claim_hash = request.claim_hash.ok_or(AuthError::MissingClaimHash)?;
    let chain = config
        .chain(request.chain_id)
        .ok_or(AuthError::UnsupportedChain(request.chain_id))?;
    let prefix = chain
        .prefix_bytes()
        .map_err(|_| AuthError::UnsupportedChain(request.chain_id))?;
    let digest = signing_digest(&prefix, &claim_hash);

    debug!(
        chain_id = request.chain_id,
        sponsor = ?request.compact.sponsor,
        arbiter = ?request.compact.arbiter,
        claim_hash = %format!("0x{claim_hash:x}"),
        "verifying fill request"
    );

    // Sponsor leg: signature if present, registration otherwise
    let mut onchain_registration = false;
    match &request.sponsor_signature {
        Some(signature) => {
            let recovered = recover_signer(&digest, signature)
                .map_err(AuthError::SponsorSignatureMalformed)?;
            if recovered != request.compact.sponsor {
                return Err(AuthError::SponsorSignatureInvalid {
                    expected: request.compact.sponsor,
                    recovered,
                });
            }
        }
        None => {
            debug!("no sponsor signature provided, checking onchain registration");
            let status = probe
                .registration_status(
                    request.chain_id,
                    request.compact.sponsor,
                    claim_hash,
                    compact_typehash(),
                )
                .await
                .map_err(|e| {
                    warn!(
                        chain_id = request.chain_id,
                        sponsor = ?request.compact.sponsor,
                        error = %e,
                        "registration status check failed"
                    );
                    AuthError::RegistrationCheckFailed(e.to_string())
                })?;
            if !status.is_active {
                return Err(AuthError::NoActiveRegistration);
            }
            onchain_registration = true;
        }
    }

    // Allocator leg: always required
    let allocator_id = request.compact.allocator_id();
    let (allocator_name, allocator_address) = config
        .allocator_for_id(&allocator_id)
        .ok_or_else(|| AuthError::UnknownAllocator(allocator_id.to_string()))?;
    debug!(allocator = allocator_name, address = ?allocator_address, "resolved allocator");

    let recovered = recover_signer(&digest, &request.allocator_signature)
        .map_err(AuthError::AllocatorSignatureMalformed)?;
    if recovered != allocator_address {
        return Err(AuthError::AllocatorSignatureInvalid {
            expected: allocator_address,
            recovered,
        });
    }

    Ok(Authentication {
        onchain_registration,
    })
}
