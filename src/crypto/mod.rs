//! Claim hashing and signature verification
//!
//! Deterministic claim-hash derivation plus sponsor/allocator authentication.

pub mod hash;
pub mod signature;

pub use hash::{compact_typehash, derive_claim_hash, derive_witness_hash, keccak256};
pub use signature::{
    recover_signer, signing_digest, verify_fill_request, AuthError, Authentication,
    RegistrationProbe, RegistrationStatus,
};
