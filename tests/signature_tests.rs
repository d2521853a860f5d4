//! Signature verification tests
//!
//! Recovery against reference vectors, the sponsor-or-registration
//! fallback, and the requirement that sponsor and allocator failures are
//! reported as distinct reasons.

mod helpers;

use compact_solver::config::SolverConfig;
use compact_solver::crypto::signature::{recover_signer, signing_digest};
use compact_solver::crypto::{derive_claim_hash, verify_fill_request, AuthError};
use compact_solver::intent::{parse_address, FillRequest, RawFillRequest};
use helpers::*;

fn prepared_request() -> FillRequest {
    let raw: RawFillRequest = serde_json::from_value(reference_request_json()).unwrap();
    let mut request = FillRequest::parse(&raw).unwrap();
    let hash = derive_claim_hash(&request.compact);
    request.attach_claim_hash(hash);
    request
}

fn origin_prefix(config: &SolverConfig) -> Vec<u8> {
    config.chain(ORIGIN_CHAIN).unwrap().prefix_bytes().unwrap()
}

/// What is tested: both the 64-byte compact and 65-byte signature encodings
/// recover the sponsor address from the reference digest.
/// Why: broadcasters send either form; both must resolve to the same signer.
#[test]
fn recovers_sponsor_from_both_encodings() {
    let config = test_config();
    let digest = signing_digest(&origin_prefix(&config), &h256(CLAIM_HASH));
    let sponsor = parse_address("t", SPONSOR).unwrap();

    let sig64 = hex::decode(SPONSOR_SIG64.strip_prefix("0x").unwrap()).unwrap();
    assert_eq!(recover_signer(&digest, &sig64).unwrap(), sponsor);

    let sig65 = hex::decode(SPONSOR_SIG65.strip_prefix("0x").unwrap()).unwrap();
    assert_eq!(recover_signer(&digest, &sig65).unwrap(), sponsor);
}

/// What is tested: a malformed signature length is an error, not a panic.
/// Why: signature bytes come straight off the wire.
#[test]
fn rejects_bad_signature_length() {
    let digest = h256(CLAIM_HASH);
    assert!(recover_signer(&digest, &[0u8; 63]).is_err());
    assert!(recover_signer(&digest, &[0u8; 66]).is_err());
}

/// What is tested: a fully signed reference request verifies, with the
/// registration flag reporting the offchain path.
/// Why: the happy path of §sponsor-signature plus allocator co-signature.
#[tokio::test]
async fn verifies_reference_request() {
    let harness = harness().await;
    let request = prepared_request();
    let auth = verify_fill_request(
        &request,
        &harness.services.config,
        harness.services.contracts.as_ref(),
    )
    .await
    .unwrap();
    assert!(!auth.onchain_registration);
}

/// What is tested: a single flipped bit in the claim hash makes sponsor
/// verification fail with an authentication error, never a false accept.
/// Why: the digest binds the signature to the exact intent contents.
#[tokio::test]
async fn tampered_claim_hash_is_rejected() {
    let harness = harness().await;
    let mut request = prepared_request();
    let mut tampered = request.claim_hash.unwrap().to_fixed_bytes();
    tampered[31] ^= 0x01;
    request.claim_hash = Some(tampered.into());

    let err = verify_fill_request(
        &request,
        &harness.services.config,
        harness.services.contracts.as_ref(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AuthError::SponsorSignatureInvalid { .. }));
}

/// What is tested: an allocator signature that recovers to the wrong
/// address fails with an allocator-specific reason.
/// Why: callers must be able to distinguish sponsor failures from
/// allocator failures.
#[tokio::test]
async fn wrong_allocator_signature_is_distinguished() {
    let harness = harness().await;
    let mut request = prepared_request();
    // The sponsor's signature is valid for the digest but recovers to the
    // sponsor, not the allocator
    request.allocator_signature =
        hex::decode(SPONSOR_SIG64.strip_prefix("0x").unwrap()).unwrap();

    let err = verify_fill_request(
        &request,
        &harness.services.config,
        harness.services.contracts.as_ref(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AuthError::AllocatorSignatureInvalid { .. }));
}

/// What is tested: with no sponsor signature, an active onchain
/// registration authorizes the intent.
/// Why: sponsors may register claims onchain instead of signing each one.
#[tokio::test]
async fn missing_sponsor_signature_falls_back_to_registration() {
    let mut origin = MockChainClient::new(ORIGIN_CHAIN);
    origin.registration_active = true;
    let harness = harness_with(origin, MockChainClient::new(DEST_CHAIN), test_config()).await;

    let mut request = prepared_request();
    request.sponsor_signature = None;

    let auth = verify_fill_request(
        &request,
        &harness.services.config,
        harness.services.contracts.as_ref(),
    )
    .await
    .unwrap();
    assert!(auth.onchain_registration);
}

/// What is tested: no signature and no active registration is rejected
/// with its own reason.
/// Why: silence is not authorization.
#[tokio::test]
async fn inactive_registration_is_rejected() {
    let harness = harness().await;
    let mut request = prepared_request();
    request.sponsor_signature = None;

    let err = verify_fill_request(
        &request,
        &harness.services.config,
        harness.services.contracts.as_ref(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AuthError::NoActiveRegistration));
}

/// What is tested: a transport failure during the registration probe is
/// reported as a check failure, distinct from an inactive registration.
/// Why: operators must be able to tell RPC trouble from a bad intent.
#[tokio::test]
async fn registration_probe_failure_is_distinguished() {
    let origin = MockChainClient::new(ORIGIN_CHAIN);
    origin
        .fail_calls
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let harness = harness_with(origin, MockChainClient::new(DEST_CHAIN), test_config()).await;

    let mut request = prepared_request();
    request.sponsor_signature = None;

    let err = verify_fill_request(
        &request,
        &harness.services.config,
        harness.services.contracts.as_ref(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AuthError::RegistrationCheckFailed(_)));
}

/// What is tested: an allocator id with no table entry is rejected by name.
/// Why: funds must never move on the word of an unknown allocator.
#[tokio::test]
async fn unknown_allocator_is_rejected() {
    let mut config = test_config();
    config.allocators.clear();
    let harness = harness_with(
        MockChainClient::new(ORIGIN_CHAIN),
        MockChainClient::new(DEST_CHAIN),
        config,
    )
    .await;

    let request = prepared_request();
    let err = verify_fill_request(
        &request,
        &harness.services.config,
        harness.services.contracts.as_ref(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AuthError::UnknownAllocator(_)));
}

/// What is tested: verification without an attached claim hash is refused.
/// Why: the hash is attached exactly once before verification; verifying
/// without it would check a signature against nothing.
#[tokio::test]
async fn missing_claim_hash_is_refused() {
    let harness = harness().await;
    let raw: RawFillRequest = serde_json::from_value(reference_request_json()).unwrap();
    let request = FillRequest::parse(&raw).unwrap();

    let err = verify_fill_request(
        &request,
        &harness.services.config,
        harness.services.contracts.as_ref(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AuthError::MissingClaimHash));
}
