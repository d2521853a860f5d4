//! Typed contract access
//!
//! The handful of contract reads and the fill calldata the solver needs,
//! expressed over the `ChainClient` boundary with the word-level encoder.

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethereum_types::{H160, H256, U256};
use std::sync::Arc;

use super::abi::{self, Token};
use super::ChainClients;
use crate::config::SolverConfig;
use crate::crypto::signature::{RegistrationProbe, RegistrationStatus};
use crate::intent::FillRequest;

const FILL_SIGNATURE: &str = "fill((uint256,(address,address,uint256,uint256,uint256,uint256),bytes,bytes),(address,uint256,address,uint256,uint256,uint256,bytes32),address)";
const FILLED_SIGNATURE: &str = "filled(bytes32)";
const NONCE_CONSUMED_SIGNATURE: &str = "hasConsumedAllocatorNonce(uint256,address)";
const REGISTRATION_SIGNATURE: &str = "getRegistrationStatus(address,bytes32,bytes32)";
const BALANCE_OF_SIGNATURE: &str = "balanceOf(address)";

/// Length of the zero-filled placeholder used when no sponsor signature is
/// attached (the contract treats it as "check registration instead").
const EMPTY_SIGNATURE_LEN: usize = 64;

/// Contract call layer shared across rules, settlement, and the fill step.
pub struct Contracts {
    chains: Arc<ChainClients>,
    config: Arc<SolverConfig>,
}

impl Contracts {
    pub fn new(chains: Arc<ChainClients>, config: Arc<SolverConfig>) -> Self {
        Self { chains, config }
    }

    /// Whether the allocator nonce of a compact has already been consumed on
    /// the origin chain.
    pub async fn has_consumed_allocator_nonce(
        &self,
        chain_id: u64,
        nonce: U256,
        allocator: H160,
    ) -> Result<bool> {
        let chain = self
            .config
            .chain(chain_id)
            .ok_or_else(|| anyhow::anyhow!("chain {} is not configured", chain_id))?;
        let client = self.chains.get(chain_id)?;
        let data = abi::encode_call(
            NONCE_CONSUMED_SIGNATURE,
            &[Token::Uint(nonce), Token::Address(allocator)],
        );
        let ret = client
            .call(chain.the_compact_address(), data)
            .await
            .context("hasConsumedAllocatorNonce call failed")?;
        abi::decode_bool(&ret, 0)
    }

    /// Whether a claim hash has already been filled on the destination
    /// tribunal.
    pub async fn is_filled(
        &self,
        chain_id: u64,
        tribunal: H160,
        claim_hash: H256,
    ) -> Result<bool> {
        let client = self.chains.get(chain_id)?;
        let data = abi::encode_call(FILLED_SIGNATURE, &[Token::FixedBytes(claim_hash)]);
        let ret = client
            .call(tribunal, data)
            .await
            .context("filled call failed")?;
        abi::decode_bool(&ret, 0)
    }

    /// ERC-20 balance of an account.
    pub async fn erc20_balance(&self, chain_id: u64, token: H160, owner: H160) -> Result<U256> {
        let client = self.chains.get(chain_id)?;
        let data = abi::encode_call(BALANCE_OF_SIGNATURE, &[Token::Address(owner)]);
        let ret = client
            .call(token, data)
            .await
            .context("balanceOf call failed")?;
        abi::decode_u256(&ret, 0)
    }

    /// Balance of the settlement token: native balance when `token` is the
    /// chain's native asset, ERC-20 balance otherwise.
    pub async fn token_balance(&self, chain_id: u64, token: H160, owner: H160) -> Result<U256> {
        let chain = self
            .config
            .chain(chain_id)
            .ok_or_else(|| anyhow::anyhow!("chain {} is not configured", chain_id))?;
        if token == chain.native_token() {
            self.chains.get(chain_id)?.native_balance(owner).await
        } else {
            self.erc20_balance(chain_id, token, owner).await
        }
    }

    /// Builds the tribunal `fill` calldata for a verified request.
    ///
    /// An absent sponsor signature is encoded as a zero-filled placeholder,
    /// which the tribunal resolves against the sponsor's registration.
    pub fn encode_fill(&self, request: &FillRequest, claimant: H160) -> Vec<u8> {
        let compact = &request.compact;
        let mandate = &compact.mandate;

        let sponsor_signature = request
            .sponsor_signature
            .clone()
            .unwrap_or_else(|| vec![0u8; EMPTY_SIGNATURE_LEN]);

        let claim = Token::Tuple(vec![
            Token::Uint(U256::from(request.chain_id)),
            Token::Tuple(vec![
                Token::Address(compact.arbiter),
                Token::Address(compact.sponsor),
                Token::Uint(compact.nonce),
                Token::Uint(compact.expires),
                Token::Uint(compact.id),
                Token::Uint(compact.amount),
            ]),
            Token::Bytes(sponsor_signature),
            Token::Bytes(request.allocator_signature.clone()),
        ]);

        let mandate_arg = Token::Tuple(vec![
            Token::Address(mandate.recipient),
            Token::Uint(mandate.expires),
            Token::Address(mandate.token),
            Token::Uint(mandate.minimum_amount),
            Token::Uint(mandate.baseline_priority_fee),
            Token::Uint(mandate.scaling_factor),
            Token::FixedBytes(mandate.salt),
        ]);

        abi::encode_call(
            FILL_SIGNATURE,
            &[claim, mandate_arg, Token::Address(claimant)],
        )
    }
}

#[async_trait]
impl RegistrationProbe for Contracts {
    async fn registration_status(
        &self,
        chain_id: u64,
        sponsor: H160,
        claim_hash: H256,
        typehash: H256,
    ) -> Result<RegistrationStatus> {
        let chain = self
            .config
            .chain(chain_id)
            .ok_or_else(|| anyhow::anyhow!("chain {} is not configured", chain_id))?;
        let client = self.chains.get(chain_id)?;
        let data = abi::encode_call(
            REGISTRATION_SIGNATURE,
            &[
                Token::Address(sponsor),
                Token::FixedBytes(claim_hash),
                Token::FixedBytes(typehash),
            ],
        );
        let ret = client
            .call(chain.the_compact_address(), data)
            .await
            .context("getRegistrationStatus call failed")?;
        Ok(RegistrationStatus {
            is_active: abi::decode_bool(&ret, 0)?,
            expires: abi::decode_u256(&ret, 1)?,
        })
    }
}
