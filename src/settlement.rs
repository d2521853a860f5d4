//! Settlement Calculator
//!
//! Decides how much a fill should pay out and whether the solver can afford
//! it. Gas is estimated twice: once against a buffered simulation value to
//! get a price for sizing the settlement, then again against the real value
//! before submission, so the fill is never under-priced between the two.
//!
//! All balance-gating comparisons are `U256` on-chain units. Floats appear
//! only for USD logging and for converting the 6-decimal stable leg through
//! the native-asset price.

use ethereum_types::{H160, U256, U512};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::chains::{ChainClients, Contracts, TxRequest};
use crate::config::SolverConfig;
use crate::intent::FillRequest;
use crate::price::PriceService;

/// Decimals assumed for the stable settlement token.
const STABLE_DECIMALS_SCALE: f64 = 1e6;

/// Named rejection reasons. Callers must be able to tell these apart, so
/// each failed check gets its own variant.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("origin chain {0} is not supported")]
    UnsupportedOriginChain(u64),
    #[error("destination chain {0} is not supported")]
    UnsupportedDestinationChain(u64),
    #[error("unsupported mandate token 0x{0:x}")]
    UnsupportedMandateToken(H160),
    #[error("no price data available for chain {0}")]
    PriceUnavailable(u64),
    #[error("token balance is less than minimum required settlement amount")]
    TokenBalanceBelowMinimum,
    #[error("token balance is less than simulation settlement amount")]
    TokenBalanceBelowSimulation,
    #[error("native balance is less than simulation value")]
    NativeBalanceBelowSimulationValue,
    #[error("could not get base fee from latest block")]
    MissingBaseFee,
    #[error("fill estimated to be unprofitable after execution costs")]
    Unprofitable,
    #[error("token balance is less than settlement amount")]
    TokenBalanceBelowSettlement,
    #[error("native balance is less than settlement value")]
    NativeBalanceBelowSettlementValue,
    #[error("insufficient native balance: need {required} wei, have {available} wei")]
    NativeBalanceBelowRequired { required: U256, available: U256 },
}

/// Quote failure: either a named rejection or a chain-access error.
#[derive(Debug, Error)]
pub enum QuoteError {
    #[error(transparent)]
    Rejected(#[from] SettlementError),
    #[error(transparent)]
    Chain(#[from] anyhow::Error),
}

/// Transient result of one quote computation. Never persisted.
#[derive(Debug, Clone)]
pub struct SettlementQuote {
    /// Amount paid to the mandate recipient, in settlement token units
    pub settlement_amount: U256,
    /// Native value attached to the fill transaction
    pub fill_value: U256,
    /// Gas limit (second-pass estimate with buffer)
    pub gas_limit: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub buffered_dispensation: U256,
    /// Gas cost in USD, for logging
    pub gas_cost_usd: f64,
    /// Dispensation in USD, for logging
    pub dispensation_usd: f64,
}

/// Stateless quoting service; all state lives behind the injected handles.
pub struct SettlementCalculator {
    chains: Arc<ChainClients>,
    contracts: Arc<Contracts>,
    price: Arc<PriceService>,
    config: Arc<SolverConfig>,
}

impl SettlementCalculator {
    pub fn new(
        chains: Arc<ChainClients>,
        contracts: Arc<Contracts>,
        price: Arc<PriceService>,
        config: Arc<SolverConfig>,
    ) -> Self {
        Self {
            chains,
            contracts,
            price,
            config,
        }
    }

    /// Produces a settlement quote for a verified fill request, or the first
    /// reason it cannot be filled.
    pub async fn quote(&self, request: &FillRequest) -> Result<SettlementQuote, QuoteError> {
        let origin_chain = self
            .config
            .chain(request.chain_id)
            .ok_or(SettlementError::UnsupportedOriginChain(request.chain_id))?;
        let mandate = &request.compact.mandate;
        let mandate_chain = self
            .config
            .chain(mandate.chain_id)
            .ok_or(SettlementError::UnsupportedDestinationChain(
                mandate.chain_id,
            ))?;
        let client = self.chains.get(mandate.chain_id).map_err(QuoteError::Chain)?;
        let solver = client.signer_address();

        if !mandate_chain.supports_token(&mandate.token) {
            return Err(SettlementError::UnsupportedMandateToken(mandate.token).into());
        }

        let native_price = self
            .price
            .price(mandate.chain_id)
            .await
            .map_err(|_| SettlementError::PriceUnavailable(mandate.chain_id))?;
        debug!(chain_id = mandate.chain_id, native_price, "current native asset price");

        let dispensation_usd = request.context.dispensation_usd;
        let buffered_dispensation = scale(request.context.dispensation, 125, 100);
        let minimum_amount = mandate.minimum_amount;
        let simulation_settlement = scale(minimum_amount, 101, 100);

        // Balance checks against the mandate minimum before any estimation
        let token_balance = self
            .contracts
            .token_balance(mandate.chain_id, mandate.token, solver)
            .await
            .map_err(QuoteError::Chain)?;
        if token_balance < minimum_amount {
            return Err(SettlementError::TokenBalanceBelowMinimum.into());
        }
        if token_balance < simulation_settlement {
            return Err(SettlementError::TokenBalanceBelowSimulation.into());
        }

        let mandate_token_is_native = mandate.token == mandate_chain.native_token();
        let simulation_value = if mandate_token_is_native {
            simulation_settlement + buffered_dispensation
        } else {
            buffered_dispensation
        };

        let native_balance = client
            .native_balance(solver)
            .await
            .map_err(QuoteError::Chain)?;
        if native_balance < simulation_value {
            return Err(SettlementError::NativeBalanceBelowSimulationValue.into());
        }

        let base_fee = client
            .latest_base_fee()
            .await
            .map_err(QuoteError::Chain)?
            .ok_or(SettlementError::MissingBaseFee)?;
        let priority_fee = U256::from(mandate_chain.priority_fee_wei);
        let max_fee_per_gas = priority_fee + scale(base_fee, 120, 100);

        let fill_data = self.contracts.encode_fill(request, solver);

        // First pass: estimate against the buffered simulation value
        debug!("performing initial simulation to get gas estimate");
        let estimated_gas = client
            .estimate_gas(&TxRequest {
                to: mandate.tribunal,
                value: simulation_value,
                data: fill_data.clone(),
                max_fee_per_gas: Some(max_fee_per_gas),
                max_priority_fee_per_gas: Some(priority_fee),
                gas_limit: None,
                nonce: None,
            })
            .await
            .map_err(QuoteError::Chain)?;
        let buffered_gas = scale(estimated_gas, 125, 100);
        debug!(%estimated_gas, %buffered_gas, "got gas estimate");

        let gas_cost = max_fee_per_gas.saturating_mul(buffered_gas);
        let gas_cost_usd = wei_to_native(gas_cost) * native_price;
        let execution_cost_wei = gas_cost + buffered_dispensation;
        let execution_cost_usd = gas_cost_usd + dispensation_usd;

        // Settlement sizing: claim amount minus execution costs, converted
        // between native and stable units through the price when the claim
        // and settlement tokens differ in kind
        let claim_token = request.compact.claim_token();
        let claim_is_native = origin_chain.is_native_or_wrapped(&claim_token);
        let settlement_is_native = mandate_chain.is_native_or_wrapped(&mandate.token);

        let (claim_less_costs_wei, claim_less_costs_usd) = if claim_is_native {
            match request.compact.amount.checked_sub(execution_cost_wei) {
                Some(wei) => (wei, wei_to_native(wei) * native_price),
                None => return Err(SettlementError::Unprofitable.into()),
            }
        } else {
            // Stable claim, 6 decimals assumed
            let amount_usd = stable_to_usd(request.compact.amount);
            let usd = amount_usd - execution_cost_usd;
            if usd <= 0.0 {
                return Err(SettlementError::Unprofitable.into());
            }
            (native_to_wei(usd / native_price), usd)
        };

        let settlement_amount = if settlement_is_native {
            claim_less_costs_wei
        } else {
            usd_to_stable(claim_less_costs_usd)
        };
        debug!(%settlement_amount, %minimum_amount, "settlement");

        if settlement_amount <= minimum_amount {
            return Err(SettlementError::Unprofitable.into());
        }
        if token_balance < settlement_amount {
            return Err(SettlementError::TokenBalanceBelowSettlement.into());
        }

        let fill_value = if mandate_token_is_native {
            settlement_amount + buffered_dispensation
        } else {
            buffered_dispensation
        };
        if native_balance < fill_value {
            return Err(SettlementError::NativeBalanceBelowSettlementValue.into());
        }

        // Second pass: re-estimate against the real value before submission
        let final_gas = client
            .estimate_gas(&TxRequest {
                to: mandate.tribunal,
                value: fill_value,
                data: fill_data,
                max_fee_per_gas: Some(max_fee_per_gas),
                max_priority_fee_per_gas: Some(priority_fee),
                gas_limit: None,
                nonce: None,
            })
            .await
            .map_err(QuoteError::Chain)?;
        let gas_limit = scale(final_gas, 125, 100);
        debug!(%final_gas, %gas_limit, "got final gas estimate");

        let required = fill_value + max_fee_per_gas.saturating_mul(gas_limit);
        if native_balance < required {
            return Err(SettlementError::NativeBalanceBelowRequired {
                required,
                available: native_balance,
            }
            .into());
        }

        Ok(SettlementQuote {
            settlement_amount,
            fill_value,
            gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas: priority_fee,
            buffered_dispensation,
            gas_cost_usd,
            dispensation_usd,
        })
    }
}

/// value × num / den without intermediate overflow.
fn scale(value: U256, num: u64, den: u64) -> U256 {
    let wide = value.full_mul(U256::from(num)) / U512::from(den);
    U256::try_from(wide).unwrap_or_else(|_| U256::max_value())
}

/// Wei to whole native units, lossy. Logging and conversion only.
fn wei_to_native(value: U256) -> f64 {
    if value.bits() > 128 {
        return f64::MAX;
    }
    value.as_u128() as f64 / 1e18
}

/// Whole native units to wei. Conversion of the stable leg only.
fn native_to_wei(value: f64) -> U256 {
    if value <= 0.0 {
        return U256::zero();
    }
    U256::from((value * 1e18) as u128)
}

fn stable_to_usd(value: U256) -> f64 {
    if value.bits() > 128 {
        return f64::MAX;
    }
    value.as_u128() as f64 / STABLE_DECIMALS_SCALE
}

fn usd_to_stable(value: f64) -> U256 {
    if value <= 0.0 {
        return U256::zero();
    }
    U256::from((value * STABLE_DECIMALS_SCALE).floor() as u128)
}
