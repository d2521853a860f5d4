//! Fill pipeline
//!
//! Drives one intent from raw payload to a submitted fill or a reasoned
//! rejection: resolve origin/target info, shape the payload into a validated
//! record (rules operate on the parsed intent, so shaping happens before
//! they run), evaluate the ordered rule list with first-failure
//! short-circuit, then quote and submit. Nothing in here panics on a bad
//! intent; every exit is an `Outcome`.

use async_trait::async_trait;
use ethereum_types::H256;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::chains::{ChainClients, Contracts, TxRequest};
use crate::config::SolverConfig;
use crate::intent::FillRequest;
use crate::nonce::NonceSequencer;
use crate::price::PriceService;
use crate::settlement::{QuoteError, SettlementCalculator, SettlementError};

/// Shared context handed to every rule and to the fill step.
pub struct SolverServices {
    pub config: Arc<SolverConfig>,
    pub chains: Arc<ChainClients>,
    pub contracts: Arc<Contracts>,
    pub price: Arc<PriceService>,
    pub nonces: Arc<NonceSequencer>,
    pub settlement: Arc<SettlementCalculator>,
}

/// Stages an intent moves through. Used for structured logging; the data
/// flow itself is the sequence of `Result`s below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillState {
    Discovered,
    OriginInfoResolved,
    TargetInfoResolved,
    Prepared,
    RulesEvaluated,
    Filled,
    Rejected,
    Failed,
}

/// Outcome of a single validation rule: a note on success, a reason on
/// failure. The pipeline stops at the first failure.
pub type RuleResult = Result<String, String>;

/// Boxed future returned by a rule body.
pub type RuleFuture = Pin<Box<dyn Future<Output = RuleResult> + Send>>;

/// A named, ordered validation step. Rules receive the shared request and
/// context by handle, so their futures own everything they touch.
pub struct Rule {
    name: &'static str,
    run: Box<dyn Fn(Arc<FillRequest>, Arc<SolverServices>) -> RuleFuture + Send + Sync>,
}

impl Rule {
    pub fn new<F>(name: &'static str, run: F) -> Self
    where
        F: Fn(Arc<FillRequest>, Arc<SolverServices>) -> RuleFuture + Send + Sync + 'static,
    {
        Self {
            name,
            run: Box::new(run),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn evaluate(
        &self,
        request: Arc<FillRequest>,
        services: Arc<SolverServices>,
    ) -> RuleResult {
        (self.run)(request, services).await
    }
}

/// Why an intent was rejected without funds moving.
#[derive(Debug, Error)]
pub enum RejectReason {
    #[error("failed to prepare intent: {0}")]
    Prepare(String),
    #[error("rule {rule} failed: {reason}")]
    Rule { rule: &'static str, reason: String },
    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

/// Terminal result of evaluating one intent.
#[derive(Debug)]
pub enum Outcome {
    Filled {
        tx_hash: H256,
        explorer_url: Option<String>,
    },
    Rejected {
        reason: RejectReason,
    },
    Failed {
        error: anyhow::Error,
    },
}

/// One protocol variant: how to shape its raw payload and which base rules
/// it runs. Resolution hooks default to no-ops for protocols without an
/// origin-chain leg.
#[async_trait]
pub trait IntentProtocol: Send + Sync {
    fn name(&self) -> &'static str;

    /// Shapes and validates the raw payload into a fill request with the
    /// claim hash attached.
    fn prepare(&self, raw: &serde_json::Value) -> Result<FillRequest, String>;

    async fn resolve_origin_info(
        &self,
        _request: &serde_json::Value,
        _services: &SolverServices,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn resolve_target_info(
        &self,
        _request: &serde_json::Value,
        _services: &SolverServices,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Protocol base rules, in evaluation order.
    fn base_rules(&self) -> Vec<Rule>;
}

/// Evaluates raw intents to outcomes. Event sources hold one of these.
#[async_trait]
pub trait Filler: Send + Sync {
    async fn evaluate(&self, raw: serde_json::Value) -> Outcome;
}

/// Shared pipeline driver composing a protocol with the rule list.
pub struct FillPipeline<P: IntentProtocol> {
    protocol: P,
    services: Arc<SolverServices>,
    rules: Vec<Rule>,
}

impl<P: IntentProtocol> FillPipeline<P> {
    /// Builds the pipeline: protocol base rules (unless configuration opts
    /// out) followed by caller-supplied custom rules.
    pub fn new(protocol: P, services: Arc<SolverServices>, custom_rules: Vec<Rule>) -> Self {
        let mut rules = if services.config.rules.keep_base_rules {
            protocol.base_rules()
        } else {
            Vec::new()
        };
        rules.extend(custom_rules);
        Self {
            protocol,
            services,
            rules,
        }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    async fn run_rules(&self, request: &Arc<FillRequest>) -> Result<(), RejectReason> {
        for rule in &self.rules {
            match rule
                .evaluate(Arc::clone(request), Arc::clone(&self.services))
                .await
            {
                Ok(note) => {
                    debug!(rule = rule.name(), note = %note, "rule passed");
                }
                Err(reason) => {
                    return Err(RejectReason::Rule {
                        rule: rule.name(),
                        reason,
                    });
                }
            }
        }
        Ok(())
    }

    /// Quote, reserve a nonce, build and submit the fill transaction.
    async fn fill(&self, request: &FillRequest) -> Result<Outcome, anyhow::Error> {
        let quote = match self.services.settlement.quote(request).await {
            Ok(quote) => quote,
            Err(QuoteError::Rejected(reason)) => {
                return Ok(Outcome::Rejected {
                    reason: RejectReason::Settlement(reason),
                })
            }
            Err(QuoteError::Chain(error)) => return Err(error),
        };

        let mandate = &request.compact.mandate;
        let client = self.services.chains.get(mandate.chain_id)?;
        let nonce = self.services.nonces.next(mandate.chain_id).await?;
        let data = self
            .services
            .contracts
            .encode_fill(request, client.signer_address());

        debug!(
            settlement_amount = %quote.settlement_amount,
            fill_value = %quote.fill_value,
            gas_limit = %quote.gas_limit,
            nonce,
            dispensation_usd = quote.dispensation_usd,
            gas_cost_usd = quote.gas_cost_usd,
            "submitting fill transaction"
        );

        let receipt = client
            .send_transaction(TxRequest {
                to: mandate.tribunal,
                value: quote.fill_value,
                data,
                gas_limit: Some(quote.gas_limit),
                max_fee_per_gas: Some(quote.max_fee_per_gas),
                max_priority_fee_per_gas: Some(quote.max_priority_fee_per_gas),
                nonce: Some(nonce),
            })
            .await?;

        if !receipt.success {
            anyhow::bail!(
                "fill transaction 0x{:x} reverted on chain {}",
                receipt.transaction_hash,
                mandate.chain_id
            );
        }

        let explorer_url = self
            .services
            .config
            .chain(mandate.chain_id)
            .and_then(|c| c.explorer_tx_url(&format!("0x{:x}", receipt.transaction_hash)));

        info!(
            tx_hash = %format!("0x{:x}", receipt.transaction_hash),
            block_number = receipt.block_number,
            explorer = explorer_url.as_deref().unwrap_or("-"),
            "transaction submitted"
        );

        Ok(Outcome::Filled {
            tx_hash: receipt.transaction_hash,
            explorer_url,
        })
    }
}

#[async_trait]
impl<P: IntentProtocol> Filler for FillPipeline<P> {
    async fn evaluate(&self, raw: serde_json::Value) -> Outcome {
        debug!(protocol = self.protocol.name(), state = ?FillState::Discovered, "intent received");

        if let Err(e) = self.protocol.resolve_origin_info(&raw, &self.services).await {
            error!(protocol = self.protocol.name(), error = %e, "failed to resolve origin info");
            return Outcome::Failed { error: e };
        }
        debug!(state = ?FillState::OriginInfoResolved, "origin info resolved");

        if let Err(e) = self.protocol.resolve_target_info(&raw, &self.services).await {
            error!(protocol = self.protocol.name(), error = %e, "failed to resolve target info");
            return Outcome::Failed { error: e };
        }
        debug!(state = ?FillState::TargetInfoResolved, "target info resolved");

        let request = match self.protocol.prepare(&raw) {
            Ok(request) => Arc::new(request),
            Err(reason) => {
                let reason = RejectReason::Prepare(reason);
                info!(protocol = self.protocol.name(), reason = %reason, "intent rejected");
                return Outcome::Rejected { reason };
            }
        };
        let intent_id = format!("{}-{}", self.protocol.name(), request.compact.id);
        debug!(intent = %intent_id, state = ?FillState::Prepared, "intent prepared");

        if let Err(reason) = self.run_rules(&request).await {
            info!(intent = %intent_id, reason = %reason, "intent rejected");
            return Outcome::Rejected { reason };
        }
        debug!(intent = %intent_id, state = ?FillState::RulesEvaluated, "all rules passed");

        info!(intent = %intent_id, "filling intent");
        match self.fill(&request).await {
            Ok(outcome) => {
                if let Outcome::Rejected { reason } = &outcome {
                    info!(intent = %intent_id, reason = %reason, "intent rejected");
                }
                outcome
            }
            Err(error) => {
                error!(intent = %intent_id, error = %error, "fill failed");
                Outcome::Failed { error }
            }
        }
    }
}
