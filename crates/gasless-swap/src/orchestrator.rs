//! Swap Orchestrator
//!
//! Runs one gasless swap attempt end to end:
//!
//! ```text
//! Idle → EncodingPool → SigningPermit → BuildingPaymasterData ┐
//!                     → EstimatingGas ───────────────────────┴→ BuildingOperation
//!      → Submitting → WaitingReceipt → Succeeded | Failed
//! ```
//!
//! Every attempt is independent: nonces, permits and deadlines are recomputed
//! from scratch and nothing is retried implicitly.
//!
//! Delegation is resolved right after the pool key, so a signer that cannot
//! authorize an undelegated account fails before any permit prompt.

use ethers::types::{Address, H256, U256};
use gasless_chain::{ChainReader, RelayClient};
use gasless_crypto::{AccountSigner, CryptoError};
use gasless_types::{DelegationAuthorization, SwapIntent, SwapResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{DelegationMode, NetworkConfig, PipelineConfig};
use crate::encoder::build_pool_key;
use crate::error::{ErrorKind, SwapError};
use crate::gas::GasEstimator;
use crate::paymaster::PaymasterDataBuilder;
use crate::permit::PermitSigner;
use crate::receipt::ReceiptWaiter;
use crate::submitter::BundlerSubmitter;
use crate::user_op::{system_clock, AccountContext, Clock, EntryPoint, UserOperationBuilder};

/// Nonce key used for every operation
const NONCE_KEY: u64 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    EncodingPool,
    SigningPermit,
    BuildingPaymasterData,
    EstimatingGas,
    BuildingOperation,
    Submitting,
    WaitingReceipt { user_op_hash: H256 },
    Succeeded(SwapResult),
    Failed(ErrorKind),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Succeeded(_) | PipelineState::Failed(_))
    }
}

pub struct SwapOrchestrator {
    network: NetworkConfig,
    pipeline: PipelineConfig,
    chain: Arc<dyn ChainReader>,
    relay: Arc<dyn RelayClient>,
    clock: Clock,
    progress: Option<mpsc::UnboundedSender<PipelineState>>,
}

impl SwapOrchestrator {
    pub fn new(
        network: NetworkConfig,
        pipeline: PipelineConfig,
        chain: Arc<dyn ChainReader>,
        relay: Arc<dyn RelayClient>,
    ) -> Result<Self, SwapError> {
        crate::config::SwapConfig {
            network: network.clone(),
            pipeline: pipeline.clone(),
        }
        .validate()?;

        Ok(Self {
            network,
            pipeline,
            chain,
            relay,
            clock: system_clock(),
            progress: None,
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Publish every state transition on `progress`
    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<PipelineState>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Run one attempt.
    ///
    /// Cancellation is honoured between steps. Before submission it aborts
    /// without side effects; afterwards it only stops waiting for the receipt
    /// and the error carries the submitted hash.
    pub async fn execute(
        &self,
        intent: &SwapIntent,
        signer: &dyn AccountSigner,
        cancel: CancellationToken,
    ) -> Result<SwapResult, SwapError> {
        self.transition(signer.address(), PipelineState::Idle);

        match self.run(intent, signer, &cancel).await {
            Ok(result) => {
                info!(
                    user_op_hash = ?result.user_op_hash,
                    transaction_hash = ?result.transaction_hash,
                    "swap succeeded"
                );
                self.transition(signer.address(), PipelineState::Succeeded(result.clone()));
                Ok(result)
            }
            Err(e) => {
                error!(kind = %e.kind(), retryable = e.is_retryable(), "swap failed: {}", e);
                self.transition(signer.address(), PipelineState::Failed(e.kind()));
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        intent: &SwapIntent,
        signer: &dyn AccountSigner,
        cancel: &CancellationToken,
    ) -> Result<SwapResult, SwapError> {
        let account = signer.address();
        let network = &self.network;

        checkpoint(cancel)?;
        self.transition(account, PipelineState::EncodingPool);
        let pool_key = build_pool_key(&network.pool)?;
        let (requires_authorization, authorization) = self.resolve_delegation(signer, cancel).await?;

        let permits = PermitSigner::new(self.chain.clone(), network.chain_id);
        let paymaster_builder = PaymasterDataBuilder::new(
            permits,
            network.paymaster,
            network.fee_token,
            self.pipeline.permit_amount,
        )
        .with_gas_limits(
            self.pipeline.paymaster_verification_gas_limit,
            self.pipeline.paymaster_post_op_gas_limit,
        );
        let gas = GasEstimator::new(self.relay.clone(), network.entry_point);

        checkpoint(cancel)?;
        let sponsorship = async {
            self.transition(account, PipelineState::SigningPermit);
            let built = paymaster_builder.build(signer).await;
            if built.is_ok() {
                self.transition(account, PipelineState::BuildingPaymasterData);
            }
            built
        };
        let fees = async {
            self.transition(account, PipelineState::EstimatingGas);
            cancellable(cancel, gas.estimate_fees()).await
        };
        // The permit prompt runs to completion even when fees are cancelled.
        let (sponsorship, fees) = tokio::join!(sponsorship, fees);
        let (paymaster, permit) = sponsorship?;
        let fees = fees?;
        info!(?account, permit_nonce = %permit.nonce, "permit signed");

        checkpoint(cancel)?;
        self.transition(account, PipelineState::BuildingOperation);
        let nonce = cancellable(cancel, async {
            self.chain
                .account_nonce(network.entry_point, account, U256::from(NONCE_KEY))
                .await
                .map_err(|e| SwapError::NonceFetchFailed(format!("entry point nonce: {}", e)))
        })
        .await?;

        let builder = UserOperationBuilder::new(
            network.router,
            pool_key,
            EntryPoint {
                address: network.entry_point,
                version: network.entry_point_version,
                chain_id: network.chain_id,
            },
            self.pipeline.fallback_gas_limits,
        )
        .with_deadline_window(self.pipeline.deadline_window())
        .with_clock(self.clock.clone());

        let context = AccountContext {
            sender: account,
            nonce,
            requires_authorization,
        };
        let mut op = builder.build(intent, &context, paymaster, fees, authorization)?;
        if self.pipeline.estimate_gas_limits {
            let limits = cancellable(cancel, gas.estimate_limits(&op)).await?;
            op = op.with_gas_limits(limits);
        }
        let op = builder.sign(op, signer).await?;

        checkpoint(cancel)?;
        self.transition(account, PipelineState::Submitting);
        let submitter = BundlerSubmitter::new(self.relay.clone(), network.entry_point);
        let user_op_hash = submitter.submit(&op).await?;

        self.transition(account, PipelineState::WaitingReceipt { user_op_hash });
        let waiter = ReceiptWaiter::new(self.relay.clone(), self.pipeline.poll_interval());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(?user_op_hash, "cancelled while waiting for receipt, operation may still be included");
                Err(SwapError::Cancelled { submitted: Some(user_op_hash) })
            }
            result = waiter.wait(user_op_hash, self.pipeline.receipt_timeout()) => result,
        }
    }

    /// Whether the operation must carry an EIP-7702 authorization, and the
    /// authorization itself. An undelegated account whose signer cannot
    /// authorize fails with `MissingAuthorization`.
    async fn resolve_delegation(
        &self,
        signer: &dyn AccountSigner,
        cancel: &CancellationToken,
    ) -> Result<(bool, Option<DelegationAuthorization>), SwapError> {
        let implementation = match &self.pipeline.delegation {
            DelegationMode::SmartAccount => return Ok((false, None)),
            DelegationMode::Eip7702 { implementation } => *implementation,
        };
        let account = signer.address();

        let current = cancellable(cancel, async {
            self.chain
                .delegated_implementation(account)
                .await
                .map_err(|e| SwapError::NonceFetchFailed(format!("account code: {}", e)))
        })
        .await?;
        if current == Some(implementation) {
            return Ok((false, None));
        }

        let nonce = cancellable(cancel, async {
            self.chain
                .delegation_nonce(account)
                .await
                .map_err(|e| SwapError::NonceFetchFailed(format!("delegation nonce: {}", e)))
        })
        .await?;

        info!(?account, ?implementation, nonce, "requesting delegation authorization");
        match signer
            .sign_delegation(self.network.chain_id, nonce, implementation)
            .await
        {
            Ok(authorization) => Ok((true, Some(authorization))),
            Err(CryptoError::Unsupported(what)) => Err(SwapError::MissingAuthorization(format!(
                "{:?} is not delegated to {:?} and the signer cannot authorize it: {}",
                account, implementation, what
            ))),
            Err(e) => Err(SwapError::signing("delegation", e)),
        }
    }

    fn transition(&self, account: Address, state: PipelineState) {
        info!(?account, ?state, "pipeline state");
        if let Some(progress) = &self.progress {
            // A dropped receiver only means nobody is watching.
            let _ = progress.send(state);
        }
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), SwapError> {
    if cancel.is_cancelled() {
        return Err(SwapError::Cancelled { submitted: None });
    }
    Ok(())
}

/// Run a pre-submission network wait, abandoning it once `cancel` fires
async fn cancellable<T, F>(cancel: &CancellationToken, work: F) -> Result<T, SwapError>
where
    F: Future<Output = Result<T, SwapError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SwapError::Cancelled { submitted: None }),
        result = work => result,
    }
}
