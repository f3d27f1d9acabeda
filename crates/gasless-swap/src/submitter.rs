//! Bundler submission

use ethers::types::{Address, H256};
use gasless_chain::RelayClient;
use gasless_types::UserOperation;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::SwapError;

/// Sends signed operations to the relay. Never retries: a rejected operation
/// has to be rebuilt with a fresh permit and deadline.
#[derive(Clone)]
pub struct BundlerSubmitter {
    relay: Arc<dyn RelayClient>,
    entry_point: Address,
}

impl BundlerSubmitter {
    pub fn new(relay: Arc<dyn RelayClient>, entry_point: Address) -> Self {
        Self { relay, entry_point }
    }

    pub async fn submit(&self, op: &UserOperation) -> Result<H256, SwapError> {
        if op.signature.is_empty() {
            return Err(SwapError::SubmissionRejected("operation is not signed".into()));
        }

        debug!(sender = ?op.sender, nonce = %op.nonce, "submitting user operation");
        let user_op_hash = self
            .relay
            .send_user_operation(&op.to_rpc(), self.entry_point)
            .await
            .map_err(|e| SwapError::SubmissionRejected(e.reason()))?;

        info!(?user_op_hash, sender = ?op.sender, "user operation accepted by bundler");
        Ok(user_op_hash)
    }
}
