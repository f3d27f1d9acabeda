//! Receipt polling

use ethers::types::H256;
use gasless_chain::RelayClient;
use gasless_types::{SwapResult, UserOperationReceipt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::SwapError;

#[derive(Clone)]
pub struct ReceiptWaiter {
    relay: Arc<dyn RelayClient>,
    poll_interval: Duration,
}

impl ReceiptWaiter {
    pub fn new(relay: Arc<dyn RelayClient>, poll_interval: Duration) -> Self {
        Self { relay, poll_interval }
    }

    /// Poll until the operation is included or `timeout` elapses.
    ///
    /// Relay errors while polling are logged and polling continues; only the
    /// timeout bounds the wait.
    pub async fn wait(&self, user_op_hash: H256, timeout: Duration) -> Result<SwapResult, SwapError> {
        let receipt = tokio::time::timeout(timeout, self.poll(user_op_hash))
            .await
            .map_err(|_| SwapError::ConfirmationTimeout {
                user_op_hash,
                waited: timeout,
            })?;

        if !receipt.success {
            return Err(SwapError::ExecutionReverted {
                user_op_hash,
                transaction_hash: receipt.receipt.transaction_hash,
                reason: receipt.reason,
            });
        }
        Ok(SwapResult::from(&receipt))
    }

    async fn poll(&self, user_op_hash: H256) -> UserOperationReceipt {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.relay.get_user_operation_receipt(user_op_hash).await {
                Ok(Some(receipt)) => return receipt,
                Ok(None) => debug!(?user_op_hash, attempts, "receipt pending"),
                Err(e) => warn!(?user_op_hash, attempts, "receipt query failed: {}", e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
