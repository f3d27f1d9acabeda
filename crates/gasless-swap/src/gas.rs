//! Relay gas price and gas limit discovery

use ethers::types::{Address, Bytes};
use gasless_chain::RelayClient;
use gasless_types::{FeeSuggestion, GasLimits, UserOperation};
use std::sync::Arc;
use tracing::debug;

use crate::error::SwapError;

/// Well-formed placeholder signature for simulation
pub fn dummy_signature() -> Bytes {
    let mut signature = [0u8; 65];
    signature[..15].fill(0xff);
    signature[15] = 0xf0;
    signature[32] = 0x7a;
    signature[33..64].fill(0xaa);
    signature[64] = 0x1c;
    Bytes::from(signature.to_vec())
}

#[derive(Clone)]
pub struct GasEstimator {
    relay: Arc<dyn RelayClient>,
    entry_point: Address,
}

impl GasEstimator {
    pub fn new(relay: Arc<dyn RelayClient>, entry_point: Address) -> Self {
        Self { relay, entry_point }
    }

    /// Fee parameters from the relay's "standard" tier
    pub async fn estimate_fees(&self) -> Result<FeeSuggestion, SwapError> {
        let tiers = self
            .relay
            .user_operation_gas_price()
            .await
            .map_err(|e| SwapError::GasEstimationFailed(e.reason()))?;

        let fees = tiers.standard;
        if fees.max_fee_per_gas < fees.max_priority_fee_per_gas {
            return Err(SwapError::GasEstimationFailed(format!(
                "relay quoted priority fee {} above max fee {}",
                fees.max_priority_fee_per_gas, fees.max_fee_per_gas
            )));
        }

        debug!(max_fee = %fees.max_fee_per_gas, priority_fee = %fees.max_priority_fee_per_gas, "gas price");
        Ok(fees)
    }

    /// Account gas limits for `op`, simulated with a placeholder signature
    pub async fn estimate_limits(&self, op: &UserOperation) -> Result<GasLimits, SwapError> {
        let mut rpc = op.to_rpc();
        rpc.signature = dummy_signature();

        let limits = self
            .relay
            .estimate_user_operation_gas(&rpc, self.entry_point)
            .await
            .map_err(|e| SwapError::GasEstimationFailed(e.reason()))?;

        debug!(
            pre_verification = %limits.pre_verification_gas,
            verification = %limits.verification_gas_limit,
            call = %limits.call_gas_limit,
            "gas limits"
        );
        Ok(limits)
    }
}
