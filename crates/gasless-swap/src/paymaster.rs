//! Paymaster sponsorship payload

use ethers::types::{Address, Bytes, U256};
use gasless_crypto::AccountSigner;
use gasless_types::{PaymasterData, PermitAuthorization};
use tracing::debug;

use crate::error::SwapError;
use crate::permit::PermitSigner;

/// Paymaster mode byte: pay fees in the permitted ERC-20
pub const PERMIT_MODE: u8 = 0;

/// `[mode:1][token:20][amount:32][signature:65]`
pub fn pack_paymaster_data(mode: u8, token: Address, amount: U256, signature: &[u8]) -> Bytes {
    let mut amount_word = [0u8; 32];
    amount.to_big_endian(&mut amount_word);

    let mut out = Vec::with_capacity(1 + 20 + 32 + signature.len());
    out.push(mode);
    out.extend_from_slice(token.as_bytes());
    out.extend_from_slice(&amount_word);
    out.extend_from_slice(signature);
    out.into()
}

/// Builds the paymaster payload around a fresh permit
#[derive(Clone)]
pub struct PaymasterDataBuilder {
    permits: PermitSigner,
    paymaster: Address,
    token: Address,
    amount: U256,
    verification_gas_limit: U256,
    post_op_gas_limit: U256,
}

impl PaymasterDataBuilder {
    pub fn new(permits: PermitSigner, paymaster: Address, token: Address, amount: U256) -> Self {
        Self {
            permits,
            paymaster,
            token,
            amount,
            verification_gas_limit: U256::from(300_000u64),
            post_op_gas_limit: U256::from(20_000u64),
        }
    }

    pub fn with_gas_limits(mut self, verification: u64, post_op: u64) -> Self {
        self.verification_gas_limit = verification.into();
        self.post_op_gas_limit = post_op.into();
        self
    }

    /// Sign a permit for the paymaster and pack it. The permit is returned
    /// alongside for logging and inspection.
    pub async fn build(
        &self,
        signer: &dyn AccountSigner,
    ) -> Result<(PaymasterData, PermitAuthorization), SwapError> {
        let permit = self
            .permits
            .sign_permit(self.token, signer, self.paymaster, self.amount)
            .await?;

        let paymaster_data = pack_paymaster_data(PERMIT_MODE, self.token, self.amount, &permit.signature);
        debug!(paymaster = ?self.paymaster, bytes = paymaster_data.len(), "paymaster data packed");

        let data = PaymasterData {
            paymaster: self.paymaster,
            paymaster_data,
            paymaster_verification_gas_limit: self.verification_gas_limit,
            paymaster_post_op_gas_limit: self.post_op_gas_limit,
            is_final: true,
        };
        Ok((data, permit))
    }
}
