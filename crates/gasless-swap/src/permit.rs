//! EIP-2612 permit signing

use ethers::types::{Address, Signature, U256};
use gasless_chain::ChainReader;
use gasless_crypto::{verify_typed_signature, AccountSigner, PermitDomain, PermitMessage};
use gasless_types::PermitAuthorization;
use std::sync::Arc;
use tracing::debug;

use crate::error::SwapError;

/// Signs token-spend permits for the paymaster.
///
/// Every call re-reads the token's permit nonce, so an authorization is never
/// reused across attempts.
#[derive(Clone)]
pub struct PermitSigner {
    chain: Arc<dyn ChainReader>,
    chain_id: u64,
}

impl PermitSigner {
    pub fn new(chain: Arc<dyn ChainReader>, chain_id: u64) -> Self {
        Self { chain, chain_id }
    }

    pub async fn sign_permit(
        &self,
        token: Address,
        signer: &dyn AccountSigner,
        spender: Address,
        amount: U256,
    ) -> Result<PermitAuthorization, SwapError> {
        let owner = signer.address();
        let (nonce, metadata) = tokio::try_join!(
            self.chain.permit_nonce(token, owner),
            self.chain.token_metadata(token),
        )
        .map_err(|e| SwapError::NonceFetchFailed(format!("permit parameters of {:?}: {}", token, e)))?;

        debug!(?token, ?owner, %nonce, domain = %metadata.name, "signing permit");

        let domain = PermitDomain {
            name: metadata.name,
            version: metadata.version,
            chain_id: self.chain_id,
            verifying_contract: token,
        };
        let message = PermitMessage {
            owner,
            spender,
            value: amount,
            nonce,
            deadline: U256::MAX,
        };
        let payload = message
            .typed_data(&domain)
            .map_err(|e| SwapError::SignatureRejected(e.to_string()))?;

        let signature: Signature = signer
            .sign_typed_data(&payload)
            .await
            .map_err(|e| SwapError::signing("permit", e))?;

        verify_typed_signature(&payload, &signature, signer.owner())
            .map_err(|e| SwapError::SignatureRejected(format!("permit: {}", e)))?;

        Ok(PermitAuthorization {
            token_address: token,
            owner,
            spender,
            amount,
            nonce,
            deadline: message.deadline,
            signature: signature.to_vec().into(),
        })
    }
}
