//! Gasless Chain Client Abstraction
//!
//! Provides the two remote collaborators of the swap pipeline:
//! - [`ChainReader`]: read-only contract calls against a node (permit nonces,
//!   token metadata, entry point nonces, account delegation state)
//! - [`RelayClient`]: the ERC-4337 bundler relay (gas prices, gas limits,
//!   submission and receipts)

use async_trait::async_trait;
use ethers::providers::{JsonRpcError, ProviderError, RpcError};
use ethers::types::{Address, H256, U256};
use thiserror::Error;

use gasless_types::{GasLimits, GasPriceTiers, RpcUserOperation, TokenMetadata, UserOperationReceipt};

pub use evm::{BundlerClient, EvmChainReader};

/// Code prefix of an EIP-7702 delegated account: `0xef0100 ‖ implementation`
pub const DELEGATION_CODE_PREFIX: [u8; 3] = [0xef, 0x01, 0x00];

/// Read-only chain access
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Chain id reported by the node
    async fn chain_id(&self) -> Result<u64, ChainError>;

    /// Current EIP-2612 nonce of `owner` on `token`
    async fn permit_nonce(&self, token: Address, owner: Address) -> Result<U256, ChainError>;

    /// ERC-20 `decimals()` of `token`
    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError>;

    /// EIP-712 domain parameters and decimals of `token`
    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, ChainError>;

    /// Entry point nonce of `sender` for the given nonce key
    async fn account_nonce(
        &self,
        entry_point: Address,
        sender: Address,
        key: U256,
    ) -> Result<U256, ChainError>;

    /// Nonce an EIP-7702 authorization for `account` must carry
    async fn delegation_nonce(&self, account: Address) -> Result<u64, ChainError>;

    /// Implementation `account` currently delegates to, if any
    async fn delegated_implementation(&self, account: Address) -> Result<Option<Address>, ChainError>;
}

/// Bundler relay access
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// `pimlico_getUserOperationGasPrice`
    async fn user_operation_gas_price(&self) -> Result<GasPriceTiers, ChainError>;

    /// `eth_estimateUserOperationGas`
    async fn estimate_user_operation_gas(
        &self,
        op: &RpcUserOperation,
        entry_point: Address,
    ) -> Result<GasLimits, ChainError>;

    /// `eth_sendUserOperation`, returns the user operation hash
    async fn send_user_operation(
        &self,
        op: &RpcUserOperation,
        entry_point: Address,
    ) -> Result<H256, ChainError>;

    /// `eth_getUserOperationReceipt`; `None` while the operation is pending
    async fn get_user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>, ChainError>;
}

/// Implementation encoded in an account's code, if it is a 7702 delegation
pub fn parse_delegation_code(code: &[u8]) -> Option<Address> {
    if code.len() == 23 && code[..3] == DELEGATION_CODE_PREFIX {
        Some(Address::from_slice(&code[3..]))
    } else {
        None
    }
}

/// EVM client implementation
pub mod evm {
    use super::*;
    use ethers::abi::{self, ParamType, Token};
    use ethers::providers::{Http, Middleware, Provider};
    use ethers::types::transaction::eip2718::TypedTransaction;
    use ethers::types::{Bytes, TransactionRequest};
    use serde_json::Value;
    use tracing::debug;
    use url::Url;

    /// Selector-prefixed ABI calldata
    pub fn calldata(signature: &str, args: &[Token]) -> Vec<u8> {
        let mut data = ethers::utils::id(signature).to_vec();
        data.extend(abi::encode(args));
        data
    }

    /// Node client for read-only calls over HTTP
    #[derive(Debug, Clone)]
    pub struct EvmChainReader {
        provider: Provider<Http>,
    }

    impl EvmChainReader {
        pub fn new(rpc_url: &str) -> Result<Self, ChainError> {
            let provider = Provider::<Http>::try_from(rpc_url)
                .map_err(|e| ChainError::Config(format!("invalid rpc url {}: {}", rpc_url, e)))?;
            Ok(Self { provider })
        }

        async fn call(
            &self,
            to: Address,
            signature: &str,
            args: &[Token],
            outputs: &[ParamType],
        ) -> Result<Vec<Token>, ChainError> {
            let tx: TypedTransaction = TransactionRequest::new()
                .to(to)
                .data(calldata(signature, args))
                .into();

            debug!(contract = ?to, %signature, "eth_call");
            let raw: Bytes = self.provider.call(&tx, None).await?;
            abi::decode(outputs, &raw)
                .map_err(|e| ChainError::Contract(format!("{} returned undecodable data: {}", signature, e)))
        }

        async fn call_uint(
            &self,
            to: Address,
            signature: &str,
            args: &[Token],
        ) -> Result<U256, ChainError> {
            let tokens = self.call(to, signature, args, &[ParamType::Uint(256)]).await?;
            tokens
                .into_iter()
                .next()
                .and_then(Token::into_uint)
                .ok_or_else(|| ChainError::Contract(format!("{} returned no uint", signature)))
        }

        async fn call_string(&self, to: Address, signature: &str) -> Result<String, ChainError> {
            let tokens = self.call(to, signature, &[], &[ParamType::String]).await?;
            tokens
                .into_iter()
                .next()
                .and_then(Token::into_string)
                .ok_or_else(|| ChainError::Contract(format!("{} returned no string", signature)))
        }
    }

    #[async_trait]
    impl ChainReader for EvmChainReader {
        async fn chain_id(&self) -> Result<u64, ChainError> {
            Ok(self.provider.get_chainid().await?.as_u64())
        }

        async fn permit_nonce(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
            self.call_uint(token, "nonces(address)", &[Token::Address(owner)])
                .await
        }

        async fn token_decimals(&self, token: Address) -> Result<u8, ChainError> {
            let decimals = self.call_uint(token, "decimals()", &[]).await?;
            if decimals > U256::from(u8::MAX) {
                return Err(ChainError::Contract(format!("decimals out of range: {}", decimals)));
            }
            Ok(decimals.as_u32() as u8)
        }

        async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, ChainError> {
            let (name, version, decimals) = tokio::try_join!(
                self.call_string(token, "name()"),
                self.call_string(token, "version()"),
                self.token_decimals(token),
            )?;

            Ok(TokenMetadata {
                name,
                version,
                decimals,
            })
        }

        async fn account_nonce(
            &self,
            entry_point: Address,
            sender: Address,
            key: U256,
        ) -> Result<U256, ChainError> {
            self.call_uint(
                entry_point,
                "getNonce(address,uint192)",
                &[Token::Address(sender), Token::Uint(key)],
            )
            .await
        }

        async fn delegation_nonce(&self, account: Address) -> Result<u64, ChainError> {
            let count = self.provider.get_transaction_count(account, None).await?;
            if count > U256::from(u64::MAX) {
                return Err(ChainError::Contract(format!("transaction count out of range: {}", count)));
            }
            Ok(count.low_u64())
        }

        async fn delegated_implementation(&self, account: Address) -> Result<Option<Address>, ChainError> {
            let code = self.provider.get_code(account, None).await?;
            Ok(parse_delegation_code(&code))
        }
    }

    /// JSON-RPC client for an ERC-4337 bundler
    #[derive(Debug, Clone)]
    pub struct BundlerClient {
        provider: Provider<Http>,
        endpoint: Url,
    }

    impl BundlerClient {
        pub fn new(bundler_url: &str) -> Result<Self, ChainError> {
            let endpoint = Url::parse(bundler_url)
                .map_err(|e| ChainError::Config(format!("invalid bundler url {}: {}", bundler_url, e)))?;
            let provider = Provider::new(Http::new(endpoint.clone()));
            Ok(Self { provider, endpoint })
        }

        /// `eth_supportedEntryPoints`
        pub async fn supported_entry_points(&self) -> Result<Vec<Address>, ChainError> {
            Ok(self
                .provider
                .request("eth_supportedEntryPoints", Vec::<Value>::new())
                .await?)
        }
    }

    #[async_trait]
    impl RelayClient for BundlerClient {
        async fn user_operation_gas_price(&self) -> Result<GasPriceTiers, ChainError> {
            debug!(endpoint = %self.endpoint, "pimlico_getUserOperationGasPrice");
            Ok(self
                .provider
                .request("pimlico_getUserOperationGasPrice", Vec::<Value>::new())
                .await?)
        }

        async fn estimate_user_operation_gas(
            &self,
            op: &RpcUserOperation,
            entry_point: Address,
        ) -> Result<GasLimits, ChainError> {
            debug!(sender = ?op.sender, "eth_estimateUserOperationGas");
            Ok(self
                .provider
                .request("eth_estimateUserOperationGas", (op, entry_point))
                .await?)
        }

        async fn send_user_operation(
            &self,
            op: &RpcUserOperation,
            entry_point: Address,
        ) -> Result<H256, ChainError> {
            debug!(sender = ?op.sender, nonce = %op.nonce, "eth_sendUserOperation");
            Ok(self
                .provider
                .request("eth_sendUserOperation", (op, entry_point))
                .await?)
        }

        async fn get_user_operation_receipt(
            &self,
            user_op_hash: H256,
        ) -> Result<Option<UserOperationReceipt>, ChainError> {
            Ok(self
                .provider
                .request("eth_getUserOperationReceipt", [user_op_hash])
                .await?)
        }
    }
}

/// Error types
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    /// JSON-RPC error object returned by the remote endpoint
    #[error("Rejected ({code}): {message}")]
    Rejected {
        code: i64,
        message: String,
        data: Option<String>,
    },

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChainError {
    /// Reason text suitable for surfacing to a user
    pub fn reason(&self) -> String {
        match self {
            ChainError::Rejected { message, data: Some(data), .. } => format!("{} ({})", message, data),
            ChainError::Rejected { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<JsonRpcError> for ChainError {
    fn from(err: JsonRpcError) -> Self {
        ChainError::Rejected {
            code: err.code,
            message: err.message,
            data: err.data.map(|d| d.to_string()),
        }
    }
}

impl From<ProviderError> for ChainError {
    fn from(err: ProviderError) -> Self {
        if let Some(response) = err.as_error_response() {
            return response.clone().into();
        }
        match err {
            ProviderError::SerdeJson(e) => ChainError::Serialization(e),
            other => ChainError::Rpc(other.to_string()),
        }
    }
}
