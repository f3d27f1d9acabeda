//! In-memory chain, relay and signer doubles
#![allow(dead_code)]

use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, Signature, H256, U256};
use gasless_chain::{ChainError, ChainReader, RelayClient};
use gasless_crypto::{AccountSigner, CryptoError, LocalAccountSigner};
use gasless_swap::config::{DelegationMode, NetworkConfig, PipelineConfig};
use gasless_types::{
    FeeSuggestion, GasLimits, GasPriceTiers, InclusionReceipt, RpcUserOperation,
    TokenMetadata, UserOperationReceipt,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Simple7702 implementation the delegating pipeline targets
pub fn implementation() -> Address {
    Address::repeat_byte(0xe6)
}

pub fn network() -> NetworkConfig {
    NetworkConfig::default()
}

/// Smart-account mode, 10 s receipt bound polled every second
pub fn pipeline() -> PipelineConfig {
    PipelineConfig {
        receipt_timeout_ms: 10_000,
        poll_interval_ms: 1_000,
        delegation: DelegationMode::SmartAccount,
        ..PipelineConfig::default()
    }
}

pub fn delegating_pipeline() -> PipelineConfig {
    PipelineConfig {
        delegation: DelegationMode::Eip7702 {
            implementation: implementation(),
        },
        ..pipeline()
    }
}

#[derive(Default)]
struct ChainState {
    permit_nonce: U256,
    permit_nonce_reads: usize,
    account_nonce: U256,
    delegated: Option<Address>,
    transaction_count: u64,
    fail_reads: bool,
    stall_account_nonce: bool,
}

/// Token and entry point state of a single account
#[derive(Default)]
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    /// Consume the current permit, as the paymaster does on inclusion
    pub fn bump_permit_nonce(&self) {
        let mut state = self.state.lock();
        state.permit_nonce += U256::one();
        state.account_nonce += U256::one();
    }

    pub fn permit_nonce(&self) -> U256 {
        self.state.lock().permit_nonce
    }

    pub fn permit_nonce_reads(&self) -> usize {
        self.state.lock().permit_nonce_reads
    }

    pub fn fail_reads(&self) {
        self.state.lock().fail_reads = true;
    }

    pub fn set_delegated(&self, implementation: Option<Address>) {
        self.state.lock().delegated = implementation;
    }

    pub fn set_transaction_count(&self, count: u64) {
        self.state.lock().transaction_count = count;
    }

    /// Entry point nonce reads never answer
    pub fn stall_account_nonce(&self) {
        self.state.lock().stall_account_nonce = true;
    }

    fn check(&self) -> Result<(), ChainError> {
        if self.state.lock().fail_reads {
            return Err(ChainError::Rpc("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(network().chain_id)
    }

    async fn permit_nonce(&self, _token: Address, _owner: Address) -> Result<U256, ChainError> {
        self.check()?;
        let mut state = self.state.lock();
        state.permit_nonce_reads += 1;
        Ok(state.permit_nonce)
    }

    async fn token_decimals(&self, _token: Address) -> Result<u8, ChainError> {
        self.check()?;
        Ok(6)
    }

    async fn token_metadata(&self, _token: Address) -> Result<TokenMetadata, ChainError> {
        self.check()?;
        Ok(TokenMetadata {
            name: "USDC".into(),
            version: "2".into(),
            decimals: 6,
        })
    }

    async fn account_nonce(&self, _entry_point: Address, _sender: Address, _key: U256) -> Result<U256, ChainError> {
        self.check()?;
        let stalled = self.state.lock().stall_account_nonce;
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(self.state.lock().account_nonce)
    }

    async fn delegation_nonce(&self, _account: Address) -> Result<u64, ChainError> {
        self.check()?;
        Ok(self.state.lock().transaction_count)
    }

    async fn delegated_implementation(&self, _account: Address) -> Result<Option<Address>, ChainError> {
        self.check()?;
        Ok(self.state.lock().delegated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptBehavior {
    Included,
    Reverted(Option<String>),
    Pending,
}

struct RelayState {
    rejections: VecDeque<String>,
    receipt: ReceiptBehavior,
    submitted: Vec<RpcUserOperation>,
    accepted: usize,
    estimates: usize,
    fail_gas_price: bool,
    stall_gas_price: bool,
}

/// Bundler that includes accepted operations immediately
pub struct MockRelay {
    chain: Arc<MockChain>,
    state: Mutex<RelayState>,
}

impl MockRelay {
    pub fn new(chain: Arc<MockChain>) -> Self {
        Self {
            chain,
            state: Mutex::new(RelayState {
                rejections: VecDeque::new(),
                receipt: ReceiptBehavior::Included,
                submitted: Vec::new(),
                accepted: 0,
                estimates: 0,
                fail_gas_price: false,
                stall_gas_price: false,
            }),
        }
    }

    pub fn reject_next(&self, reason: &str) {
        self.state.lock().rejections.push_back(reason.to_string());
    }

    pub fn set_receipt(&self, behavior: ReceiptBehavior) {
        self.state.lock().receipt = behavior;
    }

    pub fn fail_gas_price(&self) {
        self.state.lock().fail_gas_price = true;
    }

    /// Gas price requests never answer
    pub fn stall_gas_price(&self) {
        self.state.lock().stall_gas_price = true;
    }

    /// Every operation sent, accepted or not
    pub fn submitted(&self) -> Vec<RpcUserOperation> {
        self.state.lock().submitted.clone()
    }

    pub fn estimates(&self) -> usize {
        self.state.lock().estimates
    }
}

fn tier(max_fee: u64, priority: u64) -> FeeSuggestion {
    FeeSuggestion {
        max_fee_per_gas: max_fee.into(),
        max_priority_fee_per_gas: priority.into(),
    }
}

#[async_trait]
impl RelayClient for MockRelay {
    async fn user_operation_gas_price(&self) -> Result<GasPriceTiers, ChainError> {
        let (fail, stall) = {
            let state = self.state.lock();
            (state.fail_gas_price, state.stall_gas_price)
        };
        if stall {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(ChainError::Rpc("503 Service Unavailable".into()));
        }
        Ok(GasPriceTiers {
            slow: tier(90_000_000, 500_000),
            standard: tier(100_000_000, 1_000_000),
            fast: tier(120_000_000, 2_000_000),
        })
    }

    async fn estimate_user_operation_gas(
        &self,
        _op: &RpcUserOperation,
        _entry_point: Address,
    ) -> Result<GasLimits, ChainError> {
        self.state.lock().estimates += 1;
        Ok(GasLimits {
            pre_verification_gas: 60_000u64.into(),
            verification_gas_limit: 250_000u64.into(),
            call_gas_limit: 180_000u64.into(),
        })
    }

    async fn send_user_operation(&self, op: &RpcUserOperation, _entry_point: Address) -> Result<H256, ChainError> {
        let accepted = {
            let mut state = self.state.lock();
            state.submitted.push(op.clone());
            if let Some(reason) = state.rejections.pop_front() {
                return Err(ChainError::Rejected {
                    code: -32500,
                    message: reason,
                    data: None,
                });
            }
            state.accepted += 1;
            state.accepted
        };

        self.chain.bump_permit_nonce();
        Ok(H256::from_low_u64_be(accepted as u64))
    }

    async fn get_user_operation_receipt(&self, user_op_hash: H256) -> Result<Option<UserOperationReceipt>, ChainError> {
        let behavior = self.state.lock().receipt.clone();
        let (success, reason) = match behavior {
            ReceiptBehavior::Pending => return Ok(None),
            ReceiptBehavior::Included => (true, None),
            ReceiptBehavior::Reverted(reason) => (false, reason),
        };

        Ok(Some(UserOperationReceipt {
            user_op_hash,
            success,
            reason,
            actual_gas_cost: Some(1_000u64.into()),
            actual_gas_used: Some(200_000u64.into()),
            receipt: InclusionReceipt {
                transaction_hash: H256::from_low_u64_be(0x1000 + user_op_hash.to_low_u64_be()),
                block_number: Some(42u64.into()),
            },
        }))
    }
}

/// Declines every signing request
pub struct RejectingSigner {
    address: Address,
}

impl Default for RejectingSigner {
    fn default() -> Self {
        Self {
            address: Address::repeat_byte(0xaa),
        }
    }
}

#[async_trait]
impl AccountSigner for RejectingSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_message(&self, _message: &[u8]) -> Result<Signature, CryptoError> {
        Err(CryptoError::Rejected("user denied message signature".into()))
    }

    async fn sign_typed_data(&self, _payload: &TypedData) -> Result<Signature, CryptoError> {
        Err(CryptoError::Rejected("user denied typed data signature".into()))
    }
}

/// Signs with a real key but reports a different owner
pub struct ImpostorSigner {
    inner: LocalAccountSigner,
}

impl ImpostorSigner {
    pub fn new(inner: LocalAccountSigner) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl AccountSigner for ImpostorSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    fn owner(&self) -> Address {
        Address::repeat_byte(0x99)
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature, CryptoError> {
        self.inner.sign_message(message).await
    }

    async fn sign_typed_data(&self, payload: &TypedData) -> Result<Signature, CryptoError> {
        self.inner.sign_typed_data(payload).await
    }
}

/// Message and typed-data signer without delegation support
pub struct NoDelegationSigner {
    inner: LocalAccountSigner,
}

impl NoDelegationSigner {
    pub fn new(inner: LocalAccountSigner) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl AccountSigner for NoDelegationSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature, CryptoError> {
        self.inner.sign_message(message).await
    }

    async fn sign_typed_data(&self, payload: &TypedData) -> Result<Signature, CryptoError> {
        self.inner.sign_typed_data(payload).await
    }
}

/// Router deadline carried by a submitted `execute(router, 0, swap)` call
pub fn swap_deadline(op: &RpcUserOperation) -> U256 {
    let outer = abi::decode(
        &[ParamType::Address, ParamType::Uint(256), ParamType::Bytes],
        &op.call_data[4..],
    )
    .unwrap();
    let swap = match &outer[2] {
        Token::Bytes(data) => data.clone(),
        other => panic!("unexpected token {:?}", other),
    };

    let params = abi::decode(
        &[
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Bool,
            ParamType::Tuple(vec![
                ParamType::Address,
                ParamType::Address,
                ParamType::Uint(24),
                ParamType::Int(24),
                ParamType::Address,
            ]),
            ParamType::Bytes,
            ParamType::Address,
            ParamType::Uint(256),
        ],
        &swap[4..],
    )
    .unwrap();
    params[6].clone().into_uint().unwrap()
}

/// Permit signature embedded in the paymaster data
pub fn permit_signature(op: &RpcUserOperation) -> Vec<u8> {
    op.paymaster_data[53..].to_vec()
}
