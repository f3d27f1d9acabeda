//! Gasless Crypto Library
//!
//! Signing utilities for the gasless swap pipeline:
//! - the [`AccountSigner`] capability every smart account signer implements
//! - EIP-712 permit messages for the paymaster's token pull
//! - user operation hashing for entry point v0.7 and v0.8
//! - EIP-7702 delegation authorization digests

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip712::{EIP712Domain, Eip712, TypedData};
use ethers::types::{Address, Bytes, Signature, H256, U256};
use ethers::utils::rlp::RlpStream;
use gasless_types::{DelegationAuthorization, EntryPointVersion, UserOperation};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha3::{Digest, Keccak256};

/// EIP-7702 authorization magic prefix
pub const DELEGATION_MAGIC: u8 = 0x05;

/// `PackedUserOperation` type string hashed by entry point v0.8
pub const PACKED_USER_OPERATION_TYPE: &str = "PackedUserOperation(address sender,uint256 nonce,bytes initCode,bytes callData,bytes32 accountGasLimits,uint256 preVerificationGas,bytes32 gasFees,bytes paymasterAndData)";

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Signing request rejected: {0}")]
    Rejected(String),
    #[error("Signer does not support {0}")]
    Unsupported(String),
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Signing error: {0}")]
    SigningError(String),
    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// Signing capability of a smart account.
///
/// Implementations may prompt a user (wallet UI, hardware device) and every
/// method may fail with [`CryptoError::Rejected`].
#[async_trait]
pub trait AccountSigner: Send + Sync {
    /// Smart account (user operation sender) address
    fn address(&self) -> Address;

    /// Key whose ECDSA signatures the account accepts
    fn owner(&self) -> Address {
        self.address()
    }

    /// Sign an arbitrary message with the EIP-191 personal prefix
    async fn sign_message(&self, message: &[u8]) -> Result<Signature, CryptoError>;

    /// Sign an EIP-712 payload
    async fn sign_typed_data(&self, payload: &TypedData) -> Result<Signature, CryptoError>;

    /// Sign an EIP-7702 delegation of this account to `implementation`
    async fn sign_delegation(
        &self,
        chain_id: u64,
        nonce: u64,
        implementation: Address,
    ) -> Result<DelegationAuthorization, CryptoError> {
        let _ = (chain_id, nonce, implementation);
        Err(CryptoError::Unsupported("delegation authorization".to_string()))
    }
}

/// Signer backed by a local private key.
///
/// By default the account is the key's own address (an EOA upgraded through
/// EIP-7702). [`LocalAccountSigner::with_account`] binds the key to a
/// separately deployed smart account instead.
#[derive(Clone)]
pub struct LocalAccountSigner {
    wallet: LocalWallet,
    account: Address,
}

impl LocalAccountSigner {
    pub fn new(wallet: LocalWallet) -> Self {
        let account = wallet.address();
        Self { wallet, account }
    }

    /// Parse a hex private key (with or without `0x`)
    pub fn from_private_key(private_key: &str) -> Result<Self, CryptoError> {
        let wallet = private_key
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self::new(wallet))
    }

    pub fn random() -> Self {
        Self::new(LocalWallet::new(&mut rand::thread_rng()))
    }

    pub fn with_account(mut self, account: Address) -> Self {
        self.account = account;
        self
    }
}

impl std::fmt::Debug for LocalAccountSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAccountSigner")
            .field("account", &self.account)
            .field("owner", &self.wallet.address())
            .finish()
    }
}

#[async_trait]
impl AccountSigner for LocalAccountSigner {
    fn address(&self) -> Address {
        self.account
    }

    fn owner(&self) -> Address {
        self.wallet.address()
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature, CryptoError> {
        self.wallet
            .sign_message(message)
            .await
            .map_err(|e| CryptoError::SigningError(e.to_string()))
    }

    async fn sign_typed_data(&self, payload: &TypedData) -> Result<Signature, CryptoError> {
        self.wallet
            .sign_typed_data(payload)
            .await
            .map_err(|e| CryptoError::SigningError(e.to_string()))
    }

    async fn sign_delegation(
        &self,
        chain_id: u64,
        nonce: u64,
        implementation: Address,
    ) -> Result<DelegationAuthorization, CryptoError> {
        let digest = delegation_digest(chain_id, implementation, nonce);
        let (signature, recovery_id): (EcdsaSignature, RecoveryId) = self
            .wallet
            .signer()
            .sign_prehash_recoverable(&digest)
            .map_err(|e| CryptoError::SigningError(e.to_string()))?;

        let rs = signature.to_bytes();
        Ok(DelegationAuthorization {
            address: implementation,
            chain_id: chain_id.into(),
            nonce: nonce.into(),
            r: U256::from_big_endian(&rs[..32]),
            s: U256::from_big_endian(&rs[32..]),
            y_parity: u64::from(recovery_id.to_byte()).into(),
        })
    }
}

/// EIP-712 domain of a permit-capable token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl PermitDomain {
    pub fn eip712(&self) -> EIP712Domain {
        EIP712Domain {
            name: Some(self.name.clone()),
            version: Some(self.version.clone()),
            chain_id: Some(self.chain_id.into()),
            verifying_contract: Some(self.verifying_contract),
            salt: None,
        }
    }
}

/// EIP-2612 `Permit` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitMessage {
    pub owner: Address,
    pub spender: Address,
    pub value: U256,
    pub nonce: U256,
    pub deadline: U256,
}

impl PermitMessage {
    /// Typed-data payload, the same shape `eth_signTypedData_v4` receives
    pub fn typed_data(&self, domain: &PermitDomain) -> Result<TypedData, CryptoError> {
        let payload = json!({
            "types": {
                "EIP712Domain": [
                    { "name": "name", "type": "string" },
                    { "name": "version", "type": "string" },
                    { "name": "chainId", "type": "uint256" },
                    { "name": "verifyingContract", "type": "address" }
                ],
                "Permit": [
                    { "name": "owner", "type": "address" },
                    { "name": "spender", "type": "address" },
                    { "name": "value", "type": "uint256" },
                    { "name": "nonce", "type": "uint256" },
                    { "name": "deadline", "type": "uint256" }
                ]
            },
            "primaryType": "Permit",
            "domain": {
                "name": domain.name,
                "version": domain.version,
                "chainId": domain.chain_id,
                "verifyingContract": domain.verifying_contract
            },
            "message": {
                "owner": self.owner,
                "spender": self.spender,
                "value": self.value.to_string(),
                "nonce": self.nonce.to_string(),
                "deadline": self.deadline.to_string()
            }
        });

        serde_json::from_value(payload).map_err(|e| CryptoError::Encoding(e.to_string()))
    }

    pub fn digest(&self, domain: &PermitDomain) -> Result<[u8; 32], CryptoError> {
        self.typed_data(domain)?
            .encode_eip712()
            .map_err(|e| CryptoError::Encoding(e.to_string()))
    }
}

/// Check that `signature` over `payload` was produced by `expected`
pub fn verify_typed_signature(
    payload: &TypedData,
    signature: &Signature,
    expected: Address,
) -> Result<(), CryptoError> {
    let digest = payload
        .encode_eip712()
        .map_err(|e| CryptoError::Encoding(e.to_string()))?;
    let recovered = signature
        .recover(H256::from(digest))
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;

    if recovered != expected {
        return Err(CryptoError::InvalidSignature(format!(
            "recovered {:?}, expected {:?}",
            recovered, expected
        )));
    }
    Ok(())
}

/// `keccak256(0x05 ‖ rlp([chain_id, implementation, nonce]))`
pub fn delegation_digest(chain_id: u64, implementation: Address, nonce: u64) -> [u8; 32] {
    let mut rlp = RlpStream::new_list(3);
    rlp.append(&chain_id);
    rlp.append(&implementation);
    rlp.append(&nonce);

    let mut preimage = vec![DELEGATION_MAGIC];
    preimage.extend_from_slice(&rlp.out());
    keccak(&preimage)
}

/// Address that signed a delegation authorization
pub fn recover_delegation_signer(auth: &DelegationAuthorization) -> Result<Address, CryptoError> {
    if auth.chain_id > U256::from(u64::MAX) {
        return Err(CryptoError::Encoding(format!(
            "authorization chain id {} exceeds u64",
            auth.chain_id
        )));
    }

    let digest = delegation_digest(auth.chain_id.low_u64(), auth.address, auth.nonce.as_u64());
    let signature = Signature {
        r: auth.r,
        s: auth.s,
        v: auth.y_parity.as_u64() + 27,
    };
    signature
        .recover(H256::from(digest))
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))
}

/// `initCode` as hashed by the entry point: a 7702 marker is replaced by the
/// delegate the account points to
fn hashed_init_code(op: &UserOperation) -> Vec<u8> {
    match &op.authorization {
        Some(auth) => auth.address.as_bytes().to_vec(),
        None => op.init_code().to_vec(),
    }
}

fn erc4337_domain(entry_point: Address, chain_id: u64) -> EIP712Domain {
    EIP712Domain {
        name: Some("ERC4337".to_string()),
        version: Some("1".to_string()),
        chain_id: Some(chain_id.into()),
        verifying_contract: Some(entry_point),
        salt: None,
    }
}

/// `PackedUserOperation` typed data signed by v0.8 accounts
pub fn user_operation_typed_data(
    op: &UserOperation,
    entry_point: Address,
    chain_id: u64,
) -> Result<TypedData, CryptoError> {
    let payload = json!({
        "types": {
            "EIP712Domain": [
                { "name": "name", "type": "string" },
                { "name": "version", "type": "string" },
                { "name": "chainId", "type": "uint256" },
                { "name": "verifyingContract", "type": "address" }
            ],
            "PackedUserOperation": [
                { "name": "sender", "type": "address" },
                { "name": "nonce", "type": "uint256" },
                { "name": "initCode", "type": "bytes" },
                { "name": "callData", "type": "bytes" },
                { "name": "accountGasLimits", "type": "bytes32" },
                { "name": "preVerificationGas", "type": "uint256" },
                { "name": "gasFees", "type": "bytes32" },
                { "name": "paymasterAndData", "type": "bytes" }
            ]
        },
        "primaryType": "PackedUserOperation",
        "domain": {
            "name": "ERC4337",
            "version": "1",
            "chainId": chain_id,
            "verifyingContract": entry_point
        },
        "message": {
            "sender": op.sender,
            "nonce": op.nonce.to_string(),
            "initCode": Bytes::from(hashed_init_code(op)),
            "callData": op.call_data,
            "accountGasLimits": Bytes::from(op.account_gas_limits().to_vec()),
            "preVerificationGas": op.gas_limits.pre_verification_gas.to_string(),
            "gasFees": Bytes::from(op.gas_fees().to_vec()),
            "paymasterAndData": op.paymaster.packed()
        }
    });

    serde_json::from_value(payload).map_err(|e| CryptoError::Encoding(e.to_string()))
}

/// ABI encoding of the packed operation fields, dynamic fields pre-hashed
fn encode_packed_fields(op: &UserOperation) -> Vec<Token> {
    vec![
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::FixedBytes(keccak(&hashed_init_code(op)).to_vec()),
        Token::FixedBytes(keccak(&op.call_data).to_vec()),
        Token::FixedBytes(op.account_gas_limits().to_vec()),
        Token::Uint(op.gas_limits.pre_verification_gas),
        Token::FixedBytes(op.gas_fees().to_vec()),
        Token::FixedBytes(keccak(&op.paymaster.packed()).to_vec()),
    ]
}

/// User operation hash as computed by the entry point's `getUserOpHash`
pub fn user_operation_hash(
    op: &UserOperation,
    entry_point: Address,
    chain_id: u64,
    version: EntryPointVersion,
) -> H256 {
    match version {
        EntryPointVersion::V07 => {
            let inner = keccak(&encode(&encode_packed_fields(op)));
            H256::from(keccak(&encode(&[
                Token::FixedBytes(inner.to_vec()),
                Token::Address(entry_point),
                Token::Uint(chain_id.into()),
            ])))
        }
        EntryPointVersion::V08 => {
            let mut fields = vec![Token::FixedBytes(
                keccak(PACKED_USER_OPERATION_TYPE.as_bytes()).to_vec(),
            )];
            fields.extend(encode_packed_fields(op));
            let struct_hash = keccak(&encode(&fields));
            let separator = erc4337_domain(entry_point, chain_id).separator();

            let mut preimage = vec![0x19, 0x01];
            preimage.extend_from_slice(&separator);
            preimage.extend_from_slice(&struct_hash);
            H256::from(keccak(&preimage))
        }
    }
}

/// Produce the account signature over a user operation.
///
/// v0.8 accounts sign the `PackedUserOperation` typed data; v0.7 accounts sign
/// the operation hash as a personal message.
pub async fn sign_user_operation(
    signer: &dyn AccountSigner,
    op: &UserOperation,
    entry_point: Address,
    chain_id: u64,
    version: EntryPointVersion,
) -> Result<Bytes, CryptoError> {
    let signature = match version {
        EntryPointVersion::V08 => {
            let payload = user_operation_typed_data(op, entry_point, chain_id)?;
            signer.sign_typed_data(&payload).await?
        }
        EntryPointVersion::V07 => {
            let hash = user_operation_hash(op, entry_point, chain_id, version);
            signer.sign_message(hash.as_bytes()).await?
        }
    };
    Ok(signature.to_vec().into())
}

pub fn keccak(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}
