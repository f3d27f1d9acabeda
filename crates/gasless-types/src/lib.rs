//! Gasless Swap Types
//!
//! Data structures shared by the gasless swap pipeline: swap intents, pool
//! identity, permit and paymaster payloads, user operations and the relay's
//! JSON-RPC wire formats.

use ethers::types::{Address, Bytes, H256, U256, U64};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Factory marker telling the entry point the sender is an EIP-7702 delegated account
pub const EIP7702_FACTORY_MARKER: [u8; 2] = [0x77, 0x02];

/// Swap direction, relative to the canonical (sorted) pool key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    /// Sell `currency0`, receive `currency1`
    ZeroForOne,
    /// Sell `currency1`, receive `currency0`
    OneForZero,
}

impl Direction {
    /// Router `zeroForOne` flag
    pub fn is_zero_for_one(self) -> bool {
        matches!(self, Direction::ZeroForOne)
    }

    /// Direction that sells `token_in` into the pool, if the token belongs to it
    pub fn for_input(pool_key: &PoolKey, token_in: Address) -> Option<Self> {
        if token_in == pool_key.currency0 {
            Some(Direction::ZeroForOne)
        } else if token_in == pool_key.currency1 {
            Some(Direction::OneForZero)
        } else {
            None
        }
    }

    pub fn reversed(self) -> Self {
        match self {
            Direction::ZeroForOne => Direction::OneForZero,
            Direction::OneForZero => Direction::ZeroForOne,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ZeroForOne => write!(f, "zero-for-one"),
            Direction::OneForZero => write!(f, "one-for-zero"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zero-for-one" | "zeroforone" | "0to1" => Ok(Direction::ZeroForOne),
            "one-for-zero" | "oneforzero" | "1to0" => Ok(Direction::OneForZero),
            other => Err(format!("unknown swap direction: {}", other)),
        }
    }
}

/// Entry point contract version the relay targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryPointVersion {
    V07,
    V08,
}

/// A user's swap request. Immutable once created.
///
/// `amount_out_minimum` is always caller-supplied. Zero is accepted but means
/// the swap has no slippage protection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapIntent {
    /// Exact input amount in token base units
    pub amount_in: U256,
    /// Minimum acceptable output in token base units
    pub amount_out_minimum: U256,
    pub direction: Direction,
    /// Receiver of the output tokens
    pub recipient: Address,
}

impl SwapIntent {
    pub fn new(
        amount_in: U256,
        amount_out_minimum: U256,
        direction: Direction,
        recipient: Address,
    ) -> Self {
        Self {
            amount_in,
            amount_out_minimum,
            direction,
            recipient,
        }
    }

    pub fn has_slippage_protection(&self) -> bool {
        !self.amount_out_minimum.is_zero()
    }
}

/// Static pool description. The two tokens may be given in any order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    pub token_a: Address,
    pub token_b: Address,
    /// Fee in hundredths of a bip (uint24)
    pub fee: u32,
    /// Tick spacing (int24)
    pub tick_spacing: i32,
    pub hooks: Address,
}

/// Canonical pool identity with `currency0 < currency1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolKey {
    pub currency0: Address,
    pub currency1: Address,
    pub fee: u32,
    pub tick_spacing: i32,
    pub hooks: Address,
}

impl PoolKey {
    /// Token sold for the given direction
    pub fn input_token(&self, direction: Direction) -> Address {
        match direction {
            Direction::ZeroForOne => self.currency0,
            Direction::OneForZero => self.currency1,
        }
    }
}

/// Token metadata needed for permits and amount formatting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    /// EIP-712 domain name
    pub name: String,
    /// EIP-712 domain version
    pub version: String,
    pub decimals: u8,
}

/// Signed token-spend authorization (EIP-2612 permit).
///
/// Valid for exactly one on-chain use: the token consumes `nonce` when the
/// paymaster redeems it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitAuthorization {
    pub token_address: Address,
    pub owner: Address,
    pub spender: Address,
    pub amount: U256,
    pub nonce: U256,
    pub deadline: U256,
    /// 65-byte `r ‖ s ‖ v` signature
    pub signature: Bytes,
}

/// Fee-sponsorship payload consumed by the relay and the paymaster contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterData {
    pub paymaster: Address,
    /// `[mode:1][token:20][amount:32][signature:65]`
    pub paymaster_data: Bytes,
    pub paymaster_verification_gas_limit: U256,
    pub paymaster_post_op_gas_limit: U256,
    /// No further negotiation round is expected from the relay
    pub is_final: bool,
}

impl PaymasterData {
    /// `paymasterAndData` as packed by the entry point:
    /// `paymaster ‖ uint128(verificationGas) ‖ uint128(postOpGas) ‖ data`
    pub fn packed(&self) -> Bytes {
        let mut out = Vec::with_capacity(52 + self.paymaster_data.len());
        out.extend_from_slice(self.paymaster.as_bytes());
        out.extend_from_slice(&u128_word(self.paymaster_verification_gas_limit));
        out.extend_from_slice(&u128_word(self.paymaster_post_op_gas_limit));
        out.extend_from_slice(&self.paymaster_data);
        out.into()
    }
}

/// Fee parameters for one relay price tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeSuggestion {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Result of `pimlico_getUserOperationGasPrice`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasPriceTiers {
    pub slow: FeeSuggestion,
    pub standard: FeeSuggestion,
    pub fast: FeeSuggestion,
}

/// Account-side gas limits of a user operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasLimits {
    pub pre_verification_gas: U256,
    pub verification_gas_limit: U256,
    pub call_gas_limit: U256,
}

/// A call executed by the smart account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub to: Address,
    pub value: U256,
    /// ABI selector followed by the encoded arguments
    pub data: Bytes,
}

impl Call {
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.data.get(..4).map(|s| [s[0], s[1], s[2], s[3]])
    }

    pub fn args(&self) -> &[u8] {
        self.data.get(4..).unwrap_or_default()
    }
}

/// Signed EIP-7702 delegation, serialized as the relay's `eip7702Auth` object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationAuthorization {
    /// Implementation the account delegates to
    pub address: Address,
    pub chain_id: U256,
    pub nonce: U64,
    pub r: U256,
    pub s: U256,
    pub y_parity: U64,
}

/// A fully assembled user operation.
///
/// Built once per pipeline attempt; the signature is attached last and the
/// value is never modified after submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub calls: Vec<Call>,
    /// Account calldata wrapping `calls`
    pub call_data: Bytes,
    pub gas_limits: GasLimits,
    pub fees: FeeSuggestion,
    pub paymaster: PaymasterData,
    pub authorization: Option<DelegationAuthorization>,
    /// Router deadline (unix seconds) carried by the swap call
    pub deadline: u64,
    pub signature: Bytes,
}

impl UserOperation {
    pub fn with_signature(mut self, signature: Bytes) -> Self {
        self.signature = signature;
        self
    }

    pub fn with_gas_limits(mut self, gas_limits: GasLimits) -> Self {
        self.gas_limits = gas_limits;
        self
    }

    /// Factory field: the 7702 marker when a delegation is attached
    pub fn factory(&self) -> Option<Bytes> {
        self.authorization
            .as_ref()
            .map(|_| Bytes::from(EIP7702_FACTORY_MARKER.to_vec()))
    }

    /// `initCode` as the entry point packs it. For a 7702 delegation the
    /// marker is right-padded to a full address.
    pub fn init_code(&self) -> Bytes {
        match self.authorization {
            Some(_) => {
                let mut marker = [0u8; 20];
                marker[..2].copy_from_slice(&EIP7702_FACTORY_MARKER);
                Bytes::from(marker.to_vec())
            }
            None => Bytes::default(),
        }
    }

    /// `verificationGasLimit << 128 | callGasLimit`
    pub fn account_gas_limits(&self) -> [u8; 32] {
        pack_u128_pair(
            self.gas_limits.verification_gas_limit,
            self.gas_limits.call_gas_limit,
        )
    }

    /// `maxPriorityFeePerGas << 128 | maxFeePerGas`
    pub fn gas_fees(&self) -> [u8; 32] {
        pack_u128_pair(
            self.fees.max_priority_fee_per_gas,
            self.fees.max_fee_per_gas,
        )
    }

    /// JSON-RPC representation sent to the bundler
    pub fn to_rpc(&self) -> RpcUserOperation {
        RpcUserOperation {
            sender: self.sender,
            nonce: self.nonce,
            factory: self.factory(),
            factory_data: self.authorization.as_ref().map(|_| Bytes::default()),
            call_data: self.call_data.clone(),
            call_gas_limit: self.gas_limits.call_gas_limit,
            verification_gas_limit: self.gas_limits.verification_gas_limit,
            pre_verification_gas: self.gas_limits.pre_verification_gas,
            max_fee_per_gas: self.fees.max_fee_per_gas,
            max_priority_fee_per_gas: self.fees.max_priority_fee_per_gas,
            paymaster: self.paymaster.paymaster,
            paymaster_verification_gas_limit: self.paymaster.paymaster_verification_gas_limit,
            paymaster_post_op_gas_limit: self.paymaster.paymaster_post_op_gas_limit,
            paymaster_data: self.paymaster.paymaster_data.clone(),
            signature: self.signature.clone(),
            eip7702_auth: self.authorization.clone(),
        }
    }
}

/// Unpacked user operation in the relay's JSON-RPC format (entry point v0.7+)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcUserOperation {
    pub sender: Address,
    pub nonce: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_data: Option<Bytes>,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster: Address,
    pub paymaster_verification_gas_limit: U256,
    pub paymaster_post_op_gas_limit: U256,
    pub paymaster_data: Bytes,
    pub signature: Bytes,
    #[serde(
        rename = "eip7702Auth",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub eip7702_auth: Option<DelegationAuthorization>,
}

/// Transaction that included a user operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionReceipt {
    pub transaction_hash: H256,
    #[serde(default)]
    pub block_number: Option<U64>,
}

/// Result of `eth_getUserOperationReceipt` once the operation is included
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    pub success: bool,
    /// Revert reason reported by the bundler, if any
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub actual_gas_cost: Option<U256>,
    #[serde(default)]
    pub actual_gas_used: Option<U256>,
    pub receipt: InclusionReceipt,
}

/// Terminal success of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResult {
    pub user_op_hash: H256,
    pub transaction_hash: H256,
    pub success: bool,
}

impl From<&UserOperationReceipt> for SwapResult {
    fn from(receipt: &UserOperationReceipt) -> Self {
        Self {
            user_op_hash: receipt.user_op_hash,
            transaction_hash: receipt.receipt.transaction_hash,
            success: receipt.success,
        }
    }
}

/// Low 128 bits of `value` as 16 big-endian bytes
fn u128_word(value: U256) -> [u8; 16] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    let mut out = [0u8; 16];
    out.copy_from_slice(&word[16..]);
    out
}

fn pack_u128_pair(high: U256, low: U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[..16].copy_from_slice(&u128_word(high));
    out[16..].copy_from_slice(&u128_word(low));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_operation(authorization: Option<DelegationAuthorization>) -> UserOperation {
        UserOperation {
            sender: Address::repeat_byte(0x11),
            nonce: U256::zero(),
            calls: vec![],
            call_data: Bytes::from(vec![0xb6, 0x1d, 0x27, 0xf6]),
            gas_limits: GasLimits {
                pre_verification_gas: 50_000.into(),
                verification_gas_limit: 200_000.into(),
                call_gas_limit: 300_000.into(),
            },
            fees: FeeSuggestion {
                max_fee_per_gas: 100.into(),
                max_priority_fee_per_gas: 2.into(),
            },
            paymaster: PaymasterData {
                paymaster: Address::repeat_byte(0x22),
                paymaster_data: Bytes::from(vec![0u8; 118]),
                paymaster_verification_gas_limit: 300_000.into(),
                paymaster_post_op_gas_limit: 20_000.into(),
                is_final: true,
            },
            authorization,
            deadline: 1_700_003_600,
            signature: Bytes::default(),
        }
    }

    #[test]
    fn test_direction_for_input() {
        let key = PoolKey {
            currency0: Address::repeat_byte(0x01),
            currency1: Address::repeat_byte(0x02),
            fee: 5000,
            tick_spacing: 100,
            hooks: Address::zero(),
        };

        assert_eq!(
            Direction::for_input(&key, key.currency0),
            Some(Direction::ZeroForOne)
        );
        assert_eq!(
            Direction::for_input(&key, key.currency1),
            Some(Direction::OneForZero)
        );
        assert_eq!(Direction::for_input(&key, Address::repeat_byte(0x03)), None);
        assert_eq!(key.input_token(Direction::OneForZero), key.currency1);
        assert_eq!("one-for-zero".parse::<Direction>(), Ok(Direction::OneForZero));
    }

    #[test]
    fn test_packed_gas_words() {
        let op = sample_operation(None);
        let limits = op.account_gas_limits();
        assert_eq!(U256::from_big_endian(&limits[..16]), 200_000.into());
        assert_eq!(U256::from_big_endian(&limits[16..]), 300_000.into());

        let fees = op.gas_fees();
        assert_eq!(U256::from_big_endian(&fees[..16]), 2.into());
        assert_eq!(U256::from_big_endian(&fees[16..]), 100.into());
    }

    #[test]
    fn test_paymaster_and_data_layout() {
        let op = sample_operation(None);
        let packed = op.paymaster.packed();
        assert_eq!(packed.len(), 20 + 16 + 16 + 118);
        assert_eq!(&packed[..20], op.paymaster.paymaster.as_bytes());
        assert_eq!(U256::from_big_endian(&packed[20..36]), 300_000.into());
        assert_eq!(U256::from_big_endian(&packed[36..52]), 20_000.into());
    }

    #[test]
    fn test_rpc_operation_without_delegation() {
        let json = serde_json::to_value(sample_operation(None).to_rpc()).unwrap();
        assert!(json.get("factory").is_none());
        assert!(json.get("eip7702Auth").is_none());
        assert_eq!(json["callGasLimit"], "0x493e0");
        assert_eq!(json["paymasterPostOpGasLimit"], "0x4e20");
    }

    #[test]
    fn test_rpc_operation_with_delegation() {
        let auth = DelegationAuthorization {
            address: Address::repeat_byte(0x33),
            chain_id: 421614u64.into(),
            nonce: 7u64.into(),
            r: U256::one(),
            s: U256::from(2),
            y_parity: 1u64.into(),
        };
        let op = sample_operation(Some(auth));
        assert_eq!(op.init_code().len(), 20);
        assert_eq!(&op.init_code()[..2], &EIP7702_FACTORY_MARKER);

        let json = serde_json::to_value(op.to_rpc()).unwrap();
        assert_eq!(json["factory"], "0x7702");
        assert_eq!(json["factoryData"], "0x");
        assert_eq!(json["eip7702Auth"]["yParity"], "0x1");
        assert_eq!(json["eip7702Auth"]["nonce"], "0x7");
    }

    #[test]
    fn test_receipt_deserialization() {
        let raw = serde_json::json!({
            "userOpHash": format!("0x{}", "ab".repeat(32)),
            "entryPoint": "0x4337084d9e255ff0702461cf8895ce9e3b5ff108",
            "success": false,
            "reason": null,
            "actualGasCost": "0x10",
            "receipt": {
                "transactionHash": format!("0x{}", "cd".repeat(32)),
                "blockNumber": "0x2a"
            }
        });

        let receipt: UserOperationReceipt = serde_json::from_value(raw).unwrap();
        assert!(!receipt.success);
        assert_eq!(receipt.reason, None);
        assert_eq!(receipt.receipt.block_number, Some(42u64.into()));

        let result = SwapResult::from(&receipt);
        assert_eq!(result.transaction_hash, H256::repeat_byte(0xcd));
    }
}
