//! Network and pipeline configuration
//!
//! Defaults describe the Arbitrum Sepolia deployment: Circle's USDC as fee
//! token, the gasless router and hook pair, and Pimlico's public bundler.

use ethers::types::{Address, H256, U256};
use gasless_types::{EntryPointVersion, GasLimits, PoolConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

pub const ARBITRUM_SEPOLIA_CHAIN_ID: u64 = 421614;

/// Longest router deadline window accepted, one week
pub const MAX_DEADLINE_WINDOW_SECS: u64 = 7 * 24 * 3600;

pub const ENTRY_POINT_V07: &str = "0x0000000071727De22E5E9d8BAf0edAc6f37da032";
pub const ENTRY_POINT_V08: &str = "0x4337084D9E255Ff0702461CF8895CE9E3b5Ff108";

/// Simple7702Account implementation targeted by delegations
pub const SIMPLE_7702_IMPLEMENTATION: &str = "0xe6Cae83BdE06E4c305530e199D7217f42808555B";

const USDC: &str = "0x75faf114eafb1BDbe2F0316DF893fd58CE46AA4d";
const ROUTER: &str = "0xCD0b7d5ECd5279D946F99d98633E1942893C3573";
const HOOKS: &str = "0x75c4cD5D01368F89E4957e67867275DDEBE740C0";
const PAYMASTER: &str = "0x3BA9A96eE3eFf3A69E2B18886AcF52027EFF8966";
const POOL_TOKEN_0: &str = "0x6d521a93A3B1fEF995026eBD537405EBD4A1E481";
const POOL_TOKEN_1: &str = "0x00571860bB39C639e8aAD55B4E95D36BE228ae11";

/// Public Pimlico endpoint for a chain
pub fn pimlico_bundler_url(chain_id: u64) -> String {
    format!("https://public.pimlico.io/v2/{}/rpc", chain_id)
}

/// Parse one of the address constants above. An unparsable constant yields
/// the zero address, which `validate()` rejects.
fn known(address: &str) -> Address {
    address.parse().unwrap_or_default()
}

/// Chain, contracts and endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkConfig {
    pub chain_id: u64,
    /// Node endpoint for read-only calls
    pub rpc_url: String,
    pub bundler_url: String,
    /// Prefix a transaction hash is appended to
    pub explorer_tx_base: String,
    pub entry_point: Address,
    pub entry_point_version: EntryPointVersion,
    pub router: Address,
    pub paymaster: Address,
    /// Token the paymaster charges fees in
    pub fee_token: Address,
    pub pool: PoolConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            chain_id: ARBITRUM_SEPOLIA_CHAIN_ID,
            rpc_url: "https://sepolia-rollup.arbitrum.io/rpc".to_string(),
            bundler_url: pimlico_bundler_url(ARBITRUM_SEPOLIA_CHAIN_ID),
            explorer_tx_base: "https://sepolia.arbiscan.io/tx/".to_string(),
            entry_point: known(ENTRY_POINT_V08),
            entry_point_version: EntryPointVersion::V08,
            router: known(ROUTER),
            paymaster: known(PAYMASTER),
            fee_token: known(USDC),
            pool: PoolConfig {
                token_a: known(POOL_TOKEN_0),
                token_b: known(POOL_TOKEN_1),
                fee: 5000,
                tick_spacing: 100,
                hooks: known(HOOKS),
            },
        }
    }
}

impl NetworkConfig {
    /// Block explorer link for a transaction
    pub fn explorer_tx_url(&self, transaction_hash: H256) -> String {
        format!("{}{:?}", self.explorer_tx_base, transaction_hash)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain_id == 0 {
            return Err(ConfigError::Invalid("chain_id must be non-zero".into()));
        }
        for (name, url) in [("rpc_url", &self.rpc_url), ("bundler_url", &self.bundler_url)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!("{} must be an http(s) url: {:?}", name, url)));
            }
        }
        for (name, address) in [
            ("entry_point", self.entry_point),
            ("router", self.router),
            ("paymaster", self.paymaster),
            ("fee_token", self.fee_token),
        ] {
            if address.is_zero() {
                return Err(ConfigError::Invalid(format!("{} address is not set", name)));
            }
        }
        Ok(())
    }
}

/// How the sender account is authorized to run smart-account code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum DelegationMode {
    /// The sender is already a deployed smart account
    SmartAccount,
    /// The sender is an EOA delegating to `implementation` via EIP-7702
    Eip7702 { implementation: Address },
}

impl Default for DelegationMode {
    fn default() -> Self {
        DelegationMode::Eip7702 {
            implementation: known(SIMPLE_7702_IMPLEMENTATION),
        }
    }
}

/// Per-attempt pipeline parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Router deadline, relative to the time the operation is built
    pub deadline_window_secs: u64,
    /// Fee-token amount the permit lets the paymaster pull (base units)
    pub permit_amount: U256,
    pub paymaster_verification_gas_limit: u64,
    pub paymaster_post_op_gas_limit: u64,
    pub receipt_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub delegation: DelegationMode,
    /// Ask the relay for gas limits instead of using `fallback_gas_limits`
    pub estimate_gas_limits: bool,
    pub fallback_gas_limits: GasLimits,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deadline_window_secs: 3600,
            permit_amount: U256::from(10_000_000u64),
            paymaster_verification_gas_limit: 300_000,
            paymaster_post_op_gas_limit: 20_000,
            receipt_timeout_ms: 120_000,
            poll_interval_ms: 2_000,
            delegation: DelegationMode::default(),
            estimate_gas_limits: true,
            fallback_gas_limits: GasLimits {
                pre_verification_gas: U256::from(100_000u64),
                verification_gas_limit: U256::from(500_000u64),
                call_gas_limit: U256::from(500_000u64),
            },
        }
    }
}

impl PipelineConfig {
    pub fn deadline_window(&self) -> Duration {
        Duration::from_secs(self.deadline_window_secs)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.receipt_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deadline_window_secs == 0 || self.deadline_window_secs > MAX_DEADLINE_WINDOW_SECS {
            return Err(ConfigError::Invalid(format!(
                "deadline window must be between 1 and {} seconds",
                MAX_DEADLINE_WINDOW_SECS
            )));
        }
        if self.permit_amount.is_zero() {
            return Err(ConfigError::Invalid("permit amount must be positive".into()));
        }
        if self.receipt_timeout_ms == 0 || self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "receipt timeout and poll interval must be positive".into(),
            ));
        }
        if let DelegationMode::Eip7702 { implementation } = &self.delegation {
            if implementation.is_zero() {
                return Err(ConfigError::Invalid("delegation implementation is not set".into()));
            }
        }
        Ok(())
    }
}

/// Complete configuration as stored in a JSON file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SwapConfig {
    pub network: NetworkConfig,
    pub pipeline: PipelineConfig,
}

impl SwapConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: SwapConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.pipeline.validate()?;

        if self.network.entry_point_version == EntryPointVersion::V07
            && matches!(self.pipeline.delegation, DelegationMode::Eip7702 { .. })
        {
            return Err(ConfigError::Invalid(
                "EIP-7702 delegation requires entry point v0.8".into(),
            ));
        }
        Ok(())
    }
}
