//! Gasless Swap Library
//!
//! Turns a swap intent into a paymaster-funded ERC-4337 user operation,
//! submits it to a bundler and waits for inclusion. Fees are paid in the
//! swapped token through an EIP-2612 permit, so the account needs no native
//! gas balance.

pub mod config;
pub mod encoder;
pub mod error;
pub mod gas;
pub mod orchestrator;
pub mod paymaster;
pub mod permit;
pub mod receipt;
pub mod submitter;
pub mod user_op;

pub use config::{DelegationMode, NetworkConfig, PipelineConfig, SwapConfig};
pub use error::{ConfigError, ErrorKind, SwapError};
pub use orchestrator::{PipelineState, SwapOrchestrator};
