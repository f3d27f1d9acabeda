//! Classified pipeline errors

use ethers::types::H256;
use gasless_crypto::CryptoError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error classification surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SignatureRejected,
    NonceFetchFailed,
    GasEstimationFailed,
    MissingAuthorization,
    SubmissionRejected,
    ConfirmationTimeout,
    ExecutionReverted,
    InvalidPool,
    Cancelled,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Error, Debug)]
pub enum SwapError {
    /// The signer declined, or produced a signature that does not verify
    #[error("Signature rejected: {0}")]
    SignatureRejected(String),

    #[error("Nonce fetch failed: {0}")]
    NonceFetchFailed(String),

    #[error("Gas estimation failed: {0}")]
    GasEstimationFailed(String),

    #[error("Missing delegation authorization: {0}")]
    MissingAuthorization(String),

    /// The relay refused the operation; it must be rebuilt, never resent
    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    /// Final state unknown; re-query the receipt before trying again
    #[error("No receipt for {user_op_hash:?} after {waited:?}")]
    ConfirmationTimeout { user_op_hash: H256, waited: Duration },

    #[error("Execution reverted in {transaction_hash:?}: {}", .reason.as_deref().unwrap_or("no reason given"))]
    ExecutionReverted {
        user_op_hash: H256,
        transaction_hash: H256,
        reason: Option<String>,
    },

    #[error("Invalid pool: {0}")]
    InvalidPool(String),

    /// External cancellation. `submitted` is set when the operation already
    /// reached the relay and only local waiting was stopped.
    #[error("Cancelled (submitted: {submitted:?})")]
    Cancelled { submitted: Option<H256> },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SwapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SwapError::SignatureRejected(_) => ErrorKind::SignatureRejected,
            SwapError::NonceFetchFailed(_) => ErrorKind::NonceFetchFailed,
            SwapError::GasEstimationFailed(_) => ErrorKind::GasEstimationFailed,
            SwapError::MissingAuthorization(_) => ErrorKind::MissingAuthorization,
            SwapError::SubmissionRejected(_) => ErrorKind::SubmissionRejected,
            SwapError::ConfirmationTimeout { .. } => ErrorKind::ConfirmationTimeout,
            SwapError::ExecutionReverted { .. } => ErrorKind::ExecutionReverted,
            SwapError::InvalidPool(_) => ErrorKind::InvalidPool,
            SwapError::Cancelled { .. } => ErrorKind::Cancelled,
            SwapError::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether a fresh attempt of the whole pipeline may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NonceFetchFailed | ErrorKind::GasEstimationFailed
        )
    }

    /// Classify a signer failure
    pub(crate) fn signing(context: &str, err: CryptoError) -> Self {
        match err {
            CryptoError::Unsupported(what) => {
                SwapError::MissingAuthorization(format!("{}: signer does not support {}", context, what))
            }
            other => SwapError::SignatureRejected(format!("{}: {}", context, other)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy() {
        assert!(SwapError::NonceFetchFailed("timeout".into()).is_retryable());
        assert!(SwapError::GasEstimationFailed("503".into()).is_retryable());

        assert!(!SwapError::SignatureRejected("user".into()).is_retryable());
        assert!(!SwapError::SubmissionRejected("stale deadline".into()).is_retryable());
        assert!(!SwapError::ConfirmationTimeout {
            user_op_hash: H256::zero(),
            waited: Duration::from_secs(1),
        }
        .is_retryable());
        assert!(!SwapError::Cancelled { submitted: None }.is_retryable());
    }

    #[test]
    fn test_signing_classification() {
        let rejected = SwapError::signing("permit", CryptoError::Rejected("denied".into()));
        assert_eq!(rejected.kind(), ErrorKind::SignatureRejected);

        let unsupported = SwapError::signing("delegation", CryptoError::Unsupported("7702".into()));
        assert_eq!(unsupported.kind(), ErrorKind::MissingAuthorization);
    }

    #[test]
    fn test_revert_message() {
        let err = SwapError::ExecutionReverted {
            user_op_hash: H256::zero(),
            transaction_hash: H256::repeat_byte(1),
            reason: None,
        };
        assert!(err.to_string().ends_with("no reason given"));
    }
}
