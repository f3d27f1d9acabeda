//! User operation assembly and signing

use ethers::types::{Address, Bytes, U256};
use gasless_crypto::{sign_user_operation, user_operation_hash, AccountSigner};
use gasless_types::{
    DelegationAuthorization, EntryPointVersion, FeeSuggestion, GasLimits, PaymasterData, PoolKey,
    SwapIntent, UserOperation,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::encoder::{build_hook_data, encode_account_calls, encode_swap_call};
use crate::error::{ConfigError, SwapError};

/// Unix-seconds time source
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    })
}

/// Entry point the operation is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    pub address: Address,
    pub version: EntryPointVersion,
    pub chain_id: u64,
}

/// Sender-side facts for one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountContext {
    pub sender: Address,
    /// Entry point nonce
    pub nonce: U256,
    /// The account is not yet delegated and needs an EIP-7702 authorization
    pub requires_authorization: bool,
}

pub struct UserOperationBuilder {
    router: Address,
    pool_key: PoolKey,
    entry_point: EntryPoint,
    deadline_window: Duration,
    gas_limits: GasLimits,
    clock: Clock,
}

impl UserOperationBuilder {
    pub fn new(router: Address, pool_key: PoolKey, entry_point: EntryPoint, gas_limits: GasLimits) -> Self {
        Self {
            router,
            pool_key,
            entry_point,
            deadline_window: Duration::from_secs(3600),
            gas_limits,
            clock: system_clock(),
        }
    }

    pub fn with_deadline_window(mut self, window: Duration) -> Self {
        self.deadline_window = window;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn pool_key(&self) -> &PoolKey {
        &self.pool_key
    }

    /// Assemble an unsigned operation carrying exactly one router call
    pub fn build(
        &self,
        intent: &SwapIntent,
        account: &AccountContext,
        paymaster: PaymasterData,
        fees: FeeSuggestion,
        authorization: Option<DelegationAuthorization>,
    ) -> Result<UserOperation, SwapError> {
        if account.requires_authorization && authorization.is_none() {
            return Err(SwapError::MissingAuthorization(format!(
                "{:?} is not delegated and no authorization was supplied",
                account.sender
            )));
        }
        if !intent.has_slippage_protection() {
            warn!(sender = ?account.sender, "amountOutMinimum is zero, swap has no slippage protection");
        }

        let deadline = (self.clock)()
            .checked_add(self.deadline_window.as_secs())
            .ok_or_else(|| ConfigError::Invalid("router deadline overflows u64".into()))?;
        let hook_data = build_hook_data(account.sender);
        let calls = vec![encode_swap_call(self.router, intent, &self.pool_key, hook_data, deadline)];
        let call_data = encode_account_calls(&calls);

        debug!(sender = ?account.sender, nonce = %account.nonce, deadline, "user operation built");

        Ok(UserOperation {
            sender: account.sender,
            nonce: account.nonce,
            calls,
            call_data,
            gas_limits: self.gas_limits,
            fees,
            paymaster,
            authorization,
            deadline,
            signature: Bytes::default(),
        })
    }

    /// Attach the account signature over the entry point's operation hash
    pub async fn sign(
        &self,
        op: UserOperation,
        signer: &dyn AccountSigner,
    ) -> Result<UserOperation, SwapError> {
        let EntryPoint { address, version, chain_id } = self.entry_point;
        let signature = sign_user_operation(signer, &op, address, chain_id, version)
            .await
            .map_err(|e| SwapError::signing("user operation", e))?;

        debug!(
            hash = ?user_operation_hash(&op, address, chain_id, version),
            "user operation signed"
        );
        Ok(op.with_signature(signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::build_pool_key;
    use gasless_types::{Direction, PoolConfig};
    use proptest::prelude::*;

    fn builder(now: u64) -> UserOperationBuilder {
        let pool_key = build_pool_key(&PoolConfig {
            token_a: Address::repeat_byte(2),
            token_b: Address::repeat_byte(1),
            fee: 5000,
            tick_spacing: 100,
            hooks: Address::repeat_byte(0x75),
        })
        .unwrap();
        let entry_point = EntryPoint {
            address: Address::repeat_byte(0x43),
            version: EntryPointVersion::V08,
            chain_id: 421614,
        };
        let limits = GasLimits {
            pre_verification_gas: 100_000u64.into(),
            verification_gas_limit: 500_000u64.into(),
            call_gas_limit: 500_000u64.into(),
        };
        UserOperationBuilder::new(Address::repeat_byte(0xcd), pool_key, entry_point, limits)
            .with_clock(Arc::new(move || now))
    }

    fn paymaster() -> PaymasterData {
        PaymasterData {
            paymaster: Address::repeat_byte(0x3b),
            paymaster_data: Bytes::from(vec![0u8; 118]),
            paymaster_verification_gas_limit: 300_000u64.into(),
            paymaster_post_op_gas_limit: 20_000u64.into(),
            is_final: true,
        }
    }

    fn fees() -> FeeSuggestion {
        FeeSuggestion {
            max_fee_per_gas: 100_000_000u64.into(),
            max_priority_fee_per_gas: 1_000_000u64.into(),
        }
    }

    fn account(requires_authorization: bool) -> AccountContext {
        AccountContext {
            sender: Address::repeat_byte(0xaa),
            nonce: U256::zero(),
            requires_authorization,
        }
    }

    #[test]
    fn test_build_single_router_call() {
        let intent = SwapIntent::new(1_000_000u64.into(), U256::zero(), Direction::ZeroForOne, Address::repeat_byte(0xbb));
        let op = builder(1_700_000_000)
            .build(&intent, &account(false), paymaster(), fees(), None)
            .unwrap();

        assert_eq!(op.calls.len(), 1);
        assert_eq!(op.calls[0].to, Address::repeat_byte(0xcd));
        assert_eq!(op.deadline, 1_700_003_600);
        assert_eq!(&op.call_data[..4], &[0xb6, 0x1d, 0x27, 0xf6]);
        assert!(op.signature.is_empty());
        assert!(op.authorization.is_none());
    }

    #[test]
    fn test_deadline_window_is_configurable() {
        let intent = SwapIntent::new(1u64.into(), 1u64.into(), Direction::OneForZero, Address::zero());
        let op = builder(1_000)
            .with_deadline_window(Duration::from_secs(60))
            .build(&intent, &account(false), paymaster(), fees(), None)
            .unwrap();

        assert_eq!(op.deadline, 1_060);
    }

    #[test]
    fn test_deadline_overflow_is_config_error() {
        let intent = SwapIntent::new(1u64.into(), 1u64.into(), Direction::ZeroForOne, Address::zero());
        let result = builder(1_700_000_000)
            .with_deadline_window(Duration::from_secs(u64::MAX))
            .build(&intent, &account(false), paymaster(), fees(), None);

        assert!(matches!(result, Err(SwapError::Config(_))));
    }

    fn direction() -> impl Strategy<Value = Direction> {
        prop_oneof![Just(Direction::ZeroForOne), Just(Direction::OneForZero)]
    }

    proptest! {
        #[test]
        fn prop_missing_authorization_always_fails(
            amount_in in any::<u128>(),
            min_out in any::<u128>(),
            direction in direction(),
            recipient in any::<[u8; 20]>(),
        ) {
            let intent = SwapIntent::new(amount_in.into(), min_out.into(), direction, recipient.into());
            let result = builder(1_700_000_000).build(&intent, &account(true), paymaster(), fees(), None);
            prop_assert!(matches!(result, Err(SwapError::MissingAuthorization(_))));
        }
    }
}
