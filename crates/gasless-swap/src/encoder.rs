//! Router and account calldata encoding

use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, I256, U256};
use ethers::utils::id;
use gasless_types::{Call, PoolConfig, PoolKey, SwapIntent};

use crate::error::SwapError;

pub const SWAP_EXACT_TOKENS_FOR_TOKENS: &str = "swapExactTokensForTokens(uint256,uint256,bool,(address,address,uint24,int24,address),bytes,address,uint256)";
pub const EXECUTE: &str = "execute(address,uint256,bytes)";
pub const EXECUTE_BATCH: &str = "executeBatch((address,uint256,bytes)[])";

const MAX_FEE: u32 = 0xff_ffff;
const MIN_TICK_SPACING: i32 = 1;
const MAX_TICK_SPACING: i32 = i16::MAX as i32;

/// Canonical pool key: currencies ordered as unsigned 160-bit integers
pub fn build_pool_key(config: &PoolConfig) -> Result<PoolKey, SwapError> {
    if config.token_a == config.token_b {
        return Err(SwapError::InvalidPool(format!(
            "identical currencies {:?}",
            config.token_a
        )));
    }
    if config.fee > MAX_FEE {
        return Err(SwapError::InvalidPool(format!("fee {} exceeds uint24", config.fee)));
    }
    if !(MIN_TICK_SPACING..=MAX_TICK_SPACING).contains(&config.tick_spacing) {
        return Err(SwapError::InvalidPool(format!(
            "tick spacing {} outside [{}, {}]",
            config.tick_spacing, MIN_TICK_SPACING, MAX_TICK_SPACING
        )));
    }

    let (currency0, currency1) = if config.token_a < config.token_b {
        (config.token_a, config.token_b)
    } else {
        (config.token_b, config.token_a)
    };

    Ok(PoolKey {
        currency0,
        currency1,
        fee: config.fee,
        tick_spacing: config.tick_spacing,
        hooks: config.hooks,
    })
}

/// `abi.encode(bool useGaslessMode, address actualUser)`
pub fn encode_hook_data(use_gasless_mode: bool, actual_user: Address) -> Bytes {
    abi::encode(&[Token::Bool(use_gasless_mode), Token::Address(actual_user)]).into()
}

/// Hook data for a sponsored swap: gasless mode is always on, so the hook
/// credits `actual_user` instead of the router caller
pub fn build_hook_data(actual_user: Address) -> Bytes {
    encode_hook_data(true, actual_user)
}

fn pool_key_token(key: &PoolKey) -> Token {
    Token::Tuple(vec![
        Token::Address(key.currency0),
        Token::Address(key.currency1),
        Token::Uint(U256::from(key.fee)),
        Token::Int(I256::from(i64::from(key.tick_spacing)).into_raw()),
        Token::Address(key.hooks),
    ])
}

fn with_selector(signature: &str, args: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(abi::encode(args));
    data.into()
}

/// Router call swapping `intent.amount_in` through `pool_key`
pub fn encode_swap_call(
    router: Address,
    intent: &SwapIntent,
    pool_key: &PoolKey,
    hook_data: Bytes,
    deadline: u64,
) -> Call {
    let data = with_selector(
        SWAP_EXACT_TOKENS_FOR_TOKENS,
        &[
            Token::Uint(intent.amount_in),
            Token::Uint(intent.amount_out_minimum),
            Token::Bool(intent.direction.is_zero_for_one()),
            pool_key_token(pool_key),
            Token::Bytes(hook_data.to_vec()),
            Token::Address(intent.recipient),
            Token::Uint(U256::from(deadline)),
        ],
    );

    Call {
        to: router,
        value: U256::zero(),
        data,
    }
}

/// Smart account calldata: `execute` for one call, `executeBatch` otherwise
pub fn encode_account_calls(calls: &[Call]) -> Bytes {
    match calls {
        [call] => with_selector(
            EXECUTE,
            &[
                Token::Address(call.to),
                Token::Uint(call.value),
                Token::Bytes(call.data.to_vec()),
            ],
        ),
        _ => {
            let batch = calls
                .iter()
                .map(|call| {
                    Token::Tuple(vec![
                        Token::Address(call.to),
                        Token::Uint(call.value),
                        Token::Bytes(call.data.to_vec()),
                    ])
                })
                .collect();
            with_selector(EXECUTE_BATCH, &[Token::Array(batch)])
        }
    }
}
