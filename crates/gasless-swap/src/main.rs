//! Gasless Swap Binary
//!
//! Command-line interface for running a gasless swap against a bundler.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ethers::types::{Address, U256};
use ethers::utils::parse_units;
use gasless_chain::{BundlerClient, ChainReader, EvmChainReader};
use gasless_crypto::{AccountSigner, LocalAccountSigner};
use gasless_swap::encoder::{build_hook_data, build_pool_key};
use gasless_swap::{DelegationMode, PipelineState, SwapConfig, SwapError, SwapOrchestrator};
use gasless_types::{Direction, SwapIntent};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gasless-swap")]
#[command(about = "Token swaps paid for by an ERC-4337 paymaster")]
struct Args {
    /// JSON configuration file (defaults to Arbitrum Sepolia)
    #[arg(long, env = "GASLESS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Node RPC URL
    #[arg(long, env = "RPC_URL", global = true)]
    rpc_url: Option<String>,

    /// Bundler RPC URL
    #[arg(long, env = "BUNDLER_URL", global = true)]
    bundler_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one swap
    Swap {
        /// Amount to sell, in whole tokens (e.g. "1.5")
        #[arg(long)]
        amount: String,

        /// Minimum amount to receive, in whole tokens. Zero disables slippage protection.
        #[arg(long)]
        min_out: String,

        /// Token to sell; picks the direction from the pool key
        #[arg(long, conflicts_with = "direction")]
        token_in: Option<Address>,

        /// Direction relative to the sorted pool key
        #[arg(long, default_value = "zero-for-one")]
        direction: Direction,

        /// Receiver of the output tokens (defaults to the account)
        #[arg(long)]
        recipient: Option<Address>,

        /// Private key of the signing EOA
        #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
        private_key: String,

        /// Deployed smart account owned by the key; disables EIP-7702 delegation
        #[arg(long)]
        account: Option<Address>,
    },
    /// Print the canonical pool key and hook data
    PoolKey {
        /// Address embedded in the hook data
        #[arg(long)]
        user: Option<Address>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SwapConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SwapConfig::default(),
    };
    if let Some(rpc_url) = args.rpc_url {
        config.network.rpc_url = rpc_url;
    }
    if let Some(bundler_url) = args.bundler_url {
        config.network.bundler_url = bundler_url;
    }

    match args.command {
        Commands::Swap {
            amount,
            min_out,
            token_in,
            direction,
            recipient,
            private_key,
            account,
        } => {
            let mut signer = LocalAccountSigner::from_private_key(&private_key)?;
            if let Some(account) = account {
                signer = signer.with_account(account);
                config.pipeline.delegation = DelegationMode::SmartAccount;
            }
            config.validate()?;

            run_swap(config, signer, SwapArgs { amount, min_out, token_in, direction, recipient }).await
        }
        Commands::PoolKey { user } => {
            let key = build_pool_key(&config.network.pool)?;
            println!("{}", serde_json::to_string_pretty(&key)?);
            println!("hookData: {}", build_hook_data(user.unwrap_or_default()));
            Ok(())
        }
    }
}

struct SwapArgs {
    amount: String,
    min_out: String,
    token_in: Option<Address>,
    direction: Direction,
    recipient: Option<Address>,
}

async fn run_swap(config: SwapConfig, signer: LocalAccountSigner, args: SwapArgs) -> Result<()> {
    let network = config.network.clone();
    let chain = Arc::new(EvmChainReader::new(&network.rpc_url)?);
    let relay = Arc::new(BundlerClient::new(&network.bundler_url)?);

    let node_chain_id = chain.chain_id().await.context("querying chain id")?;
    if node_chain_id != network.chain_id {
        bail!(
            "node at {} reports chain {}, configuration expects {}",
            network.rpc_url,
            node_chain_id,
            network.chain_id
        );
    }
    match relay.supported_entry_points().await {
        Ok(entry_points) if !entry_points.contains(&network.entry_point) => {
            bail!("bundler does not support entry point {:?}", network.entry_point)
        }
        Ok(_) => {}
        Err(e) => warn!("could not query bundler entry points: {}", e),
    }

    let pool_key = build_pool_key(&network.pool)?;
    let direction = match args.token_in {
        Some(token) => Direction::for_input(&pool_key, token)
            .with_context(|| format!("{:?} is not a currency of the pool", token))?,
        None => args.direction,
    };
    let token_in = pool_key.input_token(direction);
    let token_out = pool_key.input_token(direction.reversed());

    let (decimals_in, decimals_out) = tokio::try_join!(
        chain.token_decimals(token_in),
        chain.token_decimals(token_out),
    )?;
    let amount_in: U256 = parse_units(&args.amount, u32::from(decimals_in))?.into();
    let amount_out_minimum: U256 = parse_units(&args.min_out, u32::from(decimals_out))?.into();

    let intent = SwapIntent::new(
        amount_in,
        amount_out_minimum,
        direction,
        args.recipient.unwrap_or_else(|| signer.address()),
    );
    info!(account = ?signer.address(), %direction, %amount_in, %amount_out_minimum, "swap intent");

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(state) = progress_rx.recv().await {
            if !matches!(state, PipelineState::Idle) {
                println!("» {:?}", state);
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Cancelling swap...");
            ctrl_c.cancel();
        }
    });

    let orchestrator = SwapOrchestrator::new(network.clone(), config.pipeline, chain, relay)?
        .with_progress(progress_tx);

    match orchestrator.execute(&intent, &signer, cancel).await {
        Ok(result) => {
            println!("Swap succeeded");
            println!("  userOpHash:      {:?}", result.user_op_hash);
            println!("  transactionHash: {:?}", result.transaction_hash);
            println!("  {}", network.explorer_tx_url(result.transaction_hash));
            Ok(())
        }
        Err(SwapError::Cancelled { submitted: Some(hash) }) => {
            println!("Stopped waiting; operation {:?} was already submitted and may still land", hash);
            Ok(())
        }
        Err(e) if e.is_retryable() => Err(e).context("transient failure, the swap can be retried"),
        Err(e) => Err(e.into()),
    }
}
