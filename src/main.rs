//! Wallet bot CLI
//!
//! Command-line entry point for the custodial wallet bot.

use alloy::primitives::{Address, U256};
use clap::{Parser, Subcommand};
use custodial_wallet_bot::balance::BalanceService;
use custodial_wallet_bot::chains::{Chain, ChainRegistry};
use custodial_wallet_bot::rpc::{RetryPolicy, RpcPool};
use custodial_wallet_bot::swap::{OdosAggregator, SwapQuoteClient};
use custodial_wallet_bot::tokens::{addresses, TokenRegistry};
use custodial_wallet_bot::wallet::EncryptionKey;
use custodial_wallet_bot::{
    CommandDispatcher, Config, Error, Result, RpcConfig, UserId, WalletBot,
    WALLET_ENCRYPTION_KEY_ENV,
};
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "walletbot")]
#[command(about = "Custodial multi-chain EVM wallet bot")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve chat commands from stdin, one "<user_id> /command args" per line
    Serve,

    /// Print a fresh wallet encryption key (base64)
    GenerateKey,

    /// Show current configuration
    Config,

    /// Get a swap quote from Odos
    Quote {
        /// Chain (ethereum, polygon, base, arbitrum, optimism)
        #[arg(short, long, default_value = "ethereum")]
        network: String,

        /// Input token address, or "native"
        #[arg(long, default_value = "native")]
        input: String,

        /// Output token address
        #[arg(long)]
        output: String,

        /// Amount in base units (wei)
        #[arg(long)]
        amount: String,
    },

    /// Show balances of any address
    Balance {
        /// Chain (ethereum, polygon, base, arbitrum, optimism)
        #[arg(short, long, default_value = "ethereum")]
        network: String,

        /// Address to query
        #[arg(long)]
        address: String,

        /// Single ERC-20 token address (defaults to all well-known tokens)
        #[arg(long)]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load config
    let config = if let Some(config_path) = cli.config {
        let content =
            std::fs::read_to_string(&config_path).map_err(|e| Error::Config(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| Error::Config(e.to_string()))?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Serve => run_serve(config).await?,
        Commands::GenerateKey => {
            let key = EncryptionKey::generate().to_base64();
            println!("{}={}", WALLET_ENCRYPTION_KEY_ENV, key.expose_secret());
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Quote {
            network,
            input,
            output,
            amount,
        } => run_quote(config, network, input, output, amount).await?,
        Commands::Balance {
            network,
            address,
            token,
        } => run_balance(config, network, address, token).await?,
    }

    Ok(())
}

async fn run_serve(config: Config) -> Result<()> {
    let encryption_key = std::env::var(WALLET_ENCRYPTION_KEY_ENV)
        .ok()
        .map(SecretString::from);
    let bot = Arc::new(WalletBot::from_config(config, &RpcConfig::from_env(), encryption_key).await?);
    let sweeper = bot.start();
    let dispatcher = CommandDispatcher::new(bot);

    tracing::info!("Reading commands from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((user, text)) = line.split_once(char::is_whitespace) else {
            println!("Expected: <user_id> /command [args]");
            continue;
        };
        let Ok(user_id) = user.parse::<UserId>() else {
            println!("Invalid user id '{}'", user);
            continue;
        };

        let reply = dispatcher.handle_line(user_id, text).await;
        println!("{}\n", reply);
    }

    sweeper.abort();
    Ok(())
}

async fn run_quote(
    config: Config,
    network: String,
    input: String,
    output: String,
    amount: String,
) -> Result<()> {
    let chain = Chain::from_str(&network)?;
    let from_token = if input.eq_ignore_ascii_case("native") {
        addresses::NATIVE
    } else {
        parse_address(&input)?
    };
    let to_token = parse_address(&output)?;
    let amount_in = U256::from_str(&amount)
        .map_err(|_| Error::Validation(format!("Invalid amount '{}'", amount)))?;

    let client = SwapQuoteClient::new(
        Arc::new(OdosAggregator::new()?),
        RetryPolicy::from(&config.retry),
        Duration::from_secs(config.swap.quote_ttl_secs),
    );

    // A quote does not need a real taker
    let quote = client
        .quote(chain, from_token, to_token, amount_in, Address::ZERO)
        .await?;

    println!("{}", serde_json::to_string_pretty(&quote)?);
    Ok(())
}

async fn run_balance(
    config: Config,
    network: String,
    address: String,
    token: Option<String>,
) -> Result<()> {
    let chain = Chain::from_str(&network)?;
    let address = parse_address(&address)?;

    let retry = RetryPolicy::from(&config.retry);
    let chains = Arc::new(ChainRegistry::from_rpc_config(&[chain], &RpcConfig::from_env())?);
    let pool = RpcPool::connect(&chains, &retry)?;
    let balances = BalanceService::new(chains, Arc::new(TokenRegistry::new()), pool, retry);

    match token {
        Some(token) => {
            let token = parse_address(&token)?;
            let amount = balances.token_balance(chain, address, token).await?;
            println!("{} {}", amount, balances.token_symbol(chain, token));
        }
        None => {
            let portfolio = balances.portfolio(chain, address).await?;
            println!("{}", serde_json::to_string_pretty(&portfolio)?);
        }
    }
    Ok(())
}

fn parse_address(input: &str) -> Result<Address> {
    Address::from_str(input).map_err(|_| Error::Validation(format!("Invalid address '{}'", input)))
}
