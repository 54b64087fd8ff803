//! Chat commands
//!
//! Inbound contract: `(user_id, command, args)` to a [`CommandOutcome`] or a
//! typed [`Error`]. Both render to plain text for the chat transport.

use crate::amount::{format_units, Amount};
use crate::app::WalletBot;
use crate::balance::Portfolio;
use crate::chains::Chain;
use crate::flow::{ActionKind, ActionStatus, PendingAction};
use crate::transaction::{parse_recipient, ReceiptStatus};
use crate::{Error, Result, UserId};
use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use secrecy::SecretString;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

const HELP: &str = "\
Wallet commands:
  /create                                   Create a new wallet
  /import <private_key>                     Import an existing key
  /delete                                   Delete your wallet
  /wallet                                   Show your wallet address
  /balance [chain] [token]                  Show balances
  /buy <chain> <token_address> [amount]     Buy a token with native currency
  /send <chain> <to> <amount> [token]       Send native currency or a token
  /confirm                                  Execute the pending estimate
  /cancel                                   Cancel the pending estimate
  /status                                   Show the pending action
Chains: ethereum (eth), polygon (pol, matic), base, arbitrum (arb), optimism (op)";

/// A parsed chat command
#[derive(Debug)]
pub enum Command {
    Create,
    Import { key: SecretString },
    Delete,
    Wallet,
    Balance {
        chain: Option<Chain>,
        token: Option<String>,
    },
    Buy {
        chain: Chain,
        token: String,
        amount: Option<String>,
    },
    Send {
        chain: Chain,
        to: Address,
        amount: String,
        token: Option<String>,
    },
    Confirm,
    Cancel,
    Status,
    Help,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Create => "create",
            Command::Import { .. } => "import",
            Command::Delete => "delete",
            Command::Wallet => "wallet",
            Command::Balance { .. } => "balance",
            Command::Buy { .. } => "buy",
            Command::Send { .. } => "send",
            Command::Confirm => "confirm",
            Command::Cancel => "cancel",
            Command::Status => "status",
            Command::Help => "help",
        }
    }

    /// Parse a command word (with or without the leading `/`) and its arguments
    pub fn parse(command: &str, args: &[&str]) -> Result<Self> {
        let name = command.trim_start_matches('/').to_lowercase();
        let usage = |text: &str| Error::Validation(format!("Usage: {}", text));

        let parsed = match (name.as_str(), args) {
            ("create", []) => Command::Create,
            ("import", [key]) => Command::Import {
                key: SecretString::from(key.to_string()),
            },
            ("import", _) => return Err(usage("/import <private_key>")),
            ("delete", []) => Command::Delete,
            ("wallet", []) => Command::Wallet,
            ("balance", []) => Command::Balance {
                chain: None,
                token: None,
            },
            ("balance", [chain]) => Command::Balance {
                chain: Some(Chain::from_str(chain)?),
                token: None,
            },
            ("balance", [chain, token]) => Command::Balance {
                chain: Some(Chain::from_str(chain)?),
                token: Some(token.to_string()),
            },
            ("balance", _) => return Err(usage("/balance [chain] [token]")),
            ("buy", [chain, token]) => Command::Buy {
                chain: Chain::from_str(chain)?,
                token: token.to_string(),
                amount: None,
            },
            ("buy", [chain, token, amount]) => Command::Buy {
                chain: Chain::from_str(chain)?,
                token: token.to_string(),
                amount: Some(amount.to_string()),
            },
            ("buy", _) => return Err(usage("/buy <chain> <token_address> [amount]")),
            ("send", [chain, to, amount]) => Command::Send {
                chain: Chain::from_str(chain)?,
                to: parse_recipient(to)?,
                amount: amount.to_string(),
                token: None,
            },
            ("send", [chain, to, amount, token]) => Command::Send {
                chain: Chain::from_str(chain)?,
                to: parse_recipient(to)?,
                amount: amount.to_string(),
                token: Some(token.to_string()),
            },
            ("send", _) => return Err(usage("/send <chain> <to> <amount> [token]")),
            ("confirm", []) => Command::Confirm,
            ("cancel", []) => Command::Cancel,
            ("status", []) => Command::Status,
            ("help" | "start", _) => Command::Help,
            ("create" | "delete" | "wallet" | "confirm" | "cancel" | "status", _) => {
                return Err(usage(&format!("/{}", name)))
            }
            _ => {
                return Err(Error::Validation(format!(
                    "Unknown command '{}'. Send /help for the list of commands",
                    command
                )))
            }
        };
        Ok(parsed)
    }

    /// Parse a whole chat line such as `/send base 0xabc... 0.1 usdc`
    pub fn parse_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let command = parts
            .next()
            .ok_or_else(|| Error::Validation("Empty command".to_string()))?;
        let args: Vec<&str> = parts.collect();
        Self::parse(command, &args)
    }
}

/// Result of a successful command
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    WalletCreated { address: Address },
    WalletImported { address: Address },
    WalletDeleted { existed: bool },
    WalletInfo {
        address: Address,
        created_at: DateTime<Utc>,
    },
    Balances(Vec<Portfolio>),
    TokenBalance {
        chain: Chain,
        symbol: String,
        amount: Amount,
    },
    Estimate(PendingAction),
    Executed(PendingAction),
    Cancelled(PendingAction),
    Status(Option<PendingAction>),
    Help,
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::WalletCreated { address } => write!(
                f,
                "Wallet created.\nAddress: {}\nThe private key is stored encrypted and is never shown.",
                address
            ),
            CommandOutcome::WalletImported { address } => write!(
                f,
                "Wallet imported.\nAddress: {}\nDelete the message containing your private key.",
                address
            ),
            CommandOutcome::WalletDeleted { existed: true } => f.write_str("Wallet deleted."),
            CommandOutcome::WalletDeleted { existed: false } => f.write_str("No wallet to delete."),
            CommandOutcome::WalletInfo {
                address,
                created_at,
            } => write!(
                f,
                "Address: {}\nCreated: {}",
                address,
                created_at.format("%Y-%m-%d %H:%M UTC")
            ),
            CommandOutcome::Balances(portfolios) => {
                let mut first = true;
                for portfolio in portfolios {
                    if !first {
                        writeln!(f)?;
                    }
                    first = false;
                    write!(f, "{}:", portfolio.chain)?;
                    if portfolio.holdings.is_empty() {
                        write!(f, "\n  (empty)")?;
                    }
                    for holding in &portfolio.holdings {
                        write!(f, "\n  {} {}", holding.amount, holding.symbol)?;
                    }
                }
                if portfolios.is_empty() {
                    f.write_str("No balances")?;
                }
                Ok(())
            }
            CommandOutcome::TokenBalance {
                chain,
                symbol,
                amount,
            } => write!(f, "{}: {} {}", chain, amount, symbol),
            CommandOutcome::Estimate(action) => write_estimate(f, action),
            CommandOutcome::Executed(action) => write_result(f, action),
            CommandOutcome::Cancelled(action) => {
                write!(f, "Cancelled the pending {} on {}.", action.kind.name(), action.chain)
            }
            CommandOutcome::Status(None) => f.write_str("No pending action."),
            CommandOutcome::Status(Some(action)) => match action.status {
                ActionStatus::Estimated => write_estimate(f, action),
                _ => write_result(f, action),
            },
            CommandOutcome::Help => f.write_str(HELP),
        }
    }
}

fn write_estimate(f: &mut fmt::Formatter<'_>, action: &PendingAction) -> fmt::Result {
    let native = action.chain.native_symbol();
    match &action.kind {
        ActionKind::Buy {
            to_symbol,
            to_decimals,
            slippage_bps,
            min_out,
            ..
        } => {
            writeln!(f, "Buy estimate on {}", action.chain)?;
            writeln!(f, "  Spend: {} {}", action.amount, native)?;
            if let Some(quote) = &action.quote_snapshot {
                writeln!(
                    f,
                    "  Receive (est.): {} {}",
                    format_units(quote.amount_out, u32::from(*to_decimals)),
                    to_symbol
                )?;
                if let Some(impact) = quote.price_impact {
                    writeln!(f, "  Price impact: {:.2}%", impact)?;
                }
            }
            writeln!(
                f,
                "  Minimum received: {} {} ({}% slippage)",
                format_units(*min_out, u32::from(*to_decimals)),
                to_symbol,
                f64::from(*slippage_bps) / 100.0
            )?;
        }
        ActionKind::Send {
            recipient, symbol, ..
        } => {
            writeln!(f, "Send estimate on {}", action.chain)?;
            writeln!(f, "  Amount: {} {}", action.amount, symbol)?;
            writeln!(f, "  To: {}", recipient)?;
        }
    }
    if let Some(fee) = action.estimated_fee {
        writeln!(f, "  Max network fee: {} {}", fee, native)?;
    }
    writeln!(f, "  Expires: {}", action.expires_at.format("%H:%M:%S UTC"))?;
    f.write_str("Reply /confirm to execute or /cancel to abort.")
}

fn write_result(f: &mut fmt::Formatter<'_>, action: &PendingAction) -> fmt::Result {
    let kind = action.kind.name();
    match (&action.status, &action.receipt) {
        (ActionStatus::Done, Some(ReceiptStatus::Confirmed { block_number, .. })) => {
            write!(f, "Your {} was confirmed in block {}.", kind, block_number)?
        }
        (ActionStatus::Done, Some(ReceiptStatus::Reverted { block_number, reason, .. })) => {
            write!(f, "Your {} reverted in block {}", kind, block_number)?;
            match reason {
                Some(reason) => write!(f, ": {}", reason)?,
                None => f.write_str(".")?,
            }
        }
        (ActionStatus::Executing, _) if action.tx_hash.is_some() => write!(
            f,
            "Your {} was submitted and is waiting to be mined. Check again with /status.",
            kind
        )?,
        (ActionStatus::Executing, _) => write!(f, "Your {} is being prepared.", kind)?,
        (ActionStatus::Cancelled, _) => write!(f, "Your {} was cancelled.", kind)?,
        (ActionStatus::Expired, _) => write!(
            f,
            "Your {} estimate expired. Send the command again for a new one.",
            kind
        )?,
        (ActionStatus::Failed, _) => write!(
            f,
            "Your {} failed: {}",
            kind,
            action.failure.as_deref().unwrap_or("unknown error")
        )?,
        (status, _) => write!(f, "Your {} is {}.", kind, status)?,
    }
    if let Some(hash) = action.tx_hash {
        write!(f, "\nTx: {}", hash)?;
    }
    Ok(())
}

/// Plain-text rendering of an error, with a hint when one applies
pub fn render_error(error: &Error) -> String {
    match error.guidance() {
        Some(hint) => format!("Error: {}\n{}", error, hint),
        None => format!("Error: {}", error),
    }
}

/// Routes chat commands to the wallet bot
pub struct CommandDispatcher {
    bot: Arc<WalletBot>,
}

impl CommandDispatcher {
    pub fn new(bot: Arc<WalletBot>) -> Self {
        Self { bot }
    }

    pub async fn dispatch(
        &self,
        user_id: UserId,
        command: &str,
        args: &[&str],
    ) -> Result<CommandOutcome> {
        let command = Command::parse(command, args)?;
        self.execute(user_id, command).await
    }

    /// Handle one chat line and render the reply
    pub async fn handle_line(&self, user_id: UserId, line: &str) -> String {
        let result = match Command::parse_line(line) {
            Ok(command) => self.execute(user_id, command).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(outcome) => outcome.to_string(),
            Err(e) => {
                tracing::debug!(user_id, error = %e, "Command failed");
                render_error(&e)
            }
        }
    }

    pub async fn execute(&self, user_id: UserId, command: Command) -> Result<CommandOutcome> {
        tracing::info!(user_id, command = command.name(), "Handling command");

        match command {
            Command::Create => {
                let wallet = self.bot.create_wallet(user_id).await?;
                Ok(CommandOutcome::WalletCreated {
                    address: wallet.address,
                })
            }
            Command::Import { key } => {
                let wallet = self.bot.import_wallet(user_id, &key).await?;
                Ok(CommandOutcome::WalletImported {
                    address: wallet.address,
                })
            }
            Command::Delete => {
                let existed = self.bot.delete_wallet(user_id).await?;
                Ok(CommandOutcome::WalletDeleted { existed })
            }
            Command::Wallet => {
                let wallet = self.bot.wallet(user_id).await?;
                Ok(CommandOutcome::WalletInfo {
                    address: wallet.address,
                    created_at: wallet.created_at,
                })
            }
            Command::Balance { chain, token } => self.balance(user_id, chain, token).await,
            Command::Buy {
                chain,
                token,
                amount,
            } => {
                let token = self.resolve_token(chain, &token)?;
                let decimals = self.bot.chains().get(chain)?.native_decimals;
                let text = amount.unwrap_or_else(|| self.bot.config().swap.default_buy_amount.clone());
                let amount = Amount::parse_positive(&text, decimals)?;

                let action = self
                    .bot
                    .flow()
                    .intent_buy(user_id, chain, token, amount, None)
                    .await?;
                Ok(CommandOutcome::Estimate(action))
            }
            Command::Send {
                chain,
                to,
                amount,
                token,
            } => {
                let token = token
                    .map(|t| self.resolve_token(chain, &t))
                    .transpose()?;
                let action = self
                    .bot
                    .flow()
                    .intent_send(user_id, chain, to, &amount, token)
                    .await?;
                Ok(CommandOutcome::Estimate(action))
            }
            Command::Confirm => {
                let action = self.bot.flow().confirm(user_id).await?;
                Ok(CommandOutcome::Executed(action))
            }
            Command::Cancel => {
                let action = self.bot.flow().cancel(user_id).await?;
                Ok(CommandOutcome::Cancelled(action))
            }
            Command::Status => {
                let action = self.bot.flow().status(user_id).await?;
                Ok(CommandOutcome::Status(action))
            }
            Command::Help => Ok(CommandOutcome::Help),
        }
    }

    async fn balance(
        &self,
        user_id: UserId,
        chain: Option<Chain>,
        token: Option<String>,
    ) -> Result<CommandOutcome> {
        let wallet = self.bot.wallet(user_id).await?;
        let balances = self.bot.balances();

        match (chain, token) {
            (Some(chain), Some(token)) => {
                let token = self.resolve_token(chain, &token)?;
                let amount = balances.token_balance(chain, wallet.address, token).await?;
                Ok(CommandOutcome::TokenBalance {
                    chain,
                    symbol: balances.token_symbol(chain, token),
                    amount,
                })
            }
            (Some(chain), None) => {
                let portfolio = balances.portfolio(chain, wallet.address).await?;
                Ok(CommandOutcome::Balances(vec![portfolio]))
            }
            (None, _) => {
                let mut chains: Vec<Chain> = self.bot.chains().chains().map(|c| c.chain).collect();
                chains.sort_by_key(|c| Chain::ALL.iter().position(|x| x == c));

                let lookups = chains
                    .iter()
                    .map(|chain| balances.portfolio(*chain, wallet.address));
                let mut portfolios = Vec::new();
                for (chain, result) in chains.iter().zip(join_all(lookups).await) {
                    match result {
                        Ok(portfolio) => portfolios.push(portfolio),
                        Err(e) => {
                            tracing::warn!(chain = %chain, error = %e, "Balance lookup failed");
                        }
                    }
                }
                if portfolios.is_empty() && !chains.is_empty() {
                    return Err(Error::Rpc("no chain answered the balance query".to_string()));
                }
                Ok(CommandOutcome::Balances(portfolios))
            }
        }
    }

    /// A token address, or a well-known symbol on `chain`
    fn resolve_token(&self, chain: Chain, input: &str) -> Result<Address> {
        if input.starts_with("0x") {
            return Address::from_str(input)
                .map_err(|_| Error::Validation(format!("Invalid token address '{}'", input)));
        }
        self.bot
            .tokens()
            .by_symbol(chain.chain_id(), input)
            .map(|(address, _)| address)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "Unknown token '{}' on {}; use the token contract address",
                    input, chain
                ))
            })
    }
}
