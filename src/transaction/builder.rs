//! User intent to unsigned EIP-1559 transaction
//!
//! All values are U256 base units. Nonce, fees and gas come from the node;
//! a failure to fetch them is an error, never a default.

use crate::amount::Amount;
use crate::balance::BalanceService;
use crate::chains::{Chain, ChainRegistry};
use crate::rpc::{erc20, with_retry, CallRequest, RetryPolicy, RpcPool};
use crate::swap::{SwapQuote, SwapQuoteClient};
use crate::tokens::addresses::NATIVE;
use crate::{Error, Result};
use alloy::primitives::{Address, Bytes, U256};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Gas limit headroom over the node's estimate, in percent
const GAS_LIMIT_BUFFER_PERCENT: u64 = 20;

/// A fully specified transaction, ready for signing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub chain: Chain,
    pub chain_id: u64,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub nonce: u64,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

impl UnsignedTransaction {
    /// Upper bound on the fee: gas_limit * max_fee_per_gas
    pub fn max_fee_cost(&self) -> U256 {
        U256::from(self.gas_limit) * U256::from(self.max_fee_per_gas)
    }

    /// Worst-case native spend: value plus maximum fee
    pub fn max_native_cost(&self) -> U256 {
        self.value + self.max_fee_cost()
    }

    /// The same call as a read-only request, for revert replay
    pub fn as_call(&self) -> CallRequest {
        CallRequest::new(self.to, self.data.clone())
            .from(self.from)
            .value(self.value)
    }
}

/// Parse and validate a recipient address typed by a user
pub fn parse_recipient(input: &str) -> Result<Address> {
    let address = Address::from_str(input.trim())
        .map_err(|_| Error::Validation(format!("Invalid recipient address '{}'", input)))?;
    if address == Address::ZERO {
        return Err(Error::Validation(
            "Refusing to send to the zero address".to_string(),
        ));
    }
    Ok(address)
}

pub struct TransactionBuilder {
    chains: Arc<ChainRegistry>,
    balances: Arc<BalanceService>,
    quotes: Arc<SwapQuoteClient>,
    rpc: RpcPool,
    retry: RetryPolicy,
    max_slippage_bps: u16,
}

impl TransactionBuilder {
    pub fn new(
        chains: Arc<ChainRegistry>,
        balances: Arc<BalanceService>,
        quotes: Arc<SwapQuoteClient>,
        rpc: RpcPool,
        retry: RetryPolicy,
        max_slippage_bps: u16,
    ) -> Self {
        Self {
            chains,
            balances,
            quotes,
            rpc,
            retry,
            max_slippage_bps,
        }
    }

    pub fn max_slippage_bps(&self) -> u16 {
        self.max_slippage_bps
    }

    pub fn check_slippage(&self, slippage_bps: u16) -> Result<()> {
        if slippage_bps > self.max_slippage_bps {
            return Err(Error::Validation(format!(
                "Slippage {}% exceeds the maximum of {}%",
                f64::from(slippage_bps) / 100.0,
                f64::from(self.max_slippage_bps) / 100.0
            )));
        }
        Ok(())
    }

    /// Build the router call for a quote still inside its validity window
    ///
    /// `min_out` is the output the user agreed to; the call is refused rather
    /// than signed with a lower floor.
    pub async fn build_swap(
        &self,
        from: Address,
        quote: &SwapQuote,
        slippage_bps: u16,
        min_out: U256,
    ) -> Result<UnsignedTransaction> {
        if quote.is_expired(Utc::now()) {
            return Err(Error::QuoteExpired);
        }
        self.check_slippage(slippage_bps)?;
        if quote.taker != from {
            return Err(Error::Validation(
                "Quote was issued for a different wallet".to_string(),
            ));
        }

        self.ensure_swap_input(from, quote).await?;

        let swap = self.quotes.swap_call(quote, slippage_bps, min_out).await?;
        if swap.to == Address::ZERO {
            return Err(Error::Aggregator("Aggregator returned no router address".to_string()));
        }

        let tx = self
            .finalize(quote.chain, from, swap.to, swap.value, swap.data)
            .await?;
        self.ensure_native(quote.chain, from, tx.max_native_cost()).await?;

        tracing::info!(
            chain = %quote.chain,
            from = %from,
            router = %tx.to,
            amount_in = %quote.amount_in,
            min_out = %min_out,
            nonce = tx.nonce,
            gas_limit = tx.gas_limit,
            "Swap transaction built"
        );
        Ok(tx)
    }

    /// Build a native transfer (`token == None`) or an ERC-20 `transfer`
    pub async fn build_transfer(
        &self,
        chain: Chain,
        from: Address,
        to: Address,
        amount: Amount,
        token: Option<Address>,
    ) -> Result<UnsignedTransaction> {
        if to == Address::ZERO {
            return Err(Error::Validation(
                "Refusing to send to the zero address".to_string(),
            ));
        }
        if amount.is_zero() {
            return Err(Error::Validation("Amount must be greater than 0".to_string()));
        }

        let tx = match token {
            None => {
                let balance = self.balances.native_balance(chain, from).await?;
                if amount.raw > balance.raw {
                    return Err(self.insufficient(chain, None, amount.raw, balance));
                }
                self.finalize(chain, from, to, amount.raw, Bytes::new()).await?
            }
            Some(token) => {
                let balance = self.balances.token_balance(chain, from, token).await?;
                if amount.raw > balance.raw {
                    return Err(self.insufficient(chain, Some(token), amount.raw, balance));
                }
                self.finalize(chain, from, token, U256::ZERO, erc20::transfer(to, amount.raw))
                    .await?
            }
        };
        self.ensure_native(chain, from, tx.max_native_cost()).await?;

        tracing::info!(
            chain = %chain,
            from = %from,
            to = %to,
            token = ?token,
            amount = %amount.raw,
            nonce = tx.nonce,
            gas_limit = tx.gas_limit,
            "Transfer transaction built"
        );
        Ok(tx)
    }

    /// The swap input must be covered before any router call is requested
    pub async fn ensure_swap_input(&self, from: Address, quote: &SwapQuote) -> Result<()> {
        if quote.from_token == NATIVE {
            self.ensure_native(quote.chain, from, quote.amount_in).await
        } else {
            let balance = self
                .balances
                .token_balance(quote.chain, from, quote.from_token)
                .await?;
            if quote.amount_in > balance.raw {
                return Err(self.insufficient(
                    quote.chain,
                    Some(quote.from_token),
                    quote.amount_in,
                    balance,
                ));
            }
            Ok(())
        }
    }

    pub async fn ensure_native(&self, chain: Chain, from: Address, needed: U256) -> Result<()> {
        let balance = self.balances.native_balance(chain, from).await?;
        if needed > balance.raw {
            return Err(self.insufficient(chain, None, needed, balance));
        }
        Ok(())
    }

    fn insufficient(
        &self,
        chain: Chain,
        token: Option<Address>,
        needed: U256,
        available: Amount,
    ) -> Error {
        let symbol = match token {
            None => self
                .chains
                .get(chain)
                .map(|c| c.native_symbol.clone())
                .unwrap_or_else(|_| chain.native_symbol().to_string()),
            Some(token) => self.balances.token_symbol(chain, token),
        };
        Error::InsufficientBalance {
            symbol,
            needed: Amount::new(needed, available.decimals).to_string(),
            available: available.to_string(),
        }
    }

    /// Fill nonce, fees and gas limit from the node
    async fn finalize(
        &self,
        chain: Chain,
        from: Address,
        to: Address,
        value: U256,
        data: Bytes,
    ) -> Result<UnsignedTransaction> {
        let config = self.chains.get(chain)?;
        let rpc = self.rpc.get(chain)?;
        let rpc = rpc.as_ref();

        let nonce = with_retry(&self.retry, "eth_getTransactionCount", || {
            rpc.transaction_count(from)
        })
        .await?;
        let fees = with_retry(&self.retry, "fee_estimate", || rpc.fee_estimate()).await?;

        let request = CallRequest::new(to, data.clone()).from(from).value(value);
        let estimate = with_retry(&self.retry, "eth_estimateGas", || rpc.estimate_gas(&request))
            .await?;
        let gas_limit = estimate.saturating_add(estimate * GAS_LIMIT_BUFFER_PERCENT / 100);

        Ok(UnsignedTransaction {
            chain,
            chain_id: config.chain_id,
            from,
            to,
            value,
            data,
            nonce,
            gas_limit,
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
        })
    }
}
