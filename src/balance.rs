//! Native and ERC-20 balance queries
//!
//! A zero balance is `Ok(0)`. A token address without code is
//! [`Error::NotFound`]; a reverting or malformed `balanceOf` is
//! [`Error::RpcRejected`]. Transient node failures are retried, then surface
//! as [`Error::Rpc`].

use crate::amount::Amount;
use crate::chains::{Chain, ChainRegistry};
use crate::rpc::{erc20, with_retry, CallRequest, ChainRpc, RetryPolicy, RpcPool};
use crate::tokens::TokenRegistry;
use crate::{Error, Result};
use alloy::primitives::Address;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One line of a `/balance` report
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Holding {
    pub symbol: String,
    /// None for the native asset
    pub token: Option<Address>,
    pub amount: Amount,
}

/// Non-zero balances of one address on one chain
#[derive(Debug, Clone, Serialize)]
pub struct Portfolio {
    pub chain: Chain,
    pub address: Address,
    pub holdings: Vec<Holding>,
}

pub struct BalanceService {
    chains: Arc<ChainRegistry>,
    tokens: Arc<TokenRegistry>,
    rpc: RpcPool,
    retry: RetryPolicy,
    /// Decimals per (chain, token), filled on first lookup
    decimals: RwLock<HashMap<(Chain, Address), u8>>,
}

impl BalanceService {
    pub fn new(
        chains: Arc<ChainRegistry>,
        tokens: Arc<TokenRegistry>,
        rpc: RpcPool,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            chains,
            tokens,
            rpc,
            retry,
            decimals: RwLock::new(HashMap::new()),
        }
    }

    pub async fn native_balance(&self, chain: Chain, address: Address) -> Result<Amount> {
        let config = self.chains.get(chain)?;
        let rpc = self.rpc.get(chain)?;

        let wei = with_retry(&self.retry, "native_balance", || rpc.balance(address)).await?;
        Ok(Amount::new(wei, config.native_decimals))
    }

    pub async fn token_balance(
        &self,
        chain: Chain,
        address: Address,
        token: Address,
    ) -> Result<Amount> {
        let rpc = self.rpc.get(chain)?;
        let decimals = self.token_decimals(chain, token).await?;

        let request = CallRequest::new(token, erc20::balance_of(address));
        let data = with_retry(&self.retry, "balanceOf", || rpc.call(&request)).await?;
        let raw = erc20::decode_uint(&data).ok_or_else(|| {
            Error::RpcRejected(format!("Malformed balanceOf return from {}", token))
        })?;

        Ok(Amount::new(raw, decimals))
    }

    /// Decimals for `token`: cache, then the static registry, then `decimals()`
    pub async fn token_decimals(&self, chain: Chain, token: Address) -> Result<u8> {
        if let Some(decimals) = self.decimals.read().await.get(&(chain, token)) {
            return Ok(*decimals);
        }

        let decimals = match self.tokens.get(chain.chain_id(), &token) {
            Some(info) => info.decimals,
            None => self.fetch_decimals(chain, token).await?,
        };

        self.decimals.write().await.insert((chain, token), decimals);
        Ok(decimals)
    }

    async fn fetch_decimals(&self, chain: Chain, token: Address) -> Result<u8> {
        let rpc = self.rpc.get(chain)?;
        self.ensure_contract(rpc.as_ref(), chain, token).await?;

        let request = CallRequest::new(token, erc20::decimals());
        let data = with_retry(&self.retry, "decimals", || rpc.call(&request)).await?;
        let value = erc20::decode_uint(&data)
            .ok_or_else(|| Error::RpcRejected(format!("{} does not implement decimals()", token)))?;

        u8::try_from(value)
            .map_err(|_| Error::RpcRejected(format!("{} reported invalid decimals", token)))
    }

    async fn ensure_contract(&self, rpc: &dyn ChainRpc, chain: Chain, token: Address) -> Result<()> {
        let code = with_retry(&self.retry, "eth_getCode", || rpc.code_at(token)).await?;
        if code.is_empty() {
            return Err(Error::NotFound(format!(
                "No token contract at {} on {}",
                token, chain
            )));
        }
        Ok(())
    }

    /// Display symbol: registry symbol, or the address itself
    pub fn token_symbol(&self, chain: Chain, token: Address) -> String {
        self.tokens
            .get(chain.chain_id(), &token)
            .map(|info| info.symbol.to_string())
            .unwrap_or_else(|| token.to_string())
    }

    /// Native balance plus every well-known token on `chain`, zeros omitted.
    ///
    /// Token lookups run concurrently; a failing token is logged and skipped.
    pub async fn portfolio(&self, chain: Chain, address: Address) -> Result<Portfolio> {
        let native = self.native_balance(chain, address).await?;
        let config = self.chains.get(chain)?;

        let tokens = self.tokens.tokens_for_chain(chain.chain_id());
        let lookups = tokens
            .iter()
            .map(|token| async move { (*token, self.token_balance(chain, address, *token).await) });
        let results = join_all(lookups).await;

        let mut holdings = Vec::new();
        if !native.is_zero() {
            holdings.push(Holding {
                symbol: config.native_symbol.clone(),
                token: None,
                amount: native,
            });
        }
        for (token, result) in results {
            match result {
                Ok(amount) if amount.is_zero() => {}
                Ok(amount) => holdings.push(Holding {
                    symbol: self.token_symbol(chain, token),
                    token: Some(token),
                    amount,
                }),
                Err(e) => {
                    tracing::warn!(chain = %chain, token = %token, error = %e, "Skipping token balance");
                }
            }
        }

        Ok(Portfolio {
            chain,
            address,
            holdings,
        })
    }
}
