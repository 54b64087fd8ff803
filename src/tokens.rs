//! Shared token registry
//!
//! Well-known token metadata (addresses, decimals, symbols) per chain. Used to
//! resolve token symbols typed by users, to pick which balances `/balance`
//! reports, and to seed the decimals cache without an RPC round trip.

use crate::config::rpc::chains;
use alloy::primitives::{address, Address};
use std::collections::HashMap;

/// Token metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenInfo {
    /// Token symbol (e.g., "USDC", "WETH")
    pub symbol: &'static str,
    /// Number of decimals
    pub decimals: u8,
}

impl TokenInfo {
    pub const fn new(symbol: &'static str, decimals: u8) -> Self {
        Self { symbol, decimals }
    }
}

/// Well-known token addresses per chain
pub mod addresses {
    use super::*;

    // === Ethereum Mainnet ===
    pub const USDC_ETH: Address = address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
    pub const USDT_ETH: Address = address!("dac17f958d2ee523a2206206994597c13d831ec7");
    pub const DAI_ETH: Address = address!("6b175474e89094c44da98b954eedeac495271d0f");
    pub const WETH_ETH: Address = address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
    pub const WBTC_ETH: Address = address!("2260fac5e5542a773aa44fbcfedf7c193bc2c599");

    // === Polygon ===
    pub const USDC_POL: Address = address!("3c499c542cef5e3811e1192ce70d8cc03d5c3359");
    pub const USDC_E_POL: Address = address!("2791bca1f2de4661ed88a30c99a7a9449aa84174"); // Bridged
    pub const USDT_POL: Address = address!("c2132d05d31c914a87c6611c10748aeb04b58e8f");
    pub const WPOL_POL: Address = address!("0d500b1d8e8ef31e21c99d1db9a6444d3adf1270");

    // === Arbitrum ===
    pub const USDC_ARB: Address = address!("af88d065e77c8cc2239327c5edb3a432268e5831");
    pub const USDT_ARB: Address = address!("fd086bc7cd5c481dcc9c85ebe478a1c0b69fcbb9");
    pub const DAI_ARB: Address = address!("da10009cbd5d07dd0cecc66161fc93d7c9000da1");
    pub const WETH_ARB: Address = address!("82af49447d8a07e3bd95bd0d56f35241523fbab1");

    // === Optimism ===
    pub const USDC_OPT: Address = address!("0b2c639c533813f4aa9d7837caf62653d097ff85");
    pub const USDT_OPT: Address = address!("94b008aa00579c1307b0ef2c499ad98a8ce58e58");
    pub const WETH_OPT: Address = address!("4200000000000000000000000000000000000006");

    // === Base ===
    pub const USDC_BASE: Address = address!("833589fcd6edb6e08f4c7c32d4f71b54bda02913");
    pub const DAI_BASE: Address = address!("50c5725949a6f0c72e6c4a641f24049a917db0cb");
    pub const WETH_BASE: Address = address!("4200000000000000000000000000000000000006");

    /// The aggregator's representation of the chain's native asset
    pub const NATIVE: Address = address!("0000000000000000000000000000000000000000");
}

/// Token registry providing token info lookups
pub struct TokenRegistry {
    /// Token info by (chain ID, address); the same address can exist on several chains
    tokens: HashMap<(u64, Address), TokenInfo>,
    /// Tokens per chain for balance queries, in display order
    tokens_per_chain: HashMap<u64, Vec<Address>>,
}

impl TokenRegistry {
    /// Create a new token registry with all known tokens
    pub fn new() -> Self {
        use addresses::*;

        let table: [(u64, &[(Address, TokenInfo)]); 5] = [
            (
                chains::ETHEREUM,
                &[
                    (USDC_ETH, TokenInfo::new("USDC", 6)),
                    (USDT_ETH, TokenInfo::new("USDT", 6)),
                    (WETH_ETH, TokenInfo::new("WETH", 18)),
                    (DAI_ETH, TokenInfo::new("DAI", 18)),
                    (WBTC_ETH, TokenInfo::new("WBTC", 8)),
                ],
            ),
            (
                chains::POLYGON,
                &[
                    (USDC_POL, TokenInfo::new("USDC", 6)),
                    (USDC_E_POL, TokenInfo::new("USDC.e", 6)),
                    (USDT_POL, TokenInfo::new("USDT", 6)),
                    (WPOL_POL, TokenInfo::new("WPOL", 18)),
                ],
            ),
            (
                chains::ARBITRUM,
                &[
                    (USDC_ARB, TokenInfo::new("USDC", 6)),
                    (USDT_ARB, TokenInfo::new("USDT", 6)),
                    (WETH_ARB, TokenInfo::new("WETH", 18)),
                    (DAI_ARB, TokenInfo::new("DAI", 18)),
                ],
            ),
            (
                chains::OPTIMISM,
                &[
                    (USDC_OPT, TokenInfo::new("USDC", 6)),
                    (USDT_OPT, TokenInfo::new("USDT", 6)),
                    (WETH_OPT, TokenInfo::new("WETH", 18)),
                ],
            ),
            (
                chains::BASE,
                &[
                    (USDC_BASE, TokenInfo::new("USDC", 6)),
                    (WETH_BASE, TokenInfo::new("WETH", 18)),
                    (DAI_BASE, TokenInfo::new("DAI", 18)),
                ],
            ),
        ];

        let mut tokens = HashMap::new();
        let mut tokens_per_chain = HashMap::new();
        for (chain_id, entries) in table {
            let mut list = Vec::with_capacity(entries.len());
            for (token, info) in entries {
                tokens.insert((chain_id, *token), *info);
                list.push(*token);
            }
            tokens_per_chain.insert(chain_id, list);
        }

        Self {
            tokens,
            tokens_per_chain,
        }
    }

    /// Get token info by chain and address
    pub fn get(&self, chain_id: u64, token: &Address) -> Option<&TokenInfo> {
        self.tokens.get(&(chain_id, *token))
    }

    /// Find a well-known token by symbol (case-insensitive)
    pub fn by_symbol(&self, chain_id: u64, symbol: &str) -> Option<(Address, &TokenInfo)> {
        self.tokens_for_chain(chain_id).iter().find_map(|token| {
            let info = self.get(chain_id, token)?;
            info.symbol
                .eq_ignore_ascii_case(symbol)
                .then_some((*token, info))
        })
    }

    /// Get tokens to query for a chain
    pub fn tokens_for_chain(&self, chain_id: u64) -> &[Address] {
        self.tokens_per_chain
            .get(&chain_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}
