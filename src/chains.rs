//! Supported chains and their static configuration
//!
//! The registry is built once at startup from [`RpcConfig`] and is immutable
//! afterwards.

use crate::config::rpc::{chains, RpcConfig};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Supported EVM networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Polygon,
    Base,
    Arbitrum,
    Optimism,
}

impl Chain {
    pub const ALL: [Chain; 5] = [
        Chain::Ethereum,
        Chain::Polygon,
        Chain::Base,
        Chain::Arbitrum,
        Chain::Optimism,
    ];

    pub fn chain_id(&self) -> u64 {
        match self {
            Chain::Ethereum => chains::ETHEREUM,
            Chain::Polygon => chains::POLYGON,
            Chain::Base => chains::BASE,
            Chain::Arbitrum => chains::ARBITRUM,
            Chain::Optimism => chains::OPTIMISM,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Polygon => "polygon",
            Chain::Base => "base",
            Chain::Arbitrum => "arbitrum",
            Chain::Optimism => "optimism",
        }
    }

    pub fn native_symbol(&self) -> &'static str {
        match self {
            Chain::Polygon => "POL",
            _ => "ETH",
        }
    }

    pub fn from_id(chain_id: u64) -> Option<Chain> {
        Chain::ALL.into_iter().find(|c| c.chain_id() == chain_id)
    }

    /// Resolve a user-supplied chain name or alias
    pub fn resolve(input: &str) -> Option<Chain> {
        match input.to_lowercase().as_str() {
            "ethereum" | "eth" | "mainnet" => Some(Chain::Ethereum),
            "polygon" | "pol" | "matic" => Some(Chain::Polygon),
            "base" => Some(Chain::Base),
            "arbitrum" | "arb" => Some(Chain::Arbitrum),
            "optimism" | "op" => Some(Chain::Optimism),
            _ => None,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Chain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Chain::resolve(s).ok_or_else(|| {
            let supported: Vec<&str> = Chain::ALL.iter().map(|c| c.name()).collect();
            Error::Validation(format!(
                "Unsupported chain '{}'. Supported chains: {}",
                s,
                supported.join(", ")
            ))
        })
    }
}

/// Static per-chain configuration
#[derive(Debug, Clone, Serialize)]
pub struct ChainConfig {
    pub chain: Chain,
    pub chain_id: u64,
    pub rpc_endpoint: String,
    pub native_symbol: String,
    pub native_decimals: u8,
}

/// Immutable set of chains the process serves
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: HashMap<Chain, ChainConfig>,
}

impl ChainRegistry {
    /// Build the registry for `enabled` chains, taking endpoints from `rpc`.
    pub fn from_rpc_config(enabled: &[Chain], rpc: &RpcConfig) -> Result<Self> {
        let mut chains = HashMap::new();
        for chain in enabled {
            let endpoint = rpc.get(chain.chain_id()).ok_or_else(|| {
                Error::Config(format!("No RPC URL configured for {}", chain))
            })?;
            chains.insert(
                *chain,
                ChainConfig {
                    chain: *chain,
                    chain_id: chain.chain_id(),
                    rpc_endpoint: endpoint.to_string(),
                    native_symbol: chain.native_symbol().to_string(),
                    native_decimals: 18,
                },
            );
        }
        Ok(Self { chains })
    }

    pub fn get(&self, chain: Chain) -> Result<&ChainConfig> {
        self.chains
            .get(&chain)
            .ok_or_else(|| Error::Validation(format!("Chain {} is not enabled", chain)))
    }

    pub fn chains(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.values()
    }
}
