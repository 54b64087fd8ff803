//! RPC endpoint configuration
//!
//! Supports multiple configuration methods following Ethereum ecosystem conventions:
//! 1. Per-chain env vars (ETH_RPC_URL, ARBITRUM_RPC_URL, etc.) - highest priority
//! 2. Provider API keys (ALCHEMY_API_KEY, INFURA_API_KEY) - builds URLs automatically
//! 3. Public RPC fallbacks - for testing only
//!
//! # Examples
//!
//! ```bash
//! # Option 1: Per-chain URLs (recommended for production)
//! export ETH_RPC_URL="https://eth-mainnet.g.alchemy.com/v2/YOUR_KEY"
//! export POLYGON_RPC_URL="https://polygon-mainnet.g.alchemy.com/v2/YOUR_KEY"
//!
//! # Option 2: Single provider API key
//! export ALCHEMY_API_KEY="YOUR_KEY"
//! ```

use std::collections::HashMap;

/// RPC configuration for multiple chains
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// RPC URLs indexed by chain ID
    urls: HashMap<u64, String>,
}

/// Chain ID constants
pub mod chains {
    pub const ETHEREUM: u64 = 1;
    pub const ARBITRUM: u64 = 42161;
    pub const OPTIMISM: u64 = 10;
    pub const BASE: u64 = 8453;
    pub const POLYGON: u64 = 137;
}

/// Environment variable names
mod env_vars {
    pub const ETH_RPC_URL: &str = "ETH_RPC_URL";
    pub const ARBITRUM_RPC_URL: &str = "ARBITRUM_RPC_URL";
    pub const OPTIMISM_RPC_URL: &str = "OPTIMISM_RPC_URL";
    pub const BASE_RPC_URL: &str = "BASE_RPC_URL";
    pub const POLYGON_RPC_URL: &str = "POLYGON_RPC_URL";

    pub const ALCHEMY_API_KEY: &str = "ALCHEMY_API_KEY";
    pub const INFURA_API_KEY: &str = "INFURA_API_KEY";
}

/// Public RPC endpoints (rate limited, for testing only)
mod public_rpcs {
    pub const ETHEREUM: &str = "https://eth.llamarpc.com";
    pub const ARBITRUM: &str = "https://arb1.arbitrum.io/rpc";
    pub const OPTIMISM: &str = "https://mainnet.optimism.io";
    pub const BASE: &str = "https://mainnet.base.org";
    pub const POLYGON: &str = "https://polygon-rpc.com";
}

const PER_CHAIN_VARS: [(u64, &str); 5] = [
    (chains::ETHEREUM, env_vars::ETH_RPC_URL),
    (chains::ARBITRUM, env_vars::ARBITRUM_RPC_URL),
    (chains::OPTIMISM, env_vars::OPTIMISM_RPC_URL),
    (chains::BASE, env_vars::BASE_RPC_URL),
    (chains::POLYGON, env_vars::POLYGON_RPC_URL),
];

impl RpcConfig {
    /// Create RPC config from environment variables
    ///
    /// Priority:
    /// 1. Per-chain env vars (ETH_RPC_URL, POLYGON_RPC_URL, etc.)
    /// 2. ALCHEMY_API_KEY - builds URLs for all chains
    /// 3. INFURA_API_KEY - builds URLs for supported chains
    /// 4. Public RPC fallbacks (for testing only)
    pub fn from_env() -> Self {
        let mut urls = HashMap::new();

        for (chain_id, var) in PER_CHAIN_VARS {
            if let Ok(url) = std::env::var(var) {
                tracing::debug!(chain_id, var, "Using per-chain RPC URL");
                urls.insert(chain_id, url);
            }
        }

        if urls.is_empty() {
            if let Ok(key) = std::env::var(env_vars::ALCHEMY_API_KEY) {
                tracing::info!("Building RPC URLs from ALCHEMY_API_KEY");
                urls.extend(Self::alchemy_urls(&key));
            }
        }

        if urls.is_empty() {
            if let Ok(key) = std::env::var(env_vars::INFURA_API_KEY) {
                tracing::info!("Building RPC URLs from INFURA_API_KEY");
                urls.extend(Self::infura_urls(&key));
            }
        }

        if !urls.contains_key(&chains::ETHEREUM) {
            tracing::warn!("No RPC configured for Ethereum, using public RPC (rate limited)");
        }
        urls.entry(chains::ETHEREUM)
            .or_insert_with(|| public_rpcs::ETHEREUM.to_string());
        urls.entry(chains::ARBITRUM)
            .or_insert_with(|| public_rpcs::ARBITRUM.to_string());
        urls.entry(chains::OPTIMISM)
            .or_insert_with(|| public_rpcs::OPTIMISM.to_string());
        urls.entry(chains::BASE)
            .or_insert_with(|| public_rpcs::BASE.to_string());
        urls.entry(chains::POLYGON)
            .or_insert_with(|| public_rpcs::POLYGON.to_string());

        Self { urls }
    }

    fn alchemy_urls(key: &str) -> Vec<(u64, String)> {
        vec![
            (
                chains::ETHEREUM,
                format!("https://eth-mainnet.g.alchemy.com/v2/{}", key),
            ),
            (
                chains::ARBITRUM,
                format!("https://arb-mainnet.g.alchemy.com/v2/{}", key),
            ),
            (
                chains::OPTIMISM,
                format!("https://opt-mainnet.g.alchemy.com/v2/{}", key),
            ),
            (
                chains::BASE,
                format!("https://base-mainnet.g.alchemy.com/v2/{}", key),
            ),
            (
                chains::POLYGON,
                format!("https://polygon-mainnet.g.alchemy.com/v2/{}", key),
            ),
        ]
    }

    // Infura has no Base endpoint; Base falls back to the public RPC.
    fn infura_urls(key: &str) -> Vec<(u64, String)> {
        vec![
            (
                chains::ETHEREUM,
                format!("https://mainnet.infura.io/v3/{}", key),
            ),
            (
                chains::ARBITRUM,
                format!("https://arbitrum-mainnet.infura.io/v3/{}", key),
            ),
            (
                chains::OPTIMISM,
                format!("https://optimism-mainnet.infura.io/v3/{}", key),
            ),
            (
                chains::POLYGON,
                format!("https://polygon-mainnet.infura.io/v3/{}", key),
            ),
        ]
    }

    /// Create with explicit RPC URLs
    pub fn with_urls(urls: HashMap<u64, String>) -> Self {
        Self { urls }
    }

    /// Get RPC URL for a chain
    pub fn get(&self, chain_id: u64) -> Option<&str> {
        self.urls.get(&chain_id).map(|s| s.as_str())
    }

    /// Check if a chain is configured
    pub fn has_chain(&self, chain_id: u64) -> bool {
        self.urls.contains_key(&chain_id)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_url() {
        let mut urls = HashMap::new();
        urls.insert(1, "https://custom.rpc".to_string());
        let config = RpcConfig::with_urls(urls);

        assert_eq!(config.get(1), Some("https://custom.rpc"));
        assert_eq!(config.get(999), None);
        assert!(!config.has_chain(chains::POLYGON));
    }

    #[test]
    fn test_alchemy_covers_every_chain() {
        let urls: HashMap<u64, String> = RpcConfig::alchemy_urls("k").into_iter().collect();
        for (chain_id, _) in PER_CHAIN_VARS {
            assert!(urls.contains_key(&chain_id), "missing chain {}", chain_id);
        }
        assert!(urls[&chains::POLYGON].ends_with("/k"));
    }

    #[test]
    fn test_infura_skips_base() {
        let urls: HashMap<u64, String> = RpcConfig::infura_urls("k").into_iter().collect();
        assert!(!urls.contains_key(&chains::BASE));
        assert!(urls.contains_key(&chains::ETHEREUM));
    }
}
