//! Configuration for the wallet bot

pub mod rpc;

use crate::chains::Chain;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Re-export RPC config
pub use rpc::RpcConfig;

/// Environment variable holding the wallet encryption key (hex or base64)
pub const WALLET_ENCRYPTION_KEY_ENV: &str = "WALLET_ENCRYPTION_KEY";

/// Wallet storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSettings {
    /// Path of the JSON wallet table (None keeps wallets in memory only)
    pub store_path: Option<String>,
    /// Key file used when WALLET_ENCRYPTION_KEY is not set
    pub key_file: String,
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            store_path: Some("wallets.json".to_string()),
            key_file: "wallet_key.key".to_string(),
        }
    }
}

/// Swap and quote settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapSettings {
    /// Slippage applied to /buy when none is given (basis points)
    pub default_slippage_bps: u16,
    /// Hard upper bound on slippage tolerance (basis points)
    pub max_slippage_bps: u16,
    /// How long an aggregator quote may be used for signing
    pub quote_ttl_secs: u64,
    /// Native amount spent by /buy when the amount is omitted
    pub default_buy_amount: String,
}

impl Default for SwapSettings {
    fn default() -> Self {
        Self {
            default_slippage_bps: 100, // 1%
            max_slippage_bps: 500,     // 5%
            quote_ttl_secs: 60,
            default_buy_amount: "0.01".to_string(),
        }
    }
}

/// Confirmation workflow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSettings {
    /// Lifetime of an estimate awaiting /confirm
    pub action_ttl_secs: u64,
    /// Period of the background expiry sweep
    pub sweep_interval_secs: u64,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            action_ttl_secs: 120,
            sweep_interval_secs: 5,
        }
    }
}

/// Retry budget for RPC and aggregator calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Timeout applied to every single outbound call
    pub call_timeout_ms: u64,
}

impl RetrySettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 4_000,
            call_timeout_ms: 10_000,
        }
    }
}

/// Receipt polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastSettings {
    pub poll_interval_ms: u64,
    pub receipt_timeout_secs: u64,
}

impl BroadcastSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3_000,
            receipt_timeout_secs: 120, // 2 minutes
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chains the bot serves
    pub chains: Vec<Chain>,
    #[serde(default)]
    pub wallet: WalletSettings,
    #[serde(default)]
    pub swap: SwapSettings,
    #[serde(default)]
    pub flow: FlowSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub broadcast: BroadcastSettings,
    /// Path to audit log file
    pub audit_log_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chains: Chain::ALL.to_vec(),
            wallet: WalletSettings::default(),
            swap: SwapSettings::default(),
            flow: FlowSettings::default(),
            retry: RetrySettings::default(),
            broadcast: BroadcastSettings::default(),
            audit_log_path: Some("audit.jsonl".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_deserialize_defaults() {
        let value = serde_json::json!({
            "chains": ["ethereum", "base"],
            "audit_log_path": null
        });
        let parsed: Config = serde_json::from_value(value).expect("parse config");
        assert_eq!(parsed.chains, vec![Chain::Ethereum, Chain::Base]);
        assert_eq!(parsed.retry.max_attempts, 3);
        assert_eq!(parsed.broadcast.receipt_timeout(), Duration::from_secs(120));
        assert_eq!(parsed.swap.default_slippage_bps, 100);
        assert!(parsed.audit_log_path.is_none());
    }

    #[test]
    fn config_deserialize_explicit() {
        let value = serde_json::json!({
            "chains": ["polygon"],
            "wallet": { "store_path": null, "key_file": "/tmp/k.key" },
            "swap": {
                "default_slippage_bps": 50,
                "max_slippage_bps": 300,
                "quote_ttl_secs": 30,
                "default_buy_amount": "0.05"
            },
            "flow": { "action_ttl_secs": 90, "sweep_interval_secs": 1 },
            "audit_log_path": "audit.jsonl"
        });
        let parsed: Config = serde_json::from_value(value).expect("parse config");
        assert!(parsed.wallet.store_path.is_none());
        assert_eq!(parsed.swap.max_slippage_bps, 300);
        assert_eq!(parsed.flow.action_ttl_secs, 90);
    }
}
