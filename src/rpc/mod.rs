//! Chain JSON-RPC access
//!
//! [`ChainRpc`] is the seam between the wallet core and a chain node. Every
//! failure is classified once, here, as transient (worth retrying) or
//! rejected (the node understood the request and refused it).

mod provider;
pub mod retry;

pub use provider::{parse_revert_reason, AlloyRpc};
pub use retry::{with_retry, RetryPolicy};

use crate::chains::{Chain, ChainRegistry};
use crate::{Error, Result};
use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Classified RPC failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcFailure {
    /// Timeout, connection error, rate limit, 5xx
    #[error("transient RPC failure: {0}")]
    Transient(String),
    /// Revert, nonce error, insufficient funds, malformed response
    #[error("RPC rejected request: {0}")]
    Rejected(String),
}

impl RpcFailure {
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcFailure::Transient(_))
    }
}

impl From<RpcFailure> for Error {
    fn from(failure: RpcFailure) -> Self {
        match failure {
            RpcFailure::Transient(msg) => Error::Rpc(msg),
            RpcFailure::Rejected(msg) => Error::RpcRejected(msg),
        }
    }
}

pub type RpcResult<T> = std::result::Result<T, RpcFailure>;

/// A read-only call or gas estimation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

impl CallRequest {
    pub fn new(to: Address, data: Bytes) -> Self {
        Self {
            from: None,
            to,
            data,
            value: U256::ZERO,
        }
    }

    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

/// EIP-1559 fee parameters in wei
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// The parts of a receipt the wallet core uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptInfo {
    pub success: bool,
    pub block_number: u64,
    pub gas_used: u64,
}

/// JSON-RPC operations against one chain
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// `eth_getBalance` at latest
    async fn balance(&self, address: Address) -> RpcResult<U256>;

    /// `eth_call` at latest
    async fn call(&self, request: &CallRequest) -> RpcResult<Bytes>;

    /// `eth_getCode`; empty bytes means no contract
    async fn code_at(&self, address: Address) -> RpcResult<Bytes>;

    /// Pending nonce for `address`
    async fn transaction_count(&self, address: Address) -> RpcResult<u64>;

    async fn fee_estimate(&self) -> RpcResult<FeeEstimate>;

    async fn estimate_gas(&self, request: &CallRequest) -> RpcResult<u64>;

    /// `eth_sendRawTransaction` with an EIP-2718 envelope
    async fn send_raw(&self, raw: &[u8]) -> RpcResult<B256>;

    async fn receipt(&self, hash: B256) -> RpcResult<Option<ReceiptInfo>>;

    /// Whether the node still knows the transaction (pending or mined)
    async fn is_known(&self, hash: B256) -> RpcResult<bool>;
}

/// One [`ChainRpc`] per enabled chain
#[derive(Clone)]
pub struct RpcPool {
    clients: HashMap<Chain, Arc<dyn ChainRpc>>,
}

impl RpcPool {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// Connect an HTTP provider for every chain in the registry
    pub fn connect(registry: &ChainRegistry, policy: &RetryPolicy) -> Result<Self> {
        let mut pool = Self::new();
        for config in registry.chains() {
            let client = AlloyRpc::connect(config, policy.call_timeout)?;
            pool.insert(config.chain, Arc::new(client));
        }
        Ok(pool)
    }

    pub fn insert(&mut self, chain: Chain, client: Arc<dyn ChainRpc>) {
        self.clients.insert(chain, client);
    }

    pub fn get(&self, chain: Chain) -> Result<Arc<dyn ChainRpc>> {
        self.clients
            .get(&chain)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("Chain {} is not enabled", chain)))
    }
}

impl Default for RpcPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal ABI helpers for the ERC-20 calls the wallet makes
pub mod erc20 {
    use alloy::primitives::{Address, Bytes, U256};

    /// balanceOf(address)
    pub const BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
    /// transfer(address,uint256)
    pub const TRANSFER: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
    /// decimals()
    pub const DECIMALS: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];

    fn word(address: Address) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(address.as_slice());
        word
    }

    pub fn balance_of(owner: Address) -> Bytes {
        let mut data = Vec::with_capacity(36);
        data.extend_from_slice(&BALANCE_OF);
        data.extend_from_slice(&word(owner));
        Bytes::from(data)
    }

    pub fn transfer(to: Address, amount: U256) -> Bytes {
        let mut data = Vec::with_capacity(68);
        data.extend_from_slice(&TRANSFER);
        data.extend_from_slice(&word(to));
        data.extend_from_slice(&amount.to_be_bytes::<32>());
        Bytes::from(data)
    }

    pub fn decimals() -> Bytes {
        Bytes::from(DECIMALS.to_vec())
    }

    /// Decode a single uint256 return word; None for a malformed return
    pub fn decode_uint(data: &[u8]) -> Option<U256> {
        if data.len() < 32 {
            return None;
        }
        Some(U256::from_be_slice(&data[..32]))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scriptable in-memory chain used by service tests

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct State {
        balances: HashMap<Address, U256>,
        token_balances: HashMap<(Address, Address), U256>,
        token_decimals: HashMap<Address, u8>,
        failing_tokens: HashMap<Address, RpcFailure>,
        transient_balance_failures: usize,
        nonce: u64,
        receipts: HashMap<B256, ReceiptInfo>,
        known: Vec<B256>,
        submit_error: Option<RpcFailure>,
        revert_reason: Option<String>,
        estimate_gas_error: Option<RpcFailure>,
    }

    /// In-memory [`ChainRpc`] with counters
    #[derive(Default)]
    pub struct MockRpc {
        state: Mutex<State>,
        pub submit_calls: AtomicUsize,
        pub balance_calls: AtomicUsize,
        pub decimals_calls: AtomicUsize,
        pub receipt_calls: AtomicUsize,
    }

    impl MockRpc {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_balance(self, address: Address, wei: U256) -> Self {
            self.state.lock().unwrap().balances.insert(address, wei);
            self
        }

        pub fn with_token(self, token: Address, decimals: u8) -> Self {
            self.state.lock().unwrap().token_decimals.insert(token, decimals);
            self
        }

        pub fn with_token_balance(self, token: Address, owner: Address, amount: U256) -> Self {
            self.state
                .lock()
                .unwrap()
                .token_balances
                .insert((token, owner), amount);
            self
        }

        pub fn with_failing_token(self, token: Address, failure: RpcFailure) -> Self {
            self.state.lock().unwrap().failing_tokens.insert(token, failure);
            self
        }

        pub fn with_transient_balance_failures(self, count: usize) -> Self {
            self.state.lock().unwrap().transient_balance_failures = count;
            self
        }

        pub fn with_submit_error(self, failure: RpcFailure) -> Self {
            self.state.lock().unwrap().submit_error = Some(failure);
            self
        }

        pub fn with_estimate_gas_error(self, failure: RpcFailure) -> Self {
            self.state.lock().unwrap().estimate_gas_error = Some(failure);
            self
        }

        pub fn with_revert_reason(self, reason: &str) -> Self {
            self.state.lock().unwrap().revert_reason = Some(reason.to_string());
            self
        }

        /// Mine `hash` with the given outcome
        pub fn mine(&self, hash: B256, success: bool) {
            self.state.lock().unwrap().receipts.insert(
                hash,
                ReceiptInfo {
                    success,
                    block_number: 100,
                    gas_used: 21_000,
                },
            );
        }

        /// Forget a pending transaction, as a node does after eviction
        pub fn drop_tx(&self, hash: B256) {
            self.state.lock().unwrap().known.retain(|h| *h != hash);
        }

        pub fn last_submitted(&self) -> Option<B256> {
            self.state.lock().unwrap().known.last().copied()
        }

        pub fn submissions(&self) -> usize {
            self.submit_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChainRpc for MockRpc {
        async fn balance(&self, address: Address) -> RpcResult<U256> {
            self.balance_calls.fetch_add(1, Ordering::SeqCst);
            let mut state = self.state.lock().unwrap();
            if state.transient_balance_failures > 0 {
                state.transient_balance_failures -= 1;
                return Err(RpcFailure::Transient("connection reset".to_string()));
            }
            Ok(state.balances.get(&address).copied().unwrap_or(U256::ZERO))
        }

        async fn call(&self, request: &CallRequest) -> RpcResult<Bytes> {
            let state = self.state.lock().unwrap();
            if let Some(failure) = state.failing_tokens.get(&request.to) {
                return Err(failure.clone());
            }
            if let Some(reason) = &state.revert_reason {
                return Err(RpcFailure::Rejected(reason.clone()));
            }
            let selector = request.data.get(..4).unwrap_or_default();
            if selector == erc20::DECIMALS {
                self.decimals_calls.fetch_add(1, Ordering::SeqCst);
                let decimals = state
                    .token_decimals
                    .get(&request.to)
                    .copied()
                    .ok_or_else(|| RpcFailure::Rejected("execution reverted".to_string()))?;
                return Ok(Bytes::from(U256::from(decimals).to_be_bytes::<32>().to_vec()));
            }
            if selector == erc20::BALANCE_OF {
                let owner = Address::from_slice(&request.data[16..36]);
                let amount = state
                    .token_balances
                    .get(&(request.to, owner))
                    .copied()
                    .unwrap_or(U256::ZERO);
                return Ok(Bytes::from(amount.to_be_bytes::<32>().to_vec()));
            }
            Ok(Bytes::new())
        }

        async fn code_at(&self, address: Address) -> RpcResult<Bytes> {
            let state = self.state.lock().unwrap();
            let is_contract = state.token_decimals.contains_key(&address)
                || state.failing_tokens.contains_key(&address)
                || state.token_balances.keys().any(|(token, _)| *token == address);
            Ok(if is_contract {
                Bytes::from(vec![0x60, 0x80])
            } else {
                Bytes::new()
            })
        }

        async fn transaction_count(&self, _address: Address) -> RpcResult<u64> {
            Ok(self.state.lock().unwrap().nonce)
        }

        async fn fee_estimate(&self) -> RpcResult<FeeEstimate> {
            Ok(FeeEstimate {
                max_fee_per_gas: 30_000_000_000,
                max_priority_fee_per_gas: 1_000_000_000,
            })
        }

        async fn estimate_gas(&self, _request: &CallRequest) -> RpcResult<u64> {
            match &self.state.lock().unwrap().estimate_gas_error {
                Some(failure) => Err(failure.clone()),
                None => Ok(21_000),
            }
        }

        async fn send_raw(&self, raw: &[u8]) -> RpcResult<B256> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            let mut state = self.state.lock().unwrap();
            if let Some(failure) = &state.submit_error {
                return Err(failure.clone());
            }
            let hash = alloy::primitives::keccak256(raw);
            state.known.push(hash);
            state.nonce += 1;
            Ok(hash)
        }

        async fn receipt(&self, hash: B256) -> RpcResult<Option<ReceiptInfo>> {
            self.receipt_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.state.lock().unwrap().receipts.get(&hash).copied())
        }

        async fn is_known(&self, hash: B256) -> RpcResult<bool> {
            let state = self.state.lock().unwrap();
            Ok(state.known.contains(&hash) || state.receipts.contains_key(&hash))
        }
    }
}
