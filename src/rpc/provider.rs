//! [`ChainRpc`] over an alloy HTTP provider

use super::{CallRequest, ChainRpc, FeeEstimate, ReceiptInfo, RpcFailure, RpcResult};
use crate::chains::ChainConfig;
use crate::{Error, Result};
use alloy::hex;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::transports::{RpcError, TransportError};
use async_trait::async_trait;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// JSON-RPC client for one chain
#[derive(Clone)]
pub struct AlloyRpc {
    provider: Arc<dyn Provider + Send + Sync>,
    chain_id: u64,
    timeout_duration: Duration,
}

impl AlloyRpc {
    pub fn connect(config: &ChainConfig, timeout_duration: Duration) -> Result<Self> {
        let url: url::Url = config.rpc_endpoint.parse().map_err(|e| {
            Error::Config(format!("Invalid RPC URL for {}: {}", config.chain, e))
        })?;
        let provider = Arc::new(ProviderBuilder::new().connect_http(url))
            as Arc<dyn Provider + Send + Sync>;

        tracing::debug!(chain_id = config.chain_id, "RPC provider connected");

        Ok(Self {
            provider,
            chain_id: config.chain_id,
            timeout_duration,
        })
    }

    async fn timed<T, F>(&self, what: &'static str, fut: F) -> RpcResult<T>
    where
        F: IntoFuture<Output = std::result::Result<T, TransportError>>,
    {
        match timeout(self.timeout_duration, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                let failure = classify(&e);
                tracing::debug!(chain_id = self.chain_id, operation = what, error = %e, "RPC error");
                Err(failure)
            }
            Err(_) => {
                tracing::debug!(chain_id = self.chain_id, operation = what, "RPC timeout");
                Err(RpcFailure::Transient(format!("{} timed out", what)))
            }
        }
    }
}

fn to_request(request: &CallRequest) -> TransactionRequest {
    let mut tx = TransactionRequest::default()
        .to(request.to)
        .input(request.data.clone().into())
        .value(request.value);
    if let Some(from) = request.from {
        tx = tx.from(from);
    }
    tx
}

/// Sort a transport error into transient or rejected
fn classify(error: &TransportError) -> RpcFailure {
    match error {
        RpcError::ErrorResp(payload) => {
            let message = payload.message.to_string();
            if is_transient_message(&message) || payload.code == 429 {
                RpcFailure::Transient(message)
            } else {
                RpcFailure::Rejected(parse_revert_reason(&error.to_string()))
            }
        }
        RpcError::DeserError { .. } => {
            RpcFailure::Rejected(format!("Malformed RPC response: {}", error))
        }
        other => RpcFailure::Transient(other.to_string()),
    }
}

fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    [
        "rate limit",
        "too many requests",
        "timeout",
        "timed out",
        "temporarily",
        "unavailable",
        "header not found",
        "try again",
    ]
    .iter()
    .any(|p| lower.contains(p))
}

/// Parse revert reason from RPC error message
pub fn parse_revert_reason(error: &str) -> String {
    if error.contains("execution reverted") {
        // "execution reverted: revert: <reason>"
        if let Some(start) = error.find("revert: ") {
            let reason = &error[start + 8..];
            if let Some(end) = reason.find('"') {
                return reason[..end].to_string();
            }
            return reason.to_string();
        }
        // Hex revert data; decode Error(string) when present
        if let Some(start) = error.find("0x") {
            let hex_data = &error[start..];
            let end = hex_data[2..]
                .find(|c: char| !c.is_ascii_hexdigit())
                .map(|i| i + 2)
                .unwrap_or(hex_data.len());
            let data = &hex_data[..end];
            if data.starts_with("0x08c379a0") && data.len() > 138 {
                if let Ok(decoded) = hex::decode(&data[138..]) {
                    let filtered: Vec<u8> = decoded.into_iter().filter(|&b| b != 0).collect();
                    if let Ok(s) = String::from_utf8(filtered) {
                        return s;
                    }
                }
            }
            return format!("Reverted with data: {}", data);
        }
        return "execution reverted".to_string();
    }

    error.to_string()
}

#[async_trait]
impl ChainRpc for AlloyRpc {
    async fn balance(&self, address: Address) -> RpcResult<U256> {
        self.timed("eth_getBalance", self.provider.get_balance(address))
            .await
    }

    async fn call(&self, request: &CallRequest) -> RpcResult<Bytes> {
        self.timed("eth_call", self.provider.call(to_request(request)))
            .await
    }

    async fn code_at(&self, address: Address) -> RpcResult<Bytes> {
        self.timed("eth_getCode", self.provider.get_code_at(address))
            .await
    }

    async fn transaction_count(&self, address: Address) -> RpcResult<u64> {
        self.timed(
            "eth_getTransactionCount",
            self.provider.get_transaction_count(address).pending(),
        )
        .await
    }

    async fn fee_estimate(&self) -> RpcResult<FeeEstimate> {
        let estimate = self
            .timed("eth_feeHistory", self.provider.estimate_eip1559_fees())
            .await?;
        Ok(FeeEstimate {
            max_fee_per_gas: estimate.max_fee_per_gas,
            max_priority_fee_per_gas: estimate.max_priority_fee_per_gas,
        })
    }

    async fn estimate_gas(&self, request: &CallRequest) -> RpcResult<u64> {
        self.timed("eth_estimateGas", self.provider.estimate_gas(to_request(request)))
            .await
    }

    async fn send_raw(&self, raw: &[u8]) -> RpcResult<B256> {
        let pending = self
            .timed("eth_sendRawTransaction", self.provider.send_raw_transaction(raw))
            .await?;
        Ok(*pending.tx_hash())
    }

    async fn receipt(&self, hash: B256) -> RpcResult<Option<ReceiptInfo>> {
        let receipt = self
            .timed(
                "eth_getTransactionReceipt",
                self.provider.get_transaction_receipt(hash),
            )
            .await?;
        Ok(receipt.map(|r| ReceiptInfo {
            success: r.status(),
            block_number: r.block_number.unwrap_or_default(),
            gas_used: r.gas_used,
        }))
    }

    async fn is_known(&self, hash: B256) -> RpcResult<bool> {
        let tx = self
            .timed(
                "eth_getTransactionByHash",
                self.provider.get_transaction_by_hash(hash),
            )
            .await?;
        Ok(tx.is_some())
    }
}
