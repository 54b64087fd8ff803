//! Submission and receipt tracking

use crate::chains::Chain;
use crate::rpc::{with_retry, CallRequest, ChainRpc, RetryPolicy, RpcFailure, RpcPool};
use crate::wallet::SignedTransaction;
use crate::{Error, Result};
use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};

/// Outcome of waiting for a receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReceiptStatus {
    Confirmed {
        block_number: u64,
        gas_used: u64,
    },
    Reverted {
        block_number: u64,
        gas_used: u64,
        /// Revert reason from replaying the call, when the node gives one
        reason: Option<String>,
    },
    /// No receipt within the polling window; the transaction may still land
    TimedOut,
}

/// Result of a single receipt lookup for a broadcast transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Mined(ReceiptStatus),
    Pending,
    /// Unknown to the node: evicted or replaced
    Dropped,
}

/// Floor for the receipt polling period; a zero period cannot tick
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Node messages meaning the transaction is already in the pool
const ALREADY_KNOWN: [&str; 3] = ["already known", "known transaction", "already imported"];

pub struct Broadcaster {
    rpc: RpcPool,
    retry: RetryPolicy,
    poll_interval: Duration,
    receipt_timeout: Duration,
}

impl Broadcaster {
    pub fn new(
        rpc: RpcPool,
        retry: RetryPolicy,
        poll_interval: Duration,
        receipt_timeout: Duration,
    ) -> Self {
        Self {
            rpc,
            retry,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            receipt_timeout,
        }
    }

    pub fn receipt_timeout(&self) -> Duration {
        self.receipt_timeout
    }

    /// Submit a signed transaction; resubmission of a known transaction succeeds
    pub async fn submit(&self, signed: &SignedTransaction) -> Result<B256> {
        let chain = signed.unsigned.chain;
        let rpc = self.rpc.get(chain)?;
        let rpc = rpc.as_ref();
        let raw = signed.raw.as_ref();

        let result = with_retry(&self.retry, "eth_sendRawTransaction", || rpc.send_raw(raw)).await;

        match result {
            Ok(hash) => {
                if hash != signed.tx_hash {
                    tracing::warn!(expected = %signed.tx_hash, returned = %hash, "Node returned unexpected tx hash");
                }
                tracing::info!(chain = %chain, tx_hash = %signed.tx_hash, "Transaction submitted");
                Ok(signed.tx_hash)
            }
            Err(RpcFailure::Rejected(msg)) if is_already_known(&msg) => {
                tracing::info!(chain = %chain, tx_hash = %signed.tx_hash, "Transaction already known to node");
                Ok(signed.tx_hash)
            }
            Err(RpcFailure::Transient(msg)) => {
                // An earlier attempt may have reached the pool before the connection failed
                if matches!(rpc.is_known(signed.tx_hash).await, Ok(true)) {
                    tracing::info!(chain = %chain, tx_hash = %signed.tx_hash, "Transaction found in pool after transient failure");
                    return Ok(signed.tx_hash);
                }
                Err(Error::Rpc(msg))
            }
            Err(RpcFailure::Rejected(msg)) => {
                tracing::warn!(chain = %chain, tx_hash = %signed.tx_hash, reason = %msg, "Transaction rejected");
                Err(Error::RpcRejected(msg))
            }
        }
    }

    /// Poll for a receipt until `wait` elapses
    pub async fn poll_receipt(
        &self,
        chain: Chain,
        tx_hash: B256,
        wait: Duration,
        replay: Option<&CallRequest>,
    ) -> Result<ReceiptStatus> {
        let rpc = self.rpc.get(chain)?;
        let rpc = rpc.as_ref();

        let polled = timeout(wait, async {
            let mut ticker = interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                match rpc.receipt(tx_hash).await {
                    Ok(Some(receipt)) => return self.outcome(rpc, receipt, replay).await,
                    Ok(None) => {
                        tracing::debug!(tx_hash = %tx_hash, "Transaction pending");
                    }
                    Err(e) => {
                        tracing::debug!(tx_hash = %tx_hash, error = %e, "Receipt lookup failed");
                    }
                }
            }
        })
        .await;

        match polled {
            Ok(status) => Ok(status),
            Err(_) => {
                tracing::warn!(chain = %chain, tx_hash = %tx_hash, wait_secs = wait.as_secs(), "No receipt before timeout");
                Ok(ReceiptStatus::TimedOut)
            }
        }
    }

    /// One receipt lookup; reports `Dropped` if the node no longer knows the hash
    pub async fn reconcile(
        &self,
        chain: Chain,
        tx_hash: B256,
        replay: Option<&CallRequest>,
    ) -> Result<Reconciliation> {
        let rpc = self.rpc.get(chain)?;
        let rpc = rpc.as_ref();

        let receipt = with_retry(&self.retry, "eth_getTransactionReceipt", || rpc.receipt(tx_hash)).await?;
        if let Some(receipt) = receipt {
            return Ok(Reconciliation::Mined(self.outcome(rpc, receipt, replay).await));
        }

        let known = with_retry(&self.retry, "eth_getTransactionByHash", || rpc.is_known(tx_hash)).await?;
        Ok(if known {
            Reconciliation::Pending
        } else {
            Reconciliation::Dropped
        })
    }

    async fn outcome(
        &self,
        rpc: &dyn ChainRpc,
        receipt: crate::rpc::ReceiptInfo,
        replay: Option<&CallRequest>,
    ) -> ReceiptStatus {
        if receipt.success {
            return ReceiptStatus::Confirmed {
                block_number: receipt.block_number,
                gas_used: receipt.gas_used,
            };
        }

        let reason = match replay {
            Some(call) => match rpc.call(call).await {
                Err(RpcFailure::Rejected(reason)) => Some(reason),
                _ => None,
            },
            None => None,
        };

        ReceiptStatus::Reverted {
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            reason,
        }
    }
}

fn is_already_known(message: &str) -> bool {
    let lower = message.to_lowercase();
    ALREADY_KNOWN.iter().any(|p| lower.contains(p))
}
