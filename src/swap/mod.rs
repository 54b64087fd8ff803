//! Swap quotes from a DEX aggregator
//!
//! [`SwapQuoteClient`] stamps aggregator quotes with a validity window and
//! classifies failures: "no route" is final, anything else is retried.

mod odos;

pub use odos::OdosAggregator;

use crate::chains::Chain;
use crate::rpc::retry::Retryable;
use crate::rpc::{with_retry, RetryPolicy};
use crate::{Error, Result};
use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Classified aggregator failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregatorFailure {
    /// No liquidity or route for the pair; retrying will not help
    #[error("{0}")]
    NoRoute(String),
    #[error("{0}")]
    Transient(String),
}

impl Retryable for AggregatorFailure {
    fn is_transient(&self) -> bool {
        matches!(self, AggregatorFailure::Transient(_))
    }
}

impl From<AggregatorFailure> for Error {
    fn from(failure: AggregatorFailure) -> Self {
        match failure {
            AggregatorFailure::NoRoute(msg) => Error::Aggregator(msg),
            AggregatorFailure::Transient(msg) => Error::Rpc(format!("swap aggregator: {}", msg)),
        }
    }
}

/// What to quote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub chain: Chain,
    pub from_token: Address,
    pub to_token: Address,
    pub amount_in: U256,
    pub taker: Address,
}

/// Aggregator answer before the validity window is applied
#[derive(Debug, Clone, PartialEq)]
pub struct RawQuote {
    pub amount_out: U256,
    pub route: String,
    pub price_impact: Option<f64>,
}

/// Executable router call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledSwap {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// A priced route, valid until `valid_until`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapQuote {
    pub chain: Chain,
    pub from_token: Address,
    pub to_token: Address,
    pub amount_in: U256,
    pub amount_out: U256,
    pub route: String,
    pub price_impact: Option<f64>,
    pub taker: Address,
    pub fetched_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl SwapQuote {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }

    /// Minimum acceptable output at `slippage_bps`
    pub fn min_out(&self, slippage_bps: u16) -> U256 {
        let keep = U256::from(10_000u64 - u64::from(slippage_bps.min(10_000)));
        self.amount_out * keep / U256::from(10_000u64)
    }

    pub fn request(&self) -> QuoteRequest {
        QuoteRequest {
            chain: self.chain,
            from_token: self.from_token,
            to_token: self.to_token,
            amount_in: self.amount_in,
            taker: self.taker,
        }
    }
}

/// DEX aggregator backend
#[async_trait]
pub trait SwapAggregator: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> std::result::Result<RawQuote, AggregatorFailure>;

    /// Router transaction for `request` with `slippage_bps` tolerance
    async fn assemble(
        &self,
        request: &QuoteRequest,
        slippage_bps: u16,
    ) -> std::result::Result<AssembledSwap, AggregatorFailure>;
}

pub struct SwapQuoteClient {
    aggregator: Arc<dyn SwapAggregator>,
    retry: RetryPolicy,
    quote_ttl: Duration,
}

impl SwapQuoteClient {
    pub fn new(aggregator: Arc<dyn SwapAggregator>, retry: RetryPolicy, quote_ttl: Duration) -> Self {
        Self {
            aggregator,
            retry,
            quote_ttl,
        }
    }

    pub async fn quote(
        &self,
        chain: Chain,
        from_token: Address,
        to_token: Address,
        amount_in: U256,
        taker: Address,
    ) -> Result<SwapQuote> {
        if amount_in.is_zero() {
            return Err(Error::Validation("Swap amount must be greater than 0".to_string()));
        }
        if from_token == to_token {
            return Err(Error::Validation("Cannot swap a token for itself".to_string()));
        }

        let request = QuoteRequest {
            chain,
            from_token,
            to_token,
            amount_in,
            taker,
        };
        let raw = self.fetch(&request).await?;

        if raw.amount_out.is_zero() {
            return Err(Error::Aggregator(format!(
                "No output available for {} on {}",
                to_token, chain
            )));
        }

        let fetched_at = Utc::now();
        let ttl = chrono::Duration::from_std(self.quote_ttl)
            .map_err(|e| Error::Config(format!("Invalid quote TTL: {}", e)))?;

        tracing::info!(
            chain = %chain,
            from_token = %from_token,
            to_token = %to_token,
            amount_in = %amount_in,
            amount_out = %raw.amount_out,
            route = %raw.route,
            "Swap quote received"
        );

        Ok(SwapQuote {
            chain,
            from_token,
            to_token,
            amount_in,
            amount_out: raw.amount_out,
            route: raw.route,
            price_impact: raw.price_impact,
            taker,
            fetched_at,
            valid_until: fetched_at + ttl,
        })
    }

    /// Executable call data for a previously fetched quote
    ///
    /// The route is priced again first. If the fresh price can no longer
    /// deliver `min_out` the quote is treated as expired; otherwise the
    /// router's tolerance is narrowed so its floor stays at `min_out` or above.
    pub async fn swap_call(
        &self,
        quote: &SwapQuote,
        slippage_bps: u16,
        min_out: U256,
    ) -> Result<AssembledSwap> {
        let request = &quote.request();
        let fresh = self.fetch(request).await?;

        let Some(slippage_bps) = slippage_within(fresh.amount_out, min_out, slippage_bps) else {
            tracing::warn!(
                chain = %quote.chain,
                quoted_out = %quote.amount_out,
                fresh_out = %fresh.amount_out,
                min_out = %min_out,
                "Price moved below the confirmed minimum"
            );
            return Err(Error::QuoteExpired);
        };

        let aggregator = self.aggregator.as_ref();
        let call_timeout = self.retry.call_timeout;
        let assembled = with_retry(&self.retry, "aggregator_assemble", || async move {
            match tokio::time::timeout(call_timeout, aggregator.assemble(request, slippage_bps)).await {
                Ok(result) => result,
                Err(_) => Err(AggregatorFailure::Transient("assemble request timed out".to_string())),
            }
        })
        .await?;
        Ok(assembled)
    }

    async fn fetch(&self, request: &QuoteRequest) -> Result<RawQuote> {
        let aggregator = self.aggregator.as_ref();
        let call_timeout = self.retry.call_timeout;
        let raw = with_retry(&self.retry, "aggregator_quote", || async move {
            match tokio::time::timeout(call_timeout, aggregator.quote(request)).await {
                Ok(result) => result,
                Err(_) => Err(AggregatorFailure::Transient("quote request timed out".to_string())),
            }
        })
        .await?;
        Ok(raw)
    }
}

/// Largest tolerance, up to `slippage_bps`, that keeps `amount_out` above `min_out`
///
/// `None` when `amount_out` itself is below `min_out`.
fn slippage_within(amount_out: U256, min_out: U256, slippage_bps: u16) -> Option<u16> {
    if amount_out.is_zero() || amount_out < min_out {
        return None;
    }
    let headroom = (amount_out - min_out) * U256::from(10_000u64) / amount_out;
    let headroom = u16::try_from(headroom).unwrap_or(u16::MAX);
    Some(headroom.min(slippage_bps))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Aggregator quoting at a settable rate, with scriptable failures
    pub struct MockAggregator {
        /// Output per unit input, as (numerator, denominator)
        rate: Mutex<(u64, u64)>,
        router: Address,
        failures: Mutex<Vec<AggregatorFailure>>,
        pub quote_calls: AtomicUsize,
        pub assemble_calls: AtomicUsize,
        assembled_slippage: Mutex<Option<u16>>,
    }

    impl MockAggregator {
        pub fn new(rate: (u64, u64)) -> Self {
            Self {
                rate: Mutex::new(rate),
                router: Address::repeat_byte(0xee),
                failures: Mutex::new(Vec::new()),
                quote_calls: AtomicUsize::new(0),
                assemble_calls: AtomicUsize::new(0),
                assembled_slippage: Mutex::new(None),
            }
        }

        /// Queue failures returned by the next quote calls, in order
        pub fn failing_with(self, failures: Vec<AggregatorFailure>) -> Self {
            *self.failures.lock().unwrap() = failures.into_iter().rev().collect();
            self
        }

        /// Reprice every later quote
        pub fn set_rate(&self, rate: (u64, u64)) {
            *self.rate.lock().unwrap() = rate;
        }

        /// Tolerance passed to the last assemble call
        pub fn assembled_slippage(&self) -> Option<u16> {
            *self.assembled_slippage.lock().unwrap()
        }

        pub fn router(&self) -> Address {
            self.router
        }

        pub fn quote_calls(&self) -> usize {
            self.quote_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SwapAggregator for MockAggregator {
        async fn quote(&self, request: &QuoteRequest) -> std::result::Result<RawQuote, AggregatorFailure> {
            self.quote_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(failure) = self.failures.lock().unwrap().pop() {
                return Err(failure);
            }
            let (num, den) = *self.rate.lock().unwrap();
            Ok(RawQuote {
                amount_out: request.amount_in * U256::from(num) / U256::from(den),
                route: "mock-path".to_string(),
                price_impact: Some(0.1),
            })
        }

        async fn assemble(
            &self,
            request: &QuoteRequest,
            slippage_bps: u16,
        ) -> std::result::Result<AssembledSwap, AggregatorFailure> {
            self.assemble_calls.fetch_add(1, Ordering::SeqCst);
            *self.assembled_slippage.lock().unwrap() = Some(slippage_bps);
            Ok(AssembledSwap {
                to: self.router,
                data: Bytes::from(vec![0x83, 0xbd, 0x37, 0xf9]),
                value: if request.from_token == crate::tokens::addresses::NATIVE {
                    request.amount_in
                } else {
                    U256::ZERO
                },
            })
        }
    }
}
