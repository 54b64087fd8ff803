//! Odos DEX aggregator backend
//!
//! Quotes and router calldata come from odos-sdk's swap builder. This module
//! only prepares transactions; it never signs them.

use super::{AggregatorFailure, AssembledSwap, QuoteRequest, RawQuote, SwapAggregator};
use crate::chains::Chain;
use crate::{Error, Result};
use alloy::primitives::{Bytes, U256};
use async_trait::async_trait;
use odos_sdk::Slippage;
use std::str::FromStr;

/// Slippage used for quote-only requests; execution passes its own
const QUOTE_SLIPPAGE_PERCENT: f64 = 1.0;

pub struct OdosAggregator {
    client: odos_sdk::OdosClient,
}

impl OdosAggregator {
    pub fn new() -> Result<Self> {
        let client = odos_sdk::OdosClient::new()
            .map_err(|e| Error::Config(format!("Failed to create Odos client: {}", e)))?;
        Ok(Self { client })
    }

    fn odos_chain(chain: Chain) -> odos_sdk::Chain {
        match chain {
            Chain::Ethereum => odos_sdk::Chain::ethereum(),
            Chain::Polygon => odos_sdk::Chain::polygon(),
            Chain::Base => odos_sdk::Chain::base(),
            Chain::Arbitrum => odos_sdk::Chain::arbitrum(),
            Chain::Optimism => odos_sdk::Chain::optimism(),
        }
    }

    fn slippage(percent: f64) -> std::result::Result<Slippage, AggregatorFailure> {
        Slippage::percent(percent)
            .map_err(|e| AggregatorFailure::NoRoute(format!("Invalid slippage: {}", e)))
    }
}

/// Route and input errors are final; everything else is worth another try
fn classify(message: String) -> AggregatorFailure {
    let lower = message.to_lowercase();
    let permanent = [
        "no path",
        "no route",
        "liquidity",
        "not supported",
        "unsupported",
        "invalid token",
        "400",
        "422",
    ];
    if permanent.iter().any(|p| lower.contains(p)) {
        AggregatorFailure::NoRoute(message)
    } else {
        AggregatorFailure::Transient(message)
    }
}

#[async_trait]
impl SwapAggregator for OdosAggregator {
    async fn quote(&self, request: &QuoteRequest) -> std::result::Result<RawQuote, AggregatorFailure> {
        let quote = self
            .client
            .swap()
            .chain(Self::odos_chain(request.chain))
            .from_token(request.from_token, request.amount_in)
            .to_token(request.to_token)
            .slippage(Self::slippage(QUOTE_SLIPPAGE_PERCENT)?)
            .signer(request.taker)
            .quote()
            .await
            .map_err(|e| classify(format!("Odos quote failed: {}", e)))?;

        let out = quote
            .out_amount()
            .ok_or_else(|| AggregatorFailure::NoRoute("Odos returned no output amount".to_string()))?;
        let amount_out = U256::from_str(out).map_err(|e| {
            AggregatorFailure::Transient(format!("Malformed Odos output amount '{}': {}", out, e))
        })?;

        let price_impact = serde_json::to_value(quote.price_impact())
            .ok()
            .and_then(|v| v.as_f64());

        Ok(RawQuote {
            amount_out,
            route: quote.path_id().to_string(),
            price_impact,
        })
    }

    async fn assemble(
        &self,
        request: &QuoteRequest,
        slippage_bps: u16,
    ) -> std::result::Result<AssembledSwap, AggregatorFailure> {
        let slippage = Self::slippage(f64::from(slippage_bps) / 100.0)?;

        let tx = self
            .client
            .swap()
            .chain(Self::odos_chain(request.chain))
            .from_token(request.from_token, request.amount_in)
            .to_token(request.to_token)
            .slippage(slippage)
            .signer(request.taker)
            .build_transaction()
            .await
            .map_err(|e| classify(format!("Odos transaction build failed: {}", e)))?;

        let to = tx
            .to
            .and_then(|kind| kind.to().copied())
            .ok_or_else(|| AggregatorFailure::Transient("Odos returned no router address".to_string()))?;
        let data = tx.input.input.clone().unwrap_or_else(Bytes::new);
        let value = tx.value.unwrap_or(U256::ZERO);

        tracing::debug!(router = %to, data_len = data.len(), value = %value, "Odos swap assembled");

        Ok(AssembledSwap { to, data, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert!(matches!(
            classify("Odos quote failed: No path found".to_string()),
            AggregatorFailure::NoRoute(_)
        ));
        assert!(matches!(
            classify("Odos quote failed: insufficient liquidity".to_string()),
            AggregatorFailure::NoRoute(_)
        ));
        assert!(matches!(
            classify("Odos quote failed: error sending request".to_string()),
            AggregatorFailure::Transient(_)
        ));
    }

    #[test]
    fn test_slippage_conversion() {
        assert!(OdosAggregator::slippage(1.0).is_ok());
        assert!(OdosAggregator::slippage(0.5).is_ok());
    }
}
