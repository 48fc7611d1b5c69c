use chrono::{DateTime, Utc};
use core_types::{CoreError, Quote};
use rust_decimal::Decimal;
use serde::Deserialize;

// Using `#[serde(rename_all = "camelCase")]` to automatically map from JSON camelCase to Rust snake_case.

/// The top-level body of `GET /v7/finance/quote`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteEnvelope {
    pub quote_response: QuoteResponse,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteResponse {
    #[serde(default)]
    pub result: Vec<QuoteResult>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// One symbol's entry. Every price field may be missing for delisted or
/// unknown symbols.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResult {
    pub symbol: String,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub regular_market_price: Option<Decimal>,
    #[serde(default)]
    pub regular_market_change: Option<Decimal>,
    #[serde(default)]
    pub regular_market_change_percent: Option<Decimal>,
    #[serde(default)]
    pub regular_market_previous_close: Option<Decimal>,
}

impl QuoteResult {
    /// Converts the wire record into a validated `Quote`.
    pub fn into_quote(self, fetched_at: DateTime<Utc>) -> Result<Quote, CoreError> {
        let price = self.regular_market_price.ok_or_else(|| {
            CoreError::InvalidInput("price".to_string(), format!("no market price for {}", self.symbol))
        })?;

        let quote = Quote::new(
            &self.symbol,
            price,
            self.regular_market_change,
            self.regular_market_change_percent,
            self.regular_market_previous_close,
            fetched_at,
        )?;
        Ok(match self.short_name {
            Some(name) => quote.with_name(name),
            None => quote,
        })
    }
}
