use crate::responses::{QuoteEnvelope, QuoteResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use configuration::MarketDataConfig;
use core_types::Quote;
use std::collections::{BTreeSet, HashMap};

pub mod error;
pub mod responses;

// --- Public API ---
pub use error::ApiError;

/// The abstract interface for a batch market-data source.
/// The quote cache depends only on this trait, so the HTTP client can be
/// swapped for a scripted provider in tests.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Fetches the latest quote for every requested symbol.
    ///
    /// The result may be partial: symbols the provider does not know, or
    /// reports without a usable price, are simply absent from the map.
    async fn fetch_quotes(&self, symbols: &BTreeSet<String>) -> Result<HashMap<String, Quote>, ApiError>;
}

/// A `QuoteProvider` for the `/v7/finance/quote` batch endpoint.
#[derive(Clone)]
pub struct HttpQuoteClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpQuoteClient {
    pub fn new(market_data: &MarketDataConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(market_data.request_timeout())
            .user_agent(concat!("papertrade/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: market_data.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl QuoteProvider for HttpQuoteClient {
    async fn fetch_quotes(&self, symbols: &BTreeSet<String>) -> Result<HashMap<String, Quote>, ApiError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!("{}/v7/finance/quote", self.base_url);
        let joined = symbols.iter().map(String::as_str).collect::<Vec<_>>().join(",");

        let response = self.client.get(&url).query(&[("symbols", joined.as_str())]).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16(), text));
        }

        let envelope: QuoteEnvelope =
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialization(e.to_string()))?;

        if let Some(error) = envelope.quote_response.error.filter(|e| !e.is_null()) {
            return Err(ApiError::Provider(error.to_string()));
        }

        Ok(collect_quotes(envelope.quote_response.result, Utc::now()))
    }
}

/// Converts wire records into validated quotes, dropping the unusable ones.
fn collect_quotes(results: Vec<QuoteResult>, fetched_at: DateTime<Utc>) -> HashMap<String, Quote> {
    let mut quotes = HashMap::with_capacity(results.len());
    for result in results {
        let symbol = result.symbol.clone();
        match result.into_quote(fetched_at) {
            Ok(quote) => {
                quotes.insert(quote.symbol().to_string(), quote);
            }
            Err(e) => tracing::debug!(symbol = %symbol, error = %e, "Skipping unusable quote."),
        }
    }
    quotes
}
