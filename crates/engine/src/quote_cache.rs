use crate::error::EngineError;
use api_client::QuoteProvider;
use configuration::MarketDataConfig;
use core_types::Quote;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// A cached quote together with its freshness at read time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedQuote {
    pub quote: Quote,
    /// True once the entry is older than the cache's freshness threshold.
    pub stale: bool,
}

/// The outcome of a refresh that returned at least one usable quote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub updated: Vec<String>,
    /// Requested symbols the provider did not return. Their previous quotes,
    /// if any, are still cached.
    pub missing: Vec<String>,
}

#[derive(Debug, Clone)]
struct Entry {
    quote: Quote,
    refreshed_at: Instant,
}

/// Last known quote per symbol.
///
/// Entries are replaced wholesale by a refresh and are never removed: a
/// failed or partial refresh leaves the previous quote in place, flagged as
/// stale once it ages past `stale_after`.
pub struct QuoteCache {
    provider: Arc<dyn QuoteProvider>,
    entries: RwLock<HashMap<String, Entry>>,
    stale_after: Duration,
    request_timeout: Duration,
}

impl QuoteCache {
    pub fn new(provider: Arc<dyn QuoteProvider>, stale_after: Duration, request_timeout: Duration) -> Self {
        Self {
            provider,
            entries: RwLock::new(HashMap::new()),
            stale_after,
            request_timeout,
        }
    }

    pub fn from_config(provider: Arc<dyn QuoteProvider>, market_data: &MarketDataConfig) -> Self {
        Self::new(provider, market_data.stale_after(), market_data.request_timeout())
    }

    /// Looks up every requested symbol. Symbols never fetched map to `None`.
    pub async fn get_many(&self, symbols: &BTreeSet<String>) -> BTreeMap<String, Option<CachedQuote>> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        symbols
            .iter()
            .map(|symbol| {
                let cached = entries.get(symbol).map(|entry| CachedQuote {
                    quote: entry.quote.clone(),
                    stale: self.is_expired(entry, now),
                });
                (symbol.clone(), cached)
            })
            .collect()
    }

    /// The cached quote for `symbol`, stale or not.
    pub async fn get(&self, symbol: &str) -> Option<Quote> {
        self.entries.read().await.get(symbol).map(|entry| entry.quote.clone())
    }

    /// The cached quote for `symbol` only if it is still fresh.
    pub async fn get_fresh(&self, symbol: &str) -> Option<Quote> {
        let entries = self.entries.read().await;
        let entry = entries.get(symbol)?;
        (!self.is_expired(entry, Instant::now())).then(|| entry.quote.clone())
    }

    /// True when the symbol has no quote or its quote is older than the threshold.
    pub async fn is_stale(&self, symbol: &str) -> bool {
        match self.entries.read().await.get(symbol) {
            Some(entry) => self.is_expired(entry, Instant::now()),
            None => true,
        }
    }

    /// Every cached quote, stale ones included.
    pub async fn snapshot(&self) -> HashMap<String, Quote> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(symbol, entry)| (symbol.clone(), entry.quote.clone()))
            .collect()
    }

    /// Fetches `symbols` in one batch and stores whatever comes back.
    ///
    /// A provider error, a timeout, or a response with nothing usable is a
    /// `QuoteFetchFailed` and leaves the cache untouched. A partial response
    /// is a success; the symbols it omitted are listed in the report.
    pub async fn refresh(&self, symbols: &BTreeSet<String>) -> Result<RefreshReport, EngineError> {
        if symbols.is_empty() {
            return Ok(RefreshReport::default());
        }

        let fetch_failed = |reason: String| EngineError::QuoteFetchFailed {
            symbols: symbols.iter().cloned().collect::<Vec<_>>().join(","),
            reason,
        };

        let fetched = match tokio::time::timeout(self.request_timeout, self.provider.fetch_quotes(symbols)).await {
            Ok(Ok(quotes)) => quotes,
            Ok(Err(e)) => return Err(fetch_failed(e.to_string())),
            Err(_) => return Err(fetch_failed(format!("timed out after {:?}", self.request_timeout))),
        };

        let mut entries = self.entries.write().await;
        let refreshed_at = Instant::now();
        let mut report = RefreshReport::default();
        for symbol in symbols {
            match fetched.get(symbol) {
                Some(quote) => {
                    entries.insert(
                        symbol.clone(),
                        Entry {
                            quote: quote.clone(),
                            refreshed_at,
                        },
                    );
                    report.updated.push(symbol.clone());
                }
                None => report.missing.push(symbol.clone()),
            }
        }

        if report.updated.is_empty() {
            return Err(fetch_failed("provider returned no usable quotes".to_string()));
        }

        tracing::debug!(
            updated = report.updated.len(),
            missing = ?report.missing,
            "Refreshed quotes."
        );
        Ok(report)
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        now.saturating_duration_since(entry.refreshed_at) > self.stale_after
    }
}
