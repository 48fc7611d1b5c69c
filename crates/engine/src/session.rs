use crate::error::EngineError;
use crate::quote_cache::{CachedQuote, QuoteCache, RefreshReport};
use crate::scheduler::PollingScheduler;
use chrono::Utc;
use core_types::{normalize_symbol, AccountId, Holding, OrderSide, Trade};
use events::SessionEvent;
use executor::{
    activity_series, validate_quantity, value_holdings, ActivityPoint, PortfolioValuation, TradeExecutor, TradeReceipt,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

const EVENT_CAPACITY: usize = 256;

/// Cash and realized results of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSummary {
    pub account: AccountId,
    pub cash_balance: Decimal,
    pub realized_profit: Decimal,
    pub realized_loss: Decimal,
    pub net_realized: Decimal,
}

/// The composition root for one account.
///
/// Owns the account's quote cache, its watch list and its polling scheduler.
/// Trades go through the shared `TradeExecutor`, which serializes every
/// mutation of the account across all sessions using it.
pub struct AccountSession {
    account: AccountId,
    executor: Arc<TradeExecutor>,
    cache: Arc<QuoteCache>,
    events: broadcast::Sender<SessionEvent>,
    watched: Mutex<BTreeSet<String>>,
    scheduler: Mutex<Option<PollingScheduler>>,
    poll_interval: Duration,
}

impl AccountSession {
    pub fn new(
        account: AccountId,
        executor: Arc<TradeExecutor>,
        cache: Arc<QuoteCache>,
        poll_interval: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            account,
            executor,
            cache,
            events,
            watched: Mutex::new(BTreeSet::new()),
            scheduler: Mutex::new(None),
            poll_interval,
        }
    }

    /// Trade, refresh and failure notifications for this session.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn get_holdings(&self) -> Result<BTreeMap<String, Holding>, EngineError> {
        Ok(self.executor.holdings(&self.account).await?)
    }

    /// Cached quotes for display, stale ones flagged. Never triggers a fetch.
    pub async fn get_display_prices<I, S>(&self, symbols: I) -> Result<BTreeMap<String, Option<CachedQuote>>, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols = symbols
            .into_iter()
            .map(|s| normalize_symbol(s.as_ref()))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(self.cache.get_many(&symbols).await)
    }

    pub async fn buy(&self, symbol: &str, quantity: Decimal) -> Result<TradeReceipt, EngineError> {
        self.trade(OrderSide::Buy, symbol, quantity).await
    }

    pub async fn sell(&self, symbol: &str, quantity: Decimal) -> Result<TradeReceipt, EngineError> {
        self.trade(OrderSide::Sell, symbol, quantity).await
    }

    async fn trade(&self, side: OrderSide, symbol: &str, quantity: Decimal) -> Result<TradeReceipt, EngineError> {
        validate_quantity(quantity).map_err(EngineError::Trade)?;
        let symbol = normalize_symbol(symbol)?;
        let reference_price = self.reference_price(&symbol).await;

        // The execution runs on its own task so that dropping this future
        // cannot interrupt it between the store reads and the commit.
        let executor = Arc::clone(&self.executor);
        let account = self.account.clone();
        let receipt = tokio::spawn(async move {
            match side {
                OrderSide::Buy => executor.execute_buy(&account, &symbol, quantity, reference_price).await,
                OrderSide::Sell => executor.execute_sell(&account, &symbol, quantity, reference_price).await,
            }
        })
        .await
        .map_err(|e| EngineError::TaskFailed(e.to_string()))??;

        let _ = self.events.send(SessionEvent::TradeExecuted {
            account: self.account.clone(),
            trade: receipt.trade.clone(),
        });
        self.sync_watch_set().await;
        Ok(receipt)
    }

    /// The price a trade executes at: the cached quote if fresh, otherwise
    /// the result of an on-demand refresh of just this symbol.
    async fn reference_price(&self, symbol: &str) -> Option<Decimal> {
        if let Some(quote) = self.cache.get_fresh(symbol).await {
            return Some(quote.price());
        }

        let request = BTreeSet::from([symbol.to_string()]);
        if let Err(e) = self.cache.refresh(&request).await {
            tracing::warn!(account = %self.account, symbol, error = %e, "Could not price trade.");
            let _ = self.events.send(SessionEvent::QuoteFetchFailed {
                symbols: vec![symbol.to_string()],
                reason: e.to_string(),
                at: Utc::now(),
            });
        }
        self.cache.get_fresh(symbol).await.map(|quote| quote.price())
    }

    /// Fetches quotes now, outside the polling schedule.
    pub async fn refresh_quotes(&self, symbols: &BTreeSet<String>) -> Result<RefreshReport, EngineError> {
        self.cache.refresh(symbols).await
    }

    /// Adds a symbol to the polled set without taking a position in it.
    pub async fn watch(&self, symbol: &str) -> Result<(), EngineError> {
        let symbol = normalize_symbol(symbol)?;
        self.watched.lock().await.insert(symbol);
        self.sync_watch_set().await;
        Ok(())
    }

    pub async fn unwatch(&self, symbol: &str) -> Result<(), EngineError> {
        let symbol = normalize_symbol(symbol)?;
        self.watched.lock().await.remove(&symbol);
        self.sync_watch_set().await;
        Ok(())
    }

    /// Held symbols plus explicitly watched ones.
    pub async fn watch_set(&self) -> Result<BTreeSet<String>, EngineError> {
        let mut symbols: BTreeSet<String> = self.get_holdings().await?.into_keys().collect();
        symbols.extend(self.watched.lock().await.iter().cloned());
        Ok(symbols)
    }

    pub async fn account_summary(&self) -> Result<AccountSummary, EngineError> {
        let account = self.executor.account(&self.account).await?;
        Ok(AccountSummary {
            net_realized: account.net_realized(),
            account: account.id,
            cash_balance: account.cash_balance,
            realized_profit: account.realized_profit,
            realized_loss: account.realized_loss,
        })
    }

    /// Holdings marked to the cached quotes, stale ones included.
    pub async fn valuation(&self) -> Result<PortfolioValuation, EngineError> {
        let account = self.executor.account(&self.account).await?;
        let holdings = self.get_holdings().await?;
        let quotes = self.cache.snapshot().await;
        Ok(value_holdings(account.cash_balance, &holdings, &quotes))
    }

    pub async fn activity(&self) -> Result<Vec<ActivityPoint>, EngineError> {
        Ok(activity_series(&self.trades().await?))
    }

    pub async fn trades(&self) -> Result<Vec<Trade>, EngineError> {
        Ok(self.executor.trades(&self.account).await?)
    }

    /// Starts polling the current watch set. A no-op when already polling.
    pub async fn start_polling(&self) -> Result<(), EngineError> {
        let symbols = self.watch_set().await?;
        let mut scheduler = self.scheduler.lock().await;
        match scheduler.as_ref() {
            Some(running) => running.update_watch_set(symbols),
            None => {
                *scheduler = Some(PollingScheduler::start(
                    Arc::clone(&self.cache),
                    symbols,
                    self.poll_interval,
                    self.events.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Stops polling. In-flight trades are unaffected.
    pub async fn shutdown(&self) {
        if let Some(scheduler) = self.scheduler.lock().await.take() {
            scheduler.stop().await;
        }
        tracing::info!(account = %self.account, "Session shut down.");
    }

    async fn sync_watch_set(&self) {
        let scheduler = self.scheduler.lock().await;
        let Some(scheduler) = scheduler.as_ref() else {
            return;
        };
        match self.watch_set().await {
            Ok(symbols) => scheduler.update_watch_set(symbols),
            Err(e) => tracing::warn!(account = %self.account, error = %e, "Could not recompute watch set."),
        }
    }
}
