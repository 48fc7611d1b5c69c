//! Integration tests for `AccountSession` against an in-memory store and a
//! scripted quote provider.

use api_client::{ApiError, QuoteProvider};
use async_trait::async_trait;
use chrono::Utc;
use core_types::{AccountId, Quote};
use database::{InMemoryStore, LedgerStore};
use engine::{AccountSession, EngineError, QuoteCache};
use events::SessionEvent;
use executor::{ExecutorError, TradeExecutor};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Serves whatever prices the test has scripted; unknown symbols are omitted.
#[derive(Default)]
struct ScriptedProvider {
    prices: Mutex<HashMap<String, Decimal>>,
    down: Mutex<bool>,
}

impl ScriptedProvider {
    fn set(&self, symbol: &str, price: Decimal) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    fn go_down(&self) {
        *self.down.lock().unwrap() = true;
    }
}

#[async_trait]
impl QuoteProvider for ScriptedProvider {
    async fn fetch_quotes(&self, symbols: &BTreeSet<String>) -> Result<HashMap<String, Quote>, ApiError> {
        if *self.down.lock().unwrap() {
            return Err(ApiError::Status(503, "unavailable".to_string()));
        }
        let prices = self.prices.lock().unwrap();
        Ok(symbols
            .iter()
            .filter_map(|symbol| {
                let price = prices.get(symbol)?;
                Some((symbol.clone(), Quote::new(symbol, *price, None, None, None, Utc::now()).unwrap()))
            })
            .collect())
    }
}

struct Harness {
    provider: Arc<ScriptedProvider>,
    executor: Arc<TradeExecutor>,
    account: AccountId,
}

impl Harness {
    async fn new(balance: Decimal) -> Self {
        Self::with_store(InMemoryStore::new(), balance).await
    }

    async fn with_store(store: InMemoryStore, balance: Decimal) -> Self {
        let store: Arc<dyn LedgerStore> = Arc::new(store);
        let account = AccountId::new("trader-1").unwrap();
        let executor = Arc::new(TradeExecutor::new(store, Duration::from_secs(5)));
        executor.open_account(&account, balance).await.unwrap();
        Self {
            provider: Arc::new(ScriptedProvider::default()),
            executor,
            account,
        }
    }

    fn session(&self) -> AccountSession {
        let cache = Arc::new(QuoteCache::new(
            self.provider.clone(),
            Duration::from_secs(15),
            Duration::from_secs(2),
        ));
        AccountSession::new(
            self.account.clone(),
            Arc::clone(&self.executor),
            cache,
            Duration::from_secs(15),
        )
    }
}

fn trade_error(result: Result<executor::TradeReceipt, EngineError>) -> ExecutorError {
    match result {
        Err(EngineError::Trade(e)) => e,
        other => panic!("expected a trade error, got {:?}", other),
    }
}

#[tokio::test]
async fn buy_then_sell_updates_cash_holdings_and_realized_profit() {
    let harness = Harness::new(dec!(1000)).await;
    harness.provider.set("AAPL", dec!(100));
    let session = harness.session();

    let receipt = session.buy("aapl", dec!(5)).await.unwrap();
    assert_eq!(receipt.account.cash_balance, dec!(500));
    assert_eq!(receipt.holding.quantity, 5);
    assert_eq!(receipt.holding.average_cost, dec!(100));

    // The cached 100 quote is still fresh; re-price through a new session.
    harness.provider.set("AAPL", dec!(120));
    let session = harness.session();
    let receipt = session.sell("AAPL", dec!(2)).await.unwrap();
    assert_eq!(receipt.account.realized_profit, dec!(40));
    assert_eq!(receipt.holding.quantity, 3);
    assert_eq!(receipt.holding.average_cost, dec!(100));

    let summary = session.account_summary().await.unwrap();
    assert_eq!(summary.cash_balance, dec!(740));
    assert_eq!(summary.net_realized, dec!(40));

    let holdings = session.get_holdings().await.unwrap();
    assert_eq!(holdings["AAPL"].quantity, 3);
}

#[tokio::test]
async fn rejected_trades_leave_state_unchanged() {
    let harness = Harness::new(dec!(100)).await;
    harness.provider.set("AAPL", dec!(80));
    let session = harness.session();

    assert!(matches!(
        trade_error(session.buy("AAPL", dec!(2)).await),
        ExecutorError::InsufficientBalance { .. }
    ));
    assert!(matches!(
        trade_error(session.sell("AAPL", dec!(1)).await),
        ExecutorError::InsufficientShares { requested: 1, owned: 0, .. }
    ));
    assert!(matches!(
        trade_error(session.buy("AAPL", dec!(0.5)).await),
        ExecutorError::InvalidQuantity(_)
    ));

    assert_eq!(session.account_summary().await.unwrap().cash_balance, dec!(100));
    assert!(session.trades().await.unwrap().is_empty());
}

#[tokio::test]
async fn unpriced_symbol_cannot_be_traded() {
    let harness = Harness::new(dec!(1000)).await;
    let session = harness.session();
    let mut events = session.subscribe();

    assert!(matches!(
        trade_error(session.buy("NOPE", dec!(1)).await),
        ExecutorError::PriceUnavailable(symbol) if symbol == "NOPE"
    ));
    assert!(events.try_recv().unwrap().is_failure());
}

#[tokio::test]
async fn provider_outage_serves_stale_quotes_for_display_only() {
    let harness = Harness::new(dec!(1000)).await;
    harness.provider.set("MSFT", dec!(300));
    let session = harness.session();
    session.watch("MSFT").await.unwrap();
    session.buy("MSFT", dec!(1)).await.unwrap();

    harness.provider.go_down();
    let prices = session.get_display_prices(["msft"]).await.unwrap();
    assert_eq!(prices["MSFT"].as_ref().unwrap().quote.price(), dec!(300));

    let valuation = session.valuation().await.unwrap();
    assert_eq!(valuation.market_value, dec!(300));
    assert!(valuation.unpriced.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_buys_match_sequential_outcome() {
    let harness = Harness::with_store(InMemoryStore::new().with_latency(Duration::from_millis(2)), dec!(100)).await;
    harness.provider.set("AAPL", dec!(10));

    // Two sessions on the same account share the executor's lock.
    let sessions = [Arc::new(harness.session()), Arc::new(harness.session())];
    let tasks = (0..20).map(|i| {
        let session = Arc::clone(&sessions[i % 2]);
        tokio::spawn(async move { session.buy("AAPL", dec!(1)).await })
    });
    let results = futures::future::join_all(tasks).await;

    let filled = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(EngineError::Trade(ExecutorError::InsufficientBalance { .. })))))
        .count();
    assert_eq!(filled, 10);
    assert_eq!(rejected, 10);

    let session = &sessions[0];
    assert_eq!(session.account_summary().await.unwrap().cash_balance, dec!(0));
    assert_eq!(session.get_holdings().await.unwrap()["AAPL"].quantity, 10);
    assert_eq!(session.trades().await.unwrap().len(), 10);
}

#[tokio::test(start_paused = true)]
async fn dropped_caller_does_not_abort_the_trade() {
    let harness = Harness::with_store(InMemoryStore::new().with_latency(Duration::from_millis(50)), dec!(1000)).await;
    harness.provider.set("AAPL", dec!(10));
    let session = harness.session();

    // Warm the cache so the buy goes straight to execution.
    session.watch("AAPL").await.unwrap();
    assert!(session.get_display_prices(["AAPL"]).await.unwrap()["AAPL"].is_none());
    session.start_polling().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    let abandoned = tokio::time::timeout(Duration::from_millis(60), session.buy("AAPL", dec!(3))).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(session.get_holdings().await.unwrap()["AAPL"].quantity, 3);
    assert_eq!(session.account_summary().await.unwrap().cash_balance, dec!(970));
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn polling_follows_holdings_and_watch_list() {
    let harness = Harness::new(dec!(1000)).await;
    harness.provider.set("AAPL", dec!(10));
    harness.provider.set("MSFT", dec!(20));
    let session = harness.session();
    let mut events = session.subscribe();

    session.watch("MSFT").await.unwrap();
    session.start_polling().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    match events.try_recv().unwrap() {
        SessionEvent::QuotesRefreshed { updated, missing, .. } => {
            assert_eq!(updated, vec!["MSFT".to_string()]);
            assert!(missing.is_empty());
        }
        other => panic!("unexpected event {:?}", other),
    }

    session.buy("AAPL", dec!(1)).await.unwrap();
    session.unwatch("MSFT").await.unwrap();
    assert_eq!(session.watch_set().await.unwrap(), BTreeSet::from(["AAPL".to_string()]));

    session.shutdown().await;
    let activity = session.activity().await.unwrap();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].cumulative_bought, 1);
}
