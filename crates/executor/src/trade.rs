use crate::error::ExecutorError;
use crate::ledger::{aggregate, apply_fill};
use chrono::Utc;
use core_types::{normalize_symbol, Account, AccountId, Holding, OrderSide, Trade};
use database::{DbError, LedgerStore};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Commits retried after another writer changed the account first.
const COMMIT_ATTEMPTS: usize = 3;

/// Everything a successful trade changed, returned together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeReceipt {
    pub trade: Trade,
    pub account: Account,
    /// The position after the trade. Flat (quantity 0) when a sell closed it.
    pub holding: Holding,
}

/// Validates and applies buys and sells against an account.
///
/// Every mutating call for an account runs under that account's async mutex,
/// held from the first store read until the commit returns. The lock map is
/// owned by the executor, so all sessions sharing one executor are serialized
/// against each other. Executors in other processes are kept out by the
/// store's versioned `commit_trade`: a commit that lost the race is retried
/// from fresh reads.
pub struct TradeExecutor {
    store: Arc<dyn LedgerStore>,
    store_timeout: Duration,
    locks: Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

impl TradeExecutor {
    pub fn new(store: Arc<dyn LedgerStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn open_account(&self, account: &AccountId, opening_balance: Decimal) -> Result<Account, ExecutorError> {
        let opened = self
            .store_call(account, "open_account", self.store.open_account(account, opening_balance))
            .await?;
        tracing::info!(account = %account, balance = %opening_balance, "Opened account.");
        Ok(opened)
    }

    pub async fn account(&self, account: &AccountId) -> Result<Account, ExecutorError> {
        self.store_call(account, "read_account", self.store.read_account(account))
            .await
    }

    /// The raw trade history, in store order.
    pub async fn trades(&self, account: &AccountId) -> Result<Vec<Trade>, ExecutorError> {
        self.store_call(account, "read_trades", self.store.read_trades(account))
            .await
    }

    pub async fn holdings(&self, account: &AccountId) -> Result<BTreeMap<String, Holding>, ExecutorError> {
        aggregate(&self.trades(account).await?)
    }

    pub async fn execute_buy(
        &self,
        account: &AccountId,
        symbol: &str,
        quantity: Decimal,
        reference_price: Option<Decimal>,
    ) -> Result<TradeReceipt, ExecutorError> {
        self.execute(account, symbol, OrderSide::Buy, quantity, reference_price)
            .await
    }

    pub async fn execute_sell(
        &self,
        account: &AccountId,
        symbol: &str,
        quantity: Decimal,
        reference_price: Option<Decimal>,
    ) -> Result<TradeReceipt, ExecutorError> {
        self.execute(account, symbol, OrderSide::Sell, quantity, reference_price)
            .await
    }

    async fn execute(
        &self,
        account_id: &AccountId,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reference_price: Option<Decimal>,
    ) -> Result<TradeReceipt, ExecutorError> {
        let quantity = validate_quantity(quantity)?;
        let symbol = normalize_symbol(symbol)?;
        let price = reference_price.ok_or_else(|| ExecutorError::PriceUnavailable(symbol.clone()))?;

        let lock = self.account_lock(account_id).await;
        let _guard = lock.lock().await;

        for attempt in 1..=COMMIT_ATTEMPTS {
            match self.attempt(account_id, &symbol, side, quantity, price).await {
                Ok(Some(receipt)) => {
                    tracing::info!(
                        account = %account_id,
                        symbol = %symbol,
                        side = %side,
                        quantity,
                        price = %price,
                        balance = %receipt.account.cash_balance,
                        "Trade executed."
                    );
                    return Ok(receipt);
                }
                Ok(None) => {
                    tracing::warn!(account = %account_id, attempt, "Account changed under the trade, re-validating.");
                }
                Err(e) => {
                    if e.is_business_rejection() {
                        tracing::info!(account = %account_id, symbol = %symbol, side = %side, quantity, error = %e, "Trade rejected.");
                    }
                    return Err(e);
                }
            }
        }

        Err(ExecutorError::StoreUnavailable {
            account: account_id.clone(),
            operation: "commit_trade",
            reason: format!("account kept changing across {} attempts", COMMIT_ATTEMPTS),
        })
    }

    /// One read, validate and commit pass. `None` means another writer
    /// committed first and nothing was written.
    async fn attempt(
        &self,
        account_id: &AccountId,
        symbol: &str,
        side: OrderSide,
        quantity: u64,
        price: Decimal,
    ) -> Result<Option<TradeReceipt>, ExecutorError> {
        // The account must be read before the trades: its version then covers
        // every trade the holdings below were folded from.
        let account = self.account(account_id).await?;
        let trades = self.trades(account_id).await?;
        let holding = aggregate(&trades)?
            .remove(symbol)
            .unwrap_or_else(|| Holding::flat(symbol));

        let (account, holding) = apply_trade(&account, &holding, side, quantity, price)?;

        // Never stamp a trade before one already in the ledger, or aggregation
        // would replay it out of order.
        let executed_at = trades.iter().map(Trade::timestamp).fold(Utc::now(), std::cmp::max);
        let trade = Trade::new(account_id.clone(), symbol, side, quantity, price, executed_at)?;

        let committed = self
            .store_call(account_id, "commit_trade", async {
                match self.store.commit_trade(&trade, &account).await {
                    Err(DbError::Conflict { .. }) => Ok(false),
                    other => other.map(|()| true),
                }
            })
            .await?;

        Ok(committed.then_some(TradeReceipt {
            trade,
            account,
            holding,
        }))
    }

    /// The lock for `account`. Entries nobody else holds are dropped on the
    /// way, so the table only keeps accounts with trades in flight.
    async fn account_lock(&self, account: &AccountId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(account.clone()).or_default().clone()
    }

    /// Bounds a store call by the configured timeout and maps its failure
    /// into the executor's taxonomy.
    async fn store_call<T>(
        &self,
        account: &AccountId,
        operation: &'static str,
        call: impl Future<Output = Result<T, DbError>>,
    ) -> Result<T, ExecutorError> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(DbError::NotFound(_))) => Err(ExecutorError::AccountNotFound(account.clone())),
            Ok(Err(DbError::AlreadyExists(_))) => Err(ExecutorError::AccountAlreadyExists(account.clone())),
            Ok(Err(e)) => {
                tracing::error!(account = %account, operation, error = %e, "Store call failed.");
                Err(ExecutorError::StoreUnavailable {
                    account: account.clone(),
                    operation,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                tracing::error!(account = %account, operation, timeout = ?self.store_timeout, "Store call timed out.");
                Err(ExecutorError::StoreUnavailable {
                    account: account.clone(),
                    operation,
                    reason: format!("timed out after {:?}", self.store_timeout),
                })
            }
        }
    }
}

/// Accepts only positive whole share counts.
pub fn validate_quantity(quantity: Decimal) -> Result<u64, ExecutorError> {
    if quantity <= Decimal::ZERO || !quantity.fract().is_zero() {
        return Err(ExecutorError::InvalidQuantity(quantity.to_string()));
    }
    quantity
        .to_u64()
        .ok_or_else(|| ExecutorError::InvalidQuantity(quantity.to_string()))
}

/// The pure state transition of one trade.
///
/// Returns the account and holding as they are after the trade, or the
/// rejection. The inputs are never modified.
pub fn apply_trade(
    account: &Account,
    holding: &Holding,
    side: OrderSide,
    quantity: u64,
    price: Decimal,
) -> Result<(Account, Holding), ExecutorError> {
    let too_large = || ExecutorError::InvalidQuantity(quantity.to_string());
    let notional = Decimal::from(quantity).checked_mul(price);
    let mut next_account = account.clone();
    let mut next_holding = holding.clone();

    match side {
        OrderSide::Buy => {
            // A notional past `Decimal::MAX` is unaffordable by any balance.
            let required = notional.unwrap_or(Decimal::MAX);
            if notional.is_none() || required > account.cash_balance {
                return Err(ExecutorError::InsufficientBalance {
                    required,
                    available: account.cash_balance,
                });
            }
            next_account.cash_balance -= required;
        }
        OrderSide::Sell => {
            if quantity > holding.quantity {
                return Err(ExecutorError::InsufficientShares {
                    symbol: holding.symbol.clone(),
                    requested: quantity,
                    owned: holding.quantity,
                });
            }
            let proceeds = notional.ok_or_else(too_large)?;
            let realized = (price - holding.average_cost)
                .checked_mul(Decimal::from(quantity))
                .ok_or_else(too_large)?;
            if realized > Decimal::ZERO {
                next_account.realized_profit = next_account.realized_profit.checked_add(realized).ok_or_else(too_large)?;
            } else {
                next_account.realized_loss = next_account.realized_loss.checked_add(-realized).ok_or_else(too_large)?;
            }
            next_account.cash_balance = next_account.cash_balance.checked_add(proceeds).ok_or_else(too_large)?;
        }
    }

    apply_fill(&mut next_holding, side, quantity, price).map_err(|_| too_large())?;
    next_account.version += 1;
    Ok((next_account, next_holding))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use database::InMemoryStore;
    use rust_decimal_macros::dec;

    fn id() -> AccountId {
        AccountId::new("user-1").unwrap()
    }

    async fn executor_with(balance: Decimal) -> TradeExecutor {
        let store: Arc<dyn LedgerStore> = Arc::new(InMemoryStore::new());
        store.open_account(&id(), balance).await.unwrap();
        TradeExecutor::new(store, Duration::from_secs(5))
    }

    #[test]
    fn quantity_must_be_a_positive_whole_number() {
        assert_eq!(validate_quantity(dec!(5)).unwrap(), 5);
        assert_eq!(validate_quantity(dec!(5.000)).unwrap(), 5);
        assert!(matches!(validate_quantity(dec!(0)), Err(ExecutorError::InvalidQuantity(_))));
        assert!(matches!(validate_quantity(dec!(-3)), Err(ExecutorError::InvalidQuantity(_))));
        assert!(matches!(validate_quantity(dec!(1.5)), Err(ExecutorError::InvalidQuantity(_))));
    }

    #[test]
    fn apply_trade_sell_at_a_loss_records_magnitude() {
        let account = Account::new(id(), dec!(0));
        let holding = Holding {
            symbol: "AAPL".to_string(),
            quantity: 4,
            average_cost: dec!(50),
            total_cost: dec!(200),
        };
        let (account, holding) = apply_trade(&account, &holding, OrderSide::Sell, 4, dec!(45)).unwrap();
        assert_eq!(account.realized_loss, dec!(20));
        assert_eq!(account.realized_profit, dec!(0));
        assert_eq!(account.cash_balance, dec!(180));
        assert!(holding.is_flat());
        assert_eq!(holding.total_cost, dec!(0));
    }

    #[tokio::test]
    async fn buy_debits_cash_and_opens_position() {
        let executor = executor_with(dec!(1000)).await;
        let receipt = executor
            .execute_buy(&id(), "aapl", dec!(5), Some(dec!(100)))
            .await
            .unwrap();

        assert_eq!(receipt.account.cash_balance, dec!(500));
        assert_eq!(receipt.holding.quantity, 5);
        assert_eq!(receipt.holding.average_cost, dec!(100));
        assert_eq!(receipt.trade.symbol(), "AAPL");
        assert_eq!(executor.account(&id()).await.unwrap().cash_balance, dec!(500));
    }

    #[tokio::test]
    async fn sell_realizes_profit_against_average_cost() {
        let executor = executor_with(dec!(1000)).await;
        executor.execute_buy(&id(), "AAPL", dec!(5), Some(dec!(100))).await.unwrap();

        let receipt = executor
            .execute_sell(&id(), "AAPL", dec!(2), Some(dec!(120)))
            .await
            .unwrap();

        assert_eq!(receipt.account.realized_profit, dec!(40));
        assert_eq!(receipt.account.cash_balance, dec!(740));
        assert_eq!(receipt.holding.quantity, 3);
        assert_eq!(receipt.holding.average_cost, dec!(100));
    }

    #[tokio::test]
    async fn oversell_is_rejected_without_side_effects() {
        let executor = executor_with(dec!(1000)).await;
        executor.execute_buy(&id(), "AAPL", dec!(3), Some(dec!(100))).await.unwrap();
        let before = executor.account(&id()).await.unwrap();

        let err = executor
            .execute_sell(&id(), "AAPL", dec!(5), Some(dec!(100)))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ExecutorError::InsufficientShares {
                symbol: "AAPL".to_string(),
                requested: 5,
                owned: 3,
            }
        );
        assert_eq!(executor.account(&id()).await.unwrap(), before);
        assert_eq!(executor.trades(&id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn overspend_is_rejected_without_side_effects() {
        let executor = executor_with(dec!(100)).await;
        let err = executor
            .execute_buy(&id(), "AAPL", dec!(2), Some(dec!(80)))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutorError::InsufficientBalance { .. }));
        assert!(err.is_business_rejection());
        assert_eq!(executor.account(&id()).await.unwrap().cash_balance, dec!(100));
        assert!(executor.trades(&id()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_failing_precondition_wins() {
        let executor = executor_with(dec!(1)).await;

        // Invalid quantity is reported even though the price is missing too.
        assert!(matches!(
            executor.execute_buy(&id(), "AAPL", dec!(0), None).await,
            Err(ExecutorError::InvalidQuantity(_))
        ));
        // Missing price is reported before the balance check.
        assert!(matches!(
            executor.execute_buy(&id(), "AAPL", dec!(1000), None).await,
            Err(ExecutorError::PriceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn unknown_account_is_reported() {
        let executor = executor_with(dec!(1)).await;
        let ghost = AccountId::new("ghost").unwrap();
        assert_eq!(
            executor.execute_buy(&ghost, "AAPL", dec!(1), Some(dec!(1))).await,
            Err(ExecutorError::AccountNotFound(ghost))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_surfaces_as_unavailable() {
        let store: Arc<dyn LedgerStore> = Arc::new(InMemoryStore::new().with_latency(Duration::from_secs(10)));
        store.open_account(&id(), dec!(100)).await.unwrap();
        let executor = TradeExecutor::new(store, Duration::from_secs(1));

        let err = executor
            .execute_buy(&id(), "AAPL", dec!(1), Some(dec!(1)))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExecutorError::StoreUnavailable {
                operation: "read_account",
                ..
            }
        ));
        assert!(!err.is_business_rejection());
    }

    #[test]
    fn apply_trade_turns_arithmetic_overflow_into_rejections() {
        let account = Account::new(id(), dec!(1000000));
        let err = apply_trade(&account, &Holding::flat("AAPL"), OrderSide::Buy, u64::MAX, dec!(5000000000)).unwrap_err();
        assert_eq!(
            err,
            ExecutorError::InsufficientBalance {
                required: Decimal::MAX,
                available: dec!(1000000),
            }
        );

        let holding = Holding {
            symbol: "AAPL".to_string(),
            quantity: u64::MAX,
            average_cost: dec!(0),
            total_cost: dec!(0),
        };
        assert!(matches!(
            apply_trade(&account, &holding, OrderSide::Sell, u64::MAX, dec!(5000000000)),
            Err(ExecutorError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn apply_trade_advances_the_account_version() {
        let account = Account::new(id(), dec!(100));
        let (next, _) = apply_trade(&account, &Holding::flat("AAPL"), OrderSide::Buy, 1, dec!(10)).unwrap();
        assert_eq!(next.version, account.version + 1);
    }

    #[tokio::test]
    async fn executors_sharing_a_store_cannot_overspend() {
        let store = Arc::new(InMemoryStore::new().with_latency(Duration::from_millis(5)));
        store.open_account(&id(), dec!(100)).await.unwrap();
        // Separate executors have separate lock tables, like two processes.
        let first = TradeExecutor::new(store.clone(), Duration::from_secs(5));
        let second = TradeExecutor::new(store.clone(), Duration::from_secs(5));

        let account_id = id();
        let (a, b) = tokio::join!(
            first.execute_buy(&account_id, "AAPL", dec!(1), Some(dec!(80))),
            second.execute_buy(&account_id, "AAPL", dec!(1), Some(dec!(80))),
        );

        let filled = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(filled, 1);
        assert!([a, b].into_iter().any(|r| matches!(r, Err(ExecutorError::InsufficientBalance { .. }))));

        let account = store.read_account(&id()).await.unwrap();
        assert_eq!(account.cash_balance, dec!(20));
        assert_eq!(account.version, 1);
        assert_eq!(store.read_trades(&id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn new_trades_are_never_stamped_before_the_ledger() {
        let store = Arc::new(InMemoryStore::new());
        store.open_account(&id(), dec!(1000)).await.unwrap();
        let ahead = Utc::now() + chrono::Duration::hours(1);
        let buy = Trade::new(id(), "AAPL", OrderSide::Buy, 5, dec!(10), ahead).unwrap();
        store.append_trade(&buy).await.unwrap();
        let executor = TradeExecutor::new(store, Duration::from_secs(5));

        let receipt = executor
            .execute_sell(&id(), "AAPL", dec!(5), Some(dec!(12)))
            .await
            .unwrap();

        assert!(receipt.trade.timestamp() >= ahead);
        assert!(executor.holdings(&id()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lock_table_forgets_idle_accounts() {
        let store: Arc<dyn LedgerStore> = Arc::new(InMemoryStore::new());
        let other = AccountId::new("user-2").unwrap();
        store.open_account(&id(), dec!(100)).await.unwrap();
        store.open_account(&other, dec!(100)).await.unwrap();
        let executor = TradeExecutor::new(store, Duration::from_secs(5));

        executor.execute_buy(&id(), "AAPL", dec!(1), Some(dec!(1))).await.unwrap();
        executor.execute_buy(&other, "AAPL", dec!(1), Some(dec!(1))).await.unwrap();

        let locks = executor.locks.lock().await;
        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key(&other));
    }

    /// Delegates to an in-memory store but never lets a commit through.
    struct BrokenCommit {
        inner: InMemoryStore,
        hang: bool,
    }

    #[async_trait]
    impl LedgerStore for BrokenCommit {
        async fn open_account(&self, id: &AccountId, opening_balance: Decimal) -> Result<Account, DbError> {
            self.inner.open_account(id, opening_balance).await
        }

        async fn read_account(&self, id: &AccountId) -> Result<Account, DbError> {
            self.inner.read_account(id).await
        }

        async fn write_account(&self, account: &Account) -> Result<(), DbError> {
            self.inner.write_account(account).await
        }

        async fn read_trades(&self, id: &AccountId) -> Result<Vec<Trade>, DbError> {
            self.inner.read_trades(id).await
        }

        async fn append_trade(&self, trade: &Trade) -> Result<(), DbError> {
            self.inner.append_trade(trade).await
        }

        async fn commit_trade(&self, _trade: &Trade, _account: &Account) -> Result<(), DbError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Err(DbError::Corrupt("write rejected".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_or_stalled_commit_changes_nothing() {
        for hang in [false, true] {
            let store = Arc::new(BrokenCommit {
                inner: InMemoryStore::new(),
                hang,
            });
            let opened = store.open_account(&id(), dec!(100)).await.unwrap();
            let executor = TradeExecutor::new(store.clone(), Duration::from_secs(1));

            let err = executor
                .execute_buy(&id(), "AAPL", dec!(2), Some(dec!(10)))
                .await
                .unwrap_err();

            assert!(matches!(
                err,
                ExecutorError::StoreUnavailable {
                    operation: "commit_trade",
                    ..
                }
            ));
            assert_eq!(store.read_account(&id()).await.unwrap(), opened);
            assert!(store.read_trades(&id()).await.unwrap().is_empty());
        }
    }
}
