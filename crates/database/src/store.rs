use crate::error::DbError;
use async_trait::async_trait;
use core_types::{Account, AccountId, Trade};
use rust_decimal::Decimal;

/// The persistent record store behind the trading engine.
///
/// Trades are append-only and `read_trades` must return them in write order.
/// `commit_trade` is the only call the trade path uses to mutate state: it
/// appends the trade and writes the account as one atomic unit, so a failed
/// commit leaves both untouched. It is also the store's concurrency guard:
/// writers in other processes never share an in-memory lock, so a commit is
/// only accepted on top of the exact account version it was computed from.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Creates an account with the given cash and no realized results.
    async fn open_account(&self, id: &AccountId, opening_balance: Decimal) -> Result<Account, DbError>;

    async fn read_account(&self, id: &AccountId) -> Result<Account, DbError>;

    async fn write_account(&self, account: &Account) -> Result<(), DbError>;

    /// All trades of the account, in the order they were written.
    async fn read_trades(&self, id: &AccountId) -> Result<Vec<Trade>, DbError>;

    async fn append_trade(&self, trade: &Trade) -> Result<(), DbError>;

    /// Appends `trade` and replaces the stored account with `account` atomically.
    ///
    /// `account.version` must be the stored version plus one. Otherwise nothing
    /// is written and `DbError::Conflict` is returned.
    async fn commit_trade(&self, trade: &Trade, account: &Account) -> Result<(), DbError>;
}
