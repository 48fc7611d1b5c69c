use crate::error::DbError;
use crate::store::LedgerStore;
use async_trait::async_trait;
use core_types::{Account, AccountId, Trade};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct AccountRecord {
    account: Account,
    trades: Vec<Trade>,
}

/// A process-local `LedgerStore`.
///
/// Used by tests and by short-lived sessions that do not need durability. An
/// optional artificial latency is awaited before every call so that callers
/// exercise the same suspension points they would against a real database.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<AccountId, AccountRecord>>,
    latency: Option<Duration>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    async fn round_trip(&self) {
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn open_account(&self, id: &AccountId, opening_balance: Decimal) -> Result<Account, DbError> {
        self.round_trip().await;
        let mut records = self.records.write().await;
        if records.contains_key(id) {
            return Err(DbError::AlreadyExists(id.to_string()));
        }

        let account = Account::new(id.clone(), opening_balance);
        records.insert(
            id.clone(),
            AccountRecord {
                account: account.clone(),
                trades: Vec::new(),
            },
        );
        Ok(account)
    }

    async fn read_account(&self, id: &AccountId) -> Result<Account, DbError> {
        self.round_trip().await;
        self.records
            .read()
            .await
            .get(id)
            .map(|record| record.account.clone())
            .ok_or_else(|| DbError::NotFound(id.to_string()))
    }

    async fn write_account(&self, account: &Account) -> Result<(), DbError> {
        self.round_trip().await;
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&account.id)
            .ok_or_else(|| DbError::NotFound(account.id.to_string()))?;
        record.account = account.clone();
        Ok(())
    }

    async fn read_trades(&self, id: &AccountId) -> Result<Vec<Trade>, DbError> {
        self.round_trip().await;
        self.records
            .read()
            .await
            .get(id)
            .map(|record| record.trades.clone())
            .ok_or_else(|| DbError::NotFound(id.to_string()))
    }

    async fn append_trade(&self, trade: &Trade) -> Result<(), DbError> {
        self.round_trip().await;
        let mut records = self.records.write().await;
        let record = records
            .get_mut(trade.account_id())
            .ok_or_else(|| DbError::NotFound(trade.account_id().to_string()))?;
        record.trades.push(trade.clone());
        Ok(())
    }

    async fn commit_trade(&self, trade: &Trade, account: &Account) -> Result<(), DbError> {
        self.round_trip().await;
        if trade.account_id() != &account.id {
            return Err(DbError::Corrupt(format!(
                "trade {} belongs to {} but was committed with account {}",
                trade.id(),
                trade.account_id(),
                account.id
            )));
        }

        // Both writes happen under one write guard, so readers see either
        // neither or both.
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&account.id)
            .ok_or_else(|| DbError::NotFound(account.id.to_string()))?;
        let expected = record.account.version + 1;
        if account.version != expected {
            return Err(DbError::Conflict {
                account: account.id.to_string(),
                expected,
                found: account.version,
            });
        }
        record.trades.push(trade.clone());
        record.account = account.clone();
        Ok(())
    }
}
