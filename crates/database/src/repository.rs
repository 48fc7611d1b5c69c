use crate::error::DbError;
use crate::store::LedgerStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Account, AccountId, OrderSide, Trade};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgRow, Postgres};
use sqlx::{Executor, Row};
use uuid::Uuid;

/// The `DbRepository` is the Postgres-backed `LedgerStore`. It encapsulates
/// all SQL for the `accounts` and `trades` tables.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
}

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn account_from_row(row: &PgRow) -> Result<Account, DbError> {
        let id: String = row.try_get("account_id")?;
        let version: i64 = row.try_get("version")?;
        let version = u64::try_from(version)
            .map_err(|_| DbError::Corrupt(format!("account {} has version {}", id, version)))?;
        Ok(Account {
            id: AccountId::new(id).map_err(|e| DbError::Corrupt(e.to_string()))?,
            cash_balance: row.try_get("cash_balance")?,
            realized_profit: row.try_get("realized_profit")?,
            realized_loss: row.try_get("realized_loss")?,
            version,
        })
    }

    fn trade_from_row(account_id: &AccountId, row: &PgRow) -> Result<Trade, DbError> {
        let trade_id: Uuid = row.try_get("trade_id")?;
        let symbol: String = row.try_get("symbol")?;
        let side: String = row.try_get("side")?;
        let quantity: i64 = row.try_get("quantity")?;
        let price: Decimal = row.try_get("price")?;
        let executed_at: DateTime<Utc> = row.try_get("executed_at")?;

        let side: OrderSide = side
            .parse()
            .map_err(|e| DbError::Corrupt(format!("trade {}: {}", trade_id, e)))?;
        let quantity = u64::try_from(quantity)
            .map_err(|_| DbError::Corrupt(format!("trade {} has quantity {}", trade_id, quantity)))?;

        Trade::from_parts(trade_id, account_id.clone(), &symbol, side, quantity, price, executed_at)
            .map_err(|e| DbError::Corrupt(e.to_string()))
    }

    async fn insert_trade<'e, E>(executor: E, trade: &Trade) -> Result<(), DbError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let quantity = i64::try_from(trade.quantity())
            .map_err(|_| DbError::Corrupt(format!("trade {} quantity overflows BIGINT", trade.id())))?;

        sqlx::query(
            r#"
            INSERT INTO trades (trade_id, account_id, symbol, side, quantity, price, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(trade.id())
        .bind(trade.account_id().as_str())
        .bind(trade.symbol())
        .bind(trade.side().as_str())
        .bind(quantity)
        .bind(trade.price())
        .bind(trade.timestamp())
        .execute(executor)
        .await?;
        Ok(())
    }

    fn version_param(account: &Account) -> Result<i64, DbError> {
        i64::try_from(account.version)
            .map_err(|_| DbError::Corrupt(format!("account {} version overflows BIGINT", account.id)))
    }

    async fn update_account<'e, E>(executor: E, account: &Account) -> Result<(), DbError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET cash_balance = $2, realized_profit = $3, realized_loss = $4, version = $5, updated_at = now()
            WHERE account_id = $1
            "#,
        )
        .bind(account.id.as_str())
        .bind(account.cash_balance)
        .bind(account.realized_profit)
        .bind(account.realized_loss)
        .bind(Self::version_param(account)?)
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(account.id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for DbRepository {
    async fn open_account(&self, id: &AccountId, opening_balance: Decimal) -> Result<Account, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (account_id, cash_balance)
            VALUES ($1, $2)
            ON CONFLICT (account_id) DO NOTHING
            "#,
        )
        .bind(id.as_str())
        .bind(opening_balance)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::AlreadyExists(id.to_string()));
        }
        Ok(Account::new(id.clone(), opening_balance))
    }

    async fn read_account(&self, id: &AccountId) -> Result<Account, DbError> {
        let row = sqlx::query(
            "SELECT account_id, cash_balance, realized_profit, realized_loss, version FROM accounts WHERE account_id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(id.to_string()))?;

        Self::account_from_row(&row)
    }

    async fn write_account(&self, account: &Account) -> Result<(), DbError> {
        Self::update_account(&self.pool, account).await
    }

    async fn read_trades(&self, id: &AccountId) -> Result<Vec<Trade>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT trade_id, symbol, side, quantity, price, executed_at
            FROM trades
            WHERE account_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| Self::trade_from_row(id, row)).collect()
    }

    async fn append_trade(&self, trade: &Trade) -> Result<(), DbError> {
        Self::insert_trade(&self.pool, trade).await
    }

    async fn commit_trade(&self, trade: &Trade, account: &Account) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        // The row lock makes a concurrent commit from another process wait
        // here, then see the version this one wrote.
        let stored: i64 = sqlx::query_scalar("SELECT version FROM accounts WHERE account_id = $1 FOR UPDATE")
            .bind(account.id.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::NotFound(account.id.to_string()))?;
        let expected = u64::try_from(stored).unwrap_or_default() + 1;
        if account.version != expected {
            return Err(DbError::Conflict {
                account: account.id.to_string(),
                expected,
                found: account.version,
            });
        }

        Self::insert_trade(&mut *tx, trade).await?;
        Self::update_account(&mut *tx, account).await?;

        // Dropping `tx` on any early return above rolls the transaction back.
        tx.commit().await?;

        tracing::debug!(
            account = %account.id,
            trade_id = %trade.id(),
            "Committed trade and account update."
        );
        Ok(())
    }
}
