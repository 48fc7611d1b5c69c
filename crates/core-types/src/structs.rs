use crate::enums::OrderSide;
use crate::error::CoreError;
use crate::symbol::normalize_symbol;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies a single trading account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(CoreError::InvalidInput(
                "account".to_string(),
                "account id must not be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The cash side of an account.
///
/// `realized_loss` is stored as a non-negative magnitude, so the net realized
/// result is `realized_profit - realized_loss`.
///
/// `version` counts committed trades. A store only accepts a commit whose
/// account carries the stored version plus one, so two writers that read the
/// same state cannot both commit on top of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub cash_balance: Decimal,
    pub realized_profit: Decimal,
    pub realized_loss: Decimal,
    #[serde(default)]
    pub version: u64,
}

impl Account {
    /// Opens a fresh account with the given cash and no realized results.
    pub fn new(id: AccountId, opening_balance: Decimal) -> Self {
        Self {
            id,
            cash_balance: opening_balance,
            realized_profit: Decimal::ZERO,
            realized_loss: Decimal::ZERO,
            version: 0,
        }
    }

    pub fn net_realized(&self) -> Decimal {
        self.realized_profit - self.realized_loss
    }
}

/// An executed trade. Trades are append-only: once persisted they are never
/// mutated or deleted, so the fields are only readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trade {
    id: Uuid,
    account_id: AccountId,
    symbol: String,
    side: OrderSide,
    quantity: u64,
    price: Decimal,
    timestamp: DateTime<Utc>,
}

impl Trade {
    /// Creates a new trade with a fresh identifier.
    pub fn new(
        account_id: AccountId,
        symbol: &str,
        side: OrderSide,
        quantity: u64,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        Self::from_parts(Uuid::new_v4(), account_id, symbol, side, quantity, price, timestamp)
    }

    /// Rebuilds a trade from a stored record, applying the same validation as
    /// a freshly created one.
    pub fn from_parts(
        id: Uuid,
        account_id: AccountId,
        symbol: &str,
        side: OrderSide,
        quantity: u64,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        let symbol = normalize_symbol(symbol)?;
        if quantity == 0 {
            return Err(CoreError::InvalidInput(
                "quantity".to_string(),
                format!("trade {} has zero quantity", id),
            ));
        }
        if price.is_sign_negative() {
            return Err(CoreError::InvalidInput(
                "price".to_string(),
                format!("trade {} has negative price {}", id, price),
            ));
        }

        Ok(Self {
            id,
            account_id,
            symbol,
            side,
            quantity,
            price,
            timestamp,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Cash moved by this trade: `quantity * price`.
    pub fn notional(&self) -> Decimal {
        Decimal::from(self.quantity) * self.price
    }
}

/// A derived, never-persisted position in one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Holding {
    pub symbol: String,
    pub quantity: u64,
    pub average_cost: Decimal,
    pub total_cost: Decimal,
}

impl Holding {
    /// An empty position, used when a symbol has been fully sold.
    pub fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            quantity: 0,
            average_cost: Decimal::ZERO,
            total_cost: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }

    pub fn market_value(&self, price: Decimal) -> Decimal {
        Decimal::from(self.quantity) * price
    }
}

/// The last known price of a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    symbol: String,
    name: Option<String>,
    price: Decimal,
    change: Option<Decimal>,
    change_percent: Option<Decimal>,
    previous_close: Option<Decimal>,
    fetched_at: DateTime<Utc>,
}

impl Quote {
    /// Validates a quote at the ingestion boundary.
    ///
    /// The price must be strictly positive. When the provider reports a previous
    /// close but no change, change and change percent are derived from it.
    pub fn new(
        symbol: &str,
        price: Decimal,
        change: Option<Decimal>,
        change_percent: Option<Decimal>,
        previous_close: Option<Decimal>,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        let symbol = normalize_symbol(symbol)?;
        if price <= Decimal::ZERO {
            return Err(CoreError::InvalidInput(
                "price".to_string(),
                format!("quote for {} has non-positive price {}", symbol, price),
            ));
        }

        let previous_close = previous_close.filter(|pc| *pc > Decimal::ZERO);
        let (change, change_percent) = match (change, previous_close) {
            (None, Some(pc)) => {
                let diff = price - pc;
                (Some(diff), Some((diff / pc * Decimal::ONE_HUNDRED).round_dp(4)))
            }
            (Some(diff), Some(pc)) if change_percent.is_none() => {
                (Some(diff), Some((diff / pc * Decimal::ONE_HUNDRED).round_dp(4)))
            }
            _ => (change, change_percent),
        };

        Ok(Self {
            symbol,
            name: None,
            price,
            change,
            change_percent,
            previous_close,
            fetched_at,
        })
    }

    /// Attaches the instrument's display name. Blank names are ignored.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into().trim().to_string();
        self.name = (!name.is_empty()).then_some(name);
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn change(&self) -> Option<Decimal> {
        self.change
    }

    pub fn change_percent(&self) -> Option<Decimal> {
        self.change_percent
    }

    pub fn previous_close(&self) -> Option<Decimal> {
        self.previous_close
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}
