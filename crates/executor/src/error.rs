use core_types::{AccountId, CoreError};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Invalid order quantity {0}: quantity must be a positive whole number of shares")]
    InvalidQuantity(String),

    #[error("No fresh price is available for {0}")]
    PriceUnavailable(String),

    #[error("Not enough cash available to execute trade. Required: {required}, Available: {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("Not enough shares of {symbol} to sell. Requested: {requested}, Owned: {owned}")]
    InsufficientShares { symbol: String, requested: u64, owned: u64 },

    #[error("Ledger for account {account} is inconsistent: trade {trade_id} on {symbol} cannot be applied to the position")]
    LedgerInconsistency {
        account: AccountId,
        symbol: String,
        trade_id: Uuid,
    },

    #[error("Store unavailable during {operation} for account {account}: {reason}")]
    StoreUnavailable {
        account: AccountId,
        operation: &'static str,
        reason: String,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Account already exists: {0}")]
    AccountAlreadyExists(AccountId),

    #[error("Invalid trade input: {0}")]
    InvalidInput(#[from] CoreError),
}

impl ExecutorError {
    /// True for rejections that are an expected outcome of user input, as
    /// opposed to failures an operator has to look at.
    pub fn is_business_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidQuantity(_)
                | Self::PriceUnavailable(_)
                | Self::InsufficientBalance { .. }
                | Self::InsufficientShares { .. }
                | Self::InvalidInput(_)
        )
    }
}
