//! # Executor Crate
//!
//! The accounting core of papertrade: everything that turns a trade history
//! into positions and validates new trades against it.
//!
//! ## Architectural Principles
//!
//! - **Derived positions:** holdings are never stored. `ledger::aggregate`
//!   folds the append-only trade history into positions on demand, so the
//!   ledger is the only source of truth.
//! - **State vs. Logic Decoupling:** `trade::apply_trade` is a pure state
//!   transition. `TradeExecutor` wraps it with the store reads, the per-account
//!   lock and the atomic commit.
//!
//! ## Public API
//!
//! - `aggregate`: Trade history to holdings.
//! - `TradeExecutor`: Serialized buy/sell execution against a `LedgerStore`.
//! - `value_holdings`: Mark-to-market valuation of holdings.
//! - `activity_series`: Cumulative bought/sold quantities over time.
//! - `ExecutorError`: The specific error types that can be returned from this crate.

pub mod activity;
pub mod error;
pub mod ledger;
pub mod portfolio;
pub mod trade;

pub use activity::{activity_series, ActivityPoint};
pub use error::ExecutorError;
pub use ledger::aggregate;
pub use portfolio::{value_holdings, PortfolioValuation, PositionValue};
pub use trade::{apply_trade, validate_quantity, TradeExecutor, TradeReceipt};
