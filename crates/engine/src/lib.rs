//! # Engine Crate
//!
//! Live state for an account session: the quote cache, the polling loop that
//! keeps it fresh, and `AccountSession`, which wires them to the executor.
//!
//! Nothing here is a process-wide singleton. A caller builds one
//! `TradeExecutor` per store and shares it between sessions, gives each
//! session its own `QuoteCache`, and passes both in explicitly.

pub mod error;
pub mod quote_cache;
pub mod scheduler;
pub mod session;

pub use error::EngineError;
pub use quote_cache::{CachedQuote, QuoteCache, RefreshReport};
pub use scheduler::PollingScheduler;
pub use session::{AccountSession, AccountSummary};
