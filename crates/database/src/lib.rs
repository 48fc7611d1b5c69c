//! # Ledger Store
//!
//! The persistence boundary of the trading engine: accounts (the cash side)
//! and the append-only trade ledger.
//!
//! ## Architectural Principles
//!
//! - **Adapter behind a trait:** The engine only sees [`LedgerStore`]. The
//!   Postgres [`DbRepository`] and the process-local [`InMemoryStore`] are
//!   interchangeable implementations.
//! - **Atomic trade commits:** A trade and the account mutation it causes are
//!   written by a single `commit_trade` call, so no reader can observe one
//!   without the other.
//! - **Write order is ledger order:** `read_trades` returns trades exactly in
//!   the order they were appended (`seq` in Postgres).
//!
//! ## Public API
//!
//! - `connect` / `run_migrations`: Postgres pool setup and schema migrations.
//! - `LedgerStore`: the store contract.
//! - `DbRepository`, `InMemoryStore`: the two implementations.
//! - `DbError`: the specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod memory;
pub mod repository;
pub mod store;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use memory::InMemoryStore;
pub use repository::DbRepository;
pub use store::LedgerStore;
