pub mod enums;
pub mod error;
pub mod structs;
pub mod symbol;

// Re-export the core types to provide a clean public API.
pub use enums::OrderSide;
pub use error::CoreError;
pub use structs::{Account, AccountId, Holding, Quote, Trade};
pub use symbol::normalize_symbol;
