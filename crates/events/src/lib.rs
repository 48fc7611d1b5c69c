//! # Session Events
//!
//! The events an account session publishes while it runs: executed trades,
//! quote refresh outcomes and refresh failures. They travel over a
//! `tokio::sync::broadcast` channel so any number of observers (a UI, a log
//! sink, a test) can subscribe without slowing the engine down.
//!
//! As a Layer 0 crate, it depends only on `core-types`.

// Declare the modules that make up this crate.
pub mod error;
pub mod messages;

// Re-export the core types to provide a clean public API.
pub use error::EventsError;
pub use messages::SessionEvent;
