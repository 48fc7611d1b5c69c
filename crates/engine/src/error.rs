use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Quote fetch failed for [{symbols}]: {reason}")]
    QuoteFetchFailed { symbols: String, reason: String },

    #[error("Trade error: {0}")]
    Trade(#[from] executor::ExecutorError),

    #[error("Invalid input: {0}")]
    InvalidInput(#[from] core_types::CoreError),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl EngineError {
    /// Returns the trade rejection, if this error is one.
    pub fn as_trade_error(&self) -> Option<&executor::ExecutorError> {
        match self {
            EngineError::Trade(e) => Some(e),
            _ => None,
        }
    }
}
