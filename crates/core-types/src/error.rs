use thiserror::Error;

/// Rejection of a malformed record at the ingestion boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid input for {0}: {1}")]
    InvalidInput(String, String),
}
