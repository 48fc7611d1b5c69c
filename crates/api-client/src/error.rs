use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request to the quote provider failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Quote provider returned HTTP {0}: {1}")]
    Status(u16, String),

    #[error("The quote provider reported an error: {0}")]
    Provider(String),

    #[error("Failed to deserialize the API response: {0}")]
    Deserialization(String),
}
