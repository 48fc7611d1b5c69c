use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}
