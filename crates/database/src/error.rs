use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Missing database configuration: {0}")]
    ConnectionConfigError(String),

    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Account '{0}' was not found in the store.")]
    NotFound(String),

    #[error("Account '{0}' already exists.")]
    AlreadyExists(String),

    #[error("Account '{account}' changed concurrently: expected version {expected}, found {found}.")]
    Conflict { account: String, expected: u64, found: u64 },

    #[error("Stored record failed validation: {0}")]
    Corrupt(String),
}
