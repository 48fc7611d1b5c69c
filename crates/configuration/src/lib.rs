//! # Configuration
//!
//! Layered application settings and the shared logging bootstrap.
//!
//! Settings are resolved in this order, later sources winning:
//!
//! 1. the defaults baked into [`Config`];
//! 2. an optional `config.toml` in the working directory;
//! 3. environment variables of the form `PAPERTRADE__SECTION__KEY`
//!    (a `.env` file is loaded first if present).
//!
//! `DATABASE_URL` is honoured as a fallback for `store.database_url`.

use std::env;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;
pub mod telemetry;

// Re-export the core types to provide a clean public API.
pub use error::ConfigError;
pub use settings::{AccountsConfig, Config, LoggingConfig, MarketDataConfig, StoreConfig};
pub use telemetry::init_tracing;

const ENV_PREFIX: &str = "PAPERTRADE";

/// Loads the application configuration from `config.toml` and the environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from("config")
}

/// Same as [`load_config`] but reads the file at `path` (extension optional).
pub fn load_config_from(path: &str) -> Result<Config, ConfigError> {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();

    let builder = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let mut config = builder.try_deserialize::<Config>()?;

    if config.store.database_url.is_none() {
        config.store.database_url = env::var("DATABASE_URL").ok();
    }

    config.validate()?;
    Ok(config)
}
