use crate::error::ConfigError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::time::Duration;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub market_data: MarketDataConfig,
    pub store: StoreConfig,
    pub accounts: AccountsConfig,
    pub logging: LoggingConfig,
}

/// Contains parameters for the quote provider, the cache and the polling loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketDataConfig {
    /// Base URL of the quote endpoint (`{base_url}/v7/finance/quote`).
    pub base_url: String,
    /// Seconds between two polling ticks.
    pub poll_interval_secs: u64,
    /// Age after which a cached quote is flagged stale. Defaults to one polling interval.
    pub stale_after_secs: Option<u64>,
    /// Upper bound for a single batch quote request.
    pub request_timeout_secs: u64,
}

/// Contains parameters for the persistent store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Postgres connection string. Falls back to the `DATABASE_URL` environment variable.
    pub database_url: Option<String>,
    /// Upper bound for a single store round trip.
    pub timeout_secs: u64,
    pub max_connections: u32,
}

/// Defaults applied when new accounts are opened.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    pub opening_balance: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// A `tracing` filter directive such as `info` or `engine=debug,info`.
    pub level: String,
    /// When set, logs are also written to a daily rolling file in this directory.
    pub directory: Option<String>,
    pub file_prefix: String,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            poll_interval_secs: 15,
            stale_after_secs: None,
            request_timeout_secs: 8,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            timeout_secs: 5,
            max_connections: 10,
        }
    }
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            opening_balance: dec!(10000),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "papertrade.log".to_string(),
        }
    }
}

impl MarketDataConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs.unwrap_or(self.poll_interval_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Rejects settings that would make the engine spin or hang.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.market_data.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "market_data.poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.market_data.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "market_data.request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.market_data.stale_after_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "market_data.stale_after_secs must be greater than zero".to_string(),
            ));
        }
        if self.store.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "store.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.accounts.opening_balance.is_sign_negative() {
            return Err(ConfigError::ValidationError(format!(
                "accounts.opening_balance must not be negative, got {}",
                self.accounts.opening_balance
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.accounts.opening_balance, dec!(10000));
    }

    #[test]
    fn stale_threshold_defaults_to_poll_interval() {
        let mut market_data = MarketDataConfig::default();
        market_data.poll_interval_secs = 30;
        assert_eq!(market_data.stale_after(), Duration::from_secs(30));

        market_data.stale_after_secs = Some(90);
        assert_eq!(market_data.stale_after(), Duration::from_secs(90));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut config = Config::default();
        config.market_data.poll_interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn negative_opening_balance_is_rejected() {
        let mut config = Config::default();
        config.accounts.opening_balance = dec!(-1);
        assert!(config.validate().is_err());
    }
}
