use crate::error::EventsError;
use chrono::{DateTime, Utc};
use core_types::{AccountId, Trade};
use serde::Serialize;

/// Everything an account session reports to its observers.
///
/// Serialized with an adjacent tag, e.g.
/// `{"type":"QuoteFetchFailed","payload":{"symbols":["AAPL"],"reason":"...","at":"..."}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum SessionEvent {
    /// A trade was committed to the ledger.
    TradeExecuted { account: AccountId, trade: Trade },
    /// A polling refresh completed. `missing` lists requested symbols the
    /// provider did not return; their previous quotes were kept.
    QuotesRefreshed {
        updated: Vec<String>,
        missing: Vec<String>,
        at: DateTime<Utc>,
    },
    /// A polling refresh failed outright. The cache was left untouched.
    QuoteFetchFailed {
        symbols: Vec<String>,
        reason: String,
        at: DateTime<Utc>,
    },
    /// A tick fired while the previous refresh was still in flight.
    RefreshSkipped { at: DateTime<Utc> },
}

impl SessionEvent {
    pub fn to_json(&self) -> Result<String, EventsError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Failures are the events an operator needs to see.
    pub fn is_failure(&self) -> bool {
        matches!(self, SessionEvent::QuoteFetchFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::OrderSide;
    use rust_decimal_macros::dec;

    #[test]
    fn serializes_with_type_tag() {
        let event = SessionEvent::QuoteFetchFailed {
            symbols: vec!["AAPL".to_string()],
            reason: "timeout".to_string(),
            at: Utc::now(),
        };
        let json = event.to_json().unwrap();
        assert!(json.starts_with("{\"type\":\"QuoteFetchFailed\""));
        assert!(json.contains("\"reason\":\"timeout\""));
        assert!(event.is_failure());
    }

    #[test]
    fn trade_events_carry_the_trade() {
        let account = AccountId::new("acc").unwrap();
        let trade = Trade::new(account.clone(), "AAPL", OrderSide::Buy, 2, dec!(10), Utc::now()).unwrap();
        let event = SessionEvent::TradeExecuted { account, trade };
        let json = event.to_json().unwrap();
        assert!(json.contains("\"symbol\":\"AAPL\""));
        assert!(!event.is_failure());
    }
}
