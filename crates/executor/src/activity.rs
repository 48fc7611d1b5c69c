use chrono::{DateTime, Utc};
use core_types::{OrderSide, Trade};
use serde::Serialize;

/// Cumulative traded share counts after one trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityPoint {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub cumulative_bought: u64,
    pub cumulative_sold: u64,
}

/// Builds the running bought/sold totals across all symbols, one point per
/// trade in chronological order.
pub fn activity_series(trades: &[Trade]) -> Vec<ActivityPoint> {
    let mut ordered: Vec<&Trade> = trades.iter().collect();
    ordered.sort_by_key(|trade| trade.timestamp());

    let mut bought = 0u64;
    let mut sold = 0u64;
    ordered
        .into_iter()
        .map(|trade| {
            match trade.side() {
                OrderSide::Buy => bought += trade.quantity(),
                OrderSide::Sell => sold += trade.quantity(),
            }
            ActivityPoint {
                timestamp: trade.timestamp(),
                symbol: trade.symbol().to_string(),
                side: trade.side(),
                quantity: trade.quantity(),
                cumulative_bought: bought,
                cumulative_sold: sold,
            }
        })
        .collect()
}
