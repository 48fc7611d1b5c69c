use core_types::{Holding, Quote};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// One open position valued at the latest known price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionValue {
    pub holding: Holding,
    /// `None` when no quote is cached for the symbol.
    pub price: Option<Decimal>,
    pub change_percent: Option<Decimal>,
    pub market_value: Option<Decimal>,
    /// Market value minus total cost.
    pub unrealized_pnl: Option<Decimal>,
}

/// Holdings marked to market, together with the account's cash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortfolioValuation {
    pub positions: Vec<PositionValue>,
    pub cash: Decimal,
    /// Sum over priced positions only.
    pub market_value: Decimal,
    pub total_cost: Decimal,
    pub unrealized_pnl: Decimal,
    /// Cash plus the market value of every priced position.
    pub equity: Decimal,
    /// Symbols that are held but have no quote; excluded from the totals.
    pub unpriced: Vec<String>,
}

/// Values every holding at the matching quote.
///
/// Unlike a strict equity calculation this never fails on a missing price:
/// unpriced positions are listed separately so a display can still render
/// the rest of the portfolio.
pub fn value_holdings(
    cash: Decimal,
    holdings: &BTreeMap<String, Holding>,
    quotes: &HashMap<String, Quote>,
) -> PortfolioValuation {
    let mut positions = Vec::with_capacity(holdings.len());
    let mut unpriced = Vec::new();
    let mut market_value = Decimal::ZERO;
    let mut total_cost = Decimal::ZERO;

    for (symbol, holding) in holdings {
        let quote = quotes.get(symbol);
        let value = quote.map(|q| holding.market_value(q.price()));

        match value {
            Some(value) => {
                market_value += value;
                total_cost += holding.total_cost;
            }
            None => unpriced.push(symbol.clone()),
        }

        positions.push(PositionValue {
            holding: holding.clone(),
            price: quote.map(Quote::price),
            change_percent: quote.and_then(Quote::change_percent),
            market_value: value,
            unrealized_pnl: value.map(|v| v - holding.total_cost),
        });
    }

    PortfolioValuation {
        positions,
        cash,
        market_value,
        total_cost,
        unrealized_pnl: market_value - total_cost,
        equity: cash + market_value,
        unpriced,
    }
}
