use crate::error::ExecutorError;
use core_types::{Holding, OrderSide, Trade};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Folds a trade history into the current open positions, keyed by symbol.
///
/// Trades are processed in non-decreasing timestamp order; trades sharing a
/// timestamp keep the order the store returned them in. Cost basis is strict
/// average cost: a sell removes `quantity * average_cost` from the running
/// total cost, and the total resets to zero whenever the position goes flat.
/// Flat symbols are omitted from the result.
///
/// A sell that would take a position below zero is reported as
/// `LedgerInconsistency` and is never clamped.
pub fn aggregate(trades: &[Trade]) -> Result<BTreeMap<String, Holding>, ExecutorError> {
    let mut ordered: Vec<&Trade> = trades.iter().collect();
    // `sort_by_key` is stable.
    ordered.sort_by_key(|trade| trade.timestamp());

    let mut holdings: BTreeMap<String, Holding> = BTreeMap::new();
    for trade in ordered {
        let holding = holdings
            .entry(trade.symbol().to_string())
            .or_insert_with(|| Holding::flat(trade.symbol()));

        if apply_fill(holding, trade.side(), trade.quantity(), trade.price()).is_err() {
            return Err(ExecutorError::LedgerInconsistency {
                account: trade.account_id().clone(),
                symbol: trade.symbol().to_string(),
                trade_id: trade.id(),
            });
        }
    }

    holdings.retain(|_, holding| !holding.is_flat());
    Ok(holdings)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FillError {
    /// The sell exceeds the quantity held.
    Oversold,
    /// The position's quantity or cost no longer fits its numeric type.
    Overflow,
}

/// Applies one fill to a running position. On error the holding is untouched.
pub(crate) fn apply_fill(holding: &mut Holding, side: OrderSide, quantity: u64, price: Decimal) -> Result<(), FillError> {
    let (next_quantity, next_cost) = match side {
        OrderSide::Buy => {
            let next_quantity = holding.quantity.checked_add(quantity).ok_or(FillError::Overflow)?;
            let next_cost = Decimal::from(quantity)
                .checked_mul(price)
                .and_then(|notional| holding.total_cost.checked_add(notional))
                .ok_or(FillError::Overflow)?;
            (next_quantity, next_cost)
        }
        OrderSide::Sell => {
            let next_quantity = holding.quantity.checked_sub(quantity).ok_or(FillError::Oversold)?;
            let released = Decimal::from(quantity)
                .checked_mul(holding.average_cost)
                .ok_or(FillError::Overflow)?;
            (next_quantity, holding.total_cost - released)
        }
    };

    if next_quantity == 0 {
        holding.quantity = 0;
        holding.total_cost = Decimal::ZERO;
        holding.average_cost = Decimal::ZERO;
    } else {
        holding.quantity = next_quantity;
        holding.total_cost = next_cost;
        holding.average_cost = next_cost / Decimal::from(next_quantity);
    }
    Ok(())
}
