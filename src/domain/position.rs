//! Position aggregation over a deal's filled entry orders.
//!
//! Event ingestion calls this after every fill and reconciliation calls
//! it over the full refreshed order list; both must land on identical
//! totals for the same filled set, so there is exactly one
//! implementation and it is order-independent.

use rust_decimal::Decimal;

use super::error::DomainError;
use super::order::Order;

/// Aggregate position state recomputed from filled orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionTotals {
    pub total_quantity: Decimal,
    pub total_cost: Decimal,
    /// Cost-weighted average entry price.
    pub average_price: Decimal,
}

/// Recompute totals from every filled BASE/SAFETY order in `orders`.
///
/// Non-entry orders (take-profits, unfilled legs) are ignored, so both
/// callers can pass whatever order set they have on hand.
pub fn recompute_position<'a, I>(orders: I) -> Result<PositionTotals, DomainError>
where
    I: IntoIterator<Item = &'a Order>,
{
    let mut total_quantity = Decimal::ZERO;
    let mut total_cost = Decimal::ZERO;

    for order in orders {
        if !order.is_filled_entry() {
            continue;
        }
        let price = order.price.ok_or_else(|| DomainError::MissingFillPrice {
            order_id: order.id.to_string(),
        })?;
        total_quantity += order.filled;
        total_cost += order.filled * price;
    }

    if total_quantity <= Decimal::ZERO {
        return Err(DomainError::EmptyPosition);
    }

    Ok(PositionTotals {
        total_quantity,
        total_cost,
        average_price: total_cost / total_quantity,
    })
}
