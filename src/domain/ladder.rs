//! Order ladder calculator.
//!
//! Pure function producing the full set of order specs for one DCA
//! cycle: the base market buy, the safety-order limit buys layered
//! below the entry, and the initial take-profit limit sell.
//!
//! All arithmetic is `Decimal`; the deviation recurrence compounds
//! multiplicatively over up to 25 levels and would drift visibly in
//! floating point.

use rust_decimal::Decimal;
use serde::Serialize;

use super::bot::Bot;
use super::decimal::{pct, pow_u32, round_down_to_increment, HUNDRED};
use super::error::DomainError;
use super::order::{OrderMethod, OrderSide, OrderType};

/// Time-in-force requested for a limit order spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimeInForce {
    GoodTilCancelled,
    /// Reject instead of executing against the book (maker-only).
    PostOnly,
}

/// One computed order, not yet placed.
#[derive(Debug, Clone, Serialize)]
pub struct OrderSpec {
    pub order_type: OrderType,
    pub side: OrderSide,
    pub method: OrderMethod,
    pub quantity: Decimal,
    /// Absent for the market base order.
    pub price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
}

/// The computed set of orders for one deal.
#[derive(Debug, Clone, Serialize)]
pub struct Ladder {
    pub base: OrderSpec,
    pub safety: Vec<OrderSpec>,
    pub take_profit: OrderSpec,
    /// Price the safety/take-profit legs were anchored on.
    pub reference_price: Decimal,
}

/// Compute the order ladder for `bot` at `market_price`.
///
/// `fill_price` is the base order's actual fill price when known; the
/// safety and take-profit legs anchor on it, falling back to the market
/// price for previews. The base quantity always derives from
/// `market_price` since that is what the market buy will see.
pub fn build_ladder(
    bot: &Bot,
    market_price: Decimal,
    fill_price: Option<Decimal>,
) -> Result<Ladder, DomainError> {
    bot.validate()?;
    if market_price <= Decimal::ZERO {
        return Err(DomainError::NonPositivePrice {
            price: market_price,
        });
    }
    let reference_price = fill_price.unwrap_or(market_price);
    if reference_price <= Decimal::ZERO {
        return Err(DomainError::NonPositivePrice {
            price: reference_price,
        });
    }

    let increment = bot.pair.quantity_increment;
    let base_quantity = round_down_to_increment(bot.base_order_size / market_price, increment)?;

    let base = OrderSpec {
        order_type: OrderType::Base,
        side: OrderSide::Buy,
        method: OrderMethod::Market,
        quantity: base_quantity,
        price: None,
        time_in_force: None,
    };

    // deviation(0) = price_deviation, then each step's gap grows by the
    // step factor: deviation(i) = deviation(i-1) * (1 + price_step).
    let mut safety = Vec::with_capacity(bot.max_safety_orders as usize);
    let mut deviation = bot.price_deviation;
    for i in 0..bot.max_safety_orders {
        if i > 0 {
            deviation += deviation * bot.safety_order_price_step;
        }
        let price = reference_price * (Decimal::ONE - deviation / HUNDRED);
        if price <= Decimal::ZERO {
            return Err(DomainError::NonPositivePrice { price });
        }
        let notional = bot.safety_order_size * pow_u32(bot.safety_order_volume_step, i);
        let quantity = round_down_to_increment(notional / price, increment)?;

        safety.push(OrderSpec {
            order_type: OrderType::Safety,
            side: OrderSide::Buy,
            method: OrderMethod::Limit,
            quantity,
            price: Some(price),
            time_in_force: Some(TimeInForce::PostOnly),
        });
    }

    let take_profit = OrderSpec {
        order_type: OrderType::TakeProfit,
        side: OrderSide::Sell,
        method: OrderMethod::Limit,
        // Covers the base quantity only; grows as safety orders fill.
        quantity: base_quantity,
        price: Some(take_profit_price(reference_price, bot.take_profit)),
        time_in_force: Some(TimeInForce::GoodTilCancelled),
    };

    Ok(Ladder {
        base,
        safety,
        take_profit,
        reference_price,
    })
}

/// Price at which the position exits with `take_profit_pct` percent gain.
#[must_use]
pub fn take_profit_price(entry_price: Decimal, take_profit_pct: Decimal) -> Decimal {
    entry_price * (Decimal::ONE + pct(take_profit_pct))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bot::{BotStatus, NetworkMode, TradingPair};
    use crate::domain::ids::BotId;
    use rust_decimal_macros::dec;

    fn bot() -> Bot {
        Bot {
            id: BotId::generate(),
            name: "scenario".into(),
            exchange: "binance".into(),
            network: NetworkMode::Testnet,
            pair: TradingPair {
                symbol: "BTCUSDT".into(),
                base_asset: "BTC".into(),
                quote_asset: "USDT".into(),
                quantity_increment: dec!(0.00001),
            },
            base_order_size: dec!(20),
            max_safety_orders: 3,
            price_deviation: dec!(1),
            safety_order_size: dec!(20),
            safety_order_price_step: dec!(1.07),
            safety_order_volume_step: dec!(1.5),
            take_profit: dec!(3),
            status: BotStatus::Running,
        }
    }

    #[test]
    fn spec_scenario_at_price_100() {
        let ladder = build_ladder(&bot(), dec!(100), None).unwrap();

        assert_eq!(ladder.base.quantity, dec!(0.2));
        assert_eq!(ladder.safety.len(), 3);

        // deviation(0) == price_deviation exactly
        assert_eq!(ladder.safety[0].price.unwrap(), dec!(99));
        // notional(0) = 20 at 99
        assert_eq!(
            ladder.safety[0].quantity,
            dec!(0.20202) // 20 / 99 floored to 1e-5
        );

        // deviation(1) = 1 * (1 + 1.07) = 2.07 -> price 97.93
        assert_eq!(ladder.safety[1].price.unwrap(), dec!(97.93));
        // notional(1) = 20 * 1.5 = 30
        assert_eq!(ladder.safety[1].quantity, dec!(0.30634));

        assert_eq!(ladder.take_profit.price.unwrap(), dec!(103));
        assert_eq!(ladder.take_profit.quantity, ladder.base.quantity);
    }

    #[test]
    fn take_profit_anchors_on_fill_price() {
        let ladder = build_ladder(&bot(), dec!(100), Some(dec!(100.5))).unwrap();
        assert_eq!(ladder.reference_price, dec!(100.5));
        assert_eq!(
            ladder.take_profit.price.unwrap(),
            dec!(100.5) * dec!(1.03)
        );
        // Base quantity still derives from the market price.
        assert_eq!(ladder.base.quantity, dec!(0.2));
    }

    #[test]
    fn deviation_strictly_increases_for_positive_step() {
        let mut b = bot();
        b.max_safety_orders = 8;
        b.safety_order_price_step = dec!(0.5);
        let ladder = build_ladder(&b, dec!(100), None).unwrap();
        for pair in ladder.safety.windows(2) {
            assert!(pair[1].price.unwrap() < pair[0].price.unwrap());
        }
    }

    #[test]
    fn notional_strictly_increases_for_volume_step_above_one() {
        let mut b = bot();
        b.max_safety_orders = 6;
        let ladder = build_ladder(&b, dec!(100), None).unwrap();
        for pair in ladder.safety.windows(2) {
            let n0 = pair[0].quantity * pair[0].price.unwrap();
            let n1 = pair[1].quantity * pair[1].price.unwrap();
            assert!(n1 > n0, "notional must grow: {n0} -> {n1}");
        }
    }

    #[test]
    fn zero_market_price_rejected() {
        assert!(matches!(
            build_ladder(&bot(), dec!(0), None),
            Err(DomainError::NonPositivePrice { .. })
        ));
    }

    #[test]
    fn deep_ladder_keeps_prices_positive_or_errors() {
        // 25 levels with an aggressive step pushes deviation past 100%;
        // the calculator must refuse rather than emit a negative price.
        let mut b = bot();
        b.max_safety_orders = 25;
        let result = build_ladder(&b, dec!(100), None);
        assert!(matches!(result, Err(DomainError::NonPositivePrice { .. })));
    }

    #[test]
    fn safety_orders_are_post_only_buys() {
        let ladder = build_ladder(&bot(), dec!(100), None).unwrap();
        for so in &ladder.safety {
            assert_eq!(so.side, OrderSide::Buy);
            assert_eq!(so.method, OrderMethod::Limit);
            assert_eq!(so.time_in_force, Some(TimeInForce::PostOnly));
        }
    }
}
