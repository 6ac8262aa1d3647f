//! Base-order placement and ladder submission.
//!
//! `place_base_order` is the entry point of every DCA cycle: open a
//! PENDING deal, market-buy the base leg, activate the deal on the
//! fill, then lay the safety orders and initial take-profit anchored on
//! the actual fill price. Safety/take-profit placement failures after
//! the base fill leave the deal ACTIVE with a partial order set; the
//! reconciliation engine repairs that on its next pass.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{
    build_ladder, decimal::round_down_to_increment, Bot, Deal, Ladder, Order, OrderSide,
    OrderSpec, OrderType, TimeInForce,
};
use crate::error::{Error, GatewayError, Result};
use crate::port::{ExchangeGateway, Store};

use super::Engine;

/// What `preview_orders` returns: the ladder plus operator-facing sums.
#[derive(Debug, Clone, Serialize)]
pub struct LadderPreview {
    pub ladder: Ladder,
    pub order_count: usize,
    /// Base notional plus every safety-order notional.
    pub total_cost: Decimal,
    pub take_profit_price: Decimal,
}

impl<G: ExchangeGateway, S: Store> Engine<G, S> {
    /// Start a new DCA cycle for the bot.
    ///
    /// Refuses when the bot already has an open deal. When the market
    /// buy itself fails the pending deal is marked FAILED before the
    /// error propagates, so the next cycle is not blocked by it.
    pub async fn place_base_order(&self, bot: &Bot) -> Result<Deal> {
        if let Some(existing) = self.store().open_deal_for_bot(&bot.id).await? {
            return Err(Error::OpenDeal {
                bot_id: bot.id.to_string(),
                deal_id: existing.id.to_string(),
            });
        }

        let market_price = self.current_bid(bot).await?;
        let ladder = build_ladder(bot, market_price, None)?;

        let mut deal = Deal::open(bot.id.clone());
        self.store().insert_deal(&deal).await?;

        info!(
            bot = %bot.name,
            deal_id = %deal.id,
            %market_price,
            quantity = %ladder.base.quantity,
            "Placing base order"
        );

        let placed = match self
            .timed(
                self.gateway()
                    .create_market_buy_order(&bot.pair.symbol, ladder.base.quantity),
            )
            .await
        {
            Ok(placed) => placed,
            Err(e) => {
                // A pending deal with no base fill would block the bot's
                // next cycle forever; close it out before propagating.
                deal.fail()?;
                self.store().update_deal(&deal).await?;
                warn!(deal_id = %deal.id, error = %e, "Base order failed, deal closed");
                return Err(e);
            }
        };

        let base_order = Order::market_filled(
            deal.id.clone(),
            OrderType::Base,
            OrderSide::Buy,
            placed.symbol.clone(),
            placed.quantity,
            placed.price,
            placed.cost,
            placed.external_id.clone(),
        );
        deal.activate(placed.quantity, placed.price, placed.cost)?;

        self.store().insert_order(&base_order).await?;
        self.store().update_deal(&deal).await?;

        info!(
            deal_id = %deal.id,
            fill_price = %placed.price,
            cost = %placed.cost,
            "Base order filled, deal active"
        );

        // Safety and take-profit legs anchor on the actual fill price.
        let anchored = build_ladder(bot, market_price, Some(placed.price))?;
        self.place_ladder_legs(bot, &mut deal, &anchored).await?;

        Ok(deal)
    }

    /// Submit the safety orders and initial take-profit for an active
    /// deal. Individual safety-order rejections are logged and skipped;
    /// the deal keeps whatever subset landed.
    async fn place_ladder_legs(
        &self,
        bot: &Bot,
        deal: &mut Deal,
        ladder: &Ladder,
    ) -> Result<()> {
        for (level, spec) in ladder.safety.iter().enumerate() {
            match self.place_limit_spec(bot, deal, spec).await {
                Ok(order) => {
                    self.store().insert_order(&order).await?;
                }
                Err(Error::Gateway(e)) => {
                    warn!(
                        deal_id = %deal.id,
                        level,
                        error = %e,
                        "Safety order not placed, continuing"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let tp_order = self.place_limit_spec(bot, deal, &ladder.take_profit).await?;
        self.store().insert_order(&tp_order).await?;
        self.store().update_deal(deal).await?;
        Ok(())
    }

    async fn place_limit_spec(
        &self,
        bot: &Bot,
        deal: &Deal,
        spec: &OrderSpec,
    ) -> Result<Order> {
        let price = spec.price.ok_or_else(|| {
            Error::Parse("limit order spec without a price".into())
        })?;
        let placed = self
            .timed(self.gateway().create_limit_order(
                &bot.pair.symbol,
                spec.side,
                spec.quantity,
                price,
                spec.time_in_force.unwrap_or(TimeInForce::GoodTilCancelled),
            ))
            .await?;

        Ok(Order::placed(
            deal.id.clone(),
            spec.order_type,
            spec.side,
            placed.symbol,
            spec.quantity,
            price,
            placed.external_id,
        ))
    }

    /// Run the ladder calculator against the live ticker without
    /// placing anything.
    pub async fn preview_orders(&self, bot: &Bot) -> Result<LadderPreview> {
        let market_price = self.current_bid(bot).await?;
        let ladder = build_ladder(bot, market_price, None)?;

        let safety_notional: Decimal = ladder
            .safety
            .iter()
            .filter_map(|so| so.price.map(|p| p * so.quantity))
            .sum();
        let total_cost = ladder.base.quantity * market_price + safety_notional;
        let take_profit_price = ladder.take_profit.price.unwrap_or_default();

        Ok(LadderPreview {
            order_count: 2 + ladder.safety.len(),
            total_cost,
            take_profit_price,
            ladder,
        })
    }

    /// Replacement take-profit quantity for the deal's current position.
    pub(crate) fn take_profit_quantity(bot: &Bot, total_quantity: Decimal) -> Result<Decimal> {
        Ok(round_down_to_increment(
            total_quantity,
            bot.pair.quantity_increment,
        )?)
    }

    async fn current_bid(&self, bot: &Bot) -> Result<Decimal> {
        let ticker = self
            .timed(self.gateway().fetch_ticker(&bot.pair.symbol))
            .await?;
        ticker.bid.ok_or_else(|| {
            GatewayError::MissingBid {
                symbol: bot.pair.symbol.clone(),
            }
            .into()
        })
    }
}
