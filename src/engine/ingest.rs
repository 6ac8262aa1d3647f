//! Event ingestion: applying stream notifications to deals.
//!
//! Only trade executions mutate state. A notification is resolved to a
//! known order by (external id, symbol); unresolved ones are logged and
//! dropped since the order may simply not exist in the store yet. All
//! processing for a deal happens under that deal's lock.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::{
    recompute_position, take_profit_price, Bot, Deal, ExternalOrderId, Order, OrderSide,
    OrderType, TimeInForce,
};
use crate::error::{Error, GatewayError, Result};
use crate::port::{
    BalanceUpdate, ExchangeGateway, ExecutionKind, ExecutionReport, Store, StreamEvent,
};

use super::Engine;

impl<G: ExchangeGateway, S: Store> Engine<G, S> {
    /// Dispatch one multiplexed stream event.
    pub async fn ingest_event(&self, event: StreamEvent) -> Result<()> {
        match event {
            StreamEvent::Execution(report) => self.ingest_execution(report).await,
            StreamEvent::Balance(update) => {
                Self::log_balances(&update);
                Ok(())
            }
        }
    }

    /// Apply one execution notification.
    pub async fn ingest_execution(&self, report: ExecutionReport) -> Result<()> {
        if report.execution_kind != ExecutionKind::Trade {
            debug!(
                external_id = %report.external_order_id,
                kind = ?report.execution_kind,
                "Ignoring non-trade execution report"
            );
            return Ok(());
        }

        let external_id = ExternalOrderId::new(report.external_order_id.clone());
        let Some(resolved) = self
            .store()
            .order_by_external(&external_id, &report.symbol)
            .await?
        else {
            warn!(
                external_id = %report.external_order_id,
                symbol = %report.symbol,
                "Dropping notification for unknown order"
            );
            return Ok(());
        };

        let _guard = self.locks().acquire(&resolved.deal_id).await;

        // Reload under the lock; a concurrent pass may have moved it.
        let Some(mut order) = self.store().order(&resolved.id).await? else {
            return Ok(());
        };
        if !order.apply_update(
            report.order_status,
            report.filled_quantity,
            report.last_fill_price,
            report.timestamp,
        ) {
            debug!(order_id = %order.id, "Duplicate terminal notification, no-op");
            return Ok(());
        }

        if !order.is_filled() {
            return self.store().update_order(&order).await;
        }

        let deal_id = order.deal_id.clone();
        let Some(deal) = self.store().deal(&deal_id).await? else {
            return Err(Error::NotFound {
                kind: "deal",
                id: deal_id.to_string(),
            });
        };
        let Some(bot) = self.store().bot(&deal.bot_id).await? else {
            return Err(Error::NotFound {
                kind: "bot",
                id: deal.bot_id.to_string(),
            });
        };

        match order.order_type {
            OrderType::Base => self.on_base_filled(deal, order).await,
            OrderType::Safety => self.on_safety_filled(&bot, deal, order).await,
            OrderType::TakeProfit => self.on_take_profit_filled(&bot, deal, order).await,
        }
    }

    /// Base fill: PENDING -> ACTIVE with the fill's totals.
    ///
    /// Market base orders are recorded terminal at placement, so this
    /// arm only fires when the stream beats the placement write or the
    /// base leg was recovered as a resting order.
    async fn on_base_filled(&self, mut deal: Deal, order: Order) -> Result<()> {
        if deal.status.is_terminal() {
            return self.store().update_order(&order).await;
        }

        let price = order.price.ok_or_else(|| {
            Error::Parse(format!("filled base order {} without a price", order.id))
        })?;
        deal.activate(order.filled, price, order.cost)?;
        self.store().apply_fill(&order, &deal).await?;

        info!(deal_id = %deal.id, price = %price, "Deal activated by base fill");
        Ok(())
    }

    /// Safety fill: recompute the position and replace the take-profit.
    async fn on_safety_filled(&self, bot: &Bot, mut deal: Deal, order: Order) -> Result<()> {
        if deal.status.is_terminal() {
            warn!(
                deal_id = %deal.id,
                order_id = %order.id,
                "Safety fill arrived after the deal closed; recording the order only"
            );
            return self.store().update_order(&order).await;
        }

        let orders = self.store().orders_for_deal(&deal.id).await?;
        let merged: Vec<&Order> = orders
            .iter()
            .map(|o| if o.id == order.id { &order } else { o })
            .collect();

        let totals = recompute_position(merged.iter().copied())?;
        deal.apply_position(&totals);
        deal.actual_safety_orders += 1;

        // The order update and the new aggregates land together; the
        // take-profit swap is its own atomic step after it.
        self.store().apply_fill(&order, &deal).await?;

        info!(
            deal_id = %deal.id,
            average_price = %totals.average_price,
            quantity = %totals.total_quantity,
            "Safety order filled, position averaged down"
        );

        let live_tp = orders
            .iter()
            .find(|o| o.order_type == OrderType::TakeProfit && o.status.is_live())
            .cloned();
        self.replace_take_profit_for(bot, &mut deal, live_tp).await
    }

    /// Cancel the stale take-profit (when one is live) and place the
    /// replacement sized to the full recomputed position.
    pub(crate) async fn replace_take_profit_for(
        &self,
        bot: &Bot,
        deal: &mut Deal,
        live_tp: Option<Order>,
    ) -> Result<()> {
        let mut cancelled = match live_tp {
            Some(mut tp) => {
                match self
                    .timed(self.gateway().cancel_order(&tp.external_id, &tp.symbol))
                    .await
                {
                    Ok(()) => {}
                    // Already gone at the exchange; safe to supersede.
                    Err(Error::Gateway(GatewayError::UnknownOrder { .. })) => {}
                    Err(e) => return Err(e),
                }
                tp.mark_cancelled(Some("superseded after position change".into()));
                Some(tp)
            }
            None => None,
        };

        let new_price = take_profit_price(deal.average_price, bot.take_profit);
        let quantity = Self::take_profit_quantity(bot, deal.current_quantity)?;

        let placed = self
            .timed(self.gateway().create_limit_order(
                &bot.pair.symbol,
                OrderSide::Sell,
                quantity,
                new_price,
                TimeInForce::GoodTilCancelled,
            ))
            .await;

        let placed = match placed {
            Ok(placed) => placed,
            Err(e) => {
                // Persist the cancel we already made so a later
                // reconciliation pass sees the missing take-profit and
                // re-places it, instead of trusting a dead order.
                if let Some(tp) = cancelled.take() {
                    self.store().update_order(&tp).await?;
                }
                warn!(deal_id = %deal.id, error = %e, "Take-profit replacement failed");
                return Err(e);
            }
        };

        let replacement = Order::placed(
            deal.id.clone(),
            OrderType::TakeProfit,
            OrderSide::Sell,
            placed.symbol,
            quantity,
            new_price,
            placed.external_id,
        );

        match cancelled {
            Some(tp) => {
                self.store()
                    .replace_take_profit(&tp, &replacement, deal)
                    .await?;
            }
            None => {
                self.store().insert_order(&replacement).await?;
                self.store().update_deal(deal).await?;
            }
        }

        info!(
            deal_id = %deal.id,
            price = %new_price,
            %quantity,
            "Take-profit replaced"
        );
        Ok(())
    }

    /// Take-profit fill: close the deal and restart if the bot runs.
    async fn on_take_profit_filled(&self, bot: &Bot, mut deal: Deal, order: Order) -> Result<()> {
        if deal.status.is_terminal() {
            warn!(
                deal_id = %deal.id,
                order_id = %order.id,
                "Take-profit fill arrived after the deal closed; recording the order only"
            );
            return self.store().update_order(&order).await;
        }

        let proceeds = order.cost;
        deal.complete(proceeds, order.filled_at.unwrap_or_else(Utc::now))?;
        self.store().apply_fill(&order, &deal).await?;
        self.locks().forget(&deal.id);

        info!(
            deal_id = %deal.id,
            profit = %deal.current_profit,
            "Deal completed by take-profit fill"
        );

        self.restart_if_running(bot).await
    }

    fn log_balances(update: &BalanceUpdate) {
        for balance in &update.balances {
            debug!(
                asset = %balance.asset,
                free = %balance.free,
                locked = %balance.locked,
                "Balance update"
            );
        }
    }
}
