//! Reconciliation: pull-based repair of local state against the
//! exchange.
//!
//! One pass fetches the authoritative status of a deal's take-profit
//! and still-open safety orders, classifies the discrepancy into one of
//! four situations, and repairs store and exchange to agree. An order
//! found cancelled out-of-band overrides everything: the deal is marked
//! FAILED and left alone.
//!
//! Every exchange mutation is immediately mirrored in the store so a
//! repeated pass never re-discovers the same discrepancy. Per-order
//! fill updates are committed as they are found; a gateway failure
//! later in the pass keeps them (each is independently safe) and
//! surfaces the error for the next scheduled pass.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{
    recompute_position, take_profit_price, Bot, Deal, DealId, DealStatus, Order, OrderSide,
    OrderStatus, OrderType, TimeInForce,
};
use crate::error::{Error, GatewayError, Result};
use crate::port::{ExchangeGateway, OrderSnapshot, SnapshotStatus, Store};

use super::effects::ReconcileEffects;
use super::Engine;

/// Which of the four discrepancy situations a pass found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReconcileSituation {
    /// Safety fills discovered and the take-profit filled too.
    SafetyAndTakeProfitFilled,
    /// Safety fills discovered (or the take-profit is missing) while
    /// the take-profit has not filled.
    SafetyFilledTakeProfitOpen,
    /// Take-profit filled with no new safety fills.
    TakeProfitFilledOnly,
    /// Everything already agrees.
    Consistent,
    /// An order was cancelled out-of-band at the exchange.
    Unrecoverable,
}

/// One mutation a pass took (or, in dry-run, would take).
#[derive(Debug, Clone, Serialize)]
pub enum ReconcileAction {
    OrderMarkedFilled { order_id: String },
    TakeProfitCancelled { external_id: String },
    TakeProfitPlaced { price: Decimal, quantity: Decimal },
    MarketSellFallback { quantity: Decimal },
    SafetyOrderCancelled { external_id: String },
    WarningAttached { message: String },
    DealCompleted { profit: Decimal },
    DealFailed,
    CycleRestarted { deal_id: String },
}

/// Outcome of one reconciliation pass for one deal.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub situation: ReconcileSituation,
    pub changed: bool,
    pub actions: Vec<ReconcileAction>,
}

impl ReconcileReport {
    fn new(situation: ReconcileSituation, actions: Vec<ReconcileAction>) -> Self {
        Self {
            situation,
            changed: !actions.is_empty(),
            actions,
        }
    }
}

impl<G: ExchangeGateway, S: Store> Engine<G, S> {
    /// Run one reconciliation pass for a deal.
    pub async fn check_deal<E: ReconcileEffects>(
        &self,
        deal_id: &DealId,
        effects: &E,
    ) -> Result<ReconcileReport> {
        let _guard = self.locks().acquire(deal_id).await;

        let Some(mut deal) = self.store().deal(deal_id).await? else {
            return Err(Error::NotFound {
                kind: "deal",
                id: deal_id.to_string(),
            });
        };
        if deal.status.is_terminal() {
            debug!(deal_id = %deal.id, "Deal already terminal, nothing to reconcile");
            return Ok(ReconcileReport::new(ReconcileSituation::Consistent, Vec::new()));
        }
        let Some(bot) = self.store().bot(&deal.bot_id).await? else {
            return Err(Error::NotFound {
                kind: "bot",
                id: deal.bot_id.to_string(),
            });
        };

        let mut orders = self.store().orders_for_deal(deal_id).await?;

        let tp_index = orders
            .iter()
            .position(|o| o.order_type == OrderType::TakeProfit && o.status.is_live());
        let open_safety: Vec<usize> = orders
            .iter()
            .enumerate()
            .filter(|(_, o)| o.order_type == OrderType::Safety && o.status.is_live())
            .map(|(i, _)| i)
            .collect();

        // Authoritative snapshots before anything is touched.
        let tp_snapshot = match tp_index {
            Some(i) => Some(self.fetch_snapshot(&orders[i]).await?),
            None => None,
        };
        let mut safety_snapshots = Vec::with_capacity(open_safety.len());
        for &i in &open_safety {
            safety_snapshots.push(self.fetch_snapshot(&orders[i]).await?);
        }

        // An out-of-band cancel makes the deal unrecoverable; no repair
        // is attempted past this point.
        let cancelled_out_of_band = tp_snapshot
            .iter()
            .chain(safety_snapshots.iter())
            .any(|s| s.status == SnapshotStatus::Cancelled);
        if cancelled_out_of_band {
            warn!(deal_id = %deal.id, "Order cancelled out-of-band at exchange");
            let mut actions = Vec::new();
            deal.fail()?;
            effects.update_deal(&deal).await?;
            actions.push(ReconcileAction::DealFailed);
            if !effects.is_dry_run() {
                self.locks().forget(&deal.id);
            }
            return Ok(ReconcileReport::new(ReconcileSituation::Unrecoverable, actions));
        }

        let mut actions = Vec::new();

        // Commit newly discovered fills order by order.
        let mut newly_filled_safety = 0usize;
        for (&i, snapshot) in open_safety.iter().zip(&safety_snapshots) {
            if snapshot.status == SnapshotStatus::Filled {
                Self::apply_snapshot_fill(&mut orders[i], snapshot);
                effects.update_order(&orders[i]).await?;
                actions.push(ReconcileAction::OrderMarkedFilled {
                    order_id: orders[i].id.to_string(),
                });
                newly_filled_safety += 1;
            }
        }
        let tp_filled = match (&tp_snapshot, tp_index) {
            (Some(snapshot), Some(i)) if snapshot.status == SnapshotStatus::Filled => {
                Self::apply_snapshot_fill(&mut orders[i], snapshot);
                effects.update_order(&orders[i]).await?;
                actions.push(ReconcileAction::OrderMarkedFilled {
                    order_id: orders[i].id.to_string(),
                });
                true
            }
            _ => false,
        };

        let take_profit_missing = tp_index.is_none()
            && deal.status == DealStatus::Active
            && deal.current_quantity > Decimal::ZERO;

        let situation = if newly_filled_safety > 0 && tp_filled {
            ReconcileSituation::SafetyAndTakeProfitFilled
        } else if (newly_filled_safety > 0 || take_profit_missing) && !tp_filled {
            ReconcileSituation::SafetyFilledTakeProfitOpen
        } else if tp_filled {
            ReconcileSituation::TakeProfitFilledOnly
        } else {
            ReconcileSituation::Consistent
        };

        match situation {
            ReconcileSituation::SafetyAndTakeProfitFilled => {
                self.repair_both_filled(&bot, &mut deal, &orders, tp_index, effects, &mut actions)
                    .await?;
            }
            ReconcileSituation::SafetyFilledTakeProfitOpen => {
                self.repair_replace_take_profit(
                    &bot,
                    &mut deal,
                    &orders,
                    tp_index,
                    newly_filled_safety > 0,
                    effects,
                    &mut actions,
                )
                .await?;
            }
            ReconcileSituation::TakeProfitFilledOnly => {
                self.repair_take_profit_only(&bot, &mut deal, &mut orders, tp_index, effects, &mut actions)
                    .await?;
            }
            ReconcileSituation::Consistent | ReconcileSituation::Unrecoverable => {}
        }

        Ok(ReconcileReport::new(situation, actions))
    }

    /// Reconcile every open deal; per-deal failures are logged and do
    /// not stop the sweep.
    pub async fn reconcile_open_deals<E: ReconcileEffects>(&self, effects: &E) -> Result<usize> {
        let deals = self.store().open_deals().await?;
        let mut repaired = 0;
        for deal in deals {
            match self.check_deal(&deal.id, effects).await {
                Ok(report) if report.changed => {
                    info!(
                        deal_id = %deal.id,
                        situation = ?report.situation,
                        actions = report.actions.len(),
                        "Reconciliation repaired deal"
                    );
                    repaired += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(deal_id = %deal.id, error = %e, "Reconciliation pass failed");
                }
            }
        }
        Ok(repaired)
    }

    async fn fetch_snapshot(&self, order: &Order) -> Result<OrderSnapshot> {
        self.timed(self.gateway().fetch_order(&order.external_id, &order.symbol))
            .await
    }

    fn apply_snapshot_fill(order: &mut Order, snapshot: &OrderSnapshot) {
        let at = snapshot.last_fill_time.unwrap_or_else(Utc::now);
        order.apply_update(OrderStatus::Filled, snapshot.filled, Some(snapshot.price), at);
    }

    /// State 1: safety fills and the take-profit both landed while we
    /// were not watching. Anything bought after the take-profit sold is
    /// stranded inventory the operator has to resolve.
    async fn repair_both_filled<E: ReconcileEffects>(
        &self,
        bot: &Bot,
        deal: &mut Deal,
        orders: &[Order],
        tp_index: Option<usize>,
        effects: &E,
        actions: &mut Vec<ReconcileAction>,
    ) -> Result<()> {
        let totals = recompute_position(orders.iter())?;
        deal.apply_position(&totals);
        deal.actual_safety_orders =
            orders.iter().filter(|o| o.order_type == OrderType::Safety && o.is_filled()).count()
                as u32;

        let tp = tp_index.map(|i| &orders[i]).ok_or_else(|| {
            Error::Parse("classified take-profit fill without a take-profit order".into())
        })?;

        let stranded = totals.total_quantity - tp.filled;
        if stranded > Decimal::ZERO {
            let message = Self::stranded_warning(bot, stranded);
            deal.attach_warning(message.clone());
            actions.push(ReconcileAction::WarningAttached { message });
        }

        deal.complete(tp.cost, tp.filled_at.unwrap_or_else(Utc::now))?;
        effects.update_deal(deal).await?;
        actions.push(ReconcileAction::DealCompleted {
            profit: deal.current_profit,
        });

        self.finish_terminal(bot, deal, effects, actions).await
    }

    /// State 2: the position changed but the take-profit did not (or is
    /// missing entirely). Cancel the stale one and re-place at the new
    /// average; a post-only rejection falls back to a market sell that
    /// closes the deal on the spot.
    #[allow(clippy::too_many_arguments)]
    async fn repair_replace_take_profit<E: ReconcileEffects>(
        &self,
        bot: &Bot,
        deal: &mut Deal,
        orders: &[Order],
        tp_index: Option<usize>,
        position_changed: bool,
        effects: &E,
        actions: &mut Vec<ReconcileAction>,
    ) -> Result<()> {
        if position_changed {
            let totals = recompute_position(orders.iter())?;
            deal.apply_position(&totals);
            deal.actual_safety_orders = orders
                .iter()
                .filter(|o| o.order_type == OrderType::Safety && o.is_filled())
                .count() as u32;
        }

        let cancelled = match tp_index {
            Some(i) => {
                let mut tp = orders[i].clone();
                match effects.cancel_exchange_order(&tp.external_id, &tp.symbol).await {
                    Ok(()) => {}
                    Err(Error::Gateway(GatewayError::UnknownOrder { .. })) => {}
                    Err(e) => return Err(e),
                }
                tp.mark_cancelled(Some("superseded by reconciliation".into()));
                actions.push(ReconcileAction::TakeProfitCancelled {
                    external_id: tp.external_id.to_string(),
                });
                Some(tp)
            }
            None => None,
        };

        let price = take_profit_price(deal.average_price, bot.take_profit);
        let quantity = Self::take_profit_quantity(bot, deal.current_quantity)?;

        match effects
            .place_limit_sell(&bot.pair.symbol, quantity, price, TimeInForce::PostOnly)
            .await
        {
            Ok(placed) => {
                let replacement = Order::placed(
                    deal.id.clone(),
                    OrderType::TakeProfit,
                    OrderSide::Sell,
                    placed.symbol,
                    quantity,
                    price,
                    placed.external_id,
                );
                effects
                    .persist_take_profit_swap(cancelled.as_ref(), &replacement, deal)
                    .await?;
                actions.push(ReconcileAction::TakeProfitPlaced { price, quantity });
                Ok(())
            }
            Err(Error::Gateway(GatewayError::PostOnlyWouldFill)) => {
                let placed = effects.market_sell(&bot.pair.symbol, quantity).await?;
                let filled_tp = Order::market_filled(
                    deal.id.clone(),
                    OrderType::TakeProfit,
                    OrderSide::Sell,
                    placed.symbol,
                    placed.quantity,
                    placed.price,
                    placed.cost,
                    placed.external_id,
                );
                deal.complete(placed.cost, Utc::now())?;
                effects
                    .persist_take_profit_swap(cancelled.as_ref(), &filled_tp, deal)
                    .await?;
                actions.push(ReconcileAction::MarketSellFallback { quantity });
                actions.push(ReconcileAction::DealCompleted {
                    profit: deal.current_profit,
                });
                self.finish_terminal(bot, deal, effects, actions).await
            }
            Err(e) => {
                // Keep the cancel durable so the next pass sees the
                // missing take-profit instead of a phantom live one.
                if let Some(tp) = &cancelled {
                    effects.update_order(tp).await?;
                }
                Err(e)
            }
        }
    }

    /// State 3: the take-profit filled with nothing else outstanding
    /// changed. Sweep the leftover safety orders off the book and close.
    async fn repair_take_profit_only<E: ReconcileEffects>(
        &self,
        bot: &Bot,
        deal: &mut Deal,
        orders: &mut [Order],
        tp_index: Option<usize>,
        effects: &E,
        actions: &mut Vec<ReconcileAction>,
    ) -> Result<()> {
        for order in orders.iter_mut() {
            if order.order_type == OrderType::Safety && order.status.is_live() {
                match effects.cancel_exchange_order(&order.external_id, &order.symbol).await {
                    Ok(()) => {}
                    Err(Error::Gateway(GatewayError::UnknownOrder { .. })) => {}
                    Err(e) => return Err(e),
                }
                order.mark_cancelled(Some("deal closed by take-profit".into()));
                effects.update_order(order).await?;
                actions.push(ReconcileAction::SafetyOrderCancelled {
                    external_id: order.external_id.to_string(),
                });
            }
        }

        let tp = tp_index.map(|i| &orders[i]).ok_or_else(|| {
            Error::Parse("classified take-profit fill without a take-profit order".into())
        })?;
        deal.complete(tp.cost, tp.filled_at.unwrap_or_else(Utc::now))?;
        effects.update_deal(deal).await?;
        actions.push(ReconcileAction::DealCompleted {
            profit: deal.current_profit,
        });

        self.finish_terminal(bot, deal, effects, actions).await
    }

    /// Shared tail for branches that closed the deal: release the lock
    /// entry and restart the cycle unless this is a dry run.
    async fn finish_terminal<E: ReconcileEffects>(
        &self,
        bot: &Bot,
        deal: &Deal,
        effects: &E,
        actions: &mut Vec<ReconcileAction>,
    ) -> Result<()> {
        if effects.is_dry_run() {
            return Ok(());
        }
        self.locks().forget(&deal.id);

        let Some(current) = self.store().bot(&bot.id).await? else {
            return Ok(());
        };
        if current.is_running() {
            let new_deal = self.place_base_order(&current).await?;
            actions.push(ReconcileAction::CycleRestarted {
                deal_id: new_deal.id.to_string(),
            });
        }
        Ok(())
    }
}
