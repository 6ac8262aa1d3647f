//! Reconciliation write surface.
//!
//! Every mutation a reconciliation pass can make goes through this
//! trait. The live executor forwards to the real gateway and store; the
//! dry-run executor performs no mutation at all, so a pass against it
//! reports what it *would* do. Classification and reads stay in the
//! engine and are identical for both.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Deal, ExternalOrderId, Order, OrderSide, TimeInForce};
use crate::error::{GatewayError, Result};
use crate::port::{ExchangeGateway, PlacedOrder, Store};

/// Executor for reconciliation's exchange and store mutations.
#[async_trait]
pub trait ReconcileEffects: Send + Sync {
    async fn cancel_exchange_order(
        &self,
        external_id: &ExternalOrderId,
        symbol: &str,
    ) -> Result<()>;

    async fn place_limit_sell(
        &self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        time_in_force: TimeInForce,
    ) -> Result<PlacedOrder>;

    async fn market_sell(&self, symbol: &str, quantity: Decimal) -> Result<PlacedOrder>;

    async fn update_order(&self, order: &Order) -> Result<()>;

    async fn update_deal(&self, deal: &Deal) -> Result<()>;

    /// Persist a take-profit swap atomically: the superseded order (when
    /// one existed), its replacement, and the deal's new aggregates.
    async fn persist_take_profit_swap(
        &self,
        cancelled: Option<&Order>,
        replacement: &Order,
        deal: &Deal,
    ) -> Result<()>;

    /// Dry-run executors skip deal restarts as well as mutations.
    fn is_dry_run(&self) -> bool;
}

/// Live executor: real gateway calls, real store writes.
pub struct LiveEffects<G, S> {
    gateway: G,
    store: S,
    call_timeout: std::time::Duration,
}

impl<G: ExchangeGateway, S: Store> LiveEffects<G, S> {
    pub fn new(gateway: G, store: S, call_timeout: std::time::Duration) -> Self {
        Self {
            gateway,
            store,
            call_timeout,
        }
    }

    async fn timed<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                seconds: self.call_timeout.as_secs(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl<G: ExchangeGateway, S: Store> ReconcileEffects for LiveEffects<G, S> {
    async fn cancel_exchange_order(
        &self,
        external_id: &ExternalOrderId,
        symbol: &str,
    ) -> Result<()> {
        self.timed(self.gateway.cancel_order(external_id, symbol)).await
    }

    async fn place_limit_sell(
        &self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        time_in_force: TimeInForce,
    ) -> Result<PlacedOrder> {
        self.timed(self.gateway.create_limit_order(
            symbol,
            OrderSide::Sell,
            quantity,
            price,
            time_in_force,
        ))
        .await
    }

    async fn market_sell(&self, symbol: &str, quantity: Decimal) -> Result<PlacedOrder> {
        self.timed(self.gateway.create_market_sell_order(symbol, quantity))
            .await
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        self.store.update_order(order).await
    }

    async fn update_deal(&self, deal: &Deal) -> Result<()> {
        self.store.update_deal(deal).await
    }

    async fn persist_take_profit_swap(
        &self,
        cancelled: Option<&Order>,
        replacement: &Order,
        deal: &Deal,
    ) -> Result<()> {
        match cancelled {
            Some(old) => self.store.replace_take_profit(old, replacement, deal).await,
            None => {
                self.store.insert_order(replacement).await?;
                self.store.update_deal(deal).await
            }
        }
    }

    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Dry-run executor: nothing is mutated anywhere.
///
/// Placement calls return synthetic placements so the pass can keep
/// going and report the full action list it would have taken.
#[derive(Default)]
pub struct DryRunEffects;

impl DryRunEffects {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn synthetic_placement(symbol: &str, quantity: Decimal, price: Decimal) -> PlacedOrder {
        PlacedOrder {
            external_id: ExternalOrderId::new(format!("dryrun-{}", Uuid::new_v4())),
            symbol: symbol.to_string(),
            quantity,
            price,
            cost: quantity * price,
        }
    }
}

#[async_trait]
impl ReconcileEffects for DryRunEffects {
    async fn cancel_exchange_order(
        &self,
        external_id: &ExternalOrderId,
        symbol: &str,
    ) -> Result<()> {
        debug!(%external_id, symbol, "dry-run: skipping cancel");
        Ok(())
    }

    async fn place_limit_sell(
        &self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        _time_in_force: TimeInForce,
    ) -> Result<PlacedOrder> {
        debug!(symbol, %quantity, %price, "dry-run: skipping limit sell");
        Ok(Self::synthetic_placement(symbol, quantity, price))
    }

    async fn market_sell(&self, symbol: &str, quantity: Decimal) -> Result<PlacedOrder> {
        debug!(symbol, %quantity, "dry-run: skipping market sell");
        Ok(Self::synthetic_placement(symbol, quantity, Decimal::ZERO))
    }

    async fn update_order(&self, _order: &Order) -> Result<()> {
        Ok(())
    }

    async fn update_deal(&self, _deal: &Deal) -> Result<()> {
        Ok(())
    }

    async fn persist_take_profit_swap(
        &self,
        _cancelled: Option<&Order>,
        _replacement: &Order,
        _deal: &Deal,
    ) -> Result<()> {
        Ok(())
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}
