//! Persistence port for bots, deals, and orders.
//!
//! The store is an opaque collaborator offering create/read/update
//! primitives plus a couple of composite writes that must commit
//! atomically within one deal's aggregate.

use async_trait::async_trait;

use crate::domain::{Bot, BotId, BotStatus, Deal, DealId, ExternalOrderId, Order, OrderId};
use crate::error::Error;

/// Storage operations for the engine's durable state.
#[async_trait]
pub trait Store: Send + Sync {
    // --- bots ---

    async fn insert_bot(&self, bot: &Bot) -> Result<(), Error>;

    async fn bot(&self, id: &BotId) -> Result<Option<Bot>, Error>;

    async fn set_bot_status(&self, id: &BotId, status: BotStatus) -> Result<(), Error>;

    /// All bots currently RUNNING; drives connection rebuild at startup.
    async fn running_bots(&self) -> Result<Vec<Bot>, Error>;

    // --- deals ---

    async fn insert_deal(&self, deal: &Deal) -> Result<(), Error>;

    async fn deal(&self, id: &DealId) -> Result<Option<Deal>, Error>;

    async fn update_deal(&self, deal: &Deal) -> Result<(), Error>;

    /// The bot's PENDING or ACTIVE deal, if one exists.
    ///
    /// At most one open deal per bot is enforced by construction; this
    /// is how callers check before opening another.
    async fn open_deal_for_bot(&self, bot_id: &BotId) -> Result<Option<Deal>, Error>;

    /// Every PENDING/ACTIVE deal, for scheduled reconciliation sweeps.
    async fn open_deals(&self) -> Result<Vec<Deal>, Error>;

    // --- orders ---

    async fn insert_order(&self, order: &Order) -> Result<(), Error>;

    async fn order(&self, id: &OrderId) -> Result<Option<Order>, Error>;

    /// Resolve a stream notification to a known order.
    async fn order_by_external(
        &self,
        external_id: &ExternalOrderId,
        symbol: &str,
    ) -> Result<Option<Order>, Error>;

    async fn update_order(&self, order: &Order) -> Result<(), Error>;

    async fn orders_for_deal(&self, deal_id: &DealId) -> Result<Vec<Order>, Error>;

    /// The deal's currently live (PLACED/PARTIALLY_FILLED) take-profit.
    async fn live_take_profit(&self, deal_id: &DealId) -> Result<Option<Order>, Error>;

    // --- composite writes (single transaction each) ---

    /// Persist an order update together with its deal's new aggregates.
    async fn apply_fill(&self, order: &Order, deal: &Deal) -> Result<(), Error>;

    /// Atomically supersede a take-profit: mark the old one cancelled,
    /// insert the replacement, and persist the deal's new aggregates.
    /// Keeps the "at most one live take-profit" invariant from ever
    /// being observable as violated.
    async fn replace_take_profit(
        &self,
        cancelled: &Order,
        replacement: &Order,
        deal: &Deal,
    ) -> Result<(), Error>;
}

/// Forward the store through `Arc` so callers can share one instance.
#[async_trait]
impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    async fn insert_bot(&self, bot: &Bot) -> Result<(), Error> {
        (**self).insert_bot(bot).await
    }

    async fn bot(&self, id: &BotId) -> Result<Option<Bot>, Error> {
        (**self).bot(id).await
    }

    async fn set_bot_status(&self, id: &BotId, status: BotStatus) -> Result<(), Error> {
        (**self).set_bot_status(id, status).await
    }

    async fn running_bots(&self) -> Result<Vec<Bot>, Error> {
        (**self).running_bots().await
    }

    async fn insert_deal(&self, deal: &Deal) -> Result<(), Error> {
        (**self).insert_deal(deal).await
    }

    async fn deal(&self, id: &DealId) -> Result<Option<Deal>, Error> {
        (**self).deal(id).await
    }

    async fn update_deal(&self, deal: &Deal) -> Result<(), Error> {
        (**self).update_deal(deal).await
    }

    async fn open_deal_for_bot(&self, bot_id: &BotId) -> Result<Option<Deal>, Error> {
        (**self).open_deal_for_bot(bot_id).await
    }

    async fn open_deals(&self) -> Result<Vec<Deal>, Error> {
        (**self).open_deals().await
    }

    async fn insert_order(&self, order: &Order) -> Result<(), Error> {
        (**self).insert_order(order).await
    }

    async fn order(&self, id: &OrderId) -> Result<Option<Order>, Error> {
        (**self).order(id).await
    }

    async fn order_by_external(
        &self,
        external_id: &ExternalOrderId,
        symbol: &str,
    ) -> Result<Option<Order>, Error> {
        (**self).order_by_external(external_id, symbol).await
    }

    async fn update_order(&self, order: &Order) -> Result<(), Error> {
        (**self).update_order(order).await
    }

    async fn orders_for_deal(&self, deal_id: &DealId) -> Result<Vec<Order>, Error> {
        (**self).orders_for_deal(deal_id).await
    }

    async fn live_take_profit(&self, deal_id: &DealId) -> Result<Option<Order>, Error> {
        (**self).live_take_profit(deal_id).await
    }

    async fn apply_fill(&self, order: &Order, deal: &Deal) -> Result<(), Error> {
        (**self).apply_fill(order, deal).await
    }

    async fn replace_take_profit(
        &self,
        cancelled: &Order,
        replacement: &Order,
        deal: &Deal,
    ) -> Result<(), Error> {
        (**self).replace_take_profit(cancelled, replacement, deal).await
    }
}
