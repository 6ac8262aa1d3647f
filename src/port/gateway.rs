//! Exchange gateway port.
//!
//! The gateway is an opaque collaborator: it already authenticates and
//! speaks the exchange's order API. This trait is the engine's entire
//! view of it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{ExternalOrderId, OrderSide, TimeInForce};
use crate::error::Error;

/// Best bid/ask snapshot for a symbol.
#[derive(Debug, Clone)]
pub struct Ticker {
    pub symbol: String,
    /// Absent when the book is empty or the symbol is halted.
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
}

/// Result of submitting an order to the exchange.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub external_id: ExternalOrderId,
    pub symbol: String,
    pub quantity: Decimal,
    /// Fill price for market orders, limit price otherwise.
    pub price: Decimal,
    pub cost: Decimal,
}

/// Exchange-side order state, already normalized by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStatus {
    /// Resting on the book (possibly partially filled).
    Open,
    Filled,
    Cancelled,
}

/// Point-in-time view of one order fetched from the exchange.
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub external_id: ExternalOrderId,
    pub status: SnapshotStatus,
    pub filled: Decimal,
    pub price: Decimal,
    pub last_fill_time: Option<DateTime<Utc>>,
}

/// Order placement, lookup, and cancellation against one exchange.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Fetch the current ticker for a symbol.
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, Error>;

    /// Submit a market buy; assumed to fill synchronously.
    async fn create_market_buy_order(
        &self,
        symbol: &str,
        quantity: Decimal,
    ) -> Result<PlacedOrder, Error>;

    /// Submit a market sell; assumed to fill synchronously.
    async fn create_market_sell_order(
        &self,
        symbol: &str,
        quantity: Decimal,
    ) -> Result<PlacedOrder, Error>;

    /// Submit a limit order.
    ///
    /// Post-only orders that would cross the book must fail with
    /// [`crate::error::GatewayError::PostOnlyWouldFill`].
    async fn create_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        time_in_force: TimeInForce,
    ) -> Result<PlacedOrder, Error>;

    /// Fetch the authoritative state of one order.
    async fn fetch_order(
        &self,
        external_id: &ExternalOrderId,
        symbol: &str,
    ) -> Result<OrderSnapshot, Error>;

    /// Cancel a live order.
    async fn cancel_order(&self, external_id: &ExternalOrderId, symbol: &str)
        -> Result<(), Error>;

    /// Exchange name for logging/debugging.
    fn exchange_name(&self) -> &'static str;
}

/// Forward the gateway through `Arc` so callers can share one instance.
#[async_trait]
impl<G: ExchangeGateway + ?Sized> ExchangeGateway for std::sync::Arc<G> {
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, Error> {
        (**self).fetch_ticker(symbol).await
    }

    async fn create_market_buy_order(
        &self,
        symbol: &str,
        quantity: Decimal,
    ) -> Result<PlacedOrder, Error> {
        (**self).create_market_buy_order(symbol, quantity).await
    }

    async fn create_market_sell_order(
        &self,
        symbol: &str,
        quantity: Decimal,
    ) -> Result<PlacedOrder, Error> {
        (**self).create_market_sell_order(symbol, quantity).await
    }

    async fn create_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        time_in_force: TimeInForce,
    ) -> Result<PlacedOrder, Error> {
        (**self)
            .create_limit_order(symbol, side, quantity, price, time_in_force)
            .await
    }

    async fn fetch_order(
        &self,
        external_id: &ExternalOrderId,
        symbol: &str,
    ) -> Result<OrderSnapshot, Error> {
        (**self).fetch_order(external_id, symbol).await
    }

    async fn cancel_order(
        &self,
        external_id: &ExternalOrderId,
        symbol: &str,
    ) -> Result<(), Error> {
        (**self).cancel_order(external_id, symbol).await
    }

    fn exchange_name(&self) -> &'static str {
        (**self).exchange_name()
    }
}
