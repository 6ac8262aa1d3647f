//! Streaming notification port.
//!
//! One connection exists per (exchange, network-mode) pair; the
//! multiplexer owns them and drives the events into ingestion.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{NetworkMode, OrderSide, OrderStatus};
use crate::error::Error;

/// Key identifying one shared streaming connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub exchange: String,
    pub network: NetworkMode,
}

impl ConnectionKey {
    pub fn new(exchange: impl Into<String>, network: NetworkMode) -> Self {
        Self {
            exchange: exchange.into(),
            network,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.exchange, self.network.as_str().to_lowercase())
    }
}

/// What kind of execution a report describes.
///
/// Only `Trade` reports mutate engine state; acknowledgements and the
/// rest are informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionKind {
    /// An actual trade execution.
    Trade,
    /// Order accepted onto the book.
    Placement,
    /// Order cancelled.
    Cancellation,
    /// Anything else the exchange emits.
    Other,
}

/// Normalized execution notification from the stream adapter.
///
/// The adapter has already mapped the exchange's status vocabulary onto
/// [`OrderStatus`].
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub external_order_id: String,
    /// Normalized (uppercase) trading-pair symbol.
    pub symbol: String,
    pub side: OrderSide,
    pub execution_kind: ExecutionKind,
    pub order_status: OrderStatus,
    /// Cumulative filled quantity.
    pub filled_quantity: Decimal,
    pub last_fill_price: Option<Decimal>,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// One asset balance within a balance update.
#[derive(Debug, Clone)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// Account balance push; informational only in this engine.
#[derive(Debug, Clone)]
pub struct BalanceUpdate {
    pub balances: Vec<AssetBalance>,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted by a streaming connection.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Execution(ExecutionReport),
    Balance(BalanceUpdate),
}

/// An open streaming session.
#[async_trait]
pub trait EventStream: Send {
    /// Next event, `Ok(None)` when the connection closed.
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, Error>;

    /// Refresh the session token so the server does not expire it.
    async fn refresh_session(&mut self) -> Result<(), Error>;
}

/// Opens streaming sessions for connection keys.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    type Stream: EventStream + 'static;

    async fn open(&self, key: &ConnectionKey) -> Result<Self::Stream, Error>;
}

/// Consumer of multiplexed stream events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event; implementations must not panic on bad data.
    async fn deliver(&self, key: &ConnectionKey, event: StreamEvent);
}
