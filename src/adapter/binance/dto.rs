//! Binance wire types.
//!
//! User-data-stream payloads use Binance's one-letter field names; REST
//! responses use the spot API's camelCase. Both are normalized here so
//! the rest of the crate never sees exchange vocabulary.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::port::{AssetBalance, BalanceUpdate, ExecutionKind, ExecutionReport};
use crate::domain::{OrderSide, OrderStatus};

/// Map the spot API's order-status vocabulary onto the domain's.
///
/// Exhaustive over every status the user data stream documents; an
/// unknown string is a parse error rather than a silent guess.
pub fn map_order_status(status: &str) -> Result<OrderStatus> {
    match status {
        "NEW" => Ok(OrderStatus::Placed),
        "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
        "FILLED" => Ok(OrderStatus::Filled),
        "CANCELED" => Ok(OrderStatus::Cancelled),
        "EXPIRED" | "EXPIRED_IN_MATCH" => Ok(OrderStatus::Cancelled),
        "REJECTED" => Ok(OrderStatus::Failed),
        "PENDING_CANCEL" => Ok(OrderStatus::PartiallyFilled),
        other => Err(Error::Parse(format!("unknown order status '{other}'"))),
    }
}

fn map_execution_kind(execution_type: &str) -> ExecutionKind {
    match execution_type {
        "TRADE" => ExecutionKind::Trade,
        "NEW" => ExecutionKind::Placement,
        "CANCELED" | "EXPIRED" | "REJECTED" => ExecutionKind::Cancellation,
        _ => ExecutionKind::Other,
    }
}

fn map_side(side: &str) -> Result<OrderSide> {
    OrderSide::parse(side).ok_or_else(|| Error::Parse(format!("unknown order side '{side}'")))
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

/// Messages pushed on the user data stream, tagged by the `e` field.
#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
pub enum UserStreamMessage {
    #[serde(rename = "executionReport")]
    ExecutionReport(ExecutionReportMessage),

    #[serde(rename = "outboundAccountPosition")]
    AccountPosition(AccountPositionMessage),

    #[serde(rename = "balanceUpdate")]
    BalanceDelta(serde_json::Value),

    #[serde(other)]
    Unknown,
}

/// `executionReport` event with Binance's single-letter keys.
#[derive(Debug, Deserialize)]
pub struct ExecutionReportMessage {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "i")]
    pub order_id: u64,
    /// Execution type (what just happened).
    #[serde(rename = "x")]
    pub execution_type: String,
    /// Current order status (where the order now stands).
    #[serde(rename = "X")]
    pub order_status: String,
    #[serde(rename = "q")]
    pub quantity: Decimal,
    /// Cumulative filled quantity.
    #[serde(rename = "z")]
    pub cumulative_filled: Decimal,
    /// Last executed price; zero when nothing traded.
    #[serde(rename = "L")]
    pub last_fill_price: Decimal,
    /// Transaction time, epoch millis.
    #[serde(rename = "T")]
    pub transaction_time: i64,
}

impl ExecutionReportMessage {
    pub fn normalize(self) -> Result<ExecutionReport> {
        Ok(ExecutionReport {
            external_order_id: self.order_id.to_string(),
            symbol: self.symbol.to_uppercase(),
            side: map_side(&self.side)?,
            execution_kind: map_execution_kind(&self.execution_type),
            order_status: map_order_status(&self.order_status)?,
            filled_quantity: self.cumulative_filled,
            last_fill_price: (self.last_fill_price > Decimal::ZERO)
                .then_some(self.last_fill_price),
            quantity: self.quantity,
            timestamp: millis_to_utc(self.transaction_time),
        })
    }
}

/// `outboundAccountPosition` event: full balances after a change.
#[derive(Debug, Deserialize)]
pub struct AccountPositionMessage {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "B")]
    pub balances: Vec<StreamBalance>,
}

#[derive(Debug, Deserialize)]
pub struct StreamBalance {
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "f")]
    pub free: Decimal,
    #[serde(rename = "l")]
    pub locked: Decimal,
}

impl AccountPositionMessage {
    #[must_use]
    pub fn normalize(self) -> BalanceUpdate {
        BalanceUpdate {
            balances: self
                .balances
                .into_iter()
                .map(|b| AssetBalance {
                    asset: b.asset,
                    free: b.free,
                    locked: b.locked,
                })
                .collect(),
            timestamp: millis_to_utc(self.event_time),
        }
    }
}

/// Response to creating or refreshing a listen key.
#[derive(Debug, Deserialize)]
pub struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    pub listen_key: String,
}

/// `GET /api/v3/ticker/bookTicker` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookTickerResponse {
    pub symbol: String,
    pub bid_price: Decimal,
    pub ask_price: Decimal,
}

/// Order create/query response (shared shape, `fills` on creates only).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: u64,
    pub symbol: String,
    pub status: String,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub executed_qty: Decimal,
    /// Quote volume actually traded (Binance's historical spelling).
    #[serde(default, rename = "cummulativeQuoteQty")]
    pub cumulative_quote_qty: Decimal,
    #[serde(default)]
    pub update_time: Option<i64>,
}

impl OrderResponse {
    /// Average fill price when anything traded, else the limit price.
    #[must_use]
    pub fn effective_price(&self) -> Decimal {
        if self.executed_qty > Decimal::ZERO {
            self.cumulative_quote_qty / self.executed_qty
        } else {
            self.price
        }
    }

    pub fn last_fill_time(&self) -> Option<DateTime<Utc>> {
        self.update_time
            .filter(|_| self.executed_qty > Decimal::ZERO)
            .map(millis_to_utc)
    }
}

/// Error body returned by the spot API on non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub code: i64,
    pub msg: String,
}
