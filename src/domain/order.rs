//! Orders belonging to a deal, and their status machine.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{DealId, ExternalOrderId, OrderId};

/// Role an order plays within a deal.
///
/// A deal has exactly one `Base` order, up to `max_safety_orders`
/// `Safety` orders, and at most one currently live `TakeProfit` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Base,
    Safety,
    TakeProfit,
}

impl OrderType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "BASE",
            Self::Safety => "SAFETY",
            Self::TakeProfit => "TAKE_PROFIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BASE" => Some(Self::Base),
            "SAFETY" => Some(Self::Safety),
            "TAKE_PROFIT" => Some(Self::TakeProfit),
            _ => None,
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderMethod {
    Market,
    Limit,
}

impl OrderMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MARKET" => Some(Self::Market),
            "LIMIT" => Some(Self::Limit),
            _ => None,
        }
    }
}

/// Order status as tracked locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Placed,
    PartiallyFilled,
    Filled,
    Cancelled,
    Failed,
}

impl OrderStatus {
    /// Terminal statuses never change again; re-applying one is a no-op.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Failed)
    }

    /// Live on the exchange book (cancellable, can still fill).
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Placed | Self::PartiallyFilled)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Placed => "PLACED",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PLACED" => Some(Self::Placed),
            "PARTIALLY_FILLED" => Some(Self::PartiallyFilled),
            "FILLED" => Some(Self::Filled),
            "CANCELLED" => Some(Self::Cancelled),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One exchange order belonging to a deal.
///
/// Invariants once terminal: `filled + remaining == quantity` and
/// `cost == filled * fill price`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub deal_id: DealId,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub method: OrderMethod,
    pub status: OrderStatus,
    pub symbol: String,
    pub quantity: Decimal,
    /// Limit price, or fill price once known for market orders.
    pub price: Option<Decimal>,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub cost: Decimal,
    pub external_id: ExternalOrderId,
    pub status_reason: Option<String>,
    pub filled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Record a limit order that is resting on the exchange book.
    #[must_use]
    pub fn placed(
        deal_id: DealId,
        order_type: OrderType,
        side: OrderSide,
        symbol: impl Into<String>,
        quantity: Decimal,
        price: Decimal,
        external_id: ExternalOrderId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: OrderId::generate(),
            deal_id,
            order_type,
            side,
            method: OrderMethod::Limit,
            status: OrderStatus::Placed,
            symbol: symbol.into(),
            quantity,
            price: Some(price),
            filled: Decimal::ZERO,
            remaining: quantity,
            cost: Decimal::ZERO,
            external_id,
            status_reason: None,
            filled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a market order that filled synchronously at placement.
    #[must_use]
    pub fn market_filled(
        deal_id: DealId,
        order_type: OrderType,
        side: OrderSide,
        symbol: impl Into<String>,
        quantity: Decimal,
        fill_price: Decimal,
        cost: Decimal,
        external_id: ExternalOrderId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: OrderId::generate(),
            deal_id,
            order_type,
            side,
            method: OrderMethod::Market,
            status: OrderStatus::Filled,
            symbol: symbol.into(),
            quantity,
            price: Some(fill_price),
            filled: quantity,
            remaining: Decimal::ZERO,
            cost,
            external_id,
            status_reason: None,
            filled_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a fill/status update.
    ///
    /// Returns `false` (and leaves the order untouched) when the order is
    /// already terminal, which makes duplicate notifications no-ops.
    pub fn apply_update(
        &mut self,
        status: OrderStatus,
        filled: Decimal,
        fill_price: Option<Decimal>,
        at: DateTime<Utc>,
    ) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.filled = filled;
        self.remaining = self.quantity - filled;
        if let Some(price) = fill_price {
            self.price = Some(price);
            self.cost = filled * price;
        }
        if status == OrderStatus::Filled {
            self.filled_at = Some(at);
        }
        self.updated_at = at;
        true
    }

    /// Mark the order cancelled locally (mirror of an exchange cancel).
    pub fn mark_cancelled(&mut self, reason: Option<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = OrderStatus::Cancelled;
        self.remaining = Decimal::ZERO;
        self.status_reason = reason;
        self.updated_at = Utc::now();
        true
    }

    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    /// Whether this order contributes to the deal's position: a filled
    /// buy leg (base or safety).
    #[must_use]
    pub fn is_filled_entry(&self) -> bool {
        self.is_filled() && matches!(self.order_type, OrderType::Base | OrderType::Safety)
    }
}
