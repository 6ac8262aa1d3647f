//! Row types and conversions between SQLite rows and domain types.
//!
//! Decimals are stored as text to keep them exact; timestamps are
//! RFC3339 text.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;

use super::schema::{bots, deals, orders};
use crate::domain::{
    Bot, BotId, BotStatus, Deal, DealId, DealStatus, ExternalOrderId, NetworkMode, Order,
    OrderId, OrderMethod, OrderSide, OrderStatus, OrderType, TradingPair,
};
use crate::error::{Error, Result};

fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value).map_err(|e| Error::Parse(format!("{field}: {e}")))
}

fn parse_datetime(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Parse(format!("{field}: {e}")))
}

fn parse_enum<T>(field: &str, value: &str, parse: impl FnOnce(&str) -> Option<T>) -> Result<T> {
    parse(value).ok_or_else(|| Error::Parse(format!("{field}: unknown value '{value}'")))
}

#[derive(Debug, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = bots)]
pub struct BotRow {
    pub id: String,
    pub name: String,
    pub exchange: String,
    pub network: String,
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub quantity_increment: String,
    pub base_order_size: String,
    pub max_safety_orders: i32,
    pub price_deviation: String,
    pub safety_order_size: String,
    pub safety_order_price_step: String,
    pub safety_order_volume_step: String,
    pub take_profit: String,
    pub status: String,
    pub created_at: String,
}

impl BotRow {
    pub fn from_domain(bot: &Bot) -> Self {
        Self {
            id: bot.id.to_string(),
            name: bot.name.clone(),
            exchange: bot.exchange.clone(),
            network: bot.network.as_str().to_string(),
            symbol: bot.pair.symbol.clone(),
            base_asset: bot.pair.base_asset.clone(),
            quote_asset: bot.pair.quote_asset.clone(),
            quantity_increment: bot.pair.quantity_increment.to_string(),
            base_order_size: bot.base_order_size.to_string(),
            max_safety_orders: bot.max_safety_orders as i32,
            price_deviation: bot.price_deviation.to_string(),
            safety_order_size: bot.safety_order_size.to_string(),
            safety_order_price_step: bot.safety_order_price_step.to_string(),
            safety_order_volume_step: bot.safety_order_volume_step.to_string(),
            take_profit: bot.take_profit.to_string(),
            status: bot.status.as_str().to_string(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn into_domain(self) -> Result<Bot> {
        Ok(Bot {
            id: BotId::new(self.id),
            name: self.name,
            exchange: self.exchange,
            network: parse_enum("bots.network", &self.network, NetworkMode::parse)?,
            pair: TradingPair {
                symbol: self.symbol,
                base_asset: self.base_asset,
                quote_asset: self.quote_asset,
                quantity_increment: parse_decimal(
                    "bots.quantity_increment",
                    &self.quantity_increment,
                )?,
            },
            base_order_size: parse_decimal("bots.base_order_size", &self.base_order_size)?,
            max_safety_orders: self.max_safety_orders as u32,
            price_deviation: parse_decimal("bots.price_deviation", &self.price_deviation)?,
            safety_order_size: parse_decimal("bots.safety_order_size", &self.safety_order_size)?,
            safety_order_price_step: parse_decimal(
                "bots.safety_order_price_step",
                &self.safety_order_price_step,
            )?,
            safety_order_volume_step: parse_decimal(
                "bots.safety_order_volume_step",
                &self.safety_order_volume_step,
            )?,
            take_profit: parse_decimal("bots.take_profit", &self.take_profit)?,
            status: parse_enum("bots.status", &self.status, BotStatus::parse)?,
        })
    }
}

#[derive(Debug, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = deals)]
pub struct DealRow {
    pub id: String,
    pub bot_id: String,
    pub status: String,
    pub current_quantity: String,
    pub average_price: String,
    pub total_cost: String,
    pub current_profit: String,
    pub profit_percent: Option<String>,
    pub actual_safety_orders: i32,
    pub warning_message: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

impl DealRow {
    pub fn from_domain(deal: &Deal) -> Self {
        Self {
            id: deal.id.to_string(),
            bot_id: deal.bot_id.to_string(),
            status: deal.status.as_str().to_string(),
            current_quantity: deal.current_quantity.to_string(),
            average_price: deal.average_price.to_string(),
            total_cost: deal.total_cost.to_string(),
            current_profit: deal.current_profit.to_string(),
            profit_percent: deal.profit_percent.map(|p| p.to_string()),
            actual_safety_orders: deal.actual_safety_orders as i32,
            warning_message: deal.warning_message.clone(),
            started_at: deal.started_at.to_rfc3339(),
            completed_at: deal.completed_at.map(|t| t.to_rfc3339()),
        }
    }

    pub fn into_domain(self) -> Result<Deal> {
        Ok(Deal {
            id: DealId::new(self.id),
            bot_id: BotId::new(self.bot_id),
            status: parse_enum("deals.status", &self.status, DealStatus::parse)?,
            current_quantity: parse_decimal("deals.current_quantity", &self.current_quantity)?,
            average_price: parse_decimal("deals.average_price", &self.average_price)?,
            total_cost: parse_decimal("deals.total_cost", &self.total_cost)?,
            current_profit: parse_decimal("deals.current_profit", &self.current_profit)?,
            profit_percent: self
                .profit_percent
                .as_deref()
                .map(|p| parse_decimal("deals.profit_percent", p))
                .transpose()?,
            actual_safety_orders: self.actual_safety_orders as u32,
            warning_message: self.warning_message,
            started_at: parse_datetime("deals.started_at", &self.started_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(|t| parse_datetime("deals.completed_at", t))
                .transpose()?,
        })
    }
}

#[derive(Debug, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = orders)]
pub struct OrderRow {
    pub id: String,
    pub deal_id: String,
    pub order_type: String,
    pub side: String,
    pub method: String,
    pub status: String,
    pub symbol: String,
    pub quantity: String,
    pub price: Option<String>,
    pub filled: String,
    pub remaining: String,
    pub cost: String,
    pub external_id: String,
    pub status_reason: Option<String>,
    pub filled_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl OrderRow {
    pub fn from_domain(order: &Order) -> Self {
        Self {
            id: order.id.to_string(),
            deal_id: order.deal_id.to_string(),
            order_type: order.order_type.as_str().to_string(),
            side: order.side.as_str().to_string(),
            method: order.method.as_str().to_string(),
            status: order.status.as_str().to_string(),
            symbol: order.symbol.clone(),
            quantity: order.quantity.to_string(),
            price: order.price.map(|p| p.to_string()),
            filled: order.filled.to_string(),
            remaining: order.remaining.to_string(),
            cost: order.cost.to_string(),
            external_id: order.external_id.to_string(),
            status_reason: order.status_reason.clone(),
            filled_at: order.filled_at.map(|t| t.to_rfc3339()),
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }

    pub fn into_domain(self) -> Result<Order> {
        Ok(Order {
            id: OrderId::new(self.id),
            deal_id: DealId::new(self.deal_id),
            order_type: parse_enum("orders.order_type", &self.order_type, OrderType::parse)?,
            side: parse_enum("orders.side", &self.side, OrderSide::parse)?,
            method: parse_enum("orders.method", &self.method, OrderMethod::parse)?,
            status: parse_enum("orders.status", &self.status, OrderStatus::parse)?,
            symbol: self.symbol,
            quantity: parse_decimal("orders.quantity", &self.quantity)?,
            price: self
                .price
                .as_deref()
                .map(|p| parse_decimal("orders.price", p))
                .transpose()?,
            filled: parse_decimal("orders.filled", &self.filled)?,
            remaining: parse_decimal("orders.remaining", &self.remaining)?,
            cost: parse_decimal("orders.cost", &self.cost)?,
            external_id: ExternalOrderId::new(self.external_id),
            status_reason: self.status_reason,
            filled_at: self
                .filled_at
                .as_deref()
                .map(|t| parse_datetime("orders.filled_at", t))
                .transpose()?,
            created_at: parse_datetime("orders.created_at", &self.created_at)?,
            updated_at: parse_datetime("orders.updated_at", &self.updated_at)?,
        })
    }
}
