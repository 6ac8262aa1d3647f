//! Bot configuration: one DCA strategy bound to a trading pair.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::ids::BotId;

/// Lifecycle status of a bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotStatus {
    Stopped,
    Running,
}

impl BotStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Running => "RUNNING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STOPPED" => Some(Self::Stopped),
            "RUNNING" => Some(Self::Running),
            _ => None,
        }
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which exchange environment a bot trades against.
///
/// Part of the connection key: bots on the same exchange but different
/// network modes never share a streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkMode {
    Live,
    Testnet,
}

impl NetworkMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "LIVE",
            Self::Testnet => "TESTNET",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LIVE" => Some(Self::Live),
            "TESTNET" => Some(Self::Testnet),
            _ => None,
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trading pair metadata needed by the ladder calculator and the
/// stranded-inventory warning text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingPair {
    /// Exchange symbol, e.g. `BTCUSDT`.
    pub symbol: String,
    /// Asset being accumulated, e.g. `BTC`.
    pub base_asset: String,
    /// Asset being spent, e.g. `USDT`.
    pub quote_asset: String,
    /// Minimum quantity step the exchange accepts for this pair.
    pub quantity_increment: Decimal,
}

/// A trading strategy configuration.
///
/// Immutable during an active deal except for `status`; the lifecycle
/// controller reads it when restarting a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: BotId,
    pub name: String,
    /// Exchange identifier, e.g. `binance`.
    pub exchange: String,
    pub network: NetworkMode,
    pub pair: TradingPair,
    /// Quote-denominated size of the initial market buy.
    pub base_order_size: Decimal,
    pub max_safety_orders: u32,
    /// First safety order's percentage distance below the entry price.
    pub price_deviation: Decimal,
    /// Quote-denominated size of the first safety order.
    pub safety_order_size: Decimal,
    /// Growth factor applied to the deviation step per safety order.
    pub safety_order_price_step: Decimal,
    /// Growth factor applied to the safety-order notional per level.
    pub safety_order_volume_step: Decimal,
    /// Profit target percentage for the take-profit order.
    pub take_profit: Decimal,
    pub status: BotStatus,
}

impl Bot {
    /// Validate the strategy numbers before any order math uses them.
    pub fn validate(&self) -> Result<(), DomainError> {
        fn positive(field: &'static str, value: Decimal) -> Result<(), DomainError> {
            if value <= Decimal::ZERO {
                return Err(DomainError::NonPositiveValue { field, value });
            }
            Ok(())
        }

        positive("base_order_size", self.base_order_size)?;
        positive("price_deviation", self.price_deviation)?;
        positive("safety_order_size", self.safety_order_size)?;
        positive("safety_order_price_step", self.safety_order_price_step)?;
        positive("safety_order_volume_step", self.safety_order_volume_step)?;
        positive("take_profit", self.take_profit)?;
        positive("quantity_increment", self.pair.quantity_increment)?;
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == BotStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bot() -> Bot {
        Bot {
            id: BotId::generate(),
            name: "btc-accumulator".into(),
            exchange: "binance".into(),
            network: NetworkMode::Testnet,
            pair: TradingPair {
                symbol: "BTCUSDT".into(),
                base_asset: "BTC".into(),
                quote_asset: "USDT".into(),
                quantity_increment: dec!(0.00001),
            },
            base_order_size: dec!(20),
            max_safety_orders: 3,
            price_deviation: dec!(1),
            safety_order_size: dec!(20),
            safety_order_price_step: dec!(1.07),
            safety_order_volume_step: dec!(1.5),
            take_profit: dec!(3),
            status: BotStatus::Stopped,
        }
    }

    #[test]
    fn valid_bot_passes() {
        assert!(bot().validate().is_ok());
    }

    #[test]
    fn zero_base_order_size_rejected() {
        let mut b = bot();
        b.base_order_size = Decimal::ZERO;
        let err = b.validate().unwrap_err();
        assert!(matches!(
            err,
            DomainError::NonPositiveValue {
                field: "base_order_size",
                ..
            }
        ));
    }

    #[test]
    fn status_roundtrips_through_strings() {
        assert_eq!(BotStatus::parse("RUNNING"), Some(BotStatus::Running));
        assert_eq!(BotStatus::parse(BotStatus::Stopped.as_str()), Some(BotStatus::Stopped));
        assert_eq!(BotStatus::parse("PAUSED"), None);
        assert_eq!(NetworkMode::parse("TESTNET"), Some(NetworkMode::Testnet));
        assert_eq!(NetworkMode::parse("staging"), None);
    }
}
