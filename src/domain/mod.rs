//! Exchange-agnostic domain logic: types and pure calculations.

mod bot;
mod deal;
mod ids;
mod order;

pub mod decimal;
pub mod error;
pub mod ladder;
pub mod position;

pub use bot::{Bot, BotStatus, NetworkMode, TradingPair};
pub use deal::{Deal, DealStatus};
pub use ids::{BotId, DealId, ExternalOrderId, OrderId};
pub use ladder::{build_ladder, take_profit_price, Ladder, OrderSpec, TimeInForce};
pub use order::{Order, OrderMethod, OrderSide, OrderStatus, OrderType};
pub use position::{recompute_position, PositionTotals};
