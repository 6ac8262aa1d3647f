//! Infrastructure adapters behind the port traits.

pub mod binance;
pub mod sqlite;
