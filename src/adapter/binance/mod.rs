//! Binance exchange adapter: REST gateway and user-data-stream connector.

pub mod dto;
pub mod rest;
pub mod stream;

pub use rest::BinanceGateway;
pub use stream::{BinanceConnector, BinanceUserStream};
