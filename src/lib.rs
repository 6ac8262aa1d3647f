//! dcabot - Dollar-cost-averaging trading engine with exchange-state
//! reconciliation.
//!
//! A bot repeatedly runs deals: a market base order, a ladder of
//! post-only safety orders at widening deviations below the entry, and
//! a take-profit limit sell that is re-placed at the new break-even
//! whenever a safety order fills. A reconciliation engine compares the
//! local order book against exchange snapshots and repairs the four
//! discrepancy states that missed stream events can leave behind.
//!
//! # Modules
//!
//! - [`domain`] - Exchange-agnostic types: bots, deals, orders, the
//!   ladder calculator, and position aggregation
//! - [`port`] - Traits at the seams: [`port::ExchangeGateway`],
//!   [`port::Store`], [`port::StreamConnector`]
//! - [`adapter`] - Binance REST/WebSocket and SQLite implementations
//! - [`engine`] - Deal lifecycle: placement, event ingestion,
//!   reconciliation, and the connection multiplexer
//! - [`app`] - Application wiring and the operations behind the CLI
//! - [`config`] - TOML configuration and logging setup
//! - [`testkit`] - In-memory gateway and fixtures for tests

pub mod adapter;
pub mod app;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod port;
pub mod testkit;
