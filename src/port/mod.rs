//! Ports: trait seams between the engine and its collaborators.

pub mod gateway;
pub mod store;
pub mod stream;

pub use gateway::{ExchangeGateway, OrderSnapshot, PlacedOrder, SnapshotStatus, Ticker};
pub use store::Store;
pub use stream::{
    AssetBalance, BalanceUpdate, ConnectionKey, EventSink, EventStream, ExecutionKind,
    ExecutionReport, StreamConnector, StreamEvent,
};
