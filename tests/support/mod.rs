#![allow(dead_code)]

//! Shared fixtures for the integration suites: a migrated in-memory
//! store, an engine over the paper gateway, and event builders.

use std::sync::Arc;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;

use dcabot::adapter::sqlite::{create_pool, run_migrations, SqliteStore};
use dcabot::domain::Order;
use dcabot::engine::{Engine, LiveEffects};
use dcabot::port::{ExecutionKind, ExecutionReport, OrderSnapshot, SnapshotStatus, StreamEvent};
use dcabot::testkit::PaperGateway;

pub type TestEngine = Engine<Arc<PaperGateway>, Arc<SqliteStore>>;
pub type TestEffects = LiveEffects<Arc<PaperGateway>, Arc<SqliteStore>>;

pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Migrated store backed by a shared-cache in-memory database, so every
/// pooled connection sees the same tables.
pub fn memory_store(name: &str) -> Arc<SqliteStore> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let url = format!("file:dcabot-{name}-{nanos}?mode=memory&cache=shared");
    let pool = create_pool(&url).expect("create sqlite pool");
    run_migrations(&pool).expect("run migrations");
    Arc::new(SqliteStore::new(pool))
}

pub fn engine(gateway: Arc<PaperGateway>, store: Arc<SqliteStore>) -> TestEngine {
    Engine::new(gateway, store, CALL_TIMEOUT)
}

pub fn effects(gateway: Arc<PaperGateway>, store: Arc<SqliteStore>) -> TestEffects {
    LiveEffects::new(gateway, store, CALL_TIMEOUT)
}

/// A full-fill trade notification for `order`, as the stream adapter
/// would deliver it.
pub fn fill_event(order: &Order) -> StreamEvent {
    StreamEvent::Execution(ExecutionReport {
        external_order_id: order.external_id.to_string(),
        symbol: order.symbol.clone(),
        side: order.side,
        execution_kind: ExecutionKind::Trade,
        order_status: dcabot::domain::OrderStatus::Filled,
        filled_quantity: order.quantity,
        last_fill_price: order.price,
        quantity: order.quantity,
        timestamp: Utc::now(),
    })
}

/// The exchange-side view of `order` having fully filled.
pub fn filled_snapshot(order: &Order) -> OrderSnapshot {
    OrderSnapshot {
        external_id: order.external_id.clone(),
        status: SnapshotStatus::Filled,
        filled: order.quantity,
        price: order.price.expect("limit order price"),
        last_fill_time: Some(Utc::now()),
    }
}

/// The exchange-side view of `order` having been cancelled.
pub fn cancelled_snapshot(order: &Order) -> OrderSnapshot {
    OrderSnapshot {
        external_id: order.external_id.clone(),
        status: SnapshotStatus::Cancelled,
        filled: rust_decimal::Decimal::ZERO,
        price: order.price.expect("limit order price"),
        last_fill_time: None,
    }
}
