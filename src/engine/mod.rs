//! The deal lifecycle engine.
//!
//! One [`Engine`] owns the gateway and store seams plus the per-deal
//! lock registry. Its operations are split across the submodules:
//! placement (base order + ladder), ingestion (stream notifications),
//! reconciliation (pull-based repair), and lifecycle (completion and
//! auto-restart).

pub mod effects;
pub mod ingest;
pub mod lifecycle;
pub mod locks;
pub mod multiplexer;
pub mod placement;
pub mod reconcile;

use std::future::Future;
use std::time::Duration;

use crate::error::{GatewayError, Result};
use crate::port::{ExchangeGateway, Store};

pub use effects::{DryRunEffects, LiveEffects, ReconcileEffects};
pub use locks::DealLocks;
pub use multiplexer::ConnectionMultiplexer;
pub use placement::LadderPreview;
pub use reconcile::{ReconcileAction, ReconcileReport, ReconcileSituation};

/// Core engine over an exchange gateway and a store.
pub struct Engine<G, S> {
    gateway: G,
    store: S,
    locks: DealLocks,
    call_timeout: Duration,
}

impl<G: ExchangeGateway, S: Store> Engine<G, S> {
    pub fn new(gateway: G, store: S, call_timeout: Duration) -> Self {
        Self {
            gateway,
            store,
            locks: DealLocks::new(),
            call_timeout,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Bound a gateway call; expiry is a retryable [`GatewayError::Timeout`].
    pub(crate) async fn timed<T>(
        &self,
        fut: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                seconds: self.call_timeout.as_secs(),
            }
            .into()),
        }
    }

    pub(crate) fn locks(&self) -> &DealLocks {
        &self.locks
    }
}
