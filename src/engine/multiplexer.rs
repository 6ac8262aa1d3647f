//! Connection multiplexer.
//!
//! Owns one streaming connection per (exchange, network-mode) key,
//! reference-counted by the RUNNING bots that need it. The connection
//! table is a single owned map behind an async mutex; reference
//! counting is the only mutation exposed. Each connection runs in its
//! own task: events are pushed into the sink, the session token is
//! refreshed on an interval, and unexpected closes reconnect with
//! capped exponential backoff.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::{Bot, BotId};
use crate::error::Result;
use crate::port::{ConnectionKey, EventSink, EventStream, StreamConnector};

/// Timing knobs for connection maintenance.
#[derive(Debug, Clone, Copy)]
pub struct MultiplexerSettings {
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    pub session_refresh: Duration,
}

struct ConnectionEntry {
    bots: HashSet<BotId>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the live streaming connections.
pub struct ConnectionMultiplexer<C, E> {
    connector: Arc<C>,
    sink: Arc<E>,
    settings: MultiplexerSettings,
    connections: AsyncMutex<HashMap<ConnectionKey, ConnectionEntry>>,
}

impl<C, E> ConnectionMultiplexer<C, E>
where
    C: StreamConnector + 'static,
    E: EventSink + 'static,
{
    pub fn new(connector: Arc<C>, sink: Arc<E>, settings: MultiplexerSettings) -> Self {
        Self {
            connector,
            sink,
            settings,
            connections: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Register a bot against its connection, opening one if needed.
    pub async fn add_connection(&self, key: &ConnectionKey, bot_id: BotId) -> Result<()> {
        let mut connections = self.connections.lock().await;
        if let Some(entry) = connections.get_mut(key) {
            entry.bots.insert(bot_id);
            return Ok(());
        }

        info!(connection = %key, "Opening streaming connection");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_connection(
            Arc::clone(&self.connector),
            Arc::clone(&self.sink),
            key.clone(),
            self.settings,
            shutdown_rx,
        ));

        let mut bots = HashSet::new();
        bots.insert(bot_id);
        connections.insert(
            key.clone(),
            ConnectionEntry {
                bots,
                shutdown: shutdown_tx,
                task,
            },
        );
        Ok(())
    }

    /// Deregister a bot; tears the connection down when it was the last
    /// one. Returns whether a teardown happened.
    pub async fn remove_connection(&self, key: &ConnectionKey, bot_id: &BotId) -> bool {
        let mut connections = self.connections.lock().await;
        let Some(entry) = connections.get_mut(key) else {
            return false;
        };
        entry.bots.remove(bot_id);
        if !entry.bots.is_empty() {
            return false;
        }

        if let Some(entry) = connections.remove(key) {
            info!(connection = %key, "Last bot left, closing streaming connection");
            let _ = entry.shutdown.send(true);
            entry.task.abort();
        }
        true
    }

    /// Authoritative resync at process start: tear down everything and
    /// rebuild from the RUNNING bots.
    pub async fn initialize_connections(&self, running_bots: &[Bot]) -> Result<()> {
        self.shutdown_all().await;
        for bot in running_bots {
            let key = ConnectionKey::new(bot.exchange.clone(), bot.network);
            self.add_connection(&key, bot.id.clone()).await?;
        }
        Ok(())
    }

    /// Close every connection.
    pub async fn shutdown_all(&self) {
        let mut connections = self.connections.lock().await;
        for (key, entry) in connections.drain() {
            info!(connection = %key, "Closing streaming connection");
            let _ = entry.shutdown.send(true);
            entry.task.abort();
        }
    }

    /// Current (key, referencing-bot count) pairs.
    pub async fn active_connections(&self) -> Vec<(ConnectionKey, usize)> {
        self.connections
            .lock()
            .await
            .iter()
            .map(|(key, entry)| (key.clone(), entry.bots.len()))
            .collect()
    }
}

/// Exponential backoff doubling from `base`, capped at `cap`.
fn backoff_delay(settings: &MultiplexerSettings, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.min(16);
    settings
        .reconnect_base
        .saturating_mul(factor as u32)
        .min(settings.reconnect_cap)
}

async fn run_connection<C, E>(
    connector: Arc<C>,
    sink: Arc<E>,
    key: ConnectionKey,
    settings: MultiplexerSettings,
    mut shutdown: watch::Receiver<bool>,
) where
    C: StreamConnector,
    E: EventSink,
{
    let mut attempt = 0u32;
    loop {
        if *shutdown.borrow() {
            return;
        }

        match connector.open(&key).await {
            Ok(mut stream) => {
                attempt = 0;
                info!(connection = %key, "Streaming connection established");
                if drive_stream(&mut stream, &sink, &key, settings, &mut shutdown).await {
                    return;
                }
            }
            Err(e) => {
                warn!(connection = %key, error = %e, "Failed to open streaming connection");
            }
        }

        let delay = backoff_delay(&settings, attempt);
        attempt = attempt.saturating_add(1);
        warn!(connection = %key, delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
        tokio::select! {
            _ = shutdown.changed() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Pump one open stream until it closes. Returns `true` on shutdown.
async fn drive_stream<T, E>(
    stream: &mut T,
    sink: &Arc<E>,
    key: &ConnectionKey,
    settings: MultiplexerSettings,
    shutdown: &mut watch::Receiver<bool>,
) -> bool
where
    T: EventStream,
    E: EventSink,
{
    let mut refresh = tokio::time::interval_at(
        tokio::time::Instant::now() + settings.session_refresh,
        settings.session_refresh,
    );

    loop {
        tokio::select! {
            _ = shutdown.changed() => return true,
            _ = refresh.tick() => {
                if let Err(e) = stream.refresh_session().await {
                    warn!(connection = %key, error = %e, "Session refresh failed, reconnecting");
                    return false;
                }
            }
            event = stream.next_event() => match event {
                Ok(Some(event)) => sink.deliver(key, event).await,
                Ok(None) => {
                    warn!(connection = %key, "Streaming connection closed");
                    return false;
                }
                Err(e) => {
                    warn!(connection = %key, error = %e, "Streaming connection error");
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NetworkMode, OrderSide, OrderStatus};
    use crate::port::{ExecutionKind, ExecutionReport, StreamEvent};
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn report(id: &str) -> ExecutionReport {
        ExecutionReport {
            external_order_id: id.into(),
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            execution_kind: ExecutionKind::Trade,
            order_status: OrderStatus::Filled,
            filled_quantity: dec!(1),
            last_fill_price: Some(dec!(10)),
            quantity: dec!(1),
            timestamp: Utc::now(),
        }
    }

    struct ScriptedStream {
        events: Vec<StreamEvent>,
        refreshes: Arc<AtomicU32>,
    }

    #[async_trait]
    impl EventStream for ScriptedStream {
        async fn next_event(&mut self) -> crate::error::Result<Option<StreamEvent>> {
            match self.events.pop() {
                Some(event) => Ok(Some(event)),
                // Keep the connection open with no further traffic.
                None => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn refresh_session(&mut self) -> crate::error::Result<()> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ScriptedConnector {
        opens: AtomicU32,
        refreshes: Arc<AtomicU32>,
    }

    #[async_trait]
    impl StreamConnector for ScriptedConnector {
        type Stream = ScriptedStream;

        async fn open(&self, _key: &ConnectionKey) -> crate::error::Result<Self::Stream> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedStream {
                events: vec![StreamEvent::Execution(report("ext-1"))],
                refreshes: Arc::clone(&self.refreshes),
            })
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventSink for CollectingSink {
        async fn deliver(&self, _key: &ConnectionKey, event: StreamEvent) {
            if let StreamEvent::Execution(report) = event {
                self.delivered.lock().push(report.external_order_id);
            }
        }
    }

    fn settings() -> MultiplexerSettings {
        MultiplexerSettings {
            reconnect_base: Duration::from_millis(1),
            reconnect_cap: Duration::from_millis(8),
            session_refresh: Duration::from_secs(3600),
        }
    }

    fn multiplexer() -> (
        ConnectionMultiplexer<ScriptedConnector, CollectingSink>,
        Arc<ScriptedConnector>,
        Arc<CollectingSink>,
    ) {
        let connector = Arc::new(ScriptedConnector {
            opens: AtomicU32::new(0),
            refreshes: Arc::new(AtomicU32::new(0)),
        });
        let sink = Arc::new(CollectingSink::default());
        let mux = ConnectionMultiplexer::new(Arc::clone(&connector), Arc::clone(&sink), settings());
        (mux, connector, sink)
    }

    fn bot(name: &str, network: NetworkMode) -> Bot {
        use crate::domain::{BotStatus, TradingPair};
        Bot {
            id: BotId::generate(),
            name: name.into(),
            exchange: "binance".into(),
            network,
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
            status: BotStatus::Running,
        }
    }

    #[tokio::test]
    async fn shared_key_opens_one_connection() {
        let (mux, connector, sink) = multiplexer();
        let key = ConnectionKey::new("binance", NetworkMode::Testnet);

        mux.add_connection(&key, BotId::generate()).await.unwrap();
        mux.add_connection(&key, BotId::generate()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
        assert_eq!(sink.delivered.lock().len(), 1);

        let active = mux.active_connections().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].1, 2);

        mux.shutdown_all().await;
    }

    #[tokio::test]
    async fn last_bot_out_tears_down() {
        let (mux, _connector, _sink) = multiplexer();
        let key = ConnectionKey::new("binance", NetworkMode::Live);
        let first = BotId::generate();
        let second = BotId::generate();

        mux.add_connection(&key, first.clone()).await.unwrap();
        mux.add_connection(&key, second.clone()).await.unwrap();

        assert!(!mux.remove_connection(&key, &first).await);
        assert!(mux.remove_connection(&key, &second).await);
        assert!(mux.active_connections().await.is_empty());
    }

    #[tokio::test]
    async fn initialize_rebuilds_from_running_bots() {
        let (mux, connector, _sink) = multiplexer();

        let bots = vec![
            bot("a", NetworkMode::Live),
            bot("b", NetworkMode::Live),
            bot("c", NetworkMode::Testnet),
        ];
        mux.initialize_connections(&bots).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut active = mux.active_connections().await;
        active.sort_by_key(|(key, _)| key.to_string());
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].1, 2); // binance-live: two bots
        assert_eq!(active[1].1, 1); // binance-testnet: one bot
        assert_eq!(connector.opens.load(Ordering::SeqCst), 2);

        // Re-initialize with a subset tears down and rebuilds.
        mux.initialize_connections(&bots[2..]).await.unwrap();
        assert_eq!(mux.active_connections().await.len(), 1);

        mux.shutdown_all().await;
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let settings = MultiplexerSettings {
            reconnect_base: Duration::from_millis(500),
            reconnect_cap: Duration::from_secs(30),
            session_refresh: Duration::from_secs(1800),
        };
        assert_eq!(backoff_delay(&settings, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(&settings, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(&settings, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(&settings, 10), Duration::from_secs(30));
        assert_eq!(backoff_delay(&settings, 63), Duration::from_secs(30));
    }
}
