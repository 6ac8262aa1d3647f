//! Application wiring: the operations exposed to the CLI and the run
//! loop that ties the engines, the multiplexer, and the store together.
//!
//! Live and testnet bots get separate engines over separate gateways;
//! the event sink routes each multiplexed event to the engine for its
//! connection's network mode.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::adapter::binance::{BinanceConnector, BinanceGateway};
use crate::adapter::sqlite::{create_pool, run_migrations, SqliteStore};
use crate::config::Config;
use crate::domain::{Bot, BotId, BotStatus, DealId, NetworkMode, TradingPair};
use crate::engine::{
    ConnectionMultiplexer, DryRunEffects, Engine, LadderPreview, LiveEffects, ReconcileReport,
};
use crate::engine::multiplexer::MultiplexerSettings;
use crate::error::{ConfigError, Error, Result};
use crate::port::{ConnectionKey, EventSink, Store, StreamEvent};

type AppEngine = Engine<Arc<BinanceGateway>, Arc<SqliteStore>>;
type AppEffects = LiveEffects<Arc<BinanceGateway>, Arc<SqliteStore>>;

/// One engine per network mode; deals route by their bot's network.
struct NetworkRouter {
    live: Arc<AppEngine>,
    testnet: Arc<AppEngine>,
}

impl NetworkRouter {
    fn engine_for(&self, network: NetworkMode) -> &Arc<AppEngine> {
        match network {
            NetworkMode::Live => &self.live,
            NetworkMode::Testnet => &self.testnet,
        }
    }
}

#[async_trait]
impl EventSink for NetworkRouter {
    async fn deliver(&self, key: &ConnectionKey, event: StreamEvent) {
        let engine = self.engine_for(key.network);
        if let Err(e) = engine.ingest_event(event).await {
            error!(connection = %key, error = %e, "Event ingestion failed");
        }
    }
}

/// The wired application.
pub struct App {
    config: Config,
    store: Arc<SqliteStore>,
    router: Arc<NetworkRouter>,
    gateways: GatewayPair,
    multiplexer: Arc<ConnectionMultiplexer<BinanceConnector, NetworkRouter>>,
}

struct GatewayPair {
    live: Arc<BinanceGateway>,
    testnet: Arc<BinanceGateway>,
}

impl App {
    /// Build the full object graph: pool, migrations, gateways, engines,
    /// multiplexer. `api_key` comes from the environment, never config.
    pub fn new(config: Config, api_key: Option<String>) -> Result<Self> {
        let pool = create_pool(&config.database.url)?;
        run_migrations(&pool)?;
        let store = Arc::new(SqliteStore::new(pool));

        let call_timeout = Duration::from_secs(config.exchange.call_timeout_secs);
        let live_gateway = Arc::new(BinanceGateway::new(
            config.exchange.rest_url.clone(),
            api_key.clone(),
        ));
        let testnet_gateway = Arc::new(BinanceGateway::new(
            config.exchange.testnet_rest_url.clone(),
            api_key.clone(),
        ));

        let router = Arc::new(NetworkRouter {
            live: Arc::new(Engine::new(
                Arc::clone(&live_gateway),
                Arc::clone(&store),
                call_timeout,
            )),
            testnet: Arc::new(Engine::new(
                Arc::clone(&testnet_gateway),
                Arc::clone(&store),
                call_timeout,
            )),
        });

        let connector = Arc::new(BinanceConnector::new(config.exchange.clone(), api_key));
        let settings = MultiplexerSettings {
            reconnect_base: Duration::from_millis(config.stream.reconnect_base_ms),
            reconnect_cap: Duration::from_millis(config.stream.reconnect_cap_ms),
            session_refresh: Duration::from_secs(config.exchange.session_refresh_secs),
        };
        let multiplexer = Arc::new(ConnectionMultiplexer::new(
            connector,
            Arc::clone(&router),
            settings,
        ));

        Ok(Self {
            config,
            store,
            router,
            gateways: GatewayPair {
                live: live_gateway,
                testnet: testnet_gateway,
            },
            multiplexer,
        })
    }

    fn engine_for(&self, network: NetworkMode) -> &Arc<AppEngine> {
        self.router.engine_for(network)
    }

    fn live_effects(&self, network: NetworkMode) -> AppEffects {
        let gateway = match network {
            NetworkMode::Live => Arc::clone(&self.gateways.live),
            NetworkMode::Testnet => Arc::clone(&self.gateways.testnet),
        };
        LiveEffects::new(
            gateway,
            Arc::clone(&self.store),
            Duration::from_secs(self.config.exchange.call_timeout_secs),
        )
    }

    async fn bot(&self, bot_id: &BotId) -> Result<Bot> {
        self.store.bot(bot_id).await?.ok_or_else(|| Error::NotFound {
            kind: "bot",
            id: bot_id.to_string(),
        })
    }

    /// Register a new bot (STOPPED until started).
    pub async fn create_bot(&self, definition: BotDefinition) -> Result<Bot> {
        let bot = definition.into_bot()?;
        bot.validate()?;
        self.store.insert_bot(&bot).await?;
        info!(bot = %bot.name, bot_id = %bot.id, "Bot created");
        Ok(bot)
    }

    /// Flip the bot RUNNING, register its connection reference, and open
    /// the first cycle (unless a deal is already open).
    pub async fn start_bot(&self, bot_id: &BotId) -> Result<()> {
        let mut bot = self.bot(bot_id).await?;
        self.store.set_bot_status(bot_id, BotStatus::Running).await?;
        bot.status = BotStatus::Running;

        let key = ConnectionKey::new(bot.exchange.clone(), bot.network);
        self.multiplexer.add_connection(&key, bot.id.clone()).await?;

        match self.engine_for(bot.network).place_base_order(&bot).await {
            Ok(deal) => {
                info!(bot = %bot.name, deal_id = %deal.id, "Bot started");
                Ok(())
            }
            Err(Error::OpenDeal { deal_id, .. }) => {
                info!(bot = %bot.name, deal_id, "Bot started against its existing deal");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Flip the bot STOPPED and release its connection reference. The
    /// open deal, if any, is left alone for reconciliation or the
    /// operator to resolve.
    pub async fn stop_bot(&self, bot_id: &BotId) -> Result<()> {
        let bot = self.bot(bot_id).await?;
        self.store.set_bot_status(bot_id, BotStatus::Stopped).await?;

        let key = ConnectionKey::new(bot.exchange.clone(), bot.network);
        let torn_down = self.multiplexer.remove_connection(&key, &bot.id).await;
        info!(bot = %bot.name, torn_down, "Bot stopped");
        Ok(())
    }

    /// Run one reconciliation pass for a deal.
    pub async fn check_deal(&self, deal_id: &DealId, dry_run: bool) -> Result<ReconcileReport> {
        let deal = self
            .store
            .deal(deal_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: "deal",
                id: deal_id.to_string(),
            })?;
        let bot = self.bot(&deal.bot_id).await?;
        let engine = self.engine_for(bot.network);

        if dry_run {
            engine.check_deal(deal_id, &DryRunEffects::new()).await
        } else {
            engine.check_deal(deal_id, &self.live_effects(bot.network)).await
        }
    }

    /// Compute the order ladder against the live ticker without placing
    /// anything.
    pub async fn preview_orders(&self, bot_id: &BotId) -> Result<LadderPreview> {
        let bot = self.bot(bot_id).await?;
        self.engine_for(bot.network).preview_orders(&bot).await
    }

    /// Run loop: rebuild connections from RUNNING bots, then sweep open
    /// deals on the reconcile interval until ctrl-c.
    pub async fn run(&self) -> Result<()> {
        let running = self.store.running_bots().await?;
        info!(bots = running.len(), "Rebuilding streaming connections");
        self.multiplexer.initialize_connections(&running).await?;

        let mut reconcile_tick = tokio::time::interval(Duration::from_secs(
            self.config.reconcile.interval_secs,
        ));
        reconcile_tick.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = reconcile_tick.tick() => {
                    if let Err(e) = self.reconcile_sweep().await {
                        warn!(error = %e, "Reconciliation sweep failed");
                    }
                }
            }
        }

        self.multiplexer.shutdown_all().await;
        Ok(())
    }

    /// One pass over every open deal, routed to its network's engine.
    async fn reconcile_sweep(&self) -> Result<()> {
        let deals = self.store.open_deals().await?;
        for deal in deals {
            let Some(bot) = self.store.bot(&deal.bot_id).await? else {
                warn!(deal_id = %deal.id, "Open deal without a bot, skipping");
                continue;
            };
            let engine = self.engine_for(bot.network);
            match engine.check_deal(&deal.id, &self.live_effects(bot.network)).await {
                Ok(report) if report.changed => {
                    info!(
                        deal_id = %deal.id,
                        situation = ?report.situation,
                        actions = report.actions.len(),
                        "Deal repaired"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(deal_id = %deal.id, error = %e, "Deal check failed"),
            }
        }
        Ok(())
    }
}

/// Operator-supplied bot definition (TOML), turned into a [`Bot`].
#[derive(Debug, Deserialize)]
pub struct BotDefinition {
    pub name: String,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    pub network: String,
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub quantity_increment: rust_decimal::Decimal,
    pub base_order_size: rust_decimal::Decimal,
    pub max_safety_orders: u32,
    pub price_deviation: rust_decimal::Decimal,
    pub safety_order_size: rust_decimal::Decimal,
    pub safety_order_price_step: rust_decimal::Decimal,
    pub safety_order_volume_step: rust_decimal::Decimal,
    pub take_profit: rust_decimal::Decimal,
}

fn default_exchange() -> String {
    "binance".into()
}

impl BotDefinition {
    fn into_bot(self) -> Result<Bot> {
        let network = NetworkMode::parse(&self.network).ok_or(ConfigError::InvalidValue {
            field: "network",
            reason: format!("expected LIVE or TESTNET, got '{}'", self.network),
        })?;
        Ok(Bot {
            id: crate::domain::BotId::generate(),
            name: self.name,
            exchange: self.exchange,
            network,
            pair: TradingPair {
                symbol: self.symbol.to_uppercase(),
                base_asset: self.base_asset,
                quote_asset: self.quote_asset,
                quantity_increment: self.quantity_increment,
            },
            base_order_size: self.base_order_size,
            max_safety_orders: self.max_safety_orders,
            price_deviation: self.price_deviation,
            safety_order_size: self.safety_order_size,
            safety_order_price_step: self.safety_order_price_step,
            safety_order_volume_step: self.safety_order_volume_step,
            take_profit: self.take_profit,
            status: BotStatus::Stopped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_definition_parses_from_toml() {
        let definition: BotDefinition = toml::from_str(
            r#"
            name = "btc-dca"
            network = "TESTNET"
            symbol = "btcusdt"
            base_asset = "BTC"
            quote_asset = "USDT"
            quantity_increment = "0.00001"
            base_order_size = "20"
            max_safety_orders = 3
            price_deviation = "1"
            safety_order_size = "20"
            safety_order_price_step = "1.07"
            safety_order_volume_step = "1.5"
            take_profit = "3"
            "#,
        )
        .unwrap();

        let bot = definition.into_bot().unwrap();
        assert_eq!(bot.exchange, "binance");
        assert_eq!(bot.network, NetworkMode::Testnet);
        assert_eq!(bot.pair.symbol, "BTCUSDT");
        assert_eq!(bot.status, BotStatus::Stopped);
        assert!(bot.validate().is_ok());
    }

    #[test]
    fn bot_definition_rejects_unknown_network() {
        let definition = BotDefinition {
            name: "x".into(),
            exchange: "binance".into(),
            network: "staging".into(),
            symbol: "BTCUSDT".into(),
            base_asset: "BTC".into(),
            quote_asset: "USDT".into(),
            quantity_increment: rust_decimal_macros::dec!(0.00001),
            base_order_size: rust_decimal_macros::dec!(20),
            max_safety_orders: 3,
            price_deviation: rust_decimal_macros::dec!(1),
            safety_order_size: rust_decimal_macros::dec!(20),
            safety_order_price_step: rust_decimal_macros::dec!(1.07),
            safety_order_volume_step: rust_decimal_macros::dec!(1.5),
            take_profit: rust_decimal_macros::dec!(3),
        };
        assert!(definition.into_bot().is_err());
    }
}
