//! Test doubles: a scriptable in-memory exchange gateway and fixture
//! builders shared by unit and integration tests.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::{Bot, BotId, BotStatus, ExternalOrderId, NetworkMode, OrderSide, TimeInForce, TradingPair};
use crate::error::{Error, GatewayError, Result};
use crate::port::{ExchangeGateway, OrderSnapshot, PlacedOrder, SnapshotStatus, Ticker};

/// A record of one order submitted to the paper gateway.
#[derive(Debug, Clone)]
pub struct SubmittedOrder {
    pub external_id: ExternalOrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub is_market: bool,
}

#[derive(Default)]
struct PaperState {
    bid: Option<Decimal>,
    ask: Option<Decimal>,
    next_id: u64,
    submitted: Vec<SubmittedOrder>,
    cancelled: Vec<ExternalOrderId>,
    snapshots: HashMap<String, OrderSnapshot>,
    fail_next_limit: Option<GatewayError>,
    fail_next_market: Option<GatewayError>,
}

/// In-memory exchange: fills market orders at the current bid, rests
/// limit orders, and lets tests script order snapshots and failures.
pub struct PaperGateway {
    state: Mutex<PaperState>,
}

impl PaperGateway {
    #[must_use]
    pub fn new(bid: Decimal) -> Self {
        Self {
            state: Mutex::new(PaperState {
                bid: Some(bid),
                ask: Some(bid),
                next_id: 1000,
                ..PaperState::default()
            }),
        }
    }

    pub fn set_bid(&self, bid: Option<Decimal>) {
        let mut state = self.state.lock();
        state.bid = bid;
        state.ask = bid;
    }

    /// Script what `fetch_order` returns for one external id.
    pub fn script_snapshot(&self, external_id: &ExternalOrderId, snapshot: OrderSnapshot) {
        self.state
            .lock()
            .snapshots
            .insert(external_id.to_string(), snapshot);
    }

    pub fn fail_next_limit_order(&self, error: GatewayError) {
        self.state.lock().fail_next_limit = Some(error);
    }

    pub fn fail_next_market_order(&self, error: GatewayError) {
        self.state.lock().fail_next_market = Some(error);
    }

    pub fn submitted_orders(&self) -> Vec<SubmittedOrder> {
        self.state.lock().submitted.clone()
    }

    pub fn cancelled_orders(&self) -> Vec<ExternalOrderId> {
        self.state.lock().cancelled.clone()
    }

    /// External id of the most recently submitted order.
    pub fn last_external_id(&self) -> Option<ExternalOrderId> {
        self.state
            .lock()
            .submitted
            .last()
            .map(|o| o.external_id.clone())
    }

    fn next_external_id(state: &mut PaperState) -> ExternalOrderId {
        state.next_id += 1;
        ExternalOrderId::new(state.next_id.to_string())
    }
}

#[async_trait::async_trait]
impl ExchangeGateway for PaperGateway {
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let state = self.state.lock();
        Ok(Ticker {
            symbol: symbol.to_string(),
            bid: state.bid,
            ask: state.ask,
        })
    }

    async fn create_market_buy_order(
        &self,
        symbol: &str,
        quantity: Decimal,
    ) -> Result<PlacedOrder> {
        self.create_market_order(symbol, OrderSide::Buy, quantity)
    }

    async fn create_market_sell_order(
        &self,
        symbol: &str,
        quantity: Decimal,
    ) -> Result<PlacedOrder> {
        self.create_market_order(symbol, OrderSide::Sell, quantity)
    }

    async fn create_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        time_in_force: TimeInForce,
    ) -> Result<PlacedOrder> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_next_limit.take() {
            return Err(error.into());
        }

        let external_id = Self::next_external_id(&mut state);
        state.submitted.push(SubmittedOrder {
            external_id: external_id.clone(),
            symbol: symbol.to_string(),
            side,
            quantity,
            price: Some(price),
            time_in_force: Some(time_in_force),
            is_market: false,
        });
        state.snapshots.insert(
            external_id.to_string(),
            OrderSnapshot {
                external_id: external_id.clone(),
                status: SnapshotStatus::Open,
                filled: Decimal::ZERO,
                price,
                last_fill_time: None,
            },
        );

        Ok(PlacedOrder {
            external_id,
            symbol: symbol.to_string(),
            quantity,
            price,
            cost: quantity * price,
        })
    }

    async fn fetch_order(
        &self,
        external_id: &ExternalOrderId,
        symbol: &str,
    ) -> Result<OrderSnapshot> {
        let state = self.state.lock();
        state
            .snapshots
            .get(external_id.as_str())
            .cloned()
            .ok_or_else(|| {
                GatewayError::UnknownOrder {
                    external_id: external_id.to_string(),
                    symbol: symbol.to_string(),
                }
                .into()
            })
    }

    async fn cancel_order(&self, external_id: &ExternalOrderId, symbol: &str) -> Result<()> {
        let mut state = self.state.lock();
        let Some(snapshot) = state.snapshots.get_mut(external_id.as_str()) else {
            return Err(Error::Gateway(GatewayError::UnknownOrder {
                external_id: external_id.to_string(),
                symbol: symbol.to_string(),
            }));
        };
        snapshot.status = SnapshotStatus::Cancelled;
        state.cancelled.push(external_id.clone());
        Ok(())
    }

    fn exchange_name(&self) -> &'static str {
        "paper"
    }
}

impl PaperGateway {
    fn create_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<PlacedOrder> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_next_market.take() {
            return Err(error.into());
        }
        let price = state.bid.ok_or_else(|| GatewayError::MissingBid {
            symbol: symbol.to_string(),
        })?;

        let external_id = Self::next_external_id(&mut state);
        state.submitted.push(SubmittedOrder {
            external_id: external_id.clone(),
            symbol: symbol.to_string(),
            side,
            quantity,
            price: Some(price),
            time_in_force: None,
            is_market: true,
        });
        state.snapshots.insert(
            external_id.to_string(),
            OrderSnapshot {
                external_id: external_id.clone(),
                status: SnapshotStatus::Filled,
                filled: quantity,
                price,
                last_fill_time: Some(Utc::now()),
            },
        );

        Ok(PlacedOrder {
            external_id,
            symbol: symbol.to_string(),
            quantity,
            price,
            cost: quantity * price,
        })
    }
}

/// The worked-scenario bot used across the test suites.
#[must_use]
pub fn scenario_bot() -> Bot {
    Bot {
        id: BotId::generate(),
        name: "scenario".into(),
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
        status: BotStatus::Running,
    }
}
