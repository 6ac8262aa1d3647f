//! Binance spot REST gateway.
//!
//! Implements order placement, lookup, and cancellation against the spot
//! API. Post-only limit orders are submitted as `LIMIT_MAKER`; the
//! exchange's would-immediately-match rejection is surfaced as
//! [`GatewayError::PostOnlyWouldFill`] so reconciliation can fall back
//! to a market sell. Request signing is handled outside this crate.

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use tracing::{debug, info};

use super::dto::{ApiErrorResponse, BookTickerResponse, OrderResponse};
use crate::domain::{ExternalOrderId, OrderSide, TimeInForce};
use crate::error::{Error, GatewayError, Result};
use crate::port::{ExchangeGateway, OrderSnapshot, PlacedOrder, SnapshotStatus, Ticker};

// Spot API rejection codes worth distinguishing.
const CODE_NEW_ORDER_REJECTED: i64 = -2010;
const CODE_CANCEL_REJECTED: i64 = -2011;
const CODE_NO_SUCH_ORDER: i64 = -2013;

/// REST client for one Binance spot endpoint (live or testnet).
pub struct BinanceGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl BinanceGateway {
    /// Create a gateway against the given base URL.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Spot REST endpoint (e.g. `https://api.binance.com`)
    /// * `api_key` - API key sent as `X-MBX-APIKEY`; `None` limits the
    ///   gateway to public market data
    #[must_use]
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("X-MBX-APIKEY", key),
            None => builder,
        }
    }

    /// Decode a response, mapping the spot API's error body onto
    /// [`GatewayError`] variants when the status is not 2xx.
    async fn decode_order_response(
        response: reqwest::Response,
        external_id: Option<(&ExternalOrderId, &str)>,
    ) -> Result<OrderResponse> {
        if response.status().is_success() {
            return Ok(response.json().await?);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Self::map_api_error(status, &body, external_id).into())
    }

    fn map_api_error(
        status: StatusCode,
        body: &str,
        external_id: Option<(&ExternalOrderId, &str)>,
    ) -> GatewayError {
        let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(body) else {
            return GatewayError::Transport(format!("HTTP {status}: {body}"));
        };

        match api_error.code {
            CODE_NEW_ORDER_REJECTED if api_error.msg.contains("immediately match") => {
                GatewayError::PostOnlyWouldFill
            }
            CODE_NEW_ORDER_REJECTED => GatewayError::Rejected(api_error.msg),
            CODE_CANCEL_REJECTED | CODE_NO_SUCH_ORDER => match external_id {
                Some((id, symbol)) => GatewayError::UnknownOrder {
                    external_id: id.to_string(),
                    symbol: symbol.to_string(),
                },
                None => GatewayError::Rejected(api_error.msg),
            },
            _ => GatewayError::Rejected(api_error.msg),
        }
    }

    async fn create_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<PlacedOrder> {
        info!(symbol, side = side.as_str(), %quantity, "Submitting market order");

        let response = self
            .request(Method::POST, "/api/v3/order")
            .form(&[
                ("symbol", symbol.to_string()),
                ("side", side.as_str().to_string()),
                ("type", "MARKET".to_string()),
                ("quantity", quantity.to_string()),
            ])
            .send()
            .await?;

        let order = Self::decode_order_response(response, None).await?;
        Ok(PlacedOrder {
            external_id: ExternalOrderId::new(order.order_id.to_string()),
            symbol: order.symbol.clone(),
            quantity: order.executed_qty,
            price: order.effective_price(),
            cost: order.cumulative_quote_qty,
        })
    }
}

#[async_trait::async_trait]
impl ExchangeGateway for BinanceGateway {
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let response = self
            .request(Method::GET, "/api/v3/ticker/bookTicker")
            .query(&[("symbol", symbol)])
            .send()
            .await?
            .error_for_status()?;

        let ticker: BookTickerResponse = response.json().await?;
        debug!(symbol, bid = %ticker.bid_price, ask = %ticker.ask_price, "Fetched ticker");

        Ok(Ticker {
            symbol: ticker.symbol,
            bid: (ticker.bid_price > Decimal::ZERO).then_some(ticker.bid_price),
            ask: (ticker.ask_price > Decimal::ZERO).then_some(ticker.ask_price),
        })
    }

    async fn create_market_buy_order(
        &self,
        symbol: &str,
        quantity: Decimal,
    ) -> Result<PlacedOrder> {
        self.create_market_order(symbol, OrderSide::Buy, quantity).await
    }

    async fn create_market_sell_order(
        &self,
        symbol: &str,
        quantity: Decimal,
    ) -> Result<PlacedOrder> {
        self.create_market_order(symbol, OrderSide::Sell, quantity).await
    }

    async fn create_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        time_in_force: TimeInForce,
    ) -> Result<PlacedOrder> {
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("quantity", quantity.to_string()),
            ("price", price.to_string()),
        ];
        match time_in_force {
            // Spot has no post-only TIF; LIMIT_MAKER is the maker-only type.
            TimeInForce::PostOnly => params.push(("type", "LIMIT_MAKER".to_string())),
            TimeInForce::GoodTilCancelled => {
                params.push(("type", "LIMIT".to_string()));
                params.push(("timeInForce", "GTC".to_string()));
            }
        }

        info!(symbol, side = side.as_str(), %quantity, %price, "Submitting limit order");

        let response = self
            .request(Method::POST, "/api/v3/order")
            .form(&params)
            .send()
            .await?;

        let order = Self::decode_order_response(response, None).await?;
        Ok(PlacedOrder {
            external_id: ExternalOrderId::new(order.order_id.to_string()),
            symbol: order.symbol,
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
        let response = self
            .request(Method::GET, "/api/v3/order")
            .query(&[("symbol", symbol), ("orderId", external_id.as_str())])
            .send()
            .await?;

        let order = Self::decode_order_response(response, Some((external_id, symbol))).await?;
        let status = match order.status.as_str() {
            "NEW" | "PARTIALLY_FILLED" | "PENDING_CANCEL" => SnapshotStatus::Open,
            "FILLED" => SnapshotStatus::Filled,
            "CANCELED" | "EXPIRED" | "EXPIRED_IN_MATCH" | "REJECTED" => SnapshotStatus::Cancelled,
            other => return Err(Error::Parse(format!("unknown order status '{other}'"))),
        };

        Ok(OrderSnapshot {
            external_id: ExternalOrderId::new(order.order_id.to_string()),
            status,
            filled: order.executed_qty,
            price: order.effective_price(),
            last_fill_time: order.last_fill_time(),
        })
    }

    async fn cancel_order(&self, external_id: &ExternalOrderId, symbol: &str) -> Result<()> {
        info!(symbol, external_id = %external_id, "Cancelling order");

        let response = self
            .request(Method::DELETE, "/api/v3/order")
            .query(&[("symbol", symbol), ("orderId", external_id.as_str())])
            .send()
            .await?;

        Self::decode_order_response(response, Some((external_id, symbol))).await?;
        Ok(())
    }

    fn exchange_name(&self) -> &'static str {
        "binance"
    }
}
