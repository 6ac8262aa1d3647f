//! Binance user-data-stream connector.
//!
//! Session lifecycle: a listen key is created over REST, the websocket
//! connects to `{ws}/ws/{listenKey}`, and the key is refreshed with a
//! PUT on a fixed interval (the multiplexer drives the interval, the
//! stream exposes `refresh_session`). Unrefreshed keys expire server
//! side after 60 minutes.

use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::dto::{ListenKeyResponse, UserStreamMessage};
use crate::config::ExchangeConfig;
use crate::domain::NetworkMode;
use crate::error::{Error, Result};
use crate::port::{ConnectionKey, EventStream, StreamConnector, StreamEvent};

/// Opens user-data streams against Binance live or testnet endpoints.
pub struct BinanceConnector {
    http: Client,
    exchange: ExchangeConfig,
    api_key: Option<String>,
}

impl BinanceConnector {
    #[must_use]
    pub fn new(exchange: ExchangeConfig, api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            exchange,
            api_key,
        }
    }

    fn rest_url(&self, network: NetworkMode) -> &str {
        match network {
            NetworkMode::Live => &self.exchange.rest_url,
            NetworkMode::Testnet => &self.exchange.testnet_rest_url,
        }
    }

    fn ws_url(&self, network: NetworkMode) -> &str {
        match network {
            NetworkMode::Live => &self.exchange.ws_url,
            NetworkMode::Testnet => &self.exchange.testnet_ws_url,
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("X-MBX-APIKEY", key),
            None => builder,
        }
    }

    async fn create_listen_key(&self, network: NetworkMode) -> Result<String> {
        let url = format!("{}/api/v3/userDataStream", self.rest_url(network));
        let response: ListenKeyResponse = self
            .authed(self.http.post(&url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.listen_key)
    }
}

#[async_trait::async_trait]
impl StreamConnector for BinanceConnector {
    type Stream = BinanceUserStream;

    async fn open(&self, key: &ConnectionKey) -> Result<Self::Stream> {
        let listen_key = self.create_listen_key(key.network).await?;
        let ws_url = Url::parse(&format!(
            "{}/ws/{}",
            self.ws_url(key.network),
            listen_key
        ))?;

        info!(connection = %key, "Connecting user data stream");
        let (ws, response) = connect_async(ws_url.as_str()).await?;
        info!(connection = %key, status = %response.status(), "User data stream connected");

        Ok(BinanceUserStream {
            ws,
            http: self.http.clone(),
            refresh_url: format!("{}/api/v3/userDataStream", self.rest_url(key.network)),
            listen_key,
            api_key: self.api_key.clone(),
        })
    }
}

/// One open user-data-stream session.
pub struct BinanceUserStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    http: Client,
    refresh_url: String,
    listen_key: String,
    api_key: Option<String>,
}

impl BinanceUserStream {
    fn parse_event(text: &str) -> Option<StreamEvent> {
        let message = match serde_json::from_str::<UserStreamMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, raw = %text, "Failed to parse stream message");
                return None;
            }
        };

        match message {
            UserStreamMessage::ExecutionReport(report) => match report.normalize() {
                Ok(execution) => Some(StreamEvent::Execution(execution)),
                Err(e) => {
                    warn!(error = %e, raw = %text, "Dropping unmappable execution report");
                    None
                }
            },
            UserStreamMessage::AccountPosition(position) => {
                Some(StreamEvent::Balance(position.normalize()))
            }
            UserStreamMessage::BalanceDelta(_) | UserStreamMessage::Unknown => {
                debug!("Ignoring informational stream message");
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl EventStream for BinanceUserStream {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        while let Some(frame) = self.ws.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Some(event) = Self::parse_event(&text) {
                        return Ok(Some(event));
                    }
                }
                Ok(Message::Ping(data)) => {
                    self.ws.send(Message::Pong(data)).await?;
                }
                Ok(Message::Close(frame)) => {
                    info!(frame = ?frame, "User data stream closed by server");
                    return Ok(None);
                }
                Ok(_) => {}
                Err(e) => return Err(Error::from(e)),
            }
        }
        Ok(None)
    }

    async fn refresh_session(&mut self) -> Result<()> {
        debug!("Refreshing listen key");
        let mut request = self
            .http
            .put(&self.refresh_url)
            .query(&[("listenKey", self.listen_key.as_str())]);
        if let Some(key) = &self.api_key {
            request = request.header("X-MBX-APIKEY", key);
        }
        request.send().await?.error_for_status()?;
        Ok(())
    }
}
