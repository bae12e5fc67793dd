//! Alpaca REST client behind the `Broker` port. Unlike the single-account
//! trading bot this is adapted from, every call carries the caller's own
//! `BrokerCredentials` — this process serves many users' brokerage accounts,
//! not one.

use async_trait::async_trait;
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::domain::errors::{CoordinatorError, CoordinatorResult};
use crate::domain::ports::{
    AssetInfo, Broker, BrokerCredentials, BrokerOrderAck, BrokerOrderRequest, BrokerOrderSnapshot, OrderSide, PositionSnapshot,
};
use crate::infrastructure::core::{CircuitBreaker, CircuitBreakerError, HttpClientFactory};

pub struct AlpacaBroker {
    client: ClientWithMiddleware,
    breaker: CircuitBreaker,
}

impl AlpacaBroker {
    pub fn new() -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            breaker: CircuitBreaker::new("alpaca", 5, 2, Duration::from_secs(30)),
        }
    }

    async fn send(&self, request: RequestBuilder) -> CoordinatorResult<reqwest::Response> {
        self.breaker.call(request.send()).await.map_err(|e| match e {
            CircuitBreakerError::Open(msg) => CoordinatorError::Transient(msg),
            CircuitBreakerError::Inner(e) => CoordinatorError::Transient(e.to_string()),
        })
    }
}

impl Default for AlpacaBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct AlpacaAsset {
    symbol: String,
    tradable: bool,
    fractionable: bool,
    class: String,
}

#[derive(Debug, Serialize)]
struct AlpacaOrderRequest {
    symbol: String,
    side: String,
    #[serde(rename = "type")]
    order_type: &'static str,
    time_in_force: String,
    client_order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    qty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notional: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaOrderResponse {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct AlpacaPosition {
    qty: String,
}

#[derive(Debug, Deserialize)]
struct AlpacaPositionFull {
    symbol: String,
    qty: String,
    #[serde(default)]
    unrealized_plpc: String,
}

fn auth_error(body: &str) -> CoordinatorError {
    CoordinatorError::BrokerRejected(body.to_string())
}

#[async_trait]
impl Broker for AlpacaBroker {
    async fn resolve_asset(&self, creds: &BrokerCredentials, candidate: &str) -> CoordinatorResult<Option<AssetInfo>> {
        let url = format!("{}/v2/assets/{}", creds.base_url, candidate);
        let response = self
            .send(self.client.get(&url).header("APCA-API-KEY-ID", &creds.key_id).header("APCA-API-SECRET-KEY", &creds.secret_key))
            .await?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(auth_error(&body));
        }

        let asset: AlpacaAsset = response.json().await.map_err(|e| CoordinatorError::Other(e.into()))?;
        Ok(Some(AssetInfo {
            symbol: asset.symbol,
            tradable: asset.tradable,
            fractionable: asset.fractionable,
            asset_class: asset.class,
        }))
    }

    async fn submit_order(&self, creds: &BrokerCredentials, req: BrokerOrderRequest) -> CoordinatorResult<BrokerOrderAck> {
        let body = AlpacaOrderRequest {
            symbol: req.symbol.clone(),
            side: match req.side {
                OrderSide::Buy => "buy".to_string(),
                OrderSide::Sell => "sell".to_string(),
            },
            order_type: "market",
            time_in_force: req.time_in_force.as_str().to_string(),
            client_order_id: req.client_order_id,
            qty: req.qty.map(|q| q.to_string()),
            notional: req.notional.map(|n| n.to_string()),
        };

        let url = format!("{}/v2/orders", creds.base_url);
        let response = self
            .send(
                self.client
                    .post(&url)
                    .header("APCA-API-KEY-ID", &creds.key_id)
                    .header("APCA-API-SECRET-KEY", &creds.secret_key)
                    .json(&body),
            )
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(auth_error(&text));
        }

        let order: AlpacaOrderResponse = response.json().await.map_err(|e| CoordinatorError::Other(e.into()))?;
        info!(order_id = %order.id, symbol = %req.symbol, "submitted order to alpaca");
        Ok(BrokerOrderAck { id: order.id, status: order.status, already_closed: false })
    }

    async fn get_order(&self, creds: &BrokerCredentials, order_id: &str) -> CoordinatorResult<BrokerOrderSnapshot> {
        let url = format!("{}/v2/orders/{}", creds.base_url, order_id);
        let response = self
            .send(self.client.get(&url).header("APCA-API-KEY-ID", &creds.key_id).header("APCA-API-SECRET-KEY", &creds.secret_key))
            .await?;

        if response.status().as_u16() == 404 {
            return Err(CoordinatorError::NotFound(format!("order {order_id} not found at broker")));
        }
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(auth_error(&text));
        }

        #[derive(Deserialize)]
        struct Raw {
            id: String,
            status: String,
            filled_qty: Option<String>,
            filled_avg_price: Option<String>,
        }
        let raw: Raw = response.json().await.map_err(|e| CoordinatorError::Other(e.into()))?;
        Ok(BrokerOrderSnapshot {
            id: raw.id,
            status: raw.status,
            filled_qty: raw.filled_qty.and_then(|v| Decimal::from_str(&v).ok()),
            filled_avg_price: raw.filled_avg_price.and_then(|v| Decimal::from_str(&v).ok()),
        })
    }

    async fn close_position(&self, creds: &BrokerCredentials, symbol: &str) -> CoordinatorResult<BrokerOrderAck> {
        let url = format!("{}/v2/positions/{}", creds.base_url, symbol);
        let response = self
            .send(self.client.delete(&url).header("APCA-API-KEY-ID", &creds.key_id).header("APCA-API-SECRET-KEY", &creds.secret_key))
            .await?;

        if response.status().as_u16() == 404 {
            info!(symbol, "position already closed at broker");
            return Ok(BrokerOrderAck { id: String::new(), status: "already_closed".to_string(), already_closed: true });
        }
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(auth_error(&text));
        }

        let order: AlpacaOrderResponse = response.json().await.map_err(|e| CoordinatorError::Other(e.into()))?;
        Ok(BrokerOrderAck { id: order.id, status: order.status, already_closed: false })
    }

    async fn get_position_quantity(&self, creds: &BrokerCredentials, symbol: &str) -> CoordinatorResult<Option<Decimal>> {
        let url = format!("{}/v2/positions/{}", creds.base_url, symbol);
        let response = self
            .send(self.client.get(&url).header("APCA-API-KEY-ID", &creds.key_id).header("APCA-API-SECRET-KEY", &creds.secret_key))
            .await?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(auth_error(&text));
        }

        let position: AlpacaPosition = response.json().await.map_err(|e| CoordinatorError::Other(e.into()))?;
        Ok(Decimal::from_str(&position.qty).ok())
    }

    async fn list_positions(&self, creds: &BrokerCredentials) -> CoordinatorResult<Vec<PositionSnapshot>> {
        let url = format!("{}/v2/positions", creds.base_url);
        let response = self
            .send(self.client.get(&url).header("APCA-API-KEY-ID", &creds.key_id).header("APCA-API-SECRET-KEY", &creds.secret_key))
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(auth_error(&text));
        }

        let positions: Vec<AlpacaPositionFull> = response.json().await.map_err(|e| CoordinatorError::Other(e.into()))?;
        Ok(positions
            .into_iter()
            .map(|p| PositionSnapshot {
                symbol: p.symbol,
                qty: Decimal::from_str(&p.qty).unwrap_or_default(),
                unrealized_plpc: Decimal::from_str(&p.unrealized_plpc).unwrap_or_default(),
            })
            .collect())
    }
}
