//! Trade executor (C9): approve/reject a pending TradeOrder against the
//! brokerage, including symbol resolution, close-vs-market-order branching,
//! and a bounded background poll of the resulting order's fill state.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::errors::{CoordinatorError, CoordinatorResult};
use crate::domain::models::{AlpacaOrderMeta, TradeOrderMetadata};
use crate::domain::ports::{ApiSettingsStore, Broker, BrokerCredentials, BrokerOrderRequest, OrderSide, TimeInForce, TradeOrderSource, TradeOrderStore};
use crate::domain::status::{BrokerOrderStatus, Decision, TradeOrderStatus};
use crate::infrastructure::alpaca::symbol_resolution::resolve_symbol;

const LIVE_BASE_URL: &str = "https://api.alpaca.markets";
const PAPER_BASE_URL: &str = "https://paper-api.alpaca.markets";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub alpaca_error: Option<String>,
    pub request: Option<serde_json::Value>,
}

impl ExecuteOutcome {
    fn ok() -> Self {
        Self { success: true, error: None, alpaca_error: None, request: None }
    }

    fn failure(error: String, alpaca_error: Option<String>, request: Option<serde_json::Value>) -> Self {
        Self { success: false, error: Some(error), alpaca_error, request }
    }
}

pub struct TradeExecutor {
    trade_orders: Arc<dyn TradeOrderStore>,
    api_settings: Arc<dyn ApiSettingsStore>,
    broker: Arc<dyn Broker>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl TradeExecutor {
    pub fn new(
        trade_orders: Arc<dyn TradeOrderStore>,
        api_settings: Arc<dyn ApiSettingsStore>,
        broker: Arc<dyn Broker>,
        poll_interval: Duration,
        poll_timeout: Duration,
    ) -> Self {
        Self { trade_orders, api_settings, broker, poll_interval, poll_timeout }
    }

    pub async fn execute(&self, trade_order_id: Uuid, action: TradeAction, user_id: Uuid, is_service_call: bool) -> CoordinatorResult<ExecuteOutcome> {
        let order = self.trade_orders.get_trade_order(trade_order_id).await?;
        if !is_service_call && order.user_id != user_id {
            return Err(CoordinatorError::Unauthorized(format!("trade order {trade_order_id} does not belong to caller")));
        }

        let source = source_of(&order);
        if let Some(sibling) = self.trade_orders.find_sibling_decided(order.user_id, &order.ticker, source).await? {
            self.trade_orders.cleanup_duplicates(order.user_id, &order.ticker, source, sibling.id).await?;
            return Ok(ExecuteOutcome::failure(
                format!("a sibling order for {} was already {}", order.ticker, sibling.status.as_str()),
                None,
                None,
            ));
        }

        if action == TradeAction::Reject {
            self.trade_orders.update_trade_order_status(trade_order_id, TradeOrderStatus::Rejected, order.metadata.clone()).await?;
            self.trade_orders.cleanup_duplicates(order.user_id, &order.ticker, source, trade_order_id).await?;
            return Ok(ExecuteOutcome::ok());
        }

        let settings = self.api_settings.get_api_settings(order.user_id).await?;
        let (Some(key_id), Some(secret_key)) = (settings.alpaca_key_id.clone(), settings.alpaca_secret_key.clone()) else {
            return Ok(ExecuteOutcome::failure("user has no brokerage keys configured".to_string(), None, None));
        };
        let creds = BrokerCredentials {
            key_id,
            secret_key,
            base_url: if settings.paper_trading { PAPER_BASE_URL.to_string() } else { LIVE_BASE_URL.to_string() },
        };

        let resolution = match resolve_symbol(self.broker.as_ref(), &creds, &order.ticker).await {
            Ok(r) => r,
            Err(e) => return Ok(ExecuteOutcome::failure(e.to_string(), Some(e.to_string()), None)),
        };

        let meta = &order.metadata;
        let flagged_close = meta.use_close_endpoint.unwrap_or(false) || meta.should_close_position.unwrap_or(false) || meta.is_full_position_closure.unwrap_or(false);

        let close_tolerance_pct = Decimal::new(1, 3); // 0.001 == 0.1%
        let current_qty = self.broker.get_position_quantity(&creds, &resolution.position_symbol).await.unwrap_or(None);
        let near_full_close = current_qty
            .map(|qty| qty > Decimal::ZERO && (qty - order.shares).abs() / qty <= close_tolerance_pct)
            .unwrap_or(false);

        let use_close = order.action == Decision::Sell && order.shares > Decimal::ZERO && (flagged_close || near_full_close);

        let epoch_ms = chrono::Utc::now().timestamp_millis();
        let client_order_id =
            if use_close { format!("ai_close_{trade_order_id}_{epoch_ms}") } else { format!("ai_{trade_order_id}_{epoch_ms}") };

        let request_json = serde_json::json!({
            "symbol": resolution.order_symbol,
            "action": order.action.as_str(),
            "shares": order.shares,
            "dollarAmount": order.dollar_amount,
            "useCloseEndpoint": use_close,
            "clientOrderId": client_order_id,
        });

        let ack = if use_close {
            self.broker.close_position(&creds, &resolution.position_symbol).await
        } else {
            let side = match order.action {
                Decision::Buy => OrderSide::Buy,
                Decision::Sell => OrderSide::Sell,
                _ => return Ok(ExecuteOutcome::failure(format!("cannot execute decision {}", order.action.as_str()), None, Some(request_json))),
            };
            let time_in_force = if resolution.is_crypto { TimeInForce::Gtc } else { TimeInForce::Day };
            self.broker
                .submit_order(
                    &creds,
                    BrokerOrderRequest {
                        symbol: resolution.order_symbol.clone(),
                        side,
                        time_in_force,
                        client_order_id: client_order_id.clone(),
                        qty: (order.dollar_amount == Decimal::ZERO).then_some(order.shares),
                        notional: (order.dollar_amount > Decimal::ZERO).then_some(order.dollar_amount),
                    },
                )
                .await
        };

        let ack = match ack {
            Ok(ack) => ack,
            Err(e) => return Ok(ExecuteOutcome::failure(e.to_string(), Some(e.to_string()), Some(request_json))),
        };

        let mut updated_metadata = order.metadata.clone();
        updated_metadata.symbol_resolution = Some(resolution);
        updated_metadata.alpaca_order = Some(AlpacaOrderMeta {
            id: Some(ack.id.clone()),
            status: Some(ack.status.clone()),
            filled_qty: None,
            filled_avg_price: None,
            updated_at: Some(chrono::Utc::now()),
        });
        self.trade_orders.update_trade_order_status(trade_order_id, TradeOrderStatus::Approved, updated_metadata).await?;

        if !ack.already_closed && !ack.id.is_empty() {
            self.spawn_poll(trade_order_id, ack.id, creds);
        }

        Ok(ExecuteOutcome::ok())
    }

    fn spawn_poll(&self, trade_order_id: Uuid, broker_order_id: String, creds: BrokerCredentials) {
        let broker = self.broker.clone();
        let trade_orders = self.trade_orders.clone();
        let interval = self.poll_interval;
        let deadline = self.poll_timeout;

        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            loop {
                tokio::time::sleep(interval).await;
                let Ok(snapshot) = broker.get_order(&creds, &broker_order_id).await else { continue };
                let meta = AlpacaOrderMeta {
                    id: Some(snapshot.id.clone()),
                    status: Some(snapshot.status.clone()),
                    filled_qty: snapshot.filled_qty,
                    filled_avg_price: snapshot.filled_avg_price,
                    updated_at: Some(chrono::Utc::now()),
                };
                if trade_orders.update_trade_order_broker_fields(trade_order_id, meta).await.is_err() {
                    return;
                }
                if BrokerOrderStatus::from_alpaca(&snapshot.status).is_terminal() {
                    return;
                }
                if started.elapsed() >= deadline {
                    return;
                }
            }
        });
    }
}

fn source_of(order: &crate::domain::models::TradeOrder) -> TradeOrderSource {
    match (order.analysis_id, order.rebalance_request_id) {
        (Some(id), _) => TradeOrderSource::Analysis(id),
        (None, Some(id)) => TradeOrderSource::Rebalance(id),
        (None, None) => TradeOrderSource::Manual,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellAdjustment {
    InvalidNoPosition,
    CloseFullPosition { shares: Decimal },
    PartialSell { dollar_amount: Decimal },
}

/// §4.9.3 — adjusts a proposed sell given the user's actual position.
pub fn validate_sell_order(dollar_amount: Decimal, position_value: Decimal, shares: Decimal, _ticker: &str) -> SellAdjustment {
    if position_value <= Decimal::ZERO || shares <= Decimal::ZERO {
        return SellAdjustment::InvalidNoPosition;
    }
    if dollar_amount > position_value {
        return SellAdjustment::CloseFullPosition { shares };
    }
    let drift = (dollar_amount - position_value).abs() / position_value;
    if drift <= Decimal::from_str("0.05").expect("static literal parses") {
        return SellAdjustment::CloseFullPosition { shares };
    }
    SellAdjustment::PartialSell { dollar_amount }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn no_position_is_invalid() {
        assert_eq!(validate_sell_order(dec!(100), dec!(0), dec!(0), "AAPL"), SellAdjustment::InvalidNoPosition);
    }

    #[test]
    fn over_amount_closes_full_position() {
        let adj = validate_sell_order(dec!(500), dec!(300), dec!(10), "AAPL");
        assert_eq!(adj, SellAdjustment::CloseFullPosition { shares: dec!(10) });
    }

    #[test]
    fn within_five_percent_closes_full_position() {
        let adj = validate_sell_order(dec!(290), dec!(300), dec!(10), "AAPL");
        assert_eq!(adj, SellAdjustment::CloseFullPosition { shares: dec!(10) });
    }

    #[test]
    fn otherwise_partial_sell() {
        let adj = validate_sell_order(dec!(100), dec!(300), dec!(10), "AAPL");
        assert_eq!(adj, SellAdjustment::PartialSell { dollar_amount: dec!(100) });
    }
}
