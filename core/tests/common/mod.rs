//! Scripted exchange connector shared by the core integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use exchange_connectors::{
    Account, ExchangeConnector, ExchangeError, ExchangeId, ExchangeResult, MarginType,
    MarketOrder, TrailingStopOrder,
};
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tvm_relay_core::ConnectorFactory;

/// Every connector call, in the order it was made
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetLeverage(String, u32),
    SetMarginMode(String, MarginType),
    Balance,
    Price(String),
    Order(MarketOrder),
    TrailingStop(TrailingStopOrder),
}

pub struct ScriptedConnector {
    exchange: ExchangeId,
    calls: Mutex<Vec<Call>>,
    fail_leverage: bool,
    fail_margin: bool,
    balance: Option<Decimal>,
    price: Option<Decimal>,
    order_response: Option<Value>,
    /// When set, order submission waits for a permit
    order_gate: Option<Arc<Semaphore>>,
}

impl ScriptedConnector {
    pub fn new(exchange: ExchangeId) -> Self {
        Self {
            exchange,
            calls: Mutex::new(Vec::new()),
            fail_leverage: false,
            fail_margin: false,
            balance: Some(Decimal::new(1000, 0)),
            price: Some(Decimal::new(50000, 0)),
            order_response: Some(serde_json::json!({"code": "00000", "data": {"orderId": "1"}})),
            order_gate: None,
        }
    }

    pub fn failing_leverage(mut self) -> Self {
        self.fail_leverage = true;
        self
    }

    pub fn failing_margin(mut self) -> Self {
        self.fail_margin = true;
        self
    }

    pub fn with_balance(mut self, balance: Option<Decimal>) -> Self {
        self.balance = balance;
        self
    }

    pub fn with_price(mut self, price: Option<Decimal>) -> Self {
        self.price = price;
        self
    }

    pub fn with_order_response(mut self, response: Option<Value>) -> Self {
        self.order_response = response;
        self
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.order_gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn order_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Order(_)))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    /// Wait until `n` order submissions have started
    pub async fn wait_for_orders(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.order_calls() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("order submission never started");
    }
}

#[async_trait]
impl ExchangeConnector for ScriptedConnector {
    fn exchange_id(&self) -> ExchangeId {
        self.exchange
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        self.record(Call::SetLeverage(symbol.to_string(), leverage));
        if self.fail_leverage {
            return Err(ExchangeError::Api {
                code: "40000".into(),
                message: "leverage rejected".into(),
            });
        }
        Ok(())
    }

    async fn set_margin_mode(
        &self,
        symbol: &str,
        margin_type: MarginType,
        _leverage: u32,
    ) -> ExchangeResult<()> {
        self.record(Call::SetMarginMode(symbol.to_string(), margin_type));
        if self.fail_margin {
            return Err(ExchangeError::Network("connection reset".into()));
        }
        Ok(())
    }

    async fn get_available_balance(&self) -> ExchangeResult<Decimal> {
        self.record(Call::Balance);
        self.balance
            .ok_or_else(|| ExchangeError::Network("balance endpoint unreachable".into()))
    }

    async fn get_last_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.record(Call::Price(symbol.to_string()));
        self.price
            .ok_or_else(|| ExchangeError::UnsupportedSymbol(symbol.to_string()))
    }

    async fn place_market_order(&self, order: &MarketOrder) -> ExchangeResult<Value> {
        self.record(Call::Order(order.clone()));
        if let Some(gate) = &self.order_gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.order_response
            .clone()
            .ok_or_else(|| ExchangeError::Network("timed out".into()))
    }

    async fn place_trailing_stop(&self, order: &TrailingStopOrder) -> ExchangeResult<Value> {
        self.record(Call::TrailingStop(order.clone()));
        Ok(serde_json::json!({"code": "00000"}))
    }
}

/// Hands the same scripted connector to every account
pub struct SharedFactory(pub Arc<ScriptedConnector>);

impl ConnectorFactory for SharedFactory {
    fn connector(&self, _account: &Account) -> ExchangeResult<Arc<dyn ExchangeConnector>> {
        Ok(self.0.clone())
    }
}

pub const ACCOUNTS: &str = "\
A1,bitget,key-a,secret-a,pass-a
B1,bybit,key-b,secret-b
";

pub fn envelope(json: &str) -> String {
    format!("TVM:{json}:MVT")
}
