//! Bybit v5 Linear Contracts Connector
//!
//! Implements the ExchangeConnector trait for Bybit's unified v5 REST API.
//! - Auth: hex HMAC-SHA256(api_key + timestamp + recv_window + params)
//!   where params is the JSON body for POST and the query string for GET
//! - Sides: Buy / Sell only; closing directions are sent reduce-only
//! - Envelope: `{ "retCode": 0, "retMsg": "OK", "result": ... }`

use crate::credentials::Account;
use crate::signing::RequestSigner;
use crate::utils::{decimal_to_string, http_client, parse_decimal, read_json_body};
use crate::{
    ExchangeConnector, ExchangeError, ExchangeId, ExchangeResult, MarginType, MarketOrder,
    OrderSide, RateLimiter, TrailingStopOrder, DEFAULT_REQUEST_TIMEOUT_SECS,
};
use async_trait::async_trait;
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Bybit API URL
const BYBIT_API_URL: &str = "https://api.bybit.com";

const CATEGORY: &str = "linear";

/// "leverage not modified": the requested leverage is already in effect
const LEVERAGE_NOT_MODIFIED: i64 = 110043;
/// "cross/isolated margin mode is not modified"
const MARGIN_MODE_NOT_MODIFIED: i64 = 110026;

pub struct BybitConnector {
    signer: RequestSigner,
    client: Client,
    rate_limiter: RateLimiter,
    base_url: String,
}

impl BybitConnector {
    /// Create a connector with its own HTTP client
    pub fn new(account: &Account) -> ExchangeResult<Self> {
        let client = http_client(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))?;
        Self::with_client(account, client)
    }

    /// Create a connector sharing an existing HTTP client
    pub fn with_client(account: &Account, client: Client) -> ExchangeResult<Self> {
        Ok(Self {
            signer: RequestSigner::new(account, ExchangeId::Bybit.signature_scheme())?,
            client,
            rate_limiter: RateLimiter::new(10),
            base_url: BYBIT_API_URL.to_string(),
        })
    }

    /// Point the connector at another host (testnet, proxy, test server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn send_public_request(&self, path: &str, query: &str) -> ExchangeResult<Value> {
        self.rate_limiter.acquire().await?;

        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        handle_response(response).await
    }

    async fn signed_get(&self, path: &str, query: &str) -> ExchangeResult<Value> {
        self.rate_limiter.acquire().await?;

        let path_and_query = format!("{path}?{query}");
        let signed = self.signer.sign(Method::GET, &path_and_query, query);
        let headers = self.signer.headers(&signed)?;
        let url = format!("{}{}", self.base_url, path_and_query);

        let response = self
            .client
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        handle_response(response).await
    }

    /// Sign and POST a JSON body; the response is returned unchecked
    async fn signed_post<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> ExchangeResult<reqwest::Response> {
        self.rate_limiter.acquire().await?;

        let body = serde_json::to_string(body)
            .map_err(|e| ExchangeError::InvalidRequest(format!("Failed to serialize body: {}", e)))?;
        let signed = self.signer.sign(Method::POST, path, &body);
        let headers = self.signer.headers(&signed)?;
        let url = format!("{}{}", self.base_url, path);

        self.client
            .post(&url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))
    }

    /// POST a configuration change, treating "not modified" as success
    async fn post_setting<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        not_modified: i64,
    ) -> ExchangeResult<()> {
        let response = self.signed_post(path, body).await?;
        match handle_response(response).await {
            Ok(_) => Ok(()),
            Err(ExchangeError::Api { code, .. }) if code == not_modified.to_string() => {
                debug!(%path, "setting already in effect");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn post_raw<B: Serialize>(&self, path: &str, body: &B) -> ExchangeResult<Value> {
        let response = self.signed_post(path, body).await?;
        let status = response.status();
        let payload = read_json_body(response).await?;
        debug!(%status, %payload, "Bybit order response");
        Ok(payload)
    }
}

#[async_trait]
impl ExchangeConnector for BybitConnector {
    fn exchange_id(&self) -> ExchangeId {
        ExchangeId::Bybit
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        let body = SetLeverageBody {
            category: CATEGORY,
            symbol: symbol.to_string(),
            buy_leverage: leverage.to_string(),
            sell_leverage: leverage.to_string(),
        };
        self.post_setting("/v5/position/set-leverage", &body, LEVERAGE_NOT_MODIFIED)
            .await
    }

    async fn set_margin_mode(
        &self,
        symbol: &str,
        margin_type: MarginType,
        leverage: u32,
    ) -> ExchangeResult<()> {
        let body = SwitchIsolatedBody {
            category: CATEGORY,
            symbol: symbol.to_string(),
            trade_mode: trade_mode(margin_type),
            buy_leverage: leverage.to_string(),
            sell_leverage: leverage.to_string(),
        };
        self.post_setting("/v5/position/switch-isolated", &body, MARGIN_MODE_NOT_MODIFIED)
            .await
    }

    async fn get_available_balance(&self) -> ExchangeResult<Decimal> {
        let result = self
            .signed_get("/v5/account/wallet-balance", "accountType=UNIFIED&coin=USDT")
            .await?;

        let account = result
            .get("list")
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .ok_or_else(|| ExchangeError::Decode("wallet balance list is empty".into()))?;

        parse_decimal(account.get("totalAvailableBalance"), "totalAvailableBalance")
    }

    async fn get_last_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let query = format!("category={CATEGORY}&symbol={symbol}");
        let result = self.send_public_request("/v5/market/tickers", &query).await?;

        let ticker = result
            .get("list")
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .ok_or_else(|| ExchangeError::UnsupportedSymbol(symbol.to_string()))?;

        parse_decimal(ticker.get("lastPrice"), "lastPrice")
    }

    async fn place_market_order(&self, order: &MarketOrder) -> ExchangeResult<Value> {
        let side = side_str(order.direction.order_side());
        let reduce_only = order.reduce_only || order.direction.is_close();
        debug!(
            symbol = %order.symbol,
            side,
            reduce_only,
            quantity = %order.quantity,
            order_link_id = %order.client_order_id,
            "placing Bybit market order"
        );

        let body = CreateOrderBody {
            category: CATEGORY,
            symbol: order.symbol.clone(),
            side,
            order_type: "Market",
            qty: decimal_to_string(order.quantity),
            order_link_id: order.client_order_id.clone(),
            reduce_only,
        };
        self.post_raw("/v5/order/create", &body).await
    }

    async fn place_trailing_stop(&self, order: &TrailingStopOrder) -> ExchangeResult<Value> {
        if order.direction.is_close() {
            return Err(ExchangeError::InvalidRequest(
                "trailing stops protect open positions only".into(),
            ));
        }

        let body = TradingStopBody {
            category: CATEGORY,
            symbol: order.symbol.clone(),
            tpsl_mode: "Full",
            trailing_stop: decimal_to_string(order.callback),
            active_price: decimal_to_string(order.activation_price),
            position_idx: 0,
        };
        self.post_raw("/v5/position/trading-stop", &body).await
    }
}

fn side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "Buy",
        OrderSide::Sell => "Sell",
    }
}

fn trade_mode(margin_type: MarginType) -> u8 {
    match margin_type {
        MarginType::Cross => 0,
        MarginType::Isolated => 1,
    }
}

/// Unwrap Bybit's `{retCode, retMsg, result}` envelope
async fn handle_response(response: reqwest::Response) -> ExchangeResult<Value> {
    let status = response.status();
    let payload = read_json_body(response).await?;

    let ret_code = payload.get("retCode").and_then(Value::as_i64);
    if status.is_success() && ret_code == Some(0) {
        return Ok(payload.get("result").cloned().unwrap_or(Value::Null));
    }

    let message = payload
        .get("retMsg")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| payload.to_string());

    match (status.as_u16(), ret_code) {
        (401 | 403, _) | (_, Some(10003 | 10004)) => Err(ExchangeError::Authentication(message)),
        (429, _) | (_, Some(10006)) => Err(ExchangeError::RateLimit(message)),
        (_, Some(code)) => Err(ExchangeError::Api {
            code: code.to_string(),
            message,
        }),
        (status, None) => Err(ExchangeError::Api {
            code: status.to_string(),
            message,
        }),
    }
}

// Request bodies. Field order is the serialized (and signed) order.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetLeverageBody {
    category: &'static str,
    symbol: String,
    buy_leverage: String,
    sell_leverage: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwitchIsolatedBody {
    category: &'static str,
    symbol: String,
    trade_mode: u8,
    buy_leverage: String,
    sell_leverage: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderBody {
    category: &'static str,
    symbol: String,
    side: &'static str,
    order_type: &'static str,
    qty: String,
    order_link_id: String,
    reduce_only: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TradingStopBody {
    category: &'static str,
    symbol: String,
    tpsl_mode: &'static str,
    trailing_stop: String,
    active_price: String,
    position_idx: u8,
}
