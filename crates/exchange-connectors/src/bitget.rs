//! Bitget USDT-M Futures Connector
//!
//! Implements the ExchangeConnector trait for the Bitget mix (v1) REST API.
//! - Auth: hex HMAC-SHA256(timestamp + METHOD + requestPath + body), plus passphrase header
//! - Sides: open_long / open_short / close_long / close_short, sent as-is
//! - Envelope: `{ "code": "00000", "msg": "success", "data": ... }`

use crate::credentials::Account;
use crate::signing::RequestSigner;
use crate::utils::{decimal_to_string, http_client, parse_decimal, read_json_body};
use crate::{
    ExchangeConnector, ExchangeError, ExchangeId, ExchangeResult, MarginType,
    MarketOrder, RateLimiter, TrailingStopOrder, DEFAULT_REQUEST_TIMEOUT_SECS,
};
use async_trait::async_trait;
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Bitget API URL
const BITGET_API_URL: &str = "https://api.bitget.com";

const PRODUCT_TYPE: &str = "umcbl";
const CONTRACT_SUFFIX: &str = "_UMCBL";
const MARGIN_COIN: &str = "USDT";
const SUCCESS_CODE: &str = "00000";
const HOLD_SIDES: [&str; 2] = ["long", "short"];

pub struct BitgetConnector {
    signer: RequestSigner,
    client: Client,
    rate_limiter: RateLimiter,
    base_url: String,
}

impl BitgetConnector {
    /// Create a connector with its own HTTP client
    pub fn new(account: &Account) -> ExchangeResult<Self> {
        let client = http_client(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))?;
        Self::with_client(account, client)
    }

    /// Create a connector sharing an existing HTTP client
    pub fn with_client(account: &Account, client: Client) -> ExchangeResult<Self> {
        Ok(Self {
            signer: RequestSigner::new(account, ExchangeId::Bitget.signature_scheme())?,
            client,
            // Bitget allows 10 order requests per second per UID
            rate_limiter: RateLimiter::new(10),
            base_url: BITGET_API_URL.to_string(),
        })
    }

    /// Point the connector at another host (sandbox, proxy, test server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn send_public_request(&self, path_and_query: &str) -> ExchangeResult<Value> {
        self.rate_limiter.acquire().await?;

        let url = format!("{}{}", self.base_url, path_and_query);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        handle_response(response).await
    }

    /// Sign and send a private request; the response is returned unchecked
    async fn send_private_request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<String>,
    ) -> ExchangeResult<reqwest::Response> {
        self.rate_limiter.acquire().await?;

        let body = body.unwrap_or_default();
        let signed = self.signer.sign(method.clone(), path_and_query, &body);
        let headers = self.signer.headers(&signed)?;
        let url = format!("{}{}", self.base_url, path_and_query);

        let mut request = self.client.request(method, &url).headers(headers);
        if !body.is_empty() {
            request = request.body(body);
        }

        request
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))
    }

    async fn post_checked<B: Serialize>(&self, path: &str, body: &B) -> ExchangeResult<Value> {
        let response = self
            .send_private_request(Method::POST, path, Some(to_body(body)?))
            .await?;
        handle_response(response).await
    }

    async fn post_leverage(
        &self,
        symbol: &str,
        leverage: u32,
        hold_side: Option<&'static str>,
    ) -> ExchangeResult<()> {
        let body = SetLeverageBody {
            symbol: contract_symbol(symbol),
            margin_coin: MARGIN_COIN,
            leverage: leverage.to_string(),
            hold_side,
        };
        self.post_checked("/api/mix/v1/account/setLeverage", &body)
            .await?;
        Ok(())
    }

    async fn post_raw<B: Serialize>(&self, path: &str, body: &B) -> ExchangeResult<Value> {
        let response = self
            .send_private_request(Method::POST, path, Some(to_body(body)?))
            .await?;
        let status = response.status();
        let payload = read_json_body(response).await?;
        debug!(%status, %payload, "Bitget order response");
        Ok(payload)
    }
}

#[async_trait]
impl ExchangeConnector for BitgetConnector {
    fn exchange_id(&self) -> ExchangeId {
        ExchangeId::Bitget
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        self.post_leverage(symbol, leverage, None).await
    }

    async fn set_margin_mode(
        &self,
        symbol: &str,
        margin_type: MarginType,
        leverage: u32,
    ) -> ExchangeResult<()> {
        let body = SetMarginModeBody {
            symbol: contract_symbol(symbol),
            margin_coin: MARGIN_COIN,
            margin_mode: margin_mode(margin_type),
        };
        self.post_checked("/api/mix/v1/account/setMarginMode", &body)
            .await?;

        // Isolated leverage is per hold side and is not covered by the crossed setting
        if margin_type == MarginType::Isolated {
            for hold_side in HOLD_SIDES {
                self.post_leverage(symbol, leverage, Some(hold_side)).await?;
            }
        }
        Ok(())
    }

    async fn get_available_balance(&self) -> ExchangeResult<Decimal> {
        let path = format!("/api/mix/v1/account/accounts?productType={PRODUCT_TYPE}");
        let response = self.send_private_request(Method::GET, &path, None).await?;
        let data = handle_response(response).await?;

        let accounts = data
            .as_array()
            .ok_or_else(|| ExchangeError::Decode("accounts payload is not a list".into()))?;
        let usdt = accounts
            .iter()
            .find(|a| a.get("marginCoin").and_then(Value::as_str) == Some(MARGIN_COIN))
            .ok_or_else(|| ExchangeError::Decode("no USDT margin account".into()))?;

        parse_decimal(usdt.get("available"), "available")
    }

    async fn get_last_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let path = format!(
            "/api/mix/v1/market/ticker?symbol={}",
            contract_symbol(symbol)
        );
        let data = self.send_public_request(&path).await?;
        parse_decimal(data.get("last"), "last")
    }

    async fn place_market_order(&self, order: &MarketOrder) -> ExchangeResult<Value> {
        debug!(
            symbol = %order.symbol,
            side = %order.direction,
            quantity = %order.quantity,
            client_oid = %order.client_order_id,
            "placing Bitget market order"
        );

        let body = PlaceOrderBody {
            symbol: contract_symbol(&order.symbol),
            margin_coin: MARGIN_COIN,
            size: decimal_to_string(order.quantity),
            side: order.direction.as_str(),
            order_type: "market",
            client_oid: order.client_order_id.clone(),
        };
        self.post_raw("/api/mix/v1/order/placeOrder", &body).await
    }

    async fn place_trailing_stop(&self, order: &TrailingStopOrder) -> ExchangeResult<Value> {
        if order.direction.is_close() {
            warn!(direction = %order.direction, "trailing stop requested for a closing order");
            return Err(ExchangeError::InvalidRequest(
                "trailing stops protect open positions only".into(),
            ));
        }

        let body = TrailStopBody {
            symbol: contract_symbol(&order.symbol),
            margin_coin: MARGIN_COIN,
            trigger_price: decimal_to_string(order.activation_price),
            trigger_type: "market_price",
            size: decimal_to_string(order.quantity),
            side: order.direction.closing().as_str(),
            range_rate: decimal_to_string(order.callback),
        };
        self.post_raw("/api/mix/v1/plan/placeTrailStop", &body).await
    }
}

/// Bitget's contract symbol for a normalized pair, e.g. `BTCUSDT_UMCBL`
pub fn contract_symbol(symbol: &str) -> String {
    if symbol.ends_with(CONTRACT_SUFFIX) {
        symbol.to_string()
    } else {
        format!("{symbol}{CONTRACT_SUFFIX}")
    }
}

fn margin_mode(margin_type: MarginType) -> &'static str {
    match margin_type {
        MarginType::Cross => "crossed",
        MarginType::Isolated => "fixed",
    }
}

fn to_body<B: Serialize>(body: &B) -> ExchangeResult<String> {
    serde_json::to_string(body)
        .map_err(|e| ExchangeError::InvalidRequest(format!("Failed to serialize body: {}", e)))
}

/// Unwrap Bitget's `{code, msg, data}` envelope
async fn handle_response(response: reqwest::Response) -> ExchangeResult<Value> {
    let status = response.status();
    let payload = read_json_body(response).await?;

    let code = payload.get("code").and_then(Value::as_str).unwrap_or_default();
    if status.is_success() && code == SUCCESS_CODE {
        return Ok(payload.get("data").cloned().unwrap_or(Value::Null));
    }

    let message = payload
        .get("msg")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| payload.to_string());

    match status.as_u16() {
        401 | 403 => Err(ExchangeError::Authentication(message)),
        429 => Err(ExchangeError::RateLimit(message)),
        _ => Err(ExchangeError::Api {
            code: if code.is_empty() {
                status.as_u16().to_string()
            } else {
                code.to_string()
            },
            message,
        }),
    }
}

// Request bodies. Field order is the serialized (and signed) order.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetLeverageBody {
    symbol: String,
    margin_coin: &'static str,
    leverage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hold_side: Option<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetMarginModeBody {
    symbol: String,
    margin_coin: &'static str,
    margin_mode: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaceOrderBody {
    symbol: String,
    margin_coin: &'static str,
    size: String,
    side: &'static str,
    order_type: &'static str,
    client_oid: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrailStopBody {
    symbol: String,
    margin_coin: &'static str,
    trigger_price: String,
    trigger_type: &'static str,
    size: String,
    side: &'static str,
    range_rate: String,
}
