//! Exchange Connectors for the TVM relay
//!
//! This crate provides signed REST connectors for:
//! - Bitget USDT-M futures (passphrase-signed, "family A")
//! - Bybit v5 linear contracts (recv-window-signed, "family B")
//!
//! All connectors implement the `ExchangeConnector` trait so the order pipeline
//! never branches on the exchange name.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

pub mod bitget;
pub mod bybit;
pub mod credentials;
pub mod signing;

pub use credentials::Account;

/// Default per-call network timeout for exchange requests.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Exchange connector error types
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Exchange API error: {code} - {message}")]
    Api { code: String, message: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Symbol not supported: {0}")]
    UnsupportedSymbol(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Unique identifiers for supported exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Bitget,
    Bybit,
}

impl ExchangeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Bitget => "bitget",
            ExchangeId::Bybit => "bybit",
        }
    }

    /// Signature family used by the exchange's private REST API
    pub fn signature_scheme(&self) -> signing::SignatureScheme {
        match self {
            ExchangeId::Bitget => signing::SignatureScheme::Passphrase,
            ExchangeId::Bybit => signing::SignatureScheme::RecvWindow,
        }
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeId {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bitget" => Ok(ExchangeId::Bitget),
            "bybit" => Ok(ExchangeId::Bybit),
            other => Err(ExchangeError::Configuration(format!(
                "unsupported exchange: {other:?}"
            ))),
        }
    }
}

/// Position direction carried by a trade signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::OpenLong => "open_long",
            Direction::OpenShort => "open_short",
            Direction::CloseLong => "close_long",
            Direction::CloseShort => "close_short",
        }
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Direction::CloseLong | Direction::CloseShort)
    }

    /// The direction that unwinds a position opened in this direction
    pub fn closing(&self) -> Direction {
        match self {
            Direction::OpenLong | Direction::CloseLong => Direction::CloseLong,
            Direction::OpenShort | Direction::CloseShort => Direction::CloseShort,
        }
    }

    /// Order side on exchanges that only know buy/sell
    pub fn order_side(&self) -> OrderSide {
        match self {
            Direction::OpenLong | Direction::CloseShort => OrderSide::Buy,
            Direction::OpenShort | Direction::CloseLong => OrderSide::Sell,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order side enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Position margining style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginType {
    #[default]
    Cross,
    Isolated,
}

impl FromStr for MarginType {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cross" | "crossed" => Ok(MarginType::Cross),
            "isolated" | "fixed" => Ok(MarginType::Isolated),
            other => Err(ExchangeError::InvalidRequest(format!(
                "unknown margin type: {other:?}"
            ))),
        }
    }
}

impl fmt::Display for MarginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarginType::Cross => f.write_str("cross"),
            MarginType::Isolated => f.write_str("isolated"),
        }
    }
}

/// A sized market order ready for submission
#[derive(Debug, Clone, PartialEq)]
pub struct MarketOrder {
    pub symbol: String,
    pub direction: Direction,
    pub quantity: Decimal,
    pub margin_type: MarginType,
    pub client_order_id: String,
    /// Forces reduce-only semantics on exchanges without native close sides
    pub reduce_only: bool,
}

/// Trailing stop attached to a freshly opened position
#[derive(Debug, Clone, PartialEq)]
pub struct TrailingStopOrder {
    pub symbol: String,
    /// Direction of the position being protected
    pub direction: Direction,
    pub quantity: Decimal,
    /// Callback in the exchange's native unit (Bitget: range rate, Bybit: price distance)
    pub callback: Decimal,
    pub activation_price: Decimal,
}

/// Capability set every exchange adapter provides to the order pipeline
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Get exchange identifier
    fn exchange_id(&self) -> ExchangeId;

    /// Configure leverage for a symbol
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()>;

    /// Configure margin mode for a symbol
    async fn set_margin_mode(
        &self,
        symbol: &str,
        margin_type: MarginType,
        leverage: u32,
    ) -> ExchangeResult<()>;

    /// Available USDT balance usable for new positions
    async fn get_available_balance(&self) -> ExchangeResult<Decimal>;

    /// Last traded price of a symbol
    async fn get_last_price(&self, symbol: &str) -> ExchangeResult<Decimal>;

    /// Submit a market order; returns the exchange response verbatim
    async fn place_market_order(&self, order: &MarketOrder) -> ExchangeResult<serde_json::Value>;

    /// Arm a trailing stop for an open position; returns the exchange response verbatim
    async fn place_trailing_stop(
        &self,
        order: &TrailingStopOrder,
    ) -> ExchangeResult<serde_json::Value>;
}

/// Rate limiter for API calls
pub struct RateLimiter {
    governor: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        use governor::{Quota, RateLimiter as GovernorRateLimiter};
        use std::num::NonZeroU32;

        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let limiter = GovernorRateLimiter::direct(Quota::per_second(per_second));

        Self { governor: limiter }
    }

    pub async fn acquire(&self) -> ExchangeResult<()> {
        self.governor.until_ready().await;
        Ok(())
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

/// Utility functions for exchange implementations
pub mod utils {
    use super::*;

    static LAST_ORDER_NANOS: AtomicU64 = AtomicU64::new(0);

    /// Tag prefixed to every client order identifier
    pub const CLIENT_ORDER_TAG: &str = "tvm";

    /// Generate a client order identifier: protocol tag + nanosecond timestamp.
    ///
    /// The timestamp component is strictly increasing within the process, so two
    /// orders submitted in the same nanosecond still get distinct identifiers.
    pub fn client_order_id() -> String {
        let now = chrono::Utc::now()
            .timestamp_nanos_opt()
            .map(|n| n as u64)
            .unwrap_or_default();
        let nanos = next_monotonic(&LAST_ORDER_NANOS, now);
        format!("{CLIENT_ORDER_TAG}{nanos}")
    }

    /// Returns `max(candidate, last + 1)` and stores it as the new `last`.
    pub(crate) fn next_monotonic(last: &AtomicU64, candidate: u64) -> u64 {
        let mut prev = last.load(Ordering::Relaxed);
        loop {
            let next = candidate.max(prev + 1);
            match last.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Format a decimal for an exchange request, dropping trailing zeros
    pub fn decimal_to_string(value: Decimal) -> String {
        value.normalize().to_string()
    }

    /// Parse a decimal carried as a JSON string (or number)
    pub fn parse_decimal(value: Option<&serde_json::Value>, field: &str) -> ExchangeResult<Decimal> {
        let value = value.ok_or_else(|| ExchangeError::Decode(format!("missing field {field}")))?;
        let parsed = match value {
            serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
            serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            _ => None,
        };
        parsed.ok_or_else(|| ExchangeError::Decode(format!("field {field} is not a decimal: {value}")))
    }

    /// Build the shared HTTP client with a bounded per-call timeout
    pub fn http_client(timeout: std::time::Duration) -> ExchangeResult<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExchangeError::Configuration(format!("failed to build HTTP client: {e}")))
    }

    /// Read a response body as JSON, keeping non-JSON bodies as a string value
    pub async fn read_json_body(response: reqwest::Response) -> ExchangeResult<serde_json::Value> {
        let text = response
            .text()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;
        Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
    }
}
