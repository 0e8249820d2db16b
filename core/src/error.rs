//! Error taxonomy for the relay core.

use exchange_connectors::ExchangeError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised while turning an alert envelope into a submitted order
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("message is not a TVM envelope: {0}")]
    Format(String),

    #[error("malformed signal payload: {0}")]
    MalformedPayload(String),

    #[error("unknown side: {0:?}")]
    UnknownSide(String),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("unsupported exchange: {0}")]
    UnsupportedExchange(String),

    #[error("account {account} cannot sign requests: {reason}")]
    AccountCredentials { account: String, reason: String },

    #[error("relay at capacity: {0} orders in flight")]
    Busy(usize),

    #[error("failed to set leverage: {0}")]
    LeverageSet(#[source] ExchangeError),

    #[error("failed to set margin mode: {0}")]
    MarginMode(#[source] ExchangeError),

    #[error("failed to fetch balance: {0}")]
    BalanceFetch(#[source] ExchangeError),

    #[error("insufficient balance: {0} USDT available")]
    InsufficientBalance(Decimal),

    #[error("failed to fetch price for {symbol}: {reason}")]
    PriceFetch { symbol: String, reason: String },

    #[error("computed order quantity rounds to zero")]
    ZeroQuantity,

    #[error("order submission failed: {0}")]
    OrderSubmit(#[source] ExchangeError),
}

pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        RelayError::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Errors that reject the inbound request before any exchange call
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RelayError::Format(_)
                | RelayError::MalformedPayload(_)
                | RelayError::UnknownSide(_)
                | RelayError::InvalidField { .. }
                | RelayError::AccountNotFound(_)
                | RelayError::UnsupportedExchange(_)
                | RelayError::AccountCredentials { .. }
        )
    }
}
