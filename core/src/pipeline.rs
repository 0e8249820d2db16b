//! Order execution pipeline
//!
//! Turns one [`TradeIntent`] into one submitted market order:
//!
//! `Init → LeverageSet → MarginModeSet → BalanceFetched → PriceFetched →
//! QuantityComputed → Submitted`
//!
//! Leverage and margin-mode failures are logged and the pipeline continues. Any
//! failure from the balance stage onwards is fatal and no order is sent. The
//! order response is returned verbatim, whether the exchange accepted the order
//! or rejected it. There are no retries.

use crate::error::{RelayError, RelayResult};
use crate::signal::TradeIntent;
use exchange_connectors::utils::client_order_id;
use exchange_connectors::{ExchangeConnector, MarketOrder, TrailingStopOrder};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info, info_span, warn, Instrument};

/// Decimal places of a computed order quantity
pub const QUANTITY_DECIMALS: u32 = 6;

/// Stages of the execution state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Init,
    LeverageSet,
    MarginModeSet,
    BalanceFetched,
    PriceFetched,
    QuantityComputed,
    Submitted,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Init => "init",
            PipelineStage::LeverageSet => "leverage_set",
            PipelineStage::MarginModeSet => "margin_mode_set",
            PipelineStage::BalanceFetched => "balance_fetched",
            PipelineStage::PriceFetched => "price_fetched",
            PipelineStage::QuantityComputed => "quantity_computed",
            PipelineStage::Submitted => "submitted",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one pipeline run
#[derive(Debug)]
pub enum OrderResult {
    /// The order call completed; `response` is the exchange's reply as received,
    /// which may itself be a business rejection
    Submitted {
        client_order_id: String,
        quantity: Decimal,
        response: Value,
    },
    /// The pipeline stopped at `stage` before or while submitting
    Failed {
        stage: PipelineStage,
        error: RelayError,
    },
}

impl OrderResult {
    pub fn is_submitted(&self) -> bool {
        matches!(self, OrderResult::Submitted { .. })
    }

    pub fn response(&self) -> Option<&Value> {
        match self {
            OrderResult::Submitted { response, .. } => Some(response),
            OrderResult::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&RelayError> {
        match self {
            OrderResult::Failed { error, .. } => Some(error),
            OrderResult::Submitted { .. } => None,
        }
    }
}

/// Whether leverage scales the committed notional before sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    /// `balance × pct / 100 / price`
    #[default]
    Notional,
    /// `balance × pct / 100 × leverage / price`
    Leveraged,
}

impl SizingMode {
    pub fn from_flag(apply_leverage: bool) -> Self {
        if apply_leverage {
            SizingMode::Leveraged
        } else {
            SizingMode::Notional
        }
    }
}

/// Order size in base units, rounded half-to-even to [`QUANTITY_DECIMALS`] places.
///
/// Callers reject non-positive prices before sizing; a zero or negative price
/// here yields [`RelayError::ZeroQuantity`].
pub fn compute_quantity(
    balance: Decimal,
    balance_percent: Decimal,
    price: Decimal,
    leverage: u32,
    mode: SizingMode,
) -> RelayResult<Decimal> {
    if balance <= Decimal::ZERO {
        return Err(RelayError::InsufficientBalance(balance));
    }
    if price <= Decimal::ZERO {
        return Err(RelayError::ZeroQuantity);
    }

    let overflow = || RelayError::invalid("bal_pct", "order notional overflows");
    let mut notional = balance
        .checked_mul(balance_percent)
        .ok_or_else(overflow)?
        / Decimal::ONE_HUNDRED;
    if mode == SizingMode::Leveraged {
        notional = notional
            .checked_mul(Decimal::from(leverage))
            .ok_or_else(overflow)?;
    }

    let quantity = notional
        .checked_div(price)
        .ok_or(RelayError::ZeroQuantity)?
        .round_dp(QUANTITY_DECIMALS);

    if quantity <= Decimal::ZERO {
        return Err(RelayError::ZeroQuantity);
    }
    Ok(quantity)
}

/// Run the pipeline for one intent against its account's connector.
pub async fn execute(
    connector: &dyn ExchangeConnector,
    intent: &TradeIntent,
    sizing: SizingMode,
) -> OrderResult {
    let client_order_id = client_order_id();
    let span = info_span!(
        "order",
        account = %intent.account,
        exchange = %intent.exchange,
        symbol = %intent.symbol,
        direction = %intent.direction,
        client_order_id = %client_order_id,
        order_id = tracing::field::Empty,
    );
    if let Some(order_id) = &intent.order_id {
        span.record("order_id", order_id.as_str());
    }

    run_stages(connector, intent, sizing, client_order_id)
        .instrument(span)
        .await
}

async fn run_stages(
    connector: &dyn ExchangeConnector,
    intent: &TradeIntent,
    sizing: SizingMode,
    client_order_id: String,
) -> OrderResult {
    let failed = |stage: PipelineStage, error: RelayError| {
        warn!(%stage, error = %error, "order pipeline aborted");
        OrderResult::Failed { stage, error }
    };

    debug!(stage = %PipelineStage::Init, "order pipeline started");

    match connector.set_leverage(&intent.symbol, intent.leverage).await {
        Ok(()) => debug!(stage = %PipelineStage::LeverageSet, leverage = intent.leverage, "leverage set"),
        Err(e) => {
            let warning = RelayError::LeverageSet(e);
            warn!(stage = %PipelineStage::LeverageSet, error = %warning, "continuing without leverage change");
        }
    }

    match connector
        .set_margin_mode(&intent.symbol, intent.margin_type, intent.leverage)
        .await
    {
        Ok(()) => debug!(stage = %PipelineStage::MarginModeSet, margin = %intent.margin_type, "margin mode set"),
        Err(e) => {
            let warning = RelayError::MarginMode(e);
            warn!(stage = %PipelineStage::MarginModeSet, error = %warning, "continuing without margin mode change");
        }
    }

    let balance = match connector.get_available_balance().await {
        Ok(balance) if balance > Decimal::ZERO => balance,
        Ok(balance) => {
            return failed(
                PipelineStage::BalanceFetched,
                RelayError::InsufficientBalance(balance),
            )
        }
        Err(e) => return failed(PipelineStage::BalanceFetched, RelayError::BalanceFetch(e)),
    };
    debug!(stage = %PipelineStage::BalanceFetched, %balance, "balance fetched");

    let price = match connector.get_last_price(&intent.symbol).await {
        Ok(price) if price > Decimal::ZERO => price,
        Ok(price) => {
            return failed(
                PipelineStage::PriceFetched,
                RelayError::PriceFetch {
                    symbol: intent.symbol.clone(),
                    reason: format!("exchange reported non-positive price {price}"),
                },
            )
        }
        Err(e) => {
            return failed(
                PipelineStage::PriceFetched,
                RelayError::PriceFetch {
                    symbol: intent.symbol.clone(),
                    reason: e.to_string(),
                },
            )
        }
    };
    debug!(stage = %PipelineStage::PriceFetched, %price, "price fetched");

    let quantity = match compute_quantity(
        balance,
        intent.balance_percent,
        price,
        intent.leverage,
        sizing,
    ) {
        Ok(quantity) => quantity,
        Err(e) => return failed(PipelineStage::QuantityComputed, e),
    };
    debug!(stage = %PipelineStage::QuantityComputed, %quantity, ?sizing, "quantity computed");

    let order = MarketOrder {
        symbol: intent.symbol.clone(),
        direction: intent.direction,
        quantity,
        margin_type: intent.margin_type,
        client_order_id: client_order_id.clone(),
        reduce_only: intent.is_close(),
    };
    let response = match connector.place_market_order(&order).await {
        Ok(response) => response,
        Err(e) => return failed(PipelineStage::Submitted, RelayError::OrderSubmit(e)),
    };
    info!(stage = %PipelineStage::Submitted, %quantity, %response, "order submitted");

    if let (Some(trailing), false) = (&intent.trailing_stop, intent.is_close()) {
        let stop = TrailingStopOrder {
            symbol: intent.symbol.clone(),
            direction: intent.direction,
            quantity,
            callback: trailing.callback,
            activation_price: trailing.activation_price.unwrap_or(price),
        };
        match connector.place_trailing_stop(&stop).await {
            Ok(stop_response) => info!(response = %stop_response, "trailing stop placed"),
            Err(e) => warn!(error = %e, "trailing stop was not placed"),
        }
    }

    OrderResult::Submitted {
        client_order_id,
        quantity,
        response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quantity_follows_the_sizing_formula() {
        let qty = compute_quantity(dec!(1000), dec!(10), dec!(50000), 5, SizingMode::Notional).unwrap();
        assert_eq!(qty, dec!(0.002));

        let qty = compute_quantity(dec!(1000), dec!(10), dec!(50000), 5, SizingMode::Leveraged).unwrap();
        assert_eq!(qty, dec!(0.010));
    }

    #[test]
    fn quantity_rounds_half_to_even_at_six_places() {
        // 1 × 100% / 8 = 0.125 → exact, no rounding
        assert_eq!(
            compute_quantity(dec!(1), dec!(100), dec!(8), 1, SizingMode::Notional).unwrap(),
            dec!(0.125)
        );
        // 0.0000025 rounds to the even neighbour 0.000002
        assert_eq!(
            compute_quantity(dec!(0.0000025), dec!(100), dec!(1), 1, SizingMode::Notional).unwrap(),
            dec!(0.000002)
        );
        // 1 / 3 truncates to six places
        assert_eq!(
            compute_quantity(dec!(1), dec!(100), dec!(3), 1, SizingMode::Notional).unwrap(),
            dec!(0.333333)
        );
    }

    #[test]
    fn dust_quantity_is_rejected() {
        let err = compute_quantity(dec!(1), dec!(1), dec!(60000), 1, SizingMode::Notional).unwrap_err();
        assert!(matches!(err, RelayError::ZeroQuantity));
    }

    #[test]
    fn empty_balance_is_insufficient() {
        let err = compute_quantity(dec!(0), dec!(10), dec!(100), 1, SizingMode::Notional).unwrap_err();
        assert!(matches!(err, RelayError::InsufficientBalance(b) if b.is_zero()));
        let err = compute_quantity(dec!(-5), dec!(10), dec!(100), 1, SizingMode::Notional).unwrap_err();
        assert!(matches!(err, RelayError::InsufficientBalance(_)));
    }

    #[test]
    fn zero_price_never_divides() {
        let err = compute_quantity(dec!(1000), dec!(10), dec!(0), 1, SizingMode::Notional).unwrap_err();
        assert!(matches!(err, RelayError::ZeroQuantity));
    }

    #[test]
    fn sizing_mode_from_flag() {
        assert_eq!(SizingMode::from_flag(false), SizingMode::Notional);
        assert_eq!(SizingMode::from_flag(true), SizingMode::Leveraged);
        assert_eq!(SizingMode::default(), SizingMode::Notional);
    }

    #[test]
    fn stage_names_are_snake_case() {
        assert_eq!(PipelineStage::QuantityComputed.to_string(), "quantity_computed");
        assert_eq!(PipelineStage::Init.as_str(), "init");
    }
}
