//! Alert envelope parsing
//!
//! Alerts arrive as `TVM:<json object>:MVT`. The JSON fields and their defaults:
//!
//! | field            | default   |
//! |------------------|-----------|
//! | `exchange`       | `""`      |
//! | `account`        | `""`      |
//! | `symbol`         | `""` (falls back to `token`) |
//! | `side`           | `""` (falls back to `memo`) |
//! | `bal_pct`        | `0` (falls back to `memo`) |
//! | `leverage`       | `1`       |
//! | `margin_type`    | `"cross"` |
//! | `trailing_stop`  | `0`       |
//! | `ts_ac_price`    | `0`       |
//! | `position_close` | `false`   |
//! | `orderid`        | none      |
//! | `memo`           | `""`      |
//!
//! Numeric fields accept JSON numbers or numeric strings. Defaults that would
//! produce a nonsensical order (no account, zero balance share) are rejected
//! instead of silently trading. Unknown fields such as `same_order` are ignored.
//!
//! Older alert templates carry the instruction in a free-text `memo` such as
//! `"매수 30%"` (buy 30%). It is only read when `side` or `bal_pct` is absent;
//! a memo without a percentage commits [`MEMO_DEFAULT_PERCENT`].

use crate::error::{RelayError, RelayResult};
use exchange_connectors::{Direction, ExchangeId, MarginType};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;

pub const ENVELOPE_PREFIX: &str = "TVM:";
pub const ENVELOPE_SUFFIX: &str = ":MVT";

/// Quote currency appended to a bare `BASE/` pair
pub const DEFAULT_QUOTE: &str = "USDT";

/// Balance share for a memo-style alert that names no percentage
pub const MEMO_DEFAULT_PERCENT: Decimal = Decimal::TEN;

const MAX_BALANCE_PERCENT: Decimal = Decimal::ONE_HUNDRED;

/// Korean trading words used in memos, with the side words they stand for
const MEMO_WORDS: [(&str, &str); 3] = [("매수", "buy"), ("매도", "sell"), ("청산", "close")];

/// Trailing stop requested alongside an opening order
#[derive(Debug, Clone, PartialEq)]
pub struct TrailingStop {
    /// Callback in the exchange's native unit
    pub callback: Decimal,
    /// Price at which the stop arms; `None` means the current price
    pub activation_price: Option<Decimal>,
}

/// A fully validated trading instruction
#[derive(Debug, Clone, PartialEq)]
pub struct TradeIntent {
    pub exchange: ExchangeId,
    pub account: String,
    /// Normalized, quote-suffixed symbol such as `BTCUSDT`
    pub symbol: String,
    pub direction: Direction,
    /// Share of the available balance to commit, in (0, 100]
    pub balance_percent: Decimal,
    pub leverage: u32,
    pub margin_type: MarginType,
    pub trailing_stop: Option<TrailingStop>,
    pub position_close: bool,
    /// Caller's reference for the alert, echoed back and logged
    pub order_id: Option<String>,
}

impl TradeIntent {
    pub fn is_close(&self) -> bool {
        self.direction.is_close()
    }
}

/// Parse and validate an alert envelope.
pub fn parse_envelope(message: &str) -> RelayResult<TradeIntent> {
    let trimmed = message.trim();
    let inner = trimmed
        .strip_prefix(ENVELOPE_PREFIX)
        .and_then(|rest| rest.strip_suffix(ENVELOPE_SUFFIX))
        .ok_or_else(|| RelayError::Format(preview(trimmed)))?;

    let fields = match serde_json::from_str::<Value>(inner) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Err(RelayError::MalformedPayload(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            )))
        }
        Err(e) => return Err(RelayError::MalformedPayload(e.to_string())),
    };

    intent_from_fields(&fields)
}

fn intent_from_fields(fields: &Map<String, Value>) -> RelayResult<TradeIntent> {
    let exchange_name = text_field(fields, "exchange")?;
    let exchange = ExchangeId::from_str(&exchange_name)
        .map_err(|_| RelayError::UnsupportedExchange(exchange_name.clone()))?;

    let account = text_field(fields, "account")?;
    if account.is_empty() {
        return Err(RelayError::invalid("account", "must not be empty"));
    }

    let mut raw_symbol = text_field(fields, "symbol")?;
    if raw_symbol.is_empty() {
        raw_symbol = text_field(fields, "token")?;
    }
    let symbol = normalize_symbol(&raw_symbol);
    if symbol.is_empty() {
        return Err(RelayError::invalid("symbol", "must not be empty"));
    }
    if !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(RelayError::invalid(
            "symbol",
            format!("{symbol:?} must contain only ASCII letters and digits"),
        ));
    }

    let memo = text_field(fields, "memo")?;
    let position_close = bool_field(fields, "position_close")?;
    let mut side = text_field(fields, "side")?;
    if side.is_empty() {
        side = memo_side(&memo);
    }
    let direction = if position_close && !side.to_ascii_lowercase().contains("close") {
        resolve_direction(&format!("{side} close"))?
    } else {
        resolve_direction(&side)?
    };

    let balance_percent = match optional_decimal_field(fields, "bal_pct")? {
        Some(percent) => percent,
        None if !memo.is_empty() => memo_percent(&memo).unwrap_or(MEMO_DEFAULT_PERCENT),
        None => Decimal::ZERO,
    };
    if balance_percent <= Decimal::ZERO || balance_percent > MAX_BALANCE_PERCENT {
        return Err(RelayError::invalid(
            "bal_pct",
            format!("{balance_percent} is outside (0, 100]"),
        ));
    }

    let leverage = leverage_field(fields)?;

    let margin_name = text_field(fields, "margin_type")?;
    let margin_type = if margin_name.is_empty() {
        MarginType::default()
    } else {
        MarginType::from_str(&margin_name)
            .map_err(|_| RelayError::invalid("margin_type", format!("unknown value {margin_name:?}")))?
    };

    let callback = decimal_field(fields, "trailing_stop", Decimal::ZERO)?;
    if callback < Decimal::ZERO {
        return Err(RelayError::invalid("trailing_stop", "must not be negative"));
    }
    let activation = decimal_field(fields, "ts_ac_price", Decimal::ZERO)?;
    let trailing_stop = (callback > Decimal::ZERO).then(|| TrailingStop {
        callback,
        activation_price: (activation > Decimal::ZERO).then_some(activation),
    });

    let order_id = Some(text_field(fields, "orderid")?).filter(|id| !id.is_empty());

    Ok(TradeIntent {
        exchange,
        account,
        symbol,
        direction,
        balance_percent,
        leverage,
        margin_type,
        trailing_stop,
        position_close,
        order_id,
    })
}

/// Side words of a memo, with Korean trading terms translated
fn memo_side(memo: &str) -> String {
    MEMO_WORDS
        .iter()
        .fold(memo.to_string(), |text, &(word, side)| text.replace(word, side))
}

/// The number right before the first `%` of a memo, e.g. 30 in `"매수 30%"`
fn memo_percent(memo: &str) -> Option<Decimal> {
    let (head, _) = memo.split_once('%')?;
    let number = head.split_whitespace().last()?;
    Decimal::from_str(number).ok()
}

/// Resolve the `side` text of an alert to a position direction.
///
/// Matching is case-insensitive and looks for the words anywhere in the text,
/// so `"buy"`, `"BUY_CLOSE"` and `"sell close"` all resolve.
pub fn resolve_direction(side: &str) -> RelayResult<Direction> {
    let side_lower = side.to_ascii_lowercase();
    let close = side_lower.contains("close");

    if side_lower.contains("buy") {
        Ok(if close {
            Direction::CloseShort
        } else {
            Direction::OpenLong
        })
    } else if side_lower.contains("sell") {
        Ok(if close {
            Direction::CloseLong
        } else {
            Direction::OpenShort
        })
    } else {
        Err(RelayError::UnknownSide(side.to_string()))
    }
}

/// Normalize an alert symbol to the exchange form, e.g. `btc/usdt` to `BTCUSDT`.
///
/// Upper-cases, drops whitespace and joins a `BASE/QUOTE` pair. A bare `BASE/`
/// gets [`DEFAULT_QUOTE`]. Input without a separator is taken as already
/// quote-suffixed. Applying it twice gives the same result as applying it once.
pub fn normalize_symbol(raw: &str) -> String {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();

    match compact.split_once('/') {
        None => compact,
        Some((base, quote)) => {
            let quote = quote.replace('/', "");
            if quote.is_empty() {
                format!("{base}{DEFAULT_QUOTE}")
            } else {
                format!("{base}{quote}")
            }
        }
    }
}

fn text_field(fields: &Map<String, Value>, name: &'static str) -> RelayResult<String> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(RelayError::invalid(
            name,
            format!("expected text, got {}", json_kind(other)),
        )),
    }
}

fn decimal_field(
    fields: &Map<String, Value>,
    name: &'static str,
    default: Decimal,
) -> RelayResult<Decimal> {
    Ok(optional_decimal_field(fields, name)?.unwrap_or(default))
}

/// `None` when the field is missing, null or blank
fn optional_decimal_field(
    fields: &Map<String, Value>,
    name: &'static str,
) -> RelayResult<Option<Decimal>> {
    let text = match fields.get(name) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => {
            return Err(RelayError::invalid(
                name,
                format!("expected a number, got {}", json_kind(other)),
            ))
        }
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map(Some)
        .map_err(|_| RelayError::invalid(name, format!("{text:?} is not a number")))
}

fn leverage_field(fields: &Map<String, Value>) -> RelayResult<u32> {
    let leverage = decimal_field(fields, "leverage", Decimal::ONE)?;
    if leverage < Decimal::ONE || !leverage.fract().is_zero() {
        return Err(RelayError::invalid(
            "leverage",
            format!("{leverage} is not a whole number of at least 1"),
        ));
    }
    leverage
        .to_u32()
        .ok_or_else(|| RelayError::invalid("leverage", format!("{leverage} is too large")))
}

fn bool_field(fields: &Map<String, Value>, name: &'static str) -> RelayResult<bool> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Number(n)) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "" | "false" | "0" | "no" => Ok(false),
            "true" | "1" | "yes" => Ok(true),
            other => Err(RelayError::invalid(name, format!("{other:?} is not a boolean"))),
        },
        Some(other) => Err(RelayError::invalid(
            name,
            format!("expected a boolean, got {}", json_kind(other)),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Short excerpt of a rejected message for error reports
fn preview(message: &str) -> String {
    const MAX_CHARS: usize = 48;
    if message.chars().count() <= MAX_CHARS {
        message.to_string()
    } else {
        let head: String = message.chars().take(MAX_CHARS).collect();
        format!("{head}...")
    }
}
