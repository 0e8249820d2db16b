//! # TVM relay core
//!
//! Everything between an inbound alert and an exchange order:
//!
//! - [`signal`]: parses `TVM:<json>:MVT` envelopes into a validated [`TradeIntent`]
//! - [`registry`]: per-account exchange credentials, loaded once
//! - [`pipeline`]: the leverage → margin → balance → price → size → submit sequence
//! - [`dispatcher`]: account resolution and fire-and-forget pipeline launch
//!
//! Exchange I/O and request signing live in the `exchange-connectors` crate.

pub mod dispatcher;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod signal;

pub use dispatcher::{
    Acknowledgement, ConnectorFactory, Dispatched, Dispatcher, DispatcherConfig,
    ExchangeEndpoints, HttpConnectorFactory,
};
pub use error::{RelayError, RelayResult};
pub use pipeline::{compute_quantity, OrderResult, PipelineStage, SizingMode};
pub use registry::AccountRegistry;
pub use signal::{normalize_symbol, parse_envelope, resolve_direction, TradeIntent, TrailingStop};
