//! # TVM Relay
//!
//! Receives `TVM:<json>:MVT` alert envelopes over HTTP and turns each one into a
//! signed market order on Bitget or Bybit.
//!
//! ## Architecture
//!
//! The workspace is organized into modular crates:
//! - `tvm-relay` (this crate): configuration and the webhook listener
//! - `core`: envelope parsing, account registry, order pipeline, dispatcher
//! - `crates/exchange-connectors`: request signing and exchange adapters
//!
//! ## Quick Start
//!
//! ```text
//! RELAY_ACCOUNTS="A1,bitget,KEY,SECRET,PASSPHRASE" tvm-relay --bind 0.0.0.0:8080
//!
//! curl -X POST localhost:8080/order -H 'content-type: application/json' \
//!   -d '{"message":"TVM:{\"exchange\":\"bitget\",\"account\":\"A1\",\"symbol\":\"BTC/USDT\",\"side\":\"buy\",\"bal_pct\":10,\"leverage\":5}:MVT"}'
//! ```

pub mod config;
pub mod web;

pub use config::RelayConfig;
