//! Dispatcher: resolves an intent's account and launches its pipeline.
//!
//! `dispatch` validates synchronously and returns an [`Acknowledgement`] without
//! waiting for any exchange call. The pipeline itself runs as its own Tokio task.
//! At most `max_in_flight` pipelines run at once and pipelines for the same
//! account run one after another.

use crate::error::{RelayError, RelayResult};
use crate::pipeline::{self, OrderResult, SizingMode};
use crate::registry::AccountRegistry;
use crate::signal::TradeIntent;
use dashmap::DashMap;
use exchange_connectors::bitget::BitgetConnector;
use exchange_connectors::bybit::BybitConnector;
use exchange_connectors::utils::http_client;
use exchange_connectors::{
    Account, ExchangeConnector, ExchangeId, ExchangeResult, DEFAULT_REQUEST_TIMEOUT_SECS,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Status reported for every accepted signal
pub const ACCEPTED: &str = "accepted";

/// Builds the connector an account's pipeline talks to
pub trait ConnectorFactory: Send + Sync {
    fn connector(&self, account: &Account) -> ExchangeResult<Arc<dyn ExchangeConnector>>;
}

/// Base URL overrides; `None` keeps the exchange's production host
#[derive(Debug, Clone, Default)]
pub struct ExchangeEndpoints {
    pub bitget: Option<String>,
    pub bybit: Option<String>,
}

/// Production factory: signed REST connectors sharing one HTTP client.
///
/// Connectors are cached per account id, so each account keeps a single rate
/// limiter for the life of the process.
pub struct HttpConnectorFactory {
    client: reqwest::Client,
    endpoints: ExchangeEndpoints,
    cache: DashMap<String, Arc<dyn ExchangeConnector>>,
}

impl HttpConnectorFactory {
    pub fn new(request_timeout: Duration, endpoints: ExchangeEndpoints) -> ExchangeResult<Self> {
        Ok(Self {
            client: http_client(request_timeout)?,
            endpoints,
            cache: DashMap::new(),
        })
    }

    fn build(&self, account: &Account) -> ExchangeResult<Arc<dyn ExchangeConnector>> {
        let connector: Arc<dyn ExchangeConnector> = match account.exchange_id()? {
            ExchangeId::Bitget => {
                let connector = BitgetConnector::with_client(account, self.client.clone())?;
                match &self.endpoints.bitget {
                    Some(url) => Arc::new(connector.with_base_url(url.as_str())),
                    None => Arc::new(connector),
                }
            }
            ExchangeId::Bybit => {
                let connector = BybitConnector::with_client(account, self.client.clone())?;
                match &self.endpoints.bybit {
                    Some(url) => Arc::new(connector.with_base_url(url.as_str())),
                    None => Arc::new(connector),
                }
            }
        };
        Ok(connector)
    }
}

impl Default for HttpConnectorFactory {
    fn default() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            endpoints: ExchangeEndpoints::default(),
            cache: DashMap::new(),
        }
    }
}

impl ConnectorFactory for HttpConnectorFactory {
    fn connector(&self, account: &Account) -> ExchangeResult<Arc<dyn ExchangeConnector>> {
        if let Some(cached) = self.cache.get(&account.id) {
            return Ok(cached.value().clone());
        }
        let connector = self.build(account)?;
        Ok(self
            .cache
            .entry(account.id.clone())
            .or_insert(connector)
            .value()
            .clone())
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on concurrently running pipelines
    pub max_in_flight: usize,
    pub sizing: SizingMode,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            sizing: SizingMode::default(),
        }
    }
}

/// Returned to the caller as soon as a pipeline is launched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Acknowledgement {
    pub status: &'static str,
    pub account: String,
    pub exchange: ExchangeId,
    pub symbol: String,
    /// The alert's `orderid`, echoed so callers can match replies to alerts
    #[serde(rename = "orderid", skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

/// An accepted signal and the handle of its running pipeline
#[derive(Debug)]
pub struct Dispatched {
    pub ack: Acknowledgement,
    /// Resolves to the pipeline outcome; dropping it detaches the task
    pub task: JoinHandle<OrderResult>,
}

pub struct Dispatcher {
    registry: Arc<AccountRegistry>,
    factory: Arc<dyn ConnectorFactory>,
    permits: Arc<Semaphore>,
    account_locks: DashMap<String, Arc<Mutex<()>>>,
    config: DispatcherConfig,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("accounts", &self.registry.len())
            .field("available_permits", &self.permits.available_permits())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        registry: Arc<AccountRegistry>,
        factory: Arc<dyn ConnectorFactory>,
        config: DispatcherConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            registry,
            factory,
            permits,
            account_locks: DashMap::new(),
            config,
        }
    }

    pub fn registry(&self) -> &AccountRegistry {
        &self.registry
    }

    /// Number of pipelines that can still start right now
    pub fn available_capacity(&self) -> usize {
        self.permits.available_permits()
    }

    /// Validate the intent against its account and launch the pipeline.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch(&self, intent: TradeIntent) -> RelayResult<Dispatched> {
        let account = self.registry.get(&intent.account)?;

        let account_exchange = account
            .exchange_id()
            .map_err(|_| RelayError::UnsupportedExchange(account.exchange.clone()))?;
        if account_exchange != intent.exchange {
            return Err(RelayError::UnsupportedExchange(format!(
                "account {} trades on {}, signal targets {}",
                account.id, account_exchange, intent.exchange
            )));
        }

        let connector = self
            .factory
            .connector(account)
            .map_err(|e| RelayError::AccountCredentials {
                account: account.id.clone(),
                reason: e.to_string(),
            })?;

        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| RelayError::Busy(self.config.max_in_flight))?;

        let account_lock = self
            .account_locks
            .entry(account.id.clone())
            .or_default()
            .value()
            .clone();

        let ack = Acknowledgement {
            status: ACCEPTED,
            account: intent.account.clone(),
            exchange: intent.exchange,
            symbol: intent.symbol.clone(),
            order_id: intent.order_id.clone(),
        };
        info!(
            account = %ack.account,
            exchange = %ack.exchange,
            symbol = %ack.symbol,
            direction = %intent.direction,
            order_id = ack.order_id.as_deref().unwrap_or("-"),
            "signal accepted"
        );

        let sizing = self.config.sizing;
        let task = tokio::spawn(async move {
            let _permit = permit;
            let _serialized = account_lock.lock().await;

            let result = pipeline::execute(connector.as_ref(), &intent, sizing).await;
            match &result {
                OrderResult::Submitted {
                    client_order_id,
                    quantity,
                    ..
                } => info!(
                    account = %intent.account,
                    %client_order_id,
                    %quantity,
                    "order pipeline finished"
                ),
                OrderResult::Failed { stage, error } => error!(
                    account = %intent.account,
                    symbol = %intent.symbol,
                    %stage,
                    %error,
                    "order pipeline failed"
                ),
            }
            result
        });

        Ok(Dispatched { ack, task })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<AccountRegistry> {
        Arc::new(AccountRegistry::parse(
            "A1,bitget,key,secret,pass\nB1,bybit,key,secret\nA2,bitget,key,secret\n",
        ))
    }

    #[test]
    fn http_factory_caches_connectors_per_account() {
        let registry = registry();
        let factory = HttpConnectorFactory::default();
        let account = registry.get("B1").unwrap();

        let first = factory.connector(account).unwrap();
        let second = factory.connector(account).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.exchange_id(), ExchangeId::Bybit);
    }

    #[test]
    fn http_factory_rejects_bitget_without_passphrase() {
        let registry = registry();
        let factory = HttpConnectorFactory::default();
        assert!(factory.connector(registry.get("A2").unwrap()).is_err());
    }

    #[test]
    fn capacity_is_at_least_one() {
        let dispatcher = Dispatcher::new(
            registry(),
            Arc::new(HttpConnectorFactory::default()),
            DispatcherConfig {
                max_in_flight: 0,
                sizing: SizingMode::Notional,
            },
        );
        assert_eq!(dispatcher.available_capacity(), 1);
    }
}
