//! Account credentials
//!
//! An [`Account`] binds an operator-chosen identifier to one exchange and its API
//! credentials. Secrets are wrapped in `secrecy::Secret` so they never show up in
//! logs or debug output.

use crate::{ExchangeError, ExchangeId};
use secrecy::{ExposeSecret, Secret};

/// Exchange account with protected secrets
#[derive(Clone)]
pub struct Account {
    /// Account identifier referenced by incoming signals
    pub id: String,
    /// Exchange name as configured, lower-cased
    pub exchange: String,
    /// API key (public identifier)
    pub api_key: Secret<String>,
    /// API secret (never log or expose)
    pub api_secret: Secret<String>,
    /// Passphrase, required by passphrase-signed exchanges
    pub passphrase: Option<Secret<String>>,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("exchange", &self.exchange)
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .field(
                "passphrase",
                &self.passphrase.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Account {
    /// Create an account; an empty passphrase is treated as absent
    pub fn new(
        id: impl Into<String>,
        exchange: impl AsRef<str>,
        api_key: String,
        api_secret: String,
        passphrase: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            exchange: exchange.as_ref().trim().to_ascii_lowercase(),
            api_key: Secret::new(api_key),
            api_secret: Secret::new(api_secret),
            passphrase: passphrase.filter(|p| !p.is_empty()).map(Secret::new),
        }
    }

    /// Resolve the configured exchange name to a supported exchange
    pub fn exchange_id(&self) -> Result<ExchangeId, ExchangeError> {
        self.exchange.parse()
    }

    /// Validate that required credentials are present for the exchange type
    pub fn validate(&self) -> Result<(), ExchangeError> {
        if self.api_key.expose_secret().is_empty() {
            return Err(ExchangeError::Authentication(format!(
                "account {}: API key cannot be empty",
                self.id
            )));
        }

        if self.api_secret.expose_secret().is_empty() {
            return Err(ExchangeError::Authentication(format!(
                "account {}: API secret cannot be empty",
                self.id
            )));
        }

        match self.exchange_id()? {
            ExchangeId::Bitget if self.passphrase.is_none() => {
                Err(ExchangeError::Authentication(format!(
                    "account {}: Bitget credentials require a passphrase",
                    self.id
                )))
            }
            _ => Ok(()),
        }
    }

    /// Get the API key (exposes secret - use carefully)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Get the API secret (exposes secret - use carefully)
    pub fn api_secret(&self) -> &str {
        self.api_secret.expose_secret()
    }

    /// Get the passphrase if present (exposes secret - use carefully)
    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_ref().map(|s| s.expose_secret().as_str())
    }
}
