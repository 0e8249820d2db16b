//! Request signing for exchange private endpoints
//!
//! Two HMAC-SHA256 families are supported:
//! - `Passphrase` (Bitget): `hex(HMAC(secret, timestamp + METHOD + path + body))`
//! - `RecvWindow` (Bybit): `hex(HMAC(secret, api_key + timestamp + recv_window + params))`
//!
//! Every signed call takes a fresh timestamp from [`fresh_timestamp`], which is
//! strictly increasing across the whole process.

use crate::credentials::Account;
use crate::utils::next_monotonic;
use crate::{ExchangeError, ExchangeResult};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::fmt;
use std::sync::atomic::AtomicU64;

type HmacSha256 = Hmac<Sha256>;

/// Receive window sent with every recv-window-signed request, in milliseconds
pub const RECV_WINDOW: &str = "5000";

static LAST_TIMESTAMP_MS: AtomicU64 = AtomicU64::new(0);

/// Signature family of an exchange's private REST API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// Key + passphrase + HMAC over the request line and body
    Passphrase,
    /// Key + HMAC over key, timestamp, receive window and parameters
    RecvWindow,
}

/// Millisecond timestamp for a signed call. Never returns the same value twice.
pub fn fresh_timestamp() -> String {
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
    next_monotonic(&LAST_TIMESTAMP_MS, now).to_string()
}

fn hmac_hex(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Passphrase-family signature over `timestamp + METHOD + path + body`.
///
/// `path` includes the query string for GET requests; `body` is empty for
/// bodyless requests.
pub fn passphrase_signature(
    secret: &str,
    timestamp: &str,
    method: &Method,
    path: &str,
    body: &str,
) -> String {
    let prehash = format!("{}{}{}{}", timestamp, method.as_str().to_uppercase(), path, body);
    hmac_hex(secret, &prehash)
}

/// Recv-window-family signature over `api_key + timestamp + recv_window + params`.
pub fn recv_window_signature(
    secret: &str,
    api_key: &str,
    timestamp: &str,
    recv_window: &str,
    params: &str,
) -> String {
    let prehash = format!("{api_key}{timestamp}{recv_window}{params}");
    hmac_hex(secret, &prehash)
}

/// A request line plus the signature computed for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub method: Method,
    /// Path including the query string, exactly as sent
    pub path: String,
    /// Canonical payload that was signed (JSON body or query string)
    pub payload: String,
    pub timestamp: String,
    pub signature: String,
}

/// Signs requests for one account under one signature family
#[derive(Clone)]
pub struct RequestSigner {
    scheme: SignatureScheme,
    api_key: Secret<String>,
    api_secret: Secret<String>,
    passphrase: Option<Secret<String>>,
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("scheme", &self.scheme)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    /// Build a signer from account credentials.
    ///
    /// The passphrase family refuses accounts configured without a passphrase.
    pub fn new(account: &Account, scheme: SignatureScheme) -> ExchangeResult<Self> {
        if scheme == SignatureScheme::Passphrase && account.passphrase().is_none() {
            return Err(ExchangeError::Authentication(format!(
                "account {} requires a passphrase",
                account.id
            )));
        }

        Ok(Self {
            scheme,
            api_key: account.api_key.clone(),
            api_secret: account.api_secret.clone(),
            passphrase: account.passphrase.clone(),
        })
    }

    /// Sign a request with a fresh timestamp
    pub fn sign(&self, method: Method, path: &str, payload: &str) -> SignedRequest {
        self.sign_at(fresh_timestamp(), method, path, payload)
    }

    /// Sign a request at an explicit timestamp
    pub fn sign_at(
        &self,
        timestamp: String,
        method: Method,
        path: &str,
        payload: &str,
    ) -> SignedRequest {
        let secret = self.api_secret.expose_secret();
        let signature = match self.scheme {
            SignatureScheme::Passphrase => {
                passphrase_signature(secret, &timestamp, &method, path, payload)
            }
            SignatureScheme::RecvWindow => recv_window_signature(
                secret,
                self.api_key.expose_secret(),
                &timestamp,
                RECV_WINDOW,
                payload,
            ),
        };

        SignedRequest {
            method,
            path: path.to_string(),
            payload: payload.to_string(),
            timestamp,
            signature,
        }
    }

    /// Authentication headers for a signed request
    pub fn headers(&self, request: &SignedRequest) -> ExchangeResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        match self.scheme {
            SignatureScheme::Passphrase => {
                let passphrase = self
                    .passphrase
                    .as_ref()
                    .map(|p| p.expose_secret().as_str())
                    .unwrap_or_default();
                insert(&mut headers, "access-key", self.api_key.expose_secret())?;
                insert(&mut headers, "access-sign", &request.signature)?;
                insert(&mut headers, "access-timestamp", &request.timestamp)?;
                insert(&mut headers, "access-passphrase", passphrase)?;
            }
            SignatureScheme::RecvWindow => {
                insert(&mut headers, "x-bapi-api-key", self.api_key.expose_secret())?;
                insert(&mut headers, "x-bapi-sign", &request.signature)?;
                insert(&mut headers, "x-bapi-timestamp", &request.timestamp)?;
                insert(&mut headers, "x-bapi-recv-window", RECV_WINDOW)?;
            }
        }

        Ok(headers)
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) -> ExchangeResult<()> {
    let value = HeaderValue::from_str(value).map_err(|_| {
        ExchangeError::Authentication(format!("{name} contains characters not valid in a header"))
    })?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}
