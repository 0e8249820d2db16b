//! Account registry
//!
//! Accounts are loaded once at startup from newline-delimited records of the form
//! `accountId, exchange, apiKey, apiSecret[, passphrase]`. The registry is never
//! mutated afterwards, so it is shared as `Arc<AccountRegistry>` and read without
//! locks.

use crate::error::{RelayError, RelayResult};
use exchange_connectors::Account;
use std::collections::HashMap;
use tracing::{debug, warn};

const MIN_FIELDS: usize = 4;

#[derive(Debug, Default)]
pub struct AccountRegistry {
    accounts: HashMap<String, Account>,
}

impl AccountRegistry {
    /// Parse the account list. Malformed records are skipped with a warning.
    pub fn parse(source: &str) -> Self {
        let mut accounts: HashMap<String, Account> = HashMap::new();

        for (index, line) in source.lines().enumerate() {
            let line_no = index + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < MIN_FIELDS {
                warn!(
                    line = line_no,
                    fields = fields.len(),
                    "skipping account record with fewer than {MIN_FIELDS} fields"
                );
                continue;
            }

            let id = fields[0];
            if id.is_empty() {
                warn!(line = line_no, "skipping account record without an id");
                continue;
            }
            if accounts.contains_key(id) {
                warn!(line = line_no, account = id, "duplicate account id, keeping the first record");
                continue;
            }

            let passphrase = fields.get(4).map(|p| p.to_string());
            let account = Account::new(
                id,
                fields[1],
                fields[2].to_string(),
                fields[3].to_string(),
                passphrase,
            );

            if let Err(e) = account.validate() {
                // Kept so lookups resolve; dispatch reports the exact problem.
                warn!(line = line_no, account = id, error = %e, "account record is incomplete");
            }

            debug!(account = id, exchange = %account.exchange, "loaded account");
            accounts.insert(id.to_string(), account);
        }

        Self { accounts }
    }

    /// Look up an account by id
    pub fn get(&self, id: &str) -> RelayResult<&Account> {
        self.accounts
            .get(id)
            .ok_or_else(|| RelayError::AccountNotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Account ids in sorted order
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.accounts.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
