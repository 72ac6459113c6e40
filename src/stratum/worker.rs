//! Miner identity parsed from login credentials

use crate::error::{Error, Result};

/// A worker identity of the form `account.name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worker {
    full_name: String,
    account: String,
    name: String,
    version: String,
}

impl Worker {
    /// Parse a `account.worker` login pair. A missing worker part defaults
    /// to `"0"`.
    pub fn parse(login_worker_pair: &str, version: &str) -> Result<Self> {
        if login_worker_pair.is_empty() {
            return Err(Error::protocol("invalid worker name"));
        }
        let (account, name) = match login_worker_pair.split_once('.') {
            Some((account, name)) => (account.to_string(), name.to_string()),
            None => (login_worker_pair.to_string(), "0".to_string()),
        };
        Ok(Self {
            full_name: login_worker_pair.to_string(),
            account,
            name,
            version: version.to_string(),
        })
    }

    /// Unique miner id, the full `account.name` pair
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Account part of the identity
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Worker part of the identity
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Client type and version, if reported at login
    pub fn version(&self) -> &str {
        &self.version
    }
}
