//! Warden configuration.
//!
//! Loaded from a JSON file; every field has a default so a partial file (or
//! no file) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use warden_crypto::{WardenCrypto, WardenDomain};
use warden_spec::AccountVersion;

use crate::error::{Error, Result};
use crate::submission::WaitOptions;

/// Sepolia
pub const DEFAULT_CHAIN_ID: u64 = 11_155_111;
/// ERC-4337 entry point v0.7
pub const DEFAULT_ENTRY_POINT: &str = "0x0000000071727De22E5E9d8BAf0edAc6f37da032";
pub const DEFAULT_ACCOUNT_FACTORY: &str = "0x91E60e0613810449d098b0b5Ec8b51A0FE8c8985";
pub const DEFAULT_SCHEDULER_MODULE: &str = "0xf1ae317941efeb1ffb103d959ef58170f1e577e0";
/// How far in the past a job's start date may lie when it is registered.
pub const DEFAULT_START_GRACE_SECS: u64 = 900;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WardenConfig {
    pub chain_id: u64,
    pub entry_point: Address,
    pub account_factory: Address,
    pub scheduler_module: Address,
    pub account_version: AccountVersion,
    pub start_grace_secs: u64,
    pub poll_interval_ms: u64,
    /// Zero waits forever.
    pub receipt_timeout_ms: u64,
    pub ledger_state: PathBuf,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            entry_point: parse_default(DEFAULT_ENTRY_POINT),
            account_factory: parse_default(DEFAULT_ACCOUNT_FACTORY),
            scheduler_module: parse_default(DEFAULT_SCHEDULER_MODULE),
            account_version: AccountVersion::default(),
            start_grace_secs: DEFAULT_START_GRACE_SECS,
            poll_interval_ms: 500,
            receipt_timeout_ms: 0,
            ledger_state: PathBuf::from("warden-ledger.json"),
        }
    }
}

fn parse_default(address: &str) -> Address {
    address.parse().unwrap_or_default()
}

impl WardenConfig {
    /// Reads `path`, falling back to defaults when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn domain(&self) -> WardenDomain {
        WardenDomain::new(self.chain_id, self.entry_point)
    }

    pub fn crypto(&self) -> WardenCrypto {
        WardenCrypto::new(self.domain())
    }

    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions::new(
            Duration::from_millis(self.poll_interval_ms),
            self.receipt_timeout_ms,
        )
    }
}
