use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::DenyReason;
use crate::schedule::JobId;
use crate::validator::AccountVersion;

/// Validation and state-machine failures.
///
/// Every variant describes a request that was never going to be accepted as
/// submitted; none of them is worth retrying unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WardenError {
    #[error("Caller not authorized for this operation")]
    Unauthorized,
    #[error("Call denied by session policy: {0}")]
    PolicyDenied(DenyReason),
    #[error("Session policy is outside its validity interval")]
    Expired,
    #[error("Scheduled job is not eligible for execution")]
    NotEligible,
    #[error("Scheduled job has exhausted its repeats")]
    Exhausted,
    #[error("Account already has a root validator")]
    AlreadyHasRoot,
    #[error("Validator is already revoked")]
    AlreadyRevoked,
    #[error("Validator has been revoked")]
    Revoked,
    #[error("Malformed input: {0}")]
    Malformed(String),
    #[error("Private key does not match the approved session key")]
    KeyMismatch,
    #[error("Validator is not installed on the account")]
    NotInstalled,
    #[error("Validator version {validator} is incompatible with account version {account}")]
    IncompatibleVersion {
        account: AccountVersion,
        validator: AccountVersion,
    },
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("Cannot {operation} a session in state {from}")]
    InvalidTransition { from: String, operation: String },
    #[error("Nonce mismatch: expected {expected}, got {actual}")]
    NonceMismatch { expected: U256, actual: U256 },
    #[error("Account {0:?} not found")]
    AccountNotFound(Address),
    #[error("Account {0:?} is already deployed")]
    AccountAlreadyDeployed(Address),
    #[error("Scheduled job {0} not found")]
    JobNotFound(JobId),
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
}
