//! Warden Chain Abstraction
//!
//! The ledger is the external execution environment: it records which
//! validators and modules each account has installed, accepts or rejects
//! signed operations atomically, and owns the execution counters of scheduled
//! jobs. The core only ever talks to it through [`Ledger`].

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use thiserror::Error;

use warden_spec::{
    AccountDeployment, AccountState, ActionOutcome, Authorization, Call, ExecutionReceipt, JobId,
    JobRecord, ManagementAction, OpReceipt, UserOperation, Validator, ValidatorId,
    ValidatorStatus, WardenError,
};

pub mod memory;

pub use memory::MemoryLedger;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger evaluated the request and refused it. Retrying will not help.
    #[error("Rejected by ledger: {0}")]
    Rejected(#[from] WardenError),
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
    #[error("Ledger storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn rejection(&self) -> Option<&WardenError> {
        match self {
            LedgerError::Rejected(err) => Some(err),
            _ => None,
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger of installed capabilities plus the submission endpoint.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Deploys an account with its root validator installed.
    async fn deploy_account(&self, deployment: AccountDeployment) -> LedgerResult<AccountState>;

    async fn account_state(&self, account: Address) -> LedgerResult<AccountState>;

    async fn nonce(&self, account: Address) -> LedgerResult<U256>;

    /// Installed validator by id; `NotInstalled` otherwise.
    async fn validator(&self, account: Address, id: ValidatorId) -> LedgerResult<Validator>;

    async fn validator_status(
        &self,
        account: Address,
        id: ValidatorId,
    ) -> LedgerResult<ValidatorStatus>;

    /// Applies a root-authorized management action.
    async fn apply(
        &self,
        account: Address,
        action: ManagementAction,
        authorization: Authorization,
    ) -> LedgerResult<ActionOutcome>;

    /// Queues a user operation and returns its hash. Acceptance is only known
    /// once a receipt exists.
    async fn submit(&self, op: UserOperation) -> LedgerResult<H256>;

    async fn receipt(&self, op_hash: H256) -> LedgerResult<Option<OpReceipt>>;

    async fn scheduled_jobs(&self) -> LedgerResult<Vec<JobRecord>>;

    async fn job(&self, id: JobId) -> LedgerResult<JobRecord>;

    /// Runs one execution of a job.
    ///
    /// With `expected_count` set this is a compare-and-increment: the
    /// execution only happens if the job's counter still has that value.
    async fn execute_job(
        &self,
        id: JobId,
        expected_count: Option<u32>,
    ) -> LedgerResult<ExecutionReceipt>;

    /// Public `executeOrder` entry point; needs no signature.
    async fn trigger(&self, call: &Call) -> LedgerResult<ExecutionReceipt>;

    /// Ledger time in epoch seconds.
    async fn timestamp(&self) -> LedgerResult<u64>;
}
