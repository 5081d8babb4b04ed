//! Warden Spec
//!
//! Shared data model for delegated account authorization: validators and
//! their policies, scheduled transfer jobs, user operations, and the error
//! kinds every other crate reports.

pub mod account;
pub mod call;
pub mod clock;
pub mod error;
pub mod policy;
pub mod schedule;
pub mod user_op;
pub mod validator;

pub use account::{
    AccountDeployment, AccountState, ActionOutcome, Authorization, InstalledModule,
    InstalledValidator, ManagementAction, ValidatorStatus,
};
pub use call::{decode_execute, encode_execute, Call};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::WardenError;
pub use policy::{
    evaluate, CallScope, Condition, DenyReason, ParamValue, Policy, Rule, ValidityInterval,
    Verdict,
};
pub use schedule::{
    decode_trigger, encode_trigger, ExecutionReceipt, JobId, JobRecord, JobSpec, Repeats,
    ScheduledJob, ScheduledTransferModule,
};
pub use user_op::{EnableData, GasParameters, OpReceipt, OpStatus, UserOperation};
pub use validator::{AccountVersion, Role, RootValidator, ScopedValidator, Validator, ValidatorId};

/// Account entry point: `execute(address,uint256,bytes)`.
pub const EXECUTE_SIGNATURE: &str = "execute(address,uint256,bytes)";

/// ERC-20 transfer used by scheduled transfer jobs.
pub const TRANSFER_SIGNATURE: &str = "transfer(address,uint256)";

/// Public keeper trigger on the scheduled transfers module.
pub const EXECUTE_ORDER_SIGNATURE: &str = "executeOrder(uint256)";

/// Default gas parameters, matching the limits the reference scripts pinned.
pub const DEFAULT_CALL_GAS_LIMIT: u64 = 55_000;
pub const DEFAULT_VERIFICATION_GAS_LIMIT: u64 = 1_000_000;
pub const DEFAULT_PRE_VERIFICATION_GAS: u64 = 100_000;
