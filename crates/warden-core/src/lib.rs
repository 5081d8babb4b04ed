//! Warden Core Library
//!
//! Delegated authorization for smart accounts: validator composition,
//! session key lifecycle, scheduled transfer jobs and the submission
//! pipeline, all running against an injected ledger.

pub mod accounts;
pub mod composition;
pub mod config;
pub mod error;
pub mod manager;
pub mod scheduler;
pub mod session;
pub mod submission;

pub use accounts::AccountFactory;
pub use composition::ValidatorComposer;
pub use config::WardenConfig;
pub use error::{Error, Result};
pub use manager::Warden;
pub use scheduler::JobRegistry;
pub use session::{Approval, RedeemableSession, Session, SessionManager, SessionStatus, ValidatorMetadata};
pub use submission::{Confirmation, PendingOperation, Submitter, WaitOptions};
