//! Session key lifecycle.
//!
//! ```text
//! Issued -> Approved -> Active -> Revoked
//!              \__________________/
//! ```
//!
//! Approval only signs a grant; nothing reaches the ledger until the session
//! is first redeemed, when the grant travels inside the user operation and
//! the scoped validator is enabled on the spot. A session becomes active
//! only once the ledger has included one of its operations. Revocation is enforced by the
//! ledger, so a revoked session stays revoked even if its approval blob is
//! replayed from another process.

use std::fmt;
use std::sync::Arc;

use ethers::types::{Address, Bytes, H256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use warden_chain::Ledger;
use warden_crypto::Signer;
use warden_spec::{
    evaluate, AccountVersion, Call, Clock, EnableData, Policy, ScopedValidator, UserOperation,
    ValidatorId, ValidatorStatus, WardenError,
};

use crate::composition::{unexpected, ValidatorComposer};
use crate::error::Result;
use crate::submission::{Confirmation, Submitter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Issued,
    Approved,
    Active,
    Revoked,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Issued => "issued",
            SessionStatus::Approved => "approved",
            SessionStatus::Active => "active",
            SessionStatus::Revoked => "revoked",
        };
        f.write_str(name)
    }
}

/// Session as tracked by the party that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub account: Address,
    pub session_key: Address,
    pub salt: H256,
    pub status: SessionStatus,
    pub validator_id: Option<ValidatorId>,
}

impl Session {
    /// Rebuilds an approved session from its transported approval.
    pub fn from_approval(approval: &Approval) -> Self {
        Self {
            account: approval.account,
            session_key: approval.session_key,
            salt: approval.validator_metadata.salt,
            status: SessionStatus::Approved,
            validator_id: Some(approval.validator_metadata.validator_id),
        }
    }

    fn transition(&self, operation: &str) -> WardenError {
        WardenError::InvalidTransition {
            from: self.status.to_string(),
            operation: operation.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorMetadata {
    pub validator_id: ValidatorId,
    pub salt: H256,
    pub version: AccountVersion,
    pub chain_id: u64,
    pub entry_point: Address,
}

/// Root-signed grant of a scoped validator, in transportable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub account: Address,
    pub session_key: Address,
    pub policy: Policy,
    pub root_signature: Bytes,
    pub validator_metadata: ValidatorMetadata,
}

impl Approval {
    pub fn validator(&self) -> ScopedValidator {
        ScopedValidator {
            key: self.session_key,
            policy: self.policy.clone(),
            salt: self.validator_metadata.salt,
            version: self.validator_metadata.version,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| WardenError::Malformed(format!("approval: {}", e)).into())
    }

    /// Parses and structurally checks an approval.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let approval: Approval = serde_json::from_slice(bytes)
            .map_err(|e| WardenError::Malformed(format!("approval: {}", e)))?;

        approval.policy.validate()?;
        if approval.validator().id() != approval.validator_metadata.validator_id {
            return Err(WardenError::Malformed(
                "validator id does not match the approved policy".to_string(),
            )
            .into());
        }
        if approval.root_signature.len() != 65 {
            return Err(WardenError::Malformed(format!(
                "root signature is {} bytes, expected 65",
                approval.root_signature.len()
            ))
            .into());
        }
        Ok(approval)
    }
}

/// An approval joined with the session private key that can use it.
#[derive(Clone)]
pub struct RedeemableSession {
    approval: Approval,
    signer: Arc<dyn Signer>,
    status: SessionStatus,
}

impl fmt::Debug for RedeemableSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedeemableSession")
            .field("approval", &self.approval)
            .field("signer", &self.signer.address())
            .field("status", &self.status)
            .finish()
    }
}

impl RedeemableSession {
    pub fn new(approval: Approval, signer: Arc<dyn Signer>) -> Result<Self> {
        if signer.address() != approval.session_key {
            return Err(WardenError::KeyMismatch.into());
        }
        Ok(Self {
            approval,
            signer,
            status: SessionStatus::Approved,
        })
    }

    pub fn approval(&self) -> &Approval {
        &self.approval
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn validator_id(&self) -> ValidatorId {
        self.approval.validator_metadata.validator_id
    }
}

#[derive(Clone)]
pub struct SessionManager {
    ledger: Arc<dyn Ledger>,
    composer: ValidatorComposer,
    submitter: Submitter,
    clock: Arc<dyn Clock>,
    chain_id: u64,
    entry_point: Address,
}

impl SessionManager {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        submitter: Submitter,
        clock: Arc<dyn Clock>,
        chain_id: u64,
        entry_point: Address,
    ) -> Self {
        let composer = ValidatorComposer::new(ledger.clone(), submitter.crypto().clone());
        Self {
            ledger,
            composer,
            submitter,
            clock,
            chain_id,
            entry_point,
        }
    }

    /// Starts a session for `session_key`. Local only.
    pub fn issue(&self, account: Address, session_key: Address) -> Session {
        let salt = H256(rand::random());
        debug!("Issued session for key {:?} on {:?}", session_key, account);
        Session {
            account,
            session_key,
            salt,
            status: SessionStatus::Issued,
            validator_id: None,
        }
    }

    /// Signs a grant of `policy` to the session key with the root key.
    pub async fn approve(
        &self,
        root: &dyn Signer,
        session: &mut Session,
        policy: Policy,
    ) -> Result<Approval> {
        if session.status != SessionStatus::Issued {
            return Err(session.transition("approve").into());
        }
        policy.validate()?;
        let state = self.composer.ensure_root(session.account, root).await?;

        let validator = ScopedValidator {
            key: session.session_key,
            policy,
            salt: session.salt,
            version: state.version,
        };
        let validator_id = validator.id();
        let digest = self
            .submitter
            .crypto()
            .enable_digest(session.account, &validator);
        let root_signature = root.sign_digest(digest).await?;

        session.status = SessionStatus::Approved;
        session.validator_id = Some(validator_id);
        info!(
            "Approved session key {:?} on {:?} as validator {}",
            session.session_key, session.account, validator_id
        );

        Ok(Approval {
            account: session.account,
            session_key: validator.key,
            policy: validator.policy,
            root_signature,
            validator_metadata: ValidatorMetadata {
                validator_id,
                salt: validator.salt,
                version: validator.version,
                chain_id: self.chain_id,
                entry_point: self.entry_point,
            },
        })
    }

    pub fn serialize(&self, approval: &Approval) -> Result<Vec<u8>> {
        approval.to_bytes()
    }

    pub fn deserialize(&self, bytes: &[u8], signer: Arc<dyn Signer>) -> Result<RedeemableSession> {
        let approval = Approval::from_bytes(bytes)?;
        if approval.validator_metadata.chain_id != self.chain_id
            || approval.validator_metadata.entry_point != self.entry_point
        {
            return Err(WardenError::Malformed(
                "approval was issued for another chain or entry point".to_string(),
            )
            .into());
        }
        RedeemableSession::new(approval, signer)
    }

    /// Builds a user operation making `call` under the session's policy.
    ///
    /// The policy is evaluated locally at the current time, then the ledger
    /// is asked whether the validator is still installed. The first operation
    /// carries the root's grant so the ledger enables the validator as part
    /// of executing it. The session status is left alone until the outcome
    /// is known; see [`SessionManager::confirm`].
    pub async fn redeem(
        &self,
        session: &mut RedeemableSession,
        call: &Call,
    ) -> Result<UserOperation> {
        if session.status == SessionStatus::Revoked {
            return Err(WardenError::Revoked.into());
        }

        let approval = &session.approval;
        let now = self.clock.now();
        evaluate(&approval.policy, call, now).into_result()?;

        let validator_id = session.validator_id();
        let enable = match self
            .ledger
            .validator_status(approval.account, validator_id)
            .await?
        {
            ValidatorStatus::Installed => None,
            ValidatorStatus::NotInstalled => Some(EnableData {
                validator: approval.validator(),
                root_signature: approval.root_signature.clone(),
            }),
            ValidatorStatus::Revoked => {
                warn!("Session validator {} has been revoked", validator_id);
                session.status = SessionStatus::Revoked;
                return Err(WardenError::Revoked.into());
            }
        };

        let op = self
            .submitter
            .build(approval.account, validator_id, call, enable)
            .await?;
        self.submitter.sign(op, session.signer.as_ref()).await
    }

    /// Moves the session along according to the ledger's verdict on one of
    /// its operations.
    pub fn confirm(&self, session: &mut RedeemableSession, confirmation: &Confirmation) {
        match confirmation {
            Confirmation::Confirmed(_) => {
                if session.status != SessionStatus::Active {
                    info!("Session validator {} is active", session.validator_id());
                    session.status = SessionStatus::Active;
                }
            }
            Confirmation::Rejected {
                reason: WardenError::Revoked,
                ..
            } => {
                warn!("Session validator {} has been revoked", session.validator_id());
                session.status = SessionStatus::Revoked;
            }
            Confirmation::Rejected { reason, .. } => {
                debug!(
                    "Operation of session validator {} rejected: {}",
                    session.validator_id(),
                    reason
                );
            }
        }
    }

    /// Redeems `call`, submits it and waits for the ledger's verdict.
    pub async fn send(
        &self,
        session: &mut RedeemableSession,
        call: &Call,
    ) -> Result<Confirmation> {
        let op = self.redeem(session, call).await?;
        let confirmation = self.submitter.send(op).await?;
        self.confirm(session, &confirmation);
        Ok(confirmation)
    }

    /// Revokes the session's validator on the ledger.
    pub async fn revoke(&self, root: &dyn Signer, session: &mut Session) -> Result<()> {
        let validator_id = match (session.status, session.validator_id) {
            (SessionStatus::Revoked, _) => return Err(WardenError::AlreadyRevoked.into()),
            (SessionStatus::Approved | SessionStatus::Active, Some(id)) => id,
            _ => return Err(session.transition("revoke").into()),
        };
        self.composer.ensure_root(session.account, root).await?;

        let outcome = self
            .composer
            .apply(
                session.account,
                root,
                warden_spec::ManagementAction::RevokeValidator { id: validator_id },
            )
            .await;
        match outcome {
            Ok(warden_spec::ActionOutcome::ValidatorRevoked(_)) => {}
            Ok(other) => return Err(unexpected(other)),
            Err(e) if e.validation() == Some(&WardenError::AlreadyRevoked) => {
                session.status = SessionStatus::Revoked;
                return Err(e);
            }
            Err(e) => return Err(e),
        }

        session.status = SessionStatus::Revoked;
        info!("Revoked session validator {} on {:?}", validator_id, session.account);
        Ok(())
    }

    /// Re-reads the ledger to catch revocations made elsewhere.
    pub async fn refresh(&self, session: &mut Session) -> Result<SessionStatus> {
        if let Some(id) = session.validator_id {
            match self.ledger.validator_status(session.account, id).await? {
                ValidatorStatus::Revoked => session.status = SessionStatus::Revoked,
                ValidatorStatus::Installed if session.status == SessionStatus::Approved => {
                    session.status = SessionStatus::Active
                }
                _ => {}
            }
        }
        Ok(session.status)
    }
}
