//! Validator composition.
//!
//! An account carries exactly one root validator and any number of scoped
//! ones. Every change goes through the ledger as a root-signed management
//! action; the checks made here are the cheap subset the ledger would make
//! anyway, so obviously invalid requests are refused without a signature.

use std::sync::Arc;

use ethers::types::Address;
use tracing::info;
use warden_chain::Ledger;
use warden_crypto::{Signer, WardenCrypto};
use warden_spec::{
    AccountState, ActionOutcome, Authorization, ManagementAction, Role, Validator, ValidatorId,
    WardenError,
};

use crate::error::Result;

#[derive(Clone)]
pub struct ValidatorComposer {
    ledger: Arc<dyn Ledger>,
    crypto: WardenCrypto,
}

impl ValidatorComposer {
    pub fn new(ledger: Arc<dyn Ledger>, crypto: WardenCrypto) -> Self {
        Self { ledger, crypto }
    }

    /// Signs `action` at the account's current nonce and applies it.
    pub async fn apply(
        &self,
        account: Address,
        root: &dyn Signer,
        action: ManagementAction,
    ) -> Result<ActionOutcome> {
        let nonce = self.ledger.nonce(account).await?;
        let digest = self.crypto.management_digest(account, nonce, &action);
        let signature = root.sign_digest(digest).await?;
        let outcome = self
            .ledger
            .apply(account, action, Authorization { nonce, signature })
            .await?;
        Ok(outcome)
    }

    /// Verifies `root` currently holds the account's root validator.
    pub async fn ensure_root(&self, account: Address, root: &dyn Signer) -> Result<AccountState> {
        let state = self.ledger.account_state(account).await?;
        let holds_root = state
            .root_validator()
            .map_or(false, |installed| installed.validator.key() == root.address());
        if !holds_root {
            return Err(WardenError::Unauthorized.into());
        }
        Ok(state)
    }

    /// Installs `validator` in the role its variant carries.
    ///
    /// A second root is refused with `AlreadyHasRoot`; uninstall the current
    /// root first.
    pub async fn install_validator(
        &self,
        account: Address,
        root: &dyn Signer,
        validator: Validator,
    ) -> Result<ValidatorId> {
        let state = self.ledger.account_state(account).await?;
        if !validator.version().is_compatible_with(&state.version) {
            return Err(WardenError::IncompatibleVersion {
                account: state.version,
                validator: validator.version(),
            }
            .into());
        }
        if validator.role() == Role::Root && state.root.is_some() {
            return Err(WardenError::AlreadyHasRoot.into());
        }

        let role = validator.role();
        match self
            .apply(account, root, ManagementAction::InstallValidator { validator })
            .await?
        {
            ActionOutcome::ValidatorInstalled(id) => {
                info!("Installed {} validator {} on {:?}", role, id, account);
                Ok(id)
            }
            other => Err(unexpected(other)),
        }
    }

    /// Removes a validator. Sessions bound to it fail on their next use.
    pub async fn uninstall_validator(
        &self,
        account: Address,
        root: &dyn Signer,
        id: ValidatorId,
    ) -> Result<()> {
        self.apply(account, root, ManagementAction::UninstallValidator { id })
            .await?;
        info!("Uninstalled validator {} from {:?}", id, account);
        Ok(())
    }

    /// Installed validator by id, without any policy check.
    pub async fn resolve_authority(&self, account: Address, id: ValidatorId) -> Result<Validator> {
        Ok(self.ledger.validator(account, id).await?)
    }

    pub async fn installed(&self, account: Address) -> Result<AccountState> {
        Ok(self.ledger.account_state(account).await?)
    }
}

pub(crate) fn unexpected(outcome: ActionOutcome) -> crate::error::Error {
    WardenError::Malformed(format!("unexpected ledger outcome {:?}", outcome)).into()
}
