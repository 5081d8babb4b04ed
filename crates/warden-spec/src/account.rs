use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

use crate::schedule::{JobId, ScheduledTransferModule};
use crate::validator::{AccountVersion, Role, Validator, ValidatorId};

/// A deployed account and the root key it was created for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDeployment {
    pub address: Address,
    pub version: AccountVersion,
    pub root_key: Address,
    pub index: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledValidator {
    pub id: ValidatorId,
    pub role: Role,
    pub validator: Validator,
}

impl From<Validator> for InstalledValidator {
    fn from(validator: Validator) -> Self {
        Self {
            id: validator.id(),
            role: validator.role(),
            validator,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledModule {
    pub job_id: JobId,
    pub module: Address,
}

/// Snapshot of an account as the ledger sees it. Validators and modules are
/// listed in installation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountState {
    pub address: Address,
    pub version: AccountVersion,
    pub nonce: U256,
    pub root: Option<ValidatorId>,
    pub validators: Vec<InstalledValidator>,
    pub modules: Vec<InstalledModule>,
}

impl AccountState {
    pub fn validator(&self, id: &ValidatorId) -> Option<&InstalledValidator> {
        self.validators.iter().find(|installed| installed.id == *id)
    }

    pub fn root_validator(&self) -> Option<&InstalledValidator> {
        self.root.as_ref().and_then(|id| self.validator(id))
    }

    pub fn scoped(&self) -> impl Iterator<Item = &InstalledValidator> {
        self.validators
            .iter()
            .filter(|installed| installed.role == Role::Scoped)
    }
}

/// Root-authorized change to an account's installed capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ManagementAction {
    InstallValidator { validator: Validator },
    UninstallValidator { id: ValidatorId },
    /// Uninstalls the validator if present and bars its id from ever being
    /// enabled, covering grants that were approved but never used.
    RevokeValidator { id: ValidatorId },
    InstallModule { module: ScheduledTransferModule },
    UninstallModule { job_id: JobId },
}

impl ManagementAction {
    pub fn name(&self) -> &'static str {
        match self {
            ManagementAction::InstallValidator { .. } => "installValidator",
            ManagementAction::UninstallValidator { .. } => "uninstallValidator",
            ManagementAction::RevokeValidator { .. } => "revokeValidator",
            ManagementAction::InstallModule { .. } => "installModule",
            ManagementAction::UninstallModule { .. } => "uninstallModule",
        }
    }

    pub fn struct_hash(&self) -> H256 {
        let (kind, subject) = match self {
            ManagementAction::InstallValidator { validator } => (0u8, validator.id().0),
            ManagementAction::UninstallValidator { id } => (1, id.0),
            ManagementAction::RevokeValidator { id } => (2, id.0),
            ManagementAction::InstallModule { module } => {
                let mut preimage = module.module.as_bytes().to_vec();
                preimage.extend_from_slice(&module.init_data);
                (3, H256(keccak256(preimage)))
            }
            ManagementAction::UninstallModule { job_id } => {
                (4, H256::from_low_u64_be(job_id.0))
            }
        };
        H256(keccak256(abi::encode(&[
            Token::Uint(U256::from(kind)),
            Token::FixedBytes(subject.as_bytes().to_vec()),
        ])))
    }
}

/// Root signature over `(account, nonce, action)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub nonce: U256,
    pub signature: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "subject", rename_all = "camelCase")]
pub enum ActionOutcome {
    ValidatorInstalled(ValidatorId),
    ValidatorUninstalled(ValidatorId),
    ValidatorRevoked(ValidatorId),
    ModuleInstalled(JobId),
    ModuleUninstalled(JobId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidatorStatus {
    Installed,
    NotInstalled,
    /// Was installed once and has been uninstalled for good.
    Revoked,
}
