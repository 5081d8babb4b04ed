//! Counterfactual account addresses and deployment.

use std::sync::Arc;

use ethers::abi::{self, Token};
use ethers::types::{Address, U256};
use ethers::utils::{get_create2_address_from_hash, keccak256};
use tracing::info;
use warden_chain::{Ledger, LedgerError};
use warden_spec::{AccountDeployment, AccountState, AccountVersion, WardenError};

use crate::error::Result;

#[derive(Clone)]
pub struct AccountFactory {
    ledger: Arc<dyn Ledger>,
    factory: Address,
    version: AccountVersion,
}

impl AccountFactory {
    pub fn new(ledger: Arc<dyn Ledger>, factory: Address, version: AccountVersion) -> Self {
        Self {
            ledger,
            factory,
            version,
        }
    }

    /// CREATE2 address of the account owned by `root_key`, known before deployment.
    pub fn counterfactual_address(&self, root_key: Address, index: U256) -> Address {
        let salt = keccak256(abi::encode(&[Token::Address(root_key), Token::Uint(index)]));
        let init_code_hash = keccak256(abi::encode(&[
            Token::String("WardenAccount".to_string()),
            Token::Uint(U256::from(self.version.major)),
            Token::Uint(U256::from(self.version.minor)),
        ]));
        get_create2_address_from_hash(self.factory, salt, init_code_hash)
    }

    /// Deploys the account if needed. Deploying an existing account returns
    /// its current state, provided it belongs to `root_key`.
    pub async fn deploy(&self, root_key: Address, index: U256) -> Result<AccountState> {
        let address = self.counterfactual_address(root_key, index);
        match self.ledger.account_state(address).await {
            Ok(state) => {
                let owned = state
                    .root_validator()
                    .map_or(false, |root| root.validator.key() == root_key);
                if !owned {
                    return Err(WardenError::AccountAlreadyDeployed(address).into());
                }
                Ok(state)
            }
            Err(LedgerError::Rejected(WardenError::AccountNotFound(_))) => {
                let state = self
                    .ledger
                    .deploy_account(AccountDeployment {
                        address,
                        version: self.version,
                        root_key,
                        index,
                    })
                    .await?;
                info!("Deployed account {:?} for root key {:?}", address, root_key);
                Ok(state)
            }
            Err(e) => Err(e.into()),
        }
    }
}
