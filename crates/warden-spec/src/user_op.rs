use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

use crate::error::WardenError;
use crate::validator::{ScopedValidator, ValidatorId};
use crate::{DEFAULT_CALL_GAS_LIMIT, DEFAULT_PRE_VERIFICATION_GAS, DEFAULT_VERIFICATION_GAS_LIMIT};

/// Opaque gas and fee parameters. Carried, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasParameters {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    #[serde(default)]
    pub paymaster_and_data: Bytes,
}

impl Default for GasParameters {
    fn default() -> Self {
        Self {
            call_gas_limit: U256::from(DEFAULT_CALL_GAS_LIMIT),
            verification_gas_limit: U256::from(DEFAULT_VERIFICATION_GAS_LIMIT),
            pre_verification_gas: U256::from(DEFAULT_PRE_VERIFICATION_GAS),
            max_fee_per_gas: U256::zero(),
            max_priority_fee_per_gas: U256::zero(),
            paymaster_and_data: Bytes::default(),
        }
    }
}

/// Root-signed grant that installs a scoped validator as part of the first
/// operation that uses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableData {
    pub validator: ScopedValidator,
    pub root_signature: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub call_data: Bytes,
    pub validator: ValidatorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<EnableData>,
    pub gas: GasParameters,
    #[serde(default)]
    pub signature: Bytes,
}

impl UserOperation {
    /// Hash of every field except the signature.
    pub fn struct_hash(&self) -> H256 {
        let enable_hash = self
            .enable
            .as_ref()
            .map(|enable| {
                keccak256(abi::encode(&[
                    Token::FixedBytes(enable.validator.id().0.as_bytes().to_vec()),
                    Token::FixedBytes(keccak256(&enable.root_signature).to_vec()),
                ]))
            })
            .unwrap_or_default();

        let encoded = abi::encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::FixedBytes(self.validator.0.as_bytes().to_vec()),
            Token::FixedBytes(enable_hash.to_vec()),
            Token::Uint(self.gas.call_gas_limit),
            Token::Uint(self.gas.verification_gas_limit),
            Token::Uint(self.gas.pre_verification_gas),
            Token::Uint(self.gas.max_fee_per_gas),
            Token::Uint(self.gas.max_priority_fee_per_gas),
            Token::FixedBytes(keccak256(&self.gas.paymaster_and_data).to_vec()),
        ]);
        H256(keccak256(encoded))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "camelCase")]
pub enum OpStatus {
    Included,
    Rejected(WardenError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpReceipt {
    pub op_hash: H256,
    pub status: OpStatus,
    pub block_number: u64,
    pub tx_hash: H256,
}

impl OpReceipt {
    pub fn is_success(&self) -> bool {
        matches!(self.status, OpStatus::Included)
    }
}
