//! Warden Crypto Library
//!
//! Typed digests for validator grants, management actions and user
//! operations, plus the signer capability that signs them.
//! Digests follow EIP-712 (`0x1901 || domainSeparator || structHash`) and are
//! signed as EIP-191 messages.

use async_trait::async_trait;
use ethers::abi::{self, Token};
use ethers::signers::{LocalWallet, Signer as EthersSigner};
use ethers::types::transaction::eip712::EIP712Domain;
use ethers::types::{Address, Bytes, Signature, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use warden_spec::{ManagementAction, ScopedValidator, UserOperation, WardenError};

const ENABLE_TYPE: &str = "EnableValidator(address account,bytes32 validatorId)";
const MANAGEMENT_TYPE: &str = "ManageAccount(address account,uint256 nonce,bytes32 action)";
const USER_OP_TYPE: &str = "UserOperation(bytes32 opHash)";

/// EIP-712 domain for Warden accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WardenDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    /// Entry point the digests are bound to.
    pub verifying_contract: Address,
}

impl WardenDomain {
    pub fn new(chain_id: u64, verifying_contract: Address) -> Self {
        Self {
            name: "Warden".to_string(),
            version: "1".to_string(),
            chain_id,
            verifying_contract,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Invalid private key: {0}")]
    InvalidKey(String),
    #[error("Signing error: {0}")]
    SigningError(String),
}

impl From<CryptoError> for WardenError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidSignature(msg) => WardenError::InvalidSignature(msg),
            CryptoError::InvalidKey(msg) => WardenError::Malformed(msg),
            CryptoError::SigningError(msg) => WardenError::InvalidSignature(msg),
        }
    }
}

/// Signing capability. The key material never leaves the implementor.
#[async_trait]
pub trait Signer: Send + Sync {
    fn address(&self) -> Address;

    /// Signs a 32-byte digest as an EIP-191 message.
    async fn sign_digest(&self, digest: H256) -> Result<Bytes, CryptoError>;
}

#[async_trait]
impl Signer for LocalWallet {
    fn address(&self) -> Address {
        EthersSigner::address(self)
    }

    async fn sign_digest(&self, digest: H256) -> Result<Bytes, CryptoError> {
        let signature = self
            .sign_message(digest.0)
            .await
            .map_err(|e| CryptoError::SigningError(e.to_string()))?;
        Ok(signature.to_vec().into())
    }
}

/// Digest construction and signature recovery for one domain
#[derive(Debug, Clone)]
pub struct WardenCrypto {
    domain: EIP712Domain,
}

impl WardenCrypto {
    pub fn new(domain: WardenDomain) -> Self {
        let domain = EIP712Domain {
            name: Some(domain.name),
            version: Some(domain.version),
            chain_id: Some(domain.chain_id.into()),
            verifying_contract: Some(domain.verifying_contract),
            salt: None,
        };
        Self { domain }
    }

    pub fn domain_separator(&self) -> H256 {
        H256(self.domain.separator())
    }

    pub fn typed_digest(&self, struct_hash: H256) -> H256 {
        let domain_separator = self.domain.separator();
        let digest_input = [
            b"\x19\x01".as_slice(),
            domain_separator.as_slice(),
            struct_hash.as_bytes(),
        ]
        .concat();
        H256(keccak256(digest_input))
    }

    /// Digest the root key signs to let `validator` be installed on `account`.
    pub fn enable_digest(&self, account: Address, validator: &ScopedValidator) -> H256 {
        let struct_hash = keccak256(abi::encode(&[
            Token::FixedBytes(keccak256(ENABLE_TYPE).to_vec()),
            Token::Address(account),
            Token::FixedBytes(validator.id().0.as_bytes().to_vec()),
        ]));
        self.typed_digest(H256(struct_hash))
    }

    pub fn management_digest(
        &self,
        account: Address,
        nonce: U256,
        action: &ManagementAction,
    ) -> H256 {
        let struct_hash = keccak256(abi::encode(&[
            Token::FixedBytes(keccak256(MANAGEMENT_TYPE).to_vec()),
            Token::Address(account),
            Token::Uint(nonce),
            Token::FixedBytes(action.struct_hash().as_bytes().to_vec()),
        ]));
        self.typed_digest(H256(struct_hash))
    }

    /// Hash a user operation is identified and signed by.
    pub fn user_op_hash(&self, op: &UserOperation) -> H256 {
        let struct_hash = keccak256(abi::encode(&[
            Token::FixedBytes(keccak256(USER_OP_TYPE).to_vec()),
            Token::FixedBytes(op.struct_hash().as_bytes().to_vec()),
        ]));
        self.typed_digest(H256(struct_hash))
    }

    /// Recovers the address that signed `digest`.
    pub fn recover(&self, digest: H256, signature: &[u8]) -> Result<Address, CryptoError> {
        let signature = Signature::try_from(signature)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        signature
            .recover(digest.as_bytes().to_vec())
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))
    }
}

pub fn generate_key() -> LocalWallet {
    LocalWallet::new(&mut rand::thread_rng())
}

/// Parses a hex private key, with or without `0x`.
pub fn parse_key(private_key: &str) -> Result<LocalWallet, CryptoError> {
    private_key
        .trim()
        .trim_start_matches("0x")
        .parse::<LocalWallet>()
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

pub fn private_key_hex(wallet: &LocalWallet) -> String {
    format!("0x{}", hex::encode(wallet.signer().to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_spec::{AccountVersion, GasParameters, Policy, ValidatorId};

    fn crypto() -> WardenCrypto {
        WardenCrypto::new(WardenDomain::new(31337, Address::repeat_byte(0xee)))
    }

    #[tokio::test]
    async fn test_sign_and_recover() {
        let crypto = crypto();
        let wallet = generate_key();
        let digest = crypto.typed_digest(H256::repeat_byte(7));

        let signature = wallet.sign_digest(digest).await.unwrap();
        let recovered = crypto.recover(digest, &signature).unwrap();
        assert_eq!(recovered, Signer::address(&wallet));

        let other = crypto.typed_digest(H256::repeat_byte(8));
        assert_ne!(crypto.recover(other, &signature).unwrap(), recovered);
    }

    #[test]
    fn test_recover_rejects_garbage() {
        let err = crypto().recover(H256::zero(), &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidSignature(_)));
    }

    #[test]
    fn test_key_round_trip() {
        let wallet = generate_key();
        let hex_key = private_key_hex(&wallet);
        let parsed = parse_key(&hex_key).unwrap();
        assert_eq!(Signer::address(&parsed), Signer::address(&wallet));

        assert!(matches!(parse_key("0xnotakey"), Err(CryptoError::InvalidKey(_))));
    }

    #[test]
    fn test_digests_are_domain_bound() {
        let validator = ScopedValidator {
            key: Address::repeat_byte(1),
            policy: Policy::sudo(),
            salt: H256::zero(),
            version: AccountVersion::default(),
        };
        let account = Address::repeat_byte(2);

        let here = crypto().enable_digest(account, &validator);
        let elsewhere = WardenCrypto::new(WardenDomain::new(1, Address::repeat_byte(0xee)))
            .enable_digest(account, &validator);
        assert_ne!(here, elsewhere);
        assert_ne!(here, crypto().enable_digest(Address::repeat_byte(3), &validator));
    }

    #[test]
    fn test_user_op_hash_excludes_signature() {
        let mut op = UserOperation {
            sender: Address::repeat_byte(4),
            nonce: U256::zero(),
            call_data: Bytes::default(),
            validator: ValidatorId(H256::zero()),
            enable: None,
            gas: GasParameters::default(),
            signature: Bytes::default(),
        };
        let before = crypto().user_op_hash(&op);
        op.signature = vec![9u8; 65].into();
        assert_eq!(before, crypto().user_op_hash(&op));
    }
}
