use std::fmt;
use std::str::FromStr;

use ethers::abi::{self, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

use crate::call::Call;
use crate::error::WardenError;
use crate::policy::{evaluate, Policy};

/// Semantic version of the account implementation a validator targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl AccountVersion {
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Patch releases share storage layout and signature format.
    pub fn is_compatible_with(&self, other: &AccountVersion) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl Default for AccountVersion {
    fn default() -> Self {
        Self::new(0, 3, 1)
    }
}

impl fmt::Display for AccountVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for AccountVersion {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .trim_start_matches('v')
            .split('.')
            .map(|part| part.parse::<u16>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| WardenError::Malformed(format!("version {}: {}", s, e)))?;

        match parts.as_slice() {
            [major, minor, patch] => Ok(Self::new(*major, *minor, *patch)),
            _ => Err(WardenError::Malformed(format!(
                "version {} is not major.minor.patch",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatorId(pub H256);

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Root,
    Scoped,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Root => write!(f, "root"),
            Role::Scoped => write!(f, "scoped"),
        }
    }
}

/// Holds the account owner key; authorizes any call it signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootValidator {
    pub key: Address,
    pub version: AccountVersion,
}

/// Session key restricted by a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopedValidator {
    pub key: Address,
    pub policy: Policy,
    /// Distinguishes repeated grants of the same key and policy.
    pub salt: H256,
    pub version: AccountVersion,
}

impl ScopedValidator {
    pub fn id(&self) -> ValidatorId {
        derive_id(Role::Scoped, self.key, self.policy.struct_hash(), self.salt, self.version)
    }
}

impl RootValidator {
    pub fn id(&self) -> ValidatorId {
        derive_id(Role::Root, self.key, H256::zero(), H256::zero(), self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Validator {
    Root(RootValidator),
    Scoped(ScopedValidator),
}

impl Validator {
    pub fn root(key: Address, version: AccountVersion) -> Self {
        Validator::Root(RootValidator { key, version })
    }

    pub fn scoped(key: Address, policy: Policy, salt: H256, version: AccountVersion) -> Self {
        Validator::Scoped(ScopedValidator {
            key,
            policy,
            salt,
            version,
        })
    }

    pub fn id(&self) -> ValidatorId {
        match self {
            Validator::Root(root) => root.id(),
            Validator::Scoped(scoped) => scoped.id(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Validator::Root(_) => Role::Root,
            Validator::Scoped(_) => Role::Scoped,
        }
    }

    pub fn key(&self) -> Address {
        match self {
            Validator::Root(root) => root.key,
            Validator::Scoped(scoped) => scoped.key,
        }
    }

    pub fn version(&self) -> AccountVersion {
        match self {
            Validator::Root(root) => root.version,
            Validator::Scoped(scoped) => scoped.version,
        }
    }

    pub fn policy(&self) -> Option<&Policy> {
        match self {
            Validator::Root(_) => None,
            Validator::Scoped(scoped) => Some(&scoped.policy),
        }
    }

    /// Decides whether `signer` may make `call` at `now` through this validator.
    pub fn authorize(&self, signer: Address, call: &Call, now: u64) -> Result<(), WardenError> {
        if signer != self.key() {
            return Err(WardenError::Unauthorized);
        }
        match self {
            Validator::Root(_) => Ok(()),
            Validator::Scoped(scoped) => evaluate(&scoped.policy, call, now).into_result(),
        }
    }
}

impl From<ScopedValidator> for Validator {
    fn from(scoped: ScopedValidator) -> Self {
        Validator::Scoped(scoped)
    }
}

impl From<RootValidator> for Validator {
    fn from(root: RootValidator) -> Self {
        Validator::Root(root)
    }
}

fn derive_id(
    role: Role,
    key: Address,
    policy_hash: H256,
    salt: H256,
    version: AccountVersion,
) -> ValidatorId {
    let role_code = match role {
        Role::Root => 0u8,
        Role::Scoped => 1u8,
    };
    let encoded = abi::encode(&[
        Token::Uint(U256::from(role_code)),
        Token::Address(key),
        Token::FixedBytes(policy_hash.as_bytes().to_vec()),
        Token::FixedBytes(salt.as_bytes().to_vec()),
        Token::Uint(U256::from(version.major)),
        Token::Uint(U256::from(version.minor)),
    ]);
    ValidatorId(H256(keccak256(encoded)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Condition, ParamValue, Rule};

    #[test]
    fn test_version_parsing_and_compatibility() {
        let version: AccountVersion = "0.3.1".parse().unwrap();
        assert_eq!(version, AccountVersion::new(0, 3, 1));
        assert_eq!(version.to_string(), "0.3.1");
        assert!(version.is_compatible_with(&AccountVersion::new(0, 3, 0)));
        assert!(!version.is_compatible_with(&AccountVersion::new(0, 2, 4)));

        assert!("0.3".parse::<AccountVersion>().is_err());
        assert!("a.b.c".parse::<AccountVersion>().is_err());
    }

    #[test]
    fn test_ids_depend_on_policy_and_salt() {
        let key = Address::repeat_byte(0x01);
        let version = AccountVersion::default();
        let sudo = Validator::scoped(key, Policy::sudo(), H256::zero(), version);
        let salted = Validator::scoped(key, Policy::sudo(), H256::repeat_byte(1), version);
        let limited = Validator::scoped(
            key,
            Policy::sudo().with_value_limit(U256::one()),
            H256::zero(),
            version,
        );

        assert_ne!(sudo.id(), salted.id());
        assert_ne!(sudo.id(), limited.id());
        assert_ne!(sudo.id(), Validator::root(key, version).id());
        assert_eq!(sudo.id(), sudo.clone().id());
    }

    #[test]
    fn test_authorize_checks_signer_then_policy() {
        let key = Address::repeat_byte(0x0a);
        let root = Validator::root(key, AccountVersion::default());
        let call = Call::new(Address::zero(), U256::from(1_000), vec![]);

        assert!(root.authorize(key, &call, 0).is_ok());
        assert_eq!(
            root.authorize(Address::repeat_byte(0x0b), &call, 0),
            Err(WardenError::Unauthorized)
        );

        let scoped = Validator::scoped(
            key,
            Policy::sudo().with_rule(Rule::new(0, Condition::Equal, ParamValue::Uint(U256::one()))),
            H256::zero(),
            AccountVersion::default(),
        );
        assert!(matches!(
            scoped.authorize(key, &call, 0),
            Err(WardenError::PolicyDenied(_))
        ));
        assert_eq!(scoped.role(), Role::Scoped);
        assert!(scoped.policy().is_some());
    }
}
