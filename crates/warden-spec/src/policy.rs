//! Session policies and the pure evaluator that decides whether a call is
//! inside them.
//!
//! Evaluation is deterministic and side-effect free: the same policy, call and
//! time always produce the same verdict. Checks run in a fixed order
//! (validity interval, value limit, call scope, rules) and the first failure
//! is reported.

use std::fmt;

use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{id, keccak256};
use serde::{Deserialize, Serialize};

use crate::call::Call;
use crate::error::WardenError;

/// Comparison applied between a call parameter and a rule's reference value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Condition {
    Equal = 0,
    LessOrEqual = 1,
    LessThan = 2,
    GreaterOrEqual = 3,
    GreaterThan = 4,
    NotEqual = 5,
}

impl Condition {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Both sides are ABI words, so byte order is big-endian numeric order.
    pub fn holds(self, actual: &[u8; 32], reference: &[u8; 32]) -> bool {
        match self {
            Condition::Equal => actual == reference,
            Condition::NotEqual => actual != reference,
            Condition::LessOrEqual => actual <= reference,
            Condition::LessThan => actual < reference,
            Condition::GreaterOrEqual => actual >= reference,
            Condition::GreaterThan => actual > reference,
        }
    }
}

impl TryFrom<u8> for Condition {
    type Error = WardenError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Condition::Equal,
            1 => Condition::LessOrEqual,
            2 => Condition::LessThan,
            3 => Condition::GreaterOrEqual,
            4 => Condition::GreaterThan,
            5 => Condition::NotEqual,
            other => {
                return Err(WardenError::Malformed(format!(
                    "unknown condition code {}",
                    other
                )))
            }
        })
    }
}

/// Fixed-width reference value of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum ParamValue {
    Uint(U256),
    Address(Address),
    /// Right padded, at most 32 bytes.
    FixedBytes(Bytes),
}

impl ParamValue {
    /// The value as the ABI word a call would carry, or `None` if it does not fit.
    pub fn word(&self) -> Option<[u8; 32]> {
        let mut word = [0u8; 32];
        match self {
            ParamValue::Uint(value) => value.to_big_endian(&mut word),
            ParamValue::Address(address) => word[12..].copy_from_slice(address.as_bytes()),
            ParamValue::FixedBytes(bytes) => {
                if bytes.len() > 32 {
                    return None;
                }
                word[..bytes.len()].copy_from_slice(bytes);
            }
        }
        Some(word)
    }

    fn kind(&self) -> u8 {
        match self {
            ParamValue::Uint(_) => 0,
            ParamValue::Address(_) => 1,
            ParamValue::FixedBytes(_) => 2,
        }
    }

    fn raw(&self) -> Vec<u8> {
        match self {
            ParamValue::FixedBytes(bytes) => bytes.to_vec(),
            other => other.word().map(|w| w.to_vec()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub offset: usize,
    pub condition: Condition,
    pub reference: ParamValue,
}

impl Rule {
    pub fn new(offset: usize, condition: Condition, reference: ParamValue) -> Self {
        Self {
            offset,
            condition,
            reference,
        }
    }

    /// A missing parameter or an oversized reference never satisfies a rule.
    pub fn check(&self, call: &Call) -> bool {
        match (call.param_word(self.offset), self.reference.word()) {
            (Some(actual), Some(reference)) => self.condition.holds(&actual, &reference),
            _ => false,
        }
    }
}

/// `[valid_after, valid_until]` in epoch seconds; zero `valid_until` is open ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidityInterval {
    pub valid_after: u64,
    pub valid_until: u64,
}

impl ValidityInterval {
    pub fn new(valid_after: u64, valid_until: u64) -> Self {
        Self {
            valid_after,
            valid_until,
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_unbounded(&self) -> bool {
        self.valid_after == 0 && self.valid_until == 0
    }

    pub fn contains(&self, now: u64) -> bool {
        now >= self.valid_after && (self.valid_until == 0 || now <= self.valid_until)
    }
}

/// Target contract and function a scoped session may call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallScope {
    pub contract: Address,
    /// Human-readable signature, e.g. `safeMint(address)`.
    pub function: String,
}

impl CallScope {
    pub fn new(contract: Address, function: impl Into<String>) -> Self {
        Self {
            contract,
            function: function.into(),
        }
    }

    pub fn selector(&self) -> [u8; 4] {
        id(&self.function)
    }

    pub fn permits(&self, call: &Call) -> bool {
        call.to == self.contract && call.selector() == Some(self.selector())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub rules: Vec<Rule>,
    pub interval: ValidityInterval,
    /// Maximum native value per call; `None` is unlimited.
    pub value_limit: Option<U256>,
    pub scope: Option<CallScope>,
}

impl Policy {
    /// The policy that allows every call.
    pub fn sudo() -> Self {
        Self::default()
    }

    pub fn is_sudo(&self) -> bool {
        self.rules.is_empty()
            && self.scope.is_none()
            && self.interval.is_unbounded()
            && self.value_limit.map_or(true, |limit| limit.is_zero())
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_interval(mut self, interval: ValidityInterval) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_value_limit(mut self, limit: U256) -> Self {
        self.value_limit = Some(limit);
        self
    }

    pub fn with_scope(mut self, scope: CallScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Structural checks applied before a policy is approved.
    pub fn validate(&self) -> Result<(), WardenError> {
        if self.interval.valid_until != 0 && self.interval.valid_until < self.interval.valid_after
        {
            return Err(WardenError::Malformed(
                "validUntil precedes validAfter".to_string(),
            ));
        }
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.reference.word().is_none() {
                return Err(WardenError::Malformed(format!(
                    "rule {} reference value exceeds 32 bytes",
                    index
                )));
            }
        }
        Ok(())
    }

    pub fn struct_hash(&self) -> H256 {
        let (scope_contract, scope_selector) = self
            .scope
            .as_ref()
            .map(|scope| (scope.contract, scope.selector()))
            .unwrap_or_default();

        let rules = self
            .rules
            .iter()
            .map(|rule| {
                Token::Tuple(vec![
                    Token::Uint(U256::from(rule.offset)),
                    Token::Uint(U256::from(rule.condition.code())),
                    Token::Uint(U256::from(rule.reference.kind())),
                    Token::Bytes(rule.reference.raw()),
                ])
            })
            .collect();

        let encoded = abi::encode(&[
            Token::Uint(U256::from(self.interval.valid_after)),
            Token::Uint(U256::from(self.interval.valid_until)),
            Token::Bool(self.value_limit.is_some()),
            Token::Uint(self.value_limit.unwrap_or_default()),
            Token::Address(scope_contract),
            Token::FixedBytes(scope_selector.to_vec()),
            Token::Array(rules),
        ]);
        H256(keccak256(encoded))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum DenyReason {
    Expired,
    ValueLimitExceeded { limit: U256, value: U256 },
    TargetNotPermitted,
    RuleViolation { rule_index: usize },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Expired => write!(f, "expired"),
            DenyReason::ValueLimitExceeded { limit, value } => {
                write!(f, "value-limit-exceeded (value {} > limit {})", value, limit)
            }
            DenyReason::TargetNotPermitted => write!(f, "target-not-permitted"),
            DenyReason::RuleViolation { rule_index } => {
                write!(f, "rule-violation (rule {})", rule_index)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(DenyReason),
}

impl Verdict {
    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    pub fn into_result(self) -> Result<(), WardenError> {
        match self {
            Verdict::Allow => Ok(()),
            Verdict::Deny(DenyReason::Expired) => Err(WardenError::Expired),
            Verdict::Deny(reason) => Err(WardenError::PolicyDenied(reason)),
        }
    }
}

pub fn evaluate(policy: &Policy, call: &Call, now: u64) -> Verdict {
    if policy.is_sudo() {
        return Verdict::Allow;
    }

    if !policy.interval.contains(now) {
        return Verdict::Deny(DenyReason::Expired);
    }

    if let Some(limit) = policy.value_limit {
        if call.value > limit {
            return Verdict::Deny(DenyReason::ValueLimitExceeded {
                limit,
                value: call.value,
            });
        }
    }

    if let Some(scope) = &policy.scope {
        if !scope.permits(call) {
            return Verdict::Deny(DenyReason::TargetNotPermitted);
        }
    }

    match policy.rules.iter().position(|rule| !rule.check(call)) {
        Some(rule_index) => Verdict::Deny(DenyReason::RuleViolation { rule_index }),
        None => Verdict::Allow,
    }
}
