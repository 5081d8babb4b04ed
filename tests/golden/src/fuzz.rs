//! Property-based testing for policy evaluation, approvals and schedules
//!
//! Uses proptest to drive the pure evaluators with random calls and times.

use ethers::types::{Address, Bytes, H256, U256};
use proptest::prelude::*;
use warden_core::{Approval, ValidatorMetadata};
use warden_spec::{
    evaluate, AccountVersion, Call, CallScope, Condition, ParamValue, Policy, Repeats, Rule,
    ScheduledJob, ScopedValidator, ValidityInterval, Verdict,
};

pub fn address_strategy() -> impl Strategy<Value = Address> {
    any::<[u8; 20]>().prop_map(Address::from)
}

pub fn u256_strategy() -> impl Strategy<Value = U256> {
    any::<[u8; 32]>().prop_map(|bytes| U256::from_big_endian(&bytes))
}

/// Arbitrary calls, including ones too short to carry a selector.
pub fn call_strategy() -> impl Strategy<Value = Call> {
    (
        address_strategy(),
        u256_strategy(),
        prop::collection::vec(any::<u8>(), 0..132),
    )
        .prop_map(|(to, value, data)| Call::new(to, value, Bytes::from(data)))
}

/// A `mint(uint256)`-shaped call whose only parameter is `amount`.
pub fn single_param_call(amount: U256) -> Call {
    let mut data = vec![0xa0, 0x71, 0x2d, 0x68];
    let mut word = [0u8; 32];
    amount.to_big_endian(&mut word);
    data.extend_from_slice(&word);
    Call::new(Address::repeat_byte(0xc0), U256::zero(), Bytes::from(data))
}

pub fn condition_strategy() -> impl Strategy<Value = Condition> {
    (0u8..6).prop_map(|code| Condition::try_from(code).unwrap())
}

pub fn policy_strategy() -> impl Strategy<Value = Policy> {
    (
        prop::collection::vec((0usize..4, condition_strategy(), u256_strategy()), 0..4),
        any::<u32>(),
        any::<u32>(),
        prop::option::of(u256_strategy()),
        any::<bool>(),
    )
        .prop_map(|(rules, after, span, value_limit, scoped)| {
            let after = after as u64;
            Policy {
                rules: rules
                    .into_iter()
                    .map(|(offset, condition, reference)| {
                        Rule::new(offset, condition, ParamValue::Uint(reference))
                    })
                    .collect(),
                interval: ValidityInterval::new(after, after + span as u64 + 1),
                value_limit,
                scope: scoped
                    .then(|| CallScope::new(Address::repeat_byte(0xc0), "mint(uint256)")),
            }
        })
}

pub fn job_strategy() -> impl Strategy<Value = ScheduledJob> {
    (1_000u64..u32::MAX as u64, 1u64..100_000, 1u32..50).prop_map(|(start, every, repeats)| {
        ScheduledJob {
            token: Address::repeat_byte(0x70),
            recipient: Address::repeat_byte(0x71),
            amount_per_execution: U256::from(1_000),
            start_date: start,
            repeat_every: every,
            number_of_repeats: Repeats::Times(repeats),
            executed_count: 0,
        }
    })
}

proptest! {
    #[test]
    fn test_sudo_allows_every_call(call in call_strategy(), now in any::<u64>()) {
        prop_assert_eq!(evaluate(&Policy::sudo(), &call, now), Verdict::Allow);

        let zero_limit = Policy::sudo().with_value_limit(U256::zero());
        prop_assert!(zero_limit.is_sudo());
        prop_assert_eq!(evaluate(&zero_limit, &call, now), Verdict::Allow);
    }

    #[test]
    fn test_equal_rule_denies_any_other_word(reference in u256_strategy(), actual in u256_strategy()) {
        let policy = Policy::sudo().with_rule(Rule::new(0, Condition::Equal, ParamValue::Uint(reference)));
        let verdict = evaluate(&policy, &single_param_call(actual), 0);
        prop_assert_eq!(verdict.is_allow(), actual == reference);
    }

    #[test]
    fn test_evaluation_is_deterministic(policy in policy_strategy(), call in call_strategy(), now in any::<u32>()) {
        let first = evaluate(&policy, &call, now as u64);
        let second = evaluate(&policy, &call, now as u64);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_approval_survives_transport(
        policy in policy_strategy(),
        account in address_strategy(),
        key in address_strategy(),
        salt in any::<[u8; 32]>(),
        signature in prop::collection::vec(any::<u8>(), 65),
    ) {
        let validator = ScopedValidator {
            key,
            policy: policy.clone(),
            salt: H256(salt),
            version: AccountVersion::default(),
        };
        let approval = Approval {
            account,
            session_key: key,
            policy,
            root_signature: Bytes::from(signature),
            validator_metadata: ValidatorMetadata {
                validator_id: validator.id(),
                salt: H256(salt),
                version: validator.version,
                chain_id: 11155111,
                entry_point: Address::repeat_byte(0xe0),
            },
        };
        let bytes = approval.to_bytes().unwrap();
        prop_assert_eq!(Approval::from_bytes(&bytes).unwrap(), approval);
    }

    #[test]
    fn test_never_eligible_before_start(job in job_strategy(), early in 1u64..1_000) {
        prop_assert!(!job.is_eligible(job.start_date - early));
        prop_assert!(job.is_eligible(job.start_date));
    }

    #[test]
    fn test_exhausted_job_is_never_eligible(mut job in job_strategy(), later in any::<u32>()) {
        job.executed_count = job.number_of_repeats.limit().unwrap();
        prop_assert!(job.is_exhausted());
        prop_assert!(!job.is_eligible(job.start_date + later as u64));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_param_call_selector() {
        let call = single_param_call(U256::from(5));
        assert_eq!(call.selector(), Some(ethers::utils::id("mint(uint256)")));
        assert_eq!(call.param_word(0).unwrap()[31], 5);
    }
}
