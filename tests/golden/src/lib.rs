//! Warden Golden Test Suite
//!
//! Scripted end-to-end scenarios run against the in-memory ledger with a
//! manual clock, followed by invariant checks over the resulting state.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, U256};
use warden_chain::{Ledger, MemoryLedger};
use warden_core::{RedeemableSession, Session, Warden, WardenConfig};
use warden_crypto::{generate_key, Signer};
use warden_spec::{
    Call, Condition, DenyReason, JobId, JobSpec, ManualClock, ParamValue, Policy, Repeats, Role,
    Rule, ValidityInterval, WardenError,
};

#[cfg(test)]
mod fuzz;

/// Base timestamp every scenario starts at.
pub const GENESIS: u64 = 1_700_000_000;

/// Test harness owning one account on a fresh ledger.
pub struct GoldenHarness {
    clock: ManualClock,
    ledger: MemoryLedger,
    warden: Warden,
    root: LocalWallet,
    account: Address,
    sessions: Vec<(Session, RedeemableSession)>,
    jobs: Vec<JobId>,
}

/// Test scenario configuration
#[derive(Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    pub description: String,
    pub steps: Vec<TestAction>,
    pub invariant_checks: Vec<InvariantCheck>,
}

/// Expected outcome of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expect {
    Ok,
    Err(WardenError),
}

/// Test action to perform. Sessions and jobs are referred to by the order
/// in which the scenario created them.
#[derive(Debug, Clone)]
pub enum TestAction {
    Approve { policy: Policy },
    Redeem { session: usize, call: Call, expect: Expect },
    Revoke { session: usize, expect: Expect },
    Schedule { start_offset: u64, every: u64, repeats: u32 },
    ExecuteJob { job: usize, expect: Expect },
    AdvanceTo { offset: u64 },
}

/// Invariant to check
#[derive(Debug, Clone)]
pub enum InvariantCheck {
    /// Exactly one root validator is installed.
    SingleRoot,
    /// The job ran exactly this many times.
    ExecutionCount { job: usize, count: u32 },
    /// Each execution of the job landed in its own window.
    OneExecutionPerWindow { job: usize },
    /// The session's validator is on the revoked list and not installed.
    SessionRevoked { session: usize },
}

impl GoldenHarness {
    pub async fn new() -> Result<Self> {
        let config = WardenConfig {
            poll_interval_ms: 1,
            receipt_timeout_ms: 1_000,
            ..WardenConfig::default()
        };
        let clock = ManualClock::new(GENESIS);
        let ledger =
            MemoryLedger::new(config.crypto(), Arc::new(clock.clone())).with_auto_mine(true);
        let warden = Warden::new(config, Arc::new(ledger.clone()), Arc::new(clock.clone()));

        let root = generate_key();
        let state = warden
            .accounts
            .deploy(Signer::address(&root), U256::zero())
            .await?;

        Ok(Self {
            clock,
            ledger,
            warden,
            root,
            account: state.address,
            sessions: Vec::new(),
            jobs: Vec::new(),
        })
    }

    pub fn account(&self) -> Address {
        self.account
    }

    /// Run a test scenario, stopping at the first step that misbehaves.
    pub async fn run_scenario(&mut self, scenario: &TestScenario) -> Result<TestResults> {
        for (i, step) in scenario.steps.iter().enumerate() {
            self.execute_action(step)
                .await
                .map_err(|e| anyhow!("step {} ({:?}): {}", i, step, e))?;
        }

        let mut results = TestResults::default();
        for invariant in &scenario.invariant_checks {
            let outcome = self.check_invariant(invariant).await;
            results.invariant_results.push(InvariantResult {
                invariant: invariant.clone(),
                passed: outcome.is_ok(),
                error: outcome.err(),
            });
        }
        Ok(results)
    }

    async fn execute_action(&mut self, action: &TestAction) -> Result<()> {
        match action {
            TestAction::Approve { policy } => {
                let key = generate_key();
                let mut session = self
                    .warden
                    .sessions
                    .issue(self.account, Signer::address(&key));
                let approval = self
                    .warden
                    .sessions
                    .approve(&self.root, &mut session, policy.clone())
                    .await?;
                let bytes = self.warden.sessions.serialize(&approval)?;
                let redeemable = self.warden.sessions.deserialize(&bytes, Arc::new(key))?;
                self.sessions.push((session, redeemable));
                Ok(())
            }
            TestAction::Redeem {
                session,
                call,
                expect,
            } => {
                let (_, redeemable) = self.session(*session)?;
                let mut redeemable = redeemable.clone();
                let outcome = self
                    .warden
                    .sessions
                    .send(&mut redeemable, call)
                    .await
                    .and_then(|confirmation| confirmation.into_result())
                    .map(|_| ());
                self.sessions[*session].1 = redeemable;
                compare(expect, outcome)
            }
            TestAction::Revoke { session, expect } => {
                let (mut tracked, _) = self.session(*session)?.clone();
                let outcome = self.warden.sessions.revoke(&self.root, &mut tracked).await;
                self.sessions[*session].0 = tracked;
                compare(expect, outcome)
            }
            TestAction::Schedule {
                start_offset,
                every,
                repeats,
            } => {
                let module = self.warden.jobs.register_job(JobSpec {
                    token_address: Address::repeat_byte(0x70),
                    token_decimals: 18,
                    amount_per_execution: "1".to_string(),
                    recipient: Address::repeat_byte(0x71),
                    start_date: GENESIS + start_offset,
                    repeat_every: *every,
                    number_of_repeats: Repeats::Times(*repeats),
                })?;
                let job_id = self
                    .warden
                    .jobs
                    .install(self.account, &self.root, module)
                    .await?;
                self.jobs.push(job_id);
                Ok(())
            }
            TestAction::ExecuteJob { job, expect } => {
                let job_id = self.job(*job)?;
                let outcome = self
                    .warden
                    .jobs
                    .execute_scheduled_job(job_id)
                    .await
                    .map(|_| ());
                compare(expect, outcome)
            }
            TestAction::AdvanceTo { offset } => {
                self.clock.set(GENESIS + offset);
                Ok(())
            }
        }
    }

    async fn check_invariant(&self, invariant: &InvariantCheck) -> Result<()> {
        match invariant {
            InvariantCheck::SingleRoot => {
                let state = self.ledger.account_state(self.account).await?;
                let roots = state
                    .validators
                    .iter()
                    .filter(|v| v.role == Role::Root)
                    .count();
                if roots != 1 {
                    bail!("expected one root validator, found {}", roots);
                }
                Ok(())
            }
            InvariantCheck::ExecutionCount { job, count } => {
                let record = self.ledger.job(self.job(*job)?).await?;
                let executed = self.ledger.executions(record.id).len() as u32;
                if record.job.executed_count != *count || executed != *count {
                    bail!(
                        "expected {} executions, counter {} and {} receipts",
                        count,
                        record.job.executed_count,
                        executed
                    );
                }
                Ok(())
            }
            InvariantCheck::OneExecutionPerWindow { job } => {
                let record = self.ledger.job(self.job(*job)?).await?;
                let receipts = self.ledger.executions(record.id);
                for (i, receipt) in receipts.iter().enumerate() {
                    let opens = record.job.start_date + record.job.repeat_every * i as u64;
                    if receipt.executed_at < opens {
                        bail!(
                            "execution {} at {} precedes its window at {}",
                            receipt.execution_index,
                            receipt.executed_at,
                            opens
                        );
                    }
                }
                Ok(())
            }
            InvariantCheck::SessionRevoked { session } => {
                let (_, redeemable) = self.session(*session)?;
                let id = redeemable.validator_id();
                let status = self.ledger.validator_status(self.account, id).await?;
                if status != warden_spec::ValidatorStatus::Revoked {
                    bail!("validator {} is {:?}", id, status);
                }
                Ok(())
            }
        }
    }

    fn session(&self, index: usize) -> Result<&(Session, RedeemableSession)> {
        self.sessions
            .get(index)
            .ok_or_else(|| anyhow!("no session #{}", index))
    }

    fn job(&self, index: usize) -> Result<JobId> {
        self.jobs
            .get(index)
            .copied()
            .ok_or_else(|| anyhow!("no job #{}", index))
    }
}

fn compare(expect: &Expect, outcome: warden_core::Result<()>) -> Result<()> {
    match (expect, outcome) {
        (Expect::Ok, Ok(())) => Ok(()),
        (Expect::Err(want), Err(e)) if e.validation() == Some(want) => Ok(()),
        (Expect::Ok, Err(e)) => bail!("expected success, got {}", e),
        (Expect::Err(want), Err(e)) => bail!("expected {}, got {}", want, e),
        (Expect::Err(want), Ok(())) => bail!("expected {}, got success", want),
    }
}

/// Test results
#[derive(Debug, Default)]
pub struct TestResults {
    pub invariant_results: Vec<InvariantResult>,
}

impl TestResults {
    pub fn passed(&self) -> bool {
        self.invariant_results.iter().all(|r| r.passed)
    }
}

/// Individual invariant test result
#[derive(Debug)]
pub struct InvariantResult {
    pub invariant: InvariantCheck,
    pub passed: bool,
    pub error: Option<anyhow::Error>,
}

/// `mint(uint256)` call on a fixed target, used by the session scenarios.
pub fn mint_call(amount: U256, value: U256) -> Call {
    let mut data = ethers::utils::id("mint(uint256)").to_vec();
    data.extend_from_slice(&ethers::abi::encode(&[ethers::abi::Token::Uint(amount)]));
    Call::new(Address::repeat_byte(0xc0), value, Bytes::from(data))
}

/// Predefined test scenarios
pub mod scenarios {
    use super::*;

    pub fn all() -> Vec<TestScenario> {
        vec![
            sudo_session(),
            equal_rule_and_value_limit(),
            revocation(),
            two_window_job(),
        ]
    }

    pub fn sudo_session() -> TestScenario {
        TestScenario {
            name: "Sudo Session".to_string(),
            description: "An unrestricted session key may make any call".to_string(),
            steps: vec![
                TestAction::Approve {
                    policy: Policy::sudo(),
                },
                TestAction::Redeem {
                    session: 0,
                    call: mint_call(U256::from(7), U256::zero()),
                    expect: Expect::Ok,
                },
                TestAction::Redeem {
                    session: 0,
                    call: Call::new(Address::repeat_byte(0x99), U256::exp10(18), Bytes::new()),
                    expect: Expect::Ok,
                },
            ],
            invariant_checks: vec![InvariantCheck::SingleRoot],
        }
    }

    pub fn equal_rule_and_value_limit() -> TestScenario {
        let policy = Policy::sudo()
            .with_rule(Rule::new(
                0,
                Condition::Equal,
                ParamValue::Uint(U256::from(0xABCD)),
            ))
            .with_value_limit(U256::zero());
        TestScenario {
            name: "Equal Rule And Value Limit".to_string(),
            description: "Parameter 0 must equal 0xABCD and no value may be sent".to_string(),
            steps: vec![
                TestAction::Approve { policy },
                TestAction::Redeem {
                    session: 0,
                    call: mint_call(U256::from(0xABCD), U256::zero()),
                    expect: Expect::Ok,
                },
                TestAction::Redeem {
                    session: 0,
                    call: mint_call(U256::from(0xABCD), U256::one()),
                    expect: Expect::Err(WardenError::PolicyDenied(
                        DenyReason::ValueLimitExceeded {
                            limit: U256::zero(),
                            value: U256::one(),
                        },
                    )),
                },
                TestAction::Redeem {
                    session: 0,
                    call: mint_call(U256::from(0xABCE), U256::zero()),
                    expect: Expect::Err(WardenError::PolicyDenied(DenyReason::RuleViolation {
                        rule_index: 0,
                    })),
                },
            ],
            invariant_checks: vec![InvariantCheck::SingleRoot],
        }
    }

    pub fn revocation() -> TestScenario {
        let window = Policy::sudo().with_interval(ValidityInterval::new(GENESIS, GENESIS + 3_600));
        TestScenario {
            name: "Revocation".to_string(),
            description: "A revoked session can no longer act, and expiry is enforced".to_string(),
            steps: vec![
                TestAction::Approve {
                    policy: window.clone(),
                },
                TestAction::Approve { policy: window },
                TestAction::Redeem {
                    session: 0,
                    call: mint_call(U256::one(), U256::zero()),
                    expect: Expect::Ok,
                },
                TestAction::Revoke {
                    session: 0,
                    expect: Expect::Ok,
                },
                TestAction::Redeem {
                    session: 0,
                    call: mint_call(U256::one(), U256::zero()),
                    expect: Expect::Err(WardenError::Revoked),
                },
                TestAction::Revoke {
                    session: 0,
                    expect: Expect::Err(WardenError::AlreadyRevoked),
                },
                TestAction::AdvanceTo { offset: 3_601 },
                TestAction::Redeem {
                    session: 1,
                    call: mint_call(U256::one(), U256::zero()),
                    expect: Expect::Err(WardenError::Expired),
                },
            ],
            invariant_checks: vec![
                InvariantCheck::SingleRoot,
                InvariantCheck::SessionRevoked { session: 0 },
            ],
        }
    }

    pub fn two_window_job() -> TestScenario {
        TestScenario {
            name: "Two Window Job".to_string(),
            description: "A job repeating twice every 60s runs at T and T+60 only".to_string(),
            steps: vec![
                TestAction::Schedule {
                    start_offset: 0,
                    every: 60,
                    repeats: 2,
                },
                TestAction::ExecuteJob {
                    job: 0,
                    expect: Expect::Ok,
                },
                TestAction::AdvanceTo { offset: 30 },
                TestAction::ExecuteJob {
                    job: 0,
                    expect: Expect::Err(WardenError::NotEligible),
                },
                TestAction::AdvanceTo { offset: 60 },
                TestAction::ExecuteJob {
                    job: 0,
                    expect: Expect::Ok,
                },
                TestAction::AdvanceTo { offset: 120 },
                TestAction::ExecuteJob {
                    job: 0,
                    expect: Expect::Err(WardenError::Exhausted),
                },
            ],
            invariant_checks: vec![
                InvariantCheck::ExecutionCount { job: 0, count: 2 },
                InvariantCheck::OneExecutionPerWindow { job: 0 },
            ],
        }
    }
}

/// Runs every predefined scenario on a fresh harness.
pub async fn run_all() -> Result<Vec<(TestScenario, Result<TestResults>)>> {
    let mut outcomes = Vec::new();
    for scenario in scenarios::all() {
        let mut harness = GoldenHarness::new().await?;
        let results = harness.run_scenario(&scenario).await;
        outcomes.push((scenario, results));
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(scenario: TestScenario) {
        let mut harness = GoldenHarness::new().await.unwrap();
        let results = harness.run_scenario(&scenario).await.unwrap();
        for result in &results.invariant_results {
            assert!(result.passed, "{:?}: {:?}", result.invariant, result.error);
        }
    }

    #[tokio::test]
    async fn test_sudo_session() {
        run(scenarios::sudo_session()).await;
    }

    #[tokio::test]
    async fn test_equal_rule_and_value_limit() {
        run(scenarios::equal_rule_and_value_limit()).await;
    }

    #[tokio::test]
    async fn test_revocation() {
        run(scenarios::revocation()).await;
    }

    #[tokio::test]
    async fn test_two_window_job() {
        run(scenarios::two_window_job()).await;
    }

    #[tokio::test]
    async fn test_wrong_expectation_is_reported() {
        let mut harness = GoldenHarness::new().await.unwrap();
        let scenario = TestScenario {
            name: "Mismatch".to_string(),
            description: String::new(),
            steps: vec![
                TestAction::Schedule {
                    start_offset: 60,
                    every: 60,
                    repeats: 1,
                },
                TestAction::ExecuteJob {
                    job: 0,
                    expect: Expect::Ok,
                },
            ],
            invariant_checks: vec![],
        };
        let err = harness.run_scenario(&scenario).await.unwrap_err();
        assert!(err.to_string().contains("NotEligible") || err.to_string().contains("step 1"));
    }
}
