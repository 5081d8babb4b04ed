//! Recurring transfer jobs.
//!
//! A job's `n`-th execution window opens at `start_date + n * repeat_every`
//! and stays open until the execution happens; windows never close on their
//! own. Only the ledger advances `executed_count`.

use std::fmt;

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{id, parse_units};
use serde::{Deserialize, Serialize};

use crate::call::Call;
use crate::error::WardenError;
use crate::{EXECUTE_ORDER_SIGNATURE, TRANSFER_SIGNATURE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Repeats {
    Times(u32),
    Unbounded,
}

impl Repeats {
    pub fn limit(&self) -> Option<u32> {
        match self {
            Repeats::Times(n) => Some(*n),
            Repeats::Unbounded => None,
        }
    }
}

/// Recurring transfer as requested by the account owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub token_address: Address,
    pub token_decimals: u8,
    /// Decimal amount in whole tokens, e.g. `"0.5"`.
    pub amount_per_execution: String,
    pub recipient: Address,
    pub start_date: u64,
    pub repeat_every: u64,
    pub number_of_repeats: Repeats,
}

impl JobSpec {
    /// Validates the request and produces a fresh job.
    ///
    /// A start date further than `grace_secs` in the past is rejected: a job
    /// registered that late would have a backlog of windows already open.
    pub fn into_job(self, now: u64, grace_secs: u64) -> Result<ScheduledJob, WardenError> {
        if self.repeat_every == 0 {
            return Err(WardenError::InvalidSchedule(
                "repeatEvery must be positive".to_string(),
            ));
        }
        if self.number_of_repeats == Repeats::Times(0) {
            return Err(WardenError::InvalidSchedule(
                "numberOfRepeats must be positive".to_string(),
            ));
        }
        if self.start_date.saturating_add(grace_secs) < now {
            return Err(WardenError::InvalidSchedule(format!(
                "startDate {} is more than {}s in the past",
                self.start_date, grace_secs
            )));
        }
        if self.token_address.is_zero() {
            return Err(WardenError::InvalidSchedule(
                "token address is zero".to_string(),
            ));
        }
        if self.recipient.is_zero() {
            return Err(WardenError::InvalidSchedule("recipient is zero".to_string()));
        }

        if self.amount_per_execution.trim_start().starts_with('-') {
            return Err(WardenError::InvalidSchedule(
                "amountPerExecution must be positive".to_string(),
            ));
        }
        let fraction_digits = self
            .amount_per_execution
            .trim()
            .split_once('.')
            .map_or(0, |(_, fraction)| fraction.len());
        if fraction_digits > self.token_decimals as usize {
            return Err(WardenError::InvalidSchedule(format!(
                "amount {} has more than {} decimals",
                self.amount_per_execution, self.token_decimals
            )));
        }
        let amount: U256 = parse_units(&self.amount_per_execution, self.token_decimals as u32)
            .map_err(|e| {
                WardenError::InvalidSchedule(format!(
                    "amount {}: {}",
                    self.amount_per_execution, e
                ))
            })?
            .into();
        if amount.is_zero() {
            return Err(WardenError::InvalidSchedule(
                "amountPerExecution must be positive".to_string(),
            ));
        }

        Ok(ScheduledJob {
            token: self.token_address,
            recipient: self.recipient,
            amount_per_execution: amount,
            start_date: self.start_date,
            repeat_every: self.repeat_every,
            number_of_repeats: self.number_of_repeats,
            executed_count: 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub token: Address,
    pub recipient: Address,
    /// In token base units.
    pub amount_per_execution: U256,
    pub start_date: u64,
    pub repeat_every: u64,
    pub number_of_repeats: Repeats,
    pub executed_count: u32,
}

impl ScheduledJob {
    /// Opening time of the next window; `None` if it lies beyond `u64`.
    pub fn next_window(&self) -> Option<u64> {
        self.repeat_every
            .checked_mul(self.executed_count as u64)?
            .checked_add(self.start_date)
    }

    pub fn is_exhausted(&self) -> bool {
        self.number_of_repeats
            .limit()
            .map_or(false, |limit| self.executed_count >= limit)
    }

    pub fn is_eligible(&self, now: u64) -> bool {
        !self.is_exhausted() && self.next_window().map_or(false, |window| now >= window)
    }

    pub fn check_execution(&self, now: u64) -> Result<(), WardenError> {
        if self.is_exhausted() {
            return Err(WardenError::Exhausted);
        }
        if !self.is_eligible(now) {
            return Err(WardenError::NotEligible);
        }
        Ok(())
    }

    pub fn transfer_call_data(&self) -> Bytes {
        let mut data = id(TRANSFER_SIGNATURE).to_vec();
        data.extend(abi::encode(&[
            Token::Address(self.recipient),
            Token::Uint(self.amount_per_execution),
        ]));
        data.into()
    }

    /// The call the account makes on each execution.
    pub fn execution(&self) -> Call {
        Call::new(self.token, U256::zero(), self.transfer_call_data())
    }
}

/// Installable form of a job: the module address plus its init data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTransferModule {
    pub module: Address,
    pub job: ScheduledJob,
    pub init_data: Bytes,
}

impl ScheduledTransferModule {
    pub fn new(module: Address, job: ScheduledJob) -> Self {
        let execution = job.execution();
        let order = abi::encode(&[
            Token::Address(execution.to),
            Token::Uint(execution.value),
            Token::Bytes(execution.data.to_vec()),
        ]);
        let init_data = abi::encode(&[
            Token::Uint(U256::from(job.repeat_every)),
            Token::Uint(U256::from(job.number_of_repeats.limit().unwrap_or(0))),
            Token::Uint(U256::from(job.start_date)),
            Token::Bytes(order),
        ]);
        Self {
            module,
            job,
            init_data: init_data.into(),
        }
    }
}

/// A job as registered on a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub account: Address,
    pub module: Address,
    pub job: ScheduledJob,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReceipt {
    pub job_id: JobId,
    /// Value of `executed_count` after this execution.
    pub execution_index: u32,
    pub executed_at: u64,
    pub block_number: u64,
    pub target: Address,
    pub value: U256,
    pub call_data: Bytes,
    pub tx_hash: H256,
}

/// Public keeper trigger: `executeOrder(jobId)` on the module.
pub fn encode_trigger(module: Address, job_id: JobId) -> Call {
    let mut data = id(EXECUTE_ORDER_SIGNATURE).to_vec();
    data.extend(abi::encode(&[Token::Uint(U256::from(job_id.0))]));
    Call::new(module, U256::zero(), data)
}

pub fn decode_trigger(data: &[u8]) -> Result<JobId, WardenError> {
    if data.len() < 4 || data[..4] != id(EXECUTE_ORDER_SIGNATURE) {
        return Err(WardenError::Malformed(
            "calldata is not an executeOrder call".to_string(),
        ));
    }
    let tokens = abi::decode(&[ParamType::Uint(256)], &data[4..])
        .map_err(|e| WardenError::Malformed(format!("executeOrder calldata: {}", e)))?;
    match tokens.as_slice() {
        [Token::Uint(value)] if *value <= U256::from(u64::MAX) => Ok(JobId(value.as_u64())),
        _ => Err(WardenError::Malformed("job id out of range".to_string())),
    }
}
