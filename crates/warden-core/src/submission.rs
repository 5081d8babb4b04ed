//! Authorization submission pipeline.
//!
//! Submission is two-phase: [`Submitter::submit`] hands the operation to the
//! ledger and returns a [`PendingOperation`]; [`Submitter::wait`] polls until
//! the ledger reports a receipt. Dropping the wait future stops waiting but
//! does not withdraw the operation.

use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, Bytes, H256};
use tracing::{debug, info, warn};
use warden_chain::Ledger;
use warden_crypto::{Signer, WardenCrypto};
use warden_spec::{
    encode_execute, Call, EnableData, GasParameters, OpReceipt, OpStatus, UserOperation,
    ValidatorId, WardenError,
};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
}

impl WaitOptions {
    /// A `timeout_ms` of zero waits forever.
    pub fn new(poll_interval: Duration, timeout_ms: u64) -> Self {
        Self {
            poll_interval,
            timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
        }
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), 0)
    }
}

/// An operation the ledger has accepted for inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOperation {
    pub op_hash: H256,
    pub sender: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed(OpReceipt),
    Rejected {
        receipt: OpReceipt,
        reason: WardenError,
    },
}

impl Confirmation {
    pub fn receipt(&self) -> &OpReceipt {
        match self {
            Confirmation::Confirmed(receipt) => receipt,
            Confirmation::Rejected { receipt, .. } => receipt,
        }
    }

    /// Turns a rejection into a validation error.
    pub fn into_result(self) -> Result<OpReceipt> {
        match self {
            Confirmation::Confirmed(receipt) => Ok(receipt),
            Confirmation::Rejected { reason, .. } => Err(Error::Validation(reason)),
        }
    }
}

#[derive(Clone)]
pub struct Submitter {
    ledger: Arc<dyn Ledger>,
    crypto: WardenCrypto,
    gas: GasParameters,
    wait: WaitOptions,
}

impl Submitter {
    pub fn new(ledger: Arc<dyn Ledger>, crypto: WardenCrypto) -> Self {
        Self {
            ledger,
            crypto,
            gas: GasParameters::default(),
            wait: WaitOptions::default(),
        }
    }

    pub fn with_gas(mut self, gas: GasParameters) -> Self {
        self.gas = gas;
        self
    }

    /// Sponsors every operation through the given paymaster data.
    pub fn with_paymaster(mut self, paymaster_and_data: Bytes) -> Self {
        self.gas.paymaster_and_data = paymaster_and_data;
        self
    }

    pub fn with_wait_options(mut self, wait: WaitOptions) -> Self {
        self.wait = wait;
        self
    }

    pub fn crypto(&self) -> &WardenCrypto {
        &self.crypto
    }

    /// Builds an unsigned operation at the account's current nonce.
    pub async fn build(
        &self,
        account: Address,
        validator: ValidatorId,
        call: &Call,
        enable: Option<EnableData>,
    ) -> Result<UserOperation> {
        let nonce = self.ledger.nonce(account).await?;
        Ok(UserOperation {
            sender: account,
            nonce,
            call_data: encode_execute(call),
            validator,
            enable,
            gas: self.gas.clone(),
            signature: Bytes::default(),
        })
    }

    pub async fn sign(&self, mut op: UserOperation, signer: &dyn Signer) -> Result<UserOperation> {
        let op_hash = self.crypto.user_op_hash(&op);
        op.signature = signer.sign_digest(op_hash).await?;
        Ok(op)
    }

    pub async fn submit(&self, op: UserOperation) -> Result<PendingOperation> {
        let sender = op.sender;
        let op_hash = self.ledger.submit(op).await?;
        info!("Submitted user operation {:?} from {:?}", op_hash, sender);
        Ok(PendingOperation { op_hash, sender })
    }

    /// Polls for the receipt of `pending` until it exists or the timeout expires.
    pub async fn wait(&self, pending: &PendingOperation) -> Result<Confirmation> {
        let poll = async {
            loop {
                if let Some(receipt) = self.ledger.receipt(pending.op_hash).await? {
                    return Ok::<_, Error>(receipt);
                }
                debug!("No receipt yet for {:?}", pending.op_hash);
                tokio::time::sleep(self.wait.poll_interval).await;
            }
        };

        let receipt = match self.wait.timeout {
            Some(timeout) => tokio::time::timeout(timeout, poll)
                .await
                .map_err(|_| Error::Timeout(pending.op_hash))??,
            None => poll.await?,
        };

        Ok(match receipt.status.clone() {
            OpStatus::Included => {
                info!(
                    "User operation {:?} confirmed in block {}",
                    receipt.op_hash, receipt.block_number
                );
                Confirmation::Confirmed(receipt)
            }
            OpStatus::Rejected(reason) => {
                warn!("User operation {:?} rejected: {}", receipt.op_hash, reason);
                Confirmation::Rejected { receipt, reason }
            }
        })
    }

    pub async fn send(&self, op: UserOperation) -> Result<Confirmation> {
        let pending = self.submit(op).await?;
        self.wait(&pending).await
    }

    /// Builds, signs and sends a call through the account's root validator.
    pub async fn send_as_root(
        &self,
        account: Address,
        root: &dyn Signer,
        call: &Call,
    ) -> Result<Confirmation> {
        let state = self.ledger.account_state(account).await?;
        let root_id = state.root.ok_or(WardenError::NotInstalled)?;
        let op = self.build(account, root_id, call, None).await?;
        let op = self.sign(op, root).await?;
        self.send(op).await
    }
}
