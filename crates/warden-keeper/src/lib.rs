//! Warden Keeper
//!
//! Polls the ledger for scheduled jobs and triggers every job whose window
//! is open. Several keepers may run against the same ledger; the ledger
//! settles each window in favour of exactly one of them.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_chain::Ledger;
use warden_core::{Error, JobRegistry, Result};
use warden_spec::{ExecutionReceipt, WardenError};

#[derive(Clone)]
pub struct Keeper {
    name: String,
    ledger: Arc<dyn Ledger>,
    jobs: JobRegistry,
    poll_interval: Duration,
}

impl Keeper {
    pub fn new(
        name: impl Into<String>,
        ledger: Arc<dyn Ledger>,
        jobs: JobRegistry,
        poll_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            ledger,
            jobs,
            poll_interval,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs one pass over all jobs and returns the executions this keeper won.
    pub async fn tick(&self) -> Result<Vec<ExecutionReceipt>> {
        let now = self.ledger.timestamp().await?;
        let due: Vec<_> = self
            .ledger
            .scheduled_jobs()
            .await?
            .into_iter()
            .filter(|record| JobRegistry::is_eligible(&record.job, now))
            .collect();

        if due.is_empty() {
            return Ok(Vec::new());
        }
        debug!("[{}] {} job(s) due at {}", self.name, due.len(), now);

        let attempts = join_all(due.iter().map(|record| self.jobs.execute(record, now))).await;

        let mut won = Vec::new();
        for (record, attempt) in due.iter().zip(attempts) {
            match attempt {
                Ok(receipt) => {
                    info!(
                        "[{}] Executed job {} ({} of {:?})",
                        self.name, record.id, receipt.execution_index, record.job.number_of_repeats
                    );
                    won.push(receipt);
                }
                Err(Error::Validation(WardenError::NotEligible)) => {
                    debug!("[{}] Job {} already executed this window", self.name, record.id);
                }
                Err(Error::Validation(WardenError::JobNotFound(id))) => {
                    debug!("[{}] Job {} was uninstalled", self.name, id);
                }
                Err(e) if e.is_retryable() => {
                    warn!("[{}] Job {} deferred to next poll: {}", self.name, record.id, e)
                }
                Err(e) => warn!("[{}] Job {} failed: {}", self.name, record.id, e),
            }
        }
        Ok(won)
    }

    /// Polls until `cancel` fires, forwarding every won execution.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        receipts: mpsc::UnboundedSender<ExecutionReceipt>,
    ) -> Result<()> {
        info!("[{}] Keeper started, polling every {:?}", self.name, self.poll_interval);

        loop {
            match self.tick().await {
                Ok(won) => {
                    for receipt in won {
                        if receipts.send(receipt).is_err() {
                            warn!("[{}] Receipt consumer dropped", self.name);
                        }
                    }
                }
                Err(e) => warn!("[{}] Poll failed: {}", self.name, e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("[{}] Keeper stopped", self.name);
        Ok(())
    }
}
