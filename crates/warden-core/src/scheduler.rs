//! Scheduled-job registry.
//!
//! Registering a job turns a transfer request into an installable
//! module. Once installed, any key may trigger an execution; the ledger's
//! compare-and-increment on the execution counter guarantees at most one
//! execution per window.

use std::sync::Arc;

use ethers::types::{Address, Bytes};
use tracing::{debug, info};
use warden_chain::Ledger;
use warden_crypto::Signer;
use warden_spec::{
    encode_trigger, ActionOutcome, Call, Clock, ExecutionReceipt, JobId, JobRecord, JobSpec,
    ManagementAction, ScheduledJob, ScheduledTransferModule,
};

use crate::composition::{unexpected, ValidatorComposer};
use crate::error::Result;

#[derive(Clone)]
pub struct JobRegistry {
    ledger: Arc<dyn Ledger>,
    composer: ValidatorComposer,
    clock: Arc<dyn Clock>,
    module: Address,
    start_grace_secs: u64,
}

impl JobRegistry {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        composer: ValidatorComposer,
        clock: Arc<dyn Clock>,
        module: Address,
        start_grace_secs: u64,
    ) -> Self {
        Self {
            ledger,
            composer,
            clock,
            module,
            start_grace_secs,
        }
    }

    pub fn module_address(&self) -> Address {
        self.module
    }

    /// Validates `spec` and encodes it as a module ready to install.
    pub fn register_job(&self, spec: JobSpec) -> Result<ScheduledTransferModule> {
        let job = spec.into_job(self.clock.now(), self.start_grace_secs)?;
        debug!(
            "Registered job paying {} to {:?} every {}s",
            job.amount_per_execution, job.recipient, job.repeat_every
        );
        Ok(ScheduledTransferModule::new(self.module, job))
    }

    pub async fn install(
        &self,
        account: Address,
        root: &dyn Signer,
        module: ScheduledTransferModule,
    ) -> Result<JobId> {
        match self
            .composer
            .apply(account, root, ManagementAction::InstallModule { module })
            .await?
        {
            ActionOutcome::ModuleInstalled(job_id) => {
                info!("Installed scheduled job {} on {:?}", job_id, account);
                Ok(job_id)
            }
            other => Err(unexpected(other)),
        }
    }

    /// Removes a job, possibly before it is exhausted.
    pub async fn uninstall(&self, account: Address, root: &dyn Signer, job_id: JobId) -> Result<()> {
        self.composer
            .apply(account, root, ManagementAction::UninstallModule { job_id })
            .await?;
        info!("Uninstalled scheduled job {} from {:?}", job_id, account);
        Ok(())
    }

    pub fn is_eligible(job: &ScheduledJob, now: u64) -> bool {
        job.is_eligible(now)
    }

    pub fn encode_transfer(job: &ScheduledJob) -> Bytes {
        job.transfer_call_data()
    }

    /// Executes the window `record` was read in.
    ///
    /// The ledger only accepts the execution if the counter still matches
    /// the snapshot, so a racer on the same window gets `NotEligible`.
    pub async fn execute(&self, record: &JobRecord, now: u64) -> Result<ExecutionReceipt> {
        record.job.check_execution(now)?;
        let receipt = self
            .ledger
            .execute_job(record.id, Some(record.job.executed_count))
            .await?;
        Ok(receipt)
    }

    /// Reads the job fresh from the ledger and executes it at ledger time.
    pub async fn execute_scheduled_job(&self, job_id: JobId) -> Result<ExecutionReceipt> {
        let record = self.ledger.job(job_id).await?;
        let now = self.ledger.timestamp().await?;
        self.execute(&record, now).await
    }

    /// The public trigger call any key can send to run a job.
    pub fn trigger(&self, job_id: JobId) -> Call {
        encode_trigger(self.module, job_id)
    }

    pub async fn installed_jobs(&self, account: Address) -> Result<Vec<JobRecord>> {
        Ok(self
            .ledger
            .scheduled_jobs()
            .await?
            .into_iter()
            .filter(|record| record.account == account)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::LocalWallet;
    use ethers::types::U256;
    use warden_chain::MemoryLedger;
    use warden_crypto::{generate_key, WardenCrypto, WardenDomain};
    use warden_spec::{AccountDeployment, AccountVersion, ManualClock, Repeats, WardenError};

    const T: u64 = 1_700_000_000;

    async fn setup() -> (JobRegistry, MemoryLedger, ManualClock, LocalWallet, Address) {
        let crypto = WardenCrypto::new(WardenDomain::new(31337, Address::repeat_byte(0xe0)));
        let clock = ManualClock::new(T);
        let ledger = MemoryLedger::new(crypto.clone(), Arc::new(clock.clone()));
        let root = generate_key();
        let account = Address::repeat_byte(0xac);
        ledger
            .deploy_account(AccountDeployment {
                address: account,
                version: AccountVersion::default(),
                root_key: Signer::address(&root),
                index: U256::zero(),
            })
            .await
            .unwrap();

        let shared: Arc<dyn Ledger> = Arc::new(ledger.clone());
        let registry = JobRegistry::new(
            shared.clone(),
            ValidatorComposer::new(shared, crypto),
            Arc::new(clock.clone()),
            Address::repeat_byte(0x5c),
            900,
        );
        (registry, ledger, clock, root, account)
    }

    fn spec(start: u64, repeats: u32) -> JobSpec {
        JobSpec {
            token_address: Address::repeat_byte(0x70),
            token_decimals: 18,
            amount_per_execution: "0.25".to_string(),
            recipient: Address::repeat_byte(0x71),
            start_date: start,
            repeat_every: 60,
            number_of_repeats: Repeats::Times(repeats),
        }
    }

    #[tokio::test]
    async fn test_two_window_job() {
        let (registry, _ledger, clock, root, account) = setup().await;
        let module = registry.register_job(spec(T, 2)).unwrap();
        let job_id = registry.install(account, &root, module).await.unwrap();

        let first = registry.execute_scheduled_job(job_id).await.unwrap();
        assert_eq!(first.execution_index, 1);
        assert_eq!(first.call_data, registry.installed_jobs(account).await.unwrap()[0].job.transfer_call_data());

        clock.set(T + 30);
        let err = registry.execute_scheduled_job(job_id).await.unwrap_err();
        assert_eq!(err.validation(), Some(&WardenError::NotEligible));

        clock.set(T + 60);
        registry.execute_scheduled_job(job_id).await.unwrap();

        clock.set(T + 120);
        let err = registry.execute_scheduled_job(job_id).await.unwrap_err();
        assert_eq!(err.validation(), Some(&WardenError::Exhausted));
    }

    #[tokio::test]
    async fn test_stale_snapshot_loses_the_race() {
        let (registry, _ledger, _clock, root, account) = setup().await;
        let module = registry.register_job(spec(T, 3)).unwrap();
        let job_id = registry.install(account, &root, module).await.unwrap();

        let snapshot = registry.installed_jobs(account).await.unwrap().remove(0);
        registry.execute(&snapshot, T).await.unwrap();
        let err = registry.execute(&snapshot, T).await.unwrap_err();
        assert_eq!(err.validation(), Some(&WardenError::NotEligible));
        assert_eq!(job_id, snapshot.id);
    }

    #[tokio::test]
    async fn test_register_rejects_stale_start() {
        let (registry, ..) = setup().await;
        let err = registry.register_job(spec(T - 901, 1)).unwrap_err();
        assert!(matches!(
            err.validation(),
            Some(WardenError::InvalidSchedule(_))
        ));
        assert!(registry.register_job(spec(T + 3_600, 1)).is_ok());
    }

    #[tokio::test]
    async fn test_keyless_trigger_and_uninstall() {
        let (registry, ledger, _clock, root, account) = setup().await;
        let module = registry.register_job(spec(T, 5)).unwrap();
        let job_id = registry.install(account, &root, module).await.unwrap();

        let trigger = registry.trigger(job_id);
        assert_eq!(trigger.to, registry.module_address());
        assert!(trigger.value.is_zero());
        ledger.trigger(&trigger).await.unwrap();

        registry.uninstall(account, &root, job_id).await.unwrap();
        assert!(registry.installed_jobs(account).await.unwrap().is_empty());
        let err = registry.execute_scheduled_job(job_id).await.unwrap_err();
        assert_eq!(err.validation(), Some(&WardenError::JobNotFound(job_id)));
    }

    #[test]
    fn test_encode_transfer_is_pure() {
        let job = spec(T, 1).into_job(T, 0).unwrap();
        assert_eq!(
            JobRegistry::encode_transfer(&job),
            JobRegistry::encode_transfer(&job.clone())
        );
        assert!(!JobRegistry::is_eligible(&job, T - 1));
        assert!(JobRegistry::is_eligible(&job, T));
    }
}
