//! In-memory ledger.
//!
//! One mutex guards the whole state, so every request is applied atomically
//! and in arrival order. Operations are validated at inclusion time, never
//! at submission, which is what makes a revocation landing between the two
//! effective.
//!
//! A ledger opened on a snapshot file is shared with other processes: every
//! request takes a lock on a sidecar `.lock` file, reloads the snapshot, and
//! mutating requests write it back before the lock is released.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use warden_crypto::WardenCrypto;
use warden_spec::{
    decode_execute, decode_trigger, AccountDeployment, AccountState, AccountVersion,
    ActionOutcome, Authorization, Call, Clock, ExecutionReceipt, InstalledModule,
    InstalledValidator, JobId, JobRecord, ManagementAction, OpReceipt, OpStatus, Repeats, Role,
    UserOperation, Validator, ValidatorId, ValidatorStatus, WardenError,
};

use crate::{Ledger, LedgerError, LedgerResult};

/// Operation receipts kept for lookup; older ones are forgotten.
pub const MAX_RECEIPTS: usize = 4096;
/// Job execution receipts kept as history.
pub const MAX_EXECUTIONS: usize = 4096;

#[derive(Debug, Clone)]
struct ValidatorEntry {
    seq: u64,
    validator: Validator,
}

#[derive(Debug, Clone)]
struct AccountRecord {
    address: Address,
    version: AccountVersion,
    nonce: U256,
    root: Option<ValidatorId>,
    /// Key of the last uninstalled root, the only key that may install a new one.
    retired_root: Option<Address>,
    validators: HashMap<ValidatorId, ValidatorEntry>,
    modules: Vec<InstalledModule>,
}

impl AccountRecord {
    fn root_key(&self) -> Option<Address> {
        self.root
            .and_then(|id| self.validators.get(&id))
            .map(|entry| entry.validator.key())
    }

    fn state(&self) -> AccountState {
        let mut entries: Vec<&ValidatorEntry> = self.validators.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        AccountState {
            address: self.address,
            version: self.version,
            nonce: self.nonce,
            root: self.root,
            validators: entries
                .into_iter()
                .map(|entry| InstalledValidator::from(entry.validator.clone()))
                .collect(),
            modules: self.modules.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    block_number: u64,
    next_seq: u64,
    next_job_id: u64,
    accounts: HashMap<Address, AccountRecord>,
    jobs: BTreeMap<JobId, JobRecord>,
    revoked: HashSet<(Address, ValidatorId)>,
    pending: VecDeque<(H256, UserOperation)>,
    receipts: HashMap<H256, OpReceipt>,
    /// Insertion order of `receipts`, oldest first.
    receipt_order: VecDeque<H256>,
    executions: VecDeque<ExecutionReceipt>,
}

impl LedgerState {
    /// Replaces everything but the unmined operations with `snapshot`.
    fn restore(&mut self, snapshot: Snapshot) {
        let pending = std::mem::take(&mut self.pending);
        *self = snapshot.into();
        self.pending = pending;
    }

    fn record_receipt(&mut self, receipt: OpReceipt) {
        let op_hash = receipt.op_hash;
        if self.receipts.insert(op_hash, receipt).is_none() {
            self.receipt_order.push_back(op_hash);
        }
        while self.receipt_order.len() > MAX_RECEIPTS {
            if let Some(oldest) = self.receipt_order.pop_front() {
                self.receipts.remove(&oldest);
            }
        }
    }

    fn record_execution(&mut self, receipt: ExecutionReceipt) {
        self.executions.push_back(receipt);
        while self.executions.len() > MAX_EXECUTIONS {
            self.executions.pop_front();
        }
    }

    fn account(&self, address: Address) -> Result<&AccountRecord, WardenError> {
        self.accounts
            .get(&address)
            .ok_or(WardenError::AccountNotFound(address))
    }

    fn allocate_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn deploy(&mut self, deployment: AccountDeployment) -> Result<AccountState, WardenError> {
        if self.accounts.contains_key(&deployment.address) {
            return Err(WardenError::AccountAlreadyDeployed(deployment.address));
        }

        let root = Validator::root(deployment.root_key, deployment.version);
        let root_id = root.id();
        let seq = self.allocate_seq();
        let record = AccountRecord {
            address: deployment.address,
            version: deployment.version,
            nonce: U256::zero(),
            root: Some(root_id),
            retired_root: None,
            validators: HashMap::from([(root_id, ValidatorEntry { seq, validator: root })]),
            modules: Vec::new(),
        };
        let state = record.state();
        self.accounts.insert(deployment.address, record);
        self.block_number += 1;
        Ok(state)
    }

    fn status(&self, account: Address, id: ValidatorId) -> Result<ValidatorStatus, WardenError> {
        let record = self.account(account)?;
        Ok(if record.validators.contains_key(&id) {
            ValidatorStatus::Installed
        } else if self.revoked.contains(&(account, id)) {
            ValidatorStatus::Revoked
        } else {
            ValidatorStatus::NotInstalled
        })
    }

    fn apply(
        &mut self,
        crypto: &WardenCrypto,
        account: Address,
        action: ManagementAction,
        authorization: Authorization,
    ) -> Result<ActionOutcome, WardenError> {
        let record = self.account(account)?;
        if authorization.nonce != record.nonce {
            return Err(WardenError::NonceMismatch {
                expected: record.nonce,
                actual: authorization.nonce,
            });
        }

        let authority = match (record.root_key(), &action) {
            (Some(key), _) => key,
            (
                None,
                ManagementAction::InstallValidator {
                    validator: Validator::Root(_),
                },
            ) => record.retired_root.ok_or(WardenError::Unauthorized)?,
            (None, _) => return Err(WardenError::Unauthorized),
        };
        let digest = crypto.management_digest(account, authorization.nonce, &action);
        let signer = crypto.recover(digest, &authorization.signature)?;
        if signer != authority {
            return Err(WardenError::Unauthorized);
        }

        let seq = self.allocate_seq();
        let Some(record) = self.accounts.get_mut(&account) else {
            return Err(WardenError::AccountNotFound(account));
        };

        let outcome = match action {
            ManagementAction::InstallValidator { validator } => {
                if !validator.version().is_compatible_with(&record.version) {
                    return Err(WardenError::IncompatibleVersion {
                        account: record.version,
                        validator: validator.version(),
                    });
                }
                let id = validator.id();
                match validator.role() {
                    Role::Root => {
                        if record.root.is_some() {
                            return Err(WardenError::AlreadyHasRoot);
                        }
                        record.root = Some(id);
                        record.retired_root = None;
                    }
                    Role::Scoped => {
                        if self.revoked.contains(&(account, id)) {
                            return Err(WardenError::Revoked);
                        }
                    }
                }
                record
                    .validators
                    .entry(id)
                    .or_insert(ValidatorEntry { seq, validator });
                ActionOutcome::ValidatorInstalled(id)
            }
            ManagementAction::UninstallValidator { id } => {
                let key = match record.validators.get(&id) {
                    Some(entry) => entry.validator.key(),
                    None if self.revoked.contains(&(account, id)) => {
                        return Err(WardenError::AlreadyRevoked)
                    }
                    None => return Err(WardenError::NotInstalled),
                };
                if record.root == Some(id) {
                    record.root = None;
                    record.retired_root = Some(key);
                } else {
                    self.revoked.insert((account, id));
                }
                record.validators.remove(&id);
                ActionOutcome::ValidatorUninstalled(id)
            }
            ManagementAction::RevokeValidator { id } => {
                if record.root == Some(id) {
                    return Err(WardenError::Malformed(
                        "the root validator cannot be revoked".to_string(),
                    ));
                }
                if self.revoked.contains(&(account, id)) {
                    return Err(WardenError::AlreadyRevoked);
                }
                record.validators.remove(&id);
                self.revoked.insert((account, id));
                ActionOutcome::ValidatorRevoked(id)
            }
            ManagementAction::InstallModule { module } => {
                if module.job.repeat_every == 0 || module.job.number_of_repeats == Repeats::Times(0)
                {
                    return Err(WardenError::InvalidSchedule(
                        "module carries an empty schedule".to_string(),
                    ));
                }
                let job_id = JobId(self.next_job_id);
                self.next_job_id += 1;

                let mut job = module.job;
                job.executed_count = 0;
                self.jobs.insert(
                    job_id,
                    JobRecord {
                        id: job_id,
                        account,
                        module: module.module,
                        job,
                    },
                );
                record.modules.push(InstalledModule {
                    job_id,
                    module: module.module,
                });
                ActionOutcome::ModuleInstalled(job_id)
            }
            ManagementAction::UninstallModule { job_id } => {
                match self.jobs.get(&job_id) {
                    Some(job) if job.account == account => {}
                    _ => return Err(WardenError::JobNotFound(job_id)),
                }
                self.jobs.remove(&job_id);
                record.modules.retain(|module| module.job_id != job_id);
                ActionOutcome::ModuleUninstalled(job_id)
            }
        };

        record.nonce += U256::one();
        self.block_number += 1;
        Ok(outcome)
    }

    /// Validates an operation against current state and applies it.
    /// Nothing is mutated unless every check passes.
    fn include(
        &mut self,
        crypto: &WardenCrypto,
        op: &UserOperation,
        now: u64,
    ) -> Result<(), WardenError> {
        let record = self.account(op.sender)?;
        let signer = crypto.recover(crypto.user_op_hash(op), &op.signature)?;

        let (validator, enabling) = match record.validators.get(&op.validator) {
            Some(entry) => (entry.validator.clone(), false),
            None if self.revoked.contains(&(op.sender, op.validator)) => {
                return Err(WardenError::Revoked)
            }
            None => {
                let Some(enable) = &op.enable else {
                    return Err(WardenError::NotInstalled);
                };
                if enable.validator.id() != op.validator {
                    return Err(WardenError::Malformed(
                        "enable data does not match the referenced validator".to_string(),
                    ));
                }
                if !enable.validator.version.is_compatible_with(&record.version) {
                    return Err(WardenError::IncompatibleVersion {
                        account: record.version,
                        validator: enable.validator.version,
                    });
                }
                let root_key = record.root_key().ok_or(WardenError::Unauthorized)?;
                let grantor = crypto.recover(
                    crypto.enable_digest(op.sender, &enable.validator),
                    &enable.root_signature,
                )?;
                if grantor != root_key {
                    return Err(WardenError::Unauthorized);
                }
                (Validator::Scoped(enable.validator.clone()), true)
            }
        };

        if op.nonce != record.nonce {
            return Err(WardenError::NonceMismatch {
                expected: record.nonce,
                actual: op.nonce,
            });
        }

        let call = decode_execute(&op.call_data)?;
        validator.authorize(signer, &call, now)?;

        let seq = self.allocate_seq();
        if let Some(record) = self.accounts.get_mut(&op.sender) {
            if enabling {
                debug!("Enabled validator {} on {:?} on first use", op.validator, op.sender);
                record
                    .validators
                    .insert(op.validator, ValidatorEntry { seq, validator });
            }
            record.nonce += U256::one();
        }
        Ok(())
    }

    fn mine(&mut self, crypto: &WardenCrypto, now: u64) -> Vec<OpReceipt> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        self.block_number += 1;
        let block_number = self.block_number;

        let mut receipts = Vec::with_capacity(self.pending.len());
        while let Some((op_hash, op)) = self.pending.pop_front() {
            let status = match self.include(crypto, &op, now) {
                Ok(()) => {
                    info!(
                        "User operation {:?} from {:?} included in block {}",
                        op_hash, op.sender, block_number
                    );
                    OpStatus::Included
                }
                Err(e) => {
                    warn!("User operation {:?} from {:?} rejected: {}", op_hash, op.sender, e);
                    OpStatus::Rejected(e)
                }
            };
            let receipt = OpReceipt {
                op_hash,
                status,
                block_number,
                tx_hash: tx_hash(op_hash.as_bytes(), block_number),
            };
            self.record_receipt(receipt.clone());
            receipts.push(receipt);
        }
        receipts
    }

    fn execute_job(
        &mut self,
        id: JobId,
        expected_count: Option<u32>,
        now: u64,
    ) -> Result<ExecutionReceipt, WardenError> {
        let record = self.jobs.get_mut(&id).ok_or(WardenError::JobNotFound(id))?;
        if let Some(expected) = expected_count {
            if record.job.executed_count != expected {
                // someone else took this window
                return Err(WardenError::NotEligible);
            }
        }
        record.job.check_execution(now)?;
        record.job.executed_count = record
            .job
            .executed_count
            .checked_add(1)
            .ok_or(WardenError::Exhausted)?;

        self.block_number += 1;
        let execution = record.job.execution();
        let execution_index = record.job.executed_count;
        let mut preimage = id.0.to_be_bytes().to_vec();
        preimage.extend_from_slice(&execution_index.to_be_bytes());

        let receipt = ExecutionReceipt {
            job_id: id,
            execution_index,
            executed_at: now,
            block_number: self.block_number,
            target: execution.to,
            value: execution.value,
            call_data: execution.data,
            tx_hash: tx_hash(&preimage, self.block_number),
        };
        self.record_execution(receipt.clone());
        Ok(receipt)
    }
}

fn tx_hash(preimage: &[u8], block_number: u64) -> H256 {
    let mut data = preimage.to_vec();
    data.extend_from_slice(&block_number.to_be_bytes());
    H256(keccak256(data))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountSnapshot {
    #[serde(flatten)]
    state: AccountState,
    retired_root: Option<Address>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevokedEntry {
    account: Address,
    validator: ValidatorId,
}

/// On-disk form of the ledger. Pending operations are not persisted.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    block_number: u64,
    next_job_id: u64,
    accounts: Vec<AccountSnapshot>,
    jobs: Vec<JobRecord>,
    revoked: Vec<RevokedEntry>,
    receipts: Vec<OpReceipt>,
    executions: Vec<ExecutionReceipt>,
}

impl From<&LedgerState> for Snapshot {
    fn from(state: &LedgerState) -> Self {
        let mut accounts: Vec<AccountSnapshot> = state
            .accounts
            .values()
            .map(|record| AccountSnapshot {
                state: record.state(),
                retired_root: record.retired_root,
            })
            .collect();
        accounts.sort_by_key(|snapshot| snapshot.state.address);

        let mut revoked: Vec<RevokedEntry> = state
            .revoked
            .iter()
            .map(|(account, validator)| RevokedEntry {
                account: *account,
                validator: *validator,
            })
            .collect();
        revoked.sort_by_key(|entry| (entry.account, entry.validator));

        let receipts = state
            .receipt_order
            .iter()
            .filter_map(|op_hash| state.receipts.get(op_hash).cloned())
            .collect();

        Self {
            block_number: state.block_number,
            next_job_id: state.next_job_id,
            accounts,
            jobs: state.jobs.values().cloned().collect(),
            revoked,
            receipts,
            executions: state.executions.iter().cloned().collect(),
        }
    }
}

impl From<Snapshot> for LedgerState {
    fn from(snapshot: Snapshot) -> Self {
        let mut state = LedgerState {
            block_number: snapshot.block_number,
            next_job_id: snapshot.next_job_id,
            ..Default::default()
        };

        for account in snapshot.accounts {
            let mut validators = HashMap::new();
            for installed in account.state.validators {
                let seq = state.allocate_seq();
                validators.insert(
                    installed.id,
                    ValidatorEntry {
                        seq,
                        validator: installed.validator,
                    },
                );
            }
            state.accounts.insert(
                account.state.address,
                AccountRecord {
                    address: account.state.address,
                    version: account.state.version,
                    nonce: account.state.nonce,
                    root: account.state.root,
                    retired_root: account.retired_root,
                    validators,
                    modules: account.state.modules,
                },
            );
        }
        state.jobs = snapshot.jobs.into_iter().map(|job| (job.id, job)).collect();
        state.revoked = snapshot
            .revoked
            .into_iter()
            .map(|entry| (entry.account, entry.validator))
            .collect();
        for receipt in snapshot.receipts {
            state.record_receipt(receipt);
        }
        for receipt in snapshot.executions {
            state.record_execution(receipt);
        }
        state
    }
}

/// Snapshot file shared between processes, guarded by an advisory lock on a
/// sidecar `<path>.lock` file.
#[derive(Debug, Clone)]
struct SnapshotFile {
    path: PathBuf,
    lock_path: PathBuf,
}

impl SnapshotFile {
    fn new(path: &Path) -> Self {
        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(".lock");
        Self {
            path: path.to_path_buf(),
            lock_path: lock_path.into(),
        }
    }

    fn storage_error(&self, e: impl std::fmt::Display) -> LedgerError {
        LedgerError::Storage(format!("{}: {}", self.path.display(), e))
    }

    /// Blocks until the lock is held. Dropping the returned file releases it.
    fn lock(&self, exclusive: bool) -> LedgerResult<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.lock_path)
            .map_err(|e| self.storage_error(e))?;
        let locked = if exclusive {
            file.lock_exclusive()
        } else {
            FileExt::lock_shared(&file)
        };
        locked.map_err(|e| self.storage_error(e))?;
        Ok(file)
    }

    fn read(&self) -> LedgerResult<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|e| self.storage_error(e))?;
        let snapshot = serde_json::from_str(&raw).map_err(|e| self.storage_error(e))?;
        Ok(Some(snapshot))
    }

    /// Replaces the file with one rename, so readers never see a partial write.
    fn write(&self, snapshot: &Snapshot) -> LedgerResult<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir).map_err(|e| self.storage_error(e))?;
        serde_json::to_writer_pretty(&mut file, snapshot).map_err(|e| self.storage_error(e))?;
        file.flush().map_err(|e| self.storage_error(e))?;
        file.persist(&self.path).map_err(|e| self.storage_error(e))?;
        Ok(())
    }
}

/// Ledger fake backed by process memory, optionally kept in a JSON snapshot.
#[derive(Clone)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    file: Option<SnapshotFile>,
    crypto: WardenCrypto,
    clock: Arc<dyn Clock>,
    auto_mine: bool,
}

impl MemoryLedger {
    pub fn new(crypto: WardenCrypto, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            file: None,
            crypto,
            clock,
            auto_mine: false,
        }
    }

    /// Opens a ledger that reads and writes the snapshot at `path` on every
    /// request. Any number of processes may open the same file.
    pub fn open(
        path: impl AsRef<Path>,
        crypto: WardenCrypto,
        clock: Arc<dyn Clock>,
    ) -> LedgerResult<Self> {
        let path = path.as_ref();
        let ledger = Self {
            file: Some(SnapshotFile::new(path)),
            ..Self::new(crypto, clock)
        };
        ledger.read(|_| Ok(()))?;
        info!("Opened ledger snapshot {}", path.display());
        Ok(ledger)
    }

    /// Include every operation as soon as it is submitted.
    pub fn with_auto_mine(mut self, auto_mine: bool) -> Self {
        self.auto_mine = auto_mine;
        self
    }

    pub fn crypto(&self) -> &WardenCrypto {
        &self.crypto
    }

    /// Runs `f` against the latest state.
    fn read<T>(
        &self,
        f: impl FnOnce(&LedgerState) -> Result<T, WardenError>,
    ) -> LedgerResult<T> {
        let Some(file) = &self.file else {
            return Ok(f(&self.state.lock())?);
        };
        let _lock = file.lock(false)?;
        let mut state = self.state.lock();
        if let Some(snapshot) = file.read()? {
            state.restore(snapshot);
        }
        Ok(f(&state)?)
    }

    /// Runs `f` against the latest state and persists the result if `f`
    /// succeeds. The file stays locked from reload to write.
    fn write<T>(
        &self,
        f: impl FnOnce(&mut LedgerState) -> Result<T, WardenError>,
    ) -> LedgerResult<T> {
        let Some(file) = &self.file else {
            return Ok(f(&mut self.state.lock())?);
        };
        let _lock = file.lock(true)?;
        let mut state = self.state.lock();
        if let Some(snapshot) = file.read()? {
            state.restore(snapshot);
        }
        let value = f(&mut state)?;
        file.write(&Snapshot::from(&*state))?;
        Ok(value)
    }

    /// Includes all pending operations in one block.
    pub fn mine(&self) -> LedgerResult<Vec<OpReceipt>> {
        let now = self.clock.now();
        self.write(|state| Ok(state.mine(&self.crypto, now)))
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Execution history of `job_id` as of the last request.
    pub fn executions(&self, job_id: JobId) -> Vec<ExecutionReceipt> {
        self.state
            .lock()
            .executions
            .iter()
            .filter(|receipt| receipt.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Loads a detached copy of the snapshot at `path`, or starts empty if
    /// there is none. Changes stay in memory until [`MemoryLedger::save`].
    pub fn load(
        path: impl AsRef<Path>,
        crypto: WardenCrypto,
        clock: Arc<dyn Clock>,
    ) -> LedgerResult<Self> {
        let path = path.as_ref();
        let file = SnapshotFile::new(path);
        let ledger = Self::new(crypto, clock);
        let _lock = file.lock(false)?;
        match file.read()? {
            Some(snapshot) => {
                *ledger.state.lock() = snapshot.into();
                info!("Loaded ledger snapshot {}", path.display());
            }
            None => debug!("No ledger snapshot at {}, starting empty", path.display()),
        }
        Ok(ledger)
    }

    /// Overwrites the snapshot at `path` with this ledger's state.
    pub fn save(&self, path: impl AsRef<Path>) -> LedgerResult<()> {
        let path = path.as_ref();
        let file = SnapshotFile::new(path);
        let snapshot = {
            let state = self.state.lock();
            if !state.pending.is_empty() {
                warn!(
                    "Saving ledger with {} unmined operations; they will be dropped",
                    state.pending.len()
                );
            }
            Snapshot::from(&*state)
        };
        let _lock = file.lock(true)?;
        file.write(&snapshot)?;
        debug!("Saved ledger snapshot {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn deploy_account(&self, deployment: AccountDeployment) -> LedgerResult<AccountState> {
        let address = deployment.address;
        let state = self.write(|state| state.deploy(deployment))?;
        info!("Account deployed at {:?}", address);
        Ok(state)
    }

    async fn account_state(&self, account: Address) -> LedgerResult<AccountState> {
        self.read(|state| Ok(state.account(account)?.state()))
    }

    async fn nonce(&self, account: Address) -> LedgerResult<U256> {
        self.read(|state| Ok(state.account(account)?.nonce))
    }

    async fn validator(&self, account: Address, id: ValidatorId) -> LedgerResult<Validator> {
        self.read(|state| {
            state
                .account(account)?
                .validators
                .get(&id)
                .map(|entry| entry.validator.clone())
                .ok_or(WardenError::NotInstalled)
        })
    }

    async fn validator_status(
        &self,
        account: Address,
        id: ValidatorId,
    ) -> LedgerResult<ValidatorStatus> {
        self.read(|state| state.status(account, id))
    }

    async fn apply(
        &self,
        account: Address,
        action: ManagementAction,
        authorization: Authorization,
    ) -> LedgerResult<ActionOutcome> {
        let name = action.name();
        let outcome =
            self.write(|state| state.apply(&self.crypto, account, action, authorization))?;
        info!("Applied {} on {:?}: {:?}", name, account, outcome);
        Ok(outcome)
    }

    async fn submit(&self, op: UserOperation) -> LedgerResult<H256> {
        let op_hash = self.crypto.user_op_hash(&op);
        debug!("User operation {:?} from {:?} queued", op_hash, op.sender);
        let now = self.clock.now();
        self.write(|state| {
            state.pending.push_back((op_hash, op));
            if self.auto_mine {
                state.mine(&self.crypto, now);
            }
            Ok(())
        })?;
        Ok(op_hash)
    }

    async fn receipt(&self, op_hash: H256) -> LedgerResult<Option<OpReceipt>> {
        self.read(|state| Ok(state.receipts.get(&op_hash).cloned()))
    }

    async fn scheduled_jobs(&self) -> LedgerResult<Vec<JobRecord>> {
        self.read(|state| Ok(state.jobs.values().cloned().collect()))
    }

    async fn job(&self, id: JobId) -> LedgerResult<JobRecord> {
        self.read(|state| state.jobs.get(&id).cloned().ok_or(WardenError::JobNotFound(id)))
    }

    async fn execute_job(
        &self,
        id: JobId,
        expected_count: Option<u32>,
    ) -> LedgerResult<ExecutionReceipt> {
        let now = self.clock.now();
        let receipt = self.write(|state| state.execute_job(id, expected_count, now))?;
        info!(
            "Job {} execution {} in block {}",
            id, receipt.execution_index, receipt.block_number
        );
        Ok(receipt)
    }

    async fn trigger(&self, call: &Call) -> LedgerResult<ExecutionReceipt> {
        let id = decode_trigger(&call.data)?;
        let module = self.job(id).await?.module;
        if module != call.to {
            return Err(WardenError::JobNotFound(id).into());
        }
        self.execute_job(id, None).await
    }

    async fn timestamp(&self) -> LedgerResult<u64> {
        Ok(self.clock.now())
    }
}
