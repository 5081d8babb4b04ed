//! Warden Manager
//!
//! Wires the components together over one ledger and one clock.

use std::sync::Arc;

use warden_chain::Ledger;
use warden_spec::Clock;

use crate::accounts::AccountFactory;
use crate::composition::ValidatorComposer;
use crate::config::WardenConfig;
use crate::scheduler::JobRegistry;
use crate::session::SessionManager;
use crate::submission::Submitter;

/// Entry point bundling every component of the core.
#[derive(Clone)]
pub struct Warden {
    pub config: WardenConfig,
    pub accounts: AccountFactory,
    pub composer: ValidatorComposer,
    pub sessions: SessionManager,
    pub jobs: JobRegistry,
    pub submitter: Submitter,
    ledger: Arc<dyn Ledger>,
}

impl Warden {
    pub fn new(config: WardenConfig, ledger: Arc<dyn Ledger>, clock: Arc<dyn Clock>) -> Self {
        let crypto = config.crypto();
        let submitter = Submitter::new(ledger.clone(), crypto.clone())
            .with_wait_options(config.wait_options());
        let composer = ValidatorComposer::new(ledger.clone(), crypto);
        let accounts = AccountFactory::new(
            ledger.clone(),
            config.account_factory,
            config.account_version,
        );
        let sessions = SessionManager::new(
            ledger.clone(),
            submitter.clone(),
            clock.clone(),
            config.chain_id,
            config.entry_point,
        );
        let jobs = JobRegistry::new(
            ledger.clone(),
            composer.clone(),
            clock,
            config.scheduler_module,
            config.start_grace_secs,
        );

        Self {
            config,
            accounts,
            composer,
            sessions,
            jobs,
            submitter,
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }
}
