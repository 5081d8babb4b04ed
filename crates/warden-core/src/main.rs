//! Warden Binary
//!
//! Command-line interface for managing accounts, session keys and scheduled
//! transfers. State is kept in a local ledger snapshot, locked and rewritten
//! on every change, so successive invocations (approve in one, redeem in
//! another) and a running keeper see each other's effects.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, U256};
use tracing::info;
use tracing_subscriber::EnvFilter;
use warden_chain::{Ledger, MemoryLedger};
use warden_core::{Approval, Confirmation, Session, Warden, WardenConfig};
use warden_crypto::{generate_key, parse_key, private_key_hex, Signer};
use warden_spec::{
    Call, CallScope, Clock, Condition, JobId, JobSpec, ParamValue, Policy, Repeats, Rule,
    SystemClock, ValidityInterval,
};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Delegated authorization and scheduled transfers for smart accounts")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "warden.json")]
    config: PathBuf,

    /// Ledger snapshot, overriding the configured path
    #[arg(long)]
    ledger: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new session private key
    GenKey,
    /// Derive and deploy the account owned by the root key
    Account {
        #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
        private_key: String,

        #[arg(long, default_value = "0", value_parser = parse_u256)]
        index: U256,
    },
    /// Approve a session key under a policy and write the approval
    Approve {
        #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
        private_key: String,

        #[arg(long, default_value = "0", value_parser = parse_u256)]
        index: U256,

        /// Public address of the session key
        #[arg(long, value_parser = parse_address)]
        session_key: Address,

        /// Contract the session may call
        #[arg(long, value_parser = parse_address, requires = "function")]
        contract: Option<Address>,

        /// Function signature the session may call, e.g. `safeMint(address)`
        #[arg(long, requires = "contract")]
        function: Option<String>,

        /// Parameter rule as `offset:condition:value`, repeatable
        #[arg(long = "rule", value_parser = parse_rule)]
        rules: Vec<Rule>,

        #[arg(long, default_value = "0")]
        valid_after: u64,

        /// Zero leaves the policy open ended
        #[arg(long, default_value = "0")]
        valid_until: u64,

        /// Maximum native value per call, in wei
        #[arg(long, value_parser = parse_u256)]
        value_limit: Option<U256>,

        #[arg(long, default_value = "approval.json")]
        out: PathBuf,
    },
    /// Send a call through an approved session key
    Redeem {
        #[arg(long, env = "SESSION_PRIVATE_KEY", hide_env_values = true)]
        session_private_key: String,

        #[arg(long, default_value = "approval.json")]
        approval: PathBuf,

        #[arg(long, value_parser = parse_address)]
        to: Address,

        /// Native value in wei
        #[arg(long, default_value = "0", value_parser = parse_u256)]
        value: U256,

        #[arg(long, default_value = "0x", value_parser = parse_bytes)]
        data: Bytes,
    },
    /// Revoke the session key of an approval
    Revoke {
        #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
        private_key: String,

        #[arg(long, default_value = "approval.json")]
        approval: PathBuf,
    },
    /// Install a recurring ERC-20 transfer
    Schedule {
        #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
        private_key: String,

        #[arg(long, default_value = "0", value_parser = parse_u256)]
        index: U256,

        #[arg(long, value_parser = parse_address)]
        token: Address,

        #[arg(long, default_value = "18")]
        decimals: u8,

        /// Amount per execution in whole tokens
        #[arg(long)]
        amount: String,

        #[arg(long, value_parser = parse_address)]
        recipient: Address,

        /// Unix timestamp of the first execution; defaults to now
        #[arg(long)]
        start: Option<u64>,

        /// Seconds between executions
        #[arg(long, default_value = "60")]
        every: u64,

        /// Number of executions; omit for unbounded
        #[arg(long)]
        repeats: Option<u32>,
    },
    /// List installed validators and modules
    Modules {
        #[arg(long, value_parser = parse_address)]
        account: Address,
    },
    /// Uninstall a scheduled job before it is exhausted
    UninstallModule {
        #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
        private_key: String,

        #[arg(long, default_value = "0", value_parser = parse_u256)]
        index: U256,

        #[arg(long)]
        job_id: u64,
    },
    /// Trigger a scheduled job; needs no key
    ExecuteJob {
        #[arg(long)]
        job_id: u64,
    },
}

fn parse_address(s: &str) -> std::result::Result<Address, String> {
    s.parse::<Address>()
        .map_err(|e| format!("invalid address {}: {}", s, e))
}

fn parse_u256(s: &str) -> std::result::Result<U256, String> {
    U256::from_dec_str(s).map_err(|e| format!("invalid integer {}: {}", s, e))
}

fn parse_bytes(s: &str) -> std::result::Result<Bytes, String> {
    s.parse::<Bytes>()
        .map_err(|e| format!("invalid hex {}: {}", s, e))
}

fn parse_condition(s: &str) -> std::result::Result<Condition, String> {
    match s.to_ascii_lowercase().as_str() {
        "eq" | "equal" => Ok(Condition::Equal),
        "lte" | "lessorequal" => Ok(Condition::LessOrEqual),
        "lt" | "lessthan" => Ok(Condition::LessThan),
        "gte" | "greaterorequal" => Ok(Condition::GreaterOrEqual),
        "gt" | "greaterthan" => Ok(Condition::GreaterThan),
        "ne" | "notequal" => Ok(Condition::NotEqual),
        other => other
            .parse::<u8>()
            .map_err(|_| format!("unknown condition {}", s))
            .and_then(|code| Condition::try_from(code).map_err(|e| e.to_string())),
    }
}

/// `offset:condition:value`; values are addresses (`0x` + 40 hex), other
/// `0x` hex as fixed bytes, or decimal integers.
fn parse_rule(s: &str) -> std::result::Result<Rule, String> {
    let mut parts = s.splitn(3, ':');
    let (Some(offset), Some(condition), Some(value)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("rule {} is not offset:condition:value", s));
    };

    let offset = offset
        .parse::<usize>()
        .map_err(|e| format!("rule offset {}: {}", offset, e))?;
    let condition = parse_condition(condition)?;
    let reference = if value.starts_with("0x") && value.len() == 42 {
        ParamValue::Address(parse_address(value)?)
    } else if value.starts_with("0x") {
        ParamValue::FixedBytes(parse_bytes(value)?)
    } else {
        ParamValue::Uint(parse_u256(value)?)
    };
    Ok(Rule::new(offset, condition, reference))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if let Commands::GenKey = args.command {
        let wallet = generate_key();
        println!("Private key: {}", private_key_hex(&wallet));
        println!("Address:     {:?}", Signer::address(&wallet));
        return Ok(());
    }

    let config = WardenConfig::load(&args.config)?;
    let ledger_path = args.ledger.unwrap_or_else(|| config.ledger_state.clone());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ledger = MemoryLedger::open(&ledger_path, config.crypto(), clock.clone())
        .with_context(|| format!("opening ledger {}", ledger_path.display()))?
        .with_auto_mine(true);
    let warden = Warden::new(config, Arc::new(ledger), clock.clone());

    run(&warden, clock.as_ref(), args.command).await
}

async fn run(warden: &Warden, clock: &dyn Clock, command: Commands) -> Result<()> {
    match command {
        Commands::GenKey => Ok(()),
        Commands::Account { private_key, index } => {
            let root = parse_key(&private_key)?;
            let state = warden.accounts.deploy(Signer::address(&root), index).await?;
            println!("Account: {:?}", state.address);
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Commands::Approve {
            private_key,
            index,
            session_key,
            contract,
            function,
            rules,
            valid_after,
            valid_until,
            value_limit,
            out,
        } => {
            let root = parse_key(&private_key)?;
            let account = warden
                .accounts
                .counterfactual_address(Signer::address(&root), index);

            let policy = Policy {
                rules,
                interval: ValidityInterval::new(valid_after, valid_until),
                value_limit,
                scope: contract
                    .zip(function)
                    .map(|(contract, function)| CallScope::new(contract, function)),
            };
            if policy.is_sudo() {
                info!("Approving session key {:?} with a sudo policy", session_key);
            }

            let mut session = warden.sessions.issue(account, session_key);
            let approval = warden.sessions.approve(&root, &mut session, policy).await?;
            let bytes = warden.sessions.serialize(&approval)?;
            std::fs::write(&out, bytes)
                .with_context(|| format!("writing approval to {}", out.display()))?;

            println!("Approved validator {}", approval.validator_metadata.validator_id);
            println!("Approval written to {}", out.display());
            Ok(())
        }
        Commands::Redeem {
            session_private_key,
            approval,
            to,
            value,
            data,
        } => {
            let key: LocalWallet = parse_key(&session_private_key)?;
            let bytes = std::fs::read(&approval)
                .with_context(|| format!("reading approval from {}", approval.display()))?;
            let mut session = warden.sessions.deserialize(&bytes, Arc::new(key))?;

            let call = Call::new(to, value, data);
            let confirmation = warden.sessions.send(&mut session, &call).await?;
            info!("Session status after redeem: {:?}", session.status());
            report(confirmation)
        }
        Commands::Revoke {
            private_key,
            approval,
        } => {
            let root = parse_key(&private_key)?;
            let bytes = std::fs::read(&approval)
                .with_context(|| format!("reading approval from {}", approval.display()))?;
            let approval = Approval::from_bytes(&bytes)?;
            let mut session = Session::from_approval(&approval);

            warden.sessions.revoke(&root, &mut session).await?;
            println!(
                "Revoked validator {}",
                approval.validator_metadata.validator_id
            );
            Ok(())
        }
        Commands::Schedule {
            private_key,
            index,
            token,
            decimals,
            amount,
            recipient,
            start,
            every,
            repeats,
        } => {
            let root = parse_key(&private_key)?;
            let account = warden
                .accounts
                .counterfactual_address(Signer::address(&root), index);

            let module = warden.jobs.register_job(JobSpec {
                token_address: token,
                token_decimals: decimals,
                amount_per_execution: amount,
                recipient,
                start_date: start.unwrap_or_else(|| clock.now()),
                repeat_every: every,
                number_of_repeats: repeats.map_or(Repeats::Unbounded, Repeats::Times),
            })?;
            let job_id = warden.jobs.install(account, &root, module).await?;
            println!("Installed scheduled job {} on {:?}", job_id, account);
            Ok(())
        }
        Commands::Modules { account } => {
            let state = warden.composer.installed(account).await?;
            let jobs = warden.jobs.installed_jobs(account).await?;

            println!("Validators:");
            for installed in &state.validators {
                println!(
                    "  {} {} key {:?}",
                    installed.role,
                    installed.id,
                    installed.validator.key()
                );
            }
            println!("Modules:");
            for record in &jobs {
                println!(
                    "  job {} at {:?}: {}/{:?} executions, next window {:?}",
                    record.id,
                    record.module,
                    record.job.executed_count,
                    record.job.number_of_repeats,
                    record.job.next_window()
                );
            }
            Ok(())
        }
        Commands::UninstallModule {
            private_key,
            index,
            job_id,
        } => {
            let root = parse_key(&private_key)?;
            let account = warden
                .accounts
                .counterfactual_address(Signer::address(&root), index);
            warden.jobs.uninstall(account, &root, JobId(job_id)).await?;
            println!("Uninstalled scheduled job {}", job_id);
            Ok(())
        }
        Commands::ExecuteJob { job_id } => {
            let call = warden.jobs.trigger(JobId(job_id));
            info!("Triggering job {} via {:?}", job_id, call.to);
            let receipt = warden.ledger().trigger(&call).await?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
            Ok(())
        }
    }
}

fn report(confirmation: Confirmation) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(confirmation.receipt())?);
    match confirmation {
        Confirmation::Confirmed(_) => Ok(()),
        Confirmation::Rejected { reason, .. } => {
            Err(anyhow::Error::new(reason).context("user operation rejected"))
        }
    }
}
