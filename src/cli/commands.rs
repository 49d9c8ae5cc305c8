//! CLI command implementations
//!
//! Every command loads the configuration, opens the transaction manager
//! on the configured object store and registers the participants recovery
//! may need: journaled local participants found under the journal
//! directory plus the configured remote participants.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use crate::crash_point::HaltInjector;
use crate::objectstore::ObjectStore;
use crate::recovery::{
    PeriodicRecovery, RecoveryListener, RecoveryManager, RecoveryRegistry, RemoteResource,
    SubordinateResource,
};
use crate::txn::TransactionManager;
use crate::xa::{SimulatedResource, XaResource, Xid};

use super::args::{Cli, Command};
use super::config::Config;
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Main CLI entry point; the only function main.rs calls
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    run_command(cli.command)
}

pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config } => init(&config),
        Command::Records { config } => records(&config),
        Command::Scan { config } => scan(&config),
        Command::Recover { config, xid } => recover(&config, &xid),
        Command::Forget { config, xid } => forget(&config, &xid),
        Command::Simulate {
            config,
            participants,
        } => simulate(&config, participants),
        Command::Serve { config } => serve(&config),
    }
}

/// Coordinator state shared by the commands
struct Coordinator {
    tm: Arc<TransactionManager>,
    recovery: Arc<RecoveryManager>,
}

impl Coordinator {
    fn participant(&self, name: &str) -> Option<Arc<dyn XaResource>> {
        self.recovery.registry().get(name)
    }
}

fn is_initialized(config: &Config) -> bool {
    config.journal_dir().is_dir()
}

fn load_initialized(config_path: &Path) -> CliResult<Config> {
    let config = Config::load(config_path)?;
    if !is_initialized(&config) {
        return Err(CliError::not_initialized());
    }
    Ok(config)
}

fn parse_xid(xid: &str) -> CliResult<Xid> {
    xid.parse()
        .map_err(|e: crate::xa::XaError| CliError::invalid_argument(e.message))
}

/// Journaled participants, ordered by name
fn journaled_participants(config: &Config) -> CliResult<Vec<Arc<dyn XaResource>>> {
    let dir = config.journal_dir();
    let mut names = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            names.push(stem.to_string());
        }
    }
    names.sort();

    names
        .iter()
        .map(|name| {
            SimulatedResource::open_journal(name, &dir)
                .map(|r| Arc::new(r) as Arc<dyn XaResource>)
                .map_err(|e| CliError::boot_failed(format!("participant '{}': {}", name, e)))
        })
        .collect()
}

fn boot(config: &Config, halt: Arc<HaltInjector>) -> CliResult<Coordinator> {
    let tm = TransactionManager::open_with_halt(config.coordinator_config(), halt)
        .map_err(|e| CliError::boot_failed(e.to_string()))?;
    let tm = Arc::new(tm);

    let registry = Arc::new(RecoveryRegistry::new());
    for participant in journaled_participants(config)? {
        registry.register(participant);
    }
    for remote in &config.remote_participants {
        registry.register(Arc::new(RemoteResource::new(
            &remote.name,
            &remote.address,
            config.resource_timeout(),
        )));
    }

    let recovery = Arc::new(RecoveryManager::new(
        Arc::clone(&tm),
        registry,
        config.recovery_config(),
    ));
    Ok(Coordinator { tm, recovery })
}

/// Create the object store and the journal directory
pub fn init(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    if is_initialized(&config) {
        return Err(CliError::already_initialized());
    }

    let journal_dir = config.journal_dir();
    fs::create_dir_all(&journal_dir).map_err(|e| {
        CliError::config_error(format!("Failed to create directory {:?}: {}", journal_dir, e))
    })?;
    let store = ObjectStore::open(config.object_store_path())
        .map_err(|e| CliError::boot_failed(e.to_string()))?;

    write_response(json!({
        "initialized": true,
        "object_store": store.dir().display().to_string(),
        "journals": journal_dir.display().to_string(),
    }))
}

pub fn records(config_path: &Path) -> CliResult<()> {
    let config = load_initialized(config_path)?;
    let store = ObjectStore::open(config.object_store_path())
        .map_err(|e| CliError::boot_failed(e.to_string()))?;
    let records = store
        .list()
        .map_err(|e| CliError::operation_failed(e.to_string()))?;

    write_response(json!({
        "count": records.len(),
        "records": serde_json::to_value(&records)?,
    }))
}

pub fn scan(config_path: &Path) -> CliResult<()> {
    let config = load_initialized(config_path)?;
    let coordinator = boot(&config, Arc::new(HaltInjector::disarmed()))?;
    let report = coordinator.recovery.scan()?;

    write_response(json!({
        "clean": report.is_clean(),
        "committed": report.committed,
        "orphans_rolled_back": report.orphans_rolled_back,
        "heuristics_skipped": report.heuristics_skipped,
        "pending": report.pending,
        "errors": report.errors,
    }))
}

pub fn recover(config_path: &Path, xid: &str) -> CliResult<()> {
    let config = load_initialized(config_path)?;
    let xid = parse_xid(xid)?;
    let coordinator = boot(&config, Arc::new(HaltInjector::disarmed()))?;
    coordinator.recovery.recover(&xid)?;

    write_response(json!({"xid": xid.to_string(), "reclassified": true}))
}

pub fn forget(config_path: &Path, xid: &str) -> CliResult<()> {
    let config = load_initialized(config_path)?;
    let xid = parse_xid(xid)?;
    let coordinator = boot(&config, Arc::new(HaltInjector::disarmed()))?;
    coordinator.recovery.forget(&xid)?;

    write_response(json!({"xid": xid.to_string(), "forgotten": true}))
}

/// Commit one transaction across `participants` journaled participants
/// and every configured remote participant.
///
/// `XACOORD_HALT_POINT` aborts the process at the named point, leaving the
/// object store and journals for `scan` to resolve.
pub fn simulate(config_path: &Path, participants: usize) -> CliResult<()> {
    let config = load_initialized(config_path)?;
    if participants == 0 && config.remote_participants.is_empty() {
        return Err(CliError::invalid_argument(
            "participants must be > 0 when no remote participants are configured",
        ));
    }
    let coordinator = boot(&config, Arc::new(HaltInjector::from_env()))?;

    let mut enlisted = Vec::new();
    for i in 0..participants {
        let name = format!("participant-{}", i);
        let resource = match coordinator.participant(&name) {
            Some(resource) => resource,
            None => {
                let resource: Arc<dyn XaResource> = Arc::new(
                    SimulatedResource::open_journal(&name, &config.journal_dir())
                        .map_err(|e| CliError::boot_failed(e.to_string()))?,
                );
                coordinator.recovery.registry().register(Arc::clone(&resource));
                resource
            }
        };
        enlisted.push(resource);
    }
    for remote in &config.remote_participants {
        if let Some(resource) = coordinator.participant(&remote.name) {
            enlisted.push(resource);
        }
    }

    let tx = coordinator.tm.begin()?;
    for resource in &enlisted {
        if let Err(e) = tx.enlist_resource(Arc::clone(resource)) {
            coordinator.tm.rollback()?;
            return Err(e.into());
        }
    }
    coordinator.tm.commit()?;

    let pending = coordinator
        .tm
        .object_store()
        .list()
        .map_err(|e| CliError::operation_failed(e.to_string()))?
        .len();
    write_response(json!({
        "xid": tx.xid().to_string(),
        "participants": enlisted.iter().map(|r| r.name().to_string()).collect::<Vec<_>>(),
        "status": tx.status().to_string(),
        "pending_records": pending,
    }))
}

/// Run the reaper, periodic recovery and the recovery listener until
/// interrupted
pub fn serve(config_path: &Path) -> CliResult<()> {
    let config = load_initialized(config_path)?;
    let coordinator = boot(&config, Arc::new(HaltInjector::from_env()))?;
    coordinator.tm.start_reaper()?;
    let periodic = PeriodicRecovery::start(Arc::clone(&coordinator.recovery))?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    let served = rt.block_on(async {
        let subordinate: Arc<dyn XaResource> = Arc::new(SubordinateResource::new(
            &config.node_identifier,
            Arc::clone(&coordinator.tm),
            Arc::clone(&coordinator.recovery),
        ));
        let listener =
            Arc::new(RecoveryListener::bind(&config.recovery.listener_address, subordinate).await?);
        write_response(json!({"listening": listener.local_addr()?.to_string()}))?;

        let server = {
            let listener = Arc::clone(&listener);
            tokio::spawn(async move { listener.run().await })
        };

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| CliError::io_error(format!("Failed to wait for interrupt: {}", e)))?;
        listener.shutdown();
        server
            .await
            .map_err(|e| CliError::operation_failed(format!("Listener task failed: {}", e)))??;
        Ok::<(), CliError>(())
    });

    periodic.stop();
    coordinator.tm.stop_reaper();
    served
}
