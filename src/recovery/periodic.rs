//! Periodic recovery on a dedicated background thread

use std::sync::Arc;

use crate::worker::PeriodicWorker;

use super::errors::{RecoveryError, RecoveryResult};
use super::manager::RecoveryManager;

/// Runs `RecoveryManager::run_scan` every `period`
pub struct PeriodicRecovery {
    manager: Arc<RecoveryManager>,
    worker: PeriodicWorker<bool>,
}

impl PeriodicRecovery {
    pub fn start(manager: Arc<RecoveryManager>) -> RecoveryResult<Self> {
        let scanner = Arc::clone(&manager);
        let worker = PeriodicWorker::spawn("xacoord-recovery", manager.config().period, move || {
            scanner.run_scan()
        })
        .map_err(RecoveryError::worker)?;

        Ok(Self { manager, worker })
    }

    /// Scan now and wait. False if this scan was not clean or the worker
    /// has stopped.
    pub fn scan_now(&self) -> bool {
        self.worker.trigger_now().unwrap_or(false)
    }

    /// Completed scans, timed and requested
    pub fn scans(&self) -> u64 {
        self.worker.runs()
    }

    pub fn manager(&self) -> &Arc<RecoveryManager> {
        &self.manager
    }

    pub fn stop(&self) {
        self.worker.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crash_point::HaltInjector;
    use crate::recovery::{RecoveryConfig, RecoveryRegistry};
    use crate::txn::{CoordinatorConfig, TransactionManager};
    use crate::xa::{BranchState, SimulatedResource, XaResource, Xid};
    use tempfile::TempDir;

    #[test]
    fn test_scan_now_resolves_orphan() {
        let dir = TempDir::new().unwrap();
        let tm = Arc::new(
            TransactionManager::open_with_halt(
                CoordinatorConfig::new("node-a", dir.path()),
                Arc::new(HaltInjector::disarmed()),
            )
            .unwrap(),
        );
        let registry = Arc::new(RecoveryRegistry::new());
        let db = Arc::new(SimulatedResource::new("db"));
        registry.register(db.clone());

        let branch = Xid::new_global("node-a").branch("node-a");
        db.start(&branch).unwrap();
        db.prepare(&branch).unwrap();

        let manager = Arc::new(RecoveryManager::new(tm, registry, RecoveryConfig::for_tests()));
        let periodic = PeriodicRecovery::start(manager).unwrap();

        assert!(periodic.scan_now());
        assert_eq!(periodic.scans(), 1);
        assert_eq!(db.state_of(&branch), Some(BranchState::RolledBack));

        periodic.stop();
        assert!(!periodic.scan_now());
    }
}
