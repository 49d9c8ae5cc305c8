//! Crash recovery tests
//!
//! A coordinator halted in simulate mode freezes at the armed point, the
//! way a killed process would. A fresh manager over the same object store
//! and the same (journaled) resources then resolves what was left behind:
//! - Halt before the commit decision is logged: presumed abort
//! - Halt after the decision is logged: commit replayed
//! - Halt midway through the second phase: remaining participants commit

use std::sync::Arc;

use tempfile::TempDir;
use xacoord::crash_point::{HaltInjector, HaltPoint};
use xacoord::objectstore::RecordState;
use xacoord::recovery::{RecoveryConfig, RecoveryManager, RecoveryRegistry, ScanReport};
use xacoord::txn::{CoordinatorConfig, TransactionManager, TxErrorCode};
use xacoord::xa::{BranchState, SimulatedResource, XaResource};

// =============================================================================
// Test Utilities
// =============================================================================

fn open_tm(dir: &TempDir, halt: Arc<HaltInjector>) -> Arc<TransactionManager> {
    Arc::new(
        TransactionManager::open_with_halt(CoordinatorConfig::new("node-a", dir.path()), halt).unwrap(),
    )
}

fn journals(dir: &TempDir, n: usize) -> Vec<Arc<SimulatedResource>> {
    let journal_dir = dir.path().join("participants");
    std::fs::create_dir_all(&journal_dir).unwrap();
    (0..n)
        .map(|i| Arc::new(SimulatedResource::open_journal(&format!("p{}", i), &journal_dir).unwrap()))
        .collect()
}

/// Run one transaction over fresh journals until the armed halt fires
fn crash_at(dir: &TempDir, point: HaltPoint, n: usize) -> Vec<xacoord::xa::Xid> {
    let halt = Arc::new(HaltInjector::disarmed());
    halt.simulate(point);
    let tm = open_tm(dir, Arc::clone(&halt));
    let resources = journals(dir, n);

    let tx = tm.begin().unwrap();
    let branches = resources
        .iter()
        .map(|r| tx.enlist_resource(r.clone()).unwrap())
        .collect();
    let err = tm.commit().unwrap_err();
    assert_eq!(err.code(), TxErrorCode::Halted);
    assert!(halt.is_tripped());
    branches
}

/// A restarted node: new manager, journals reloaded from disk
fn restart(dir: &TempDir, n: usize) -> (Arc<TransactionManager>, RecoveryManager, Vec<Arc<SimulatedResource>>) {
    let tm = open_tm(dir, Arc::new(HaltInjector::disarmed()));
    let resources = journals(dir, n);
    let registry = Arc::new(RecoveryRegistry::new());
    for r in &resources {
        registry.register(r.clone() as Arc<dyn XaResource>);
    }
    let recovery = RecoveryManager::new(Arc::clone(&tm), registry, RecoveryConfig::for_tests());
    (tm, recovery, resources)
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_halt_after_prepare_is_presumed_abort() {
    let dir = TempDir::new().unwrap();
    let branches = crash_at(&dir, HaltPoint::AfterPrepare(1), 3);

    let (tm, recovery, resources) = restart(&dir, 3);
    assert!(tm.object_store().is_empty().unwrap());
    assert_eq!(resources[0].recover().unwrap(), vec![branches[0].clone()]);
    assert_eq!(resources[2].recover().unwrap(), vec![]);

    let report = recovery.scan().unwrap();
    assert_eq!(report.orphans_rolled_back, 2);
    assert_eq!(report.committed, 0);
    for r in &resources {
        assert!(r.recover().unwrap().is_empty());
        assert_eq!(r.commit_count(), 0);
    }
    assert_eq!(recovery.scan().unwrap(), ScanReport::default());
}

#[test]
fn test_halt_after_log_write_commits_everyone() {
    let dir = TempDir::new().unwrap();
    crash_at(&dir, HaltPoint::AfterLogWrite, 2);

    let (tm, recovery, resources) = restart(&dir, 2);
    let records = tm.object_store().list().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].state, RecordState::Committing);

    let report = recovery.scan().unwrap();
    assert_eq!(report.committed, 2);
    assert_eq!(report.orphans_rolled_back, 0);
    for r in &resources {
        assert_eq!(r.commit_count(), 1);
        assert!(r.recover().unwrap().is_empty());
    }
    assert!(tm.object_store().is_empty().unwrap());
}

#[test]
fn test_halt_between_commits_finishes_the_rest() {
    let dir = TempDir::new().unwrap();
    crash_at(&dir, HaltPoint::AfterCommit(0), 3);

    let (_tm, recovery, resources) = restart(&dir, 3);
    assert_eq!(resources[0].commit_count(), 1);

    // The first participant committed but its outcome never reached the
    // record; its retry answers NOTA, which counts as committed.
    let report = recovery.scan().unwrap();
    assert_eq!(report.committed, 3);
    for r in &resources {
        assert_eq!(r.commit_count(), 1);
    }
    assert_eq!(recovery.scan().unwrap(), ScanReport::default());
}

#[test]
fn test_halt_before_prepare_leaves_nothing_in_doubt() {
    let dir = TempDir::new().unwrap();
    let branches = crash_at(&dir, HaltPoint::BeforePrepare(0), 2);

    let (tm, recovery, resources) = restart(&dir, 2);
    assert!(tm.object_store().is_empty().unwrap());

    let report = recovery.scan().unwrap();
    assert_eq!(report, ScanReport::default());
    for (r, branch) in resources.iter().zip(&branches) {
        // Active branches are never journaled
        assert_eq!(r.state_of(branch), None);
    }
}
