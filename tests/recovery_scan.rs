//! Recovery scan tests
//!
//! Covers:
//! - Replay of commits that failed transiently, one- and two-phase
//! - Idempotent scans: a second scan finds nothing to do
//! - Heuristic records are skipped until an operator acts
//! - Foreign-node branches are never touched
//! - Resource calls bounded by the per-call timeout
//! - Periodic and administrator scans running at once replay a record once

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use xacoord::crash_point::HaltInjector;
use xacoord::objectstore::{ParticipantOutcome, RecordState};
use xacoord::recovery::{
    PeriodicRecovery, RecoveryConfig, RecoveryErrorCode, RecoveryManager, RecoveryRegistry, ScanReport,
};
use xacoord::txn::{CoordinatorConfig, TransactionManager, TxErrorCode};
use xacoord::xa::{BranchState, SimulatedResource, XaErrorCode, XaResource, Xid};

// =============================================================================
// Test Utilities
// =============================================================================

struct Node {
    _dir: TempDir,
    tm: Arc<TransactionManager>,
    registry: Arc<RecoveryRegistry>,
    recovery: RecoveryManager,
}

fn node_with(config: RecoveryConfig) -> Node {
    let dir = TempDir::new().unwrap();
    let tm = Arc::new(
        TransactionManager::open_with_halt(
            CoordinatorConfig::new("node-a", dir.path()),
            Arc::new(HaltInjector::disarmed()),
        )
        .unwrap(),
    );
    let registry = Arc::new(RecoveryRegistry::new());
    let recovery = RecoveryManager::new(Arc::clone(&tm), Arc::clone(&registry), config);
    Node {
        _dir: dir,
        tm,
        registry,
        recovery,
    }
}

fn node() -> Node {
    node_with(RecoveryConfig::for_tests())
}

// =============================================================================
// Commit replay
// =============================================================================

#[test]
fn test_one_phase_transient_failure_replayed_once() {
    let n = node();
    let db = Arc::new(SimulatedResource::new("db"));
    n.registry.register(db.clone());
    db.fail_commit(XaErrorCode::RmFail);

    n.tm.begin().unwrap().enlist_resource(db.clone()).unwrap();
    let err = n.tm.commit().unwrap_err();
    assert_eq!(err.code(), TxErrorCode::HeuristicHazard);
    assert_eq!(db.commit_count(), 0);

    let records = n.tm.object_store().list().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].state, RecordState::Committing);
    assert!(records[0].participants[0].one_phase);

    let report = n.recovery.scan().unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(db.commit_count(), 1);
    assert!(n.tm.object_store().is_empty().unwrap());

    assert_eq!(n.recovery.scan().unwrap(), ScanReport::default());
    assert_eq!(db.commit_count(), 1);
}

#[test]
fn test_two_phase_transient_failure_commits_second_resource() {
    let n = node();
    let a = Arc::new(SimulatedResource::new("a"));
    let b = Arc::new(SimulatedResource::new("b"));
    n.registry.register(a.clone());
    n.registry.register(b.clone());
    b.fail_commit(XaErrorCode::RmFail);

    let tx = n.tm.begin().unwrap();
    tx.enlist_resource(a.clone()).unwrap();
    let branch_b = tx.enlist_resource(b.clone()).unwrap();
    assert_eq!(n.tm.commit().unwrap_err().code(), TxErrorCode::HeuristicHazard);

    let record = n.tm.object_store().read(tx.xid()).unwrap().unwrap();
    assert_eq!(record.participants[0].outcome, ParticipantOutcome::Committed);
    assert_eq!(record.participants[1].outcome, ParticipantOutcome::Pending);

    let report = n.recovery.scan().unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(report.orphans_rolled_back, 0);
    assert_eq!(a.commit_count(), 1);
    assert_eq!(b.commit_count(), 1);
    assert_eq!(b.state_of(&branch_b), Some(BranchState::Committed));
    assert!(n.tm.object_store().is_empty().unwrap());
}

#[test]
fn test_repeated_transient_failure_stays_pending() {
    let n = node();
    let a = Arc::new(SimulatedResource::new("a"));
    let b = Arc::new(SimulatedResource::new("b"));
    n.registry.register(a.clone());
    n.registry.register(b.clone());
    // driver, first pass, second pass
    for _ in 0..3 {
        b.fail_commit(XaErrorCode::RmFail);
    }

    let tx = n.tm.begin().unwrap();
    tx.enlist_resource(a.clone()).unwrap();
    tx.enlist_resource(b.clone()).unwrap();
    n.tm.commit().unwrap_err();

    let report = n.recovery.scan().unwrap();
    assert_eq!(report.committed, 0);
    assert_eq!(report.pending, 1);
    assert_eq!(report.orphans_rolled_back, 0);
    assert_eq!(n.tm.object_store().list().unwrap().len(), 1);

    let report = n.recovery.scan().unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(b.commit_count(), 1);
    assert!(n.tm.object_store().is_empty().unwrap());
}

#[test]
fn test_unregistered_resource_counts_as_error() {
    let n = node();
    let db = Arc::new(SimulatedResource::new("db"));
    db.fail_commit(XaErrorCode::RmFail);

    n.tm.begin().unwrap().enlist_resource(db.clone()).unwrap();
    n.tm.commit().unwrap_err();

    let report = n.recovery.scan().unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.committed, 0);
    assert_eq!(n.tm.object_store().list().unwrap().len(), 1);

    n.registry.register(db.clone());
    assert!(n.recovery.run_scan());
    assert_eq!(db.commit_count(), 1);
}

// =============================================================================
// Heuristic records
// =============================================================================

#[test]
fn test_heuristic_record_skipped_then_forgotten() {
    let n = node();
    let a = Arc::new(SimulatedResource::new("a"));
    let b = Arc::new(SimulatedResource::new("b"));
    n.registry.register(a.clone());
    n.registry.register(b.clone());
    b.fail_commit(XaErrorCode::HeurRb);

    let tx = n.tm.begin().unwrap();
    tx.enlist_resource(a.clone()).unwrap();
    let branch_b = tx.enlist_resource(b.clone()).unwrap();
    assert_eq!(n.tm.commit().unwrap_err().code(), TxErrorCode::HeuristicMixed);

    let report = n.recovery.scan().unwrap();
    assert_eq!(report.heuristics_skipped, 1);
    assert_eq!(report.committed, 0);

    n.recovery.forget(tx.xid()).unwrap();
    assert_eq!(b.state_of(&branch_b), Some(BranchState::Forgotten));
    assert!(n.tm.object_store().is_empty().unwrap());
    assert_eq!(n.recovery.scan().unwrap(), ScanReport::default());
}

#[test]
fn test_admin_operations_need_a_heuristic_record() {
    let n = node();
    let missing = Xid::new_global("node-a");
    assert_eq!(
        n.recovery.recover(&missing).unwrap_err().code(),
        RecoveryErrorCode::RecordNotFound
    );

    let db = Arc::new(SimulatedResource::new("db"));
    n.registry.register(db.clone());
    db.fail_commit(XaErrorCode::RmFail);
    let tx = n.tm.begin().unwrap();
    tx.enlist_resource(db.clone()).unwrap();
    n.tm.commit().unwrap_err();

    assert_eq!(
        n.recovery.forget(tx.xid()).unwrap_err().code(),
        RecoveryErrorCode::NotHeuristic
    );
}

// =============================================================================
// Orphans
// =============================================================================

#[test]
fn test_foreign_node_branch_left_alone() {
    let n = node();
    let db = Arc::new(SimulatedResource::new("db"));
    n.registry.register(db.clone());

    let foreign = Xid::new_global("node-b").branch("node-b");
    db.start(&foreign).unwrap();
    db.prepare(&foreign).unwrap();

    let report = n.recovery.scan().unwrap();
    assert_eq!(report.orphans_rolled_back, 0);
    assert_eq!(db.state_of(&foreign), Some(BranchState::Prepared));
}

#[test]
fn test_unrecorded_prepared_branch_rolled_back() {
    let n = node();
    let db = Arc::new(SimulatedResource::new("db"));
    n.registry.register(db.clone());

    let orphan = Xid::new_global("node-a").branch("node-a");
    db.start(&orphan).unwrap();
    db.prepare(&orphan).unwrap();

    let report = n.recovery.scan().unwrap();
    assert_eq!(report.orphans_rolled_back, 1);
    assert_eq!(db.state_of(&orphan), Some(BranchState::RolledBack));
    assert_eq!(n.recovery.scan().unwrap(), ScanReport::default());
}

#[test]
fn test_in_flight_transaction_is_not_an_orphan() {
    let n = node();
    let db = Arc::new(SimulatedResource::new("db"));
    n.registry.register(db.clone());

    let tx = n.tm.begin().unwrap();
    let branch = tx.enlist_resource(db.clone()).unwrap();
    db.prepare(&branch).unwrap();

    let report = n.recovery.scan().unwrap();
    assert_eq!(report.orphans_rolled_back, 0);
    assert_eq!(db.state_of(&branch), Some(BranchState::Prepared));
}

// =============================================================================
// Per-call timeout
// =============================================================================

#[test]
fn test_slow_resource_times_out() {
    let mut config = RecoveryConfig::for_tests();
    config.resource_timeout = Duration::from_millis(50);
    let n = node_with(config);

    let slow = Arc::new(SimulatedResource::new("slow"));
    slow.set_call_delay(Duration::from_millis(500));
    n.registry.register(slow);
    let fast = Arc::new(SimulatedResource::new("fast"));
    let orphan = Xid::new_global("node-a").branch("node-a");
    fast.start(&orphan).unwrap();
    fast.prepare(&orphan).unwrap();
    n.registry.register(fast.clone());

    let report = n.recovery.scan().unwrap();
    assert_eq!(report.errors, 2);
    assert_eq!(report.orphans_rolled_back, 1);
    assert_eq!(fast.state_of(&orphan), Some(BranchState::RolledBack));
}

// =============================================================================
// Concurrent scans
// =============================================================================

#[test]
fn test_periodic_and_admin_scans_replay_record_once() {
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
    db.fail_commit(XaErrorCode::RmFail);

    tm.begin().unwrap().enlist_resource(db.clone()).unwrap();
    assert_eq!(tm.commit().unwrap_err().code(), TxErrorCode::HeuristicHazard);
    assert_eq!(tm.object_store().list().unwrap().len(), 1);

    // Slow enough that both scans overlap
    db.set_call_delay(Duration::from_millis(100));
    let manager = Arc::new(RecoveryManager::new(
        Arc::clone(&tm),
        registry,
        RecoveryConfig::for_tests(),
    ));
    let periodic = PeriodicRecovery::start(Arc::clone(&manager)).unwrap();

    let admin = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.scan().unwrap())
    };
    let requested_clean = periodic.scan_now();
    let admin_report = admin.join().unwrap();
    periodic.stop();

    assert!(requested_clean);
    assert!(admin_report.is_clean());
    assert_eq!(db.commit_count(), 1);
    assert!(tm.object_store().is_empty().unwrap());
}
