//! Imported (subordinate) transaction tests
//!
//! A client coordinator enlists a `SubordinateResource` backed by a server
//! coordinator; the server's own resources join the imported transaction.
//!
//! Covers:
//! - A server-side heuristic surfaces to the client as heuristic-mixed and
//!   is resolved by an operator `recover` followed by a scan
//! - A server restarted between prepare and commit still applies the
//!   client's decision from its prepared record

use std::sync::Arc;

use tempfile::TempDir;
use xacoord::crash_point::{HaltInjector, HaltPoint};
use xacoord::objectstore::RecordState;
use xacoord::recovery::{RecoveryConfig, RecoveryManager, RecoveryRegistry, ScanReport, SubordinateResource};
use xacoord::txn::{CoordinatorConfig, TransactionManager, TxErrorCode};
use xacoord::xa::{SimulatedResource, XaErrorCode, XaResource};

// =============================================================================
// Test Utilities
// =============================================================================

struct Coordinator {
    tm: Arc<TransactionManager>,
    registry: Arc<RecoveryRegistry>,
    recovery: Arc<RecoveryManager>,
}

fn coordinator(node: &str, dir: &TempDir, halt: HaltInjector) -> Coordinator {
    let tm = Arc::new(
        TransactionManager::open_with_halt(CoordinatorConfig::new(node, dir.path()), Arc::new(halt))
            .unwrap(),
    );
    let registry = Arc::new(RecoveryRegistry::new());
    let recovery = Arc::new(RecoveryManager::new(
        Arc::clone(&tm),
        Arc::clone(&registry),
        RecoveryConfig::for_tests(),
    ));
    Coordinator { tm, registry, recovery }
}

fn subordinate(server: &Coordinator) -> Arc<SubordinateResource> {
    Arc::new(SubordinateResource::new(
        "server",
        Arc::clone(&server.tm),
        Arc::clone(&server.recovery),
    ))
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_server_heuristic_resolved_by_recover() {
    let client_dir = TempDir::new().unwrap();
    let server_dir = TempDir::new().unwrap();
    let client = coordinator("client", &client_dir, HaltInjector::disarmed());
    let server = coordinator("server", &server_dir, HaltInjector::disarmed());
    let sub = subordinate(&server);

    let r1 = Arc::new(SimulatedResource::new("r1"));
    let r2 = Arc::new(SimulatedResource::new("r2"));
    server.registry.register(r1.clone());
    server.registry.register(r2.clone());
    r2.fail_commit(XaErrorCode::RmErr);

    let tx = client.tm.begin().unwrap();
    let branch = tx.enlist_resource(sub.clone()).unwrap();
    let imported = sub.imported(&branch).unwrap();
    assert_eq!(imported.xid(), &branch);
    imported.enlist_resource(r1.clone()).unwrap();
    imported.enlist_resource(r2.clone()).unwrap();

    let err = client.tm.commit().unwrap_err();
    assert_eq!(err.code(), TxErrorCode::HeuristicMixed);
    assert!(client.tm.object_store().is_empty().unwrap());
    assert_eq!(r1.commit_count(), 1);
    assert_eq!(r2.commit_count(), 0);

    // The server keeps the heuristic record under the client's branch
    let record = server.tm.object_store().read(&branch).unwrap().unwrap();
    assert_eq!(record.state, RecordState::Heuristic);
    assert_eq!(record.parent.as_ref(), Some(&branch));

    let report = server.recovery.scan().unwrap();
    assert_eq!(report.heuristics_skipped, 1);
    assert_eq!(report.orphans_rolled_back, 0);
    assert_eq!(r2.commit_count(), 0);

    server.recovery.recover(&branch).unwrap();
    let report = server.recovery.scan().unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(report.heuristics_skipped, 0);
    assert_eq!(r2.commit_count(), 1);
    assert!(server.tm.object_store().is_empty().unwrap());

    assert_eq!(server.recovery.scan().unwrap(), ScanReport::default());
}

#[test]
fn test_restarted_server_commits_from_prepared_record() {
    let client_dir = TempDir::new().unwrap();
    let server_dir = TempDir::new().unwrap();
    let journal_dir = server_dir.path().join("participants");
    std::fs::create_dir_all(&journal_dir).unwrap();

    let halt = HaltInjector::disarmed();
    halt.simulate(HaltPoint::AfterLogWrite);
    let client = coordinator("client", &client_dir, halt);
    let local = Arc::new(SimulatedResource::new("local"));

    {
        let server = coordinator("server", &server_dir, HaltInjector::disarmed());
        let sub = subordinate(&server);
        let db = Arc::new(SimulatedResource::open_journal("db", &journal_dir).unwrap());

        let tx = client.tm.begin().unwrap();
        let branch = tx.enlist_resource(sub.clone()).unwrap();
        sub.imported(&branch).unwrap().enlist_resource(db.clone()).unwrap();
        tx.enlist_resource(local.clone()).unwrap();

        assert_eq!(client.tm.commit().unwrap_err().code(), TxErrorCode::Halted);
        let record = server.tm.object_store().read(&branch).unwrap().unwrap();
        assert_eq!(record.state, RecordState::Prepared);
    }

    // Both sides restart
    let server = coordinator("server", &server_dir, HaltInjector::disarmed());
    let db = Arc::new(SimulatedResource::open_journal("db", &journal_dir).unwrap());
    server.registry.register(db.clone());
    let client_again = coordinator("client", &client_dir, HaltInjector::disarmed());
    client_again.registry.register(subordinate(&server));
    client_again.registry.register(local.clone());

    assert_eq!(client_again.recovery.scan().unwrap().committed, 2);
    assert_eq!(db.commit_count(), 1);
    assert_eq!(local.commit_count(), 1);
    assert!(db.recover().unwrap().is_empty());
    assert!(server.tm.object_store().is_empty().unwrap());
    assert!(client_again.tm.object_store().is_empty().unwrap());
}

#[test]
fn test_server_rolls_back_when_client_votes_no() {
    let client_dir = TempDir::new().unwrap();
    let server_dir = TempDir::new().unwrap();
    let client = coordinator("client", &client_dir, HaltInjector::disarmed());
    let server = coordinator("server", &server_dir, HaltInjector::disarmed());
    let sub = subordinate(&server);

    let db = Arc::new(SimulatedResource::new("db"));
    let refuses = Arc::new(SimulatedResource::new("refuses"));
    refuses.fail_prepare(XaErrorCode::RbRollback);

    let tx = client.tm.begin().unwrap();
    let branch = tx.enlist_resource(sub.clone()).unwrap();
    let db_branch = sub.imported(&branch).unwrap().enlist_resource(db.clone()).unwrap();
    tx.enlist_resource(refuses.clone()).unwrap();

    assert_eq!(client.tm.commit().unwrap_err().code(), TxErrorCode::RolledBack);
    assert_eq!(db.rollback_count(), 1);
    assert_eq!(db.commit_count(), 0);
    assert!(db.recover().unwrap().iter().all(|x| x != &db_branch));
    assert!(server.tm.object_store().is_empty().unwrap());
    assert!(sub.imported(&branch).is_none());
}
