//! Recovery scans
//!
//! A scan makes two passes separated by the backoff:
//!
//! 1. Replay every `Committing` record: retry the commit of each pending
//!    participant through the registry. Complete records are removed;
//!    heuristic outcomes move the record to `Heuristic`.
//! 2. Ask every registered resource for its in-doubt branches. A branch of
//!    this node that no record references and whose transaction is not in
//!    flight is an orphan candidate.
//!
//! Candidates seen in both passes are rolled back (presumed abort). The
//! backoff gives a transaction that prepared just before pass 1 time to
//! write its record.
//!
//! `Heuristic` and `Prepared` records are never touched by a scan.

use std::collections::{BTreeSet, HashSet};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crate::objectstore::{ObjectStoreError, ParticipantOutcome, RecordState, TxLogRecord};
use crate::observability::{log_event_with_fields, Event, Logger, ObservationScope};
use crate::txn::{classify_commit, CommitOutcome, HeuristicOutcome, TransactionManager};
use crate::xa::{XaError, XaErrorCode, XaResource, XaResult, Xid};

use super::config::RecoveryConfig;
use super::errors::{RecoveryError, RecoveryErrorCode, RecoveryResult};
use super::registry::RecoveryRegistry;

/// What one scan did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Participants whose commit was replayed successfully
    pub committed: usize,
    pub orphans_rolled_back: usize,
    /// Heuristic records left for an operator
    pub heuristics_skipped: usize,
    /// Participants still pending after the second pass
    pub pending: usize,
    /// Failed or timed-out resource calls
    pub errors: usize,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }
}

type Candidate = (Arc<dyn XaResource>, Xid);

pub struct RecoveryManager {
    tm: Arc<TransactionManager>,
    registry: Arc<RecoveryRegistry>,
    config: RecoveryConfig,
    scan_lock: Mutex<()>,
}

impl RecoveryManager {
    pub fn new(
        tm: Arc<TransactionManager>,
        registry: Arc<RecoveryRegistry>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            tm,
            registry,
            config,
            scan_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<RecoveryRegistry> {
        &self.registry
    }

    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.tm
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Scan and report success: false on object-store errors, failed
    /// `recover()` calls or timed-out resource calls
    pub fn run_scan(&self) -> bool {
        match self.scan() {
            Ok(report) => report.is_clean(),
            Err(e) => {
                Logger::error(
                    "RECOVERY_SCAN_ABORTED",
                    &[("code", e.code().code()), ("error", e.message())],
                );
                false
            }
        }
    }

    /// Full two-pass scan
    pub fn scan(&self) -> RecoveryResult<ScanReport> {
        let _guard = self.scan_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let scope = ObservationScope::with_fields(Event::RecoveryScan, &[("node_id", self.tm.node_id())]);

        let mut report = ScanReport::default();
        match self.scan_locked(&mut report) {
            Ok(()) => {
                scope.complete_with_fields(&[
                    ("committed", &report.committed.to_string()),
                    ("orphans_rolled_back", &report.orphans_rolled_back.to_string()),
                    ("heuristics_skipped", &report.heuristics_skipped.to_string()),
                    ("pending", &report.pending.to_string()),
                    ("errors", &report.errors.to_string()),
                ]);
                Ok(report)
            }
            Err(e) => {
                scope.fail(&e.to_string());
                Err(e)
            }
        }
    }

    fn scan_locked(&self, report: &mut ScanReport) -> RecoveryResult<()> {
        self.replay_records(report, true)?;
        let first = self.orphan_candidates(report)?;

        if !self.config.backoff.is_zero() {
            thread::sleep(self.config.backoff);
        }

        report.pending = 0;
        self.replay_records(report, false)?;
        let confirmed: HashSet<(String, Xid)> = self
            .orphan_candidates(report)?
            .into_iter()
            .map(|(resource, xid)| (resource.name().to_string(), xid))
            .collect();

        for (resource, xid) in first {
            if !confirmed.contains(&(resource.name().to_string(), xid.clone())) {
                continue;
            }
            self.roll_back_orphan(&resource, &xid, report);
        }
        Ok(())
    }

    // =========================================================================
    // Record replay
    // =========================================================================

    fn replay_records(&self, report: &mut ScanReport, first_pass: bool) -> RecoveryResult<()> {
        let store = self.tm.object_store();
        let records = store.list().map_err(|e| RecoveryError::object_store(&e))?;

        for listed in records {
            match listed.state {
                RecordState::Heuristic => {
                    if first_pass {
                        report.heuristics_skipped += 1;
                        log_event_with_fields(
                            Event::RecoveryHeuristicSkipped,
                            &[("xid", &listed.xid.to_string())],
                        );
                    }
                    continue;
                }
                RecordState::Prepared => continue,
                RecordState::Committing => {}
            }
            if self.tm.is_in_flight(&listed.xid) {
                continue;
            }

            // Resolved by someone else since the listing
            let Some(mut record) = store
                .read(&listed.xid)
                .map_err(|e| RecoveryError::object_store(&e))?
            else {
                continue;
            };
            if record.state != RecordState::Committing {
                continue;
            }

            self.replay_record(&mut record, report);

            let stored = if record.is_complete() {
                store.remove(&record.xid).map(|_| ())
            } else {
                store.write(&record)
            };
            stored.map_err(|e| RecoveryError::object_store(&e))?;
        }
        Ok(())
    }

    /// Retry the commit of every pending participant of one record
    fn replay_record(&self, record: &mut TxLogRecord, report: &mut ScanReport) {
        let xid = record.xid.to_string();

        for i in 0..record.participants.len() {
            if record.participants[i].outcome != ParticipantOutcome::Pending {
                continue;
            }
            let name = record.participants[i].resource.clone();
            let branch = record.participants[i].branch.clone();
            let one_phase = record.participants[i].one_phase;

            let Some(resource) = self.registry.get(&name) else {
                report.errors += 1;
                log_event_with_fields(
                    Event::RecoveryResourceFailed,
                    &[("xid", &xid), ("resource", &name), ("error", "not registered")],
                );
                continue;
            };

            let call_branch = branch.clone();
            let result = match self.call(&resource, "commit", move |r| r.commit(&call_branch, one_phase)) {
                Ok(result) => result,
                Err(e) => {
                    report.errors += 1;
                    log_event_with_fields(
                        Event::RecoveryResourceFailed,
                        &[("xid", &xid), ("resource", &name), ("error", e.message())],
                    );
                    continue;
                }
            };

            match classify_commit(resource.as_ref(), &branch, result) {
                CommitOutcome::Committed => {
                    record.set_outcome(i, ParticipantOutcome::Committed);
                    report.committed += 1;
                    log_event_with_fields(
                        Event::RecoveryCommitRetried,
                        &[("xid", &xid), ("resource", &name)],
                    );
                }
                CommitOutcome::Retry(code) => {
                    report.pending += 1;
                    Logger::trace(
                        "RECOVERY_COMMIT_STILL_PENDING",
                        &[("xid", &xid), ("resource", &name), ("code", code.name())],
                    );
                }
                CommitOutcome::Heuristic(code) => {
                    record.set_outcome(i, ParticipantOutcome::Heuristic { code });
                    log_event_with_fields(
                        Event::TxHeuristic,
                        &[("xid", &xid), ("resource", &name), ("code", code.name())],
                    );
                }
            }
        }
    }

    // =========================================================================
    // Orphan detection
    // =========================================================================

    fn orphan_candidates(&self, report: &mut ScanReport) -> RecoveryResult<Vec<Candidate>> {
        let referenced = self
            .tm
            .object_store()
            .referenced_branches()
            .map_err(|e| RecoveryError::object_store(&e))?;

        let mut candidates = Vec::new();
        for resource in self.registry.snapshot() {
            let in_doubt = match self.call(&resource, "recover", |r| r.recover()) {
                Ok(Ok(xids)) => xids,
                Ok(Err(e)) => {
                    report.errors += 1;
                    log_event_with_fields(
                        Event::RecoveryResourceFailed,
                        &[("resource", resource.name()), ("error", &e.to_string())],
                    );
                    continue;
                }
                Err(e) => {
                    report.errors += 1;
                    log_event_with_fields(
                        Event::RecoveryResourceFailed,
                        &[("resource", resource.name()), ("error", e.message())],
                    );
                    continue;
                }
            };

            for xid in in_doubt {
                if xid.node_id() != self.tm.node_id()
                    || referenced.contains(&xid)
                    || self.tm.is_in_flight_gtrid(xid.gtrid())
                {
                    continue;
                }
                candidates.push((Arc::clone(&resource), xid));
            }
        }
        Ok(candidates)
    }

    fn roll_back_orphan(&self, resource: &Arc<dyn XaResource>, xid: &Xid, report: &mut ScanReport) {
        let call_xid = xid.clone();
        match self.call(resource, "rollback", move |r| r.rollback(&call_xid)) {
            Ok(Ok(())) => {
                report.orphans_rolled_back += 1;
                log_event_with_fields(
                    Event::RecoveryOrphanRolledBack,
                    &[("xid", &xid.to_string()), ("resource", resource.name())],
                );
            }
            Ok(Err(e)) if e.code == XaErrorCode::Nota || e.code.is_rollback() => {}
            Ok(Err(e)) => {
                report.errors += 1;
                log_event_with_fields(
                    Event::RecoveryResourceFailed,
                    &[
                        ("xid", &xid.to_string()),
                        ("resource", resource.name()),
                        ("error", &e.to_string()),
                    ],
                );
            }
            Err(e) => {
                report.errors += 1;
                log_event_with_fields(
                    Event::RecoveryResourceFailed,
                    &[
                        ("xid", &xid.to_string()),
                        ("resource", resource.name()),
                        ("error", e.message()),
                    ],
                );
            }
        }
    }

    /// Run one resource call on its own thread, bounded by the resource
    /// timeout. A call that overruns is abandoned, not cancelled.
    fn call<T, F>(&self, resource: &Arc<dyn XaResource>, call: &str, f: F) -> RecoveryResult<XaResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&dyn XaResource) -> XaResult<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let target = Arc::clone(resource);
        let spawned = thread::Builder::new()
            .name(format!("xacoord-recovery-{}", call))
            .spawn(move || {
                let _ = tx.send(f(target.as_ref()));
            });
        if let Err(e) = spawned {
            return Ok(Err(XaError::new(
                XaErrorCode::RmFail,
                format!("cannot spawn {} call: {}", call, e),
            )));
        }

        rx.recv_timeout(self.config.resource_timeout)
            .map_err(|_| RecoveryError::timeout(call, resource.name()))
    }

    // =========================================================================
    // Administrative operations
    // =========================================================================

    /// Put a heuristic record back into `Committing` so the next scan
    /// retries its heuristic participants
    pub fn recover(&self, xid: &Xid) -> RecoveryResult<()> {
        let _guard = self.scan_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let store = self.tm.object_store();

        let mut record = store
            .read(xid)
            .map_err(|e| RecoveryError::object_store(&e))?
            .ok_or_else(|| RecoveryError::record_not_found(xid))?;
        if record.state != RecordState::Heuristic {
            return Err(RecoveryError::not_heuristic(xid));
        }

        record.reclassify();
        store.write(&record).map_err(|e| RecoveryError::object_store(&e))?;
        log_event_with_fields(Event::RecoveryHeuristicReclassified, &[("xid", &xid.to_string())]);
        Ok(())
    }

    /// Discard a heuristic record, telling its resources to forget the
    /// heuristic branches
    pub fn forget(&self, xid: &Xid) -> RecoveryResult<()> {
        let _guard = self.scan_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let store = self.tm.object_store();

        let record = store
            .read(xid)
            .map_err(|e| RecoveryError::object_store(&e))?
            .ok_or_else(|| RecoveryError::record_not_found(xid))?;
        if record.state != RecordState::Heuristic {
            return Err(RecoveryError::not_heuristic(xid));
        }

        for p in &record.participants {
            if !matches!(p.outcome, ParticipantOutcome::Heuristic { .. }) {
                continue;
            }
            let Some(resource) = self.registry.get(&p.resource) else {
                continue;
            };
            let branch = p.branch.clone();
            match self.call(&resource, "forget", move |r| r.forget(&branch)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.code == XaErrorCode::Nota => {}
                Ok(Err(e)) => Logger::warn(
                    "RECOVERY_FORGET_FAILED",
                    &[("xid", &xid.to_string()), ("resource", &p.resource), ("error", &e.to_string())],
                ),
                Err(e) => Logger::warn(
                    "RECOVERY_FORGET_FAILED",
                    &[("xid", &xid.to_string()), ("resource", &p.resource), ("error", e.message())],
                ),
            }
        }

        store.remove(xid).map_err(|e| RecoveryError::object_store(&e))?;
        log_event_with_fields(Event::RecoveryHeuristicForgotten, &[("xid", &xid.to_string())]);
        Ok(())
    }

    // =========================================================================
    // Subordinate side: answers for a parent coordinator
    // =========================================================================

    /// Imported transactions that are prepared and waiting for their parent
    pub fn prepared_imports(&self) -> XaResult<Vec<Xid>> {
        let mut xids: BTreeSet<Xid> = self
            .tm
            .object_store()
            .list()
            .map_err(store_failure)?
            .into_iter()
            .filter(|r| r.state == RecordState::Prepared && r.parent.is_some())
            .map(|r| r.xid)
            .collect();

        for tx in self.tm.active_transactions() {
            if tx.is_imported() && tx.status() == crate::txn::TxStatus::Prepared {
                xids.insert(tx.xid().clone());
            }
        }
        Ok(xids.into_iter().collect())
    }

    /// Deliver the parent's decision for an imported transaction, through
    /// the live transaction or, after a restart, from its record
    pub fn complete_import(&self, xid: &Xid, commit: bool) -> XaResult<()> {
        if let Some(tx) = self.tm.find(xid) {
            let result = if commit { tx.commit_prepared() } else { tx.rollback() };
            return result.map_err(|e| e.to_xa_error());
        }

        let _guard = self.scan_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let store = self.tm.object_store();
        let Some(mut record) = store.read(xid).map_err(store_failure)? else {
            return Err(XaError::new(XaErrorCode::Nota, format!("no imported transaction {}", xid)));
        };

        match (record.state, commit) {
            (RecordState::Prepared, true) | (RecordState::Committing, true) => {
                record.state = RecordState::Committing;
                record.touch();
                store.write(&record).map_err(store_failure)?;

                let mut report = ScanReport::default();
                self.replay_record(&mut record, &mut report);
                if record.is_complete() {
                    store.remove(xid).map_err(store_failure)?;
                    return Ok(());
                }
                store.write(&record).map_err(store_failure)?;
                if record.has_heuristic() {
                    return Err(heuristic_failure(&record));
                }
                Err(XaError::new(
                    XaErrorCode::RmFail,
                    format!("commit of {} pending; recovery will retry", xid),
                ))
            }
            (RecordState::Prepared, false) => {
                let mut failed = false;
                for p in &record.participants {
                    let Some(resource) = self.registry.get(&p.resource) else {
                        failed = true;
                        continue;
                    };
                    let branch = p.branch.clone();
                    match self.call(&resource, "rollback", move |r| r.rollback(&branch)) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) if e.code == XaErrorCode::Nota || e.code.is_rollback() => {}
                        _ => failed = true,
                    }
                }
                if failed {
                    return Err(XaError::new(
                        XaErrorCode::RmFail,
                        format!("rollback of {} incomplete", xid),
                    ));
                }
                store.remove(xid).map_err(store_failure)?;
                Ok(())
            }
            (RecordState::Committing, false) => Err(XaError::new(
                XaErrorCode::Proto,
                format!("{} is already committing", xid),
            )),
            (RecordState::Heuristic, _) => Err(heuristic_failure(&record)),
        }
    }

    /// Discard the heuristic record of an imported transaction
    pub fn forget_import(&self, xid: &Xid) -> XaResult<()> {
        self.forget(xid).map_err(|e| {
            let code = match e.code() {
                RecoveryErrorCode::RecordNotFound => XaErrorCode::Nota,
                RecoveryErrorCode::NotHeuristic => XaErrorCode::Proto,
                _ => XaErrorCode::RmErr,
            };
            XaError::new(code, e.to_string())
        })
    }
}

fn store_failure(err: ObjectStoreError) -> XaError {
    XaError::new(XaErrorCode::RmFail, err.to_string())
}

fn heuristic_failure(record: &TxLogRecord) -> XaError {
    let committed_any = record
        .participants
        .iter()
        .any(|p| p.outcome == ParticipantOutcome::Committed);
    let codes: Vec<XaErrorCode> = record
        .participants
        .iter()
        .filter_map(|p| match p.outcome {
            ParticipantOutcome::Heuristic { code } => Some(code),
            _ => None,
        })
        .collect();
    let outcome = HeuristicOutcome::from_codes(committed_any, &codes);
    XaError::new(outcome.xa_code(), format!("{} completed heuristically", record.xid))
}
