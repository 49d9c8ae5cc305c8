//! The two-phase commit driver
//!
//! One `Transaction` per global transaction id. All state sits behind a
//! per-transaction mutex held for the whole of commit or rollback, so the
//! driver waits for every participant at each phase before moving on.
//!
//! Participants are visited in enlistment order. Halt points are checked
//! at each position so a crash can be injected between two participants.
//!
//! Presumed abort: nothing is logged until every participant has
//! prepared. The commit decision is logged before the first second-phase
//! call and the record is removed once every persistent participant has
//! committed.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use crate::crash_point::{HaltInjector, HaltPoint};
use crate::objectstore::{ObjectStore, ParticipantOutcome, ParticipantRecord, RecordState, TxLogRecord};
use crate::observability::{log_event_with_fields, Event, Logger, TransactionStatistics};
use crate::xa::{Durability, LocalResource, Vote, XaErrorCode, XaResource, Xid};

use super::config::TimeoutPolicy;
use super::errors::{TxError, TxErrorCode, TxResult};
use super::outcome::{classify_commit, CommitOutcome, HeuristicOutcome};
use super::status::TxStatus;

/// State shared by the transaction manager and its transactions
pub(crate) struct TxContext {
    pub(crate) node_id: String,
    pub(crate) store: ObjectStore,
    pub(crate) halt: Arc<HaltInjector>,
    pub(crate) stats: TransactionStatistics,
    pub(crate) timeouts: TimeoutPolicy,
    /// Transactions without an outcome yet, keyed by xid
    pub(crate) active: Mutex<HashMap<Xid, Arc<Transaction>>>,
}

impl TxContext {
    pub(crate) fn active(&self) -> MutexGuard<'_, HashMap<Xid, Arc<Transaction>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn active_snapshot(&self) -> Vec<Arc<Transaction>> {
        self.active().values().cloned().collect()
    }

    fn deregister(&self, xid: &Xid) {
        self.active().remove(xid);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RollbackCause {
    Application,
    Resource,
    Timeout,
}

impl RollbackCause {
    fn as_str(&self) -> &'static str {
        match self {
            RollbackCause::Application => "application",
            RollbackCause::Resource => "resource",
            RollbackCause::Timeout => "timeout",
        }
    }
}

struct Participant {
    resource: Arc<dyn XaResource>,
    branch: Xid,
    vote: Option<Vote>,
}

struct TxInner {
    status: TxStatus,
    participants: Vec<Participant>,
    local: Option<Arc<dyn LocalResource>>,
    local_committed: bool,
    timed_out: bool,
}

/// A global transaction, or a transaction imported from a parent coordinator
pub struct Transaction {
    xid: Xid,
    parent: Option<Xid>,
    timeout_secs: u64,
    deadline: Option<Instant>,
    ctx: Arc<TxContext>,
    inner: Mutex<TxInner>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("xid", &self.xid)
            .field("parent", &self.parent)
            .field("timeout_secs", &self.timeout_secs)
            .field("status", &self.status())
            .finish()
    }
}

impl Transaction {
    pub(crate) fn new(ctx: Arc<TxContext>, xid: Xid, parent: Option<Xid>, timeout_secs: u64) -> Arc<Self> {
        let deadline = if timeout_secs == 0 {
            None
        } else {
            Instant::now().checked_add(Duration::from_secs(timeout_secs))
        };
        Arc::new(Self {
            xid,
            parent,
            timeout_secs,
            deadline,
            ctx,
            inner: Mutex::new(TxInner {
                status: TxStatus::Active,
                participants: Vec::new(),
                local: None,
                local_committed: false,
                timed_out: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, TxInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn xid(&self) -> &Xid {
        &self.xid
    }

    /// The parent coordinator's branch, for imported transactions
    pub fn parent(&self) -> Option<&Xid> {
        self.parent.as_ref()
    }

    pub fn is_imported(&self) -> bool {
        self.parent.is_some()
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn status(&self) -> TxStatus {
        self.lock().status
    }

    pub fn participant_count(&self) -> usize {
        self.lock().participants.len()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    // =========================================================================
    // Enlistment
    // =========================================================================

    fn check_enlistable(&self, inner: &mut TxInner) -> TxResult<()> {
        match inner.status {
            TxStatus::Active if self.is_expired() => {
                inner.status = TxStatus::MarkedRollback;
                Err(TxError::rolled_back(format!(
                    "transaction {} timed out after {}s",
                    self.xid, self.timeout_secs
                )))
            }
            TxStatus::Active => Ok(()),
            TxStatus::MarkedRollback => Err(TxError::rolled_back(format!(
                "transaction {} is marked rollback-only",
                self.xid
            ))),
            status => Err(TxError::not_active(status)),
        }
    }

    /// Enlist an XA resource on a fresh branch.
    ///
    /// The resource gets `min(transaction timeout, current maximum)` as its
    /// branch timeout. Returns the branch id.
    pub fn enlist_resource(&self, resource: Arc<dyn XaResource>) -> TxResult<Xid> {
        self.ctx.halt.ensure_alive()?;
        let mut inner = self.lock();
        self.check_enlistable(&mut inner)?;

        let branch = self.xid.branch(&self.ctx.node_id);
        resource.start(&branch).map_err(|e| {
            TxError::enlistment(format!(
                "{} refused branch {}: {}",
                resource.name(),
                branch,
                e
            ))
        })?;

        let timeout = self.timeout_secs.min(self.ctx.timeouts.maximum());
        if let Err(e) = resource.set_transaction_timeout(timeout) {
            Logger::warn(
                "TX_TIMEOUT_NOT_PROPAGATED",
                &[("resource", resource.name()), ("error", &e.to_string())],
            );
        }

        inner.participants.push(Participant {
            resource,
            branch: branch.clone(),
            vote: None,
        });
        Ok(branch)
    }

    /// Enlist the one-phase resource, committed after every XA participant
    /// prepared
    pub fn enlist_local(&self, resource: Arc<dyn LocalResource>) -> TxResult<()> {
        self.ctx.halt.ensure_alive()?;
        let mut inner = self.lock();
        self.check_enlistable(&mut inner)?;

        if self.is_imported() {
            return Err(TxError::enlistment(
                "a local resource cannot join an imported transaction",
            ));
        }
        if let Some(existing) = &inner.local {
            return Err(TxError::enlistment(format!(
                "local resource {} already enlisted, {} refused",
                existing.name(),
                resource.name()
            )));
        }
        inner.local = Some(resource);
        Ok(())
    }

    pub fn set_rollback_only(&self) -> TxResult<()> {
        self.ctx.halt.ensure_alive()?;
        let mut inner = self.lock();
        match inner.status {
            TxStatus::Active | TxStatus::MarkedRollback => {
                inner.status = TxStatus::MarkedRollback;
                Ok(())
            }
            status => Err(TxError::not_active(status)),
        }
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Commit. One resource gets a one-phase commit, more get two phases.
    pub fn commit(&self) -> TxResult<()> {
        self.ctx.halt.ensure_alive()?;
        let mut inner = self.lock();

        match inner.status {
            TxStatus::Active if !self.is_expired() => {}
            TxStatus::Active | TxStatus::MarkedRollback => {
                let cause = if self.is_expired() {
                    inner.timed_out = true;
                    RollbackCause::Timeout
                } else {
                    RollbackCause::Application
                };
                let result = self.rollback_locked(&mut inner);
                self.conclude(&inner, cause, &result);
                result?;
                return Err(TxError::rolled_back(format!(
                    "transaction {} rolled back: {}",
                    self.xid,
                    match cause {
                        RollbackCause::Timeout => "timed out",
                        _ => "marked rollback-only",
                    }
                )));
            }
            TxStatus::RolledBack if inner.timed_out => {
                return Err(TxError::rolled_back(format!(
                    "transaction {} timed out and was rolled back",
                    self.xid
                )));
            }
            status => return Err(TxError::not_active(status)),
        }

        let result = self.drive_commit(&mut inner);
        self.conclude(&inner, RollbackCause::Resource, &result);
        result
    }

    fn drive_commit(&self, inner: &mut TxInner) -> TxResult<()> {
        if inner.participants.is_empty() {
            return self.commit_local_only(inner);
        }
        if inner.participants.len() == 1 && inner.local.is_none() {
            return self.commit_one_phase(inner);
        }

        self.prepare_phase(inner)?;

        if let Some(local) = inner.local.clone() {
            if let Err(e) = local.commit() {
                let damaged = self.rollback_participants(inner);
                return Err(self.finish_rollback(
                    inner,
                    damaged,
                    format!("local resource {} failed to commit: {}", local.name(), e),
                ));
            }
            inner.local_committed = true;
        }

        let voting = Self::voting(inner);
        if voting.is_empty() {
            inner.status = TxStatus::Committed;
            return Ok(());
        }

        let record = self.decision_record(inner, &voting, RecordState::Committing);
        if !record.participants.is_empty() {
            if let Err(e) = self.ctx.store.write(&record) {
                Logger::error(
                    "TX_LOG_WRITE_FAILED",
                    &[("xid", &self.xid.to_string()), ("error", &e.to_string())],
                );
                let damaged = self.rollback_participants(inner) || inner.local_committed;
                return Err(self.finish_rollback(
                    inner,
                    damaged,
                    format!("cannot log commit decision: {}", e),
                ));
            }
        }
        self.ctx.halt.check(HaltPoint::AfterLogWrite)?;

        self.commit_phase(inner, &voting, record)
    }

    fn commit_local_only(&self, inner: &mut TxInner) -> TxResult<()> {
        let Some(local) = inner.local.clone() else {
            inner.status = TxStatus::Committed;
            return Ok(());
        };

        inner.status = TxStatus::Committing;
        match local.commit() {
            Ok(()) => {
                inner.local_committed = true;
                inner.status = TxStatus::Committed;
                Ok(())
            }
            Err(e) => {
                inner.status = TxStatus::RolledBack;
                Err(TxError::rolled_back(format!(
                    "local resource {} failed to commit: {}",
                    local.name(),
                    e
                )))
            }
        }
    }

    /// Single XA resource: `commit(branch, one_phase = true)`.
    ///
    /// A heuristic failure surfaces as heuristic-mixed: the resource may be
    /// a subordinate coordinator with several participants of its own.
    fn commit_one_phase(&self, inner: &mut TxInner) -> TxResult<()> {
        inner.status = TxStatus::Committing;
        let resource = Arc::clone(&inner.participants[0].resource);
        let branch = inner.participants[0].branch.clone();

        self.ctx.halt.check(HaltPoint::BeforeCommit(0))?;
        let result = resource.commit(&branch, true);
        self.ctx.halt.check(HaltPoint::AfterCommit(0))?;

        let err = match result {
            Ok(()) => {
                inner.status = TxStatus::Committed;
                return Ok(());
            }
            Err(e) => e,
        };
        let persistent = resource.durability() == Durability::Persistent;

        match err.code {
            code if code.is_rollback() => {
                inner.status = TxStatus::RolledBack;
                Err(TxError::rolled_back(format!(
                    "{} rolled back {}: {}",
                    resource.name(),
                    branch,
                    err
                )))
            }
            XaErrorCode::HeurRb => {
                let _ = resource.forget(&branch);
                inner.status = TxStatus::RolledBack;
                Err(TxError::rolled_back(format!(
                    "{} heuristically rolled back {}",
                    resource.name(),
                    branch
                )))
            }
            XaErrorCode::HeurCom => {
                let _ = resource.forget(&branch);
                inner.status = TxStatus::Committed;
                Ok(())
            }
            XaErrorCode::HeurMix | XaErrorCode::HeurHaz => {
                inner.status = TxStatus::HeuristicMixed;
                Err(TxError::heuristic(TxErrorCode::HeuristicMixed, &self.xid))
            }
            XaErrorCode::RmErr => {
                if persistent {
                    self.log_one_phase(
                        resource.as_ref(),
                        &branch,
                        RecordState::Heuristic,
                        ParticipantOutcome::Heuristic { code: err.code },
                    );
                }
                inner.status = TxStatus::HeuristicMixed;
                Err(TxError::heuristic(TxErrorCode::HeuristicMixed, &self.xid))
            }
            code if code.is_transient() => {
                if persistent {
                    self.log_one_phase(
                        resource.as_ref(),
                        &branch,
                        RecordState::Committing,
                        ParticipantOutcome::Pending,
                    );
                }
                log_event_with_fields(
                    Event::TxCommitDeferred,
                    &[("xid", &self.xid.to_string()), ("error", &err.to_string())],
                );
                inner.status = TxStatus::HeuristicHazard;
                Err(TxError::heuristic(TxErrorCode::HeuristicHazard, &self.xid))
            }
            _ => {
                inner.status = TxStatus::HeuristicHazard;
                Err(TxError::heuristic(TxErrorCode::HeuristicHazard, &self.xid))
            }
        }
    }

    fn log_one_phase(
        &self,
        resource: &dyn XaResource,
        branch: &Xid,
        state: RecordState,
        outcome: ParticipantOutcome,
    ) {
        let mut participant = ParticipantRecord::pending(resource.name(), branch.clone(), true);
        participant.outcome = outcome;
        let record = TxLogRecord::new(self.xid.clone(), state, vec![participant])
            .with_parent(self.parent.clone());

        if let Err(e) = self.ctx.store.write(&record) {
            Logger::error(
                "TX_LOG_WRITE_FAILED",
                &[("xid", &self.xid.to_string()), ("error", &e.to_string())],
            );
        }
    }

    /// Ask every participant to prepare, in enlistment order.
    ///
    /// On any failure everything is rolled back and `RolledBack` returned.
    fn prepare_phase(&self, inner: &mut TxInner) -> TxResult<()> {
        inner.status = TxStatus::Preparing;

        for i in 0..inner.participants.len() {
            self.ctx.halt.check(HaltPoint::BeforePrepare(i))?;

            let resource = Arc::clone(&inner.participants[i].resource);
            let branch = inner.participants[i].branch.clone();
            match resource.prepare(&branch) {
                Ok(vote) => inner.participants[i].vote = Some(vote),
                Err(e) => {
                    log_event_with_fields(
                        Event::TxPrepareFailed,
                        &[
                            ("xid", &self.xid.to_string()),
                            ("resource", resource.name()),
                            ("error", &e.to_string()),
                        ],
                    );
                    let damaged = self.rollback_participants(inner);
                    return Err(self.finish_rollback(
                        inner,
                        damaged,
                        format!("{} did not prepare {}: {}", resource.name(), branch, e),
                    ));
                }
            }

            self.ctx.halt.check(HaltPoint::AfterPrepare(i))?;
        }
        Ok(())
    }

    /// Participants that voted to commit
    fn voting(inner: &TxInner) -> Vec<usize> {
        inner
            .participants
            .iter()
            .enumerate()
            .filter(|(_, p)| p.vote == Some(Vote::Commit))
            .map(|(i, _)| i)
            .collect()
    }

    /// Record of the persistent voting participants
    fn decision_record(&self, inner: &TxInner, voting: &[usize], state: RecordState) -> TxLogRecord {
        let participants = voting
            .iter()
            .map(|&i| &inner.participants[i])
            .filter(|p| p.resource.durability() == Durability::Persistent)
            .map(|p| ParticipantRecord::pending(p.resource.name(), p.branch.clone(), false))
            .collect();
        TxLogRecord::new(self.xid.clone(), state, participants).with_parent(self.parent.clone())
    }

    /// Second phase, in enlistment order.
    ///
    /// Transient failures stay pending in the record for recovery. The
    /// record is removed once every participant committed.
    fn commit_phase(&self, inner: &mut TxInner, voting: &[usize], mut record: TxLogRecord) -> TxResult<()> {
        inner.status = TxStatus::Committing;
        let mut committed_any = inner.local_committed;
        let mut heuristics = Vec::new();
        let mut pending = false;

        for &i in voting {
            self.ctx.halt.check(HaltPoint::BeforeCommit(i))?;

            let resource = Arc::clone(&inner.participants[i].resource);
            let branch = inner.participants[i].branch.clone();
            let result = resource.commit(&branch, false);
            let outcome = classify_commit(resource.as_ref(), &branch, result);

            self.ctx.halt.check(HaltPoint::AfterCommit(i))?;

            let slot = record.participants.iter().position(|p| p.branch == branch);
            match outcome {
                CommitOutcome::Committed => {
                    committed_any = true;
                    if let Some(slot) = slot {
                        record.set_outcome(slot, ParticipantOutcome::Committed);
                    }
                }
                CommitOutcome::Retry(code) => {
                    pending = true;
                    Logger::warn(
                        "TX_COMMIT_RETRY_PENDING",
                        &[
                            ("xid", &self.xid.to_string()),
                            ("resource", resource.name()),
                            ("code", code.name()),
                        ],
                    );
                }
                CommitOutcome::Heuristic(code) => {
                    heuristics.push(code);
                    if let Some(slot) = slot {
                        record.set_outcome(slot, ParticipantOutcome::Heuristic { code });
                    }
                }
            }
        }

        if !record.participants.is_empty() {
            let stored = if record.is_complete() {
                self.ctx.store.remove(&record.xid).map(|_| ())
            } else {
                self.ctx.store.write(&record)
            };
            if let Err(e) = stored {
                Logger::error(
                    "TX_LOG_UPDATE_FAILED",
                    &[("xid", &self.xid.to_string()), ("error", &e.to_string())],
                );
            }
        }

        if heuristics.is_empty() {
            if pending {
                log_event_with_fields(Event::TxCommitDeferred, &[("xid", &self.xid.to_string())]);
                inner.status = TxStatus::HeuristicHazard;
                return Err(TxError::heuristic(TxErrorCode::HeuristicHazard, &self.xid));
            }
            inner.status = TxStatus::Committed;
            return Ok(());
        }

        let (status, code) = match HeuristicOutcome::from_codes(committed_any, &heuristics) {
            HeuristicOutcome::Mixed => (TxStatus::HeuristicMixed, TxErrorCode::HeuristicMixed),
            HeuristicOutcome::Rollback => (TxStatus::HeuristicRollback, TxErrorCode::HeuristicRollback),
            HeuristicOutcome::Hazard => (TxStatus::HeuristicHazard, TxErrorCode::HeuristicHazard),
        };
        inner.status = status;
        Err(TxError::heuristic(code, &self.xid))
    }

    // =========================================================================
    // Rollback
    // =========================================================================

    pub fn rollback(&self) -> TxResult<()> {
        self.ctx.halt.ensure_alive()?;
        let mut inner = self.lock();
        match inner.status {
            TxStatus::Active | TxStatus::MarkedRollback | TxStatus::Prepared => {}
            status => return Err(TxError::not_active(status)),
        }

        let result = self.rollback_locked(&mut inner);
        self.conclude(&inner, RollbackCause::Application, &result);
        result
    }

    fn rollback_locked(&self, inner: &mut TxInner) -> TxResult<()> {
        let was_prepared = inner.status == TxStatus::Prepared;
        inner.status = TxStatus::RollingBack;
        let damaged = self.rollback_participants(inner);

        if was_prepared {
            if let Err(e) = self.ctx.store.remove(&self.xid) {
                Logger::error(
                    "TX_LOG_UPDATE_FAILED",
                    &[("xid", &self.xid.to_string()), ("error", &e.to_string())],
                );
            }
        }

        if damaged {
            inner.status = TxStatus::HeuristicMixed;
            return Err(TxError::heuristic(TxErrorCode::HeuristicMixed, &self.xid));
        }
        inner.status = TxStatus::RolledBack;
        Ok(())
    }

    /// Roll back every XA branch that did not vote read-only, then the
    /// local resource unless it already committed.
    ///
    /// Returns true when a participant had already committed heuristically.
    /// Other failures are logged and left to orphan detection.
    fn rollback_participants(&self, inner: &mut TxInner) -> bool {
        let mut damaged = false;

        for p in &inner.participants {
            if p.vote == Some(Vote::ReadOnly) {
                continue;
            }
            let Err(e) = p.resource.rollback(&p.branch) else {
                continue;
            };
            match e.code {
                code if code.is_rollback() || code == XaErrorCode::Nota => {}
                XaErrorCode::HeurRb => {
                    let _ = p.resource.forget(&p.branch);
                }
                XaErrorCode::HeurCom | XaErrorCode::HeurMix | XaErrorCode::HeurHaz => {
                    damaged = true;
                    log_event_with_fields(
                        Event::TxHeuristic,
                        &[
                            ("xid", &self.xid.to_string()),
                            ("resource", p.resource.name()),
                            ("code", e.code.name()),
                        ],
                    );
                }
                _ => Logger::warn(
                    "TX_ROLLBACK_FAILED",
                    &[
                        ("xid", &self.xid.to_string()),
                        ("resource", p.resource.name()),
                        ("error", &e.to_string()),
                    ],
                ),
            }
        }

        if !inner.local_committed {
            if let Some(local) = &inner.local {
                if let Err(e) = local.rollback() {
                    Logger::warn(
                        "TX_ROLLBACK_FAILED",
                        &[("resource", local.name()), ("error", &e.to_string())],
                    );
                }
            }
        }
        damaged
    }

    fn finish_rollback(&self, inner: &mut TxInner, damaged: bool, reason: String) -> TxError {
        if damaged {
            inner.status = TxStatus::HeuristicMixed;
            TxError::heuristic(TxErrorCode::HeuristicMixed, &self.xid)
        } else {
            inner.status = TxStatus::RolledBack;
            TxError::rolled_back(reason)
        }
    }

    /// Reaper entry point. Skips transactions busy in another call.
    pub(crate) fn reap(&self) -> bool {
        if self.ctx.halt.is_tripped() {
            return false;
        }
        let mut inner = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return false,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
        };
        if !inner.status.is_active() || !self.is_expired() {
            return false;
        }

        inner.status = TxStatus::MarkedRollback;
        inner.timed_out = true;
        log_event_with_fields(
            Event::TxTimedOut,
            &[
                ("xid", &self.xid.to_string()),
                ("timeout_secs", &self.timeout_secs.to_string()),
            ],
        );
        let result = self.rollback_locked(&mut inner);
        self.conclude(&inner, RollbackCause::Timeout, &result);
        true
    }

    // =========================================================================
    // Subordinate (imported) transactions
    // =========================================================================

    /// First phase on behalf of the parent coordinator.
    ///
    /// Writes a `Prepared` record and waits for `commit_prepared` or
    /// `rollback`. Votes read-only when no participant has work.
    pub fn prepare_subordinate(&self) -> TxResult<Vote> {
        self.ctx.halt.ensure_alive()?;
        let mut inner = self.lock();
        match inner.status {
            TxStatus::Active if !self.is_expired() => {}
            TxStatus::Active | TxStatus::MarkedRollback => {
                let result = self.rollback_locked(&mut inner);
                self.conclude(&inner, RollbackCause::Application, &result);
                result?;
                return Err(TxError::rolled_back(format!(
                    "imported transaction {} cannot prepare",
                    self.xid
                )));
            }
            status => return Err(TxError::not_active(status)),
        }

        let result = self.drive_prepare(&mut inner);
        let concluded = result.as_ref().map(|_| ()).map_err(Clone::clone);
        self.conclude(&inner, RollbackCause::Resource, &concluded);
        result
    }

    fn drive_prepare(&self, inner: &mut TxInner) -> TxResult<Vote> {
        self.prepare_phase(inner)?;

        let voting = Self::voting(inner);
        if voting.is_empty() {
            inner.status = TxStatus::Committed;
            return Ok(Vote::ReadOnly);
        }

        let record = self.decision_record(inner, &voting, RecordState::Prepared);
        if !record.participants.is_empty() {
            if let Err(e) = self.ctx.store.write(&record) {
                let damaged = self.rollback_participants(inner);
                return Err(self.finish_rollback(
                    inner,
                    damaged,
                    format!("cannot log prepared state: {}", e),
                ));
            }
        }
        self.ctx.halt.check(HaltPoint::AfterLogWrite)?;

        inner.status = TxStatus::Prepared;
        Ok(Vote::Commit)
    }

    /// Second phase of a prepared subordinate, on the parent's commit decision
    pub fn commit_prepared(&self) -> TxResult<()> {
        self.ctx.halt.ensure_alive()?;
        let mut inner = self.lock();
        if inner.status != TxStatus::Prepared {
            return Err(TxError::not_active(inner.status));
        }

        let voting = Self::voting(&inner);
        let mut record = match self.ctx.store.read(&self.xid) {
            Ok(Some(record)) => record,
            Ok(None) => self.decision_record(&inner, &voting, RecordState::Committing),
            Err(e) => return Err(TxError::object_store(&e)),
        };
        if !record.participants.is_empty() {
            record.state = RecordState::Committing;
            record.touch();
            self.ctx
                .store
                .write(&record)
                .map_err(|e| TxError::object_store(&e))?;
        }

        let result = self.commit_phase(&mut inner, &voting, record);
        self.conclude(&inner, RollbackCause::Resource, &result);
        result
    }

    // =========================================================================
    // Outcome bookkeeping
    // =========================================================================

    fn conclude(&self, inner: &TxInner, cause: RollbackCause, result: &TxResult<()>) {
        let xid = self.xid.to_string();

        if let Err(e) = result {
            if e.code() == TxErrorCode::Halted {
                log_event_with_fields(Event::TxHalted, &[("xid", &xid), ("reason", e.message())]);
                return;
            }
        }

        match inner.status {
            TxStatus::Committed => {
                self.ctx.stats.record_commit();
                log_event_with_fields(Event::TxCommitted, &[("xid", &xid)]);
            }
            TxStatus::RolledBack => {
                match cause {
                    RollbackCause::Application => self.ctx.stats.record_application_rollback(),
                    RollbackCause::Resource => self.ctx.stats.record_resource_rollback(),
                    RollbackCause::Timeout => self.ctx.stats.record_timeout(),
                }
                log_event_with_fields(
                    Event::TxRolledBack,
                    &[("xid", &xid), ("cause", cause.as_str())],
                );
            }
            TxStatus::HeuristicMixed | TxStatus::HeuristicRollback | TxStatus::HeuristicHazard => {
                self.ctx.stats.record_heuristic();
                log_event_with_fields(
                    Event::TxHeuristic,
                    &[("xid", &xid), ("status", inner.status.as_str())],
                );
            }
            _ => return,
        }
        self.ctx.deregister(&self.xid);
    }
}
