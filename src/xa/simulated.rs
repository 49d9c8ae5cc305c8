//! In-process resource managers with fault injection
//!
//! `SimulatedResource` keeps branch state in memory and, when opened with a
//! journal, rewrites a JSON file after every state change so a new
//! instance opened on the same file sees the prepared branches again. The
//! CLI `simulate` command and the integration tests drive the coordinator
//! through it.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::objectstore::write_file_atomic;

use super::errors::{XaError, XaErrorCode, XaResult};
use super::resource::{Durability, LocalResource, Vote, XaResource};
use super::xid::Xid;

/// Branch state as seen by the resource manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchState {
    Active,
    Prepared,
    /// Voted read-only; released without a second phase
    ReadOnly,
    Committed,
    RolledBack,
    /// Completed heuristically with this code, awaiting `forget`
    Heuristic(XaErrorCode),
    Forgotten,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Journal {
    branches: Vec<(Xid, BranchState)>,
    prepares: u64,
    commits: u64,
    rollbacks: u64,
    forgets: u64,
}

#[derive(Debug)]
struct SimInner {
    branches: BTreeMap<Xid, BranchState>,
    last_branch: Option<Xid>,
    vote: Vote,
    prepare_faults: VecDeque<XaErrorCode>,
    commit_faults: VecDeque<XaErrorCode>,
    rollback_faults: VecDeque<XaErrorCode>,
    recover_faults: VecDeque<XaErrorCode>,
    call_delay: Duration,
    timeout: u64,
    prepares: u64,
    commits: u64,
    rollbacks: u64,
    forgets: u64,
}

/// Simulated XA resource manager
#[derive(Debug)]
pub struct SimulatedResource {
    name: String,
    durability: Durability,
    journal: Option<PathBuf>,
    inner: Mutex<SimInner>,
}

impl SimulatedResource {
    /// A persistent resource whose state lives only in this instance
    pub fn new(name: &str) -> Self {
        Self::build(name, Durability::Persistent, None, Journal::default())
    }

    /// A volatile resource, never logged by the coordinator
    pub fn volatile(name: &str) -> Self {
        Self::build(name, Durability::Volatile, None, Journal::default())
    }

    /// A persistent resource journaled to `<dir>/<name>.json`.
    ///
    /// Existing journal content is loaded, so prepared branches written by
    /// an earlier instance are reported by `recover`.
    pub fn open_journal(name: &str, dir: &Path) -> XaResult<Self> {
        let path = dir.join(format!("{}.json", name));
        let journal = if path.exists() {
            let bytes = std::fs::read(&path).map_err(|e| {
                XaError::new(XaErrorCode::RmFail, format!("cannot read journal: {}", e))
            })?;
            serde_json::from_slice(&bytes).map_err(|e| {
                XaError::new(XaErrorCode::RmErr, format!("corrupt journal: {}", e))
            })?
        } else {
            Journal::default()
        };
        Ok(Self::build(name, Durability::Persistent, Some(path), journal))
    }

    fn build(name: &str, durability: Durability, journal: Option<PathBuf>, state: Journal) -> Self {
        Self {
            name: name.to_string(),
            durability,
            journal,
            inner: Mutex::new(SimInner {
                branches: state.branches.into_iter().collect(),
                last_branch: None,
                vote: Vote::Commit,
                prepare_faults: VecDeque::new(),
                commit_faults: VecDeque::new(),
                rollback_faults: VecDeque::new(),
                recover_faults: VecDeque::new(),
                call_delay: Duration::ZERO,
                timeout: 0,
                prepares: state.prepares,
                commits: state.commits,
                rollbacks: state.rollbacks,
                forgets: state.forgets,
            }),
        }
    }

    /// Vote read-only on every prepare
    pub fn with_vote(self, vote: Vote) -> Self {
        self.lock().vote = vote;
        self
    }

    /// Fail the next prepare with `code`
    pub fn fail_prepare(&self, code: XaErrorCode) {
        self.lock().prepare_faults.push_back(code);
    }

    /// Fail the next commit with `code`. Faults queue up, one per call.
    pub fn fail_commit(&self, code: XaErrorCode) {
        self.lock().commit_faults.push_back(code);
    }

    pub fn fail_rollback(&self, code: XaErrorCode) {
        self.lock().rollback_faults.push_back(code);
    }

    pub fn fail_recover(&self, code: XaErrorCode) {
        self.lock().recover_faults.push_back(code);
    }

    /// Sleep this long inside every call
    pub fn set_call_delay(&self, delay: Duration) {
        self.lock().call_delay = delay;
    }

    pub fn state_of(&self, xid: &Xid) -> Option<BranchState> {
        self.lock().branches.get(xid).copied()
    }

    /// State of the most recently started branch
    pub fn last_state(&self) -> Option<BranchState> {
        let inner = self.lock();
        inner
            .last_branch
            .as_ref()
            .and_then(|xid| inner.branches.get(xid).copied())
    }

    pub fn last_branch(&self) -> Option<Xid> {
        self.lock().last_branch.clone()
    }

    /// Successful prepares
    pub fn prepare_count(&self) -> u64 {
        self.lock().prepares
    }

    /// Successful commits, one- or two-phase
    pub fn commit_count(&self) -> u64 {
        self.lock().commits
    }

    /// Successful rollbacks
    pub fn rollback_count(&self) -> u64 {
        self.lock().rollbacks
    }

    pub fn forget_count(&self) -> u64 {
        self.lock().forgets
    }

    /// Timeout last propagated by the coordinator
    pub fn timeout(&self) -> u64 {
        self.lock().timeout
    }

    fn lock(&self) -> MutexGuard<'_, SimInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock after applying the configured call delay
    fn enter(&self) -> MutexGuard<'_, SimInner> {
        let delay = self.lock().call_delay;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.lock()
    }

    fn persist(&self, inner: &SimInner) -> XaResult<()> {
        let Some(path) = &self.journal else {
            return Ok(());
        };

        // Completed branches are dropped; the resource manager forgets them
        let journal = Journal {
            branches: inner
                .branches
                .iter()
                .filter(|(_, s)| matches!(s, BranchState::Prepared | BranchState::Heuristic(_)))
                .map(|(x, s)| (x.clone(), *s))
                .collect(),
            prepares: inner.prepares,
            commits: inner.commits,
            rollbacks: inner.rollbacks,
            forgets: inner.forgets,
        };
        let bytes = serde_json::to_vec_pretty(&journal)
            .map_err(|e| XaError::new(XaErrorCode::RmErr, e.to_string()))?;
        write_file_atomic(path, &bytes)
            .map_err(|e| XaError::new(XaErrorCode::RmFail, format!("journal write failed: {}", e)))
    }

    fn fault(&self, code: XaErrorCode, call: &str, xid: &Xid) -> XaError {
        XaError::new(code, format!("{} injected on {} of {}", self.name, call, xid))
    }
}

impl XaResource for SimulatedResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn durability(&self) -> Durability {
        self.durability
    }

    fn start(&self, xid: &Xid) -> XaResult<()> {
        let mut inner = self.lock();
        inner.branches.entry(xid.clone()).or_insert(BranchState::Active);
        inner.last_branch = Some(xid.clone());
        Ok(())
    }

    fn prepare(&self, xid: &Xid) -> XaResult<Vote> {
        let mut inner = self.enter();
        match inner.branches.get(xid) {
            Some(BranchState::Active) => {}
            Some(_) => return Err(XaError::new(XaErrorCode::Proto, "branch is not active")),
            None => return Err(XaError::from(XaErrorCode::Nota)),
        }

        if let Some(code) = inner.prepare_faults.pop_front() {
            if code.is_rollback() {
                inner.branches.insert(xid.clone(), BranchState::RolledBack);
            }
            return Err(self.fault(code, "prepare", xid));
        }

        inner.prepares += 1;
        let vote = inner.vote;
        let state = match vote {
            Vote::Commit => BranchState::Prepared,
            Vote::ReadOnly => BranchState::ReadOnly,
        };
        inner.branches.insert(xid.clone(), state);
        self.persist(&inner)?;
        Ok(vote)
    }

    fn commit(&self, xid: &Xid, one_phase: bool) -> XaResult<()> {
        let mut inner = self.enter();
        match (inner.branches.get(xid), one_phase) {
            (Some(BranchState::Prepared), _) | (Some(BranchState::Active), true) => {}
            (Some(BranchState::Active), false) => {
                return Err(XaError::new(XaErrorCode::Proto, "branch was never prepared"))
            }
            _ => return Err(XaError::from(XaErrorCode::Nota)),
        }

        if let Some(code) = inner.commit_faults.pop_front() {
            if code.is_rollback() {
                inner.branches.insert(xid.clone(), BranchState::RolledBack);
            } else if code.is_heuristic() {
                inner.branches.insert(xid.clone(), BranchState::Heuristic(code));
            }
            self.persist(&inner)?;
            return Err(self.fault(code, "commit", xid));
        }

        inner.commits += 1;
        inner.branches.insert(xid.clone(), BranchState::Committed);
        self.persist(&inner)
    }

    fn rollback(&self, xid: &Xid) -> XaResult<()> {
        let mut inner = self.enter();
        match inner.branches.get(xid) {
            Some(BranchState::Active) | Some(BranchState::Prepared) => {}
            Some(BranchState::RolledBack) => return Ok(()),
            _ => return Err(XaError::from(XaErrorCode::Nota)),
        }

        if let Some(code) = inner.rollback_faults.pop_front() {
            if code.is_heuristic() {
                inner.branches.insert(xid.clone(), BranchState::Heuristic(code));
                self.persist(&inner)?;
            }
            return Err(self.fault(code, "rollback", xid));
        }

        inner.rollbacks += 1;
        inner.branches.insert(xid.clone(), BranchState::RolledBack);
        self.persist(&inner)
    }

    fn forget(&self, xid: &Xid) -> XaResult<()> {
        let mut inner = self.enter();
        match inner.branches.get(xid) {
            Some(BranchState::Heuristic(_)) => {
                inner.forgets += 1;
                inner.branches.insert(xid.clone(), BranchState::Forgotten);
                self.persist(&inner)
            }
            _ => Err(XaError::from(XaErrorCode::Nota)),
        }
    }

    fn recover(&self) -> XaResult<Vec<Xid>> {
        let mut inner = self.enter();
        if let Some(code) = inner.recover_faults.pop_front() {
            return Err(XaError::new(code, format!("{} injected on recover", self.name)));
        }
        Ok(inner
            .branches
            .iter()
            .filter(|(_, s)| matches!(s, BranchState::Prepared))
            .map(|(x, _)| x.clone())
            .collect())
    }

    fn transaction_timeout(&self) -> XaResult<u64> {
        Ok(self.lock().timeout)
    }

    fn set_transaction_timeout(&self, seconds: u64) -> XaResult<bool> {
        self.lock().timeout = seconds;
        Ok(true)
    }
}

/// Outcome recorded by a simulated local resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    Active,
    Committed,
    RolledBack,
}

#[derive(Debug)]
struct LocalInner {
    state: LocalState,
    commit_fault: Option<XaErrorCode>,
    commits: u64,
    rollbacks: u64,
}

/// Simulated one-phase resource
#[derive(Debug)]
pub struct SimulatedLocalResource {
    name: String,
    inner: Mutex<LocalInner>,
}

impl SimulatedLocalResource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: Mutex::new(LocalInner {
                state: LocalState::Active,
                commit_fault: None,
                commits: 0,
                rollbacks: 0,
            }),
        }
    }

    pub fn fail_commit(&self, code: XaErrorCode) {
        self.lock().commit_fault = Some(code);
    }

    pub fn state(&self) -> LocalState {
        self.lock().state
    }

    pub fn commit_count(&self) -> u64 {
        self.lock().commits
    }

    pub fn rollback_count(&self) -> u64 {
        self.lock().rollbacks
    }

    fn lock(&self) -> MutexGuard<'_, LocalInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LocalResource for SimulatedLocalResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn commit(&self) -> XaResult<()> {
        let mut inner = self.lock();
        if let Some(code) = inner.commit_fault.take() {
            inner.state = LocalState::RolledBack;
            return Err(XaError::new(code, format!("{} failed to commit", self.name)));
        }
        inner.commits += 1;
        inner.state = LocalState::Committed;
        Ok(())
    }

    fn rollback(&self) -> XaResult<()> {
        let mut inner = self.lock();
        if inner.state == LocalState::Active {
            inner.rollbacks += 1;
            inner.state = LocalState::RolledBack;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn branch() -> Xid {
        Xid::new_global("test").branch("test")
    }

    #[test]
    fn test_prepare_commit() {
        let rm = SimulatedResource::new("db");
        let xid = branch();
        rm.start(&xid).unwrap();
        assert_eq!(rm.prepare(&xid).unwrap(), Vote::Commit);
        assert_eq!(rm.recover().unwrap(), vec![xid.clone()]);

        rm.commit(&xid, false).unwrap();
        assert_eq!(rm.state_of(&xid), Some(BranchState::Committed));
        assert_eq!(rm.commit_count(), 1);
        assert!(rm.recover().unwrap().is_empty());
    }

    #[test]
    fn test_second_phase_without_prepare_is_protocol_error() {
        let rm = SimulatedResource::new("db");
        let xid = branch();
        rm.start(&xid).unwrap();
        assert_eq!(rm.commit(&xid, false).unwrap_err().code, XaErrorCode::Proto);
        rm.commit(&xid, true).unwrap();
    }

    #[test]
    fn test_unknown_branch_is_nota() {
        let rm = SimulatedResource::new("db");
        assert_eq!(rm.commit(&branch(), true).unwrap_err().code, XaErrorCode::Nota);
        assert_eq!(rm.forget(&branch()).unwrap_err().code, XaErrorCode::Nota);
    }

    #[test]
    fn test_commit_faults_queue() {
        let rm = SimulatedResource::new("db");
        let xid = branch();
        rm.start(&xid).unwrap();
        rm.prepare(&xid).unwrap();
        rm.fail_commit(XaErrorCode::RmFail);
        rm.fail_commit(XaErrorCode::Retry);

        assert_eq!(rm.commit(&xid, false).unwrap_err().code, XaErrorCode::RmFail);
        assert_eq!(rm.commit(&xid, false).unwrap_err().code, XaErrorCode::Retry);
        assert_eq!(rm.state_of(&xid), Some(BranchState::Prepared));
        rm.commit(&xid, false).unwrap();
        assert_eq!(rm.commit_count(), 1);
    }

    #[test]
    fn test_heuristic_then_forget() {
        let rm = SimulatedResource::new("db");
        let xid = branch();
        rm.start(&xid).unwrap();
        rm.fail_commit(XaErrorCode::HeurRb);
        assert_eq!(rm.commit(&xid, true).unwrap_err().code, XaErrorCode::HeurRb);
        assert_eq!(rm.state_of(&xid), Some(BranchState::Heuristic(XaErrorCode::HeurRb)));

        rm.forget(&xid).unwrap();
        assert_eq!(rm.state_of(&xid), Some(BranchState::Forgotten));
        assert_eq!(rm.forget_count(), 1);
    }

    #[test]
    fn test_read_only_vote_is_not_recovered() {
        let rm = SimulatedResource::new("ro").with_vote(Vote::ReadOnly);
        let xid = branch();
        rm.start(&xid).unwrap();
        assert_eq!(rm.prepare(&xid).unwrap(), Vote::ReadOnly);
        assert_eq!(rm.last_state(), Some(BranchState::ReadOnly));
        assert!(rm.recover().unwrap().is_empty());
    }

    #[test]
    fn test_journal_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let xid = branch();
        {
            let rm = SimulatedResource::open_journal("db", dir.path()).unwrap();
            rm.start(&xid).unwrap();
            rm.prepare(&xid).unwrap();
        }

        let rm = SimulatedResource::open_journal("db", dir.path()).unwrap();
        assert_eq!(rm.recover().unwrap(), vec![xid.clone()]);
        assert_eq!(rm.prepare_count(), 1);

        rm.rollback(&xid).unwrap();
        let rm = SimulatedResource::open_journal("db", dir.path()).unwrap();
        assert!(rm.recover().unwrap().is_empty());
        assert_eq!(rm.rollback_count(), 1);
    }

    #[test]
    fn test_local_resource() {
        let local = SimulatedLocalResource::new("local");
        local.commit().unwrap();
        assert_eq!(local.state(), LocalState::Committed);
        local.rollback().unwrap();
        assert_eq!(local.rollback_count(), 0);

        let failing = SimulatedLocalResource::new("local");
        failing.fail_commit(XaErrorCode::RbRollback);
        assert!(failing.commit().is_err());
        assert_eq!(failing.state(), LocalState::RolledBack);
    }
}
