//! Commit-phase classification shared by the driver and recovery

use crate::xa::{XaErrorCode, XaResource, XaResult, Xid};

/// What a second-phase commit call means for the participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Committed, or already gone (`XAER_NOTA` after a commit was delivered)
    Committed,
    /// Transient failure; stays pending for recovery
    Retry(XaErrorCode),
    /// Completed heuristically or lost; needs an operator
    Heuristic(XaErrorCode),
}

/// Classify the result of `commit(branch, _)`.
///
/// A heuristic commit is the outcome we wanted, so the branch is forgotten
/// and counted as committed.
pub fn classify_commit(resource: &dyn XaResource, branch: &Xid, result: XaResult<()>) -> CommitOutcome {
    match result {
        Ok(()) => CommitOutcome::Committed,
        Err(e) => match e.code {
            XaErrorCode::Nota => CommitOutcome::Committed,
            XaErrorCode::HeurCom => {
                let _ = resource.forget(branch);
                CommitOutcome::Committed
            }
            code if code.is_transient() => CommitOutcome::Retry(code),
            code => CommitOutcome::Heuristic(code),
        },
    }
}

/// Transaction-level heuristic outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeuristicOutcome {
    Mixed,
    Rollback,
    Hazard,
}

impl HeuristicOutcome {
    /// Combine participant heuristics.
    ///
    /// Mixed when anything committed or a participant reported mixed;
    /// rollback when every heuristic is a rollback; hazard otherwise.
    pub fn from_codes(committed_any: bool, codes: &[XaErrorCode]) -> Self {
        if committed_any || codes.contains(&XaErrorCode::HeurMix) {
            HeuristicOutcome::Mixed
        } else if !codes.is_empty()
            && codes
                .iter()
                .all(|c| c.is_rollback() || *c == XaErrorCode::HeurRb)
        {
            HeuristicOutcome::Rollback
        } else {
            HeuristicOutcome::Hazard
        }
    }

    pub fn xa_code(&self) -> XaErrorCode {
        match self {
            HeuristicOutcome::Mixed => XaErrorCode::HeurMix,
            HeuristicOutcome::Rollback => XaErrorCode::HeurRb,
            HeuristicOutcome::Hazard => XaErrorCode::HeurHaz,
        }
    }
}
