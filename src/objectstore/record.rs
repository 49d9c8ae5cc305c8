//! Recovery records
//!
//! A record exists for every transaction whose outcome is decided (or, for
//! a subordinate, prepared) but not yet delivered to every persistent
//! participant. It is removed once every participant has completed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::xa::{XaErrorCode, Xid};

/// Where the transaction stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Subordinate prepared, waiting for the parent coordinator's decision
    Prepared,
    /// Commit decided; pending participants are retried by recovery
    Committing,
    /// A participant completed heuristically. Recovery leaves the record
    /// alone until an operator reclassifies or forgets it.
    Heuristic,
}

/// What is known about one participant's branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ParticipantOutcome {
    Pending,
    Committed,
    Heuristic { code: XaErrorCode },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    /// Name the resource is registered under for recovery
    pub resource: String,
    pub branch: Xid,
    /// Commit with the one-phase flag (single-resource optimisation)
    pub one_phase: bool,
    #[serde(flatten)]
    pub outcome: ParticipantOutcome,
}

impl ParticipantRecord {
    pub fn pending(resource: &str, branch: Xid, one_phase: bool) -> Self {
        Self {
            resource: resource.to_string(),
            branch,
            one_phase,
            outcome: ParticipantOutcome::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLogRecord {
    pub xid: Xid,
    /// Parent coordinator's branch, for imported transactions
    pub parent: Option<Xid>,
    pub state: RecordState,
    pub participants: Vec<ParticipantRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TxLogRecord {
    pub fn new(xid: Xid, state: RecordState, participants: Vec<ParticipantRecord>) -> Self {
        let now = Utc::now();
        Self {
            xid,
            parent: None,
            state,
            participants,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_parent(mut self, parent: Option<Xid>) -> Self {
        self.parent = parent;
        self
    }

    /// Every participant committed; the record can be removed
    pub fn is_complete(&self) -> bool {
        self.participants
            .iter()
            .all(|p| p.outcome == ParticipantOutcome::Committed)
    }

    pub fn has_heuristic(&self) -> bool {
        self.participants
            .iter()
            .any(|p| matches!(p.outcome, ParticipantOutcome::Heuristic { .. }))
    }

    pub fn references(&self, branch: &Xid) -> bool {
        self.participants.iter().any(|p| &p.branch == branch)
    }

    /// Record a participant outcome and refresh the state
    pub fn set_outcome(&mut self, index: usize, outcome: ParticipantOutcome) {
        if let Some(p) = self.participants.get_mut(index) {
            p.outcome = outcome;
        }
        if self.has_heuristic() {
            self.state = RecordState::Heuristic;
        }
        self.touch();
    }

    /// Administrative reclassification: heuristic participants become
    /// pending again and the record goes back to `Committing`
    pub fn reclassify(&mut self) {
        for p in &mut self.participants {
            if matches!(p.outcome, ParticipantOutcome::Heuristic { .. }) {
                p.outcome = ParticipantOutcome::Pending;
            }
        }
        self.state = RecordState::Committing;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
