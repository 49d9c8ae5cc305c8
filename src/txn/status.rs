//! Transaction status

use std::fmt;

/// Status of a transaction, from `begin` to its outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Active,
    /// Can only roll back: set explicitly, by a negative vote or by timeout
    MarkedRollback,
    Preparing,
    /// Subordinate prepared, waiting for the parent's decision
    Prepared,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
    HeuristicMixed,
    HeuristicRollback,
    HeuristicHazard,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Active => "active",
            TxStatus::MarkedRollback => "marked_rollback",
            TxStatus::Preparing => "preparing",
            TxStatus::Prepared => "prepared",
            TxStatus::Committing => "committing",
            TxStatus::Committed => "committed",
            TxStatus::RollingBack => "rolling_back",
            TxStatus::RolledBack => "rolled_back",
            TxStatus::HeuristicMixed => "heuristic_mixed",
            TxStatus::HeuristicRollback => "heuristic_rollback",
            TxStatus::HeuristicHazard => "heuristic_hazard",
        }
    }

    /// The transaction has an outcome and accepts no further operations
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxStatus::Committed
                | TxStatus::RolledBack
                | TxStatus::HeuristicMixed
                | TxStatus::HeuristicRollback
                | TxStatus::HeuristicHazard
        )
    }

    /// Accepts enlistment and a commit or rollback request
    pub fn is_active(&self) -> bool {
        matches!(self, TxStatus::Active | TxStatus::MarkedRollback)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
