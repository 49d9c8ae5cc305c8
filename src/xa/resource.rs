//! Resource contracts consumed by the coordinator

use super::errors::XaResult;
use super::xid::Xid;

/// Outcome of a successful prepare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// XA_OK: prepared, waiting for the decision
    Commit,
    /// XA_RDONLY: nothing to commit, the branch is already released
    ReadOnly,
}

/// Whether a resource survives a restart of the process that uses it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// In-memory only. Not logged, not recovered.
    Volatile,
    /// Prepared branches are durable and reported by `recover` after a restart
    Persistent,
}

/// An XA resource manager
///
/// Calls may block on network or disk I/O. Implementations are shared
/// across threads, so every method takes `&self`.
pub trait XaResource: Send + Sync {
    /// Stable name used to find the resource again during recovery
    fn name(&self) -> &str;

    fn durability(&self) -> Durability {
        Durability::Persistent
    }

    /// Associate a new branch with the resource
    fn start(&self, _xid: &Xid) -> XaResult<()> {
        Ok(())
    }

    fn prepare(&self, xid: &Xid) -> XaResult<Vote>;

    fn commit(&self, xid: &Xid, one_phase: bool) -> XaResult<()>;

    fn rollback(&self, xid: &Xid) -> XaResult<()>;

    /// Discard knowledge of a heuristically completed branch
    fn forget(&self, xid: &Xid) -> XaResult<()>;

    /// Branches currently prepared or heuristically completed
    fn recover(&self) -> XaResult<Vec<Xid>>;

    /// Current branch timeout in seconds, 0 when unset
    fn transaction_timeout(&self) -> XaResult<u64>;

    /// Returns false when the resource does not support timeouts
    fn set_transaction_timeout(&self, seconds: u64) -> XaResult<bool>;
}

/// A one-phase-only resource, committed last in a two-phase transaction
pub trait LocalResource: Send + Sync {
    fn name(&self) -> &str;

    fn commit(&self) -> XaResult<()>;

    fn rollback(&self) -> XaResult<()>;
}
