//! An imported transaction seen as an XA resource by its parent
//!
//! The parent coordinator enlists this resource; `start` imports the
//! parent's branch as a local transaction, and local resources are then
//! enlisted in that imported transaction. Prepare writes a `Prepared`
//! record so the parent's decision can still be applied after a restart.

use std::sync::Arc;

use crate::txn::{Transaction, TransactionManager};
use crate::xa::{Vote, XaError, XaErrorCode, XaResource, XaResult, Xid};

use super::manager::RecoveryManager;

pub struct SubordinateResource {
    name: String,
    tm: Arc<TransactionManager>,
    recovery: Arc<RecoveryManager>,
}

impl SubordinateResource {
    pub fn new(name: &str, tm: Arc<TransactionManager>, recovery: Arc<RecoveryManager>) -> Self {
        Self {
            name: name.to_string(),
            tm,
            recovery,
        }
    }

    /// The live transaction imported for a parent branch
    pub fn imported(&self, parent_branch: &Xid) -> Option<Arc<Transaction>> {
        self.tm.find(parent_branch)
    }

    fn live(&self, xid: &Xid) -> XaResult<Arc<Transaction>> {
        self.tm
            .find(xid)
            .ok_or_else(|| XaError::new(XaErrorCode::Nota, format!("no imported transaction {}", xid)))
    }
}

impl XaResource for SubordinateResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self, xid: &Xid) -> XaResult<()> {
        self.tm.import(xid).map(|_| ()).map_err(|e| e.to_xa_error())
    }

    fn prepare(&self, xid: &Xid) -> XaResult<Vote> {
        self.live(xid)?
            .prepare_subordinate()
            .map_err(|e| e.to_xa_error())
    }

    fn commit(&self, xid: &Xid, one_phase: bool) -> XaResult<()> {
        if one_phase {
            return self.live(xid)?.commit().map_err(|e| e.to_xa_error());
        }
        self.recovery.complete_import(xid, true)
    }

    fn rollback(&self, xid: &Xid) -> XaResult<()> {
        self.recovery.complete_import(xid, false)
    }

    fn forget(&self, xid: &Xid) -> XaResult<()> {
        self.recovery.forget_import(xid)
    }

    fn recover(&self) -> XaResult<Vec<Xid>> {
        self.recovery.prepared_imports()
    }

    fn transaction_timeout(&self) -> XaResult<u64> {
        Ok(self.tm.default_timeout())
    }

    /// Imported transactions take the default timeout
    fn set_transaction_timeout(&self, _seconds: u64) -> XaResult<bool> {
        Ok(false)
    }
}
