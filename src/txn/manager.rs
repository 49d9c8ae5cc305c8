//! Transaction manager: thread association, timeouts, imports and the reaper

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use uuid::Uuid;

use crate::crash_point::HaltInjector;
use crate::objectstore::ObjectStore;
use crate::observability::{log_event_with_fields, Event, StatisticsSnapshot, TransactionStatistics};
use crate::worker::PeriodicWorker;
use crate::xa::Xid;

use super::config::{CoordinatorConfig, TimeoutPolicy};
use super::errors::{TxError, TxResult};
use super::status::TxStatus;
use super::transaction::{Transaction, TxContext};

pub struct TransactionManager {
    ctx: Arc<TxContext>,
    associations: Mutex<HashMap<ThreadId, Arc<Transaction>>>,
    thread_timeouts: Mutex<HashMap<ThreadId, u64>>,
    reaper_interval: Duration,
    reaper: Mutex<Option<PeriodicWorker>>,
}

impl TransactionManager {
    /// Open the manager over its object store. Halt points come from
    /// `XACOORD_HALT_POINT`.
    pub fn open(config: CoordinatorConfig) -> TxResult<Self> {
        Self::open_with_halt(config, Arc::new(HaltInjector::from_env()))
    }

    pub fn open_with_halt(config: CoordinatorConfig, halt: Arc<HaltInjector>) -> TxResult<Self> {
        config.validate()?;
        let store =
            ObjectStore::open(&config.object_store_path).map_err(|e| TxError::object_store(&e))?;

        log_event_with_fields(
            Event::CoordinatorStart,
            &[
                ("node_id", &config.node_id),
                ("object_store", &store.dir().display().to_string()),
                ("default_timeout_secs", &config.default_timeout_secs.to_string()),
                ("maximum_timeout_secs", &config.maximum_timeout_secs.to_string()),
            ],
        );

        let ctx = TxContext {
            node_id: config.node_id,
            store,
            halt,
            stats: TransactionStatistics::new(config.enable_statistics),
            timeouts: TimeoutPolicy::new(config.default_timeout_secs, config.maximum_timeout_secs),
            active: Mutex::new(HashMap::new()),
        };

        Ok(Self {
            ctx: Arc::new(ctx),
            associations: Mutex::new(HashMap::new()),
            thread_timeouts: Mutex::new(HashMap::new()),
            reaper_interval: config.reaper_interval,
            reaper: Mutex::new(None),
        })
    }

    fn associations(&self) -> MutexGuard<'_, HashMap<ThreadId, Arc<Transaction>>> {
        self.associations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn thread_timeouts(&self) -> MutexGuard<'_, HashMap<ThreadId, u64>> {
        self.thread_timeouts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Thread-associated demarcation
    // =========================================================================

    /// Begin a transaction on the calling thread
    pub fn begin(&self) -> TxResult<Arc<Transaction>> {
        self.ctx.halt.ensure_alive()?;
        let thread = thread::current().id();
        let mut associations = self.associations();
        if associations.contains_key(&thread) {
            return Err(TxError::nested());
        }

        let requested = self
            .thread_timeouts()
            .get(&thread)
            .copied()
            .unwrap_or_else(|| self.ctx.timeouts.configured_default());
        let timeout = self.ctx.timeouts.clamp(requested);

        let tx = Transaction::new(
            Arc::clone(&self.ctx),
            Xid::new_global(&self.ctx.node_id),
            None,
            timeout,
        );
        self.ctx.active().insert(tx.xid().clone(), Arc::clone(&tx));
        self.ctx.stats.record_begin();
        log_event_with_fields(
            Event::TxBegin,
            &[
                ("xid", &tx.xid().to_string()),
                ("timeout_secs", &timeout.to_string()),
            ],
        );

        associations.insert(thread, Arc::clone(&tx));
        Ok(tx)
    }

    /// The calling thread's transaction
    pub fn current(&self) -> Option<Arc<Transaction>> {
        self.associations().get(&thread::current().id()).cloned()
    }

    fn disassociate(&self) -> TxResult<Arc<Transaction>> {
        self.associations()
            .remove(&thread::current().id())
            .ok_or_else(TxError::no_transaction)
    }

    /// Commit the calling thread's transaction. The thread is disassociated
    /// whatever the outcome.
    pub fn commit(&self) -> TxResult<()> {
        self.ctx.halt.ensure_alive()?;
        self.disassociate()?.commit()
    }

    pub fn rollback(&self) -> TxResult<()> {
        self.ctx.halt.ensure_alive()?;
        self.disassociate()?.rollback()
    }

    pub fn set_rollback_only(&self) -> TxResult<()> {
        self.current()
            .ok_or_else(TxError::no_transaction)?
            .set_rollback_only()
    }

    pub fn status(&self) -> Option<TxStatus> {
        self.current().map(|tx| tx.status())
    }

    /// Detach the calling thread's transaction without completing it
    pub fn suspend(&self) -> TxResult<Option<Arc<Transaction>>> {
        self.ctx.halt.ensure_alive()?;
        Ok(self.associations().remove(&thread::current().id()))
    }

    /// Attach a suspended transaction to the calling thread
    pub fn resume(&self, tx: Arc<Transaction>) -> TxResult<()> {
        self.ctx.halt.ensure_alive()?;
        let status = tx.status();
        if status.is_terminal() {
            return Err(TxError::not_active(status));
        }

        let mut associations = self.associations();
        let thread = thread::current().id();
        if associations.contains_key(&thread) {
            return Err(TxError::nested());
        }
        associations.insert(thread, tx);
        Ok(())
    }

    // =========================================================================
    // Timeouts
    // =========================================================================

    /// Timeout for transactions the calling thread begins. 0 restores the
    /// default.
    pub fn set_transaction_timeout(&self, secs: u64) {
        let thread = thread::current().id();
        let mut overrides = self.thread_timeouts();
        if secs == 0 {
            overrides.remove(&thread);
        } else {
            overrides.insert(thread, secs);
        }
    }

    /// Timeout the calling thread's next transaction would get
    pub fn transaction_timeout(&self) -> u64 {
        let requested = self
            .thread_timeouts()
            .get(&thread::current().id())
            .copied()
            .unwrap_or_else(|| self.ctx.timeouts.configured_default());
        self.ctx.timeouts.clamp(requested)
    }

    /// 0 means "use the maximum"
    pub fn set_default_timeout(&self, secs: u64) {
        self.ctx.timeouts.set_default(secs);
    }

    pub fn set_maximum_timeout(&self, secs: u64) -> TxResult<()> {
        self.ctx.timeouts.set_maximum(secs)
    }

    /// Effective default after clamping
    pub fn default_timeout(&self) -> u64 {
        self.ctx.timeouts.effective_default()
    }

    pub fn maximum_timeout(&self) -> u64 {
        self.ctx.timeouts.maximum()
    }

    // =========================================================================
    // Imported transactions
    // =========================================================================

    /// Import the parent coordinator's branch as a local transaction.
    ///
    /// Importing the same branch twice returns the existing transaction.
    pub fn import(&self, parent_branch: &Xid) -> TxResult<Arc<Transaction>> {
        self.ctx.halt.ensure_alive()?;
        let mut active = self.ctx.active();
        if let Some(tx) = active.get(parent_branch) {
            return Ok(Arc::clone(tx));
        }

        let timeout = self.ctx.timeouts.effective_default();
        let tx = Transaction::new(
            Arc::clone(&self.ctx),
            parent_branch.clone(),
            Some(parent_branch.clone()),
            timeout,
        );
        active.insert(parent_branch.clone(), Arc::clone(&tx));
        drop(active);

        self.ctx.stats.record_begin();
        log_event_with_fields(
            Event::TxBegin,
            &[
                ("xid", &parent_branch.to_string()),
                ("imported", "true"),
                ("timeout_secs", &timeout.to_string()),
            ],
        );
        Ok(tx)
    }

    pub fn find(&self, xid: &Xid) -> Option<Arc<Transaction>> {
        self.ctx.active().get(xid).cloned()
    }

    pub fn is_in_flight(&self, xid: &Xid) -> bool {
        self.ctx.active().contains_key(xid)
    }

    /// Any live transaction, local or imported, with this gtrid
    pub fn is_in_flight_gtrid(&self, gtrid: Uuid) -> bool {
        self.ctx.active().keys().any(|xid| xid.gtrid() == gtrid)
    }

    pub fn active_transactions(&self) -> Vec<Arc<Transaction>> {
        self.ctx.active_snapshot()
    }

    pub fn active_count(&self) -> usize {
        self.ctx.active().len()
    }

    // =========================================================================
    // Reaper
    // =========================================================================

    /// Roll back every expired active transaction. Returns how many.
    pub fn reap_expired(&self) -> usize {
        reap(&self.ctx)
    }

    /// Run the reaper on a background thread every `reaper_interval`
    pub fn start_reaper(&self) -> TxResult<()> {
        let mut reaper = self.reaper.lock().unwrap_or_else(PoisonError::into_inner);
        if reaper.is_some() {
            return Ok(());
        }
        let ctx = Arc::clone(&self.ctx);
        let worker = PeriodicWorker::spawn("xacoord-reaper", self.reaper_interval, move || {
            reap(&ctx);
        })
        .map_err(|e| TxError::invalid_config(format!("cannot start reaper: {}", e)))?;
        *reaper = Some(worker);
        Ok(())
    }

    pub fn stop_reaper(&self) {
        let worker = self.reaper.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            worker.stop();
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.ctx.stats.snapshot()
    }

    pub fn set_statistics_enabled(&self, enabled: bool) {
        self.ctx.stats.set_enabled(enabled);
    }

    pub fn object_store(&self) -> &ObjectStore {
        &self.ctx.store
    }

    pub fn node_id(&self) -> &str {
        &self.ctx.node_id
    }

    pub fn halt_injector(&self) -> &Arc<HaltInjector> {
        &self.ctx.halt
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        self.stop_reaper();
    }
}

fn reap(ctx: &TxContext) -> usize {
    ctx.active_snapshot().iter().filter(|tx| tx.reap()).count()
}
