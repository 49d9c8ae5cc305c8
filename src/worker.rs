//! Named background thread that runs a task on a fixed period
//!
//! Drives the transaction reaper and periodic recovery. A run can also be
//! requested explicitly with `trigger_now`, which blocks until a run that
//! started after the request has finished and returns that run's output.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct WorkerState<T> {
    stop: bool,
    /// Explicit run requests issued so far
    requested: u64,
    /// Highest request number a finished run has covered
    completed: u64,
    runs: u64,
    /// Output for each covered request not yet collected by its requester
    outputs: BTreeMap<u64, T>,
}

#[derive(Debug)]
struct Shared<T> {
    state: Mutex<WorkerState<T>>,
    changed: Condvar,
}

impl<T> Shared<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(WorkerState {
                stop: false,
                requested: 0,
                completed: 0,
                runs: 0,
                outputs: BTreeMap::new(),
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background worker thread
#[derive(Debug)]
pub struct PeriodicWorker<T = ()> {
    name: String,
    shared: Arc<Shared<T>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Clone + Send + 'static> PeriodicWorker<T> {
    /// Spawn the worker. The first timed run happens one period after spawn.
    pub fn spawn<F>(name: &str, period: Duration, mut task: F) -> io::Result<Self>
    where
        F: FnMut() -> T + Send + 'static,
    {
        let shared = Arc::new(Shared::new());
        let thread_shared = Arc::clone(&shared);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(&thread_shared, period, &mut task))?;

        Ok(Self {
            name: name.to_string(),
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of completed runs, timed and requested
    pub fn runs(&self) -> u64 {
        self.shared.lock().runs
    }

    /// Request an immediate run and wait for its output.
    ///
    /// Returns `None` if the worker stopped before the run happened.
    pub fn trigger_now(&self) -> Option<T> {
        let mut state = self.shared.lock();
        if state.stop {
            return None;
        }
        state.requested += 1;
        let ticket = state.requested;
        self.shared.changed.notify_all();

        while !state.outputs.contains_key(&ticket) && !state.stop {
            state = self
                .shared
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.outputs.remove(&ticket)
    }
}

impl<T> PeriodicWorker<T> {
    /// Stop the worker and join its thread. A run in progress finishes first.
    pub fn stop(&self) {
        {
            let mut state = self.shared.lock();
            state.stop = true;
            self.shared.changed.notify_all();
        }

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // Joining from inside the task would deadlock
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl<T> Drop for PeriodicWorker<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<T: Clone, F: FnMut() -> T>(shared: &Shared<T>, period: Duration, task: &mut F) {
    loop {
        let target = {
            let mut state = shared.lock();
            let deadline = Instant::now().checked_add(period);

            loop {
                if state.stop {
                    return;
                }
                if state.requested > state.completed {
                    break;
                }
                match deadline {
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        state = shared
                            .changed
                            .wait_timeout(state, deadline - now)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0;
                    }
                    None => {
                        state = shared
                            .changed
                            .wait(state)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                }
            }
            state.requested
        };

        let output = task();

        let mut state = shared.lock();
        for ticket in state.completed + 1..=target {
            state.outputs.insert(ticket, output.clone());
        }
        state.completed = state.completed.max(target);
        state.runs += 1;
        shared.changed.notify_all();
    }
}
