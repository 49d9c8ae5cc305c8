//! Suspend-aware cache
//!
//! A distributed cache stops owning data while the server is suspended:
//! suspend swaps in a configuration with capacity factor 0 and restarts
//! the cache, resume swaps the original configuration back. The swap runs
//! on the blocking pool because stopping and starting a cache may block.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::Mutex as AsyncMutex;

use crate::observability::{log_event_with_fields, Event, ObservationScope};

use super::config::CacheConfiguration;
use super::container::ComponentCache;
use super::errors::{CacheError, CacheResult};
use super::suspend::{SuspendContext, SuspendableActivity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Running,
    Suspending,
    Suspended,
    Resuming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ServerStartingOrStopping,
    /// Resumed and suspended configurations are the same instance
    SameConfiguration,
    CapacityUnchanged,
    SingleMember,
    NotRunning,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ServerStartingOrStopping => "server_starting_or_stopping",
            SkipReason::SameConfiguration => "same_configuration",
            SkipReason::CapacityUnchanged => "capacity_unchanged",
            SkipReason::SingleMember => "single_member",
            SkipReason::NotRunning => "not_running",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Swapped,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Suspended,
    Resumed,
}

pub struct ManagedCache {
    cache: Arc<dyn ComponentCache>,
    resumed: Arc<CacheConfiguration>,
    suspended: Arc<CacheConfiguration>,
    state: Mutex<CacheState>,
    /// Held across the check and the swap of one transition
    transition: AsyncMutex<()>,
}

impl std::fmt::Debug for ManagedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedCache")
            .field("cache", &self.cache.name())
            .field("state", &self.state())
            .finish()
    }
}

impl ManagedCache {
    /// Non-distributed caches share one configuration for both states
    pub fn new(cache: Arc<dyn ComponentCache>, resumed: Arc<CacheConfiguration>) -> Self {
        let suspended = if resumed.mode().is_distributed() {
            Arc::new(resumed.with_capacity_factor(0.0))
        } else {
            Arc::clone(&resumed)
        };
        Self {
            cache,
            resumed,
            suspended,
            state: Mutex::new(CacheState::Running),
            transition: AsyncMutex::new(()),
        }
    }

    pub fn cache(&self) -> &Arc<dyn ComponentCache> {
        &self.cache
    }

    pub fn resumed_configuration(&self) -> &Arc<CacheConfiguration> {
        &self.resumed
    }

    pub fn suspended_configuration(&self) -> &Arc<CacheConfiguration> {
        &self.suspended
    }

    pub fn state(&self) -> CacheState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: CacheState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub async fn suspend_transition(&self, context: SuspendContext) -> CacheResult<Transition> {
        self.transition(Target::Suspended, context).await
    }

    pub async fn resume_transition(&self, context: SuspendContext) -> CacheResult<Transition> {
        self.transition(Target::Resumed, context).await
    }

    fn skip_reason(&self, target: Target, context: SuspendContext) -> Option<SkipReason> {
        if context.is_starting_or_stopping() {
            return Some(SkipReason::ServerStartingOrStopping);
        }
        if Arc::ptr_eq(&self.resumed, &self.suspended) {
            return Some(SkipReason::SameConfiguration);
        }
        if !self.cache.is_running() {
            return Some(SkipReason::NotRunning);
        }
        let wanted = match target {
            Target::Suspended => &self.suspended,
            Target::Resumed => &self.resumed,
        };
        if self.cache.configuration().capacity_factor() == wanted.capacity_factor() {
            return Some(SkipReason::CapacityUnchanged);
        }
        if target == Target::Suspended && self.cache.members() < 2 {
            return Some(SkipReason::SingleMember);
        }
        None
    }

    async fn transition(&self, target: Target, context: SuspendContext) -> CacheResult<Transition> {
        let (direction, event) = match target {
            Target::Suspended => ("suspend", Event::CacheSuspended),
            Target::Resumed => ("resume", Event::CacheResumed),
        };

        let _guard = self.transition.lock().await;
        if let Some(reason) = self.skip_reason(target, context) {
            log_event_with_fields(
                Event::CacheTransitionSkipped,
                &[
                    ("cache", self.cache.name()),
                    ("direction", direction),
                    ("reason", reason.as_str()),
                ],
            );
            return Ok(Transition::Skipped(reason));
        }

        let (config, during, after) = match target {
            Target::Suspended => (&self.suspended, CacheState::Suspending, CacheState::Suspended),
            Target::Resumed => (&self.resumed, CacheState::Resuming, CacheState::Running),
        };
        let before = self.state();
        self.set_state(during);

        let scope = ObservationScope::with_fields(event, &[("cache", self.cache.name())]);
        let cache = Arc::clone(&self.cache);
        let config = Arc::clone(config);
        let swapped = tokio::task::spawn_blocking(move || {
            let previous = cache.configuration();
            cache.replace_configuration(config);
            let result = cache.stop().and_then(|()| cache.start());
            if result.is_err() {
                cache.replace_configuration(previous);
                if !cache.is_running() {
                    if let Err(err) = cache.start() {
                        let error = err.to_string();
                        log_event_with_fields(
                            Event::CacheRestartFailed,
                            &[("cache", cache.name()), ("error", error.as_str())],
                        );
                    }
                }
            }
            result
        })
        .await
        .map_err(|e| CacheError::Blocking(e.to_string()))
        .and_then(|result| result);

        match swapped {
            Ok(()) => {
                self.set_state(after);
                let capacity = self.cache.configuration().capacity_factor().to_string();
                scope.complete_with_fields(&[("capacity_factor", capacity.as_str())]);
                Ok(Transition::Swapped)
            }
            Err(err) => {
                self.set_state(before);
                scope.fail(&err.to_string());
                Err(err)
            }
        }
    }
}

impl SuspendableActivity for ManagedCache {
    fn suspend(&self, context: SuspendContext) -> BoxFuture<'_, CacheResult<()>> {
        async move { self.suspend_transition(context).await.map(|_| ()) }.boxed()
    }

    fn resume(&self, context: SuspendContext) -> BoxFuture<'_, CacheResult<()>> {
        async move { self.resume_transition(context).await.map(|_| ()) }.boxed()
    }
}
