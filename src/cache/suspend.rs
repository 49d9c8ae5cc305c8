//! Server suspend/resume delivery
//!
//! Activities are grouped by priority. Suspend runs the groups
//! `First`, `Default`, `Last`; resume runs them in reverse. Activities in
//! one group run concurrently and the whole group completes before the
//! next one starts.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::{join_all, BoxFuture};
use tokio::sync::Mutex as AsyncMutex;

use crate::observability::{log_event_with_fields, Event};

use super::errors::CacheResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActivityPriority {
    First,
    Default,
    Last,
}

impl ActivityPriority {
    const ORDER: [ActivityPriority; 3] = [
        ActivityPriority::First,
        ActivityPriority::Default,
        ActivityPriority::Last,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityPriority::First => "first",
            ActivityPriority::Default => "default",
            ActivityPriority::Last => "last",
        }
    }
}

/// Process state delivered with every callback
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuspendContext {
    pub starting: bool,
    pub stopping: bool,
}

impl SuspendContext {
    pub fn running() -> Self {
        Self::default()
    }

    pub fn starting() -> Self {
        Self {
            starting: true,
            stopping: false,
        }
    }

    pub fn stopping() -> Self {
        Self {
            starting: false,
            stopping: true,
        }
    }

    pub fn is_starting_or_stopping(&self) -> bool {
        self.starting || self.stopping
    }
}

pub trait SuspendableActivity: Send + Sync {
    fn suspend(&self, context: SuspendContext) -> BoxFuture<'_, CacheResult<()>>;

    fn resume(&self, context: SuspendContext) -> BoxFuture<'_, CacheResult<()>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Suspend,
    Resume,
}

struct Registration {
    priority: ActivityPriority,
    activity: Arc<dyn SuspendableActivity>,
}

/// Activity registry driving suspend and resume
#[derive(Default)]
pub struct SuspendController {
    activities: Mutex<Vec<Registration>>,
    suspended: Mutex<bool>,
    /// One suspend or resume delivery at a time
    delivery: AsyncMutex<()>,
}

fn same_activity(a: &Arc<dyn SuspendableActivity>, b: &Arc<dyn SuspendableActivity>) -> bool {
    // Data pointers only; vtable pointers may differ across codegen units
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl SuspendController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_activity(
        &self,
        activity: Arc<dyn SuspendableActivity>,
        priority: ActivityPriority,
    ) {
        self.activities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration { priority, activity });
    }

    /// Returns false when the activity was not registered
    pub fn unregister_activity(&self, activity: &Arc<dyn SuspendableActivity>) -> bool {
        let mut activities = self.activities.lock().unwrap_or_else(PoisonError::into_inner);
        let before = activities.len();
        activities.retain(|r| !same_activity(&r.activity, activity));
        activities.len() != before
    }

    pub fn activity_count(&self) -> usize {
        self.activities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_suspended(&self) -> bool {
        *self.suspended.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Suspend every registered activity.
    ///
    /// A failing activity does not stop the remaining groups; the first
    /// failure is returned once all groups have run.
    pub async fn suspend(&self, context: SuspendContext) -> CacheResult<()> {
        let _guard = self.delivery.lock().await;
        let result = self.deliver(Direction::Suspend, context).await;
        *self.suspended.lock().unwrap_or_else(PoisonError::into_inner) = true;
        result
    }

    pub async fn resume(&self, context: SuspendContext) -> CacheResult<()> {
        let _guard = self.delivery.lock().await;
        let result = self.deliver(Direction::Resume, context).await;
        *self.suspended.lock().unwrap_or_else(PoisonError::into_inner) = false;
        result
    }

    fn group(&self, priority: ActivityPriority) -> Vec<Arc<dyn SuspendableActivity>> {
        self.activities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.priority == priority)
            .map(|r| Arc::clone(&r.activity))
            .collect()
    }

    async fn deliver(&self, direction: Direction, context: SuspendContext) -> CacheResult<()> {
        let (event, order) = match direction {
            Direction::Suspend => (Event::ServerSuspend, ActivityPriority::ORDER),
            Direction::Resume => {
                let mut order = ActivityPriority::ORDER;
                order.reverse();
                (Event::ServerResume, order)
            }
        };
        log_event_with_fields(
            event,
            &[
                ("starting", if context.starting { "true" } else { "false" }),
                ("stopping", if context.stopping { "true" } else { "false" }),
            ],
        );

        let mut first_error = None;
        for priority in order {
            let group = self.group(priority);
            if group.is_empty() {
                continue;
            }
            let results = join_all(group.iter().map(|activity| match direction {
                Direction::Suspend => activity.suspend(context),
                Direction::Resume => activity.resume(context),
            }))
            .await;

            for err in results.into_iter().filter_map(Result::err) {
                let error = err.to_string();
                log_event_with_fields(
                    Event::ActivityFailed,
                    &[
                        ("event", event.as_str()),
                        ("priority", priority.as_str()),
                        ("error", error.as_str()),
                    ],
                );
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::errors::CacheError;
    use futures_util::FutureExt;

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Recorder {
        fn record(&self, what: &str) -> CacheResult<()> {
            self.log.lock().unwrap().push(format!("{}:{}", what, self.label));
            if self.fail {
                Err(CacheError::Blocking(self.label.to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl SuspendableActivity for Recorder {
        fn suspend(&self, _context: SuspendContext) -> BoxFuture<'_, CacheResult<()>> {
            async move { self.record("suspend") }.boxed()
        }

        fn resume(&self, _context: SuspendContext) -> BoxFuture<'_, CacheResult<()>> {
            async move { self.record("resume") }.boxed()
        }
    }

    fn recorder(
        label: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        fail: bool,
    ) -> Arc<dyn SuspendableActivity> {
        Arc::new(Recorder {
            label,
            log: Arc::clone(log),
            fail,
        })
    }

    #[tokio::test]
    async fn test_priority_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let controller = SuspendController::new();
        controller.register_activity(recorder("last", &log, false), ActivityPriority::Last);
        controller.register_activity(recorder("first", &log, false), ActivityPriority::First);
        controller.register_activity(recorder("default", &log, false), ActivityPriority::Default);

        controller.suspend(SuspendContext::running()).await.unwrap();
        assert!(controller.is_suspended());
        controller.resume(SuspendContext::running()).await.unwrap();
        assert!(!controller.is_suspended());

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "suspend:first",
                "suspend:default",
                "suspend:last",
                "resume:last",
                "resume:default",
                "resume:first",
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_later_groups() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let controller = SuspendController::new();
        controller.register_activity(recorder("broken", &log, true), ActivityPriority::Default);
        controller.register_activity(recorder("cache", &log, false), ActivityPriority::Last);

        let err = controller.suspend(SuspendContext::running()).await.unwrap_err();
        assert_eq!(err, CacheError::Blocking("broken".to_string()));
        assert_eq!(*log.lock().unwrap(), vec!["suspend:broken", "suspend:cache"]);
    }

    #[tokio::test]
    async fn test_unregister_by_identity() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let controller = SuspendController::new();
        let a = recorder("a", &log, false);
        let b = recorder("b", &log, false);
        controller.register_activity(Arc::clone(&a), ActivityPriority::Last);
        controller.register_activity(Arc::clone(&b), ActivityPriority::Last);

        assert!(controller.unregister_activity(&a));
        assert!(!controller.unregister_activity(&a));
        assert_eq!(controller.activity_count(), 1);

        controller.suspend(SuspendContext::running()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["suspend:b"]);
    }

    struct Slow {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl SuspendableActivity for Slow {
        fn suspend(&self, _context: SuspendContext) -> BoxFuture<'_, CacheResult<()>> {
            async move {
                self.log.lock().unwrap().push("suspend:begin".to_string());
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                self.log.lock().unwrap().push("suspend:end".to_string());
                Ok(())
            }
            .boxed()
        }

        fn resume(&self, _context: SuspendContext) -> BoxFuture<'_, CacheResult<()>> {
            async move {
                self.log.lock().unwrap().push("resume".to_string());
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_resume_waits_for_running_suspend() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let controller = Arc::new(SuspendController::new());
        controller.register_activity(
            Arc::new(Slow { log: Arc::clone(&log) }),
            ActivityPriority::Last,
        );

        let suspending = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.suspend(SuspendContext::running()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        controller.resume(SuspendContext::running()).await.unwrap();
        suspending.await.unwrap().unwrap();

        assert!(!controller.is_suspended());
        assert_eq!(*log.lock().unwrap(), vec!["suspend:begin", "suspend:end", "resume"]);
    }
}
