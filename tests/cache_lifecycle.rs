//! Cache installation and suspend/resume across the whole stack
//!
//! Covers:
//! - Named, template and default descriptors deriving one configuration
//! - Distributed caches dropping to capacity factor 0 while suspended,
//!   and only when another member can take their data
//! - Cache activities running after application activities on suspend and
//!   before them on resume

use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use xacoord::cache::{
    ActivityPriority, CacheConfigurationBuilder, CacheContainer, CacheError, CacheMode, CacheResult,
    CacheServiceInstaller, CacheState, ClusterView, ComponentCache, ConfigurationDescriptor,
    ContainerConfiguration, EmbeddedCacheContainer, MediaType, StorageType, SuspendContext,
    SuspendController, SuspendableActivity, TransactionMode,
};

// =============================================================================
// Test Utilities
// =============================================================================

struct Fixture {
    cluster: Arc<ClusterView>,
    container: Arc<EmbeddedCacheContainer>,
    controller: Arc<SuspendController>,
    installer: CacheServiceInstaller,
}

fn fixture(members: &[&str]) -> Fixture {
    let cluster = Arc::new(ClusterView::new());
    for member in members {
        cluster.join(member);
    }
    let container = Arc::new(EmbeddedCacheContainer::new(
        ContainerConfiguration::new("web").with_default_cache("sessions"),
        Arc::clone(&cluster),
    ));
    let controller = Arc::new(SuspendController::new());
    let installer = CacheServiceInstaller::new(
        Arc::clone(&container) as Arc<dyn CacheContainer>,
        Arc::clone(&controller),
    );
    Fixture {
        cluster,
        container,
        controller,
        installer,
    }
}

fn distributed(builder: &mut CacheConfigurationBuilder) {
    builder.mode(CacheMode::DistributionSync).capacity_factor(1.5);
}

/// Records the capacity factor of a cache each time it is invoked
struct CapacityWatcher {
    cache: Arc<dyn ComponentCache>,
    seen: Mutex<Vec<(&'static str, f32)>>,
}

impl CapacityWatcher {
    fn seen(&self) -> Vec<(&'static str, f32)> {
        self.seen.lock().unwrap().clone()
    }
}

impl SuspendableActivity for CapacityWatcher {
    fn suspend(&self, _context: SuspendContext) -> BoxFuture<'_, CacheResult<()>> {
        async move {
            let capacity = self.cache.configuration().capacity_factor();
            self.seen.lock().unwrap().push(("suspend", capacity));
            Ok(())
        }
        .boxed()
    }

    fn resume(&self, _context: SuspendContext) -> BoxFuture<'_, CacheResult<()>> {
        async move {
            let capacity = self.cache.configuration().capacity_factor();
            self.seen.lock().unwrap().push(("resume", capacity));
            Ok(())
        }
        .boxed()
    }
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_descriptors_derive_the_same_configuration() {
    let f = fixture(&[]);
    let base = f
        .installer
        .install(&ConfigurationDescriptor::Named("base".to_string()), |b| {
            b.mode(CacheMode::ReplicationSync).storage(StorageType::Binary);
        })
        .unwrap();

    let (_, named) = f
        .installer
        .configuration(&ConfigurationDescriptor::Named("a".to_string()), |b| {
            b.mode(CacheMode::ReplicationSync).storage(StorageType::Binary);
        })
        .unwrap();
    let (_, templated) = f
        .installer
        .configuration(
            &ConfigurationDescriptor::Template {
                name: "b".to_string(),
                template: "base".to_string(),
            },
            |_| {},
        )
        .unwrap();
    let (name, default) = f
        .installer
        .configuration(&ConfigurationDescriptor::Default, |b| {
            b.mode(CacheMode::ReplicationSync).storage(StorageType::Binary);
        })
        .unwrap();

    assert_eq!(name, "sessions");
    assert_eq!(named, templated);
    assert_eq!(named, default);
    assert!(!named.simple_cache());
    assert_eq!(named.media_type().as_str(), MediaType::APPLICATION_PROTOSTREAM);
    base.stop().unwrap();
}

#[test]
fn test_simple_cache_only_for_plain_local_heap_caches() {
    let f = fixture(&[]);
    let plain = f
        .installer
        .configuration(&ConfigurationDescriptor::Named("plain".to_string()), |_| {})
        .unwrap()
        .1;
    assert!(plain.simple_cache());
    assert_eq!(plain.media_type(), &MediaType::object());

    let transactional = f
        .installer
        .configuration(&ConfigurationDescriptor::Named("tx".to_string()), |b| {
            b.transaction(TransactionMode::NonXa);
        })
        .unwrap()
        .1;
    assert!(!transactional.simple_cache());
    assert_eq!(transactional.media_type(), &MediaType::object());
}

#[test]
fn test_unknown_template_and_duplicate_names() {
    let f = fixture(&[]);
    let err = f
        .installer
        .install(
            &ConfigurationDescriptor::Template {
                name: "b".to_string(),
                template: "missing".to_string(),
            },
            |_| {},
        )
        .unwrap_err();
    assert_eq!(err, CacheError::UnknownTemplate("missing".to_string()));

    let first = f
        .installer
        .install(&ConfigurationDescriptor::Named("dup".to_string()), |_| {})
        .unwrap();
    let err = f
        .installer
        .install(&ConfigurationDescriptor::Named("dup".to_string()), |_| {})
        .unwrap_err();
    assert_eq!(err, CacheError::AlreadyDefined("dup".to_string()));
    assert_eq!(f.controller.activity_count(), 1);

    first.stop().unwrap();
    assert!(f.container.defined_names().is_empty());
    assert_eq!(f.controller.activity_count(), 0);
}

// =============================================================================
// Suspend and resume
// =============================================================================

#[tokio::test]
async fn test_distributed_cache_gives_up_ownership_while_suspended() {
    let f = fixture(&["node-a", "node-b"]);
    let service = f
        .installer
        .install(&ConfigurationDescriptor::Named("dist".to_string()), distributed)
        .unwrap();

    f.controller.suspend(SuspendContext::running()).await.unwrap();
    assert!(f.controller.is_suspended());
    assert_eq!(service.managed().state(), CacheState::Suspended);
    assert_eq!(service.cache().configuration().capacity_factor(), 0.0);

    f.controller.resume(SuspendContext::running()).await.unwrap();
    assert_eq!(service.managed().state(), CacheState::Running);
    assert_eq!(service.cache().configuration().capacity_factor(), 1.5);
    assert!(Arc::ptr_eq(
        &service.cache().configuration(),
        service.managed().resumed_configuration()
    ));

    let embedded = f.container.embedded_cache("dist").unwrap();
    assert_eq!(embedded.stops(), 2);
    assert_eq!(embedded.starts(), 3);
}

#[tokio::test]
async fn test_last_member_keeps_its_data() {
    let f = fixture(&["node-a", "node-b"]);
    let service = f
        .installer
        .install(&ConfigurationDescriptor::Named("dist".to_string()), distributed)
        .unwrap();

    f.cluster.leave("node-b");
    f.controller.suspend(SuspendContext::running()).await.unwrap();
    assert_eq!(service.cache().configuration().capacity_factor(), 1.5);
    assert_eq!(service.managed().state(), CacheState::Running);

    // Resume has nothing to restore
    f.controller.resume(SuspendContext::running()).await.unwrap();
    assert_eq!(f.container.embedded_cache("dist").unwrap().stops(), 0);
}

#[tokio::test]
async fn test_no_swap_while_server_starting() {
    let f = fixture(&["node-a", "node-b"]);
    let service = f
        .installer
        .install(&ConfigurationDescriptor::Named("dist".to_string()), distributed)
        .unwrap();

    f.controller.suspend(SuspendContext::stopping()).await.unwrap();
    assert_eq!(service.cache().configuration().capacity_factor(), 1.5);
    f.controller.resume(SuspendContext::starting()).await.unwrap();
    assert_eq!(f.container.embedded_cache("dist").unwrap().stops(), 0);
}

#[tokio::test]
async fn test_cache_suspends_after_and_resumes_before_applications() {
    let f = fixture(&["node-a", "node-b"]);
    let service = f
        .installer
        .install(&ConfigurationDescriptor::Named("dist".to_string()), distributed)
        .unwrap();

    let watcher = Arc::new(CapacityWatcher {
        cache: Arc::clone(service.cache()),
        seen: Mutex::new(Vec::new()),
    });
    f.controller
        .register_activity(Arc::clone(&watcher) as Arc<dyn SuspendableActivity>, ActivityPriority::First);

    f.controller.suspend(SuspendContext::running()).await.unwrap();
    f.controller.resume(SuspendContext::running()).await.unwrap();

    // The watcher saw full capacity both times: it suspended before the
    // cache and resumed after it
    assert_eq!(watcher.seen(), vec![("suspend", 1.5), ("resume", 1.5)]);
}
