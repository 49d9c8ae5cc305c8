//! Cache container contract and an embedded, in-process implementation

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::observability::{log_event_with_fields, Event};

use super::config::{CacheConfiguration, ContainerConfiguration};
use super::errors::{CacheError, CacheResult};

/// A started cache as seen by its lifecycle owner
pub trait ComponentCache: Send + Sync {
    fn name(&self) -> &str;

    fn configuration(&self) -> Arc<CacheConfiguration>;

    /// Takes effect on the next start
    fn replace_configuration(&self, config: Arc<CacheConfiguration>);

    fn stop(&self) -> CacheResult<()>;

    fn start(&self) -> CacheResult<()>;

    fn is_running(&self) -> bool;

    /// Active cluster members hosting this cache
    fn members(&self) -> usize;
}

pub trait CacheContainer: Send + Sync {
    fn container_configuration(&self) -> &ContainerConfiguration;

    fn define_configuration(
        &self,
        name: &str,
        config: CacheConfiguration,
    ) -> CacheResult<Arc<CacheConfiguration>>;

    /// Fails while a running cache still uses the configuration
    fn undefine_configuration(&self, name: &str) -> CacheResult<()>;

    fn configuration(&self, name: &str) -> Option<Arc<CacheConfiguration>>;

    /// Returns the cache for a defined configuration, starting it if needed
    fn get_cache(&self, name: &str) -> CacheResult<Arc<dyn ComponentCache>>;
}

/// Members of the cluster a container belongs to
#[derive(Debug, Default)]
pub struct ClusterView {
    members: RwLock<BTreeSet<String>>,
}

impl ClusterView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, member: &str) -> bool {
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(member.to_string())
    }

    pub fn leave(&self, member: &str) -> bool {
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(member)
    }

    pub fn size(&self) -> usize {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[derive(Debug)]
pub struct EmbeddedCache {
    name: String,
    config: RwLock<Arc<CacheConfiguration>>,
    running: AtomicBool,
    starts: AtomicU64,
    stops: AtomicU64,
    cluster: Arc<ClusterView>,
}

impl EmbeddedCache {
    fn new(name: &str, config: Arc<CacheConfiguration>, cluster: Arc<ClusterView>) -> Self {
        Self {
            name: name.to_string(),
            config: RwLock::new(config),
            running: AtomicBool::new(true),
            starts: AtomicU64::new(1),
            stops: AtomicU64::new(0),
            cluster,
        }
    }

    /// Number of starts, including the initial one
    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::SeqCst)
    }
}

impl ComponentCache for EmbeddedCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn configuration(&self) -> Arc<CacheConfiguration> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn replace_configuration(&self, config: Arc<CacheConfiguration>) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    fn stop(&self) -> CacheResult<()> {
        if self.running.swap(false, Ordering::SeqCst) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn start(&self) -> CacheResult<()> {
        if !self.running.swap(true, Ordering::SeqCst) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn members(&self) -> usize {
        if self.configuration().mode().is_clustered() {
            self.cluster.size()
        } else {
            1
        }
    }
}

/// In-process cache manager
#[derive(Debug)]
pub struct EmbeddedCacheContainer {
    config: ContainerConfiguration,
    cluster: Arc<ClusterView>,
    definitions: RwLock<HashMap<String, Arc<CacheConfiguration>>>,
    caches: Mutex<HashMap<String, Arc<EmbeddedCache>>>,
}

impl EmbeddedCacheContainer {
    pub fn new(config: ContainerConfiguration, cluster: Arc<ClusterView>) -> Self {
        Self {
            config,
            cluster,
            definitions: RwLock::new(HashMap::new()),
            caches: Mutex::new(HashMap::new()),
        }
    }

    pub fn cluster(&self) -> &Arc<ClusterView> {
        &self.cluster
    }

    /// The concrete cache behind `get_cache`, if it was created
    pub fn embedded_cache(&self, name: &str) -> Option<Arc<EmbeddedCache>> {
        self.caches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn defined_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl CacheContainer for EmbeddedCacheContainer {
    fn container_configuration(&self) -> &ContainerConfiguration {
        &self.config
    }

    fn define_configuration(
        &self,
        name: &str,
        config: CacheConfiguration,
    ) -> CacheResult<Arc<CacheConfiguration>> {
        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if definitions.contains_key(name) {
            return Err(CacheError::AlreadyDefined(name.to_string()));
        }
        let config = Arc::new(config);
        definitions.insert(name.to_string(), Arc::clone(&config));
        drop(definitions);

        let simple_cache = config.simple_cache().to_string();
        log_event_with_fields(
            Event::CacheDefined,
            &[
                ("container", self.config.name.as_str()),
                ("cache", name),
                ("simple_cache", simple_cache.as_str()),
                ("media_type", config.media_type().as_str()),
            ],
        );
        Ok(config)
    }

    fn undefine_configuration(&self, name: &str) -> CacheResult<()> {
        let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
        if caches.get(name).is_some_and(|cache| cache.is_running()) {
            return Err(CacheError::Lifecycle {
                name: name.to_string(),
                action: "undefine",
                reason: "cache is still running".to_string(),
            });
        }
        let removed = self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if removed.is_none() {
            return Err(CacheError::Undefined(name.to_string()));
        }
        caches.remove(name);
        drop(caches);

        log_event_with_fields(
            Event::CacheUndefined,
            &[("container", self.config.name.as_str()), ("cache", name)],
        );
        Ok(())
    }

    fn configuration(&self, name: &str) -> Option<Arc<CacheConfiguration>> {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn get_cache(&self, name: &str) -> CacheResult<Arc<dyn ComponentCache>> {
        let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cache) = caches.get(name) {
            cache.start()?;
            return Ok(Arc::clone(cache) as Arc<dyn ComponentCache>);
        }
        let config = self
            .configuration(name)
            .ok_or_else(|| CacheError::Undefined(name.to_string()))?;
        let cache = Arc::new(EmbeddedCache::new(name, config, Arc::clone(&self.cluster)));
        caches.insert(name.to_string(), Arc::clone(&cache));
        Ok(cache as Arc<dyn ComponentCache>)
    }
}
