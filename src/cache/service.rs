//! Cache installation
//!
//! Installing a cache defines its configuration on the container, starts
//! the cache and registers it for suspend/resume at priority `Last`, so
//! application suspend hooks run before the cache stops owning data.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::observability::Logger;

use super::config::{CacheConfiguration, CacheConfigurationBuilder, ConfigurationDescriptor};
use super::container::{CacheContainer, ComponentCache};
use super::errors::CacheResult;
use super::managed::ManagedCache;
use super::suspend::{ActivityPriority, SuspendController, SuspendableActivity};

pub struct CacheServiceInstaller {
    container: Arc<dyn CacheContainer>,
    controller: Arc<SuspendController>,
}

impl CacheServiceInstaller {
    pub fn new(container: Arc<dyn CacheContainer>, controller: Arc<SuspendController>) -> Self {
        Self {
            container,
            controller,
        }
    }

    /// Derive the configuration a descriptor stands for without defining it
    pub fn configuration<F>(
        &self,
        descriptor: &ConfigurationDescriptor,
        populate: F,
    ) -> CacheResult<(String, CacheConfiguration)>
    where
        F: FnOnce(&mut CacheConfigurationBuilder),
    {
        let container_config = self.container.container_configuration();
        let name = descriptor.cache_name(container_config)?;
        let mut builder = descriptor.base_builder(|template| self.container.configuration(template))?;
        populate(&mut builder);
        let config = builder.build(container_config)?;
        Ok((name, config))
    }

    pub fn install<F>(&self, descriptor: &ConfigurationDescriptor, populate: F) -> CacheResult<CacheService>
    where
        F: FnOnce(&mut CacheConfigurationBuilder),
    {
        let (name, config) = self.configuration(descriptor, populate)?;
        let resumed = self.container.define_configuration(&name, config)?;

        let cache = match self.container.get_cache(&name) {
            Ok(cache) => cache,
            Err(err) => {
                if let Err(undefine) = self.container.undefine_configuration(&name) {
                    Logger::warn(
                        "CACHE_INSTALL_ROLLBACK_FAILED",
                        &[("cache", name.as_str()), ("error", &undefine.to_string())],
                    );
                }
                return Err(err);
            }
        };

        let managed = Arc::new(ManagedCache::new(cache, resumed));
        let activity: Arc<dyn SuspendableActivity> = Arc::clone(&managed) as Arc<dyn SuspendableActivity>;
        self.controller
            .register_activity(Arc::clone(&activity), ActivityPriority::Last);

        Ok(CacheService {
            name,
            container: Arc::clone(&self.container),
            controller: Arc::clone(&self.controller),
            managed,
            activity,
            stopped: AtomicBool::new(false),
        })
    }
}

/// An installed cache; `stop` removes it again
pub struct CacheService {
    name: String,
    container: Arc<dyn CacheContainer>,
    controller: Arc<SuspendController>,
    managed: Arc<ManagedCache>,
    activity: Arc<dyn SuspendableActivity>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("name", &self.name)
            .field("managed", &self.managed)
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl CacheService {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache(&self) -> &Arc<dyn ComponentCache> {
        self.managed.cache()
    }

    pub fn managed(&self) -> &Arc<ManagedCache> {
        &self.managed
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Unregister, stop the cache and undefine its configuration.
    /// Idempotent.
    pub fn stop(&self) -> CacheResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.controller.unregister_activity(&self.activity);
        self.managed.cache().stop()?;
        self.container.undefine_configuration(&self.name)
    }
}
