//! Cache configuration and suspend-aware cache lifecycle
//!
//! - `config`: builder and the one derivation of simple-cache and media type
//! - `container`: container/cache contracts and an embedded container
//! - `suspend`: priority-ordered suspend/resume delivery
//! - `managed`: capacity-factor swap on suspend and resume
//! - `service`: installs a cache and wires it into suspend/resume

mod config;
mod container;
mod errors;
mod managed;
mod service;
mod suspend;

pub use config::{
    CacheConfiguration, CacheConfigurationBuilder, CacheMode, ConfigurationDescriptor,
    ContainerConfiguration, MediaType, StorageType, StoreConfiguration, StoreKind, TransactionMode,
    DEFAULT_OWNERS, DEFAULT_SEGMENTS,
};
pub use container::{CacheContainer, ClusterView, ComponentCache, EmbeddedCache, EmbeddedCacheContainer};
pub use errors::{CacheError, CacheResult};
pub use managed::{CacheState, ManagedCache, SkipReason, Transition};
pub use service::{CacheService, CacheServiceInstaller};
pub use suspend::{ActivityPriority, SuspendContext, SuspendController, SuspendableActivity};
