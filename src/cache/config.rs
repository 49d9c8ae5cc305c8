//! Cache configuration and its derived attributes
//!
//! `CacheConfigurationBuilder::build` is the only place a configuration
//! is derived. Named caches, template-based caches and the container's
//! default cache all go through it, so equal attributes always produce
//! equal configurations.

use std::fmt;
use std::path::PathBuf;

use super::errors::{CacheError, CacheResult};

/// Default number of owners per entry in a distributed cache
pub const DEFAULT_OWNERS: u32 = 2;

/// Default number of hash segments
pub const DEFAULT_SEGMENTS: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheMode {
    Local,
    InvalidationSync,
    InvalidationAsync,
    ReplicationSync,
    ReplicationAsync,
    DistributionSync,
    DistributionAsync,
    Scattered,
}

impl CacheMode {
    pub fn is_clustered(&self) -> bool {
        !matches!(self, CacheMode::Local)
    }

    /// Data placement by consistent hash, weighted by capacity factor
    pub fn is_distributed(&self) -> bool {
        matches!(
            self,
            CacheMode::DistributionSync | CacheMode::DistributionAsync | CacheMode::Scattered
        )
    }

    pub fn is_synchronous(&self) -> bool {
        matches!(
            self,
            CacheMode::Local
                | CacheMode::InvalidationSync
                | CacheMode::ReplicationSync
                | CacheMode::DistributionSync
                | CacheMode::Scattered
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    /// Java heap, entries kept as object references
    Heap,
    /// Java heap, entries kept marshalled
    Binary,
    OffHeap,
}

impl StorageType {
    /// Entries can be stored by reference instead of marshalled
    pub fn can_store_references(&self) -> bool {
        matches!(self, StorageType::Heap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionMode {
    None,
    BatchOnly,
    NonXa,
    NonDurableXa,
    FullXa,
}

impl TransactionMode {
    pub fn is_transactional(&self) -> bool {
        !matches!(self, TransactionMode::None)
    }
}

/// Encoding of stored entries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaType(String);

impl MediaType {
    pub const APPLICATION_OBJECT: &'static str = "application/x-java-object";
    pub const APPLICATION_PROTOSTREAM: &'static str = "application/x-protostream";
    pub const APPLICATION_JBOSS_MARSHALLING: &'static str = "application/x-jboss-marshalling";

    pub fn new(media_type: &str) -> Self {
        Self(media_type.to_string())
    }

    pub fn object() -> Self {
        Self::new(Self::APPLICATION_OBJECT)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    File { path: Option<PathBuf> },
    Jdbc { data_source: String, table_prefix: String },
    Remote { cache: String, servers: Vec<String> },
    Custom { class: String },
}

/// A persistence store attached to a cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfiguration {
    pub kind: StoreKind,
    pub passivation: bool,
    pub preload: bool,
    pub purge: bool,
    pub shared: bool,
}

impl StoreConfiguration {
    pub fn new(kind: StoreKind) -> Self {
        Self {
            kind,
            passivation: false,
            preload: false,
            purge: false,
            shared: false,
        }
    }

    pub fn file() -> Self {
        Self::new(StoreKind::File { path: None })
    }

    fn validate(&self) -> CacheResult<()> {
        if self.shared && self.passivation {
            return Err(CacheError::InvalidConfiguration(
                "a shared store cannot be used with passivation".to_string(),
            ));
        }
        if self.shared && matches!(self.kind, StoreKind::File { .. }) {
            return Err(CacheError::InvalidConfiguration(
                "a file store cannot be shared".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings of the container that owns the caches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfiguration {
    pub name: String,
    pub default_cache: Option<String>,
    /// Encoding used when entries cannot be stored by reference
    pub marshaller_media_type: MediaType,
    /// Applies to caches that do not set statistics themselves
    pub statistics_enabled: bool,
}

impl ContainerConfiguration {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            default_cache: None,
            marshaller_media_type: MediaType::new(MediaType::APPLICATION_PROTOSTREAM),
            statistics_enabled: false,
        }
    }

    pub fn with_default_cache(mut self, name: &str) -> Self {
        self.default_cache = Some(name.to_string());
        self
    }
}

/// A derived, immutable cache configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfiguration {
    mode: CacheMode,
    storage: StorageType,
    transaction: TransactionMode,
    stores: Vec<StoreConfiguration>,
    statistics_enabled: bool,
    capacity_factor: f32,
    owners: u32,
    segments: u32,
    simple_cache: bool,
    media_type: MediaType,
}

impl CacheConfiguration {
    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn storage(&self) -> StorageType {
        self.storage
    }

    pub fn transaction(&self) -> TransactionMode {
        self.transaction
    }

    pub fn stores(&self) -> &[StoreConfiguration] {
        &self.stores
    }

    pub fn statistics_enabled(&self) -> bool {
        self.statistics_enabled
    }

    pub fn capacity_factor(&self) -> f32 {
        self.capacity_factor
    }

    pub fn owners(&self) -> u32 {
        self.owners
    }

    pub fn segments(&self) -> u32 {
        self.segments
    }

    pub fn simple_cache(&self) -> bool {
        self.simple_cache
    }

    pub fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    /// Same configuration with another capacity factor
    pub fn with_capacity_factor(&self, capacity_factor: f32) -> Self {
        Self {
            capacity_factor,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfigurationBuilder {
    mode: CacheMode,
    storage: StorageType,
    transaction: TransactionMode,
    stores: Vec<StoreConfiguration>,
    /// `None` inherits the container setting
    statistics: Option<bool>,
    capacity_factor: f32,
    owners: u32,
    segments: u32,
}

impl Default for CacheConfigurationBuilder {
    fn default() -> Self {
        Self {
            mode: CacheMode::Local,
            storage: StorageType::Heap,
            transaction: TransactionMode::None,
            stores: Vec::new(),
            statistics: None,
            capacity_factor: 1.0,
            owners: DEFAULT_OWNERS,
            segments: DEFAULT_SEGMENTS,
        }
    }
}

impl CacheConfigurationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration, e.g. a template
    pub fn from_configuration(config: &CacheConfiguration) -> Self {
        Self {
            mode: config.mode,
            storage: config.storage,
            transaction: config.transaction,
            stores: config.stores.clone(),
            statistics: Some(config.statistics_enabled),
            capacity_factor: config.capacity_factor,
            owners: config.owners,
            segments: config.segments,
        }
    }

    pub fn mode(&mut self, mode: CacheMode) -> &mut Self {
        self.mode = mode;
        self
    }

    pub fn storage(&mut self, storage: StorageType) -> &mut Self {
        self.storage = storage;
        self
    }

    pub fn transaction(&mut self, transaction: TransactionMode) -> &mut Self {
        self.transaction = transaction;
        self
    }

    pub fn add_store(&mut self, store: StoreConfiguration) -> &mut Self {
        self.stores.push(store);
        self
    }

    pub fn clear_stores(&mut self) -> &mut Self {
        self.stores.clear();
        self
    }

    pub fn statistics(&mut self, enabled: bool) -> &mut Self {
        self.statistics = Some(enabled);
        self
    }

    pub fn capacity_factor(&mut self, capacity_factor: f32) -> &mut Self {
        self.capacity_factor = capacity_factor;
        self
    }

    pub fn owners(&mut self, owners: u32) -> &mut Self {
        self.owners = owners;
        self
    }

    pub fn segments(&mut self, segments: u32) -> &mut Self {
        self.segments = segments;
        self
    }

    /// Validate and derive.
    ///
    /// The simple-cache optimisation needs a local, heap-stored,
    /// non-transactional cache with no stores and statistics off. Entries
    /// are encoded as object references when the storage type allows it,
    /// otherwise with the container's marshaller.
    pub fn build(&self, container: &ContainerConfiguration) -> CacheResult<CacheConfiguration> {
        if !self.capacity_factor.is_finite() || self.capacity_factor < 0.0 {
            return Err(CacheError::InvalidConfiguration(format!(
                "capacity factor must be a non-negative number, got {}",
                self.capacity_factor
            )));
        }
        if self.owners == 0 {
            return Err(CacheError::InvalidConfiguration(
                "owners must be at least 1".to_string(),
            ));
        }
        if self.segments == 0 {
            return Err(CacheError::InvalidConfiguration(
                "segments must be at least 1".to_string(),
            ));
        }
        for store in &self.stores {
            store.validate()?;
        }

        let statistics_enabled = self.statistics.unwrap_or(container.statistics_enabled);
        let simple_cache = self.mode == CacheMode::Local
            && self.storage == StorageType::Heap
            && !self.transaction.is_transactional()
            && self.stores.is_empty()
            && !statistics_enabled;
        let media_type = if self.storage.can_store_references() {
            MediaType::object()
        } else {
            container.marshaller_media_type.clone()
        };

        Ok(CacheConfiguration {
            mode: self.mode,
            storage: self.storage,
            transaction: self.transaction,
            stores: self.stores.clone(),
            statistics_enabled,
            capacity_factor: self.capacity_factor,
            owners: self.owners,
            segments: self.segments,
            simple_cache,
            media_type,
        })
    }
}

/// Where a cache definition comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationDescriptor {
    Named(String),
    /// Defined on top of another, already defined configuration
    Template { name: String, template: String },
    /// The container's default cache
    Default,
}

impl ConfigurationDescriptor {
    /// Name the resulting configuration is defined under
    pub fn cache_name(&self, container: &ContainerConfiguration) -> CacheResult<String> {
        match self {
            ConfigurationDescriptor::Named(name) | ConfigurationDescriptor::Template { name, .. } => {
                Ok(name.clone())
            }
            ConfigurationDescriptor::Default => container
                .default_cache
                .clone()
                .ok_or_else(|| CacheError::NoDefaultCache(container.name.clone())),
        }
    }

    /// Starting point for the builder. `lookup` resolves template names.
    pub fn base_builder<F>(&self, lookup: F) -> CacheResult<CacheConfigurationBuilder>
    where
        F: FnOnce(&str) -> Option<std::sync::Arc<CacheConfiguration>>,
    {
        match self {
            ConfigurationDescriptor::Template { template, .. } => lookup(template)
                .map(|base| CacheConfigurationBuilder::from_configuration(&base))
                .ok_or_else(|| CacheError::UnknownTemplate(template.clone())),
            _ => Ok(CacheConfigurationBuilder::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> ContainerConfiguration {
        ContainerConfiguration::new("web")
    }

    #[test]
    fn test_simple_cache_requires_all_five() {
        let base = CacheConfigurationBuilder::new();
        assert!(base.build(&container()).unwrap().simple_cache());

        let mut b = base.clone();
        b.mode(CacheMode::ReplicationSync);
        assert!(!b.build(&container()).unwrap().simple_cache());

        let mut b = base.clone();
        b.storage(StorageType::OffHeap);
        assert!(!b.build(&container()).unwrap().simple_cache());

        let mut b = base.clone();
        b.transaction(TransactionMode::NonXa);
        assert!(!b.build(&container()).unwrap().simple_cache());

        let mut b = base.clone();
        b.add_store(StoreConfiguration::file());
        assert!(!b.build(&container()).unwrap().simple_cache());

        let mut b = base;
        b.statistics(true);
        assert!(!b.build(&container()).unwrap().simple_cache());
    }

    #[test]
    fn test_statistics_inherit_from_container() {
        let mut stats_on = container();
        stats_on.statistics_enabled = true;

        let inherited = CacheConfigurationBuilder::new().build(&stats_on).unwrap();
        assert!(inherited.statistics_enabled());
        assert!(!inherited.simple_cache());

        let explicit = CacheConfigurationBuilder::new()
            .statistics(false)
            .build(&stats_on)
            .unwrap();
        assert!(!explicit.statistics_enabled());
        assert!(explicit.simple_cache());
    }

    #[test]
    fn test_media_type_follows_storage() {
        let heap = CacheConfigurationBuilder::new().build(&container()).unwrap();
        assert_eq!(heap.media_type().as_str(), MediaType::APPLICATION_OBJECT);

        let binary = CacheConfigurationBuilder::new()
            .storage(StorageType::Binary)
            .build(&container())
            .unwrap();
        assert_eq!(binary.media_type(), &container().marshaller_media_type);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(CacheConfigurationBuilder::new()
            .capacity_factor(-1.0)
            .build(&container())
            .is_err());
        assert!(CacheConfigurationBuilder::new()
            .owners(0)
            .build(&container())
            .is_err());

        let mut shared = StoreConfiguration::file();
        shared.shared = true;
        assert!(CacheConfigurationBuilder::new()
            .add_store(shared)
            .build(&container())
            .is_err());
    }

    #[test]
    fn test_with_capacity_factor_keeps_everything_else() {
        let config = CacheConfigurationBuilder::new()
            .mode(CacheMode::DistributionSync)
            .capacity_factor(2.5)
            .build(&container())
            .unwrap();
        let zero = config.with_capacity_factor(0.0);
        assert_eq!(zero.capacity_factor(), 0.0);
        assert_eq!(zero.with_capacity_factor(2.5), config);
    }

    #[test]
    fn test_default_descriptor_needs_default_cache() {
        let descriptor = ConfigurationDescriptor::Default;
        assert_eq!(
            descriptor.cache_name(&container()),
            Err(CacheError::NoDefaultCache("web".to_string()))
        );
        assert_eq!(
            descriptor.cache_name(&container().with_default_cache("sessions")),
            Ok("sessions".to_string())
        );
    }
}
