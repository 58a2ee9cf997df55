//! Adapter registry for scheme-based adapter resolution.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use unistore_common::{AddressError, AddressResolver, Error, Result, Scheme};

use crate::adapter::StorageAdapter;
use crate::gcs::{GcsAdapter, GcsConfig};
use crate::local::LocalAdapter;
use crate::s3::{S3Adapter, S3Config};

/// Failures while assembling a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("An adapter for scheme '{0}' is already registered")]
    AlreadyRegistered(Scheme),

    #[error("Failed to create adapter: {0}")]
    Adapter(#[from] Error),
}

/// Settings for the built-in adapters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Root directory for `local://` buckets.
    pub local_root: Option<PathBuf>,
    pub s3: S3Config,
    pub r2: S3Config,
    pub gcs: GcsConfig,
}

impl AdapterConfig {
    /// Configured local root, or `<data dir>/unistore`.
    pub fn local_root(&self) -> PathBuf {
        self.local_root
            .clone()
            .or_else(|| dirs::data_local_dir().map(|dir| dir.join("unistore")))
            .unwrap_or_else(|| PathBuf::from(".unistore"))
    }
}

/// Registry of storage adapters, one per scheme.
///
/// Read-only once built, so it can be shared behind an `Arc` without locks.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<Scheme, Arc<dyn StorageAdapter>>,
}

impl AdapterRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its scheme.
    ///
    /// # Preconditions
    /// - No adapter is registered for `adapter.scheme()` yet
    ///
    /// # Postconditions
    /// - Addresses with that scheme resolve to this adapter
    ///
    /// # Errors
    /// - `AlreadyRegistered` if the scheme is taken
    pub fn register(
        &mut self,
        adapter: Arc<dyn StorageAdapter>,
    ) -> std::result::Result<(), RegistryError> {
        let scheme = adapter.scheme();
        if self.adapters.contains_key(&scheme) {
            return Err(RegistryError::AlreadyRegistered(scheme));
        }
        tracing::debug!(scheme = %scheme, adapter = adapter.name(), "Registered adapter");
        self.adapters.insert(scheme, adapter);
        Ok(())
    }

    /// Adapter serving a scheme.
    ///
    /// # Errors
    /// - `UnsupportedScheme` if nothing is registered for it
    pub fn get(&self, scheme: Scheme) -> Result<Arc<dyn StorageAdapter>> {
        self.adapters
            .get(&scheme)
            .cloned()
            .ok_or_else(|| AddressError::UnsupportedScheme(scheme.to_string()).into())
    }

    /// Registered schemes, in order.
    pub fn schemes(&self) -> Vec<Scheme> {
        self.adapters.keys().copied().collect()
    }

    pub fn has_adapter(&self, scheme: Scheme) -> bool {
        self.adapters.contains_key(&scheme)
    }

    /// Address resolver accepting exactly the registered schemes.
    pub fn resolver(&self) -> AddressResolver {
        AddressResolver::new(self.schemes())
    }
}

/// Create a registry with the local, S3, R2 and GCS adapters.
///
/// SFTP and FTP need a wire client; register them with
/// [`SessionAdapter`](crate::session::SessionAdapter) and a connector.
pub fn create_default_registry(
    config: &AdapterConfig,
) -> std::result::Result<AdapterRegistry, RegistryError> {
    let mut registry = AdapterRegistry::new();

    registry.register(Arc::new(LocalAdapter::new(config.local_root())?))?;
    registry.register(Arc::new(S3Adapter::new(config.s3.clone())?))?;
    registry.register(Arc::new(S3Adapter::r2(config.r2.clone())?))?;
    registry.register(Arc::new(GcsAdapter::new(config.gcs.clone())?))?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAdapter;
    use tempfile::TempDir;

    #[test]
    fn test_register_and_get() {
        let mut registry = AdapterRegistry::new();
        registry
            .register(Arc::new(MemoryAdapter::new(Scheme::S3)))
            .unwrap();

        let adapter = registry.get(Scheme::S3).unwrap();
        assert_eq!(adapter.name(), "memory");
        assert!(registry.has_adapter(Scheme::S3));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = AdapterRegistry::new();
        registry
            .register(Arc::new(MemoryAdapter::new(Scheme::Ftp)))
            .unwrap();

        let result = registry.register(Arc::new(MemoryAdapter::new(Scheme::Ftp)));
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(Scheme::Ftp))));
    }

    #[test]
    fn test_get_unknown_fails() {
        let registry = AdapterRegistry::new();
        let err = registry.get(Scheme::Gcs).err().unwrap();
        assert_eq!(
            err,
            Error::Address(AddressError::UnsupportedScheme("gcs".to_string()))
        );
    }

    #[test]
    fn test_resolver_matches_registered_schemes() {
        let mut registry = AdapterRegistry::new();
        registry
            .register(Arc::new(MemoryAdapter::new(Scheme::Local)))
            .unwrap();

        let resolver = registry.resolver();
        assert!(resolver.resolve("local://bucket/key").is_ok());
        assert!(resolver.resolve("s3://bucket/key").is_err());
    }

    #[test]
    fn test_default_registry() {
        let temp = TempDir::new().unwrap();
        let config = AdapterConfig {
            local_root: Some(temp.path().join("root")),
            ..AdapterConfig::default()
        };

        let registry = create_default_registry(&config).unwrap();
        assert_eq!(
            registry.schemes(),
            vec![Scheme::Local, Scheme::S3, Scheme::Gcs, Scheme::R2]
        );
        assert!(temp.path().join("root").is_dir());
    }
}
