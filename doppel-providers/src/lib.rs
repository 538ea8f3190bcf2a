// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage providers for doppel
//!
//! The registry maps a [`DeviceRoot`] to a backend instance. Backends are
//! created on first use by a per-scheme factory and cached per device root.

pub mod memory;
pub mod native;

pub use memory::{MemoryBackend, MemoryStore, MEMORY_SCHEME};
pub use native::{native_path, DirLock, LockOptions, NativeBackend, LOCK_FILE_NAME, RECYCLE_FOLDER_NAME};

use doppel_core::{AbstractPath, DeviceRoot, DoppelError, DoppelResult, StorageBackend, NATIVE_SCHEME};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Creates a backend for a device root of one scheme
pub type BackendFactory = Arc<dyn Fn(&DeviceRoot) -> DoppelResult<Arc<dyn StorageBackend>> + Send + Sync>;

/// Registry of storage backends
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
    backends: Mutex<HashMap<DeviceRoot, Arc<dyn StorageBackend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            backends: Mutex::new(HashMap::new()),
        }
    }

    /// Registry serving local paths.
    pub fn with_native() -> Self {
        let mut registry = Self::new();
        registry.register_factory(
            NATIVE_SCHEME,
            Arc::new(|device: &DeviceRoot| Ok(Arc::new(NativeBackend::new(device.clone())?) as Arc<dyn StorageBackend>)),
        );
        registry
    }

    /// Serve `mem://` roots from `store`.
    pub fn register_memory_store(&mut self, store: MemoryStore) {
        self.register_factory(
            MEMORY_SCHEME,
            Arc::new(move |device: &DeviceRoot| Ok(Arc::new(store.backend(device.root())) as Arc<dyn StorageBackend>)),
        );
    }

    pub fn register_factory(&mut self, scheme: impl Into<String>, factory: BackendFactory) {
        self.factories.insert(scheme.into(), factory);
    }

    /// Register a ready-made backend for its device root.
    pub fn register(&self, backend: Arc<dyn StorageBackend>) {
        self.backends.lock().insert(backend.device().clone(), backend);
    }

    pub fn get(&self, device: &DeviceRoot) -> DoppelResult<Arc<dyn StorageBackend>> {
        if let Some(backend) = self.backends.lock().get(device) {
            return Ok(backend.clone());
        }
        let factory = self
            .factories
            .get(device.scheme())
            .ok_or_else(|| DoppelError::BackendNotFound(device.scheme().to_string()))?;
        let backend = factory(device)?;
        tracing::debug!(device = %device, backend = backend.display_name(), "backend created");
        Ok(self
            .backends
            .lock()
            .entry(device.clone())
            .or_insert(backend)
            .clone())
    }

    pub fn for_path(&self, path: &AbstractPath) -> DoppelResult<Arc<dyn StorageBackend>> {
        self.get(path.device())
    }

    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        schemes.sort_unstable();
        schemes
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_native()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_scheme() {
        let registry = BackendRegistry::new();
        let path = AbstractPath::parse_phrase("sftp://host/x").unwrap();
        assert!(matches!(registry.for_path(&path), Err(DoppelError::BackendNotFound(s)) if s == "sftp"));
    }

    #[test]
    fn test_backends_cached_per_device_root() {
        let mut registry = BackendRegistry::with_native();
        registry.register_memory_store(MemoryStore::new());
        assert_eq!(registry.schemes(), vec!["mem", "native"]);

        let a1 = registry.for_path(&AbstractPath::parse_phrase("mem://a/x").unwrap()).unwrap();
        let a2 = registry.for_path(&AbstractPath::parse_phrase("mem://a/y").unwrap()).unwrap();
        let b = registry.for_path(&AbstractPath::parse_phrase("mem://b/x").unwrap()).unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(b.device().root(), "b");
    }

    #[test]
    fn test_native_factory() {
        let registry = BackendRegistry::default();
        let backend = registry.for_path(&AbstractPath::parse_phrase("/tmp").unwrap()).unwrap();
        assert!(backend.device().is_native());
        assert_eq!(backend.display_name(), "Local Filesystem");
    }
}
