//! The plugin registry.

use crate::{Plugin, PluginDescriptor, PluginError, PluginVersion};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Thread-safe registry of named capability modules.
///
/// Registration checks the version contract and name uniqueness and does
/// nothing else — no plugin code runs here beyond the version query that
/// built the descriptor.
#[derive(Clone)]
pub struct PluginRegistry {
    required_major: u64,
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    plugins: HashMap<String, PluginDescriptor>,
    /// message type -> plugin name
    routes: HashMap<String, String>,
}

impl PluginRegistry {
    pub fn new(required_major: u64) -> Self {
        Self {
            required_major,
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// The interface major this host requires.
    pub fn required_major(&self) -> u64 {
        self.required_major
    }

    /// Register a plugin. Fails without mutating the registry if the
    /// declared major version is incompatible or the name is taken.
    pub fn register(&self, descriptor: PluginDescriptor) -> Result<(), PluginError> {
        if !descriptor.declared_version.compatible_with(self.required_major) {
            return Err(PluginError::VersionMismatch {
                name: descriptor.name.clone(),
                declared: descriptor.declared_version,
                required_major: self.required_major,
            });
        }

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.plugins.contains_key(&descriptor.name) {
            return Err(PluginError::DuplicateName(descriptor.name.clone()));
        }

        for message_type in descriptor.capability.message_types() {
            inner
                .routes
                .insert(message_type, descriptor.name.clone());
        }
        info!(
            plugin = %descriptor.name,
            version = %descriptor.declared_version,
            "plugin registered"
        );
        inner.plugins.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Remove a plugin and its message-type routes.
    pub fn unregister(&self, name: &str) -> Result<PluginDescriptor, PluginError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let descriptor = inner
            .plugins
            .remove(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        inner.routes.retain(|_, owner| owner != name);
        debug!(plugin = %name, "plugin unregistered");
        Ok(descriptor)
    }

    /// Capability handle by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.plugins.get(name).map(|d| Arc::clone(&d.capability))
    }

    /// Declared version of a registered plugin.
    pub fn version_of(&self, name: &str) -> Option<PluginVersion> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.plugins.get(name).map(|d| d.declared_version)
    }

    /// The plugin that declared a message type, if any.
    pub fn handler_for(&self, message_type: &str) -> Option<(String, Arc<dyn Plugin>)> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let name = inner.routes.get(message_type)?;
        let descriptor = inner.plugins.get(name)?;
        Some((name.clone(), Arc::clone(&descriptor.capability)))
    }

    /// Registered plugin names, sorted.
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = inner.plugins.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use weft_types::Envelope;

    struct TestPlugin {
        version: PluginVersion,
        types: Vec<String>,
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn version(&self) -> PluginVersion {
            self.version
        }

        fn message_types(&self) -> Vec<String> {
            self.types.clone()
        }

        async fn on_envelope(&self, _envelope: &Envelope) -> Result<(), PluginError> {
            Ok(())
        }
    }

    fn descriptor(name: &str, version: PluginVersion, types: &[&str]) -> PluginDescriptor {
        PluginDescriptor::new(
            name,
            Arc::new(TestPlugin {
                version,
                types: types.iter().map(|s| s.to_string()).collect(),
            }),
        )
    }

    #[test]
    fn test_register_and_get() {
        let registry = PluginRegistry::new(1);
        registry
            .register(descriptor("metrics", PluginVersion::new(1, 2, 0), &[]))
            .unwrap();
        assert!(registry.get("metrics").is_some());
        assert_eq!(
            registry.version_of("metrics"),
            Some(PluginVersion::new(1, 2, 0))
        );
        assert_eq!(registry.names(), vec!["metrics"]);
    }

    #[test]
    fn test_version_mismatch_never_mutates() {
        let registry = PluginRegistry::new(1);
        let result = registry.register(descriptor(
            "future",
            PluginVersion::new(2, 0, 0),
            &["future.event"],
        ));
        assert!(matches!(result, Err(PluginError::VersionMismatch { .. })));
        assert!(registry.is_empty());
        assert!(registry.get("future").is_none());
        assert!(registry.handler_for("future.event").is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = PluginRegistry::new(1);
        registry
            .register(descriptor("metrics", PluginVersion::new(1, 0, 0), &[]))
            .unwrap();
        let result = registry.register(descriptor("metrics", PluginVersion::new(1, 1, 0), &[]));
        assert!(matches!(result, Err(PluginError::DuplicateName(_))));
        assert_eq!(registry.len(), 1);
        // The original registration is untouched.
        assert_eq!(
            registry.version_of("metrics"),
            Some(PluginVersion::new(1, 0, 0))
        );
    }

    #[test]
    fn test_minor_and_patch_are_informational() {
        let registry = PluginRegistry::new(1);
        registry
            .register(descriptor("a", PluginVersion::new(1, 0, 0), &[]))
            .unwrap();
        registry
            .register(descriptor("b", PluginVersion::new(1, 99, 12), &[]))
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_handler_routing_and_unregister() {
        let registry = PluginRegistry::new(1);
        registry
            .register(descriptor(
                "telemetry",
                PluginVersion::new(1, 0, 0),
                &["telemetry.sample", "telemetry.flush"],
            ))
            .unwrap();

        let (name, _handler) = registry.handler_for("telemetry.sample").unwrap();
        assert_eq!(name, "telemetry");
        assert!(registry.handler_for("unrelated").is_none());

        registry.unregister("telemetry").unwrap();
        assert!(registry.handler_for("telemetry.sample").is_none());
        assert!(matches!(
            registry.unregister("telemetry"),
            Err(PluginError::NotFound(_))
        ));
    }
}
