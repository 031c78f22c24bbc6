//! Versioned plugin registry for the weft communication fabric.
//!
//! Plugins are statically-typed capability implementations selected by name;
//! there is no runtime module loading. The registry enforces the version
//! contract at the boundary: a plugin is accepted iff its declared major
//! version matches the host's required interface major exactly (minor and
//! patch are informational).

pub mod registry;
pub mod version;

pub use registry::PluginRegistry;
pub use version::PluginVersion;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use weft_types::Envelope;

/// The interface major version this host requires of plugins.
pub const HOST_INTERFACE_MAJOR: u64 = 1;

/// Errors from the plugin layer.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin's declared major version does not match the host's
    /// required interface major. Registration-time, never retried.
    #[error("plugin '{name}' declares version {declared}, host requires major {required_major}")]
    VersionMismatch {
        name: String,
        declared: PluginVersion,
        required_major: u64,
    },

    /// A plugin with this name is already registered.
    #[error("plugin already registered: {0}")]
    DuplicateName(String),

    /// No plugin with this name is registered.
    #[error("plugin not found: {0}")]
    NotFound(String),

    /// The plugin's own initialization failed. Isolated by the host so one
    /// bad plugin cannot abort fabric startup.
    #[error("plugin '{name}' failed to initialize: {reason}")]
    Init { name: String, reason: String },

    /// The plugin failed while handling an envelope.
    #[error("plugin '{name}' failed: {reason}")]
    Handler { name: String, reason: String },
}

/// A named capability module.
///
/// The registry's own logic depends only on [`Plugin::version`]; everything
/// else is host-declared surface.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The interface version this plugin implements.
    fn version(&self) -> PluginVersion;

    /// Message types (the `type` field of a JSON payload) this plugin
    /// wants dispatched to it.
    fn message_types(&self) -> Vec<String> {
        Vec::new()
    }

    /// One-time initialization, run by the host after registration.
    /// Failures are caught and reported, never propagated into startup.
    async fn init(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Handle an envelope carrying one of this plugin's message types.
    async fn on_envelope(&self, envelope: &Envelope) -> Result<(), PluginError>;
}

/// A registered plugin: name, declared version, and the capability handle.
/// Created on registration, never mutated, removed only on unregister.
#[derive(Clone)]
pub struct PluginDescriptor {
    pub name: String,
    pub declared_version: PluginVersion,
    pub capability: Arc<dyn Plugin>,
}

impl PluginDescriptor {
    /// Build a descriptor by querying the capability's declared version.
    pub fn new(name: impl Into<String>, capability: Arc<dyn Plugin>) -> Self {
        Self {
            name: name.into(),
            declared_version: capability.version(),
            capability,
        }
    }
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("declared_version", &self.declared_version)
            .finish_non_exhaustive()
    }
}
