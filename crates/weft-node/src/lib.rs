//! Node runtime for the weft communication fabric.
//!
//! [`Fabric`] is the single entry point applications use: it owns the
//! transports, the peer registry and health monitor, the role controller
//! and the plugin registry, and exposes `send` / `broadcast` / `on_message`
//! / `set_role` / `register_plugin` on top of them.

pub mod config;
pub mod error;
pub mod fabric;
pub mod role;

mod probe;

pub use config::{default_config_path, load_config, write_default_config};
pub use error::FabricError;
pub use fabric::{Fabric, FabricHandler};
pub use role::RoleController;

// Re-export the vocabulary types callers need alongside the facade.
pub use weft_mesh::{MeshError, PeerRecord, RedundancyGroup};
pub use weft_plugins::{Plugin, PluginError, PluginVersion};
pub use weft_types::{
    ControlCommand, Envelope, FabricConfig, HealthSettings, NodeId, PeerEndpoint, Recipient, Role,
    TransportKind,
};
