//! Node-level error taxonomy.

use thiserror::Error;
use weft_mesh::MeshError;
use weft_plugins::PluginError;
use weft_types::NodeId;
use weft_wire::WireError;

/// Errors surfaced by the fabric facade.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// `start` was called on a fabric that is already running.
    #[error("fabric is already running")]
    AlreadyRunning,

    /// An operation that needs a running fabric was called before `start`
    /// or after `stop`.
    #[error("fabric is not running")]
    NotRunning,

    /// A control command arrived from a node that is not on the allowlist.
    #[error("untrusted sender: {0}")]
    UntrustedSender(NodeId),

    /// A control command was malformed or not honorable in the current state.
    #[error("invalid control command: {0}")]
    InvalidControl(String),

    /// The static configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),
}
