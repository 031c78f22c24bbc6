//! Health probing over the fabric's own transports.

use crate::fabric::Fabric;
use async_trait::async_trait;
use std::sync::Weak;
use std::time::Duration;
use weft_mesh::{MeshError, PeerRecord, Prober};

/// [`Prober`] implementation that sends a ping over the same transport the
/// fabric uses for traffic, so measured RTT reflects real delivery latency.
pub(crate) struct FabricProber {
    fabric: Weak<Fabric>,
}

impl FabricProber {
    pub(crate) fn new(fabric: Weak<Fabric>) -> Self {
        Self { fabric }
    }
}

#[async_trait]
impl Prober for FabricProber {
    async fn probe(&self, peer: &PeerRecord, timeout: Duration) -> Result<Duration, MeshError> {
        let fabric = self
            .fabric
            .upgrade()
            .ok_or_else(|| MeshError::Probe("fabric dropped".to_string()))?;
        fabric.probe_peer(peer, timeout).await
    }
}
