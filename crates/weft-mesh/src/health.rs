//! Health monitor — probes peers on a fixed interval and keeps the
//! registry's redundancy groups current.
//!
//! Each cycle spawns one task per peer, so probing is independent: one slow
//! peer cannot delay another peer's probe, or its own next cycle beyond one
//! interval. Group transitions are published on a broadcast channel; the
//! node consumes them to fail over traffic away from unreachable peers.

use crate::registry::{GroupChange, PeerRecord, PeerRegistry, ProbeOutcome, RedundancyGroup};
use crate::MeshError;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use weft_types::HealthSettings;

/// Capacity of the transition-event channel.
const EVENT_BUFFER: usize = 64;

/// The probe seam: issues one lightweight reachability check against a peer
/// and reports the measured round-trip time.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, peer: &PeerRecord, timeout: Duration) -> Result<Duration, MeshError>;
}

/// A peer moved between redundancy groups.
#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub change: GroupChange,
}

impl PeerEvent {
    /// Whether this transition took the peer out of service.
    pub fn became_unreachable(&self) -> bool {
        self.change.to == RedundancyGroup::Unreachable
    }
}

/// Periodic health prober over a [`PeerRegistry`].
pub struct HealthMonitor {
    registry: PeerRegistry,
    prober: Arc<dyn Prober>,
    settings: Arc<RwLock<HealthSettings>>,
    events: broadcast::Sender<PeerEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(registry: PeerRegistry, prober: Arc<dyn Prober>, settings: HealthSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            registry,
            prober,
            settings: Arc::new(RwLock::new(settings)),
            events,
            task: Mutex::new(None),
        }
    }

    /// Subscribe to group-transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> HealthSettings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Apply a runtime-tunable setting by key. Rejects unknown keys and
    /// values outside their valid range.
    pub fn apply_setting(&self, key: &str, value: &str) -> Result<(), MeshError> {
        let invalid = |reason: &str| MeshError::InvalidSetting {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
        match key {
            "probe_interval_ms" => {
                let v: u64 = value.parse().map_err(|_| invalid("not a number"))?;
                if v == 0 {
                    return Err(invalid("must be positive"));
                }
                settings.probe_interval_ms = v;
            }
            "probe_timeout_ms" => {
                let v: u64 = value.parse().map_err(|_| invalid("not a number"))?;
                if v == 0 {
                    return Err(invalid("must be positive"));
                }
                settings.probe_timeout_ms = v;
            }
            "fast_below_ms" => {
                settings.fast_below_ms = value.parse().map_err(|_| invalid("not a number"))?;
            }
            "normal_below_ms" => {
                settings.normal_below_ms = value.parse().map_err(|_| invalid("not a number"))?;
            }
            "failure_threshold" => {
                let v: u32 = value.parse().map_err(|_| invalid("not a number"))?;
                if v < 2 {
                    return Err(invalid("must be at least 2"));
                }
                settings.failure_threshold = v;
            }
            _ => return Err(invalid("unknown key")),
        }
        info!(key, value, "health setting updated");
        Ok(())
    }

    /// Start the probe loop in a background task. Idempotent.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }
        *task = Some(tokio::spawn(probe_loop(
            self.registry.clone(),
            Arc::clone(&self.prober),
            Arc::clone(&self.settings),
            self.events.clone(),
        )));
        debug!("health monitor started");
    }

    /// Stop the probe loop and wait for it to end. Idempotent.
    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            let _ = task.await;
            debug!("health monitor stopped");
        }
    }
}

async fn probe_loop(
    registry: PeerRegistry,
    prober: Arc<dyn Prober>,
    settings: Arc<RwLock<HealthSettings>>,
    events: broadcast::Sender<PeerEvent>,
) {
    loop {
        let current = settings.read().unwrap_or_else(|e| e.into_inner()).clone();
        let timeout = Duration::from_millis(current.probe_timeout_ms);
        for peer in registry.all_peers() {
            tokio::spawn(probe_once(
                registry.clone(),
                Arc::clone(&prober),
                current.clone(),
                events.clone(),
                peer,
                timeout,
            ));
        }
        tokio::time::sleep(Duration::from_millis(current.probe_interval_ms)).await;
    }
}

/// Issue one probe against one peer and apply the outcome.
async fn probe_once(
    registry: PeerRegistry,
    prober: Arc<dyn Prober>,
    settings: HealthSettings,
    events: broadcast::Sender<PeerEvent>,
    peer: PeerRecord,
    timeout: Duration,
) {
    let issued_at = Instant::now();
    let outcome = match tokio::time::timeout(timeout, prober.probe(&peer, timeout)).await {
        Ok(Ok(rtt)) => ProbeOutcome::Success(rtt),
        Ok(Err(e)) => {
            debug!(peer = %peer.id, error = %e, "probe failed");
            ProbeOutcome::Failure
        }
        Err(_) => {
            debug!(peer = %peer.id, "probe timed out");
            ProbeOutcome::Failure
        }
    };

    if let Some(change) = registry.apply_probe(&peer.id, issued_at, outcome, &settings) {
        if change.to == RedundancyGroup::Unreachable {
            warn!(peer = %change.id, from = %change.from, "peer became unreachable");
        } else {
            info!(peer = %change.id, from = %change.from, to = %change.to, "peer regrouped");
        }
        let _ = events.send(PeerEvent { change });
    }
}
