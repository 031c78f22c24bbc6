//! Peer registry — tracks known peers, their latency and redundancy tier.
//!
//! Records are owned exclusively by the registry: the health monitor mutates
//! RTT/group/last-seen through [`PeerRegistry::apply_probe`], membership
//! changes go through add/remove. Peers are only ever removed by explicit
//! eviction, never garbage-collected.

use crate::MeshError;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use weft_types::{HealthSettings, NodeId};

/// Latency-based classification of a peer, used to prefer faster routes.
/// Declaration order is routing preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RedundancyGroup {
    Fast,
    Normal,
    Slow,
    Unreachable,
}

impl std::fmt::Display for RedundancyGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RedundancyGroup::Fast => "fast",
            RedundancyGroup::Normal => "normal",
            RedundancyGroup::Slow => "slow",
            RedundancyGroup::Unreachable => "unreachable",
        };
        f.write_str(s)
    }
}

/// Result of one health probe.
#[derive(Debug, Clone, Copy)]
pub enum ProbeOutcome {
    /// The peer answered within the probe timeout.
    Success(Duration),
    /// The probe failed or timed out.
    Failure,
}

/// A tracked peer.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// The peer's node ID.
    pub id: NodeId,
    /// Where the peer can be dialed.
    pub address: SocketAddr,
    /// Last time anything was heard from the peer.
    pub last_seen_at: DateTime<Utc>,
    /// Most recent measured round-trip time.
    pub last_rtt: Option<Duration>,
    /// Current redundancy tier.
    pub group: RedundancyGroup,
    /// Probe failures since the last success.
    pub consecutive_failures: u32,
    /// Issue instant of the most recently applied probe. Stale results
    /// (issued earlier) are discarded, so a slow-returning probe can never
    /// overwrite a newer one.
    last_applied_issue: Option<Instant>,
}

impl PeerRecord {
    /// A freshly configured or discovered peer. Unprobed peers start in
    /// `Normal` so they are routable before the first probe completes.
    pub fn new(id: NodeId, address: SocketAddr) -> Self {
        Self {
            id,
            address,
            last_seen_at: Utc::now(),
            last_rtt: None,
            group: RedundancyGroup::Normal,
            consecutive_failures: 0,
            last_applied_issue: None,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.group != RedundancyGroup::Unreachable
    }
}

/// A peer's redundancy tier changed.
#[derive(Debug, Clone)]
pub struct GroupChange {
    pub id: NodeId,
    pub from: RedundancyGroup,
    pub to: RedundancyGroup,
}

/// Classify a measured RTT per the configured thresholds.
pub fn classify(rtt: Duration, settings: &HealthSettings) -> RedundancyGroup {
    if rtt < Duration::from_millis(settings.fast_below_ms) {
        RedundancyGroup::Fast
    } else if rtt <= Duration::from_millis(settings.normal_below_ms) {
        RedundancyGroup::Normal
    } else {
        RedundancyGroup::Slow
    }
}

/// Thread-safe registry of all known peers.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<NodeId, PeerRecord>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register or replace a peer.
    pub fn add_peer(&self, record: PeerRecord) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.insert(record.id.clone(), record);
    }

    /// Explicitly evict a peer.
    pub fn remove_peer(&self, id: &NodeId) -> Option<PeerRecord> {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.remove(id)
    }

    /// Snapshot of a single peer.
    pub fn get_peer(&self, id: &NodeId) -> Option<PeerRecord> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.get(id).cloned()
    }

    /// Update `last_seen_at` after hearing from a peer.
    pub fn mark_seen(&self, id: &NodeId) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = peers.get_mut(id) {
            record.last_seen_at = Utc::now();
        }
    }

    /// All peers in one tier, ordered by ascending RTT (unmeasured last).
    pub fn list_by_group(&self, group: RedundancyGroup) -> Vec<PeerRecord> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<PeerRecord> =
            peers.values().filter(|p| p.group == group).cloned().collect();
        records.sort_by(compare_rtt);
        records
    }

    /// All known peers.
    pub fn all_peers(&self) -> Vec<PeerRecord> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply one probe result to a peer, in probe-issue order.
    ///
    /// Results issued before the most recently applied probe are discarded.
    /// A success resets the failure streak and reclassifies by RTT; the
    /// K-th consecutive failure flips the peer to `Unreachable` (further
    /// failures keep it there without re-reporting). Returns the group
    /// change, if any, so the caller can emit exactly one transition event.
    pub fn apply_probe(
        &self,
        id: &NodeId,
        issued_at: Instant,
        outcome: ProbeOutcome,
        settings: &HealthSettings,
    ) -> Option<GroupChange> {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        let record = peers.get_mut(id)?;

        if let Some(latest) = record.last_applied_issue {
            if issued_at <= latest {
                return None;
            }
        }
        record.last_applied_issue = Some(issued_at);

        let from = record.group;
        match outcome {
            ProbeOutcome::Success(rtt) => {
                record.consecutive_failures = 0;
                record.last_rtt = Some(rtt);
                record.last_seen_at = Utc::now();
                record.group = classify(rtt, settings);
            }
            ProbeOutcome::Failure => {
                record.consecutive_failures = record.consecutive_failures.saturating_add(1);
                // K is never below 2, so one dropped packet cannot flap a peer.
                let threshold = settings.failure_threshold.max(2);
                if record.consecutive_failures >= threshold {
                    record.group = RedundancyGroup::Unreachable;
                }
            }
        }

        (from != record.group).then(|| GroupChange {
            id: record.id.clone(),
            from,
            to: record.group,
        })
    }

    /// Ordered route candidates for a recipient: the recipient itself when
    /// it is a known reachable peer, otherwise every reachable peer as a
    /// relay, preferring Fast, then Normal, then Slow, ascending RTT within
    /// a tier. Unreachable peers are never candidates.
    pub fn route_candidates(&self, recipient: &NodeId) -> Vec<PeerRecord> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        if let Some(direct) = peers.get(recipient) {
            return if direct.is_reachable() {
                vec![direct.clone()]
            } else {
                Vec::new()
            };
        }
        let mut relays: Vec<PeerRecord> = peers
            .values()
            .filter(|p| p.is_reachable())
            .cloned()
            .collect();
        relays.sort_by(|a, b| a.group.cmp(&b.group).then_with(|| compare_rtt(a, b)));
        relays
    }

    /// The single best route for a recipient, or `NoRoute`.
    pub fn select_route(&self, recipient: &NodeId) -> Result<PeerRecord, MeshError> {
        self.route_candidates(recipient)
            .into_iter()
            .next()
            .ok_or_else(|| MeshError::NoRoute(recipient.clone()))
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn compare_rtt(a: &PeerRecord, b: &PeerRecord) -> Ordering {
    match (a.last_rtt, b.last_rtt) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn settings() -> HealthSettings {
        HealthSettings::default()
    }

    fn probed(registry: &PeerRegistry, id: &str, rtt_ms: u64) {
        registry.apply_probe(
            &id.into(),
            Instant::now(),
            ProbeOutcome::Success(Duration::from_millis(rtt_ms)),
            &settings(),
        );
    }

    #[test]
    fn test_add_get_remove() {
        let registry = PeerRegistry::new();
        registry.add_peer(PeerRecord::new("p1".into(), addr(9000)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_peer(&"p1".into()).unwrap().address, addr(9000));

        let removed = registry.remove_peer(&"p1".into());
        assert!(removed.is_some());
        assert!(registry.is_empty());
        assert!(registry.get_peer(&"p1".into()).is_none());
    }

    #[test]
    fn test_list_by_group_never_returns_removed_peer() {
        let registry = PeerRegistry::new();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            registry.add_peer(PeerRecord::new((*id).into(), addr(9000 + i as u16)));
            probed(&registry, id, 10);
        }
        registry.remove_peer(&"b".into());
        registry.add_peer(PeerRecord::new("d".into(), addr(9010)));
        probed(&registry, "d", 10);
        registry.remove_peer(&"a".into());

        let fast = registry.list_by_group(RedundancyGroup::Fast);
        let ids: Vec<&str> = fast.iter().map(|p| p.id.as_str()).collect();
        assert!(!ids.contains(&"a"));
        assert!(!ids.contains(&"b"));
        assert!(ids.contains(&"c"));
        assert!(ids.contains(&"d"));
    }

    #[test]
    fn test_list_by_group_orders_by_ascending_rtt() {
        let registry = PeerRegistry::new();
        registry.add_peer(PeerRecord::new("slow-ish".into(), addr(9001)));
        registry.add_peer(PeerRecord::new("quick".into(), addr(9002)));
        registry.add_peer(PeerRecord::new("unmeasured".into(), addr(9003)));
        probed(&registry, "slow-ish", 120);
        probed(&registry, "quick", 60);

        let normal = registry.list_by_group(RedundancyGroup::Normal);
        let ids: Vec<&str> = normal.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["quick", "slow-ish", "unmeasured"]);
    }

    #[test]
    fn test_classify_thresholds() {
        let s = settings();
        assert_eq!(
            classify(Duration::from_millis(10), &s),
            RedundancyGroup::Fast
        );
        assert_eq!(
            classify(Duration::from_millis(50), &s),
            RedundancyGroup::Normal
        );
        // The upper bound is inclusive: exactly normal_below_ms is NORMAL.
        assert_eq!(
            classify(Duration::from_millis(200), &s),
            RedundancyGroup::Normal
        );
        assert_eq!(
            classify(Duration::from_millis(201), &s),
            RedundancyGroup::Slow
        );
        assert_eq!(
            classify(Duration::from_millis(500), &s),
            RedundancyGroup::Slow
        );
    }

    #[test]
    fn test_stale_probe_result_discarded() {
        let registry = PeerRegistry::new();
        registry.add_peer(PeerRecord::new("p".into(), addr(9000)));

        let earlier = Instant::now();
        let later = earlier + Duration::from_millis(100);

        // Newer probe applies first (fast).
        registry.apply_probe(
            &"p".into(),
            later,
            ProbeOutcome::Success(Duration::from_millis(5)),
            &settings(),
        );
        // Stale, slower-to-return probe must not overwrite it.
        registry.apply_probe(
            &"p".into(),
            earlier,
            ProbeOutcome::Success(Duration::from_millis(900)),
            &settings(),
        );

        let record = registry.get_peer(&"p".into()).unwrap();
        assert_eq!(record.group, RedundancyGroup::Fast);
        assert_eq!(record.last_rtt, Some(Duration::from_millis(5)));
    }

    #[test]
    fn test_unreachable_after_k_failures_exactly_once() {
        let registry = PeerRegistry::new();
        registry.add_peer(PeerRecord::new("p".into(), addr(9000)));
        let s = settings(); // failure_threshold = 3
        let base = Instant::now();

        let mut transitions = 0;
        for i in 0..5u64 {
            let change = registry.apply_probe(
                &"p".into(),
                base + Duration::from_millis(i + 1),
                ProbeOutcome::Failure,
                &s,
            );
            if change.is_some() {
                transitions += 1;
                assert_eq!(i, 2, "transition must happen on the K-th failure");
            }
        }
        assert_eq!(transitions, 1);
        assert_eq!(
            registry.get_peer(&"p".into()).unwrap().group,
            RedundancyGroup::Unreachable
        );
    }

    #[test]
    fn test_recovery_returns_to_rtt_based_group() {
        let registry = PeerRegistry::new();
        registry.add_peer(PeerRecord::new("p".into(), addr(9000)));
        let s = settings();
        let base = Instant::now();

        for i in 0..3u64 {
            registry.apply_probe(
                &"p".into(),
                base + Duration::from_millis(i + 1),
                ProbeOutcome::Failure,
                &s,
            );
        }
        assert_eq!(
            registry.get_peer(&"p".into()).unwrap().group,
            RedundancyGroup::Unreachable
        );

        let change = registry
            .apply_probe(
                &"p".into(),
                base + Duration::from_millis(10),
                ProbeOutcome::Success(Duration::from_millis(300)),
                &s,
            )
            .unwrap();
        assert_eq!(change.from, RedundancyGroup::Unreachable);
        assert_eq!(change.to, RedundancyGroup::Slow);
        let record = registry.get_peer(&"p".into()).unwrap();
        assert_eq!(record.consecutive_failures, 0);
    }

    #[test]
    fn test_failure_threshold_never_below_two() {
        let registry = PeerRegistry::new();
        registry.add_peer(PeerRecord::new("p".into(), addr(9000)));
        let s = HealthSettings {
            failure_threshold: 1,
            ..HealthSettings::default()
        };
        // One dropped packet must not flap the peer.
        let change = registry.apply_probe(&"p".into(), Instant::now(), ProbeOutcome::Failure, &s);
        assert!(change.is_none());
        assert_eq!(
            registry.get_peer(&"p".into()).unwrap().group,
            RedundancyGroup::Normal
        );
    }

    #[test]
    fn test_route_prefers_faster_tiers() {
        let registry = PeerRegistry::new();
        registry.add_peer(PeerRecord::new("slow".into(), addr(9001)));
        registry.add_peer(PeerRecord::new("fast".into(), addr(9002)));
        registry.add_peer(PeerRecord::new("normal".into(), addr(9003)));
        probed(&registry, "slow", 400);
        probed(&registry, "fast", 5);
        probed(&registry, "normal", 100);

        // Unknown recipient: relay candidates in preference order.
        let candidates = registry.route_candidates(&"elsewhere".into());
        let ids: Vec<&str> = candidates.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["fast", "normal", "slow"]);

        // Known recipient routes direct.
        let route = registry.select_route(&"slow".into()).unwrap();
        assert_eq!(route.id, NodeId::from("slow"));
    }

    #[test]
    fn test_no_route_when_only_peer_unreachable() {
        let registry = PeerRegistry::new();
        registry.add_peer(PeerRecord::new("p".into(), addr(9000)));
        let s = settings();
        let base = Instant::now();
        for i in 0..3u64 {
            registry.apply_probe(
                &"p".into(),
                base + Duration::from_millis(i + 1),
                ProbeOutcome::Failure,
                &s,
            );
        }
        assert!(matches!(
            registry.select_route(&"p".into()),
            Err(MeshError::NoRoute(_))
        ));
        // And no relays exist either.
        assert!(registry.route_candidates(&"elsewhere".into()).is_empty());
    }

    #[test]
    fn test_no_route_when_registry_empty() {
        let registry = PeerRegistry::new();
        assert!(matches!(
            registry.select_route(&"anyone".into()),
            Err(MeshError::NoRoute(_))
        ));
    }

    #[test]
    fn test_probe_for_unknown_peer_is_ignored() {
        let registry = PeerRegistry::new();
        let change = registry.apply_probe(
            &"ghost".into(),
            Instant::now(),
            ProbeOutcome::Failure,
            &settings(),
        );
        assert!(change.is_none());
    }
}
