//! The fabric facade.
//!
//! One object wires the layers together: transports (outbound connections
//! plus the coordinator's listening endpoint), the peer registry and health
//! monitor, the role controller, and the plugin registry. Applications talk
//! to [`Fabric`] and nothing else.
//!
//! Inbound envelopes from every connection funnel into one dispatch path:
//! duplicates (by `sequence_id`) are dropped, control commands are handled
//! by the fabric itself, typed payloads go to the owning plugin, and
//! everything else reaches the registered message handlers.

use crate::error::FabricError;
use crate::probe::FabricProber;
use crate::role::RoleController;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use weft_mesh::{HealthMonitor, MeshError, PeerEvent, PeerRecord, PeerRegistry};
use weft_plugins::{Plugin, PluginDescriptor, PluginRegistry, HOST_INTERFACE_MAJOR};
use weft_types::{ControlCommand, Envelope, FabricConfig, NodeId, Recipient, Role};
use weft_wire::{
    connect_transport, EnvelopeCodec, InboundEnvelope, JsonCodec, ReplyHandle, Transport,
    WireError, WireListener,
};

/// Queue depth between the listening endpoint and the dispatch loop.
const INBOUND_BUFFER: usize = 256;

/// How many recent sequence IDs the duplicate filter remembers.
const SEEN_CAPACITY: usize = 1024;

/// Receives application envelopes the fabric did not consume itself.
///
/// Returning `Some(payload)` sends it back to the sender as a correlated
/// reply; a sender using the request/response transport receives it as the
/// return value of its `send`.
#[async_trait]
pub trait FabricHandler: Send + Sync {
    async fn on_envelope(&self, envelope: &Envelope) -> Option<Vec<u8>>;
}

/// A running fabric node.
pub struct Fabric {
    config: FabricConfig,
    node_id: NodeId,
    codec: Arc<dyn EnvelopeCodec>,
    registry: PeerRegistry,
    plugins: PluginRegistry,
    roles: RoleController,
    monitor: HealthMonitor,
    /// Outbound transports keyed by peer ID.
    transports: DashMap<NodeId, Arc<dyn Transport>>,
    /// Serializes outbound connects so one peer never gets two sockets.
    connect_lock: Mutex<()>,
    handlers: StdRwLock<Vec<Arc<dyn FabricHandler>>>,
    listener: Mutex<Option<WireListener>>,
    inbound_tx: StdRwLock<Option<mpsc::Sender<InboundEnvelope>>>,
    running: AtomicBool,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    seen: StdMutex<SeenCache>,
    self_ref: Weak<Fabric>,
}

impl Fabric {
    /// Build a fabric with the default JSON wire codec.
    pub fn new(config: FabricConfig) -> Arc<Self> {
        Self::with_codec(config, Arc::new(JsonCodec))
    }

    /// Build a fabric with an injected wire codec.
    pub fn with_codec(config: FabricConfig, codec: Arc<dyn EnvelopeCodec>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Fabric>| {
            let registry = PeerRegistry::new();
            let prober = Arc::new(FabricProber::new(weak.clone()));
            let monitor = HealthMonitor::new(registry.clone(), prober, config.health.clone());
            let roles = RoleController::new(config.mode, config.trusted_senders.clone());
            Fabric {
                node_id: config.node_id(),
                codec,
                registry,
                plugins: PluginRegistry::new(HOST_INTERFACE_MAJOR),
                roles,
                monitor,
                transports: DashMap::new(),
                connect_lock: Mutex::new(()),
                handlers: StdRwLock::new(Vec::new()),
                listener: Mutex::new(None),
                inbound_tx: StdRwLock::new(None),
                running: AtomicBool::new(false),
                tasks: StdMutex::new(Vec::new()),
                seen: StdMutex::new(SeenCache::new(SEEN_CAPACITY)),
                self_ref: weak.clone(),
                config,
            }
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn role(&self) -> Role {
        self.roles.role()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.monitor
    }

    /// Actual bound address of the listening endpoint, if one is open.
    pub async fn listener_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().await.as_ref().map(|l| l.local_addr())
    }

    /// Register a message handler for application envelopes.
    pub fn on_message(&self, handler: Arc<dyn FabricHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(handler);
    }

    /// Bring the fabric up: seed the registry from configuration, provision
    /// for the current role, dial known peers, and start health probing.
    pub async fn start(&self) -> Result<(), FabricError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(FabricError::AlreadyRunning);
        }
        info!(node = %self.node_id, role = %self.role(), "fabric starting");

        for peer in &self.config.peers {
            self.registry
                .add_peer(PeerRecord::new(peer.id.clone(), peer.address));
        }

        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        *self.inbound_tx.write().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        self.spawn(inbound_pump(self.self_ref.clone(), rx));

        if let Err(e) = self.provision_for_role(self.role()).await {
            self.abort_tasks().await;
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        // Dial configured peers now so the first send does not pay connect
        // latency; failures are left to the health probes to retry.
        for peer in self.registry.all_peers() {
            if let Err(e) = self.transport_for(&peer).await {
                warn!(peer = %peer.id, error = %e, "initial connect failed, probes will retry");
            }
        }

        let events = self.monitor.subscribe();
        self.spawn(failover_loop(self.self_ref.clone(), events));
        self.monitor.start().await;
        Ok(())
    }

    /// Take the fabric down: stop probing, close the listener and every
    /// outbound transport, and end the background tasks.
    pub async fn stop(&self) -> Result<(), FabricError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(FabricError::NotRunning);
        }
        self.monitor.stop().await;
        if let Some(listener) = self.listener.lock().await.take() {
            listener.shutdown().await;
        }
        let ids: Vec<NodeId> = self.transports.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.drop_transport(&id).await;
        }
        *self.inbound_tx.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.abort_tasks().await;
        info!(node = %self.node_id, "fabric stopped");
        Ok(())
    }

    /// Change this node's role, reprovisioning network resources to match.
    ///
    /// Entering `coordinator` opens the listening endpoint; leaving it shuts
    /// the old listener down completely before the transition returns.
    pub async fn set_role(&self, role: Role) -> Result<(), FabricError> {
        // Provision first: if the listener cannot bind, the node must keep
        // its current role rather than report one it cannot serve.
        if self.running.load(Ordering::SeqCst) {
            self.provision_for_role(role).await?;
        }
        self.roles.transition(role);
        Ok(())
    }

    /// Send a payload to one recipient.
    ///
    /// Routing prefers a live connection the recipient dialed in on, then a
    /// direct outbound transport, then reachable relay peers in ascending
    /// RTT order, failing over on delivery errors. With the RPC transport
    /// the correlated reply is returned; the duplex transport returns `None`
    /// once the envelope is written.
    pub async fn send(
        &self,
        recipient: NodeId,
        payload: Vec<u8>,
    ) -> Result<Option<Envelope>, FabricError> {
        self.ensure_running()?;
        let envelope = Envelope::new(self.node_id.clone(), Recipient::Node(recipient), payload);
        self.route(&envelope).await
    }

    /// Send a payload to every reachable peer. Returns how many peers it
    /// was handed to; per-peer failures are logged, not propagated.
    pub async fn broadcast(&self, payload: Vec<u8>) -> Result<usize, FabricError> {
        self.ensure_running()?;
        let envelope = Envelope::new(self.node_id.clone(), Recipient::Broadcast, payload);
        let mut delivered = 0usize;
        let mut covered: HashSet<NodeId> = HashSet::new();

        if let Some(listener) = self.listener.lock().await.as_ref() {
            for id in listener.connected() {
                match listener.send_to(&id, &envelope).await {
                    Ok(true) => {
                        delivered += 1;
                        covered.insert(id);
                    }
                    Ok(false) => {}
                    Err(e) => warn!(peer = %id, error = %e, "broadcast delivery failed"),
                }
            }
        }

        for peer in self.registry.all_peers() {
            if covered.contains(&peer.id) || !peer.is_reachable() {
                continue;
            }
            let transport = match self.transport_for(&peer).await {
                Ok(transport) => transport,
                Err(e) => {
                    warn!(peer = %peer.id, error = %e, "broadcast connect failed");
                    continue;
                }
            };
            match transport.push(&envelope).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(peer = %peer.id, error = %e, "broadcast delivery failed");
                    if wire_is_dead(&e) {
                        self.drop_transport(&peer.id).await;
                    }
                }
            }
        }
        debug!(delivered, "broadcast complete");
        Ok(delivered)
    }

    /// Register a plugin under a unique name. The version contract is
    /// checked first; then the plugin's `init` runs, and an init failure
    /// rolls the registration back so a broken plugin leaves no trace.
    pub async fn register_plugin(
        &self,
        name: impl Into<String>,
        plugin: Arc<dyn Plugin>,
    ) -> Result<(), FabricError> {
        let descriptor = PluginDescriptor::new(name, plugin);
        let name = descriptor.name.clone();
        let capability = Arc::clone(&descriptor.capability);
        self.plugins.register(descriptor)?;
        if let Err(e) = capability.init().await {
            warn!(plugin = %name, error = %e, "plugin init failed, rolling back registration");
            let _ = self.plugins.unregister(&name);
            return Err(e.into());
        }
        Ok(())
    }

    /// Issue a role assignment to a peer currently in `auto` mode.
    pub async fn assign_role(&self, target: &NodeId, role: Role) -> Result<(), FabricError> {
        let command = ControlCommand::AssignRole {
            target_role: role,
            issued_by: self.node_id.clone(),
        };
        self.send(target.clone(), command.to_payload())
            .await
            .map(|_| ())
    }

    fn ensure_running(&self) -> Result<(), FabricError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(FabricError::NotRunning)
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms)
    }

    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tokio::spawn(future));
    }

    async fn abort_tasks(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
    }

    /// Open or close the listening endpoint to match a role.
    async fn provision_for_role(&self, role: Role) -> Result<(), FabricError> {
        if role.listens() {
            let mut guard = self.listener.lock().await;
            if guard.is_none() {
                let addr = self
                    .config
                    .listen_addr()
                    .map_err(|e| FabricError::Config(format!("listen address: {e}")))?;
                let tx = self
                    .inbound_tx
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone()
                    .ok_or(FabricError::NotRunning)?;
                *guard = Some(WireListener::bind(addr, Arc::clone(&self.codec), tx).await?);
            }
        } else if let Some(listener) = self.listener.lock().await.take() {
            listener.shutdown().await;
        }
        Ok(())
    }

    /// The outbound transport for a peer, dialing one if none is live.
    async fn transport_for(&self, peer: &PeerRecord) -> Result<Arc<dyn Transport>, FabricError> {
        if let Some(existing) = self.transports.get(&peer.id) {
            return Ok(Arc::clone(existing.value()));
        }
        let _guard = self.connect_lock.lock().await;
        if let Some(existing) = self.transports.get(&peer.id) {
            return Ok(Arc::clone(existing.value()));
        }

        let transport =
            connect_transport(self.config.transport, peer.address, Arc::clone(&self.codec))
                .await?;
        self.transports
            .insert(peer.id.clone(), Arc::clone(&transport));
        self.spawn(transport_pump(
            self.self_ref.clone(),
            Arc::clone(&transport),
        ));

        // Announce ourselves so the remote end can map our node ID to this
        // connection and push envelopes back down it.
        let hello = Envelope::new(
            self.node_id.clone(),
            Recipient::Node(peer.id.clone()),
            ControlCommand::Ping.to_payload(),
        );
        if let Err(e) = transport.push(&hello).await {
            debug!(peer = %peer.id, error = %e, "announce failed");
        }
        debug!(peer = %peer.id, address = %peer.address, "transport connected");
        Ok(transport)
    }

    /// Close and forget the outbound transport to a peer, if any.
    async fn drop_transport(&self, id: &NodeId) {
        if let Some((_, transport)) = self.transports.remove(id) {
            transport.close().await;
        }
    }

    /// One reachability probe: a ping over the real transport, timed
    /// end to end.
    pub(crate) async fn probe_peer(
        &self,
        peer: &PeerRecord,
        timeout: Duration,
    ) -> Result<Duration, MeshError> {
        let transport = self
            .transport_for(peer)
            .await
            .map_err(|e| MeshError::Probe(e.to_string()))?;
        let ping = Envelope::new(
            self.node_id.clone(),
            Recipient::Node(peer.id.clone()),
            ControlCommand::Ping.to_payload(),
        );
        let started = Instant::now();
        match transport.request(&ping, timeout).await {
            Ok(_pong) => Ok(started.elapsed()),
            Err(e) => {
                if wire_is_dead(&e) {
                    self.drop_transport(&peer.id).await;
                }
                Err(MeshError::Probe(e.to_string()))
            }
        }
    }

    /// Route an addressed envelope, failing over across candidates.
    async fn route(&self, envelope: &Envelope) -> Result<Option<Envelope>, FabricError> {
        let recipient = match &envelope.recipient {
            Recipient::Node(id) => id.clone(),
            Recipient::Broadcast => {
                return Err(FabricError::InvalidControl(
                    "broadcast envelopes go through broadcast()".to_string(),
                ))
            }
        };

        // A peer that dialed in is reachable down its own connection even
        // when we cannot dial it back.
        if let Some(listener) = self.listener.lock().await.as_ref() {
            match listener.send_to(&recipient, envelope).await {
                Ok(true) => return Ok(None),
                Ok(false) => {}
                Err(e) => {
                    warn!(peer = %recipient, error = %e, "inbound-connection delivery failed")
                }
            }
        }

        let candidates = self.registry.route_candidates(&recipient);
        if candidates.is_empty() {
            return Err(MeshError::NoRoute(recipient).into());
        }
        let mut last_err: FabricError = MeshError::NoRoute(recipient).into();
        for peer in candidates {
            match self.deliver(&peer, envelope).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    warn!(peer = %peer.id, error = %e, "delivery failed, trying next candidate");
                    if connection_is_dead(&e) {
                        self.drop_transport(&peer.id).await;
                    }
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn deliver(
        &self,
        peer: &PeerRecord,
        envelope: &Envelope,
    ) -> Result<Option<Envelope>, FabricError> {
        let transport = self.transport_for(peer).await?;
        Ok(transport.send(envelope, self.request_timeout()).await?)
    }

    /// Single dispatch path for every inbound envelope.
    ///
    /// Boxed: relaying an envelope can dial a fresh transport, whose pump
    /// future awaits dispatch again. The indirection keeps the future type
    /// from containing itself.
    fn dispatch(
        &self,
        envelope: Envelope,
        source: DispatchSource,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.dispatch_inner(envelope, source))
    }

    async fn dispatch_inner(&self, envelope: Envelope, source: DispatchSource) {
        {
            let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            if !seen.insert(envelope.sequence_id) {
                debug!(sequence_id = %envelope.sequence_id, "duplicate envelope dropped");
                return;
            }
        }
        self.registry.mark_seen(&envelope.sender);

        // Envelopes addressed to someone else are relayed, not consumed;
        // the duplicate filter above breaks relay cycles.
        if let Recipient::Node(id) = &envelope.recipient {
            if id != &self.node_id {
                if let Err(e) = self.route(&envelope).await {
                    warn!(recipient = %id, error = %e, "relay failed");
                }
                return;
            }
        }

        if let Some(command) = ControlCommand::from_payload(&envelope.payload) {
            self.handle_control(&envelope, command, &source).await;
            return;
        }

        if let Some(message_type) = payload_message_type(&envelope.payload) {
            if let Some((name, plugin)) = self.plugins.handler_for(&message_type) {
                // Plugin failures are isolated from the dispatch loop.
                if let Err(e) = plugin.on_envelope(&envelope).await {
                    warn!(plugin = %name, error = %e, "plugin handler failed");
                }
                return;
            }
        }

        let handlers: Vec<Arc<dyn FabricHandler>> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut replied = false;
        for handler in handlers {
            if let Some(payload) = handler.on_envelope(&envelope).await {
                // First responder wins; later handlers still see the envelope.
                if !replied && !envelope.is_broadcast() {
                    replied = true;
                    let reply = envelope.reply(self.node_id.clone(), payload);
                    if let Err(e) = source.push(&reply).await {
                        debug!(peer = %envelope.sender, error = %e, "reply delivery failed");
                    }
                }
            }
        }
    }

    async fn handle_control(
        &self,
        envelope: &Envelope,
        command: ControlCommand,
        source: &DispatchSource,
    ) {
        match command {
            ControlCommand::Ping => {
                let pong = envelope.reply(self.node_id.clone(), ControlCommand::Pong.to_payload());
                if let Err(e) = source.push(&pong).await {
                    debug!(peer = %envelope.sender, error = %e, "pong delivery failed");
                }
            }
            // Correlated pongs resolve inside the transport; a stray one
            // already served its purpose via mark_seen.
            ControlCommand::Pong => {}
            ControlCommand::AssignRole {
                target_role,
                issued_by,
            } => {
                match self
                    .roles
                    .authorize_assignment(target_role, &issued_by, &envelope.sender)
                {
                    Ok(()) => {
                        info!(from = %envelope.sender, role = %target_role, "role assignment accepted");
                        if let Err(e) = self.set_role(target_role).await {
                            error!(role = %target_role, error = %e, "failed to provision assigned role");
                        }
                    }
                    Err(e) => {
                        warn!(from = %envelope.sender, role = %target_role, error = %e, "role assignment rejected")
                    }
                }
            }
            ControlCommand::UpdateConfig { key, value } => {
                if !self.config.is_trusted(&envelope.sender) {
                    warn!(from = %envelope.sender, key, "config update from untrusted sender rejected");
                    return;
                }
                match self.monitor.apply_setting(&key, &value) {
                    Ok(()) => info!(from = %envelope.sender, key, value, "runtime setting updated"),
                    Err(e) => warn!(key, error = %e, "config update rejected"),
                }
            }
        }
    }
}

/// Where an envelope came from, with a matching way to answer it.
enum DispatchSource {
    Listener(ReplyHandle),
    Transport(Arc<dyn Transport>),
}

impl DispatchSource {
    async fn push(&self, envelope: &Envelope) -> Result<(), WireError> {
        match self {
            DispatchSource::Listener(handle) => handle.send(envelope).await,
            DispatchSource::Transport(transport) => transport.push(envelope).await,
        }
    }
}

/// Bounded remember-recent-IDs set for duplicate suppression.
struct SeenCache {
    order: VecDeque<Uuid>,
    members: HashSet<Uuid>,
    capacity: usize,
}

impl SeenCache {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns `false` if the ID was already present.
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        true
    }
}

/// The `type` field of a JSON payload, used for plugin routing.
fn payload_message_type(payload: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    value.get("type")?.as_str().map(|s| s.to_string())
}

fn wire_is_dead(e: &WireError) -> bool {
    matches!(
        e,
        WireError::Closed | WireError::Connection(_) | WireError::Send(_) | WireError::Io(_)
    )
}

fn connection_is_dead(e: &FabricError) -> bool {
    matches!(e, FabricError::Wire(inner) if wire_is_dead(inner))
}

async fn inbound_pump(fabric: Weak<Fabric>, mut rx: mpsc::Receiver<InboundEnvelope>) {
    while let Some(inbound) = rx.recv().await {
        let Some(fabric) = fabric.upgrade() else {
            break;
        };
        fabric
            .dispatch(inbound.envelope, DispatchSource::Listener(inbound.reply))
            .await;
    }
}

async fn transport_pump(fabric: Weak<Fabric>, transport: Arc<dyn Transport>) {
    loop {
        let envelope = match transport.recv().await {
            Ok(envelope) => envelope,
            Err(_) => break,
        };
        let Some(fabric) = fabric.upgrade() else {
            break;
        };
        fabric
            .dispatch(envelope, DispatchSource::Transport(Arc::clone(&transport)))
            .await;
    }
}

/// Closes the outbound transport when the monitor declares a peer
/// unreachable, so in-flight and future traffic fails over immediately.
async fn failover_loop(fabric: Weak<Fabric>, mut events: broadcast::Receiver<PeerEvent>) {
    loop {
        match events.recv().await {
            Ok(event) if event.became_unreachable() => {
                let Some(fabric) = fabric.upgrade() else {
                    break;
                };
                fabric.drop_transport(&event.change.id).await;
                warn!(peer = %event.change.id, "failed over away from unreachable peer");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "peer event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seen_cache_dedups_and_evicts() {
        let mut cache = SeenCache::new(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        assert!(cache.insert(a));
        assert!(!cache.insert(a));
        assert!(cache.insert(b));
        assert!(cache.insert(c));
        // `a` was evicted and is accepted again.
        assert!(cache.insert(a));
    }

    #[test]
    fn test_payload_message_type() {
        assert_eq!(
            payload_message_type(br#"{"type":"job.submit","data":1}"#),
            Some("job.submit".to_string())
        );
        assert_eq!(payload_message_type(br#"{"data":1}"#), None);
        assert_eq!(payload_message_type(b"not json"), None);
        assert_eq!(payload_message_type(br#"{"type":42}"#), None);
    }
}
