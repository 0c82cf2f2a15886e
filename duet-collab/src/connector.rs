//! Peer connector: bridges the replication engine onto raw data
//! channels.
//!
//! Lifecycle:
//! ```text
//! Unbound ──(transport connected + engine attached)──► Initializing
//!    │                                                      │ engine.init
//!    │ connection future rejected                           ▼
//!    ▼                                              Initialized
//! Failed                                    (full peer resync, then
//!                                            live join/leave/receive)
//! ```
//!
//! The two readiness signals may arrive in either order; the
//! [`ReadyGate`] fires the joint handler exactly once. Peers that
//! opened a channel before initialization are picked up by
//! re-enumerating the transport's open channels, so no join
//! notification is lost.
//!
//! Outbound messages are codec-compressed fragments batched per
//! destination in a [`DelayedStack`]; a flush seals the batch into one
//! [`Envelope`] and hands it to the transport.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::batch::DelayedStack;
use crate::codec::{Codec, Envelope};
use crate::engine::{EngineConfig, ReplicationEngine, Role, SyncStrategy};
use crate::gate::{ReadyGate, Signal};
use crate::transport::{DataChannelTransport, PeerId};

/// Channel tag all connector traffic travels under.
pub const SYNC_CHANNEL: &str = "duet-sync";

/// Connector lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorPhase {
    /// Waiting for the transport, the engine, or both.
    Unbound,
    /// Both ready; running the engine's initialization handshake.
    Initializing,
    /// Live: membership and messages flow to the engine.
    Initialized,
    /// The transport connection was rejected; collaboration is
    /// unavailable for this session.
    Failed,
}

/// Tunables for outbound batching.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// How long a batch may wait before an automatic flush.
    pub flush_delay: Duration,
    /// Buffer size that triggers an eager flush; 0 disables it.
    pub max_batch_size: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            flush_delay: Duration::from_millis(100),
            max_batch_size: 100,
        }
    }
}

/// Point-in-time connector counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectorStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub batches_flushed: u64,
    pub decode_failures: u64,
    pub inbound_dropped: u64,
    pub active_peers: usize,
}

/// Lock-free counters; snapshotted by [`PeerConnector::stats`].
#[derive(Debug, Default)]
struct AtomicStats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    batches_flushed: AtomicU64,
    decode_failures: AtomicU64,
    inbound_dropped: AtomicU64,
}

/// Connector usage errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// `send` addressed a peer with no open data channel.
    UnknownPeer(PeerId),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPeer(peer) => write!(f, "no open data channel for peer {peer:?}"),
        }
    }
}

impl std::error::Error for ConnectorError {}

struct ConnectorInner {
    transport: Arc<dyn DataChannelTransport>,
    engine: Mutex<Option<Arc<dyn ReplicationEngine>>>,
    codec: Arc<Mutex<Codec>>,
    /// Every peer with an open channel, notified or not.
    peers: Mutex<HashSet<PeerId>>,
    /// Outbound batcher per admitted peer. An entry exists exactly for
    /// the peers the engine has been told about.
    batchers: Mutex<HashMap<PeerId, DelayedStack<Value>>>,
    broadcast: DelayedStack<Value>,
    phase: Mutex<ConnectorPhase>,
    gate: ReadyGate,
    config: ConnectorConfig,
    stats: Arc<AtomicStats>,
}

/// The transport connector.
///
/// Construction registers the channel listeners and starts watching
/// the transport's connection future, so it must run inside a Tokio
/// runtime. Attach the engine with [`PeerConnector::attach_engine`];
/// whichever of the two readiness signals lands second triggers the
/// engine handshake and the peer resync.
pub struct PeerConnector {
    inner: Arc<ConnectorInner>,
}

impl PeerConnector {
    pub fn new(transport: Arc<dyn DataChannelTransport>, config: ConnectorConfig) -> Self {
        let codec = Arc::new(Mutex::new(Codec::new()));
        let stats = Arc::new(AtomicStats::default());

        let broadcast = {
            let transport = transport.clone();
            let codec = codec.clone();
            let stats = stats.clone();
            DelayedStack::new(config.flush_delay, config.max_batch_size, move |batch| {
                if batch.is_empty() {
                    return;
                }
                let payload = seal(&codec, batch);
                stats.batches_flushed.fetch_add(1, Ordering::Relaxed);
                if let Err(err) = transport.broadcast_data(SYNC_CHANNEL, payload) {
                    log::warn!("broadcast flush failed: {err}");
                }
            })
        };

        let inner = Arc::new(ConnectorInner {
            transport: transport.clone(),
            engine: Mutex::new(None),
            codec,
            peers: Mutex::new(HashSet::new()),
            batchers: Mutex::new(HashMap::new()),
            broadcast,
            phase: Mutex::new(ConnectorPhase::Unbound),
            gate: ReadyGate::new(),
            config,
            stats,
        });

        // Listeners hold weak references so the transport does not keep
        // a dropped connector alive.
        let weak = Arc::downgrade(&inner);
        transport.add_data_channel_open_listener(Box::new({
            let weak = weak.clone();
            move |peer| {
                if let Some(inner) = weak.upgrade() {
                    inner.channel_opened(peer);
                }
            }
        }));
        transport.add_data_channel_close_listener(Box::new({
            let weak = weak.clone();
            move |peer| {
                if let Some(inner) = weak.upgrade() {
                    inner.channel_closed(&peer);
                }
            }
        }));
        transport.set_peer_listener(
            Box::new({
                let weak = weak.clone();
                move |peer, payload| {
                    if let Some(inner) = weak.upgrade() {
                        inner.message_received(&peer, &payload);
                    }
                }
            }),
            SYNC_CHANNEL,
        );

        let connection = transport.connection();
        tokio::spawn(async move {
            let result = connection.await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(()) => inner.transport_connected(),
                Err(err) => {
                    log::error!("error while getting connection to the channel layer: {err}");
                    *inner.phase.lock().unwrap() = ConnectorPhase::Failed;
                }
            }
        });

        Self { inner }
    }

    /// Attach the replication engine. If the transport is already
    /// connected this runs the initialization handshake synchronously.
    pub fn attach_engine(&self, engine: Arc<dyn ReplicationEngine>) {
        *self.inner.engine.lock().unwrap() = Some(engine);
        if self.inner.gate.open(Signal::Engine) {
            self.inner.initialize();
        }
    }

    /// Queue `message` for `peer`. Errors if the peer has no open
    /// channel.
    pub fn send(&self, peer: &str, message: &Value) -> Result<(), ConnectorError> {
        let batchers = self.inner.batchers.lock().unwrap();
        let stack = batchers
            .get(peer)
            .ok_or_else(|| ConnectorError::UnknownPeer(peer.to_owned()))?;
        let fragment = self.inner.codec.lock().unwrap().encode_fragment(message);
        stack.push(fragment);
        self.inner.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Queue `message` for every peer via the transport's broadcast
    /// primitive.
    pub fn broadcast(&self, message: &Value) {
        let fragment = self.inner.codec.lock().unwrap().encode_fragment(message);
        self.inner.broadcast.push(fragment);
        self.inner.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Peers with an open channel, including ones listed before
    /// initialization that the engine has not been told about yet.
    pub fn known_peers(&self) -> Vec<PeerId> {
        self.inner.peers.lock().unwrap().iter().cloned().collect()
    }

    pub fn phase(&self) -> ConnectorPhase {
        *self.inner.phase.lock().unwrap()
    }

    pub fn is_initialized(&self) -> bool {
        self.phase() == ConnectorPhase::Initialized
    }

    pub fn stats(&self) -> ConnectorStats {
        let stats = &self.inner.stats;
        ConnectorStats {
            messages_sent: stats.messages_sent.load(Ordering::Relaxed),
            messages_received: stats.messages_received.load(Ordering::Relaxed),
            batches_flushed: stats.batches_flushed.load(Ordering::Relaxed),
            decode_failures: stats.decode_failures.load(Ordering::Relaxed),
            inbound_dropped: stats.inbound_dropped.load(Ordering::Relaxed),
            active_peers: self.inner.batchers.lock().unwrap().len(),
        }
    }
}

impl ConnectorInner {
    fn is_initialized(&self) -> bool {
        *self.phase.lock().unwrap() == ConnectorPhase::Initialized
    }

    fn transport_connected(&self) {
        log::info!("data channel layer ready");
        if self.gate.open(Signal::Transport) {
            self.initialize();
        }
    }

    /// Joint-readiness handler; runs exactly once, from whichever
    /// signal arrived second.
    fn initialize(&self) {
        *self.phase.lock().unwrap() = ConnectorPhase::Initializing;

        let engine = self.engine.lock().unwrap().clone();
        let Some(engine) = engine else {
            return;
        };

        let user_id = self.transport.local_id();
        log::info!("initializing engine as {user_id}");
        engine.init(EngineConfig {
            role: Role::Follower,
            user_id,
            sync: SyncStrategy::All,
        });
        *self.phase.lock().unwrap() = ConnectorPhase::Initialized;

        // Full resync: pick up every channel that opened before both
        // sides were ready.
        for peer in self.transport.opened_data_channels() {
            self.admit_peer(peer);
        }
    }

    fn channel_opened(&self, peer: PeerId) {
        self.peers.lock().unwrap().insert(peer.clone());
        if self.is_initialized() {
            self.admit_peer(peer);
        }
    }

    /// Give `peer` a batcher and tell the engine it joined. Idempotent:
    /// an already-admitted peer is left untouched, so an open event
    /// followed by the resync yields a single join notification.
    fn admit_peer(&self, peer: PeerId) {
        self.peers.lock().unwrap().insert(peer.clone());
        {
            let mut batchers = self.batchers.lock().unwrap();
            if batchers.contains_key(&peer) {
                return;
            }
            batchers.insert(peer.clone(), self.peer_stack(peer.clone()));
        }
        log::info!("peer {peer} joined");
        let engine = self.engine.lock().unwrap().clone();
        if let Some(engine) = engine {
            engine.user_joined(&peer, Role::Follower);
        }
    }

    fn channel_closed(&self, peer: &str) {
        self.peers.lock().unwrap().remove(peer);
        let stack = self.batchers.lock().unwrap().remove(peer);
        let Some(stack) = stack else {
            // Close for a channel that was never admitted; not a fault.
            log::debug!("ignoring close for unknown peer {peer}");
            return;
        };
        // Buffered-but-undelivered messages for a gone peer are dropped.
        stack.destroy();
        log::info!("peer {peer} left");
        if self.is_initialized() {
            let engine = self.engine.lock().unwrap().clone();
            if let Some(engine) = engine {
                engine.user_left(peer);
            }
        }
    }

    fn message_received(&self, peer: &str, payload: &str) {
        if !self.is_initialized() {
            self.stats.inbound_dropped.fetch_add(1, Ordering::Relaxed);
            log::debug!("dropping message from {peer} before initialization");
            return;
        }

        let envelope: Envelope = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("malformed envelope from {peer}: {err}");
                return;
            }
        };
        let decoded = match Codec::decode(&envelope) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("envelope from {peer} failed to decode: {err}");
                return;
            }
        };
        let Value::Array(messages) = decoded else {
            self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
            log::error!("envelope from {peer} did not carry a message batch");
            return;
        };

        let engine = self.engine.lock().unwrap().clone();
        let Some(engine) = engine else {
            return;
        };
        for message in messages {
            self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
            engine.receive_message(peer, message);
        }
    }

    fn peer_stack(&self, peer: PeerId) -> DelayedStack<Value> {
        let transport = self.transport.clone();
        let codec = self.codec.clone();
        let stats = self.stats.clone();
        DelayedStack::new(
            self.config.flush_delay,
            self.config.max_batch_size,
            move |batch| {
                if batch.is_empty() {
                    return;
                }
                let payload = seal(&codec, batch);
                stats.batches_flushed.fetch_add(1, Ordering::Relaxed);
                if let Err(err) = transport.send_data(&peer, SYNC_CHANNEL, payload) {
                    log::warn!("flush to {peer} failed: {err}");
                }
            },
        )
    }
}

/// Seal a batch of encoded fragments into one wire payload. The alias
/// map is snapshotted after the last fragment was encoded, so it
/// covers every token the batch references.
fn seal(codec: &Mutex<Codec>, batch: Vec<Value>) -> String {
    let map = codec.lock().unwrap().alias_map();
    let envelope = Envelope {
        data: Value::Array(batch),
        map,
    };
    serde_json::to_string(&envelope).expect("envelope serialization cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectorConfig::default();
        assert_eq!(config.flush_delay, Duration::from_millis(100));
        assert_eq!(config.max_batch_size, 100);
    }

    #[test]
    fn test_unknown_peer_error_display() {
        let err = ConnectorError::UnknownPeer("p9".to_owned());
        assert_eq!(err.to_string(), "no open data channel for peer \"p9\"");
    }

    #[test]
    fn test_stats_default_is_zeroed() {
        assert_eq!(ConnectorStats::default().messages_sent, 0);
        assert_eq!(ConnectorStats::default().active_peers, 0);
    }
}
