//! Replication engine collaborator interface.
//!
//! The engine owns the document and the merge algorithm; the
//! connector only moves its messages. The connector drives the engine
//! through this trait — one `init` at the readiness rendezvous, then
//! membership and message callbacks for as long as the session lives.

use serde_json::Value;

use crate::transport::PeerId;

/// Role a peer plays in the replication topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

/// Synchronization strategy hint handed to the engine at `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Exchange state with every connected peer.
    All,
    /// Sync through the leader only.
    LeaderOnly,
}

/// Configuration for the engine's one-time initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub role: Role,
    /// This connector's own transport identity.
    pub user_id: PeerId,
    pub sync: SyncStrategy,
}

/// Callbacks the connector invokes on the attached engine.
pub trait ReplicationEngine: Send + Sync {
    /// Called exactly once, when both the transport and the engine
    /// attachment are ready.
    fn init(&self, config: EngineConfig);

    /// One decoded message from `peer`, in arrival order.
    fn receive_message(&self, peer: &str, message: Value);

    fn user_joined(&self, peer: &str, role: Role);

    fn user_left(&self, peer: &str);
}
