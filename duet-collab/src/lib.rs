//! # duet-collab — peer transport connector for live document sync
//!
//! Bridges an external CRDT replication engine onto raw peer-to-peer
//! data channels: rendezvous between transport readiness and engine
//! attachment, peer join/leave tracking with missed-event replay,
//! per-destination batching, and two-tier dictionary compression of
//! message payloads.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────┐  send/broadcast   ┌───────────────┐   Codec.encode
//! │ Engine │ ────────────────► │ PeerConnector │ ───────────────┐
//! │ (CRDT) │ ◄──── receive ─── │               │                ▼
//! └────────┘   joined/left     └──────┬────────┘        ┌──────────────┐
//!                                     │                 │ DelayedStack │
//!                              channel events           │  (per peer)  │
//!                                     │                 └──────┬───────┘
//!                             ┌───────┴────────┐               │ delay /
//!                             │   Transport    │ ◄─────────────┘ size flush
//!                             │ (data channels)│    sendData(Envelope)
//!                             └────────────────┘
//! ```
//!
//! Inbound: peer message → [`Envelope`] → [`Codec::decode`] → one
//! `receive_message` per contained message, in order.
//!
//! ## Modules
//!
//! - [`codec`] — static + dynamic dictionary payload compression
//! - [`batch`] — `DelayedStack`, the timer/size driven message batcher
//! - [`gate`] — readiness rendezvous between transport and engine
//! - [`connector`] — peer lifecycle state machine and orchestration
//! - [`transport`] — data-channel collaborator interface
//! - [`engine`] — replication engine collaborator interface

pub mod batch;
pub mod codec;
pub mod connector;
pub mod engine;
pub mod gate;
pub mod transport;

// Re-exports for convenience
pub use batch::DelayedStack;
pub use codec::{Codec, CodecError, Dictionary, Envelope, ALIAS_PREFIX};
pub use connector::{
    ConnectorConfig, ConnectorError, ConnectorPhase, ConnectorStats, PeerConnector, SYNC_CHANNEL,
};
pub use engine::{EngineConfig, ReplicationEngine, Role, SyncStrategy};
pub use gate::{ReadyGate, Signal};
pub use transport::{
    ChannelListener, DataChannelTransport, PeerId, PeerMessageListener, TransportError,
};
