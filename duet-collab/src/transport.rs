//! Data-channel transport collaborator interface.
//!
//! The connector never opens sockets itself; it talks to whatever
//! peer-to-peer channel layer the host embeds through this trait:
//! a settling connection future, listener registration for channel
//! lifecycle and tagged peer messages, and send/broadcast primitives.

use std::fmt;

use futures_util::future::BoxFuture;

/// Opaque transport-assigned peer identifier.
pub type PeerId = String;

/// Listener for data-channel open/close events.
pub type ChannelListener = Box<dyn Fn(PeerId) + Send + Sync>;

/// Listener for messages arriving on a tagged channel, as
/// `(peer, payload)`.
pub type PeerMessageListener = Box<dyn Fn(PeerId, String) + Send + Sync>;

/// Capabilities the connector needs from the channel layer.
pub trait DataChannelTransport: Send + Sync {
    /// Resolves once the channel layer is usable, or rejects with an
    /// error/code pair. Rejection is fatal for the session.
    fn connection(&self) -> BoxFuture<'static, Result<(), TransportError>>;

    /// This peer's own identifier.
    fn local_id(&self) -> PeerId;

    fn add_data_channel_open_listener(&self, listener: ChannelListener);

    fn add_data_channel_close_listener(&self, listener: ChannelListener);

    /// Register the receiver for messages tagged `channel_tag`.
    fn set_peer_listener(&self, listener: PeerMessageListener, channel_tag: &str);

    fn send_data(&self, peer: &str, channel_tag: &str, payload: String)
        -> Result<(), TransportError>;

    fn broadcast_data(&self, channel_tag: &str, payload: String) -> Result<(), TransportError>;

    /// Peers with a currently open data channel. Used for the full
    /// resync when initialization completes.
    fn opened_data_channels(&self) -> Vec<PeerId>;
}

/// Error/code pair reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub code: String,
    pub message: String,
}

impl TransportError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for TransportError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_code_and_message() {
        let err = TransportError::new("ICE_FAILED", "no candidate pair");
        assert_eq!(err.to_string(), "transport error ICE_FAILED: no candidate pair");
    }
}
