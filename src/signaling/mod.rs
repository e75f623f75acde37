//! Signaling channel: wire protocol and WebSocket transport

pub mod client;
pub mod protocol;

pub use client::{SignalingClient, Subscription, TransportState};
pub use protocol::{
    DeliveryStatus, FileMetadata, MessageType, RecipientScope, SignalingMessage, HEARTBEAT_PING,
    KEEPALIVE_REPLIES,
};

/// Outbound signaling seam
///
/// The peer mesh sends through this trait rather than the concrete client,
/// so tests can record traffic and alternative transports can be swapped in.
pub trait SignalingSender: Send + Sync {
    /// Send a message, fire-and-forget; dropped with a warning when the
    /// channel is down
    fn send(&self, msg: &SignalingMessage);
}
