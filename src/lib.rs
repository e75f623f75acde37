//! Real-time peer-mesh session layer for multi-party video meetings
//!
//! This crate establishes and maintains a full mesh of direct peer media
//! connections among meeting participants, coordinated over a persistent
//! duplex signaling channel that also carries presence/control/chat events.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  MeetingSession (scoped service, one per meeting)        │
//! │  ├─ SignalingClient (WebSocket: heartbeat, reconnect,    │
//! │  │                   typed publish/subscribe dispatch)   │
//! │  ├─ PeerRegistry (one PeerSession per remote id)         │
//! │  │   └─ PeerSession (offer/answer, glare resolution,     │
//! │  │                   renegotiation, ICE restart)         │
//! │  └─ LocalMediaController (degrade ladder, track toggles) │
//! │       ↑ read-shared by all sessions                      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Topology is strictly peer-mesh: every participant pair holds a direct
//! connection, no media relay. Roster membership, HTTP bindings and UI are
//! external collaborators.
//!
//! # Example
//!
//! ```no_run
//! use conclave::{MeetingSession, SessionConfig, StaticIdentity, SyntheticCapture};
//! use std::sync::Arc;
//!
//! # async fn example() -> conclave::Result<()> {
//! let config = SessionConfig::default().with_signaling_url("wss://meet.example.com/ws");
//! let identity = Arc::new(StaticIdentity::new("u-42", "Alice", "token"));
//! let device = Arc::new(SyntheticCapture::new());
//!
//! let (session, mut events) = MeetingSession::start(config, identity, device, "m-7").await?;
//! session.start_local_media(true, true).await;
//! session.connect_to("u-43").await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! session.dispose().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod identity;
pub mod media;
pub mod meeting;
pub mod peer;
pub mod signaling;

pub use config::{SessionConfig, TurnServerConfig, VideoConstraints};
pub use error::{Error, Result};
pub use identity::{IdentityProvider, StaticIdentity};
pub use media::{
    AcquisitionMode, CaptureDevice, CaptureError, CaptureRequest, CaptureStream,
    LocalMediaController, LocalStream, SyntheticCapture,
};
pub use meeting::MeetingSession;
pub use peer::{
    NegotiationRole, PeerRegistry, PeerSession, SessionContext, SessionEvent, SessionState,
};
pub use signaling::{
    DeliveryStatus, MessageType, RecipientScope, SignalingClient, SignalingMessage,
    SignalingSender, Subscription, TransportState,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
