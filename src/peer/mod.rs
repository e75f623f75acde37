//! Peer mesh: per-remote negotiation state machine and session registry

pub mod registry;
pub mod session;

use std::fmt;
use std::sync::Arc;
use webrtc::track::track_remote::TrackRemote;

pub use registry::PeerRegistry;
pub use session::{yields_to, NegotiationRole, PeerSession, SessionContext, SessionState};

/// Application-facing events emitted by the peer mesh
#[derive(Clone)]
pub enum SessionEvent {
    /// The remote side added a media track
    RemoteTrack {
        /// Remote participant id
        remote_id: String,
        /// The incoming track
        track: Arc<TrackRemote>,
    },

    /// A session was torn down; emitted exactly once per teardown
    StreamRemoved {
        /// Remote participant id
        remote_id: String,
    },

    /// A session changed lifecycle state
    StateChanged {
        /// Remote participant id
        remote_id: String,
        /// The new state
        state: SessionState,
    },
}

impl fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::RemoteTrack { remote_id, track } => f
                .debug_struct("RemoteTrack")
                .field("remote_id", remote_id)
                .field("kind", &track.kind())
                .finish(),
            SessionEvent::StreamRemoved { remote_id } => f
                .debug_struct("StreamRemoved")
                .field("remote_id", remote_id)
                .finish(),
            SessionEvent::StateChanged { remote_id, state } => f
                .debug_struct("StateChanged")
                .field("remote_id", remote_id)
                .field("state", state)
                .finish(),
        }
    }
}
