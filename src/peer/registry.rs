//! Peer session registry
//!
//! One negotiation unit per remote participant: create/lookup/teardown plus
//! the inbound signaling routing (including glare arbitration) that decides
//! which session a message lands on.

use crate::media::LocalMediaController;
use crate::peer::session::{yields_to, PeerSession, SessionContext, SessionState};
use crate::signaling::SignalingMessage;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Registry of active peer sessions, keyed by remote participant id
pub struct PeerRegistry {
    ctx: Arc<SessionContext>,
    sessions: RwLock<HashMap<String, Arc<PeerSession>>>,
}

impl PeerRegistry {
    /// Create an empty registry over the shared session context
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self {
            ctx,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// The media controller shared by all sessions
    pub fn media(&self) -> &Arc<LocalMediaController> {
        &self.ctx.media
    }

    /// Get the session for a remote id, creating it if absent
    ///
    /// The write lock is held across session creation, so at most one
    /// session per remote id can ever exist.
    pub async fn get_or_create(&self, remote_id: &str) -> Result<Arc<PeerSession>> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(remote_id) {
            return Ok(Arc::clone(existing));
        }
        let session = PeerSession::connect(remote_id.to_string(), Arc::clone(&self.ctx)).await?;
        sessions.insert(remote_id.to_string(), Arc::clone(&session));
        Ok(session)
    }

    /// Initiate an outbound connection toward a remote participant
    ///
    /// No-op when an active session to the same remote already exists;
    /// never a second connection to the same peer. A terminal or
    /// interrupted leftover session is replaced.
    pub async fn initiate(&self, remote_id: &str) -> Result<()> {
        if let Some(existing) = self.lookup(remote_id).await {
            if existing.state().await.is_active() {
                debug!(remote_id = %remote_id, "session already active, initiation is a no-op");
                return Ok(());
            }
            info!(remote_id = %remote_id, "replacing defunct session");
            self.remove(remote_id).await;
        }

        let session = self.get_or_create(remote_id).await?;
        session.start_as_offerer().await
    }

    /// Route an inbound offer, resolving glare when needed
    pub async fn handle_offer(&self, msg: &SignalingMessage) -> Result<()> {
        let Some(remote_id) = msg.sender_id.clone() else {
            debug!("dropping offer without sender id");
            return Ok(());
        };
        // Reject undecodable payloads before touching any session state.
        msg.session_description()?;

        if let Some(existing) = self.lookup(&remote_id).await {
            let state = existing.state().await;
            if state == SessionState::Offering {
                // Glare: both sides offered at once. Byte order of the two
                // participant ids decides; the lower-sorting side yields.
                if yields_to(&self.ctx.local_id, &remote_id) {
                    info!(remote_id = %remote_id, "glare: yielding to remote offer");
                    self.remove(&remote_id).await;
                } else {
                    info!(remote_id = %remote_id, "glare: ignoring remote offer, continuing own");
                    return Ok(());
                }
            } else if !state.is_active() {
                info!(remote_id = %remote_id, ?state, "replacing defunct session for inbound offer");
                self.remove(&remote_id).await;
            } else {
                // Renegotiation offer on the existing connection.
                return existing.handle_offer(msg).await;
            }
        }

        let session = self.get_or_create(&remote_id).await?;
        session.handle_offer(msg).await
    }

    /// Route an inbound answer
    pub async fn handle_answer(&self, msg: &SignalingMessage) -> Result<()> {
        let Some(remote_id) = msg.sender_id.as_deref() else {
            debug!("dropping answer without sender id");
            return Ok(());
        };
        match self.lookup(remote_id).await {
            Some(session) => session.handle_answer(msg).await,
            None => {
                debug!(remote_id = %remote_id, "dropping answer for unknown session");
                Ok(())
            }
        }
    }

    /// Route an inbound ICE candidate
    pub async fn handle_ice_candidate(&self, msg: &SignalingMessage) -> Result<()> {
        let Some(remote_id) = msg.sender_id.as_deref() else {
            debug!("dropping ICE candidate without sender id");
            return Ok(());
        };
        match self.lookup(remote_id).await {
            Some(session) => session.handle_ice_candidate(msg).await,
            None => {
                debug!(remote_id = %remote_id, "dropping ICE candidate for unknown session");
                Ok(())
            }
        }
    }

    /// Fan the local-media-ready condition out to receive-only answerers
    ///
    /// Each eligible session schedules at most one delayed follow-up offer.
    pub async fn renegotiate_receive_only(&self) {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            session.maybe_schedule_renegotiation();
        }
    }

    /// Remove a session and tear down its connection
    ///
    /// Idempotent: removing an unknown id is a no-op. Exactly one
    /// stream-removed notification is emitted per torn-down session.
    pub async fn remove(&self, remote_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(remote_id);
        match removed {
            Some(session) => {
                session.close().await;
                true
            }
            None => false,
        }
    }

    /// Tear down every session and stop local capture
    pub async fn remove_all(&self) {
        let drained: Vec<_> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().collect()
        };
        if !drained.is_empty() {
            info!(count = drained.len(), "tearing down all peer sessions");
        }
        for (remote_id, session) in drained {
            debug!(remote_id = %remote_id, "closing session");
            session.close().await;
        }
        self.ctx.media.stop().await;
    }

    /// Whether a session exists for the remote id
    pub async fn has_session(&self, remote_id: &str) -> bool {
        self.sessions.read().await.contains_key(remote_id)
    }

    /// Number of sessions currently held
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn lookup(&self, remote_id: &str) -> Option<Arc<PeerSession>> {
        self.sessions.read().await.get(remote_id).cloned()
    }
}

impl Drop for PeerRegistry {
    fn drop(&mut self) {
        let count = self
            .sessions
            .try_read()
            .map(|sessions| sessions.len())
            .unwrap_or(0);
        if count > 0 {
            warn!(count, "registry dropped with live sessions");
        }
    }
}
