//! Per-remote peer connection state machine
//!
//! One `PeerSession` per remote participant. It exclusively owns the
//! underlying `RTCPeerConnection` and drives the offer/answer exchange over
//! the signaling channel, including glare resolution, receive-only
//! renegotiation and a single ICE-restart recovery attempt.
//!
//! Operations interleave at suspension points (media waits, description
//! setting); resumed logic re-checks session state rather than assuming it
//! survived the yield.

use crate::config::SessionConfig;
use crate::media::LocalMediaController;
use crate::peer::SessionEvent;
use crate::signaling::{SignalingMessage, SignalingSender};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, negotiation not yet started
    New,
    /// Local offer sent, waiting for the answer
    Offering,
    /// Answering an inbound offer
    Answering,
    /// Media path established
    Connected,
    /// Transport interrupted; recoverable without renegotiating
    Disconnected,
    /// Terminal failure
    Failed,
    /// Terminal, torn down
    Closed,
}

impl SessionState {
    /// Whether the session is in an active phase
    ///
    /// Initiating toward a peer whose session is active is a no-op; only
    /// terminal (or interrupted) sessions get replaced.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::New
                | SessionState::Offering
                | SessionState::Answering
                | SessionState::Connected
        )
    }
}

/// Which side of the offer/answer exchange this session currently plays
///
/// Mutable: glare resolution and renegotiation can flip it mid-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    /// This side sent the offer
    Offerer,
    /// This side answers the remote offer
    Answerer,
}

/// Shared dependencies injected into every session
pub struct SessionContext {
    /// Session configuration (timings, ICE servers)
    pub config: SessionConfig,
    /// Meeting the mesh belongs to
    pub meeting_id: String,
    /// Local participant id
    pub local_id: String,
    /// Outbound signaling seam
    pub transport: Arc<dyn SignalingSender>,
    /// Local media controller (read-shared by all sessions)
    pub media: Arc<LocalMediaController>,
    /// Application-facing event stream
    pub events: mpsc::UnboundedSender<SessionEvent>,
}

/// Decide glare: `true` when the local side must discard its own offer and
/// accept the remote one
///
/// Pinned to byte-sequence order of the participant ids, which is total and
/// identical on every client, so both sides of a simultaneous offer race
/// reach the same verdict without coordination. The lower-sorting side
/// yields.
pub fn yields_to(local_id: &str, remote_id: &str) -> bool {
    local_id.as_bytes() < remote_id.as_bytes()
}

/// Negotiation unit for one remote participant
pub struct PeerSession {
    remote_id: String,
    ctx: Arc<SessionContext>,
    pc: Arc<RTCPeerConnection>,
    state: Arc<RwLock<SessionState>>,
    role: Arc<RwLock<NegotiationRole>>,
    last_offer_at: RwLock<Option<Instant>>,
    senders: RwLock<Vec<Arc<webrtc::rtp_transceiver::rtp_sender::RTCRtpSender>>>,
    answered_receive_only: AtomicBool,
    renegotiation_scheduled: AtomicBool,
    ice_restart_attempted: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl PeerSession {
    /// Create a session and its underlying peer connection
    pub async fn connect(remote_id: String, ctx: Arc<SessionContext>) -> Result<Arc<Self>> {
        info!(remote_id = %remote_id, "creating peer session");

        let pc = Arc::new(build_peer_connection(&ctx.config).await?);
        let state = Arc::new(RwLock::new(SessionState::New));
        let role = Arc::new(RwLock::new(NegotiationRole::Offerer));
        let ice_restart_attempted = Arc::new(AtomicBool::new(false));

        // Trickle local ICE candidates to the remote as they surface.
        {
            let ctx = Arc::clone(&ctx);
            let remote = remote_id.clone();
            pc.on_ice_candidate(Box::new(move |candidate| {
                let ctx = Arc::clone(&ctx);
                let remote = remote.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        debug!(remote_id = %remote, "ICE gathering complete");
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => match SignalingMessage::ice_candidate(
                            &ctx.meeting_id,
                            &ctx.local_id,
                            &remote,
                            &init,
                        ) {
                            Ok(msg) => ctx.transport.send(&msg),
                            Err(e) => warn!(remote_id = %remote, error = %e, "ICE candidate message"),
                        },
                        Err(e) => warn!(remote_id = %remote, error = %e, "ICE candidate serialization"),
                    }
                })
            }));
        }

        // Surface remote tracks to the application.
        {
            let events = ctx.events.clone();
            let remote = remote_id.clone();
            pc.on_track(Box::new(move |track, _receiver, _transceiver| {
                let events = events.clone();
                let remote = remote.clone();
                Box::pin(async move {
                    debug!(remote_id = %remote, kind = %track.kind(), "remote track added");
                    let _ = events.send(SessionEvent::RemoteTrack {
                        remote_id: remote,
                        track,
                    });
                })
            }));
        }

        // Track connection health. A failed connection gets exactly one local
        // ICE-restart attempt on the existing connection; further failure is
        // terminal and only logged.
        {
            let ctx = Arc::clone(&ctx);
            let remote = remote_id.clone();
            let state = Arc::clone(&state);
            let role = Arc::clone(&role);
            let restarted = Arc::clone(&ice_restart_attempted);
            // Weak: the connection owns this handler, a strong handle here
            // would cycle and leak it.
            let pc_weak = Arc::downgrade(&pc);
            pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let ctx = Arc::clone(&ctx);
                let remote = remote.clone();
                let state = Arc::clone(&state);
                let role = Arc::clone(&role);
                let restarted = Arc::clone(&restarted);
                let pc_weak = pc_weak.clone();
                Box::pin(async move {
                    match s {
                        RTCPeerConnectionState::Connected => {
                            transition(&state, &ctx.events, &remote, SessionState::Connected).await;
                        }
                        RTCPeerConnectionState::Disconnected => {
                            warn!(remote_id = %remote, "peer connection interrupted");
                            transition(&state, &ctx.events, &remote, SessionState::Disconnected)
                                .await;
                        }
                        RTCPeerConnectionState::Failed => {
                            if !restarted.swap(true, Ordering::SeqCst) {
                                warn!(remote_id = %remote, "peer connection failed, attempting ICE restart");
                                let Some(pc) = pc_weak.upgrade() else {
                                    return;
                                };
                                *role.write().await = NegotiationRole::Offerer;
                                if let Err(e) =
                                    send_restart_offer(&pc, &ctx, &remote).await
                                {
                                    warn!(remote_id = %remote, error = %e, "ICE restart offer failed");
                                }
                            } else {
                                error!(remote_id = %remote, "peer connection failed terminally");
                                transition(&state, &ctx.events, &remote, SessionState::Failed)
                                    .await;
                            }
                        }
                        _ => {}
                    }
                })
            }));
        }

        Ok(Arc::new(Self {
            remote_id,
            ctx,
            pc,
            state,
            role,
            last_offer_at: RwLock::new(None),
            senders: RwLock::new(Vec::new()),
            answered_receive_only: AtomicBool::new(false),
            renegotiation_scheduled: AtomicBool::new(false),
            ice_restart_attempted,
            closed: AtomicBool::new(false),
        }))
    }

    /// Remote participant id this session negotiates with
    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    /// Current lifecycle state
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Current negotiation role
    pub async fn role(&self) -> NegotiationRole {
        *self.role.read().await
    }

    /// When the last local offer was sent, if any
    pub async fn last_offer_at(&self) -> Option<Instant> {
        *self.last_offer_at.read().await
    }

    /// Number of active local RTP senders
    pub async fn sender_count(&self) -> usize {
        self.senders.read().await.len()
    }

    /// Attach the current local tracks to the connection
    ///
    /// Returns the number of newly attached tracks; zero when there is no
    /// local stream yet or senders already exist (tracks are attached once
    /// per session, never duplicated).
    pub async fn attach_local_tracks(&self) -> usize {
        let Some(stream) = self.ctx.media.current_stream().await else {
            return 0;
        };
        let mut senders = self.senders.write().await;
        if !senders.is_empty() {
            return 0;
        }
        let mut attached = 0;
        for track in stream.tracks() {
            match self
                .pc
                .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
            {
                Ok(sender) => {
                    senders.push(sender);
                    attached += 1;
                }
                Err(e) => warn!(remote_id = %self.remote_id, error = %e, "adding local track"),
            }
        }
        debug!(remote_id = %self.remote_id, attached, "local tracks attached");
        attached
    }

    /// Run the outbound initiation path
    ///
    /// Waits up to the outbound deadline for local media, then proceeds
    /// anyway with a receive-only offer rather than block the connection.
    pub async fn start_as_offerer(&self) -> Result<()> {
        self.ctx
            .media
            .wait_until_settled(self.ctx.config.outbound_media_wait())
            .await;
        if self.state().await == SessionState::Closed {
            // Removed while waiting for media.
            return Ok(());
        }
        self.attach_local_tracks().await;
        self.send_offer(false).await
    }

    /// Create and send a local offer
    async fn send_offer(&self, ice_restart: bool) -> Result<()> {
        *self.role.write().await = NegotiationRole::Offerer;

        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });
        let offer = self
            .pc
            .create_offer(options)
            .await
            .map_err(|e| Error::Negotiation(format!("create offer: {}", e)))?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| Error::Negotiation(format!("set local offer: {}", e)))?;
        let desc = self.pc.local_description().await.ok_or_else(|| {
            Error::Negotiation("no local description after setting offer".to_string())
        })?;

        let msg = SignalingMessage::offer(
            &self.ctx.meeting_id,
            &self.ctx.local_id,
            &self.remote_id,
            &desc,
        )?;

        *self.last_offer_at.write().await = Some(Instant::now());
        if self.state().await == SessionState::New {
            self.transition_to(SessionState::Offering).await;
        }

        debug!(remote_id = %self.remote_id, ice_restart, "sending offer");
        self.ctx.transport.send(&msg);
        Ok(())
    }

    /// Answer an inbound offer on this session's connection
    ///
    /// Waits up to the inbound deadline for local media (inbound is
    /// reactive, so it gets more slack than outbound), then answers with
    /// whatever tracks exist.
    pub async fn handle_offer(&self, msg: &SignalingMessage) -> Result<()> {
        let offer = msg.session_description()?;

        self.ctx
            .media
            .wait_until_settled(self.ctx.config.inbound_media_wait())
            .await;
        if self.state().await == SessionState::Closed {
            // Removed while waiting for media.
            return Ok(());
        }

        *self.role.write().await = NegotiationRole::Answerer;
        if self.state().await == SessionState::New {
            self.transition_to(SessionState::Answering).await;
        }

        self.attach_local_tracks().await;

        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::Negotiation(format!("set remote offer: {}", e)))?;
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("create answer: {}", e)))?;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| Error::Negotiation(format!("set local answer: {}", e)))?;
        let desc = self.pc.local_description().await.ok_or_else(|| {
            Error::Negotiation("no local description after setting answer".to_string())
        })?;

        let reply = SignalingMessage::answer(
            &self.ctx.meeting_id,
            &self.ctx.local_id,
            &self.remote_id,
            &desc,
        )?;
        debug!(remote_id = %self.remote_id, "sending answer");
        self.ctx.transport.send(&reply);

        if self.senders.read().await.is_empty() {
            // Receive-only answer: remember it so a later local media
            // arrival can schedule the follow-up offer.
            self.answered_receive_only.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Apply an inbound answer to the local offer
    pub async fn handle_answer(&self, msg: &SignalingMessage) -> Result<()> {
        if *self.role.read().await != NegotiationRole::Offerer {
            debug!(remote_id = %self.remote_id, "dropping answer, not the offering side");
            return Ok(());
        }
        let answer = msg.session_description()?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::Negotiation(format!("set remote answer: {}", e)))?;
        Ok(())
    }

    /// Apply a trickled remote ICE candidate
    pub async fn handle_ice_candidate(&self, msg: &SignalingMessage) -> Result<()> {
        let init = msg.ice_candidate_init()?;
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidate(format!("add candidate: {}", e)))?;
        Ok(())
    }

    /// Schedule the receive-only renegotiation follow-up, at most once
    ///
    /// No-op unless this session answered a receive-only offer. The delayed
    /// offer reuses the same connection and is skipped if senders appeared
    /// in the meantime; the scheduled flag guarantees at most one follow-up
    /// no matter how often the local-media-ready trigger fires.
    pub fn maybe_schedule_renegotiation(self: &Arc<Self>) {
        if !self.answered_receive_only.load(Ordering::SeqCst) {
            return;
        }
        if self.renegotiation_scheduled.swap(true, Ordering::SeqCst) {
            debug!(remote_id = %self.remote_id, "renegotiation already scheduled");
            return;
        }

        let session = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(session.ctx.config.renegotiation_delay()).await;
            if !session.state().await.is_active() {
                return;
            }
            if session.ctx.media.current_stream().await.is_none() {
                return;
            }
            if session.attach_local_tracks().await == 0 {
                debug!(remote_id = %session.remote_id, "senders already exist, skipping follow-up offer");
                return;
            }
            info!(remote_id = %session.remote_id, "sending follow-up offer with local tracks");
            if let Err(e) = session.send_offer(false).await {
                warn!(remote_id = %session.remote_id, error = %e, "follow-up offer failed");
            }
        });
    }

    /// Tear the session down
    ///
    /// Closes the underlying connection and emits exactly one
    /// `StreamRemoved`; repeat calls are no-ops.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(remote_id = %self.remote_id, "closing peer session");
        self.transition_to(SessionState::Closed).await;
        if let Err(e) = self.pc.close().await {
            warn!(remote_id = %self.remote_id, error = %e, "closing peer connection");
        }
        let _ = self.ctx.events.send(SessionEvent::StreamRemoved {
            remote_id: self.remote_id.clone(),
        });
    }

    async fn transition_to(&self, new_state: SessionState) {
        transition(&self.state, &self.ctx.events, &self.remote_id, new_state).await;
    }
}

/// Apply a state transition, log it and notify the application
///
/// `Closed` is terminal: nothing leaves it.
async fn transition(
    state: &RwLock<SessionState>,
    events: &mpsc::UnboundedSender<SessionEvent>,
    remote_id: &str,
    new_state: SessionState,
) {
    let mut guard = state.write().await;
    let old_state = *guard;
    if old_state == new_state || old_state == SessionState::Closed {
        return;
    }
    debug!(
        remote_id = %remote_id,
        "session state transition: {:?} -> {:?}",
        old_state, new_state
    );
    *guard = new_state;
    drop(guard);
    let _ = events.send(SessionEvent::StateChanged {
        remote_id: remote_id.to_string(),
        state: new_state,
    });
}

/// One ICE-restart offer on the existing connection
async fn send_restart_offer(
    pc: &Arc<RTCPeerConnection>,
    ctx: &Arc<SessionContext>,
    remote_id: &str,
) -> Result<()> {
    let offer = pc
        .create_offer(Some(RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        }))
        .await
        .map_err(|e| Error::Negotiation(format!("ICE restart offer: {}", e)))?;
    pc.set_local_description(offer)
        .await
        .map_err(|e| Error::Negotiation(format!("set restart offer: {}", e)))?;
    let desc = pc.local_description().await.ok_or_else(|| {
        Error::Negotiation("no local description after restart offer".to_string())
    })?;
    let msg = SignalingMessage::offer(&ctx.meeting_id, &ctx.local_id, remote_id, &desc)?;
    ctx.transport.send(&msg);
    Ok(())
}

/// Build a peer connection with the configured ICE servers
async fn build_peer_connection(config: &SessionConfig) -> Result<RTCPeerConnection> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| Error::PeerConnection(format!("register codecs: {}", e)))?;

    let interceptor_registry = register_default_interceptors(Default::default(), &mut media_engine)
        .map_err(|e| Error::PeerConnection(format!("register interceptors: {}", e)))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(interceptor_registry)
        .build();

    let ice_servers: Vec<RTCIceServer> = config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .chain(config.turn_servers.iter().map(|turn| {
            #[allow(clippy::needless_update)]
            RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }
        }))
        .collect();

    let rtc_config = RTCConfiguration {
        ice_servers,
        ..Default::default()
    };

    api.new_peer_connection(rtc_config)
        .await
        .map_err(|e| Error::PeerConnection(format!("create peer connection: {}", e)))
}
