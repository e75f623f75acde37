//! Meeting session service
//!
//! Explicitly scoped wiring of transport, registry and media controller:
//! created at meeting entry, disposed at exit, injected with its
//! collaborators. No global singletons, so isolated instances can coexist
//! (tests, multiple meeting contexts).

use crate::config::SessionConfig;
use crate::identity::IdentityProvider;
use crate::media::{AcquisitionMode, CaptureDevice, LocalMediaController};
use crate::peer::{PeerRegistry, SessionContext, SessionEvent};
use crate::signaling::{
    MessageType, SignalingClient, SignalingMessage, SignalingSender, Subscription,
};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// One meeting's real-time session layer
pub struct MeetingSession {
    meeting_id: String,
    identity: Arc<dyn IdentityProvider>,
    transport: Arc<SignalingClient>,
    media: Arc<LocalMediaController>,
    registry: Arc<PeerRegistry>,
    subscriptions: StdMutex<Vec<Subscription>>,
    disposed: AtomicBool,
}

impl MeetingSession {
    /// Initialize the session layer for one meeting
    ///
    /// Connects the signaling transport and wires negotiation dispatch into
    /// the peer registry. Returns the service and the stream of
    /// application-facing session events.
    pub async fn start(
        config: SessionConfig,
        identity: Arc<dyn IdentityProvider>,
        device: Arc<dyn CaptureDevice>,
        meeting_id: &str,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>)> {
        config.validate()?;

        let transport = Arc::new(SignalingClient::new(config.clone(), Arc::clone(&identity)));
        transport.connect().await?;

        let media = Arc::new(LocalMediaController::new(device, &config));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let ctx = Arc::new(SessionContext {
            config,
            meeting_id: meeting_id.to_string(),
            local_id: identity.user_id(),
            transport: Arc::clone(&transport) as Arc<dyn SignalingSender>,
            media: Arc::clone(&media),
            events: events_tx,
        });
        let registry = Arc::new(PeerRegistry::new(ctx));

        let session = Arc::new(Self {
            meeting_id: meeting_id.to_string(),
            identity,
            transport,
            media,
            registry,
            subscriptions: StdMutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        });
        session.wire_negotiation_dispatch();

        info!(meeting_id = %meeting_id, "meeting session started");
        Ok((session, events_rx))
    }

    fn wire_negotiation_dispatch(&self) {
        let offer_sub = {
            let registry = Arc::clone(&self.registry);
            self.transport.subscribe(MessageType::Offer, move |msg| {
                let registry = Arc::clone(&registry);
                Box::pin(async move {
                    if let Err(e) = registry.handle_offer(&msg).await {
                        // Per-peer negotiation errors stay isolated to that peer.
                        warn!(error = %e, "inbound offer failed");
                    }
                })
            })
        };
        let answer_sub = {
            let registry = Arc::clone(&self.registry);
            self.transport.subscribe(MessageType::Answer, move |msg| {
                let registry = Arc::clone(&registry);
                Box::pin(async move {
                    if let Err(e) = registry.handle_answer(&msg).await {
                        warn!(error = %e, "inbound answer failed");
                    }
                })
            })
        };
        let ice_sub = {
            let registry = Arc::clone(&self.registry);
            self.transport
                .subscribe(MessageType::IceCandidate, move |msg| {
                    let registry = Arc::clone(&registry);
                    Box::pin(async move {
                        if let Err(e) = registry.handle_ice_candidate(&msg).await {
                            warn!(error = %e, "inbound ICE candidate failed");
                        }
                    })
                })
        };

        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend([offer_sub, answer_sub, ice_sub]);
    }

    /// The meeting this session belongs to
    pub fn meeting_id(&self) -> &str {
        &self.meeting_id
    }

    /// The signaling transport
    pub fn transport(&self) -> &Arc<SignalingClient> {
        &self.transport
    }

    /// The local media controller
    pub fn media(&self) -> &Arc<LocalMediaController> {
        &self.media
    }

    /// The peer session registry
    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Acquire local media through the degrade ladder
    ///
    /// When anything was captured, sessions that answered receive-only get
    /// their follow-up offer scheduled.
    pub async fn start_local_media(&self, video: bool, audio: bool) -> AcquisitionMode {
        let mode = self.media.acquire(video, audio).await;
        if self.media.current_stream().await.is_some() {
            self.registry.renegotiate_receive_only().await;
        }
        mode
    }

    /// Open (or keep) a mesh connection toward a participant
    ///
    /// Driven by the external roster collaborator on join notifications.
    /// No-op when an active session already exists.
    pub async fn connect_to(&self, remote_id: &str) -> Result<()> {
        self.registry.initiate(remote_id).await
    }

    /// Tear down the mesh connection toward a participant
    ///
    /// Driven by the external roster collaborator on leave notifications.
    /// Idempotent.
    pub async fn disconnect_from(&self, remote_id: &str) {
        self.registry.remove(remote_id).await;
    }

    /// Flip local video and broadcast the change to the room
    pub async fn set_video_enabled(&self, enabled: bool) {
        self.media.toggle_video(enabled).await;
        self.transport.send(&SignalingMessage::video_state_change(
            &self.meeting_id,
            &self.identity.user_id(),
            enabled,
        ));
    }

    /// Flip local audio; no renegotiation, no broadcast
    pub async fn set_audio_enabled(&self, enabled: bool) {
        self.media.toggle_audio(enabled).await;
    }

    /// Announce this participant to the meeting room
    pub fn send_join_room(&self) {
        self.transport.send(&SignalingMessage::join_room(
            &self.meeting_id,
            &self.identity.user_id(),
            &self.identity.display_name(),
        ));
    }

    /// Announce leaving the meeting room
    pub fn send_exit_room(&self) {
        self.transport.send(&SignalingMessage::exit_room(
            &self.meeting_id,
            &self.identity.user_id(),
        ));
    }

    /// Announce the end of the meeting (host only; enforcement is server-side)
    pub fn finish_meeting(&self) {
        self.transport.send(&SignalingMessage::finish_meeting(
            &self.meeting_id,
            &self.identity.user_id(),
        ));
    }

    /// Send a text chat message to the room
    pub fn send_chat_text(&self, text: &str) {
        self.transport.send(&SignalingMessage::chat_text(
            &self.meeting_id,
            &self.identity.user_id(),
            &self.identity.display_name(),
            text,
        ));
    }

    /// Forward a regained-foreground signal to the heartbeat
    pub fn notify_foreground(&self) {
        self.transport.notify_foreground();
    }

    /// Tear everything down: sessions, capture, subscriptions, transport
    ///
    /// Idempotent; the service is unusable afterwards.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(meeting_id = %self.meeting_id, "disposing meeting session");
        self.registry.remove_all().await;
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.transport.disconnect();
    }
}
