//! WebSocket signaling client
//!
//! One duplex connection to the signaling endpoint carrying negotiation,
//! presence/control and chat traffic. Provides idempotent connect with a
//! bounded open timeout, fire-and-forget send (messages are dropped, not
//! queued, while the socket is down), typed publish/subscribe dispatch,
//! heartbeating, and bounded reconnection on unclean closes.

use crate::config::SessionConfig;
use crate::identity::IdentityProvider;
use crate::signaling::protocol::{
    MessageType, SignalingMessage, HEARTBEAT_PING, KEEPALIVE_REPLIES,
};
use crate::signaling::SignalingSender;
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock, Weak};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, trace, warn};

/// Transport connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Never connected
    Idle,
    /// Connection attempt in flight
    Connecting,
    /// Socket open
    Open,
    /// Socket closed (after a disconnect, failure or exhausted reconnects)
    Closed,
}

type Handler = Arc<dyn Fn(SignalingMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Disposable handle for one registered message handler
///
/// Dropping the handle (or calling [`Subscription::dispose`]) removes the
/// handler; there is no identity-based off-registration to get wrong.
pub struct Subscription {
    message_type: MessageType,
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    /// Remove the handler now
    pub fn dispose(self) {
        // Removal happens in Drop.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut handlers = inner.handlers.write().unwrap_or_else(|e| e.into_inner());
            if let Some(list) = handlers.get_mut(&self.message_type) {
                list.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

struct Inner {
    config: SessionConfig,
    identity: Arc<dyn IdentityProvider>,
    state_tx: watch::Sender<TransportState>,
    handlers: StdRwLock<HashMap<MessageType, Vec<(u64, Handler)>>>,
    next_subscription: AtomicU64,
    outbound: StdRwLock<Option<mpsc::UnboundedSender<WsMessage>>>,
    reconnect_attempts: AtomicU32,
    manual_close: AtomicBool,
    connect_gate: Mutex<()>,
    io_tasks: StdMutex<Vec<JoinHandle<()>>>,
    reconnect_task: StdMutex<Option<JoinHandle<()>>>,
}

/// WebSocket signaling client
pub struct SignalingClient {
    inner: Arc<Inner>,
}

impl SignalingClient {
    /// Create a client; no connection is attempted until [`connect`]
    ///
    /// [`connect`]: SignalingClient::connect
    pub fn new(config: SessionConfig, identity: Arc<dyn IdentityProvider>) -> Self {
        let (state_tx, _) = watch::channel(TransportState::Idle);
        Self {
            inner: Arc::new(Inner {
                config,
                identity,
                state_tx,
                handlers: StdRwLock::new(HashMap::new()),
                next_subscription: AtomicU64::new(1),
                outbound: StdRwLock::new(None),
                reconnect_attempts: AtomicU32::new(0),
                manual_close: AtomicBool::new(false),
                connect_gate: Mutex::new(()),
                io_tasks: StdMutex::new(Vec::new()),
                reconnect_task: StdMutex::new(None),
            }),
        }
    }

    /// Connect to the signaling endpoint
    ///
    /// Idempotent: already open returns immediately, and a call arriving
    /// while another attempt is in flight awaits and shares that attempt's
    /// outcome.
    ///
    /// # Errors
    ///
    /// `Error::MissingCredential` when the identity provider has no auth
    /// token, `Error::TransportTimeout` when the socket does not open
    /// within the configured timeout, `Error::Transport` on socket errors.
    pub async fn connect(&self) -> Result<()> {
        self.inner.manual_close.store(false, Ordering::SeqCst);

        match *self.inner.state_tx.borrow() {
            TransportState::Open => return Ok(()),
            TransportState::Connecting => {
                // Share the in-flight attempt's outcome.
                let mut rx = self.inner.state_tx.subscribe();
                return match rx.wait_for(|s| *s != TransportState::Connecting).await {
                    Ok(state) if *state == TransportState::Open => Ok(()),
                    _ => Err(Error::Transport(
                        "shared connection attempt failed".to_string(),
                    )),
                };
            }
            TransportState::Idle | TransportState::Closed => {}
        }

        let _gate = self.inner.connect_gate.lock().await;
        if *self.inner.state_tx.borrow() == TransportState::Open {
            return Ok(());
        }
        Inner::attempt(Arc::clone(&self.inner)).await
    }

    /// Close the connection and suppress reconnection
    ///
    /// Cancels any pending reconnect and resets the attempt counter; a
    /// later explicit [`connect`] starts fresh.
    ///
    /// [`connect`]: SignalingClient::connect
    pub fn disconnect(&self) {
        info!("disconnecting signaling client");
        self.inner.manual_close.store(true, Ordering::SeqCst);

        if let Some(task) = self
            .inner
            .reconnect_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);

        // Best-effort close handshake, then drop the socket tasks.
        if let Some(tx) = self
            .inner
            .outbound
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            let _ = tx.send(WsMessage::Close(None));
        }
        Inner::shutdown_io(&self.inner);
        self.inner.state_tx.send_replace(TransportState::Closed);
    }

    /// Send a message, fire-and-forget
    ///
    /// If the socket is not open the message is dropped with a warning;
    /// there is no queue, and callers must not assume delivery during
    /// reconnection. Never blocks, never errors.
    pub fn send(&self, msg: &SignalingMessage) {
        if *self.inner.state_tx.borrow() != TransportState::Open {
            warn!(
                message_type = ?msg.message_type,
                "signaling channel not open, dropping message"
            );
            return;
        }
        let json = match msg.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to encode signaling message");
                return;
            }
        };
        let outbound = self
            .inner
            .outbound
            .read()
            .unwrap_or_else(|e| e.into_inner());
        match outbound.as_ref() {
            Some(tx) => {
                if tx.send(WsMessage::Text(json)).is_err() {
                    warn!("signaling writer gone, message dropped");
                }
            }
            None => warn!("signaling channel not open, dropping message"),
        }
    }

    /// Register a handler for one message type
    ///
    /// Multiple handlers per type are invoked in registration order. The
    /// returned handle removes the handler when disposed or dropped.
    pub fn subscribe<F>(&self, message_type: MessageType, handler: F) -> Subscription
    where
        F: Fn(SignalingMessage) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let id = self.inner.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(message_type)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            message_type,
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Current transport state
    pub fn state(&self) -> TransportState {
        *self.inner.state_tx.borrow()
    }

    /// Watch transport state transitions
    pub fn state_changes(&self) -> watch::Receiver<TransportState> {
        self.inner.state_tx.subscribe()
    }

    /// Whether the socket is open
    pub fn is_connected(&self) -> bool {
        self.state() == TransportState::Open
    }

    /// Signal that the host regained foreground visibility
    ///
    /// Sends one extra heartbeat so a connection idled in the background
    /// proves liveness immediately.
    pub fn notify_foreground(&self) {
        if *self.inner.state_tx.borrow() != TransportState::Open {
            return;
        }
        if let Some(tx) = self
            .inner
            .outbound
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            debug!("foreground visibility regained, sending heartbeat");
            let _ = tx.send(WsMessage::Text(HEARTBEAT_PING.to_string()));
        }
    }
}

impl SignalingSender for SignalingClient {
    fn send(&self, msg: &SignalingMessage) {
        SignalingClient::send(self, msg);
    }
}

impl Inner {
    /// Run one connection attempt; on success install the socket tasks
    async fn attempt(inner: Arc<Inner>) -> Result<()> {
        let token = inner.identity.auth_token().ok_or(Error::MissingCredential)?;

        inner.state_tx.send_replace(TransportState::Connecting);
        let url = format!("{}?token={}", inner.config.signaling_url, token);
        debug!(url = %inner.config.signaling_url, "connecting to signaling endpoint");

        let connected =
            tokio::time::timeout(inner.config.connect_timeout(), connect_async(url)).await;
        let ws = match connected {
            Err(_) => {
                inner.state_tx.send_replace(TransportState::Closed);
                Inner::schedule_reconnect(&inner);
                return Err(Error::TransportTimeout(format!(
                    "no open within {:?}",
                    inner.config.connect_timeout()
                )));
            }
            Ok(Err(e)) => {
                inner.state_tx.send_replace(TransportState::Closed);
                Inner::schedule_reconnect(&inner);
                return Err(Error::Transport(format!("connect: {}", e)));
            }
            Ok(Ok((ws, _response))) => ws,
        };

        info!("signaling connection open");
        inner.reconnect_attempts.store(0, Ordering::SeqCst);

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WsMessage>();
        *inner.outbound.write().unwrap_or_else(|e| e.into_inner()) = Some(out_tx.clone());

        // Writer: drains the outbound channel into the socket.
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    debug!(error = %e, "signaling writer stopped");
                    break;
                }
            }
        });

        // Heartbeat: one ping immediately on open, then on the interval.
        let heartbeat = {
            let out_tx = out_tx.clone();
            let period = inner.config.heartbeat_interval();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    trace!("heartbeat");
                    if out_tx.send(WsMessage::Text(HEARTBEAT_PING.to_string())).is_err() {
                        break;
                    }
                }
            })
        };

        // Reader: dispatches inbound frames until the socket dies, then
        // decides whether the close was clean.
        let reader = {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                let mut clean = false;
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(WsMessage::Text(text)) => Inner::dispatch(&inner, &text),
                        Ok(WsMessage::Close(_)) => {
                            clean = true;
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "signaling socket error");
                            break;
                        }
                    }
                }
                Inner::handle_close(&inner, clean);
            })
        };

        {
            let mut tasks = inner.io_tasks.lock().unwrap_or_else(|e| e.into_inner());
            for stale in tasks.drain(..) {
                stale.abort();
            }
            tasks.extend([writer, heartbeat, reader]);
        }

        inner.state_tx.send_replace(TransportState::Open);
        Ok(())
    }

    /// Route one inbound text frame
    fn dispatch(inner: &Arc<Inner>, text: &str) {
        if KEEPALIVE_REPLIES.contains(&text) {
            trace!("keep-alive reply");
            return;
        }

        let msg = match SignalingMessage::from_json(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "dropping malformed signaling frame");
                return;
            }
        };

        let handlers: Vec<Handler> = inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&msg.message_type)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        // Handler futures start in registration order; long waits inside a
        // handler must not stall dispatch of later frames.
        for handler in handlers {
            tokio::spawn(handler(msg.clone()));
        }

        if msg.message_type == MessageType::ForceOffline {
            warn!("forced offline by server, clearing credentials");
            inner.identity.clear_credentials();
        }
    }

    /// React to the socket going away
    fn handle_close(inner: &Arc<Inner>, clean: bool) {
        *inner.outbound.write().unwrap_or_else(|e| e.into_inner()) = None;
        if *inner.state_tx.borrow() == TransportState::Open {
            inner.state_tx.send_replace(TransportState::Closed);
        }

        if inner.manual_close.load(Ordering::SeqCst) {
            debug!("socket closed after explicit disconnect");
            return;
        }
        if clean {
            info!("signaling connection closed cleanly");
            return;
        }
        warn!("signaling connection closed uncleanly");
        Inner::schedule_reconnect(inner);
    }

    /// Schedule one reconnect attempt after the configured delay
    ///
    /// Attempts are consecutive-bounded: the counter resets on any
    /// successful open, and once it passes the cap no further attempt is
    /// scheduled until an explicit connect.
    fn schedule_reconnect(inner: &Arc<Inner>) {
        if inner.manual_close.load(Ordering::SeqCst) {
            return;
        }
        let attempt = inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > inner.config.max_reconnect_attempts {
            warn!(
                attempts = attempt - 1,
                "max reconnect attempts reached, giving up"
            );
            return;
        }
        info!(
            attempt,
            max = inner.config.max_reconnect_attempts,
            delay = ?inner.config.reconnect_delay(),
            "scheduling reconnect"
        );

        let task = {
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                tokio::time::sleep(inner.config.reconnect_delay()).await;
                if inner.manual_close.load(Ordering::SeqCst) {
                    return;
                }
                let _gate = inner.connect_gate.lock().await;
                if *inner.state_tx.borrow() == TransportState::Open {
                    return;
                }
                // A failed attempt schedules the next retry itself.
                if let Err(e) = Inner::attempt(Arc::clone(&inner)).await {
                    warn!(error = %e, "reconnect attempt failed");
                }
            })
        };
        if let Some(previous) = inner
            .reconnect_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task)
        {
            previous.abort();
        }
    }

    fn shutdown_io(inner: &Arc<Inner>) {
        *inner.outbound.write().unwrap_or_else(|e| e.into_inner()) = None;
        let mut tasks = inner.io_tasks.lock().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.inner.manual_close.store(true, Ordering::SeqCst);
        if let Some(task) = self
            .inner
            .reconnect_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        Inner::shutdown_io(&self.inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentity;

    fn client() -> SignalingClient {
        SignalingClient::new(
            SessionConfig::default(),
            Arc::new(StaticIdentity::new("u1", "Alice", "tok")),
        )
    }

    #[tokio::test]
    async fn test_send_on_closed_transport_never_errors() {
        let c = client();
        let msg = SignalingMessage::exit_room("m1", "u1");
        // Not connected: the message is dropped, the call returns.
        c.send(&msg);
        assert_eq!(c.state(), TransportState::Idle);
    }

    #[tokio::test]
    async fn test_connect_without_token_fails_fast() {
        let c = SignalingClient::new(
            SessionConfig::default(),
            Arc::new(StaticIdentity::without_token("u1", "Alice")),
        );
        match c.connect().await {
            Err(Error::MissingCredential) => {}
            other => panic!("expected MissingCredential, got {:?}", other.err()),
        }
        // No socket was created, so no reconnect chain starts.
        assert_eq!(c.state(), TransportState::Idle);
    }

    #[tokio::test]
    async fn test_handlers_dispatch_in_registration_order() {
        let c = client();
        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();

        let tx1 = tx.clone();
        let _sub1 = c.subscribe(MessageType::ChatText, move |_msg| {
            let tx1 = tx1.clone();
            Box::pin(async move {
                let _ = tx1.send(1);
            })
        });
        let tx2 = tx.clone();
        let _sub2 = c.subscribe(MessageType::ChatText, move |_msg| {
            let tx2 = tx2.clone();
            Box::pin(async move {
                let _ = tx2.send(2);
            })
        });

        let msg = SignalingMessage::chat_text("m1", "u2", "Bob", "hi");
        Inner::dispatch(&c.inner, &msg.to_json().unwrap());

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_disposed_subscription_stops_receiving() {
        let c = client();
        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();

        let tx1 = tx.clone();
        let sub = c.subscribe(MessageType::ChatText, move |_msg| {
            let tx1 = tx1.clone();
            Box::pin(async move {
                let _ = tx1.send(1);
            })
        });
        sub.dispose();

        let msg = SignalingMessage::chat_text("m1", "u2", "Bob", "hi");
        Inner::dispatch(&c.inner, &msg.to_json().unwrap());
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_frames_are_swallowed() {
        let c = client();
        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();

        let tx1 = tx.clone();
        let _sub = c.subscribe(MessageType::ChatText, move |_msg| {
            let tx1 = tx1.clone();
            Box::pin(async move {
                let _ = tx1.send(1);
            })
        });

        // Malformed frames and keep-alive literals never reach handlers.
        Inner::dispatch(&c.inner, "{not json");
        Inner::dispatch(&c.inner, "pong");
        Inner::dispatch(&c.inner, "heart");
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        // A well-formed frame still does.
        let msg = SignalingMessage::chat_text("m1", "u2", "Bob", "hi");
        Inner::dispatch(&c.inner, &msg.to_json().unwrap());
        assert_eq!(rx.recv().await, Some(1));
    }

    #[tokio::test]
    async fn test_force_offline_clears_credentials() {
        let identity = Arc::new(StaticIdentity::new("u1", "Alice", "tok"));
        let c = SignalingClient::new(SessionConfig::default(), identity.clone());

        let mut msg = SignalingMessage::exit_room("m1", "server");
        msg.message_type = MessageType::ForceOffline;
        Inner::dispatch(&c.inner, &msg.to_json().unwrap());

        assert!(identity.was_cleared());
    }
}
