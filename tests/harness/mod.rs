//! Shared test harness: in-process WebSocket signaling server, recording
//! signaling sender, and compressed-timing config.
#![allow(dead_code)]

use conclave::{MessageType, SessionConfig, SignalingMessage, SignalingSender};
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use webrtc::api::APIBuilder;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Commands a test can issue against one accepted server-side connection
pub enum ServerCommand {
    /// Send a text frame to the client
    Send(String),
    /// Close with a proper close handshake
    CloseClean,
    /// Drop the socket without a close frame (unclean close)
    Drop,
}

/// One accepted connection, as seen by the test
pub struct ServerConn {
    pub commands: mpsc::UnboundedSender<ServerCommand>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

impl ServerConn {
    /// Next text frame from the client, bounded
    pub async fn recv_text(&mut self, timeout: Duration) -> Option<String> {
        tokio::time::timeout(timeout, self.incoming.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next frame that is not a heartbeat ping, bounded overall
    pub async fn recv_non_ping(&mut self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .unwrap_or(Duration::ZERO);
            match self.recv_text(remaining).await {
                Some(text) if text == "ping" => continue,
                other => return other,
            }
        }
    }
}

/// In-process signaling server for transport tests
pub struct TestServer {
    pub url: String,
    pub connections: mpsc::UnboundedReceiver<ServerConn>,
}

impl TestServer {
    /// Next accepted connection, bounded
    pub async fn accept(&mut self, timeout: Duration) -> Option<ServerConn> {
        tokio::time::timeout(timeout, self.connections.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Bind and run a WebSocket server on an ephemeral port
pub async fn spawn_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (conn_tx, connections) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            if conn_tx
                .send(ServerConn {
                    commands: cmd_tx,
                    incoming: in_rx,
                })
                .is_err()
            {
                break;
            }

            tokio::spawn(async move {
                let Ok(ws) = accept_async(stream).await else {
                    return;
                };
                let (mut sink, mut source) = ws.split();
                loop {
                    tokio::select! {
                        cmd = cmd_rx.recv() => match cmd {
                            Some(ServerCommand::Send(text)) => {
                                let _ = sink.send(Message::Text(text)).await;
                            }
                            Some(ServerCommand::CloseClean) => {
                                let _ = sink.send(Message::Close(None)).await;
                            }
                            Some(ServerCommand::Drop) | None => return,
                        },
                        frame = source.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                let _ = in_tx.send(text);
                            }
                            Some(Ok(Message::Close(_))) | None => return,
                            Some(Ok(_)) => {}
                            Some(Err(_)) => return,
                        },
                    }
                }
            });
        }
    });

    TestServer {
        url: format!("ws://{}/ws", addr),
        connections,
    }
}

/// Signaling sender that records everything it is asked to send
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<SignalingMessage>>,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn all(&self) -> Vec<SignalingMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn of_type(&self, message_type: MessageType) -> Vec<SignalingMessage> {
        self.all()
            .into_iter()
            .filter(|m| m.message_type == message_type)
            .collect()
    }

    /// Poll until a message of the given type shows up, bounded
    pub async fn wait_for(
        &self,
        message_type: MessageType,
        timeout: Duration,
    ) -> Option<SignalingMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(msg) = self.of_type(message_type).into_iter().next_back() {
                return Some(msg);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl SignalingSender for RecordingSender {
    fn send(&self, msg: &SignalingMessage) {
        self.sent.lock().unwrap().push(msg.clone());
    }
}

/// Config with every timing compressed for tests
pub fn test_config(url: &str) -> SessionConfig {
    let mut config = SessionConfig::default().with_signaling_url(url);
    config.connect_timeout_ms = 2_000;
    config.heartbeat_interval_ms = 100;
    config.reconnect_delay_ms = 50;
    config.outbound_media_wait_ms = 100;
    config.inbound_media_wait_ms = 100;
    config.renegotiation_delay_ms = 1_000;
    config
}

/// A valid SDP offer from a scratch peer connection
pub async fn remote_offer() -> RTCSessionDescription {
    let api = APIBuilder::new().build();
    let pc = api
        .new_peer_connection(RTCConfiguration::default())
        .await
        .unwrap();
    pc.create_data_channel("control", None).await.unwrap();
    let offer = pc.create_offer(None).await.unwrap();
    pc.set_local_description(offer).await.unwrap();
    pc.local_description().await.unwrap()
}
