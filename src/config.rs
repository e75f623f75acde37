//! Configuration types for the meeting session layer

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for a meeting session
///
/// All protocol timings live here so tests can compress them; the defaults
/// are the production values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// WebSocket signaling endpoint URL (ws:// or wss://)
    ///
    /// The auth token from the identity provider is appended as a
    /// `token` query parameter at connect time.
    pub signaling_url: String,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Signaling connection open timeout in milliseconds (default: 10000)
    pub connect_timeout_ms: u64,

    /// Heartbeat interval in milliseconds (default: 25000, well under the
    /// server's 120s idle timeout)
    pub heartbeat_interval_ms: u64,

    /// Delay before a reconnect attempt in milliseconds (default: 3000)
    pub reconnect_delay_ms: u64,

    /// Maximum consecutive reconnect attempts (default: 5)
    pub max_reconnect_attempts: u32,

    /// How long an outbound initiation waits for local media before
    /// proceeding receive-only, in milliseconds (default: 3000)
    pub outbound_media_wait_ms: u64,

    /// How long an inbound offer waits for local media before proceeding,
    /// in milliseconds (default: 5000; inbound is reactive, so more slack)
    pub inbound_media_wait_ms: u64,

    /// Delay before the follow-up offer after a receive-only answer, in
    /// milliseconds (default: 1200, must stay within 1000-1500)
    pub renegotiation_delay_ms: u64,

    /// Preferred capture constraints for the first ladder step (non-exact)
    pub preferred_video: VideoConstraints,

    /// Fixed low-demand constraints for the second ladder step
    pub fallback_video: VideoConstraints,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Video capture constraints for one degrade-ladder step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    /// Requested frame width in pixels
    pub width: u32,

    /// Requested frame height in pixels
    pub height: u32,

    /// Requested framerate in fps
    pub framerate: u32,

    /// Whether the constraints are exact or an upper bound the device may
    /// undershoot
    pub exact: bool,
}

impl VideoConstraints {
    /// Preferred bounded constraints (720p30, non-exact)
    pub fn preferred() -> Self {
        Self {
            width: 1280,
            height: 720,
            framerate: 30,
            exact: false,
        }
    }

    /// Fixed low resolution/framerate fallback
    pub fn low() -> Self {
        Self {
            width: 320,
            height: 240,
            framerate: 15,
            exact: true,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:6061/ws".to_string(),
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            turn_servers: Vec::new(),
            connect_timeout_ms: 10_000,
            heartbeat_interval_ms: 25_000,
            reconnect_delay_ms: 3_000,
            max_reconnect_attempts: 5,
            outbound_media_wait_ms: 3_000,
            inbound_media_wait_ms: 5_000,
            renegotiation_delay_ms: 1_200,
            preferred_video: VideoConstraints::preferred(),
            fallback_video: VideoConstraints::low(),
        }
    }
}

impl SessionConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a valid WebSocket URL
    /// - `stun_servers` is empty
    /// - `heartbeat_interval_ms` is zero or at/above the 120s server idle timeout
    /// - `renegotiation_delay_ms` is outside 1000-1500 (production builds)
    /// - `max_reconnect_attempts` is zero
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if self.heartbeat_interval_ms == 0 || self.heartbeat_interval_ms >= 120_000 {
            return Err(Error::InvalidConfig(format!(
                "heartbeat_interval_ms must be in range 1-119999, got {}",
                self.heartbeat_interval_ms
            )));
        }

        if self.renegotiation_delay_ms < 1_000 || self.renegotiation_delay_ms > 1_500 {
            return Err(Error::InvalidConfig(format!(
                "renegotiation_delay_ms must be in range 1000-1500, got {}",
                self.renegotiation_delay_ms
            )));
        }

        if self.max_reconnect_attempts == 0 {
            return Err(Error::InvalidConfig(
                "max_reconnect_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Set the signaling endpoint URL
    ///
    /// Useful for chaining off `SessionConfig::default()`.
    pub fn with_signaling_url(mut self, url: &str) -> Self {
        self.signaling_url = url.to_string();
        self
    }

    /// Add TURN servers to this configuration
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    /// Signaling connection open timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Heartbeat interval
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Reconnect delay
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Outbound media wait deadline
    pub fn outbound_media_wait(&self) -> Duration {
        Duration::from_millis(self.outbound_media_wait_ms)
    }

    /// Inbound media wait deadline
    pub fn inbound_media_wait(&self) -> Duration {
        Duration::from_millis(self.inbound_media_wait_ms)
    }

    /// Renegotiation delay
    pub fn renegotiation_delay(&self) -> Duration {
        Duration::from_millis(self.renegotiation_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_signaling_url_fails() {
        let mut config = SessionConfig::default();
        config.signaling_url = "http://localhost:6061/ws".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_stun_servers_fails() {
        let mut config = SessionConfig::default();
        config.stun_servers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_over_server_idle_timeout_fails() {
        let mut config = SessionConfig::default();
        config.heartbeat_interval_ms = 120_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_renegotiation_delay_out_of_window_fails() {
        let mut config = SessionConfig::default();
        config.renegotiation_delay_ms = 900;
        assert!(config.validate().is_err());

        config.renegotiation_delay_ms = 1_600;
        assert!(config.validate().is_err());

        config.renegotiation_delay_ms = 1_500;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = SessionConfig::default()
            .with_signaling_url("wss://meet.example.com/ws")
            .with_turn_servers(vec![TurnServerConfig {
                url: "turn:turn.example.com:3478".to_string(),
                username: "user".to_string(),
                credential: "pass".to_string(),
            }]);
        assert!(config.validate().is_ok());
        assert_eq!(config.turn_servers.len(), 1);
    }

    #[test]
    fn test_config_serialization() {
        let config = SessionConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.signaling_url, deserialized.signaling_url);
        assert_eq!(config.preferred_video, deserialized.preferred_video);
    }
}
