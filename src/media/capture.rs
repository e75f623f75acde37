//! Capture device abstraction
//!
//! The session layer never talks to camera/microphone APIs directly; it goes
//! through the [`CaptureDevice`] trait, which reports failures as a closed
//! enumeration the degrade ladder switches on explicitly.

use crate::config::VideoConstraints;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Closed set of capture failure categories
///
/// Produced by the capture abstraction; the degrade ladder branches on the
/// variant, never on error message text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// User or platform denied device access
    #[error("capture permission denied")]
    PermissionDenied,

    /// No matching capture device exists
    #[error("no capture device found")]
    NotFound,

    /// Device is held by another program
    #[error("capture device busy")]
    Busy,

    /// Requested constraints cannot be satisfied by any device
    #[error("capture constraints cannot be satisfied")]
    Overconstrained,

    /// Any other capture failure
    #[error("capture failed: {0}")]
    Other(String),
}

/// One capture request: which tracks to open, under which video constraints
#[derive(Debug, Clone, Copy)]
pub struct CaptureRequest {
    /// Video constraints, or `None` for an audio-only request
    pub video: Option<VideoConstraints>,

    /// Whether to open a microphone track
    pub audio: bool,
}

/// Tracks produced by a successful capture
pub struct CaptureStream {
    /// Local video track, present when video was requested and opened
    pub video: Option<Arc<TrackLocalStaticSample>>,

    /// Local audio track, present when audio was requested and opened
    pub audio: Option<Arc<TrackLocalStaticSample>>,
}

/// Capture device seam
///
/// Implementations wrap a platform capture pipeline and feed samples into
/// the returned tracks; the session layer only attaches those tracks to
/// peer connections.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Open capture for the given request
    async fn open(&self, request: &CaptureRequest) -> Result<CaptureStream, CaptureError>;

    /// Release any platform resources held for the current capture
    async fn release(&self) {}
}

/// Build a local Opus audio track
pub(crate) fn opus_audio_track(stream_id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: "audio/opus".to_string(),
            clock_rate: 48_000,
            channels: 2,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
        "audio-local".to_string(),
        stream_id.to_string(),
    ))
}

/// Build a local VP8 video track
pub(crate) fn vp8_video_track(stream_id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: "video/VP8".to_string(),
            clock_rate: 90_000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
        "video-local".to_string(),
        stream_id.to_string(),
    ))
}

/// In-memory capture device for tests and headless use
///
/// Produces deterministic Opus/VP8 tracks. Failures can be scripted per
/// `open` call: each call pops the next outcome from the queue; an empty
/// queue means success.
pub struct SyntheticCapture {
    outcomes: Mutex<VecDeque<Result<(), CaptureError>>>,
}

impl SyntheticCapture {
    /// Device that always succeeds
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
        }
    }

    /// Device with scripted per-call outcomes; calls past the end succeed
    pub fn with_outcomes(outcomes: Vec<Result<(), CaptureError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
        }
    }
}

impl Default for SyntheticCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureDevice for SyntheticCapture {
    async fn open(&self, request: &CaptureRequest) -> Result<CaptureStream, CaptureError> {
        let scripted = self
            .outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        if let Some(Err(e)) = scripted {
            return Err(e);
        }

        let stream_id = format!("stream-{}", uuid::Uuid::new_v4());
        Ok(CaptureStream {
            video: request.video.map(|_| vp8_video_track(&stream_id)),
            audio: request.audio.then(|| opus_audio_track(&stream_id)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_synthetic_capture_succeeds() {
        let device = SyntheticCapture::new();
        let stream = device
            .open(&CaptureRequest {
                video: Some(VideoConstraints::preferred()),
                audio: true,
            })
            .await
            .unwrap();
        assert!(stream.video.is_some());
        assert!(stream.audio.is_some());
    }

    #[tokio::test]
    async fn test_audio_only_request_has_no_video_track() {
        let device = SyntheticCapture::new();
        let stream = device
            .open(&CaptureRequest {
                video: None,
                audio: true,
            })
            .await
            .unwrap();
        assert!(stream.video.is_none());
        assert!(stream.audio.is_some());
    }

    #[tokio::test]
    async fn test_scripted_outcomes_pop_in_order() {
        let device = SyntheticCapture::with_outcomes(vec![
            Err(CaptureError::Overconstrained),
            Err(CaptureError::Busy),
            Ok(()),
        ]);
        let request = CaptureRequest {
            video: Some(VideoConstraints::preferred()),
            audio: true,
        };

        assert_eq!(
            device.open(&request).await.err(),
            Some(CaptureError::Overconstrained)
        );
        assert_eq!(device.open(&request).await.err(), Some(CaptureError::Busy));
        assert!(device.open(&request).await.is_ok());
        // Past the end of the script: succeeds.
        assert!(device.open(&request).await.is_ok());
    }
}
