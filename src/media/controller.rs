//! Local media controller
//!
//! Owns the captured local stream and runs the acquisition degrade ladder.
//! Sessions attach the stream's tracks but never own or mutate the stream;
//! only this controller starts, stops or replaces it.

use crate::config::SessionConfig;
use crate::media::capture::{CaptureDevice, CaptureError, CaptureRequest, CaptureStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// How the current local stream was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// Preferred constraints were satisfied
    Full,
    /// Fixed low resolution/framerate fallback
    Degraded,
    /// Video failed entirely; audio only
    AudioOnly,
    /// Nothing captured; participant is receive-only
    None,
}

/// The captured local stream
///
/// Owned by the controller; sessions hold it only transiently while
/// attaching tracks. The enabled flags gate sample writing in the capture
/// pipeline, so toggling never renegotiates any session.
pub struct LocalStream {
    video: Option<Arc<TrackLocalStaticSample>>,
    audio: Option<Arc<TrackLocalStaticSample>>,
    video_enabled: AtomicBool,
    audio_enabled: AtomicBool,
}

impl LocalStream {
    fn new(capture: CaptureStream) -> Self {
        Self {
            video: capture.video,
            audio: capture.audio,
            video_enabled: AtomicBool::new(true),
            audio_enabled: AtomicBool::new(true),
        }
    }

    /// All tracks present on the stream, video first
    pub fn tracks(&self) -> Vec<Arc<TrackLocalStaticSample>> {
        self.video
            .iter()
            .chain(self.audio.iter())
            .cloned()
            .collect()
    }

    /// The local video track, if captured
    pub fn video_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.video.clone()
    }

    /// The local audio track, if captured
    pub fn audio_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.audio.clone()
    }

    /// Whether the capture pipeline should write video samples
    pub fn is_video_enabled(&self) -> bool {
        self.video_enabled.load(Ordering::SeqCst)
    }

    /// Whether the capture pipeline should write audio samples
    pub fn is_audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::SeqCst)
    }
}

/// Controller for local capture with a three-step degrade ladder
pub struct LocalMediaController {
    device: Arc<dyn CaptureDevice>,
    config: SessionConfig,
    stream: RwLock<Option<Arc<LocalStream>>>,
    mode: RwLock<AcquisitionMode>,
    settled_tx: watch::Sender<bool>,
}

impl LocalMediaController {
    /// Create a controller over a capture device
    pub fn new(device: Arc<dyn CaptureDevice>, config: &SessionConfig) -> Self {
        let (settled_tx, _) = watch::channel(false);
        Self {
            device,
            config: config.clone(),
            stream: RwLock::new(None),
            mode: RwLock::new(AcquisitionMode::None),
            settled_tx,
        }
    }

    /// Acquire local media, degrading as needed
    ///
    /// Ladder: preferred bounded constraints; on constraint/device-busy
    /// failure a fixed low resolution/framerate; then audio-only. Failure of
    /// the audio-only step is non-fatal: the mode settles at `None` and the
    /// caller proceeds receive-only.
    ///
    /// Resolves the "media settled" condition in every case, so negotiations
    /// waiting on local media never block on a capture that will not come.
    pub async fn acquire(&self, video_wanted: bool, audio_wanted: bool) -> AcquisitionMode {
        let mode = self.run_ladder(video_wanted, audio_wanted).await;
        *self.mode.write().await = mode;
        self.settled_tx.send_replace(true);
        info!(?mode, "local media acquisition settled");
        mode
    }

    async fn run_ladder(&self, video_wanted: bool, audio_wanted: bool) -> AcquisitionMode {
        if video_wanted {
            let preferred = CaptureRequest {
                video: Some(self.config.preferred_video),
                audio: audio_wanted,
            };
            match self.device.open(&preferred).await {
                Ok(capture) => {
                    self.install(capture).await;
                    return AcquisitionMode::Full;
                }
                Err(e @ (CaptureError::Overconstrained | CaptureError::Busy)) => {
                    warn!(error = %e, "preferred capture failed, trying low resolution");
                    let fallback = CaptureRequest {
                        video: Some(self.config.fallback_video),
                        audio: audio_wanted,
                    };
                    match self.device.open(&fallback).await {
                        Ok(capture) => {
                            self.install(capture).await;
                            return AcquisitionMode::Degraded;
                        }
                        Err(e) => warn!(error = %e, "low resolution capture failed"),
                    }
                }
                Err(e) => warn!(error = %e, "video capture unavailable"),
            }
        }

        if audio_wanted {
            let audio_only = CaptureRequest {
                video: None,
                audio: true,
            };
            match self.device.open(&audio_only).await {
                Ok(capture) => {
                    self.install(capture).await;
                    return AcquisitionMode::AudioOnly;
                }
                Err(e) => warn!(error = %e, "audio-only capture failed, proceeding receive-only"),
            }
        }

        AcquisitionMode::None
    }

    async fn install(&self, capture: CaptureStream) {
        *self.stream.write().await = Some(Arc::new(LocalStream::new(capture)));
    }

    /// The current local stream, if any
    pub async fn current_stream(&self) -> Option<Arc<LocalStream>> {
        self.stream.read().await.clone()
    }

    /// The current acquisition mode
    pub async fn mode(&self) -> AcquisitionMode {
        *self.mode.read().await
    }

    /// Wait until acquisition has settled, bounded by `deadline`
    ///
    /// Returns `true` when acquisition settled within the deadline, `false`
    /// on timeout; callers proceed either way (receive-only past the
    /// deadline).
    pub async fn wait_until_settled(&self, deadline: Duration) -> bool {
        let mut rx = self.settled_tx.subscribe();
        let settled = match tokio::time::timeout(deadline, rx.wait_for(|settled| *settled)).await {
            Ok(Ok(_)) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                debug!("local media wait deadline elapsed, proceeding without it");
                false
            }
        };
        settled
    }

    /// Flip the video track enabled flag; never renegotiates
    pub async fn toggle_video(&self, enabled: bool) {
        if let Some(stream) = self.stream.read().await.as_ref() {
            stream.video_enabled.store(enabled, Ordering::SeqCst);
            debug!(enabled, "video track toggled");
        }
    }

    /// Flip the audio track enabled flag; never renegotiates
    pub async fn toggle_audio(&self, enabled: bool) {
        if let Some(stream) = self.stream.read().await.as_ref() {
            stream.audio_enabled.store(enabled, Ordering::SeqCst);
            debug!(enabled, "audio track toggled");
        }
    }

    /// Halt tracks, release the device and re-arm the settled condition
    pub async fn stop(&self) {
        let had_stream = self.stream.write().await.take().is_some();
        *self.mode.write().await = AcquisitionMode::None;
        self.settled_tx.send_replace(false);
        self.device.release().await;
        if had_stream {
            info!("local media stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::capture::SyntheticCapture;

    fn controller(device: SyntheticCapture) -> LocalMediaController {
        LocalMediaController::new(Arc::new(device), &SessionConfig::default())
    }

    #[tokio::test]
    async fn test_preferred_constraints_succeed() {
        let c = controller(SyntheticCapture::new());
        assert_eq!(c.acquire(true, true).await, AcquisitionMode::Full);
        let stream = c.current_stream().await.unwrap();
        assert!(stream.video_track().is_some());
        assert!(stream.audio_track().is_some());
    }

    #[tokio::test]
    async fn test_ladder_degrades_to_low_resolution() {
        // Preferred fails on constraints, low resolution succeeds: must land
        // at Degraded, not skip to audio-only.
        let c = controller(SyntheticCapture::with_outcomes(vec![
            Err(CaptureError::Overconstrained),
            Ok(()),
        ]));
        assert_eq!(c.acquire(true, true).await, AcquisitionMode::Degraded);
        assert!(c.current_stream().await.unwrap().video_track().is_some());
    }

    #[tokio::test]
    async fn test_ladder_degrades_to_audio_only() {
        let c = controller(SyntheticCapture::with_outcomes(vec![
            Err(CaptureError::Busy),
            Err(CaptureError::Busy),
            Ok(()),
        ]));
        assert_eq!(c.acquire(true, true).await, AcquisitionMode::AudioOnly);
        let stream = c.current_stream().await.unwrap();
        assert!(stream.video_track().is_none());
        assert!(stream.audio_track().is_some());
    }

    #[tokio::test]
    async fn test_permission_denied_skips_straight_to_audio_only() {
        // A denied camera will not start working at a lower resolution.
        let c = controller(SyntheticCapture::with_outcomes(vec![
            Err(CaptureError::PermissionDenied),
            Ok(()),
        ]));
        assert_eq!(c.acquire(true, true).await, AcquisitionMode::AudioOnly);
    }

    #[tokio::test]
    async fn test_total_failure_is_non_fatal() {
        let c = controller(SyntheticCapture::with_outcomes(vec![
            Err(CaptureError::NotFound),
            Err(CaptureError::NotFound),
        ]));
        assert_eq!(c.acquire(true, true).await, AcquisitionMode::None);
        assert!(c.current_stream().await.is_none());
        // The settled condition resolves even with nothing captured.
        assert!(c.wait_until_settled(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_wait_times_out_before_acquisition() {
        let c = controller(SyntheticCapture::new());
        assert!(!c.wait_until_settled(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_toggle_flips_flags_only() {
        let c = controller(SyntheticCapture::new());
        c.acquire(true, true).await;
        let stream = c.current_stream().await.unwrap();
        assert!(stream.is_video_enabled());

        c.toggle_video(false).await;
        assert!(!stream.is_video_enabled());
        assert!(stream.is_audio_enabled());

        c.toggle_audio(false).await;
        assert!(!stream.is_audio_enabled());
    }

    #[tokio::test]
    async fn test_stop_releases_and_rearms() {
        let c = controller(SyntheticCapture::new());
        c.acquire(true, true).await;
        c.stop().await;
        assert!(c.current_stream().await.is_none());
        assert_eq!(c.mode().await, AcquisitionMode::None);
        assert!(!c.wait_until_settled(Duration::from_millis(10)).await);
    }
}
