//! Display capture seam.
//!
//! Acquiring a screen is a user-gesture-gated request: the call suspends
//! until the operator grants or denies access.

use async_trait::async_trait;

use crate::quality::QualityPreset;
use crate::track::{TrackKind, TrackRef, VideoConstraints};

/// Audio processing requested alongside the display. System/tab audio is
/// passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub sample_rate: u32,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: false,
            noise_suppression: false,
            sample_rate: 44_100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub video: VideoConstraints,
    pub audio: AudioConstraints,
}

impl CaptureRequest {
    pub fn for_preset(preset: QualityPreset) -> Self {
        Self {
            video: preset.constraints(),
            audio: AudioConstraints::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("screen capture was denied")]
    Denied,
    #[error("screen capture was cancelled")]
    Cancelled,
    #[error("captured stream has no video track")]
    NoVideoTrack,
    #[error("capture source failed: {0}")]
    Source(String),
}

/// Raw result of a display capture: one video track and zero or one audio
/// tracks. The capture lifecycle owns these tracks and stops them once
/// superseded.
#[derive(Debug, Clone)]
pub struct CapturedStream {
    tracks: Vec<TrackRef>,
}

impl CapturedStream {
    pub fn new(tracks: Vec<TrackRef>) -> Self {
        Self { tracks }
    }

    pub fn video(&self) -> Option<&TrackRef> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio(&self) -> Option<&TrackRef> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    pub fn has_audio(&self) -> bool {
        self.audio().is_some()
    }

    pub fn tracks(&self) -> &[TrackRef] {
        &self.tracks
    }

    /// Stops every captured track.
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

#[async_trait]
pub trait DisplayCapture: Send + Sync {
    async fn request(&self, request: &CaptureRequest) -> Result<CapturedStream, CaptureError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_for_preset_uses_ideal_constraints() {
        let req = CaptureRequest::for_preset(QualityPreset::P1080);
        assert_eq!(req.video.width, 1920);
        assert_eq!(req.video.height, 1080);
        assert_eq!(req.video.frame_rate, 30);
        assert!(!req.audio.echo_cancellation);
        assert!(!req.audio.noise_suppression);
        assert_eq!(req.audio.sample_rate, 44_100);
    }
}
