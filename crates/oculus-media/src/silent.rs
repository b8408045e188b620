//! Synthesized silent audio placeholder.
//!
//! The placeholder keeps an audio leg in every negotiated connection when the
//! captured source has no audio. It starts disabled and only ever produces
//! zero-amplitude samples.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::track::{MediaTrack, TrackEnded, TrackError, TrackKind, TrackState, VideoConstraints};

pub const SILENT_SAMPLE_RATE: u32 = 48_000;
pub const SILENT_CHANNELS: u16 = 2;
/// 20 ms at 48 kHz.
pub const SILENT_FRAME_SAMPLES: usize = 960;

static NEXT_SILENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct SilentAudioTrack {
    id: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
    frames_generated: AtomicU64,
    ended_tx: watch::Sender<bool>,
}

impl SilentAudioTrack {
    pub fn new() -> Arc<Self> {
        let id = format!(
            "silent-audio-{}",
            NEXT_SILENT_ID.fetch_add(1, Ordering::Relaxed)
        );
        let (ended_tx, _) = watch::channel(false);
        debug!("synthesized silent audio track {}", id);
        Arc::new(Self {
            id,
            enabled: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            frames_generated: AtomicU64::new(0),
            ended_tx,
        })
    }

    /// Pulls the next interleaved frame from the generator.
    ///
    /// Returns `None` once the track is stopped and its generator released.
    pub fn next_frame(&self) -> Option<Vec<f32>> {
        if self.stopped.load(Ordering::Acquire) {
            return None;
        }
        self.frames_generated.fetch_add(1, Ordering::Relaxed);
        Some(vec![0.0; SILENT_FRAME_SAMPLES * SILENT_CHANNELS as usize])
    }

    pub fn frames_generated(&self) -> u64 {
        self.frames_generated.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[async_trait]
impl MediaTrack for SilentAudioTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    fn state(&self) -> TrackState {
        if self.is_stopped() {
            TrackState::Ended
        } else {
            TrackState::Live
        }
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!("released silent audio track {}", self.id);
        }
    }

    fn ended(&self) -> TrackEnded {
        TrackEnded::new(self.ended_tx.subscribe())
    }

    async fn apply_constraints(&self, _constraints: VideoConstraints) -> Result<(), TrackError> {
        Err(TrackError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_starts_disabled_and_live() {
        let track = SilentAudioTrack::new();
        assert_eq!(track.kind(), TrackKind::Audio);
        assert!(!track.enabled());
        assert_eq!(track.state(), TrackState::Live);
    }

    #[test]
    fn test_frames_are_zero_amplitude() {
        let track = SilentAudioTrack::new();
        let frame = track.next_frame().unwrap();
        assert_eq!(frame.len(), SILENT_FRAME_SAMPLES * 2);
        assert!(frame.iter().all(|s| *s == 0.0));
        assert_eq!(track.frames_generated(), 1);
    }

    #[test]
    fn test_stop_releases_generator() {
        let track = SilentAudioTrack::new();
        track.stop();
        track.stop();
        assert!(track.next_frame().is_none());
        assert_eq!(track.state(), TrackState::Ended);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = SilentAudioTrack::new();
        let b = SilentAudioTrack::new();
        assert_ne!(a.id(), b.id());
    }
}
