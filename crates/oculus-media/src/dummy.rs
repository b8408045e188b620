//! Scriptable in-process capture source.
//!
//! Used by the loopback demo and by tests: tracks behave like real capture
//! tracks (mute, stop, source-initiated end, constraint changes) without any
//! platform capture underneath.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::capture::{CaptureError, CaptureRequest, CapturedStream, DisplayCapture};
use crate::track::{
    MediaTrack, TrackEnded, TrackError, TrackKind, TrackRef, TrackState, VideoConstraints,
};

#[derive(Debug)]
pub struct DummyTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    supports_constraints: bool,
    constraints: Mutex<Option<VideoConstraints>>,
    ended_tx: watch::Sender<bool>,
}

impl DummyTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, supports_constraints: bool) -> Arc<Self> {
        let (ended_tx, _) = watch::channel(false);
        Arc::new(Self {
            id: id.into(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            supports_constraints,
            constraints: Mutex::new(None),
            ended_tx,
        })
    }

    pub fn video(id: impl Into<String>) -> Arc<Self> {
        Self::new(id, TrackKind::Video, true)
    }

    pub fn audio(id: impl Into<String>) -> Arc<Self> {
        Self::new(id, TrackKind::Audio, false)
    }

    /// Ends the track from the source side, as when the operator revokes
    /// sharing.
    pub fn end(&self) {
        self.stopped.store(true, Ordering::Release);
        self.ended_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn applied_constraints(&self) -> Option<VideoConstraints> {
        *self
            .constraints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MediaTrack for DummyTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
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
        self.stopped.store(true, Ordering::Release);
    }

    fn ended(&self) -> TrackEnded {
        TrackEnded::new(self.ended_tx.subscribe())
    }

    async fn apply_constraints(&self, constraints: VideoConstraints) -> Result<(), TrackError> {
        if self.is_stopped() {
            return Err(TrackError::Ended);
        }
        if self.kind != TrackKind::Video || !self.supports_constraints {
            return Err(TrackError::Unsupported);
        }
        *self
            .constraints
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(constraints);
        Ok(())
    }
}

/// What the operator does when asked to share a screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Grant { audio: bool },
    Deny,
    Cancel,
}

#[derive(Debug)]
struct Issued {
    video: Arc<DummyTrack>,
    audio: Option<Arc<DummyTrack>>,
}

/// Capture source that answers requests from a script, falling back to a
/// default outcome once the script is exhausted.
#[derive(Debug)]
pub struct DummyCapture {
    default: CaptureOutcome,
    script: Mutex<VecDeque<CaptureOutcome>>,
    requests: Mutex<Vec<CaptureRequest>>,
    issued: Mutex<Vec<Issued>>,
    next_id: AtomicU64,
}

impl DummyCapture {
    pub fn new(default: CaptureOutcome) -> Self {
        Self {
            default,
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            issued: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn granting(audio: bool) -> Self {
        Self::new(CaptureOutcome::Grant { audio })
    }

    pub fn denying() -> Self {
        Self::new(CaptureOutcome::Deny)
    }

    /// Queues the outcome for the next request.
    pub fn push(&self, outcome: CaptureOutcome) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }

    pub fn requests(&self) -> Vec<CaptureRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn issued_count(&self) -> usize {
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn last_video(&self) -> Option<Arc<DummyTrack>> {
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .map(|issued| issued.video.clone())
    }

    pub fn last_audio(&self) -> Option<Arc<DummyTrack>> {
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .and_then(|issued| issued.audio.clone())
    }

    fn next_outcome(&self) -> CaptureOutcome {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(self.default)
    }
}

#[async_trait]
impl DisplayCapture for DummyCapture {
    async fn request(&self, request: &CaptureRequest) -> Result<CapturedStream, CaptureError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*request);

        match self.next_outcome() {
            CaptureOutcome::Deny => Err(CaptureError::Denied),
            CaptureOutcome::Cancel => Err(CaptureError::Cancelled),
            CaptureOutcome::Grant { audio } => {
                let n = self.next_id.fetch_add(1, Ordering::Relaxed);
                let video = DummyTrack::video(format!("display-{n}-video"));
                let audio = audio.then(|| DummyTrack::audio(format!("display-{n}-audio")));
                debug!(
                    "granted display capture {} ({}x{}@{}, audio={})",
                    n,
                    request.video.width,
                    request.video.height,
                    request.video.frame_rate,
                    audio.is_some()
                );

                let mut tracks: Vec<TrackRef> = Vec::with_capacity(2);
                tracks.push(video.clone());
                if let Some(audio) = &audio {
                    tracks.push(audio.clone());
                }
                self.issued
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(Issued { video, audio });
                Ok(CapturedStream::new(tracks))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::QualityPreset;

    #[tokio::test]
    async fn test_script_then_default() {
        let capture = DummyCapture::granting(false);
        capture.push(CaptureOutcome::Deny);
        let req = CaptureRequest::for_preset(QualityPreset::P720);

        assert_eq!(capture.request(&req).await.unwrap_err(), CaptureError::Denied);
        let stream = capture.request(&req).await.unwrap();
        assert!(stream.video().is_some());
        assert!(!stream.has_audio());
        assert_eq!(capture.requests().len(), 2);
        assert_eq!(capture.issued_count(), 1);
    }

    #[tokio::test]
    async fn test_end_fires_listener_but_stop_does_not() {
        let ended = DummyTrack::video("v1");
        let listener = ended.ended();
        ended.end();
        assert!(listener.wait().await);

        let stopped = DummyTrack::video("v2");
        let listener = stopped.ended();
        stopped.stop();
        let fired = tokio::time::timeout(std::time::Duration::from_millis(20), listener.wait()).await;
        assert!(fired.is_err(), "local stop must not look like a source end");
    }

    #[tokio::test]
    async fn test_constraints_only_apply_to_live_video() {
        let video = DummyTrack::video("v");
        let wanted = QualityPreset::P480.constraints();
        video.apply_constraints(wanted).await.unwrap();
        assert_eq!(video.applied_constraints(), Some(wanted));

        let audio = DummyTrack::audio("a");
        assert_eq!(
            audio.apply_constraints(wanted).await.unwrap_err(),
            TrackError::Unsupported
        );

        video.stop();
        assert_eq!(
            video.apply_constraints(wanted).await.unwrap_err(),
            TrackError::Ended
        );
    }
}
