//! Capture lifecycle: acquiring the screen, swapping it while live,
//! quality changes and the audio mute toggle.
//!
//! The lifecycle owns the raw captured tracks and stops them once they are
//! superseded. It drives the session controller for everything that touches
//! viewer calls.

use std::sync::Arc;

use oculus_media::{CaptureError, CaptureRequest, CapturedStream, DisplayCapture, QualityPreset};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{HostError, Result};
use crate::session::{BroadcastState, BroadcasterSessionController, HostEvent};

pub const CAPTURE_DENIED_MESSAGE: &str = "Screen capture was denied or cancelled.";
pub const NO_TAB_AUDIO_MESSAGE: &str =
    "No tab audio captured. Re-share your screen and enable 'Also share tab audio'.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioToggle {
    Enabled,
    Muted,
    /// The audio leg is the silent placeholder; nothing to toggle.
    NoRealAudio,
    NoStream,
}

pub struct CaptureLifecycle {
    source: Arc<dyn DisplayCapture>,
    raw: Option<CapturedStream>,
    audio_enabled: bool,
    end_watcher: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for CaptureLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureLifecycle")
            .field("raw", &self.raw)
            .field("audio_enabled", &self.audio_enabled)
            .finish()
    }
}

impl CaptureLifecycle {
    pub fn new(source: Arc<dyn DisplayCapture>) -> Self {
        Self {
            source,
            raw: None,
            audio_enabled: false,
            end_watcher: None,
        }
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn raw(&self) -> Option<&CapturedStream> {
        self.raw.as_ref()
    }

    /// Requests the screen at the selected preset.
    ///
    /// With a live stream the new tracks are swapped into every call and a
    /// failed request leaves the live stream untouched; a request without
    /// `replace` is treated the same way once live. Otherwise the stream is
    /// composed from scratch, a failed request moves the broadcast to
    /// `Error`, and viewers queued so far are called.
    ///
    /// Fails with [`HostError::NotStarted`] until the host identity is
    /// registered; nothing can reach an unregistered broadcast.
    pub async fn start_capture(
        &mut self,
        session: &mut BroadcasterSessionController,
        replace: bool,
    ) -> Result<()> {
        if session.is_stopped() {
            return Err(HostError::Stopped);
        }
        if !session.is_registered() {
            debug!("capture requested before {} is registered", session.identity());
            return Err(HostError::NotStarted);
        }
        let replacing = session.composer().current().is_some();
        if replacing && !replace {
            debug!("capture requested while live; treating it as a replacement");
        }
        if !replacing {
            session.set_state(BroadcastState::Requesting);
        }
        session.clear_error();

        let request = CaptureRequest::for_preset(session.preset());
        let raw = match self.source.request(&request).await {
            Ok(raw) if raw.video().is_some() => raw,
            Ok(raw) => {
                raw.stop();
                return Err(self.capture_failed(session, replacing, CaptureError::NoVideoTrack));
            }
            Err(e) => return Err(self.capture_failed(session, replacing, e)),
        };
        if session.is_stopped() {
            debug!("broadcast stopped while the capture prompt was open");
            raw.stop();
            return Err(HostError::Stopped);
        }
        let has_real_audio = raw.has_audio();

        if replacing {
            let prepared = match session.composer().prepare(&raw) {
                Ok(prepared) => prepared,
                Err(e) => {
                    raw.stop();
                    return Err(e.into());
                }
            };
            let video = session.replace_track(prepared.stream().video()).await;
            let audio = session.replace_track(prepared.stream().audio()).await;
            info!(
                "swapped screen on {} calls ({} video / {} audio failures)",
                video.replaced, video.failed, audio.failed
            );
            session.composer_mut().commit(prepared);
        } else if let Err(e) = session.composer_mut().compose(&raw) {
            raw.stop();
            return Err(e.into());
        }

        if let Some(previous) = self.raw.replace(raw) {
            debug!("stopping superseded capture");
            previous.stop();
        }
        self.audio_enabled = has_real_audio;
        session.set_state(BroadcastState::Live);
        session.apply_bitrate_cap(session.preset()).await;
        self.watch_for_source_end(session);

        if !replacing {
            let called = session.call_pending_viewers().await;
            if called > 0 {
                info!("called {} viewers waiting for the stream", called);
            }
        }
        Ok(())
    }

    fn capture_failed(
        &self,
        session: &mut BroadcasterSessionController,
        replacing: bool,
        error: CaptureError,
    ) -> HostError {
        if replacing {
            warn!("replacement capture failed; keeping the live stream: {}", error);
        } else {
            info!("initial capture failed: {}", error);
            session.fail(CAPTURE_DENIED_MESSAGE);
        }
        HostError::Capture(error)
    }

    /// A source-initiated end of the live video track (e.g. the operator
    /// revoking sharing from a native control) stops the broadcast.
    fn watch_for_source_end(&mut self, session: &BroadcasterSessionController) {
        if let Some(watcher) = self.end_watcher.take() {
            watcher.abort();
        }
        let Some(video) = session.composer().current().map(|s| s.video().clone()) else {
            return;
        };
        let ended = video.ended();
        let track_id = video.id().to_string();
        let tx = session.event_sender();
        self.end_watcher = Some(tokio::spawn(async move {
            if ended.wait().await {
                let _ = tx.send(HostEvent::CaptureEnded { track_id });
            }
        }));
    }

    /// Re-applies capture constraints and bitrate caps for `preset`.
    ///
    /// The preset is remembered even when nothing is live. Constraint
    /// changes are best effort. Returns whether a live stream was adjusted.
    pub async fn change_quality(
        &mut self,
        session: &mut BroadcasterSessionController,
        preset: QualityPreset,
    ) -> bool {
        session.set_preset(preset);
        if session.state() != BroadcastState::Live {
            return false;
        }
        let Some(video) = session.composer().current().map(|s| s.video().clone()) else {
            return false;
        };

        if let Err(e) = video.apply_constraints(preset.constraints()).await {
            debug!("{} constraints not applied to {}: {}", preset, video.id(), e);
        }
        session.apply_bitrate_cap(preset).await;
        info!("quality changed to {}", preset);
        true
    }

    /// Mutes or unmutes captured audio. The silent placeholder is never
    /// toggled; the operator is told to re-share with audio instead.
    pub fn toggle_audio(&mut self, session: &mut BroadcasterSessionController) -> AudioToggle {
        let Some(stream) = session.composer().current().cloned() else {
            return AudioToggle::NoStream;
        };
        if session.composer().has_placeholder_audio() {
            session.set_error(NO_TAB_AUDIO_MESSAGE);
            return AudioToggle::NoRealAudio;
        }

        let next = !self.audio_enabled;
        stream.audio().set_enabled(next);
        self.audio_enabled = next;
        session.clear_error();
        debug!("tab audio {}", if next { "enabled" } else { "muted" });
        if next {
            AudioToggle::Enabled
        } else {
            AudioToggle::Muted
        }
    }

    /// Stops every local track and the broadcast itself.
    pub fn stop_stream(&mut self, session: &mut BroadcasterSessionController) -> bool {
        if let Some(watcher) = self.end_watcher.take() {
            watcher.abort();
        }
        if let Some(raw) = self.raw.take() {
            raw.stop();
        }
        self.audio_enabled = false;
        session.stop()
    }
}
