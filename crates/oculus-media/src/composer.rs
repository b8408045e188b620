//! Outgoing stream composition.
//!
//! The composer turns a raw display capture into the canonical two-track
//! stream every viewer call carries. It owns the silent placeholder (if one
//! is in use) but never the captured tracks themselves: stopping superseded
//! raw tracks is the capture lifecycle's job.

use std::sync::Arc;

use tracing::debug;

use crate::capture::CapturedStream;
use crate::silent::SilentAudioTrack;
use crate::track::{MediaTrack, TrackKind, TrackRef};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComposeError {
    #[error("captured stream has no video track")]
    NoVideoTrack,
    #[error("{slot} slot cannot hold a {got} track")]
    WrongKind { slot: TrackKind, got: TrackKind },
}

/// Exactly one video and one audio track.
#[derive(Debug, Clone)]
pub struct OutgoingStream {
    video: TrackRef,
    audio: TrackRef,
}

impl OutgoingStream {
    pub fn new(video: TrackRef, audio: TrackRef) -> Result<Self, ComposeError> {
        if video.kind() != TrackKind::Video {
            return Err(ComposeError::WrongKind {
                slot: TrackKind::Video,
                got: video.kind(),
            });
        }
        if audio.kind() != TrackKind::Audio {
            return Err(ComposeError::WrongKind {
                slot: TrackKind::Audio,
                got: audio.kind(),
            });
        }
        Ok(Self { video, audio })
    }

    pub fn video(&self) -> &TrackRef {
        &self.video
    }

    pub fn audio(&self) -> &TrackRef {
        &self.audio
    }

    pub fn track(&self, kind: TrackKind) -> &TrackRef {
        match kind {
            TrackKind::Video => &self.video,
            TrackKind::Audio => &self.audio,
        }
    }

    pub fn tracks(&self) -> [&TrackRef; 2] {
        [&self.video, &self.audio]
    }
}

/// A composed stream that has not replaced the composer's current one yet.
///
/// Replacing a live stream first swaps the new tracks into every call and
/// only then commits, so the old placeholder keeps feeding calls until the
/// swap is done.
#[derive(Debug)]
pub struct PreparedStream {
    stream: OutgoingStream,
    placeholder: Option<Arc<SilentAudioTrack>>,
}

impl PreparedStream {
    pub fn stream(&self) -> &OutgoingStream {
        &self.stream
    }

    pub fn uses_placeholder(&self) -> bool {
        self.placeholder.is_some()
    }
}

#[derive(Debug, Default)]
pub struct OutgoingStreamComposer {
    current: Option<OutgoingStream>,
    placeholder: Option<Arc<SilentAudioTrack>>,
}

impl OutgoingStreamComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the two-track stream for `raw` without touching current state.
    ///
    /// Real audio is adopted as-is; otherwise a fresh silent placeholder is
    /// synthesized for the audio slot.
    pub fn prepare(&self, raw: &CapturedStream) -> Result<PreparedStream, ComposeError> {
        let video = raw.video().cloned().ok_or(ComposeError::NoVideoTrack)?;

        match raw.audio() {
            Some(audio) => Ok(PreparedStream {
                stream: OutgoingStream::new(video, audio.clone())?,
                placeholder: None,
            }),
            None => {
                let silent = SilentAudioTrack::new();
                let audio: TrackRef = silent.clone();
                Ok(PreparedStream {
                    stream: OutgoingStream::new(video, audio)?,
                    placeholder: Some(silent),
                })
            }
        }
    }

    /// Makes a prepared stream current and releases the placeholder it
    /// supersedes.
    pub fn commit(&mut self, prepared: PreparedStream) -> OutgoingStream {
        let retired = std::mem::replace(&mut self.placeholder, prepared.placeholder);
        if let Some(old) = retired {
            debug!("retiring silent placeholder {}", old.id());
            old.stop();
        }
        self.current = Some(prepared.stream.clone());
        prepared.stream
    }

    /// Drops a prepared stream that will not be committed.
    pub fn discard(&self, prepared: PreparedStream) {
        if let Some(silent) = prepared.placeholder {
            silent.stop();
        }
    }

    /// Composes and commits in one step.
    pub fn compose(&mut self, raw: &CapturedStream) -> Result<OutgoingStream, ComposeError> {
        let prepared = self.prepare(raw)?;
        Ok(self.commit(prepared))
    }

    pub fn current(&self) -> Option<&OutgoingStream> {
        self.current.as_ref()
    }

    pub fn placeholder(&self) -> Option<&Arc<SilentAudioTrack>> {
        self.placeholder.as_ref()
    }

    /// Whether the current audio leg is the synthesized placeholder rather
    /// than captured audio.
    pub fn has_placeholder_audio(&self) -> bool {
        match (&self.current, &self.placeholder) {
            (Some(stream), Some(silent)) => stream.audio().id() == silent.id(),
            _ => false,
        }
    }

    /// Forgets the current stream and stops the placeholder.
    pub fn clear(&mut self) {
        if let Some(silent) = self.placeholder.take() {
            silent.stop();
        }
        self.current = None;
    }
}
