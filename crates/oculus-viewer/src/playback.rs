//! Where received media ends up.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use oculus_peer::RemoteStream;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    /// The environment refused to start playback without a user gesture.
    #[error("autoplay was blocked: {0}")]
    AutoplayBlocked(String),
}

pub trait Playback: Send + Sync + fmt::Debug {
    /// Starts rendering `stream`, replacing whatever was attached.
    fn attach(&self, stream: RemoteStream, muted: bool) -> Result<(), PlaybackError>;

    fn detach(&self);

    fn set_muted(&self, muted: bool);

    fn is_muted(&self) -> bool;
}

#[derive(Debug)]
struct HeadlessState {
    stream: Option<RemoteStream>,
    muted: bool,
    attachments: usize,
}

/// Playback sink that renders nothing and remembers what it was given.
#[derive(Debug)]
pub struct HeadlessPlayback {
    state: Mutex<HeadlessState>,
}

impl Default for HeadlessPlayback {
    fn default() -> Self {
        Self {
            state: Mutex::new(HeadlessState {
                stream: None,
                muted: true,
                attachments: 0,
            }),
        }
    }
}

impl HeadlessPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream_id(&self) -> Option<String> {
        self.lock().stream.as_ref().map(|s| s.id.clone())
    }

    pub fn track_count(&self) -> usize {
        self.lock().stream.as_ref().map_or(0, |s| s.tracks.len())
    }

    /// How many streams have been attached over this sink's lifetime.
    pub fn attachments(&self) -> usize {
        self.lock().attachments
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Playback for HeadlessPlayback {
    fn attach(&self, stream: RemoteStream, muted: bool) -> Result<(), PlaybackError> {
        debug!("attaching {} ({} tracks)", stream.id, stream.tracks.len());
        let mut state = self.lock();
        state.stream = Some(stream);
        state.muted = muted;
        state.attachments += 1;
        Ok(())
    }

    fn detach(&self) {
        self.lock().stream = None;
    }

    fn set_muted(&self, muted: bool) {
        self.lock().muted = muted;
    }

    fn is_muted(&self) -> bool {
        self.lock().muted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_playback_tracks_attachments() {
        let playback = HeadlessPlayback::new();
        assert!(playback.is_muted());

        playback
            .attach(
                RemoteStream {
                    id: "s1".into(),
                    tracks: Vec::new(),
                },
                true,
            )
            .unwrap();
        playback.set_muted(false);

        assert_eq!(playback.stream_id().as_deref(), Some("s1"));
        assert!(!playback.is_muted());
        assert_eq!(playback.attachments(), 1);

        playback.detach();
        assert_eq!(playback.stream_id(), None);
    }
}
