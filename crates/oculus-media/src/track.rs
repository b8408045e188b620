//! Media track abstraction.
//!
//! Tracks are produced by a capture source (or synthesized locally) and are
//! shared read-only between the composer and every outgoing call.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => f.write_str("video"),
            TrackKind::Audio => f.write_str("audio"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended,
}

/// Ideal resolution and frame rate requested from a video source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackError {
    #[error("source does not support constraint changes")]
    Unsupported,
    #[error("track has ended")]
    Ended,
    #[error("source rejected constraints: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    fn enabled(&self) -> bool;

    /// Mutes or unmutes the track without ending it.
    fn set_enabled(&self, enabled: bool);

    fn state(&self) -> TrackState;

    /// Stops the track locally and releases its source. Local stops do not
    /// fire [`MediaTrack::ended`].
    fn stop(&self);

    /// Fires when the source ends the track on its own, e.g. when the
    /// operator revokes sharing through a native control.
    fn ended(&self) -> TrackEnded;

    /// Re-applies capture constraints to a live video track.
    async fn apply_constraints(&self, constraints: VideoConstraints) -> Result<(), TrackError>;
}

pub type TrackRef = Arc<dyn MediaTrack>;

/// Identity comparison for shared tracks.
pub fn same_track(a: &TrackRef, b: &TrackRef) -> bool {
    a.id() == b.id()
}

/// Listener for source-initiated track termination.
#[derive(Debug, Clone)]
pub struct TrackEnded(watch::Receiver<bool>);

impl TrackEnded {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self(rx)
    }

    /// A listener that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self(rx)
    }

    /// Waits until the source ends the track.
    ///
    /// Returns `false` if the track was dropped without its source ending it.
    pub async fn wait(mut self) -> bool {
        loop {
            if *self.0.borrow_and_update() {
                return true;
            }
            if self.0.changed().await.is_err() {
                return *self.0.borrow();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ended_fires_on_source_signal() {
        let (tx, rx) = watch::channel(false);
        let listener = TrackEnded::new(rx);

        let waiter = tokio::spawn(listener.wait());
        tx.send_replace(true);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_ended_reports_drop_without_end() {
        let (tx, rx) = watch::channel(false);
        let listener = TrackEnded::new(rx);
        drop(tx);

        assert!(!listener.wait().await);
    }

    #[tokio::test]
    async fn test_never_listener_returns_false_immediately() {
        assert!(!TrackEnded::never().wait().await);
    }

    #[test]
    fn test_track_kind_display() {
        assert_eq!(TrackKind::Video.to_string(), "video");
        assert_eq!(TrackKind::Audio.to_string(), "audio");
    }
}
