#![forbid(unsafe_code)]

//! Media model for a screen broadcast.
//!
//! A broadcaster always sends exactly one video and one audio track. When the
//! captured source carries no audio, a synthesized silent track fills the
//! audio slot so every negotiated connection has an audio leg from the start
//! and real audio can later be swapped in without renegotiation.

pub mod capture;
pub mod composer;
pub mod quality;
pub mod silent;
pub mod track;

mod dummy;

pub use capture::{AudioConstraints, CaptureError, CaptureRequest, CapturedStream, DisplayCapture};
pub use composer::{ComposeError, OutgoingStream, OutgoingStreamComposer, PreparedStream};
pub use dummy::{CaptureOutcome, DummyCapture, DummyTrack};
pub use quality::{QualityPreset, QualitySettings};
pub use silent::SilentAudioTrack;
pub use track::{
    same_track, MediaTrack, TrackEnded, TrackError, TrackKind, TrackRef, TrackState,
    VideoConstraints,
};
