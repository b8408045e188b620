#![forbid(unsafe_code)]

//! Viewer side of an Oculus screen share.
//!
//! A viewer joins with nothing but the session id. It keeps retrying quietly
//! until the broadcaster shows up, answers the broadcaster's call
//! receive-only and hands the remote stream to a [`Playback`] sink.

pub mod error;
pub mod playback;
pub mod session;
pub mod viewer;

pub use error::{Result, ViewerError};
pub use playback::{HeadlessPlayback, Playback, PlaybackError};
pub use session::{ViewState, ViewerContext, ViewerEvent, ViewerSessionController};
pub use viewer::{Viewer, ViewerCommand, ViewerHandle, ViewerStatus};
