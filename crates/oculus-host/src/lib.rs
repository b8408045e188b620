#![forbid(unsafe_code)]

//! Broadcaster side of an Oculus screen share.
//!
//! The broadcaster registers under `host-<sessionId>`, waits for viewers to
//! open signaling connections, and calls each of them with the composed
//! two-track stream. Re-captures, quality changes and mute toggles are
//! applied to every live call in place.

pub mod broadcaster;
pub mod capture;
pub mod control;
pub mod error;
pub mod registry;
pub mod session;

pub use broadcaster::{BroadcastCommand, BroadcastStatus, Broadcaster, BroadcasterHandle};
pub use capture::{AudioToggle, CaptureLifecycle, CAPTURE_DENIED_MESSAGE, NO_TAB_AUDIO_MESSAGE};
pub use control::{ChannelControlSink, ControlSink, NullControlSink, RecordingControlSink};
pub use error::{HostError, Result};
pub use registry::{ViewerEntry, ViewerRegistry};
pub use session::{
    BroadcastState, BroadcasterSessionController, HostContext, HostEvent, HostNotice,
    ReplaceReport,
};
