//! Peer transport seam for Oculus.
//!
//! The session layer never talks WebRTC directly. It registers identities,
//! opens data connections, places and answers media calls, and swaps tracks
//! or encoder parameters on the resulting senders through the traits in
//! [`transport`]. Every connection reports a small closed set of events on a
//! channel; controllers fold those channels into a single event loop.
//!
//! [`loopback`] provides an in-memory implementation used by tests and the
//! CLI demo.

#![forbid(unsafe_code)]

pub mod error;
pub mod ice;
pub mod loopback;
pub mod schedule;
pub mod transport;

pub use error::{PeerError, PeerErrorKind, SenderError};
pub use ice::{FetchOutcome, HttpIceFetcher, IceFetcher, StaticIceFetcher};
pub use loopback::LoopbackNetwork;
pub use schedule::{ManualScheduler, RetryPolicy, ScheduledTask, Scheduler, TokioScheduler};
pub use transport::{
    forward_events, CallEvent, CallLink, ConnectOptions, ConnectionEvent, DataConnection,
    DataLink, EncodingParameters, IncomingCall, MediaConnection, PeerConfig, PeerEvent,
    PeerHandle, PeerLink, PeerTransport, Priority, RemoteStream, RtpSender, SendParameters,
};
