//! Transport traits and the closed event sets they emit.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use oculus_common::{IceServer, PeerIdentity};
use oculus_media::{OutgoingStream, TrackKind, TrackRef};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{PeerError, SenderError};

/// Settings handed to the transport at registration time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerConfig {
    pub ice_servers: Vec<IceServer>,
    pub ice_candidate_pool_size: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    pub reliable: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self { reliable: true }
    }
}

/// Media received from the remote side of a call.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    pub id: String,
    pub tracks: Vec<TrackRef>,
}

impl RemoteStream {
    pub fn video(&self) -> Option<&TrackRef> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio(&self) -> Option<&TrackRef> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }
}

/// Events on a registered peer identity.
#[derive(Debug)]
pub enum PeerEvent {
    /// Registration completed under the given id.
    Open(String),
    /// A remote peer opened a data connection to us.
    Connection(DataLink),
    /// A remote peer is calling us.
    Call(Box<dyn IncomingCall>),
    /// Lost the signaling server. Established media keeps flowing.
    Disconnected,
    Error(PeerError),
    Close,
}

/// Events on a data (signaling) connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Open,
    Data(serde_json::Value),
    Close,
    Error(String),
}

/// Events on a media call.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Remote media is flowing.
    Stream(RemoteStream),
    Close,
    Error(String),
}

#[derive(Debug)]
pub struct PeerLink {
    pub handle: Arc<dyn PeerHandle>,
    pub events: mpsc::UnboundedReceiver<PeerEvent>,
}

#[derive(Debug)]
pub struct DataLink {
    pub connection: Arc<dyn DataConnection>,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

#[derive(Debug)]
pub struct CallLink {
    pub call: Arc<dyn MediaConnection>,
    pub events: mpsc::UnboundedReceiver<CallEvent>,
}

#[async_trait]
pub trait PeerTransport: Send + Sync + fmt::Debug {
    /// Registers a peer. `None` asks the transport to assign an anonymous id.
    ///
    /// Completion is reported as [`PeerEvent::Open`] on the returned link.
    async fn register(
        &self,
        identity: Option<PeerIdentity>,
        config: PeerConfig,
    ) -> Result<PeerLink, PeerError>;
}

#[async_trait]
pub trait PeerHandle: Send + Sync + fmt::Debug {
    /// Identity this peer is registered under.
    fn id(&self) -> &PeerIdentity;

    async fn connect(
        &self,
        target: &PeerIdentity,
        options: ConnectOptions,
    ) -> Result<DataLink, PeerError>;

    async fn call(
        &self,
        target: &PeerIdentity,
        stream: &OutgoingStream,
    ) -> Result<CallLink, PeerError>;

    /// Re-establishes the signaling connection in place, keeping the
    /// identity and every established connection.
    fn reconnect(&self) -> Result<(), PeerError>;

    /// Closes every connection and releases the identity.
    fn destroy(&self);

    fn is_destroyed(&self) -> bool;
}

pub trait DataConnection: Send + Sync + fmt::Debug {
    fn peer(&self) -> &PeerIdentity;

    fn is_open(&self) -> bool;

    fn send(&self, data: serde_json::Value) -> Result<(), PeerError>;

    fn close(&self);
}

pub trait MediaConnection: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn peer(&self) -> &PeerIdentity;

    /// Sending legs, one per local track offered on this call.
    fn senders(&self) -> Vec<Arc<dyn RtpSender>>;

    fn is_open(&self) -> bool;

    fn close(&self);
}

#[async_trait]
pub trait IncomingCall: Send + Sync + fmt::Debug {
    fn peer(&self) -> &PeerIdentity;

    /// Accepts the call. `None` answers receive-only.
    async fn answer(&self, stream: Option<&OutgoingStream>) -> Result<CallLink, PeerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    VeryLow,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodingParameters {
    pub max_bitrate_bps: Option<u64>,
    pub scale_resolution_down_by: Option<f64>,
    pub priority: Option<Priority>,
    pub network_priority: Option<Priority>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendParameters {
    pub encodings: Vec<EncodingParameters>,
}

#[async_trait]
pub trait RtpSender: Send + Sync + fmt::Debug {
    fn track(&self) -> Option<TrackRef>;

    fn kind(&self) -> Option<TrackKind> {
        self.track().map(|track| track.kind())
    }

    /// Swaps the outgoing track without renegotiating the connection.
    async fn replace_track(&self, track: TrackRef) -> Result<(), SenderError>;

    fn parameters(&self) -> SendParameters;

    async fn set_parameters(&self, parameters: SendParameters) -> Result<(), SenderError>;
}

/// Pumps a connection's events into a controller's event loop until either
/// side goes away.
pub fn forward_events<E, T, F>(
    mut events: mpsc::UnboundedReceiver<E>,
    sink: mpsc::UnboundedSender<T>,
    wrap: F,
) -> JoinHandle<()>
where
    E: Send + 'static,
    T: Send + 'static,
    F: Fn(E) -> T + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if sink.send(wrap(event)).is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_events_tags_and_stops_when_sink_closes() {
        let (src_tx, src_rx) = mpsc::unbounded_channel::<u32>();
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel::<(u8, u32)>();

        let task = forward_events(src_rx, sink_tx, |n| (7, n));
        src_tx.send(1).unwrap();
        src_tx.send(2).unwrap();

        assert_eq!(sink_rx.recv().await, Some((7, 1)));
        assert_eq!(sink_rx.recv().await, Some((7, 2)));

        drop(sink_rx);
        src_tx.send(3).unwrap();
        task.await.unwrap();
    }

    #[test]
    fn test_connect_defaults_to_reliable() {
        assert!(ConnectOptions::default().reliable);
    }
}
