//! Transport error taxonomy.

use std::fmt;

/// Classification of transport-level failures, mirroring the error types the
/// signaling library reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerErrorKind {
    /// The dialed identity is not registered (yet).
    PeerUnavailable,
    /// The requested identity is already registered by someone else.
    UnavailableId,
    /// Lost or could not reach the signaling server.
    Network,
    /// The signaling server rejected the request.
    ServerError,
    SocketError,
    /// The peer is disconnected from signaling and cannot place new requests.
    Disconnected,
    Other,
}

impl PeerErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PeerErrorKind::PeerUnavailable => "peer-unavailable",
            PeerErrorKind::UnavailableId => "unavailable-id",
            PeerErrorKind::Network => "network",
            PeerErrorKind::ServerError => "server-error",
            PeerErrorKind::SocketError => "socket-error",
            PeerErrorKind::Disconnected => "disconnected",
            PeerErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for PeerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct PeerError {
    pub kind: PeerErrorKind,
    pub message: String,
}

impl PeerError {
    pub fn new(kind: PeerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn peer_unavailable(target: &str) -> Self {
        Self::new(
            PeerErrorKind::PeerUnavailable,
            format!("Could not connect to peer {target}"),
        )
    }

    pub fn is_peer_unavailable(&self) -> bool {
        self.kind == PeerErrorKind::PeerUnavailable
    }
}

/// Failure applying an operation to a single sending leg.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SenderError {
    #[error("operation not supported by this transport")]
    Unsupported,
    #[error("connection is closed")]
    Closed,
    #[error("track kind {got} does not match sender kind {expected}")]
    KindMismatch {
        expected: oculus_media::TrackKind,
        got: oculus_media::TrackKind,
    },
    #[error("rejected: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uses_library_names() {
        let err = PeerError::peer_unavailable("host-abc");
        assert_eq!(
            err.to_string(),
            "peer-unavailable: Could not connect to peer host-abc"
        );
        assert!(err.is_peer_unavailable());
        assert!(!PeerError::new(PeerErrorKind::Network, "lost").is_peer_unavailable());
    }
}
