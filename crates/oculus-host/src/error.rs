use oculus_media::{CaptureError, ComposeError};
use oculus_peer::PeerError;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("no outgoing stream is ready")]
    NoStream,

    #[error("peer is not registered yet")]
    NotStarted,

    #[error("session has been stopped")]
    Stopped,

    #[error("viewer {0} is not registered")]
    UnknownViewer(String),

    #[error("viewer {0} already has a call")]
    AlreadyCalled(String),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Compose(#[from] ComposeError),
}

pub type Result<T> = std::result::Result<T, HostError>;
