use oculus_peer::PeerError;

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error("viewer session is closed")]
    Closed,

    #[error(transparent)]
    Peer(#[from] PeerError),
}

pub type Result<T> = std::result::Result<T, ViewerError>;
