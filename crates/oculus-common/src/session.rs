//! Session tokens, peer identities and share links.
//!
//! The session token is the only secret a broadcaster and its viewers share.
//! Discovery is purely by naming convention: the broadcaster registers with
//! the transport as `host-<token>` and viewers dial that name.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Prefix of the broadcaster's peer identity.
pub const HOST_PREFIX: &str = "host-";

/// Opaque, unguessable broadcast token (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Mints a fresh random token for a new broadcast.
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| Error::invalid_session(format!("{s:?}: {e}")))
    }
}

/// Name under which a peer registers with the signaling transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    /// The broadcaster identity derived from a session token.
    pub fn host(session_id: &SessionId) -> Self {
        Self(format!("{HOST_PREFIX}{session_id}"))
    }

    /// An identity assigned by the transport to an anonymous viewer.
    pub fn anonymous(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn is_host(&self) -> bool {
        self.session_id().is_some()
    }

    /// The session this identity broadcasts, if it is a host identity.
    pub fn session_id(&self) -> Option<SessionId> {
        self.0
            .strip_prefix(HOST_PREFIX)
            .and_then(|rest| rest.parse().ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PeerIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds the shareable viewer link `<base>/watch/<sessionId>`.
pub fn share_url(viewer_base_url: &str, session_id: &SessionId) -> String {
    format!(
        "{}/watch/{}",
        viewer_base_url.trim_end_matches('/'),
        session_id
    )
}

/// Recovers the session token from a viewer link.
pub fn parse_share_url(link: &str) -> Result<SessionId> {
    let url = url::Url::parse(link).map_err(|e| Error::invalid_session(format!("{link}: {e}")))?;
    let mut segments = url
        .path_segments()
        .ok_or_else(|| Error::invalid_session(format!("{link}: no path")))?
        .filter(|segment| !segment.is_empty());

    while let Some(segment) = segments.next() {
        if segment == "watch" {
            let id = segments
                .next()
                .ok_or_else(|| Error::invalid_session(format!("{link}: missing session id")))?;
            return id.parse();
        }
    }

    Err(Error::invalid_session(format!(
        "{link}: not a /watch/<session> link"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_identity_round_trips_session() {
        let session = SessionId::mint();
        let host = PeerIdentity::host(&session);

        assert!(host.as_str().starts_with("host-"));
        assert!(host.is_host());
        assert_eq!(host.session_id(), Some(session));
    }

    #[test]
    fn test_anonymous_identity_is_not_host() {
        let viewer = PeerIdentity::anonymous("3f1c2a");
        assert!(!viewer.is_host());
        assert_eq!(viewer.session_id(), None);

        let lookalike = PeerIdentity::anonymous("host-not-a-uuid");
        assert!(!lookalike.is_host());
    }

    #[test]
    fn test_minted_sessions_are_distinct() {
        assert_ne!(SessionId::mint(), SessionId::mint());
    }

    #[test]
    fn test_session_id_rejects_garbage() {
        assert!(matches!(
            "definitely-not-a-uuid".parse::<SessionId>(),
            Err(Error::InvalidSession(_))
        ));
    }

    #[test]
    fn test_share_url_round_trip() {
        let session = SessionId::mint();
        let link = share_url("https://watch.example.com/", &session);

        assert_eq!(link, format!("https://watch.example.com/watch/{session}"));
        assert_eq!(parse_share_url(&link).unwrap(), session);
    }

    #[test]
    fn test_parse_share_url_rejects_other_paths() {
        assert!(parse_share_url("https://watch.example.com/about").is_err());
        assert!(parse_share_url("https://watch.example.com/watch/").is_err());
        assert!(matches!(
            parse_share_url("not a url"),
            Err(Error::InvalidSession(_))
        ));
    }

    #[test]
    fn test_session_id_serializes_as_plain_string() {
        let session = SessionId::mint();
        let json = serde_json::to_string(&session).unwrap();
        assert_eq!(json, format!("\"{session}\""));
    }
}
