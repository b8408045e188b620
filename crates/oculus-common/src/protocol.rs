use serde::{Deserialize, Serialize};

use crate::session::SessionId;

/// Commands exchanged between the UI surfaces and the process holding the
/// active broadcast.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
#[allow(non_camel_case_types)]
pub enum ControlMessage {
    /// Begin broadcasting under a freshly minted session.
    START_BROADCAST {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },

    /// The broadcast ended; the holder forgets the active session.
    STOP_BROADCAST,

    /// Ask the holder which session (if any) is live.
    GET_SESSION,

    /// Bring the broadcaster's control surface to the front.
    FOCUS_TOOLBOX,
}

/// Reply to a [`ControlMessage`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ControlResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// `urls` may be a single string or a list in the relay credential payload.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}

impl IceUrls {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            IceUrls::One(url) => vec![url.clone()],
            IceUrls::Many(urls) => urls.clone(),
        }
    }
}

/// Relay/STUN server descriptor handed to the transport unmodified.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: IceUrls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: IceUrls::One(url.into()),
            username: None,
            credential: None,
        }
    }
}

/// Body of `GET /api/turn`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct IceServersResponse {
    #[serde(rename = "iceServers", default)]
    pub ice_servers: Vec<IceServer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_message_wire_shape() {
        let session = SessionId::mint();
        let start = ControlMessage::START_BROADCAST {
            session_id: session,
        };
        let json = serde_json::to_value(&start).unwrap();
        assert_eq!(json["type"], "START_BROADCAST");
        assert_eq!(json["sessionId"], session.to_string());

        let stop: ControlMessage = serde_json::from_str(r#"{"type":"STOP_BROADCAST"}"#).unwrap();
        assert_eq!(stop, ControlMessage::STOP_BROADCAST);
    }

    #[test]
    fn test_get_session_response_omits_missing_session() {
        let empty = ControlResponse {
            success: true,
            session_id: None,
        };
        let json = serde_json::to_string(&empty).unwrap();
        assert_eq!(json, r#"{"success":true}"#);
    }

    #[test]
    fn test_ice_servers_accept_string_or_list_urls() {
        let body = r#"{
            "iceServers": [
                {"urls": "stun:stun.example.com:3478"},
                {"urls": ["turn:turn.example.com:3478?transport=udp", "turns:turn.example.com:5349"],
                 "username": "u", "credential": "c"}
            ]
        }"#;
        let parsed: IceServersResponse = serde_json::from_str(body).unwrap();

        assert_eq!(parsed.ice_servers.len(), 2);
        assert_eq!(parsed.ice_servers[0].urls.to_vec().len(), 1);
        assert_eq!(parsed.ice_servers[1].urls.to_vec().len(), 2);
        assert_eq!(parsed.ice_servers[1].username.as_deref(), Some("u"));
    }

    #[test]
    fn test_error_body_degrades_to_empty_server_list() {
        let parsed: IceServersResponse =
            serde_json::from_str(r#"{"error":"Failed to fetch TURN credentials"}"#).unwrap();
        assert!(parsed.ice_servers.is_empty());
    }
}
