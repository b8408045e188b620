//! Runtime configuration shared by the broadcaster and the viewer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::helpers::{env_string, env_u64};
use crate::session::{share_url, SessionId};

pub const DEFAULT_VIEWER_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_RETRY_DELAY_MS: u64 = 3_000;
pub const DEFAULT_BITRATE_SETTLE_MS: u64 = 1_000;
pub const DEFAULT_ICE_FETCH_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_ICE_CANDIDATE_POOL_SIZE: u8 = 10;
pub const DEFAULT_QUALITY: &str = "720p";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OculusConfig {
    /// Base URL of the viewer web app; share links live under `/watch/`.
    pub viewer_base_url: String,
    /// Relay credential endpoint. Derived from `viewer_base_url` when unset.
    pub turn_endpoint: Option<String>,
    /// Delay between viewer reconnect attempts while the host is not live.
    pub retry_delay_ms: u64,
    /// Delay after a call's media starts flowing before bitrate caps are applied.
    pub bitrate_settle_ms: u64,
    pub ice_fetch_timeout_ms: u64,
    pub ice_candidate_pool_size: u8,
    /// Name of the quality preset selected when a broadcast starts.
    pub default_quality: String,
}

impl Default for OculusConfig {
    fn default() -> Self {
        Self {
            viewer_base_url: DEFAULT_VIEWER_BASE_URL.to_string(),
            turn_endpoint: None,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            bitrate_settle_ms: DEFAULT_BITRATE_SETTLE_MS,
            ice_fetch_timeout_ms: DEFAULT_ICE_FETCH_TIMEOUT_MS,
            ice_candidate_pool_size: DEFAULT_ICE_CANDIDATE_POOL_SIZE,
            default_quality: DEFAULT_QUALITY.to_string(),
        }
    }
}

impl OculusConfig {
    /// Builds a configuration from `OCULUS_*` environment variables on top of
    /// the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = env_string("OCULUS_VIEWER_BASE_URL") {
            config.viewer_base_url = url;
        }
        if let Some(url) = env_string("OCULUS_TURN_URL") {
            config.turn_endpoint = Some(url);
        }
        if let Some(ms) = env_u64("OCULUS_RETRY_DELAY_MS")? {
            config.retry_delay_ms = ms;
        }
        if let Some(ms) = env_u64("OCULUS_BITRATE_SETTLE_MS")? {
            config.bitrate_settle_ms = ms;
        }
        if let Some(ms) = env_u64("OCULUS_ICE_FETCH_TIMEOUT_MS")? {
            config.ice_fetch_timeout_ms = ms;
        }
        if let Some(quality) = env_string("OCULUS_DEFAULT_QUALITY") {
            config.default_quality = quality;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let base = url::Url::parse(&self.viewer_base_url)
            .map_err(|e| Error::config(format!("viewer_base_url: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "viewer_base_url must be http(s), got {}",
                base.scheme()
            )));
        }
        if let Some(turn) = &self.turn_endpoint {
            url::Url::parse(turn).map_err(|e| Error::config(format!("turn_endpoint: {e}")))?;
        }
        if self.retry_delay_ms == 0 {
            return Err(Error::config("retry_delay_ms must be positive"));
        }
        Ok(())
    }

    pub fn turn_url(&self) -> String {
        match &self.turn_endpoint {
            Some(url) => url.clone(),
            None => format!("{}/api/turn", self.viewer_base_url.trim_end_matches('/')),
        }
    }

    pub fn share_url(&self, session_id: &SessionId) -> String {
        share_url(&self.viewer_base_url, session_id)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn bitrate_settle_delay(&self) -> Duration {
        Duration::from_millis(self.bitrate_settle_ms)
    }

    pub fn ice_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_fetch_timeout_ms)
    }
}
