//! Relay credential retrieval.
//!
//! Credentials come from `GET <turn_endpoint>` as `{ "iceServers": [...] }`
//! and are handed to the transport verbatim. A failed fetch never blocks a
//! connection attempt; it degrades to an empty server list.

use std::time::Duration;

use async_trait::async_trait;
use oculus_common::{IceServer, IceServersResponse};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Servers(Vec<IceServer>),
    /// The owning attempt was cancelled; the result must be ignored.
    Aborted,
}

impl FetchOutcome {
    pub fn servers(self) -> Option<Vec<IceServer>> {
        match self {
            FetchOutcome::Servers(servers) => Some(servers),
            FetchOutcome::Aborted => None,
        }
    }
}

#[async_trait]
pub trait IceFetcher: Send + Sync + std::fmt::Debug {
    async fn fetch(&self, cancel: &CancellationToken) -> FetchOutcome;
}

#[derive(Debug, Clone)]
pub struct HttpIceFetcher {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpIceFetcher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request(&self) -> Result<Vec<IceServer>, reqwest::Error> {
        let body = self
            .client
            .get(&self.endpoint)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<IceServersResponse>()
            .await?;
        Ok(body.ice_servers)
    }
}

#[async_trait]
impl IceFetcher for HttpIceFetcher {
    async fn fetch(&self, cancel: &CancellationToken) -> FetchOutcome {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("ICE fetch from {} aborted", self.endpoint);
                FetchOutcome::Aborted
            }
            result = self.request() => match result {
                Ok(servers) => {
                    debug!("fetched {} ICE servers from {}", servers.len(), self.endpoint);
                    FetchOutcome::Servers(servers)
                }
                Err(e) => {
                    warn!("Failed to fetch TURN credentials from {}: {}", self.endpoint, e);
                    FetchOutcome::Servers(Vec::new())
                }
            }
        }
    }
}

/// Returns a fixed server list. Used with the loopback transport.
#[derive(Debug, Clone, Default)]
pub struct StaticIceFetcher {
    servers: Vec<IceServer>,
}

impl StaticIceFetcher {
    pub fn new(servers: Vec<IceServer>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl IceFetcher for StaticIceFetcher {
    async fn fetch(&self, cancel: &CancellationToken) -> FetchOutcome {
        if cancel.is_cancelled() {
            return FetchOutcome::Aborted;
        }
        FetchOutcome::Servers(self.servers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_fetcher_honors_cancellation() {
        let fetcher = StaticIceFetcher::new(vec![IceServer::stun("stun:stun.l.google.com:19302")]);
        let token = CancellationToken::new();

        let servers = fetcher.fetch(&token).await.servers().unwrap();
        assert_eq!(servers.len(), 1);

        token.cancel();
        assert_eq!(fetcher.fetch(&token).await, FetchOutcome::Aborted);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_degrades_to_empty_list() {
        // Port 9 (discard) on loopback refuses connections.
        let fetcher = HttpIceFetcher::new("http://127.0.0.1:9/api/turn", Duration::from_millis(500));
        let outcome = fetcher.fetch(&CancellationToken::new()).await;
        assert_eq!(outcome, FetchOutcome::Servers(Vec::new()));
    }

    #[tokio::test]
    async fn test_cancelled_http_fetch_is_aborted() {
        let fetcher = HttpIceFetcher::new("http://127.0.0.1:9/api/turn", Duration::from_secs(5));
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(fetcher.fetch(&token).await, FetchOutcome::Aborted);
    }
}
