use crate::error::ApiError;
use crate::peer::types::ServerConfig;
use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// TURN credentials as issued by the trust endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnCredentials {
    pub username: String,
    pub credential: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub ttl: Option<u64>,
}

/// Holds the active ICE server list.
///
/// The list always has at least the configured STUN entries. A successful
/// fetch replaces it with STUN plus the issued TURN entry; a failed fetch
/// keeps whatever was last known.
#[derive(Clone)]
pub struct IceConfigProvider {
    client: reqwest::Client,
    endpoint: Option<Url>,
    timeout: Duration,
    stun: Vec<ServerConfig>,
    active: Arc<RwLock<Vec<ServerConfig>>>,
}

impl IceConfigProvider {
    pub fn new(
        client: reqwest::Client,
        endpoint: Option<Url>,
        stun_urls: &[String],
        timeout: Duration,
    ) -> Self {
        let mut stun: Vec<ServerConfig> = stun_urls
            .iter()
            .enumerate()
            .map(|(i, url)| ServerConfig::stun(format!("default-stun-{i}"), url.clone()))
            .collect();
        if stun.is_empty() {
            stun = crate::config::DEFAULT_STUN_URLS
                .iter()
                .enumerate()
                .map(|(i, url)| ServerConfig::stun(format!("default-stun-{i}"), *url))
                .collect();
        }
        Self {
            client,
            endpoint,
            timeout,
            active: Arc::new(RwLock::new(stun.clone())),
            stun,
        }
    }

    /// Offline provider: public STUN only.
    pub fn stun_only(stun_urls: &[String]) -> Self {
        Self::new(reqwest::Client::new(), None, stun_urls, Duration::from_secs(5))
    }

    pub fn current(&self) -> Vec<ServerConfig> {
        self.active.read().clone()
    }

    /// Fetches fresh credentials and returns the list now active.
    pub async fn fetch_ice_servers(&self) -> Vec<ServerConfig> {
        match self.request_credentials().await {
            Ok(creds) => {
                let servers = self.with_turn(&creds);
                info!(
                    servers = servers.len(),
                    ttl = ?creds.ttl,
                    "ice servers refreshed"
                );
                *self.active.write() = servers.clone();
                servers
            }
            Err(ApiError::NotConfigured) => {
                debug!("no ice credential endpoint configured; using stun only");
                self.current()
            }
            Err(err) => {
                warn!(error = %err, "ice credential fetch failed; keeping last known servers");
                self.current()
            }
        }
    }

    async fn request_credentials(&self) -> Result<TurnCredentials, ApiError> {
        let endpoint = self.endpoint.as_ref().ok_or(ApiError::NotConfigured)?;
        let response = self
            .client
            .get(endpoint.clone())
            .timeout(self.timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ApiError::Status(response.status()));
        }
        let creds: TurnCredentials = response.json().await?;
        if creds.urls.is_empty() && creds.url.is_none() {
            return Err(ApiError::MissingField("urls"));
        }
        Ok(creds)
    }

    fn with_turn(&self, creds: &TurnCredentials) -> Vec<ServerConfig> {
        let mut servers = self.stun.clone();
        let urls = creds.urls.iter().chain(creds.url.iter());
        for (i, url) in urls.enumerate() {
            let kind = if url.starts_with("stun:") { "stun" } else { "turn" };
            servers.push(ServerConfig {
                id: format!("issued-{kind}-{i}"),
                r#type: kind.to_string(),
                url: url.clone(),
                username: Some(creds.username.clone()),
                credential: Some(creds.credential.clone()),
            });
        }
        servers
    }
}
