// Runtime configuration. Everything has a default so the client can start
// without a backend; `from_env` overrides individual values.

use crate::error::ChatError;
use std::time::Duration;
use url::Url;

pub const DEFAULT_SIGNALING_URL: &str = "ws://localhost:8080/ws/random-chat";

/// Public STUN set used until (or unless) TURN credentials are issued.
pub const DEFAULT_STUN_URLS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
pub const STATS_INTERVAL: Duration = Duration::from_secs(30);
/// Pause between a partner leaving and the automatic re-join.
pub const REQUEUE_DELAY: Duration = Duration::from_secs(1);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base url of the backend gateway. `None` runs every HTTP collaborator
    /// in its offline fallback.
    pub api_base: Option<String>,
    pub signaling_url: String,
    pub heartbeat_interval: Duration,
    pub stats_interval: Duration,
    pub requeue_delay: Duration,
    pub request_timeout: Duration,
    pub stun_urls: Vec<String>,
    pub audio: bool,
    pub video: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            stats_interval: STATS_INTERVAL,
            requeue_delay: REQUEUE_DELAY,
            request_timeout: REQUEST_TIMEOUT,
            stun_urls: DEFAULT_STUN_URLS.iter().map(|s| s.to_string()).collect(),
            audio: true,
            video: true,
        }
    }
}

impl ChatConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(base) = env_string("RANDCHAT_API_BASE") {
            config.api_base = Some(base);
        }
        if let Some(url) = env_string("RANDCHAT_SIGNALING_URL") {
            config.signaling_url = url;
        }
        if let Some(d) = env_millis("RANDCHAT_HEARTBEAT_MS") {
            config.heartbeat_interval = d;
        }
        if let Some(d) = env_millis("RANDCHAT_STATS_MS") {
            config.stats_interval = d;
        }
        if let Some(d) = env_millis("RANDCHAT_REQUEUE_DELAY_MS") {
            config.requeue_delay = d;
        }
        if let Some(d) = env_millis("RANDCHAT_REQUEST_TIMEOUT_MS") {
            config.request_timeout = d;
        }
        if let Some(urls) = env_string("RANDCHAT_STUN_URLS") {
            let urls: Vec<String> = urls
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !urls.is_empty() {
                config.stun_urls = urls;
            }
        }
        config
    }

    pub fn endpoints(&self) -> Result<Option<ApiEndpoints>, ChatError> {
        self.api_base
            .as_deref()
            .map(ApiEndpoints::from_base)
            .transpose()
    }
}

fn env_string(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_millis(var: &str) -> Option<Duration> {
    env_string(var)
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Urls of the backend collaborators, derived from one base url.
#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    pub session: Url,
    pub presence: Url,
    pub heartbeat: Url,
    pub leave: Url,
    pub ice_servers: Url,
    pub stats: Url,
}

impl ApiEndpoints {
    pub fn from_base(base: &str) -> Result<Self, ChatError> {
        let mut base = Url::parse(base)
            .map_err(|err| ChatError::Config(format!("invalid api base {base}: {err}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let join = |path: &str| {
            base.join(path)
                .map_err(|err| ChatError::Config(format!("invalid endpoint {path}: {err}")))
        };
        Ok(Self {
            session: join("api/random-chat/session")?,
            presence: join("api/random-chat/presence")?,
            heartbeat: join("api/random-chat/presence/heartbeat")?,
            leave: join("api/random-chat/presence/leave")?,
            ice_servers: join("api/random-chat/ice-servers")?,
            stats: join("api/random-chat/stats")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_keep_base_path() {
        let endpoints = ApiEndpoints::from_base("https://gw.example.com/v1").unwrap();
        assert_eq!(
            endpoints.session.as_str(),
            "https://gw.example.com/v1/api/random-chat/session"
        );
        assert_eq!(
            endpoints.stats.as_str(),
            "https://gw.example.com/v1/api/random-chat/stats"
        );
    }

    #[test]
    fn invalid_base_is_a_config_error() {
        assert!(matches!(
            ApiEndpoints::from_base("not a url"),
            Err(ChatError::Config(_))
        ));
    }

    #[test]
    fn default_config_runs_offline_with_stun() {
        let config = ChatConfig::default();
        assert!(config.endpoints().unwrap().is_none());
        assert!(!config.stun_urls.is_empty());
        assert_eq!(config.requeue_delay, Duration::from_secs(1));
    }
}
