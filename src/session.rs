//! Anonymous session id and presence bookkeeping with the matching backend.
//!
//! Nothing here may hold up a chat: session creation falls back to a local
//! id, and presence calls only log their failures.

use crate::config::ApiEndpoints;
use crate::error::ApiError;
use crate::utils::local_session_id;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PresenceBody<'a> {
    session_id: &'a str,
}

#[derive(Clone)]
pub struct SessionRegistrar {
    client: reqwest::Client,
    endpoints: Option<ApiEndpoints>,
    timeout: Duration,
}

impl SessionRegistrar {
    pub fn new(client: reqwest::Client, endpoints: Option<ApiEndpoints>, timeout: Duration) -> Self {
        Self {
            client,
            endpoints,
            timeout,
        }
    }

    /// Backend-issued id, or a locally generated one when the backend is
    /// absent, slow or failing.
    pub async fn create_session(&self) -> String {
        match self.request_session().await {
            Ok(id) => {
                info!(session_id = %id, "session created");
                id
            }
            Err(err) => {
                let id = local_session_id();
                match err {
                    ApiError::NotConfigured => debug!(session_id = %id, "using local session id"),
                    err => warn!(session_id = %id, error = %err, "session creation failed; using local id"),
                }
                id
            }
        }
    }

    async fn request_session(&self) -> Result<String, ApiError> {
        let endpoints = self.endpoints.as_ref().ok_or(ApiError::NotConfigured)?;
        // One deadline for headers and body together.
        let request = async {
            let response = self
                .client
                .post(endpoints.session.clone())
                .json(&serde_json::json!({}))
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(ApiError::Status(response.status()));
            }
            Ok::<_, ApiError>(response.json::<SessionResponse>().await?)
        };
        let body = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| ApiError::Timeout)??;
        body.session_id
            .filter(|id| !id.is_empty())
            .ok_or(ApiError::MissingField("sessionId"))
    }

    pub async fn register_presence(&self, session_id: &str) {
        self.post_presence(Endpoint::Register, session_id).await;
    }

    pub async fn heartbeat(&self, session_id: &str) {
        self.post_presence(Endpoint::Heartbeat, session_id).await;
    }

    pub async fn unregister(&self, session_id: &str) {
        self.post_presence(Endpoint::Leave, session_id).await;
    }

    async fn post_presence(&self, endpoint: Endpoint, session_id: &str) {
        let Some(endpoints) = self.endpoints.as_ref() else {
            return;
        };
        let url = endpoint.url(endpoints);
        match self.post(url, session_id).await {
            Ok(()) => debug!(%session_id, call = endpoint.name(), "presence updated"),
            Err(err) => warn!(%session_id, call = endpoint.name(), error = %err, "presence call failed"),
        }
    }

    async fn post(&self, url: &Url, session_id: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(url.clone())
            .timeout(self.timeout)
            .json(&PresenceBody { session_id })
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ApiError::Status(response.status()))
        }
    }

    /// Heartbeats on `interval` until the returned handle is cancelled or dropped.
    pub fn spawn_heartbeat(&self, session_id: String, interval: Duration) -> HeartbeatHandle {
        let registrar = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; registration already covered it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registrar.heartbeat(&session_id).await;
            }
        });
        HeartbeatHandle { task: Some(task) }
    }
}

#[derive(Clone, Copy)]
enum Endpoint {
    Register,
    Heartbeat,
    Leave,
}

impl Endpoint {
    fn url(self, endpoints: &ApiEndpoints) -> &Url {
        match self {
            Endpoint::Register => &endpoints.presence,
            Endpoint::Heartbeat => &endpoints.heartbeat,
            Endpoint::Leave => &endpoints.leave,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Endpoint::Register => "register",
            Endpoint::Heartbeat => "heartbeat",
            Endpoint::Leave => "leave",
        }
    }
}

pub struct HeartbeatHandle {
    task: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
