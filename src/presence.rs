use crate::error::ApiError;
use crate::signaling::message::PresenceCounts;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

/// Polls online/looking counts for display. Independent of matching.
#[derive(Clone)]
pub struct PresencePoller {
    client: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

impl PresencePoller {
    pub fn new(client: reqwest::Client, endpoint: Url, timeout: Duration) -> Self {
        Self {
            client,
            endpoint,
            timeout,
        }
    }

    pub async fn fetch_counts(&self) -> Result<PresenceCounts, ApiError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .timeout(self.timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ApiError::Status(response.status()));
        }
        Ok(response.json().await?)
    }

    /// Polls immediately, then every `interval`. A failed poll keeps the last
    /// published counts.
    pub fn spawn(self, interval: Duration) -> PresenceWatch {
        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.fetch_counts().await {
                    Ok(counts) => {
                        debug!(
                            online = ?counts.online_count,
                            looking = ?counts.looking_count,
                            "presence counts"
                        );
                        if tx.send(Some(counts)).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "stats poll failed"),
                }
            }
        });
        PresenceWatch { counts: rx, task }
    }
}

pub struct PresenceWatch {
    counts: watch::Receiver<Option<PresenceCounts>>,
    task: JoinHandle<()>,
}

impl PresenceWatch {
    pub fn latest(&self) -> Option<PresenceCounts> {
        *self.counts.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PresenceCounts>> {
        self.counts.clone()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for PresenceWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}
