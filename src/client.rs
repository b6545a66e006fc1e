//! Production wiring of a random-chat client.

use crate::commands::{spawn_chat, ChatHandle};
use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::matching::controller::ControllerParts;
use crate::peer::connection::{RemoteTrackSink, RtcPeerFactory};
use crate::peer::ice::IceConfigProvider;
use crate::peer::media::{MediaDevices, SampleTrackDevices};
use crate::presence::{PresencePoller, PresenceWatch};
use crate::session::{HeartbeatHandle, SessionRegistrar};
use crate::signaling::websocket::WebSocketConnector;
use std::sync::Arc;
use tracing::info;

/// One anonymous session: registered presence, heartbeat, optional stats
/// polling and the chat controller.
pub struct RandomChat {
    session_id: String,
    registrar: SessionRegistrar,
    heartbeat: HeartbeatHandle,
    presence: Option<PresenceWatch>,
    handle: ChatHandle,
}

impl RandomChat {
    pub async fn connect(config: ChatConfig) -> Result<Self, ChatError> {
        Self::connect_with(config, None, None).await
    }

    /// Like [`RandomChat::connect`], with custom capture devices and a sink
    /// for the partner's tracks.
    pub async fn connect_with(
        config: ChatConfig,
        devices: Option<Arc<dyn MediaDevices>>,
        remote_sink: Option<Arc<dyn RemoteTrackSink>>,
    ) -> Result<Self, ChatError> {
        let endpoints = config.endpoints()?;
        let connector = WebSocketConnector::new(&config.signaling_url)?;
        let client = reqwest::Client::new();

        let registrar =
            SessionRegistrar::new(client.clone(), endpoints.clone(), config.request_timeout);
        let session_id = registrar.create_session().await;
        let presence_registrar = registrar.clone();
        let presence_id = session_id.clone();
        tokio::spawn(async move {
            presence_registrar.register_presence(&presence_id).await;
        });
        let heartbeat = registrar.spawn_heartbeat(session_id.clone(), config.heartbeat_interval);

        let ice = IceConfigProvider::new(
            client.clone(),
            endpoints.as_ref().map(|e| e.ice_servers.clone()),
            &config.stun_urls,
            config.request_timeout,
        );
        let presence = endpoints.as_ref().map(|e| {
            PresencePoller::new(client.clone(), e.stats.clone(), config.request_timeout)
                .spawn(config.stats_interval)
        });

        let mut peers = RtcPeerFactory::new();
        if let Some(sink) = remote_sink {
            peers = peers.with_remote_sink(sink);
        }
        let devices =
            devices.unwrap_or_else(|| Arc::new(SampleTrackDevices::new(config.audio, config.video)));

        let handle = spawn_chat(ControllerParts {
            session_id: session_id.clone(),
            connector: Arc::new(connector),
            peers: Arc::new(peers),
            devices,
            ice,
            requeue_delay: config.requeue_delay,
        });
        info!(%session_id, signaling = %config.signaling_url, "random chat client ready");

        Ok(Self {
            session_id,
            registrar,
            heartbeat,
            presence,
            handle,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn handle(&self) -> ChatHandle {
        self.handle.clone()
    }

    pub fn presence(&self) -> Option<&PresenceWatch> {
        self.presence.as_ref()
    }

    /// Stops the chat, cancels background polling and leaves presence.
    pub async fn shutdown(mut self) {
        // An already exited controller has nothing left to stop.
        let _ = self.handle.shutdown().await;
        self.heartbeat.cancel();
        if let Some(presence) = self.presence.take() {
            presence.stop();
        }
        self.registrar.unregister(&self.session_id).await;
        info!(session_id = %self.session_id, "random chat client shut down");
    }
}
