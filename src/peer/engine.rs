use crate::error::PeerError;
use crate::logger::log_candidate;
use crate::peer::media::LocalMediaStream;
use crate::peer::types::{IceCandidate, PeerEvent, SdpPayload, ServerConfig, TaggedPeerEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Sink for the asynchronous events of one peer connection.
#[derive(Clone)]
pub struct PeerEvents {
    room_epoch: u64,
    tx: mpsc::UnboundedSender<TaggedPeerEvent>,
}

impl PeerEvents {
    pub fn new(room_epoch: u64, tx: mpsc::UnboundedSender<TaggedPeerEvent>) -> Self {
        Self { room_epoch, tx }
    }

    pub fn room_epoch(&self) -> u64 {
        self.room_epoch
    }

    pub fn emit(&self, event: PeerEvent) {
        let _ = self.tx.send(TaggedPeerEvent {
            room_epoch: self.room_epoch,
            event,
        });
    }
}

/// One peer connection. Never renegotiated; a new room gets a new link.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn attach_stream(&self, stream: &LocalMediaStream) -> Result<(), PeerError>;
    /// Used when no local media is available.
    async fn receive_only(&self) -> Result<(), PeerError>;
    /// Creates an offer and sets it as the local description.
    async fn create_offer(&self) -> Result<SdpPayload, PeerError>;
    /// Creates an answer and sets it as the local description.
    async fn create_answer(&self) -> Result<SdpPayload, PeerError>;
    async fn set_remote_description(&self, description: SdpPayload) -> Result<(), PeerError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;
    async fn close(&self);
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[ServerConfig],
        events: PeerEvents,
    ) -> Result<Box<dyn PeerLink>, PeerError>;
}

/// Where a remote candidate ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    Applied,
    Queued,
}

struct ActivePeer {
    room_epoch: u64,
    link: Box<dyn PeerLink>,
    remote_description_set: bool,
}

/// Drives offer/answer for the current room.
///
/// Holds at most one peer connection; building a new one closes the previous
/// one first. Remote candidates that arrive before the remote description are
/// queued per room and applied right after it is set.
pub struct NegotiationEngine {
    factory: Arc<dyn PeerFactory>,
    events: mpsc::UnboundedSender<TaggedPeerEvent>,
    active: Option<ActivePeer>,
    early_candidates: Vec<(u64, IceCandidate)>,
}

impl NegotiationEngine {
    pub fn new(
        factory: Arc<dyn PeerFactory>,
        events: mpsc::UnboundedSender<TaggedPeerEvent>,
    ) -> Self {
        Self {
            factory,
            events,
            active: None,
            early_candidates: Vec::new(),
        }
    }

    pub fn has_connection(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_room(&self) -> Option<u64> {
        self.active.as_ref().map(|p| p.room_epoch)
    }

    pub fn queued_candidates(&self) -> usize {
        self.early_candidates.len()
    }

    pub async fn create_offer(
        &mut self,
        room_epoch: u64,
        stream: Option<&LocalMediaStream>,
        ice_servers: &[ServerConfig],
    ) -> Result<SdpPayload, PeerError> {
        self.build(room_epoch, stream, ice_servers).await?;
        let peer = self.active.as_ref().ok_or(PeerError::NoActiveConnection)?;
        let offer = peer.link.create_offer().await?;
        info!(room_epoch, "local offer created");
        Ok(offer)
    }

    pub async fn handle_offer(
        &mut self,
        room_epoch: u64,
        offer: SdpPayload,
        stream: Option<&LocalMediaStream>,
        ice_servers: &[ServerConfig],
    ) -> Result<SdpPayload, PeerError> {
        self.build(room_epoch, stream, ice_servers).await?;
        self.apply_remote_description(offer).await?;
        let peer = self.active.as_ref().ok_or(PeerError::NoActiveConnection)?;
        let answer = peer.link.create_answer().await?;
        info!(room_epoch, "local answer created");
        Ok(answer)
    }

    pub async fn handle_answer(&mut self, answer: SdpPayload) -> Result<(), PeerError> {
        self.apply_remote_description(answer).await
    }

    pub async fn handle_ice_candidate(
        &mut self,
        room_epoch: u64,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition, PeerError> {
        log_candidate("REMOTE", &candidate);
        match &self.active {
            Some(peer) if peer.room_epoch == room_epoch && peer.remote_description_set => {
                peer.link.add_ice_candidate(candidate).await?;
                Ok(CandidateDisposition::Applied)
            }
            _ => {
                debug!(room_epoch, "remote description not set yet, queuing candidate");
                self.early_candidates.push((room_epoch, candidate));
                Ok(CandidateDisposition::Queued)
            }
        }
    }

    /// Closes the connection and forgets queued candidates. Idempotent;
    /// returns whether a connection was closed.
    pub async fn teardown(&mut self) -> bool {
        self.early_candidates.clear();
        self.close_active().await
    }

    async fn close_active(&mut self) -> bool {
        match self.active.take() {
            Some(peer) => {
                debug!(room_epoch = peer.room_epoch, "closing peer connection");
                peer.link.close().await;
                true
            }
            None => false,
        }
    }

    async fn build(
        &mut self,
        room_epoch: u64,
        stream: Option<&LocalMediaStream>,
        ice_servers: &[ServerConfig],
    ) -> Result<(), PeerError> {
        self.close_active().await;
        self.early_candidates.retain(|(epoch, _)| *epoch == room_epoch);

        let link = self
            .factory
            .create(ice_servers, PeerEvents::new(room_epoch, self.events.clone()))
            .await?;
        let attached = match stream {
            Some(stream) => link.attach_stream(stream).await,
            None => link.receive_only().await,
        };
        if let Err(err) = attached {
            link.close().await;
            return Err(err);
        }
        debug!(
            room_epoch,
            ice_servers = ice_servers.len(),
            with_media = stream.is_some(),
            "peer connection created"
        );
        self.active = Some(ActivePeer {
            room_epoch,
            link,
            remote_description_set: false,
        });
        Ok(())
    }

    async fn apply_remote_description(&mut self, description: SdpPayload) -> Result<(), PeerError> {
        let peer = self.active.as_mut().ok_or(PeerError::NoActiveConnection)?;
        peer.link.set_remote_description(description).await?;
        peer.remote_description_set = true;

        let room_epoch = peer.room_epoch;
        let pending: Vec<IceCandidate> = {
            let (mine, rest): (Vec<_>, Vec<_>) = self
                .early_candidates
                .drain(..)
                .partition(|(epoch, _)| *epoch == room_epoch);
            self.early_candidates = rest;
            mine.into_iter().map(|(_, c)| c).collect()
        };
        if pending.is_empty() {
            return Ok(());
        }
        debug!(room_epoch, count = pending.len(), "applying queued candidates");
        if let Some(peer) = self.active.as_ref() {
            for candidate in pending {
                if let Err(err) = peer.link.add_ice_candidate(candidate).await {
                    warn!(room_epoch, error = %err, "failed to apply queued candidate");
                }
            }
        }
        Ok(())
    }
}
