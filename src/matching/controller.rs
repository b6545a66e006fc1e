use crate::commands::Command;
use crate::error::MediaError;
use crate::events::{ChatEvent, MatchState};
use crate::matching::machine::{Effect, Input, MatchMachine};
use crate::peer::engine::{NegotiationEngine, PeerFactory};
use crate::peer::ice::IceConfigProvider;
use crate::peer::media::{LocalMediaController, LocalMediaStream, MediaDevices};
use crate::peer::types::{MediaKind, TaggedPeerEvent};
use crate::signaling::channel::{ChannelEvent, ChannelNotice, SignalingChannel, SignalingConnector};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Results of work the controller spawned off its own task.
enum Internal {
    MediaAcquired {
        chat_epoch: u64,
        result: Result<LocalMediaStream, MediaError>,
    },
    RequeueDue {
        requeue_epoch: u64,
    },
}

/// Collaborators a controller is built from.
pub struct ControllerParts {
    pub session_id: String,
    pub connector: Arc<dyn SignalingConnector>,
    pub peers: Arc<dyn PeerFactory>,
    pub devices: Arc<dyn MediaDevices>,
    pub ice: IceConfigProvider,
    pub requeue_delay: Duration,
}

/// Session-scoped actor. Owns the channel, the negotiation engine and local
/// media; every input goes through [`MatchMachine`] and the returned effects
/// are executed here in order.
pub struct ChatController {
    machine: MatchMachine,
    channel: SignalingChannel,
    engine: NegotiationEngine,
    media: LocalMediaController,
    ice: IceConfigProvider,
    commands: mpsc::Receiver<Command>,
    channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    peer_rx: mpsc::UnboundedReceiver<TaggedPeerEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    events: broadcast::Sender<ChatEvent>,
    state: watch::Sender<MatchState>,
    requeue: Option<JoinHandle<()>>,
}

impl ChatController {
    pub(crate) fn new(
        parts: ControllerParts,
        commands: mpsc::Receiver<Command>,
        events: broadcast::Sender<ChatEvent>,
        state: watch::Sender<MatchState>,
    ) -> Self {
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            machine: MatchMachine::new(parts.session_id.clone(), parts.requeue_delay),
            channel: SignalingChannel::new(parts.connector, parts.session_id, channel_tx),
            engine: NegotiationEngine::new(parts.peers, peer_tx),
            media: LocalMediaController::new(parts.devices),
            ice: parts.ice,
            commands,
            channel_rx,
            peer_rx,
            internal_tx,
            internal_rx,
            events,
            state,
            requeue: None,
        }
    }

    /// Runs until a shutdown command arrives or every handle is dropped;
    /// both end with a full stop.
    pub async fn run(mut self) {
        info!(session_id = %self.machine.session_id(), "chat controller running");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.apply(Input::Stop).await;
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.on_command(command).await,
                    None => {
                        self.apply(Input::Stop).await;
                        break;
                    }
                },
                Some(event) = self.channel_rx.recv() => self.on_channel_event(event).await,
                Some(tagged) = self.peer_rx.recv() => {
                    self.apply(Input::Peer {
                        room_epoch: tagged.room_epoch,
                        event: tagged.event,
                    })
                    .await;
                }
                Some(internal) = self.internal_rx.recv() => self.on_internal(internal).await,
            }
        }
        if let Some(requeue) = self.requeue.take() {
            requeue.abort();
        }
        debug!(session_id = %self.machine.session_id(), "chat controller stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Start => self.apply(Input::Start).await,
            Command::Skip => self.apply(Input::Skip).await,
            Command::Stop => self.apply(Input::Stop).await,
            Command::SendText(text) => self.apply(Input::SendChat(text)).await,
            Command::Toggle(kind) => self.toggle(kind).await,
            Command::Shutdown(_) => {}
        }
    }

    async fn toggle(&mut self, kind: MediaKind) {
        match self.media.toggle(kind) {
            Some(enabled) => self.apply(Input::TrackToggled { kind, enabled }).await,
            None => debug!(%kind, "no local track to toggle"),
        }
    }

    async fn on_channel_event(&mut self, event: ChannelEvent) {
        let Some(notice) = self.channel.accept(event) else {
            return;
        };
        match notice {
            ChannelNotice::Opened => {
                info!(generation = self.channel.generation(), "signaling channel open");
            }
            ChannelNotice::Message(message) => {
                let kind = message.kind.clone();
                match message.into_event() {
                    Ok(event) => self.apply(Input::Signal(event)).await,
                    Err(err) => warn!(%kind, error = %err, "dropping malformed signaling payload"),
                }
            }
            ChannelNotice::Lost(reason) => self.apply(Input::ChannelLost { reason }).await,
        }
    }

    async fn on_internal(&mut self, internal: Internal) {
        match internal {
            Internal::MediaAcquired { chat_epoch, result } => {
                let current = chat_epoch == self.machine.chat_epoch();
                let available = match result {
                    Ok(stream) if current => {
                        self.media.adopt(stream);
                        true
                    }
                    Ok(stream) => {
                        self.media.discard(stream);
                        return;
                    }
                    Err(err) => {
                        warn!(error = %err, "local media unavailable; continuing without it");
                        false
                    }
                };
                self.apply(Input::MediaSettled {
                    chat_epoch,
                    available,
                })
                .await;
            }
            Internal::RequeueDue { requeue_epoch } => {
                self.requeue = None;
                self.apply(Input::RequeueDue { requeue_epoch }).await;
            }
        }
    }

    async fn apply(&mut self, input: Input) {
        let mut inputs = VecDeque::from([input]);
        while let Some(input) = inputs.pop_front() {
            for effect in self.machine.handle(input) {
                if let Some(next) = self.execute(effect).await {
                    inputs.push_back(next);
                }
            }
        }
    }

    async fn execute(&mut self, effect: Effect) -> Option<Input> {
        match effect {
            Effect::AcquireMedia { chat_epoch } => {
                let devices = self.media.devices();
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let result = devices.acquire().await;
                    let _ = tx.send(Internal::MediaAcquired { chat_epoch, result });
                });
            }
            Effect::ReleaseMedia => self.media.release(),
            Effect::RefreshIceServers => {
                let ice = self.ice.clone();
                tokio::spawn(async move {
                    ice.fetch_ice_servers().await;
                });
            }
            Effect::Search => self.channel.request_match(),
            Effect::CloseChannel => self.channel.close(),
            Effect::Send(message) => {
                self.channel.send(message);
            }
            Effect::CreateOffer { room_epoch } => {
                let ice_servers = self.ice.current();
                return Some(
                    match self
                        .engine
                        .create_offer(room_epoch, self.media.stream(), &ice_servers)
                        .await
                    {
                        Ok(description) => Input::LocalDescription {
                            room_epoch,
                            description,
                        },
                        Err(err) => Input::NegotiationFailed {
                            room_epoch,
                            reason: err.to_string(),
                        },
                    },
                );
            }
            Effect::AnswerOffer { room_epoch, offer } => {
                let ice_servers = self.ice.current();
                return Some(
                    match self
                        .engine
                        .handle_offer(room_epoch, offer, self.media.stream(), &ice_servers)
                        .await
                    {
                        Ok(description) => Input::LocalDescription {
                            room_epoch,
                            description,
                        },
                        Err(err) => Input::NegotiationFailed {
                            room_epoch,
                            reason: err.to_string(),
                        },
                    },
                );
            }
            Effect::ApplyAnswer { answer } => {
                if let Err(err) = self.engine.handle_answer(answer).await {
                    warn!(error = %err, "failed to apply remote answer");
                }
            }
            Effect::AddRemoteCandidate {
                room_epoch,
                candidate,
            } => {
                if let Err(err) = self.engine.handle_ice_candidate(room_epoch, candidate).await {
                    warn!(room_epoch, error = %err, "failed to add remote candidate");
                }
            }
            Effect::TeardownPeer => {
                if self.engine.teardown().await {
                    self.publish(ChatEvent::RemoteStreamCleared);
                }
            }
            Effect::ScheduleRequeue {
                requeue_epoch,
                delay,
            } => {
                if let Some(previous) = self.requeue.take() {
                    previous.abort();
                }
                let tx = self.internal_tx.clone();
                self.requeue = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Internal::RequeueDue { requeue_epoch });
                }));
            }
            Effect::Notify(event) => self.publish(event),
        }
        None
    }

    fn publish(&self, event: ChatEvent) {
        if let ChatEvent::StateChanged(state) = &event {
            self.state.send_replace(*state);
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
