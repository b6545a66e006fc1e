//! Transition table of the random-chat session.
//!
//! `MatchMachine::handle` is pure: it takes one [`Input`] and returns the
//! [`Effect`]s the controller must perform, in order. Results of async work
//! come back as inputs tagged with the epoch they were issued under, and
//! anything carrying a stale tag is dropped here.

use crate::events::{Author, ChatEvent, ChatLine, ConnectionQuality, MatchState, SystemNotice};
use crate::peer::types::{
    IceCandidate, MediaKind, PeerConnectionState, PeerEvent, SdpKind, SdpPayload,
};
use crate::signaling::message::{ChatMode, MessageType, RoomAssignment, SignalEvent, SignalMessage};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Start,
    Skip,
    Stop,
    SendChat(String),
    TrackToggled { kind: MediaKind, enabled: bool },
    MediaSettled { chat_epoch: u64, available: bool },
    Signal(SignalEvent),
    ChannelLost { reason: String },
    RequeueDue { requeue_epoch: u64 },
    Peer { room_epoch: u64, event: PeerEvent },
    LocalDescription { room_epoch: u64, description: SdpPayload },
    NegotiationFailed { room_epoch: u64, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    AcquireMedia { chat_epoch: u64 },
    ReleaseMedia,
    RefreshIceServers,
    /// Open the channel if needed and queue a JOIN.
    Search,
    CloseChannel,
    Send(SignalMessage),
    CreateOffer { room_epoch: u64 },
    AnswerOffer { room_epoch: u64, offer: SdpPayload },
    ApplyAnswer { answer: SdpPayload },
    AddRemoteCandidate { room_epoch: u64, candidate: IceCandidate },
    TeardownPeer,
    ScheduleRequeue { requeue_epoch: u64, delay: Duration },
    Notify(ChatEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaStatus {
    NotRequested,
    Pending,
    Ready,
    Unavailable,
}

impl MediaStatus {
    fn settled(self) -> bool {
        matches!(self, MediaStatus::Ready | MediaStatus::Unavailable)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub epoch: u64,
    pub room_id: Option<String>,
    pub partner_username: String,
    pub is_initiator: bool,
    pub chat_mode: ChatMode,
    offer_waiting_media: bool,
    offer_sent: bool,
    answer_applied: bool,
    pending_offer: Option<SdpPayload>,
    answered: bool,
}

impl Room {
    fn new(epoch: u64, assignment: RoomAssignment) -> Self {
        Self {
            epoch,
            room_id: assignment.room_id,
            partner_username: assignment.partner_username,
            is_initiator: assignment.is_initiator,
            chat_mode: assignment.chat_mode,
            offer_waiting_media: false,
            offer_sent: false,
            answer_applied: false,
            pending_offer: None,
            answered: false,
        }
    }
}

pub struct MatchMachine {
    session_id: String,
    state: MatchState,
    room: Option<Room>,
    media: MediaStatus,
    chat_epoch: u64,
    room_epoch: u64,
    requeue_epoch: u64,
    requeue_delay: Duration,
}

impl MatchMachine {
    pub fn new(session_id: impl Into<String>, requeue_delay: Duration) -> Self {
        Self {
            session_id: session_id.into(),
            state: MatchState::Idle,
            room: None,
            media: MediaStatus::NotRequested,
            chat_epoch: 0,
            room_epoch: 0,
            requeue_epoch: 0,
            requeue_delay,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> MatchState {
        self.state
    }

    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    pub fn media(&self) -> MediaStatus {
        self.media
    }

    pub fn chat_epoch(&self) -> u64 {
        self.chat_epoch
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        let mut fx = Vec::new();
        match input {
            Input::Start => self.on_start(&mut fx),
            Input::Skip => self.on_skip(&mut fx),
            Input::Stop => self.on_stop(&mut fx),
            Input::SendChat(text) => self.on_send_chat(text, &mut fx),
            Input::TrackToggled { kind, enabled } => {
                fx.push(Effect::Notify(ChatEvent::LocalMedia { kind, enabled }));
                if self.state == MatchState::Connected {
                    let room_id = self.room_id();
                    fx.push(Effect::Send(
                        SignalMessage::new(MessageType::media_hint(kind, enabled), &self.session_id)
                            .with_room(room_id.as_deref()),
                    ));
                }
            }
            Input::MediaSettled {
                chat_epoch,
                available,
            } => self.on_media_settled(chat_epoch, available, &mut fx),
            Input::Signal(event) => self.on_signal(event, &mut fx),
            Input::ChannelLost { reason } => self.on_channel_lost(reason, &mut fx),
            Input::RequeueDue { requeue_epoch } => {
                if requeue_epoch == self.requeue_epoch && self.state == MatchState::Disconnected {
                    self.set_state(MatchState::Searching, &mut fx);
                    fx.push(Effect::Notify(ChatEvent::System(SystemNotice::Searching)));
                    fx.push(Effect::Search);
                }
            }
            Input::Peer { room_epoch, event } => self.on_peer(room_epoch, event, &mut fx),
            Input::LocalDescription {
                room_epoch,
                description,
            } => {
                let Some(room) = self.current_room(room_epoch) else {
                    debug!(room_epoch, "dropping local description for a closed room");
                    return fx;
                };
                match SignalMessage::description(
                    &self.session_id,
                    room.room_id.as_deref(),
                    &description,
                ) {
                    Ok(msg) => fx.push(Effect::Send(msg)),
                    Err(err) => warn!(room_epoch, error = %err, "failed to encode description"),
                }
            }
            Input::NegotiationFailed { room_epoch, reason } => {
                if self.current_room(room_epoch).is_some() {
                    warn!(room_epoch, %reason, "negotiation failed; room stays without media");
                    fx.push(Effect::Notify(ChatEvent::Quality(ConnectionQuality::Poor)));
                }
            }
        }
        fx
    }

    fn on_start(&mut self, fx: &mut Vec<Effect>) {
        if self.state != MatchState::Idle {
            debug!(state = ?self.state, "start ignored; chat already active");
            return;
        }
        self.chat_epoch += 1;
        info!(session_id = %self.session_id, chat_epoch = self.chat_epoch, "random chat started");
        self.set_state(MatchState::Searching, fx);
        fx.push(Effect::Notify(ChatEvent::System(SystemNotice::Searching)));
        if self.media == MediaStatus::NotRequested {
            self.media = MediaStatus::Pending;
            fx.push(Effect::AcquireMedia {
                chat_epoch: self.chat_epoch,
            });
        }
        fx.push(Effect::RefreshIceServers);
        fx.push(Effect::Search);
    }

    fn on_skip(&mut self, fx: &mut Vec<Effect>) {
        if self.state != MatchState::Connected {
            debug!(state = ?self.state, "skip ignored; not connected");
            return;
        }
        let room_id = self.room_id();
        info!(room_id = ?room_id, "skipping partner");
        fx.push(Effect::Send(
            SignalMessage::new(MessageType::Skip, &self.session_id).with_room(room_id.as_deref()),
        ));
        self.end_room(fx);
        self.requeue_epoch += 1;
        self.set_state(MatchState::Disconnected, fx);
        fx.push(Effect::Notify(ChatEvent::System(SystemNotice::Skipped)));
        self.set_state(MatchState::Searching, fx);
        fx.push(Effect::Search);
    }

    fn on_stop(&mut self, fx: &mut Vec<Effect>) {
        if self.state == MatchState::Idle {
            return;
        }
        let room_id = self.room_id();
        info!(session_id = %self.session_id, room_id = ?room_id, "random chat stopped");
        fx.push(Effect::Send(
            SignalMessage::new(MessageType::Disconnected, &self.session_id)
                .with_room(room_id.as_deref()),
        ));
        self.reset_to_idle(fx);
    }

    fn reset_to_idle(&mut self, fx: &mut Vec<Effect>) {
        self.end_room(fx);
        fx.push(Effect::CloseChannel);
        fx.push(Effect::ReleaseMedia);
        self.media = MediaStatus::NotRequested;
        self.chat_epoch += 1;
        self.requeue_epoch += 1;
        self.set_state(MatchState::Idle, fx);
    }

    fn on_send_chat(&mut self, text: String, fx: &mut Vec<Effect>) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }
        if self.state != MatchState::Connected {
            debug!("chat message dropped; no partner");
            return;
        }
        let room_id = self.room_id();
        fx.push(Effect::Send(
            SignalMessage::new(MessageType::ChatMessage, &self.session_id)
                .with_room(room_id.as_deref())
                .with_content(text.clone()),
        ));
        fx.push(Effect::Notify(ChatEvent::Message(ChatLine {
            author: Author::Me,
            text,
            at: chrono::Utc::now(),
        })));
    }

    fn on_media_settled(&mut self, chat_epoch: u64, available: bool, fx: &mut Vec<Effect>) {
        if chat_epoch != self.chat_epoch || self.media != MediaStatus::Pending {
            debug!(chat_epoch, current = self.chat_epoch, "stale media result");
            return;
        }
        self.media = if available {
            MediaStatus::Ready
        } else {
            fx.push(Effect::Notify(ChatEvent::MediaUnavailable));
            MediaStatus::Unavailable
        };
        let Some(room) = self.room.as_mut() else {
            return;
        };
        if room.offer_waiting_media {
            room.offer_waiting_media = false;
            room.offer_sent = true;
            fx.push(Effect::CreateOffer {
                room_epoch: room.epoch,
            });
        }
        if let Some(offer) = room.pending_offer.take() {
            room.answered = true;
            fx.push(Effect::AnswerOffer {
                room_epoch: room.epoch,
                offer,
            });
        }
    }

    fn on_signal(&mut self, event: SignalEvent, fx: &mut Vec<Effect>) {
        if let (Some(addressed), Some(current)) = (event.room_id(), self.room_id()) {
            if addressed != current {
                debug!(addressed, %current, "frame for a previous room dropped");
                return;
            }
        }
        match event {
            SignalEvent::System(text) => {
                fx.push(Effect::Notify(ChatEvent::System(SystemNotice::Server(text))));
            }
            SignalEvent::QueueStatus {
                looking_count,
                content,
            } => fx.push(Effect::Notify(ChatEvent::QueueStatus {
                looking_count,
                content,
            })),
            SignalEvent::OnlineCount(counts) => {
                fx.push(Effect::Notify(ChatEvent::Presence(counts)));
            }
            SignalEvent::Matched(assignment) => self.on_matched(assignment, fx),
            SignalEvent::Offer { offer, .. } => self.on_remote_offer(offer, fx),
            SignalEvent::Answer { answer, .. } => {
                let Some(room) = self.room.as_mut() else {
                    debug!("answer without a room");
                    return;
                };
                if !room.is_initiator || !room.offer_sent || room.answer_applied {
                    warn!(room_id = ?room.room_id, "unexpected answer ignored");
                    return;
                }
                room.answer_applied = true;
                fx.push(Effect::ApplyAnswer { answer });
            }
            SignalEvent::IceCandidate { candidate, .. } => match &self.room {
                Some(room) if self.state == MatchState::Connected => {
                    fx.push(Effect::AddRemoteCandidate {
                        room_epoch: room.epoch,
                        candidate,
                    });
                }
                _ => debug!("candidate without a room dropped"),
            },
            SignalEvent::ChatMessage { text, .. } => {
                if self.state == MatchState::Connected {
                    fx.push(Effect::Notify(ChatEvent::Message(ChatLine {
                        author: Author::Partner,
                        text,
                        at: chrono::Utc::now(),
                    })));
                }
            }
            SignalEvent::Disconnected { .. } => {
                if self.state != MatchState::Connected {
                    debug!(state = ?self.state, "disconnect notice ignored");
                    return;
                }
                info!(room_id = ?self.room_id(), "partner disconnected");
                self.end_room(fx);
                self.set_state(MatchState::Disconnected, fx);
                fx.push(Effect::Notify(ChatEvent::System(SystemNotice::PartnerLeft)));
                self.schedule_requeue(fx);
            }
            SignalEvent::Error(text) => {
                warn!(%text, "matching server error");
                fx.push(Effect::Notify(ChatEvent::ServerError(text)));
            }
            SignalEvent::PartnerMedia { kind, enabled, .. } => {
                if self.state == MatchState::Connected {
                    fx.push(Effect::Notify(ChatEvent::PartnerMedia { kind, enabled }));
                }
            }
            SignalEvent::Ignored(kind) => debug!(%kind, "ignoring signaling message"),
        }
    }

    fn on_matched(&mut self, assignment: RoomAssignment, fx: &mut Vec<Effect>) {
        if self.state == MatchState::Idle {
            debug!("match while idle ignored");
            return;
        }
        if self.room.is_some() {
            warn!(room_id = ?self.room_id(), "new match replaces current room");
            self.end_room(fx);
        }
        self.requeue_epoch += 1;
        self.room_epoch += 1;
        let mut room = Room::new(self.room_epoch, assignment);
        info!(
            room_id = ?room.room_id,
            room_epoch = room.epoch,
            is_initiator = room.is_initiator,
            chat_mode = ?room.chat_mode,
            "matched"
        );
        self.set_state(MatchState::Connected, fx);
        fx.push(Effect::Notify(ChatEvent::Matched {
            room_id: room.room_id.clone(),
            partner_username: room.partner_username.clone(),
            chat_mode: room.chat_mode,
            is_initiator: room.is_initiator,
        }));
        if room.chat_mode == ChatMode::Video && room.is_initiator {
            if self.media.settled() {
                room.offer_sent = true;
                fx.push(Effect::CreateOffer {
                    room_epoch: room.epoch,
                });
            } else {
                debug!(room_epoch = room.epoch, "offer waits for local media");
                room.offer_waiting_media = true;
            }
        }
        self.room = Some(room);
    }

    fn on_remote_offer(&mut self, offer: SdpPayload, fx: &mut Vec<Effect>) {
        let media_settled = self.media.settled();
        let Some(room) = self.room.as_mut() else {
            debug!("offer without a room");
            return;
        };
        if room.is_initiator {
            warn!(room_id = ?room.room_id, "initiator received an offer; ignored");
            return;
        }
        if room.answered || room.pending_offer.is_some() {
            warn!(room_id = ?room.room_id, "duplicate offer ignored");
            return;
        }
        if offer.kind != SdpKind::Offer {
            return;
        }
        if media_settled {
            room.answered = true;
            fx.push(Effect::AnswerOffer {
                room_epoch: room.epoch,
                offer,
            });
        } else {
            debug!(room_epoch = room.epoch, "offer waits for local media");
            room.pending_offer = Some(offer);
        }
    }

    fn on_channel_lost(&mut self, reason: String, fx: &mut Vec<Effect>) {
        match self.state {
            MatchState::Connected => {
                warn!(%reason, "signaling lost while connected");
                self.end_room(fx);
                self.set_state(MatchState::Disconnected, fx);
                fx.push(Effect::Notify(ChatEvent::System(SystemNotice::ConnectionLost)));
                self.schedule_requeue(fx);
            }
            MatchState::Searching => {
                warn!(%reason, "signaling unavailable while searching");
                fx.push(Effect::Notify(ChatEvent::System(SystemNotice::UnableToConnect)));
                self.reset_to_idle(fx);
            }
            MatchState::Disconnected | MatchState::Idle => {
                debug!(%reason, "signaling closed");
            }
        }
    }

    fn on_peer(&mut self, room_epoch: u64, event: PeerEvent, fx: &mut Vec<Effect>) {
        let session_id = self.session_id.clone();
        let Some(room) = self.current_room(room_epoch) else {
            debug!(room_epoch, "peer event for a closed room dropped");
            return;
        };
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                match SignalMessage::ice_candidate(&session_id, room.room_id.as_deref(), &candidate) {
                    Ok(msg) => fx.push(Effect::Send(msg)),
                    Err(err) => warn!(error = %err, "failed to encode local candidate"),
                }
            }
            PeerEvent::ConnectionState(state) => match state {
                PeerConnectionState::Connected => {
                    fx.push(Effect::Notify(ChatEvent::Quality(ConnectionQuality::Good)));
                }
                PeerConnectionState::Failed | PeerConnectionState::Disconnected => {
                    fx.push(Effect::Notify(ChatEvent::Quality(ConnectionQuality::Poor)));
                }
                _ => {}
            },
            PeerEvent::RemoteTrack { kind, track_id } => {
                fx.push(Effect::Notify(ChatEvent::RemoteTrack { kind, track_id }));
            }
        }
    }

    fn current_room(&self, room_epoch: u64) -> Option<&Room> {
        self.room.as_ref().filter(|r| r.epoch == room_epoch)
    }

    fn room_id(&self) -> Option<String> {
        self.room.as_ref().and_then(|r| r.room_id.clone())
    }

    fn end_room(&mut self, fx: &mut Vec<Effect>) {
        self.room = None;
        fx.push(Effect::TeardownPeer);
    }

    fn schedule_requeue(&mut self, fx: &mut Vec<Effect>) {
        self.requeue_epoch += 1;
        fx.push(Effect::ScheduleRequeue {
            requeue_epoch: self.requeue_epoch,
            delay: self.requeue_delay,
        });
    }

    fn set_state(&mut self, state: MatchState, fx: &mut Vec<Effect>) {
        if self.state == state {
            return;
        }
        debug!(from = ?self.state, to = ?state, "match state");
        self.state = state;
        fx.push(Effect::Notify(ChatEvent::StateChanged(state)));
    }
}
