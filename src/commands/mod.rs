//! Command surface handed to the UI layer.

pub mod chat_api;
pub mod media_api;

use crate::events::{ChatEvent, MatchState};
use crate::matching::controller::{ChatController, ControllerParts};
use crate::peer::types::MediaKind;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

#[derive(Debug)]
pub(crate) enum Command {
    Start,
    Skip,
    Stop,
    SendText(String),
    Toggle(MediaKind),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to a running chat controller.
///
/// Dropping the last handle stops the chat.
#[derive(Clone)]
pub struct ChatHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ChatEvent>,
    state: watch::Receiver<MatchState>,
}

/// Spawns the controller on the current runtime.
pub fn spawn_chat(parts: ControllerParts) -> ChatHandle {
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
    let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
    let (state_tx, state_rx) = watch::channel(MatchState::Idle);
    let controller = ChatController::new(parts, commands_rx, events_tx.clone(), state_tx);
    tokio::spawn(controller.run());
    ChatHandle {
        commands: commands_tx,
        events: events_tx,
        state: state_rx,
    }
}
