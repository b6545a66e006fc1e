use super::{ChatHandle, Command};
use crate::error::ChatError;
use crate::events::{ChatEvent, MatchState};
use tokio::sync::{broadcast, oneshot};

impl ChatHandle {
    pub(crate) async fn send(&self, command: Command) -> Result<(), ChatError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ChatError::ControllerGone)
    }

    /// Idle → Searching. Ignored while a chat is already running.
    pub async fn start(&self) -> Result<(), ChatError> {
        self.send(Command::Start).await
    }

    /// Leaves the current partner and searches again. Only acts while connected.
    pub async fn skip(&self) -> Result<(), ChatError> {
        self.send(Command::Skip).await
    }

    /// Back to Idle from any state; releases local media. Idempotent.
    pub async fn stop(&self) -> Result<(), ChatError> {
        self.send(Command::Stop).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), ChatError> {
        self.send(Command::SendText(text.into())).await
    }

    /// Stops the chat and waits for the controller to exit.
    pub async fn shutdown(&self) -> Result<(), ChatError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(Command::Shutdown(done_tx)).await?;
        done_rx.await.map_err(|_| ChatError::ControllerGone)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> MatchState {
        *self.state.borrow()
    }

    /// Resolves once the controller reports `target`.
    pub async fn wait_for_state(&self, target: MatchState) -> Result<(), ChatError> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| ChatError::ControllerGone)
    }
}
