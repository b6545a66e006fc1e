use super::{ChatHandle, Command};
use crate::error::ChatError;
use crate::peer::types::MediaKind;

impl ChatHandle {
    /// Flips the local video track; the partner gets MUTE_VIDEO / UNMUTE_VIDEO.
    pub async fn toggle_camera(&self) -> Result<(), ChatError> {
        self.send(Command::Toggle(MediaKind::Video)).await
    }

    /// Flips the local audio track; the partner gets MUTE_AUDIO / UNMUTE_AUDIO.
    pub async fn toggle_mic(&self) -> Result<(), ChatError> {
        self.send(Command::Toggle(MediaKind::Audio)).await
    }
}
