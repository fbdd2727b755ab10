use log::debug;
use tokio::sync::mpsc;

use super::speed::PlaybackSpeed;
use super::state::PlayerState;
use crate::error::MediaError;

/// Informational notifications delivered to a [`PlayerObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerInfo {
    StateChanged(PlayerState),
    /// Preparation finished; the session is `Prepared`.
    Prepared,
    /// End of stream without looping; the session paused at the end.
    EndOfStream,
    /// End of stream with looping; playback restarted from the beginning.
    Looped,
    SeekDone(u64),
    SpeedChanged(PlaybackSpeed),
    VolumeChanged { left: f32, right: f32 },
}

/// Receiver of player notifications.
///
/// Called from the control thread or a backend thread, never with an engine
/// lock held.
pub trait PlayerObserver: Send + Sync {
    fn on_info(&self, info: PlayerInfo);

    /// Called once per entry into `PlayerState::Error`.
    fn on_error(&self, error: MediaError);
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Info(PlayerInfo),
    Error(MediaError),
}

/// Observer forwarding every notification to a tokio channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<PlayerEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PlayerObserver for ChannelObserver {
    fn on_info(&self, info: PlayerInfo) {
        if self.tx.send(PlayerEvent::Info(info)).is_err() {
            debug!("player event receiver dropped");
        }
    }

    fn on_error(&self, error: MediaError) {
        if self.tx.send(PlayerEvent::Error(error)).is_err() {
            debug!("player event receiver dropped");
        }
    }
}
