//! Playback side: the [`PlayerEngine`] state machine and its backend contract.

mod backend;
mod engine;
mod observer;
mod simulated;
mod speed;
mod state;

pub use backend::{BackendListener, BackendSetup, MediaBackend, SeekFlags, SeekMode, Surface};
pub use engine::PlayerEngine;
pub use observer::{ChannelObserver, PlayerEvent, PlayerInfo, PlayerObserver};
pub use simulated::{SimOpts, SimulatedBackend};
pub use speed::PlaybackSpeed;
pub use state::PlayerState;
