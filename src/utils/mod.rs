pub mod sos;
pub mod sync_bridge;

pub use sos::SignalOfStop;
pub use sync_bridge::{SyncBridge, SyncState};
