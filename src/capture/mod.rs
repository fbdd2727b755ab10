//! Frame providers feeding the capture source stage

mod generic;
mod traits;

pub use generic::{SyntheticCapture, SyntheticOpts};
pub use traits::{CaptureProvider, CapturedFrame, ProviderFactory};
