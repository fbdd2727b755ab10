//! Orchestration core for media playback and recording.
//!
//! - [`player`]: playback state machine over an external media backend
//! - [`pipeline`]: record-side stages, their lifecycle, registry and recorder
//! - [`capture`]: frame providers feeding the capture source stage

pub mod assets;
pub mod capture;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod player;
pub mod utils;

pub use error::{MediaError, Result};
