//! Error types shared by the player engine and the recorder pipeline.
//!
//! Every fallible operation on the public surface returns [`Result`]; nothing
//! unwinds across it.

use crate::pipeline::params::ParamKind;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MediaError {
    /// The operation is not legal in the current state.
    #[error("invalid state: cannot {op} while {state}")]
    InvalidState { op: &'static str, state: String },

    /// A value is outside its accepted range, or a parameter is not accepted by the stage.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Readiness check failed; carries the parameter kinds still missing.
    #[error("stage '{stage}' not configured, missing {missing:?}")]
    NotConfigured {
        stage: String,
        missing: Vec<ParamKind>,
    },

    /// The external engine (backend, capture provider, output writer) reported a failure.
    #[error("backend failure: {0}")]
    BackendFailure(String),

    /// A synchronization wait exceeded its bound.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Construction or lookup failed.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
}

impl MediaError {
    pub fn invalid_state(op: &'static str, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            op,
            state: state.to_string(),
        }
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::BackendFailure(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::ResourceUnavailable(msg.into())
    }

    /// Whether this is a backend failure worth one retry (drain path).
    pub fn is_transient(&self) -> bool {
        matches!(self, MediaError::BackendFailure(_))
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MediaError::invalid_state("play", "Idle");
        assert_eq!(err.to_string(), "invalid state: cannot play while Idle");

        let err = MediaError::NotConfigured {
            stage: "venc".to_string(),
            missing: vec![ParamKind::VideoBitRate],
        };
        assert!(err.to_string().contains("VideoBitRate"));
    }

    #[test]
    fn test_transient() {
        assert!(MediaError::backend("eos push failed").is_transient());
        assert!(!MediaError::Timeout("drain").is_transient());
    }
}
