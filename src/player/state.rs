//! Player state machine

/// Playback session state
///
/// ```text
/// Idle → Initialized → Prepared → Started ⇄ Paused → Stopped → Idle
/// ```
///
/// `Error` is reachable from every state and is left only through `reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    /// No source set
    #[default]
    Idle,

    /// Source locator accepted, backend not prepared yet
    Initialized,

    /// Backend prepared, position at the start of the media
    Prepared,

    /// Playing
    Started,

    /// Paused, either by request or at end of stream
    Paused,

    /// Stopped; only `reset` leads out
    Stopped,

    /// Backend failure; only `reset` leads out
    Error,
}

impl PlayerState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &PlayerState) -> bool {
        use PlayerState::*;

        match (self, target) {
            (_, Error) => true,
            (_, Idle) => true,

            (Idle, Initialized) => true,
            (Initialized, Prepared) => true,

            (Prepared, Started) => true,
            (Started, Paused) => true,
            (Paused, Started) => true,

            (Prepared | Started | Paused, Stopped) => true,

            _ => false,
        }
    }

    /// Whether the backend holds prepared media in this state.
    pub fn is_prepared(&self) -> bool {
        matches!(
            self,
            PlayerState::Prepared | PlayerState::Started | PlayerState::Paused
        )
    }

    /// Observer and surface may still be swapped.
    pub fn accepts_setup(&self) -> bool {
        matches!(
            self,
            PlayerState::Idle | PlayerState::Initialized | PlayerState::Prepared
        )
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use PlayerState::*;

        assert!(Idle.can_transition_to(&Initialized));
        assert!(Initialized.can_transition_to(&Prepared));
        assert!(Prepared.can_transition_to(&Started));
        assert!(Started.can_transition_to(&Paused));
        assert!(Paused.can_transition_to(&Started));
        assert!(Paused.can_transition_to(&Stopped));
        assert!(Stopped.can_transition_to(&Idle));

        assert!(!Idle.can_transition_to(&Started));
        assert!(!Initialized.can_transition_to(&Started));
        assert!(!Stopped.can_transition_to(&Started));
        assert!(!Error.can_transition_to(&Prepared));
        assert!(Error.can_transition_to(&Idle));
    }

    #[test]
    fn test_every_state_can_fail() {
        use PlayerState::*;

        for state in [Idle, Initialized, Prepared, Started, Paused, Stopped, Error] {
            assert!(state.can_transition_to(&Error));
        }
    }

    #[test]
    fn test_state_groups() {
        assert!(PlayerState::Paused.is_prepared());
        assert!(!PlayerState::Stopped.is_prepared());
        assert!(PlayerState::Prepared.accepts_setup());
        assert!(!PlayerState::Started.accepts_setup());
    }
}
