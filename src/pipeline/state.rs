//! Stage state management

/// Per-stage state machine
///
/// ```text
/// Created → Initialized → (Configured)* → Ready → Running ⇄ Paused → Stopping → Stopped
/// ```
///
/// Reset brings any initialized stage back to `Initialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    /// Constructed, no resources allocated
    Created,

    /// Resources allocated, nothing configured yet
    Initialized,

    /// At least one static parameter configured
    Configured,

    /// Prepared, waiting for start
    Ready,

    /// Actively producing or consuming media
    Running,

    /// Paused (can resume to Running)
    Paused,

    /// Stop in progress
    Stopping,

    /// Stopped; only Reset leaves this state
    Stopped,
}

impl ElementState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &ElementState) -> bool {
        use ElementState::*;

        match (self, target) {
            (Created, Initialized) => true,

            (Initialized | Configured, Configured) => true,
            (Initialized | Configured, Ready) => true,

            (Ready, Running) => true,
            (Running, Paused) => true,
            (Paused, Running) => true,

            (Ready | Running | Paused, Stopping) => true,
            (Stopping, Stopped) => true,

            // Reset
            (Created, _) => false,
            (_, Initialized) => true,

            _ => false,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            ElementState::Created => "Created",
            ElementState::Initialized => "Initialized",
            ElementState::Configured => "Configured",
            ElementState::Ready => "Ready",
            ElementState::Running => "Running",
            ElementState::Paused => "Paused",
            ElementState::Stopping => "Stopping",
            ElementState::Stopped => "Stopped",
        }
    }

    /// Check if the stage is currently active (running or paused)
    pub fn is_active(&self) -> bool {
        matches!(self, ElementState::Running | ElementState::Paused)
    }
}

impl std::fmt::Display for ElementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
