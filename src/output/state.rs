use serde::{Deserialize, Serialize};

/// Output state of one capture line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputState {
    /// Streaming disabled; hardware must not be touched
    #[default]
    Off,
    /// Streaming, nothing installed in slot 0 yet
    Idle,
    /// One real buffer in an active slot
    Single,
    /// Both slots hold real buffers
    Continuous,
    /// Starved; the last buffer is frozen until a new one arrives
    Stopping,
    /// Transitional marker, ignored by both interrupt handlers
    Reserved,
}

impl OutputState {
    pub const ALL: [OutputState; 6] = [
        OutputState::Off,
        OutputState::Idle,
        OutputState::Single,
        OutputState::Continuous,
        OutputState::Stopping,
        OutputState::Reserved,
    ];

    /// States in which the completion handler does nothing
    pub fn gates_done(self) -> bool {
        matches!(self, OutputState::Off | OutputState::Reserved)
    }

    /// States in which there is nothing to rotate
    pub fn gates_change(self) -> bool {
        matches!(
            self,
            OutputState::Off | OutputState::Stopping | OutputState::Reserved | OutputState::Idle
        )
    }

    /// Transition when a rotation finds `pending` empty. Returns the new
    /// state and whether the active slot index flips.
    pub fn on_last(self) -> (OutputState, bool) {
        match self {
            OutputState::Continuous => (OutputState::Single, true),
            OutputState::Single => (OutputState::Stopping, false),
            other => (other, false),
        }
    }

    /// Transition when a rotation pulled a fresh buffer from `pending`
    pub fn on_next(self) -> (OutputState, bool) {
        match self {
            OutputState::Continuous => (OutputState::Continuous, true),
            other => (other, false),
        }
    }
}
