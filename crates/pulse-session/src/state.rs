use std::fmt;

use pulse_core::Phase;

/// Lifecycle of one measurement run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No run in progress; frames are ignored.
    #[default]
    Idle,
    /// Accumulating, below the measuring threshold.
    Calibrating,
    /// Accumulating, estimates flowing on cadence.
    Measuring,
    /// Run aborted by a fault. Only `start` recovers.
    Errored,
}

impl SessionState {
    /// Whether frames are being accumulated.
    pub fn is_accumulating(self) -> bool {
        matches!(self, Self::Calibrating | Self::Measuring)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Calibrating => "calibrating",
            Self::Measuring => "measuring",
            Self::Errored => "errored",
        }
    }
}

impl From<Phase> for SessionState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Calibrating => Self::Calibrating,
            Phase::Measuring => Self::Measuring,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
