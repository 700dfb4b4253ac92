//! Lifecycle of one leaf rip.

use std::fmt;

/// `Created → Preprocessing → Downloading → Postprocessing → Done`, with
/// `Failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RipState {
    Created,
    Preprocessing,
    Downloading,
    Postprocessing,
    Done,
    Failed,
}

impl RipState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Created, Self::Preprocessing)
            | (Self::Preprocessing, Self::Downloading)
            | (Self::Downloading, Self::Postprocessing)
            | (Self::Postprocessing, Self::Done) => true,
            (from, Self::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Preprocessing => "preprocessing",
            Self::Downloading => "downloading",
            Self::Postprocessing => "postprocessing",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}
