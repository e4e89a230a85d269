use crate::SessionState;

/// Misuse of the fusion session lifecycle.
///
/// These are contract violations by the caller, never data conditions, so
/// they are always surfaced and never turned into a fallback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cannot {operation} while the fusion session is {state:?}.")]
pub struct InvalidStateError {
    pub operation: &'static str,
    pub state: SessionState,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("Rank must be between 1 and 3, got {0}.")]
    InvalidRank(usize),
    #[error("Zero extent in dimension {dim} of {extents:?}.")]
    ZeroExtent { dim: usize, extents: Vec<usize> },
    #[error("Extents {extents:?} hold more work-items than fit in usize.")]
    TooLarge { extents: Vec<usize> },
    #[error("Local rank {local} differs from global rank {global}.")]
    RankMismatch { global: usize, local: usize },
    #[error("Local extent {local} does not divide global extent {global} in dimension {dim}.")]
    NotDivisible {
        dim: usize,
        global: usize,
        local: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),
    #[error(transparent)]
    Execution(#[from] anyhow::Error),
}
