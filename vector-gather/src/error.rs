use std::collections::TryReserveError;

pub type Result<T> = std::result::Result<T, GatherError>;

#[derive(Debug, thiserror::Error)]
pub enum GatherError {
    #[error("invalid group context: rank {rank} in a group of size {size}")]
    InvalidContext { rank: u32, size: u32 },

    #[error("MPI is already initialized in this process")]
    AlreadyInitialized,

    #[error("group membership mismatch: expected {expected} participants, got {actual}")]
    MembershipMismatch { expected: usize, actual: usize },

    #[error("rank {rank} announced {announced} elements but contributes {actual}")]
    ContributionMismatch {
        rank: u32,
        announced: u64,
        actual: usize,
    },

    #[error("peer {rank} disconnected unexpectedly")]
    PeerDisconnected { rank: u32 },

    #[error("buffer size mismatch from rank {rank}: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch {
        rank: u32,
        expected: usize,
        actual: usize,
    },

    #[error("{operation} failed with code {code}")]
    Transport { operation: &'static str, code: i32 },

    #[error("count {value} does not fit the transport's count type")]
    CountOverflow { value: u64 },

    #[error("cannot allocate result buffer: {0}")]
    Allocation(#[from] TryReserveError),

    #[error("value encoding failed: {0}")]
    Codec(#[from] bincode::Error),
}

impl GatherError {
    /// The group context is unusable or participants disagree about it.
    pub fn is_context_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidContext { .. }
                | Self::AlreadyInitialized
                | Self::MembershipMismatch { .. }
                | Self::ContributionMismatch { .. }
        )
    }

    /// The underlying collective failed while data was in flight.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::PeerDisconnected { .. }
                | Self::BufferSizeMismatch { .. }
                | Self::Transport { .. }
                | Self::Codec(_)
        )
    }

    /// The result buffer could not be sized for the gathered data.
    pub fn is_resource_error(&self) -> bool {
        matches!(self, Self::Allocation(_) | Self::CountOverflow { .. })
    }
}
