use core::fmt::{self, Display};

use crate::transport::TransportError;

/// Errors which may occur while driving the target.
#[derive(Debug)]
pub enum Error {
    /// The transport failed or is not connected.
    Transport(TransportError),
    /// A poll loop exhausted its deadline. Carries the last observed field
    /// value so callers can report how far the target got.
    Timeout { last: u32 },
    /// Out-of-range warp/thread id, unknown register or field name, or a
    /// malformed argument.
    InvalidArg(String),
    /// The operation requires a current warp/thread selection, and none has
    /// been made.
    NoneSelected,
    /// The selected warp must be halted for this operation.
    WarpNotHalted(u32),
    /// The selected warp is not participating in execution.
    WarpNotActive(u32),
    /// Operation recognized but deliberately stubbed out.
    NotImplemented,
    /// Operation-specific failure that fits no other kind.
    Failed(String),
}

impl Error {
    /// The stable C-style return code for this error.
    ///
    /// `0` is reserved for success; see the transport/console contract.
    pub fn code(&self) -> i32 {
        use TransportError::*;
        match self {
            Error::Failed(_) => -1,
            Error::Timeout { .. } => -2,
            Error::NotImplemented => -3,
            Error::InvalidArg(_) => -4,
            Error::Transport(BatchTooLarge(_)) => -5,
            Error::Transport(Nack) | Error::Transport(Malformed(_)) => -6,
            Error::Transport(_) => -7,
            Error::NoneSelected => -8,
            // Both warp-state preconditions share the one reserved slot.
            Error::WarpNotHalted(_) | Error::WarpNotActive(_) => -9,
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use self::Error::*;
        match self {
            Transport(e) => write!(f, "transport error: {}", e),
            Timeout { last } => write!(f, "poll timed out (last observed value: {:#x})", last),
            InvalidArg(msg) => write!(f, "invalid argument: {}", msg),
            NoneSelected => write!(f, "no warp/thread selected"),
            WarpNotHalted(wid) => write!(f, "warp {} is not halted", wid),
            WarpNotActive(wid) => write!(f, "warp {} is not active", wid),
            NotImplemented => write!(f, "operation not implemented"),
            Failed(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}
