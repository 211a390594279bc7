//! The debug transport: a reliable request/response channel to the on-target
//! debug server, speaking in 32-bit register reads and writes.

mod tcp;

pub use tcp::TcpTransport;

#[cfg(test)]
pub(crate) mod mock;

use core::fmt::{self, Display};

/// Largest number of registers a batched read/write may carry.
pub const MAX_BATCH: usize = 8;

/// Default response timeout, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

#[derive(Debug)]
pub enum TransportError {
    /// The channel is gone. Fatal for the session.
    Disconnected,
    /// No response arrived within the configured timeout.
    Timeout,
    /// The server answered with a NACK (`-`).
    Nack,
    /// The response could not be parsed.
    Malformed(String),
    /// A batch exceeded [`MAX_BATCH`] items.
    BatchTooLarge(usize),
    Io(std::io::Error),
}

impl Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use self::TransportError::*;
        match self {
            Disconnected => write!(f, "not connected"),
            Timeout => write!(f, "timed out waiting for response"),
            Nack => write!(f, "request rejected (NACK)"),
            Malformed(resp) => write!(f, "malformed response: {:?}", resp),
            BatchTooLarge(n) => write!(f, "batch of {} exceeds limit of {}", n, MAX_BATCH),
            Io(e) => write!(f, "i/o error: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e)
    }
}

/// The four logical verbs the engine needs, plus connection management.
///
/// The batched variants exist for throughput and default to looping over the
/// single-register verbs; implementations with a native batch format should
/// override them.
pub trait Transport {
    fn read_reg(&mut self, addr: u32) -> Result<u32, TransportError>;

    fn write_reg(&mut self, addr: u32, data: u32) -> Result<(), TransportError>;

    fn read_regs(&mut self, addrs: &[u32]) -> Result<Vec<u32>, TransportError> {
        if addrs.len() > MAX_BATCH {
            return Err(TransportError::BatchTooLarge(addrs.len()));
        }
        addrs.iter().map(|&a| self.read_reg(a)).collect()
    }

    fn write_regs(&mut self, addrs: &[u32], data: &[u32]) -> Result<(), TransportError> {
        if addrs.len() != data.len() {
            return Err(TransportError::Malformed(format!(
                "batch write: {} addresses but {} values",
                addrs.len(),
                data.len()
            )));
        }
        if addrs.len() > MAX_BATCH {
            return Err(TransportError::BatchTooLarge(addrs.len()));
        }
        for (&a, &d) in addrs.iter().zip(data) {
            self.write_reg(a, d)?;
        }
        Ok(())
    }

    /// Send an opaque text command and return the raw response line.
    fn send_cmd(&mut self, cmd: &str) -> Result<String, TransportError>;

    fn is_connected(&self) -> bool;

    fn disconnect(&mut self);
}
