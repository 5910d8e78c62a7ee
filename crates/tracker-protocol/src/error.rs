//! Tagged transport error type.
//!
//! The control protocol this core speaks overloads a single wire status
//! byte to mean different things depending on context. Rather than carry
//! that ambiguity forward, every boundary that talks to a peer translates
//! its outcome into one of these three variants.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Connect, send, or receive failed at the OS/socket level.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer replied with a non-accept status for the command sent.
    #[error("peer rejected the request")]
    ProtocolRejected,

    /// A reply violated a framing invariant (bad length, unknown command).
    #[error("malformed reply from peer")]
    ProtocolMalformed,
}

impl TransportError {
    /// Best-effort extraction of a raw OS error code, falling back to
    /// `libc::EPERM`-equivalent (1) when the underlying error carries none
    /// (mirrors the zero-errno fallback used by the TCP probe).
    pub fn raw_os_error_or_eperm(&self) -> i32 {
        match self {
            TransportError::Io(e) => e.raw_os_error().unwrap_or(1),
            TransportError::ProtocolRejected | TransportError::ProtocolMalformed => 1,
        }
    }
}
