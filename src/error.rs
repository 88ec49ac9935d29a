//! Our error types for the power supply link.

use thiserror::Error;

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Custom error type for power supply communications.
///
/// Everything here is handled inside [`PsuClient`](crate::psu::PsuClient): the boundary methods
/// count and log these, then report a plain `bool` / `Option`. Errors reported by the instrument
/// itself are not represented here, see [`Diagnostic`](crate::codec::Diagnostic).
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    #[error("Transport error: {0:?}")]
    Transport(I),
    #[error("Transport is not open")]
    NotOpen,
    #[error("Response timeout")]
    Timeout,
    #[error("Response does not fit the receive buffer")]
    BufferOverflow,
    #[error("Invalid response received")]
    InvalidResponse,
    #[error("Unexpected device identity {0:?}")]
    UnexpectedIdentity(String),
    #[error("Command not supported by this dialect")]
    Unsupported,
    #[error("Client is suspended")]
    Suspended,
}

impl<I: embedded_io::Error> From<crate::codec::ParseError> for Error<I> {
    fn from(_: crate::codec::ParseError) -> Self {
        Error::InvalidResponse
    }
}

impl<I: embedded_io::Error> Error<I> {
    /// Whether this failure came from the transport or the wire, as opposed to the session state.
    ///
    /// Only I/O failures are retried and counted towards suspension.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::NotOpen
                | Error::Timeout
                | Error::BufferOverflow
                | Error::InvalidResponse
        )
    }
}
