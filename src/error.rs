//! Error taxonomy for the debug transport.
//!
//! `CmsisDapError` covers failures in the USB-framing / command-encoding
//! layer. `TransportError` is the stable taxonomy returned by every
//! transaction-queue, DP/AP/MEM, core-debug and lifecycle operation.

use thiserror::Error;

/// Failures that can occur encoding, sending, or decoding a single
/// CMSIS-DAP command.
#[derive(Debug, Error)]
pub enum CmsisDapError {
    /// The probe echoed back a different command byte than was sent.
    #[error("device responded with command ID {received:#x}, expected {expected:#x}")]
    UnexpectedAnswer { expected: u8, received: u8 },

    /// A response field had a value outside the set this layer understands.
    #[error("unexpected answer in response payload")]
    InvalidResponse,

    /// The response claimed more data than the buffer actually contains.
    #[error("not enough data in response, expected at least {expected} bytes, got {actual}")]
    NotEnoughData { expected: usize, actual: usize },

    /// The request would not fit the probe's negotiated packet size.
    #[error("request of {requested} bytes exceeds the packet size of {max}")]
    TooMuchData { requested: usize, max: usize },

    /// No probe is currently open.
    #[error("no CMSIS-DAP device is open")]
    NoDevice,

    /// A USB transfer failed outright.
    #[error(transparent)]
    Usb(#[from] rusb::Error),

    /// Catch-all for failures originating outside this crate, e.g. loading
    /// an agent image from the filesystem.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The stable error taxonomy every public transport operation returns one
/// of on failure.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Generic internal failure with no more specific cause.
    #[error("operation failed")]
    Failed,
    /// Misaligned address or an argument outside its valid range.
    #[error("bad parameters")]
    BadParams,
    /// A USB read or write failed.
    #[error("USB I/O error")]
    Io,
    /// The USB handle is absent; the transport is offline.
    #[error("transport is offline")]
    Offline,
    /// The probe's response did not parse as a valid CMSIS-DAP frame.
    #[error("protocol error in probe response")]
    Protocol,
    /// WAIT retries were exhausted, or a halt/match poll expired.
    #[error("operation timed out")]
    Timeout,
    /// The SWD ACK carried the FAULT bit.
    #[error("SWD FAULT")]
    SwdFault,
    /// The SWD ACK carried the ProtocolError (parity) bit.
    #[error("SWD parity error")]
    SwdParity,
    /// All ACK bits were set at once: no real response from the target.
    #[error("SWD line silent")]
    SwdSilent,
    /// An ACK value outside {OK, WAIT, FAULT} was returned.
    #[error("bogus SWD ACK")]
    SwdBogus,
    /// A match-read exhausted its retries without matching.
    #[error("match read did not converge")]
    Match,
    /// The probe rejected the command as unsupported.
    #[error("command unsupported by probe")]
    Unsupported,
    /// The probe returned a nonzero status for an operation that has no
    /// more specific mapping.
    #[error("probe reported failure")]
    Remote,
    /// An operation that requires an attached target was called while
    /// detached.
    #[error("target not attached")]
    Detached,
    /// The attention counter changed during a wait, cancelling it.
    #[error("operation interrupted")]
    Interrupted,
}

impl From<CmsisDapError> for TransportError {
    fn from(err: CmsisDapError) -> Self {
        match err {
            CmsisDapError::Usb(_) => TransportError::Io,
            CmsisDapError::NoDevice => TransportError::Offline,
            CmsisDapError::TooMuchData { .. } => TransportError::BadParams,
            _ => TransportError::Protocol,
        }
    }
}
