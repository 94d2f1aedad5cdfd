//! The DAP command layer: encode/decode of single CMSIS-DAP
//! commands. Each command is request-byte + payload; the response begins
//! with the same command byte.

pub mod connect;
pub mod delay;
pub mod disconnect;
pub mod host_status;
pub mod info;
pub mod reset_target;
pub mod swd;
pub mod swj;
pub mod transfer;
pub mod write_abort;

use std::ops::Deref;

use crate::error::CmsisDapError;
use crate::usb::DapDevice;

/// A CMSIS-DAP command ID, the first byte of every request and response.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Category(pub u8);

impl Deref for Category {
    type Target = u8;
    fn deref(&self) -> &u8 {
        &self.0
    }
}

/// Generic success/failure status byte used by several commands.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    DapOk,
    DapError,
}

impl Status {
    pub fn from_byte(byte: u8) -> Result<Self, CmsisDapError> {
        match byte {
            0x00 => Ok(Status::DapOk),
            0xFF => Ok(Status::DapError),
            _ => Err(CmsisDapError::InvalidResponse),
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, Status::DapOk)
    }
}

/// A single CMSIS-DAP command: encodes its own payload and parses its own
/// response. `parse_response` takes `&self` so commands whose response
/// shape depends on what was requested (e.g. `SWD_Sequence`'s captured
/// input bytes) can decode correctly.
pub trait Request: Sized {
    const CATEGORY: Category;
    type Response: Sized;

    /// Encodes the payload (everything after the command byte) into
    /// `buffer`, returning the number of bytes written.
    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError>;

    /// Parses the payload (everything after the echoed command byte).
    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError>;
}

/// Sends `request` and returns its decoded response: one write, one read.
pub fn send_command<Req: Request, D: DapDevice + ?Sized>(
    device: &mut D,
    request: Req,
) -> Result<Req::Response, CmsisDapError> {
    let packet_size = device.max_packet_size().max(1);
    let mut out = vec![0u8; packet_size];
    out[0] = *Req::CATEGORY;
    let payload_len = request.to_bytes(&mut out[1..])?;
    let frame_len = payload_len + 1;
    if frame_len > out.len() {
        return Err(CmsisDapError::TooMuchData {
            requested: frame_len,
            max: out.len(),
        });
    }
    trace_buffer("send", &out[..frame_len]);
    device.write(&out[..frame_len])?;

    let mut response = vec![0u8; packet_size];
    let n = device.read(&mut response)?;
    if n == 0 {
        return Err(CmsisDapError::NotEnoughData {
            expected: 1,
            actual: 0,
        });
    }
    trace_buffer("recv", &response[..n]);

    if response[0] != *Req::CATEGORY {
        return Err(CmsisDapError::UnexpectedAnswer {
            expected: *Req::CATEGORY,
            received: response[0],
        });
    }
    request.parse_response(&response[1..n])
}

fn trace_buffer(direction: &str, buffer: &[u8]) {
    if !tracing::enabled!(tracing::Level::TRACE) {
        return;
    }
    let end = buffer
        .iter()
        .rposition(|&b| b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    let mut hex = String::with_capacity(end * 3);
    for byte in &buffer[..end] {
        hex.push_str(&format!("{byte:02x} "));
    }
    tracing::trace!(direction, data = hex.trim_end());
}
