//! `DAP_SWJ_Clock` (0x11) and `DAP_SWJ_Pins` (0x10).

use scroll::{Pread, Pwrite, LE};

use super::{Category, CmsisDapError, Request, Status};

/// Requests the probe switch to `clock_hz` SWCLK/TCK frequency.
#[derive(Clone, Copy, Debug)]
pub struct SwjClockRequest {
    pub clock_hz: u32,
}

impl Request for SwjClockRequest {
    const CATEGORY: Category = Category(0x11);
    type Response = Status;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer
            .pwrite_with(self.clock_hz, 0, LE)
            .map_err(|_| CmsisDapError::InvalidResponse)?;
        Ok(4)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        Status::from_byte(*buffer.first().ok_or(CmsisDapError::InvalidResponse)?)
    }
}

pub mod pin {
    pub const SWCLK_TCK: u8 = 0x01;
    pub const SWDIO_TMS: u8 = 0x02;
    pub const TDI: u8 = 0x04;
    pub const TDO: u8 = 0x08;
    pub const N_TRST: u8 = 0x20;
    pub const N_RESET: u8 = 0x80;
}

/// Drives (and reads back) the raw SWJ pins. Used by the wake sequence's
/// line-reset and by target reset via `nRESET`.
#[derive(Clone, Copy, Debug)]
pub struct SwjPinsRequest {
    pub output: u8,
    pub select: u8,
    pub wait_us: u32,
}

impl Request for SwjPinsRequest {
    const CATEGORY: Category = Category(0x10);
    type Response = u8;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer[0] = self.output;
        buffer[1] = self.select;
        buffer
            .pwrite_with(self.wait_us, 2, LE)
            .map_err(|_| CmsisDapError::InvalidResponse)?;
        Ok(6)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        buffer
            .pread_with::<u8>(0, LE)
            .map_err(|_| CmsisDapError::InvalidResponse)
    }
}
