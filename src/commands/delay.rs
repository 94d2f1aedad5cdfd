use scroll::{Pwrite, LE};

use super::{Category, CmsisDapError, Request, Status};

/// `DAP_Delay` (0x09): asks the probe to idle for `delay_us` microseconds
/// before processing the next command.
#[derive(Clone, Copy, Debug)]
pub struct DelayRequest {
    pub delay_us: u16,
}

impl Request for DelayRequest {
    const CATEGORY: Category = Category(0x09);
    type Response = Status;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer
            .pwrite_with(self.delay_us, 0, LE)
            .map_err(|_| CmsisDapError::InvalidResponse)?;
        Ok(2)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        Status::from_byte(*buffer.first().ok_or(CmsisDapError::InvalidResponse)?)
    }
}
