use scroll::{Pwrite, LE};

use super::{Category, CmsisDapError, Request, Status};

/// `DAP_WriteABORT` (0x08): a single unbatched write to `DP.ABORT`, used
/// for the fault-recovery `ABORT = ALLCLR` write that
/// must happen outside the normal queued-transfer framing.
#[derive(Clone, Copy, Debug)]
pub struct WriteAbortRequest {
    pub dap_index: u8,
    pub value: u32,
}

impl Request for WriteAbortRequest {
    const CATEGORY: Category = Category(0x08);
    type Response = Status;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer[0] = self.dap_index;
        buffer
            .pwrite_with(self.value, 1, LE)
            .map_err(|_| CmsisDapError::InvalidResponse)?;
        Ok(5)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        Status::from_byte(*buffer.first().ok_or(CmsisDapError::InvalidResponse)?)
    }
}
