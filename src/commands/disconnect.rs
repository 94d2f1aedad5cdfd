use super::{Category, CmsisDapError, Request, Status};

/// `DAP_Disconnect` (0x03).
#[derive(Clone, Copy, Debug, Default)]
pub struct DisconnectRequest;

impl Request for DisconnectRequest {
    const CATEGORY: Category = Category(0x03);
    type Response = Status;

    fn to_bytes(&self, _buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        Ok(0)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        Status::from_byte(*buffer.first().ok_or(CmsisDapError::InvalidResponse)?)
    }
}
