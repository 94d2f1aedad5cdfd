use super::{Category, CmsisDapError, Request};

/// `DAP_Connect` (0x02): select SWD or JTAG wire protocol.
#[derive(Clone, Copy, Debug)]
pub enum ConnectRequest {
    Default = 0x00,
    Swd = 0x01,
    Jtag = 0x02,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectResponse {
    InitFailed,
    SuccessfulInitForSwd,
    SuccessfulInitForJtag,
}

impl Request for ConnectRequest {
    const CATEGORY: Category = Category(0x02);
    type Response = ConnectResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer[0] = *self as u8;
        Ok(1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        match buffer.first() {
            Some(0x00) => Ok(ConnectResponse::InitFailed),
            Some(0x01) => Ok(ConnectResponse::SuccessfulInitForSwd),
            Some(0x02) => Ok(ConnectResponse::SuccessfulInitForJtag),
            _ => Err(CmsisDapError::InvalidResponse),
        }
    }
}
