use super::{Category, CmsisDapError, Request};

#[derive(Clone, Copy, Debug)]
pub enum HostStatusKind {
    Connected = 0,
    Running = 1,
}

/// `DAP_HostStatus` (0x01): drives the probe's status LEDs. Has no effect
/// on transport state; exists so the host can signal "connected"/"running"
/// on attach/detach.
#[derive(Clone, Copy, Debug)]
pub struct HostStatusRequest {
    pub kind: HostStatusKind,
    pub active: bool,
}

impl Request for HostStatusRequest {
    const CATEGORY: Category = Category(0x01);
    type Response = ();

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer[0] = self.kind as u8;
        buffer[1] = self.active as u8;
        Ok(2)
    }

    fn parse_response(&self, _buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        Ok(())
    }
}
