//! `DAP_Info` (0x00): identity strings and numeric capability parameters.
//! One request type per sub-ID, matching `cmsis-dap-protocol.h`'s `DI_*`
//! table.

use scroll::{Pread, LE};

use super::{Category, CmsisDapError, Request};

const DI_VENDOR_NAME: u8 = 0x01;
const DI_PRODUCT_NAME: u8 = 0x02;
const DI_SERIAL_NUMBER: u8 = 0x03;
const DI_PROTOCOL_VERSION: u8 = 0x04;
const DI_CAPABILITIES: u8 = 0xF0;
const DI_UART_RX_BUFFER_SIZE: u8 = 0xFB;
const DI_UART_TX_BUFFER_SIZE: u8 = 0xFC;
const DI_SWO_TRACE_BUFFER_SIZE: u8 = 0xFD;
const DI_MAX_PACKET_COUNT: u8 = 0xFE;
const DI_MAX_PACKET_SIZE: u8 = 0xFF;

fn string_response(buffer: &[u8]) -> Result<String, CmsisDapError> {
    let len = *buffer.first().ok_or(CmsisDapError::InvalidResponse)? as usize;
    let bytes = buffer
        .get(1..1 + len)
        .ok_or(CmsisDapError::NotEnoughData {
            expected: 1 + len,
            actual: buffer.len(),
        })?;
    // The string is null-terminated; drop the trailing NUL if present.
    let bytes = match bytes.last() {
        Some(0) => &bytes[..bytes.len() - 1],
        _ => bytes,
    };
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| CmsisDapError::InvalidResponse)
}

macro_rules! string_info_request {
    ($request:ident, $id:expr) => {
        #[derive(Clone, Copy, Debug, Default)]
        pub struct $request;

        impl Request for $request {
            const CATEGORY: Category = Category(0x00);
            type Response = String;

            fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
                buffer[0] = $id;
                Ok(1)
            }

            fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
                string_response(buffer)
            }
        }
    };
}

string_info_request!(VendorNameRequest, DI_VENDOR_NAME);
string_info_request!(ProductNameRequest, DI_PRODUCT_NAME);
string_info_request!(SerialNumberRequest, DI_SERIAL_NUMBER);
string_info_request!(ProtocolVersionRequest, DI_PROTOCOL_VERSION);

/// `DAP_Info(Capabilities)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CapabilitiesRequest;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub swd: bool,
    pub jtag: bool,
    pub swo_uart: bool,
    pub swo_manchester: bool,
    pub atomic_commands: bool,
    pub test_domain_timer: bool,
    pub swo_streaming_trace: bool,
    pub uart_comm_port: bool,
}

impl Request for CapabilitiesRequest {
    const CATEGORY: Category = Category(0x00);
    type Response = Capabilities;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer[0] = DI_CAPABILITIES;
        Ok(1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        let len = *buffer.first().ok_or(CmsisDapError::InvalidResponse)?;
        if len == 0 {
            return Err(CmsisDapError::InvalidResponse);
        }
        let info0 = buffer[1];
        Ok(Capabilities {
            swd: info0 & 0x01 != 0,
            jtag: info0 & 0x02 != 0,
            swo_uart: info0 & 0x04 != 0,
            swo_manchester: info0 & 0x08 != 0,
            atomic_commands: info0 & 0x10 != 0,
            test_domain_timer: info0 & 0x20 != 0,
            swo_streaming_trace: info0 & 0x40 != 0,
            uart_comm_port: info0 & 0x80 != 0,
        })
    }
}

macro_rules! u16_info_request {
    ($request:ident, $id:expr) => {
        #[derive(Clone, Copy, Debug, Default)]
        pub struct $request;

        impl Request for $request {
            const CATEGORY: Category = Category(0x00);
            type Response = u16;

            fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
                buffer[0] = $id;
                Ok(1)
            }

            fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
                let len = *buffer.first().ok_or(CmsisDapError::InvalidResponse)?;
                match len {
                    1 => Ok(*buffer.get(1).ok_or(CmsisDapError::InvalidResponse)? as u16),
                    2 => buffer
                        .pread_with::<u16>(1, LE)
                        .map_err(|_| CmsisDapError::InvalidResponse),
                    _ => Err(CmsisDapError::InvalidResponse),
                }
            }
        }
    };
}

u16_info_request!(UartRxBufferSizeRequest, DI_UART_RX_BUFFER_SIZE);
u16_info_request!(UartTxBufferSizeRequest, DI_UART_TX_BUFFER_SIZE);
u16_info_request!(SwoTraceBufferSizeRequest, DI_SWO_TRACE_BUFFER_SIZE);
u16_info_request!(MaxPacketSizeRequest, DI_MAX_PACKET_SIZE);

/// `DAP_Info(Max_Packet_Count)`: reported as a single byte, unlike the
/// other numeric IDs.
#[derive(Clone, Copy, Debug, Default)]
pub struct MaxPacketCountRequest;

impl Request for MaxPacketCountRequest {
    const CATEGORY: Category = Category(0x00);
    type Response = u8;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer[0] = DI_MAX_PACKET_COUNT;
        Ok(1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        if *buffer.first().ok_or(CmsisDapError::InvalidResponse)? == 0 {
            return Err(CmsisDapError::InvalidResponse);
        }
        Ok(*buffer.get(1).ok_or(CmsisDapError::InvalidResponse)?)
    }
}
