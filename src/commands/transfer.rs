//! `DAP_TransferConfigure` (0x04), `DAP_Transfer` (0x05) and
//! `DAP_TransferBlock` (0x06). `Transfer` is the batched primitive the
//! transaction queue builds on.

use scroll::{Pread, Pwrite, LE};

use super::{Category, CmsisDapError, Request, Status};

/// `DAP_TransferConfigure`.
#[derive(Clone, Copy, Debug)]
pub struct TransferConfigureRequest {
    pub idle_cycles: u8,
    pub wait_retry: u16,
    pub match_retry: u16,
}

impl Request for TransferConfigureRequest {
    const CATEGORY: Category = Category(0x04);
    type Response = Status;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer[0] = self.idle_cycles;
        buffer
            .pwrite_with(self.wait_retry, 1, LE)
            .map_err(|_| CmsisDapError::InvalidResponse)?;
        buffer
            .pwrite_with(self.match_retry, 3, LE)
            .map_err(|_| CmsisDapError::InvalidResponse)?;
        Ok(5)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        Status::from_byte(*buffer.first().ok_or(CmsisDapError::InvalidResponse)?)
    }
}

/// Request-byte bit layout for one `DAP_Transfer` operation (protocol
/// constants `XFER_*`).
mod bits {
    pub const ACCESS_PORT: u8 = 0x01;
    pub const READ: u8 = 0x02;
    pub const VALUE_MATCH: u8 = 0x10;
    pub const MATCH_MASK: u8 = 0x20;
}

/// One queued DP/AP operation inside a `DAP_Transfer` request.
#[derive(Clone, Copy, Debug)]
pub struct TransferOp {
    pub access_port: bool,
    pub read: bool,
    /// Register address, one of 0x00/0x04/0x08/0x0C.
    pub addr: u8,
    /// This is a match-mask-set pseudo op (`q_set_mask`), not a real
    /// register access; `value` carries the new mask.
    pub match_mask: bool,
    /// This is a match-read: poll until `(value & mask) == compare`.
    pub value_match: bool,
    /// Write data, match-mask value, or match-compare value. `None` for a
    /// plain read.
    pub value: Option<u32>,
}

impl TransferOp {
    fn request_byte(&self) -> u8 {
        let mut byte = self.addr & 0x0C;
        if self.access_port {
            byte |= bits::ACCESS_PORT;
        }
        if self.read {
            byte |= bits::READ;
        }
        if self.value_match {
            byte |= bits::VALUE_MATCH;
        }
        if self.match_mask {
            byte |= bits::MATCH_MASK;
        }
        byte
    }

    fn has_word(&self) -> bool {
        !self.read || self.value_match || self.match_mask
    }

    /// Whether a successfully executed copy of this op yields a data word
    /// in the response (a genuine register read, not a match operation).
    fn yields_data(&self) -> bool {
        self.read && !self.value_match
    }
}

/// The SWD ACK field returned in a `DAP_Transfer`/`DAP_TransferBlock`
/// response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ack {
    Ok,
    Wait,
    Fault,
    /// All three ACK bits set (or none): no real response from the line.
    Silent,
    /// Some other combination outside {OK, WAIT, FAULT}.
    Bogus,
}

impl Ack {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0x01 => Ack::Ok,
            0x02 => Ack::Wait,
            0x04 => Ack::Fault,
            0x07 => Ack::Silent,
            _ => Ack::Bogus,
        }
    }
}

/// Decoded `DAP_Transfer` response.
#[derive(Clone, Debug)]
pub struct TransferResponse {
    pub executed: u8,
    pub ack: Ack,
    pub protocol_error: bool,
    pub value_mismatch: bool,
    pub data: Vec<u32>,
}

/// `DAP_Transfer`: the batched primitive the transaction queue builds on.
#[derive(Clone, Debug)]
pub struct TransferRequest {
    pub dap_index: u8,
    pub ops: Vec<TransferOp>,
}

impl Request for TransferRequest {
    const CATEGORY: Category = Category(0x05);
    type Response = TransferResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer[0] = self.dap_index;
        buffer[1] = self.ops.len() as u8;
        let mut offset = 2usize;
        for op in &self.ops {
            buffer[offset] = op.request_byte();
            offset += 1;
            if op.has_word() {
                let value = op.value.unwrap_or(0);
                buffer
                    .pwrite_with(value, offset, LE)
                    .map_err(|_| CmsisDapError::InvalidResponse)?;
                offset += 4;
            }
        }
        Ok(offset)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        if buffer.len() < 2 {
            return Err(CmsisDapError::NotEnoughData {
                expected: 2,
                actual: buffer.len(),
            });
        }
        let executed = buffer[0];
        let status = buffer[1];
        let ack = Ack::from_bits(status & 0x07);
        let protocol_error = status & 0x08 != 0;
        let value_mismatch = status & 0x10 != 0;

        let mut data = Vec::new();
        let mut offset = 2usize;
        for op in self.ops.iter().take(executed as usize) {
            if op.yields_data() {
                let word = buffer
                    .pread_with::<u32>(offset, LE)
                    .map_err(|_| CmsisDapError::NotEnoughData {
                        expected: offset + 4,
                        actual: buffer.len(),
                    })?;
                data.push(word);
                offset += 4;
            }
        }

        Ok(TransferResponse {
            executed,
            ack,
            protocol_error,
            value_mismatch,
            data,
        })
    }
}

/// `DAP_TransferBlock`: a single register accessed `count` times in a row
/// without per-op framing overhead. The transaction queue does not use
/// this (bulk memory access is built out of repeated `Transfer` ops so
/// window bookkeeping stays uniform), but it is part of the command
/// layer's coverage of the protocol.
#[derive(Clone, Debug)]
pub struct TransferBlockRequest {
    pub dap_index: u8,
    pub access_port: bool,
    pub read: bool,
    pub addr: u8,
    pub values: Vec<u32>,
    pub read_count: u16,
}

#[derive(Clone, Debug)]
pub struct TransferBlockResponse {
    pub executed: u16,
    pub ack: Ack,
    pub data: Vec<u32>,
}

impl Request for TransferBlockRequest {
    const CATEGORY: Category = Category(0x06);
    type Response = TransferBlockResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer[0] = self.dap_index;
        let count = if self.read {
            self.read_count
        } else {
            self.values.len() as u16
        };
        buffer
            .pwrite_with(count, 1, LE)
            .map_err(|_| CmsisDapError::InvalidResponse)?;
        let mut byte = self.addr & 0x0C;
        if self.access_port {
            byte |= bits::ACCESS_PORT;
        }
        if self.read {
            byte |= bits::READ;
        }
        buffer[3] = byte;
        let mut offset = 4;
        if !self.read {
            for value in &self.values {
                buffer
                    .pwrite_with(*value, offset, LE)
                    .map_err(|_| CmsisDapError::InvalidResponse)?;
                offset += 4;
            }
        }
        Ok(offset)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        if buffer.len() < 3 {
            return Err(CmsisDapError::NotEnoughData {
                expected: 3,
                actual: buffer.len(),
            });
        }
        let executed = buffer
            .pread_with::<u16>(0, LE)
            .map_err(|_| CmsisDapError::InvalidResponse)?;
        let ack = Ack::from_bits(buffer[2] & 0x07);
        let mut data = Vec::new();
        if self.read {
            let mut offset = 3;
            for _ in 0..executed {
                let word = buffer
                    .pread_with::<u32>(offset, LE)
                    .map_err(|_| CmsisDapError::NotEnoughData {
                        expected: offset + 4,
                        actual: buffer.len(),
                    })?;
                data.push(word);
                offset += 4;
            }
        }
        Ok(TransferBlockResponse {
            executed,
            ack,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_single_register_read() {
        let request = TransferRequest {
            dap_index: 0,
            ops: vec![TransferOp {
                access_port: false,
                read: true,
                addr: 0x04,
                match_mask: false,
                value_match: false,
                value: None,
            }],
        };
        let mut buffer = [0u8; 16];
        let len = request.to_bytes(&mut buffer).unwrap();
        assert_eq!(&buffer[..len], &[0x00, 0x01, 0x06]);
    }

    #[test]
    fn parses_response_with_one_read() {
        let request = TransferRequest {
            dap_index: 0,
            ops: vec![TransferOp {
                access_port: true,
                read: true,
                addr: 0x0C,
                match_mask: false,
                value_match: false,
                value: None,
            }],
        };
        let response = request
            .parse_response(&[0x01, 0x01, 0x78, 0x56, 0x34, 0x12])
            .unwrap();
        assert_eq!(response.executed, 1);
        assert_eq!(response.ack, Ack::Ok);
        assert_eq!(response.data, vec![0x1234_5678]);
    }

    #[test]
    fn partial_execution_only_yields_completed_prefix() {
        let request = TransferRequest {
            dap_index: 0,
            ops: vec![
                TransferOp {
                    access_port: true,
                    read: true,
                    addr: 0x0C,
                    match_mask: false,
                    value_match: false,
                    value: None,
                },
                TransferOp {
                    access_port: true,
                    read: true,
                    addr: 0x0C,
                    match_mask: false,
                    value_match: false,
                    value: None,
                },
            ],
        };
        // Only the first op executed before a FAULT.
        let response = request
            .parse_response(&[0x01, 0x04, 0x01, 0x00, 0x00, 0x00])
            .unwrap();
        assert_eq!(response.executed, 1);
        assert_eq!(response.ack, Ack::Fault);
        assert_eq!(response.data.len(), 1);
    }
}
