//! `DAP_SWD_Configure` (0x13) and `DAP_SWD_Sequence` (0x1D).

use super::{Category, CmsisDapError, Request, Status};

#[derive(Clone, Copy, Debug, Default)]
pub enum Turnaround {
    #[default]
    Clock1,
    Clock2,
    Clock3,
    Clock4,
}

/// `DAP_SWD_Configure`: sets the turnaround clock count and whether a data
/// phase is always present on WAIT/FAULT.
#[derive(Clone, Copy, Debug, Default)]
pub struct SwdConfigureRequest {
    pub turnaround: Turnaround,
    pub always_data_phase: bool,
}

impl Request for SwdConfigureRequest {
    const CATEGORY: Category = Category(0x13);
    type Response = Status;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        let turnaround = match self.turnaround {
            Turnaround::Clock1 => 0,
            Turnaround::Clock2 => 1,
            Turnaround::Clock3 => 2,
            Turnaround::Clock4 => 3,
        };
        let data_phase = if self.always_data_phase { 0x04 } else { 0 };
        buffer[0] = turnaround | data_phase;
        Ok(1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        Status::from_byte(*buffer.first().ok_or(CmsisDapError::InvalidResponse)?)
    }
}

/// One entry of a `DAP_SWD_Sequence` request: `cycles` clock pulses
/// (1..=64, where 64 is encoded as 0), outputting `data` (LSB first,
/// padded to a byte boundary) or, if `input` is set, capturing that many
/// bits from SWDIO instead.
#[derive(Clone, Debug)]
pub struct SwdSequence {
    pub cycles: u8,
    pub input: bool,
    pub data: Vec<u8>,
}

impl SwdSequence {
    fn info_byte(&self) -> u8 {
        let count = if self.cycles == 64 { 0 } else { self.cycles };
        count | if self.input { 0x80 } else { 0x00 }
    }

    fn byte_len(&self) -> usize {
        ((self.cycles as usize) + 7) / 8
    }
}

/// `DAP_SWD_Sequence`: generates or captures raw SWD bit sequences,
/// outside the normal DP/AP transaction framing. Used for ad-hoc line
/// manipulation; the fixed attach wake sequence is sent as a
/// pre-built raw frame instead, since its bit pattern is architecturally
/// fixed rather than computed.
#[derive(Clone, Debug)]
pub struct SwdSequenceRequest {
    pub sequences: Vec<SwdSequence>,
}

impl Request for SwdSequenceRequest {
    const CATEGORY: Category = Category(0x1D);
    type Response = Vec<u8>;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer[0] = self.sequences.len() as u8;
        let mut offset = 1;
        for sequence in &self.sequences {
            buffer[offset] = sequence.info_byte();
            offset += 1;
            if !sequence.input {
                let len = sequence.byte_len();
                buffer[offset..offset + len].copy_from_slice(&sequence.data[..len]);
                offset += len;
            }
        }
        Ok(offset - 1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        let status = Status::from_byte(*buffer.first().ok_or(CmsisDapError::InvalidResponse)?)?;
        if !status.is_ok() {
            return Err(CmsisDapError::InvalidResponse);
        }
        Ok(buffer[1..].to_vec())
    }
}
