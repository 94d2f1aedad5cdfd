//! DP/AP/MEM layer: word, bulk, and match-read memory access
//! through the single in-scope MEM-AP, built atop the transaction queue's
//! `q_ap_*` primitives and their automatic `DP.SELECT` banking (§4.4).

use crate::arm::ap;
use crate::error::TransportError;
use crate::transport::Transport;

impl Transport {
    /// `mem_rd32(addr)`: requires word alignment; writes
    /// `MAP.CSW = SZ_32|INC_OFF|DEVICE_EN|keep`, `MAP.TAR = addr`, then
    /// reads `MAP.DRW`.
    pub fn mem_rd32(&mut self, addr: u32) -> Result<u32, TransportError> {
        if addr % 4 != 0 {
            return Err(TransportError::BadParams);
        }
        let keep = self.map_csw_keep;
        let results = self.run_batch(|t| {
            t.q_ap_wr(ap::ADDR_CSW, ap::csw_word_access(keep));
            t.q_ap_wr(ap::ADDR_TAR, addr);
            t.q_ap_rd(ap::ADDR_DRW);
        })?;
        results.first().copied().ok_or(TransportError::Protocol)
    }

    /// `mem_wr32(addr, val)`.
    pub fn mem_wr32(&mut self, addr: u32, val: u32) -> Result<(), TransportError> {
        if addr % 4 != 0 {
            return Err(TransportError::BadParams);
        }
        let keep = self.map_csw_keep;
        self.run_batch(|t| {
            t.q_ap_wr(ap::ADDR_CSW, ap::csw_word_access(keep));
            t.q_ap_wr(ap::ADDR_TAR, addr);
            t.q_ap_wr(ap::ADDR_DRW, val);
        })?;
        Ok(())
    }

    /// `mem_match32(addr, val)`: same CSW/TAR setup as
    /// `mem_rd32`, then a match-read of `MAP.DRW` against `val` under the
    /// currently queued match-mask (`q_set_mask` must be called first by
    /// the caller if a non-default mask is wanted; a bare equality match
    /// uses an all-ones mask).
    pub fn mem_match32(&mut self, addr: u32, val: u32) -> Result<(), TransportError> {
        if addr % 4 != 0 {
            return Err(TransportError::BadParams);
        }
        let keep = self.map_csw_keep;
        self.run_batch(|t| {
            t.q_ap_wr(ap::ADDR_CSW, ap::csw_word_access(keep));
            t.q_ap_wr(ap::ADDR_TAR, addr);
            t.q_ap_match(ap::ADDR_DRW, val);
        })?;
        Ok(())
    }

    /// `mem_rd_words(addr, n)`: iterates over 1024-byte
    /// auto-increment windows, one `run_batch` per window. `MAP.CSW`/`TAR`
    /// shadows persist across windows, so only a window whose base address
    /// or access width actually changes re-emits those writes.
    pub fn mem_rd_words(&mut self, addr: u32, n: usize) -> Result<Vec<u32>, TransportError> {
        if addr % 4 != 0 {
            return Err(TransportError::BadParams);
        }
        let mut out = Vec::with_capacity(n);
        let keep = self.map_csw_keep;
        for_each_wrap_window(addr, n, |window_addr, window_count| {
            let words = self.run_batch(|t| {
                t.q_ap_wr(ap::ADDR_CSW, ap::csw_bulk_access(keep));
                t.q_ap_wr(ap::ADDR_TAR, window_addr);
                for _ in 0..window_count {
                    t.q_ap_rd(ap::ADDR_DRW);
                }
            })?;
            out.extend_from_slice(&words);
            Ok(())
        })?;
        Ok(out)
    }

    /// `mem_wr_words(addr, n)`: mirror of `mem_rd_words` for
    /// writes.
    pub fn mem_wr_words(&mut self, addr: u32, data: &[u32]) -> Result<(), TransportError> {
        if addr % 4 != 0 {
            return Err(TransportError::BadParams);
        }
        let keep = self.map_csw_keep;
        let mut offset = 0usize;
        for_each_wrap_window(addr, data.len(), |window_addr, window_count| {
            let chunk = &data[offset..offset + window_count];
            self.run_batch(|t| {
                t.q_ap_wr(ap::ADDR_CSW, ap::csw_bulk_access(keep));
                t.q_ap_wr(ap::ADDR_TAR, window_addr);
                for word in chunk {
                    t.q_ap_wr(ap::ADDR_DRW, *word);
                }
            })?;
            offset += window_count;
            Ok(())
        })
    }
}

/// Splits a bulk word transfer of `addr..addr+4*n` into the TAR
/// auto-increment windows it must not cross, invoking
/// `body(window_addr, window_word_count)` for each. Exactly one TAR
/// write reaches the wire per window.
fn for_each_wrap_window(
    addr: u32,
    n: usize,
    mut body: impl FnMut(u32, usize) -> Result<(), TransportError>,
) -> Result<(), TransportError> {
    let mut remaining = n;
    let mut cursor = addr;
    while remaining > 0 {
        let offset_in_window = cursor & ap::TAR_WRAP_MASK;
        let words_left_in_window = ((ap::TAR_WRAP_SIZE - offset_in_window) / 4) as usize;
        let window_count = remaining.min(words_left_in_window).max(1);
        body(cursor, window_count)?;
        cursor = cursor.wrapping_add((window_count as u32) * 4);
        remaining -= window_count;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_window_when_transfer_fits() {
        let mut windows = Vec::new();
        for_each_wrap_window(0x2000_0000, 4, |addr, count| {
            windows.push((addr, count));
            Ok(())
        })
        .unwrap();
        assert_eq!(windows, vec![(0x2000_0000, 4)]);
    }

    #[test]
    fn splits_at_1024_byte_boundary() {
        // 4 bytes before the boundary, then the rest spills into the next
        // window.
        let addr = 0x2000_0000 + ap::TAR_WRAP_SIZE - 4;
        let n_words = 4; // 16 bytes: 1 word in this window, 3 in the next.
        let mut windows = Vec::new();
        for_each_wrap_window(addr, n_words, |a, c| {
            windows.push((a, c));
            Ok(())
        })
        .unwrap();
        assert_eq!(windows, vec![(addr, 1), (addr + 4, 3)]);
    }

    #[test]
    fn misaligned_address_is_rejected() {
        let mut t = Transport::new(crate::usb::ProbeSelector::default());
        assert_eq!(t.mem_rd32(0x1001), Err(TransportError::BadParams));
    }
}
