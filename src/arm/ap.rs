//! MEM-AP register addresses and `CSW` bit layout (ARM IHI 0031).

pub const ADDR_CSW: u8 = 0x00;
pub const ADDR_TAR: u8 = 0x04;
pub const ADDR_DRW: u8 = 0x0C;
pub const ADDR_CFG: u8 = 0xF4;
pub const ADDR_BASE: u8 = 0xF8;
pub const ADDR_IDR: u8 = 0xFC;

/// `MAP.CSW` size field. Word accesses use `SZ_32`.
pub const CSW_SIZE_8: u32 = 0x00;
pub const CSW_SIZE_16: u32 = 0x01;
pub const CSW_SIZE_32: u32 = 0x02;

/// `MAP.CSW` auto-increment field.
pub const CSW_INC_OFF: u32 = 0x00;
pub const CSW_INC_SINGLE: u32 = 0x10;
pub const CSW_INC_PACKED: u32 = 0x20;

/// Keeps the transaction enabled on the AHB bus between transfers.
pub const CSW_DEVICE_EN: u32 = 0x40;

/// Bits preserved from the AP's attach-time `CSW` value and OR'd into
/// every subsequent queued write: the high
/// byte (implementation-defined `HPROT`/`HNONSEC`/security bits) plus
/// bits 8-15, mirroring `arm-debug.h`'s `MAP_CSW_KEEP` mask.
pub const CSW_KEEP_MASK: u32 = 0xFF00_FF00;

/// `CSW` value for a single aligned 32-bit memory access.
pub fn csw_word_access(keep: u32) -> u32 {
    CSW_SIZE_32 | CSW_INC_OFF | CSW_DEVICE_EN | (keep & CSW_KEEP_MASK)
}

/// `CSW` value for a bulk auto-incrementing transfer window.
pub fn csw_bulk_access(keep: u32) -> u32 {
    CSW_SIZE_32 | CSW_INC_SINGLE | CSW_DEVICE_EN | (keep & CSW_KEEP_MASK)
}

/// Size of the TAR auto-increment wrap window in bytes.
pub const TAR_WRAP_SIZE: u32 = 0x400;
pub const TAR_WRAP_MASK: u32 = TAR_WRAP_SIZE - 1;
