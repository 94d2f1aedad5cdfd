//! Debug Port register addresses and bit layouts (ARM IHI 0031).

use bitfield::bitfield;

/// DP register addresses. `SELECT`/`TARGETSEL` share address
/// `0x0C`/`0x08` with read-only registers at the same offset; which one a
/// transfer hits is determined by read/write direction, not address alone.
pub const ADDR_IDR: u8 = 0x00;
pub const ADDR_ABORT: u8 = 0x00;
pub const ADDR_CS: u8 = 0x04;
pub const ADDR_RESEND: u8 = 0x08;
pub const ADDR_SELECT: u8 = 0x08;
pub const ADDR_RDBUFF: u8 = 0x0C;
pub const ADDR_TARGETSEL: u8 = 0x0C;
pub const ADDR_TARGETID: u8 = 0x24;
pub const ADDR_DLPIDR: u8 = 0x34;
pub const ADDR_EVENTSTAT: u8 = 0x44;
pub const ADDR_SELECT1: u8 = 0x54;

bitfield! {
    /// `DP.ABORT`, write-only.
    #[derive(Clone, Copy)]
    pub struct Abort(u32);
    impl Debug;
    pub orunerrclr, set_orunerrclr: 5;
    pub wderrclr, set_wderrclr: 4;
    pub stkerrclr, set_stkerrclr: 3;
    pub stkcmpclr, set_stkcmpclr: 2;
    pub dapabort, set_dapabort: 1;
}

/// Clears every sticky error flag in one write. Matches `DP_ABORT_ALLCLR` (`0x1E`) in `arm-debug.h`.
pub const ABORT_ALLCLR: u32 = 0x1E;

bitfield! {
    /// `DP.CTRL/STAT` (CS), used in the power-up handshake.
    #[derive(Clone, Copy)]
    pub struct Ctrl(u32);
    impl Debug;
    pub csyspwrupack, _: 31;
    pub csyspwrupreq, set_csyspwrupreq: 30;
    pub cdbgpwrupack, _: 29;
    pub cdbgpwrupreq, set_cdbgpwrupreq: 28;
    pub cdbgrstack, _: 27;
    pub cdbgrstreq, set_cdbgrstreq: 26;
    pub u16, trn_cnt, set_trn_cnt: 23, 12;
    pub sticky_err, set_sticky_err: 5;
    pub wdata_err, _: 7;
    pub read_ok, _: 6;
    pub sticky_orun, set_sticky_orun: 1;
    pub orun_detect, set_orun_detect: 0;
}

impl From<u32> for Ctrl {
    fn from(raw: u32) -> Self {
        Ctrl(raw)
    }
}
impl From<Ctrl> for u32 {
    fn from(value: Ctrl) -> Self {
        value.0
    }
}

/// The power-up request/ack mask used in the attach handshake.
pub const CS_CDBGPWRUPREQ: u32 = 0x1000_0000;
pub const CS_CDBGPWRUPACK: u32 = 0x2000_0000;
pub const CS_CSYSPWRUPREQ: u32 = 0x4000_0000;
pub const CS_CSYSPWRUPACK: u32 = 0x8000_0000;
pub const CS_POWER_REQUEST: u32 = CS_CDBGPWRUPREQ | CS_CSYSPWRUPREQ;
pub const CS_POWER_ACK_MASK: u32 = CS_CDBGPWRUPACK | CS_CSYSPWRUPACK;

bitfield! {
    /// `DP.IDR` (also `DP.DPIDR`), read-only, identifies the DP version.
    #[derive(Clone, Copy)]
    pub struct Idr(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    pub u8, part_no, _: 27, 20;
    pub min, _: 16;
    pub u8, version, _: 15, 12;
    pub u8, jep_cc, _: 11, 8;
    pub u8, jep_id, _: 7, 1;
}

impl From<u32> for Idr {
    fn from(raw: u32) -> Self {
        Idr(raw)
    }
}

impl Idr {
    /// Looks up the JEDEC JEP-106 manufacturer name from `jep_cc`/`jep_id`,
    /// for attach-time logging.
    pub fn manufacturer_name(&self) -> Option<&'static str> {
        jep106::JEP106Code::new(self.jep_cc(), self.jep_id()).get()
    }
}

/// DP architecture version, decoded from `IDR` bits 12..14:
/// `dp_version = (idcode >> 12) & 7`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DpVersion {
    V0,
    V1,
    V2,
    V3,
    Unsupported(u8),
}

impl DpVersion {
    pub fn from_idcode(idcode: u32) -> Self {
        match (idcode >> 12) & 0x7 {
            0 => DpVersion::V0,
            1 => DpVersion::V1,
            2 => DpVersion::V2,
            3 => DpVersion::V3,
            other => DpVersion::Unsupported(other as u8),
        }
    }

    /// Whether `DP.SELECT` is a 4-bit-banked register (v1/v2) or a linear
    /// 32-bit address (v3).
    pub fn is_linear_select(self) -> bool {
        matches!(self, DpVersion::V3)
    }
}

/// RP2040's IDCODE, used to detect the multidrop special case.
pub const RP2040_IDCODE: u32 = 0x0BC1_2477;
/// RP2040's TARGETID, paired with [`RP2040_IDCODE`] above.
pub const RP2040_TARGETID: u32 = 0x0100_2927;

/// `DP.SELECT` banking. Computes the value that must be
/// shadowed and written before accessing a DP or AP register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectValue(pub u32);

impl SelectValue {
    /// DPv1/v2: a DP register bank selection. Only DP registers whose
    /// address low nybble is `0x4` (i.e. `CS`/`CTRL-STAT`'s bank-sensitive
    /// sibling registers) are bank-sensitive; callers should skip this for
    /// other DP registers.
    pub fn dp_bank_v1(current: u32, bank: u8) -> Self {
        SelectValue((current & !0xF) | (bank as u32 & 0xF))
    }

    /// DPv1/v2: select an AP and AP register bank for the next AP access.
    pub fn ap_bank_v1(current: u32, ap_sel: u8, ap_bank: u8) -> Self {
        SelectValue(((ap_sel as u32) << 24) | (current & 0x00FF_FF00) | ((ap_bank as u32 & 0xF) << 4) | (current & 0xF))
    }

    /// DPv3: `SELECT` is the AP register address itself, aligned down to
    /// its containing 16-byte bank.
    pub fn linear_v3(ap_register_addr: u32) -> Self {
        SelectValue(ap_register_addr & 0xFFFF_FFF0)
    }
}
