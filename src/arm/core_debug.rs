//! Core-debug register addresses and `DHCSR`/`DCRSR` bit layouts (ARMv6-M
//! / ARMv7-M Architecture Reference Manual).

use bitfield::bitfield;

pub const DHCSR: u32 = 0xE000_EDF0;
pub const DCRSR: u32 = 0xE000_EDF4;
pub const DCRDR: u32 = 0xE000_EDF8;
pub const DEMCR: u32 = 0xE000_EDFC;
pub const AIRCR: u32 = 0xE000_ED0C;
pub const DFSR: u32 = 0xE000_ED30;

/// `DHCSR`'s write-enable key; the processor ignores writes to bits
/// [15:0] unless bits [31:16] carry this value.
pub const DHCSR_DBGKEY: u32 = 0xA05F_0000;

bitfield! {
    /// Debug Halting Control and Status Register.
    #[derive(Clone, Copy)]
    pub struct Dhcsr(u32);
    impl Debug;
    pub s_reset_st, _: 25;
    pub s_retire_st, _: 24;
    pub s_lockup, _: 19;
    pub s_sleep, _: 18;
    pub s_halt, _: 17;
    pub s_regrdy, _: 16;
    pub c_maskints, set_c_maskints: 3;
    pub c_step, set_c_step: 2;
    pub c_halt, set_c_halt: 1;
    pub c_debugen, set_c_debugen: 0;
}

impl Dhcsr {
    /// Sets the write-enable key and clears any stale key bits before a
    /// write.
    pub fn for_write(mut self) -> Self {
        self.0 = (self.0 & 0xFFFF) | DHCSR_DBGKEY;
        self
    }
}

impl From<u32> for Dhcsr {
    fn from(raw: u32) -> Self {
        Dhcsr(raw)
    }
}
impl From<Dhcsr> for u32 {
    fn from(value: Dhcsr) -> Self {
        value.0
    }
}

/// `S_REGRDY`, used as the match-mask/match-value for the `DCRSR`
/// handshake.
pub const DHCSR_S_REGRDY: u32 = 1 << 16;

bitfield! {
    /// Debug Core Register Selector Register: selects which core register
    /// the next `DCRDR` transfer reads or writes.
    #[derive(Clone, Copy)]
    pub struct Dcrsr(u32);
    impl Debug;
    pub regwnr, set_regwnr: 16;
    pub u8, regsel, set_regsel: 6, 0;
}

impl From<u32> for Dcrsr {
    fn from(raw: u32) -> Self {
        Dcrsr(raw)
    }
}
impl From<Dcrsr> for u32 {
    fn from(value: Dcrsr) -> Self {
        value.0
    }
}

bitfield! {
    /// Debug Exception and Monitor Control Register.
    #[derive(Clone, Copy)]
    pub struct Demcr(u32);
    impl Debug;
    pub trcena, set_trcena: 24;
    pub vc_harderr, set_vc_harderr: 10;
    pub vc_corereset, set_vc_corereset: 0;
}

impl From<u32> for Demcr {
    fn from(raw: u32) -> Self {
        Demcr(raw)
    }
}
impl From<Demcr> for u32 {
    fn from(value: Demcr) -> Self {
        value.0
    }
}

/// `AIRCR`'s write-enable key.
pub const AIRCR_VECTKEY: u32 = 0x05FA_0000;
pub const AIRCR_SYSRESETREQ: u32 = 1 << 2;
pub const AIRCR_VECTCLRACTIVE: u32 = 1 << 1;

/// Thumb-mode bit set in the initial `xPSR` given to a flash-agent
/// invocation. Cortex-M cores fault on
/// entry if this is clear.
pub const PSR_THUMB: u32 = 0x0100_0000;

/// Register ids accepted by `DCRSR.REGSEL` (ARMv6-M/v7-M core registers
/// 0-15 are R0-R12, SP, LR, PC; xPSR and friends follow).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoreRegisterId(pub u8);

impl CoreRegisterId {
    pub const R0: CoreRegisterId = CoreRegisterId(0);
    pub const SP: CoreRegisterId = CoreRegisterId(13);
    pub const LR: CoreRegisterId = CoreRegisterId(14);
    pub const PC: CoreRegisterId = CoreRegisterId(15);
    pub const XPSR: CoreRegisterId = CoreRegisterId(16);

    pub fn r(n: u8) -> CoreRegisterId {
        CoreRegisterId(n)
    }
}
