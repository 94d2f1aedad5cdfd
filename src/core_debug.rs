//! Core-debug layer: halt/resume/step, core register
//! read/write via `DCRSR`/`DCRDR`, and reset-and-stop via `DEMCR`/`AIRCR`.
//! Built entirely out of `mem_rd32`/`mem_wr32`/`mem_match32` plus the
//! queue's match-mask primitive.

use std::time::{Duration, Instant};

use crate::arm::core_debug::{
    CoreRegisterId, Dcrsr, Demcr, Dhcsr, AIRCR, AIRCR_SYSRESETREQ, AIRCR_VECTCLRACTIVE,
    AIRCR_VECTKEY, DCRDR, DCRSR, DEMCR, DHCSR, DHCSR_S_REGRDY,
};
use crate::error::TransportError;
use crate::transport::Transport;

/// Poll budget for `core_halt`/`core_resume`.
const HALT_POLL_ITERATIONS: u32 = 64;

impl Transport {
    /// `core_halt`: preserves `C_MASKINTS` iff `C_DEBUGEN` was
    /// already set, otherwise forces it to 0; writes back `C_HALT |
    /// C_DEBUGEN | DBGKEY`; polls for `S_HALT`.
    pub fn core_halt(&mut self) -> Result<(), TransportError> {
        let current = Dhcsr::from(self.mem_rd32(DHCSR)?);
        let mut next = Dhcsr::from(0);
        next.set_c_halt(true);
        next.set_c_debugen(true);
        if current.c_debugen() {
            next.set_c_maskints(current.c_maskints());
        } else {
            next.set_c_maskints(false);
        }
        self.mem_wr32(DHCSR, next.for_write().into())?;

        for _ in 0..HALT_POLL_ITERATIONS {
            if Dhcsr::from(self.mem_rd32(DHCSR)?).s_halt() {
                return Ok(());
            }
        }
        Err(TransportError::Timeout)
    }

    /// `core_resume`: same `C_MASKINTS` preservation rule,
    /// clears `C_HALT`, polls for `S_HALT == 0`.
    pub fn core_resume(&mut self) -> Result<(), TransportError> {
        let current = Dhcsr::from(self.mem_rd32(DHCSR)?);
        let mut next = Dhcsr::from(0);
        next.set_c_halt(false);
        next.set_c_debugen(true);
        if current.c_debugen() {
            next.set_c_maskints(current.c_maskints());
        } else {
            next.set_c_maskints(false);
        }
        self.mem_wr32(DHCSR, next.for_write().into())?;

        for _ in 0..HALT_POLL_ITERATIONS {
            if !Dhcsr::from(self.mem_rd32(DHCSR)?).s_halt() {
                return Ok(());
            }
        }
        Err(TransportError::Timeout)
    }

    /// `core_step`: halts first if not already halted, then
    /// clears `C_HALT` and sets `C_STEP` under the debug key. The caller
    /// follows up with `core_wait_halt`.
    pub fn core_step(&mut self) -> Result<(), TransportError> {
        let current = Dhcsr::from(self.mem_rd32(DHCSR)?);
        if !current.s_halt() {
            self.core_halt()?;
        }
        let current = Dhcsr::from(self.mem_rd32(DHCSR)?);
        let mut next = Dhcsr::from(0);
        next.set_c_halt(false);
        next.set_c_step(true);
        next.set_c_debugen(true);
        next.set_c_maskints(current.c_maskints());
        self.mem_wr32(DHCSR, next.for_write().into())
    }

    /// `core_wait_halt`: polls `DHCSR` until `S_HALT` is set;
    /// returns `INTERRUPTED` when the attention counter changes between
    /// polls.
    pub fn core_wait_halt(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let attn = self.attention();
        let baseline = attn.snapshot();
        let deadline = Instant::now() + timeout;
        loop {
            if Dhcsr::from(self.mem_rd32(DHCSR)?).s_halt() {
                return Ok(());
            }
            if attn.changed_since(baseline) {
                return Err(TransportError::Interrupted);
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout);
            }
        }
    }

    /// `core_check_halt`: one-shot read of `DHCSR`, returning
    /// whether `S_HALT` is currently set.
    pub fn core_check_halt(&mut self) -> Result<bool, TransportError> {
        Ok(Dhcsr::from(self.mem_rd32(DHCSR)?).s_halt())
    }

    /// `core_reg_rd(id)`: one queued batch writing `DCRSR`
    /// with the read bit, match-reading `DHCSR == S_REGRDY`, then reading
    /// `DCRDR`.
    pub fn core_reg_rd(&mut self, id: CoreRegisterId) -> Result<u32, TransportError> {
        let mut dcrsr = Dcrsr::from(0);
        dcrsr.set_regwnr(false);
        dcrsr.set_regsel(id.0);
        let keep = self.map_csw_keep;
        let results = self.run_batch(|t| {
            use crate::arm::ap;
            t.q_ap_wr(ap::ADDR_CSW, ap::csw_word_access(keep));
            t.q_ap_wr(ap::ADDR_TAR, DCRSR);
            t.q_ap_wr(ap::ADDR_DRW, dcrsr.into());
            t.q_set_mask(DHCSR_S_REGRDY);
            t.q_ap_wr(ap::ADDR_TAR, DHCSR);
            t.q_ap_match(ap::ADDR_DRW, DHCSR_S_REGRDY);
            t.q_ap_wr(ap::ADDR_TAR, DCRDR);
            t.q_ap_rd(ap::ADDR_DRW);
        })?;
        results.first().copied().ok_or(TransportError::Protocol)
    }

    /// `core_reg_wr(id, val)`: pre-writes `DCRDR`, then writes
    /// `DCRSR` with the write bit, then match-reads `DHCSR == S_REGRDY`.
    pub fn core_reg_wr(&mut self, id: CoreRegisterId, value: u32) -> Result<(), TransportError> {
        let mut dcrsr = Dcrsr::from(0);
        dcrsr.set_regwnr(true);
        dcrsr.set_regsel(id.0);
        let keep = self.map_csw_keep;
        self.run_batch(|t| {
            use crate::arm::ap;
            t.q_ap_wr(ap::ADDR_CSW, ap::csw_word_access(keep));
            t.q_ap_wr(ap::ADDR_TAR, DCRDR);
            t.q_ap_wr(ap::ADDR_DRW, value);
            t.q_ap_wr(ap::ADDR_TAR, DCRSR);
            t.q_ap_wr(ap::ADDR_DRW, dcrsr.into());
            t.q_set_mask(DHCSR_S_REGRDY);
            t.q_ap_wr(ap::ADDR_TAR, DHCSR);
            t.q_ap_match(ap::ADDR_DRW, DHCSR_S_REGRDY);
        })?;
        Ok(())
    }

    /// `core_reg_rd_list(ids[])`: one queued batch over the id
    /// list, returning results in list order.
    pub fn core_reg_rd_list(&mut self, ids: &[CoreRegisterId]) -> Result<Vec<u32>, TransportError> {
        let keep = self.map_csw_keep;
        self.run_batch(|t| {
            use crate::arm::ap;
            t.q_ap_wr(ap::ADDR_CSW, ap::csw_word_access(keep));
            t.q_set_mask(DHCSR_S_REGRDY);
            for id in ids {
                let mut dcrsr = Dcrsr::from(0);
                dcrsr.set_regwnr(false);
                dcrsr.set_regsel(id.0);
                t.q_ap_wr(ap::ADDR_TAR, DCRSR);
                t.q_ap_wr(ap::ADDR_DRW, dcrsr.into());
                t.q_ap_wr(ap::ADDR_TAR, DHCSR);
                t.q_ap_match(ap::ADDR_DRW, DHCSR_S_REGRDY);
                t.q_ap_wr(ap::ADDR_TAR, DCRDR);
                t.q_ap_rd(ap::ADDR_DRW);
            }
        })
    }

    /// Clears pending exception state by writing `AIRCR.VECTCLRACTIVE`
    /// under `VECTKEY`.
    pub(crate) fn clear_vectactive(&mut self) -> Result<(), TransportError> {
        self.mem_wr32(AIRCR, AIRCR_VECTKEY | AIRCR_VECTCLRACTIVE)
    }

    /// Reset-and-stop: halt, enable
    /// `VC_CORERESET` in `DEMCR`, assert `SYSRESETREQ`, then wait for the
    /// core to come back up halted.
    pub fn reset_and_stop(&mut self) -> Result<(), TransportError> {
        self.core_halt_retrying()?;

        let mut demcr = Demcr::from(0);
        demcr.set_trcena(true);
        demcr.set_vc_corereset(true);
        self.mem_wr32(DEMCR, demcr.into())?;

        self.mem_wr32(AIRCR, AIRCR_VECTKEY | AIRCR_SYSRESETREQ)?;

        self.core_halt_retrying()
    }

    /// Loops polling `DHCSR` for `S_HALT`, re-issuing the halt write as
    /// needed; on a read error, re-attach and retry.
    fn core_halt_retrying(&mut self) -> Result<(), TransportError> {
        const ATTEMPTS: u32 = 8;
        let mut last_err = TransportError::Timeout;
        for _ in 0..ATTEMPTS {
            match self.core_halt() {
                Ok(()) => return Ok(()),
                Err(TransportError::Timeout) => continue,
                Err(err) => {
                    last_err = err;
                    if self.attach().is_err() {
                        return Err(last_err);
                    }
                }
            }
        }
        Err(last_err)
    }
}
