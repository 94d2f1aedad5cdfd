//! Transport context and transaction queue engine.
//!
//! [`Transport`] is the single long-lived value the rest of the crate is
//! built around: it owns the USB handle, the lifecycle status, probe
//! capabilities, the register shadow cache, the in-flight queue buffer,
//! and the attention counter. Exactly one thread is meant to own it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::arm::dp::{self, DpVersion, SelectValue};
use crate::cache::ShadowCache;
use crate::commands::transfer::{Ack, TransferOp, TransferRequest};
use crate::commands::write_abort::WriteAbortRequest;
use crate::commands::{self};
use crate::error::TransportError;
use crate::queue::QueueBuffer;
use crate::usb::{DapDevice, ProbeSelector};

/// Lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No USB handle open.
    Offline,
    /// USB present, but the probe failed to configure.
    Unconfig,
    /// Probe ready, no target attached.
    Detached,
    /// Target attached and responsive.
    Attached,
    /// The last transaction failed; re-attach is required.
    Failure,
}

/// Cached `DAP_TransferConfigure` parameters.
#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    pub idle_cycles: u8,
    pub wait_retries: u16,
    pub match_retries: u16,
}

impl Default for TransferConfig {
    fn default() -> Self {
        // A handful of idle cycles and a generous WAIT retry budget, since
        // WAIT exhaustion should surface as TIMEOUT only on a genuinely
        // stuck target.
        TransferConfig {
            idle_cycles: 8,
            wait_retries: 64,
            match_retries: 64,
        }
    }
}

/// Probe-reported packet limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeCaps {
    pub max_packet_count: u8,
    pub max_packet_size: usize,
}

/// Callback invoked on every status transition. Must not re-enter the transport synchronously; callers
/// typically forward it to a channel for delivery on the UI side.
pub type StatusCallback = Box<dyn FnMut(Status) + Send>;

/// A monotonically increasing counter the external UI bumps to request
/// cancellation of any in-progress wait.
#[derive(Debug, Clone, Default)]
pub struct Attention(Arc<AtomicU64>);

impl Attention {
    pub fn new() -> Self {
        Attention(Arc::new(AtomicU64::new(0)))
    }

    /// Called by the external UI thread to request cancellation.
    pub fn signal(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn changed_since(&self, snapshot: u64) -> bool {
        self.snapshot() != snapshot
    }
}

/// The debug transport engine: the context data model plus the transaction
/// queue operations layered on top of it.
pub struct Transport {
    pub(crate) device: Option<Box<dyn DapDevice>>,
    pub(crate) selector: ProbeSelector,
    pub(crate) status: Status,
    pub(crate) caps: ProbeCaps,
    pub(crate) xfer_config: TransferConfig,
    pub(crate) cache: ShadowCache,
    pub(crate) queue: QueueBuffer,
    pub(crate) dp_version: DpVersion,
    /// Memory-AP register-base offset; nonzero only for DPv3. Hard-coded
    /// rather than walked from the CoreSight ROM table.
    pub(crate) mem_ap_base_offset: u32,
    /// Preservation mask OR'd into every queued `CSW` write, read from the target at attach.
    pub(crate) map_csw_keep: u32,
    pub(crate) attention: Attention,
    pub(crate) status_callback: Option<StatusCallback>,
    /// Liveness polling flag for `periodic`.
    pub(crate) poll_liveness: bool,
    /// `dap_index` sent in every `DAP_Transfer`/`DAP_TransferBlock`
    /// request; always 0 since multi-AP discovery is out of scope and
    /// multi-drop target selection is a separate wake-sequence concept
    /// rather than a per-transfer index.
    pub(crate) dap_index: u8,
}

/// The architecturally fixed DPv3 memory-AP base offset. The correct way
/// to obtain this is to walk the CoreSight ROM table; 0x2D00 is kept here
/// as a hard-coded stand-in value until that walk is implemented.
pub const DPV3_MEM_AP_BASE_OFFSET: u32 = 0x2D00;

impl Transport {
    pub fn new(selector: ProbeSelector) -> Self {
        Transport {
            device: None,
            selector,
            status: Status::Offline,
            caps: ProbeCaps::default(),
            xfer_config: TransferConfig::default(),
            cache: ShadowCache::new(),
            queue: QueueBuffer::new(64),
            dp_version: DpVersion::V1,
            mem_ap_base_offset: 0,
            map_csw_keep: 0,
            attention: Attention::new(),
            status_callback: None,
            poll_liveness: true,
            dap_index: 0,
        }
    }

    /// Test-only: injects an already-"open" device and marks the transport
    /// `DETACHED`, skipping USB enumeration and `dap_configure` so scripted
    /// wire-transcript tests can drive `attach`/`q_exec`
    /// directly against a [`crate::usb::mock::MockDapDevice`].
    #[cfg(any(test, feature = "test"))]
    pub fn inject_device(&mut self, device: Box<dyn DapDevice>, caps: ProbeCaps) {
        self.queue = crate::queue::QueueBuffer::new(caps.max_packet_size);
        self.caps = caps;
        self.device = Some(device);
        self.set_status(Status::Detached);
    }

    pub fn attention(&self) -> Attention {
        self.attention.clone()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn set_status_callback(&mut self, callback: StatusCallback) {
        self.status_callback = Some(callback);
    }

    pub(crate) fn set_status(&mut self, new: Status) {
        if self.status == new {
            return;
        }
        tracing::info!(from = ?self.status, to = ?new, "transport status transition");
        self.status = new;
        if let Some(callback) = self.status_callback.as_mut() {
            callback(new);
        }
    }

    /// Closes the USB handle and moves to `OFFLINE`. Called on any USB
    /// I/O failure.
    pub(crate) fn go_offline(&mut self) {
        self.device = None;
        self.set_status(Status::Offline);
    }

    pub(crate) fn device_mut(&mut self) -> Result<&mut dyn DapDevice, TransportError> {
        self.device
            .as_deref_mut()
            .ok_or(TransportError::Offline)
    }

    // ---- q_init / q_exec ---------------------------------------------

    /// Resets the queue and invalidates all shadow registers.
    pub fn q_init(&mut self) {
        self.queue.reset();
        self.cache.invalidate_all();
    }

    /// Flushes the current batch, returning `OK` or the first encountered
    /// error.
    pub fn q_exec(&mut self) -> Result<(), TransportError> {
        if let Some(err) = self.queue.qerror() {
            self.queue.reset();
            return Err(err);
        }
        if self.queue.is_empty() {
            return Ok(());
        }

        let request = self.queue.build_request(self.dap_index);
        let outcome = self.send_transfer(&request);
        self.queue.reset();

        match outcome {
            Ok(()) => Ok(()),
            Err(err) => {
                if err == TransportError::SwdFault {
                    self.clear_abort_after_fault();
                }
                Err(err)
            }
        }
    }

    /// Sends one `DAP_Transfer` request, interprets its ACK/ops-executed
    /// fields into the stable error taxonomy, and stashes any completed
    /// read data on the queue buffer for the caller to retrieve.
    fn send_transfer(&mut self, request: &TransferRequest) -> Result<(), TransportError> {
        let device = self.device_mut()?;
        let response = match commands::send_command(device, request.clone()) {
            Ok(response) => response,
            Err(err) => {
                let kind = TransportError::from(err);
                if kind == TransportError::Io {
                    self.go_offline();
                }
                return Err(kind);
            }
        };

        // Completed reads are always a valid prefix regardless of what
        // follows, so stash them before deciding the final error kind.
        self.queue.set_results(response.data.clone());

        let fully_executed = response.executed as usize == request.ops.len();
        let err = match response.ack {
            Ack::Ok if response.protocol_error => Some(TransportError::SwdParity),
            Ack::Ok if response.value_mismatch => Some(TransportError::Match),
            Ack::Ok if !fully_executed => Some(TransportError::Failed),
            Ack::Ok => None,
            Ack::Wait => Some(TransportError::Timeout),
            Ack::Fault => Some(TransportError::SwdFault),
            Ack::Silent => Some(TransportError::SwdSilent),
            Ack::Bogus => Some(TransportError::SwdBogus),
        };

        match err {
            None => Ok(()),
            Some(kind) => {
                if matches!(kind, TransportError::SwdSilent | TransportError::SwdBogus)
                    || (self.status == Status::Attached
                        && !matches!(kind, TransportError::Timeout | TransportError::Match))
                {
                    self.set_status(Status::Detached);
                }
                Err(kind)
            }
        }
    }

    /// Writes `DP.ABORT = ALLCLR` outside the normal queue framing, as
    /// FAULT recovery requires. Also invalidates every shadow: a FAULT
    /// clears sticky error bits on the DP, so any bank/CSW/TAR value the
    /// cache is holding can no longer be trusted to match silicon. If the
    /// ABORT write itself fails at USB level, lifecycle moves to
    /// `DETACHED`.
    fn clear_abort_after_fault(&mut self) {
        self.cache.invalidate_all();
        let dap_index = self.dap_index;
        let Ok(device) = self.device_mut() else {
            return;
        };
        let request = WriteAbortRequest {
            dap_index,
            value: dp::ABORT_ALLCLR,
        };
        match commands::send_command(device, request) {
            Ok(status) if status.is_ok() => {}
            Ok(_) => self.set_status(Status::Detached),
            Err(err) => {
                if TransportError::from(err) == TransportError::Io {
                    self.go_offline();
                } else {
                    self.set_status(Status::Detached);
                }
            }
        }
    }

    /// Retrieves the results of every read queued since the last
    /// `q_init`, in enqueue order. Callers that
    /// queue exactly N reads in a batch pull them back out with this after
    /// `q_exec` succeeds.
    pub fn take_results(&mut self) -> Vec<u32> {
        self.queue.take_results()
    }

    // ---- enqueue helpers -----------------------------------------------

    /// Auto-flushes the current batch if either capacity predicate fails
    ///. Returns `Err` (already latched) if the flush
    /// itself failed.
    fn ensure_capacity(&mut self, need_read: bool) -> Result<(), ()> {
        let fits = if need_read {
            self.queue.read_fits()
        } else {
            self.queue.write_fits()
        };
        if fits {
            return Ok(());
        }
        match self.q_exec() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.queue.latch_error(err);
                Err(())
            }
        }
    }

    fn skip_if_errored(&self) -> bool {
        self.queue.qerror().is_some()
    }

    fn enqueue_write(&mut self, op: TransferOp) {
        if self.skip_if_errored() {
            return;
        }
        if self.ensure_capacity(false).is_err() {
            return;
        }
        self.queue.push_write(op);
    }

    fn enqueue_read(&mut self, op: TransferOp) {
        if self.skip_if_errored() {
            return;
        }
        if self.ensure_capacity(true).is_err() {
            return;
        }
        self.queue.push_read(op);
    }

    // ---- DP.SELECT banking ---------------------------------

    /// Queues a `DP.SELECT` write if, and only if, accessing `logical_addr`
    /// (a DP register) requires updating the bank: only addresses with low
    /// nybble `0x4` are bank-sensitive on v1/v2; the base four DP registers
    /// (IDR/ABORT, SELECT, RDBUFF) are not.
    fn ensure_dp_select(&mut self, logical_addr: u8) {
        if logical_addr & 0xF != 0x4 || self.dp_version.is_linear_select() {
            return;
        }
        let bank = (logical_addr >> 4) & 0xF;
        let current = self.cache.dp_select.unwrap_or(0);
        let value = SelectValue::dp_bank_v1(current, bank).0;
        if let Some(new) = self.cache.write_select(value) {
            self.push_select_write(new);
        }
    }

    /// Queues a `DP.SELECT` write selecting the single in-scope memory AP's
    /// register bank. Always just one AP: multi-AP discovery
    /// is out of scope.
    fn ensure_ap_select(&mut self, ap_addr: u8) {
        let value = if self.dp_version.is_linear_select() {
            let full = self.mem_ap_base_offset.wrapping_add(ap_addr as u32);
            SelectValue::linear_v3(full).0
        } else {
            let bank = (ap_addr >> 4) & 0xF;
            let current = self.cache.dp_select.unwrap_or(0);
            SelectValue::ap_bank_v1(current, 0, bank).0
        };
        if let Some(new) = self.cache.write_select(value) {
            self.push_select_write(new);
        }
    }

    fn push_select_write(&mut self, value: u32) {
        let op = TransferOp {
            access_port: false,
            read: false,
            addr: dp::ADDR_SELECT,
            match_mask: false,
            value_match: false,
            value: Some(value),
        };
        self.enqueue_write(op);
    }

    fn dp_physical_addr(addr: u8) -> u8 {
        if addr & 0xF == 0x4 {
            0x04
        } else {
            addr & 0x0C
        }
    }

    // ---- public queue operations ---------------------------

    /// Queues a DP register read.
    pub fn q_dp_rd(&mut self, addr: u8) {
        self.ensure_dp_select(addr);
        if self.skip_if_errored() {
            return;
        }
        let op = TransferOp {
            access_port: false,
            read: true,
            addr: Self::dp_physical_addr(addr),
            match_mask: false,
            value_match: false,
            value: None,
        };
        self.enqueue_read(op);
    }

    /// Queues a DP register write.
    pub fn q_dp_wr(&mut self, addr: u8, value: u32) {
        self.ensure_dp_select(addr);
        if self.skip_if_errored() {
            return;
        }
        let op = TransferOp {
            access_port: false,
            read: false,
            addr: Self::dp_physical_addr(addr),
            match_mask: false,
            value_match: false,
            value: Some(value),
        };
        self.enqueue_write(op);
    }

    /// Queues an AP register read.
    pub fn q_ap_rd(&mut self, addr: u8) {
        self.ensure_ap_select(addr);
        if self.skip_if_errored() {
            return;
        }
        let op = TransferOp {
            access_port: true,
            read: true,
            addr: addr & 0x0C,
            match_mask: false,
            value_match: false,
            value: None,
        };
        self.enqueue_read(op);
    }

    /// Queues an AP register write, suppressing the wire write when
    /// `addr` is `MAP.CSW`/`MAP.TAR` and `value` already matches the
    /// shadow.
    pub fn q_ap_wr(&mut self, addr: u8, value: u32) {
        self.ensure_ap_select(addr);
        if self.skip_if_errored() {
            return;
        }
        let Some(value) = self.shadow_ap_write(addr, value) else {
            return;
        };
        let op = TransferOp {
            access_port: true,
            read: false,
            addr: addr & 0x0C,
            match_mask: false,
            value_match: false,
            value: Some(value),
        };
        self.enqueue_write(op);
    }

    /// Updates `MAP.CSW`/`MAP.TAR` shadows for a queued AP write, returning
    /// `None` when the value already matches (suppress the wire write) and
    /// `Some(value)` otherwise. Addresses other than `CSW`/`TAR` (i.e.
    /// `DRW`) always pass through unconditionally.
    fn shadow_ap_write(&mut self, addr: u8, value: u32) -> Option<u32> {
        match addr & 0x0C {
            crate::arm::ap::ADDR_CSW => self.cache.write_csw(value),
            crate::arm::ap::ADDR_TAR => self.cache.write_tar(value),
            _ => Some(value),
        }
    }

    /// Queues an in-probe match-mask write if the shadow differs (spec
    /// §4.3 `q_set_mask`).
    pub fn q_set_mask(&mut self, mask: u32) {
        if self.skip_if_errored() {
            return;
        }
        if self.cache.write_match_mask(mask).is_none() {
            return;
        }
        let op = TransferOp {
            access_port: false,
            read: false,
            addr: 0,
            match_mask: true,
            value_match: false,
            value: Some(mask),
        };
        self.enqueue_write(op);
    }

    /// Queues a read-until-value-matches-mask on a DP register. Retries are handled by the probe using the
    /// configured `match_retries`.
    pub fn q_dp_match(&mut self, addr: u8, value: u32) {
        self.ensure_dp_select(addr);
        if self.skip_if_errored() {
            return;
        }
        let op = TransferOp {
            access_port: false,
            read: true,
            addr: Self::dp_physical_addr(addr),
            match_mask: false,
            value_match: true,
            value: Some(value),
        };
        self.enqueue_write(op);
    }

    /// Queues a read-until-value-matches-mask on an AP register (spec
    /// §4.3 `q_ap_match`).
    pub fn q_ap_match(&mut self, addr: u8, value: u32) {
        self.ensure_ap_select(addr);
        if self.skip_if_errored() {
            return;
        }
        let op = TransferOp {
            access_port: true,
            read: true,
            addr: addr & 0x0C,
            match_mask: false,
            value_match: true,
            value: Some(value),
        };
        self.enqueue_write(op);
    }

    /// Clears the wire queue for a new batch and runs `build`/`q_exec`,
    /// returning the reads it queued in enqueue order. Building block for
    /// the DP/AP/MEM layer and core-debug layer, both of which queue small
    /// fixed batches and want their scalar results back directly.
    ///
    /// This does **not** invalidate the shadow cache. Shadows persist
    /// across separate `run_batch` calls so that two top-level operations
    /// in a row (e.g. two `mem_rd32`s to the same AP bank) don't each
    /// re-emit `DP.SELECT`/`MAP.CSW`/`MAP.TAR` writes the wire already has
    /// the right value for. Shadows are only invalidated at the points
    /// that actually invalidate them on silicon: `q_init`, attach,
    /// reconnect, and fault recovery (`clear_abort_after_fault`).
    pub(crate) fn run_batch<F>(&mut self, build: F) -> Result<Vec<u32>, TransportError>
    where
        F: FnOnce(&mut Self),
    {
        self.queue.reset();
        build(self);
        self.q_exec()?;
        Ok(self.take_results())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn q_init_invalidates_shadows() {
        let mut t = Transport::new(ProbeSelector::default());
        t.cache.write_csw(0x23);
        t.q_init();
        assert_eq!(t.cache.csw, None);
    }

    #[test]
    fn fresh_dp_select_is_written_once() {
        let mut t = Transport::new(ProbeSelector::default());
        t.dp_version = DpVersion::V1;
        t.q_init();
        t.q_dp_wr(0x04, 0x5000_0000);
        // SELECT write + CS write.
        assert_eq!(t.queue.count(), 2);
    }

    #[test]
    fn non_bank_sensitive_dp_register_skips_select() {
        let mut t = Transport::new(ProbeSelector::default());
        t.q_init();
        t.q_dp_rd(dp::ADDR_IDR);
        assert_eq!(t.queue.count(), 1);
    }

    #[test]
    fn repeated_ap_bank_is_not_rewritten() {
        let mut t = Transport::new(ProbeSelector::default());
        t.q_init();
        t.q_ap_wr(crate::arm::ap::ADDR_CSW, 0x23);
        t.q_ap_wr(crate::arm::ap::ADDR_TAR, 0x2000_0000);
        // One SELECT write (first access) then two unbanked writes: 3 ops.
        assert_eq!(t.queue.count(), 3);
    }
}
