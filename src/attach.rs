//! Attach / lifecycle: SWD wake sequence, multi-drop target
//! select, power-up handshake, `dap_configure`, and the periodic liveness
//! tick.

use scroll::{Pwrite, LE};

use crate::arm::dp::{self, DpVersion};
use crate::commands::connect::{ConnectRequest, ConnectResponse};
use crate::commands::host_status::{HostStatusKind, HostStatusRequest};
use crate::commands::info;
use crate::commands::swd::{SwdConfigureRequest, Turnaround};
use crate::commands::transfer::TransferConfigureRequest;
use crate::commands::{self};
use crate::error::{CmsisDapError, TransportError};
use crate::transport::{ProbeCaps, Status, Transport, DPV3_MEM_AP_BASE_OFFSET};
use crate::usb::{CmsisDapDevice, DapDevice};

/// The fixed attach wake-sequence frame, sent
/// as one raw `DAP_SWD_Sequence` packet rather than built from
/// [`crate::commands::swd::SwdSequenceRequest`] since its bit pattern is
/// architecturally fixed. Bytes after the
/// `0x1D` command byte: 5 sequence entries --
///
/// 1. `00 FF FF FF FF FF FF FF FF` -- 64 ones.
/// 2. `00 9E E7 FF FF 92 F3 09 62` -- JTAG-to-SWD escape (`0xE79E`), then
///    16 ones, then the start of the Selection Alert Sequence.
/// 3. `00 95 2D 85 86 E9 AF DD E3` -- Selection Alert Sequence, continued.
/// 4. `00 A2 0E BC 19 A0 F1 FF FF` -- Selection Alert Sequence tail, the
///    SWD v2 Activation Code, then idle ones.
/// 5. `30 FF FF FF FF FF 0F` -- Line Reset Sequence: ≥50 ones then 4
///    zeros.
///
/// The common (non-multidrop) prefix is the first 45 bytes (including the
/// `0x1D, 0x05` header); bytes 45..54 are the `DP.TARGETSEL` write patched
/// in for multidrop.
#[rustfmt::skip]
const ATTACH_CMD: [u8; 54] = [
    0x1D, 0x05,
    0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0x00, 0x9E, 0xE7, 0xFF, 0xFF, 0x92, 0xF3, 0x09, 0x62,
    0x00, 0x95, 0x2D, 0x85, 0x86, 0xE9, 0xAF, 0xDD, 0xE3,
    0x00, 0xA2, 0x0E, 0xBC, 0x19, 0xA0, 0xF1, 0xFF, 0xFF,
    0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x0F,
    // WR DP.TARGETSEL, patched in only for multidrop attach:
    0x08, 0x99,
    0x85,
    0x28, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Length of the non-multidrop prefix (sequence count byte patched to 5).
const ATTACH_CMD_COMMON_LEN: usize = 45;
/// Full length including the patched-in `DP.TARGETSEL` write (sequence
/// count byte patched to 8).
const ATTACH_CMD_MULTIDROP_LEN: usize = 54;

/// RP2040's IDCODE/TARGETID pairing that requires a multidrop re-attach
///.
const RP2040_IDCODE: u32 = dp::RP2040_IDCODE;
const RP2040_TARGETID: u32 = dp::RP2040_TARGETID;

impl Transport {
    /// Sends the fixed wake sequence,
    /// optionally patched for multidrop target selection, followed by a
    /// bare `DP.IDR` read and `DP.ABORT = ALLCLR` (required after any line
    /// reset). Returns the IDCODE.
    fn run_wake_sequence(&mut self, multidrop_target: Option<u32>) -> Result<u32, TransportError> {
        let mut cmd = ATTACH_CMD;
        let len = if let Some(target) = multidrop_target {
            cmd[1] = 8;
            cmd[..].pwrite_with(target, 49, LE).ok();
            cmd[53] = (target.count_ones() % 2) as u8;
            ATTACH_CMD_MULTIDROP_LEN
        } else {
            ATTACH_CMD_COMMON_LEN
        };

        let device = self.device_mut()?;
        let packet_size = device.max_packet_size().max(len);
        let mut out = vec![0u8; packet_size];
        out[..len].copy_from_slice(&cmd[..len]);
        Self::raw_io(device, &out[..len], 3)?;

        self.q_init();
        self.q_dp_rd(dp::ADDR_IDR);
        self.q_dp_wr(dp::ADDR_ABORT, dp::ABORT_ALLCLR);
        self.q_exec()?;
        self.take_results()
            .first()
            .copied()
            .ok_or(TransportError::Protocol)
    }

    /// Writes `bytes` and discards `expect_response_bytes` of response
    /// (the wake sequence's ACK is explicitly ignored).
    fn raw_io(
        device: &mut dyn DapDevice,
        bytes: &[u8],
        expect_response_bytes: usize,
    ) -> Result<(), TransportError> {
        device.write(bytes).map_err(map_io_err)?;
        let mut response = vec![0u8; expect_response_bytes.max(1)];
        device.read(&mut response).map_err(map_io_err)?;
        Ok(())
    }

    /// The attach procedure.
    pub fn attach(&mut self) -> Result<(), TransportError> {
        if self.device.is_none() {
            return Err(TransportError::Offline);
        }

        let idcode = self.run_wake_sequence(None)?;
        self.dp_version = DpVersion::from_idcode(idcode);
        self.mem_ap_base_offset = if self.dp_version.is_linear_select() {
            DPV3_MEM_AP_BASE_OFFSET
        } else {
            0
        };
        let manufacturer = dp::Idr::from(idcode).manufacturer_name().unwrap_or("unknown");
        tracing::info!(
            idcode = format_args!("{idcode:#010x}"),
            version = ?self.dp_version,
            manufacturer,
            "attach: IDCODE"
        );

        let targetid = self.run_batch(|t| t.q_dp_rd(dp::ADDR_TARGETID))?;
        let targetid = targetid.first().copied().unwrap_or(0);
        tracing::info!(targetid = format_args!("{targetid:#010x}"), "attach: TARGETID");

        if idcode == RP2040_IDCODE && targetid == RP2040_TARGETID {
            tracing::info!("attach: RP2040 detected, re-attaching in multidrop mode");
            self.run_wake_sequence(Some(RP2040_TARGETID))?;
        }

        // Clear sticky errors.
        self.run_batch(|t| t.q_dp_wr(dp::ADDR_ABORT, dp::ABORT_ALLCLR))?;

        // Power-up handshake.
        let dp_version = self.dp_version;
        let mem_ap_base = self.mem_ap_base_offset;
        let csw_addr = (mem_ap_base + crate::arm::ap::ADDR_CSW as u32) as u8;
        let csw = self.run_batch(move |t| {
            t.q_set_mask(dp::CS_POWER_ACK_MASK);
            t.q_dp_wr(dp::ADDR_CS, dp::CS_POWER_REQUEST);
            t.q_dp_match(dp::ADDR_CS, dp::CS_POWER_ACK_MASK);
            t.q_dp_rd(dp::ADDR_CS);
            if dp_version.is_linear_select() {
                t.q_dp_wr(dp::ADDR_SELECT1, 0);
            }
            t.q_ap_rd(csw_addr);
        })?;
        let map_csw_keep = csw.last().copied().unwrap_or(0) & crate::arm::ap::CSW_KEEP_MASK;
        self.map_csw_keep = map_csw_keep;
        tracing::debug!(csw = format_args!("{map_csw_keep:#010x}"), "attach: MAP.CSW (keep mask applied)");

        self.set_status(Status::Attached);
        Ok(())
    }

    /// Runs `dap_configure`: reads capabilities and packet limits, clips the packet size
    /// to 1024, then configures `Connect`/`SWD_Configure`/
    /// `TransferConfigure`.
    pub(crate) fn dap_configure(&mut self) -> Result<(), TransportError> {
        self.cache.invalidate_all();
        self.map_csw_keep = 0;

        let mut caps = ProbeCaps {
            max_packet_count: 1,
            max_packet_size: 64,
        };

        {
            let device = self.device_mut()?;
            if let Ok(name) = commands::send_command(device, info::VendorNameRequest) {
                tracing::info!(vendor = %name, "connect: probe identity");
            }
            if let Ok(name) = commands::send_command(device, info::ProductNameRequest) {
                tracing::info!(product = %name, "connect: probe identity");
            }
            if let Ok(n) = commands::send_command(device, info::MaxPacketCountRequest) {
                caps.max_packet_count = n;
            }
            if let Ok(n) = commands::send_command(device, info::MaxPacketSizeRequest) {
                caps.max_packet_size = n as usize;
            }
        }

        if caps.max_packet_count < 1 || caps.max_packet_size < 64 {
            return Err(TransportError::Protocol);
        }
        if caps.max_packet_size > 1024 {
            caps.max_packet_size = 1024;
        }
        self.caps = caps;
        self.queue = crate::queue::QueueBuffer::new(caps.max_packet_size);
        if let Some(device) = self.device.as_deref_mut() {
            device.set_max_packet_size(caps.max_packet_size);
        }
        tracing::info!(
            count = caps.max_packet_count,
            size = caps.max_packet_size,
            "connect: packet limits"
        );

        let xfer_cfg = self.xfer_config;
        let device = self.device_mut()?;
        let connect: ConnectResponse =
            commands::send_command(device, ConnectRequest::Swd).map_err(map_io_err)?;
        if connect != ConnectResponse::SuccessfulInitForSwd {
            return Err(TransportError::Protocol);
        }

        let swd_cfg = SwdConfigureRequest {
            turnaround: Turnaround::Clock1,
            always_data_phase: false,
        };
        let status = commands::send_command(device, swd_cfg).map_err(map_io_err)?;
        if !status.is_ok() {
            return Err(TransportError::Protocol);
        }

        let request = TransferConfigureRequest {
            idle_cycles: xfer_cfg.idle_cycles,
            wait_retry: xfer_cfg.wait_retries,
            match_retry: xfer_cfg.match_retries,
        };
        let status = commands::send_command(device, request).map_err(map_io_err)?;
        if !status.is_ok() {
            return Err(TransportError::Protocol);
        }

        let _ = commands::send_command(
            device,
            HostStatusRequest {
                kind: HostStatusKind::Connected,
                active: true,
            },
        );
        Ok(())
    }

    /// Opens a USB handle (if not already open) and runs `dap_configure`
    ///.
    fn try_connect(&mut self) -> Result<(), TransportError> {
        if self.device.is_none() {
            let device = CmsisDapDevice::open(&self.selector).map_err(map_io_err)?;
            self.device = Some(Box::new(device));
        }
        match self.dap_configure() {
            Ok(()) => {
                self.set_status(Status::Detached);
                Ok(())
            }
            Err(err) => {
                self.set_status(Status::Unconfig);
                Err(err)
            }
        }
    }

    /// `periodic`: returns the next-poll
    /// delay in milliseconds. Driven by an external scheduler.
    pub fn periodic(&mut self) -> u64 {
        match self.status {
            Status::Offline => match self.try_connect() {
                Ok(()) => 100,
                Err(_) => 500,
            },
            Status::Attached => {
                if self.poll_liveness {
                    match self.run_batch(|t| t.q_dp_rd(dp::ADDR_CS)) {
                        Ok(_) => {}
                        Err(TransportError::Io) => self.go_offline(),
                        Err(_) => self.set_status(Status::Detached),
                    }
                }
                100
            }
            Status::Detached | Status::Unconfig | Status::Failure => {
                if let Ok(device) = self.device_mut() {
                    let _: Result<String, _> =
                        commands::send_command(device, info::ProtocolVersionRequest);
                }
                500
            }
        }
    }
}

fn map_io_err(err: CmsisDapError) -> TransportError {
    TransportError::from(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multidrop_patch_has_correct_parity_and_offset() {
        let mut cmd = ATTACH_CMD;
        let target = RP2040_TARGETID;
        cmd[1] = 8;
        cmd[..].pwrite_with(target, 49, LE).unwrap();
        cmd[53] = (target.count_ones() % 2) as u8;
        assert_eq!(&cmd[49..53], &target.to_le_bytes());
        assert_eq!(cmd[53], target.count_ones() as u8 % 2);
    }
}
