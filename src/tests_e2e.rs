//! Wire-transcript tests driving [`crate::transport::Transport`]
//! against a scripted [`crate::usb::mock::MockDapDevice`] instead of real
//! hardware, via `Transport::inject_device`. Each test asserts the actual
//! bytes placed on the wire, not just the transport's internal bookkeeping,
//! since that bookkeeping already has dedicated unit tests in `transport.rs`
//! and `cache.rs`.

use std::sync::{Arc, Mutex};

use crate::arm::{ap, core_debug, dp};
use crate::arm::dp::DpVersion;
use crate::error::{CmsisDapError, TransportError};
use crate::transport::{ProbeCaps, Transport};
use crate::usb::mock::MockDapDevice;
use crate::usb::{DapDevice, ProbeSelector};

/// Wraps a [`MockDapDevice`] behind a shared handle so a test can keep a
/// reference to it after handing ownership of a `Box<dyn DapDevice>` off
/// to `Transport::inject_device`.
struct SharedMock(Arc<Mutex<MockDapDevice>>);

impl DapDevice for SharedMock {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, CmsisDapError> {
        self.0.lock().unwrap().write(bytes)
    }

    fn read(&mut self, out: &mut [u8]) -> Result<usize, CmsisDapError> {
        self.0.lock().unwrap().read(out)
    }

    fn max_packet_size(&self) -> usize {
        self.0.lock().unwrap().max_packet_size
    }

    fn set_max_packet_size(&mut self, size: usize) {
        self.0.lock().unwrap().max_packet_size = size;
    }
}

/// Builds a `Transport` already wired to a fresh `MockDapDevice` and
/// marked `DETACHED`, skipping USB enumeration and `dap_configure`.
fn harness(packet_size: usize) -> (Transport, Arc<Mutex<MockDapDevice>>) {
    let mock = Arc::new(Mutex::new(MockDapDevice::new(packet_size)));
    let mut t = Transport::new(ProbeSelector::default());
    t.inject_device(
        Box::new(SharedMock(mock.clone())),
        ProbeCaps {
            max_packet_count: 1,
            max_packet_size: packet_size,
        },
    );
    t.dp_version = DpVersion::V1;
    (t, mock)
}

fn push(mock: &Arc<Mutex<MockDapDevice>>, bytes: Vec<u8>) {
    mock.lock().unwrap().push_response(bytes);
}

fn sent_frames(mock: &Arc<Mutex<MockDapDevice>>) -> Vec<Vec<u8>> {
    mock.lock().unwrap().sent.clone()
}

/// A `DAP_Transfer` response: executed count, an OK ack with no protocol
/// error or value mismatch, then the data words for every read op.
fn transfer_ok(executed: u8, words: &[u32]) -> Vec<u8> {
    let mut out = vec![0x05, executed, 0x01];
    for word in words {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out
}

// ---- invariant 1: reads fan out in enqueue order -----------------------

#[test]
fn reads_fan_out_in_enqueue_order() {
    let (mut t, mock) = harness(64);
    // SELECT (once) + three DRW reads to the same AP register: 4 ops,
    // three of which yield data.
    push(&mock, transfer_ok(4, &[0x11, 0x22, 0x33]));

    t.q_init();
    t.q_ap_rd(ap::ADDR_DRW);
    t.q_ap_rd(ap::ADDR_DRW);
    t.q_ap_rd(ap::ADDR_DRW);
    t.q_exec().unwrap();

    assert_eq!(t.take_results(), vec![0x11, 0x22, 0x33]);
}

// ---- invariant 2: unchanged shadowed write is suppressed ----------------

#[test]
fn repeated_csw_write_mid_batch_is_suppressed() {
    let (mut t, mock) = harness(64);
    // SELECT + CSW + TAR + read + TAR(new) + read: 6 ops. The trailing
    // `CSW <- 0x42` repeats the already-shadowed value and is dropped
    // before it ever reaches the queue.
    push(&mock, transfer_ok(6, &[0xA, 0xB]));

    t.q_init();
    t.q_ap_wr(ap::ADDR_CSW, 0x42);
    t.q_ap_wr(ap::ADDR_TAR, 0x2000_0000);
    t.q_ap_rd(ap::ADDR_DRW);
    t.q_ap_wr(ap::ADDR_TAR, 0x2000_0004);
    t.q_ap_rd(ap::ADDR_DRW);
    t.q_ap_wr(ap::ADDR_CSW, 0x42);
    t.q_exec().unwrap();

    let sent = sent_frames(&mock);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][2], 6, "suppressed write must not inflate the op count");
    assert_eq!(t.take_results(), vec![0xA, 0xB]);
}

// ---- invariant 3: a fresh q_init always re-selects the bank -------------

#[test]
fn fresh_q_init_forces_select_even_for_a_bank_seen_before() {
    let (mut t, mock) = harness(64);
    push(&mock, transfer_ok(2, &[0x1]));
    push(&mock, transfer_ok(2, &[0x2]));

    t.q_init();
    t.q_ap_rd(ap::ADDR_CSW);
    t.q_exec().unwrap();
    let first = sent_frames(&mock);
    assert_eq!(first[0][2], 2, "first access: SELECT + read");

    // A new q_init invalidates the shadow even though nothing about the
    // target AP/bank changed, so the next access re-selects.
    t.q_init();
    t.q_ap_rd(ap::ADDR_CSW);
    t.q_exec().unwrap();
    let second = sent_frames(&mock);
    assert_eq!(second[1][2], 2, "post-q_init access must re-emit SELECT");
}

// ---- invariant 5: SWD FAULT triggers an unbatched ABORT=ALLCLR write ----

#[test]
fn fault_triggers_abort_allclr_followup() {
    let (mut t, mock) = harness(64);
    // FAULT ack (bits = 0x04), nothing executed.
    push(&mock, vec![0x05, 0x00, 0x04]);
    // WriteABORT response: DapOk.
    push(&mock, vec![0x08, 0x00]);

    t.q_init();
    t.q_ap_rd(ap::ADDR_CSW);
    let err = t.q_exec().unwrap_err();
    assert_eq!(err, TransportError::SwdFault);

    let sent = sent_frames(&mock);
    assert_eq!(sent.len(), 2, "the ABORT write must be sent right after the faulted batch");
    assert_eq!(sent[1][0], 0x08, "second frame is DAP_WriteABORT");
    let value = u32::from_le_bytes([sent[1][2], sent[1][3], sent[1][4], sent[1][5]]);
    assert_eq!(value, dp::ABORT_ALLCLR);
}

// ---- invariant 7: C_MASKINTS preservation on halt -----------------------

/// Encodes the DHCSR read `core_halt` issues as the first batch on a
/// fresh transport: SELECT, CSW, TAR, then the DRW read, since no shadow
/// is established yet.
fn expect_dhcsr_read_frame() -> Vec<u8> {
    let mut frame = vec![0x05, 0x00, 0x04];
    frame.push(0x08);
    frame.extend_from_slice(&0u32.to_le_bytes());
    frame.push(0x01);
    frame.extend_from_slice(&ap::csw_word_access(0).to_le_bytes());
    frame.push(0x05);
    frame.extend_from_slice(&core_debug::DHCSR.to_le_bytes());
    frame.push(0x0F);
    frame
}

/// Encodes the `DHCSR` write `core_halt` issues right after the read
/// above. `MAP.CSW`/`MAP.TAR` already hold the values the read batch
/// just wrote and the AP bank hasn't changed, so the shadow cache
/// suppresses SELECT/CSW/TAR entirely and only the DRW write reaches the
/// wire.
fn expect_dhcsr_write_frame(dhcsr_value_after_key: u32) -> Vec<u8> {
    let mut frame = vec![0x05, 0x00, 0x01];
    frame.push(0x0D);
    frame.extend_from_slice(&dhcsr_value_after_key.to_le_bytes());
    frame
}

/// Encodes the poll read that follows: same reasoning, SELECT/CSW/TAR
/// are still shadowed from the write batch, so only the DRW read goes
/// out.
fn expect_dhcsr_poll_frame() -> Vec<u8> {
    vec![0x05, 0x00, 0x01, 0x0F]
}

#[test]
fn core_halt_preserves_maskints_when_debugen_already_set() {
    let (mut t, mock) = harness(64);
    // DHCSR read: C_DEBUGEN (bit0) and C_MASKINTS (bit3) both set.
    push(&mock, transfer_ok(4, &[0b1001]));
    // DHCSR write ack: CSW/TAR are shadowed away, only DRW reaches the wire.
    push(&mock, transfer_ok(1, &[]));
    // Poll read: S_HALT (bit17) set immediately, again just the DRW read.
    push(&mock, transfer_ok(1, &[1 << 17]));

    t.core_halt().unwrap();

    let sent = sent_frames(&mock);
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0], expect_dhcsr_read_frame());
    // C_HALT | C_DEBUGEN | C_MASKINTS under the debug key.
    let expected = expect_dhcsr_write_frame(core_debug::DHCSR_DBGKEY | 0b1011);
    assert_eq!(sent[1], expected, "C_MASKINTS must carry over from the prior read");
    assert_eq!(sent[2], expect_dhcsr_poll_frame());
}

#[test]
fn core_halt_clears_maskints_when_debugen_was_off() {
    let (mut t, mock) = harness(64);
    // DHCSR read: neither C_DEBUGEN nor C_MASKINTS set.
    push(&mock, transfer_ok(4, &[0]));
    push(&mock, transfer_ok(1, &[]));
    push(&mock, transfer_ok(1, &[1 << 17]));

    t.core_halt().unwrap();

    let sent = sent_frames(&mock);
    let expected = expect_dhcsr_write_frame(core_debug::DHCSR_DBGKEY | 0b0011);
    assert_eq!(
        sent[1], expected,
        "C_MASKINTS must be forced to 0 when the core wasn't already under debug"
    );
}

// ---- shadow persistence across separate top-level calls ----------------

#[test]
fn second_mem_rd32_to_same_bank_skips_select_and_csw() {
    let (mut t, mock) = harness(64);
    // First read: full SELECT + CSW + TAR + DRW.
    push(&mock, transfer_ok(4, &[0x11]));
    // Second read to an adjacent word in the same 1024-byte window: CSW
    // is unchanged, only TAR (new address) and DRW reach the wire.
    push(&mock, transfer_ok(2, &[0x22]));

    assert_eq!(t.mem_rd32(0x2000_0000).unwrap(), 0x11);
    assert_eq!(t.mem_rd32(0x2000_0004).unwrap(), 0x22);

    let sent = sent_frames(&mock);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0][2], 4, "first access: SELECT + CSW + TAR + read");
    assert_eq!(sent[1][2], 2, "second access: only TAR (new address) + read");
}
