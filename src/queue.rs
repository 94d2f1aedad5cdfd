//! Transaction queue buffer: batches DP/AP reads and writes
//! into one `DAP_Transfer` packet.
//!
//! This module holds the wire-packing half of the queue: byte/slot
//! bookkeeping and the `TransferRequest` it becomes. The DP.SELECT
//! banking, shadow invalidation, auto-flush, and fault recovery that sit
//! on top of it live on [`crate::transport::Transport`], which is the
//! thing that actually owns a USB device to flush against.
//!
//! Queued reads are tracked by insertion order rather than a raw pointer
//! into caller-owned storage. Since exactly one thread drives a batch
//! from `q_init` to `q_exec`, insertion order alone is a sufficient
//! stable index: the probe's response carries read results in the same
//! order the reads were queued, so copying them out in that order onto a
//! plain `Vec` gives every queued read a stable destination without a
//! pointer or a destination enum.

use crate::commands::transfer::{TransferOp, TransferRequest};
use crate::error::TransportError;

/// One in-flight batched `DAP_Transfer` packet.
pub struct QueueBuffer {
    ops: Vec<TransferOp>,
    /// Results delivered in enqueue order once `q_exec` decodes the
    /// response.
    results: Vec<u32>,
    tx_avail: usize,
    rx_avail: usize,
    count: u32,
    /// First latched queue error: sticky until the
    /// next `q_init`.
    qerror: Option<TransportError>,
    max_tx: usize,
    max_rx: usize,
}

/// Per-op wire cost budgeted against `max_packet_size - 3` (header byte +
/// `dap_index` byte + op-count byte).
const READ_TX_COST: usize = 1;
const READ_RX_COST: usize = 4;
const WRITE_TX_COST: usize = 5;

impl QueueBuffer {
    /// `max_packet_size` is the probe's negotiated packet size; capacity
    /// is budgeted against `max_packet_size - 3`.
    pub fn new(max_packet_size: usize) -> Self {
        let budget = max_packet_size.saturating_sub(3);
        QueueBuffer {
            ops: Vec::new(),
            results: Vec::new(),
            tx_avail: budget,
            rx_avail: budget,
            count: 0,
            qerror: None,
            max_tx: budget,
            max_rx: budget,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn qerror(&self) -> Option<TransportError> {
        self.qerror
    }

    pub fn latch_error(&mut self, err: TransportError) {
        if self.qerror.is_none() {
            self.qerror = Some(err);
        }
    }

    pub fn reset(&mut self) {
        self.ops.clear();
        self.results.clear();
        self.tx_avail = self.max_tx;
        self.rx_avail = self.max_rx;
        self.count = 0;
        self.qerror = None;
    }

    /// Whether queuing a read right now would exceed capacity: `tx_avail >= 1 && rx_avail >= 4`.
    pub fn read_fits(&self) -> bool {
        self.tx_avail >= READ_TX_COST && self.rx_avail >= READ_RX_COST
    }

    /// Whether queuing a write right now would exceed capacity: `tx_avail
    /// >= 5`.
    pub fn write_fits(&self) -> bool {
        self.tx_avail >= WRITE_TX_COST
    }

    pub fn push_read(&mut self, op: TransferOp) {
        debug_assert!(self.read_fits());
        self.tx_avail -= READ_TX_COST;
        self.rx_avail -= READ_RX_COST;
        self.count += 1;
        self.ops.push(op);
    }

    pub fn push_write(&mut self, op: TransferOp) {
        debug_assert!(self.write_fits());
        self.tx_avail -= WRITE_TX_COST;
        self.count += 1;
        self.ops.push(op);
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn build_request(&self, dap_index: u8) -> TransferRequest {
        TransferRequest {
            dap_index,
            ops: self.ops.clone(),
        }
    }

    /// Records completed read results, in enqueue order, so the caller of
    /// `q_exec` can pull them back out.
    pub fn set_results(&mut self, data: Vec<u32>) {
        self.results = data;
    }

    pub fn take_results(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_tracks_max_packet_size() {
        let q = QueueBuffer::new(64);
        assert!(q.read_fits());
        assert!(q.write_fits());
    }

    #[test]
    fn reset_restores_full_capacity_and_clears_error() {
        let mut q = QueueBuffer::new(64);
        q.latch_error(TransportError::SwdFault);
        q.reset();
        assert_eq!(q.qerror(), None);
        assert_eq!(q.count(), 0);
    }
}
