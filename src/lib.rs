//! `dap-transport`: the debug transport engine that multiplexes queued
//! Debug Port / Access Port transactions over the CMSIS-DAP USB bulk
//! protocol, maintains target-side register shadows, implements memory
//! and core-register access, drives a flash-agent invocation protocol,
//! and runs the probe/target attach-lifecycle state machine.
//!
//! [`Transport`] is the crate's central value; everything else is a set
//! of methods layered onto it, in the dependency order the components
//! are organized in (DP/AP/MEM, core-debug, attach/lifecycle,
//! flash-agent invoker).

pub mod arm;
pub mod attach;
pub mod cache;
pub mod commands;
pub mod core_debug;
pub mod error;
pub mod flash_agent;
pub mod mem;
pub mod queue;
pub mod transport;
pub mod usb;

#[cfg(test)]
mod tests_e2e;

pub use error::{CmsisDapError, TransportError};
pub use flash_agent::{FlashAgent, FlashAgentInvoker};
pub use transport::{Attention, ProbeCaps, Status, StatusCallback, Transport, TransferConfig};
pub use usb::{DapDevice, ProbeSelector};
