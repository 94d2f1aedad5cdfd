//! USB framing adapter.
//!
//! Wraps a single bulk-in/bulk-out endpoint pair on a CMSIS-DAP v2 vendor
//! interface. Every CMSIS-DAP command is exactly one [`CmsisDapDevice::write`]
//! followed by one [`CmsisDapDevice::read`]; there is no partial-frame
//! recovery; any I/O error is the caller's signal to close the handle and
//! move the transport to `OFFLINE`.

use std::time::Duration;

use rusb::{Context, DeviceHandle};

use crate::error::CmsisDapError;

/// USB read/write timeout.
const USB_TIMEOUT: Duration = Duration::from_secs(5);

const CMSIS_DAP_INTERFACE_STRING: &str = "CMSIS-DAP";
const VENDOR_CLASS: u8 = 0xFF;

/// Selects which CMSIS-DAP probe to open.
///
/// An empty selector matches the first CMSIS-DAP probe found.
#[derive(Debug, Clone, Default)]
pub struct ProbeSelector {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub serial_number: Option<String>,
}

/// The write/read/packet-size surface the DAP command layer (§4.2) needs
/// from a device. Implemented by [`CmsisDapDevice`] for real hardware and
/// by [`mock::MockDapDevice`] for the scripted wire-transcript tests spec
/// §8's end-to-end scenarios call for (§0.4 "Test tooling").
pub trait DapDevice {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, CmsisDapError>;
    fn read(&mut self, out: &mut [u8]) -> Result<usize, CmsisDapError>;
    fn max_packet_size(&self) -> usize;
    fn set_max_packet_size(&mut self, size: usize);
}

/// An open CMSIS-DAP v2 (bulk) USB connection.
pub struct CmsisDapDevice {
    handle: DeviceHandle<Context>,
    out_ep: u8,
    in_ep: u8,
    interface: u8,
    /// Negotiated by `DAP_Info(Max_Packet_Size)`; starts at the USB report
    /// size and is clipped to it in `dap_configure`.
    pub max_packet_size: usize,
}

impl CmsisDapDevice {
    /// Enumerates USB devices and opens the first CMSIS-DAP vendor
    /// interface matching `selector`.
    pub fn open(selector: &ProbeSelector) -> Result<Self, CmsisDapError> {
        let context = Context::new()?;
        for device in context.devices()?.iter() {
            let device_desc = match device.device_descriptor() {
                Ok(d) => d,
                Err(_) => continue,
            };

            if let Some(vid) = selector.vendor_id {
                if device_desc.vendor_id() != vid {
                    continue;
                }
            }
            if let Some(pid) = selector.product_id {
                if device_desc.product_id() != pid {
                    continue;
                }
            }

            let Ok(handle) = device.open() else {
                continue;
            };

            if let Some(ref want_serial) = selector.serial_number {
                let language = match handle.read_languages(USB_TIMEOUT) {
                    Ok(langs) => langs.first().copied(),
                    Err(_) => None,
                };
                let matches = language.is_some_and(|lang| {
                    handle
                        .read_serial_number_string(lang, &device_desc, USB_TIMEOUT)
                        .map(|sn| &sn == want_serial)
                        .unwrap_or(false)
                });
                if !matches {
                    continue;
                }
            }

            if let Some(found) = Self::try_bind(&device, &handle) {
                tracing::debug!(
                    vid = device_desc.vendor_id(),
                    pid = device_desc.product_id(),
                    "opened CMSIS-DAP device"
                );
                return Ok(found);
            }
        }
        Err(CmsisDapError::NoDevice)
    }

    /// Looks for a vendor-class interface whose interface string contains
    /// `"CMSIS-DAP"` with exactly one bulk-in and one bulk-out endpoint.
    fn try_bind(device: &rusb::Device<Context>, handle: &DeviceHandle<Context>) -> Option<Self> {
        let config = device.active_config_descriptor().ok()?;
        let language = handle.read_languages(USB_TIMEOUT).ok()?.first().copied()?;

        for interface in config.interfaces() {
            for descriptor in interface.descriptors() {
                if descriptor.class_code() != VENDOR_CLASS {
                    continue;
                }
                let Some(idx) = descriptor.description_string_index() else {
                    continue;
                };
                let Ok(name) = handle.read_string_descriptor(language, idx, USB_TIMEOUT) else {
                    continue;
                };
                if !name.contains(CMSIS_DAP_INTERFACE_STRING) {
                    continue;
                }

                let mut in_ep = None;
                let mut out_ep = None;
                for endpoint in descriptor.endpoint_descriptors() {
                    if endpoint.transfer_type() != rusb::TransferType::Bulk {
                        continue;
                    }
                    match endpoint.direction() {
                        rusb::Direction::In => in_ep = Some(endpoint.address()),
                        rusb::Direction::Out => out_ep = Some(endpoint.address()),
                    }
                }

                let (Some(in_ep), Some(out_ep)) = (in_ep, out_ep) else {
                    continue;
                };

                let mut handle = match device.open() {
                    Ok(h) => h,
                    Err(_) => continue,
                };
                if handle.claim_interface(descriptor.interface_number()).is_err() {
                    continue;
                }

                return Some(CmsisDapDevice {
                    handle,
                    out_ep,
                    in_ep,
                    interface: descriptor.interface_number(),
                    max_packet_size: 64,
                });
            }
        }
        None
    }

    /// Writes one command packet.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize, CmsisDapError> {
        Ok(self.handle.write_bulk(self.out_ep, bytes, USB_TIMEOUT)?)
    }

    /// Reads one response packet.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize, CmsisDapError> {
        Ok(self.handle.read_bulk(self.in_ep, out, USB_TIMEOUT)?)
    }
}

impl DapDevice for CmsisDapDevice {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, CmsisDapError> {
        CmsisDapDevice::write(self, bytes)
    }

    fn read(&mut self, out: &mut [u8]) -> Result<usize, CmsisDapError> {
        CmsisDapDevice::read(self, out)
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn set_max_packet_size(&mut self, size: usize) {
        self.max_packet_size = size;
    }
}

impl Drop for CmsisDapDevice {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(self.interface);
    }
}

#[cfg(any(test, feature = "test"))]
pub mod mock {
    //! A scripted in-memory stand-in for [`super::CmsisDapDevice`], used to
    //! assert exact wire transcripts in higher-level tests.

    use std::collections::VecDeque;

    use crate::error::CmsisDapError;

    #[derive(Default)]
    pub struct MockDapDevice {
        pub sent: Vec<Vec<u8>>,
        pub responses: VecDeque<Vec<u8>>,
        pub max_packet_size: usize,
    }

    impl MockDapDevice {
        pub fn new(max_packet_size: usize) -> Self {
            MockDapDevice {
                sent: Vec::new(),
                responses: VecDeque::new(),
                max_packet_size,
            }
        }

        pub fn push_response(&mut self, bytes: Vec<u8>) {
            self.responses.push_back(bytes);
        }

        pub fn write(&mut self, bytes: &[u8]) -> Result<usize, CmsisDapError> {
            self.sent.push(bytes.to_vec());
            Ok(bytes.len())
        }

        pub fn read(&mut self, out: &mut [u8]) -> Result<usize, CmsisDapError> {
            let response = self
                .responses
                .pop_front()
                .ok_or(CmsisDapError::InvalidResponse)?;
            let n = response.len().min(out.len());
            out[..n].copy_from_slice(&response[..n]);
            Ok(n)
        }
    }

    impl super::DapDevice for MockDapDevice {
        fn write(&mut self, bytes: &[u8]) -> Result<usize, CmsisDapError> {
            MockDapDevice::write(self, bytes)
        }

        fn read(&mut self, out: &mut [u8]) -> Result<usize, CmsisDapError> {
            MockDapDevice::read(self, out)
        }

        fn max_packet_size(&self) -> usize {
            self.max_packet_size
        }

        fn set_max_packet_size(&mut self, size: usize) {
            self.max_packet_size = size;
        }
    }
}
