//! Flash-agent invoker: loads a position-independent
//! target-resident code blob and drives its `setup`/`erase`/`write` entry
//! points through the Cortex-M invocation convention, built entirely out
//! of the core-debug and DP/AP/MEM layers below it.

use std::fs;
use std::time::Duration;

use anyhow::{bail, Context as _};
use scroll::{Pread, Pwrite, LE};

use crate::arm::core_debug::CoreRegisterId;
use crate::error::TransportError;
use crate::transport::Transport;

/// Size of the fixed agent header:
/// twelve little-endian `u32` fields.
const HEADER_LEN: usize = 48;

/// Magic value a well-formed, not-yet-loaded agent image carries at
/// offset 0. A readable ASCII tag rather than an arbitrary constant.
pub const AGENT_MAGIC: u32 = u32::from_le_bytes(*b"FAGT");

/// Agent header version this crate understands.
pub const AGENT_VERSION: u32 = 1;

/// Overwrites the header's `magic` field once the agent is resident in
/// target RAM: two back-to-back Thumb `BKPT #0` half-words, so the agent
/// halts the core the moment it returns to its own header.
const BKPT_PAIR: u32 = 0xBE00_BE00;

/// `flags` bit requesting a pre-load boot-ROM run sequence. Rejected
/// outright.
const FLAG_BOOT_ROM_HACK: u32 = 1 << 0;

/// Agent-side result code meaning "unsupported part": call results are
/// 0 for success, this value for an unsupported part, anything else for
/// a generic failure.
const AGENT_ERR_INVALID: u32 = 1;

/// Upper bound on one `setup`/`erase`/`write` call, so a wedged agent
/// fails the operation instead of blocking forever.
const AGENT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Parsed view of a flash-agent header, re-read after `setup`
/// returns to pick up any agent-filled fields.
#[derive(Clone, Copy, Debug)]
struct AgentHeader {
    magic: u32,
    version: u32,
    flags: u32,
    load_addr: u32,
    data_addr: u32,
    data_size: u32,
    flash_addr: u32,
    flash_size: u32,
    setup_fn: u32,
    erase_fn: u32,
    write_fn: u32,
}

impl AgentHeader {
    fn parse(bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.len() < HEADER_LEN {
            return Err(TransportError::BadParams);
        }
        let word = |offset: usize| {
            bytes
                .pread_with::<u32>(offset, LE)
                .map_err(|_| TransportError::BadParams)
        };
        Ok(AgentHeader {
            magic: word(0)?,
            version: word(4)?,
            flags: word(8)?,
            load_addr: word(12)?,
            data_addr: word(16)?,
            data_size: word(20)?,
            flash_addr: word(24)?,
            flash_size: word(28)?,
            setup_fn: word(32)?,
            erase_fn: word(36)?,
            write_fn: word(40)?,
        })
    }

    /// Applies the four words at `load_addr + 16` (`data_addr`,
    /// `data_size`, `flash_addr`, `flash_size`) read back after `setup`.
    fn refresh(&mut self, words: &[u32; 4]) {
        self.data_addr = words[0];
        self.data_size = words[1];
        self.flash_addr = words[2];
        self.flash_size = words[3];
    }

    fn in_flash_range(&self, addr: u32, len: u32) -> bool {
        addr >= self.flash_addr
            && len <= self.flash_size
            && addr.saturating_add(len) <= self.flash_addr.saturating_add(self.flash_size)
    }
}

/// A loaded flash-agent image. Holds the bytes and the architecture name
/// it was loaded under; kept as an explicit value passed around rather
/// than as process-wide globals.
pub struct FlashAgent {
    arch: String,
    image: Vec<u8>,
}

impl FlashAgent {
    /// `set_arch(name)`: loads `name` from the built-in table
    /// first, falling back to a `<name>.bin` file on disk, and validates
    /// magic/version before accepting it.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        let image = builtin_agent(name)
            .map(<[u8]>::to_vec)
            .or_else(|| fs::read(format!("{name}.bin")).ok())
            .with_context(|| format!("no flash agent found for architecture '{name}'"))?;

        let header = AgentHeader::parse(&image)
            .map_err(|_| anyhow::anyhow!("agent image for '{name}' is smaller than its header"))?;
        if header.magic != AGENT_MAGIC {
            bail!("agent image for '{name}' has a bad magic number");
        }
        if header.version != AGENT_VERSION {
            bail!(
                "agent image for '{name}' is version {}, this crate understands {}",
                header.version,
                AGENT_VERSION
            );
        }
        tracing::info!(arch = name, bytes = image.len(), "flash agent loaded");
        Ok(FlashAgent {
            arch: name.to_string(),
            image,
        })
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }
}

/// Agent blobs compiled into the host binary, keyed by architecture
/// name. Empty until real firmware images are vendored; filesystem
/// loading (`<name>.bin`) is the only working path today.
fn builtin_agent(_name: &str) -> Option<&'static [u8]> {
    None
}

/// Drives `setup`/`erase`/`write`/`erase_all` against a [`Transport`]
///. Kept separate from `Transport` itself since this is the
/// highest layer in the dependency order and has its own piece of state
/// (the currently loaded agent).
pub struct FlashAgentInvoker {
    current: Option<FlashAgent>,
}

impl FlashAgentInvoker {
    pub fn new() -> Self {
        FlashAgentInvoker { current: None }
    }

    pub fn set_arch(&mut self, name: &str) -> anyhow::Result<()> {
        self.current = Some(FlashAgent::load(name)?);
        Ok(())
    }

    pub fn arch(&self) -> Option<&str> {
        self.current.as_ref().map(FlashAgent::arch)
    }

    /// `flash(addr, bytes)`: erase then program, chunked to
    /// the agent's advertised `data_size`.
    pub fn flash(
        &self,
        transport: &mut Transport,
        addr: u32,
        bytes: &[u8],
    ) -> Result<(), TransportError> {
        let agent = self.require_agent()?;
        let header = prepare(transport, agent)?;

        let len = bytes.len() as u32;
        if !header.in_flash_range(addr, len) {
            return Err(TransportError::BadParams);
        }

        invoke(
            transport,
            header.load_addr,
            header.erase_fn,
            addr,
            len,
            0,
            0,
        )?;

        let mut offset = 0usize;
        let mut cursor = addr;
        while offset < bytes.len() {
            let xfer = (bytes.len() - offset).min(header.data_size as usize);
            let chunk = pad_to_words(&bytes[offset..offset + xfer]);
            transport.mem_wr_words(header.data_addr, &chunk)?;
            invoke(
                transport,
                header.load_addr,
                header.write_fn,
                cursor,
                header.data_addr,
                xfer as u32,
                0,
            )?;
            offset += xfer;
            cursor = cursor.wrapping_add(xfer as u32);
        }
        Ok(())
    }

    /// `erase(addr, len)`.
    pub fn erase(
        &self,
        transport: &mut Transport,
        addr: u32,
        len: u32,
    ) -> Result<(), TransportError> {
        let agent = self.require_agent()?;
        let header = prepare(transport, agent)?;
        if !header.in_flash_range(addr, len) {
            return Err(TransportError::BadParams);
        }
        invoke(
            transport,
            header.load_addr,
            header.erase_fn,
            addr,
            len,
            0,
            0,
        )
    }

    /// `erase_all`: erases the
    /// agent's full advertised flash range.
    pub fn erase_all(&self, transport: &mut Transport) -> Result<(), TransportError> {
        let agent = self.require_agent()?;
        let header = prepare(transport, agent)?;
        invoke(
            transport,
            header.load_addr,
            header.erase_fn,
            header.flash_addr,
            header.flash_size,
            0,
            0,
        )
    }

    fn require_agent(&self) -> Result<&FlashAgent, TransportError> {
        self.current.as_ref().ok_or(TransportError::BadParams)
    }
}

impl Default for FlashAgentInvoker {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared setup for `flash`/`erase`/`erase_all`: attach, reset-and-stop,
/// load the agent with its magic patched to a breakpoint pair, call
/// `setup`, and re-read the header fields it may have filled in.
fn prepare(transport: &mut Transport, agent: &FlashAgent) -> Result<AgentHeader, TransportError> {
    let mut header = AgentHeader::parse(&agent.image)?;
    if header.flags & FLAG_BOOT_ROM_HACK != 0 {
        tracing::error!(arch = agent.arch(), "agent: BOOT ROM HACK unsupported");
        return Err(TransportError::Unsupported);
    }

    transport.attach()?;
    transport.reset_and_stop()?;

    let mut image = agent.image.clone();
    image
        .pwrite_with(BKPT_PAIR, 0, LE)
        .map_err(|_| TransportError::BadParams)?;
    let words = pad_to_words(&image);
    transport.mem_wr_words(header.load_addr, &words)?;
    tracing::info!(
        load_addr = format_args!("{:#010x}", header.load_addr),
        bytes = image.len(),
        "agent: loaded"
    );

    invoke(transport, header.load_addr, header.setup_fn, header.load_addr, 0, 0, 0)?;

    let refreshed = transport.mem_rd_words(header.load_addr + 16, 4)?;
    header.refresh(refreshed[..4].try_into().unwrap());
    tracing::info!(
        data_addr = format_args!("{:#010x}", header.data_addr),
        data_size = header.data_size,
        flash_addr = format_args!("{:#010x}", header.flash_addr),
        flash_size = header.flash_size,
        "agent: info"
    );
    Ok(header)
}

/// The Cortex-M invocation convention:
/// load `r0..r3`, set up `sp`/`lr`/`pc` to return into the breakpoint at
/// `load_addr`, clear pending exception state, resume, wait for the
/// breakpoint, then verify `pc` and read `r0` as the result.
fn invoke(
    transport: &mut Transport,
    load_addr: u32,
    func: u32,
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
) -> Result<(), TransportError> {
    transport.core_reg_wr(CoreRegisterId::r(0), r0)?;
    transport.core_reg_wr(CoreRegisterId::r(1), r1)?;
    transport.core_reg_wr(CoreRegisterId::r(2), r2)?;
    transport.core_reg_wr(CoreRegisterId::r(3), r3)?;
    transport.core_reg_wr(CoreRegisterId::SP, load_addr.wrapping_sub(4))?;
    transport.core_reg_wr(CoreRegisterId::LR, load_addr | 1)?;
    transport.core_reg_wr(CoreRegisterId::PC, func | 1)?;

    // The target may have bogus data at address 0 and still be in a
    // pending-exception state after reset-stop.
    transport.clear_vectactive()?;
    transport.core_reg_wr(CoreRegisterId::XPSR, 0x0100_0000)?;

    tracing::info!(
        func = format_args!("{func:#010x}"),
        r0 = format_args!("{r0:#x}"),
        r1 = format_args!("{r1:#x}"),
        r2 = format_args!("{r2:#x}"),
        r3 = format_args!("{r3:#x}"),
        "agent: call"
    );
    transport.core_resume()?;
    if transport.core_wait_halt(AGENT_CALL_TIMEOUT).is_err() {
        tracing::error!("agent: interrupted");
        return Err(TransportError::Interrupted);
    }

    let pc = transport.core_reg_rd(CoreRegisterId::PC)?;
    let result = transport.core_reg_rd(CoreRegisterId::R0)?;
    if pc != load_addr {
        tracing::error!(pc = format_args!("{pc:#010x}"), load_addr = format_args!("{load_addr:#010x}"), "agent: pc mismatch");
        return Err(TransportError::Protocol);
    }
    if result != 0 {
        if result == AGENT_ERR_INVALID {
            tracing::error!("agent: unsupported part");
            return Err(TransportError::Unsupported);
        }
        tracing::error!(result, "agent: call failed");
        return Err(TransportError::Remote);
    }
    Ok(())
}

/// Word-aligns a byte buffer by zero-padding up to the next multiple of
/// 4, then reinterprets it as little-endian `u32`s for
/// `Transport::mem_wr_words`.
fn pad_to_words(bytes: &[u8]) -> Vec<u32> {
    let word_count = bytes.len().div_ceil(4);
    let mut padded = bytes.to_vec();
    padded.resize(word_count * 4, 0);
    (0..word_count)
        .map(|i| padded.pread_with::<u32>(i * 4, LE).unwrap())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(flags: u32) -> Vec<u8> {
        let mut image = vec![0u8; HEADER_LEN];
        image.pwrite_with(AGENT_MAGIC, 0, LE).unwrap();
        image.pwrite_with(AGENT_VERSION, 4, LE).unwrap();
        image.pwrite_with(flags, 8, LE).unwrap();
        image.pwrite_with(0x2000_0000u32, 12, LE).unwrap(); // load_addr
        image.pwrite_with(0x2000_0400u32, 16, LE).unwrap(); // data_addr
        image.pwrite_with(0x1000u32, 20, LE).unwrap(); // data_size
        image.pwrite_with(0x0001_0000u32, 24, LE).unwrap(); // flash_addr
        image.pwrite_with(0x0002_0000u32, 28, LE).unwrap(); // flash_size
        image.pwrite_with(0x2000_0010u32, 32, LE).unwrap(); // setup_fn
        image.pwrite_with(0x2000_0020u32, 36, LE).unwrap(); // erase_fn
        image.pwrite_with(0x2000_0030u32, 40, LE).unwrap(); // write_fn
        image
    }

    #[test]
    fn header_parses_known_layout() {
        let image = sample_header(0);
        let header = AgentHeader::parse(&image).unwrap();
        assert_eq!(header.magic, AGENT_MAGIC);
        assert_eq!(header.load_addr, 0x2000_0000);
        assert_eq!(header.data_size, 0x1000);
        assert_eq!(header.flash_size, 0x0002_0000);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut image = sample_header(0);
        image.pwrite_with(0u32, 0, LE).unwrap();
        let err = AgentHeader::parse(&image).unwrap();
        assert_ne!(err.magic, AGENT_MAGIC);
    }

    #[test]
    fn boot_rom_hack_flag_detected() {
        let image = sample_header(FLAG_BOOT_ROM_HACK);
        let header = AgentHeader::parse(&image).unwrap();
        assert_ne!(header.flags & FLAG_BOOT_ROM_HACK, 0);
    }

    #[test]
    fn flash_range_bounds_check() {
        let image = sample_header(0);
        let header = AgentHeader::parse(&image).unwrap();
        assert!(header.in_flash_range(0x0001_2000, 0x1000));
        assert!(!header.in_flash_range(0x0000_2000, 0x1000));
        assert!(!header.in_flash_range(0x0001_2000, 0x0003_0000));
    }

    #[test]
    fn pad_to_words_zero_fills_tail() {
        let words = pad_to_words(&[1, 2, 3]);
        assert_eq!(words, vec![0x0003_0201]);
    }
}
