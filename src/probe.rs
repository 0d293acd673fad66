//! The debug transaction port consumed by the engine.
//!
//! The engine never talks to a wire protocol directly. Everything it does is
//! expressed through [`DebugPort`], the single-register and block transfer
//! primitives a Debug Access Port implementation provides. Probe drivers
//! implement this trait; the engine stays agnostic of SWD/JTAG framing and
//! of whatever USB protocol carries it.

use crate::error::LinkError;

/// Word-sized and block transaction primitives against target memory and the
/// private peripheral bus.
///
/// All addresses are absolute 32-bit target addresses.
///
/// Block transfers are only defined when `address` and the transfer length
/// share a natural alignment: the implementor is free to pick the widest
/// access width (byte, half-word or word) that divides both. Callers that
/// need a specific width decomposition (see [`crate::memory`]) must pass
/// spans that are already aligned accordingly.
pub trait DebugPort {
    /// Reads a single 32-bit word from a word-aligned address.
    fn read_word_32(&mut self, address: u32) -> Result<u32, LinkError>;

    /// Writes a single 32-bit word to a word-aligned address.
    fn write_word_32(&mut self, address: u32, value: u32) -> Result<(), LinkError>;

    /// Reads `data.len()` bytes starting at `address`.
    fn read_block(&mut self, address: u32, data: &mut [u8]) -> Result<(), LinkError>;

    /// Writes `data` starting at `address`.
    fn write_block(&mut self, address: u32, data: &[u8]) -> Result<(), LinkError>;
}

impl<P: DebugPort + ?Sized> DebugPort for &mut P {
    fn read_word_32(&mut self, address: u32) -> Result<u32, LinkError> {
        (**self).read_word_32(address)
    }

    fn write_word_32(&mut self, address: u32, value: u32) -> Result<(), LinkError> {
        (**self).write_word_32(address, value)
    }

    fn read_block(&mut self, address: u32, data: &mut [u8]) -> Result<(), LinkError> {
        (**self).read_block(address, data)
    }

    fn write_block(&mut self, address: u32, data: &[u8]) -> Result<(), LinkError> {
        (**self).write_block(address, data)
    }
}

/// A port standing in for a transport backend that is not compiled into this
/// build.
///
/// Every entry point is present and linkable but reports
/// [`LinkError::BackendUnavailable`], so embedders can compose against a
/// reduced backend set without conditional call sites.
#[derive(Debug, Default, Copy, Clone)]
pub struct UnavailableBackend;

impl UnavailableBackend {
    /// The wire clock this backend would run at. Pure getter, safe default.
    pub fn clock_hz(&self) -> u32 {
        0
    }
}

impl DebugPort for UnavailableBackend {
    fn read_word_32(&mut self, _address: u32) -> Result<u32, LinkError> {
        Err(LinkError::BackendUnavailable)
    }

    fn write_word_32(&mut self, _address: u32, _value: u32) -> Result<(), LinkError> {
        Err(LinkError::BackendUnavailable)
    }

    fn read_block(&mut self, _address: u32, _data: &mut [u8]) -> Result<(), LinkError> {
        Err(LinkError::BackendUnavailable)
    }

    fn write_block(&mut self, _address: u32, _data: &[u8]) -> Result<(), LinkError> {
        Err(LinkError::BackendUnavailable)
    }
}
