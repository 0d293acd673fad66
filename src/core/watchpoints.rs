//! Hardware watchpoint management on the Data Watchpoint and Trace unit.
//!
//! Two function-register encodings exist. The legacy one (ARMv6-M and
//! ARMv7-M) selects the access kind with a function code and the watched
//! size with the mask register, which holds the number of ignored low
//! address bits. DWTv2 (ARMv8-M) instead carries a MATCH code, an explicit
//! ACTION field selecting a debug event over a trigger, and a size field;
//! its mask register stays zero. The encoding is picked from the variant
//! detected at attach.

use crate::core::registers::{
    dwt_comp_address, dwt_function_address, dwt_mask_address,
};
use crate::core::CortexM;
use crate::error::DebugError;
use crate::probe::DebugPort;

/// The width of the data access a watchpoint observes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WatchSize {
    /// One byte.
    Byte = 1,
    /// Two bytes.
    Halfword = 2,
    /// Four bytes.
    Word = 4,
    /// Eight bytes.
    Doubleword = 8,
}

impl WatchSize {
    /// Legacy mask encoding: the number of low address bits ignored by the
    /// comparator, i.e. log2 of the watched size.
    fn mask_bits(self) -> u32 {
        match self {
            WatchSize::Byte => 0,
            WatchSize::Halfword => 1,
            WatchSize::Word => 2,
            WatchSize::Doubleword => 3,
        }
    }

    fn len_bytes(self) -> u32 {
        self as u32
    }
}

/// The kind of data access a watchpoint observes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WatchKind {
    /// Loads from the watched address.
    Read,
    /// Stores to the watched address.
    Write,
    /// Both loads and stores.
    Access,
}

/// An in-use watchpoint comparator slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Watchpoint {
    pub address: u32,
    pub size: WatchSize,
    pub kind: WatchKind,
}

// Legacy DWT_FUNCTION match function codes.
const LEGACY_FUNC_READ: u32 = 5;
const LEGACY_FUNC_WRITE: u32 = 6;
const LEGACY_FUNC_ACCESS: u32 = 7;

// DWTv2 MATCH codes; note read and write swap values relative to legacy.
const V2_MATCH_ACCESS: u32 = 4;
const V2_MATCH_WRITE: u32 = 5;
const V2_MATCH_READ: u32 = 6;
// DWTv2 ACTION: generate a debug event rather than a trigger.
const V2_ACTION_DEBUG_EVENT: u32 = 1 << 4;

/// Legacy function-register value for the given access kind.
fn legacy_function(kind: WatchKind) -> u32 {
    match kind {
        WatchKind::Read => LEGACY_FUNC_READ,
        WatchKind::Write => LEGACY_FUNC_WRITE,
        WatchKind::Access => LEGACY_FUNC_ACCESS,
    }
}

/// DWTv2 function-register value for the given access kind and size.
///
/// The DATAVSIZE field is two bits and tops out at a word; callers must
/// reject [`WatchSize::Doubleword`] before encoding, or the size would
/// spill into a reserved bit and degrade to a byte watch in hardware.
fn v2_function(kind: WatchKind, size: WatchSize) -> u32 {
    debug_assert!(size != WatchSize::Doubleword);
    let match_code = match kind {
        WatchKind::Read => V2_MATCH_READ,
        WatchKind::Write => V2_MATCH_WRITE,
        WatchKind::Access => V2_MATCH_ACCESS,
    };
    match_code | V2_ACTION_DEBUG_EVENT | ((size.len_bytes() >> 1) << 10)
}

impl<P: DebugPort> CortexM<P> {
    /// The number of watchpoint comparator slots this core implements.
    pub fn watchpoint_slot_count(&self) -> usize {
        self.watchpoints.len()
    }

    /// Sets a hardware watchpoint on `size` bytes at `address` for the
    /// given access kind and returns the comparator slot it occupies.
    ///
    /// The address is masked to the natural alignment of `size`, which is
    /// what the comparator hardware matches on. An identical active
    /// watchpoint is returned as-is; a full bank fails with
    /// [`DebugError::NoFreeSlot`]. DWTv2 comparators cannot watch a
    /// doubleword, so that size fails with
    /// [`DebugError::UnsupportedWatchSize`] on v8-M cores.
    pub fn set_watchpoint(
        &mut self,
        address: u32,
        size: WatchSize,
        kind: WatchKind,
    ) -> Result<usize, DebugError> {
        if self.variant().has_dwt_v2() && size == WatchSize::Doubleword {
            return Err(DebugError::UnsupportedWatchSize(size.len_bytes()));
        }

        let address = address & !(size.len_bytes() - 1);
        let watchpoint = Watchpoint {
            address,
            size,
            kind,
        };

        if let Some(slot) = self
            .watchpoints
            .iter()
            .position(|used| *used == Some(watchpoint))
        {
            return Ok(slot);
        }

        let slot = self
            .watchpoints
            .iter()
            .position(Option::is_none)
            .ok_or(DebugError::NoFreeSlot)?;

        let (mask, function) = if self.variant().has_dwt_v2() {
            (0, v2_function(kind, size))
        } else {
            (size.mask_bits(), legacy_function(kind))
        };

        self.port.write_word_32(dwt_comp_address(slot), address)?;
        self.port.write_word_32(dwt_mask_address(slot), mask)?;
        self.port
            .write_word_32(dwt_function_address(slot), function)?;

        self.watchpoints[slot] = Some(watchpoint);
        tracing::debug!(
            "watchpoint on {size:?} {kind:?} at {address:#010x} in slot {slot}"
        );
        Ok(slot)
    }

    /// Clears the watchpoint in `slot`, restoring the disabled function
    /// encoding and freeing the slot.
    pub fn clear_watchpoint(&mut self, slot: usize) -> Result<(), DebugError> {
        match self.watchpoints.get(slot) {
            Some(Some(_)) => {}
            _ => return Err(DebugError::InvalidSlot(slot)),
        }

        self.port.write_word_32(dwt_function_address(slot), 0)?;
        self.port.write_word_32(dwt_mask_address(slot), 0)?;
        self.port.write_word_32(dwt_comp_address(slot), 0)?;
        self.watchpoints[slot] = None;
        Ok(())
    }
}
