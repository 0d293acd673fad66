//! Hardware breakpoint management on the Flash Patch and Breakpoint unit.
//!
//! The FPB provides a small, hardware-reported number of instruction
//! address comparators. This module is the only code path that writes the
//! comparator bank; anything else touching those registers would silently
//! desynchronize the slot table from hardware.

use crate::core::registers::{
    fp_comp_address, FpCtrl, FpRev1Comp, FpRev2Comp, MemoryMappedRegister,
};
use crate::core::CortexM;
use crate::error::DebugError;
use crate::probe::DebugPort;

impl<P: DebugPort> CortexM<P> {
    /// The number of breakpoint comparator slots this core implements.
    pub fn breakpoint_slot_count(&self) -> usize {
        self.breakpoints.len()
    }

    /// The addresses currently occupying breakpoint slots, by slot index.
    pub fn breakpoints(&self) -> &[Option<u32>] {
        &self.breakpoints
    }

    /// Sets a hardware breakpoint on the instruction at `address` and
    /// returns the comparator slot it occupies.
    ///
    /// The address is masked to instruction alignment. Setting a
    /// breakpoint at an address that already has one returns the existing
    /// slot without consuming another. Fails with
    /// [`DebugError::NoFreeSlot`] once every comparator is in use.
    pub fn set_breakpoint(&mut self, address: u32) -> Result<usize, DebugError> {
        let address = address & !1;

        if let Some(slot) = self.breakpoints.iter().position(|used| *used == Some(address)) {
            return Ok(slot);
        }

        let slot = self
            .breakpoints
            .iter()
            .position(Option::is_none)
            .ok_or(DebugError::NoFreeSlot)?;

        let comparator: u32 = match self.fpb_rev {
            0 => FpRev1Comp::for_address(address)?.into(),
            1 => FpRev2Comp::for_address(address).into(),
            rev => return Err(DebugError::UnsupportedFpbRevision(rev)),
        };

        self.enable_fpb()?;

        self.port
            .write_word_32(fp_comp_address(slot), comparator)?;
        self.breakpoints[slot] = Some(address);

        tracing::debug!("breakpoint at {address:#010x} in slot {slot}");
        Ok(slot)
    }

    /// Clears the breakpoint in `slot`, disabling the comparator and
    /// freeing the slot.
    pub fn clear_breakpoint(&mut self, slot: usize) -> Result<(), DebugError> {
        match self.breakpoints.get(slot) {
            Some(Some(_)) => {}
            _ => return Err(DebugError::InvalidSlot(slot)),
        }

        self.port.write_word_32(fp_comp_address(slot), 0)?;
        self.breakpoints[slot] = None;
        Ok(())
    }

    /// Enables the FPB globally, lazily on first use.
    ///
    /// The enable write is key protected like the comparators themselves.
    /// The unit stays enabled until detach; individual comparators come and
    /// go underneath it.
    fn enable_fpb(&mut self) -> Result<(), DebugError> {
        if self.fpb_enabled {
            return Ok(());
        }

        let mut ctrl = FpCtrl(0);
        ctrl.set_key(true);
        ctrl.set_enable(true);
        self.port.write_word_32(FpCtrl::ADDRESS, ctrl.into())?;
        self.fpb_enabled = true;
        Ok(())
    }
}
