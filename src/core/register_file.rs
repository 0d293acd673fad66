//! Core register access through the DCRSR/DCRDR mailbox.
//!
//! The selector/data pair is a single hardware mailbox: a transfer is
//! started by writing the selector and has completed once `S_REGRDY`
//! re-asserts in DHCSR. Accesses on one handle never interleave because the
//! engine requires `&mut` access for the duration of a transfer.

use std::time::{Duration, Instant};

use crate::core::registers::{Dcrdr, Dcrsr, Dhcsr, MemoryMappedRegister};
use crate::error::DebugError;
use crate::probe::DebugPort;

/// Selector code of one architectural core register.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CoreRegisterId(pub u8);

impl CoreRegisterId {
    /// The general purpose register `Rn`, `n` in `0..=12`.
    pub const fn gpr(n: u8) -> Self {
        CoreRegisterId(n)
    }
}

/// The current stack pointer, banked between MSP and PSP.
pub const SP: CoreRegisterId = CoreRegisterId(13);
/// The link register.
pub const LR: CoreRegisterId = CoreRegisterId(14);
/// The program counter (debug return address).
pub const PC: CoreRegisterId = CoreRegisterId(15);
/// The combined program status register.
pub const XPSR: CoreRegisterId = CoreRegisterId(0x10);
/// The main stack pointer.
pub const MSP: CoreRegisterId = CoreRegisterId(0x11);
/// The process stack pointer.
pub const PSP: CoreRegisterId = CoreRegisterId(0x12);

/// Reads one core register through the mailbox.
pub(crate) fn read_core_register<P: DebugPort>(
    port: &mut P,
    register: CoreRegisterId,
    timeout: Duration,
) -> Result<u32, DebugError> {
    let mut selector = Dcrsr(0);
    selector.set_regwnr(false);
    selector.set_regsel(register.0 as u32);

    port.write_word_32(Dcrsr::ADDRESS, selector.into())?;

    wait_for_register_ready(port, timeout)?;

    Ok(port.read_word_32(Dcrdr::ADDRESS)?)
}

/// Writes one core register through the mailbox.
///
/// The data register is staged before the selector write; the selector is
/// what starts the transfer.
pub(crate) fn write_core_register<P: DebugPort>(
    port: &mut P,
    register: CoreRegisterId,
    value: u32,
    timeout: Duration,
) -> Result<(), DebugError> {
    port.write_word_32(Dcrdr::ADDRESS, value)?;

    let mut selector = Dcrsr(0);
    selector.set_regwnr(true);
    selector.set_regsel(register.0 as u32);

    port.write_word_32(Dcrsr::ADDRESS, selector.into())?;

    wait_for_register_ready(port, timeout)
}

/// Polls DHCSR until `S_REGRDY` confirms the mailbox transfer completed.
fn wait_for_register_ready<P: DebugPort>(
    port: &mut P,
    timeout: Duration,
) -> Result<(), DebugError> {
    let start = Instant::now();

    loop {
        let dhcsr = Dhcsr(port.read_word_32(Dhcsr::ADDRESS)?);
        if dhcsr.s_regrdy() {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(DebugError::RegisterTimeout);
        }
    }
}
