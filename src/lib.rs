//! A halting-debug control engine for ARM Cortex-M cores.
//!
//! This crate drives the on-chip debug architecture of a Cortex-M target —
//! the debug control registers in the System Control Space, the Flash Patch
//! and Breakpoint unit and the Data Watchpoint and Trace unit — through an
//! abstract transaction port a debug probe provides. It owns the attach and
//! detach lifecycle, halt/resume/step sequencing, core register and memory
//! access, hardware breakpoint and watchpoint allocation, halt reason
//! interpretation and reset sequencing.
//!
//! What it deliberately does not do: the Debug Access Port transaction
//! layer and its wire encoding (SWD/JTAG), flash programming, semihosting,
//! or RTOS awareness. Probe drivers plug in by implementing
//! [`probe::DebugPort`].
//!
//! # Example
//!
//! ```no_run
//! use cortexm_debug::{CortexM, Timeouts, UnavailableBackend};
//! use cortexm_debug::core::register_file::PC;
//!
//! # fn main() -> Result<(), cortexm_debug::DebugError> {
//! // A real embedder passes its probe's DebugPort implementation here.
//! let mut core = CortexM::attach(UnavailableBackend, Timeouts::default())?;
//!
//! core.halt()?;
//! let pc = core.read_core_register(PC)?;
//! let slot = core.set_breakpoint(0x0800_0100)?;
//! core.resume(false, false)?;
//! // ... target runs into the breakpoint ...
//! core.clear_breakpoint(slot)?;
//! core.detach();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod core;
pub mod error;
pub mod memory;
pub mod probe;

pub use crate::core::{
    CoreStatus, CoreVariant, CortexM, HaltReason, Timeouts, VectorCatchCondition,
};
pub use crate::core::register_file::CoreRegisterId;
pub use crate::core::watchpoints::{WatchKind, WatchSize};
pub use crate::error::{DebugError, LinkError};
pub use crate::memory::Align;
pub use crate::probe::{DebugPort, UnavailableBackend};
