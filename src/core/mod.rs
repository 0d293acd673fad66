//! The Cortex-M core control state machine and target handle.
//!
//! A [`CortexM`] handle owns the transaction port to one physically attached
//! core and moves it through `detached -> attached/running ->
//! attached/halted -> detached`. Single-stepping is a transient
//! sub-transition of the halted state that re-enters it after exactly one
//! instruction retires.
//!
//! One handle is owned by one session; all operations take `&mut self`, so
//! the borrow checker provides the external serialization the underlying
//! in-order command channel requires. Independent cores are independent
//! handles over independent ports.

pub mod breakpoints;
pub mod register_file;
pub mod registers;
pub mod watchpoints;

use std::time::{Duration, Instant};

use crate::error::DebugError;
use crate::memory::{self, Align};
use crate::probe::DebugPort;

use registers::{
    dwt_function_address, fp_comp_address, Aircr, Cpuid, Ctr, Demcr, Dfsr, Dhcsr, DwtCtrl,
    DwtFunction, FpCtrl, Hfsr, MemoryMappedRegister, CLIDR, DCCMVAC, ICIALLU,
};

use register_file::CoreRegisterId;
use watchpoints::Watchpoint;

/// The architecture variant of an attached core.
///
/// Decides which DWT function-register encoding applies and whether cache
/// maintenance registers exist at all.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CoreVariant {
    /// ARMv6-M (Cortex-M0, M0+, M1).
    V6m,
    /// ARMv7-M (Cortex-M3, M4, M7).
    V7m,
    /// ARMv8-M (Cortex-M23, M33, M55, M85), with the DWTv2 encoding and the
    /// security extension.
    V8m,
}

impl CoreVariant {
    /// Classifies the core from its CPUID value.
    ///
    /// The part number is authoritative where known; otherwise the
    /// architecture nibble separates v6-M from the rest.
    fn from_cpuid(cpuid: Cpuid) -> Self {
        match cpuid.partno() {
            0xC20 | 0xC60 | 0xC21 => CoreVariant::V6m,
            0xC23 | 0xC24 | 0xC27 => CoreVariant::V7m,
            0xD20 | 0xD21 | 0xD22 | 0xD23 => CoreVariant::V8m,
            _ => {
                if cpuid.architecture() == 0xC {
                    CoreVariant::V6m
                } else {
                    CoreVariant::V7m
                }
            }
        }
    }

    /// True if the DWT uses the v2 (MATCH/ACTION/SIZE) function encoding.
    pub(crate) fn has_dwt_v2(self) -> bool {
        matches!(self, CoreVariant::V8m)
    }

    /// True if the variant implements the cache identification and
    /// maintenance registers.
    fn has_cache_registers(self) -> bool {
        !matches!(self, CoreVariant::V6m)
    }
}

/// Poll bounds for every blocking operation of the engine.
///
/// No global timeout exists; the bounds travel with the handle so tests can
/// shrink them deterministically.
#[derive(Debug, Copy, Clone)]
pub struct Timeouts {
    /// Bound for halt, step and attach polls on DHCSR.
    pub halt: Duration,
    /// Bound for the DCRSR/DCRDR register-ready handshake.
    pub register: Duration,
    /// Bound for observing a requested system reset.
    pub reset: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            halt: Duration::from_millis(100),
            register: Duration::from_millis(100),
            reset: Duration::from_millis(600),
        }
    }
}

/// The decoded cause of the current halt episode.
///
/// Recomputed from the fault status registers on every halt and discarded
/// when the core resumes; it is never carried across episodes.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct HaltReason {
    /// An external debug request (EDBGRQ) halted the core.
    pub external: bool,
    /// A vector catch halted the core.
    pub vector_catch: bool,
    /// A breakpoint halted the core.
    pub breakpoint_hit: bool,
    /// A watchpoint halted the core.
    pub watchpoint_hit: bool,
    /// The comparator slot whose match caused the watchpoint halt, when it
    /// could be attributed.
    pub watchpoint_slot: Option<usize>,
    /// The halt was requested by the debugger (halt or step).
    pub halted_by_request: bool,
}

impl HaltReason {
    /// Bit-for-bit decode of the sticky fault status bits.
    fn decode(dfsr: Dfsr, hfsr: Hfsr) -> Self {
        if hfsr.debugevt() {
            tracing::debug!("HFSR reports a debug event escalated to HardFault");
        }
        HaltReason {
            external: dfsr.external(),
            vector_catch: dfsr.vcatch(),
            breakpoint_hit: dfsr.bkpt(),
            watchpoint_hit: dfsr.dwttrap(),
            watchpoint_slot: None,
            halted_by_request: dfsr.halted(),
        }
    }
}

/// The observed execution state of the core.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CoreStatus {
    /// The core is executing instructions.
    Running,
    /// The core is halted in debug state, with the decoded reason.
    Halted(HaltReason),
    /// The core is sleeping, pending an interrupt or event.
    Sleeping,
    /// The core is locked up by an unrecoverable exception.
    LockedUp,
    /// Not yet observed.
    Unknown,
}

impl CoreStatus {
    /// Returns `true` if the core is halted in debug state.
    pub fn is_halted(&self) -> bool {
        matches!(self, CoreStatus::Halted(_))
    }
}

/// Exception classes that can be armed to halt the core when taken.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VectorCatchCondition {
    /// Halt when a HardFault is taken.
    HardFault,
    /// Halt at the reset vector.
    CoreReset,
    /// Both of the above.
    All,
}

/// A handle to one attached, halting-debug controlled Cortex-M core.
///
/// Created by [`CortexM::attach`]; destroyed by [`CortexM::detach`] or on
/// drop, either of which leaves the core's debug-enable bit cleared so the
/// target does not stay power-locked by a stale session.
pub struct CortexM<P: DebugPort> {
    pub(crate) port: P,
    timeouts: Timeouts,
    variant: CoreVariant,
    /// FPB comparator architecture revision, from FP_CTRL.REV.
    pub(crate) fpb_rev: u8,
    pub(crate) fpb_enabled: bool,
    /// Cached writable control-word bit. The read-only status bits are
    /// never cached; every query re-reads DHCSR.
    mask_interrupts: bool,
    pub(crate) breakpoints: Vec<Option<u32>>,
    pub(crate) watchpoints: Vec<Option<Watchpoint>>,
    /// Data cache line size in bytes, when the core reports a cache.
    cache_line: Option<u32>,
    status: CoreStatus,
    last_halt_reason: Option<HaltReason>,
    detached: bool,
}

impl<P: DebugPort> CortexM<P> {
    /// Attaches to the core behind `port` and takes debug control of it.
    ///
    /// Sets the halting-debug enable bit (key protected), waits for it to
    /// take effect, classifies the architecture variant, sizes the
    /// comparator banks and clears any comparator state a previous session
    /// left behind. A core that was already halted stays halted.
    pub fn attach(mut port: P, timeouts: Timeouts) -> Result<Self, DebugError> {
        let initial = Dhcsr(port.read_word_32(Dhcsr::ADDRESS)?);

        let mut dhcsr = Dhcsr(0);
        dhcsr.set_c_debugen(true);
        dhcsr.set_c_halt(initial.s_halt());
        dhcsr.enable_write();
        port.write_word_32(Dhcsr::ADDRESS, dhcsr.into())?;

        let start = Instant::now();
        loop {
            let dhcsr = Dhcsr(port.read_word_32(Dhcsr::ADDRESS)?);
            if dhcsr.c_debugen() {
                break;
            }
            if start.elapsed() >= timeouts.halt {
                return Err(DebugError::ProtocolTimeout);
            }
        }

        let cpuid = Cpuid(port.read_word_32(Cpuid::ADDRESS)?);
        let variant = CoreVariant::from_cpuid(cpuid);
        tracing::debug!(
            "attached to {:?} core (CPUID = {:#010x})",
            variant,
            u32::from(cpuid)
        );

        // The DWT bank is dead until TRCENA is set. Arming the HardFault
        // catch at attach mirrors what a debugger wants in practice: a
        // faulting target halts instead of spinning in its fault handler.
        let mut demcr = Demcr(port.read_word_32(Demcr::ADDRESS)?);
        demcr.set_trcena(true);
        demcr.set_vc_harderr(true);
        port.write_word_32(Demcr::ADDRESS, demcr.into())?;

        let fp_ctrl = FpCtrl(port.read_word_32(FpCtrl::ADDRESS)?);
        let breakpoint_slots = fp_ctrl.num_code() as usize;
        for slot in 0..breakpoint_slots {
            port.write_word_32(fp_comp_address(slot), 0)?;
        }

        let dwt_ctrl = DwtCtrl(port.read_word_32(DwtCtrl::ADDRESS)?);
        let watchpoint_slots = dwt_ctrl.numcomp() as usize;
        for slot in 0..watchpoint_slots {
            port.write_word_32(dwt_function_address(slot), DwtFunction::disabled().into())?;
        }

        let cache_line = if variant.has_cache_registers() && port.read_word_32(CLIDR)? != 0 {
            Some(Ctr(port.read_word_32(Ctr::ADDRESS)?).dcache_line_bytes())
        } else {
            None
        };

        let mut core = CortexM {
            port,
            timeouts,
            variant,
            fpb_rev: fp_ctrl.rev(),
            fpb_enabled: false,
            mask_interrupts: false,
            breakpoints: vec![None; breakpoint_slots],
            watchpoints: vec![None; watchpoint_slots],
            cache_line,
            status: CoreStatus::Unknown,
            last_halt_reason: None,
            detached: false,
        };

        if initial.s_halt() {
            let reason = core.interpret_halt()?;
            core.status = CoreStatus::Halted(reason);
        } else {
            // Clear stale sticky fault bits so the first halt of this
            // session is attributed correctly.
            core.port
                .write_word_32(Dfsr::ADDRESS, Dfsr::clear_all().into())?;
            core.status = CoreStatus::Running;
        }

        Ok(core)
    }

    /// The architecture variant detected at attach.
    pub fn variant(&self) -> CoreVariant {
        self.variant
    }

    /// Releases debug control of the core.
    ///
    /// Best effort by design: releasing control must not be blockable by
    /// the target's state, so failures are logged and swallowed. Also runs
    /// on drop if never called explicitly.
    pub fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;

        if let Err(error) = self.release_core() {
            tracing::error!("detach left the core in an unknown state: {error}");
        }
    }

    fn release_core(&mut self) -> Result<(), DebugError> {
        for slot in 0..self.breakpoints.len() {
            self.port.write_word_32(fp_comp_address(slot), 0)?;
            self.breakpoints[slot] = None;
        }
        for slot in 0..self.watchpoints.len() {
            self.port
                .write_word_32(dwt_function_address(slot), DwtFunction::disabled().into())?;
            self.watchpoints[slot] = None;
        }

        if self.fpb_enabled {
            let mut ctrl = FpCtrl(0);
            ctrl.set_key(true);
            ctrl.set_enable(false);
            self.port.write_word_32(FpCtrl::ADDRESS, ctrl.into())?;
            self.fpb_enabled = false;
        }

        self.port.write_word_32(Demcr::ADDRESS, 0)?;

        // All control bits cleared, key present: the core runs free and
        // halting debug is disabled.
        let mut dhcsr = Dhcsr(0);
        dhcsr.enable_write();
        self.port.write_word_32(Dhcsr::ADDRESS, dhcsr.into())?;

        self.status = CoreStatus::Unknown;
        self.last_halt_reason = None;
        Ok(())
    }

    /// Re-reads DHCSR and reports the core's execution state.
    ///
    /// A freshly observed halt triggers the fault interpreter; while the
    /// same halt episode lasts, the decoded reason is served from the
    /// handle (the sticky bits were cleared when it was decoded).
    pub fn status(&mut self) -> Result<CoreStatus, DebugError> {
        let dhcsr = Dhcsr(self.port.read_word_32(Dhcsr::ADDRESS)?);

        if dhcsr.s_lockup() {
            tracing::error!("the core is locked up by an unrecoverable exception");
            self.status = CoreStatus::LockedUp;
            return Ok(CoreStatus::LockedUp);
        }

        if dhcsr.s_sleep() {
            self.status = CoreStatus::Sleeping;
            return Ok(CoreStatus::Sleeping);
        }

        if dhcsr.s_halt() {
            if let CoreStatus::Halted(reason) = self.status {
                return Ok(CoreStatus::Halted(reason));
            }

            let reason = self.interpret_halt()?;
            self.status = CoreStatus::Halted(reason);
            return Ok(self.status);
        }

        if self.status.is_halted() {
            tracing::warn!("expected the core to be halted, but it is running");
        }
        self.status = CoreStatus::Running;
        Ok(CoreStatus::Running)
    }

    /// The decoded reason of the current halt episode, if the core is (or
    /// was last observed) halted.
    pub fn last_halt_reason(&self) -> Option<HaltReason> {
        self.last_halt_reason
    }

    /// Requests a halt and waits for the core to enter debug state.
    ///
    /// Halting an already halted core is a no-op success.
    pub fn halt(&mut self) -> Result<(), DebugError> {
        if self.status()?.is_halted() {
            return Ok(());
        }

        self.write_control(true, false)?;
        self.wait_for_core_halted(self.timeouts.halt)?;

        let reason = self.interpret_halt()?;
        self.status = CoreStatus::Halted(reason);
        Ok(())
    }

    /// Leaves the halted state.
    ///
    /// With `step` set, exactly one instruction retires and the core
    /// re-enters debug state; the call blocks until the step has landed.
    /// Without it, execution resumes asynchronously and the call returns
    /// immediately.
    ///
    /// `mask_interrupts` suppresses PendSV, SysTick and external interrupts
    /// while unhalted, so a step does not dispatch a pending interrupt
    /// first. The hardware only honours a MASKINTS change in a write that
    /// keeps the halt request asserted, so a changed mask is written in a
    /// separate, halt-preserving write before the run/step write.
    pub fn resume(&mut self, step: bool, mask_interrupts: bool) -> Result<(), DebugError> {
        if !self.status()?.is_halted() {
            return Err(DebugError::NotHalted);
        }

        if mask_interrupts != self.mask_interrupts {
            self.mask_interrupts = mask_interrupts;
            self.write_control(true, false)?;
        }

        if step {
            self.write_control(false, true)?;
            self.wait_for_core_halted(self.timeouts.halt)?;
            // Pin the halt before dropping the step request, otherwise the
            // clearing write would resume the core.
            self.write_control(true, false)?;

            let reason = self.interpret_halt()?;
            self.status = CoreStatus::Halted(reason);
        } else {
            self.write_control(false, false)?;
            self.status = CoreStatus::Running;
            self.last_halt_reason = None;
        }

        Ok(())
    }

    /// Drives a system reset through AIRCR.
    ///
    /// With `catch_vector`, the core-reset vector catch is armed first and
    /// the call waits for the post-reset halt at the reset vector; the
    /// caller disarms the catch via [`CortexM::clear_reset_catch`] when
    /// done. Without it, the core reboots and runs.
    pub fn reset(&mut self, catch_vector: bool) -> Result<(), DebugError> {
        if catch_vector {
            self.enable_vector_catch(VectorCatchCondition::CoreReset)?;
        }

        self.port
            .write_word_32(Dfsr::ADDRESS, Dfsr::clear_all().into())?;

        let mut aircr = Aircr(0);
        aircr.vectkey();
        aircr.set_sysresetreq(true);
        self.port.write_word_32(Aircr::ADDRESS, aircr.into())?;

        let start = Instant::now();
        loop {
            // Transaction failures while the target reboots are expected;
            // the debug logic may itself be held in reset for a while.
            match self.port.read_word_32(Dhcsr::ADDRESS) {
                Ok(raw) if Dhcsr(raw).s_reset_st() => break,
                Ok(_) => {}
                Err(error) => tracing::trace!("read during reset failed: {error}"),
            }
            if start.elapsed() >= self.timeouts.reset {
                return Err(DebugError::ResetTimeout);
            }
        }

        if catch_vector {
            self.wait_for_core_halted(self.timeouts.halt)?;
            let reason = self.interpret_halt()?;
            self.status = CoreStatus::Halted(reason);
        } else {
            self.status = CoreStatus::Running;
            self.last_halt_reason = None;
        }

        Ok(())
    }

    /// Disarms the core-reset vector catch armed by a caught reset.
    pub fn clear_reset_catch(&mut self) -> Result<(), DebugError> {
        self.disable_vector_catch(VectorCatchCondition::CoreReset)
    }

    /// Arms a vector catch so the core halts when the exception is taken.
    pub fn enable_vector_catch(
        &mut self,
        condition: VectorCatchCondition,
    ) -> Result<(), DebugError> {
        self.modify_vector_catch(condition, true)
    }

    /// Disarms a vector catch.
    pub fn disable_vector_catch(
        &mut self,
        condition: VectorCatchCondition,
    ) -> Result<(), DebugError> {
        self.modify_vector_catch(condition, false)
    }

    fn modify_vector_catch(
        &mut self,
        condition: VectorCatchCondition,
        enable: bool,
    ) -> Result<(), DebugError> {
        let mut demcr = Demcr(self.port.read_word_32(Demcr::ADDRESS)?);
        match condition {
            VectorCatchCondition::HardFault => demcr.set_vc_harderr(enable),
            VectorCatchCondition::CoreReset => demcr.set_vc_corereset(enable),
            VectorCatchCondition::All => {
                demcr.set_vc_harderr(enable);
                demcr.set_vc_corereset(enable);
            }
        }
        self.port.write_word_32(Demcr::ADDRESS, demcr.into())?;
        Ok(())
    }

    /// Reads one architectural core register. Only defined while halted.
    pub fn read_core_register(&mut self, register: CoreRegisterId) -> Result<u32, DebugError> {
        if !self.status()?.is_halted() {
            return Err(DebugError::NotHalted);
        }
        register_file::read_core_register(&mut self.port, register, self.timeouts.register)
    }

    /// Writes one architectural core register. Only defined while halted.
    pub fn write_core_register(
        &mut self,
        register: CoreRegisterId,
        value: u32,
    ) -> Result<(), DebugError> {
        if !self.status()?.is_halted() {
            return Err(DebugError::NotHalted);
        }
        register_file::write_core_register(&mut self.port, register, value, self.timeouts.register)
    }

    /// Reads a byte span from target memory, decomposing misaligned spans
    /// into alignment-correct sub-transfers capped at `align`.
    pub fn read_memory(
        &mut self,
        address: u32,
        data: &mut [u8],
        align: Align,
    ) -> Result<(), DebugError> {
        memory::read_memory(&mut self.port, address, data, align)
    }

    /// Writes a byte span to target memory.
    ///
    /// `code_region` flags a write into executable memory; on cores that
    /// report a cache, the instruction cache is invalidated and the data
    /// cache cleaned over the written range afterwards, so the core
    /// fetches what was just written.
    pub fn write_memory(
        &mut self,
        address: u32,
        data: &[u8],
        align: Align,
        code_region: bool,
    ) -> Result<(), DebugError> {
        memory::write_memory(&mut self.port, address, data, align)?;

        if code_region {
            self.clean_code_caches(address, data.len() as u32)?;
        }
        Ok(())
    }

    fn clean_code_caches(&mut self, address: u32, len: u32) -> Result<(), DebugError> {
        let Some(line) = self.cache_line else {
            return Ok(());
        };

        let mut addr = address & !(line - 1);
        while addr < address.saturating_add(len) {
            self.port.write_word_32(DCCMVAC, addr)?;
            addr = addr.saturating_add(line);
        }
        self.port.write_word_32(ICIALLU, 0)?;
        Ok(())
    }

    /// Runs the fault interpreter over DFSR/HFSR and clears the sticky
    /// bits, so the next halt's flags start from a clean slate.
    fn interpret_halt(&mut self) -> Result<HaltReason, DebugError> {
        let dfsr = Dfsr::from(self.port.read_word_32(Dfsr::ADDRESS)?);
        let hfsr = Hfsr(self.port.read_word_32(Hfsr::ADDRESS)?);

        let mut reason = HaltReason::decode(dfsr, hfsr);
        if reason.watchpoint_hit {
            reason.watchpoint_slot = self.matched_watchpoint_slot()?;
        }

        self.port
            .write_word_32(Dfsr::ADDRESS, Dfsr::clear_all().into())?;

        self.last_halt_reason = Some(reason);
        Ok(reason)
    }

    /// Scans the in-use DWT comparators for the sticky MATCHED flag.
    ///
    /// Reading the function register clears the flag, so the whole bank is
    /// scanned even after a hit to leave no stale match behind.
    fn matched_watchpoint_slot(&mut self) -> Result<Option<usize>, DebugError> {
        let mut matched = None;
        for slot in 0..self.watchpoints.len() {
            if self.watchpoints[slot].is_none() {
                continue;
            }
            let function = DwtFunction(self.port.read_word_32(dwt_function_address(slot))?);
            if function.matched() && matched.is_none() {
                matched = Some(slot);
            }
        }
        Ok(matched)
    }

    /// Writes the control word: cached writable bits plus the requested
    /// halt/step bits, always carrying the debug key.
    fn write_control(&mut self, halt: bool, step: bool) -> Result<(), DebugError> {
        let mut dhcsr = Dhcsr(0);
        dhcsr.set_c_debugen(true);
        dhcsr.set_c_maskints(self.mask_interrupts);
        dhcsr.set_c_halt(halt);
        dhcsr.set_c_step(step);
        dhcsr.enable_write();
        self.port.write_word_32(Dhcsr::ADDRESS, dhcsr.into())?;
        Ok(())
    }

    fn wait_for_core_halted(&mut self, timeout: Duration) -> Result<(), DebugError> {
        let start = Instant::now();
        loop {
            let dhcsr = Dhcsr(self.port.read_word_32(Dhcsr::ADDRESS)?);
            if dhcsr.s_halt() {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(DebugError::ProtocolTimeout);
            }
            std::thread::sleep(Duration::from_micros(100));
        }
    }
}

impl<P: DebugPort> Drop for CortexM<P> {
    fn drop(&mut self) {
        self.detach();
    }
}
