//! The memory-mapped debug register map of a Cortex-M core.
//!
//! Everything the engine touches lives in the private peripheral bus window
//! starting at `0xE000_0000`: the System Control Space (DHCSR and friends),
//! the Flash Patch and Breakpoint unit and the Data Watchpoint and Trace
//! unit. Registers are modelled as [`bitfield!`] types carrying their PPB
//! address through [`MemoryMappedRegister`].

use bitfield::bitfield;

use crate::error::DebugError;

/// Base of the private peripheral bus window.
pub const PPB_BASE: u32 = 0xE000_0000;

/// Base of the System Control Space.
pub const SCS_BASE: u32 = PPB_BASE + 0xE000;

/// Base of the Data Watchpoint and Trace unit register bank.
pub const DWT_BASE: u32 = PPB_BASE + 0x1000;

/// Base of the Flash Patch and Breakpoint unit register bank.
pub const FPB_BASE: u32 = PPB_BASE + 0x2000;

/// I-Cache Invalidate All to Point of Unification (write-only, v7-M+).
pub const ICIALLU: u32 = SCS_BASE + 0xF50;

/// D-Cache Clean by Address to Point of Coherency (write-only, v7-M+).
pub const DCCMVAC: u32 = SCS_BASE + 0xF68;

/// Cache Level ID Register (v7-M+). Reads as zero when no cache is present.
pub const CLIDR: u32 = SCS_BASE + 0xD78;

/// A debug register memory-mapped into the private peripheral bus.
pub trait MemoryMappedRegister: Clone + From<u32> + Into<u32> + Sized + std::fmt::Debug {
    /// The register's absolute address on the private peripheral bus.
    const ADDRESS: u32;
    /// The register's name in the architecture manuals.
    const NAME: &'static str;
}

/// Computes the address of comparator `index` inside a register bank.
///
/// Single source of truth for indexed comparator addressing; both the FPB
/// (stride 4) and the DWT (stride 16) banks go through here.
pub(crate) const fn comparator_address(bank_base: u32, index: usize, stride: u32) -> u32 {
    bank_base + stride * index as u32
}

/// Address of the FPB comparator register `FP_COMP[index]`.
pub(crate) const fn fp_comp_address(index: usize) -> u32 {
    comparator_address(FPB_BASE + 0x8, index, 4)
}

/// Address of the DWT comparator register `DWT_COMP[index]`.
pub(crate) const fn dwt_comp_address(index: usize) -> u32 {
    comparator_address(DWT_BASE + 0x20, index, 0x10)
}

/// Address of the DWT mask register `DWT_MASK[index]`.
pub(crate) const fn dwt_mask_address(index: usize) -> u32 {
    comparator_address(DWT_BASE + 0x24, index, 0x10)
}

/// Address of the DWT function register `DWT_FUNCTION[index]`.
pub(crate) const fn dwt_function_address(index: usize) -> u32 {
    comparator_address(DWT_BASE + 0x28, index, 0x10)
}

bitfield! {
    /// Debug Halting Control and Status Register.
    ///
    /// The upper half-word must carry the `0xA05F` debug key for a write to
    /// take effect; call [`Dhcsr::enable_write`] before writing or hardware
    /// silently discards the write.
    #[derive(Copy, Clone)]
    pub struct Dhcsr(u32);
    impl Debug;
    /// Sticky: at least one reset happened since the last DHCSR read.
    pub s_reset_st, _: 25;
    /// Sticky: at least one instruction retired since the last DHCSR read.
    pub s_retire_st, _: 24;
    /// The core is locked up by an unrecoverable exception.
    pub s_lockup, _: 19;
    /// The core is sleeping, pending an interrupt or event.
    pub s_sleep, _: 18;
    /// The core is halted in debug state.
    pub s_halt, _: 17;
    /// The DCRSR/DCRDR transfer handshake has completed.
    pub s_regrdy, _: 16;
    /// Mask PendSV, SysTick and external configurable interrupts.
    ///
    /// May only change in a write that also sets `C_HALT` while the core is
    /// already halted.
    pub c_maskints, set_c_maskints: 3;
    /// Step one instruction when next unhalted.
    pub c_step, set_c_step: 2;
    /// Request the core to halt and enter debug state.
    pub c_halt, set_c_halt: 1;
    /// Halting debug enable. Only writable from the debug port.
    pub c_debugen, set_c_debugen: 0;
}

impl Dhcsr {
    /// Packs the `0xA05F` debug key into bits \[31:16\] so the write is
    /// honoured by hardware.
    pub fn enable_write(&mut self) {
        self.0 &= !(0xffff << 16);
        self.0 |= 0xa05f << 16;
    }
}

impl MemoryMappedRegister for Dhcsr {
    const ADDRESS: u32 = SCS_BASE + 0xDF0;
    const NAME: &'static str = "DHCSR";
}

bitfield! {
    /// Debug Core Register Selector Register. Write-only mailbox selector.
    #[derive(Copy, Clone)]
    pub struct Dcrsr(u32);
    impl Debug;
    /// Direction: `0` read, `1` write.
    pub _, set_regwnr: 16;
    /// Selector code of the architectural register to transfer.
    pub _, set_regsel: 6, 0;
}

impl MemoryMappedRegister for Dcrsr {
    const ADDRESS: u32 = SCS_BASE + 0xDF4;
    const NAME: &'static str = "DCRSR";
}

/// Debug Core Register Data Register. The data side of the mailbox.
#[derive(Debug, Copy, Clone)]
pub struct Dcrdr(pub u32);

impl MemoryMappedRegister for Dcrdr {
    const ADDRESS: u32 = SCS_BASE + 0xDF8;
    const NAME: &'static str = "DCRDR";
}

bitfield! {
    /// Debug Exception and Monitor Control Register.
    #[derive(Copy, Clone)]
    pub struct Demcr(u32);
    impl Debug;
    /// Global enable for the DWT and ITM units. The DWT register bank is
    /// inaccessible while this is clear.
    pub trcena, set_trcena: 24;
    /// Halt on HardFault.
    pub vc_harderr, set_vc_harderr: 10;
    /// Halt on a fault during exception entry or return (v7-M+).
    pub vc_interr, set_vc_interr: 9;
    /// Halt on BusFault (v7-M+).
    pub vc_buserr, set_vc_buserr: 8;
    /// Halt on a state information UsageFault (v7-M+).
    pub vc_staterr, set_vc_staterr: 7;
    /// Halt on a checking error UsageFault (v7-M+).
    pub vc_chkerr, set_vc_chkerr: 6;
    /// Halt on a coprocessor access UsageFault (v7-M+).
    pub vc_nocperr, set_vc_nocperr: 5;
    /// Halt on MemManage fault (v7-M+).
    pub vc_mmerr, set_vc_mmerr: 4;
    /// Halt at the reset vector.
    pub vc_corereset, set_vc_corereset: 0;
}

impl MemoryMappedRegister for Demcr {
    const ADDRESS: u32 = SCS_BASE + 0xDFC;
    const NAME: &'static str = "DEMCR";
}

bitfield! {
    /// Application Interrupt and Reset Control Register.
    ///
    /// [`Aircr::vectkey`] must be called before writing, otherwise hardware
    /// treats the write as unpredictable.
    #[derive(Copy, Clone)]
    pub struct Aircr(u32);
    impl Debug;
    get_vectkeystat, set_vectkey: 31, 16;
    /// Request a system reset from the external system.
    pub sysresetreq, set_sysresetreq: 2;
    /// Clear all active exception state. Only sane while halted.
    pub vectclractive, set_vectclractive: 1;
}

impl Aircr {
    /// Packs the `0x05FA` vector key into bits \[31:16\].
    pub fn vectkey(&mut self) {
        self.set_vectkey(0x05FA);
    }

    /// True if the key read-back (`0xFA05`) is present.
    pub fn vectkeystat(&self) -> bool {
        self.get_vectkeystat() == 0xFA05
    }
}

impl MemoryMappedRegister for Aircr {
    const ADDRESS: u32 = SCS_BASE + 0xD0C;
    const NAME: &'static str = "AIRCR";
}

bitfield! {
    /// Debug Fault Status Register. All bits are sticky, write-1-to-clear.
    #[derive(Copy, Clone)]
    pub struct Dfsr(u32);
    impl Debug;
    /// An external debug request halted the core.
    pub external, set_external: 4;
    /// A vector catch triggered.
    pub vcatch, set_vcatch: 3;
    /// The DWT generated a debug event.
    pub dwttrap, set_dwttrap: 2;
    /// A breakpoint (FPB comparator or BKPT instruction) was hit.
    pub bkpt, set_bkpt: 1;
    /// The C_HALT or C_STEP request took effect.
    pub halted, set_halted: 0;
}

impl Dfsr {
    /// The write-1-to-clear mask covering every status bit.
    pub fn clear_all() -> Self {
        Dfsr(0b11111)
    }
}

impl From<u32> for Dfsr {
    fn from(value: u32) -> Self {
        // Reserved bits are masked off so bit arithmetic on the value is
        // well defined.
        Dfsr(value & 0b11111)
    }
}

impl MemoryMappedRegister for Dfsr {
    const ADDRESS: u32 = SCS_BASE + 0xD30;
    const NAME: &'static str = "DFSR";
}

bitfield! {
    /// HardFault Status Register.
    #[derive(Copy, Clone)]
    pub struct Hfsr(u32);
    impl Debug;
    /// A debug event occurred while halting debug was disabled.
    pub debugevt, set_debugevt: 31;
    /// A configurable fault was escalated to HardFault.
    pub forced, set_forced: 30;
    /// A vector table read faulted.
    pub vecttbl, set_vecttbl: 1;
}

impl MemoryMappedRegister for Hfsr {
    const ADDRESS: u32 = SCS_BASE + 0xD2C;
    const NAME: &'static str = "HFSR";
}

bitfield! {
    /// CPUID Base Register. Identifies the implementer, part and
    /// architecture of the core.
    #[derive(Copy, Clone)]
    pub struct Cpuid(u32);
    impl Debug;
    /// Implementer code; `0x41` is Arm.
    pub u8, implementer, _: 31, 24;
    /// Architecture code; `0xC` is ARMv6-M, `0xF` is ARMv7-M and later.
    pub u8, architecture, _: 19, 16;
    /// Primary part number, e.g. `0xC24` for a Cortex-M4.
    pub u16, partno, _: 15, 4;
}

impl MemoryMappedRegister for Cpuid {
    const ADDRESS: u32 = SCS_BASE + 0xD00;
    const NAME: &'static str = "CPUID";
}

bitfield! {
    /// Cache Type Register (v7-M+).
    #[derive(Copy, Clone)]
    pub struct Ctr(u32);
    impl Debug;
    /// Log2 of the number of words in the smallest data cache line.
    pub u8, dminline, _: 19, 16;
}

impl Ctr {
    /// Smallest data cache line size in bytes.
    pub fn dcache_line_bytes(&self) -> u32 {
        4 << self.dminline()
    }
}

impl MemoryMappedRegister for Ctr {
    const ADDRESS: u32 = SCS_BASE + 0xD7C;
    const NAME: &'static str = "CTR";
}

bitfield! {
    /// Flash Patch Control Register.
    ///
    /// Writes are ignored unless the KEY bit is set; call
    /// [`FpCtrl::set_key`] alongside any change to ENABLE.
    #[derive(Copy, Clone)]
    pub struct FpCtrl(u32);
    impl Debug;
    /// Comparator architecture revision: `0` is FPBv1, `1` is FPBv2.
    pub u8, rev, _: 31, 28;
    num_code_1, _: 14, 12;
    /// Number of literal address comparators.
    pub u8, num_lit, _: 11, 8;
    num_code_0, _: 7, 4;
    /// Must be `1` on any write or the FPB ignores it.
    pub _, set_key: 1;
    /// Global enable for the FPB.
    pub enable, set_enable: 0;
}

impl FpCtrl {
    /// The number of instruction address comparators, assembled from the
    /// split NUM_CODE field.
    pub fn num_code(&self) -> u32 {
        ((self.num_code_1() as u32) << 4) | self.num_code_0() as u32
    }
}

impl MemoryMappedRegister for FpCtrl {
    const ADDRESS: u32 = FPB_BASE;
    const NAME: &'static str = "FP_CTRL";
}

bitfield! {
    /// An FPBv1 comparator value. Matches a half-word within the code
    /// region selected by the REPLACE field.
    #[derive(Copy, Clone)]
    pub struct FpRev1Comp(u32);
    impl Debug;
    /// `01` breaks on the lower half-word of the compared word, `10` on the
    /// upper one.
    pub u8, replace, set_replace: 31, 30;
    /// Bits \[28:2\] of the compared address.
    pub comp, set_comp: 28, 2;
    /// Comparator enable.
    pub enable, set_enable: 0;
}

impl FpRev1Comp {
    /// Builds the comparator value breaking at `address`.
    ///
    /// FPBv1 can only compare code-region addresses, i.e. below
    /// `0x2000_0000`.
    pub fn for_address(address: u32) -> Result<Self, DebugError> {
        if address >= 0x2000_0000 {
            return Err(DebugError::UnsupportedBreakpointAddress(address));
        }

        let mut comp = FpRev1Comp(0);
        // Bit 1 of the address selects which half-word of the compared
        // word the breakpoint lands on.
        comp.set_replace(if address & 0x2 == 0 { 0b01 } else { 0b10 });
        comp.set_comp((address & 0x1FFF_FFFC) >> 2);
        comp.set_enable(true);
        Ok(comp)
    }

    /// Recovers the breakpoint address held by an enabled comparator.
    pub fn address(&self) -> u32 {
        let base = self.comp() << 2;
        if self.replace() == 0b10 {
            base | 0x2
        } else {
            base
        }
    }
}

bitfield! {
    /// An FPBv2 comparator value. Compares any half-word aligned address in
    /// the 4 GiB space.
    #[derive(Copy, Clone)]
    pub struct FpRev2Comp(u32);
    impl Debug;
    /// Bits \[31:1\] of the breakpoint instruction address.
    pub bpaddr, set_bpaddr: 31, 1;
    /// Comparator enable.
    pub enable, set_enable: 0;
}

impl FpRev2Comp {
    /// Builds the comparator value breaking at `address`.
    pub fn for_address(address: u32) -> Self {
        let mut comp = FpRev2Comp(0);
        comp.set_bpaddr(address >> 1);
        comp.set_enable(true);
        comp
    }

    /// Recovers the breakpoint address held by the comparator.
    pub fn address(&self) -> u32 {
        self.bpaddr() << 1
    }
}

bitfield! {
    /// DWT Control Register.
    #[derive(Copy, Clone)]
    pub struct DwtCtrl(u32);
    impl Debug;
    /// Number of comparators implemented by this DWT.
    pub u8, numcomp, _: 31, 28;
}

impl MemoryMappedRegister for DwtCtrl {
    const ADDRESS: u32 = DWT_BASE;
    const NAME: &'static str = "DWT_CTRL";
}

bitfield! {
    /// A DWT comparator function register, covering both the legacy
    /// (v6-M/v7-M) and the DWTv2 (v8-M) field layouts.
    #[derive(Copy, Clone)]
    pub struct DwtFunction(u32);
    impl Debug;
    /// Sticky match flag, set on a comparator hit and cleared by reading
    /// this register.
    pub matched, _: 24;
    /// DWTv2: size of the matched access, log2 encoded.
    pub u8, datavsize, set_datavsize: 11, 10;
    /// DWTv2: `0` emits a trigger, `1` generates a debug event.
    pub action, set_action: 4;
    /// Legacy: match function code. DWTv2: MATCH code in bits \[3:0\].
    pub u8, function, set_function: 3, 0;
}

impl DwtFunction {
    /// The disabled encoding shared by both DWT generations.
    pub fn disabled() -> Self {
        DwtFunction(0)
    }
}

// The From/Into conversions are uniform for all register values; one macro
// invocation per type keeps them out of the way.
macro_rules! impl_register_conversions {
    ($($reg:ident),* $(,)?) => {
        $(
            impl From<u32> for $reg {
                fn from(value: u32) -> Self {
                    Self(value)
                }
            }

            impl From<$reg> for u32 {
                fn from(value: $reg) -> Self {
                    value.0
                }
            }
        )*
    };
}

impl_register_conversions!(
    Dhcsr, Dcrsr, Dcrdr, Demcr, Aircr, Hfsr, Cpuid, Ctr, FpCtrl, FpRev1Comp, FpRev2Comp, DwtCtrl,
    DwtFunction,
);

impl From<Dfsr> for u32 {
    fn from(value: Dfsr) -> Self {
        value.0
    }
}
