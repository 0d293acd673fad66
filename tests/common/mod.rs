//! A mock debug transaction port simulating the debug-visible behavior of a
//! Cortex-M core: the DHCSR halting state machine, the DCRSR/DCRDR register
//! mailbox, sticky DFSR bits, the comparator banks and AIRCR reset.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use cortexm_debug::core::registers::{
    Aircr, Cpuid, Ctr, Dcrdr, Dcrsr, Demcr, Dfsr, Dhcsr, DwtCtrl, FpCtrl, Hfsr,
    MemoryMappedRegister, CLIDR, DCCMVAC, ICIALLU,
};
use cortexm_debug::{DebugPort, LinkError};

const DHCSR_KEY: u32 = 0xA05F;
const AIRCR_KEY: u32 = 0x05FA;

const CTRL_DEBUGEN: u32 = 1 << 0;
const CTRL_HALT: u32 = 1 << 1;
const CTRL_STEP: u32 = 1 << 2;

const DFSR_HALTED: u32 = 1 << 0;
pub const DFSR_BKPT: u32 = 1 << 1;
pub const DFSR_DWTTRAP: u32 = 1 << 2;
const DFSR_VCATCH: u32 = 1 << 3;

const DWT_MATCHED: u32 = 1 << 24;

const FP_COMP_BASE: u32 = 0xE000_2008;
const DWT_COMP_BASE: u32 = 0xE000_1020;

/// Everything the simulated core remembers.
pub struct MockState {
    /// Plain target memory, byte addressed.
    pub memory: BTreeMap<u32, u8>,
    /// Core register file indexed by DCRSR selector code.
    pub regs: [u32; 0x20],

    /// Accepted DHCSR control bits (lower half-word).
    pub dhcsr_ctrl: u32,
    pub halted: bool,
    reset_sticky: bool,
    regrdy: bool,
    dcrdr: u32,

    pub dfsr: u32,
    pub demcr: u32,

    /// Read-only FP_CTRL identification value (REV and NUM_CODE).
    pub fp_ctrl_id: u32,
    pub fpb_enabled: bool,
    pub fp_comp: Vec<u32>,

    pub dwt_comp: Vec<u32>,
    pub dwt_mask: Vec<u32>,
    pub dwt_func: Vec<u32>,

    pub cpuid: u32,
    pub clidr: u32,
    pub ctr: u32,

    /// Where the PC lands after a system reset.
    pub reset_vector_pc: u32,

    /// DFSR bits injected when the core is next resumed, simulating an
    /// asynchronous breakpoint/watchpoint hit.
    pub pending_halt_dfsr: Option<u32>,
    /// Slot whose MATCHED flag is raised alongside the pending halt.
    pub pending_watch_match: Option<usize>,

    /// Key-less DHCSR/FP_CTRL/AIRCR writes the hardware discarded.
    pub discarded_writes: u32,
    /// Block sub-transfers touching one of these addresses fail.
    pub failing_addresses: BTreeSet<u32>,
    /// Every block transfer issued, for decomposition inspection.
    pub block_log: Vec<(u32, usize)>,
    /// DCCMVAC target addresses, in issue order.
    pub dcache_cleans: Vec<u32>,
    /// Number of ICIALLU writes.
    pub icache_invalidations: u32,
}

impl MockState {
    fn new() -> Self {
        MockState {
            memory: BTreeMap::new(),
            regs: [0; 0x20],
            dhcsr_ctrl: 0,
            halted: false,
            reset_sticky: false,
            regrdy: false,
            dcrdr: 0,
            dfsr: 0,
            demcr: 0,
            // FPBv1, NUM_CODE = 4.
            fp_ctrl_id: 0x0000_0040,
            fpb_enabled: false,
            fp_comp: vec![0; 4],
            dwt_comp: vec![0; 4],
            dwt_mask: vec![0; 4],
            dwt_func: vec![0; 4],
            // Cortex-M4 r0p1.
            cpuid: 0x410F_C241,
            clidr: 0,
            ctr: 0,
            reset_vector_pc: 0x0800_01C0,
            pending_halt_dfsr: None,
            pending_watch_match: None,
            discarded_writes: 0,
            failing_addresses: BTreeSet::new(),
            block_log: Vec::new(),
            dcache_cleans: Vec::new(),
            icache_invalidations: 0,
        }
    }

    fn write_dhcsr(&mut self, value: u32) {
        if value >> 16 != DHCSR_KEY {
            self.discarded_writes += 1;
            return;
        }
        let ctrl = value & 0xFFFF;
        let was_halted = self.halted;
        self.dhcsr_ctrl = ctrl;

        if ctrl & CTRL_DEBUGEN == 0 {
            self.halted = false;
            return;
        }

        if !was_halted && ctrl & CTRL_HALT != 0 {
            self.halted = true;
            self.dfsr |= DFSR_HALTED;
        } else if was_halted && ctrl & CTRL_HALT == 0 && ctrl & CTRL_STEP != 0 {
            // Single instruction retires, core re-enters debug state.
            self.regs[15] = self.regs[15].wrapping_add(2);
            self.dfsr |= DFSR_HALTED;
        } else if was_halted && ctrl & CTRL_HALT == 0 && ctrl & CTRL_STEP == 0 {
            self.halted = false;
            if let Some(bits) = self.pending_halt_dfsr.take() {
                self.halted = true;
                self.dfsr |= bits;
                if let Some(slot) = self.pending_watch_match.take() {
                    self.dwt_func[slot] |= DWT_MATCHED;
                }
            }
        }
    }

    fn read_dhcsr(&mut self) -> u32 {
        let mut value = self.dhcsr_ctrl;
        if self.halted {
            value |= 1 << 17;
        }
        if self.regrdy {
            value |= 1 << 16;
        }
        if self.reset_sticky {
            value |= 1 << 25;
            self.reset_sticky = false;
        }
        value
    }

    fn write_aircr(&mut self, value: u32) {
        if value >> 16 != AIRCR_KEY {
            self.discarded_writes += 1;
            return;
        }
        if value & (1 << 2) != 0 {
            self.reset_sticky = true;
            self.regs[15] = self.reset_vector_pc;
            if self.demcr & 1 != 0 {
                // Reset vector catch armed.
                self.halted = true;
                self.dfsr |= DFSR_VCATCH;
            } else {
                self.halted = false;
            }
        }
    }

    fn fp_comp_index(&self, address: u32) -> Option<usize> {
        if address < FP_COMP_BASE {
            return None;
        }
        let offset = address - FP_COMP_BASE;
        let index = (offset / 4) as usize;
        (offset % 4 == 0 && index < self.fp_comp.len()).then_some(index)
    }

    /// Resolves an address inside the DWT comparator bank to the slot index
    /// and the register offset (0 COMP, 4 MASK, 8 FUNCTION) within it.
    fn dwt_index(&self, address: u32) -> Option<(usize, u32)> {
        if address < DWT_COMP_BASE {
            return None;
        }
        let offset = address - DWT_COMP_BASE;
        let index = (offset / 0x10) as usize;
        (index < self.dwt_comp.len()).then_some((index, offset % 0x10))
    }
}

/// The mock port handed to the engine. Clones share state, so a test can
/// keep a handle for injection and inspection while the engine owns the
/// port.
#[derive(Clone)]
pub struct MockPort(Rc<RefCell<MockState>>);

impl MockPort {
    pub fn new() -> Self {
        MockPort(Rc::new(RefCell::new(MockState::new())))
    }

    /// A Cortex-M33 presentation: v8-M part number and FPBv2.
    pub fn new_v8m() -> Self {
        let port = Self::new();
        {
            let mut state = port.0.borrow_mut();
            state.cpuid = 0x410F_D214;
            state.fp_ctrl_id = 0x1000_0040;
        }
        port
    }

    /// A core reporting a cache: CLIDR non-zero, 32-byte data cache lines.
    pub fn new_with_cache() -> Self {
        let port = Self::new();
        {
            let mut state = port.0.borrow_mut();
            state.clidr = 0x0900_0000;
            state.ctr = 0x3 << 16;
        }
        port
    }

    pub fn state(&self) -> std::cell::RefMut<'_, MockState> {
        self.0.borrow_mut()
    }
}

impl DebugPort for MockPort {
    fn read_word_32(&mut self, address: u32) -> Result<u32, LinkError> {
        let mut state = self.0.borrow_mut();

        let value = match address {
            Dhcsr::ADDRESS => state.read_dhcsr(),
            Dcrdr::ADDRESS => state.dcrdr,
            Dfsr::ADDRESS => state.dfsr,
            Hfsr::ADDRESS => 0,
            Demcr::ADDRESS => state.demcr,
            Cpuid::ADDRESS => state.cpuid,
            CLIDR => state.clidr,
            Ctr::ADDRESS => state.ctr,
            FpCtrl::ADDRESS => state.fp_ctrl_id | state.fpb_enabled as u32,
            DwtCtrl::ADDRESS => (state.dwt_func.len() as u32) << 28,
            _ => {
                if let Some(i) = state.fp_comp_index(address) {
                    state.fp_comp[i]
                } else if let Some((i, reg)) = state.dwt_index(address) {
                    match reg {
                        0 => state.dwt_comp[i],
                        4 => state.dwt_mask[i],
                        8 => {
                            // Reading FUNCTION clears the sticky match flag.
                            let value = state.dwt_func[i];
                            state.dwt_func[i] &= !DWT_MATCHED;
                            value
                        }
                        _ => 0,
                    }
                } else {
                    let mut word = [0u8; 4];
                    for (offset, byte) in word.iter_mut().enumerate() {
                        *byte = state
                            .memory
                            .get(&(address + offset as u32))
                            .copied()
                            .unwrap_or(0);
                    }
                    u32::from_le_bytes(word)
                }
            }
        };
        Ok(value)
    }

    fn write_word_32(&mut self, address: u32, value: u32) -> Result<(), LinkError> {
        let mut state = self.0.borrow_mut();

        match address {
            Dhcsr::ADDRESS => state.write_dhcsr(value),
            Dcrsr::ADDRESS => {
                let selector = (value & 0x7F) as usize % 0x20;
                if value & (1 << 16) != 0 {
                    state.regs[selector] = state.dcrdr;
                } else {
                    state.dcrdr = state.regs[selector];
                }
                state.regrdy = true;
            }
            Dcrdr::ADDRESS => state.dcrdr = value,
            Dfsr::ADDRESS => state.dfsr &= !value,
            Demcr::ADDRESS => state.demcr = value,
            Aircr::ADDRESS => state.write_aircr(value),
            ICIALLU => state.icache_invalidations += 1,
            DCCMVAC => state.dcache_cleans.push(value),
            FpCtrl::ADDRESS => {
                if value & 0b10 != 0 {
                    state.fpb_enabled = value & 1 != 0;
                } else {
                    state.discarded_writes += 1;
                }
            }
            _ => {
                if let Some(i) = state.fp_comp_index(address) {
                    state.fp_comp[i] = value;
                } else if let Some((i, reg)) = state.dwt_index(address) {
                    match reg {
                        0 => state.dwt_comp[i] = value,
                        4 => state.dwt_mask[i] = value,
                        8 => state.dwt_func[i] = value,
                        _ => {}
                    }
                } else {
                    for (offset, byte) in value.to_le_bytes().iter().enumerate() {
                        state.memory.insert(address + offset as u32, *byte);
                    }
                }
            }
        }
        Ok(())
    }

    fn read_block(&mut self, address: u32, data: &mut [u8]) -> Result<(), LinkError> {
        let mut state = self.0.borrow_mut();
        state.block_log.push((address, data.len()));
        for (offset, byte) in data.iter_mut().enumerate() {
            let addr = address + offset as u32;
            if state.failing_addresses.contains(&addr) {
                return Err(LinkError::Fault);
            }
            *byte = state.memory.get(&addr).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn write_block(&mut self, address: u32, data: &[u8]) -> Result<(), LinkError> {
        let mut state = self.0.borrow_mut();
        state.block_log.push((address, data.len()));
        for (offset, byte) in data.iter().enumerate() {
            let addr = address + offset as u32;
            if state.failing_addresses.contains(&addr) {
                return Err(LinkError::Fault);
            }
            state.memory.insert(addr, *byte);
        }
        Ok(())
    }
}
