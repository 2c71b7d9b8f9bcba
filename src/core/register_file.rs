//! Physical registers and register occupancy.
//!
//! `AsmReg` names a machine register as a (bank, id) pair, `RegBitSet` tracks sets of
//! them, and `RegisterFile` records which value currently occupies which register while
//! the linear-scan allocator walks the live intervals.

use crate::ir::ValueId;

/// Maximum number of register banks supported (GP, XMM).
pub const MAX_REGISTER_BANKS: usize = 2;

/// Maximum number of registers per bank.
pub const MAX_REGISTERS_PER_BANK: usize = 16;

/// Type for register bank indices.
pub type RegBank = u8;

/// Type for register IDs within a bank.
pub type RegId = u8;

/// General purpose register bank.
pub const GP_BANK: RegBank = 0;

/// SSE register bank.
pub const XMM_BANK: RegBank = 1;

/// Combined register identifier.
///
/// GP ids follow the hardware encoding: rax=0, rcx=1, rdx=2, rbx=3, rsp=4, rbp=5,
/// rsi=6, rdi=7, r8..r15 = 8..15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsmReg {
    pub bank: RegBank,
    pub id: RegId,
}

impl AsmReg {
    pub const RAX: AsmReg = AsmReg::gp(0);
    pub const RCX: AsmReg = AsmReg::gp(1);
    pub const RDX: AsmReg = AsmReg::gp(2);
    pub const RBX: AsmReg = AsmReg::gp(3);
    pub const RSP: AsmReg = AsmReg::gp(4);
    pub const RBP: AsmReg = AsmReg::gp(5);
    pub const RSI: AsmReg = AsmReg::gp(6);
    pub const RDI: AsmReg = AsmReg::gp(7);
    pub const R8: AsmReg = AsmReg::gp(8);
    pub const R9: AsmReg = AsmReg::gp(9);
    pub const R10: AsmReg = AsmReg::gp(10);
    pub const R11: AsmReg = AsmReg::gp(11);
    pub const R12: AsmReg = AsmReg::gp(12);
    pub const R13: AsmReg = AsmReg::gp(13);
    pub const R14: AsmReg = AsmReg::gp(14);
    pub const R15: AsmReg = AsmReg::gp(15);

    pub const fn new(bank: RegBank, id: RegId) -> Self {
        Self { bank, id }
    }

    pub const fn gp(id: RegId) -> Self {
        Self { bank: GP_BANK, id }
    }

    pub const fn xmm(id: RegId) -> Self {
        Self { bank: XMM_BANK, id }
    }

    pub fn is_xmm(&self) -> bool {
        self.bank == XMM_BANK
    }

    /// Get the linear register index for array indexing.
    pub fn linear_index(&self) -> usize {
        (self.bank as usize) * MAX_REGISTERS_PER_BANK + (self.id as usize)
    }

    /// GAS name of the register viewed with `size` bytes (1, 2, 4 or 8).
    /// XMM registers ignore the size.
    pub fn name(&self, size: u32) -> &'static str {
        if self.is_xmm() {
            return XMM_NAMES[self.id as usize & 15];
        }
        let table = match size {
            1 => &GP8_NAMES,
            2 => &GP16_NAMES,
            4 => &GP32_NAMES,
            _ => &GP64_NAMES,
        };
        table[self.id as usize & 15]
    }
}

impl std::fmt::Display for AsmReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.name(8))
    }
}

const GP64_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi",
    "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
];

const GP32_NAMES: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi",
    "r8d", "r9d", "r10d", "r11d", "r12d", "r13d", "r14d", "r15d",
];

const GP16_NAMES: [&str; 16] = [
    "ax", "cx", "dx", "bx", "sp", "bp", "si", "di",
    "r8w", "r9w", "r10w", "r11w", "r12w", "r13w", "r14w", "r15w",
];

const GP8_NAMES: [&str; 16] = [
    "al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil",
    "r8b", "r9b", "r10b", "r11b", "r12b", "r13b", "r14b", "r15b",
];

const XMM_NAMES: [&str; 16] = [
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7",
    "xmm8", "xmm9", "xmm10", "xmm11", "xmm12", "xmm13", "xmm14", "xmm15",
];

/// Bit set for efficiently tracking register sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegBitSet {
    /// Bit mask for each register bank.
    banks: [u64; MAX_REGISTER_BANKS],
}

impl RegBitSet {
    /// Create empty register set.
    pub fn new() -> Self {
        Self {
            banks: [0; MAX_REGISTER_BANKS],
        }
    }

    pub fn from_regs(regs: &[AsmReg]) -> Self {
        let mut set = Self::new();
        for &reg in regs {
            set.set(reg);
        }
        set
    }

    /// Check if register is set.
    pub fn contains(&self, reg: AsmReg) -> bool {
        if reg.bank as usize >= MAX_REGISTER_BANKS || reg.id >= 64 {
            return false;
        }
        (self.banks[reg.bank as usize] & (1u64 << reg.id)) != 0
    }

    /// Set a register.
    pub fn set(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64 {
            self.banks[reg.bank as usize] |= 1u64 << reg.id;
        }
    }

    /// Clear a register.
    pub fn clear(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64 {
            self.banks[reg.bank as usize] &= !(1u64 << reg.id);
        }
    }

    /// Set union with another set.
    pub fn union(&mut self, other: &RegBitSet) {
        for i in 0..MAX_REGISTER_BANKS {
            self.banks[i] |= other.banks[i];
        }
    }

    /// Set intersection with another set.
    pub fn intersect(&mut self, other: &RegBitSet) {
        for i in 0..MAX_REGISTER_BANKS {
            self.banks[i] &= other.banks[i];
        }
    }

    /// Count number of set registers in bank.
    pub fn count_in_bank(&self, bank: RegBank) -> u32 {
        if bank as usize >= MAX_REGISTER_BANKS {
            return 0;
        }
        self.banks[bank as usize].count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.banks.iter().all(|&b| b == 0)
    }

    /// Registers of the set, GP bank first, in id order.
    pub fn iter(&self) -> impl Iterator<Item = AsmReg> + '_ {
        (0..MAX_REGISTER_BANKS).flat_map(move |bank| {
            let bits = self.banks[bank];
            (0..64u8)
                .filter(move |id| bits & (1u64 << id) != 0)
                .map(move |id| AsmReg::new(bank as RegBank, id))
        })
    }
}

/// Error types for register occupancy tracking.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegAllocError {
    /// Register is outside the allocatable set.
    #[error("{0} is not allocatable")]
    NotAllocatable(AsmReg),
    /// Register is already held by another value.
    #[error("{reg} is already held by {owner}")]
    Occupied { reg: AsmReg, owner: ValueId },
    /// Register is not allocated.
    #[error("{0} is not allocated")]
    RegisterNotAllocated(AsmReg),
}

/// RegisterFile tracks register occupancy for a single function.
///
/// Unlike a local allocator it never evicts on its own: the caller (the linear
/// scan) decides which value loses its register and releases it explicitly.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    /// Registers available for allocation in preference order.
    order: Vec<AsmReg>,
    /// Registers available for allocation (excludes SP, BP and scratch registers).
    allocatable: RegBitSet,
    /// Currently allocated registers.
    used: RegBitSet,
    /// Registers that have held a value at some point (for save/restore).
    clobbered: RegBitSet,
    /// Which value owns each register.
    owners: [Option<ValueId>; MAX_REGISTER_BANKS * MAX_REGISTERS_PER_BANK],
}

impl RegisterFile {
    /// Create a register file that hands out `order` registers first to last.
    pub fn new(order: &[AsmReg]) -> Self {
        Self {
            order: order.to_vec(),
            allocatable: RegBitSet::from_regs(order),
            used: RegBitSet::new(),
            clobbered: RegBitSet::new(),
            owners: [None; MAX_REGISTER_BANKS * MAX_REGISTERS_PER_BANK],
        }
    }

    /// First free register of `bank` that is not in `exclude`.
    pub fn find_free(&self, bank: RegBank, exclude: &RegBitSet) -> Option<AsmReg> {
        self.order
            .iter()
            .copied()
            .find(|&r| r.bank == bank && !self.used.contains(r) && !exclude.contains(r))
    }

    /// Mark `reg` as held by `owner`.
    pub fn assign(&mut self, reg: AsmReg, owner: ValueId) -> Result<(), RegAllocError> {
        if !self.allocatable.contains(reg) {
            return Err(RegAllocError::NotAllocatable(reg));
        }
        if let Some(current) = self.owners[reg.linear_index()] {
            return Err(RegAllocError::Occupied { reg, owner: current });
        }
        self.used.set(reg);
        self.clobbered.set(reg);
        self.owners[reg.linear_index()] = Some(owner);
        Ok(())
    }

    /// Release `reg`, returning its former owner.
    pub fn release(&mut self, reg: AsmReg) -> Result<ValueId, RegAllocError> {
        let owner = self.owners[reg.linear_index()]
            .take()
            .ok_or(RegAllocError::RegisterNotAllocated(reg))?;
        self.used.clear(reg);
        Ok(owner)
    }

    pub fn owner(&self, reg: AsmReg) -> Option<ValueId> {
        self.owners.get(reg.linear_index()).copied().flatten()
    }

    pub fn is_used(&self, reg: AsmReg) -> bool {
        self.used.contains(reg)
    }

    /// Registers that held a value at any point.
    pub fn clobbered(&self) -> RegBitSet {
        self.clobbered
    }
}
