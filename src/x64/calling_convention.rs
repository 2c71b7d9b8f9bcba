// This module implements the System V AMD64 ABI as seen by the backend. SysVAssigner walks
// a parameter list and places each argument: GP arguments in RDI, RSI, RDX, RCX, R8, R9,
// float arguments in XMM0-XMM7, the rest in 8-byte stack slots above the return address.
// Return values use RAX or XMM0. The same assigner runs for the incoming arguments of the
// function being compiled and for the outgoing arguments of every call site, so both sides
// agree by construction. The register pools of the allocator are defined here as well:
// the allocatable order, the callee-saved subset and the caller-saved sets a call clobbers.
// StackFrame lays out the locals area below the callee-saved pushes and recycles spill
// slots through a free list keyed by slot size.

//! System V x86-64 calling convention and stack frame layout.

use hashbrown::HashMap;

use crate::core::register_file::{AsmReg, RegBitSet};
use crate::ir::{align_to, Type};

/// Register banks for argument classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegBank {
    GeneralPurpose = 0,
    Xmm = 1,
}

impl RegBank {
    /// Bank a value of type `ty` lives in.
    pub fn for_type(ty: &Type) -> Self {
        if ty.is_float() {
            RegBank::Xmm
        } else {
            RegBank::GeneralPurpose
        }
    }
}

/// Argument assignment result from calling convention analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CCAssignment {
    /// Register bank this argument belongs to.
    pub bank: RegBank,
    /// Size of the argument in bytes.
    pub size: u32,
    /// Assigned register (if any).
    pub reg: Option<AsmReg>,
    /// Offset from the first stack argument (if assigned to stack).
    pub stack_off: Option<i32>,
}

impl CCAssignment {
    pub fn new(bank: RegBank, size: u32) -> Self {
        Self { bank, size, reg: None, stack_off: None }
    }

    pub fn for_type(ty: &Type) -> Self {
        Self::new(RegBank::for_type(ty), ty.size_of().max(1) as u32)
    }
}

/// Information about a calling convention.
#[derive(Debug, Clone)]
pub struct CCInfo {
    /// Registers available for allocation.
    pub allocatable_regs: RegBitSet,
    /// Registers that must be preserved by callee.
    pub callee_saved_regs: RegBitSet,
    /// Registers a call may overwrite.
    pub caller_saved_regs: RegBitSet,
    /// Registers used for argument passing.
    pub arg_regs: RegBitSet,
}

/// Trait for calling convention argument assignment.
pub trait CCAssigner {
    fn get_ccinfo(&self) -> &CCInfo;

    /// Assign an argument according to the calling convention.
    fn assign_arg(&mut self, arg: &mut CCAssignment);

    /// Assign a return value according to the calling convention.
    fn assign_ret(&mut self, arg: &mut CCAssignment);

    /// Reset state for a new function or call site.
    fn reset(&mut self);

    /// Stack space taken by the arguments assigned so far.
    fn get_stack_size(&self) -> u32;
}

/// System V x86-64 GP argument registers.
pub const GP_ARG_REGS: [AsmReg; 6] = [AsmReg::RDI, AsmReg::RSI, AsmReg::RDX, AsmReg::RCX, AsmReg::R8, AsmReg::R9];

/// System V x86-64 XMM argument registers.
pub const XMM_ARG_REGS: [AsmReg; 8] = [
    AsmReg::xmm(0),
    AsmReg::xmm(1),
    AsmReg::xmm(2),
    AsmReg::xmm(3),
    AsmReg::xmm(4),
    AsmReg::xmm(5),
    AsmReg::xmm(6),
    AsmReg::xmm(7),
];

/// Callee-saved GP registers in push order.
pub const CALLEE_SAVED: [AsmReg; 5] = [AsmReg::RBX, AsmReg::R12, AsmReg::R13, AsmReg::R14, AsmReg::R15];

/// GP allocation order: caller-saved registers first so short-lived values do not
/// force a save in the prologue.
pub const GP_ALLOC_ORDER: [AsmReg; 12] = [
    AsmReg::RCX,
    AsmReg::RDX,
    AsmReg::RSI,
    AsmReg::RDI,
    AsmReg::R8,
    AsmReg::R9,
    AsmReg::R10,
    AsmReg::RBX,
    AsmReg::R12,
    AsmReg::R13,
    AsmReg::R14,
    AsmReg::R15,
];

/// XMM allocation order; xmm14 and xmm15 are code generator scratch.
pub const XMM_ALLOC_ORDER: [AsmReg; 14] = [
    AsmReg::xmm(0),
    AsmReg::xmm(1),
    AsmReg::xmm(2),
    AsmReg::xmm(3),
    AsmReg::xmm(4),
    AsmReg::xmm(5),
    AsmReg::xmm(6),
    AsmReg::xmm(7),
    AsmReg::xmm(8),
    AsmReg::xmm(9),
    AsmReg::xmm(10),
    AsmReg::xmm(11),
    AsmReg::xmm(12),
    AsmReg::xmm(13),
];

/// GP scratch registers reserved for instruction sequences.
pub const SCRATCH_GP: [AsmReg; 2] = [AsmReg::RAX, AsmReg::R11];

/// XMM scratch registers reserved for instruction sequences.
pub const SCRATCH_XMM: [AsmReg; 2] = [AsmReg::xmm(14), AsmReg::xmm(15)];

/// Registers handed out by the allocator, in preference order.
pub fn allocation_order() -> Vec<AsmReg> {
    GP_ALLOC_ORDER.iter().chain(XMM_ALLOC_ORDER.iter()).copied().collect()
}

/// System V x86-64 calling convention assigner.
pub struct SysVAssigner {
    cc_info: CCInfo,
    /// Current GP argument register index.
    gp_cnt: usize,
    /// Current XMM argument register index.
    xmm_cnt: usize,
    /// Current stack offset for arguments.
    stack: u32,
    ret_gp_cnt: usize,
    ret_xmm_cnt: usize,
}

impl Default for SysVAssigner {
    fn default() -> Self {
        let allocatable = RegBitSet::from_regs(&allocation_order());
        let callee_saved = RegBitSet::from_regs(&CALLEE_SAVED);

        let mut caller_saved = RegBitSet::new();
        for reg in allocatable.iter() {
            if !callee_saved.contains(reg) {
                caller_saved.set(reg);
            }
        }
        for reg in SCRATCH_GP.iter().chain(SCRATCH_XMM.iter()) {
            caller_saved.set(*reg);
        }

        let mut arg_regs = RegBitSet::from_regs(&GP_ARG_REGS);
        arg_regs.union(&RegBitSet::from_regs(&XMM_ARG_REGS));

        Self {
            cc_info: CCInfo {
                allocatable_regs: allocatable,
                callee_saved_regs: callee_saved,
                caller_saved_regs: caller_saved,
                arg_regs,
            },
            gp_cnt: 0,
            xmm_cnt: 0,
            stack: 0,
            ret_gp_cnt: 0,
            ret_xmm_cnt: 0,
        }
    }
}

impl SysVAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of GP argument registers used so far.
    pub fn gp_used(&self) -> usize {
        self.gp_cnt
    }

    /// Number of XMM argument registers used so far; variadic callees read it from %al.
    pub fn xmm_used(&self) -> usize {
        self.xmm_cnt
    }

    /// Assign every parameter of a signature, in order.
    pub fn assign_params(&mut self, params: &[Type]) -> Vec<CCAssignment> {
        self.reset();
        params
            .iter()
            .map(|ty| {
                let mut arg = CCAssignment::for_type(ty);
                self.assign_arg(&mut arg);
                arg
            })
            .collect()
    }
}

impl CCAssigner for SysVAssigner {
    fn get_ccinfo(&self) -> &CCInfo {
        &self.cc_info
    }

    fn assign_arg(&mut self, arg: &mut CCAssignment) {
        let (regs, cnt): (&[AsmReg], &mut usize) = match arg.bank {
            RegBank::GeneralPurpose => (&GP_ARG_REGS, &mut self.gp_cnt),
            RegBank::Xmm => (&XMM_ARG_REGS, &mut self.xmm_cnt),
        };
        if *cnt < regs.len() {
            arg.reg = Some(regs[*cnt]);
            *cnt += 1;
        } else {
            // Each stack slot is 8 bytes in System V
            arg.stack_off = Some(self.stack as i32);
            self.stack += 8;
        }
    }

    fn assign_ret(&mut self, arg: &mut CCAssignment) {
        match arg.bank {
            RegBank::GeneralPurpose => {
                if self.ret_gp_cnt == 0 {
                    arg.reg = Some(AsmReg::RAX);
                    self.ret_gp_cnt += 1;
                }
            }
            RegBank::Xmm => {
                if self.ret_xmm_cnt == 0 {
                    arg.reg = Some(AsmReg::xmm(0));
                    self.ret_xmm_cnt += 1;
                }
            }
        }
    }

    fn reset(&mut self) {
        self.gp_cnt = 0;
        self.xmm_cnt = 0;
        self.stack = 0;
        self.ret_gp_cnt = 0;
        self.ret_xmm_cnt = 0;
    }

    fn get_stack_size(&self) -> u32 {
        self.stack
    }
}

/// Locals area of a frame.
///
/// Layout, from the frame pointer down:
///
/// ```text
/// rbp + 16 + k   incoming stack argument at offset k
/// rbp + 8        return address
/// rbp            saved rbp
/// rbp - 8n       n saved callee-saved registers
/// rbp - 8n - o   lowest byte of the slot at offset o
/// ```
///
/// A slot offset is the distance from the bottom of the callee-save area down to the
/// lowest byte of the slot, so offsets stay valid whatever number of registers the prologue ends up
/// saving.
#[derive(Debug, Clone, Default)]
pub struct StackFrame {
    size: u32,
    /// Released slots by size.
    free: HashMap<u32, Vec<i32>>,
}

impl StackFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes used by slots so far.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Slot of `size` bytes aligned to `align`; reuses a released slot of the same size
    /// when one exists.
    pub fn alloc_slot(&mut self, size: u32, align: u32) -> i32 {
        let size = align_to(u64::from(size.max(1)), 8) as u32;
        if let Some(offset) = self.free.get_mut(&size).and_then(Vec::pop) {
            log::trace!("reusing stack slot {offset} ({size} bytes)");
            return offset;
        }
        self.grow_slot(size, align)
    }

    /// Fresh slot past every existing one, ignoring the free list.
    pub fn grow_slot(&mut self, size: u32, align: u32) -> i32 {
        let size = align_to(u64::from(size.max(1)), 8) as u32;
        // The callee-save area is a multiple of 8 below a 16-aligned rbp.
        self.size = align_to(u64::from(self.size + size), u64::from(align.clamp(1, 8))) as u32;
        self.size as i32
    }

    /// Return a slot to the free list.
    pub fn free_slot(&mut self, offset: i32, size: u32) {
        let size = align_to(u64::from(size.max(1)), 8) as u32;
        self.free.entry(size).or_default().push(offset);
    }

    /// Bytes to subtract from %rsp after pushing `saved` registers so that %rsp is
    /// 16-byte aligned inside the body.
    pub fn stack_adjustment(&self, saved: usize) -> u32 {
        let mut adjust = align_to(u64::from(self.size), 8) as u32;
        if (saved as u32 * 8 + adjust) % 16 != 0 {
            adjust += 8;
        }
        adjust
    }

    /// %rbp-relative displacement of the slot at `offset`.
    pub fn displacement(offset: i32, saved: usize) -> i32 {
        -(saved as i32 * 8) - offset
    }

    /// %rbp-relative displacement of the incoming stack argument at `offset`.
    pub fn incoming_displacement(offset: i32) -> i32 {
        16 + offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysv_gp_argument_assignment() {
        let mut assigner = SysVAssigner::new();

        for i in 0..6 {
            let mut arg = CCAssignment::new(RegBank::GeneralPurpose, 8);
            assigner.assign_arg(&mut arg);
            assert_eq!(arg.reg, Some(GP_ARG_REGS[i]));
            assert!(arg.stack_off.is_none());
        }

        // 7th argument should go to stack
        let mut arg7 = CCAssignment::new(RegBank::GeneralPurpose, 8);
        assigner.assign_arg(&mut arg7);
        assert!(arg7.reg.is_none());
        assert_eq!(arg7.stack_off, Some(0));
        assert_eq!(assigner.get_stack_size(), 8);
    }

    #[test]
    fn test_mixed_banks_count_separately() {
        let mut assigner = SysVAssigner::new();
        let params = [Type::F64, Type::I32, Type::F32, Type::Ptr];
        let assigned = assigner.assign_params(&params);
        assert_eq!(assigned[0].reg, Some(AsmReg::xmm(0)));
        assert_eq!(assigned[1].reg, Some(AsmReg::RDI));
        assert_eq!(assigned[2].reg, Some(AsmReg::xmm(1)));
        assert_eq!(assigned[3].reg, Some(AsmReg::RSI));
        assert_eq!(assigner.xmm_used(), 2);
        assert_eq!(assigner.gp_used(), 2);
    }

    #[test]
    fn test_ninth_float_goes_to_stack() {
        let mut assigner = SysVAssigner::new();
        let assigned = assigner.assign_params(&vec![Type::F64; 9]);
        assert_eq!(assigned[7].reg, Some(AsmReg::xmm(7)));
        assert_eq!(assigned[8].reg, None);
        assert_eq!(assigned[8].stack_off, Some(0));
    }

    #[test]
    fn test_sysv_return_value_assignment() {
        let mut assigner = SysVAssigner::new();
        let mut ret_gp = CCAssignment::for_type(&Type::I64);
        assigner.assign_ret(&mut ret_gp);
        assert_eq!(ret_gp.reg, Some(AsmReg::RAX));

        let mut ret_xmm = CCAssignment::for_type(&Type::F64);
        assigner.assign_ret(&mut ret_xmm);
        assert_eq!(ret_xmm.reg, Some(AsmReg::xmm(0)));
    }

    #[test]
    fn test_register_sets() {
        let assigner = SysVAssigner::new();
        let info = assigner.get_ccinfo();
        assert!(info.callee_saved_regs.contains(AsmReg::R12));
        assert!(!info.caller_saved_regs.contains(AsmReg::RBX));
        assert!(info.caller_saved_regs.contains(AsmReg::R10));
        assert!(info.caller_saved_regs.contains(AsmReg::xmm(13)));
        assert!(!info.allocatable_regs.contains(AsmReg::RAX));
        assert!(!info.allocatable_regs.contains(AsmReg::R11));
        assert!(!info.allocatable_regs.contains(AsmReg::xmm(15)));
        assert_eq!(info.allocatable_regs.count_in_bank(crate::core::GP_BANK), 12);
    }

    #[test]
    fn test_stack_frame_free_list_reuse() {
        let mut frame = StackFrame::new();
        let a = frame.alloc_slot(8, 8);
        let b = frame.alloc_slot(8, 8);
        assert_eq!((a, b), (8, 16));
        frame.free_slot(a, 8);
        // same size comes back from the free list
        assert_eq!(frame.alloc_slot(8, 8), a);
        assert_eq!(frame.size(), 16);
        // a different size grows the frame
        assert_eq!(frame.alloc_slot(24, 8), 40);
        assert_eq!(frame.size(), 40);
    }

    #[test]
    fn test_stack_adjustment_keeps_alignment() {
        let mut frame = StackFrame::new();
        assert_eq!(frame.stack_adjustment(0), 0);
        assert_eq!(frame.stack_adjustment(1), 8);
        frame.alloc_slot(8, 8);
        assert_eq!(frame.stack_adjustment(0), 16);
        assert_eq!(frame.stack_adjustment(1), 8);
        assert_eq!(StackFrame::displacement(8, 2), -24);
        assert_eq!(StackFrame::incoming_displacement(8), 24);
    }
}
