// This module implements linear-scan register allocation over the live intervals of a
// function in destructed form. Intervals are visited by increasing start. Before each one,
// every active interval that ended strictly earlier gives its register back, and every
// spilled interval that ended gives its stack slot back to the frame's free list.
// Some values are fixed to one register by the instruction that consumes or produces
// them: incoming arguments, the copies feeding call arguments, memcpy pointers and
// variable shift counts, and the remainder projection of a division. Fixed intervals
// always get their register and are never spilled. An ordinary interval may not take a
// register owned by a fixed interval it overlaps, nor a register clobbered by a call,
// division or memcpy strictly inside it. When no register is free, the active interval
// ending furthest away is spilled if it outlives the current one; otherwise the current
// interval goes to the stack. Stack allocations get permanent frame slots up front.

//! Linear-scan register allocation for x86-64.

use hashbrown::HashMap;

use super::calling_convention::{allocation_order, CCAssigner, StackFrame, SysVAssigner, CALLEE_SAVED};
use super::codegen::fuses_with_branch;
use crate::analysis::{LiveIntervals, LiveRange};
use crate::core::{AsmReg, CompileError, CompileResult, RegBank, RegBitSet, RegisterFile, GP_BANK, XMM_BANK};
use crate::ir::{FunctionData, InstId, InstKind, Type, Value, ValueId};

/// Where a value lives for its whole interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Reg(AsmReg),
    /// Frame slot at this offset (see [`StackFrame`]).
    Stack(i32),
    /// Incoming stack argument at this offset.
    Incoming(i32),
}

/// Allocation result for one function.
#[derive(Debug, Clone)]
pub struct RegisterAllocation {
    locations: HashMap<ValueId, Location>,
    alloc_slots: HashMap<InstId, i32>,
    /// Callee-saved registers handed out, in push order.
    callee_saved: Vec<AsmReg>,
    frame: StackFrame,
    registers_allocated: usize,
    spills: usize,
}

impl RegisterAllocation {
    pub fn location(&self, value: ValueId) -> Option<Location> {
        self.locations.get(&value).copied()
    }

    /// Frame slot of an `Alloc` instruction.
    pub fn alloc_slot(&self, alloc: InstId) -> Option<i32> {
        self.alloc_slots.get(&alloc).copied()
    }

    pub fn locations(&self) -> impl Iterator<Item = (ValueId, Location)> + '_ {
        self.locations.iter().map(|(&v, &l)| (v, l))
    }

    pub fn callee_saved(&self) -> &[AsmReg] {
        &self.callee_saved
    }

    /// Bytes of frame slots.
    pub fn frame_size(&self) -> u32 {
        self.frame.size()
    }

    /// Bytes the prologue subtracts from %rsp after the callee-saved pushes.
    pub fn stack_adjustment(&self) -> u32 {
        self.frame.stack_adjustment(self.callee_saved.len())
    }

    /// %rbp-relative displacement of a frame slot.
    pub fn slot_displacement(&self, offset: i32) -> i32 {
        StackFrame::displacement(offset, self.callee_saved.len())
    }

    pub fn registers_allocated(&self) -> usize {
        self.registers_allocated
    }

    pub fn spill_count(&self) -> usize {
        self.spills
    }
}

/// Registers clobbered by the instruction at `position`.
#[derive(Debug, Clone, Copy)]
struct ConstraintPoint {
    position: u32,
    clobbers: RegBitSet,
}

#[derive(Debug, Default)]
struct Constraints {
    fixed: HashMap<ValueId, AsmReg>,
    /// Fixed intervals, for overlap exclusion.
    fixed_ranges: Vec<(ValueId, LiveRange, AsmReg)>,
    incoming: Vec<(ValueId, i32)>,
    points: Vec<ConstraintPoint>,
}

impl Constraints {
    fn collect(func: &FunctionData, intervals: &LiveIntervals) -> CompileResult<Self> {
        let mut assigner = SysVAssigner::new();
        let caller_saved = assigner.get_ccinfo().caller_saved_regs;
        let mut this = Self::default();

        for (i, a) in assigner.assign_params(&func.prototype().params).iter().enumerate() {
            let value = ValueId::Arg(i as u32);
            match (a.reg, a.stack_off) {
                (Some(reg), _) => {
                    this.fixed.insert(value, reg);
                }
                (None, Some(offset)) => this.incoming.push((value, offset)),
                (None, None) => {}
            }
        }

        // unreachable blocks have no positions and are never emitted
        for id in numbered_instructions(func, intervals) {
            let inst = &func[id];
            match &inst.kind {
                InstKind::Call { .. } | InstKind::IndirectCall => {
                    let first = usize::from(matches!(inst.kind, InstKind::IndirectCall));
                    let args = &inst.operands[first..];
                    let types: Vec<Type> = args.iter().map(|v| arg_type(func, v)).collect();
                    for (arg, a) in args.iter().zip(assigner.assign_params(&types)) {
                        if let Some(reg) = a.reg {
                            this.pin_copy(func, arg, reg);
                        }
                    }
                    this.points.push(ConstraintPoint { position: intervals.position(id)?, clobbers: caller_saved });
                }
                InstKind::Memcpy { .. } => {
                    this.pin_copy(func, &inst.operands[0], AsmReg::RDI);
                    this.pin_copy(func, &inst.operands[1], AsmReg::RSI);
                    this.points.push(ConstraintPoint {
                        position: intervals.position(id)?,
                        clobbers: RegBitSet::from_regs(&[AsmReg::RCX, AsmReg::RSI, AsmReg::RDI]),
                    });
                }
                InstKind::Binary(op) if op.is_shift() => {
                    this.pin_copy(func, &inst.operands[1], AsmReg::RCX);
                }
                InstKind::DivRem => {
                    this.points.push(ConstraintPoint {
                        position: intervals.position(id)?,
                        clobbers: RegBitSet::from_regs(&[AsmReg::RDX]),
                    });
                }
                InstKind::Projection { index: 1 } => {
                    this.fixed.insert(ValueId::Inst(id), AsmReg::RDX);
                }
                _ => {}
            }
        }

        for (&value, &reg) in &this.fixed {
            if let Ok(range) = intervals.range(value) {
                this.fixed_ranges.push((value, range, reg));
            }
        }
        Ok(this)
    }

    /// Fix `value` to `reg` when it is a copy made for exactly this use.
    fn pin_copy(&mut self, func: &FunctionData, value: &Value, reg: AsmReg) {
        let Some(copy) = value.as_local() else { return };
        if matches!(func[copy].kind, InstKind::Copy) && func.users(copy).len() == 1 {
            self.fixed.insert(ValueId::Inst(copy), reg);
        }
    }

    /// Registers an ordinary interval `range` of `value` may not take.
    fn excluded(&self, value: ValueId, range: LiveRange) -> RegBitSet {
        let mut set = RegBitSet::new();
        for &(other, fixed, reg) in &self.fixed_ranges {
            if other != value && fixed.intersects(&range) {
                set.set(reg);
            }
        }
        for point in &self.points {
            if range.crosses(point.position) {
                set.union(&point.clobbers);
            }
        }
        set
    }
}

fn numbered_instructions<'f>(
    func: &'f FunctionData,
    intervals: &'f LiveIntervals,
) -> impl Iterator<Item = InstId> + 'f {
    intervals.blocks().iter().flat_map(move |&block| func[block].insts.iter().copied())
}

fn arg_type(func: &FunctionData, value: &Value) -> Type {
    match func.value_type(value) {
        Type::Undef => Type::I64,
        ty => ty,
    }
}

/// Register bank of values of type `ty`.
pub fn bank_of(ty: &Type) -> RegBank {
    if ty.is_float() {
        XMM_BANK
    } else {
        GP_BANK
    }
}

/// Whether `value` needs a location of its own.
fn needs_location(func: &FunctionData, value: ValueId) -> bool {
    let ValueId::Inst(id) = value else {
        return true;
    };
    let Some(inst) = func.inst(id) else {
        return false;
    };
    if matches!(inst.kind, InstKind::Alloc { .. } | InstKind::Move { .. }) {
        return false;
    }
    if matches!(inst.ty, Type::Void | Type::Tuple(_) | Type::Undef) {
        return false;
    }
    !fuses_with_branch(func, id)
}

struct Active {
    value: ValueId,
    range: LiveRange,
    reg: AsmReg,
    fixed: bool,
}

struct LinearScan {
    regs: RegisterFile,
    frame: StackFrame,
    active: Vec<Active>,
    /// Spilled intervals whose slot returns to the free list when they end.
    on_stack: Vec<(LiveRange, i32)>,
    locations: HashMap<ValueId, Location>,
    registers_allocated: usize,
    spills: usize,
}

impl LinearScan {
    fn expire(&mut self, point: u32) -> CompileResult<()> {
        let mut i = 0;
        while i < self.active.len() {
            if self.active[i].range.end < point {
                let gone = self.active.swap_remove(i);
                self.regs.release(gone.reg)?;
            } else {
                i += 1;
            }
        }
        let frame = &mut self.frame;
        self.on_stack.retain(|&(range, slot)| {
            if range.end < point {
                frame.free_slot(slot, 8);
                false
            } else {
                true
            }
        });
        Ok(())
    }

    fn assign(&mut self, value: ValueId, range: LiveRange, reg: AsmReg, fixed: bool) -> CompileResult<()> {
        self.regs.assign(reg, value)?;
        self.locations.insert(value, Location::Reg(reg));
        self.active.push(Active { value, range, reg, fixed });
        self.registers_allocated += 1;
        log::trace!("{value} {range} -> {reg}");
        Ok(())
    }

    /// Put `value` on the stack. `fresh` must be set when the interval started before the
    /// current point: slots on the free list may still be in use earlier in its range.
    fn spill(&mut self, value: ValueId, range: LiveRange, fresh: bool) {
        let slot = if fresh { self.frame.grow_slot(8, 8) } else { self.frame.alloc_slot(8, 8) };
        self.locations.insert(value, Location::Stack(slot));
        self.on_stack.push((range, slot));
        self.spills += 1;
        log::trace!("{value} {range} spilled to slot {slot}");
    }

    /// Take the register of active interval `index` away and spill it.
    fn evict(&mut self, index: usize) -> CompileResult<AsmReg> {
        let victim = self.active.swap_remove(index);
        self.regs.release(victim.reg)?;
        self.registers_allocated -= 1;
        self.spill(victim.value, victim.range, true);
        Ok(victim.reg)
    }

    fn take_fixed(&mut self, value: ValueId, range: LiveRange, reg: AsmReg) -> CompileResult<()> {
        if let Some(owner) = self.regs.owner(reg) {
            let index = self
                .active
                .iter()
                .position(|a| a.value == owner)
                .ok_or_else(|| CompileError::regalloc(format!("{reg} is held by inactive {owner}")))?;
            if self.active[index].fixed {
                return Err(CompileError::regalloc(format!(
                    "{value} needs {reg}, which is fixed to overlapping {owner}"
                )));
            }
            self.evict(index)?;
        }
        self.assign(value, range, reg, true)
    }

    fn take_any(&mut self, value: ValueId, range: LiveRange, bank: RegBank, exclude: &RegBitSet) -> CompileResult<()> {
        if let Some(reg) = self.regs.find_free(bank, exclude) {
            return self.assign(value, range, reg, false);
        }
        let victim = self
            .active
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.fixed && a.reg.bank == bank && !exclude.contains(a.reg))
            .max_by_key(|(_, a)| a.range.end)
            .map(|(i, a)| (i, a.range.end));
        match victim {
            Some((index, end)) if end > range.end => {
                let reg = self.evict(index)?;
                self.assign(value, range, reg, false)
            }
            _ => {
                self.spill(value, range, false);
                Ok(())
            }
        }
    }
}

/// Allocate every value of `func` (in destructed form) to a register or a stack slot.
pub fn allocate_registers(func: &FunctionData, intervals: &LiveIntervals) -> CompileResult<RegisterAllocation> {
    let constraints = Constraints::collect(func, intervals)?;
    let mut scan = LinearScan {
        regs: RegisterFile::new(&allocation_order()),
        frame: StackFrame::new(),
        active: Vec::new(),
        on_stack: Vec::new(),
        locations: HashMap::new(),
        registers_allocated: 0,
        spills: 0,
    };

    let mut alloc_slots = HashMap::new();
    for id in numbered_instructions(func, intervals) {
        if let InstKind::Alloc { allocated } = &func[id].kind {
            let slot = scan.frame.alloc_slot(allocated.size_of() as u32, allocated.align_of() as u32);
            alloc_slots.insert(id, slot);
        }
    }
    for &(value, offset) in &constraints.incoming {
        scan.locations.insert(value, Location::Incoming(offset));
    }

    for (value, range) in intervals.sorted() {
        if scan.locations.contains_key(&value) || !needs_location(func, value) {
            continue;
        }
        scan.expire(range.begin)?;
        if let Some(&reg) = constraints.fixed.get(&value) {
            scan.take_fixed(value, range, reg)?;
            continue;
        }
        let bank = bank_of(&func.value_type(&Value::from(value)));
        let exclude = constraints.excluded(value, range);
        scan.take_any(value, range, bank, &exclude)?;
    }

    let clobbered = scan.regs.clobbered();
    let callee_saved: Vec<AsmReg> = CALLEE_SAVED.iter().copied().filter(|&r| clobbered.contains(r)).collect();
    log::debug!(
        "regalloc @{}: {} in registers, {} spilled, {} frame bytes, saving {:?}",
        func.name(),
        scan.registers_allocated,
        scan.spills,
        scan.frame.size(),
        callee_saved
    );
    Ok(RegisterAllocation {
        locations: scan.locations,
        alloc_slots,
        callee_saved,
        frame: scan.frame,
        registers_allocated: scan.registers_allocated,
        spills: scan.spills,
    })
}
