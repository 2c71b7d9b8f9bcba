// This module turns one register-allocated function into an x86-64 instruction list.
// Blocks are emitted in the same linear order the live intervals were numbered in, so a
// branch to the next block falls through. Every value has one location for its whole
// interval; an instruction reads its operands from their locations into the scratch
// registers (%rax and %r11 for integers, %xmm14 and %xmm15 for floats), computes there,
// and writes the result back to the location of its result. Registers pinned by the
// allocator (argument registers, %rcx for shift counts, %rdx for remainders, %rdi and
// %rsi for memcpy) are checked rather than trusted. Integer constants that fit a
// sign-extended 32-bit immediate are encoded inline; wider ones and every float constant
// are read from the constant pool by label. The prologue saves %rbp and the callee-saved
// registers the allocator handed out and reserves an aligned frame; each return restores
// them inline.

//! x86-64 instruction selection.

use hashbrown::HashSet;

use super::asm::{Cond, IntOp, MacroAssembler, Mnemonic, Operand, Plain, Precision, SseOp};
use super::calling_convention::{StackFrame, SysVAssigner};
use super::regalloc::{Location, RegisterAllocation};
use super::unit::{CompiledFunction, PoolEntry};
use crate::core::{AsmReg, CompileError, CompileResult, FunctionStats};
use crate::ir::{
    BinaryOp, BlockId, CastOp, CmpPredicate, Constant, FunctionData, InstId, InstKind, Intrinsic, Module, Type,
    UnaryOp, Value, ValueId,
};

const RAX: AsmReg = AsmReg::RAX;
const R11: AsmReg = AsmReg::R11;
const XMM14: AsmReg = AsmReg::xmm(14);
const XMM15: AsmReg = AsmReg::xmm(15);

/// What the code generator needs to know about the symbols of a module.
#[derive(Debug, Clone, Default)]
pub struct ModuleSymbols {
    variadic: HashSet<String>,
    external: HashSet<String>,
}

impl ModuleSymbols {
    pub fn collect(module: &Module) -> Self {
        let mut symbols = Self::default();
        let protos = module.functions().iter().map(FunctionData::prototype).chain(module.externs());
        for proto in protos {
            if proto.variadic {
                symbols.variadic.insert(proto.name.clone());
            }
        }
        symbols.external.extend(module.externs().iter().map(|p| p.name.clone()));
        symbols
            .external
            .extend(module.globals().iter().filter(|g| g.is_external()).map(|g| g.name.to_string()));
        symbols
    }

    pub fn is_external(&self, name: &str) -> bool {
        self.external.contains(name)
    }

    pub fn is_variadic(&self, name: &str) -> bool {
        self.variadic.contains(name)
    }
}

/// Whether the comparison `id` is emitted as part of the conditional branch right after
/// it instead of producing a value.
pub(crate) fn fuses_with_branch(func: &FunctionData, id: InstId) -> bool {
    let Some(inst) = func.inst(id) else {
        return false;
    };
    if !matches!(inst.kind, InstKind::Icmp(_)) {
        return false;
    }
    let users = func.users(id);
    let [user] = users.as_slice() else {
        return false;
    };
    let Some(branch) = func.inst(*user) else {
        return false;
    };
    if !matches!(branch.kind, InstKind::CondBranch { .. }) || branch.block != inst.block {
        return false;
    }
    match (func.position_in_block(id), func.position_in_block(*user)) {
        (Some(a), Some(b)) => b == a + 1,
        _ => false,
    }
}

/// Width of integer operations on `ty`: 8 for 64-bit types, 4 otherwise.
fn gp_width(ty: &Type) -> u32 {
    if ty.size_of() == 8 {
        8
    } else {
        4
    }
}

/// Size of `ty` as a memory access.
fn native_size(ty: &Type) -> u32 {
    ty.size_of().clamp(1, 8) as u32
}

fn precision(ty: &Type) -> Precision {
    match ty {
        Type::F32 => Precision::Single,
        _ => Precision::Double,
    }
}

fn float_op(op: SseOp, ty: &Type) -> Mnemonic {
    Mnemonic::Sse(op, precision(ty))
}

fn fmov(ty: &Type) -> Mnemonic {
    float_op(SseOp::Mov, ty)
}

fn sized(op: Operand, size: u32) -> Operand {
    match op {
        Operand::Reg { reg, .. } => Operand::Reg { reg, size },
        other => other,
    }
}

/// Immediate encoding of `c` in an operation of `width` bytes.
fn immediate(c: &Constant, width: u32) -> Option<i64> {
    if c.ty.is_float() {
        return None;
    }
    match width {
        1 => Some(c.bits as u8 as i8 as i64),
        2 => Some(c.bits as u16 as i16 as i64),
        4 => Some(c.bits as u32 as i32 as i64),
        _ => {
            let v = c.as_i64();
            i32::try_from(v).is_ok().then_some(v)
        }
    }
}

fn icmp_cc(pred: CmpPredicate, signed: bool) -> Cond {
    match (pred, signed) {
        (CmpPredicate::Eq, _) => Cond::E,
        (CmpPredicate::Ne, _) => Cond::Ne,
        (CmpPredicate::Lt, true) => Cond::L,
        (CmpPredicate::Le, true) => Cond::Le,
        (CmpPredicate::Gt, true) => Cond::G,
        (CmpPredicate::Ge, true) => Cond::Ge,
        (CmpPredicate::Lt, false) => Cond::B,
        (CmpPredicate::Le, false) => Cond::Be,
        (CmpPredicate::Gt, false) => Cond::A,
        (CmpPredicate::Ge, false) => Cond::Ae,
    }
}

/// Generates the body of one function.
pub struct FunctionCodegen<'a> {
    func: &'a FunctionData,
    order: &'a [BlockId],
    alloc: &'a RegisterAllocation,
    symbols: &'a ModuleSymbols,
    pic: bool,
    asm: MacroAssembler,
    pool: Vec<PoolEntry>,
    /// Block being emitted, by index into `order`.
    current: usize,
    local_labels: usize,
}

impl<'a> FunctionCodegen<'a> {
    pub fn new(
        func: &'a FunctionData,
        order: &'a [BlockId],
        alloc: &'a RegisterAllocation,
        symbols: &'a ModuleSymbols,
        pic: bool,
    ) -> Self {
        Self {
            func,
            order,
            alloc,
            symbols,
            pic,
            asm: MacroAssembler::new(),
            pool: Vec::new(),
            current: 0,
            local_labels: 0,
        }
    }

    fn err(&self, reason: impl std::fmt::Display) -> CompileError {
        CompileError::codegen(format!("@{}: {reason}", self.func.name()))
    }

    fn block_label(&self, block: BlockId) -> String {
        format!(".L{}_{block}", self.func.name())
    }

    fn is_next(&self, block: BlockId) -> bool {
        self.order.get(self.current + 1) == Some(&block)
    }

    fn pool_ref(&mut self, constant: Constant) -> Operand {
        let entry = PoolEntry::new(constant);
        let op = Operand::rip(entry.label());
        if !self.pool.contains(&entry) {
            self.pool.push(entry);
        }
        op
    }

    fn location(&self, value: ValueId) -> CompileResult<Operand> {
        match self.alloc.location(value) {
            Some(Location::Reg(reg)) => Ok(Operand::q(reg)),
            Some(Location::Stack(offset)) => Ok(Operand::mem(AsmReg::RBP, self.alloc.slot_displacement(offset))),
            Some(Location::Incoming(offset)) => {
                Ok(Operand::mem(AsmReg::RBP, StackFrame::incoming_displacement(offset)))
            }
            None => Err(self.err(format!("{value} has no location"))),
        }
    }

    fn reg_of(&self, value: &Value) -> Option<AsmReg> {
        match value.value_id().and_then(|v| self.alloc.location(v)) {
            Some(Location::Reg(reg)) => Some(reg),
            _ => None,
        }
    }

    /// Frame address of `value` when it is the result of an `Alloc`.
    fn alloc_address(&self, value: &Value) -> Option<Operand> {
        let id = value.as_local()?;
        let slot = self.alloc.alloc_slot(id)?;
        Some(Operand::mem(AsmReg::RBP, self.alloc.slot_displacement(slot)))
    }

    fn global_via_got(&self, name: &str) -> bool {
        self.pic && self.symbols.is_external(name)
    }

    /// Read `value` into `reg`.
    fn load(&mut self, value: &Value, reg: AsmReg) -> CompileResult<()> {
        let ty = self.func.value_type(value);
        if reg.is_xmm() {
            return self.load_float(value, &ty, reg);
        }
        if let Some(addr) = self.alloc_address(value) {
            self.asm.lea(addr, reg);
            return Ok(());
        }
        match value {
            Value::Constant(c) => {
                let width = gp_width(&c.ty);
                match immediate(c, width) {
                    Some(imm) => self.asm.mov(width, Operand::Imm(imm), Operand::reg(reg, width)),
                    None => {
                        let src = self.pool_ref(c.clone());
                        self.asm.mov(width, src, Operand::reg(reg, width));
                    }
                }
            }
            Value::Global(name) if self.global_via_got(name) => {
                self.asm.mov(8, Operand::got(name.to_string()), Operand::q(reg));
            }
            Value::Global(name) => self.asm.lea(Operand::rip(name.to_string()), reg),
            Value::Undef => self.asm.mov(4, Operand::Imm(0), Operand::reg(reg, 4)),
            Value::Local(_) | Value::Argument(_) => {
                let id = value.value_id().ok_or_else(|| self.err("operand without identity"))?;
                let src = self.location(id)?;
                if src.as_reg() != Some(reg) {
                    let width = gp_width(&ty);
                    self.asm.mov(width, sized(src, width), Operand::reg(reg, width));
                }
            }
        }
        Ok(())
    }

    fn load_float(&mut self, value: &Value, ty: &Type, reg: AsmReg) -> CompileResult<()> {
        match value {
            Value::Constant(c) => {
                let src = self.pool_ref(c.clone());
                self.asm.emit(fmov(&c.ty), vec![src, Operand::q(reg)]);
            }
            Value::Undef => self.asm.emit(Plain::Xorps, vec![Operand::q(reg), Operand::q(reg)]),
            Value::Local(_) | Value::Argument(_) => {
                let id = value.value_id().ok_or_else(|| self.err("operand without identity"))?;
                let src = self.location(id)?;
                if src.as_reg() != Some(reg) {
                    self.asm.emit(fmov(ty), vec![src, Operand::q(reg)]);
                }
            }
            Value::Global(_) => return Err(self.err(format!("address {value} used as a float"))),
        }
        Ok(())
    }

    /// Read `value` into the 64-bit `reg`, sign- or zero-extended from its width.
    fn load_ext(&mut self, value: &Value, reg: AsmReg, signed: bool) -> CompileResult<()> {
        let ty = self.func.value_type(value);
        let size = native_size(&ty);
        if size == 8 || matches!(value, Value::Global(_) | Value::Undef) || self.alloc_address(value).is_some() {
            return self.load(value, reg);
        }
        if let Value::Constant(c) = value {
            if signed {
                self.asm.mov(8, Operand::Imm(c.as_i64()), Operand::q(reg));
            } else {
                self.asm.mov(4, Operand::Imm(c.bits as i64), Operand::reg(reg, 4));
            }
            return Ok(());
        }
        let id = value.value_id().ok_or_else(|| self.err("operand without identity"))?;
        let src = sized(self.location(id)?, size);
        let signed = signed && !matches!(ty, Type::Bool);
        let (mnemonic, dst) = match (size, signed) {
            (1, true) => (Mnemonic::from(Plain::Movsbq), Operand::q(reg)),
            (2, true) => (Plain::Movswq.into(), Operand::q(reg)),
            (4, true) => (Plain::Movslq.into(), Operand::q(reg)),
            (1, false) => (Plain::Movzbl.into(), Operand::reg(reg, 4)),
            (2, false) => (Plain::Movzwl.into(), Operand::reg(reg, 4)),
            _ => (Mnemonic::Int(IntOp::Mov, 4), Operand::reg(reg, 4)),
        };
        self.asm.emit(mnemonic, vec![src, dst]);
        Ok(())
    }

    /// Source operand for an integer operation of `width` bytes. May use %r11.
    fn source(&mut self, value: &Value, width: u32) -> CompileResult<Operand> {
        if self.alloc_address(value).is_some() || matches!(value, Value::Global(_)) {
            self.load(value, R11)?;
            return Ok(Operand::reg(R11, width));
        }
        match value {
            Value::Constant(c) => Ok(match immediate(c, width) {
                Some(imm) => Operand::Imm(imm),
                None => self.pool_ref(c.clone()),
            }),
            Value::Undef => Ok(Operand::Imm(0)),
            _ => {
                let id = value.value_id().ok_or_else(|| self.err("operand without identity"))?;
                Ok(sized(self.location(id)?, width))
            }
        }
    }

    /// Source operand for a float operation.
    fn float_source(&mut self, value: &Value, ty: &Type) -> CompileResult<Operand> {
        match value {
            Value::Constant(c) => Ok(self.pool_ref(c.clone())),
            Value::Undef => Ok(self.pool_ref(Constant::new(ty.clone(), 0))),
            _ => {
                let id = value.value_id().ok_or_else(|| self.err(format!("{value} used as a float")))?;
                self.location(id)
            }
        }
    }

    /// Write `reg` to the location of `dst`.
    fn store(&mut self, reg: AsmReg, dst: ValueId, ty: &Type) -> CompileResult<()> {
        if self.alloc.location(dst).is_none() {
            return Ok(());
        }
        let loc = self.location(dst)?;
        if loc.as_reg() == Some(reg) {
            return Ok(());
        }
        if reg.is_xmm() {
            self.asm.emit(fmov(ty), vec![Operand::q(reg), loc]);
        } else {
            let width = gp_width(ty);
            self.asm.mov(width, Operand::reg(reg, width), sized(loc, width));
        }
        Ok(())
    }

    /// Register to compute a result of type `ty` for `dst` in: the destination register
    /// itself when that is safe, the scratch register otherwise.
    fn target(&self, dst: ValueId, ty: &Type, avoid: &[&Value]) -> AsmReg {
        let scratch = if ty.is_float() { XMM15 } else { RAX };
        match self.alloc.location(dst) {
            Some(Location::Reg(reg)) if avoid.iter().all(|v| self.reg_of(v) != Some(reg)) => reg,
            _ => scratch,
        }
    }

    /// Emit the whole function.
    pub fn generate(mut self) -> CompileResult<CompiledFunction> {
        let (func, order) = (self.func, self.order);
        self.prologue();
        for (index, &block) in order.iter().enumerate() {
            self.current = index;
            let label = self.block_label(block);
            self.asm.label(label);
            for &id in &func[block].insts {
                self.instruction(id)?;
            }
        }
        log::debug!(
            "codegen @{}: {} instructions, {} pool entries",
            self.func.name(),
            self.asm.instruction_count(),
            self.pool.len()
        );
        let stats = FunctionStats {
            instructions_emitted: self.asm.instruction_count(),
            registers_allocated: self.alloc.registers_allocated(),
            spills_generated: self.alloc.spill_count(),
            moves_inserted: 0,
            frame_size: self.alloc.frame_size(),
        };
        Ok(CompiledFunction { name: self.func.name().to_string(), asm: self.asm, pool: self.pool, stats })
    }

    fn prologue(&mut self) {
        self.asm.push(AsmReg::RBP);
        self.asm.mov(8, Operand::q(AsmReg::RSP), Operand::q(AsmReg::RBP));
        for &reg in self.alloc.callee_saved() {
            self.asm.push(reg);
        }
        let adjust = self.alloc.stack_adjustment();
        if adjust > 0 {
            self.asm.int(IntOp::Sub, 8, vec![Operand::Imm(i64::from(adjust)), Operand::q(AsmReg::RSP)]);
        }
    }

    fn epilogue(&mut self) {
        let saved = self.alloc.callee_saved();
        if saved.is_empty() {
            self.asm.mov(8, Operand::q(AsmReg::RBP), Operand::q(AsmReg::RSP));
        } else {
            let disp = -(saved.len() as i32 * 8);
            self.asm.lea(Operand::mem(AsmReg::RBP, disp), AsmReg::RSP);
            for &reg in saved.iter().rev() {
                self.asm.pop(reg);
            }
        }
        self.asm.pop(AsmReg::RBP);
        self.asm.ret();
    }

    fn instruction(&mut self, id: InstId) -> CompileResult<()> {
        let func = self.func;
        let inst = &func[id];
        let ops = &inst.operands;
        let dst = ValueId::Inst(id);
        match &inst.kind {
            InstKind::Binary(op) if inst.ty.is_float() => self.float_binary(*op, dst, &inst.ty, &ops[0], &ops[1]),
            InstKind::Binary(op) if op.is_shift() => self.shift(*op, dst, &inst.ty, &ops[0], &ops[1]),
            InstKind::Binary(BinaryOp::Div | BinaryOp::Rem) => {
                Err(self.err(format!("{id}: integer division reached code generation unlowered")))
            }
            InstKind::Binary(op) => self.int_binary(*op, dst, &inst.ty, &ops[0], &ops[1]),
            InstKind::Unary(op) => self.unary(*op, dst, &inst.ty, &ops[0]),
            InstKind::Icmp(_) if fuses_with_branch(func, id) => Ok(()),
            InstKind::Icmp(pred) => {
                let cc = self.compare(*pred, &ops[0], &ops[1])?;
                self.materialize_flag(cc, dst)
            }
            InstKind::Fcmp(pred) => self.fcmp(*pred, dst, &ops[0], &ops[1]),
            InstKind::Alloc { .. } => Ok(()),
            InstKind::Load => self.load_inst(dst, &inst.ty, &ops[0]),
            InstKind::Store => self.store_inst(&ops[0], &ops[1]),
            InstKind::GetElementPtr { elem } => self.gep(dst, elem, &ops[0], &ops[1]),
            InstKind::GetFieldPtr { agg, field } => {
                let offset = match agg {
                    Type::Struct(s) => s.field_offset(*field),
                    Type::Array(elem, len) if (*field as u64) < *len => Some(elem.size_of() * *field as u64),
                    _ => None,
                }
                .ok_or_else(|| self.err(format!("{id}: no field {field} in {agg}")))?;
                self.load(&ops[0], RAX)?;
                if offset != 0 {
                    self.asm.lea(Operand::mem(RAX, offset as i32), RAX);
                }
                self.store(RAX, dst, &Type::Ptr)
            }
            InstKind::Cast(op) => self.cast(*op, dst, &inst.ty, &ops[0]),
            InstKind::Call { callee } => self.call(dst, &inst.ty, Some(&**callee), None, ops),
            InstKind::IndirectCall => self.call(dst, &inst.ty, None, Some(&ops[0]), &ops[1..]),
            InstKind::Intrinsic(Intrinsic::Trap) => {
                self.asm.emit(Plain::Ud2, Vec::new());
                Ok(())
            }
            InstKind::Intrinsic(Intrinsic::Bswap) => self.bswap(dst, &inst.ty, &ops[0]),
            InstKind::Memcpy { len } => self.memcpy(&ops[0], &ops[1], *len),
            InstKind::Select => self.select(dst, &inst.ty, &ops[0], &ops[1], &ops[2]),
            InstKind::Phi { .. } => Err(self.err(format!("{id}: phi left in destructed form"))),
            InstKind::DivRem => self.divrem(&inst.ty, &ops[0], &ops[1]),
            InstKind::Projection { index } => self.projection(id, *index, &ops[0]),
            InstKind::Copy => self.copy(&ops[0], dst, &inst.ty),
            InstKind::Move { dst: target } => self.copy(&ops[0], ValueId::Inst(*target), &inst.ty),
            InstKind::Branch { target } => {
                if !self.is_next(*target) {
                    let label = self.block_label(*target);
                    self.asm.jmp(&label);
                }
                Ok(())
            }
            InstKind::CondBranch { on_true, on_false } => self.cond_branch(&ops[0], *on_true, *on_false),
            InstKind::Switch { default, cases } => self.switch(&ops[0], *default, cases),
            InstKind::Return => {
                if let Some(value) = ops.first() {
                    let ty = func.value_type(value);
                    let reg = if ty.is_float() { AsmReg::xmm(0) } else { RAX };
                    self.load(value, reg)?;
                }
                self.epilogue();
                Ok(())
            }
        }
    }

    fn int_binary(&mut self, op: BinaryOp, dst: ValueId, ty: &Type, a: &Value, b: &Value) -> CompileResult<()> {
        let width = gp_width(ty);
        let int_op = match op {
            BinaryOp::Add => IntOp::Add,
            BinaryOp::Sub => IntOp::Sub,
            BinaryOp::Mul => IntOp::Imul,
            BinaryOp::And => IntOp::And,
            BinaryOp::Or => IntOp::Or,
            BinaryOp::Xor => IntOp::Xor,
            _ => return Err(self.err(format!("no integer lowering for {op}"))),
        };
        let reg = self.target(dst, ty, &[b]);
        let src = self.source(b, width)?;
        self.load(a, reg)?;
        self.asm.int(int_op, width, vec![src, Operand::reg(reg, width)]);
        self.store(reg, dst, ty)
    }

    fn shift(&mut self, op: BinaryOp, dst: ValueId, ty: &Type, a: &Value, count: &Value) -> CompileResult<()> {
        let width = gp_width(ty);
        let count = match count {
            Value::Constant(c) => Operand::Imm((c.bits & u64::from(width * 8 - 1)) as i64),
            _ if self.reg_of(count) == Some(AsmReg::RCX) => Operand::reg(AsmReg::RCX, 1),
            _ => return Err(self.err(format!("shift count {count} is not in %rcx"))),
        };
        let int_op = match op {
            BinaryOp::Shl => {
                self.load(a, RAX)?;
                IntOp::Shl
            }
            BinaryOp::Shr => {
                self.load_ext(a, RAX, false)?;
                IntOp::Shr
            }
            _ => {
                self.load_ext(a, RAX, true)?;
                IntOp::Sar
            }
        };
        self.asm.int(int_op, width, vec![count, Operand::reg(RAX, width)]);
        self.store(RAX, dst, ty)
    }

    fn float_binary(&mut self, op: BinaryOp, dst: ValueId, ty: &Type, a: &Value, b: &Value) -> CompileResult<()> {
        if op == BinaryOp::Xor {
            // sign flip: b is the mask
            self.load(a, XMM15)?;
            self.load(b, XMM14)?;
            let xor = if *ty == Type::F32 { Plain::Xorps } else { Plain::Xorpd };
            self.asm.emit(xor, vec![Operand::q(XMM14), Operand::q(XMM15)]);
            return self.store(XMM15, dst, ty);
        }
        let sse_op = match op {
            BinaryOp::Add => SseOp::Add,
            BinaryOp::Sub => SseOp::Sub,
            BinaryOp::Mul => SseOp::Mul,
            BinaryOp::Div => SseOp::Div,
            _ => return Err(self.err(format!("no float lowering for {op}"))),
        };
        let src = self.float_source(b, ty)?;
        self.load(a, XMM15)?;
        self.asm.emit(float_op(sse_op, ty), vec![src, Operand::q(XMM15)]);
        self.store(XMM15, dst, ty)
    }

    fn unary(&mut self, op: UnaryOp, dst: ValueId, ty: &Type, a: &Value) -> CompileResult<()> {
        if ty.is_float() {
            return Err(self.err("float negation reached code generation unlowered"));
        }
        let width = gp_width(ty);
        self.load(a, RAX)?;
        match (op, ty) {
            (UnaryOp::Not, Type::Bool) => self.asm.int(IntOp::Xor, 4, vec![Operand::Imm(1), Operand::reg(RAX, 4)]),
            (UnaryOp::Not, _) => self.asm.int(IntOp::Not, width, vec![Operand::reg(RAX, width)]),
            (UnaryOp::Neg, _) => self.asm.int(IntOp::Neg, width, vec![Operand::reg(RAX, width)]),
        }
        self.store(RAX, dst, ty)
    }

    /// Compare `a` with `b`; returns the condition code of `a pred b`.
    fn compare(&mut self, pred: CmpPredicate, a: &Value, b: &Value) -> CompileResult<Cond> {
        let ty = self.func.value_type(a);
        let size = native_size(&ty);
        let src = self.source(b, size)?;
        self.load(a, RAX)?;
        self.asm.int(IntOp::Cmp, size, vec![src, Operand::reg(RAX, size)]);
        Ok(icmp_cc(pred, ty.is_signed()))
    }

    fn materialize_flag(&mut self, cc: Cond, dst: ValueId) -> CompileResult<()> {
        self.asm.emit(Mnemonic::Setcc(cc), vec![Operand::reg(RAX, 1)]);
        self.asm.emit(Plain::Movzbl, vec![Operand::reg(RAX, 1), Operand::reg(RAX, 4)]);
        self.store(RAX, dst, &Type::Bool)
    }

    fn fcmp(&mut self, pred: CmpPredicate, dst: ValueId, a: &Value, b: &Value) -> CompileResult<()> {
        let ty = self.func.value_type(a);
        // ucomis sets CF/ZF like an unsigned compare; below/below-equal also hold for
        // unordered operands, so lt/le swap the operands and test above instead
        let (lhs, rhs) = match pred {
            CmpPredicate::Lt | CmpPredicate::Le => (b, a),
            _ => (a, b),
        };
        let src = self.float_source(rhs, &ty)?;
        self.load(lhs, XMM15)?;
        self.asm.emit(float_op(SseOp::Ucomis, &ty), vec![src, Operand::q(XMM15)]);
        let al = Operand::reg(RAX, 1);
        let r11b = Operand::reg(R11, 1);
        match pred {
            CmpPredicate::Eq => {
                self.asm.emit(Mnemonic::Setcc(Cond::E), vec![al.clone()]);
                self.asm.emit(Mnemonic::Setcc(Cond::Np), vec![r11b.clone()]);
                self.asm.int(IntOp::And, 1, vec![r11b, al]);
            }
            CmpPredicate::Ne => {
                self.asm.emit(Mnemonic::Setcc(Cond::Ne), vec![al.clone()]);
                self.asm.emit(Mnemonic::Setcc(Cond::P), vec![r11b.clone()]);
                self.asm.int(IntOp::Or, 1, vec![r11b, al]);
            }
            CmpPredicate::Gt | CmpPredicate::Lt => self.asm.emit(Mnemonic::Setcc(Cond::A), vec![al]),
            CmpPredicate::Ge | CmpPredicate::Le => self.asm.emit(Mnemonic::Setcc(Cond::Ae), vec![al]),
        }
        self.asm.emit(Plain::Movzbl, vec![Operand::reg(RAX, 1), Operand::reg(RAX, 4)]);
        self.store(RAX, dst, &Type::Bool)
    }

    /// Memory operand for the address in `ptr`. May use %r11.
    fn address(&mut self, ptr: &Value) -> CompileResult<Operand> {
        if let Some(addr) = self.alloc_address(ptr) {
            return Ok(addr);
        }
        match ptr {
            Value::Global(name) if !self.global_via_got(name) => Ok(Operand::rip(name.to_string())),
            _ => {
                self.load(ptr, R11)?;
                Ok(Operand::mem(R11, 0))
            }
        }
    }

    fn load_inst(&mut self, dst: ValueId, ty: &Type, ptr: &Value) -> CompileResult<()> {
        if !ty.is_scalar() {
            return Err(CompileError::UnsupportedType { operation: "load", ty: ty.to_string() });
        }
        let addr = self.address(ptr)?;
        if ty.is_float() {
            self.asm.emit(fmov(ty), vec![addr, Operand::q(XMM15)]);
            return self.store(XMM15, dst, ty);
        }
        let signed = ty.is_signed();
        match (native_size(ty), signed) {
            (1, true) => self.asm.emit(Plain::Movsbl, vec![addr, Operand::reg(RAX, 4)]),
            (1, false) => self.asm.emit(Plain::Movzbl, vec![addr, Operand::reg(RAX, 4)]),
            (2, true) => self.asm.emit(Plain::Movswl, vec![addr, Operand::reg(RAX, 4)]),
            (2, false) => self.asm.emit(Plain::Movzwl, vec![addr, Operand::reg(RAX, 4)]),
            (4, _) => self.asm.mov(4, addr, Operand::reg(RAX, 4)),
            _ => self.asm.mov(8, addr, Operand::q(RAX)),
        }
        self.store(RAX, dst, ty)
    }

    fn store_inst(&mut self, ptr: &Value, value: &Value) -> CompileResult<()> {
        let ty = self.func.value_type(value);
        if !ty.is_scalar() && ty != Type::Undef {
            return Err(CompileError::UnsupportedType { operation: "store", ty: ty.to_string() });
        }
        if ty.is_float() {
            self.load(value, XMM15)?;
            let addr = self.address(ptr)?;
            self.asm.emit(fmov(&ty), vec![Operand::q(XMM15), addr]);
            return Ok(());
        }
        self.load(value, RAX)?;
        let addr = self.address(ptr)?;
        let size = native_size(&ty);
        self.asm.mov(size, Operand::reg(RAX, size), addr);
        Ok(())
    }

    fn gep(&mut self, dst: ValueId, elem: &Type, base: &Value, index: &Value) -> CompileResult<()> {
        let scale = elem.size_of();
        self.load(base, RAX)?;
        match index {
            Value::Constant(c) => {
                let disp = c.as_i64().wrapping_mul(scale as i64);
                let disp = i32::try_from(disp).map_err(|_| self.err(format!("offset {disp} out of range")))?;
                if disp != 0 {
                    self.asm.lea(Operand::mem(RAX, disp), RAX);
                }
            }
            _ if scale == 0 => {}
            _ => {
                let signed = self.func.value_type(index).is_signed();
                self.load_ext(index, R11, signed)?;
                if matches!(scale, 1 | 2 | 4 | 8) {
                    let addr = Operand::Mem { base: RAX, index: Some((R11, scale as u8)), disp: 0 };
                    self.asm.lea(addr, RAX);
                } else {
                    self.asm.int(IntOp::Imul, 8, vec![Operand::Imm(scale as i64), Operand::q(R11)]);
                    self.asm.int(IntOp::Add, 8, vec![Operand::q(R11), Operand::q(RAX)]);
                }
            }
        }
        self.store(RAX, dst, &Type::Ptr)
    }

    fn cast(&mut self, op: CastOp, dst: ValueId, ty: &Type, value: &Value) -> CompileResult<()> {
        let from = self.func.value_type(value);
        match op {
            CastOp::Sext => self.load_ext(value, RAX, true)?,
            CastOp::Zext => self.load_ext(value, RAX, false)?,
            CastOp::Trunc => self.load(value, RAX)?,
            CastOp::PtrToInt | CastOp::IntToPtr => self.load_ext(value, RAX, from.is_signed())?,
            CastOp::Bitcast if from.is_float() == ty.is_float() => {
                let reg = if ty.is_float() { XMM15 } else { RAX };
                self.load(value, reg)?;
                return self.store(reg, dst, ty);
            }
            CastOp::Bitcast if ty.is_float() => {
                self.load(value, RAX)?;
                let (mnemonic, width) = if native_size(ty) == 8 { (Plain::Movq, 8) } else { (Plain::Movd, 4) };
                self.asm.emit(mnemonic, vec![Operand::reg(RAX, width), Operand::q(XMM15)]);
                return self.store(XMM15, dst, ty);
            }
            CastOp::Bitcast => {
                self.load(value, XMM15)?;
                let (mnemonic, width) = if native_size(&from) == 8 { (Plain::Movq, 8) } else { (Plain::Movd, 4) };
                self.asm.emit(mnemonic, vec![Operand::q(XMM15), Operand::reg(RAX, width)]);
            }
            CastOp::FpExt | CastOp::FpTrunc => {
                self.load(value, XMM15)?;
                let mnemonic = if op == CastOp::FpExt { Plain::Cvtss2sd } else { Plain::Cvtsd2ss };
                self.asm.emit(mnemonic, vec![Operand::q(XMM15), Operand::q(XMM15)]);
                return self.store(XMM15, dst, ty);
            }
            CastOp::IntToFloat => {
                self.load_ext(value, RAX, from.is_signed())?;
                let mnemonic = if *ty == Type::F32 { Plain::Cvtsi2ssq } else { Plain::Cvtsi2sdq };
                self.asm.emit(mnemonic, vec![Operand::q(RAX), Operand::q(XMM15)]);
                return self.store(XMM15, dst, ty);
            }
            CastOp::FloatToInt => {
                self.load(value, XMM15)?;
                let mnemonic = if from == Type::F32 { Plain::Cvttss2siq } else { Plain::Cvttsd2siq };
                self.asm.emit(mnemonic, vec![Operand::q(XMM15), Operand::q(RAX)]);
            }
        }
        self.store(RAX, dst, ty)
    }

    fn call(
        &mut self,
        dst: ValueId,
        ret: &Type,
        callee: Option<&str>,
        target: Option<&Value>,
        args: &[Value],
    ) -> CompileResult<()> {
        let types: Vec<Type> = args
            .iter()
            .map(|v| match self.func.value_type(v) {
                Type::Undef => Type::I64,
                ty => ty,
            })
            .collect();
        let assigned = SysVAssigner::new().assign_params(&types);
        let mut on_stack = Vec::new();
        let mut xmm_args = 0;
        for ((arg, ty), a) in args.iter().zip(&types).zip(&assigned) {
            match a.reg {
                Some(reg) => {
                    if self.reg_of(arg) != Some(reg) {
                        return Err(self.err(format!("call argument {arg} is not in {reg}")));
                    }
                    if reg.is_xmm() {
                        xmm_args += 1;
                    }
                }
                None => on_stack.push((arg, ty)),
            }
        }

        let padding = on_stack.len() % 2 == 1;
        if padding {
            self.asm.int(IntOp::Sub, 8, vec![Operand::Imm(8), Operand::q(AsmReg::RSP)]);
        }
        for &(arg, ty) in on_stack.iter().rev() {
            if ty.is_float() {
                self.load(arg, XMM15)?;
                self.asm.int(IntOp::Sub, 8, vec![Operand::Imm(8), Operand::q(AsmReg::RSP)]);
                self.asm.emit(fmov(ty), vec![Operand::q(XMM15), Operand::mem(AsmReg::RSP, 0)]);
            } else {
                self.load_ext(arg, RAX, ty.is_signed())?;
                self.asm.push(RAX);
            }
        }

        match (callee, target) {
            (Some(name), _) => {
                if self.symbols.is_variadic(name) {
                    self.asm.mov(4, Operand::Imm(xmm_args), Operand::reg(RAX, 4));
                }
                let symbol = if self.pic && self.symbols.is_external(name) {
                    format!("{name}@PLT")
                } else {
                    name.to_string()
                };
                self.asm.emit(Plain::Call, vec![Operand::Symbol(symbol)]);
            }
            (None, Some(target)) => {
                self.load(target, R11)?;
                self.asm.mov(4, Operand::Imm(xmm_args), Operand::reg(RAX, 4));
                self.asm.emit(Plain::Call, vec![Operand::Indirect(R11)]);
            }
            (None, None) => return Err(self.err("call without a callee")),
        }

        let cleanup = 8 * (on_stack.len() + usize::from(padding));
        if cleanup > 0 {
            self.asm.int(IntOp::Add, 8, vec![Operand::Imm(cleanup as i64), Operand::q(AsmReg::RSP)]);
        }
        if !ret.is_void() {
            let reg = if ret.is_float() { AsmReg::xmm(0) } else { RAX };
            self.store(reg, dst, ret)?;
        }
        Ok(())
    }

    fn bswap(&mut self, dst: ValueId, ty: &Type, value: &Value) -> CompileResult<()> {
        self.load(value, RAX)?;
        match native_size(ty) {
            8 => self.asm.int(IntOp::Bswap, 8, vec![Operand::q(RAX)]),
            4 => self.asm.int(IntOp::Bswap, 4, vec![Operand::reg(RAX, 4)]),
            2 => self.asm.int(IntOp::Rol, 2, vec![Operand::Imm(8), Operand::reg(RAX, 2)]),
            _ => {}
        }
        self.store(RAX, dst, ty)
    }

    fn memcpy(&mut self, dst: &Value, src: &Value, len: u64) -> CompileResult<()> {
        if self.reg_of(dst) != Some(AsmReg::RDI) || self.reg_of(src) != Some(AsmReg::RSI) {
            return Err(self.err("memcpy operands are not in %rdi and %rsi"));
        }
        self.load(&Value::Constant(Constant::new(Type::I64, len)), AsmReg::RCX)?;
        self.asm.emit(Plain::RepMovsb, Vec::new());
        Ok(())
    }

    /// Flags for "`cond` is true", or the constant value of `cond`.
    fn test_condition(&mut self, cond: &Value) -> CompileResult<Option<bool>> {
        match cond {
            Value::Constant(c) => Ok(Some(c.bits != 0)),
            Value::Undef => Ok(Some(false)),
            _ => {
                let src = self.source(cond, 1)?;
                match src {
                    Operand::Reg { .. } => self.asm.int(IntOp::Test, 1, vec![src.clone(), src]),
                    _ => self.asm.int(IntOp::Cmp, 1, vec![Operand::Imm(0), src]),
                }
                Ok(None)
            }
        }
    }

    fn select(&mut self, dst: ValueId, ty: &Type, cond: &Value, a: &Value, b: &Value) -> CompileResult<()> {
        if ty.is_float() {
            self.load(b, XMM15)?;
            match self.test_condition(cond)? {
                Some(true) => self.load(a, XMM15)?,
                Some(false) => {}
                None => {
                    self.local_labels += 1;
                    let label = format!(".L{}_sel{}", self.func.name(), self.local_labels);
                    self.asm.jcc(Cond::E, &label);
                    self.load(a, XMM15)?;
                    self.asm.label(label);
                }
            }
            return self.store(XMM15, dst, ty);
        }
        let width = gp_width(ty);
        self.load(b, RAX)?;
        self.load(a, R11)?;
        match self.test_condition(cond)? {
            Some(true) => return self.store(R11, dst, ty),
            Some(false) => {}
            None => self.asm.emit(Mnemonic::Cmov(Cond::Ne, width), vec![Operand::reg(R11, width), Operand::reg(RAX, width)]),
        }
        self.store(RAX, dst, ty)
    }

    fn divrem(&mut self, ty: &Type, a: &Value, b: &Value) -> CompileResult<()> {
        let operand_ty = ty.tuple_element(0).cloned().ok_or_else(|| self.err("divrem without a tuple type"))?;
        let signed = operand_ty.is_signed();
        let width = gp_width(&operand_ty);
        self.load_ext(a, RAX, signed)?;
        let narrow = native_size(&operand_ty) < 4;
        let divisor = match b {
            Value::Local(_) | Value::Argument(_) if !narrow && self.reg_of(b) != Some(AsmReg::RDX) => {
                let id = b.value_id().ok_or_else(|| self.err("operand without identity"))?;
                sized(self.location(id)?, width)
            }
            _ => {
                self.load_ext(b, R11, signed)?;
                Operand::reg(R11, width)
            }
        };
        if signed {
            self.asm.emit(if width == 8 { Plain::Cqto } else { Plain::Cltd }, Vec::new());
            self.asm.int(IntOp::Idiv, width, vec![divisor]);
        } else {
            self.asm.int(IntOp::Xor, 4, vec![Operand::reg(AsmReg::RDX, 4), Operand::reg(AsmReg::RDX, 4)]);
            self.asm.int(IntOp::Div, width, vec![divisor]);
        }
        Ok(())
    }

    fn projection(&mut self, id: InstId, index: usize, tuple: &Value) -> CompileResult<()> {
        let func = self.func;
        let source = tuple.as_local().filter(|&t| matches!(func[t].kind, InstKind::DivRem));
        let follows = match (source, func.position_in_block(id)) {
            (Some(divrem), Some(pos)) if pos > 0 => func[func[id].block].insts[pos - 1] == divrem,
            _ => false,
        };
        if !follows {
            return Err(self.err(format!("{id} does not directly follow its division")));
        }
        let ty = func[id].ty.clone();
        let reg = if index == 0 { RAX } else { AsmReg::RDX };
        self.store(reg, ValueId::Inst(id), &ty)
    }

    fn copy(&mut self, src: &Value, dst: ValueId, ty: &Type) -> CompileResult<()> {
        let target = self.alloc.location(dst);
        if target.is_none() || src.value_id().and_then(|v| self.alloc.location(v)) == target {
            return Ok(());
        }
        if let Some(Location::Reg(reg)) = target {
            return self.load(src, reg);
        }
        let reg = if ty.is_float() { XMM15 } else { RAX };
        self.load(src, reg)?;
        self.store(reg, dst, ty)
    }

    fn cond_branch(&mut self, cond: &Value, on_true: BlockId, on_false: BlockId) -> CompileResult<()> {
        let fused = cond.as_local().filter(|&c| fuses_with_branch(self.func, c));
        let cc = match fused {
            Some(cmp) => {
                let inst = &self.func[cmp];
                let InstKind::Icmp(pred) = inst.kind else {
                    return Err(self.err(format!("{cmp} is not a comparison")));
                };
                let (a, b) = (inst.operands[0].clone(), inst.operands[1].clone());
                let cc = self.compare(pred, &a, &b)?;
                let inverse = icmp_cc(pred.invert(), self.func.value_type(&a).is_signed());
                (cc, inverse)
            }
            None => match self.test_condition(cond)? {
                Some(taken) => {
                    let target = if taken { on_true } else { on_false };
                    if !self.is_next(target) {
                        let label = self.block_label(target);
                        self.asm.jmp(&label);
                    }
                    return Ok(());
                }
                None => (Cond::Ne, Cond::E),
            },
        };
        let (cc, inverse) = cc;
        if self.is_next(on_true) {
            let label = self.block_label(on_false);
            self.asm.jcc(inverse, &label);
        } else {
            let label = self.block_label(on_true);
            self.asm.jcc(cc, &label);
            if !self.is_next(on_false) {
                let label = self.block_label(on_false);
                self.asm.jmp(&label);
            }
        }
        Ok(())
    }

    fn switch(&mut self, value: &Value, default: BlockId, cases: &[(i64, BlockId)]) -> CompileResult<()> {
        let ty = self.func.value_type(value);
        let size = native_size(&ty);
        self.load(value, RAX)?;
        for &(case, target) in cases {
            let constant = Constant::int(ty.clone(), case);
            let src = match immediate(&constant, size) {
                Some(imm) => Operand::Imm(imm),
                None => {
                    self.load(&Value::Constant(constant), R11)?;
                    Operand::q(R11)
                }
            };
            self.asm.int(IntOp::Cmp, size, vec![src, Operand::reg(RAX, size)]);
            let label = self.block_label(target);
            self.asm.jcc(Cond::E, &label);
        }
        if !self.is_next(default) {
            let label = self.block_label(default);
            self.asm.jmp(&label);
        }
        Ok(())
    }
}
