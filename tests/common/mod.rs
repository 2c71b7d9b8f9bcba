//! Shared helpers for the integration tests.
//!
//! `run` interprets a function directly on the IR, before or after SSA destruction, so
//! transformations can be checked by comparing results instead of instruction shapes.

#![allow(dead_code)]

use hashbrown::HashMap;

use ssa_opt::ir::{
    BinaryOp, BlockId, CastOp, CmpPredicate, FunctionData, InstId, InstKind, Intrinsic, Type, UnaryOp, Value,
    ValueId,
};

const STACK_BASE: u64 = 0x1000;
const STEP_LIMIT: usize = 1_000_000;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn mask(ty: &Type, bits: u64) -> u64 {
    match ty {
        Type::Bool => bits & 1,
        _ => match ty.size_of() {
            1 => bits & 0xff,
            2 => bits & 0xffff,
            4 => bits & 0xffff_ffff,
            _ => bits,
        },
    }
}

fn sext(ty: &Type, bits: u64) -> i64 {
    match ty.size_of() {
        1 => bits as u8 as i8 as i64,
        2 => bits as u16 as i16 as i64,
        4 => bits as u32 as i32 as i64,
        _ => bits as i64,
    }
}

fn to_float(ty: &Type, bits: u64) -> f64 {
    match ty {
        Type::F32 => f32::from_bits(bits as u32) as f64,
        _ => f64::from_bits(bits),
    }
}

fn from_float(ty: &Type, value: f64) -> u64 {
    match ty {
        Type::F32 => (value as f32).to_bits() as u64,
        _ => value.to_bits(),
    }
}

fn compare<T: PartialOrd>(pred: CmpPredicate, a: T, b: T) -> bool {
    match pred {
        CmpPredicate::Eq => a == b,
        CmpPredicate::Ne => a != b,
        CmpPredicate::Lt => a < b,
        CmpPredicate::Le => a <= b,
        CmpPredicate::Gt => a > b,
        CmpPredicate::Ge => a >= b,
    }
}

struct Interpreter<'f> {
    func: &'f FunctionData,
    /// Functions a direct call may resolve to.
    callees: &'f [FunctionData],
    values: HashMap<ValueId, u64>,
    tuples: HashMap<InstId, (u64, u64)>,
    memory: Vec<u8>,
}

impl<'f> Interpreter<'f> {
    fn operand(&self, value: &Value) -> u64 {
        match value {
            Value::Constant(c) => c.bits,
            Value::Local(id) => *self
                .values
                .get(&ValueId::Inst(*id))
                .unwrap_or_else(|| panic!("read of {id:?} before it was written")),
            Value::Argument(i) => self.values[&ValueId::Arg(*i)],
            Value::Undef => 0,
            Value::Global(name) => panic!("globals are not modelled: {name}"),
        }
    }

    fn ty(&self, value: &Value) -> Type {
        self.func.value_type(value)
    }

    fn offset(&self, ptr: u64, len: u64) -> usize {
        let start = ptr.checked_sub(STACK_BASE).expect("pointer below the stack") as usize;
        assert!(start + len as usize <= self.memory.len(), "access past the stack: {ptr:#x}");
        start
    }

    fn read(&self, ptr: u64, ty: &Type) -> u64 {
        let len = ty.size_of();
        let start = self.offset(ptr, len);
        let mut bytes = [0u8; 8];
        bytes[..len as usize].copy_from_slice(&self.memory[start..start + len as usize]);
        u64::from_le_bytes(bytes)
    }

    fn write(&mut self, ptr: u64, ty: &Type, bits: u64) {
        let len = ty.size_of() as usize;
        let start = self.offset(ptr, len as u64);
        self.memory[start..start + len].copy_from_slice(&bits.to_le_bytes()[..len]);
    }

    fn alloc(&mut self, ty: &Type) -> u64 {
        let start = self.memory.len().div_ceil(8) * 8;
        self.memory.resize(start + (ty.size_of().max(1) as usize).div_ceil(8) * 8, 0);
        STACK_BASE + start as u64
    }

    fn binary(&self, op: BinaryOp, ty: &Type, a: u64, b: u64) -> u64 {
        if ty.is_float() {
            let (x, y) = (to_float(ty, a), to_float(ty, b));
            return match op {
                BinaryOp::Add => from_float(ty, x + y),
                BinaryOp::Sub => from_float(ty, x - y),
                BinaryOp::Mul => from_float(ty, x * y),
                BinaryOp::Div => from_float(ty, x / y),
                BinaryOp::Rem => from_float(ty, x % y),
                BinaryOp::Xor => a ^ b,
                other => panic!("no float {other}"),
            };
        }
        let width = (ty.size_of().max(1) * 8) as u32;
        let r = match op {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div | BinaryOp::Rem => return self.divrem(ty, a, b, op == BinaryOp::Rem),
            BinaryOp::And => a & b,
            BinaryOp::Or => a | b,
            BinaryOp::Xor => a ^ b,
            BinaryOp::Shl => a << (b as u32 % width),
            BinaryOp::Shr => mask(ty, a) >> (b as u32 % width),
            BinaryOp::Sar => (sext(ty, a) >> (b as u32 % width)) as u64,
        };
        mask(ty, r)
    }

    fn divrem(&self, ty: &Type, a: u64, b: u64, rem: bool) -> u64 {
        assert!(mask(ty, b) != 0, "division by zero");
        let r = if ty.is_signed() {
            let (x, y) = (sext(ty, a), sext(ty, b));
            if rem { x.wrapping_rem(y) as u64 } else { x.wrapping_div(y) as u64 }
        } else {
            let (x, y) = (mask(ty, a), mask(ty, b));
            if rem { x % y } else { x / y }
        };
        mask(ty, r)
    }

    fn cast(&self, op: CastOp, from: &Type, to: &Type, bits: u64) -> u64 {
        match op {
            CastOp::Sext => mask(to, sext(from, bits) as u64),
            CastOp::Zext => mask(from, bits),
            CastOp::Trunc | CastOp::Bitcast | CastOp::PtrToInt | CastOp::IntToPtr => mask(to, bits),
            CastOp::FpExt | CastOp::FpTrunc => from_float(to, to_float(from, bits)),
            CastOp::IntToFloat if from.is_signed() => from_float(to, sext(from, bits) as f64),
            CastOp::IntToFloat => from_float(to, mask(from, bits) as i64 as f64),
            CastOp::FloatToInt => mask(to, to_float(from, bits) as i64 as u64),
        }
    }

    /// Assign the phis of `to` for the edge from `from`, all reads before any write.
    fn enter(&mut self, from: BlockId, to: BlockId) {
        let mut updates = Vec::new();
        for phi in self.func.phis(to) {
            let inst = &self.func[phi];
            let InstKind::Phi { incoming } = &inst.kind else { unreachable!() };
            let index = incoming
                .iter()
                .position(|&b| b == from)
                .unwrap_or_else(|| panic!("{phi:?} has no operand for {from:?}"));
            updates.push((phi, mask(&inst.ty, self.operand(&inst.operands[index]))));
        }
        for (phi, bits) in updates {
            self.values.insert(ValueId::Inst(phi), bits);
        }
    }

    fn execute(&mut self) -> Option<u64> {
        let func = self.func;
        let mut block = func.entry();
        let mut steps = 0;
        loop {
            let mut next = None;
            for &id in &func[block].insts {
                steps += 1;
                assert!(steps < STEP_LIMIT, "step limit exceeded");
                let inst = &func[id];
                let ops: Vec<u64> = match inst.kind {
                    InstKind::Phi { .. } => continue,
                    _ => inst.operands.iter().map(|v| self.operand(v)).collect(),
                };
                let ty = &inst.ty;
                let result = match &inst.kind {
                    InstKind::Binary(op) => Some(self.binary(*op, ty, ops[0], ops[1])),
                    InstKind::Unary(UnaryOp::Neg) if ty.is_float() => {
                        Some(from_float(ty, -to_float(ty, ops[0])))
                    }
                    InstKind::Unary(UnaryOp::Neg) => Some(mask(ty, ops[0].wrapping_neg())),
                    InstKind::Unary(UnaryOp::Not) => Some(mask(ty, !ops[0])),
                    InstKind::Icmp(pred) => {
                        let op_ty = self.ty(&inst.operands[0]);
                        let r = if op_ty.is_signed() {
                            compare(*pred, sext(&op_ty, ops[0]), sext(&op_ty, ops[1]))
                        } else {
                            compare(*pred, mask(&op_ty, ops[0]), mask(&op_ty, ops[1]))
                        };
                        Some(r as u64)
                    }
                    InstKind::Fcmp(pred) => {
                        let op_ty = self.ty(&inst.operands[0]);
                        Some(compare(*pred, to_float(&op_ty, ops[0]), to_float(&op_ty, ops[1])) as u64)
                    }
                    InstKind::Alloc { allocated } => Some(self.alloc(allocated)),
                    InstKind::Load => Some(self.read(ops[0], ty)),
                    InstKind::Store => {
                        let value_ty = self.ty(&inst.operands[1]);
                        self.write(ops[0], &value_ty, ops[1]);
                        None
                    }
                    InstKind::GetElementPtr { elem } => {
                        let index_ty = self.ty(&inst.operands[1]);
                        let index = if index_ty.is_signed() { sext(&index_ty, ops[1]) } else { ops[1] as i64 };
                        Some(ops[0].wrapping_add((index * elem.size_of() as i64) as u64))
                    }
                    InstKind::GetFieldPtr { agg: Type::Struct(s), field } => {
                        Some(ops[0] + s.field_offset(*field).expect("field in range"))
                    }
                    InstKind::GetFieldPtr { .. } => panic!("field pointer into a non-struct"),
                    InstKind::Cast(op) => {
                        let from = self.ty(&inst.operands[0]);
                        Some(self.cast(*op, &from, ty, ops[0]))
                    }
                    InstKind::Select => Some(if ops[0] & 1 != 0 { ops[1] } else { ops[2] }),
                    InstKind::Intrinsic(Intrinsic::Bswap) => {
                        let len = ty.size_of() as usize;
                        let mut bytes = ops[0].to_le_bytes();
                        bytes[..len].reverse();
                        Some(u64::from_le_bytes(bytes))
                    }
                    InstKind::Intrinsic(Intrinsic::Trap) => panic!("trap"),
                    InstKind::Memcpy { len } => {
                        let (dst, src) = (self.offset(ops[0], *len), self.offset(ops[1], *len));
                        self.memory.copy_within(src..src + *len as usize, dst);
                        None
                    }
                    InstKind::DivRem => {
                        let op_ty = self.ty(&inst.operands[0]);
                        let q = self.divrem(&op_ty, ops[0], ops[1], false);
                        let r = self.divrem(&op_ty, ops[0], ops[1], true);
                        self.tuples.insert(id, (q, r));
                        None
                    }
                    InstKind::Projection { index } => {
                        let tuple = inst.operands[0].as_local().expect("projection of a local");
                        let (q, r) = self.tuples[&tuple];
                        Some(if *index == 0 { q } else { r })
                    }
                    InstKind::Copy => Some(ops[0]),
                    InstKind::Move { dst } => {
                        self.values.insert(ValueId::Inst(*dst), ops[0]);
                        None
                    }
                    InstKind::Branch { target } => {
                        next = Some(*target);
                        None
                    }
                    InstKind::CondBranch { on_true, on_false } => {
                        next = Some(if ops[0] & 1 != 0 { *on_true } else { *on_false });
                        None
                    }
                    InstKind::Switch { default, cases } => {
                        let op_ty = self.ty(&inst.operands[0]);
                        let key = sext(&op_ty, ops[0]);
                        let hit = cases.iter().find(|(v, _)| sext(&op_ty, *v as u64) == key);
                        next = Some(hit.map_or(*default, |(_, b)| *b));
                        None
                    }
                    InstKind::Return => return ops.first().map(|&bits| mask(&func.prototype().ret, bits)),
                    InstKind::Call { callee } => {
                        let target = self
                            .callees
                            .iter()
                            .find(|f| f.name() == &**callee)
                            .unwrap_or_else(|| panic!("call to unknown function {callee}"));
                        let result = run_in(self.callees, target, &ops);
                        if ty.is_void() { None } else { result }
                    }
                    InstKind::IndirectCall => panic!("indirect calls are not modelled"),
                    InstKind::Phi { .. } => unreachable!(),
                };
                if let Some(bits) = result {
                    self.values.insert(ValueId::Inst(id), bits);
                }
            }
            let target = next.expect("block without a terminator");
            self.enter(block, target);
            block = target;
        }
    }
}

/// Execute `func` on `args` (raw bits, one per parameter) and return the raw result.
pub fn run(func: &FunctionData, args: &[u64]) -> Option<u64> {
    run_in(std::slice::from_ref(func), func, args)
}

/// `run` with direct calls resolved among `functions`. Each call gets a fresh stack.
pub fn run_in(functions: &[FunctionData], func: &FunctionData, args: &[u64]) -> Option<u64> {
    let params = &func.prototype().params;
    assert_eq!(params.len(), args.len(), "argument count of @{}", func.name());
    let mut values = HashMap::new();
    for (i, (ty, &bits)) in params.iter().zip(args).enumerate() {
        values.insert(ValueId::Arg(i as u32), mask(ty, bits));
    }
    Interpreter { func, callees: functions, values, tuples: HashMap::new(), memory: Vec::new() }.execute()
}

/// `run` for integer functions, with the result sign-extended from the return type.
pub fn run_i64(func: &FunctionData, args: &[i64]) -> i64 {
    let raw: Vec<u64> = args.iter().map(|&a| a as u64).collect();
    let bits = run(func, &raw).expect("function returned no value");
    sext(&func.prototype().ret, bits)
}

/// Number of instructions in `func` matching `pred`.
pub fn count(func: &FunctionData, pred: impl Fn(&InstKind) -> bool) -> usize {
    func.instructions().filter(|&id| pred(&func[id].kind)).count()
}
