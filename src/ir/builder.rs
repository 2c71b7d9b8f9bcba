//! Programmatic construction of function bodies.
//!
//! ```
//! use ssa_opt::ir::{FunctionBuilder, FunctionPrototype, Type, Value};
//!
//! let mut b = FunctionBuilder::new(FunctionPrototype::new("inc", Type::I64, vec![Type::I64]));
//! let sum = b.add(b.arg(0), Value::i64(1));
//! b.ret(Some(sum));
//! let func = b.finish();
//! assert_eq!(func.inst_count(), 2);
//! ```

use std::sync::Arc;

use super::function::{FunctionData, FunctionPrototype};
use super::instruction::{BinaryOp, CastOp, CmpPredicate, InstKind, Intrinsic, UnaryOp};
use super::types::Type;
use super::value::{BlockId, InstId, Value};

/// Appends instructions at the end of a current block.
pub struct FunctionBuilder {
    func: FunctionData,
    current: BlockId,
}

impl FunctionBuilder {
    pub fn new(proto: FunctionPrototype) -> Self {
        let func = FunctionData::new(proto);
        let current = func.entry();
        Self { func, current }
    }

    pub fn entry(&self) -> BlockId {
        self.func.entry()
    }

    pub fn create_block(&mut self) -> BlockId {
        self.func.create_block()
    }

    /// Continue appending at the end of `block`.
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn current(&self) -> BlockId {
        self.current
    }

    pub fn arg(&self, index: u32) -> Value {
        Value::Argument(index)
    }

    pub fn func(&self) -> &FunctionData {
        &self.func
    }

    pub fn finish(self) -> FunctionData {
        self.func
    }

    fn emit(&mut self, kind: InstKind, ty: Type, operands: Vec<Value>) -> InstId {
        self.func.append_inst(self.current, kind, ty, operands)
    }

    fn emit_value(&mut self, kind: InstKind, ty: Type, operands: Vec<Value>) -> Value {
        Value::Local(self.emit(kind, ty, operands))
    }

    pub fn binary(&mut self, op: BinaryOp, a: Value, b: Value) -> Value {
        let ty = self.func.value_type(&a);
        self.emit_value(InstKind::Binary(op), ty, vec![a, b])
    }

    pub fn add(&mut self, a: Value, b: Value) -> Value {
        self.binary(BinaryOp::Add, a, b)
    }

    pub fn sub(&mut self, a: Value, b: Value) -> Value {
        self.binary(BinaryOp::Sub, a, b)
    }

    pub fn mul(&mut self, a: Value, b: Value) -> Value {
        self.binary(BinaryOp::Mul, a, b)
    }

    pub fn unary(&mut self, op: UnaryOp, a: Value) -> Value {
        let ty = self.func.value_type(&a);
        self.emit_value(InstKind::Unary(op), ty, vec![a])
    }

    pub fn icmp(&mut self, pred: CmpPredicate, a: Value, b: Value) -> Value {
        self.emit_value(InstKind::Icmp(pred), Type::Bool, vec![a, b])
    }

    pub fn fcmp(&mut self, pred: CmpPredicate, a: Value, b: Value) -> Value {
        self.emit_value(InstKind::Fcmp(pred), Type::Bool, vec![a, b])
    }

    pub fn alloc(&mut self, allocated: Type) -> Value {
        self.emit_value(InstKind::Alloc { allocated }, Type::Ptr, vec![])
    }

    pub fn load(&mut self, ty: Type, ptr: Value) -> Value {
        self.emit_value(InstKind::Load, ty, vec![ptr])
    }

    pub fn store(&mut self, ptr: Value, value: Value) -> InstId {
        self.emit(InstKind::Store, Type::Void, vec![ptr, value])
    }

    pub fn gep(&mut self, elem: Type, base: Value, index: Value) -> Value {
        self.emit_value(InstKind::GetElementPtr { elem }, Type::Ptr, vec![base, index])
    }

    pub fn gfp(&mut self, agg: Type, base: Value, field: usize) -> Value {
        self.emit_value(InstKind::GetFieldPtr { agg, field }, Type::Ptr, vec![base])
    }

    pub fn cast(&mut self, op: CastOp, ty: Type, value: Value) -> Value {
        self.emit_value(InstKind::Cast(op), ty, vec![value])
    }

    pub fn call(&mut self, callee: &str, ret: Type, args: Vec<Value>) -> Value {
        self.emit_value(InstKind::Call { callee: Arc::from(callee) }, ret, args)
    }

    pub fn indirect_call(&mut self, ret: Type, callee: Value, args: Vec<Value>) -> Value {
        let mut operands = vec![callee];
        operands.extend(args);
        self.emit_value(InstKind::IndirectCall, ret, operands)
    }

    pub fn intrinsic(&mut self, kind: Intrinsic, ty: Type, args: Vec<Value>) -> Value {
        self.emit_value(InstKind::Intrinsic(kind), ty, args)
    }

    pub fn memcpy(&mut self, dst: Value, src: Value, len: u64) -> InstId {
        self.emit(InstKind::Memcpy { len }, Type::Void, vec![dst, src])
    }

    pub fn select(&mut self, cond: Value, a: Value, b: Value) -> Value {
        let ty = self.func.value_type(&a);
        self.emit_value(InstKind::Select, ty, vec![cond, a, b])
    }

    /// Phi at the head of the current block, after the phis already there.
    pub fn phi(&mut self, ty: Type, incoming: Vec<(Value, BlockId)>) -> Value {
        let index = self.func.phis(self.current).len();
        let (operands, blocks): (Vec<_>, Vec<_>) = incoming.into_iter().unzip();
        let id = self
            .func
            .insert_at(self.current, index, InstKind::Phi { incoming: blocks }, ty, operands);
        Value::Local(id)
    }

    /// Complete a phi with an edge created after it, such as a loop back edge.
    pub fn add_phi_incoming(&mut self, phi: &Value, value: Value, pred: BlockId) {
        if let Some(id) = phi.as_local() {
            // Only fails for non-phis, which the verifier reports later.
            let _ = self.func.add_phi_incoming(id, value, pred);
        }
    }

    pub fn br(&mut self, target: BlockId) -> InstId {
        self.emit(InstKind::Branch { target }, Type::Void, vec![])
    }

    pub fn cond_br(&mut self, cond: Value, on_true: BlockId, on_false: BlockId) -> InstId {
        self.emit(InstKind::CondBranch { on_true, on_false }, Type::Void, vec![cond])
    }

    pub fn switch(&mut self, value: Value, default: BlockId, cases: Vec<(i64, BlockId)>) -> InstId {
        self.emit(InstKind::Switch { default, cases }, Type::Void, vec![value])
    }

    pub fn ret(&mut self, value: Option<Value>) -> InstId {
        self.emit(InstKind::Return, Type::Void, value.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phi_goes_after_existing_phis() {
        let mut b = FunctionBuilder::new(FunctionPrototype::new("f", Type::I64, vec![]));
        let entry = b.entry();
        let head = b.create_block();
        b.br(head);
        b.switch_to(head);
        let x = b.add(Value::i64(1), Value::i64(2));
        let p1 = b.phi(Type::I64, vec![(Value::i64(0), entry)]);
        let p2 = b.phi(Type::I64, vec![(Value::i64(1), entry)]);
        b.ret(Some(x));
        let f = b.finish();
        let insts = &f[head].insts;
        assert_eq!(Value::Local(insts[0]), p1);
        assert_eq!(Value::Local(insts[1]), p2);
        assert_eq!(f.phis(head).len(), 2);
    }

    #[test]
    fn test_result_types() {
        let mut b = FunctionBuilder::new(FunctionPrototype::new("f", Type::Void, vec![Type::U32]));
        let s = b.add(b.arg(0), Value::int(Type::U32, 4));
        let c = b.icmp(CmpPredicate::Lt, s.clone(), Value::int(Type::U32, 9));
        let p = b.alloc(Type::F64);
        let f = b.func();
        assert_eq!(f.value_type(&s), Type::U32);
        assert_eq!(f.value_type(&c), Type::Bool);
        assert_eq!(f.value_type(&p), Type::Ptr);
    }
}
