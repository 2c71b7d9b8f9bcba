//! Target lowering for x86-64.
//!
//! Rewrites a function in SSA form so that every operand with a fixed register is a
//! short-lived value of its own, right next to the instruction that needs it:
//!
//! - arguments are copied at the top of the entry block, so the argument registers are
//!   released after a handful of positions;
//! - integer `div`/`rem` become a `DivRem` tuple read through a projection; the
//!   remainder projection is fixed to %rdx and is copied out immediately;
//! - a variable shift count is copied right before the shift (fixed to %rcx);
//! - the pointers of a `memcpy` are copied right before it (%rdi, %rsi);
//! - register arguments of a call are copied right before it;
//! - float `neg` becomes an `xor` with a sign-bit mask constant.
//!
//! Instructions that change shape keep their `InstId`, so a handle taken before lowering
//! still names the same value afterwards.

use super::calling_convention::SysVAssigner;
use crate::core::{CompileError, CompileResult};
use crate::ir::{BinaryOp, Constant, FunctionData, InstId, InstKind, Type, UnaryOp, Value};

/// Bit pattern flipping the sign of a float of type `ty`.
pub fn sign_mask(ty: &Type) -> Constant {
    match ty {
        Type::F32 => Constant::new(Type::F32, 0x8000_0000),
        _ => Constant::new(Type::F64, 0x8000_0000_0000_0000),
    }
}

/// Apply every rewrite to `func`. Returns the number of instructions inserted or
/// rewritten.
pub fn lower_function(func: &mut FunctionData) -> CompileResult<usize> {
    let mut changes = isolate_arguments(func)?;
    let insts: Vec<InstId> = func.instructions().collect();
    for id in insts {
        let inst = &func[id];
        changes += match inst.kind.clone() {
            InstKind::Binary(op @ (BinaryOp::Div | BinaryOp::Rem)) if inst.ty.is_integer() => {
                lower_division(func, id, op)?
            }
            InstKind::Binary(BinaryOp::Rem) if inst.ty.is_float() => {
                return Err(CompileError::UnsupportedType { operation: "rem", ty: inst.ty.to_string() });
            }
            InstKind::Binary(op) if op.is_shift() && inst.operands[1].as_constant().is_none() => {
                isolate_operands(func, id, &[1])
            }
            InstKind::Unary(UnaryOp::Neg) if inst.ty.is_float() => {
                let mask = sign_mask(&inst.ty);
                let value = inst.operands[0].clone();
                func.rewrite_inst(id, InstKind::Binary(BinaryOp::Xor), vec![value, Value::Constant(mask)]);
                1
            }
            InstKind::Memcpy { .. } => isolate_operands(func, id, &[0, 1]),
            InstKind::Call { .. } => isolate_call_arguments(func, id, 0)?,
            InstKind::IndirectCall => isolate_call_arguments(func, id, 1)?,
            _ => 0,
        };
    }
    log::debug!("lowering @{}: {} rewrites", func.name(), changes);
    Ok(changes)
}

fn isolate_arguments(func: &mut FunctionData) -> CompileResult<usize> {
    let params = func.prototype().params.clone();
    let mut uses: Vec<Vec<(InstId, usize)>> = vec![Vec::new(); params.len()];
    for id in func.instructions() {
        for (index, op) in func[id].operands.iter().enumerate() {
            if let Value::Argument(i) = op {
                if let Some(list) = uses.get_mut(*i as usize) {
                    list.push((id, index));
                }
            }
        }
    }
    let entry = func.entry();
    let mut inserted = 0;
    for (i, ty) in params.iter().enumerate() {
        if !ty.is_scalar() {
            return Err(CompileError::UnsupportedType { operation: "argument", ty: ty.to_string() });
        }
        if uses[i].is_empty() {
            continue;
        }
        let copy = func.insert_at(entry, inserted, InstKind::Copy, ty.clone(), vec![Value::Argument(i as u32)]);
        for &(user, index) in &uses[i] {
            func.set_operand(user, index, Value::Local(copy));
        }
        inserted += 1;
    }
    Ok(inserted)
}

fn lower_division(func: &mut FunctionData, id: InstId, op: BinaryOp) -> CompileResult<usize> {
    let ty = func[id].ty.clone();
    let operands = func[id].operands.clone();
    let divrem = func.insert_before(id, InstKind::DivRem, Type::tuple(&[ty.clone(), ty.clone()]), operands);
    if op == BinaryOp::Div {
        func.rewrite_inst(id, InstKind::Projection { index: 0 }, vec![Value::Local(divrem)]);
        return Ok(2);
    }
    func.rewrite_inst(id, InstKind::Projection { index: 1 }, vec![Value::Local(divrem)]);
    let block = func[id].block;
    let at = func
        .position_in_block(id)
        .ok_or_else(|| CompileError::analysis(format!("{id} is not attached to a block")))?;
    let copy = func.insert_at(block, at + 1, InstKind::Copy, ty, vec![Value::Undef]);
    func.replace_all_uses(id, Value::Local(copy));
    func.set_operand(copy, 0, Value::Local(id));
    Ok(3)
}

/// Read operands `indices` of `id` through fresh copies placed right before it.
fn isolate_operands(func: &mut FunctionData, id: InstId, indices: &[usize]) -> usize {
    for &index in indices {
        let value = func[id].operands[index].clone();
        let ty = match func.value_type(&value) {
            Type::Undef => Type::I64,
            ty => ty,
        };
        let copy = func.insert_before(id, InstKind::Copy, ty, vec![value]);
        func.set_operand(id, index, Value::Local(copy));
    }
    indices.len()
}

fn isolate_call_arguments(func: &mut FunctionData, id: InstId, first: usize) -> CompileResult<usize> {
    let types: Vec<Type> = func[id].operands[first..].iter().map(|v| func.value_type(v)).collect();
    if let Some(bad) = types.iter().find(|t| t.is_aggregate()) {
        return Err(CompileError::UnsupportedType { operation: "call argument", ty: bad.to_string() });
    }
    let types: Vec<Type> = types.into_iter().map(|t| if t == Type::Undef { Type::I64 } else { t }).collect();
    let assigned = SysVAssigner::new().assign_params(&types);
    let in_regs: Vec<usize> = assigned
        .iter()
        .enumerate()
        .filter(|(_, a)| a.reg.is_some())
        .map(|(i, _)| first + i)
        .collect();
    Ok(isolate_operands(func, id, &in_regs))
}
