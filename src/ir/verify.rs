//! Structural verification of SSA-form functions.
//!
//! Checks terminators, phi arity against the predecessor list, operand definitions,
//! dominance of definitions over uses and the operand types of the instructions whose
//! typing rules are fixed. The first problem found is reported with the function,
//! block and instruction it was found in.

use super::function::FunctionData;
use super::instruction::{InstKind, Instruction};
use super::module::Module;
use super::types::Type;
use super::value::{BlockId, InstId, Value};
use crate::analysis::DominatorTree;
use crate::core::{CompileError, CompileResult};

struct Verifier<'f> {
    func: &'f FunctionData,
    domtree: DominatorTree,
}

impl<'f> Verifier<'f> {
    fn fail(&self, block: BlockId, inst: Option<InstId>, reason: impl Into<String>) -> CompileError {
        let instruction = match inst {
            Some(id) => match self.func.inst(id) {
                Some(i) => format!("{id} ({})", i.mnemonic()),
                None => id.to_string(),
            },
            None => "-".to_string(),
        };
        CompileError::Verification {
            function: self.func.name().to_string(),
            block: block.to_string(),
            instruction,
            reason: reason.into(),
        }
    }

    fn run(&self) -> CompileResult<()> {
        let func = self.func;
        if !func.preds(func.entry()).is_empty() {
            return Err(self.fail(func.entry(), None, "entry block has predecessors"));
        }
        for &block in func.layout() {
            self.check_block(block)?;
        }
        Ok(())
    }

    fn check_block(&self, block: BlockId) -> CompileResult<()> {
        let func = self.func;
        let insts = &func[block].insts;
        let Some(&last) = insts.last() else {
            return Err(self.fail(block, None, "block is empty"));
        };
        if !func[last].is_terminator() {
            return Err(self.fail(block, Some(last), "block does not end in a terminator"));
        }
        let mut seen_non_phi = false;
        for (pos, &id) in insts.iter().enumerate() {
            let inst = &func[id];
            if inst.block != block {
                return Err(self.fail(block, Some(id), format!("instruction claims block {}", inst.block)));
            }
            if inst.is_terminator() && pos + 1 != insts.len() {
                return Err(self.fail(block, Some(id), "terminator in the middle of a block"));
            }
            if inst.is_phi() {
                if seen_non_phi {
                    return Err(self.fail(block, Some(id), "phi after a non-phi instruction"));
                }
                self.check_phi(block, id, inst)?;
            } else {
                seen_non_phi = true;
                for op in &inst.operands {
                    self.check_operand(block, id, op, block, Some(pos))?;
                }
            }
            self.check_types(block, id, inst)?;
        }
        Ok(())
    }

    fn check_phi(&self, block: BlockId, id: InstId, inst: &Instruction) -> CompileResult<()> {
        let InstKind::Phi { incoming } = &inst.kind else {
            return Ok(());
        };
        let preds = self.func.preds(block);
        if incoming.len() != inst.operands.len() || incoming.len() != preds.len() {
            return Err(self.fail(
                block,
                Some(id),
                format!(
                    "phi has {} operands but block has {} predecessors",
                    inst.operands.len(),
                    preds.len()
                ),
            ));
        }
        if incoming.as_slice() != preds {
            return Err(self.fail(block, Some(id), "phi operands are not in predecessor order"));
        }
        for (op, &pred) in inst.operands.iter().zip(incoming) {
            // The value must be available at the end of the incoming block.
            self.check_operand(block, id, op, pred, None)?;
        }
        Ok(())
    }

    /// `op` is read by `user` at `pos` of `at` (`None`: at the end of `at`).
    fn check_operand(
        &self,
        block: BlockId,
        user: InstId,
        op: &Value,
        at: BlockId,
        pos: Option<usize>,
    ) -> CompileResult<()> {
        match op {
            Value::Argument(i) if *i as usize >= self.func.prototype().params.len() => {
                Err(self.fail(block, Some(user), format!("argument %a{i} out of range")))
            }
            Value::Local(def) => {
                let Some(def_inst) = self.func.inst(*def) else {
                    return Err(self.fail(block, Some(user), format!("use of removed value {def}")));
                };
                let Some(def_pos) = self.func.position_in_block(*def) else {
                    return Err(self.fail(block, Some(user), format!("use of detached value {def}")));
                };
                if !def_inst.has_result() {
                    return Err(self.fail(block, Some(user), format!("{def} produces no value")));
                }
                if !self.domtree.is_reachable(at) {
                    return Ok(());
                }
                let dominated = if def_inst.block == at {
                    pos.map_or(true, |p| def_pos < p)
                } else {
                    self.domtree.dominates(def_inst.block, at)
                };
                if dominated {
                    Ok(())
                } else {
                    Err(self.fail(block, Some(user), format!("{def} does not dominate its use")))
                }
            }
            _ => Ok(()),
        }
    }

    fn check_types(&self, block: BlockId, id: InstId, inst: &Instruction) -> CompileResult<()> {
        let func = self.func;
        let ty_of = |i: usize| inst.operands.get(i).map(|v| func.value_type(v));
        let compatible = |a: &Type, b: &Type| a == b || *a == Type::Undef || *b == Type::Undef;
        let expect_operands = |n: usize| {
            if inst.operands.len() == n {
                Ok(())
            } else {
                Err(self.fail(
                    block,
                    Some(id),
                    format!("expected {n} operands, found {}", inst.operands.len()),
                ))
            }
        };
        match &inst.kind {
            InstKind::Binary(op) => {
                expect_operands(2)?;
                let (a, b) = (ty_of(0).unwrap_or(Type::Undef), ty_of(1).unwrap_or(Type::Undef));
                if !compatible(&a, &inst.ty) || (!op.is_shift() && !compatible(&b, &inst.ty)) {
                    return Err(self.fail(
                        block,
                        Some(id),
                        format!("type mismatch: {op} {} with operands {a}, {b}", inst.ty),
                    ));
                }
            }
            InstKind::Icmp(_) | InstKind::Fcmp(_) => {
                expect_operands(2)?;
                let (a, b) = (ty_of(0).unwrap_or(Type::Undef), ty_of(1).unwrap_or(Type::Undef));
                if !compatible(&a, &b) {
                    return Err(self.fail(block, Some(id), format!("comparing {a} with {b}")));
                }
            }
            InstKind::Load => {
                expect_operands(1)?;
                if !compatible(&ty_of(0).unwrap_or(Type::Undef), &Type::Ptr) {
                    return Err(self.fail(block, Some(id), "load through a non-pointer"));
                }
            }
            InstKind::Store => {
                expect_operands(2)?;
                if !compatible(&ty_of(0).unwrap_or(Type::Undef), &Type::Ptr) {
                    return Err(self.fail(block, Some(id), "store through a non-pointer"));
                }
            }
            InstKind::CondBranch { .. } => {
                expect_operands(1)?;
                if !compatible(&ty_of(0).unwrap_or(Type::Undef), &Type::Bool) {
                    return Err(self.fail(block, Some(id), "branch condition is not a bool"));
                }
            }
            InstKind::Return => {
                let ret = &func.prototype().ret;
                match (ret.is_void(), ty_of(0)) {
                    (true, None) => {}
                    (false, Some(t)) if compatible(&t, ret) => {}
                    (_, found) => {
                        let found = found.map_or("nothing".to_string(), |t| t.to_string());
                        return Err(self.fail(
                            block,
                            Some(id),
                            format!("returning {found} from a function returning {ret}"),
                        ));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Verify one function in SSA form.
pub fn verify_function(func: &FunctionData) -> CompileResult<()> {
    let verifier = Verifier { func, domtree: DominatorTree::compute(func) };
    verifier.run()
}

/// Verify every function of a module.
pub fn verify_module(module: &Module) -> CompileResult<()> {
    for func in module.functions() {
        verify_function(func)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, FunctionPrototype};

    fn reason(err: CompileError) -> String {
        match err {
            CompileError::Verification { reason, .. } => reason,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_accepts_well_formed_function() {
        let mut b = FunctionBuilder::new(FunctionPrototype::new("f", Type::I64, vec![Type::I64]));
        let x = b.add(b.arg(0), Value::i64(2));
        b.ret(Some(x));
        assert!(verify_function(&b.finish()).is_ok());
    }

    #[test]
    fn test_rejects_missing_terminator() {
        let mut b = FunctionBuilder::new(FunctionPrototype::new("f", Type::I64, vec![Type::I64]));
        b.add(b.arg(0), Value::i64(2));
        let err = verify_function(&b.finish()).unwrap_err();
        assert!(reason(err).contains("terminator"));
    }

    #[test]
    fn test_rejects_phi_arity_mismatch() {
        let mut b = FunctionBuilder::new(FunctionPrototype::new("f", Type::I64, vec![Type::Bool]));
        let entry = b.entry();
        let l1 = b.create_block();
        let merge = b.create_block();
        b.cond_br(b.arg(0), l1, merge);
        b.switch_to(l1);
        b.br(merge);
        b.switch_to(merge);
        let p = b.phi(Type::I64, vec![(Value::i64(1), entry)]);
        b.ret(Some(p));
        let err = verify_function(&b.finish()).unwrap_err();
        assert!(reason(err).contains("predecessors"));
    }

    #[test]
    fn test_rejects_use_not_dominated() {
        let mut b = FunctionBuilder::new(FunctionPrototype::new("f", Type::I64, vec![Type::Bool]));
        let l1 = b.create_block();
        let l2 = b.create_block();
        let merge = b.create_block();
        b.cond_br(b.arg(0), l1, l2);
        b.switch_to(l1);
        let x = b.add(Value::i64(1), Value::i64(2));
        b.br(merge);
        b.switch_to(l2);
        b.br(merge);
        b.switch_to(merge);
        b.ret(Some(x));
        let err = verify_function(&b.finish()).unwrap_err();
        match err {
            CompileError::Verification { function, block, reason, .. } => {
                assert_eq!(function, "f");
                assert_eq!(block, "L3");
                assert!(reason.contains("dominate"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_rejects_type_mismatch() {
        let mut b = FunctionBuilder::new(FunctionPrototype::new("f", Type::I64, vec![Type::I64]));
        let x = b.binary(crate::ir::BinaryOp::Add, b.arg(0), Value::i32(1));
        b.ret(Some(x));
        let err = verify_function(&b.finish()).unwrap_err();
        assert!(reason(err).contains("type mismatch"));
    }
}
