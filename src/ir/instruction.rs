//! Instruction representation.
//!
//! An instruction is an `InstKind` tag carrying the non-value payload (types, targets,
//! predicate), the result type, and an ordered operand list. Every operand that can be
//! rewritten lives in `operands`, so def-use maintenance and renaming are uniform.

use std::sync::Arc;

use strum::{Display, IntoStaticStr};

use super::types::Type;
use super::value::{BlockId, InstId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    /// Logical shift right.
    Shr,
    /// Arithmetic shift right.
    Sar,
}

impl BinaryOp {
    pub fn is_commutative(self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Mul | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor)
    }

    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Sar)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Comparison predicate; signedness comes from the operand type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum CmpPredicate {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpPredicate {
    pub fn invert(self) -> Self {
        match self {
            CmpPredicate::Eq => CmpPredicate::Ne,
            CmpPredicate::Ne => CmpPredicate::Eq,
            CmpPredicate::Lt => CmpPredicate::Ge,
            CmpPredicate::Le => CmpPredicate::Gt,
            CmpPredicate::Gt => CmpPredicate::Le,
            CmpPredicate::Ge => CmpPredicate::Lt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum CastOp {
    Sext,
    Zext,
    Trunc,
    Bitcast,
    #[strum(serialize = "fpext")]
    FpExt,
    #[strum(serialize = "fptrunc")]
    FpTrunc,
    #[strum(serialize = "itof")]
    IntToFloat,
    #[strum(serialize = "ftoi")]
    FloatToInt,
    #[strum(serialize = "ptr2int")]
    PtrToInt,
    #[strum(serialize = "int2ptr")]
    IntToPtr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Intrinsic {
    /// Abort execution.
    Trap,
    /// Reverse the byte order of an integer.
    Bswap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    /// `a op b`.
    Binary(BinaryOp),
    /// `op a`.
    Unary(UnaryOp),
    /// Integer or pointer comparison producing a `bool`.
    Icmp(CmpPredicate),
    /// Float comparison producing a `bool`.
    Fcmp(CmpPredicate),
    /// Stack slot holding one `allocated`; the result is its address.
    Alloc { allocated: Type },
    /// `*ptr`.
    Load,
    /// `*ptr = value`; operands are `[ptr, value]`.
    Store,
    /// `base + index * sizeof(elem)`.
    GetElementPtr { elem: Type },
    /// Address of field `field` of the struct at `base`.
    GetFieldPtr { agg: Type, field: usize },
    Cast(CastOp),
    /// Direct call; operands are the arguments.
    Call { callee: Arc<str> },
    /// Call through a pointer; operand 0 is the callee.
    IndirectCall,
    Intrinsic(Intrinsic),
    /// Copy `len` bytes; operands are `[dst, src]`.
    Memcpy { len: u64 },
    /// `cond ? a : b`.
    Select,
    /// Operand `i` flows in from `incoming[i]`.
    Phi { incoming: Vec<BlockId> },
    /// Produces the tuple `|quotient, remainder|`.
    DivRem,
    /// Element `index` of a tuple operand.
    Projection { index: usize },
    Copy,
    /// Non-SSA assignment of operand 0 into the location of `dst`.
    Move { dst: InstId },
    Branch { target: BlockId },
    CondBranch { on_true: BlockId, on_false: BlockId },
    /// Compare operand 0 against each case value.
    Switch { default: BlockId, cases: Vec<(i64, BlockId)> },
    Return,
}

/// One instruction of a basic block.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub kind: InstKind,
    /// Result type, `Void` when nothing is produced.
    pub ty: Type,
    pub operands: Vec<Value>,
    /// Block currently holding the instruction.
    pub block: BlockId,
}

impl Instruction {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.kind,
            InstKind::Branch { .. } | InstKind::CondBranch { .. } | InstKind::Switch { .. } | InstKind::Return
        )
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.kind, InstKind::Phi { .. })
    }

    pub fn is_call(&self) -> bool {
        matches!(self.kind, InstKind::Call { .. } | InstKind::IndirectCall)
    }

    /// Whether the instruction has an SSA result of its own.
    pub fn has_result(&self) -> bool {
        !self.ty.is_void() && !matches!(self.kind, InstKind::Move { .. })
    }

    /// Location written by instruction `id`: itself when it has a result, the move
    /// destination for `Move`.
    pub fn defines(&self, id: InstId) -> Option<InstId> {
        match self.kind {
            InstKind::Move { dst } => Some(dst),
            _ if self.has_result() => Some(id),
            _ => None,
        }
    }

    /// Control-flow successors in terminator order, without duplicates.
    pub fn successors(&self) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut push = |b: BlockId| {
            if !out.contains(&b) {
                out.push(b);
            }
        };
        match &self.kind {
            InstKind::Branch { target } => push(*target),
            InstKind::CondBranch { on_true, on_false } => {
                push(*on_true);
                push(*on_false);
            }
            InstKind::Switch { default, cases } => {
                for (_, b) in cases {
                    push(*b);
                }
                push(*default);
            }
            _ => {}
        }
        out
    }

    /// Retarget every edge to `from` so it goes to `to`.
    pub fn replace_successor(&mut self, from: BlockId, to: BlockId) {
        let fix = |b: &mut BlockId| {
            if *b == from {
                *b = to;
            }
        };
        match &mut self.kind {
            InstKind::Branch { target } => fix(target),
            InstKind::CondBranch { on_true, on_false } => {
                fix(on_true);
                fix(on_false);
            }
            InstKind::Switch { default, cases } => {
                fix(default);
                for (_, b) in cases.iter_mut() {
                    fix(b);
                }
            }
            _ => {}
        }
    }

    /// Mnemonic used by the textual dump.
    pub fn mnemonic(&self) -> &'static str {
        match &self.kind {
            InstKind::Binary(op) => op.into(),
            InstKind::Unary(op) => op.into(),
            InstKind::Icmp(_) => "icmp",
            InstKind::Fcmp(_) => "fcmp",
            InstKind::Alloc { .. } => "alloc",
            InstKind::Load => "load",
            InstKind::Store => "store",
            InstKind::GetElementPtr { .. } => "gep",
            InstKind::GetFieldPtr { .. } => "gfp",
            InstKind::Cast(op) => op.into(),
            InstKind::Call { .. } => "call",
            InstKind::IndirectCall => "icall",
            InstKind::Intrinsic(_) => "intrinsic",
            InstKind::Memcpy { .. } => "memcpy",
            InstKind::Select => "select",
            InstKind::Phi { .. } => "phi",
            InstKind::DivRem => "divrem",
            InstKind::Projection { .. } => "proj",
            InstKind::Copy => "copy",
            InstKind::Move { .. } => "move",
            InstKind::Branch { .. } => "br",
            InstKind::CondBranch { .. } => "br",
            InstKind::Switch { .. } => "switch",
            InstKind::Return => "ret",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(kind: InstKind) -> Instruction {
        Instruction { kind, ty: Type::Void, operands: Vec::new(), block: BlockId(0) }
    }

    #[test]
    fn test_switch_successors_are_unique() {
        let sw = inst(InstKind::Switch {
            default: BlockId(3),
            cases: vec![(0, BlockId(1)), (1, BlockId(2)), (2, BlockId(1))],
        });
        assert_eq!(sw.successors(), vec![BlockId(1), BlockId(2), BlockId(3)]);
        assert!(sw.is_terminator());
    }

    #[test]
    fn test_replace_successor() {
        let mut br = inst(InstKind::CondBranch { on_true: BlockId(1), on_false: BlockId(2) });
        br.replace_successor(BlockId(2), BlockId(9));
        assert_eq!(br.successors(), vec![BlockId(1), BlockId(9)]);
    }

    #[test]
    fn test_move_defines_destination() {
        let mv = inst(InstKind::Move { dst: InstId(4) });
        assert_eq!(mv.defines(InstId(10)), Some(InstId(4)));
        assert!(!mv.has_result());
        let store = inst(InstKind::Store);
        assert_eq!(store.defines(InstId(11)), None);
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(inst(InstKind::Binary(BinaryOp::Sar)).mnemonic(), "sar");
        assert_eq!(inst(InstKind::Cast(CastOp::IntToFloat)).mnemonic(), "itof");
        assert_eq!(CmpPredicate::Le.invert(), CmpPredicate::Gt);
        assert_eq!(CmpPredicate::Ge.to_string(), "ge");
    }
}
