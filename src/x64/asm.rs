//! x86-64 assembly instruction list with AT&T rendering.
//!
//! [`MacroAssembler`] records labels and instructions in emission order. Nothing is
//! encoded: the list is rendered as GAS text when the unit is printed. Mnemonics are
//! typed ([`Mnemonic`]) so that only instructions the code generator knows about can be
//! emitted; the AT&T size and precision suffixes are derived from the operation width.

use std::fmt;

use strum::{Display, IntoStaticStr};

use crate::core::register_file::AsmReg;

/// AT&T size suffix for an operation on `size` bytes.
pub fn suffix(size: u32) -> char {
    match size {
        1 => 'b',
        2 => 'w',
        4 => 'l',
        _ => 'q',
    }
}

/// Condition code of `j<cc>`, `set<cc>` and `cmov<cc>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Cond {
    E,
    Ne,
    L,
    Le,
    G,
    Ge,
    B,
    Be,
    A,
    Ae,
    P,
    Np,
}

/// Integer operations taking an AT&T size suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum IntOp {
    Mov,
    Lea,
    Add,
    Sub,
    Imul,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
    Rol,
    Cmp,
    Test,
    Not,
    Neg,
    Div,
    Idiv,
    Push,
    Pop,
    Bswap,
}

/// Scalar SSE operations; the `ss`/`sd` suffix comes from the precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum SseOp {
    Mov,
    Add,
    Sub,
    Mul,
    Div,
    Ucomis,
}

/// Scalar float precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum Precision {
    #[strum(serialize = "ss")]
    Single,
    #[strum(serialize = "sd")]
    Double,
}

/// Instructions with one fixed spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Plain {
    Jmp,
    Call,
    Ret,
    Ud2,
    /// Sign-extend %rax into %rdx.
    Cqto,
    /// Sign-extend %eax into %edx.
    Cltd,
    #[strum(serialize = "rep movsb")]
    RepMovsb,
    Movsbq,
    Movswq,
    Movslq,
    Movsbl,
    Movswl,
    Movzbl,
    Movzwl,
    /// GP to or from XMM, 64 bits.
    Movq,
    /// GP to or from XMM, 32 bits.
    Movd,
    Xorps,
    Xorpd,
    Cvtss2sd,
    Cvtsd2ss,
    Cvtsi2ssq,
    Cvtsi2sdq,
    Cvttss2siq,
    Cvttsd2siq,
}

/// A mnemonic the code generator may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    /// Integer operation on `size` bytes.
    Int(IntOp, u32),
    Sse(SseOp, Precision),
    Jcc(Cond),
    Setcc(Cond),
    /// Conditional move on `size` bytes.
    Cmov(Cond, u32),
    Plain(Plain),
}

impl From<Plain> for Mnemonic {
    fn from(plain: Plain) -> Self {
        Mnemonic::Plain(plain)
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mnemonic::Int(op, size) => write!(f, "{op}{}", suffix(*size)),
            Mnemonic::Sse(op, precision) => write!(f, "{op}{precision}"),
            Mnemonic::Jcc(cc) => write!(f, "j{cc}"),
            Mnemonic::Setcc(cc) => write!(f, "set{cc}"),
            Mnemonic::Cmov(cc, size) => write!(f, "cmov{cc}{}", suffix(*size)),
            Mnemonic::Plain(plain) => write!(f, "{plain}"),
        }
    }
}

/// Instruction operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// Register viewed with `size` bytes.
    Reg { reg: AsmReg, size: u32 },
    Imm(i64),
    /// `disp(base, index, scale)`.
    Mem { base: AsmReg, index: Option<(AsmReg, u8)>, disp: i32 },
    /// `symbol(%rip)`, or `symbol@GOTPCREL(%rip)` when `got` is set.
    Rip { symbol: String, got: bool },
    /// Branch or call target.
    Symbol(String),
    /// `*%reg`, for indirect calls.
    Indirect(AsmReg),
}

impl Operand {
    pub fn reg(reg: AsmReg, size: u32) -> Self {
        Operand::Reg { reg, size }
    }

    pub fn q(reg: AsmReg) -> Self {
        Operand::Reg { reg, size: 8 }
    }

    pub fn mem(base: AsmReg, disp: i32) -> Self {
        Operand::Mem { base, index: None, disp }
    }

    pub fn rip(symbol: impl Into<String>) -> Self {
        Operand::Rip { symbol: symbol.into(), got: false }
    }

    pub fn got(symbol: impl Into<String>) -> Self {
        Operand::Rip { symbol: symbol.into(), got: true }
    }

    pub fn symbol(symbol: impl Into<String>) -> Self {
        Operand::Symbol(symbol.into())
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Mem { .. } | Operand::Rip { .. })
    }

    pub fn as_reg(&self) -> Option<AsmReg> {
        match self {
            Operand::Reg { reg, .. } => Some(*reg),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg { reg, size } => write!(f, "%{}", reg.name(*size)),
            Operand::Imm(v) => write!(f, "${v}"),
            Operand::Mem { base, index, disp } => {
                if *disp != 0 {
                    write!(f, "{disp}")?;
                }
                match index {
                    Some((index, scale)) => write!(f, "(%{},%{},{scale})", base.name(8), index.name(8)),
                    None => write!(f, "(%{})", base.name(8)),
                }
            }
            Operand::Rip { symbol, got: false } => write!(f, "{symbol}(%rip)"),
            Operand::Rip { symbol, got: true } => write!(f, "{symbol}@GOTPCREL(%rip)"),
            Operand::Symbol(s) => f.write_str(s),
            Operand::Indirect(reg) => write!(f, "*%{}", reg.name(8)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmInst {
    Label(String),
    /// Operands in AT&T order, source first.
    Inst { mnemonic: Mnemonic, operands: Vec<Operand> },
}

impl fmt::Display for AsmInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsmInst::Label(name) => write!(f, "{name}:"),
            AsmInst::Inst { mnemonic, operands } if operands.is_empty() => write!(f, "\t{mnemonic}"),
            AsmInst::Inst { mnemonic, operands } => {
                write!(f, "\t{mnemonic}\t")?;
                for (i, op) in operands.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{op}")?;
                }
                Ok(())
            }
        }
    }
}

/// Instructions of one function in emission order.
#[derive(Debug, Clone, Default)]
pub struct MacroAssembler {
    insts: Vec<AsmInst>,
    /// Instructions, labels excluded.
    emitted: usize,
}

impl MacroAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, mnemonic: impl Into<Mnemonic>, operands: Vec<Operand>) {
        let mnemonic = mnemonic.into();
        log::trace!("emit {mnemonic} {operands:?}");
        self.insts.push(AsmInst::Inst { mnemonic, operands });
        self.emitted += 1;
    }

    pub fn label(&mut self, name: impl Into<String>) {
        self.insts.push(AsmInst::Label(name.into()));
    }

    /// Integer operation `op` on `size` bytes.
    pub fn int(&mut self, op: IntOp, size: u32, operands: Vec<Operand>) {
        self.emit(Mnemonic::Int(op, size), operands);
    }

    /// `mov{size}` between two operands of the same width.
    pub fn mov(&mut self, size: u32, src: Operand, dst: Operand) {
        self.int(IntOp::Mov, size, vec![src, dst]);
    }

    pub fn lea(&mut self, addr: Operand, dst: AsmReg) {
        self.int(IntOp::Lea, 8, vec![addr, Operand::q(dst)]);
    }

    pub fn push(&mut self, reg: AsmReg) {
        self.int(IntOp::Push, 8, vec![Operand::q(reg)]);
    }

    pub fn pop(&mut self, reg: AsmReg) {
        self.int(IntOp::Pop, 8, vec![Operand::q(reg)]);
    }

    pub fn jmp(&mut self, label: &str) {
        self.emit(Plain::Jmp, vec![Operand::symbol(label)]);
    }

    /// `j<cc>` to `label`.
    pub fn jcc(&mut self, cc: Cond, label: &str) {
        self.emit(Mnemonic::Jcc(cc), vec![Operand::symbol(label)]);
    }

    pub fn ret(&mut self) {
        self.emit(Plain::Ret, Vec::new());
    }

    pub fn instructions(&self) -> &[AsmInst] {
        &self.insts
    }

    pub fn instruction_count(&self) -> usize {
        self.emitted
    }

    /// Mnemonic of the most recent instruction.
    pub fn last_mnemonic(&self) -> Option<Mnemonic> {
        self.insts.iter().rev().find_map(|i| match i {
            AsmInst::Inst { mnemonic, .. } => Some(*mnemonic),
            AsmInst::Label(_) => None,
        })
    }
}

impl fmt::Display for MacroAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for inst in &self.insts {
            writeln!(f, "{inst}")?;
        }
        Ok(())
    }
}
