//! Operands: constants, instruction results, arguments and global symbols.

use std::fmt;
use std::sync::Arc;

use super::types::Type;

/// Handle of a basic block inside its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Handle of an instruction inside its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl InstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Identity of a non-constant value: something that needs a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueId {
    Arg(u32),
    Inst(InstId),
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueId::Arg(i) => write!(f, "%a{i}"),
            ValueId::Inst(id) => write!(f, "{id}"),
        }
    }
}

/// Immutable constant identified by its type and bit pattern.
///
/// Integers are stored zero-extended from their width, floats as their IEEE bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constant {
    pub ty: Type,
    pub bits: u64,
}

impl Constant {
    pub fn new(ty: Type, bits: u64) -> Self {
        let bits = match ty.size_of() {
            1 => bits & 0xff,
            2 => bits & 0xffff,
            4 => bits & 0xffff_ffff,
            _ => bits,
        };
        Self { ty, bits }
    }

    pub fn int(ty: Type, value: i64) -> Self {
        Self::new(ty, value as u64)
    }

    pub fn f64(value: f64) -> Self {
        Self::new(Type::F64, value.to_bits())
    }

    pub fn f32(value: f32) -> Self {
        Self::new(Type::F32, value.to_bits() as u64)
    }

    pub fn bool(value: bool) -> Self {
        Self::new(Type::Bool, value as u64)
    }

    pub fn null() -> Self {
        Self::new(Type::Ptr, 0)
    }

    /// Value sign- or zero-extended to 64 bits according to the type.
    pub fn as_i64(&self) -> i64 {
        if !self.ty.is_signed() {
            return self.bits as i64;
        }
        match self.ty.size_of() {
            1 => self.bits as u8 as i8 as i64,
            2 => self.bits as u16 as i16 as i64,
            4 => self.bits as u32 as i32 as i64,
            _ => self.bits as i64,
        }
    }

    /// Encodable as a sign-extended 32-bit immediate operand.
    pub fn fits_imm32(&self) -> bool {
        if self.ty.is_float() {
            return false;
        }
        if self.ty.size_of() <= 4 {
            return true;
        }
        i32::try_from(self.bits as i64).is_ok()
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            Type::F64 => write!(f, "{:?}", f64::from_bits(self.bits)),
            Type::F32 => write!(f, "{:?}", f32::from_bits(self.bits as u32)),
            Type::Bool => write!(f, "{}", self.bits != 0),
            Type::Ptr if self.bits == 0 => write!(f, "null"),
            _ => write!(f, "{}", self.as_i64()),
        }
    }
}

/// Instruction operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Constant(Constant),
    /// Result of the instruction.
    Local(InstId),
    /// Function argument by index.
    Argument(u32),
    /// Address of a global symbol or function.
    Global(Arc<str>),
    /// Value that may be anything; read of memory never written.
    Undef,
}

impl Value {
    pub fn int(ty: Type, value: i64) -> Self {
        Value::Constant(Constant::int(ty, value))
    }

    pub fn i64(value: i64) -> Self {
        Self::int(Type::I64, value)
    }

    pub fn u64(value: u64) -> Self {
        Value::Constant(Constant::new(Type::U64, value))
    }

    pub fn i32(value: i32) -> Self {
        Self::int(Type::I32, value as i64)
    }

    pub fn f64(value: f64) -> Self {
        Value::Constant(Constant::f64(value))
    }

    pub fn global(name: &str) -> Self {
        Value::Global(Arc::from(name))
    }

    pub fn as_local(&self) -> Option<InstId> {
        match self {
            Value::Local(id) => Some(*id),
            _ => None,
        }
    }

    /// Identity when the value needs a location.
    pub fn value_id(&self) -> Option<ValueId> {
        match self {
            Value::Local(id) => Some(ValueId::Inst(*id)),
            Value::Argument(i) => Some(ValueId::Arg(*i)),
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Value::Constant(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_undef(&self) -> bool {
        matches!(self, Value::Undef)
    }
}

impl From<ValueId> for Value {
    fn from(id: ValueId) -> Self {
        match id {
            ValueId::Arg(i) => Value::Argument(i),
            ValueId::Inst(id) => Value::Local(id),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Constant(c) => write!(f, "{c}"),
            Value::Local(id) => write!(f, "{id}"),
            Value::Argument(i) => write!(f, "%a{i}"),
            Value::Global(name) => write!(f, "@{name}"),
            Value::Undef => write!(f, "undef"),
        }
    }
}
