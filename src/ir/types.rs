//! IR types with size, alignment and struct layout.

use std::fmt;
use std::sync::Arc;

/// A named aggregate with ordered fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<Type>,
}

impl StructType {
    pub fn new(name: impl Into<String>, fields: Vec<Type>) -> Self {
        Self { name: name.into(), fields }
    }

    /// Offset of field `index`: fields are placed in order, each aligned to its
    /// natural alignment.
    pub fn field_offset(&self, index: usize) -> Option<u64> {
        let mut offset = 0u64;
        for (i, field) in self.fields.iter().enumerate() {
            offset = align_to(offset, field.align_of());
            if i == index {
                return Some(offset);
            }
            offset += field.size_of();
        }
        None
    }

    pub fn align_of(&self) -> u64 {
        self.fields.iter().map(Type::align_of).max().unwrap_or(1)
    }

    pub fn size_of(&self) -> u64 {
        let mut offset = 0u64;
        for field in &self.fields {
            offset = align_to(offset, field.align_of()) + field.size_of();
        }
        align_to(offset, self.align_of())
    }
}

/// Round `value` up to a multiple of `align`.
pub fn align_to(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

/// IR type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    /// Result of a comparison.
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Ptr,
    Array(Arc<Type>, u64),
    Struct(Arc<StructType>),
    /// Result of a tuple-producing instruction, read through projections.
    Tuple(Arc<[Type]>),
    Undef,
}

impl Type {
    pub fn array(elem: Type, len: u64) -> Type {
        Type::Array(Arc::new(elem), len)
    }

    pub fn structure(ty: StructType) -> Type {
        Type::Struct(Arc::new(ty))
    }

    pub fn tuple(elems: &[Type]) -> Type {
        Type::Tuple(Arc::from(elems))
    }

    pub fn size_of(&self) -> u64 {
        match self {
            Type::Void | Type::Undef | Type::Tuple(_) => 0,
            Type::Bool | Type::I8 | Type::U8 => 1,
            Type::I16 | Type::U16 => 2,
            Type::I32 | Type::U32 | Type::F32 => 4,
            Type::I64 | Type::U64 | Type::F64 | Type::Ptr => 8,
            Type::Array(elem, len) => elem.size_of() * len,
            Type::Struct(s) => s.size_of(),
        }
    }

    pub fn align_of(&self) -> u64 {
        match self {
            Type::Array(elem, _) => elem.align_of(),
            Type::Struct(s) => s.align_of(),
            other => other.size_of().max(1),
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Type::I8 | Type::I16 | Type::I32 | Type::I64 | Type::U8 | Type::U16 | Type::U32 | Type::U64
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Type::I8 | Type::I16 | Type::I32 | Type::I64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Ptr)
    }

    /// Fits in one register: integers, floats, pointers and flags.
    pub fn is_scalar(&self) -> bool {
        self.is_integer() || self.is_float() || matches!(self, Type::Ptr | Type::Bool)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Type::Array(..) | Type::Struct(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// Element `index` of a tuple type.
    pub fn tuple_element(&self, index: usize) -> Option<&Type> {
        match self {
            Type::Tuple(elems) => elems.get(index),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Bool => write!(f, "bool"),
            Type::I8 => write!(f, "i8"),
            Type::I16 => write!(f, "i16"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::U8 => write!(f, "u8"),
            Type::U16 => write!(f, "u16"),
            Type::U32 => write!(f, "u32"),
            Type::U64 => write!(f, "u64"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
            Type::Ptr => write!(f, "ptr"),
            Type::Array(elem, len) => write!(f, "<{elem} x {len}>"),
            Type::Struct(s) => write!(f, "%{}", s.name),
            Type::Tuple(elems) => {
                write!(f, "|")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "|")
            }
            Type::Undef => write!(f, "undef"),
        }
    }
}
