//! SSA intermediate representation.
//!
//! - [`types`] - type tags, sizes and struct layout
//! - [`value`] - operands and entity handles
//! - [`instruction`] - the instruction enum
//! - [`function`] - blocks, instructions and the def-use index
//! - [`module`] - functions, externs, globals and struct types
//! - [`builder`] - programmatic construction
//! - [`display`] - textual dump
//! - [`verify`] - structural verification

pub mod builder;
pub mod display;
pub mod function;
pub mod instruction;
pub mod module;
pub mod types;
pub mod value;
pub mod verify;

pub use builder::FunctionBuilder;
pub use display::{dump_function, dump_module};
pub use function::{BasicBlock, FunctionData, FunctionPrototype};
pub use instruction::{BinaryOp, CastOp, CmpPredicate, InstKind, Instruction, Intrinsic, UnaryOp};
pub use module::{GlobalInit, GlobalValue, Module};
pub use types::{align_to, StructType, Type};
pub use value::{BlockId, Constant, InstId, Value, ValueId};
pub use verify::{verify_function, verify_module};
