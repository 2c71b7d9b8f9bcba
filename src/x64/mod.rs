//! x86-64 System V backend.
//!
//! - `lowering`: target-specific rewrites that make fixed-register operands explicit
//! - `calling_convention`: argument assignment, register sets and stack frame layout
//! - `regalloc`: linear-scan register allocation over live intervals
//! - `codegen`: instruction selection into a [`MacroAssembler`]
//! - `unit`: constant pool and module-level assembly text
//! - `backend`: the per-module driver

pub mod asm;
pub mod backend;
pub mod calling_convention;
pub mod codegen;
pub mod lowering;
pub mod regalloc;
pub mod unit;

pub use asm::{AsmInst, Cond, MacroAssembler, Mnemonic, Operand};
pub use backend::{code_generator, prepare_function, Backend, PreparedFunction, X64Backend};
pub use calling_convention::{CCAssigner, CCAssignment, StackFrame, SysVAssigner};
pub use codegen::{FunctionCodegen, ModuleSymbols};
pub use lowering::lower_function;
pub use regalloc::{allocate_registers, Location, RegisterAllocation};
pub use unit::{CompiledFunction, CompiledModule, PoolEntry};
