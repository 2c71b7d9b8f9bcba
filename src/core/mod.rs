//! Shared infrastructure: errors, options, the compilation session and
//! physical register bookkeeping.

pub mod error;
pub mod options;
pub mod register_file;
pub mod session;

pub use error::{CompileError, CompileResult};
pub use options::{CodegenTarget, CompileOptions, OptLevel};
pub use register_file::{AsmReg, RegAllocError, RegBank, RegBitSet, RegisterFile, GP_BANK, XMM_BANK};
pub use session::{CompilationSession, FunctionStats, IrDump, SessionStats};
