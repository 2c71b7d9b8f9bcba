// This module defines the error taxonomy of the backend using the thiserror crate.
// CompileError separates structural IR errors reported by the verifier (they carry the
// function, block and instruction that failed so the caller can act on them), builder
// misuse, internal analysis invariant violations, register allocation failures and code
// generation failures. Internal invariant violations are surfaced as errors rather than
// panics: compilation of the function aborts and no partial assembly is produced.
// CompileResult<T> is the convenience alias used by every fallible operation.

//! Error types for the backend.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

use super::register_file::RegAllocError;

/// Main error type for the compilation pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("verification failed in @{function}, block {block}, instruction {instruction}: {reason}")]
    Verification {
        function: String,
        block: String,
        instruction: String,
        reason: String,
    },

    #[error("Invalid IR: {reason}")]
    InvalidIr {
        reason: String,
    },

    #[error("Analysis invariant violated: {reason}")]
    Analysis {
        reason: String,
    },

    #[error("Unsupported type {ty} for {operation}")]
    UnsupportedType {
        operation: &'static str,
        ty: String,
    },

    #[error("Register allocation failed: {reason}")]
    RegisterAllocation {
        reason: String,
    },

    #[error("Register file misuse: {0}")]
    RegisterFile(#[from] RegAllocError),

    #[error("Code generation failed: {reason}")]
    CodeGeneration {
        reason: String,
    },

    #[error("Function not found: {name}")]
    FunctionNotFound {
        name: String,
    },
}

impl CompileError {
    pub(crate) fn invalid_ir(reason: impl Into<String>) -> Self {
        Self::InvalidIr { reason: reason.into() }
    }

    pub(crate) fn analysis(reason: impl Into<String>) -> Self {
        Self::Analysis { reason: reason.into() }
    }

    pub(crate) fn regalloc(reason: impl Into<String>) -> Self {
        Self::RegisterAllocation { reason: reason.into() }
    }

    pub(crate) fn codegen(reason: impl Into<String>) -> Self {
        Self::CodeGeneration { reason: reason.into() }
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;
