//! ssa-opt - an optimizing SSA compiler backend.
//!
//! Functions are built as basic-block IR in SSA form, optimized by a pass pipeline and
//! lowered to x86-64 System V assembly text (GAS, AT&T syntax).
//!
//! # Primary Usage
//!
//! ```
//! use ssa_opt::core::{CompileOptions, OptLevel};
//! use ssa_opt::ir::{FunctionBuilder, FunctionPrototype, Module, Type};
//!
//! let mut b = FunctionBuilder::new(FunctionPrototype::new("add", Type::I64, vec![Type::I64, Type::I64]));
//! let sum = b.add(b.arg(0), b.arg(1));
//! b.ret(Some(sum));
//!
//! let mut module = Module::new("demo");
//! module.add_function(b.finish()).unwrap();
//!
//! let options = CompileOptions::default().with_opt_level(OptLevel::O1);
//! let (unit, stats) = ssa_opt::compile_module(module, &options).unwrap();
//! assert!(unit.to_string().contains("add:"));
//! assert_eq!(stats.functions_compiled, 1);
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - IR data model, builder, verifier and textual dump
//! - [`analysis`] - dominance, post-dominance, liveness and live intervals
//! - [`transform`] - Mem2Reg, SSA destruction and the pass pipeline
//! - [`x64`] - lowering, register allocation and code generation for x86-64
//! - [`core`] - errors, options, compilation session and register bookkeeping

pub mod analysis;
pub mod core;
pub mod ir;
pub mod transform;
pub mod x64;

pub use crate::core::{CompilationSession, CompileError, CompileOptions, CompileResult, SessionStats};
pub use crate::x64::{code_generator, Backend, CompiledModule};

use crate::ir::Module;
use crate::transform::PassPipeline;

/// Run the pass pipeline selected by the session's options over `module`, then compile
/// it for the session's target.
pub fn compile_with_session(module: Module, session: &CompilationSession) -> CompileResult<CompiledModule> {
    let options = session.options();
    let pipeline = PassPipeline::for_level(options.opt_level);
    log::debug!("compiling module {} at {} with passes {:?}", module.name, options.opt_level, pipeline.pass_names());
    let module = pipeline.run(module, session)?;
    code_generator(options.target, options.pic).compile_module(module, session)
}

/// Compile `module` with `options`, returning the assembled unit and the statistics of
/// the run.
pub fn compile_module(module: Module, options: &CompileOptions) -> CompileResult<(CompiledModule, SessionStats)> {
    let session = CompilationSession::new(options.clone());
    let unit = compile_with_session(module, &session)?;
    Ok((unit, session.stats()))
}
