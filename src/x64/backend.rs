// This module drives the x86-64 backend over a whole module. Symbol facts the code
// generator needs (variadic prototypes, which names live outside the unit) are collected
// first; then the function bodies are taken out of the module and each one runs the
// per-function chain on its own: target lowering, SSA destruction, liveness, live
// intervals, linear-scan allocation and instruction selection. Functions share nothing
// mutable, so with `parallel` set they are handed to the rayon pool. Workers return their
// statistics and optional IR dump, which are merged into the session after the join.

//! x86-64 backend driver.

use rayon::prelude::*;

use super::codegen::{FunctionCodegen, ModuleSymbols};
use super::lowering::lower_function;
use super::regalloc::{allocate_registers, RegisterAllocation};
use super::unit::{CompiledFunction, CompiledModule};
use crate::analysis::{LiveIntervals, LivenessAnalysis};
use crate::core::{CodegenTarget, CompilationSession, CompileResult};
use crate::ir::{dump_function, BlockId, FunctionData, Module};
use crate::transform::destruct_function;

/// A code generator for one target.
pub trait Backend: Send + Sync {
    fn target(&self) -> CodegenTarget;

    /// Compile every function of `module` and assemble the unit.
    fn compile_module(&self, module: Module, session: &CompilationSession) -> CompileResult<CompiledModule>;
}

/// Backend for `target`.
pub fn code_generator(target: CodegenTarget, pic: bool) -> Box<dyn Backend> {
    match target {
        CodegenTarget::X64SysV => Box::new(X64Backend::new(pic)),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct X64Backend {
    pic: bool,
}

/// A function in destructed form with everything needed to emit it.
pub struct PreparedFunction {
    pub func: FunctionData,
    pub order: Vec<BlockId>,
    pub intervals: LiveIntervals,
    pub allocation: RegisterAllocation,
    /// Moves and copies inserted by SSA destruction.
    pub moves_inserted: usize,
}

/// Run everything up to and including register allocation on `func`.
pub fn prepare_function(mut func: FunctionData) -> CompileResult<PreparedFunction> {
    lower_function(&mut func)?;
    let moves_inserted = destruct_function(&mut func)?;
    let liveness = LivenessAnalysis::compute(&func);
    let intervals = LiveIntervals::compute(&func, &liveness)?;
    let allocation = allocate_registers(&func, &intervals)?;
    let order = liveness.order().blocks().to_vec();
    Ok(PreparedFunction { func, order, intervals, allocation, moves_inserted })
}

struct FunctionOutput {
    compiled: CompiledFunction,
    dump: Option<String>,
}

impl X64Backend {
    pub fn new(pic: bool) -> Self {
        Self { pic }
    }

    fn compile_function(&self, func: FunctionData, symbols: &ModuleSymbols, dump: bool) -> CompileResult<FunctionOutput> {
        let prepared = prepare_function(func)?;
        let dump = dump.then(|| dump_function(&prepared.func));
        let mut compiled =
            FunctionCodegen::new(&prepared.func, &prepared.order, &prepared.allocation, symbols, self.pic).generate()?;
        compiled.stats.moves_inserted = prepared.moves_inserted;
        Ok(FunctionOutput { compiled, dump })
    }
}

impl Backend for X64Backend {
    fn target(&self) -> CodegenTarget {
        CodegenTarget::X64SysV
    }

    fn compile_module(&self, mut module: Module, session: &CompilationSession) -> CompileResult<CompiledModule> {
        let symbols = ModuleSymbols::collect(&module);
        let functions = module.take_functions();
        let dump = session.options().dump_ir;
        log::debug!(
            "compiling {} functions of module {} (parallel: {})",
            functions.len(),
            module.name,
            session.options().parallel
        );

        let outputs: Vec<FunctionOutput> = if session.options().parallel {
            functions
                .into_par_iter()
                .map(|f| self.compile_function(f, &symbols, dump))
                .collect::<CompileResult<_>>()?
        } else {
            functions
                .into_iter()
                .map(|f| self.compile_function(f, &symbols, dump))
                .collect::<CompileResult<_>>()?
        };

        let mut compiled = Vec::with_capacity(outputs.len());
        for output in outputs {
            let name = output.compiled.name.clone();
            session.record_function_compiled(&name, &output.compiled.stats);
            if let Some(text) = output.dump {
                session.record_dump(&format!("{name}.ssa-destruction"), || text);
            }
            compiled.push(output.compiled);
        }
        Ok(CompiledModule { name: module.name.clone(), globals: module.globals().to_vec(), functions: compiled })
    }
}
