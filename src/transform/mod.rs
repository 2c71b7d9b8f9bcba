// This module holds the IR-to-IR passes and the pipeline that sequences them. A pass
// takes the Module by value and hands back the transformed Module, so a failing pass
// leaves nothing half-edited behind for the caller to observe. The pipeline is an
// ordered list of named passes chosen by optimisation level; after each pass it counts
// the run in the session and, when dumping is enabled, records the module text under
// `<module>.<pass>.<n>`. Analyses are never carried from one pass to the next.

//! Passes over the IR and the pass pipeline.

pub mod mem2reg;
pub mod ssa_destruction;

use crate::analysis::DominatorTree;
use crate::core::{CompilationSession, CompileResult, OptLevel};
use crate::ir::{dump_module, verify_module, FunctionData, Module};

pub use mem2reg::{promote_function, Mem2RegPass};
pub use ssa_destruction::{destruct_function, split_critical_edges, SsaDestructionPass};

/// A named module-to-module transformation.
pub trait Pass: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, module: Module, session: &CompilationSession) -> CompileResult<Module>;
}

/// Structural verification; returns the module untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct VerifyPass;

impl Pass for VerifyPass {
    fn name(&self) -> &'static str {
        "verify"
    }

    fn run(&self, module: Module, _session: &CompilationSession) -> CompileResult<Module> {
        verify_module(&module)?;
        Ok(module)
    }
}

/// Delete every block the entry cannot reach. Returns how many were removed.
pub fn remove_unreachable_blocks(func: &mut FunctionData) -> CompileResult<usize> {
    let dom = DominatorTree::compute(func);
    let dead: Vec<_> = func.layout().iter().copied().filter(|&b| !dom.is_reachable(b)).collect();
    for &block in &dead {
        func.remove_block(block)?;
    }
    if !dead.is_empty() {
        log::debug!("@{}: removed {} unreachable blocks", func.name(), dead.len());
    }
    Ok(dead.len())
}

/// Ordered list of passes.
pub struct PassPipeline {
    passes: Vec<Box<dyn Pass>>,
}

impl PassPipeline {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Passes run at `O0`.
    pub fn base() -> Self {
        Self::new().with_pass(VerifyPass)
    }

    /// Passes run at `O1`.
    pub fn opt() -> Self {
        Self::new().with_pass(VerifyPass).with_pass(Mem2RegPass).with_pass(VerifyPass)
    }

    pub fn for_level(level: OptLevel) -> Self {
        match level {
            OptLevel::O0 => Self::base(),
            OptLevel::O1 => Self::opt(),
        }
    }

    pub fn with_pass(mut self, pass: impl Pass + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn run(&self, mut module: Module, session: &CompilationSession) -> CompileResult<Module> {
        for pass in &self.passes {
            log::debug!("running pass {} on module {}", pass.name(), module.name);
            module = pass.run(module, session)?;
            session.record_pass_run(pass.name());
            session.record_dump(&format!("{}.{}", module.name, pass.name()), || dump_module(&module));
        }
        Ok(module)
    }
}

impl Default for PassPipeline {
    fn default() -> Self {
        Self::base()
    }
}
