// This module provides the compilation session that threads through one run of the pass
// pipeline and the backend. CompilationSession owns the options of the run, accumulates
// statistics (functions compiled, assembly instructions emitted, phis inserted by
// promotion, copies inserted by SSA destruction, register assignments and spills) and,
// when IR dumping is enabled, collects a textual dump after every pass keyed by the pass
// name and a running numeric suffix. Dumps are a side channel only: nothing downstream
// reads them back. Per-function work may run on worker threads, so workers report a
// FunctionStats value that the driver merges into the session after the join.

//! Compilation session state and statistics.

use std::cell::{Cell, RefCell};
use std::fmt;

use hashbrown::HashMap;

use super::options::CompileOptions;

/// IR text captured after a pass ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrDump {
    /// `<pass>.<n>`, e.g. `mem2reg.1`.
    pub name: String,
    pub text: String,
}

/// Statistics gathered for a single function by a backend worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionStats {
    pub instructions_emitted: usize,
    pub registers_allocated: usize,
    pub spills_generated: usize,
    pub moves_inserted: usize,
    pub frame_size: u32,
}

/// Session over one compilation run.
pub struct CompilationSession {
    options: CompileOptions,
    /// Statistics accumulated so far.
    stats: RefCell<SessionStats>,
    /// Pass dumps in the order they were taken.
    dumps: RefCell<Vec<IrDump>>,
    /// Suffix of the next dump.
    dump_counter: Cell<usize>,
}

impl CompilationSession {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            stats: RefCell::new(SessionStats::default()),
            dumps: RefCell::new(Vec::new()),
            dump_counter: Cell::new(0),
        }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Record a dump of `text` taken after `pass`. Does nothing unless dumping is on.
    pub fn record_dump(&self, pass: &str, text: impl FnOnce() -> String) {
        if !self.options.dump_ir {
            return;
        }
        let n = self.dump_counter.get() + 1;
        self.dump_counter.set(n);
        let name = format!("{pass}.{n}");
        log::trace!("recording IR dump {name}");
        self.dumps.borrow_mut().push(IrDump { name, text: text() });
    }

    pub fn dumps(&self) -> Vec<IrDump> {
        self.dumps.borrow().clone()
    }

    pub fn record_phis_inserted(&self, count: usize) {
        self.stats.borrow_mut().phis_inserted += count;
    }

    pub fn record_pass_run(&self, pass: &str) {
        *self
            .stats
            .borrow_mut()
            .pass_runs
            .entry(pass.to_string())
            .or_insert(0) += 1;
    }

    /// Merge what a backend worker reported for `name`.
    pub fn record_function_compiled(&self, name: &str, stats: &FunctionStats) {
        let mut s = self.stats.borrow_mut();
        s.functions_compiled += 1;
        s.instructions_emitted += stats.instructions_emitted;
        s.registers_allocated += stats.registers_allocated;
        s.spills_generated += stats.spills_generated;
        s.moves_inserted += stats.moves_inserted;
        if stats.instructions_emitted > s.largest_function_size {
            s.largest_function_size = stats.instructions_emitted;
            s.largest_function_name = name.to_string();
        }
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Compilation statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Number of functions compiled.
    pub functions_compiled: usize,

    /// Number of assembly instructions emitted.
    pub instructions_emitted: usize,

    /// Phi nodes inserted by memory-to-register promotion.
    pub phis_inserted: usize,

    /// Moves inserted by SSA destruction.
    pub moves_inserted: usize,

    /// Values assigned a register.
    pub registers_allocated: usize,

    /// Values placed in a stack slot.
    pub spills_generated: usize,

    /// Largest function compiled, in emitted instructions.
    pub largest_function_size: usize,

    /// Name of largest function.
    pub largest_function_name: String,

    /// How often each pass ran.
    pub pass_runs: HashMap<String, usize>,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Functions compiled: {}", self.functions_compiled)?;
        writeln!(f, "  Instructions emitted: {}", self.instructions_emitted)?;
        writeln!(f, "  Phis inserted: {}", self.phis_inserted)?;
        writeln!(f, "  Moves inserted: {}", self.moves_inserted)?;
        writeln!(f, "  Registers allocated: {}", self.registers_allocated)?;
        writeln!(f, "  Spills generated: {}", self.spills_generated)?;

        if !self.largest_function_name.is_empty() {
            writeln!(
                f,
                "  Largest function: {} ({} instructions)",
                self.largest_function_name, self.largest_function_size
            )?;
        }

        if !self.pass_runs.is_empty() {
            writeln!(f, "  Pass runs:")?;
            let mut sorted: Vec<_> = self.pass_runs.iter().collect();
            sorted.sort();
            for (pass, count) in sorted {
                writeln!(f, "    {}: {}", pass, count)?;
            }
        }
        Ok(())
    }
}
