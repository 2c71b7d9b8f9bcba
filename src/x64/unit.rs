//! Assembled output: per-function listings and the module-level unit.
//!
//! A [`CompiledModule`] prints as one GAS translation unit: the `.data` section with the
//! module's globals followed by the constant pool, then the `.text` section with every
//! function under its exported label.

use std::fmt::{self, Write as _};

use super::asm::MacroAssembler;
use crate::core::FunctionStats;
use crate::ir::{Constant, GlobalInit, GlobalValue};

/// Constant too wide for an immediate, emitted into `.data` and read by label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolEntry {
    pub constant: Constant,
}

impl PoolEntry {
    pub fn new(constant: Constant) -> Self {
        Self { constant }
    }

    /// `.LCP_<type>_<bits>`. Equal constants get equal labels in every function.
    pub fn label(&self) -> String {
        format!(".LCP_{}_{:016x}", self.constant.ty, self.constant.bits)
    }

    fn size(&self) -> u32 {
        self.constant.ty.size_of().max(1) as u32
    }
}

#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub name: String,
    pub asm: MacroAssembler,
    /// Pool entries referenced by the body, in first-use order.
    pub pool: Vec<PoolEntry>,
    pub stats: FunctionStats,
}

/// A compiled module, printable as assembly text.
#[derive(Debug, Clone, Default)]
pub struct CompiledModule {
    pub name: String,
    pub globals: Vec<GlobalValue>,
    pub functions: Vec<CompiledFunction>,
}

impl CompiledModule {
    pub fn function(&self, name: &str) -> Option<&CompiledFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Pool entries of all functions, deduplicated by label in first-appearance order.
    pub fn constant_pool(&self) -> Vec<&PoolEntry> {
        let mut seen = hashbrown::HashSet::new();
        self.functions
            .iter()
            .flat_map(|f| f.pool.iter())
            .filter(|e| seen.insert(e.label()))
            .collect()
    }

    pub fn instruction_count(&self) -> usize {
        self.functions.iter().map(|f| f.asm.instruction_count()).sum()
    }
}

fn data_directive(size: u64) -> &'static str {
    match size {
        1 => ".byte",
        2 => ".short",
        4 => ".long",
        _ => ".quad",
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{b:03o}");
            }
        }
    }
    out
}

fn write_constant(f: &mut fmt::Formatter<'_>, c: &Constant) -> fmt::Result {
    writeln!(f, "\t{}\t{:#x}", data_directive(c.ty.size_of().max(1)), c.bits)
}

fn write_global(f: &mut fmt::Formatter<'_>, global: &GlobalValue) -> fmt::Result {
    let size = global.ty.size_of();
    let align = global.ty.align_of().max(1);
    writeln!(f, "\t.globl\t{}", global.name)?;
    writeln!(f, "\t.p2align\t{}", align.trailing_zeros())?;
    writeln!(f, "{}:", global.name)?;
    match &global.init {
        GlobalInit::Zero => writeln!(f, "\t.zero\t{}", size.max(1)),
        GlobalInit::Scalar(c) => write_constant(f, c),
        GlobalInit::Aggregate(elems) => {
            let mut written = 0;
            for c in elems {
                write_constant(f, c)?;
                written += c.ty.size_of().max(1);
            }
            if written < size {
                writeln!(f, "\t.zero\t{}", size - written)?;
            }
            Ok(())
        }
        GlobalInit::String(s) => writeln!(f, "\t.string\t\"{}\"", escape(s)),
        GlobalInit::External => Ok(()),
    }
}

impl fmt::Display for CompiledModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\t.file\t\"{}\"", self.name)?;
        let globals: Vec<&GlobalValue> = self.globals.iter().filter(|g| !g.is_external()).collect();
        let pool = self.constant_pool();
        if !globals.is_empty() || !pool.is_empty() {
            writeln!(f, "\t.data")?;
        }
        for global in globals {
            write_global(f, global)?;
        }
        for entry in pool {
            writeln!(f, "\t.p2align\t{}", entry.size().trailing_zeros())?;
            writeln!(f, "{}:", entry.label())?;
            write_constant(f, &entry.constant)?;
        }
        writeln!(f, "\t.text")?;
        for func in &self.functions {
            writeln!(f, "\t.globl\t{}", func.name)?;
            writeln!(f, "\t.p2align\t4")?;
            writeln!(f, "{}:", func.name)?;
            write!(f, "{}", func.asm)?;
        }
        Ok(())
    }
}
