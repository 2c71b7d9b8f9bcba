//! Textual dump of functions and modules.
//!
//! The format is line oriented: `define <ret> @name(%a0:type, ...) {`, one `Lk:` label
//! per block annotated with its predecessors, and tab-indented instructions of the form
//! `%n = opcode type operands`.

use std::fmt::{self, Write};

use super::function::FunctionData;
use super::instruction::{InstKind, Instruction};
use super::module::{GlobalInit, Module};
use super::value::{BlockId, InstId, Value};

fn join(values: &[Value]) -> String {
    values.iter().map(Value::to_string).collect::<Vec<_>>().join(", ")
}

fn write_inst(out: &mut String, func: &FunctionData, id: InstId, inst: &Instruction) -> fmt::Result {
    let m = inst.mnemonic();
    let ops = &inst.operands;
    if inst.has_result() {
        write!(out, "{id} = ")?;
    }
    match &inst.kind {
        InstKind::Icmp(p) | InstKind::Fcmp(p) => {
            let ty = ops.first().map(|v| func.value_type(v)).unwrap_or(inst.ty.clone());
            write!(out, "{m} {p} {ty} {}", join(ops))
        }
        InstKind::Alloc { allocated } => write!(out, "{m} {allocated}"),
        InstKind::Store => write!(out, "{m} {}", join(ops)),
        InstKind::GetElementPtr { elem } => write!(out, "{m} {elem} {}", join(ops)),
        InstKind::GetFieldPtr { agg, field } => write!(out, "{m} {agg} {}, {field}", join(ops)),
        InstKind::Call { callee } => write!(out, "{m} {} @{callee}({})", inst.ty, join(ops)),
        InstKind::IndirectCall => {
            let callee = ops.first().map(Value::to_string).unwrap_or_default();
            write!(out, "{m} {} {callee}({})", inst.ty, join(ops.get(1..).unwrap_or(&[])))
        }
        InstKind::Intrinsic(kind) => write!(out, "{m} {kind} {} ({})", inst.ty, join(ops)),
        InstKind::Memcpy { len } => write!(out, "{m} {}, {len}", join(ops)),
        InstKind::Phi { incoming } => {
            write!(out, "{m} {} ", inst.ty)?;
            for (i, (v, b)) in ops.iter().zip(incoming).enumerate() {
                if i > 0 {
                    write!(out, ", ")?;
                }
                write!(out, "[{v}, {b}]")?;
            }
            Ok(())
        }
        InstKind::Projection { index } => write!(out, "{m} {} {}, {index}", inst.ty, join(ops)),
        InstKind::Move { dst } => write!(out, "{m} {dst}, {}", join(ops)),
        InstKind::Branch { target } => write!(out, "{m} {target}"),
        InstKind::CondBranch { on_true, on_false } => {
            write!(out, "{m} {}, {on_true}, {on_false}", join(ops))
        }
        InstKind::Switch { default, cases } => {
            write!(out, "{m} {}, default {default} [", join(ops))?;
            for (i, (v, b)) in cases.iter().enumerate() {
                if i > 0 {
                    write!(out, ", ")?;
                }
                write!(out, "{v}: {b}")?;
            }
            write!(out, "]")
        }
        InstKind::Return => match ops.first() {
            Some(v) => write!(out, "{m} {} {v}", func.value_type(v)),
            None => write!(out, "{m} void"),
        },
        _ => write!(out, "{m} {} {}", inst.ty, join(ops)),
    }
}

fn write_block_header(out: &mut String, func: &FunctionData, block: BlockId) -> fmt::Result {
    write!(out, "{block}:")?;
    let preds = func.preds(block);
    if !preds.is_empty() {
        let names: Vec<String> = preds.iter().map(BlockId::to_string).collect();
        write!(out, "\t; pred={}", names.join(","))?;
    }
    writeln!(out)
}

/// Render one function.
pub fn dump_function(func: &FunctionData) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_function(&mut out, func);
    out
}

fn write_function(out: &mut String, func: &FunctionData) -> fmt::Result {
    let proto = func.prototype();
    let params: Vec<String> = proto
        .params
        .iter()
        .enumerate()
        .map(|(i, ty)| format!("%a{i}:{ty}"))
        .collect();
    writeln!(out, "define {} @{}({}) {{", proto.ret, proto.name, params.join(", "))?;
    for &block in func.layout() {
        write_block_header(out, func, block)?;
        for &id in &func[block].insts {
            write!(out, "\t")?;
            write_inst(out, func, id, &func[id])?;
            writeln!(out)?;
        }
    }
    writeln!(out, "}}")
}

/// Render a whole module: struct types, globals, extern declarations, then functions.
pub fn dump_module(module: &Module) -> String {
    let mut out = String::new();
    let _ = write_module(&mut out, module);
    out
}

fn write_module(out: &mut String, module: &Module) -> fmt::Result {
    for s in module.structs() {
        let fields: Vec<String> = s.fields.iter().map(ToString::to_string).collect();
        writeln!(out, "type %{} = {{ {} }}", s.name, fields.join(", "))?;
    }
    for g in module.globals() {
        let kind = if g.constant { "constant" } else { "global" };
        match &g.init {
            GlobalInit::Zero => writeln!(out, "@{} = {kind} {} zeroinitializer", g.name, g.ty)?,
            GlobalInit::Scalar(c) => writeln!(out, "@{} = {kind} {} {c}", g.name, g.ty)?,
            GlobalInit::Aggregate(items) => {
                let items: Vec<String> = items.iter().map(ToString::to_string).collect();
                writeln!(out, "@{} = {kind} {} {{ {} }}", g.name, g.ty, items.join(", "))?
            }
            GlobalInit::String(s) => writeln!(out, "@{} = {kind} {} {s:?}", g.name, g.ty)?,
            GlobalInit::External => writeln!(out, "extern @{} {}", g.name, g.ty)?,
        }
    }
    for e in module.externs() {
        let params: Vec<String> = e.params.iter().map(ToString::to_string).collect();
        let dots = if e.variadic { ", ..." } else { "" };
        writeln!(out, "extern {} @{}({}{dots})", e.ret, e.name, params.join(", "))?;
    }
    for func in module.functions() {
        writeln!(out)?;
        write_function(out, func)?;
    }
    Ok(())
}
