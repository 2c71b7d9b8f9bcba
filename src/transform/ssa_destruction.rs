// This module takes a function out of SSA form. Critical edges are split first so that
// every copy has a block of its own to live in. Then, for each predecessor of a block
// with phis, the phis' incoming values form a parallel copy that is sequentialised in
// front of the predecessor's terminator as Move instructions. A move is emitted once no
// other pending move still reads its destination; when only cycles remain, one
// destination is saved in a fresh Copy and the pending reads are redirected to it.
// Finally each phi is detached from its block. The phi's identity survives as a location
// with several definitions (the moves) that its former readers keep reading.

//! Phi elimination through parallel copies.

use super::Pass;
use crate::core::{CompilationSession, CompileError, CompileResult};
use crate::ir::{BlockId, FunctionData, InstId, InstKind, Module, Value};

#[derive(Debug, Default, Clone, Copy)]
pub struct SsaDestructionPass;

impl Pass for SsaDestructionPass {
    fn name(&self) -> &'static str {
        "ssa-destruction"
    }

    fn run(&self, mut module: Module, _session: &CompilationSession) -> CompileResult<Module> {
        for func in module.functions_mut() {
            destruct_function(func)?;
        }
        Ok(module)
    }
}

/// Split every edge whose source has several successors and whose target has several
/// predecessors. Returns the number of blocks inserted.
pub fn split_critical_edges(func: &mut FunctionData) -> CompileResult<usize> {
    let mut edges: Vec<(BlockId, BlockId)> = Vec::new();
    for &block in func.layout() {
        let succs = func.succs(block);
        if succs.len() < 2 {
            continue;
        }
        for succ in succs {
            if func.preds(succ).len() > 1 {
                edges.push((block, succ));
            }
        }
    }
    for &(from, to) in &edges {
        let mid = func.split_edge(from, to)?;
        log::trace!("@{}: split critical edge {from} -> {to} with {mid}", func.name());
    }
    Ok(edges.len())
}

/// Remove every phi of `func`. Returns the number of instructions inserted (moves and
/// cycle-breaking copies).
pub fn destruct_function(func: &mut FunctionData) -> CompileResult<usize> {
    split_critical_edges(func)?;

    let mut inserted = 0;
    let mut all_phis: Vec<InstId> = Vec::new();
    for block in func.layout().to_vec() {
        let phis = func.phis(block);
        if phis.is_empty() {
            continue;
        }
        for (slot, &pred) in func.preds(block).to_vec().iter().enumerate() {
            let copies = phis
                .iter()
                .map(|&phi| incoming_value(func, phi, pred, slot).map(|v| (phi, v)))
                .collect::<CompileResult<Vec<_>>>()?;
            inserted += sequentialize(func, pred, copies)?;
        }
        all_phis.extend(phis);
    }
    for &phi in &all_phis {
        func.detach_inst(phi);
    }
    log::debug!(
        "ssa destruction @{}: {} phis eliminated, {} copies inserted",
        func.name(),
        all_phis.len(),
        inserted
    );
    Ok(inserted)
}

fn incoming_value(func: &FunctionData, phi: InstId, pred: BlockId, slot: usize) -> CompileResult<Value> {
    let inst = &func[phi];
    let InstKind::Phi { incoming } = &inst.kind else {
        return Err(CompileError::analysis(format!("{phi} is not a phi")));
    };
    // Operands follow predecessor order; look the edge up by block to be sure.
    let index = if incoming.get(slot) == Some(&pred) {
        slot
    } else {
        incoming.iter().position(|&b| b == pred).ok_or_else(|| {
            CompileError::analysis(format!("phi {phi} in @{} has no operand for {pred}", func.name()))
        })?
    };
    Ok(inst.operands[index].clone())
}

/// Emit the parallel copy `dst_i <- src_i` before the terminator of `pred`.
fn sequentialize(func: &mut FunctionData, pred: BlockId, copies: Vec<(InstId, Value)>) -> CompileResult<usize> {
    let term = func
        .terminator(pred)
        .ok_or_else(|| CompileError::analysis(format!("block {pred} of @{} has no terminator", func.name())))?;
    let mut pending: Vec<(InstId, Value)> = copies
        .into_iter()
        .filter(|(dst, src)| *src != Value::Local(*dst) && !src.is_undef())
        .collect();
    let mut emitted = 0;
    while !pending.is_empty() {
        let ready = (0..pending.len()).find(|&i| {
            let dst = Value::Local(pending[i].0);
            pending.iter().enumerate().all(|(j, (_, src))| j == i || *src != dst)
        });
        match ready {
            Some(i) => {
                let (dst, src) = pending.remove(i);
                let ty = func[dst].ty.clone();
                func.insert_before(term, InstKind::Move { dst }, ty, vec![src]);
            }
            None => {
                // Only cycles are left: park one destination in a temporary.
                let dst = pending[0].0;
                let ty = func[dst].ty.clone();
                let temp = func.insert_before(term, InstKind::Copy, ty, vec![Value::Local(dst)]);
                for (_, src) in pending.iter_mut() {
                    if *src == Value::Local(dst) {
                        *src = Value::Local(temp);
                    }
                }
                log::trace!("@{}: broke copy cycle in {pred} through {temp}", func.name());
            }
        }
        emitted += 1;
    }
    Ok(emitted)
}
