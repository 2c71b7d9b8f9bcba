// This module implements block-level liveness as a backward dataflow fixpoint. Each block
// gets a kill set (values it defines: instruction results, phi results and, in destructed
// form, the destinations of its moves) and a gen set (values read before any definition
// in the block). Phi operands are treated as reads on entry to the phi's block, so an
// operand is live-in there and therefore live-out of every predecessor; the operand is
// additionally pinned live-out of the predecessor it flows from. Blocks are swept in
// reverse linear-scan order until no set changes. Lookups for blocks outside the analysed
// region are internal errors.

//! Live-in and live-out sets per block.

use hashbrown::{HashMap, HashSet};

use super::order::{linear_scan_order, BlockOrder};
use crate::core::{CompileError, CompileResult};
use crate::ir::{BlockId, FunctionData, InstKind, ValueId};

#[derive(Debug, Clone, Default)]
struct LocalSets {
    gen: HashSet<ValueId>,
    kill: HashSet<ValueId>,
}

fn local_sets(func: &FunctionData, block: BlockId) -> LocalSets {
    let mut sets = LocalSets::default();
    for &id in &func[block].insts {
        let inst = &func[id];
        if let InstKind::Phi { .. } = inst.kind {
            sets.kill.insert(ValueId::Inst(id));
            for op in &inst.operands {
                if let Some(v) = op.value_id() {
                    sets.gen.insert(v);
                }
            }
            continue;
        }
        for op in &inst.operands {
            if let Some(v) = op.value_id() {
                if !sets.kill.contains(&v) {
                    sets.gen.insert(v);
                }
            }
        }
        if let Some(def) = inst.defines(id) {
            sets.kill.insert(ValueId::Inst(def));
        }
    }
    sets
}

/// Live-in and live-out sets of every reachable block.
#[derive(Debug, Clone)]
pub struct LivenessAnalysis {
    order: BlockOrder,
    live_in: HashMap<BlockId, HashSet<ValueId>>,
    live_out: HashMap<BlockId, HashSet<ValueId>>,
}

impl LivenessAnalysis {
    pub fn compute(func: &FunctionData) -> Self {
        let order = BlockOrder::new(linear_scan_order(func));
        let locals: HashMap<BlockId, LocalSets> =
            order.blocks().iter().map(|&b| (b, local_sets(func, b))).collect();
        let succs: HashMap<BlockId, Vec<BlockId>> =
            order.blocks().iter().map(|&b| (b, func.succs(b))).collect();

        let mut live_in: HashMap<BlockId, HashSet<ValueId>> =
            order.blocks().iter().map(|&b| (b, HashSet::new())).collect();
        let mut live_out = live_in.clone();

        let mut changed = true;
        let mut rounds = 0usize;
        while changed {
            changed = false;
            rounds += 1;
            for &block in order.blocks().iter().rev() {
                let mut out: HashSet<ValueId> = HashSet::new();
                for s in &succs[&block] {
                    if let Some(set) = live_in.get(s) {
                        out.extend(set.iter().copied());
                    }
                }
                let sets = &locals[&block];
                let mut inn: HashSet<ValueId> = out.difference(&sets.kill).copied().collect();
                inn.extend(sets.gen.iter().copied());

                if out != live_out[&block] {
                    live_out.insert(block, out);
                    changed = true;
                }
                if inn != live_in[&block] {
                    live_in.insert(block, inn);
                    changed = true;
                }
            }
        }

        // Each phi operand is available at the end of its incoming block.
        for &block in order.blocks() {
            for phi in func.phis(block) {
                let inst = &func[phi];
                let InstKind::Phi { incoming } = &inst.kind else { continue };
                for (op, pred) in inst.operands.iter().zip(incoming) {
                    if let (Some(v), Some(set)) = (op.value_id(), live_out.get_mut(pred)) {
                        set.insert(v);
                    }
                }
            }
        }

        log::debug!(
            "liveness of @{}: {} blocks converged after {} rounds",
            func.name(),
            order.len(),
            rounds
        );
        Self { order, live_in, live_out }
    }

    /// Blocks in the order the analysis numbered them.
    pub fn order(&self) -> &BlockOrder {
        &self.order
    }

    pub fn live_in(&self, block: BlockId) -> CompileResult<&HashSet<ValueId>> {
        self.live_in
            .get(&block)
            .ok_or_else(|| CompileError::analysis(format!("no liveness information for block {block}")))
    }

    pub fn live_out(&self, block: BlockId) -> CompileResult<&HashSet<ValueId>> {
        self.live_out
            .get(&block)
            .ok_or_else(|| CompileError::analysis(format!("no liveness information for block {block}")))
    }

    pub fn is_live_in(&self, block: BlockId, value: ValueId) -> bool {
        self.live_in.get(&block).is_some_and(|s| s.contains(&value))
    }

    pub fn is_live_out(&self, block: BlockId, value: ValueId) -> bool {
        self.live_out.get(&block).is_some_and(|s| s.contains(&value))
    }
}
