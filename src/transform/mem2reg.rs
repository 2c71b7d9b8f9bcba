//! Promotion of scalar stack slots to SSA values.
//!
//! For every promotable `Alloc` the pass places phis on the iterated dominance
//! frontier of the blocks that store to it, then walks the dominator tree keeping a
//! stack of reaching definitions per variable: a store pushes its value and disappears,
//! a load is replaced by the top of the stack, and each successor phi of the variable
//! receives the top of the stack in the slot of the edge being left. Reads with no
//! reaching store see `Undef`. Promoted allocations are deleted afterwards and phis
//! that nothing but other phis read are pruned, as are phis that merge a single value.

use hashbrown::{HashMap, HashSet};

use super::{remove_unreachable_blocks, Pass};
use crate::analysis::{DominatorTree, EscapeAnalysis};
use crate::core::{CompilationSession, CompileResult};
use crate::ir::{BlockId, FunctionData, InstId, InstKind, Module, Value};

#[derive(Debug, Default, Clone, Copy)]
pub struct Mem2RegPass;

impl Pass for Mem2RegPass {
    fn name(&self) -> &'static str {
        "mem2reg"
    }

    fn run(&self, mut module: Module, session: &CompilationSession) -> CompileResult<Module> {
        for func in module.functions_mut() {
            let phis = promote_function(func)?;
            session.record_phis_inserted(phis);
        }
        Ok(module)
    }
}

enum Step {
    Enter(BlockId),
    /// Restore the stack depths recorded when the block was entered.
    Leave(Vec<usize>),
}

/// Promote every promotable allocation of `func`; returns the number of phis left in
/// the function.
pub fn promote_function(func: &mut FunctionData) -> CompileResult<usize> {
    remove_unreachable_blocks(func)?;
    let escape = EscapeAnalysis::compute(func);
    let vars = escape.promotable();
    if vars.is_empty() {
        return Ok(0);
    }
    let dom = DominatorTree::compute(func);
    let var_index: HashMap<InstId, usize> = vars.iter().enumerate().map(|(i, &a)| (a, i)).collect();

    // Phi placement.
    let mut phi_var: HashMap<InstId, usize> = HashMap::new();
    let mut inserted: Vec<InstId> = Vec::new();
    for (var, &alloc) in vars.iter().enumerate() {
        let Some(info) = escape.info(alloc) else { continue };
        for block in dom.iterated_frontier(&info.def_blocks) {
            let preds = func.preds(block).to_vec();
            let at = func.phis(block).len();
            let undef = vec![Value::Undef; preds.len()];
            let phi = func.insert_at(block, at, InstKind::Phi { incoming: preds }, info.allocated.clone(), undef);
            phi_var.insert(phi, var);
            inserted.push(phi);
        }
    }

    // Renaming along the dominator tree.
    let mut stacks: Vec<Vec<Value>> = vec![Vec::new(); vars.len()];
    let mut work = vec![Step::Enter(dom.root())];
    while let Some(step) = work.pop() {
        let block = match step {
            Step::Leave(depths) => {
                for (stack, depth) in stacks.iter_mut().zip(depths) {
                    stack.truncate(depth);
                }
                continue;
            }
            Step::Enter(block) => block,
        };
        work.push(Step::Leave(stacks.iter().map(Vec::len).collect()));

        for id in func[block].insts.clone() {
            let inst = &func[id];
            match inst.kind {
                InstKind::Phi { .. } => {
                    if let Some(&var) = phi_var.get(&id) {
                        stacks[var].push(Value::Local(id));
                    }
                }
                InstKind::Load => {
                    let Some(&var) = inst.operands[0].as_local().and_then(|p| var_index.get(&p)) else {
                        continue;
                    };
                    let value = reaching(&stacks, var);
                    func.replace_all_uses(id, value);
                    func.remove_inst(id)?;
                }
                InstKind::Store => {
                    let Some(&var) = inst.operands[0].as_local().and_then(|p| var_index.get(&p)) else {
                        continue;
                    };
                    stacks[var].push(inst.operands[1].clone());
                    func.remove_inst(id)?;
                }
                _ => {}
            }
        }

        for succ in func.succs(block) {
            for phi in func.phis(succ) {
                let Some(&var) = phi_var.get(&phi) else { continue };
                let InstKind::Phi { incoming } = &func[phi].kind else { continue };
                let slot = incoming.iter().position(|&b| b == block);
                if let Some(slot) = slot {
                    func.set_operand(phi, slot, reaching(&stacks, var));
                }
            }
        }

        let mut children = dom.children(block);
        children.reverse();
        work.extend(children.into_iter().map(Step::Enter));
    }

    for &alloc in &vars {
        func.remove_inst(alloc)?;
    }

    let pruned = prune_phis(func, &inserted)?;
    let kept = inserted.len() - pruned;
    log::debug!(
        "mem2reg @{}: promoted {} allocations, {} phis placed, {} kept",
        func.name(),
        vars.len(),
        inserted.len(),
        kept
    );
    Ok(kept)
}

fn reaching(stacks: &[Vec<Value>], var: usize) -> Value {
    stacks[var].last().cloned().unwrap_or(Value::Undef)
}

/// Remove inserted phis that are dead or merge a single value. Returns how many went.
fn prune_phis(func: &mut FunctionData, inserted: &[InstId]) -> CompileResult<usize> {
    let mut removed: HashSet<InstId> = HashSet::new();

    // A phi merging one value (ignoring itself) is that value.
    let mut changed = true;
    while changed {
        changed = false;
        for &phi in inserted {
            if removed.contains(&phi) {
                continue;
            }
            let mut unique: Option<&Value> = None;
            let mut trivial = true;
            for op in &func[phi].operands {
                if *op == Value::Local(phi) || unique == Some(op) {
                    continue;
                }
                if unique.is_some() {
                    trivial = false;
                    break;
                }
                unique = Some(op);
            }
            if !trivial {
                continue;
            }
            let replacement = unique.cloned().unwrap_or(Value::Undef);
            func.detach_inst(phi);
            func.replace_all_uses(phi, replacement);
            func.remove_inst(phi)?;
            removed.insert(phi);
            changed = true;
        }
    }

    // Phis read only by dead phis are dead.
    let candidates: HashSet<InstId> = inserted.iter().copied().filter(|p| !removed.contains(p)).collect();
    let mut live: HashSet<InstId> = HashSet::new();
    let mut work: Vec<InstId> = candidates
        .iter()
        .copied()
        .filter(|&p| func.users(p).iter().any(|u| !candidates.contains(u)))
        .collect();
    while let Some(phi) = work.pop() {
        if !live.insert(phi) {
            continue;
        }
        for op in &func[phi].operands {
            if let Some(def) = op.as_local().filter(|d| candidates.contains(d)) {
                work.push(def);
            }
        }
    }
    let dead: Vec<InstId> = inserted.iter().copied().filter(|p| candidates.contains(p) && !live.contains(p)).collect();
    for &phi in &dead {
        func.detach_inst(phi);
    }
    for &phi in &dead {
        func.remove_inst(phi)?;
    }
    Ok(removed.len() + dead.len())
}
