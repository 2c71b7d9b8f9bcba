//! Promotability of stack allocations.
//!
//! An `Alloc` can live in a virtual register when it holds one scalar and its address
//! never leaves the load/store instructions that access it with that exact type.
//! Anything else (passing the address to a call, storing it, doing arithmetic on it,
//! reading it through a different type) pins it to memory.

use hashbrown::HashMap;

use crate::ir::{BlockId, FunctionData, InstId, InstKind, Type};

/// Classification of one allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocState {
    Promotable,
    /// The allocated type is an aggregate or otherwise not a register value.
    NotScalar,
    /// The address is used by something other than a same-typed load or store.
    AddressTaken,
}

/// Per-allocation facts needed by memory-to-register promotion.
#[derive(Debug, Clone)]
pub struct AllocInfo {
    pub state: AllocState,
    pub allocated: Type,
    /// Blocks holding a store through the allocation, in layout order.
    pub def_blocks: Vec<BlockId>,
}

#[derive(Debug, Clone, Default)]
pub struct EscapeAnalysis {
    allocs: HashMap<InstId, AllocInfo>,
    /// Allocations in layout order.
    order: Vec<InstId>,
}

impl EscapeAnalysis {
    pub fn compute(func: &FunctionData) -> Self {
        let mut analysis = Self::default();
        for id in func.instructions() {
            let InstKind::Alloc { allocated } = &func[id].kind else { continue };
            let state = if allocated.is_scalar() { classify_users(func, id, allocated) } else { AllocState::NotScalar };
            let mut def_blocks = Vec::new();
            if state == AllocState::Promotable {
                for user in func.users(id) {
                    let block = func[user].block;
                    if matches!(func[user].kind, InstKind::Store) && !def_blocks.contains(&block) {
                        def_blocks.push(block);
                    }
                }
                def_blocks.sort_by_key(|b| func.layout().iter().position(|x| x == b));
            }
            log::trace!("@{}: alloc {id} of {allocated} is {state:?}", func.name());
            analysis.order.push(id);
            analysis.allocs.insert(id, AllocInfo { state, allocated: allocated.clone(), def_blocks });
        }
        analysis
    }

    pub fn state(&self, alloc: InstId) -> Option<AllocState> {
        self.allocs.get(&alloc).map(|info| info.state)
    }

    pub fn info(&self, alloc: InstId) -> Option<&AllocInfo> {
        self.allocs.get(&alloc)
    }

    pub fn is_promotable(&self, alloc: InstId) -> bool {
        self.state(alloc) == Some(AllocState::Promotable)
    }

    /// Promotable allocations in layout order.
    pub fn promotable(&self) -> Vec<InstId> {
        self.order.iter().copied().filter(|&a| self.is_promotable(a)).collect()
    }
}

fn classify_users(func: &FunctionData, alloc: InstId, allocated: &Type) -> AllocState {
    for user in func.users(alloc) {
        let inst = &func[user];
        let ok = match inst.kind {
            InstKind::Load => inst.ty == *allocated,
            InstKind::Store => {
                let ptr_ok = inst.operands[0].as_local() == Some(alloc);
                let stored_ok = inst.operands[1].as_local() != Some(alloc);
                ptr_ok && stored_ok && func.value_type(&inst.operands[1]) == *allocated
            }
            _ => false,
        };
        if !ok {
            return AllocState::AddressTaken;
        }
    }
    AllocState::Promotable
}
