// This module computes the block orders every other analysis is phrased in. The depth
// first walk uses an explicit stack of (node, next successor) pairs so deep CFGs cannot
// overflow the call stack, and it visits successors last-to-first so that reverse
// postorder lists the first successor of a branch (the taken path) right after its
// source. Reverse postorder doubles as the linear-scan order: every block comes after its
// dominators, which is what instruction numbering and live intervals rely on.

//! Block orders: postorder, reverse postorder, preorder and linear-scan order.

use std::hash::Hash;

use hashbrown::{HashMap, HashSet};

use crate::ir::{BlockId, FunctionData};

/// Depth-first postorder of everything reachable from `root`.
pub(crate) fn dfs_postorder<N, F>(root: N, mut succs: F) -> Vec<N>
where
    N: Copy + Eq + Hash,
    F: FnMut(N) -> Vec<N>,
{
    let mut post = Vec::new();
    let mut visited = HashSet::new();
    visited.insert(root);
    let mut stack = vec![(root, succs(root), 0usize)];
    while let Some((node, node_succs, next)) = stack.last_mut() {
        let remaining = node_succs.len() - *next;
        if remaining == 0 {
            post.push(*node);
            stack.pop();
            continue;
        }
        *next += 1;
        let succ = node_succs[remaining - 1];
        if visited.insert(succ) {
            let s = succs(succ);
            stack.push((succ, s, 0));
        }
    }
    post
}

pub fn postorder(func: &FunctionData) -> Vec<BlockId> {
    dfs_postorder(func.entry(), |b| func.succs(b))
}

pub fn reverse_postorder(func: &FunctionData) -> Vec<BlockId> {
    let mut order = postorder(func);
    order.reverse();
    order
}

/// Depth-first preorder, first successor first.
pub fn preorder(func: &FunctionData) -> Vec<BlockId> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![func.entry()];
    while let Some(block) = stack.pop() {
        if !visited.insert(block) {
            continue;
        }
        order.push(block);
        for succ in func.succs(block).into_iter().rev() {
            if !visited.contains(&succ) {
                stack.push(succ);
            }
        }
    }
    order
}

/// Order in which instructions are numbered for liveness and allocation.
pub fn linear_scan_order(func: &FunctionData) -> Vec<BlockId> {
    reverse_postorder(func)
}

/// A block order with constant-time position lookup.
#[derive(Debug, Clone)]
pub struct BlockOrder {
    order: Vec<BlockId>,
    index: HashMap<BlockId, usize>,
}

impl BlockOrder {
    pub fn new(order: Vec<BlockId>) -> Self {
        let index = order.iter().enumerate().map(|(i, &b)| (b, i)).collect();
        Self { order, index }
    }

    pub fn blocks(&self) -> &[BlockId] {
        &self.order
    }

    pub fn position(&self, block: BlockId) -> Option<usize> {
        self.index.get(&block).copied()
    }

    pub fn contains(&self, block: BlockId) -> bool {
        self.index.contains_key(&block)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CmpPredicate, FunctionBuilder, FunctionPrototype, Type, Value};

    /// entry -> head; head -> body | exit; body -> head
    fn simple_loop() -> (FunctionData, [BlockId; 4]) {
        let mut b = FunctionBuilder::new(FunctionPrototype::new("l", Type::Void, vec![Type::I64]));
        let entry = b.entry();
        let head = b.create_block();
        let body = b.create_block();
        let exit = b.create_block();
        b.br(head);
        b.switch_to(head);
        let c = b.icmp(CmpPredicate::Lt, b.arg(0), Value::i64(10));
        b.cond_br(c, body, exit);
        b.switch_to(body);
        b.br(head);
        b.switch_to(exit);
        b.ret(None);
        (b.finish(), [entry, head, body, exit])
    }

    #[test]
    fn test_rpo_puts_taken_branch_first() {
        let (f, [entry, head, body, exit]) = simple_loop();
        assert_eq!(reverse_postorder(&f), vec![entry, head, body, exit]);
        assert_eq!(postorder(&f), vec![exit, body, head, entry]);
        assert_eq!(preorder(&f), vec![entry, head, body, exit]);
    }

    #[test]
    fn test_unreachable_blocks_are_skipped() {
        let (mut f, _) = simple_loop();
        let dead = f.create_block();
        f.append_inst(dead, crate::ir::InstKind::Return, Type::Void, vec![]);
        assert!(!reverse_postorder(&f).contains(&dead));
        let order = BlockOrder::new(linear_scan_order(&f));
        assert_eq!(order.len(), 4);
        assert!(!order.contains(dead));
        assert_eq!(order.position(f.entry()), Some(0));
    }
}
