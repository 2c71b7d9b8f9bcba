// This module computes dominator and post-dominator trees with the iterative algorithm
// of Cooper, Harvey and Kennedy. Nodes are numbered in postorder; every round walks the
// nodes in reverse postorder and intersects the dominator chains of the predecessors
// processed so far by leapfrogging up the chains by postorder number until they meet,
// until nothing changes. Post-dominance runs the same core on the reversed graph; when a
// function has several return blocks a virtual exit node becomes the root. Dominance
// frontiers are derived lazily on first request by walking every predecessor of each join
// node up to the join node's immediate dominator, and dominator chains used by
// `dominates` are cached per query target. Both caches belong to the tree instance: a
// pass that edits the CFG drops the tree and computes a new one.

//! Dominator and post-dominator trees with dominance frontiers.

use std::cell::{OnceCell, RefCell};
use std::hash::Hash;

use hashbrown::{HashMap, HashSet};

use super::order::dfs_postorder;
use crate::ir::{BlockId, FunctionData, InstKind};

/// Dominance information over an arbitrary node type.
#[derive(Debug)]
struct DomInfo<N: Copy + Eq + Hash> {
    root: N,
    /// Reverse postorder of the reachable nodes.
    rpo: Vec<N>,
    po_number: HashMap<N, usize>,
    /// Immediate dominators; the root maps to itself.
    idom: HashMap<N, N>,
    /// Reachable predecessors in the direction of the analysis.
    preds: HashMap<N, Vec<N>>,
    frontiers: OnceCell<HashMap<N, Vec<N>>>,
    /// Full dominator sets of the nodes `dominates` was asked about.
    chains: RefCell<HashMap<N, HashSet<N>>>,
}

impl<N: Copy + Eq + Hash> DomInfo<N> {
    fn compute<S, P>(root: N, succs: S, preds_of: P) -> Self
    where
        S: FnMut(N) -> Vec<N>,
        P: Fn(N) -> Vec<N>,
    {
        let post = dfs_postorder(root, succs);
        let po_number: HashMap<N, usize> = post.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        let preds: HashMap<N, Vec<N>> = post
            .iter()
            .map(|&n| {
                let ps = preds_of(n).into_iter().filter(|p| po_number.contains_key(p)).collect();
                (n, ps)
            })
            .collect();

        // Dominators indexed by postorder number.
        const UNDEF: usize = usize::MAX;
        let root_po = post.len() - 1;
        let mut doms = vec![UNDEF; post.len()];
        doms[root_po] = root_po;

        let intersect = |doms: &[usize], mut a: usize, mut b: usize| {
            while a != b {
                while a < b {
                    a = doms[a];
                }
                while b < a {
                    b = doms[b];
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for po in (0..root_po).rev() {
                let node = post[po];
                let mut new_idom = UNDEF;
                for p in &preds[&node] {
                    let p = po_number[p];
                    if doms[p] == UNDEF {
                        continue;
                    }
                    new_idom = if new_idom == UNDEF { p } else { intersect(&doms, p, new_idom) };
                }
                if new_idom != UNDEF && doms[po] != new_idom {
                    doms[po] = new_idom;
                    changed = true;
                }
            }
        }

        let idom = post
            .iter()
            .enumerate()
            .filter(|(po, _)| doms[*po] != UNDEF)
            .map(|(po, &n)| (n, post[doms[po]]))
            .collect();
        let mut rpo = post;
        rpo.reverse();

        Self {
            root,
            rpo,
            po_number,
            idom,
            preds,
            frontiers: OnceCell::new(),
            chains: RefCell::new(HashMap::new()),
        }
    }

    fn idom(&self, n: N) -> Option<N> {
        if n == self.root {
            return None;
        }
        self.idom.get(&n).copied()
    }

    fn is_reachable(&self, n: N) -> bool {
        self.idom.contains_key(&n)
    }

    fn chain(&self, n: N) -> HashSet<N> {
        let mut set = HashSet::new();
        let mut cur = n;
        set.insert(cur);
        while let Some(up) = self.idom(cur) {
            set.insert(up);
            cur = up;
        }
        set
    }

    fn dominates(&self, a: N, b: N) -> bool {
        if a == b {
            return true;
        }
        if !self.is_reachable(b) {
            return false;
        }
        let mut chains = self.chains.borrow_mut();
        chains.entry(b).or_insert_with(|| self.chain(b)).contains(&a)
    }

    fn frontiers(&self) -> &HashMap<N, Vec<N>> {
        self.frontiers.get_or_init(|| {
            let mut df: HashMap<N, Vec<N>> = HashMap::new();
            for &node in &self.rpo {
                let preds = &self.preds[&node];
                if preds.len() < 2 {
                    continue;
                }
                let Some(&stop) = self.idom.get(&node) else { continue };
                for &p in preds {
                    let mut runner = p;
                    while runner != stop {
                        let entry = df.entry(runner).or_default();
                        if !entry.contains(&node) {
                            entry.push(node);
                        }
                        match self.idom(runner) {
                            Some(up) => runner = up,
                            None => break,
                        }
                    }
                }
            }
            df
        })
    }

    fn frontier(&self, n: N) -> &[N] {
        self.frontiers().get(&n).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Children in the tree, in reverse postorder.
    fn children(&self, n: N) -> Vec<N> {
        self.rpo.iter().copied().filter(|&c| self.idom(c) == Some(n)).collect()
    }

    fn tree_preorder(&self) -> Vec<N> {
        let mut children: HashMap<N, Vec<N>> = HashMap::new();
        for &n in &self.rpo {
            if let Some(parent) = self.idom(n) {
                children.entry(parent).or_default().push(n);
            }
        }
        let mut out = Vec::with_capacity(self.rpo.len());
        let mut stack = vec![self.root];
        while let Some(n) = stack.pop() {
            out.push(n);
            if let Some(cs) = children.get(&n) {
                stack.extend(cs.iter().rev());
            }
        }
        out
    }

    fn rpo_index(&self, n: N) -> Option<usize> {
        self.po_number.get(&n).map(|po| self.rpo.len() - 1 - po)
    }
}

/// Dominator tree of a function's blocks reachable from the entry.
#[derive(Debug)]
pub struct DominatorTree {
    info: DomInfo<BlockId>,
}

impl DominatorTree {
    pub fn compute(func: &FunctionData) -> Self {
        let info = DomInfo::compute(func.entry(), |b| func.succs(b), |b| func.preds(b).to_vec());
        log::trace!("dominator tree of @{}: {} reachable blocks", func.name(), info.rpo.len());
        Self { info }
    }

    pub fn root(&self) -> BlockId {
        self.info.root
    }

    /// Immediate dominator; `None` for the entry and unreachable blocks.
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.info.idom(block)
    }

    /// The immediate-dominator map; the entry maps to itself.
    pub fn immediate_dominators(&self) -> &HashMap<BlockId, BlockId> {
        &self.info.idom
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.info.is_reachable(block)
    }

    /// Whether every path from the entry to `b` passes through `a`.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.info.dominates(a, b)
    }

    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    pub fn frontier(&self, block: BlockId) -> &[BlockId] {
        self.info.frontier(block)
    }

    pub fn frontiers(&self) -> &HashMap<BlockId, Vec<BlockId>> {
        self.info.frontiers()
    }

    /// Closure of the dominance frontier over `blocks`, in reverse postorder.
    pub fn iterated_frontier(&self, blocks: &[BlockId]) -> Vec<BlockId> {
        let mut result: HashSet<BlockId> = HashSet::new();
        let mut worklist: Vec<BlockId> = blocks.to_vec();
        let mut queued: HashSet<BlockId> = blocks.iter().copied().collect();
        while let Some(b) = worklist.pop() {
            for &f in self.frontier(b) {
                if result.insert(f) && queued.insert(f) {
                    worklist.push(f);
                }
            }
        }
        let mut out: Vec<BlockId> = result.into_iter().collect();
        out.sort_by_key(|&b| self.info.rpo_index(b));
        out
    }

    pub fn children(&self, block: BlockId) -> Vec<BlockId> {
        self.info.children(block)
    }

    /// Blocks in dominator-tree preorder, children in reverse postorder.
    pub fn preorder(&self) -> Vec<BlockId> {
        self.info.tree_preorder()
    }

    /// Reachable blocks in reverse postorder.
    pub fn reverse_postorder(&self) -> &[BlockId] {
        &self.info.rpo
    }
}

/// Node of the reversed CFG: a block or the virtual exit joining several returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostDomNode {
    Block(BlockId),
    Exit,
}

/// Post-dominator tree over the blocks that reach a return.
#[derive(Debug)]
pub struct PostDominatorTree {
    info: DomInfo<PostDomNode>,
}

impl PostDominatorTree {
    pub fn compute(func: &FunctionData) -> Self {
        let exits: Vec<BlockId> = func
            .layout()
            .iter()
            .copied()
            .filter(|&b| func.terminator(b).is_some_and(|t| matches!(func[t].kind, InstKind::Return)))
            .collect();
        let root = match exits.as_slice() {
            [single] => PostDomNode::Block(*single),
            _ => PostDomNode::Exit,
        };
        let is_exit = |b: BlockId| exits.contains(&b);

        let succs = |n: PostDomNode| -> Vec<PostDomNode> {
            match n {
                PostDomNode::Exit => exits.iter().map(|&b| PostDomNode::Block(b)).collect(),
                PostDomNode::Block(b) => func.preds(b).iter().map(|&p| PostDomNode::Block(p)).collect(),
            }
        };
        let preds = |n: PostDomNode| -> Vec<PostDomNode> {
            match n {
                PostDomNode::Exit => Vec::new(),
                PostDomNode::Block(b) => {
                    let mut out: Vec<PostDomNode> =
                        func.succs(b).into_iter().map(PostDomNode::Block).collect();
                    if is_exit(b) && root == PostDomNode::Exit {
                        out.push(PostDomNode::Exit);
                    }
                    out
                }
            }
        };
        Self { info: DomInfo::compute(root, succs, preds) }
    }

    pub fn root(&self) -> PostDomNode {
        self.info.root
    }

    /// Immediate post-dominator; `None` when it is the virtual exit or `block` is the
    /// root or cannot reach a return.
    pub fn ipdom(&self, block: BlockId) -> Option<BlockId> {
        match self.info.idom(PostDomNode::Block(block))? {
            PostDomNode::Block(b) => Some(b),
            PostDomNode::Exit => None,
        }
    }

    pub fn post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.info.dominates(PostDomNode::Block(a), PostDomNode::Block(b))
    }

    /// Post-dominance frontier: the branches `block` is control dependent on.
    pub fn frontier(&self, block: BlockId) -> Vec<BlockId> {
        self.info
            .frontier(PostDomNode::Block(block))
            .iter()
            .filter_map(|n| match n {
                PostDomNode::Block(b) => Some(*b),
                PostDomNode::Exit => None,
            })
            .collect()
    }
}
