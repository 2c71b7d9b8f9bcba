//! Live intervals over a linear instruction numbering.
//!
//! Arguments take positions `0..n`; instructions are numbered after them, block by
//! block in linear-scan order. The interval of a value is the hull of its definitions,
//! its uses, the start of every block where it is live-in and the end of every block
//! where it is live-out. Because the block-boundary terms come from the fixpoint in
//! [`LivenessAnalysis`], loop-carried values span the whole loop without any
//! predecessor-chain heuristics.

use std::fmt;

use hashbrown::HashMap;

use super::liveness::LivenessAnalysis;
use crate::core::{CompileError, CompileResult};
use crate::ir::{BlockId, FunctionData, InstId, InstKind, ValueId};

/// Closed range of positions `[begin, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveRange {
    pub begin: u32,
    pub end: u32,
}

impl LiveRange {
    pub fn point(pos: u32) -> Self {
        Self { begin: pos, end: pos }
    }

    fn extend(&mut self, pos: u32) {
        self.begin = self.begin.min(pos);
        self.end = self.end.max(pos);
    }

    pub fn intersects(&self, other: &LiveRange) -> bool {
        self.begin <= other.end && other.begin <= self.end
    }

    /// `pos` lies strictly inside the range.
    pub fn crosses(&self, pos: u32) -> bool {
        self.begin < pos && pos < self.end
    }
}

impl fmt::Display for LiveRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.begin, self.end)
    }
}

#[derive(Debug, Clone)]
pub struct LiveIntervals {
    /// Numbered blocks in linear-scan order; unreachable blocks are absent.
    order: Vec<BlockId>,
    positions: HashMap<InstId, u32>,
    /// First and last position of each block.
    block_bounds: HashMap<BlockId, (u32, u32)>,
    ranges: HashMap<ValueId, LiveRange>,
}

impl LiveIntervals {
    pub fn compute(func: &FunctionData, liveness: &LivenessAnalysis) -> CompileResult<Self> {
        let arg_count = func.prototype().params.len() as u32;
        let mut positions = HashMap::new();
        let mut block_bounds = HashMap::new();
        let mut next = arg_count;
        for &block in liveness.order().blocks() {
            let insts = &func[block].insts;
            if insts.is_empty() {
                return Err(CompileError::analysis(format!("block {block} of @{} is empty", func.name())));
            }
            let start = next;
            for &id in insts {
                positions.insert(id, next);
                next += 1;
            }
            block_bounds.insert(block, (start, next - 1));
        }

        let mut ranges: HashMap<ValueId, LiveRange> = HashMap::new();
        let mut extend = |v: ValueId, pos: u32| {
            ranges.entry(v).and_modify(|r| r.extend(pos)).or_insert(LiveRange::point(pos));
        };
        for i in 0..arg_count {
            extend(ValueId::Arg(i), i);
        }
        for &block in liveness.order().blocks() {
            let (start, end) = block_bounds[&block];
            for &v in liveness.live_in(block)? {
                extend(v, start);
            }
            for &v in liveness.live_out(block)? {
                extend(v, end);
            }
            for &id in &func[block].insts {
                let inst = &func[id];
                let pos = positions[&id];
                if let Some(def) = inst.defines(id) {
                    extend(ValueId::Inst(def), pos);
                }
                if let InstKind::Phi { incoming } = &inst.kind {
                    // Read on the edge: at the end of the incoming block.
                    for (op, pred) in inst.operands.iter().zip(incoming) {
                        if let (Some(v), Some(&(_, pred_end))) = (op.value_id(), block_bounds.get(pred)) {
                            extend(v, pred_end);
                        }
                    }
                    continue;
                }
                for op in &inst.operands {
                    if let Some(v) = op.value_id() {
                        extend(v, pos);
                    }
                }
            }
        }
        let order = liveness.order().blocks().to_vec();
        Ok(Self { order, positions, block_bounds, ranges })
    }

    pub fn range(&self, value: ValueId) -> CompileResult<LiveRange> {
        self.ranges
            .get(&value)
            .copied()
            .ok_or_else(|| CompileError::analysis(format!("no live interval for {value}")))
    }

    pub fn position(&self, inst: InstId) -> CompileResult<u32> {
        self.positions
            .get(&inst)
            .copied()
            .ok_or_else(|| CompileError::analysis(format!("{inst} has no position")))
    }

    /// Blocks that received positions, in numbering order.
    pub fn blocks(&self) -> &[BlockId] {
        &self.order
    }

    pub fn block_bounds(&self, block: BlockId) -> Option<(u32, u32)> {
        self.block_bounds.get(&block).copied()
    }

    /// All intervals ordered by start, ties broken by value identity.
    pub fn sorted(&self) -> Vec<(ValueId, LiveRange)> {
        let mut all: Vec<(ValueId, LiveRange)> = self.ranges.iter().map(|(&v, &r)| (v, r)).collect();
        all.sort_by_key(|&(v, r)| (r.begin, r.end, v));
        all
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CmpPredicate, FunctionBuilder, FunctionPrototype, Type, Value};

    #[test]
    fn test_straight_line_positions() {
        let mut b = FunctionBuilder::new(FunctionPrototype::new("f", Type::I64, vec![Type::I64, Type::I64]));
        let x = b.add(b.arg(0), b.arg(1));
        let y = b.mul(x.clone(), Value::i64(3));
        b.ret(Some(y.clone()));
        let f = b.finish();
        let live = LivenessAnalysis::compute(&f);
        let iv = LiveIntervals::compute(&f, &live).unwrap();

        assert_eq!(iv.range(ValueId::Arg(0)).unwrap(), LiveRange { begin: 0, end: 2 });
        assert_eq!(iv.range(ValueId::Arg(1)).unwrap(), LiveRange { begin: 1, end: 2 });
        assert_eq!(iv.range(x.value_id().unwrap()).unwrap(), LiveRange { begin: 2, end: 3 });
        assert_eq!(iv.range(y.value_id().unwrap()).unwrap(), LiveRange { begin: 3, end: 4 });
        let sorted: Vec<ValueId> = iv.sorted().into_iter().map(|(v, _)| v).collect();
        assert_eq!(sorted[0], ValueId::Arg(0));
    }

    #[test]
    fn test_loop_invariant_spans_loop() {
        // the argument is read in the header and must stay live through the body
        let mut b = FunctionBuilder::new(FunctionPrototype::new("f", Type::Void, vec![Type::I64]));
        let head = b.create_block();
        let body = b.create_block();
        let exit = b.create_block();
        b.br(head);
        b.switch_to(head);
        let c = b.icmp(CmpPredicate::Lt, b.arg(0), Value::i64(10));
        b.cond_br(c, body, exit);
        b.switch_to(body);
        b.add(Value::i64(1), Value::i64(2));
        b.br(head);
        b.switch_to(exit);
        b.ret(None);
        let f = b.finish();
        let live = LivenessAnalysis::compute(&f);
        let iv = LiveIntervals::compute(&f, &live).unwrap();
        let (_, body_end) = iv.block_bounds(body).unwrap();
        let arg = iv.range(ValueId::Arg(0)).unwrap();
        assert!(arg.end >= body_end);
        assert!(arg.end >= arg.begin);
    }

    #[test]
    fn test_unknown_value_is_an_error() {
        let mut b = FunctionBuilder::new(FunctionPrototype::new("f", Type::Void, vec![]));
        b.ret(None);
        let f = b.finish();
        let live = LivenessAnalysis::compute(&f);
        let iv = LiveIntervals::compute(&f, &live).unwrap();
        assert!(iv.range(ValueId::Inst(InstId(99))).is_err());
    }

    #[test]
    fn test_unreachable_blocks_are_not_numbered() {
        let mut b = FunctionBuilder::new(FunctionPrototype::new("f", Type::I64, vec![Type::I64]));
        let dead = b.create_block();
        b.ret(Some(b.arg(0)));
        b.switch_to(dead);
        let x = b.add(b.arg(0), Value::i64(1));
        b.ret(Some(x.clone()));
        let f = b.finish();
        let live = LivenessAnalysis::compute(&f);
        let iv = LiveIntervals::compute(&f, &live).unwrap();
        assert_eq!(iv.blocks(), &[f.entry()]);
        assert!(iv.block_bounds(dead).is_none());
        assert!(iv.position(x.as_local().unwrap()).is_err());
    }

    #[test]
    fn test_range_queries() {
        let r = LiveRange { begin: 2, end: 6 };
        assert!(r.crosses(4));
        assert!(!r.crosses(2));
        assert!(!r.crosses(6));
        assert!(r.intersects(&LiveRange { begin: 6, end: 9 }));
        assert!(!r.intersects(&LiveRange { begin: 7, end: 9 }));
    }
}
