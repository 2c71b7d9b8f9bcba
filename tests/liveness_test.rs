//! Block liveness and live intervals on a loop with a value live across it.

mod common;

use ssa_opt::analysis::{linear_scan_order, LiveIntervals, LivenessAnalysis};
use ssa_opt::ir::{BlockId, CmpPredicate, FunctionBuilder, FunctionData, FunctionPrototype, InstId, Type, Value, ValueId};

struct Loop {
    func: FunctionData,
    head: BlockId,
    body: BlockId,
    exit: BlockId,
    k: InstId,
    i: InstId,
    next: InstId,
    r: InstId,
}

fn create_loop_test() -> Loop {
    // i64 f(i64 n)
    // {
    //     k = n + 1;
    //     for (i = 0; i < n; i++) ;
    //     return k * i;
    // }
    let mut b = FunctionBuilder::new(FunctionPrototype::new("f", Type::I64, vec![Type::I64]));
    let entry = b.entry();
    let head = b.create_block();
    let body = b.create_block();
    let exit = b.create_block();
    let k = b.add(b.arg(0), Value::i64(1));
    b.br(head);

    b.switch_to(head);
    let i = b.phi(Type::I64, vec![(Value::i64(0), entry)]);
    let c = b.icmp(CmpPredicate::Lt, i.clone(), b.arg(0));
    b.cond_br(c, body, exit);

    b.switch_to(body);
    let next = b.add(i.clone(), Value::i64(1));
    b.br(head);
    b.add_phi_incoming(&i, next.clone(), body);

    b.switch_to(exit);
    let r = b.mul(k.clone(), i.clone());
    b.ret(Some(r.clone()));

    let local = |v: &Value| v.as_local().unwrap();
    Loop { head, body, exit, k: local(&k), i: local(&i), next: local(&next), r: local(&r), func: b.finish() }
}

#[test]
fn test_loop_liveness_sets() {
    common::init_logging();
    let l = create_loop_test();
    let live = LivenessAnalysis::compute(&l.func);
    let k = ValueId::Inst(l.k);
    let i = ValueId::Inst(l.i);
    let n = ValueId::Arg(0);

    // k is read after the loop, so it stays live all the way around it
    for block in [l.head, l.body, l.exit] {
        assert!(live.is_live_in(block, k), "k live into {block}");
    }
    assert!(live.is_live_out(l.body, k));

    // the phi defines i at the head; the head itself does not need it
    assert!(!live.is_live_in(l.head, i));
    assert!(live.is_live_in(l.body, i));
    assert!(live.is_live_in(l.exit, i));

    // the argument is compared on every iteration
    assert!(live.is_live_in(l.head, n));
    assert!(live.is_live_out(l.body, n));
    assert!(!live.is_live_in(l.exit, n));

    // the incremented value flows back over the latch edge
    assert!(live.is_live_out(l.body, ValueId::Inst(l.next)));
    assert!(!live.is_live_in(l.exit, ValueId::Inst(l.next)));
    assert!(live.live_out(l.exit).unwrap().is_empty());
}

#[test]
fn test_loop_live_intervals() {
    common::init_logging();
    let l = create_loop_test();
    let live = LivenessAnalysis::compute(&l.func);
    let intervals = LiveIntervals::compute(&l.func, &live).unwrap();

    assert_eq!(live.order().blocks(), linear_scan_order(&l.func).as_slice());
    assert_eq!(live.order().blocks()[0], l.func.entry());

    // arguments come first
    assert_eq!(intervals.range(ValueId::Arg(0)).unwrap().begin, 0);

    let k = intervals.range(ValueId::Inst(l.k)).unwrap();
    for block in [l.head, l.body] {
        let (start, end) = intervals.block_bounds(block).unwrap();
        assert!(k.begin < start && k.end > end, "k spans {block}");
    }
    let r_pos = intervals.position(l.r).unwrap();
    assert_eq!(k.end, r_pos);
    assert_eq!(intervals.range(ValueId::Inst(l.r)).unwrap().begin, r_pos);

    let next = intervals.range(ValueId::Inst(l.next)).unwrap();
    let (_, body_end) = intervals.block_bounds(l.body).unwrap();
    assert!(next.end >= body_end);
    assert!(next.intersects(&k));

    let sorted = intervals.sorted();
    assert_eq!(sorted.len(), intervals.len());
    assert!(sorted.windows(2).all(|w| w[0].1.begin <= w[1].1.begin));
}

#[test]
fn test_missing_information_is_reported() {
    common::init_logging();
    let l = create_loop_test();
    let live = LivenessAnalysis::compute(&l.func);
    assert!(live.live_in(BlockId(99)).is_err());
    let intervals = LiveIntervals::compute(&l.func, &live).unwrap();
    assert!(intervals.range(ValueId::Inst(InstId(999))).is_err());
    assert!(intervals.position(InstId(999)).is_err());
}
