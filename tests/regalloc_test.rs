//! Linear-scan allocation checked against the live intervals it was computed from.

mod common;

use ssa_opt::analysis::LiveRange;
use ssa_opt::compile_module;
use ssa_opt::core::{CompileOptions, OptLevel};
use ssa_opt::ir::{
    BinaryOp, CmpPredicate, FunctionBuilder, FunctionData, FunctionPrototype, Module, Type, Value, ValueId,
};
use ssa_opt::x64::calling_convention::CALLEE_SAVED;
use ssa_opt::x64::{prepare_function, Location, PreparedFunction};

/// More values live across a call than there are callee-saved registers.
fn create_pressure_test(values: i64) -> FunctionData {
    // i64 pressure(i64 a, i64 b)
    // {
    //     v_k = a * (k + 1) + b;      for k in 0..values
    //     r = g(a);
    //     return r + v_0 + ... + v_{values-1};
    // }
    let mut b = FunctionBuilder::new(FunctionPrototype::new("pressure", Type::I64, vec![Type::I64, Type::I64]));
    let mut vs = Vec::new();
    for k in 0..values {
        let m = b.mul(b.arg(0), Value::i64(k + 1));
        vs.push(b.add(m, b.arg(1)));
    }
    let mut acc = b.call("g", Type::I64, vec![b.arg(0)]);
    for v in vs {
        acc = b.add(acc, v);
    }
    b.ret(Some(acc));
    b.finish()
}

/// A loop whose induction variables live in phis.
fn create_loop_test() -> FunctionData {
    // f64 scale(f64 x, i32 n) { f64 acc = 1.0; for (i = 0; i < n; i++) acc = acc * x; return acc; }
    let mut b = FunctionBuilder::new(FunctionPrototype::new("scale", Type::F64, vec![Type::F64, Type::I32]));
    let entry = b.entry();
    let head = b.create_block();
    let body = b.create_block();
    let exit = b.create_block();
    b.br(head);
    b.switch_to(head);
    let acc = b.phi(Type::F64, vec![(Value::f64(1.0), entry)]);
    let i = b.phi(Type::I32, vec![(Value::i32(0), entry)]);
    let c = b.icmp(CmpPredicate::Lt, i.clone(), b.arg(1));
    b.cond_br(c, body, exit);
    b.switch_to(body);
    let next_acc = b.mul(acc.clone(), b.arg(0));
    let next_i = b.add(i.clone(), Value::i32(1));
    b.br(head);
    b.add_phi_incoming(&acc, next_acc, body);
    b.add_phi_incoming(&i, next_i, body);
    b.switch_to(exit);
    b.ret(Some(acc));
    b.finish()
}

/// A function whose only call and division sit in a block nothing branches to.
fn create_unreachable_test() -> FunctionData {
    // i64 first(i64 a, i64 b)
    // {
    //     return a;
    // dead:
    //     return g(1) + a % b;
    // }
    let mut b = FunctionBuilder::new(FunctionPrototype::new("first", Type::I64, vec![Type::I64, Type::I64]));
    let dead = b.create_block();
    b.ret(Some(b.arg(0)));
    b.switch_to(dead);
    let r = b.call("g", Type::I64, vec![Value::i64(1)]);
    let m = b.binary(BinaryOp::Rem, b.arg(0), b.arg(1));
    let sum = b.add(r, m);
    b.ret(Some(sum));
    b.finish()
}

fn ranges(prepared: &PreparedFunction) -> Vec<(ValueId, LiveRange, Location)> {
    prepared
        .allocation
        .locations()
        .map(|(v, loc)| (v, prepared.intervals.range(v).unwrap(), loc))
        .collect()
}

/// No two simultaneously live values share a register or a frame slot.
fn assert_no_conflicts(prepared: &PreparedFunction) {
    let all = ranges(prepared);
    for (i, (va, ra, la)) in all.iter().enumerate() {
        for (vb, rb, lb) in &all[i + 1..] {
            if ra.intersects(rb) && !matches!(la, Location::Incoming(_)) {
                assert_ne!(la, lb, "{va} {ra} and {vb} {rb} share {la:?}");
            }
        }
    }
}

#[test]
fn test_pressure_spills_without_conflicts() {
    common::init_logging();
    let prepared = prepare_function(create_pressure_test(20)).unwrap();
    assert_no_conflicts(&prepared);
    assert!(prepared.allocation.spill_count() > 0);
    assert!(prepared.allocation.frame_size() > 0);
    assert_eq!(prepared.allocation.frame_size() % 8, 0);
}

#[test]
fn test_values_across_calls_avoid_caller_saved_registers() {
    common::init_logging();
    let prepared = prepare_function(create_pressure_test(8)).unwrap();
    let calls: Vec<u32> = prepared
        .func
        .instructions()
        .filter(|&id| prepared.func[id].is_call())
        .map(|id| prepared.intervals.position(id).unwrap())
        .collect();
    assert_eq!(calls.len(), 1);

    let mut crossing = 0;
    for (v, range, loc) in ranges(&prepared) {
        if !range.crosses(calls[0]) {
            continue;
        }
        crossing += 1;
        if let Location::Reg(reg) = loc {
            assert!(CALLEE_SAVED.contains(&reg), "{v} lives in {reg} across the call");
            assert!(prepared.allocation.callee_saved().contains(&reg));
        }
    }
    assert!(crossing >= 8);
    // every callee-saved register was needed
    assert_eq!(prepared.allocation.callee_saved().len(), CALLEE_SAVED.len());
    // below the saved %rbp, pushes plus the adjustment keep calls 16-byte aligned
    let pushed = 8 * prepared.allocation.callee_saved().len() as u32;
    assert!(prepared.allocation.stack_adjustment() >= prepared.allocation.frame_size());
    assert_eq!((pushed + prepared.allocation.stack_adjustment()) % 16, 0);
}

#[test]
fn test_loop_phis_share_nothing_live() {
    common::init_logging();
    let prepared = prepare_function(create_loop_test()).unwrap();
    assert_no_conflicts(&prepared);
    assert_eq!(prepared.allocation.spill_count(), 0);
    // the float values go to vector registers
    for (v, _, loc) in ranges(&prepared) {
        if prepared.func.value_type(&Value::from(v)).is_float() {
            assert!(matches!(loc, Location::Reg(r) if r.bank == ssa_opt::core::XMM_BANK), "{v} in {loc:?}");
        }
    }
}

#[test]
fn test_unreachable_block_is_ignored_by_the_allocator() {
    common::init_logging();
    let prepared = prepare_function(create_unreachable_test()).unwrap();
    assert_eq!(prepared.order, vec![prepared.func.entry()]);
    assert_no_conflicts(&prepared);
    // nothing live crosses a call or a division, so no callee-saved register is needed
    assert!(prepared.allocation.callee_saved().is_empty());
    assert_eq!(prepared.allocation.location(ValueId::Arg(0)), Some(Location::Reg(ssa_opt::core::AsmReg::RDI)));
}

#[test]
fn test_unreachable_block_compiles_at_every_level() {
    common::init_logging();
    for level in [OptLevel::O0, OptLevel::O1] {
        let mut module = Module::new("dead");
        module.add_function(create_unreachable_test()).unwrap();
        let options = CompileOptions::default().with_opt_level(level);
        let (unit, stats) = compile_module(module, &options).unwrap();
        let text = unit.to_string();
        assert_eq!(stats.functions_compiled, 1);
        assert!(text.contains("first:\n"), "{text}");
        assert!(!text.contains("\tcall\t"), "{level:?}:\n{text}");
        assert!(!text.contains("div"), "{level:?}:\n{text}");
    }
}
