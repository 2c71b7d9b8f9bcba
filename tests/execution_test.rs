//! Generated assembly linked against a C driver and run natively.
//!
//! Every function is also executed by the IR interpreter in `common`; the native results
//! must match it bit for bit. The tests are skipped when no `gcc` is installed.

mod common;

use std::fmt::Write as _;
use std::process::Command;

use ssa_opt::compile_module;
use ssa_opt::core::{CompileOptions, OptLevel};
use ssa_opt::ir::{
    BinaryOp, CastOp, CmpPredicate, FunctionBuilder, FunctionData, FunctionPrototype, Module, Type, UnaryOp, Value,
};

/// One call made by the driver: function name and raw argument bits.
struct Case {
    name: &'static str,
    args: Vec<u64>,
}

fn case(name: &'static str, args: &[i64]) -> Case {
    Case { name, args: args.iter().map(|&a| a as u64).collect() }
}

fn float_case(name: &'static str, args: &[f64]) -> Case {
    Case { name, args: args.iter().map(|a| a.to_bits()).collect() }
}

/// Two values swapped through phis on every iteration.
fn create_swap_loop() -> FunctionData {
    // i64 swap_loop(i64 a, i64 b, i64 n)
    // {
    //     i64 x = a, y = b, acc = 0;
    //     for (i64 i = 0; i < n; i++) { acc = acc * 31 + x; (x, y) = (y, x); }
    //     return acc * 7 + x - y;
    // }
    let mut b = FunctionBuilder::new(FunctionPrototype::new(
        "swap_loop",
        Type::I64,
        vec![Type::I64, Type::I64, Type::I64],
    ));
    let entry = b.entry();
    let head = b.create_block();
    let body = b.create_block();
    let exit = b.create_block();
    b.br(head);

    b.switch_to(head);
    let x = b.phi(Type::I64, vec![(b.arg(0), entry)]);
    let y = b.phi(Type::I64, vec![(b.arg(1), entry)]);
    let acc = b.phi(Type::I64, vec![(Value::i64(0), entry)]);
    let i = b.phi(Type::I64, vec![(Value::i64(0), entry)]);
    let more = b.icmp(CmpPredicate::Lt, i.clone(), b.arg(2));
    b.cond_br(more, body, exit);

    b.switch_to(body);
    let scaled = b.mul(acc.clone(), Value::i64(31));
    let next_acc = b.add(scaled, x.clone());
    let next_i = b.add(i.clone(), Value::i64(1));
    b.br(head);
    b.add_phi_incoming(&x, y.clone(), body);
    b.add_phi_incoming(&y, x.clone(), body);
    b.add_phi_incoming(&acc, next_acc, body);
    b.add_phi_incoming(&i, next_i, body);

    b.switch_to(exit);
    let r = b.mul(acc, Value::i64(7));
    let r = b.add(r, x);
    let r = b.sub(r, y);
    b.ret(Some(r));
    b.finish()
}

/// Signed division and remainder with a value live across them.
fn create_div_mix() -> FunctionData {
    // i64 div_mix(i64 a, i64 b)
    // {
    //     i64 c = a * 3;
    //     i32 n = (i32)a / (i32)b;
    //     return (a / b) * 1000 + (a % b) * 10 + c + n;
    // }
    let mut b = FunctionBuilder::new(FunctionPrototype::new("div_mix", Type::I64, vec![Type::I64, Type::I64]));
    let c = b.mul(b.arg(0), Value::i64(3));
    let narrow_a = b.cast(CastOp::Trunc, Type::I32, b.arg(0));
    let narrow_b = b.cast(CastOp::Trunc, Type::I32, b.arg(1));
    let narrow_q = b.binary(BinaryOp::Div, narrow_a, narrow_b);
    let n = b.cast(CastOp::Sext, Type::I64, narrow_q);
    let q = b.binary(BinaryOp::Div, b.arg(0), b.arg(1));
    let r = b.binary(BinaryOp::Rem, b.arg(0), b.arg(1));
    let q = b.mul(q, Value::i64(1000));
    let r = b.mul(r, Value::i64(10));
    let sum = b.add(q, r);
    let sum = b.add(sum, c);
    let sum = b.add(sum, n);
    b.ret(Some(sum));
    b.finish()
}

/// Shifts by counts that stay live afterwards.
fn create_shift_mix() -> FunctionData {
    // i64 shift_mix(i64 a, i64 s, i64 t)
    // {
    //     return ((a << s) ^ (a >> t)) + ((u64)a >> s) + s + t;   // >> on i64 is arithmetic
    // }
    let mut b = FunctionBuilder::new(FunctionPrototype::new(
        "shift_mix",
        Type::I64,
        vec![Type::I64, Type::I64, Type::I64],
    ));
    let left = b.binary(BinaryOp::Shl, b.arg(0), b.arg(1));
    let arith = b.binary(BinaryOp::Sar, b.arg(0), b.arg(2));
    let logical = b.binary(BinaryOp::Shr, b.arg(0), b.arg(1));
    let r = b.binary(BinaryOp::Xor, left, arith);
    let r = b.add(r, logical);
    let r = b.add(r, b.arg(1));
    let r = b.add(r, b.arg(2));
    b.ret(Some(r));
    b.finish()
}

/// Nine integer parameters; the last three arrive on the stack.
fn create_nine_args() -> FunctionData {
    // i64 nine_args(i64 a0, ..., i64 a8) { return ((a0 * 3 + a1) * 3 + a2) ... * 3 + a8; }
    let mut b = FunctionBuilder::new(FunctionPrototype::new("nine_args", Type::I64, vec![Type::I64; 9]));
    let mut acc = b.arg(0);
    for i in 1..9 {
        let scaled = b.mul(acc, Value::i64(3));
        acc = b.add(scaled, b.arg(i));
    }
    b.ret(Some(acc));
    b.finish()
}

/// Sixteen values live across a call that passes nine arguments.
fn create_many_live() -> FunctionData {
    // i64 many_live(i64 a)
    // {
    //     v_k = (a + k) * (k + 2);          for k in 0..16
    //     i64 r = nine_args(v_0, ..., v_8);
    //     return r ^ v_0 ^ ... ^ v_15;
    // }
    let mut b = FunctionBuilder::new(FunctionPrototype::new("many_live", Type::I64, vec![Type::I64]));
    let mut values = Vec::new();
    for k in 0..16 {
        let shifted = b.add(b.arg(0), Value::i64(k));
        values.push(b.mul(shifted, Value::i64(k + 2)));
    }
    let mut acc = b.call("nine_args", Type::I64, values[..9].to_vec());
    for v in values {
        acc = b.binary(BinaryOp::Xor, acc, v);
    }
    b.ret(Some(acc));
    b.finish()
}

/// Float negation next to ordinary float arithmetic.
fn create_fneg_mix() -> FunctionData {
    // f64 fneg_mix(f64 x, f64 y) { return -(x * y) + -x - 0.5; }
    let mut b = FunctionBuilder::new(FunctionPrototype::new("fneg_mix", Type::F64, vec![Type::F64, Type::F64]));
    let product = b.mul(b.arg(0), b.arg(1));
    let negated = b.unary(UnaryOp::Neg, product);
    let minus_x = b.unary(UnaryOp::Neg, b.arg(0));
    let r = b.add(negated, minus_x);
    let r = b.sub(r, Value::f64(0.5));
    b.ret(Some(r));
    b.finish()
}

/// Constants that do not fit a sign-extended 32-bit immediate.
fn create_wide_imm() -> FunctionData {
    // i64 wide_imm(i64 a) { return ((a + 0x123456789abcdef0) ^ -0x7fffffff0000) * (1 << 40) - 0x80000000; }
    let mut b = FunctionBuilder::new(FunctionPrototype::new("wide_imm", Type::I64, vec![Type::I64]));
    let r = b.add(b.arg(0), Value::i64(0x1234_5678_9abc_def0));
    let r = b.binary(BinaryOp::Xor, r, Value::i64(-0x7fff_ffff_0000));
    let r = b.mul(r, Value::i64(1 << 40));
    let r = b.sub(r, Value::i64(0x8000_0000));
    b.ret(Some(r));
    b.finish()
}

/// Counting loop over stack slots, promoted only at O1.
fn create_slot_sum() -> FunctionData {
    // i64 slot_sum(i64 n) { i64 s = 0; for (i64 i = 0; i < n; i++) s += i * i; return s; }
    let mut b = FunctionBuilder::new(FunctionPrototype::new("slot_sum", Type::I64, vec![Type::I64]));
    let head = b.create_block();
    let body = b.create_block();
    let exit = b.create_block();
    let s = b.alloc(Type::I64);
    let i = b.alloc(Type::I64);
    b.store(s.clone(), Value::i64(0));
    b.store(i.clone(), Value::i64(0));
    b.br(head);
    b.switch_to(head);
    let iv = b.load(Type::I64, i.clone());
    let c = b.icmp(CmpPredicate::Lt, iv, b.arg(0));
    b.cond_br(c, body, exit);
    b.switch_to(body);
    let iv = b.load(Type::I64, i.clone());
    let sq = b.mul(iv.clone(), iv.clone());
    let sv = b.load(Type::I64, s.clone());
    let sv = b.add(sv, sq);
    b.store(s.clone(), sv);
    let iv = b.add(iv, Value::i64(1));
    b.store(i, iv);
    b.br(head);
    b.switch_to(exit);
    let r = b.load(Type::I64, s);
    b.ret(Some(r));
    b.finish()
}

fn create_module() -> Module {
    let mut module = Module::new("exec");
    for func in [
        create_swap_loop(),
        create_div_mix(),
        create_shift_mix(),
        create_nine_args(),
        create_many_live(),
        create_fneg_mix(),
        create_wide_imm(),
        create_slot_sum(),
    ] {
        module.add_function(func).unwrap();
    }
    module
}

fn cases() -> Vec<Case> {
    vec![
        case("swap_loop", &[3, 10, 0]),
        case("swap_loop", &[3, 10, 5]),
        case("swap_loop", &[-7, 2, 6]),
        case("div_mix", &[100, 7]),
        case("div_mix", &[-100, 7]),
        case("div_mix", &[100, -7]),
        case("div_mix", &[i64::MIN + 1, 3]),
        case("shift_mix", &[0x1234_5678_9abc_def0, 4, 60]),
        case("shift_mix", &[-1, 63, 1]),
        case("shift_mix", &[5, 0, 0]),
        case("nine_args", &[1, 2, 3, 4, 5, 6, 7, 8, 9]),
        case("nine_args", &[-9, 8, -7, 6, -5, 4, -3, 2, -1]),
        case("many_live", &[1]),
        case("many_live", &[-5]),
        case("many_live", &[1000]),
        float_case("fneg_mix", &[1.5, 2.0]),
        float_case("fneg_mix", &[-0.0, 3.0]),
        float_case("fneg_mix", &[-2.25, -4.0]),
        case("wide_imm", &[0]),
        case("wide_imm", &[-1]),
        case("wide_imm", &[123_456_789]),
        case("slot_sum", &[0]),
        case("slot_sum", &[10]),
        case("slot_sum", &[100]),
    ]
}

fn c_type(ty: &Type) -> &'static str {
    if ty.is_float() {
        "double"
    } else {
        "long long"
    }
}

/// C program calling every case and printing the raw result bits, one per line.
fn driver(module: &Module, cases: &[Case]) -> String {
    let mut c = String::from(
        "#include <stdio.h>\n#include <string.h>\n\n\
         static double from_bits(unsigned long long u) { double d; memcpy(&d, &u, 8); return d; }\n\
         static unsigned long long to_bits(double d) { unsigned long long u; memcpy(&u, &d, 8); return u; }\n\n",
    );
    for func in module.functions() {
        let proto = func.prototype();
        let params: Vec<&str> = proto.params.iter().map(c_type).collect();
        writeln!(c, "{} {}({});", c_type(&proto.ret), proto.name, params.join(", ")).unwrap();
    }
    c.push_str("\nint main(void)\n{\n");
    for case in cases {
        let proto = module.function(case.name).unwrap().prototype();
        let args: Vec<String> = proto
            .params
            .iter()
            .zip(&case.args)
            .map(|(ty, bits)| {
                if ty.is_float() {
                    format!("from_bits(0x{bits:x}ULL)")
                } else {
                    format!("(long long)0x{bits:x}ULL")
                }
            })
            .collect();
        let call = format!("{}({})", case.name, args.join(", "));
        let result = if proto.ret.is_float() { format!("to_bits({call})") } else { format!("(unsigned long long){call}") };
        writeln!(c, "    printf(\"%llu\\n\", {result});").unwrap();
    }
    c.push_str("    return 0;\n}\n");
    c
}

fn gcc_available() -> bool {
    Command::new("gcc").arg("--version").output().is_ok_and(|o| o.status.success())
}

/// Compile the module at `level`, link it with the driver and return what it printed.
fn run_native(level: OptLevel, cases: &[Case]) -> Vec<u64> {
    let module = create_module();
    let program = driver(&module, cases);
    let options = CompileOptions::default().with_opt_level(level);
    let text = compile_module(module, &options).unwrap().0.to_string();

    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let asm_path = dir.path().join("exec.s");
    let c_path = dir.path().join("driver.c");
    let exe_path = dir.path().join("exec");
    std::fs::write(&asm_path, &text).unwrap();
    std::fs::write(&c_path, &program).unwrap();

    let build = Command::new("gcc").arg("-o").arg(&exe_path).arg(&c_path).arg(&asm_path).output().unwrap();
    assert!(
        build.status.success(),
        "gcc failed at {level}:\n{}\n{text}",
        String::from_utf8_lossy(&build.stderr)
    );
    let run = Command::new(&exe_path).output().expect("failed to run executable");
    assert!(run.status.success(), "program failed at {level}: {:?}\n{text}", run.status);
    String::from_utf8(run.stdout)
        .unwrap()
        .lines()
        .map(|line| line.parse().unwrap())
        .collect()
}

fn check_against_interpreter(level: OptLevel) {
    common::init_logging();
    if !gcc_available() {
        eprintln!("gcc not found, skipping execution test at {level}");
        return;
    }
    let module = create_module();
    let cases = cases();
    let native = run_native(level, &cases);
    assert_eq!(native.len(), cases.len());
    for (case, got) in cases.iter().zip(native) {
        let func = module.function(case.name).unwrap();
        let expected = common::run_in(module.functions(), func, &case.args).unwrap();
        assert_eq!(got, expected, "{}({:?}) at {level}", case.name, case.args);
    }
}

#[test]
fn test_native_results_match_interpreter_at_o0() {
    check_against_interpreter(OptLevel::O0);
}

#[test]
fn test_native_results_match_interpreter_at_o1() {
    check_against_interpreter(OptLevel::O1);
}

#[test]
fn test_interpreter_reference_values() {
    common::init_logging();
    let module = create_module();
    let run = |name: &str, args: &[i64]| {
        let raw: Vec<u64> = args.iter().map(|&a| a as u64).collect();
        common::run_in(module.functions(), module.function(name).unwrap(), &raw).unwrap() as i64
    };
    assert_eq!(run("swap_loop", &[3, 10, 0]), 3 - 10);
    // x: 3, 10, 3 ; acc = 3 * 31 + 10
    assert_eq!(run("swap_loop", &[3, 10, 2]), (3 * 31 + 10) * 7 + 3 - 10);
    assert_eq!(run("div_mix", &[-100, 7]), -14 * 1000 + -2 * 10 + -300 + -14);
    assert_eq!(run("nine_args", &[0, 0, 0, 0, 0, 0, 0, 0, 1]), 1);
    assert_eq!(run("nine_args", &[1, 0, 0, 0, 0, 0, 0, 0, 0]), 6561);
    assert_eq!(run("slot_sum", &[4]), 1 + 4 + 9);
}
