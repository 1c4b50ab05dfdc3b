use super::*;
use crate::ast::{AssignOp, BinaryOp, ProgramTree, TreeBuilder};
use crate::object::ObjectStore;
use crate::preprocess::NoImports;
use crate::realm::RealmError;
use crate::storage::{MemStore, Overlay};
use crate::types::address::Address;
use crate::utils::test_utils::utils::{compile, compile_with, loop_closures};
use std::collections::BTreeMap;

const LIB: &str = "gno.land/p/demo/sample";
const REALM: &str = "gno.land/r/demo/sample";
const TEST_GAS: u64 = 10_000_000;
const MAX_DEPTH: usize = 64;

fn alice() -> Address {
    Address::from_seed("alice")
}

fn with_machine<T>(
    gas_limit: u64,
    f: impl FnOnce(&mut Machine<'_, '_>) -> Result<T, VmError>,
) -> Result<T, VmError> {
    let base = MemStore::new();
    let mut overlay = Overlay::new(&base);
    let mut store = ObjectStore::new(&mut overlay);
    let gas = GasMeter::new(gas_limit, GasSchedule::default());
    let mut m = Machine::new(&mut store, &NoImports, Realm::user(alice()), gas, MAX_DEPTH);
    f(&mut m)
}

/// Deploys `tree` and calls `func` in the same transaction, rendering the results.
fn run_with(
    tree: ProgramTree,
    func: &str,
    args: Vec<Value>,
    with_cross: bool,
    gas_limit: u64,
) -> Result<Vec<String>, VmError> {
    let pkg = Arc::new(compile(tree));
    with_machine(gas_limit, |m| {
        let path = pkg.pkg_path.clone();
        m.instantiate(pkg)?;
        let results = m.call_function(&path, &Name::from(func), args, with_cross)?;
        results.iter().map(|v| m.render(v)).collect()
    })
}

fn run(tree: ProgramTree, func: &str, args: Vec<Value>) -> Result<Vec<String>, VmError> {
    run_with(tree, func, args, false, TEST_GAS)
}

fn run_ok(tree: ProgramTree, func: &str, args: Vec<Value>) -> Vec<String> {
    run(tree, func, args).expect("call should succeed")
}

/// Calls `Make` and then every closure in the returned slice with `args`.
fn call_each(tree: ProgramTree, args: Vec<Value>) -> Vec<String> {
    let pkg = Arc::new(compile(tree));
    with_machine(TEST_GAS, |m| {
        let path = pkg.pkg_path.clone();
        m.instantiate(pkg)?;
        let made = m.call_function(&path, &Name::from("Make"), vec![], false)?;
        let Some(Value::Slice { list, offset, len }) = made.first().cloned() else {
            panic!("Make should return a slice");
        };
        let mut out = Vec::new();
        for i in 0..len {
            let f = m.store.elem(list, offset + i)?;
            let results = m.call_value(&f, args.clone())?;
            out.push(m.render(&results[0])?);
        }
        Ok(out)
    })
    .expect("closures should run")
}

fn fib_tree() -> ProgramTree {
    let mut b = TreeBuilder::new(LIB);
    let n1 = b.name("n");
    let two = b.int(2);
    let cond = b.binary(n1, BinaryOp::Lss, two);
    let n2 = b.name("n");
    let base = b.ret(vec![n2]);
    let early = b.if_stmt(None, cond, vec![base], None);
    let n3 = b.name("n");
    let one = b.int(1);
    let m1 = b.binary(n3, BinaryOp::Sub, one);
    let c1 = b.call_name("Fib", vec![m1]);
    let n4 = b.name("n");
    let two2 = b.int(2);
    let m2 = b.binary(n4, BinaryOp::Sub, two2);
    let c2 = b.call_name("Fib", vec![m2]);
    let sum = b.binary(c1, BinaryOp::Add, c2);
    let ret = b.ret(vec![sum]);
    let int_p = b.name("int");
    let int_r = b.name("int");
    let fib = b.func_decl("Fib", vec![("n", int_p)], vec![int_r], vec![early, ret]);
    b.finish("fib", vec![fib])
}

// ==================== Calls ====================

#[test]
fn recursive_function() {
    assert_eq!(run_ok(fib_tree(), "Fib", vec![Value::Int(10)]), vec!["55"]);
}

#[test]
fn unknown_function_is_an_invalid_call() {
    let err = run(fib_tree(), "Fob", vec![]).unwrap_err();
    assert!(matches!(err, VmError::InvalidCall { .. }));
}

#[test]
fn wrong_argument_count_is_rejected() {
    let err = run(fib_tree(), "Fib", vec![]).unwrap_err();
    assert!(matches!(err, VmError::InvalidCall { .. }));
}

#[test]
fn gas_is_charged_per_category() {
    let pkg = Arc::new(compile(fib_tree()));
    let gas = with_machine(TEST_GAS, |m| {
        m.instantiate(pkg)?;
        m.call_function(LIB, &Name::from("Fib"), vec![Value::Int(6)], false)?;
        Ok(m.gas().clone())
    })
    .unwrap();
    assert!(gas.used() > 0);
    assert!(gas.profile().get(GasCategory::Step) > 0);
    assert!(gas.profile().get(GasCategory::Call) > 0);
    assert_eq!(gas.profile().total(), gas.used());
}

// ==================== Control Flow ====================

#[test]
fn labeled_break_and_continue() {
    // total := 0
    // outer: for i := 0; i < 5; i++ {
    //     for j := 0; j < 5; j++ {
    //         if j == 3 { continue outer }
    //         if i == 3 { break outer }
    //         total += 1
    //     }
    // }
    // return total
    let mut b = TreeBuilder::new(LIB);
    let t0 = b.name("total");
    let zero = b.int(0);
    let def_total = b.define(vec![t0], vec![zero]);

    let j0 = b.name("j");
    let zero_j = b.int(0);
    let init_j = b.define(vec![j0], vec![zero_j]);
    let j1 = b.name("j");
    let five_j = b.int(5);
    let cond_j = b.binary(j1, BinaryOp::Lss, five_j);
    let j2 = b.name("j");
    let post_j = b.inc(j2);
    let j3 = b.name("j");
    let three = b.int(3);
    let j_is_3 = b.binary(j3, BinaryOp::Eql, three);
    let cont = b.cont(Some("outer"));
    let skip = b.if_stmt(None, j_is_3, vec![cont], None);
    let i3 = b.name("i");
    let three_i = b.int(3);
    let i_is_3 = b.binary(i3, BinaryOp::Eql, three_i);
    let brk = b.brk(Some("outer"));
    let stop = b.if_stmt(None, i_is_3, vec![brk], None);
    let t1 = b.name("total");
    let one = b.int(1);
    let add = b.op_assign(t1, AssignOp::AddAssign, one);
    let inner = b.for_loop(Some(init_j), Some(cond_j), Some(post_j), vec![skip, stop, add]);

    let i0 = b.name("i");
    let zero_i = b.int(0);
    let init_i = b.define(vec![i0], vec![zero_i]);
    let i1 = b.name("i");
    let five_i = b.int(5);
    let cond_i = b.binary(i1, BinaryOp::Lss, five_i);
    let i2 = b.name("i");
    let post_i = b.inc(i2);
    let outer = b.for_loop(Some(init_i), Some(cond_i), Some(post_i), vec![inner]);
    b.label(outer, "outer");

    let t2 = b.name("total");
    let ret = b.ret(vec![t2]);
    let int_r = b.name("int");
    let f = b.func_decl("Sum", vec![], vec![int_r], vec![def_total, outer, ret]);
    let tree = b.finish("loops", vec![f]);
    assert_eq!(run_ok(tree, "Sum", vec![]), vec!["9"]);
}

fn switch_tree() -> ProgramTree {
    // s := ""
    // switch n {
    // case 1, 2: s = "low"
    // case 3: s = "three"; break; s = "unreachable"
    // default: s = "other"
    // }
    // return s
    let mut b = TreeBuilder::new(LIB);
    let s0 = b.name("s");
    let empty = b.str_lit("");
    let def_s = b.define(vec![s0], vec![empty]);
    let tag = b.name("n");

    let one = b.int(1);
    let two = b.int(2);
    let s1 = b.name("s");
    let low = b.str_lit("low");
    let set_low = b.assign(vec![s1], vec![low]);

    let three = b.int(3);
    let s2 = b.name("s");
    let three_s = b.str_lit("three");
    let set_three = b.assign(vec![s2], vec![three_s]);
    let brk = b.brk(None);
    let s3 = b.name("s");
    let bad = b.str_lit("unreachable");
    let set_bad = b.assign(vec![s3], vec![bad]);

    let s4 = b.name("s");
    let other = b.str_lit("other");
    let set_other = b.assign(vec![s4], vec![other]);
    let sw = b.switch(
        None,
        Some(tag),
        vec![
            (vec![one, two], vec![set_low]),
            (vec![three], vec![set_three, brk, set_bad]),
            (vec![], vec![set_other]),
        ],
    );
    let s5 = b.name("s");
    let ret = b.ret(vec![s5]);
    let int_p = b.name("int");
    let str_r = b.name("string");
    let f = b.func_decl("Describe", vec![("n", int_p)], vec![str_r], vec![def_s, sw, ret]);
    b.finish("switch", vec![f])
}

#[test]
fn tagged_switch_picks_first_match_then_default() {
    assert_eq!(run_ok(switch_tree(), "Describe", vec![Value::Int(2)]), vec!["low"]);
    assert_eq!(run_ok(switch_tree(), "Describe", vec![Value::Int(3)]), vec!["three"]);
    assert_eq!(run_ok(switch_tree(), "Describe", vec![Value::Int(9)]), vec!["other"]);
}

#[test]
fn range_over_slice_map_and_string() {
    // xs := []int{1, 2, 3}; sum := 0
    // for _, x := range xs { sum += x }
    // m := map[string]int{"b": 2, "a": 1}; keys := ""
    // for k := range m { keys += k }
    // n := 0
    // for i := range "héllo" { n = i }
    // return sum, keys, n
    let mut b = TreeBuilder::new(LIB);
    let int1 = b.name("int");
    let sty = b.slice_type(int1);
    let e1 = b.int(1);
    let e2 = b.int(2);
    let e3 = b.int(3);
    let lit = b.composite(sty, vec![e1, e2, e3]);
    let xs = b.name("xs");
    let def_xs = b.define(vec![xs], vec![lit]);
    let sum0 = b.name("sum");
    let zero = b.int(0);
    let def_sum = b.define(vec![sum0], vec![zero]);
    let xs1 = b.name("xs");
    let blank = b.name("_");
    let x0 = b.name("x");
    let sum1 = b.name("sum");
    let x1 = b.name("x");
    let add = b.op_assign(sum1, AssignOp::AddAssign, x1);
    let r1 = b.range(xs1, Some(blank), Some(x0), vec![add]);

    let k_ty = b.name("string");
    let v_ty = b.name("int");
    let mty = b.map_type(k_ty, v_ty);
    let kb = b.str_lit("b");
    let vb = b.int(2);
    let ka = b.str_lit("a");
    let va = b.int(1);
    let mlit = b.composite_keyed(mty, vec![(kb, vb), (ka, va)]);
    let m0 = b.name("m");
    let def_m = b.define(vec![m0], vec![mlit]);
    let keys0 = b.name("keys");
    let empty = b.str_lit("");
    let def_keys = b.define(vec![keys0], vec![empty]);
    let m1 = b.name("m");
    let k0 = b.name("k");
    let keys1 = b.name("keys");
    let k1 = b.name("k");
    let cat = b.op_assign(keys1, AssignOp::AddAssign, k1);
    let r2 = b.range(m1, Some(k0), None, vec![cat]);

    let n0 = b.name("n");
    let zero_n = b.int(0);
    let def_n = b.define(vec![n0], vec![zero_n]);
    let word = b.str_lit("héllo");
    let i0 = b.name("i");
    let n1 = b.name("n");
    let i1 = b.name("i");
    let set_n = b.assign(vec![n1], vec![i1]);
    let r3 = b.range(word, Some(i0), None, vec![set_n]);

    let sum2 = b.name("sum");
    let keys2 = b.name("keys");
    let n2 = b.name("n");
    let ret = b.ret(vec![sum2, keys2, n2]);
    let rt1 = b.name("int");
    let rt2 = b.name("string");
    let rt3 = b.name("int");
    let f = b.func_decl(
        "Walk",
        vec![],
        vec![rt1, rt2, rt3],
        vec![def_xs, def_sum, r1, def_m, def_keys, r2, def_n, r3, ret],
    );
    let tree = b.finish("ranges", vec![f]);
    // "héllo": the last character starts at byte 5.
    assert_eq!(run_ok(tree, "Walk", vec![]), vec!["6", "ab", "5"]);
}

// ==================== Closures ====================

#[test]
fn closures_capture_per_iteration_copies() {
    let fixture = loop_closures(LIB, false);
    assert_eq!(call_each(fixture.tree, vec![]), vec!["0", "1", "2"]);
}

#[test]
fn closures_capture_loop_variable_per_iteration() {
    let fixture = loop_closures(LIB, true);
    assert_eq!(call_each(fixture.tree, vec![]), vec!["0", "1", "2"]);
}

#[test]
fn recursive_closure_in_loop_keeps_its_own_binding() {
    // fs := []func(int) int{}
    // for i := 0; i < 3; i++ {
    //     var f func(int) int
    //     f = func(n int) int { if n == 0 { return i }; return f(n - 1) }
    //     fs = append(fs, f)
    // }
    // return fs
    let mut b = TreeBuilder::new(LIB);
    let fty = |b: &mut TreeBuilder| {
        let p = b.name("int");
        let r = b.name("int");
        b.func_type(vec![("n", p)], vec![r])
    };
    let ft1 = fty(&mut b);
    let sty = b.slice_type(ft1);
    let empty = b.composite(sty, vec![]);
    let fs0 = b.name("fs");
    let def_fs = b.define(vec![fs0], vec![empty]);

    let ft2 = fty(&mut b);
    let var_f = b.var_stmt(&["f"], Some(ft2), vec![]);
    let n0 = b.name("n");
    let zero = b.int(0);
    let is_zero = b.binary(n0, BinaryOp::Eql, zero);
    let i_use = b.name("i");
    let ret_i = b.ret(vec![i_use]);
    let base = b.if_stmt(None, is_zero, vec![ret_i], None);
    let n1 = b.name("n");
    let one = b.int(1);
    let dec = b.binary(n1, BinaryOp::Sub, one);
    let f_call = b.call_name("f", vec![dec]);
    let ret_rec = b.ret(vec![f_call]);
    let p_int = b.name("int");
    let r_int = b.name("int");
    let lit = b.func_lit(vec![("n", p_int)], vec![r_int], vec![base, ret_rec]);
    let f0 = b.name("f");
    let set_f = b.assign(vec![f0], vec![lit]);
    let fs1 = b.name("fs");
    let f1 = b.name("f");
    let app = b.call_name("append", vec![fs1, f1]);
    let fs2 = b.name("fs");
    let push = b.assign(vec![fs2], vec![app]);

    let i0 = b.name("i");
    let zero_i = b.int(0);
    let init = b.define(vec![i0], vec![zero_i]);
    let i1 = b.name("i");
    let three = b.int(3);
    let cond = b.binary(i1, BinaryOp::Lss, three);
    let i2 = b.name("i");
    let post = b.inc(i2);
    let lp = b.for_loop(Some(init), Some(cond), Some(post), vec![var_f, set_f, push]);

    let fs3 = b.name("fs");
    let ret = b.ret(vec![fs3]);
    let ft3 = fty(&mut b);
    let rty = b.slice_type(ft3);
    let make = b.func_decl("Make", vec![], vec![rty], vec![def_fs, lp, ret]);
    let tree = b.finish("recur", vec![make]);
    assert_eq!(call_each(tree, vec![Value::Int(2)]), vec!["0", "1", "2"]);
}

#[test]
fn short_redeclaration_keeps_captured_cell() {
    // fs := []func() int{}
    // for i := 0; i < 2; i++ {
    //     first, v := 0, i
    //     fs = append(fs, func() int { return v })
    //     second, v := 1, i+100
    // }
    // return fs
    let mut b = TreeBuilder::new(LIB);
    let int1 = b.name("int");
    let ft1 = b.func_type(vec![], vec![int1]);
    let sty = b.slice_type(ft1);
    let empty = b.composite(sty, vec![]);
    let fs0 = b.name("fs");
    let def_fs = b.define(vec![fs0], vec![empty]);

    let first = b.name("first");
    let v0 = b.name("v");
    let zero = b.int(0);
    let i_a = b.name("i");
    let def_first = b.define(vec![first, v0], vec![zero, i_a]);
    let v1 = b.name("v");
    let ret_v = b.ret(vec![v1]);
    let int2 = b.name("int");
    let lit = b.func_lit(vec![], vec![int2], vec![ret_v]);
    let fs1 = b.name("fs");
    let app = b.call_name("append", vec![fs1, lit]);
    let fs2 = b.name("fs");
    let push = b.assign(vec![fs2], vec![app]);
    let second = b.name("second");
    let v2 = b.name("v");
    let one = b.int(1);
    let i_b = b.name("i");
    let hundred = b.int(100);
    let shifted = b.binary(i_b, BinaryOp::Add, hundred);
    let def_second = b.define(vec![second, v2], vec![one, shifted]);

    let i0 = b.name("i");
    let zero_i = b.int(0);
    let init = b.define(vec![i0], vec![zero_i]);
    let i1 = b.name("i");
    let two = b.int(2);
    let cond = b.binary(i1, BinaryOp::Lss, two);
    let i2 = b.name("i");
    let post = b.inc(i2);
    let lp = b.for_loop(Some(init), Some(cond), Some(post), vec![def_first, push, def_second]);

    let fs3 = b.name("fs");
    let ret = b.ret(vec![fs3]);
    let int3 = b.name("int");
    let ft2 = b.func_type(vec![], vec![int3]);
    let rty = b.slice_type(ft2);
    let make = b.func_decl("Make", vec![], vec![rty], vec![def_fs, lp, ret]);
    let tree = b.finish("redeclare", vec![make]);
    assert_eq!(call_each(tree, vec![]), vec!["100", "101"]);
}

#[test]
fn closure_shares_enclosing_function_binding() {
    // x := 0; inc := func() { x++ }; inc(); inc(); return x
    let mut b = TreeBuilder::new(LIB);
    let x0 = b.name("x");
    let zero = b.int(0);
    let def_x = b.define(vec![x0], vec![zero]);
    let x1 = b.name("x");
    let bump = b.inc(x1);
    let lit = b.func_lit(vec![], vec![], vec![bump]);
    let inc0 = b.name("inc");
    let def_inc = b.define(vec![inc0], vec![lit]);
    let c1 = b.call_name("inc", vec![]);
    let s1 = b.expr_stmt(c1);
    let c2 = b.call_name("inc", vec![]);
    let s2 = b.expr_stmt(c2);
    let x2 = b.name("x");
    let ret = b.ret(vec![x2]);
    let int_r = b.name("int");
    let f = b.func_decl("Count", vec![], vec![int_r], vec![def_x, def_inc, s1, s2, ret]);
    let tree = b.finish("share", vec![f]);
    assert_eq!(run_ok(tree, "Count", vec![]), vec!["2"]);
}

// ==================== Values ====================

/// `type Counter struct { n int }` with `(*Counter) Inc` and `(Counter) Get`.
fn counter_type(b: &mut TreeBuilder) -> Vec<NodeId> {
    let int_f = b.name("int");
    let sty = b.struct_type(vec![("n", int_f)]);
    let ty = b.type_decl("Counter", sty);

    let c0 = b.name("c");
    let field = b.selector(c0, "n");
    let bump = b.inc(field);
    let ctr = b.name("Counter");
    let ptr = b.ptr_type(ctr);
    let inc = b.method_decl(("c", ptr), "Inc", vec![], vec![], vec![bump]);

    let c1 = b.name("c");
    let read = b.selector(c1, "n");
    let ret = b.ret(vec![read]);
    let ctr2 = b.name("Counter");
    let int_r = b.name("int");
    let get = b.method_decl(("c", ctr2), "Get", vec![], vec![int_r], vec![ret]);
    vec![ty, inc, get]
}

#[test]
fn pointer_and_value_methods() {
    // c := Counter{}; c.Inc(); c.Inc(); p := &c; p.Inc(); return c.Get()
    let mut b = TreeBuilder::new(LIB);
    let mut decls = counter_type(&mut b);
    let ctr = b.name("Counter");
    let lit = b.composite(ctr, vec![]);
    let c0 = b.name("c");
    let def_c = b.define(vec![c0], vec![lit]);
    let mut calls = Vec::new();
    for _ in 0..2 {
        let c = b.name("c");
        let m = b.selector(c, "Inc");
        let call = b.call(m, vec![]);
        calls.push(b.expr_stmt(call));
    }
    let c3 = b.name("c");
    let addr = b.ref_of(c3);
    let p0 = b.name("p");
    let def_p = b.define(vec![p0], vec![addr]);
    let p1 = b.name("p");
    let pm = b.selector(p1, "Inc");
    let pcall = b.call(pm, vec![]);
    let pstmt = b.expr_stmt(pcall);
    let c4 = b.name("c");
    let get = b.selector(c4, "Get");
    let got = b.call(get, vec![]);
    let ret = b.ret(vec![got]);
    let int_r = b.name("int");
    let mut body = vec![def_c];
    body.extend(calls);
    body.extend([def_p, pstmt, ret]);
    decls.push(b.func_decl("Use", vec![], vec![int_r], body));
    let tree = b.finish("methods", decls);
    assert_eq!(run_ok(tree, "Use", vec![]), vec!["3"]);
}

#[test]
fn structs_copy_and_pointers_share() {
    // a := Counter{n: 1}; b := a; b.n = 2
    // p := &Counter{n: 5}; q := p; q.n = 7
    // return a.n, p.n, *p
    let mut b = TreeBuilder::new(LIB);
    let mut decls = counter_type(&mut b);
    let ctr = b.name("Counter");
    let key = b.name("n");
    let one = b.int(1);
    let lit = b.composite_keyed(ctr, vec![(key, one)]);
    let a0 = b.name("a");
    let def_a = b.define(vec![a0], vec![lit]);
    let a1 = b.name("a");
    let b0 = b.name("b");
    let def_b = b.define(vec![b0], vec![a1]);
    let b1 = b.name("b");
    let bn = b.selector(b1, "n");
    let two = b.int(2);
    let set_b = b.assign(vec![bn], vec![two]);

    let ctr2 = b.name("Counter");
    let key2 = b.name("n");
    let five = b.int(5);
    let lit2 = b.composite_keyed(ctr2, vec![(key2, five)]);
    let addr = b.ref_of(lit2);
    let p0 = b.name("p");
    let def_p = b.define(vec![p0], vec![addr]);
    let p1 = b.name("p");
    let q0 = b.name("q");
    let def_q = b.define(vec![q0], vec![p1]);
    let q1 = b.name("q");
    let qn = b.selector(q1, "n");
    let seven = b.int(7);
    let set_q = b.assign(vec![qn], vec![seven]);

    let a2 = b.name("a");
    let an = b.selector(a2, "n");
    let p2 = b.name("p");
    let pn = b.selector(p2, "n");
    let p3 = b.name("p");
    let deref = b.star(p3);
    let ret = b.ret(vec![an, pn, deref]);
    let r1 = b.name("int");
    let r2 = b.name("int");
    let r3 = b.name("Counter");
    decls.push(b.func_decl(
        "Copy",
        vec![],
        vec![r1, r2, r3],
        vec![def_a, def_b, set_b, def_p, def_q, set_q, ret],
    ));
    let tree = b.finish("values", decls);
    assert_eq!(run_ok(tree, "Copy", vec![]), vec!["1", "7", "{7}"]);
}

#[test]
fn map_lookup_with_comma_ok() {
    // m := map[string]int{"a": 1}; m["b"] = 2
    // v, ok := m["zz"]
    // return len(m), v, ok, m["b"]
    let mut b = TreeBuilder::new(LIB);
    let kt = b.name("string");
    let vt = b.name("int");
    let mty = b.map_type(kt, vt);
    let ka = b.str_lit("a");
    let one = b.int(1);
    let lit = b.composite_keyed(mty, vec![(ka, one)]);
    let m0 = b.name("m");
    let def_m = b.define(vec![m0], vec![lit]);
    let m1 = b.name("m");
    let kb = b.str_lit("b");
    let slot = b.index(m1, kb);
    let two = b.int(2);
    let set = b.assign(vec![slot], vec![two]);
    let m2 = b.name("m");
    let kz = b.str_lit("zz");
    let miss = b.index(m2, kz);
    let v0 = b.name("v");
    let ok0 = b.name("ok");
    let lookup = b.define(vec![v0, ok0], vec![miss]);
    let m3 = b.name("m");
    let len = b.call_name("len", vec![m3]);
    let v1 = b.name("v");
    let ok1 = b.name("ok");
    let m4 = b.name("m");
    let kb2 = b.str_lit("b");
    let hit = b.index(m4, kb2);
    let ret = b.ret(vec![len, v1, ok1, hit]);
    let r1 = b.name("int");
    let r2 = b.name("int");
    let r3 = b.name("bool");
    let r4 = b.name("int");
    let f = b.func_decl("Lookup", vec![], vec![r1, r2, r3, r4], vec![def_m, set, lookup, ret]);
    let tree = b.finish("maps", vec![f]);
    assert_eq!(run_ok(tree, "Lookup", vec![]), vec!["2", "0", "false", "2"]);
}

#[test]
fn type_assertions() {
    // var x any = 5
    // n, ok := x.(int)
    // s, ok2 := x.(string)
    // return n, ok, s, ok2
    let mut b = TreeBuilder::new(LIB);
    let any = b.name("any");
    let five = b.int(5);
    let var_x = b.var_stmt(&["x"], Some(any), vec![five]);
    let x1 = b.name("x");
    let int_t = b.name("int");
    let as_int = b.type_assert(x1, int_t);
    let n0 = b.name("n");
    let ok0 = b.name("ok");
    let d1 = b.define(vec![n0, ok0], vec![as_int]);
    let x2 = b.name("x");
    let str_t = b.name("string");
    let as_str = b.type_assert(x2, str_t);
    let s0 = b.name("s");
    let ok2 = b.name("ok2");
    let d2 = b.define(vec![s0, ok2], vec![as_str]);
    let n1 = b.name("n");
    let ok1 = b.name("ok");
    let s1 = b.name("s");
    let ok3 = b.name("ok2");
    let ret = b.ret(vec![n1, ok1, s1, ok3]);
    let r1 = b.name("int");
    let r2 = b.name("bool");
    let r3 = b.name("string");
    let r4 = b.name("bool");
    let f = b.func_decl("Kind", vec![], vec![r1, r2, r3, r4], vec![var_x, d1, d2, ret]);
    let tree = b.finish("asserts", vec![f]);
    assert_eq!(run_ok(tree, "Kind", vec![]), vec!["5", "true", "", "false"]);
}

#[test]
fn failed_assertion_without_comma_ok_panics() {
    let mut b = TreeBuilder::new(LIB);
    let any = b.name("any");
    let five = b.int(5);
    let var_x = b.var_stmt(&["x"], Some(any), vec![five]);
    let x1 = b.name("x");
    let str_t = b.name("string");
    let as_str = b.type_assert(x1, str_t);
    let ret = b.ret(vec![as_str]);
    let r = b.name("string");
    let f = b.func_decl("Bad", vec![], vec![r], vec![var_x, ret]);
    let tree = b.finish("asserts", vec![f]);
    assert!(matches!(run(tree, "Bad", vec![]), Err(VmError::Panic(_))));
}

// ==================== Runtime Errors ====================

fn unary_int_func(name: &str, op: BinaryOp, lhs: i64) -> ProgramTree {
    // func <name>(a int) int { return lhs <op> a }
    let mut b = TreeBuilder::new(LIB);
    let l = b.int(lhs);
    let a = b.name("a");
    let e = b.binary(l, op, a);
    let ret = b.ret(vec![e]);
    let p = b.name("int");
    let r = b.name("int");
    let f = b.func_decl(name, vec![("a", p)], vec![r], vec![ret]);
    b.finish("arith", vec![f])
}

#[test]
fn division_by_zero() {
    let tree = unary_int_func("Div", BinaryOp::Quo, 10);
    assert_eq!(run(tree, "Div", vec![Value::Int(0)]), Err(VmError::DivisionByZero));
    let tree = unary_int_func("Div", BinaryOp::Quo, 10);
    assert_eq!(run_ok(tree, "Div", vec![Value::Int(3)]), vec!["3"]);
}

#[test]
fn integer_overflow_is_an_error() {
    let tree = unary_int_func("Add", BinaryOp::Add, i64::MAX);
    assert_eq!(run(tree, "Add", vec![Value::Int(1)]), Err(VmError::Overflow));
}

#[test]
fn index_out_of_range() {
    // xs := []int{1}; return xs[3]
    let mut b = TreeBuilder::new(LIB);
    let int1 = b.name("int");
    let sty = b.slice_type(int1);
    let one = b.int(1);
    let lit = b.composite(sty, vec![one]);
    let xs = b.name("xs");
    let def = b.define(vec![xs], vec![lit]);
    let xs1 = b.name("xs");
    let three = b.int(3);
    let at = b.index(xs1, three);
    let ret = b.ret(vec![at]);
    let r = b.name("int");
    let f = b.func_decl("At", vec![], vec![r], vec![def, ret]);
    let tree = b.finish("index", vec![f]);
    assert_eq!(
        run(tree, "At", vec![]),
        Err(VmError::IndexOutOfRange { index: 3, len: 1 })
    );
}

#[test]
fn panic_renders_its_argument() {
    let mut b = TreeBuilder::new(LIB);
    let msg = b.str_lit("boom");
    let call = b.call_name("panic", vec![msg]);
    let stmt = b.expr_stmt(call);
    let f = b.func_decl("Boom", vec![], vec![], vec![stmt]);
    let tree = b.finish("panics", vec![f]);
    assert_eq!(run(tree, "Boom", vec![]), Err(VmError::Panic("boom".into())));
}

#[test]
fn unbounded_recursion_exceeds_call_depth() {
    let mut b = TreeBuilder::new(LIB);
    let call = b.call_name("Loop", vec![]);
    let stmt = b.expr_stmt(call);
    let f = b.func_decl("Loop", vec![], vec![], vec![stmt]);
    let tree = b.finish("deep", vec![f]);
    assert_eq!(
        run(tree, "Loop", vec![]),
        Err(VmError::CallDepthExceeded { limit: MAX_DEPTH })
    );
}

#[test]
fn infinite_loop_runs_out_of_gas() {
    let mut b = TreeBuilder::new(LIB);
    let spin = b.for_loop(None, None, None, vec![]);
    let f = b.func_decl("Spin", vec![], vec![], vec![spin]);
    let tree = b.finish("spin", vec![f]);
    let err = run_with(tree, "Spin", vec![], false, 50_000).unwrap_err();
    assert!(matches!(err, VmError::OutOfGas { limit: 50_000, .. }));
    assert_eq!(err.class(), ErrorClass::ResourceExhaustion);
}

// ==================== Realms ====================

/// A realm with `var counter int` and:
/// - `Inc() int`: crossing, increments and returns the counter
/// - `Peek() int`: plain read
/// - `Bump()`: plain write
/// - `Who() (string, string)`: crossing, current and previous realm
fn counter_realm() -> ProgramTree {
    let mut b = TreeBuilder::new(REALM);
    let zero = b.int(0);
    let var = b.var(&["counter"], None, vec![zero]);

    let cross = b.crossing();
    let c0 = b.name("counter");
    let bump = b.inc(c0);
    let c1 = b.name("counter");
    let ret = b.ret(vec![c1]);
    let int_r = b.name("int");
    let inc = b.func_decl("Inc", vec![], vec![int_r], vec![cross, bump, ret]);

    let c2 = b.name("counter");
    let ret2 = b.ret(vec![c2]);
    let int_r2 = b.name("int");
    let peek = b.func_decl("Peek", vec![], vec![int_r2], vec![ret2]);

    let c3 = b.name("counter");
    let bump2 = b.inc(c3);
    let plain = b.func_decl("Bump", vec![], vec![], vec![bump2]);

    let cross2 = b.crossing();
    let cur = b.call_name("currentRealm", vec![]);
    let prev = b.call_name("previousRealm", vec![]);
    let ret3 = b.ret(vec![cur, prev]);
    let s1 = b.name("string");
    let s2 = b.name("string");
    let who = b.func_decl("Who", vec![], vec![s1, s2], vec![cross2, ret3]);
    b.finish("counter", vec![var, inc, peek, plain, who])
}

#[test]
fn crossing_call_mutates_own_realm() {
    let pkg = Arc::new(compile(counter_realm()));
    let out = with_machine(TEST_GAS, |m| {
        m.instantiate(pkg)?;
        m.call_function(REALM, &Name::from("Inc"), vec![], true)?;
        let v = m.call_function(REALM, &Name::from("Inc"), vec![], true)?;
        assert_eq!(m.realms().depth(), 1);
        m.render(&v[0])
    })
    .unwrap();
    assert_eq!(out, "2");
}

#[test]
fn call_form_must_match_declaration() {
    let err = run(counter_realm(), "Inc", vec![]).unwrap_err();
    assert!(matches!(err, VmError::Realm(RealmError::CrossingRequired { .. })));
    let err = run_with(counter_realm(), "Peek", vec![], true, TEST_GAS).unwrap_err();
    assert!(matches!(err, VmError::Realm(RealmError::NotCrossing { .. })));
    assert_eq!(run_ok(counter_realm(), "Peek", vec![]), vec!["0"]);
}

#[test]
fn plain_call_cannot_mutate_realm_state() {
    let err = run(counter_realm(), "Bump", vec![]).unwrap_err();
    assert!(matches!(err, VmError::Realm(RealmError::UnauthorizedMutation { .. })));
    assert_eq!(err.class(), ErrorClass::RealmBoundary);
}

#[test]
fn current_and_previous_realm() {
    let out = run_with(counter_realm(), "Who", vec![], true, TEST_GAS).unwrap();
    assert_eq!(out, vec![Address::from_pkg_path(REALM).to_string(), alice().to_string()]);
}

#[test]
fn nested_crossing_tracks_current_and_previous_realm() {
    // package inner
    // func Who() (string, string) { crossing(); return currentRealm(), previousRealm() }
    // func Plain() string { return currentRealm() }
    const INNER: &str = "gno.land/r/demo/inner";
    const OUTER: &str = "gno.land/r/demo/outer";
    let mut b = TreeBuilder::new(INNER);
    let cross = b.crossing();
    let cur = b.call_name("currentRealm", vec![]);
    let prev = b.call_name("previousRealm", vec![]);
    let ret = b.ret(vec![cur, prev]);
    let s1 = b.name("string");
    let s2 = b.name("string");
    let who = b.func_decl("Who", vec![], vec![s1, s2], vec![cross, ret]);
    let cur2 = b.call_name("currentRealm", vec![]);
    let ret2 = b.ret(vec![cur2]);
    let s3 = b.name("string");
    let plain = b.func_decl("Plain", vec![], vec![s3], vec![ret2]);
    let inner = Arc::new(compile(b.finish("inner", vec![who, plain])));

    // package outer
    // import "gno.land/r/demo/inner"
    // func Relay() (string, string, string) {
    //     crossing()
    //     cur, prev := cross(inner.Who)()
    //     return cur, prev, inner.Plain()
    // }
    let mut b = TreeBuilder::new(OUTER);
    let import = b.import("inner", INNER);
    let cross = b.crossing();
    let pkg0 = b.name("inner");
    let who_sel = b.selector(pkg0, "Who");
    let crossed = b.cross_call(who_sel, vec![]);
    let cur0 = b.name("cur");
    let prev0 = b.name("prev");
    let def = b.define(vec![cur0, prev0], vec![crossed]);
    let cur1 = b.name("cur");
    let prev1 = b.name("prev");
    let pkg1 = b.name("inner");
    let plain_sel = b.selector(pkg1, "Plain");
    let plain_call = b.call(plain_sel, vec![]);
    let ret = b.ret(vec![cur1, prev1, plain_call]);
    let r1 = b.name("string");
    let r2 = b.name("string");
    let r3 = b.name("string");
    let relay = b.func_decl("Relay", vec![], vec![r1, r2, r3], vec![cross, def, ret]);
    let imports = BTreeMap::from([(INNER.to_string(), inner.clone())]);
    let outer = compile_with(b.finish("outer", vec![import, relay]), &imports);

    let out = with_machine(TEST_GAS, |m| {
        m.instantiate(inner)?;
        m.instantiate(outer)?;
        let results = m.call_function(OUTER, &Name::from("Relay"), vec![], true)?;
        assert_eq!(m.realms().depth(), 1);
        results.iter().map(|v| m.render(v)).collect::<Result<Vec<_>, _>>()
    })
    .unwrap();
    let inner_addr = Address::from_pkg_path(INNER).to_string();
    let outer_addr = Address::from_pkg_path(OUTER).to_string();
    assert_eq!(out, vec![inner_addr, outer_addr.clone(), outer_addr]);
}

#[test]
fn previous_realm_at_origin_is_an_error() {
    let mut b = TreeBuilder::new(LIB);
    let prev = b.call_name("previousRealm", vec![]);
    let ret = b.ret(vec![prev]);
    let r = b.name("string");
    let f = b.func_decl("Prev", vec![], vec![r], vec![ret]);
    let tree = b.finish("prev", vec![f]);
    assert_eq!(
        run(tree, "Prev", vec![]),
        Err(VmError::Realm(RealmError::NoPreviousRealm))
    );
}

#[test]
fn deferred_calls_run_last_in_first_out() {
    // var log []int
    // func record(n int) { log = append(log, n) }
    // func Run() { crossing(); defer record(1); defer record(2); record(0) }
    // func Log() []int { return log }
    let mut b = TreeBuilder::new(REALM);
    let int_t = b.name("int");
    let sty = b.slice_type(int_t);
    let var = b.var(&["log"], Some(sty), vec![]);

    let l0 = b.name("log");
    let n0 = b.name("n");
    let app = b.call_name("append", vec![l0, n0]);
    let l1 = b.name("log");
    let set = b.assign(vec![l1], vec![app]);
    let p = b.name("int");
    let record = b.func_decl("record", vec![("n", p)], vec![], vec![set]);

    let cross = b.crossing();
    let one = b.int(1);
    let c1 = b.call_name("record", vec![one]);
    let d1 = b.defer(c1);
    let two = b.int(2);
    let c2 = b.call_name("record", vec![two]);
    let d2 = b.defer(c2);
    let zero = b.int(0);
    let c0 = b.call_name("record", vec![zero]);
    let now = b.expr_stmt(c0);
    let run_fn = b.func_decl("Run", vec![], vec![], vec![cross, d1, d2, now]);

    let l2 = b.name("log");
    let ret = b.ret(vec![l2]);
    let int_e = b.name("int");
    let rty = b.slice_type(int_e);
    let log_fn = b.func_decl("Log", vec![], vec![rty], vec![ret]);
    let tree = b.finish("defers", vec![var, record, run_fn, log_fn]);

    let pkg = Arc::new(compile(tree));
    let out = with_machine(TEST_GAS, |m| {
        m.instantiate(pkg)?;
        m.call_function(REALM, &Name::from("Run"), vec![], true)?;
        let log = m.call_function(REALM, &Name::from("Log"), vec![], false)?;
        m.render(&log[0])
    })
    .unwrap();
    assert_eq!(out, "[0 2 1]");
}

#[test]
fn redeploying_a_path_is_rejected() {
    let first = Arc::new(compile(fib_tree()));
    let second = Arc::new(compile(fib_tree()));
    let err = with_machine(TEST_GAS, |m| {
        m.instantiate(first)?;
        m.instantiate(second)
    })
    .unwrap_err();
    assert_eq!(err, VmError::PackageExists(LIB.to_string()));
}
