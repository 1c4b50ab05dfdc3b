//! VM benchmark binary.
//!
//! Measures preprocessing, deployment and transaction time for
//! representative packages.
//! Run with: `cargo run --release --bin bench`

use std::time::{Duration, Instant};

use realmvm::ast::{AssignOp, BinaryOp, ProgramTree, TreeBuilder};
use realmvm::config::VmConfig;
use realmvm::keeper::{CallMsg, Keeper, Primitive, Receipt};
use realmvm::machine::gas::BLOCK_GAS_LIMIT;
use realmvm::preprocess::{NoImports, PreprocessOptions, preprocess};
use realmvm::storage::MemStore;
use realmvm::types::address::Address;

const COUNTER_PATH: &str = "gno.land/r/bench/counter";
const MATH_PATH: &str = "gno.land/p/bench/math";

// ---------------------------------------------------------------------------
// Benchmark harness
// ---------------------------------------------------------------------------

struct BenchResult {
    name: String,
    iterations: u64,
    total: Duration,
    gas_used: u64,
}

impl BenchResult {
    fn avg(&self) -> Duration {
        self.total / self.iterations.max(1) as u32
    }

    fn print(&self) {
        let avg = self.avg();
        let ns_per_op = avg.as_nanos();
        let ns_per_gas = if self.gas_used > 0 {
            format!("{:>8.2}", ns_per_op as f64 / self.gas_used as f64)
        } else {
            "       -".to_string()
        };
        println!(
            "  {:<30} {:>7} iters {:>10.3} us/iter {:>12} gas  {} ns/gas",
            self.name,
            self.iterations,
            ns_per_op as f64 / 1000.0,
            self.gas_used,
            ns_per_gas,
        );
    }
}

/// Runs `f` for at least `min_duration`, returning aggregated results.
fn bench<F>(name: impl Into<String>, min_duration: Duration, mut f: F) -> BenchResult
where
    F: FnMut() -> u64,
{
    // Warmup
    for _ in 0..5 {
        f();
    }

    let mut iterations = 0u64;
    let mut last_gas = 0u64;
    let start = Instant::now();
    while start.elapsed() < min_duration {
        last_gas = f();
        iterations += 1;
    }
    let total = start.elapsed();

    BenchResult {
        name: name.into(),
        iterations,
        total,
        gas_used: last_gas,
    }
}

fn expect_ok(receipt: Receipt) -> u64 {
    if !receipt.success {
        eprintln!("benchmark transaction failed: {receipt}");
        std::process::exit(1);
    }
    receipt.gas_used
}

// ---------------------------------------------------------------------------
// Benchmark programs
// ---------------------------------------------------------------------------

/// `var count int; func Inc() int { crossing(); count++; return count }`
fn counter(path: &str) -> ProgramTree {
    let mut b = TreeBuilder::new(path).with_pkg_name("counter");
    let zero = b.int(0);
    let var = b.var(&["count"], None, vec![zero]);
    let cross = b.crossing();
    let c0 = b.name("count");
    let inc = b.inc(c0);
    let c1 = b.name("count");
    let ret = b.ret(vec![c1]);
    let int_r = b.name("int");
    let f = b.func_decl("Inc", vec![], vec![int_r], vec![cross, inc, ret]);
    b.finish("counter", vec![var, f])
}

/// `Fib(n)` recursively and `Loop(n)` summing `0..n` with a closure per
/// iteration.
fn math(path: &str) -> ProgramTree {
    let mut b = TreeBuilder::new(path).with_pkg_name("math");

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
    let p = b.name("int");
    let r = b.name("int");
    let fib = b.func_decl("Fib", vec![("n", p)], vec![r], vec![early, ret]);

    // total := 0
    // for i := 0; i < n; i++ { add := func() { total += i }; add() }
    // return total
    let t0 = b.name("total");
    let zero = b.int(0);
    let def_total = b.define(vec![t0], vec![zero]);
    let t1 = b.name("total");
    let i_use = b.name("i");
    let add = b.op_assign(t1, AssignOp::AddAssign, i_use);
    let lit = b.func_lit(vec![], vec![], vec![add]);
    let f0 = b.name("add");
    let def_add = b.define(vec![f0], vec![lit]);
    let call = b.call_name("add", vec![]);
    let call_stmt = b.expr_stmt(call);
    let i0 = b.name("i");
    let zero_i = b.int(0);
    let init = b.define(vec![i0], vec![zero_i]);
    let i1 = b.name("i");
    let n5 = b.name("n");
    let lt = b.binary(i1, BinaryOp::Lss, n5);
    let i2 = b.name("i");
    let post = b.inc(i2);
    let lp = b.for_loop(Some(init), Some(lt), Some(post), vec![def_add, call_stmt]);
    let t2 = b.name("total");
    let ret2 = b.ret(vec![t2]);
    let p2 = b.name("int");
    let r2 = b.name("int");
    let looped = b.func_decl("Loop", vec![("n", p2)], vec![r2], vec![def_total, lp, ret2]);

    b.finish("math", vec![fib, looped])
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    let min = Duration::from_secs(2);
    let creator = Address::from_seed("bench");
    let config = VmConfig {
        max_gas_per_tx: BLOCK_GAS_LIMIT,
        ..VmConfig::default()
    };

    println!("VM Benchmarks (each runs for >= 2s)\n");
    println!(
        "  {:<30} {:>7}       {:>14} {:>12}  {:>10}",
        "benchmark", "iters", "avg time", "gas/run", "ns/gas"
    );
    println!("  {}", "-".repeat(82));

    // 1. Preprocessing alone (resolver and escape analysis)
    let tree = math(MATH_PATH);
    let r = bench("preprocess(math)", min, || {
        match preprocess(tree.clone(), &NoImports, PreprocessOptions::default()) {
            Ok(_) => 0,
            Err(e) => {
                eprintln!("preprocess failed: {e}");
                std::process::exit(1);
            }
        }
    });
    r.print();

    // 2. Deployment into a fresh store
    let r = bench("deploy(counter)", min, || {
        let keeper = Keeper::new(MemStore::new(), config.clone());
        expect_ok(keeper.add_package(&creator, counter(COUNTER_PATH)))
    });
    r.print();

    let keeper = Keeper::new(MemStore::new(), config.clone());
    expect_ok(keeper.add_package(&creator, counter(COUNTER_PATH)));
    expect_ok(keeper.add_package(&creator, math(MATH_PATH)));

    // 3. Committed crossing call with a lazy load and a save per run
    let r = bench("call(counter.Inc)", min, || {
        expect_ok(keeper.call(CallMsg::new(creator, COUNTER_PATH, "Inc").crossing()))
    });
    r.print();

    // 4. Recursion, discarded
    for n in [10i64, 15] {
        let r = bench(format!("query(Fib({n}))"), min, || {
            let msg = CallMsg::new(creator, MATH_PATH, "Fib").with_args(vec![Primitive::Int(n)]);
            expect_ok(keeper.query(msg))
        });
        r.print();
    }

    // 5. Loop with a per-iteration closure
    let r = bench("query(Loop(1000))", min, || {
        let msg = CallMsg::new(creator, MATH_PATH, "Loop").with_args(vec![Primitive::Int(1000)]);
        expect_ok(keeper.query(msg))
    });
    r.print();

    println!();
}
