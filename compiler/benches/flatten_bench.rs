// Criterion benchmark: flattening throughput on synthetic chain models.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use tnc::ast::{BinOpKind, ExprKind, ItemKind, Location, SolveGoal, TypeInst};
use tnc::env::Env;
use tnc::flatten::flatten_model;
use tnc::id::DeclId;
use tnc::ty::Type;
use tnc::val::IntVal;

/// `n` integer variables in 0..1000 with a chain of x_i < x_{i+1}
/// constraints plus a linear objective.
fn chain_model(n: usize) -> Env {
    let mut env = Env::default();
    let mut decls: Vec<DeclId> = Vec::with_capacity(n);
    for i in 0..n {
        let lo = env.int_lit(IntVal::ZERO);
        let hi = env.int_lit(IntVal::Int(1000));
        let dom = env.new_expr(
            ExprKind::BinOp {
                op: BinOpKind::DotDot,
                lhs: lo,
                rhs: hi,
            },
            Type::par_set_int(),
            Location::unknown(),
        );
        let name = env.intern(&format!("x{i}"));
        let d = env.new_decl(
            TypeInst::with_domain(Type::var_int(), dom),
            name,
            None,
            Location::new("bench.tn".into(), i as u32 + 1, 1),
        );
        env.decls[d].toplevel = true;
        env.add_source_item(ItemKind::VarDecl(d), Location::unknown());
        decls.push(d);
    }
    for w in decls.windows(2) {
        let a = env.id_expr(w[0]);
        let b = env.id_expr(w[1]);
        let lt = env.new_expr(
            ExprKind::BinOp {
                op: BinOpKind::Lt,
                lhs: a,
                rhs: b,
            },
            Type::var_bool(),
            Location::unknown(),
        );
        env.add_source_item(ItemKind::Constraint(lt), Location::unknown());
    }
    // Objective: minimize the sum of the chain.
    let mut acc = env.id_expr(decls[0]);
    for &d in &decls[1..] {
        let id = env.id_expr(d);
        acc = env.new_expr(
            ExprKind::BinOp {
                op: BinOpKind::Plus,
                lhs: acc,
                rhs: id,
            },
            Type::var_int(),
            Location::unknown(),
        );
    }
    env.add_source_item(
        ItemKind::Solve {
            goal: SolveGoal::Minimize(acc),
            ann: tnc::ast::Annotations::new(),
        },
        Location::unknown(),
    );
    env
}

fn bench_flatten(c: &mut Criterion) {
    let mut group = c.benchmark_group("flatten_chain");
    for &n in &[10usize, 100, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || chain_model(n),
                |mut env| {
                    flatten_model(&mut env).unwrap();
                    black_box(env.flat.items.len())
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_flatten);
criterion_main!(benches);
