// Property-based tests for evaluator and value-layer invariants.
//
// Categories:
// 1. Range-set algebra against a naive element-set model
// 2. Idempotence of eval_par over generated arithmetic trees
// 3. Domain tightening is monotone (intersection never grows)
// 4. Comprehension evaluation terminates in product-cardinality steps
//
// Uses proptest with bounded inputs to keep runs deterministic and fast.

use std::collections::BTreeSet;

use proptest::prelude::*;

use tnc::ast::{BinOpKind, Comprehension, ExprKind, Generator, Location, TypeInst};
use tnc::env::Env;
use tnc::id::ExprId;
use tnc::ty::Type;
use tnc::val::{IntSetVal, IntVal};

// ── Generators ──────────────────────────────────────────────────────────────

fn arb_ranges() -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::vec((-50i64..50, 0i64..10), 0..6)
        .prop_map(|pairs| pairs.into_iter().map(|(lo, w)| (lo, lo + w)).collect())
}

fn model_of(ranges: &[(i64, i64)]) -> BTreeSet<i64> {
    ranges
        .iter()
        .flat_map(|&(lo, hi)| lo..=hi)
        .collect()
}

fn set_of(ranges: &[(i64, i64)]) -> IntSetVal {
    IntSetVal::from_ranges(
        ranges
            .iter()
            .map(|&(lo, hi)| (IntVal::Int(lo), IntVal::Int(hi))),
    )
}

fn elements(s: &IntSetVal) -> BTreeSet<i64> {
    s.values().map(|v| v.to_i64().unwrap()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn set_algebra_matches_element_model(a in arb_ranges(), b in arb_ranges()) {
        let (sa, sb) = (set_of(&a), set_of(&b));
        let (ma, mb) = (model_of(&a), model_of(&b));

        prop_assert_eq!(elements(&sa.union(&sb)), &ma | &mb);
        prop_assert_eq!(elements(&sa.intersect(&sb)), &ma & &mb);
        prop_assert_eq!(elements(&sa.diff(&sb)), &ma - &mb);
        prop_assert_eq!(elements(&sa.sym_diff(&sb)), &ma ^ &mb);
        prop_assert_eq!(sa.is_subset_of(&sb), ma.is_subset(&mb));
        prop_assert_eq!(
            sa.card().unwrap(),
            IntVal::Int(ma.len() as i64)
        );
    }

    #[test]
    fn set_normalization_is_canonical(a in arb_ranges()) {
        let s = set_of(&a);
        // Rebuilding from the normalized ranges is the identity.
        let rebuilt = IntSetVal::from_ranges(s.ranges());
        prop_assert_eq!(&rebuilt, &s);
        // Ranges are sorted, disjoint, and non-adjacent.
        let rs: Vec<_> = s.ranges().collect();
        for w in rs.windows(2) {
            let (_, u0) = &w[0];
            let (l1, _) = &w[1];
            prop_assert!(u0 < l1, "ranges must be disjoint and sorted");
            if let (IntVal::Int(u), IntVal::Int(l)) = (u0, l1) {
                prop_assert!(*l > *u + 1, "adjacent ranges must merge");
            }
        }
    }
}

// ── eval_par idempotence ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum ArithTree {
    Lit(i32),
    Add(Box<ArithTree>, Box<ArithTree>),
    Sub(Box<ArithTree>, Box<ArithTree>),
    Mul(Box<ArithTree>, Box<ArithTree>),
}

fn arb_tree() -> impl Strategy<Value = ArithTree> {
    let leaf = (-100i32..100).prop_map(ArithTree::Lit);
    leaf.prop_recursive(4, 32, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| ArithTree::Add(Box::new(a), Box::new(b))),
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| ArithTree::Sub(Box::new(a), Box::new(b))),
            (inner.clone(), inner)
                .prop_map(|(a, b)| ArithTree::Mul(Box::new(a), Box::new(b))),
        ]
    })
}

fn build(env: &mut Env, t: &ArithTree) -> ExprId {
    match t {
        ArithTree::Lit(v) => env.int_lit(IntVal::Int(*v as i64)),
        ArithTree::Add(a, b) | ArithTree::Sub(a, b) | ArithTree::Mul(a, b) => {
            let op = match t {
                ArithTree::Add(..) => BinOpKind::Plus,
                ArithTree::Sub(..) => BinOpKind::Minus,
                _ => BinOpKind::Mult,
            };
            let lhs = build(env, a);
            let rhs = build(env, b);
            env.new_expr(
                ExprKind::BinOp { op, lhs, rhs },
                Type::par_int(),
                Location::unknown(),
            )
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn eval_par_is_idempotent_on_arithmetic(t in arb_tree()) {
        let mut env = Env::default();
        let e = build(&mut env, &t);
        // Arithmetic on this grammar cannot fail: values past the machine
        // word spill to bignums.
        let lit = tnc::eval::eval_par(&mut env, e).unwrap();
        let again = tnc::eval::eval_par(&mut env, lit).unwrap();
        prop_assert_eq!(lit, again, "eval_par(v) must return v");
    }

    #[test]
    fn domain_intersection_is_monotone(a in arb_ranges(), b in arb_ranges()) {
        let (sa, sb) = (set_of(&a), set_of(&b));
        let inter = sa.intersect(&sb);
        prop_assert!(inter.is_subset_of(&sa));
        prop_assert!(inter.is_subset_of(&sb));
    }

    #[test]
    fn comprehension_step_count_is_generator_product(
        n1 in 0i64..8,
        n2 in 0i64..8,
    ) {
        let mut env = Env::default();
        let d1 = env.new_decl(TypeInst::plain(Type::par_int()), "i".into(), None, Location::unknown());
        let d2 = env.new_decl(TypeInst::plain(Type::par_int()), "j".into(), None, Location::unknown());
        let body = env.id_expr(d1);
        let mk_range = |env: &mut Env, n: i64| {
            let one = env.int_lit(IntVal::ONE);
            let hi = env.int_lit(IntVal::Int(n));
            env.new_expr(
                ExprKind::BinOp { op: BinOpKind::DotDot, lhs: one, rhs: hi },
                Type::par_set_int(),
                Location::unknown(),
            )
        };
        let r1 = mk_range(&mut env, n1);
        let r2 = mk_range(&mut env, n2);
        let comp = Comprehension {
            body,
            gens: vec![
                Generator { decls: vec![d1], in_expr: Some(r1), where_expr: None },
                Generator { decls: vec![d2], in_expr: Some(r2), where_expr: None },
            ],
            set: false,
        };
        let mut steps = 0usize;
        tnc::eval::eval_comp(&mut env, &comp, &mut |_, _| {
            steps += 1;
            Ok(())
        }).unwrap();
        prop_assert_eq!(steps as i64, n1.max(0) * n2.max(0));
    }
}
