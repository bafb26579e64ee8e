// End-to-end flattening scenarios, driven through the builder API the
// external front end would use. No source text is parsed here; models are
// assembled node by node and handed to the flattening driver.

use tnc::ast::{
    ArrayLit, BinOpKind, Call, Comprehension, ExprKind, Generator, ItemKind, Location, SolveGoal,
    TypeInst,
};
use tnc::env::Env;
use tnc::flatten::flatten_model;
use tnc::id::{DeclId, ExprId};
use tnc::opts::FlatteningOptions;
use tnc::ty::Type;
use tnc::val::{IntSetVal, IntVal};

// ── Builders ────────────────────────────────────────────────────────────────

fn loc(line: u32) -> Location {
    Location::new("m.tn".into(), line, 1)
}

fn int_var(env: &mut Env, name: &str, lo: i64, hi: i64, line: u32) -> DeclId {
    let l = env.int_lit(IntVal::Int(lo));
    let h = env.int_lit(IntVal::Int(hi));
    let dom = env.new_expr(
        ExprKind::BinOp {
            op: BinOpKind::DotDot,
            lhs: l,
            rhs: h,
        },
        Type::par_set_int(),
        loc(line),
    );
    let nm = env.intern(name);
    let d = env.new_decl(TypeInst::with_domain(Type::var_int(), dom), nm, None, loc(line));
    env.decls[d].toplevel = true;
    env.add_source_item(ItemKind::VarDecl(d), loc(line));
    d
}

fn bool_var(env: &mut Env, name: &str, rhs: Option<ExprId>, line: u32) -> DeclId {
    let nm = env.intern(name);
    let d = env.new_decl(TypeInst::plain(Type::var_bool()), nm, rhs, loc(line));
    env.decls[d].toplevel = true;
    env.add_source_item(ItemKind::VarDecl(d), loc(line));
    d
}

fn int_var_free(env: &mut Env, name: &str, rhs: Option<ExprId>, line: u32) -> DeclId {
    let nm = env.intern(name);
    let d = env.new_decl(TypeInst::plain(Type::var_int()), nm, rhs, loc(line));
    env.decls[d].toplevel = true;
    env.add_source_item(ItemKind::VarDecl(d), loc(line));
    d
}

fn binop(env: &mut Env, op: BinOpKind, lhs: ExprId, rhs: ExprId, ty: Type, line: u32) -> ExprId {
    env.new_expr(ExprKind::BinOp { op, lhs, rhs }, ty, loc(line))
}

fn constraint(env: &mut Env, e: ExprId, line: u32) {
    env.add_source_item(ItemKind::Constraint(e), loc(line));
}

fn solve_satisfy(env: &mut Env) {
    env.add_source_item(
        ItemKind::Solve {
            goal: SolveGoal::Satisfy,
            ann: tnc::ast::Annotations::new(),
        },
        Location::unknown(),
    );
}

/// All live constraint calls in the flat model, as (name, args).
fn flat_calls(env: &Env) -> Vec<(String, Vec<ExprId>)> {
    let mut out = Vec::new();
    for &i in &env.flat.items {
        if env.items[i].removed {
            continue;
        }
        if let ItemKind::Constraint(c) = env.items[i].kind {
            if let ExprKind::Call(Call { name, args, .. }) = &env.exprs[c].kind {
                out.push((name.to_string(), args.clone()));
            }
        }
    }
    out
}

fn call_names(env: &Env) -> Vec<String> {
    flat_calls(env).into_iter().map(|(n, _)| n).collect()
}

fn decl_of(env: &Env, e: ExprId) -> Option<DeclId> {
    match &env.exprs[e].kind {
        ExprKind::Id(id) => id.decl,
        _ => None,
    }
}

// ── Scenario: arithmetic with undef ─────────────────────────────────────────

#[test]
fn division_by_zero_fails_with_skeleton() {
    let mut env = Env::default();
    let x = int_var(&mut env, "x", 1, 10, 1);
    let three = env.int_lit(IntVal::Int(3));
    let zero = env.int_lit(IntVal::ZERO);
    let div = binop(&mut env, BinOpKind::IDiv, three, zero, Type::par_int(), 2);
    let xid = env.id_expr(x);
    let eq = binop(
        &mut env,
        BinOpKind::Eq,
        xid,
        div,
        Type::var_bool().with_cv(true),
        2,
    );
    constraint(&mut env, eq, 2);
    solve_satisfy(&mut env);

    flatten_model(&mut env).unwrap();

    assert!(env.failed);
    assert!(env
        .warnings()
        .iter()
        .any(|w| w.msg.contains("division by zero")));
    // Post-fail skeleton: everything live is `constraint false;` or
    // `solve satisfy;`.
    let mut saw_false = false;
    let mut saw_solve = false;
    for &i in &env.flat.items {
        if env.items[i].removed {
            continue;
        }
        match &env.items[i].kind {
            ItemKind::Constraint(c) => {
                assert!(matches!(env.exprs[*c].kind, ExprKind::BoolLit(false)));
                saw_false = true;
            }
            ItemKind::Solve {
                goal: SolveGoal::Satisfy,
                ..
            } => saw_solve = true,
            other => panic!("unexpected live item after fail(): {other:?}"),
        }
    }
    assert!(saw_false && saw_solve);
}

// ── Scenario: reification selection ─────────────────────────────────────────

#[test]
fn half_reification_under_positive_context() {
    let mut opts = FlatteningOptions::default();
    opts.enable_half_reification = true;
    let mut env = Env::new(opts);
    let x = int_var(&mut env, "x", 0, 10, 1);
    let y = int_var(&mut env, "y", 0, 10, 2);
    let xid = env.id_expr(x);
    let yid = env.id_expr(y);
    let lt = binop(&mut env, BinOpKind::Lt, xid, yid, Type::var_bool(), 3);
    let b = bool_var(&mut env, "b", Some(lt), 3);
    let c = bool_var(&mut env, "c", None, 4);
    // b appears positively in a disjunction.
    let bid = env.id_expr(b);
    let cid = env.id_expr(c);
    let or = binop(&mut env, BinOpKind::Or, bid, cid, Type::var_bool(), 5);
    constraint(&mut env, or, 5);
    solve_satisfy(&mut env);

    flatten_model(&mut env).unwrap();
    assert!(!env.failed);

    let calls = flat_calls(&env);
    let imp = calls
        .iter()
        .find(|(n, _)| n == "int_lt_imp")
        .expect("expected a half-reified int_lt");
    // Result argument is b's flat variable.
    let fb = env.decls[b].flat.unwrap();
    assert_eq!(decl_of(&env, imp.1[2]), Some(fb));
    assert!(!call_names(&env).iter().any(|n| n == "int_lt_reif"));
}

#[test]
fn half_reification_consults_range_domain_hook() {
    // The library hook is a nullary par predicate: its evaluated result
    // gates half-reification, not its mere presence.
    for (range_only, expect_imp) in [(true, false), (false, true)] {
        let mut opts = FlatteningOptions::default();
        opts.enable_half_reification = true;
        let mut env = Env::new(opts);
        let hook = env.intern("mzn_check_only_range_domains");
        let body = env.bool_lit(range_only);
        let f = env.functions.alloc(tnc::ast::FunctionData {
            name: hook.clone(),
            params: Vec::new(),
            param_tys: Vec::new(),
            ret: TypeInst::plain(Type::par_bool()),
            body: Some(body),
            ann: tnc::ast::Annotations::new(),
            builtin: false,
            loc: Location::unknown(),
        });
        env.model.register_function(hook, f);

        let x = int_var(&mut env, "x", 0, 10, 1);
        let y = int_var(&mut env, "y", 0, 10, 2);
        let xid = env.id_expr(x);
        let yid = env.id_expr(y);
        let lt = binop(&mut env, BinOpKind::Lt, xid, yid, Type::var_bool(), 3);
        let b = bool_var(&mut env, "b", Some(lt), 3);
        let c = bool_var(&mut env, "c", None, 4);
        let bid = env.id_expr(b);
        let cid = env.id_expr(c);
        let or = binop(&mut env, BinOpKind::Or, bid, cid, Type::var_bool(), 5);
        constraint(&mut env, or, 5);
        solve_satisfy(&mut env);

        flatten_model(&mut env).unwrap();
        assert!(!env.failed);

        let names = call_names(&env);
        if expect_imp {
            assert!(
                names.iter().any(|n| n == "int_lt_imp"),
                "hook false must allow _imp: {names:?}"
            );
            assert!(!names.iter().any(|n| n == "int_lt_reif"));
        } else {
            assert!(
                names.iter().any(|n| n == "int_lt_reif"),
                "hook true must force _reif: {names:?}"
            );
            assert!(!names.iter().any(|n| n == "int_lt_imp"));
        }
    }
}

#[test]
fn root_context_posts_plain_primitive() {
    let mut env = Env::default();
    let x = int_var(&mut env, "x", 0, 10, 1);
    let y = int_var(&mut env, "y", 0, 10, 2);
    let xid = env.id_expr(x);
    let yid = env.id_expr(y);
    let lt = binop(&mut env, BinOpKind::Lt, xid, yid, Type::var_bool(), 3);
    let b = bool_var(&mut env, "b", Some(lt), 3);
    let bid = env.id_expr(b);
    constraint(&mut env, bid, 4);
    solve_satisfy(&mut env);

    flatten_model(&mut env).unwrap();
    assert!(!env.failed);

    let names = call_names(&env);
    assert!(names.iter().any(|n| n == "int_lt"), "got {names:?}");
    assert!(!names.iter().any(|n| n.starts_with("int_lt_")));
    // b is fixed true.
    let fb = env.decls[b].flat.unwrap();
    let rhs = env.decls[fb].e.expect("b should have a value");
    assert!(matches!(env.exprs[rhs].kind, ExprKind::BoolLit(true)));
}

// ── Scenario: bounds tightening across lin_exp ──────────────────────────────

#[test]
fn linear_definition_tightens_domain_and_defines_var() {
    let mut env = Env::default();
    let x = int_var(&mut env, "x", 0, 10, 1);
    let y = int_var(&mut env, "y", 0, 10, 2);
    let two = env.int_lit(IntVal::Int(2));
    let xid = env.id_expr(x);
    let yid = env.id_expr(y);
    let tx = binop(&mut env, BinOpKind::Mult, two, xid, Type::var_int(), 3);
    let sum = binop(&mut env, BinOpKind::Plus, tx, yid, Type::var_int(), 3);
    let z = int_var_free(&mut env, "z", Some(sum), 3);
    // Keep z alive.
    let zid = env.id_expr(z);
    let thirty = env.int_lit(IntVal::Int(30));
    let le = binop(&mut env, BinOpKind::Le, zid, thirty, Type::var_bool(), 4);
    constraint(&mut env, le, 4);
    solve_satisfy(&mut env);

    flatten_model(&mut env).unwrap();
    assert!(!env.failed);

    let fz = env.decls[z].flat.unwrap();
    // Declared domain is the dot-product interval 0..30.
    let dom = env.decls[fz].ti.domain.expect("z should have a domain");
    let isv = tnc::eval::eval_intset(&mut env, dom).unwrap();
    assert_eq!(*isv, IntSetVal::from_range(IntVal::Int(0), IntVal::Int(30)));

    // The defining equation is int_lin_eq([2, 1, -1], [x, y, z], 0).
    let calls = flat_calls(&env);
    let (_, args) = calls
        .iter()
        .find(|(n, _)| n == "int_lin_eq")
        .expect("expected int_lin_eq");
    let coeffs: Vec<i64> = match &env.exprs[args[0]].kind {
        ExprKind::ArrayLit(al) => al
            .elems
            .iter()
            .map(|&c| match env.exprs[c].kind {
                ExprKind::IntLit(IntVal::Int(v)) => v,
                _ => panic!("non-literal coefficient"),
            })
            .collect(),
        _ => panic!("expected coefficient array"),
    };
    assert_eq!(coeffs, vec![2, 1, -1]);
    let vars: Vec<Option<DeclId>> = match &env.exprs[args[1]].kind {
        ExprKind::ArrayLit(al) => al.elems.iter().map(|&v| decl_of(&env, v)).collect(),
        _ => panic!("expected variable array"),
    };
    assert_eq!(vars[0], env.decls[x].flat);
    assert_eq!(vars[1], env.decls[y].flat);
    assert_eq!(vars[2], Some(fz));
    assert!(matches!(
        env.exprs[args[2]].kind,
        ExprKind::IntLit(IntVal::Int(0))
    ));
    // The equation is annotated as defining z.
    let defining = env
        .flat
        .items
        .iter()
        .filter(|&&i| !env.items[i].removed)
        .any(|&i| match &env.items[i].kind {
            ItemKind::Constraint(c) => env.exprs[*c].ann.exprs.iter().any(|&a| {
                matches!(&env.exprs[a].kind,
                    ExprKind::Call(dc) if &*dc.name == "defines_var"
                        && decl_of(&env, dc.args[0]) == Some(fz))
            }),
            _ => false,
        });
    assert!(defining, "int_lin_eq should carry defines_var(z)");
}

// ── Scenario: comprehension over a var set ──────────────────────────────────

#[test]
fn sum_over_var_set_uses_upper_bound_and_membership() {
    let mut env = Env::default();
    // var set of 1..5: S
    let one = env.int_lit(IntVal::Int(1));
    let five = env.int_lit(IntVal::Int(5));
    let dom = binop(&mut env, BinOpKind::DotDot, one, five, Type::par_set_int(), 1);
    let s_name = env.intern("S");
    let s = env.new_decl(
        TypeInst::with_domain(Type::var_set_int(), dom),
        s_name,
        None,
        loc(1),
    );
    env.decls[s].toplevel = true;
    env.add_source_item(ItemKind::VarDecl(s), loc(1));

    // var int: n = sum(i in S)(i)
    let i_name = env.intern("i");
    let i_decl = env.new_decl(TypeInst::plain(Type::par_int()), i_name, None, loc(2));
    let body = env.id_expr(i_decl);
    let sid = env.id_expr(s);
    let comp = env.new_expr(
        ExprKind::Comprehension(Box::new(Comprehension {
            body,
            gens: vec![Generator {
                decls: vec![i_decl],
                in_expr: Some(sid),
                where_expr: None,
            }],
            set: false,
        })),
        env.types.array_type(Type::var_int(), &[0]),
        loc(2),
    );
    let sum_name = env.intern("sum");
    let sum = env.new_expr(
        ExprKind::Call(Call {
            name: sum_name,
            args: vec![comp],
            decl: None,
        }),
        Type::var_int(),
        loc(2),
    );
    let n = int_var_free(&mut env, "n", Some(sum), 2);
    let nid = env.id_expr(n);
    let ten = env.int_lit(IntVal::Int(10));
    let le = binop(&mut env, BinOpKind::Le, nid, ten, Type::var_bool(), 3);
    constraint(&mut env, le, 3);
    solve_satisfy(&mut env);

    flatten_model(&mut env).unwrap();
    assert!(!env.failed);

    let names = call_names(&env);
    // One membership reification and one bool2int per element of 1..5.
    assert_eq!(
        names.iter().filter(|n| n.as_str() == "set_in_reif").count(),
        5,
        "got {names:?}"
    );
    assert_eq!(
        names.iter().filter(|n| n.as_str() == "bool2int").count(),
        5
    );
    // The sum collapses into one linear equation with coefficients 1..5, -1.
    let calls = flat_calls(&env);
    let (_, args) = calls
        .iter()
        .find(|(n, _)| n == "int_lin_eq")
        .expect("expected int_lin_eq");
    let coeffs: Vec<i64> = match &env.exprs[args[0]].kind {
        ExprKind::ArrayLit(al) => al
            .elems
            .iter()
            .map(|&c| match env.exprs[c].kind {
                ExprKind::IntLit(IntVal::Int(v)) => v,
                _ => panic!("non-literal coefficient"),
            })
            .collect(),
        _ => panic!("expected coefficient array"),
    };
    assert_eq!(coeffs, vec![1, 2, 3, 4, 5, -1]);
    // n's domain follows the dot product: 0..15.
    let fn_ = env.decls[n].flat.unwrap();
    let dom = env.decls[fn_].ti.domain.unwrap();
    let isv = tnc::eval::eval_intset(&mut env, dom).unwrap();
    assert_eq!(*isv, IntSetVal::from_range(IntVal::Int(0), IntVal::Int(15)));
}

// ── Scenario: record merge ──────────────────────────────────────────────────

#[test]
fn record_merge_sorts_fields_and_compares_equal() {
    let mut env = Env::default();
    let r1_ty_id = env.types.register_record_type(vec![
        ("a".into(), Type::par_int()),
        ("b".into(), Type::par_bool()),
    ]);
    let r2_ty_id = env.types.register_record_type(vec![
        ("a2".into(), Type::par_int()),
        ("s".into(), Type::par_string()),
    ]);
    let r1_ty = Type::new(tnc::ty::BaseType::Record, tnc::ty::Inst::Par).with_type_id(r1_ty_id);
    let r2_ty = Type::new(tnc::ty::BaseType::Record, tnc::ty::Inst::Par).with_type_id(r2_ty_id);

    let one = env.int_lit(IntVal::Int(1));
    let t = env.bool_lit(true);
    let xs = env.str_lit("x");
    let r1 = env.new_expr(
        ExprKind::ArrayLit(ArrayLit::new_1d(vec![one, t])),
        r1_ty,
        loc(1),
    );
    let r2 = env.new_expr(
        ExprKind::ArrayLit(ArrayLit::new_1d(vec![one, xs])),
        r2_ty,
        loc(2),
    );
    let merged = binop(&mut env, BinOpKind::PlusPlus, r1, r2, Type::bot(), 3);

    let lit = tnc::eval::eval_par(&mut env, merged).unwrap();
    let merged_ty = env.ty(lit);
    assert_eq!(merged_ty.bt, tnc::ty::BaseType::Record);
    let fields = env.types.record_fields(merged_ty.type_id);
    let names: Vec<&str> = fields.iter().map(|(n, _)| &**n).collect();
    assert_eq!(names, vec!["a", "a2", "b", "s"]);

    // Equality against the expected literal is elementwise.
    let expected = env.new_expr(
        ExprKind::ArrayLit(ArrayLit::new_1d(vec![one, one, t, xs])),
        merged_ty,
        loc(4),
    );
    let eq = binop(&mut env, BinOpKind::Eq, lit, expected, Type::par_bool(), 4);
    assert!(tnc::eval::eval_bool(&mut env, eq).unwrap());
}

// ── Scenario: CSE ───────────────────────────────────────────────────────────

#[test]
fn structurally_equal_calls_share_one_flat_result() {
    let mut env = Env::default();
    let x = int_var(&mut env, "x", 0, 10, 1);
    let y = int_var(&mut env, "y", 0, 10, 2);
    let xid1 = env.id_expr(x);
    let yid1 = env.id_expr(y);
    let lt1 = binop(&mut env, BinOpKind::Lt, xid1, yid1, Type::var_bool(), 3);
    let a = bool_var(&mut env, "a", Some(lt1), 3);
    let xid2 = env.id_expr(x);
    let yid2 = env.id_expr(y);
    let lt2 = binop(&mut env, BinOpKind::Lt, xid2, yid2, Type::var_bool(), 4);
    let b = bool_var(&mut env, "b", Some(lt2), 4);

    let aid = env.id_expr(a);
    let bid = env.id_expr(b);
    let both = binop(&mut env, BinOpKind::And, aid, bid, Type::var_bool(), 5);
    let nb = env.new_expr(
        ExprKind::UnOp {
            op: tnc::ast::UnOpKind::Not,
            expr: both,
        },
        Type::var_bool(),
        loc(5),
    );
    // Use both in mixed position so they reify rather than root-decompose.
    let cid = {
        let c = bool_var(&mut env, "c", None, 6);
        env.id_expr(c)
    };
    let or = binop(&mut env, BinOpKind::Or, nb, cid, Type::var_bool(), 6);
    constraint(&mut env, or, 6);
    solve_satisfy(&mut env);

    flatten_model(&mut env).unwrap();
    assert!(!env.failed);

    // The second x<y reuses the first reification: exactly one int_lt_reif.
    let names = call_names(&env);
    let reif_count = names
        .iter()
        .filter(|n| n.as_str() == "int_lt_reif")
        .count();
    assert_eq!(reif_count, 1, "got {names:?}");
}

// ── Printer round stability ─────────────────────────────────────────────────

#[test]
fn flat_model_prints_canonically() {
    let mut env = Env::default();
    let x = int_var(&mut env, "x", 0, 10, 1);
    let y = int_var(&mut env, "y", 0, 10, 2);
    let xid = env.id_expr(x);
    let yid = env.id_expr(y);
    let lt = binop(&mut env, BinOpKind::Lt, xid, yid, Type::var_bool(), 3);
    constraint(&mut env, lt, 3);
    solve_satisfy(&mut env);

    flatten_model(&mut env).unwrap();

    let compact = tnc::print::print_model(&env, &env.flat, 0);
    assert!(compact.contains("var 0..10: x;"));
    assert!(compact.contains("constraint int_lt(x, y);"));
    assert!(compact.contains("solve satisfy;"));
    // Items are sorted: declarations before constraints before solve.
    let decl_pos = compact.find("var 0..10: x;").unwrap();
    let con_pos = compact.find("constraint").unwrap();
    let solve_pos = compact.find("solve").unwrap();
    assert!(decl_pos < con_pos && con_pos < solve_pos);

    let pretty = tnc::print::print_model(&env, &env.flat, 80);
    for line in pretty.lines() {
        assert!(line.len() <= 80);
    }
}
