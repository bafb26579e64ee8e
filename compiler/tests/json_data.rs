// JSON data loading scenarios: type-directed coercion into assignment items.

use std::rc::Rc;

use tnc::ast::{ExprKind, Ident, ItemKind, Location, TypeInst};
use tnc::env::Env;
use tnc::id::{DeclId, ExprId};
use tnc::json::load_json_data;
use tnc::ty::Type;
use tnc::val::{IntSetVal, IntVal};

fn declare(env: &mut Env, name: &str, ti: TypeInst) -> DeclId {
    let nm = env.intern(name);
    let d = env.new_decl(ti, nm, None, Location::unknown());
    env.decls[d].toplevel = true;
    env.add_source_item(ItemKind::VarDecl(d), Location::unknown());
    d
}

fn assigned_value(env: &Env, items: &[tnc::id::ItemId], name: &str) -> ExprId {
    for &i in items {
        if let ItemKind::Assign { name: n, e, .. } = &env.items[i].kind {
            if &**n == name {
                return *e;
            }
        }
    }
    panic!("no assignment for {name}");
}

#[test]
fn enum_keyed_array_orders_by_ordinal() {
    let mut env = Env::default();
    let colors = env
        .types
        .register_enum("Colors".into(), vec!["R".into(), "G".into(), "B".into()]);
    let cost_ty = env.types.array_type(Type::par_int(), &[colors]);
    let mut ti = TypeInst::plain(cost_ty);
    // The declared range is the enum itself.
    let range = env.new_expr(
        ExprKind::Id(Ident {
            name: "Colors".into(),
            decl: None,
        }),
        Type::par_set_int().with_type_id(colors),
        Location::unknown(),
    );
    ti.ranges = vec![range];
    declare(&mut env, "cost", ti);

    // Keys deliberately out of declaration order.
    let items = load_json_data(
        &mut env,
        r#"{ "cost": { "G": 20, "B": 30, "R": 10 } }"#,
        "data.json",
    )
    .unwrap();
    let e = assigned_value(&env, &items, "cost");

    // The value is an array1d call whose index argument is an identifier,
    // not a string.
    let (name, args) = match env.kind(e) {
        ExprKind::Call(c) => (c.name, c.args),
        other => panic!("expected call, got {other:?}"),
    };
    assert_eq!(&*name, "array1d");
    assert!(matches!(env.kind(args[0]), ExprKind::Id(id) if &*id.name == "Colors"));

    // Evaluation produces [10, 20, 30] in ordinal order.
    let lit = tnc::eval::eval_par(&mut env, e).unwrap();
    let vals: Vec<i64> = match env.kind(lit) {
        ExprKind::ArrayLit(al) => al
            .elems
            .iter()
            .map(|&el| tnc::eval::eval_int(&mut env, el).unwrap().to_i64().unwrap())
            .collect(),
        other => panic!("expected array literal, got {other:?}"),
    };
    assert_eq!(vals, vec![10, 20, 30]);
}

#[test]
fn enum_member_string_becomes_identifier() {
    let mut env = Env::default();
    let colors = env
        .types
        .register_enum("Colors".into(), vec!["R".into(), "G".into(), "B".into()]);
    let ty = Type::par_int().with_type_id(colors);
    declare(&mut env, "pick", TypeInst::plain(ty));

    let items = load_json_data(&mut env, r#"{ "pick": "G" }"#, "data.json").unwrap();
    let e = assigned_value(&env, &items, "pick");
    assert!(matches!(env.kind(e), ExprKind::Id(id) if &*id.name == "G"));
    // The identifier resolves to its ordinal.
    assert_eq!(tnc::eval::eval_int(&mut env, e).unwrap(), IntVal::Int(2));
}

#[test]
fn enum_object_forms() {
    let mut env = Env::default();
    let colors = env
        .types
        .register_enum("Colors".into(), vec!["R".into(), "G".into(), "B".into()]);
    let ty = Type::par_int().with_type_id(colors);
    declare(&mut env, "a", TypeInst::plain(ty));
    declare(&mut env, "b", TypeInst::plain(ty));

    let items = load_json_data(
        &mut env,
        r#"{ "a": { "e": "B" }, "b": { "i": 1 } }"#,
        "data.json",
    )
    .unwrap();
    let a = assigned_value(&env, &items, "a");
    assert_eq!(tnc::eval::eval_int(&mut env, a).unwrap(), IntVal::Int(3));

    // {"i": 1} coerces through to_enum(Colors, 1).
    let b = assigned_value(&env, &items, "b");
    match env.kind(b) {
        ExprKind::Call(c) => assert_eq!(&*c.name, "to_enum"),
        other => panic!("expected to_enum call, got {other:?}"),
    }
    assert_eq!(tnc::eval::eval_int(&mut env, b).unwrap(), IntVal::Int(1));
}

#[test]
fn tuple_and_record_positions() {
    let mut env = Env::default();
    let tup = env
        .types
        .register_tuple_type(vec![Type::par_int(), Type::par_bool()]);
    let tup_ty = Type::new(tnc::ty::BaseType::Tuple, tnc::ty::Inst::Par).with_type_id(tup);
    declare(&mut env, "t", TypeInst::plain(tup_ty));

    let rec = env.types.register_record_type(vec![
        ("width".into(), Type::par_int()),
        ("name".into(), Type::par_string()),
    ]);
    let rec_ty = Type::new(tnc::ty::BaseType::Record, tnc::ty::Inst::Par).with_type_id(rec);
    declare(&mut env, "r", TypeInst::plain(rec_ty));

    let items = load_json_data(
        &mut env,
        r#"{ "t": [7, true], "r": { "width": 3, "name": "beam" } }"#,
        "data.json",
    )
    .unwrap();

    let t = assigned_value(&env, &items, "t");
    match env.kind(t) {
        ExprKind::ArrayLit(al) => {
            assert_eq!(al.elems.len(), 2);
            assert!(matches!(
                env.kind(al.elems[0]),
                ExprKind::IntLit(IntVal::Int(7))
            ));
            assert!(matches!(env.kind(al.elems[1]), ExprKind::BoolLit(true)));
        }
        other => panic!("expected tuple literal, got {other:?}"),
    }

    // Record fields arrive keyed by name and store in sorted order
    // (name before width).
    let r = assigned_value(&env, &items, "r");
    match env.kind(r) {
        ExprKind::ArrayLit(al) => {
            assert!(matches!(env.kind(al.elems[0]), ExprKind::StringLit(s) if &*s == "beam"));
            assert!(matches!(
                env.kind(al.elems[1]),
                ExprKind::IntLit(IntVal::Int(3))
            ));
        }
        other => panic!("expected record literal, got {other:?}"),
    }
}

#[test]
fn record_requires_object() {
    let mut env = Env::default();
    let rec = env
        .types
        .register_record_type(vec![("a".into(), Type::par_int())]);
    let rec_ty = Type::new(tnc::ty::BaseType::Record, tnc::ty::Inst::Par).with_type_id(rec);
    declare(&mut env, "r", TypeInst::plain(rec_ty));
    let err = load_json_data(&mut env, r#"{ "r": [1] }"#, "data.json").unwrap_err();
    assert!(matches!(err, tnc::diag::CompileError::Json { .. }));
}

#[test]
fn two_dimensional_array_coerces_through_array2d() {
    let mut env = Env::default();
    let ty = env.types.array_type(Type::par_int(), &[0, 0]);
    declare(&mut env, "m", TypeInst::plain(ty));

    let items = load_json_data(&mut env, r#"{ "m": [[1, 2, 3], [4, 5, 6]] }"#, "data.json").unwrap();
    let e = assigned_value(&env, &items, "m");
    match env.kind(e) {
        ExprKind::Call(c) => assert_eq!(&*c.name, "array2d"),
        other => panic!("expected array2d call, got {other:?}"),
    }
    let lit = tnc::eval::eval_par(&mut env, e).unwrap();
    match env.kind(lit) {
        ExprKind::ArrayLit(al) => {
            assert_eq!(al.dims.to_vec(), vec![(1, 2), (1, 3)]);
            assert_eq!(al.elems.len(), 6);
        }
        other => panic!("expected reshaped literal, got {other:?}"),
    }
}

#[test]
fn ragged_arrays_are_rejected() {
    let mut env = Env::default();
    let ty = env.types.array_type(Type::par_int(), &[0, 0]);
    declare(&mut env, "m", TypeInst::plain(ty));
    let err = load_json_data(&mut env, r#"{ "m": [[1, 2], [3]] }"#, "data.json").unwrap_err();
    assert!(matches!(err, tnc::diag::CompileError::Json { .. }));
}

#[test]
fn set_values_and_floats() {
    let mut env = Env::default();
    declare(&mut env, "s", TypeInst::plain(Type::par_set_int()));
    declare(&mut env, "xs", TypeInst::plain(Type::par_set_int()));
    declare(&mut env, "f", TypeInst::plain(Type::par_float()));

    let items = load_json_data(
        &mut env,
        r#"{ "s": { "set": [[1, 3], 7] }, "xs": [2, 4, 6], "f": 2.5 }"#,
        "data.json",
    )
    .unwrap();

    let s = assigned_value(&env, &items, "s");
    let isv = tnc::eval::eval_intset(&mut env, s).unwrap();
    assert_eq!(
        *isv,
        IntSetVal::from_ranges(vec![
            (IntVal::Int(1), IntVal::Int(3)),
            (IntVal::Int(7), IntVal::Int(7)),
        ])
    );

    let xs = assigned_value(&env, &items, "xs");
    let isv = tnc::eval::eval_intset(&mut env, xs).unwrap();
    assert_eq!(isv.card().unwrap(), IntVal::Int(3));

    let f = assigned_value(&env, &items, "f");
    assert_eq!(
        tnc::eval::eval_float(&mut env, f).unwrap(),
        tnc::val::FloatVal::new(2.5)
    );
}

#[test]
fn null_becomes_absent() {
    let mut env = Env::default();
    declare(
        &mut env,
        "o",
        TypeInst::plain(Type::par_int().with_opt(true)),
    );
    let items = load_json_data(&mut env, r#"{ "o": null }"#, "data.json").unwrap();
    let e = assigned_value(&env, &items, "o");
    assert!(matches!(env.kind(e), ExprKind::Absent));
}

#[test]
fn elided_range_is_computed_from_size() {
    let mut env = Env::default();
    // array[3..5] of int with the declared range present.
    let lo = env.int_lit(IntVal::Int(3));
    let hi = env.int_lit(IntVal::Int(5));
    let range = env.new_expr(
        ExprKind::BinOp {
            op: tnc::ast::BinOpKind::DotDot,
            lhs: lo,
            rhs: hi,
        },
        Type::par_set_int(),
        Location::unknown(),
    );
    let ty = env.types.array_type(Type::par_int(), &[0]);
    let mut ti = TypeInst::plain(ty);
    ti.ranges = vec![range];
    declare(&mut env, "a", ti);
    // And one declaration with no range at all.
    declare(&mut env, "b", TypeInst::plain(ty));

    let items = load_json_data(
        &mut env,
        r#"{ "a": [10, 11, 12], "b": [1, 2] }"#,
        "data.json",
    )
    .unwrap();

    let a = assigned_value(&env, &items, "a");
    let lit = tnc::eval::eval_par(&mut env, a).unwrap();
    match env.kind(lit) {
        ExprKind::ArrayLit(al) => assert_eq!(al.dims.to_vec(), vec![(3, 5)]),
        other => panic!("expected coerced literal, got {other:?}"),
    }

    let b = assigned_value(&env, &items, "b");
    let lit = tnc::eval::eval_par(&mut env, b).unwrap();
    match env.kind(lit) {
        ExprKind::ArrayLit(al) => assert_eq!(al.dims.to_vec(), vec![(1, 2)]),
        other => panic!("expected literal, got {other:?}"),
    }
}

#[test]
fn token_set_agrees_with_standard_json() {
    // Everything the loader accepts lexically is RFC 8259 JSON; cross-check
    // structure acceptance against serde_json on a mixed document.
    let doc = r#"{ "ghost": [1, -2.5e3, true, false, null, "s\t\"q\""] }"#;
    serde_json::from_str::<serde_json::Value>(doc).unwrap();
    let mut env = Env::default();
    // The key is unknown, so no assignment results, but lexing and
    // structural parsing must both succeed.
    let items = load_json_data(&mut env, doc, "data.json").unwrap();
    assert!(items.is_empty());
    assert_eq!(env.warnings().len(), 1);
}

#[test]
fn rc_types_shared_across_assignments() {
    // Two mentions of the same enum share interned names.
    let mut env = Env::default();
    let colors = env
        .types
        .register_enum("Colors".into(), vec!["R".into(), "G".into()]);
    let ty = Type::par_int().with_type_id(colors);
    declare(&mut env, "p", TypeInst::plain(ty));
    declare(&mut env, "q", TypeInst::plain(ty));
    let items = load_json_data(&mut env, r#"{ "p": "R", "q": "R" }"#, "data.json").unwrap();
    let p = assigned_value(&env, &items, "p");
    let q = assigned_value(&env, &items, "q");
    let (np, nq) = match (env.kind(p), env.kind(q)) {
        (ExprKind::Id(a), ExprKind::Id(b)) => (a.name, b.name),
        _ => panic!("expected identifiers"),
    };
    assert!(Rc::ptr_eq(&np, &nq));
}
