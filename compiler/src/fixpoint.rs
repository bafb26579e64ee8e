// fixpoint.rs — Post-pass rewriting loop and final flat-model cleanup
//
// After the initial traversal the flat model is iterated to a fixpoint:
// unreferenced introduced variables disappear (together with their defining
// constraints), multi-range integer domains are extracted when the options
// demand range-only domains, lin_exp definitions become int_lin_eq /
// float_lin_eq constraints with the defined variable at coefficient -1, and
// leftover forall/exists/clause definitions become their clause forms.
//
// finalize() then canonicalizes for downstream consumption: internal context
// annotations are stripped, defines_var cycles are broken by DFS coloring,
// par variables lose their domains, arrays become 1-based and 1-dimensional,
// and items are stable-sorted into function / variable / constraint / solve
// order.

use std::rc::Rc;

use log::debug;
use rustc_hash::FxHashMap;

use crate::ast::{ArrayLit, Call, ExprKind, Ident, ItemKind, TypeInst};
use crate::diag::Result;
use crate::env::Env;
use crate::eval::eval_intset;
use crate::flatten::{ann_to_ctx, make_defined, post_constraint, BCtx};
use crate::id::{DeclId, ExprId, ItemId};
use crate::ty::Type;
use crate::val::{IntSetVal, IntVal};

// ── Rewriting loop ──────────────────────────────────────────────────────────

/// Iterate the flat model until no rule applies.
pub fn optimize(env: &mut Env) -> Result<()> {
    let mut round = 0usize;
    loop {
        env.check_cancel()?;
        round += 1;
        let mut changed = false;
        changed |= remove_unused(env);
        changed |= extract_multirange_domains(env)?;
        changed |= rewrite_linear_definitions(env)?;
        changed |= rewrite_bool_definitions(env)?;
        if !changed {
            debug!("fixpoint reached after {round} rounds");
            return Ok(());
        }
    }
}

/// Drop introduced declarations nothing refers to any more. Declarations
/// with a registered reverse mapper stay: the solver round-trip needs them.
fn remove_unused(env: &mut Env) -> bool {
    let mut changed = false;
    let items = env.flat.items.clone();
    for item in items {
        if env.items[item].removed {
            continue;
        }
        let d = match env.items[item].kind {
            ItemKind::VarDecl(d) => d,
            _ => continue,
        };
        let data = &env.decls[d];
        if !data.introduced
            || data.ann.contains("output_var")
            || env.has_reverse_mapper(d)
            || env.occurrences(d) > 0
        {
            continue;
        }
        env.mark_item_removed(item);
        if let Some(def_item) = env.definition_of(d) {
            env.mark_item_removed(def_item);
        }
        changed = true;
    }
    changed
}

/// Under range-only domains, a multi-range integer domain becomes an
/// explicit `mzn_set_in_internal` constraint plus a covering range.
fn extract_multirange_domains(env: &mut Env) -> Result<bool> {
    if !env.opts.only_range_domains {
        return Ok(false);
    }
    let mut changed = false;
    let items = env.flat.items.clone();
    for item in items {
        if env.items[item].removed {
            continue;
        }
        let d = match env.items[item].kind {
            ItemKind::VarDecl(d) => d,
            _ => continue,
        };
        let ty = env.decls[d].ty();
        if !ty.is_int() || !ty.is_var() {
            continue;
        }
        let dom = match env.decls[d].ti.domain {
            Some(dom) => dom,
            None => continue,
        };
        let isv = match eval_intset(env, dom) {
            Ok(s) => s,
            Err(_) => continue,
        };
        if isv.num_ranges() <= 1 {
            continue;
        }
        let loc = env.decls[d].loc.clone();
        let covering = IntSetVal::from_range(isv.min().unwrap(), isv.max().unwrap());
        let cover_lit = env.intset_lit(Rc::new(covering), loc.clone());
        env.decls[d].ti.domain = Some(cover_lit);
        let id = env.id_expr(d);
        let full_lit = env.intset_lit(isv, loc.clone());
        let name = env.consts.ids.mzn_set_in_internal.clone();
        let call = env.call_expr(name, vec![id, full_lit], Type::var_bool(), loc);
        post_constraint(env, call);
        changed = true;
    }
    Ok(changed)
}

/// `v = lin_exp(c, x, k)` becomes `int_lin_eq(c ++ [-1], x ++ [v], -k)`
/// (float_lin_eq for floats), annotated `defines_var(v)`.
fn rewrite_linear_definitions(env: &mut Env) -> Result<bool> {
    let mut changed = false;
    let items = env.flat.items.clone();
    for item in items {
        if env.items[item].removed {
            continue;
        }
        let d = match env.items[item].kind {
            ItemKind::VarDecl(d) => d,
            _ => continue,
        };
        let rhs = match env.decls[d].e {
            Some(rhs) => rhs,
            None => continue,
        };
        let (coeff_arr, vars_arr, k) = match env.kind(rhs) {
            ExprKind::Call(Call { name, args, .. })
                if name == env.consts.ids.lin_exp && args.len() == 3 =>
            {
                (args[0], args[1], args[2])
            }
            _ => continue,
        };
        let is_float = env.decls[d].ty().is_float();
        let loc = env.decls[d].loc.clone();

        let mut coeffs = match env.kind(coeff_arr) {
            ExprKind::ArrayLit(al) => al.elems,
            _ => continue,
        };
        let mut vars = match env.kind(vars_arr) {
            ExprKind::ArrayLit(al) => al.elems,
            _ => continue,
        };
        let (neg_one, rhs_const, name) = if is_float {
            let k_val = crate::eval::eval_float(env, k)?;
            let neg = env.float_lit(-k_val);
            let m1 = env.float_lit(crate::val::FloatVal::new(-1.0));
            (m1, neg, env.consts.ids.float_lin_eq.clone())
        } else {
            let k_val = crate::eval::eval_int(env, k)?;
            let neg = env.int_lit(k_val.neg());
            let m1 = env.int_lit(IntVal::Int(-1));
            (m1, neg, env.consts.ids.int_lin_eq.clone())
        };
        coeffs.push(neg_one);
        let did = env.id_expr(d);
        vars.push(did);

        let elem = if is_float {
            Type::par_float()
        } else {
            Type::par_int()
        };
        let coeff_ty = env.types.array_type(elem, &[0]);
        let new_coeffs = env.new_expr(
            ExprKind::ArrayLit(ArrayLit::new_1d(coeffs)),
            coeff_ty,
            loc.clone(),
        );
        let var_elem = elem.with_inst(crate::ty::Inst::Var);
        let vars_ty = env.types.array_type(var_elem, &[0]);
        let new_vars = env.new_expr(
            ExprKind::ArrayLit(ArrayLit::new_1d(vars)),
            vars_ty,
            loc.clone(),
        );
        let call = env.call_expr(name, vec![new_coeffs, new_vars, rhs_const], Type::var_bool(), loc);
        let new_item = post_constraint(env, call);
        make_defined(env, d, call, new_item);

        env.decls[d].e = None;
        env.adjust_expr_occurrences(rhs, -1);
        changed = true;
    }
    Ok(changed)
}

/// Remaining forall / exists / clause definitions on boolean variables
/// rewrite into array_bool_and / bool_clause / bool_clause_reif, honoring
/// the reification choice already recorded on the variable.
fn rewrite_bool_definitions(env: &mut Env) -> Result<bool> {
    let mut changed = false;
    let items = env.flat.items.clone();
    for item in items {
        if env.items[item].removed {
            continue;
        }
        let d = match env.items[item].kind {
            ItemKind::VarDecl(d) => d,
            _ => continue,
        };
        if !env.decls[d].ty().is_bool() {
            continue;
        }
        let rhs = match env.decls[d].e {
            Some(rhs) => rhs,
            None => continue,
        };
        let (name, args) = match env.kind(rhs) {
            ExprKind::Call(Call { name, args, .. }) => (name, args),
            _ => continue,
        };
        let ids = env.consts.ids.clone();
        let is_root = ann_to_ctx(env, d).0 == BCtx::Root;
        let loc = env.decls[d].loc.clone();
        let empty_ty = env.types.array_type(Type::var_bool(), &[0]);

        let rewritten: Option<(Rc<str>, Vec<ExprId>, bool)> = if name == ids.forall {
            if is_root {
                // Every element is simply required to hold.
                let v = env.resolve_id(args[0]);
                if let ExprKind::ArrayLit(al) = env.kind(v) {
                    for el in al.elems {
                        post_constraint(env, el);
                    }
                    env.decls[d].e = Some(env.consts.lit_true);
                    env.adjust_expr_occurrences(rhs, -1);
                    changed = true;
                }
                continue;
            } else {
                let did = env.id_expr(d);
                Some((ids.array_bool_and.clone(), vec![args[0], did], true))
            }
        } else if name == ids.exists {
            if is_root {
                let empty = env.new_expr(
                    ExprKind::ArrayLit(ArrayLit::new_1d(vec![])),
                    empty_ty,
                    loc.clone(),
                );
                Some((ids.bool_clause.clone(), vec![args[0], empty], false))
            } else {
                let did = env.id_expr(d);
                let empty = env.new_expr(
                    ExprKind::ArrayLit(ArrayLit::new_1d(vec![])),
                    empty_ty,
                    loc.clone(),
                );
                Some((ids.bool_clause_reif.clone(), vec![args[0], empty, did], true))
            }
        } else if name == ids.clause && args.len() == 2 {
            if is_root {
                Some((ids.bool_clause.clone(), vec![args[0], args[1]], false))
            } else {
                let did = env.id_expr(d);
                Some((ids.bool_clause_reif.clone(), vec![args[0], args[1], did], true))
            }
        } else {
            continue;
        };

        let Some((new_name, new_args, defines)) = rewritten else {
            continue;
        };
        let call = env.call_expr(new_name, new_args, Type::var_bool(), loc);
        let new_item = post_constraint(env, call);
        if defines {
            make_defined(env, d, call, new_item);
        }
        env.decls[d].e = None;
        env.adjust_expr_occurrences(rhs, -1);
        changed = true;
    }
    Ok(changed)
}

// ── Final cleanup ───────────────────────────────────────────────────────────

/// Canonicalize the flat model for downstream consumption.
pub fn finalize(env: &mut Env) -> Result<()> {
    break_defines_var_cycles(env);
    cleanup_declarations(env);
    strip_context_annotations(env);
    sort_items(env);
    env.flat.compact(&env.items);
    Ok(())
}

fn strip_context_annotations(env: &mut Env) {
    let names = [
        env.consts.ids.ctx_root.clone(),
        env.consts.ids.ctx_pos.clone(),
        env.consts.ids.ctx_neg.clone(),
        env.consts.ids.ctx_mix.clone(),
    ];
    let items = env.flat.items.clone();
    for item in items {
        if let ItemKind::VarDecl(d) = env.items[item].kind {
            for n in &names {
                env.decls[d].ann.remove(n);
            }
        }
    }
}

/// defines_var chains must be acyclic: a cycle would make two variables
/// define each other. DFS coloring over the definition graph drops the
/// annotation that closes each cycle.
fn break_defines_var_cycles(env: &mut Env) {
    // Edges: defined variable -> variables its defining call mentions.
    let mut defs: FxHashMap<DeclId, (ItemId, ExprId, Vec<DeclId>)> = FxHashMap::default();
    let items = env.flat.items.clone();
    for item in items {
        if env.items[item].removed {
            continue;
        }
        let call = match env.items[item].kind {
            ItemKind::Constraint(c) => c,
            _ => continue,
        };
        let Some(defined) = defined_var_of(env, call) else {
            continue;
        };
        let mut deps = Vec::new();
        collect_decl_refs(env, call, &mut deps);
        deps.retain(|&x| x != defined);
        defs.insert(defined, (item, call, deps));
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Grey,
        Black,
    }
    let mut color: FxHashMap<DeclId, Color> = FxHashMap::default();
    let roots: Vec<DeclId> = defs.keys().copied().collect();
    for root in roots {
        if *color.get(&root).unwrap_or(&Color::White) != Color::White {
            continue;
        }
        // Iterative DFS; frames are (node, next dependency index).
        let mut stack: Vec<(DeclId, usize)> = vec![(root, 0)];
        color.insert(root, Color::Grey);
        while let Some(&(node, next)) = stack.last() {
            let deps = defs.get(&node).map(|(_, _, d)| d.clone()).unwrap_or_default();
            if next >= deps.len() {
                color.insert(node, Color::Black);
                stack.pop();
                continue;
            }
            stack.last_mut().unwrap().1 += 1;
            let dep = deps[next];
            match *color.get(&dep).unwrap_or(&Color::White) {
                Color::White => {
                    if defs.contains_key(&dep) {
                        color.insert(dep, Color::Grey);
                        stack.push((dep, 0));
                    }
                }
                Color::Grey => {
                    // Back edge: drop the annotation on the call defining
                    // `node`, breaking the cycle.
                    if let Some(call) = defs.get(&node).map(|t| t.1) {
                        drop_defines_var(env, node, call);
                    }
                }
                Color::Black => {}
            }
        }
    }
}

fn defined_var_of(env: &Env, call: ExprId) -> Option<DeclId> {
    let dv = &env.consts.ids.defines_var;
    for &a in &env.exprs[call].ann.exprs {
        if let ExprKind::Call(c) = &env.exprs[a].kind {
            if &c.name == dv {
                if let Some(&arg) = c.args.first() {
                    if let ExprKind::Id(Ident { decl, .. }) = &env.exprs[arg].kind {
                        return *decl;
                    }
                }
            }
        }
    }
    None
}

fn collect_decl_refs(env: &Env, e: ExprId, out: &mut Vec<DeclId>) {
    let mut stack = vec![e];
    while let Some(x) = stack.pop() {
        if let ExprKind::Id(Ident { decl: Some(d), .. }) = &env.exprs[x].kind {
            if !out.contains(d) {
                out.push(*d);
            }
        }
        let mut children = Vec::new();
        env.exprs[x].kind.children(&mut children);
        stack.extend(children);
    }
}

fn drop_defines_var(env: &mut Env, d: DeclId, call: ExprId) {
    let dv = env.consts.ids.defines_var.clone();
    let keep: Vec<ExprId> = env.exprs[call]
        .ann
        .exprs
        .iter()
        .copied()
        .filter(|&a| !matches!(&env.exprs[a].kind, ExprKind::Call(c) if c.name == dv))
        .collect();
    env.exprs[call].ann.exprs = keep;
    let idv = env.consts.ids.is_defined_var.clone();
    env.decls[d].ann.remove(&idv);
    // The dropped annotation's compensation must be undone.
    let did = env.id_expr(d);
    env.adjust_expr_occurrences(did, 1);
}

/// Per-declaration canonicalization: par variables lose their domains,
/// fixed-true booleans turn their defining call into a plain constraint,
/// and array values become 1-based 1-D literals.
fn cleanup_declarations(env: &mut Env) {
    let items = env.flat.items.clone();
    for item in items {
        if env.items[item].removed {
            continue;
        }
        let d = match env.items[item].kind {
            ItemKind::VarDecl(d) => d,
            _ => continue,
        };
        let ty = env.decls[d].ty();
        if ty.is_par() {
            env.decls[d].ti.domain = None;
            continue;
        }
        // A bool variable already fixed true keeps no defining call: the
        // call itself becomes a constraint.
        if ty.is_bool() {
            if let Some(rhs) = env.decls[d].e {
                let fixed_true = ann_to_ctx(env, d).0 == BCtx::Root;
                if fixed_true && matches!(env.exprs[rhs].kind, ExprKind::Call(_)) {
                    post_constraint(env, rhs);
                    env.decls[d].e = Some(env.consts.lit_true);
                }
            }
        }
        if ty.dim > 0 {
            if let Some(rhs) = env.decls[d].e {
                if let ExprKind::ArrayLit(al) = env.kind(rhs) {
                    let n = al.elems.len() as i64;
                    if al.dims.len() != 1 || al.dims[0] != (1, n) {
                        let mut flat = ArrayLit::new_1d(al.elems);
                        flat.flat = true;
                        let node_ty = env.ty(rhs);
                        let loc = env.loc(rhs);
                        let new_rhs = env.new_expr(ExprKind::ArrayLit(flat), node_ty, loc);
                        env.decls[d].e = Some(new_rhs);
                    }
                    let loc = env.decls[d].loc.clone();
                    let range = env.intset_lit(
                        Rc::new(IntSetVal::from_range(IntVal::ONE, IntVal::Int(n))),
                        loc,
                    );
                    env.decls[d].ti.ranges = vec![range];
                    env.decls[d].ti.ty.dim = 1;
                }
            }
        }
    }
}

/// Stable item order: functions, then variable declarations, then
/// constraints, then the solve item (output trails).
fn sort_items(env: &mut Env) {
    let rank = |kind: &ItemKind| -> u8 {
        match kind {
            ItemKind::Include(_) | ItemKind::Function(_) => 0,
            ItemKind::VarDecl(_) | ItemKind::Assign { .. } => 1,
            ItemKind::Constraint(_) => 2,
            ItemKind::Solve { .. } => 3,
            ItemKind::Output(_) => 4,
        }
    };
    let mut items = std::mem::take(&mut env.flat.items);
    items.sort_by_key(|&i| rank(&env.items[i].kind));
    env.flat.items = items;
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Location;

    #[test]
    fn unused_introduced_variable_is_removed() {
        let mut env = Env::default();
        let d = env.new_flat_decl(TypeInst::plain(Type::var_int()), Location::unknown());
        assert!(remove_unused(&mut env));
        assert!(env.decls[d].removed);
    }

    #[test]
    fn output_variables_survive() {
        let mut env = Env::default();
        let d = env.new_flat_decl(TypeInst::plain(Type::var_int()), Location::unknown());
        env.decls[d].ann.add("output_var".into());
        assert!(!remove_unused(&mut env));
        assert!(!env.decls[d].removed);
    }

    #[test]
    fn multirange_domains_extract_under_option() {
        let mut opts = crate::opts::FlatteningOptions::default();
        opts.only_range_domains = true;
        let mut env = Env::new(opts);
        let d = env.new_flat_decl(TypeInst::plain(Type::var_int()), Location::unknown());
        let dom = env.intset_lit(
            Rc::new(IntSetVal::from_ranges(vec![
                (IntVal::Int(1), IntVal::Int(3)),
                (IntVal::Int(7), IntVal::Int(9)),
            ])),
            Location::unknown(),
        );
        env.decls[d].ti.domain = Some(dom);
        // Keep the variable alive through an occurrence.
        let id = env.id_expr(d);
        let zero = env.int_lit(IntVal::ZERO);
        let c = env.call_expr("int_le".into(), vec![zero, id], Type::var_bool(), Location::unknown());
        env.add_flat_item(ItemKind::Constraint(c), Location::unknown());

        assert!(extract_multirange_domains(&mut env).unwrap());
        let new_dom = env.decls[d].ti.domain.unwrap();
        let s = eval_intset(&mut env, new_dom).unwrap();
        assert_eq!(*s, IntSetVal::from_range(IntVal::Int(1), IntVal::Int(9)));
        // The full domain is now an explicit constraint.
        let has_set_in = env.flat.items.iter().any(|&i| {
            matches!(&env.items[i].kind, ItemKind::Constraint(e)
                if matches!(&env.exprs[*e].kind, ExprKind::Call(c) if &*c.name == "mzn_set_in_internal"))
        });
        assert!(has_set_in);
    }

    #[test]
    fn item_sort_order() {
        let mut env = Env::default();
        let t = env.consts.lit_true;
        env.add_flat_item(ItemKind::Constraint(t), Location::unknown());
        let _d = env.new_flat_decl(TypeInst::plain(Type::var_int()), Location::unknown());
        env.add_flat_item(
            ItemKind::Solve {
                goal: crate::ast::SolveGoal::Satisfy,
                ann: crate::ast::Annotations::new(),
            },
            Location::unknown(),
        );
        sort_items(&mut env);
        let ranks: Vec<u8> = env
            .flat
            .items
            .iter()
            .map(|&i| match env.items[i].kind {
                ItemKind::VarDecl(_) => 1,
                ItemKind::Constraint(_) => 2,
                ItemKind::Solve { .. } => 3,
                _ => 0,
            })
            .collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted);
    }
}
