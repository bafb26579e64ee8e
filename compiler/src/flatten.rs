// flatten.rs — Context-directed flattening of a typed model
//
// flat_exp lowers every expression to a pair (result, definedness witness),
// introducing fresh decision variables for intermediate results, reusing
// structurally equal flat calls through the CSE map, tightening domains from
// computed bounds, and choosing between root, reified, and half-reified
// rewritings from the boolean context. The driver walks the source model's
// items and appends the lowered form to the flat model, then hands over to
// the fixpoint pass.

use std::rc::Rc;

use log::{debug, trace};
use smallvec::SmallVec;

use crate::ast::{
    ArrayLit, BinOpKind, Call, Comprehension, ExprKind, Ident, ItemKind, Let, LetItem, Location,
    SolveGoal, TypeInst, UnOpKind,
};
use crate::bounds::{compute_float_bounds, compute_int_bounds, compute_intset_bounds};
use crate::diag::{CompileError, Result};
use crate::env::Env;
use crate::eval::{eval_bool, eval_comp, eval_intset, eval_par};
use crate::id::{DeclId, ExprId, ItemId};
use crate::ty::{BaseType, Inst, Type};
use crate::val::{FloatVal, IntSetVal, IntVal};

// ── Contexts ────────────────────────────────────────────────────────────────

/// Boolean/integer polarity of the current position in the expression tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BCtx {
    Root,
    Pos,
    Neg,
    Mix,
}

impl BCtx {
    /// Entering a monotone position.
    pub fn pos(self) -> BCtx {
        match self {
            BCtx::Root | BCtx::Pos => BCtx::Pos,
            BCtx::Neg => BCtx::Neg,
            BCtx::Mix => BCtx::Mix,
        }
    }

    /// Entering an antitone position.
    pub fn neg(self) -> BCtx {
        match self {
            BCtx::Root | BCtx::Pos => BCtx::Neg,
            BCtx::Neg => BCtx::Pos,
            BCtx::Mix => BCtx::Mix,
        }
    }
}

pub fn nonpos(c: BCtx) -> bool {
    matches!(c, BCtx::Neg | BCtx::Mix)
}

pub fn nonneg(c: BCtx) -> bool {
    matches!(c, BCtx::Root | BCtx::Pos)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ctx {
    pub b: BCtx,
    pub i: BCtx,
    /// Pending negation, pushed down into bool_not and the commutative
    /// logical operators rather than materialized.
    pub neg: bool,
}

impl Ctx {
    pub fn root() -> Ctx {
        Ctx {
            b: BCtx::Root,
            i: BCtx::Root,
            neg: false,
        }
    }

    pub fn mix() -> Ctx {
        Ctx {
            b: BCtx::Mix,
            i: BCtx::Mix,
            neg: false,
        }
    }

    pub fn with_b(self, b: BCtx) -> Ctx {
        Ctx { b, ..self }
    }
}

/// The (result, definedness witness) pair every recursion step returns.
#[derive(Debug, Clone, Copy)]
pub struct EE {
    pub r: ExprId,
    pub b: ExprId,
}

// ── Context annotations ─────────────────────────────────────────────────────

pub(crate) fn ann_to_ctx(env: &Env, d: DeclId) -> (BCtx, bool) {
    let ann = &env.decls[d].ann;
    let ids = &env.consts.ids;
    if ann.contains(&ids.ctx_root) {
        (BCtx::Root, true)
    } else if ann.contains(&ids.ctx_mix) {
        (BCtx::Mix, true)
    } else if ann.contains(&ids.ctx_pos) {
        (BCtx::Pos, true)
    } else if ann.contains(&ids.ctx_neg) {
        (BCtx::Neg, true)
    } else {
        (BCtx::Mix, false)
    }
}

fn ctx_ann_name(env: &Env, c: BCtx) -> Rc<str> {
    let ids = &env.consts.ids;
    match c {
        BCtx::Root => ids.ctx_root.clone(),
        BCtx::Pos => ids.ctx_pos.clone(),
        BCtx::Neg => ids.ctx_neg.clone(),
        BCtx::Mix => ids.ctx_mix.clone(),
    }
}

/// Record the context a boolean variable is used in, merging with any
/// earlier use: equal or root-subsumed uses keep the old annotation;
/// conflicting polarities degrade to mix.
pub fn add_ctx_ann(env: &mut Env, d: DeclId, c: BCtx) {
    let (old, annotated) = ann_to_ctx(env, d);
    let new = if annotated {
        if old == c || old == BCtx::Root || (old == BCtx::Mix && c != BCtx::Root) {
            return;
        }
        let old_name = ctx_ann_name(env, old);
        env.decls[d].ann.remove(&old_name);
        if c == BCtx::Root {
            BCtx::Root
        } else {
            BCtx::Mix
        }
    } else {
        c
    };
    let name = ctx_ann_name(env, new);
    env.decls[d].ann.add(name);
}

// ── Small helpers ───────────────────────────────────────────────────────────

pub(crate) fn post_constraint(env: &mut Env, e: ExprId) -> ItemId {
    let loc = env.loc(e);
    env.add_flat_item(ItemKind::Constraint(e), loc)
}

/// Mark `call` (posted as `item`) as defining `res`.
pub(crate) fn make_defined(env: &mut Env, res: DeclId, call: ExprId, item: ItemId) {
    let res_id = env.id_expr(res);
    let name = env.consts.ids.defines_var.clone();
    let dv = env.new_expr(
        ExprKind::Call(Call {
            name,
            args: vec![res_id],
            decl: None,
        }),
        Type::ann(),
        Location::unknown(),
    );
    env.exprs[call].ann.add_expr(dv);
    // The annotation no longer counts as an occurrence of `res`.
    env.adjust_expr_occurrences(res_id, -1);
    let idv = env.consts.ids.is_defined_var.clone();
    env.decls[res].ann.add(idv);
    env.note_definition(res, item);
}

/// Half-reification gate: the option must be on and the library hook
/// `mzn_check_only_range_domains` must evaluate to false. The hook is a
/// nullary par predicate; a model without it counts as false (no
/// range-domain restriction). The verdict is cached for the pass.
fn half_reify_allowed(env: &mut Env) -> bool {
    if !env.opts.enable_half_reification || env.opts.only_range_domains {
        return false;
    }
    if let Some(allowed) = env.half_reify_hook_cached() {
        return allowed;
    }
    let name = env.intern("mzn_check_only_range_domains");
    let allowed = if env.model.overloads(&name).is_empty() {
        true
    } else {
        let call = env.call_expr(name, vec![], Type::par_bool(), Location::unknown());
        match eval_bool(env, call) {
            Ok(range_only) => !range_only,
            Err(err) => {
                env.warn(
                    Location::unknown(),
                    format!("cannot evaluate mzn_check_only_range_domains: {err}"),
                );
                false
            }
        }
    };
    env.cache_half_reify_hook(allowed);
    allowed
}

/// Fresh introduced flat variable, unified across passes by source path.
fn new_flat_var(env: &mut Env, ti: TypeInst, loc: Location) -> DeclId {
    let path = env.current_path();
    if !path.is_empty() {
        if let Some((old, same_pass)) = env.path_lookup(&path) {
            if same_pass && !env.decls[old].removed {
                return old;
            }
            // Seen in an earlier pass: fresh variable, but tightened bounds
            // carry over so cross-pass CSE converges.
            let mut ti = ti;
            if ti.domain.is_none() {
                ti.domain = env.decls[old].ti.domain;
            }
            let nd = env.new_flat_decl(ti, loc);
            env.path_register(path.clone(), nd);
            attach_path_ann(env, nd, &path);
            return nd;
        }
    }
    let nd = env.new_flat_decl(ti, loc);
    if !path.is_empty() {
        env.path_register(path.clone(), nd);
        attach_path_ann(env, nd, &path);
    }
    nd
}

fn attach_path_ann(env: &mut Env, d: DeclId, path: &str) {
    if !env.opts.collect_paths {
        return;
    }
    let lit = env.str_lit(path);
    let name = env.consts.ids.mzn_path.clone();
    let ann = env.new_expr(
        ExprKind::Call(Call {
            name,
            args: vec![lit],
            decl: None,
        }),
        Type::ann(),
        Location::unknown(),
    );
    env.decls[d].ann.add_expr(ann);
}

/// Equality predicate name for binding a value to an already-defined target.
fn eq_name_for(env: &mut Env, ty: Type) -> Rc<str> {
    let name = if ty.is_set() {
        "set_eq"
    } else if ty.is_bool() {
        "bool_eq"
    } else if ty.is_float() {
        "float_eq"
    } else {
        "int_eq"
    };
    env.intern(name)
}

// ── bind ────────────────────────────────────────────────────────────────────

/// Bind a flat result to the caller-requested target. `var_true` as target
/// means root context: the result must hold, and a false result fails the
/// whole model.
pub fn bind(env: &mut Env, ctx: Ctx, r: Option<DeclId>, e: ExprId) -> Result<ExprId> {
    let target = match r {
        None => return Ok(e),
        Some(t) => t,
    };
    if target == env.consts.var_true {
        let v = env.resolve_id(e);
        match env.is_bool_lit(v) {
            Some(true) => return Ok(env.consts.lit_true),
            Some(false) => return Err(env.fail("expression evaluated to false", env.loc(e))),
            None => {}
        }
        post_constraint(env, e);
        return Ok(env.consts.lit_true);
    }
    if target == env.consts.var_false {
        let v = env.resolve_id(e);
        match env.is_bool_lit(v) {
            Some(false) => return Ok(env.consts.lit_false),
            Some(true) => return Err(env.fail("expression evaluated to true", env.loc(e))),
            None => {}
        }
        let name = env.consts.ids.bool_not.clone();
        let t = env.consts.lit_true;
        let loc = env.loc(e);
        let call = env.call_expr(name, vec![e, t], Type::var_bool(), loc);
        post_constraint(env, call);
        return Ok(env.consts.lit_false);
    }
    // Specific declaration target.
    if env.decls[target].e.is_none() {
        env.decls[target].e = Some(e);
        if env.decls[target].item.is_some() {
            env.adjust_expr_occurrences(e, 1);
        }
        tighten_domain(env, target, e)?;
        let _ = ctx;
        return Ok(env.id_expr(target));
    }
    if env.decls[target].e == Some(e) {
        return Ok(env.id_expr(target));
    }
    // Already defined: post an equality between target and the new value.
    let ty = env.decls[target].ty();
    let name = eq_name_for(env, ty);
    let tid = env.id_expr(target);
    let loc = env.loc(e);
    let call = env.call_expr(name, vec![tid, e], Type::var_bool(), loc);
    post_constraint(env, call);
    Ok(env.id_expr(target))
}

// ── Domain tightening ───────────────────────────────────────────────────────

/// Intersect a declaration's domain with the inferred bounds of its new
/// defining expression. An empty intersection on a non-set non-opt type
/// fails the model. When domain changes are recorded (option, or a reverse
/// mapper is registered for the variable), explicit domain constraints are
/// posted instead of silently narrowing.
pub fn tighten_domain(env: &mut Env, d: DeclId, rhs: ExprId) -> Result<()> {
    let ty = env.decls[d].ty();
    if ty.dim != 0 || ty.is_par() {
        return Ok(());
    }
    let explicit = env.opts.record_domain_changes || env.has_reverse_mapper(d);
    if ty.is_set() {
        let Some(nb) = compute_intset_bounds(env, rhs) else {
            return Ok(());
        };
        let cur = match env.decls[d].ti.domain {
            Some(dom) => eval_intset(env, dom).ok(),
            None => None,
        };
        let tightened = match cur {
            Some(c) => Rc::new(c.intersect(&nb)),
            None => nb,
        };
        let loc = env.decls[d].loc.clone();
        let lit = env.intset_lit(tightened, loc);
        env.decls[d].ti.domain = Some(lit);
        return Ok(());
    }
    match ty.bt {
        BaseType::Int | BaseType::Bool if ty.is_int() => {
            let nb = compute_int_bounds(env, rhs);
            if !nb.valid || (nb.l.is_minus_inf() && nb.u.is_plus_inf()) {
                return Ok(());
            }
            let newdom = IntSetVal::from_range(nb.l, nb.u);
            let cur = match env.decls[d].ti.domain {
                Some(dom) => eval_intset(env, dom).ok().map(|s| (*s).clone()),
                None => None,
            };
            let tightened = match cur {
                Some(c) => c.intersect(&newdom),
                None => newdom,
            };
            if tightened.is_empty() && !ty.opt {
                let loc = env.decls[d].loc.clone();
                return Err(env.fail("variable domain became empty", loc));
            }
            if explicit {
                let loc = env.decls[d].loc.clone();
                let id = env.id_expr(d);
                let dom = env.intset_lit(Rc::new(tightened), loc.clone());
                let name = env.consts.ids.set_in.clone();
                let call = env.call_expr(name, vec![id, dom], Type::var_bool(), loc);
                post_constraint(env, call);
            } else {
                let loc = env.decls[d].loc.clone();
                let lit = env.intset_lit(Rc::new(tightened), loc);
                env.decls[d].ti.domain = Some(lit);
                let name = env.consts.ids.computed_domain.clone();
                env.decls[d].ann.add(name);
            }
            Ok(())
        }
        BaseType::Float => {
            let nb = compute_float_bounds(env, rhs);
            if !nb.valid || !nb.l.is_finite() && !nb.u.is_finite() {
                return Ok(());
            }
            if explicit {
                let loc = env.decls[d].loc.clone();
                let id = env.id_expr(d);
                let lo = env.float_lit(nb.l);
                let hi = env.float_lit(nb.u);
                let arr_ty = env.types.array_type(Type::par_float(), &[0]);
                let arr = env.new_expr(
                    ExprKind::ArrayLit(ArrayLit::new_1d(vec![lo, hi])),
                    arr_ty,
                    loc.clone(),
                );
                let name = env.consts.ids.float_dom.clone();
                let call = env.call_expr(name, vec![id, arr], Type::var_bool(), loc);
                post_constraint(env, call);
            } else {
                let loc = env.decls[d].loc.clone();
                let fsv = Rc::new(crate::val::FloatSetVal::from_range(nb.l, nb.u));
                let cur = match env.decls[d].ti.domain {
                    Some(dom) => crate::eval::eval_floatset(env, dom).ok(),
                    None => None,
                };
                let tightened = match cur {
                    Some(c) => Rc::new(c.intersect(&fsv)),
                    None => fsv,
                };
                if tightened.is_empty() && !ty.opt {
                    return Err(env.fail("variable domain became empty", loc));
                }
                let lit = env.floatset_lit(tightened, loc);
                env.decls[d].ti.domain = Some(lit);
                let name = env.consts.ids.computed_domain.clone();
                env.decls[d].ann.add(name);
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

// ── Definedness conjunction ─────────────────────────────────────────────────

/// Combine definedness witnesses. In root context every witness is simply
/// required to hold; elsewhere the conjunction becomes a fresh variable
/// defined by array_bool_and.
fn conj(env: &mut Env, ctx: Ctx, b: Option<DeclId>, witnesses: &[ExprId]) -> Result<ExprId> {
    let mut live: Vec<ExprId> = Vec::new();
    for &w in witnesses {
        let v = env.resolve_id(w);
        match env.is_bool_lit(v) {
            Some(true) => continue,
            Some(false) => {
                let f = env.consts.lit_false;
                return bind(env, ctx, b, f);
            },
            None => live.push(w),
        }
    }
    if live.is_empty() {
        let t = env.consts.lit_true;
        return bind(env, ctx, b, t);
    }
    if ctx.b == BCtx::Root {
        for w in live {
            post_constraint(env, w);
        }
        let t = env.consts.lit_true;
        return bind(env, ctx, b, t);
    }
    if live.len() == 1 {
        return bind(env, ctx, b, live[0]);
    }
    let loc = env.loc(live[0]);
    let res = new_flat_var(env, TypeInst::plain(Type::var_bool()), loc.clone());
    let arr_ty = env.types.array_type(Type::var_bool(), &[0]);
    let arr = env.new_expr(ExprKind::ArrayLit(ArrayLit::new_1d(live)), arr_ty, loc.clone());
    let res_id = env.id_expr(res);
    let name = env.consts.ids.array_bool_and.clone();
    let call = env.call_expr(name, vec![arr, res_id], Type::var_bool(), loc);
    let item = post_constraint(env, call);
    make_defined(env, res, call, item);
    let rid = env.id_expr(res);
    bind(env, ctx, b, rid)
}

// ── flat_exp ────────────────────────────────────────────────────────────────

pub fn flat_exp(
    env: &mut Env,
    ctx: Ctx,
    e: ExprId,
    r: Option<DeclId>,
    b: Option<DeclId>,
) -> Result<EE> {
    env.check_cancel()?;
    let ty = env.ty(e);

    // Parameter expressions evaluate; undefinedness poisons the witness.
    if ty.is_par() && !ty.cv && !matches!(env.exprs[e].kind, ExprKind::TypeInst(_)) {
        return flatten_par(env, ctx, e, r, b);
    }

    match env.kind(e) {
        ExprKind::Id(Ident { decl, name }) => {
            let d = decl.ok_or_else(|| {
                CompileError::eval(env.loc(e), format!("unresolved identifier '{name}'"))
            })?;
            let fd = flatten_vardecl(env, d, ctx.b)?;
            if env.decls[fd].ty().is_bool() && ctx.b != BCtx::Root {
                add_ctx_ann(env, fd, if ctx.neg { ctx.b.neg() } else { ctx.b });
            }
            let id = env.id_expr(fd);
            if ctx.neg && env.decls[fd].ty().is_bool() {
                // A pending negation on a bool identifier materializes here.
                let loc = env.loc(e);
                let not_e = env.new_expr(
                    ExprKind::UnOp {
                        op: UnOpKind::Not,
                        expr: id,
                    },
                    Type::var_bool(),
                    loc,
                );
                return flatten_not(env, ctx.no_neg(), not_e, id, r, b);
            }
            let rr = bind(env, ctx, r, id)?;
            let t = env.consts.lit_true;
            let bb = bind(env, Ctx::root(), b, t)?;
            Ok(EE { r: rr, b: bb })
        }
        ExprKind::AnonVar => {
            let ti = TypeInst::plain(ty);
            let loc = env.loc(e);
            let d = new_flat_var(env, ti, loc);
            let id = env.id_expr(d);
            let rr = bind(env, ctx, r, id)?;
            let t = env.consts.lit_true;
            let bb = bind(env, Ctx::root(), b, t)?;
            Ok(EE { r: rr, b: bb })
        }
        ExprKind::ArrayLit(al) => flatten_arraylit(env, ctx, e, &al, r, b),
        ExprKind::ArrayAccess { array, idx } => {
            flatten_arrayaccess(env, ctx, e, array, &idx, r, b)
        }
        ExprKind::FieldAccess { base, field } => {
            let lit = flatten_fieldaccess(env, base, field)?;
            flat_exp(env, ctx, lit, r, b)
        }
        ExprKind::Ite(ite) => flatten_ite(env, ctx, e, &ite, r, b),
        ExprKind::BinOp { op, lhs, rhs } => flatten_binop(env, ctx, e, op, lhs, rhs, r, b),
        ExprKind::UnOp { op, expr } => match op {
            UnOpKind::Plus => flat_exp(env, ctx, expr, r, b),
            UnOpKind::Minus => flatten_linear(env, ctx, e, r, b),
            UnOpKind::Not => flatten_not(env, ctx, e, expr, r, b),
        },
        ExprKind::Call(c) => flatten_call(env, ctx, e, &c, r, b),
        ExprKind::Comprehension(c) => {
            let ees = flatten_comp(env, ctx, &c, Surround::Plain)?;
            let elems: Vec<ExprId> = ees.iter().map(|ee| ee.r).collect();
            let ws: Vec<ExprId> = ees.iter().map(|ee| ee.b).collect();
            let mut al = ArrayLit::new_1d(elems);
            al.flat = true;
            let loc = env.loc(e);
            let lit = env.new_expr(ExprKind::ArrayLit(al), ty, loc);
            let rr = bind(env, ctx, r, lit)?;
            let bb = conj(env, ctx, b, &ws)?;
            Ok(EE { r: rr, b: bb })
        }
        ExprKind::Let(l) => flatten_let(env, ctx, e, &l, r, b),
        ExprKind::SetLit(_) => {
            // A var set literal: rewrite elementwise membership is library
            // territory; bind as an opaque value through a fresh variable.
            let loc = env.loc(e);
            let d = new_flat_var(env, TypeInst::plain(ty), loc);
            let rid = env.id_expr(d);
            let rr = bind(env, ctx, r, rid)?;
            let t = env.consts.lit_true;
            let bb = bind(env, Ctx::root(), b, t)?;
            Ok(EE { r: rr, b: bb })
        }
        ExprKind::TypeInst(_) | ExprKind::TiId(_) => {
            let rr = bind(env, ctx, r, e)?;
            let t = env.consts.lit_true;
            let bb = bind(env, Ctx::root(), b, t)?;
            Ok(EE { r: rr, b: bb })
        }
        ExprKind::IntLit(_)
        | ExprKind::FloatLit(_)
        | ExprKind::BoolLit(_)
        | ExprKind::StringLit(_)
        | ExprKind::Absent => flatten_par(env, ctx, e, r, b),
    }
}

impl Ctx {
    fn no_neg(self) -> Ctx {
        Ctx { neg: false, ..self }
    }
}

// ── Par expressions ─────────────────────────────────────────────────────────

fn flatten_par(env: &mut Env, ctx: Ctx, e: ExprId, r: Option<DeclId>, b: Option<DeclId>) -> Result<EE> {
    let ty = env.ty(e);
    match eval_par(env, e) {
        Ok(mut result) => {
            if ctx.neg {
                if let Some(v) = env.is_bool_lit(result) {
                    result = env.bool_lit(!v);
                }
            }
            if ty.is_bool() {
                if let (BCtx::Root, Some(t), Some(false)) =
                    (ctx.b, r, env.is_bool_lit(result))
                {
                    if t == env.consts.var_true {
                        return Err(env.fail("expression evaluated to false", env.loc(e)));
                    }
                }
            }
            let rr = bind(env, ctx, r, result)?;
            let t = env.consts.lit_true;
            let bb = bind(env, Ctx::root(), b, t)?;
            Ok(EE { r: rr, b: bb })
        }
        Err(err) if err.is_undefined() => {
            if let CompileError::Undefined { loc, msg } = &err {
                env.warn(loc.clone(), msg.clone());
            }
            if ty.is_bool() {
                // An undefined boolean is false; its witness stays true.
                let f = env.bool_lit(ctx.neg);
                let rr = bind(env, ctx, r, f)?;
                let t = env.consts.lit_true;
                let bb = bind(env, Ctx::root(), b, t)?;
                Ok(EE { r: rr, b: bb })
            } else {
                let dummy = env.create_dummy(ty);
                let rr = bind(env, ctx.no_neg(), r, dummy)?;
                let f = env.consts.lit_false;
                let bb = bind(env, Ctx::root(), b, f)?;
                Ok(EE { r: rr, b: bb })
            }
        }
        Err(err) => Err(err),
    }
}

// ── Toplevel declarations ───────────────────────────────────────────────────

/// Flatten a declaration on first use, producing (and caching) its flat
/// counterpart. The use context drives the reification choice for boolean
/// defining expressions.
pub fn flatten_vardecl(env: &mut Env, d: DeclId, use_ctx: BCtx) -> Result<DeclId> {
    if let Some(fd) = env.decls[d].flat {
        return Ok(fd);
    }
    let loc = env.decls[d].loc.clone();
    env.check_cancel()?;
    let ty = env.decls[d].ty();

    // Evaluate the declared domain to a literal.
    let domain = match env.decls[d].ti.domain {
        Some(dom) => Some(eval_par(env, dom)?),
        None => None,
    };
    let ranges = env.decls[d].ti.ranges.clone();
    let ti = TypeInst {
        ty,
        ranges,
        domain,
    };
    let name = env.decls[d].name.clone();
    let fd = env.new_decl(ti, name, None, loc.clone());
    env.decls[fd].toplevel = true;
    env.decls[fd].flat = Some(fd);
    env.decls[fd].ann = env.decls[d].ann.clone();
    let item = env.add_flat_item(ItemKind::VarDecl(fd), loc.clone());
    env.decls[fd].item = Some(item);
    // Install the mapping before the RHS flattens, so cycles through the
    // declaration resolve to the flat variable.
    env.decls[d].flat = Some(fd);

    if let Some(rhs) = env.decls[d].e {
        if ty.is_bool() && use_ctx != BCtx::Root {
            add_ctx_ann(env, fd, use_ctx);
        }
        let rhs_ctx = if ty.is_bool() {
            Ctx {
                b: use_ctx,
                i: BCtx::Mix,
                neg: false,
            }
        } else {
            Ctx::mix()
        };
        debug!("flattening declaration '{}' in {:?}", env.decls[fd].name, use_ctx);
        flat_exp(env, rhs_ctx, rhs, Some(fd), None)?;
    }
    Ok(fd)
}

// ── Array literals and access ───────────────────────────────────────────────

fn flatten_arraylit(
    env: &mut Env,
    ctx: Ctx,
    e: ExprId,
    al: &ArrayLit,
    r: Option<DeclId>,
    b: Option<DeclId>,
) -> Result<EE> {
    let mut elems = Vec::with_capacity(al.elems.len());
    let mut ws = Vec::with_capacity(al.elems.len());
    for &el in &al.elems {
        let ee = flat_exp(env, ctx, el, None, None)?;
        elems.push(ee.r);
        ws.push(ee.b);
    }
    let lit = ArrayLit {
        elems,
        dims: al.dims.clone(),
        flat: true,
    };
    let ty = env.ty(e);
    let loc = env.loc(e);
    let flat = env.new_expr(ExprKind::ArrayLit(lit), ty, loc);
    let rr = bind(env, ctx, r, flat)?;
    let bb = conj(env, ctx, b, &ws)?;
    Ok(EE { r: rr, b: bb })
}

/// Index bounds of a flattened array expression, per dimension.
fn flat_array_dims(env: &mut Env, arr: ExprId) -> Result<Vec<(i64, i64)>> {
    let v = env.resolve_id(arr);
    match env.kind(v) {
        ExprKind::ArrayLit(al) => Ok(al.dims.to_vec()),
        _ => {
            // Declared ranges on the flat declaration.
            if let Some(d) = env.decl_of(arr) {
                let ranges = env.decls[d].ti.ranges.clone();
                let mut out = Vec::with_capacity(ranges.len());
                for rng in ranges {
                    let s = eval_intset(env, rng)?;
                    let lo = s.min().and_then(|v| v.to_i64()).unwrap_or(1);
                    let hi = s.max().and_then(|v| v.to_i64()).unwrap_or(0);
                    out.push((lo, hi));
                }
                return Ok(out);
            }
            Err(CompileError::flattening(
                env.loc(arr),
                "cannot determine index sets of array expression",
            ))
        }
    }
}

fn flatten_arrayaccess(
    env: &mut Env,
    ctx: Ctx,
    e: ExprId,
    array: ExprId,
    idx: &[ExprId],
    r: Option<DeclId>,
    b: Option<DeclId>,
) -> Result<EE> {
    let arr_ee = flat_exp(env, Ctx::mix(), array, None, None)?;
    let dims = flat_array_dims(env, arr_ee.r)?;
    if dims.len() != idx.len() {
        return Err(CompileError::flattening(
            env.loc(e),
            "wrong number of indices in array access",
        ));
    }

    // All-par indices: select the element directly from the literal.
    let all_par = idx.iter().all(|&i| {
        let t = env.ty(i);
        t.is_par() && !t.cv
    });
    if all_par {
        let v = env.resolve_id(arr_ee.r);
        if let ExprKind::ArrayLit(al) = env.kind(v) {
            let mut ivals = Vec::with_capacity(idx.len());
            for &i in idx {
                ivals.push(crate::eval::eval_int(env, i)?);
            }
            match crate::eval::eval_array_access_at(env, e, v, &al, &ivals) {
                Ok(el) => return flat_exp(env, ctx, el, r, b),
                Err(err) if err.is_undefined() => {
                    if let CompileError::Undefined { loc, msg } = &err {
                        env.warn(loc.clone(), msg.clone());
                    }
                    let ty = env.ty(e);
                    let dummy = env.create_dummy(ty);
                    let rr = bind(env, ctx.no_neg(), r, dummy)?;
                    let f = env.consts.lit_false;
                    let bb = bind(env, Ctx::root(), b, f)?;
                    return Ok(EE { r: rr, b: bb });
                }
                Err(err) => return Err(err),
            }
        }
    }

    // Var indices: linearize to a 1-based offset and delegate to the
    // element predicate family.
    let mut witnesses = vec![arr_ee.b];
    let mut flat_idx = Vec::with_capacity(idx.len());
    for (&i, &(lo, hi)) in idx.iter().zip(dims.iter()) {
        let ee = flat_exp(env, Ctx::mix(), i, None, None)?;
        witnesses.push(ee.b);
        // The index must lie within the dimension's range.
        let ib = compute_int_bounds(env, ee.r);
        let inside =
            ib.valid && ib.l >= IntVal::Int(lo) && ib.u <= IntVal::Int(hi);
        if !inside {
            let loc = env.loc(i);
            let set = env.intset_lit(
                Rc::new(IntSetVal::from_range(IntVal::Int(lo), IntVal::Int(hi))),
                loc.clone(),
            );
            let name = env.consts.ids.set_in.clone();
            let inb = env.call_expr(name, vec![ee.r, set], Type::var_bool(), loc);
            let wctx = if ctx.b == BCtx::Root { ctx } else { ctx.with_b(ctx.b.pos()) };
            let wee = flat_exp(env, wctx, inb, None, None)?;
            witnesses.push(wee.r);
        }
        flat_idx.push(ee.r);
    }

    // Row-major linear index, 1-based.
    let loc = env.loc(e);
    let mut linear: Option<ExprId> = None;
    for (k, (&fi, &(lo, _hi))) in flat_idx.iter().zip(dims.iter()).enumerate() {
        let tail_size: i64 = dims[k + 1..].iter().map(|&(l, h)| (h - l + 1).max(0)).product();
        let lo_lit = env.int_lit(IntVal::Int(lo));
        let shifted = env.new_expr(
            ExprKind::BinOp {
                op: BinOpKind::Minus,
                lhs: fi,
                rhs: lo_lit,
            },
            Type::var_int(),
            loc.clone(),
        );
        let scale = env.int_lit(IntVal::Int(tail_size));
        let scaled = env.new_expr(
            ExprKind::BinOp {
                op: BinOpKind::Mult,
                lhs: shifted,
                rhs: scale,
            },
            Type::var_int(),
            loc.clone(),
        );
        linear = Some(match linear {
            None => scaled,
            Some(acc) => env.new_expr(
                ExprKind::BinOp {
                    op: BinOpKind::Plus,
                    lhs: acc,
                    rhs: scaled,
                },
                Type::var_int(),
                loc.clone(),
            ),
        });
    }
    let one = env.int_lit(IntVal::ONE);
    let linear = env.new_expr(
        ExprKind::BinOp {
            op: BinOpKind::Plus,
            lhs: linear.unwrap_or(one),
            rhs: one,
        },
        Type::var_int(),
        loc.clone(),
    );
    let lin_ee = flat_exp(env, Ctx::mix(), linear, None, None)?;
    witnesses.push(lin_ee.b);

    let elem_ty = env.ty(e);
    let arr_elem = env.ty(arr_ee.r).elem_type(&env.types);
    let name = element_name(env, arr_elem);
    let res_ee = bind_value_call(env, ctx, &name, vec![lin_ee.r, arr_ee.r], elem_ty, e, r)?;
    witnesses.push(res_ee.b);
    let bb = conj(env, ctx, b, &witnesses)?;
    Ok(EE { r: res_ee.r, b: bb })
}

fn element_name(env: &mut Env, elem: Type) -> Rc<str> {
    let name = match (elem.bt, elem.is_var()) {
        (BaseType::Bool, false) => "array_bool_element",
        (BaseType::Bool, true) => "array_var_bool_element",
        (BaseType::Float, false) => "array_float_element",
        (BaseType::Float, true) => "array_var_float_element",
        (_, false) => "array_int_element",
        (_, true) => "array_var_int_element",
    };
    env.intern(name)
}

/// Tuple/record elimination: project the field out of the (possibly var)
/// structured carrier.
fn flatten_fieldaccess(env: &mut Env, base: ExprId, field: u32) -> Result<ExprId> {
    let v = env.resolve_id(base);
    match env.kind(v) {
        ExprKind::ArrayLit(al) => al.elems.get(field as usize).copied().ok_or_else(|| {
            CompileError::type_error(env.loc(base), format!("no field {field} in structured value"))
        }),
        _ => Err(CompileError::flattening(
            env.loc(base),
            "field access into an unresolved structured value",
        )),
    }
}

// ── Conditionals ────────────────────────────────────────────────────────────

fn flatten_ite(
    env: &mut Env,
    ctx: Ctx,
    e: ExprId,
    ite: &crate::ast::Ite,
    r: Option<DeclId>,
    b: Option<DeclId>,
) -> Result<EE> {
    // Pick a branch eagerly while conditions are par and cv-free.
    let mut var_branches: Vec<(ExprId, ExprId)> = Vec::new();
    for &(cond, then) in &ite.branches {
        let cty = env.ty(cond);
        if var_branches.is_empty() && cty.is_par() && !cty.cv {
            match eval_bool(env, cond) {
                Ok(true) => return flat_exp(env, ctx, then, r, b),
                Ok(false) => continue,
                Err(err) if err.is_undefined() => {
                    let ty = env.ty(e);
                    let dummy = env.create_dummy(ty);
                    let rr = bind(env, ctx.no_neg(), r, dummy)?;
                    let f = env.consts.lit_false;
                    let bb = bind(env, Ctx::root(), b, f)?;
                    return Ok(EE { r: rr, b: bb });
                }
                Err(err) => return Err(err),
            }
        } else {
            var_branches.push((cond, then));
        }
    }
    if var_branches.is_empty() {
        return match ite.else_expr {
            Some(els) => flat_exp(env, ctx, els, r, b),
            None => {
                let t = env.consts.lit_true;
                flatten_par(env, ctx, t, r, b)
            },
        };
    }

    let ty = env.ty(e);
    // Entering the condition yields mixed polarity.
    let cond_ctx = Ctx::mix();

    if ty.is_bool() && ctx.b == BCtx::Root {
        // Implication chains: (prev-failed ∧ c_i) -> t_i, and the else
        // branch under all conditions failed.
        let mut prev: Vec<ExprId> = Vec::new();
        for &(cond, then) in &var_branches {
            let c = flat_exp(env, cond_ctx, cond, None, None)?;
            let t = flat_exp(env, ctx.with_b(BCtx::Pos), then, None, None)?;
            // clause: t ∨ ¬c ∨ prev_1 ∨ ...
            let mut pos = vec![t.r];
            pos.extend(prev.iter().copied());
            let cloc = env.loc(e);
            post_clause(env, cloc, pos, vec![c.r])?;
            prev.push(c.r);
        }
        if let Some(els) = ite.else_expr {
            let ee = flat_exp(env, ctx.with_b(BCtx::Pos), els, None, None)?;
            let mut pos = vec![ee.r];
            pos.extend(prev.iter().copied());
            let cloc = env.loc(e);
            post_clause(env, cloc, pos, vec![])?;
        }
        let t = env.consts.lit_true;
        let rr = bind(env, ctx, r, t)?;
        let t = env.consts.lit_true;
        let bb = bind(env, Ctx::root(), b, t)?;
        return Ok(EE { r: rr, b: bb });
    }

    // Value conditional: if_then_else_<t>([c_1, ..., true], [t_1, ..., e], res).
    let mut conds = Vec::with_capacity(var_branches.len() + 1);
    let mut vals = Vec::with_capacity(var_branches.len() + 1);
    let mut ws = Vec::new();
    for &(cond, then) in &var_branches {
        let c = flat_exp(env, cond_ctx, cond, None, None)?;
        let t = flat_exp(env, Ctx::mix(), then, None, None)?;
        conds.push(c.r);
        vals.push(t.r);
        ws.push(c.b);
        ws.push(t.b);
    }
    conds.push(env.consts.lit_true);
    let els = match ite.else_expr {
        Some(els) => {
            let ee = flat_exp(env, Ctx::mix(), els, None, None)?;
            ws.push(ee.b);
            ee.r
        }
        None => env.create_dummy(ty),
    };
    vals.push(els);

    let loc = env.loc(e);
    let cond_arr_ty = env.types.array_type(Type::var_bool(), &[0]);
    let cond_arr = env.new_expr(
        ExprKind::ArrayLit(ArrayLit::new_1d(conds)),
        cond_arr_ty,
        loc.clone(),
    );
    let elem = ty;
    let val_arr_ty = env.types.array_type(elem, &[0]);
    let val_arr = env.new_expr(
        ExprKind::ArrayLit(ArrayLit::new_1d(vals)),
        val_arr_ty,
        loc.clone(),
    );
    let suffix = if elem.is_bool() {
        "if_then_else_bool"
    } else if elem.is_float() {
        "if_then_else_float"
    } else {
        "if_then_else_int"
    };
    let name = env.intern(suffix);
    let res = bind_value_call_with_bounds(env, ctx, &name, vec![cond_arr, val_arr], ty, e, r, e)?;
    ws.push(res.b);
    let bb = conj(env, ctx, b, &ws)?;
    Ok(EE { r: res.r, b: bb })
}

// ── Boolean operators ───────────────────────────────────────────────────────

/// Collect clause literals through ∨, ¬, → and (under negation) ∧.
fn collect_clause(
    env: &Env,
    e: ExprId,
    neg: bool,
    pos: &mut Vec<ExprId>,
    negs: &mut Vec<ExprId>,
) {
    match &env.exprs[e].kind {
        ExprKind::BinOp {
            op: BinOpKind::Or,
            lhs,
            rhs,
        } if !neg => {
            collect_clause(env, *lhs, false, pos, negs);
            collect_clause(env, *rhs, false, pos, negs);
        }
        ExprKind::BinOp {
            op: BinOpKind::And,
            lhs,
            rhs,
        } if neg => {
            collect_clause(env, *lhs, true, pos, negs);
            collect_clause(env, *rhs, true, pos, negs);
        }
        ExprKind::BinOp {
            op: BinOpKind::Impl,
            lhs,
            rhs,
        } if !neg => {
            collect_clause(env, *lhs, true, pos, negs);
            collect_clause(env, *rhs, false, pos, negs);
        }
        ExprKind::BinOp {
            op: BinOpKind::RImpl,
            lhs,
            rhs,
        } if !neg => {
            collect_clause(env, *lhs, false, pos, negs);
            collect_clause(env, *rhs, true, pos, negs);
        }
        ExprKind::UnOp {
            op: UnOpKind::Not,
            expr,
        } => collect_clause(env, *expr, !neg, pos, negs),
        _ => {
            if neg {
                negs.push(e);
            } else {
                pos.push(e);
            }
        }
    }
}

fn post_clause(env: &mut Env, loc: Location, pos: Vec<ExprId>, negs: Vec<ExprId>) -> Result<()> {
    if pos.is_empty() && negs.is_empty() {
        return Err(env.fail("empty clause", loc));
    }
    let arr_ty = env.types.array_type(Type::var_bool(), &[0]);
    let pos_arr = env.new_expr(ExprKind::ArrayLit(ArrayLit::new_1d(pos)), arr_ty, loc.clone());
    let neg_arr = env.new_expr(ExprKind::ArrayLit(ArrayLit::new_1d(negs)), arr_ty, loc.clone());
    let name = env.consts.ids.bool_clause.clone();
    let call = env.call_expr(name, vec![pos_arr, neg_arr], Type::var_bool(), loc);
    post_constraint(env, call);
    Ok(())
}

fn flatten_not(
    env: &mut Env,
    ctx: Ctx,
    e: ExprId,
    inner: ExprId,
    r: Option<DeclId>,
    b: Option<DeclId>,
) -> Result<EE> {
    // A negated comparison rewrites to the complementary comparison.
    if let ExprKind::BinOp { op, lhs, rhs } = env.kind(inner) {
        if let Some(nop) = op.negated() {
            let ty = env.ty(inner);
            let loc = env.loc(e);
            let rewritten = env.new_expr(ExprKind::BinOp { op: nop, lhs, rhs }, ty, loc);
            return flat_exp(env, ctx, rewritten, r, b);
        }
    }
    // Push the negation down.
    let nctx = Ctx {
        b: ctx.b.neg(),
        i: ctx.i,
        neg: !ctx.neg,
    };
    if ctx.b == BCtx::Root {
        let ee = flat_exp(env, nctx.no_neg().with_b(BCtx::Neg), inner, None, None)?;
        match env.is_bool_lit(env.resolve_id(ee.r)) {
            Some(false) => {}
            Some(true) => return Err(env.fail("negated expression is true", env.loc(e))),
            None => {
                let cloc = env.loc(e);
                post_clause(env, cloc, vec![], vec![ee.r])?;
            },
        }
        let t = env.consts.lit_true;
        let rr = bind(env, ctx, r, t)?;
        let bb = bind(env, Ctx::root(), b, ee.b)?;
        return Ok(EE { r: rr, b: bb });
    }
    let ee = flat_exp(env, nctx.no_neg(), inner, None, None)?;
    if let Some(v) = env.is_bool_lit(env.resolve_id(ee.r)) {
        let lit = env.bool_lit(!v);
        let rr = bind(env, ctx, r, lit)?;
        let bb = bind(env, Ctx::root(), b, ee.b)?;
        return Ok(EE { r: rr, b: bb });
    }
    let name = env.consts.ids.bool_not.clone();
    let res = bind_value_call(env, ctx, &name.clone(), vec![ee.r], Type::var_bool(), e, r)?;
    let bb = conj(env, ctx, b, &[ee.b, res.b])?;
    Ok(EE { r: res.r, b: bb })
}

// ── Binary operators ────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn flatten_binop(
    env: &mut Env,
    ctx: Ctx,
    e: ExprId,
    op: BinOpKind,
    lhs: ExprId,
    rhs: ExprId,
    r: Option<DeclId>,
    b: Option<DeclId>,
) -> Result<EE> {
    use BinOpKind::*;
    match op {
        And | Or | Impl | RImpl | Equiv | Xor => {
            flatten_logical(env, ctx, e, op, lhs, rhs, r, b)
        }
        Eq | Ne | Lt | Le | Gt | Ge => flatten_comparison(env, ctx, e, op, lhs, rhs, r, b),
        Plus | Minus => flatten_linear(env, ctx, e, r, b),
        Mult => {
            // A par factor folds into the linear form; var*var becomes a
            // product constraint.
            let lp = env.ty(lhs).is_par() && !env.ty(lhs).cv;
            let rp = env.ty(rhs).is_par() && !env.ty(rhs).cv;
            if lp || rp {
                return flatten_linear(env, ctx, e, r, b);
            }
            let a = flat_exp(env, Ctx::mix(), lhs, None, None)?;
            let c = flat_exp(env, Ctx::mix(), rhs, None, None)?;
            let ty = env.ty(e);
            let name = if ty.is_float() { "float_times" } else { "int_times" };
            let name = env.intern(name);
            let res = bind_value_call_with_bounds(env, ctx, &name, vec![a.r, c.r], ty, e, r, e)?;
            let bb = conj(env, ctx, b, &[a.b, c.b, res.b])?;
            Ok(EE { r: res.r, b: bb })
        }
        Div | IDiv | Mod | Pow => flatten_division(env, ctx, e, op, lhs, rhs, r, b),
        In => {
            let a = flat_exp(env, Ctx::mix(), lhs, None, None)?;
            let s = flat_exp(env, Ctx::mix(), rhs, None, None)?;
            let name = env.consts.ids.set_in.clone();
            flatten_call_primitive(env, ctx, e, &name, vec![a.r, s.r], r, b, &[a.b, s.b])
        }
        Subset | Superset => {
            let (x, y) = if op == Subset { (lhs, rhs) } else { (rhs, lhs) };
            let a = flat_exp(env, Ctx::mix(), x, None, None)?;
            let s = flat_exp(env, Ctx::mix(), y, None, None)?;
            let name = env.intern("set_subset");
            flatten_call_primitive(env, ctx, e, &name, vec![a.r, s.r], r, b, &[a.b, s.b])
        }
        Union | Diff | SymDiff | Intersect => {
            let a = flat_exp(env, Ctx::mix(), lhs, None, None)?;
            let c = flat_exp(env, Ctx::mix(), rhs, None, None)?;
            let name = match op {
                Union => "set_union",
                Diff => "set_diff",
                SymDiff => "set_symdiff",
                _ => "set_intersect",
            };
            let name = env.intern(name);
            let ty = env.ty(e);
            let res = bind_value_call(env, ctx, &name, vec![a.r, c.r], ty, e, r)?;
            let bb = conj(env, ctx, b, &[a.b, c.b, res.b])?;
            Ok(EE { r: res.r, b: bb })
        }
        PlusPlus => {
            // Array concatenation on flattened operands.
            let a = flat_exp(env, Ctx::mix(), lhs, None, None)?;
            let c = flat_exp(env, Ctx::mix(), rhs, None, None)?;
            let va = env.resolve_id(a.r);
            let vc = env.resolve_id(c.r);
            let (ea, eb) = match (env.kind(va), env.kind(vc)) {
                (ExprKind::ArrayLit(x), ExprKind::ArrayLit(y)) => (x.elems, y.elems),
                _ => {
                    return Err(CompileError::flattening(
                        env.loc(e),
                        "'++' on expressions without literal form",
                    ))
                }
            };
            let mut elems = ea;
            elems.extend(eb);
            let mut al = ArrayLit::new_1d(elems);
            al.flat = true;
            let ty = env.ty(e);
            let loc = env.loc(e);
            let lit = env.new_expr(ExprKind::ArrayLit(al), ty, loc);
            let rr = bind(env, ctx, r, lit)?;
            let bb = conj(env, ctx, b, &[a.b, c.b])?;
            Ok(EE { r: rr, b: bb })
        }
        DotDot => Err(CompileError::type_error(
            env.loc(e),
            "range over decision variables is not a value",
        )),
    }
}

#[allow(clippy::too_many_arguments)]
fn flatten_logical(
    env: &mut Env,
    ctx: Ctx,
    e: ExprId,
    op: BinOpKind,
    lhs: ExprId,
    rhs: ExprId,
    r: Option<DeclId>,
    b: Option<DeclId>,
) -> Result<EE> {
    use BinOpKind::*;
    // The pending negation swaps the commutative pairs.
    let op = if ctx.neg {
        match op {
            And => Or,
            Or => And,
            other => other,
        }
    } else {
        op
    };
    let operand_neg = ctx.neg;

    match op {
        And if ctx.b == BCtx::Root && !operand_neg => {
            let vt = env.consts.var_true;
            flat_exp(env, ctx, lhs, Some(vt), None)?;
            let vt = env.consts.var_true;
            flat_exp(env, ctx, rhs, Some(vt), None)?;
            let t = env.consts.lit_true;
            let rr = bind(env, ctx.no_neg(), r, t)?;
            let t = env.consts.lit_true;
            let bb = bind(env, Ctx::root(), b, t)?;
            Ok(EE { r: rr, b: bb })
        }
        Or | Impl | RImpl if ctx.b == BCtx::Root => {
            let mut pos = Vec::new();
            let mut negs = Vec::new();
            collect_clause(env, e, operand_neg, &mut pos, &mut negs);
            let mut flat_pos = Vec::new();
            let mut flat_negs = Vec::new();
            let mut ws = Vec::new();
            for p in pos {
                let ee = flat_exp(env, ctx.no_neg().with_b(BCtx::Pos), p, None, None)?;
                ws.push(ee.b);
                match env.is_bool_lit(env.resolve_id(ee.r)) {
                    Some(true) => {
                        let t = env.consts.lit_true;
                        let rr = bind(env, ctx.no_neg(), r, t)?;
                        return Ok(EE { r: rr, b: env.consts.lit_true });
                    }
                    Some(false) => {}
                    None => flat_pos.push(ee.r),
                }
            }
            for n in negs {
                let ee = flat_exp(env, ctx.no_neg().with_b(BCtx::Neg), n, None, None)?;
                ws.push(ee.b);
                match env.is_bool_lit(env.resolve_id(ee.r)) {
                    Some(false) => {
                        let t = env.consts.lit_true;
                        let rr = bind(env, ctx.no_neg(), r, t)?;
                        return Ok(EE { r: rr, b: env.consts.lit_true });
                    }
                    Some(true) => {}
                    None => flat_negs.push(ee.r),
                }
            }
            let cloc = env.loc(e);
            post_clause(env, cloc, flat_pos, flat_negs)?;
            let t = env.consts.lit_true;
            let rr = bind(env, ctx.no_neg(), r, t)?;
            let bb = conj(env, ctx, b, &ws)?;
            Ok(EE { r: rr, b: bb })
        }
        And => {
            // Reified conjunction: array_bool_and([a, b], res).
            let a = flat_exp(env, ctx.no_neg().with_b(ctx.b.pos()), lhs, None, None)?;
            let c = flat_exp(env, ctx.no_neg().with_b(ctx.b.pos()), rhs, None, None)?;
            let loc = env.loc(e);
            let arr_ty = env.types.array_type(Type::var_bool(), &[0]);
            let arr = env.new_expr(
                ExprKind::ArrayLit(ArrayLit::new_1d(vec![a.r, c.r])),
                arr_ty,
                loc,
            );
            let name = env.consts.ids.array_bool_and.clone();
            let res = bind_value_call(env, ctx.no_neg(), &name, vec![arr], Type::var_bool(), e, r)?;
            let bb = conj(env, ctx, b, &[a.b, c.b, res.b])?;
            Ok(EE { r: res.r, b: bb })
        }
        Or | Impl | RImpl => {
            let mut pos = Vec::new();
            let mut negs = Vec::new();
            collect_clause(env, e, operand_neg, &mut pos, &mut negs);
            let mut flat_lits = Vec::new();
            let mut ws = Vec::new();
            for p in pos {
                let ee = flat_exp(env, ctx.no_neg().with_b(ctx.b.pos()), p, None, None)?;
                ws.push(ee.b);
                flat_lits.push(ee.r);
            }
            for n in negs {
                // Negative literals enter the disjunction through bool_not.
                let ee = flat_exp(env, ctx.no_neg().with_b(ctx.b.neg()), n, None, None)?;
                ws.push(ee.b);
                let name = env.consts.ids.bool_not.clone();
                let nr = bind_value_call(env, ctx.no_neg(), &name, vec![ee.r], Type::var_bool(), n, None)?;
                flat_lits.push(nr.r);
            }
            let loc = env.loc(e);
            let arr_ty = env.types.array_type(Type::var_bool(), &[0]);
            let arr = env.new_expr(ExprKind::ArrayLit(ArrayLit::new_1d(flat_lits)), arr_ty, loc);
            let name = env.consts.ids.array_bool_or.clone();
            let res = bind_value_call(env, ctx.no_neg(), &name, vec![arr], Type::var_bool(), e, r)?;
            let bb = conj(env, ctx, b, &ws)?;
            Ok(EE { r: res.r, b: bb })
        }
        Equiv => {
            let a = flat_exp(env, Ctx::mix(), lhs, None, None)?;
            let c = flat_exp(env, Ctx::mix(), rhs, None, None)?;
            let name = env.consts.ids.bool_eq.clone();
            let eff_ctx = if ctx.neg { invert_ctx(ctx) } else { ctx };
            if ctx.neg {
                // ¬(a <-> b) is a xor; flatten as inequality.
                let name = env.intern("bool_xor");
                return flatten_call_primitive(env, eff_ctx, e, &name, vec![a.r, c.r], r, b, &[a.b, c.b]);
            }
            flatten_call_primitive(env, ctx, e, &name, vec![a.r, c.r], r, b, &[a.b, c.b])
        }
        Xor => {
            let a = flat_exp(env, Ctx::mix(), lhs, None, None)?;
            let c = flat_exp(env, Ctx::mix(), rhs, None, None)?;
            if ctx.neg {
                let name = env.consts.ids.bool_eq.clone();
                return flatten_call_primitive(env, ctx.no_neg(), e, &name, vec![a.r, c.r], r, b, &[a.b, c.b]);
            }
            let name = env.intern("bool_xor");
            flatten_call_primitive(env, ctx, e, &name, vec![a.r, c.r], r, b, &[a.b, c.b])
        }
        _ => unreachable!("non-logical operator in flatten_logical"),
    }
}

fn invert_ctx(ctx: Ctx) -> Ctx {
    Ctx {
        b: ctx.b.neg(),
        i: ctx.i,
        neg: false,
    }
}

#[allow(clippy::too_many_arguments)]
fn flatten_comparison(
    env: &mut Env,
    ctx: Ctx,
    e: ExprId,
    op: BinOpKind,
    lhs: ExprId,
    rhs: ExprId,
    r: Option<DeclId>,
    b: Option<DeclId>,
) -> Result<EE> {
    use BinOpKind::*;
    // Apply a pending negation, then normalize > and >= away.
    let (op, lhs, rhs) = if ctx.neg {
        (op.negated().unwrap_or(op), lhs, rhs)
    } else {
        (op, lhs, rhs)
    };
    let ctx = ctx.no_neg();
    let (op, lhs, rhs) = match op {
        Gt | Ge => (op.swapped(), rhs, lhs),
        _ => (op, lhs, rhs),
    };

    let a = flat_exp(env, Ctx::mix(), lhs, None, None)?;
    let c = flat_exp(env, Ctx::mix(), rhs, None, None)?;

    // Both sides reduced to literals: decide now.
    let va = env.resolve_id(a.r);
    let vc = env.resolve_id(c.r);
    if crate::eval::is_literal(env, va) && crate::eval::is_literal(env, vc) {
        let ord = crate::eval::eval_cmp(env, va, vc)?;
        let holds = match op {
            Eq => ord == std::cmp::Ordering::Equal,
            Ne => ord != std::cmp::Ordering::Equal,
            Lt => ord == std::cmp::Ordering::Less,
            Le => ord != std::cmp::Ordering::Greater,
            _ => unreachable!(),
        };
        let lit = env.bool_lit(holds);
        if ctx.b == BCtx::Root && !holds {
            return Err(env.fail("expression evaluated to false", env.loc(e)));
        }
        let rr = bind(env, ctx, r, lit)?;
        let bb = conj(env, ctx, b, &[a.b, c.b])?;
        return Ok(EE { r: rr, b: bb });
    }

    let operand_ty = env.ty(lhs).common_type(env.ty(rhs), &env.types);
    let prefix = if operand_ty.is_set() {
        "set"
    } else if operand_ty.is_bool() {
        "bool"
    } else if operand_ty.is_float() {
        "float"
    } else {
        "int"
    };
    let suffix = match op {
        Eq => "eq",
        Ne => "ne",
        Lt => "lt",
        Le => "le",
        _ => unreachable!(),
    };
    let name = env.intern(&format!("{prefix}_{suffix}"));
    flatten_call_primitive(env, ctx, e, &name, vec![a.r, c.r], r, b, &[a.b, c.b])
}

// ── Linear expressions ──────────────────────────────────────────────────────

/// Collect `+`, `-`, unary minus, par-scaled products and nested lin_exp
/// calls into (coefficient, term) pairs plus a constant. Any non-linear
/// subexpression stays opaque as a term of its own.
fn collect_int_lin(
    env: &mut Env,
    e: ExprId,
    coef: &IntVal,
    terms: &mut Vec<(IntVal, ExprId)>,
    konst: &mut IntVal,
) -> Result<()> {
    let kind = env.kind(e);
    match kind {
        ExprKind::IntLit(v) => {
            let t = coef.mul(&v).map_err(|er| CompileError::arith(env.loc(e), er))?;
            *konst = konst.add(&t).map_err(|er| CompileError::arith(env.loc(e), er))?;
        }
        ExprKind::BinOp {
            op: BinOpKind::Plus,
            lhs,
            rhs,
        } => {
            collect_int_lin(env, lhs, coef, terms, konst)?;
            collect_int_lin(env, rhs, coef, terms, konst)?;
        }
        ExprKind::BinOp {
            op: BinOpKind::Minus,
            lhs,
            rhs,
        } => {
            collect_int_lin(env, lhs, coef, terms, konst)?;
            let nc = coef.neg();
            collect_int_lin(env, rhs, &nc, terms, konst)?;
        }
        ExprKind::UnOp {
            op: UnOpKind::Minus,
            expr,
        } => {
            let nc = coef.neg();
            collect_int_lin(env, expr, &nc, terms, konst)?;
        }
        ExprKind::UnOp {
            op: UnOpKind::Plus,
            expr,
        } => collect_int_lin(env, expr, coef, terms, konst)?,
        ExprKind::BinOp {
            op: BinOpKind::Mult,
            lhs,
            rhs,
        } => {
            let lt = env.ty(lhs);
            let rt = env.ty(rhs);
            if lt.is_par() && !lt.cv {
                let c = crate::eval::eval_int(env, lhs)?;
                let nc = coef.mul(&c).map_err(|er| CompileError::arith(env.loc(e), er))?;
                collect_int_lin(env, rhs, &nc, terms, konst)?;
            } else if rt.is_par() && !rt.cv {
                let c = crate::eval::eval_int(env, rhs)?;
                let nc = coef.mul(&c).map_err(|er| CompileError::arith(env.loc(e), er))?;
                collect_int_lin(env, lhs, &nc, terms, konst)?;
            } else {
                terms.push((coef.clone(), e));
            }
        }
        _ => {
            let ty = env.ty(e);
            if ty.is_par() && !ty.cv {
                let v = crate::eval::eval_int(env, e)?;
                let t = coef.mul(&v).map_err(|er| CompileError::arith(env.loc(e), er))?;
                *konst = konst.add(&t).map_err(|er| CompileError::arith(env.loc(e), er))?;
            } else {
                terms.push((coef.clone(), e));
            }
        }
    }
    Ok(())
}

/// Lower a +,-,par* tree into a `lin_exp(c, x, k)` call bound to a fresh
/// variable with dot-product bounds.
fn flatten_linear(
    env: &mut Env,
    ctx: Ctx,
    e: ExprId,
    r: Option<DeclId>,
    b: Option<DeclId>,
) -> Result<EE> {
    let ty = env.ty(e);
    if ty.is_float() {
        return flatten_linear_float(env, ctx, e, r, b);
    }
    let mut terms = Vec::new();
    let mut konst = IntVal::ZERO;
    collect_int_lin(env, e, &IntVal::ONE, &mut terms, &mut konst)?;

    let mut ws: SmallVec<[ExprId; 4]> = SmallVec::new();
    let mut coeffs = Vec::with_capacity(terms.len());
    let mut vars = Vec::with_capacity(terms.len());
    for (c, t) in terms {
        let ee = flat_exp(env, Ctx::mix(), t, None, None)?;
        ws.push(ee.b);
        let v = env.resolve_id(ee.r);
        // Fold terms that flattened to constants.
        if let ExprKind::IntLit(vv) = env.kind(v) {
            let t = c.mul(&vv).map_err(|er| CompileError::arith(env.loc(e), er))?;
            konst = konst.add(&t).map_err(|er| CompileError::arith(env.loc(e), er))?;
            continue;
        }
        // Inline a term that is itself a linear definition, so nested sums
        // collapse into one equation.
        if let ExprKind::Call(call) = env.kind(v) {
            if call.name == env.consts.ids.lin_exp && call.args.len() == 3 {
                let inner_cs = match env.kind(call.args[0]) {
                    ExprKind::ArrayLit(al) => al.elems,
                    _ => vec![],
                };
                let inner_xs = match env.kind(call.args[1]) {
                    ExprKind::ArrayLit(al) => al.elems,
                    _ => vec![],
                };
                if inner_cs.len() == inner_xs.len() {
                    let ik = crate::eval::eval_int(env, call.args[2])?;
                    for (ic, ix) in inner_cs.iter().zip(inner_xs.iter()) {
                        let icv = crate::eval::eval_int(env, *ic)?;
                        let merged = c
                            .mul(&icv)
                            .map_err(|er| CompileError::arith(env.loc(e), er))?;
                        coeffs.push(merged);
                        vars.push(*ix);
                    }
                    let t = c.mul(&ik).map_err(|er| CompileError::arith(env.loc(e), er))?;
                    konst = konst.add(&t).map_err(|er| CompileError::arith(env.loc(e), er))?;
                    continue;
                }
            }
        }
        coeffs.push(c);
        vars.push(ee.r);
    }
    let loc = env.loc(e);
    if vars.is_empty() {
        let lit = env.int_lit_typed(konst, ty);
        let rr = bind(env, ctx, r, lit)?;
        let bb = conj(env, ctx, b, &ws)?;
        return Ok(EE { r: rr, b: bb });
    }
    // A single unit term with no constant is just that term.
    if vars.len() == 1 && coeffs[0] == IntVal::ONE && konst == IntVal::ZERO {
        let rr = bind(env, ctx, r, vars[0])?;
        let bb = conj(env, ctx, b, &ws)?;
        return Ok(EE { r: rr, b: bb });
    }

    let coeff_lits: Vec<ExprId> = coeffs.into_iter().map(|c| env.int_lit(c)).collect();
    let coeff_ty = env.types.array_type(Type::par_int(), &[0]);
    let coeff_arr = env.new_expr(
        ExprKind::ArrayLit(ArrayLit::new_1d(coeff_lits)),
        coeff_ty,
        loc.clone(),
    );
    let vars_ty = env.types.array_type(Type::var_int(), &[0]);
    let vars_arr = env.new_expr(ExprKind::ArrayLit(ArrayLit::new_1d(vars)), vars_ty, loc.clone());
    let k = env.int_lit(konst);
    let name = env.consts.ids.lin_exp.clone();
    let lin_call = env.call_expr(name, vec![coeff_arr, vars_arr, k], ty, loc);
    let res = bind_linear(env, ctx, lin_call, ty, r)?;
    let bb = conj(env, ctx, b, &ws)?;
    Ok(EE { r: res, b: bb })
}

/// Install a lin_exp call as the defining RHS of its result variable; the
/// fixpoint pass rewrites it into int_lin_eq / float_lin_eq form with the
/// defined variable at coefficient -1.
fn bind_linear(
    env: &mut Env,
    ctx: Ctx,
    lin_call: ExprId,
    ty: Type,
    r: Option<DeclId>,
) -> Result<ExprId> {
    if let Some((hit, _)) = env.cse_find(lin_call) {
        return bind(env, ctx, r, hit);
    }
    let loc = env.loc(lin_call);
    let res = match r {
        Some(d)
            if d != env.consts.var_true
                && d != env.consts.var_false
                && env.decls[d].e.is_none() =>
        {
            d
        }
        _ => new_flat_var(env, TypeInst::plain(ty.with_inst(Inst::Var)), loc),
    };
    let out = bind(env, ctx.no_neg(), Some(res), lin_call)?;
    let t = env.consts.lit_true;
    env.cse_insert(lin_call, out, t);
    if r.is_some() && r != Some(res) {
        return bind(env, ctx, r, out);
    }
    Ok(out)
}

fn collect_float_lin(
    env: &mut Env,
    e: ExprId,
    coef: FloatVal,
    terms: &mut Vec<(FloatVal, ExprId)>,
    konst: &mut FloatVal,
) -> Result<()> {
    let kind = env.kind(e);
    match kind {
        ExprKind::FloatLit(v) => *konst = *konst + coef * v,
        ExprKind::IntLit(v) => *konst = *konst + coef * v.to_float(),
        ExprKind::BinOp {
            op: BinOpKind::Plus,
            lhs,
            rhs,
        } => {
            collect_float_lin(env, lhs, coef, terms, konst)?;
            collect_float_lin(env, rhs, coef, terms, konst)?;
        }
        ExprKind::BinOp {
            op: BinOpKind::Minus,
            lhs,
            rhs,
        } => {
            collect_float_lin(env, lhs, coef, terms, konst)?;
            collect_float_lin(env, rhs, -coef, terms, konst)?;
        }
        ExprKind::UnOp {
            op: UnOpKind::Minus,
            expr,
        } => collect_float_lin(env, expr, -coef, terms, konst)?,
        ExprKind::BinOp {
            op: BinOpKind::Mult,
            lhs,
            rhs,
        } => {
            let lt = env.ty(lhs);
            let rt = env.ty(rhs);
            if lt.is_par() && !lt.cv {
                let c = crate::eval::eval_float(env, lhs)?;
                collect_float_lin(env, rhs, coef * c, terms, konst)?;
            } else if rt.is_par() && !rt.cv {
                let c = crate::eval::eval_float(env, rhs)?;
                collect_float_lin(env, lhs, coef * c, terms, konst)?;
            } else {
                terms.push((coef, e));
            }
        }
        _ => {
            let ty = env.ty(e);
            if ty.is_par() && !ty.cv {
                let v = crate::eval::eval_float(env, e)?;
                *konst = *konst + coef * v;
            } else {
                terms.push((coef, e));
            }
        }
    }
    Ok(())
}

fn flatten_linear_float(
    env: &mut Env,
    ctx: Ctx,
    e: ExprId,
    r: Option<DeclId>,
    b: Option<DeclId>,
) -> Result<EE> {
    let ty = env.ty(e);
    let mut terms = Vec::new();
    let mut konst = FloatVal::ZERO;
    collect_float_lin(env, e, FloatVal::new(1.0), &mut terms, &mut konst)?;
    let mut ws: SmallVec<[ExprId; 4]> = SmallVec::new();
    let mut coeffs = Vec::with_capacity(terms.len());
    let mut vars = Vec::with_capacity(terms.len());
    for (c, t) in terms {
        let ee = flat_exp(env, Ctx::mix(), t, None, None)?;
        ws.push(ee.b);
        if let ExprKind::FloatLit(v) = env.kind(env.resolve_id(ee.r)) {
            konst = konst + c * v;
            continue;
        }
        coeffs.push(c);
        vars.push(ee.r);
    }
    let loc = env.loc(e);
    if vars.is_empty() {
        let lit = env.float_lit(konst);
        let rr = bind(env, ctx, r, lit)?;
        let bb = conj(env, ctx, b, &ws)?;
        return Ok(EE { r: rr, b: bb });
    }
    if vars.len() == 1 && coeffs[0] == FloatVal::new(1.0) && konst == FloatVal::ZERO {
        let rr = bind(env, ctx, r, vars[0])?;
        let bb = conj(env, ctx, b, &ws)?;
        return Ok(EE { r: rr, b: bb });
    }
    let coeff_lits: Vec<ExprId> = coeffs.iter().map(|&c| env.float_lit(c)).collect();
    let coeff_ty = env.types.array_type(Type::par_float(), &[0]);
    let coeff_arr = env.new_expr(
        ExprKind::ArrayLit(ArrayLit::new_1d(coeff_lits)),
        coeff_ty,
        loc.clone(),
    );
    let vars_ty = env.types.array_type(Type::var_float(), &[0]);
    let vars_arr = env.new_expr(ExprKind::ArrayLit(ArrayLit::new_1d(vars)), vars_ty, loc.clone());
    let k = env.float_lit(konst);
    let name = env.consts.ids.lin_exp.clone();
    let lin_call = env.call_expr(name, vec![coeff_arr, vars_arr, k], ty, loc);
    let res = bind_linear(env, ctx, lin_call, ty, r)?;
    let bb = conj(env, ctx, b, &ws)?;
    Ok(EE { r: res, b: bb })
}

// ── Division-like operators ─────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn flatten_division(
    env: &mut Env,
    ctx: Ctx,
    e: ExprId,
    op: BinOpKind,
    lhs: ExprId,
    rhs: ExprId,
    r: Option<DeclId>,
    b: Option<DeclId>,
) -> Result<EE> {
    let a = flat_exp(env, Ctx::mix(), lhs, None, None)?;
    let c = flat_exp(env, Ctx::mix(), rhs, None, None)?;
    let ty = env.ty(e);
    let name = match op {
        BinOpKind::Div => "float_div",
        BinOpKind::IDiv => "int_div",
        BinOpKind::Mod => "int_mod",
        _ => "int_pow",
    };
    let name = env.intern(name);
    let mut ws = vec![a.b, c.b];
    // Divisor definedness: zero must be outside the divisor's domain or the
    // witness carries the disequality.
    if matches!(op, BinOpKind::Div | BinOpKind::IDiv | BinOpKind::Mod) {
        let denom_nonzero = if ty.is_float() {
            let db = compute_float_bounds(env, c.r);
            db.valid && (db.l > FloatVal::ZERO || db.u < FloatVal::ZERO)
        } else {
            let db = compute_int_bounds(env, c.r);
            db.valid && (db.l > IntVal::ZERO || db.u < IntVal::ZERO)
        };
        if !denom_nonzero {
            let loc = env.loc(rhs);
            let zero = if ty.is_float() {
                env.float_lit(FloatVal::ZERO)
            } else {
                env.int_lit(IntVal::ZERO)
            };
            let ne = env.new_expr(
                ExprKind::BinOp {
                    op: BinOpKind::Ne,
                    lhs: c.r,
                    rhs: zero,
                },
                Type::var_bool(),
                loc,
            );
            let wctx = if ctx.b == BCtx::Root { ctx } else { ctx.with_b(ctx.b.pos()) };
            let wee = flat_exp(env, wctx, ne, None, None)?;
            ws.push(wee.r);
        }
    }
    let res = bind_value_call_with_bounds(env, ctx, &name, vec![a.r, c.r], ty, e, r, e)?;
    ws.push(res.b);
    let bb = conj(env, ctx, b, &ws)?;
    Ok(EE { r: res.r, b: bb })
}

// ── Value-returning primitive calls ─────────────────────────────────────────

/// Build `name(args..., res)` with a fresh result variable, CSE-deduplicated
/// on the base call. Returns the result binding.
fn bind_value_call(
    env: &mut Env,
    ctx: Ctx,
    name: &Rc<str>,
    args: Vec<ExprId>,
    res_ty: Type,
    at: ExprId,
    r: Option<DeclId>,
) -> Result<EE> {
    let loc = env.loc(at);
    let key = env.call_expr(name.clone(), args.clone(), res_ty, loc.clone());
    bind_value_call_expr(env, ctx, key, res_ty, r).map(|rr| EE {
        r: rr,
        b: env.consts.lit_true,
    })
}

#[allow(clippy::too_many_arguments)]
fn bind_value_call_with_bounds(
    env: &mut Env,
    ctx: Ctx,
    name: &Rc<str>,
    args: Vec<ExprId>,
    res_ty: Type,
    at: ExprId,
    r: Option<DeclId>,
    bounds_from: ExprId,
) -> Result<EE> {
    let loc = env.loc(at);
    let key = env.call_expr(name.clone(), args, res_ty, loc);
    let rr = bind_value_call_expr_inner(env, ctx, key, res_ty, r, Some(bounds_from))?;
    Ok(EE {
        r: rr,
        b: env.consts.lit_true,
    })
}

fn bind_value_call_expr(
    env: &mut Env,
    ctx: Ctx,
    key: ExprId,
    res_ty: Type,
    r: Option<DeclId>,
) -> Result<ExprId> {
    bind_value_call_expr_inner(env, ctx, key, res_ty, r, Some(key))
}

fn bind_value_call_expr_inner(
    env: &mut Env,
    ctx: Ctx,
    key: ExprId,
    res_ty: Type,
    r: Option<DeclId>,
    bounds_from: Option<ExprId>,
) -> Result<ExprId> {
    if let Some((hit_r, _)) = env.cse_find(key) {
        trace!("CSE hit for {}", crate::print::print_expr_compact(env, key));
        return bind(env, ctx, r, hit_r);
    }
    let loc = env.loc(key);
    // Reuse a caller-provided target that is still undefined, otherwise
    // introduce a fresh variable.
    let res = match r {
        Some(d)
            if d != env.consts.var_true
                && d != env.consts.var_false
                && env.decls[d].e.is_none() =>
        {
            d
        }
        _ => {
            let mut ti = TypeInst::plain(res_ty.with_inst(Inst::Var));
            if let Some(bf) = bounds_from {
                if res_ty.is_int() {
                    let nb = compute_int_bounds(env, bf);
                    if nb.valid && !(nb.l.is_minus_inf() && nb.u.is_plus_inf()) {
                        let dom = env.intset_lit(
                            Rc::new(IntSetVal::from_range(nb.l, nb.u)),
                            loc.clone(),
                        );
                        ti.domain = Some(dom);
                    }
                }
            }
            new_flat_var(env, ti, loc.clone())
        }
    };
    let res_id = env.id_expr(res);
    let (name, mut args) = match env.kind(key) {
        ExprKind::Call(c) => (c.name, c.args),
        _ => unreachable!("bind_value_call on non-call"),
    };
    args.push(res_id);
    let rcall = env.call_expr(name, args, Type::var_bool(), loc);
    let item = post_constraint(env, rcall);
    make_defined(env, res, rcall, item);
    let out = env.id_expr(res);
    env.cse_insert(key, out, env.consts.lit_true);
    if r.is_some() && Some(res) != r {
        return bind(env, ctx, r, out);
    }
    // Domain tightening for a caller-provided target.
    if let Some(bf) = bounds_from {
        if Some(res) == r {
            tighten_domain(env, res, bf)?;
        }
    }
    Ok(out)
}

// ── Boolean predicate calls (reification selection) ─────────────────────────

/// Flatten a call to a boolean primitive. In root context the call is
/// posted directly; otherwise the variant is chosen by the reification map:
/// `_imp` under a pos-annotated target with half-reification enabled,
/// `_reif` for any non-root target, and the bare primitive as the fallback.
#[allow(clippy::too_many_arguments)]
fn flatten_call_primitive(
    env: &mut Env,
    ctx: Ctx,
    at: ExprId,
    name: &Rc<str>,
    args: Vec<ExprId>,
    r: Option<DeclId>,
    b: Option<DeclId>,
    arg_witnesses: &[ExprId],
) -> Result<EE> {
    let loc = env.loc(at);
    let is_root = ctx.b == BCtx::Root
        && r.map_or(true, |t| t == env.consts.var_true);
    let key = env.call_expr(name.clone(), args.clone(), Type::var_bool(), loc.clone());
    if let Some((hit_r, hit_b)) = env.cse_find(key) {
        let rr = bind(env, ctx, r, hit_r)?;
        let mut ws = arg_witnesses.to_vec();
        ws.push(hit_b);
        let bb = conj(env, ctx, b, &ws)?;
        return Ok(EE { r: rr, b: bb });
    }
    if is_root {
        post_constraint(env, key);
        env.cse_insert(key, env.consts.lit_true, env.consts.lit_true);
        let t = env.consts.lit_true;
        let rr = bind(env, ctx, r, t)?;
        let bb = conj(env, ctx, b, arg_witnesses)?;
        return Ok(EE { r: rr, b: bb });
    }

    // Reified: target variable and its recorded context drive the choice.
    let res = match r {
        Some(d)
            if d != env.consts.var_true
                && d != env.consts.var_false
                && env.decls[d].e.is_none() =>
        {
            d
        }
        _ => new_flat_var(env, TypeInst::plain(Type::var_bool()), loc.clone()),
    };
    let (res_ctx, annotated) = ann_to_ctx(env, res);
    let eff_ctx = if annotated { res_ctx } else { ctx.b };
    let variant = if eff_ctx == BCtx::Pos
        && env.reify.has_half_reified(name)
        && half_reify_allowed(env)
    {
        env.reify.half_reified(name)
    } else if eff_ctx != BCtx::Root && env.reify.has_reified(name) {
        env.reify.reified(name)
    } else {
        // No reified form: post the primitive directly.
        post_constraint(env, key);
        env.cse_insert(key, env.consts.lit_true, env.consts.lit_true);
        let t = env.consts.lit_true;
        let rr = bind(env, ctx, r, t)?;
        let bb = conj(env, ctx, b, arg_witnesses)?;
        return Ok(EE { r: rr, b: bb });
    };
    let res_id = env.id_expr(res);
    let mut rargs = args;
    rargs.push(res_id);
    let interned = env.intern(&variant);
    let rcall = env.call_expr(interned, rargs, Type::var_bool(), loc);
    let item = post_constraint(env, rcall);
    make_defined(env, res, rcall, item);
    let out = env.id_expr(res);
    env.cse_insert(key, out, env.consts.lit_true);
    let rr = if r == Some(res) {
        out
    } else {
        bind(env, ctx, r, out)?
    };
    let bb = conj(env, ctx, b, arg_witnesses)?;
    Ok(EE { r: rr, b: bb })
}

// ── Comprehensions ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surround {
    Forall,
    Exists,
    Sum,
    Plain,
}

/// Lower a comprehension to one flattened EE per element, in row-major
/// generator order. Generators over variable sets iterate the declared
/// upper-bound set with the membership test joined into the where clause;
/// the var part of the where is folded into the body according to the
/// surrounding call.
pub fn flatten_comp(
    env: &mut Env,
    ctx: Ctx,
    comp: &Comprehension,
    surround: Surround,
) -> Result<Vec<EE>> {
    // Rewrite generators: var in-sets become their upper bounds plus a
    // var-where membership conjunct; var wheres move to the body.
    let mut gens = Vec::with_capacity(comp.gens.len());
    let mut var_wheres: Vec<ExprId> = Vec::new();
    for g in &comp.gens {
        let mut g = g.clone();
        if let Some(in_e) = g.in_expr {
            let in_ty = env.ty(in_e);
            if in_ty.is_var() && in_ty.dim == 0 {
                let ub = compute_intset_bounds(env, in_e).ok_or_else(|| {
                    CompileError::flattening(
                        env.loc(in_e),
                        "no upper bound for variable set in generator",
                    )
                })?;
                let loc = env.loc(in_e);
                let ub_lit = env.intset_lit(ub, loc.clone());
                for &d in &g.decls {
                    let did = env.id_expr(d);
                    let membership = env.new_expr(
                        ExprKind::BinOp {
                            op: BinOpKind::In,
                            lhs: did,
                            rhs: in_e,
                        },
                        Type::var_bool().with_cv(true),
                        loc.clone(),
                    );
                    var_wheres.push(membership);
                }
                g.in_expr = Some(ub_lit);
            }
        }
        if let Some(w) = g.where_expr {
            if env.ty(w).cv || env.ty(w).is_var() {
                var_wheres.push(w);
                g.where_expr = None;
            }
        }
        gens.push(g);
    }

    // Conjoin the collected var wheres.
    let where_var: Option<ExprId> = var_wheres.into_iter().reduce(|a, c| {
        let loc = env.loc(a);
        env.new_expr(
            ExprKind::BinOp {
                op: BinOpKind::And,
                lhs: a,
                rhs: c,
            },
            Type::var_bool().with_cv(true),
            loc,
        )
    });

    // Rewrite the body per the surrounding call.
    let body = match where_var {
        None => comp.body,
        Some(w) => {
            let loc = env.loc(comp.body);
            let body_ty = env.ty(comp.body);
            match surround {
                Surround::Forall => env.new_expr(
                    ExprKind::BinOp {
                        op: BinOpKind::Impl,
                        lhs: w,
                        rhs: comp.body,
                    },
                    Type::var_bool().with_cv(true),
                    loc,
                ),
                Surround::Exists => env.new_expr(
                    ExprKind::BinOp {
                        op: BinOpKind::And,
                        lhs: w,
                        rhs: comp.body,
                    },
                    Type::var_bool().with_cv(true),
                    loc,
                ),
                Surround::Sum => {
                    if env.ty(comp.body).is_par() && !env.ty(comp.body).cv {
                        // bool2int(where) * body
                        let name = env.consts.ids.bool2int.clone();
                        let b2i = env.call_expr(
                            name,
                            vec![w],
                            Type::var_int(),
                            loc.clone(),
                        );
                        env.new_expr(
                            ExprKind::BinOp {
                                op: BinOpKind::Mult,
                                lhs: b2i,
                                rhs: comp.body,
                            },
                            Type::var_int(),
                            loc,
                        )
                    } else {
                        let zero = if body_ty.is_float() {
                            env.float_lit(FloatVal::ZERO)
                        } else {
                            env.int_lit(IntVal::ZERO)
                        };
                        env.new_expr(
                            ExprKind::Ite(Box::new(crate::ast::Ite {
                                branches: vec![(w, comp.body)],
                                else_expr: Some(zero),
                            })),
                            body_ty.with_inst(Inst::Var),
                            loc,
                        )
                    }
                }
                Surround::Plain => {
                    let absent = env.consts.absent;
                    env.new_expr(
                        ExprKind::Ite(Box::new(crate::ast::Ite {
                            branches: vec![(w, comp.body)],
                            else_expr: Some(absent),
                        })),
                        body_ty.with_inst(Inst::Var).with_opt(true),
                        loc,
                    )
                }
            }
        }
    };

    let rewritten = Comprehension {
        body,
        gens,
        set: comp.set,
    };
    let ectx = match surround {
        Surround::Forall if ctx.b == BCtx::Root => ctx,
        _ => ctx.with_b(ctx.b.pos()),
    };
    let mut out = Vec::new();
    eval_comp(env, &rewritten, &mut |env, body| {
        let ee = flat_exp(env, ectx, body, None, None)?;
        out.push(ee);
        Ok(())
    })?;
    Ok(out)
}

// ── Lets ────────────────────────────────────────────────────────────────────

fn flatten_let(
    env: &mut Env,
    ctx: Ctx,
    e: ExprId,
    l: &Let,
    r: Option<DeclId>,
    b: Option<DeclId>,
) -> Result<EE> {
    env.push_call_frame("let", env.loc(e));
    let mut saved: Vec<(DeclId, Option<DeclId>)> = Vec::new();
    for item in &l.items {
        if let LetItem::Decl(d) = item {
            saved.push((*d, env.decls[*d].flat));
        }
    }
    let result = flatten_let_inner(env, ctx, l, r, b);
    for (d, old) in saved.iter().rev() {
        env.decls[*d].flat = *old;
    }
    env.pop_call_frame();
    result
}

fn flatten_let_inner(
    env: &mut Env,
    ctx: Ctx,
    l: &Let,
    r: Option<DeclId>,
    b: Option<DeclId>,
) -> Result<EE> {
    let mut ws: Vec<ExprId> = Vec::new();
    for item in &l.items {
        match item {
            LetItem::Decl(d) => {
                let d = *d;
                let loc = env.decls[d].loc.clone();
                let ty = env.decls[d].ty();
                match env.decls[d].e {
                    Some(rhs) => {
                        // Polarity inherited from the monotonicity annotation.
                        let promise_mono = env.decls[d].ann.contains("promise_ctx_monotone");
                        let promise_anti = env.decls[d].ann.contains("promise_ctx_antitone");
                        let rhs_ctx = if ty.is_bool() {
                            if promise_mono {
                                ctx.with_b(ctx.b.pos())
                            } else if promise_anti {
                                ctx.with_b(ctx.b.neg())
                            } else {
                                Ctx::mix()
                            }
                        } else {
                            Ctx::mix()
                        };
                        let domain = match env.decls[d].ti.domain {
                            Some(dom) => Some(eval_par(env, dom)?),
                            None => None,
                        };
                        let ti = TypeInst {
                            ty,
                            ranges: env.decls[d].ti.ranges.clone(),
                            domain: None,
                        };
                        let fd = new_flat_var(env, ti, loc.clone());
                        env.decls[d].flat = Some(fd);
                        let ee = flat_exp(env, rhs_ctx, rhs, Some(fd), None)?;
                        ws.push(ee.b);
                        // The declared domain becomes a domain constraint.
                        if let Some(dom) = domain {
                            let id = env.id_expr(fd);
                            let in_e = env.new_expr(
                                ExprKind::BinOp {
                                    op: BinOpKind::In,
                                    lhs: id,
                                    rhs: dom,
                                },
                                Type::var_bool().with_cv(true),
                                loc.clone(),
                            );
                            let dctx = if ctx.b == BCtx::Root {
                                ctx
                            } else {
                                ctx.with_b(ctx.b.pos())
                            };
                            let dee = flat_exp(env, dctx, in_e, None, None)?;
                            ws.push(dee.r);
                        }
                    }
                    None => {
                        let promise_total = env.decls[d].ann.contains("promise_total");
                        if nonpos(ctx.b) && !promise_total {
                            return Err(CompileError::flattening(
                                loc,
                                "free variable in non-positive context",
                            ));
                        }
                        let domain = match env.decls[d].ti.domain {
                            Some(dom) => Some(eval_par(env, dom)?),
                            None => None,
                        };
                        let ti = TypeInst {
                            ty,
                            ranges: env.decls[d].ti.ranges.clone(),
                            domain,
                        };
                        let fd = new_flat_var(env, ti, loc);
                        env.decls[d].flat = Some(fd);
                    }
                }
            }
            LetItem::Constraint(c) => {
                let cee = if ctx.b == BCtx::Root {
                    let vt = env.consts.var_true;
                    flat_exp(env, ctx, *c, Some(vt), None)?
                } else {
                    flat_exp(env, ctx, *c, None, None)?
                };
                // The local constraint's truth joins the definedness.
                if ctx.b != BCtx::Root {
                    ws.push(cee.r);
                }
                ws.push(cee.b);
            }
        }
    }
    let body_ee = flat_exp(env, ctx, l.body, r, None)?;
    ws.push(body_ee.b);
    let bb = conj(env, ctx, b, &ws)?;
    Ok(EE {
        r: body_ee.r,
        b: bb,
    })
}

// ── Calls ───────────────────────────────────────────────────────────────────

fn flatten_call(
    env: &mut Env,
    ctx: Ctx,
    e: ExprId,
    call: &Call,
    r: Option<DeclId>,
    b: Option<DeclId>,
) -> Result<EE> {
    env.check_cancel()?;
    env.push_call_frame(format!("call '{}'", call.name), env.loc(e));
    let out = flatten_call_inner(env, ctx, e, call, r, b);
    env.pop_call_frame();
    out
}

fn comp_arg(env: &Env, arg: ExprId) -> Option<Comprehension> {
    match &env.exprs[arg].kind {
        ExprKind::Comprehension(c) if !c.set => Some((**c).clone()),
        _ => None,
    }
}

fn flatten_call_inner(
    env: &mut Env,
    ctx: Ctx,
    e: ExprId,
    call: &Call,
    r: Option<DeclId>,
    b: Option<DeclId>,
) -> Result<EE> {
    let ids = env.consts.ids.clone();
    match &*call.name {
        "forall" if call.args.len() == 1 => {
            let elems = bool_arg_elems(env, ctx, call.args[0], Surround::Forall)?;
            flatten_forall(env, ctx, e, elems, r, b)
        }
        "exists" if call.args.len() == 1 => {
            let elems = bool_arg_elems(env, ctx, call.args[0], Surround::Exists)?;
            flatten_exists(env, ctx, e, elems, r, b)
        }
        "sum" if call.args.len() == 1 => {
            let ees = match comp_arg(env, call.args[0]) {
                Some(c) => flatten_comp(env, ctx, &c, Surround::Sum)?,
                None => array_arg_elems(env, call.args[0])?
                    .into_iter()
                    .map(|el| flat_exp(env, Ctx::mix(), el, None, None))
                    .collect::<Result<Vec<_>>>()?,
            };
            // Rebuild as a linear expression over the element results.
            let loc = env.loc(e);
            let ty = env.ty(e);
            let mut acc: Option<ExprId> = None;
            for ee in &ees {
                acc = Some(match acc {
                    None => ee.r,
                    Some(a) => env.new_expr(
                        ExprKind::BinOp {
                            op: BinOpKind::Plus,
                            lhs: a,
                            rhs: ee.r,
                        },
                        ty.with_cv(true),
                        loc.clone(),
                    ),
                });
            }
            let sum_e = match acc {
                Some(a) => a,
                None => {
                    if ty.is_float() {
                        env.float_lit(FloatVal::ZERO)
                    } else {
                        env.int_lit(IntVal::ZERO)
                    }
                }
            };
            let mut ws: Vec<ExprId> = ees.iter().map(|ee| ee.b).collect();
            let ee = flat_exp(env, ctx, sum_e, r, None)?;
            ws.push(ee.b);
            let bb = conj(env, ctx, b, &ws)?;
            Ok(EE { r: ee.r, b: bb })
        }
        "bool2int" if call.args.len() == 1 => {
            let a = flat_exp(env, Ctx::mix(), call.args[0], None, None)?;
            if let Some(v) = env.is_bool_lit(env.resolve_id(a.r)) {
                let lit = env.int_lit(IntVal::from(v));
                let rr = bind(env, ctx, r, lit)?;
                let bb = conj(env, ctx, b, &[a.b])?;
                return Ok(EE { r: rr, b: bb });
            }
            let name = ids.bool2int.clone();
            let res = bind_value_call_with_bounds(
                env,
                ctx,
                &name,
                vec![a.r],
                Type::var_int(),
                e,
                r,
                e,
            )?;
            let bb = conj(env, ctx, b, &[a.b, res.b])?;
            Ok(EE { r: res.r, b: bb })
        }
        _ => {
            // General call: flatten arguments, then inline a user body or
            // post a primitive with reification selection.
            let f = call.decl.or_else(|| env.match_fn(&call.name, &call.args));
            let has_body = f.map_or(false, |f| env.functions[f].body.is_some());
            if has_body {
                let f = f.unwrap();
                let params = env.functions[f].params.clone();
                let body = env.functions[f].body.unwrap();
                let mut saved = Vec::new();
                let mut ws = Vec::new();
                for (&p, &a) in params.iter().zip(call.args.iter()) {
                    let ee = flat_exp(env, Ctx::mix(), a, None, None)?;
                    ws.push(ee.b);
                    saved.push((p, env.decls[p].e, env.decls[p].flat, env.decls[p].evaluated));
                    env.decls[p].e = Some(ee.r);
                    env.decls[p].flat = env.decl_of(ee.r);
                    env.decls[p].evaluated = false;
                }
                let result = flat_exp(env, ctx, body, r, None);
                for (p, old_e, old_flat, old_eval) in saved.iter().rev() {
                    env.decls[*p].e = *old_e;
                    env.decls[*p].flat = *old_flat;
                    env.decls[*p].evaluated = *old_eval;
                }
                let ee = result?;
                ws.push(ee.b);
                let bb = conj(env, ctx, b, &ws)?;
                return Ok(EE { r: ee.r, b: bb });
            }

            let ret_ty = env.ty(e);
            let mut flat_args = Vec::with_capacity(call.args.len());
            let mut ws = Vec::with_capacity(call.args.len());
            for &a in &call.args {
                let actx = if env.ty(a).is_bool() {
                    ctx.no_neg().with_b(ctx.b.pos())
                } else {
                    Ctx::mix()
                };
                let ee = flat_exp(env, actx, a, None, None)?;
                flat_args.push(ee.r);
                ws.push(ee.b);
            }
            if ret_ty.is_bool() {
                flatten_call_primitive(env, ctx, e, &call.name, flat_args, r, b, &ws)
            } else {
                let res =
                    bind_value_call_with_bounds(env, ctx, &call.name, flat_args, ret_ty, e, r, e)?;
                ws.push(res.b);
                let bb = conj(env, ctx, b, &ws)?;
                Ok(EE { r: res.r, b: bb })
            }
        }
    }
}

/// Elements of a bool-array argument: a comprehension lowers through
/// flatten_comp, a literal array flattens elementwise.
fn bool_arg_elems(
    env: &mut Env,
    ctx: Ctx,
    arg: ExprId,
    surround: Surround,
) -> Result<Vec<EE>> {
    if let Some(c) = comp_arg(env, arg) {
        return flatten_comp(env, ctx, &c, surround);
    }
    let ectx = match surround {
        Surround::Forall if ctx.b == BCtx::Root => ctx,
        Surround::Exists => ctx.with_b(ctx.b.pos()),
        _ => ctx.with_b(ctx.b.pos()),
    };
    array_arg_elems(env, arg)?
        .into_iter()
        .map(|el| flat_exp(env, ectx, el, None, None))
        .collect()
}

fn array_arg_elems(env: &mut Env, arg: ExprId) -> Result<Vec<ExprId>> {
    let v = env.resolve_id(arg);
    match env.kind(v) {
        ExprKind::ArrayLit(al) => Ok(al.elems),
        ExprKind::Comprehension(_) => {
            let al = crate::eval::eval_array_lit(env, v)?;
            match env.kind(al) {
                ExprKind::ArrayLit(al) => Ok(al.elems),
                _ => Ok(vec![]),
            }
        }
        _ => Err(CompileError::flattening(
            env.loc(arg),
            "expected an array argument",
        )),
    }
}

fn flatten_forall(
    env: &mut Env,
    ctx: Ctx,
    e: ExprId,
    elems: Vec<EE>,
    r: Option<DeclId>,
    b: Option<DeclId>,
) -> Result<EE> {
    let is_root = ctx.b == BCtx::Root && r.map_or(true, |t| t == env.consts.var_true);
    let ws: Vec<ExprId> = elems.iter().map(|ee| ee.b).collect();
    if is_root {
        for ee in &elems {
            let vt = env.consts.var_true;
            bind(env, ctx, Some(vt), ee.r)?;
        }
        let bb = conj(env, ctx, b, &ws)?;
        return Ok(EE {
            r: env.consts.lit_true,
            b: bb,
        });
    }
    let mut lits = Vec::with_capacity(elems.len());
    for ee in &elems {
        match env.is_bool_lit(env.resolve_id(ee.r)) {
            Some(true) => continue,
            Some(false) => {
                let f = env.consts.lit_false;
                let rr = bind(env, ctx, r, f)?;
                let bb = conj(env, ctx, b, &ws)?;
                return Ok(EE { r: rr, b: bb });
            }
            None => lits.push(ee.r),
        }
    }
    if lits.is_empty() {
        let t = env.consts.lit_true;
        let rr = bind(env, ctx, r, t)?;
        let bb = conj(env, ctx, b, &ws)?;
        return Ok(EE { r: rr, b: bb });
    }
    let loc = env.loc(e);
    let arr_ty = env.types.array_type(Type::var_bool(), &[0]);
    let arr = env.new_expr(ExprKind::ArrayLit(ArrayLit::new_1d(lits)), arr_ty, loc);
    let name = env.consts.ids.array_bool_and.clone();
    let res = bind_value_call(env, ctx, &name, vec![arr], Type::var_bool(), e, r)?;
    let mut all_ws = ws;
    all_ws.push(res.b);
    let bb = conj(env, ctx, b, &all_ws)?;
    Ok(EE { r: res.r, b: bb })
}

fn flatten_exists(
    env: &mut Env,
    ctx: Ctx,
    e: ExprId,
    elems: Vec<EE>,
    r: Option<DeclId>,
    b: Option<DeclId>,
) -> Result<EE> {
    let is_root = ctx.b == BCtx::Root && r.map_or(true, |t| t == env.consts.var_true);
    let ws: Vec<ExprId> = elems.iter().map(|ee| ee.b).collect();
    let mut lits = Vec::with_capacity(elems.len());
    for ee in &elems {
        match env.is_bool_lit(env.resolve_id(ee.r)) {
            Some(false) => continue,
            Some(true) => {
                let t = env.consts.lit_true;
                let rr = bind(env, ctx, r, t)?;
                let bb = conj(env, ctx, b, &ws)?;
                return Ok(EE { r: rr, b: bb });
            }
            None => lits.push(ee.r),
        }
    }
    if is_root {
        let cloc = env.loc(e);
        post_clause(env, cloc, lits, vec![])?;
        let bb = conj(env, ctx, b, &ws)?;
        return Ok(EE {
            r: env.consts.lit_true,
            b: bb,
        });
    }
    if lits.is_empty() {
        let f = env.consts.lit_false;
        let rr = bind(env, ctx, r, f)?;
        let bb = conj(env, ctx, b, &ws)?;
        return Ok(EE { r: rr, b: bb });
    }
    let loc = env.loc(e);
    let arr_ty = env.types.array_type(Type::var_bool(), &[0]);
    let arr = env.new_expr(ExprKind::ArrayLit(ArrayLit::new_1d(lits)), arr_ty, loc);
    let name = env.consts.ids.array_bool_or.clone();
    let res = bind_value_call(env, ctx, &name, vec![arr], Type::var_bool(), e, r)?;
    let mut all_ws = ws;
    all_ws.push(res.b);
    let bb = conj(env, ctx, b, &all_ws)?;
    Ok(EE { r: res.r, b: bb })
}

// ── Driver ──────────────────────────────────────────────────────────────────

/// Flatten the environment's source model into its flat model, run the
/// post-pass rewriting loop, and canonicalize for downstream consumption.
/// A model inconsistency leaves the post-fail skeleton in place.
pub fn flatten_model(env: &mut Env) -> Result<()> {
    env.start_pass();

    // Wire assignments into their declarations first.
    let items = env.model.items.clone();
    for &item in &items {
        let kind = env.items[item].kind.clone();
        if let ItemKind::Assign {
            decl: Some(d),
            e,
            name,
        } = kind
        {
            if env.decls[d].e.is_some() {
                return Err(CompileError::type_error(
                    env.items[item].loc.clone(),
                    format!("variable '{name}' is assigned twice"),
                ));
            }
            env.decls[d].e = Some(e);
        }
    }

    let result = flatten_items(env, &items);
    match result {
        Ok(()) => {
            crate::fixpoint::optimize(env)?;
        }
        Err(CompileError::ModelInconsistent) => {
            debug!("model inconsistent; skipping rewriting loops");
        }
        Err(other) => return Err(other),
    }
    crate::fixpoint::finalize(env)?;
    Ok(())
}

fn flatten_items(env: &mut Env, items: &[ItemId]) -> Result<()> {
    let mut seen_solve = false;
    for &item in items {
        env.check_cancel()?;
        let loc = env.items[item].loc.clone();
        env.push_call_frame("item", loc.clone());
        let started = env
            .timing
            .is_enabled()
            .then(std::time::Instant::now);
        let res = flatten_item(env, item, &mut seen_solve);
        if let Some(start) = started {
            env.timing.record(format!("{loc}"), start.elapsed());
        }
        env.pop_call_frame();
        res?;
    }
    // Any toplevel variable not yet reached flattens in mixed context.
    for &item in items {
        if let ItemKind::VarDecl(d) = env.items[item].kind {
            if env.decls[d].ty().is_var() && env.decls[d].flat.is_none() {
                flatten_vardecl(env, d, BCtx::Mix)?;
            }
        }
    }
    // No solve item in the source model: default to satisfy.
    if !seen_solve {
        env.add_flat_item(
            ItemKind::Solve {
                goal: SolveGoal::Satisfy,
                ann: crate::ast::Annotations::new(),
            },
            Location::unknown(),
        );
    }
    Ok(())
}

fn flatten_item(env: &mut Env, item: ItemId, seen_solve: &mut bool) -> Result<()> {
    let kind = env.items[item].kind.clone();
    let loc = env.items[item].loc.clone();
    match kind {
        ItemKind::VarDecl(d) => {
            let ty = env.decls[d].ty();
            if ty.is_par() {
                // Check assigned values against declared domains now.
                if let (Some(_), Some(dom)) = (env.decls[d].e, env.decls[d].ti.domain) {
                    let ok = check_par_domain(env, d, dom);
                    match ok {
                        Ok(true) => {}
                        Ok(false) => {
                            let name = env.decls[d].name.clone();
                            env.warn(
                                loc.clone(),
                                format!("value for '{name}' is outside its declared domain"),
                            );
                            return Err(env.fail("out-of-domain assignment", loc));
                        }
                        Err(err) if err.is_undefined() => {
                            return Err(env.fail("undefined parameter value", loc))
                        }
                        Err(err) => return Err(err),
                    }
                }
                return Ok(());
            }
            // Var declarations flatten lazily at first use, so the use
            // context can drive reification; only output-relevant ones
            // flatten here.
            if env.decls[d].ann.contains("output_var") {
                flatten_vardecl(env, d, BCtx::Mix)?;
            }
            Ok(())
        }
        ItemKind::Constraint(c) => {
            trace!("flattening constraint at {loc}");
            let vt = env.consts.var_true;
            let ee = flat_exp(env, Ctx::root(), c, Some(vt), None)?;
            if env.is_bool_lit(env.resolve_id(ee.b)) == Some(false) {
                return Err(env.fail("constraint is undefined", loc));
            }
            if !matches!(env.is_bool_lit(env.resolve_id(ee.b)), Some(true)) {
                post_constraint(env, ee.b);
            }
            Ok(())
        }
        ItemKind::Solve { goal, ann } => {
            if *seen_solve {
                return Err(CompileError::flattening(loc, "more than one solve item"));
            }
            *seen_solve = true;
            let flat_goal = match goal {
                SolveGoal::Satisfy => SolveGoal::Satisfy,
                SolveGoal::Minimize(obj) => {
                    let ee = flat_exp(env, Ctx::mix(), obj, None, None)?;
                    SolveGoal::Minimize(ee.r)
                }
                SolveGoal::Maximize(obj) => {
                    let ee = flat_exp(env, Ctx::mix(), obj, None, None)?;
                    SolveGoal::Maximize(ee.r)
                }
            };
            env.add_flat_item(ItemKind::Solve { goal: flat_goal, ann }, loc);
            Ok(())
        }
        ItemKind::Output(e) => {
            if env.opts.keep_output_in_fzn {
                env.add_flat_item(ItemKind::Output(e), loc);
            }
            Ok(())
        }
        ItemKind::Assign { .. } | ItemKind::Include(_) | ItemKind::Function(_) => Ok(()),
    }
}

fn check_par_domain(env: &mut Env, d: DeclId, dom: ExprId) -> Result<bool> {
    let ty = env.decls[d].ty();
    let val = crate::eval::eval_decl(env, d)?;
    if ty.is_int() {
        let v = crate::eval::eval_int(env, val)?;
        let s = eval_intset(env, dom)?;
        return Ok(s.contains(&v));
    }
    if ty.is_set() {
        let v = eval_intset(env, val)?;
        let s = eval_intset(env, dom)?;
        return Ok(v.is_subset_of(&s));
    }
    if ty.is_float() {
        let v = crate::eval::eval_float(env, val)?;
        let s = crate::eval::eval_floatset(env, dom)?;
        return Ok(s.contains(v));
    }
    Ok(true)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bctx_polarity_algebra() {
        assert_eq!(BCtx::Root.pos(), BCtx::Pos);
        assert_eq!(BCtx::Root.neg(), BCtx::Neg);
        assert_eq!(BCtx::Neg.neg(), BCtx::Pos);
        assert_eq!(BCtx::Mix.pos(), BCtx::Mix);
        assert!(nonneg(BCtx::Root));
        assert!(nonpos(BCtx::Mix));
    }

    #[test]
    fn ctx_ann_merge_degrades_to_mix() {
        let mut env = Env::default();
        let d = env.new_flat_decl(TypeInst::plain(Type::var_bool()), Location::unknown());
        add_ctx_ann(&mut env, d, BCtx::Pos);
        assert_eq!(ann_to_ctx(&env, d), (BCtx::Pos, true));
        add_ctx_ann(&mut env, d, BCtx::Neg);
        assert_eq!(ann_to_ctx(&env, d), (BCtx::Mix, true));
        // Root subsumes everything.
        add_ctx_ann(&mut env, d, BCtx::Root);
        assert_eq!(ann_to_ctx(&env, d), (BCtx::Root, true));
        add_ctx_ann(&mut env, d, BCtx::Pos);
        assert_eq!(ann_to_ctx(&env, d), (BCtx::Root, true));
    }
}
