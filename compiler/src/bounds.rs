// bounds.rs — Conservative bounds inference for int and float expressions
//
// Post-order visitors returning an interval plus a validity flag. Anything
// outside the covered forms yields `valid = false` with a [0,0] interval;
// callers must check the flag. Par subexpressions evaluate exactly; an
// undefined par subexpression makes the bounds invalid rather than raising.

use std::rc::Rc;

use crate::ast::{BinOpKind, ExprKind, Ident, UnOpKind};
use crate::env::Env;
use crate::eval::{eval_float, eval_int, eval_intset};
use crate::id::ExprId;
use crate::val::{FloatVal, IntSetVal, IntVal};

#[derive(Debug, Clone, PartialEq)]
pub struct IntBounds {
    pub l: IntVal,
    pub u: IntVal,
    pub valid: bool,
}

impl IntBounds {
    pub fn new(l: IntVal, u: IntVal) -> Self {
        IntBounds { l, u, valid: true }
    }

    pub fn invalid() -> Self {
        IntBounds {
            l: IntVal::ZERO,
            u: IntVal::ZERO,
            valid: false,
        }
    }

    pub fn exact(v: IntVal) -> Self {
        IntBounds::new(v.clone(), v)
    }

    pub fn unbounded() -> Self {
        IntBounds::new(IntVal::InfNeg, IntVal::InfPos)
    }

    fn union(self, other: IntBounds) -> IntBounds {
        if !self.valid || !other.valid {
            return IntBounds::invalid();
        }
        IntBounds::new(self.l.min(other.l), self.u.max(other.u))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloatBounds {
    pub l: FloatVal,
    pub u: FloatVal,
    pub valid: bool,
}

impl FloatBounds {
    pub fn new(l: FloatVal, u: FloatVal) -> Self {
        FloatBounds { l, u, valid: true }
    }

    pub fn invalid() -> Self {
        FloatBounds {
            l: FloatVal::ZERO,
            u: FloatVal::ZERO,
            valid: false,
        }
    }

    pub fn exact(v: FloatVal) -> Self {
        FloatBounds::new(v, v)
    }

    fn union(self, other: FloatBounds) -> FloatBounds {
        if !self.valid || !other.valid {
            return FloatBounds::invalid();
        }
        FloatBounds::new(self.l.min(other.l), self.u.max(other.u))
    }
}

// ── Integer bounds ──────────────────────────────────────────────────────────

pub fn compute_int_bounds(env: &mut Env, e: ExprId) -> IntBounds {
    let ty = env.ty(e);
    // Statically known: evaluate exactly.
    if ty.is_par() && !ty.cv && ty.is_int() {
        return match eval_int(env, e) {
            Ok(v) => IntBounds::exact(v),
            Err(_) => IntBounds::invalid(),
        };
    }
    match env.kind(e) {
        ExprKind::IntLit(v) => IntBounds::exact(v),
        ExprKind::BoolLit(b) => IntBounds::exact(IntVal::from(b)),
        ExprKind::Id(Ident { decl: Some(d), .. }) => {
            if let Some(def) = env.decls[d].e {
                if env.decls[d].ty().is_par() {
                    return compute_int_bounds(env, def);
                }
            }
            match env.decls[d].ti.domain {
                Some(dom) => match eval_intset(env, dom) {
                    Ok(s) => match (s.min(), s.max()) {
                        (Some(l), Some(u)) => IntBounds::new(l, u),
                        _ => IntBounds::invalid(),
                    },
                    Err(_) => IntBounds::invalid(),
                },
                None => IntBounds::unbounded(),
            }
        }
        ExprKind::UnOp { op, expr } => {
            let b = compute_int_bounds(env, expr);
            if !b.valid {
                return IntBounds::invalid();
            }
            match op {
                UnOpKind::Plus => b,
                UnOpKind::Minus => {
                    let (l, u) = (b.u.neg(), b.l.neg());
                    IntBounds::new(l, u)
                }
                UnOpKind::Not => IntBounds::invalid(),
            }
        }
        ExprKind::BinOp { op, lhs, rhs } => {
            let a = compute_int_bounds(env, lhs);
            let b = compute_int_bounds(env, rhs);
            if !a.valid || !b.valid {
                return IntBounds::invalid();
            }
            int_binop_bounds(op, a, b)
        }
        ExprKind::Ite(ite) => {
            // Pick the branch eagerly when the condition is par and cv-free.
            for &(cond, then) in &ite.branches {
                let cty = env.ty(cond);
                if cty.is_par() && !cty.cv {
                    match crate::eval::eval_bool(env, cond) {
                        Ok(true) => return compute_int_bounds(env, then),
                        Ok(false) => continue,
                        Err(_) => return IntBounds::invalid(),
                    }
                }
                // Var condition: union over all remaining branches.
                let mut acc = compute_int_bounds(env, then);
                for &(_, t) in ite.branches.iter().skip_while(|&&(c, _)| c != cond).skip(1) {
                    acc = acc.union(compute_int_bounds(env, t));
                }
                if let Some(els) = ite.else_expr {
                    acc = acc.union(compute_int_bounds(env, els));
                }
                return acc;
            }
            match ite.else_expr {
                Some(els) => compute_int_bounds(env, els),
                None => IntBounds::invalid(),
            }
        }
        ExprKind::ArrayAccess { array, idx } => {
            let all_par = idx.iter().all(|&i| {
                let t = env.ty(i);
                t.is_par() && !t.cv
            });
            if !all_par {
                return IntBounds::invalid();
            }
            match crate::eval::eval_arrayaccess(env, e) {
                Ok(el) => compute_int_bounds(env, el),
                Err(_) => IntBounds::invalid(),
            }
        }
        ExprKind::Call(c) => int_call_bounds(env, e, &c.name, &c.args, c.decl),
        _ => IntBounds::invalid(),
    }
}

fn corners(
    a: &IntBounds,
    b: &IntBounds,
    f: impl Fn(&IntVal, &IntVal) -> Result<IntVal, crate::val::ArithError>,
) -> IntBounds {
    let mut lo: Option<IntVal> = None;
    let mut hi: Option<IntVal> = None;
    for x in [&a.l, &a.u] {
        for y in [&b.l, &b.u] {
            match f(x, y) {
                Ok(v) => {
                    lo = Some(match lo {
                        None => v.clone(),
                        Some(l) => IntVal::min(&l, &v),
                    });
                    hi = Some(match hi {
                        None => v,
                        Some(h) => IntVal::max(&h, &v),
                    });
                }
                Err(_) => return IntBounds::invalid(),
            }
        }
    }
    match (lo, hi) {
        (Some(l), Some(u)) => IntBounds::new(l, u),
        _ => IntBounds::invalid(),
    }
}

fn int_binop_bounds(op: BinOpKind, a: IntBounds, b: IntBounds) -> IntBounds {
    use BinOpKind::*;
    match op {
        Plus => match (a.l.add(&b.l), a.u.add(&b.u)) {
            (Ok(l), Ok(u)) => IntBounds::new(l, u),
            _ => IntBounds::invalid(),
        },
        Minus => match (a.l.sub(&b.u), a.u.sub(&b.l)) {
            (Ok(l), Ok(u)) => IntBounds::new(l, u),
            _ => IntBounds::invalid(),
        },
        Mult => corners(&a, &b, |x, y| x.mul(y)),
        IDiv => {
            // Replace zero corners by ±1 before the corner quotients.
            let bl = if b.l == IntVal::ZERO {
                IntVal::ONE
            } else {
                b.l.clone()
            };
            let bu = if b.u == IntVal::ZERO {
                IntVal::Int(-1)
            } else {
                b.u.clone()
            };
            let (bl, bu) = if bl <= bu { (bl, bu) } else { (bu, bl) };
            corners(&a, &IntBounds::new(bl, bu), |x, y| {
                if *y == IntVal::ZERO {
                    Ok(IntVal::ZERO)
                } else {
                    x.div(y)
                }
            })
        }
        Mod => {
            // |result| < |divisor|; sign follows the dividend.
            let m = b.l.abs().max(b.u.abs());
            let m1 = match m.sub(&IntVal::ONE) {
                Ok(v) => v,
                Err(_) => return IntBounds::invalid(),
            };
            let lo = if a.l < IntVal::ZERO {
                m1.neg()
            } else {
                IntVal::ZERO
            };
            let hi = if a.u > IntVal::ZERO { m1 } else { IntVal::ZERO };
            IntBounds::new(lo, hi)
        }
        _ => IntBounds::invalid(),
    }
}

fn int_call_bounds(
    env: &mut Env,
    _e: ExprId,
    name: &str,
    args: &[ExprId],
    decl: Option<crate::id::FnId>,
) -> IntBounds {
    match (name, args) {
        ("abs", [x]) => {
            let b = compute_int_bounds(env, *x);
            if !b.valid {
                return IntBounds::invalid();
            }
            let (al, au) = (b.l.abs(), b.u.abs());
            if b.l <= IntVal::ZERO && b.u >= IntVal::ZERO {
                IntBounds::new(IntVal::ZERO, al.max(au))
            } else {
                IntBounds::new(IntVal::min(&al, &au), IntVal::max(&al, &au))
            }
        }
        ("bool2int", [_]) => IntBounds::new(IntVal::ZERO, IntVal::ONE),
        ("lin_exp", [coeffs, vars, constant]) => {
            lin_exp_int_bounds(env, *coeffs, *vars, Some(*constant))
        }
        ("sum", [arr]) => lin_exp_int_bounds(env, *arr, *arr, None),
        _ => {
            // A declared codomain supplies the call's bounds.
            let f = match decl.or_else(|| env.match_fn(name, args)) {
                Some(f) => f,
                None => return IntBounds::invalid(),
            };
            match env.functions[f].ret.domain {
                Some(dom) => match eval_intset(env, dom) {
                    Ok(s) => match (s.min(), s.max()) {
                        (Some(l), Some(u)) => IntBounds::new(l, u),
                        _ => IntBounds::invalid(),
                    },
                    Err(_) => IntBounds::invalid(),
                },
                None => IntBounds::invalid(),
            }
        }
    }
}

/// Dot-product bounds for `lin_exp(c, x, d)`; for `sum`, both arguments are
/// the element array and every coefficient is 1.
fn lin_exp_int_bounds(
    env: &mut Env,
    coeffs: ExprId,
    vars: ExprId,
    constant: Option<ExprId>,
) -> IntBounds {
    let is_sum = constant.is_none();
    let vars_al = match crate::eval::eval_array_lit(env, vars) {
        Ok(al) => al,
        Err(_) => return IntBounds::invalid(),
    };
    let elems = match env.kind(vars_al) {
        ExprKind::ArrayLit(al) => al.elems,
        _ => return IntBounds::invalid(),
    };
    let cs: Vec<IntVal> = if is_sum {
        vec![IntVal::ONE; elems.len()]
    } else {
        let al = match crate::eval::eval_array_lit(env, coeffs) {
            Ok(al) => al,
            Err(_) => return IntBounds::invalid(),
        };
        let celems = match env.kind(al) {
            ExprKind::ArrayLit(al) => al.elems,
            _ => return IntBounds::invalid(),
        };
        let mut cs = Vec::with_capacity(celems.len());
        for c in celems {
            match eval_int(env, c) {
                Ok(v) => cs.push(v),
                Err(_) => return IntBounds::invalid(),
            }
        }
        cs
    };
    if cs.len() != elems.len() {
        return IntBounds::invalid();
    }
    let mut lo = IntVal::ZERO;
    let mut hi = IntVal::ZERO;
    for (c, &x) in cs.iter().zip(elems.iter()) {
        let b = compute_int_bounds(env, x);
        if !b.valid {
            return IntBounds::invalid();
        }
        // Signs matter: a negative coefficient swaps the contribution.
        let (cl, cu) = if *c >= IntVal::ZERO {
            (&b.l, &b.u)
        } else {
            (&b.u, &b.l)
        };
        let (tl, tu) = match (c.mul(cl), c.mul(cu)) {
            (Ok(x), Ok(y)) => (x, y),
            _ => return IntBounds::invalid(),
        };
        match (lo.add(&tl), hi.add(&tu)) {
            (Ok(l), Ok(u)) => {
                lo = l;
                hi = u;
            }
            _ => return IntBounds::invalid(),
        }
    }
    if let Some(k) = constant {
        match eval_int(env, k) {
            Ok(v) => match (lo.add(&v), hi.add(&v)) {
                (Ok(l), Ok(u)) => {
                    lo = l;
                    hi = u;
                }
                _ => return IntBounds::invalid(),
            },
            Err(_) => return IntBounds::invalid(),
        }
    }
    IntBounds::new(lo, hi)
}

// ── Float bounds ────────────────────────────────────────────────────────────

pub fn compute_float_bounds(env: &mut Env, e: ExprId) -> FloatBounds {
    let ty = env.ty(e);
    if ty.is_par() && !ty.cv && (ty.is_float() || ty.is_int()) {
        return match eval_float(env, e) {
            Ok(v) => FloatBounds::exact(v),
            Err(_) => FloatBounds::invalid(),
        };
    }
    match env.kind(e) {
        ExprKind::FloatLit(v) => FloatBounds::exact(v),
        ExprKind::IntLit(v) => FloatBounds::exact(v.to_float()),
        ExprKind::Id(Ident { decl: Some(d), .. }) => {
            if let Some(def) = env.decls[d].e {
                if env.decls[d].ty().is_par() {
                    return compute_float_bounds(env, def);
                }
            }
            match env.decls[d].ti.domain {
                Some(dom) => match crate::eval::eval_floatset(env, dom) {
                    Ok(s) => match (s.min(), s.max()) {
                        (Some(l), Some(u)) => FloatBounds::new(l, u),
                        _ => FloatBounds::invalid(),
                    },
                    Err(_) => FloatBounds::invalid(),
                },
                None => FloatBounds::new(FloatVal::NEG_INFINITY, FloatVal::INFINITY),
            }
        }
        ExprKind::UnOp { op, expr } => {
            let b = compute_float_bounds(env, expr);
            if !b.valid {
                return FloatBounds::invalid();
            }
            match op {
                UnOpKind::Plus => b,
                UnOpKind::Minus => FloatBounds::new(-b.u, -b.l),
                UnOpKind::Not => FloatBounds::invalid(),
            }
        }
        ExprKind::BinOp { op, lhs, rhs } => {
            let a = compute_float_bounds(env, lhs);
            let b = compute_float_bounds(env, rhs);
            if !a.valid || !b.valid {
                return FloatBounds::invalid();
            }
            use BinOpKind::*;
            match op {
                Plus => FloatBounds::new(a.l + b.l, a.u + b.u),
                Minus => FloatBounds::new(a.l - b.u, a.u - b.l),
                Mult => {
                    let cands = [a.l * b.l, a.l * b.u, a.u * b.l, a.u * b.u];
                    let mut lo = cands[0];
                    let mut hi = cands[0];
                    for &c in &cands[1..] {
                        lo = lo.min(c);
                        hi = hi.max(c);
                    }
                    FloatBounds::new(lo, hi)
                }
                _ => FloatBounds::invalid(),
            }
        }
        ExprKind::Ite(ite) => {
            let mut acc: Option<FloatBounds> = None;
            for &(cond, then) in &ite.branches {
                let cty = env.ty(cond);
                if cty.is_par() && !cty.cv {
                    match crate::eval::eval_bool(env, cond) {
                        Ok(true) => return compute_float_bounds(env, then),
                        Ok(false) => continue,
                        Err(_) => return FloatBounds::invalid(),
                    }
                }
                let b = compute_float_bounds(env, then);
                acc = Some(acc.map_or(b, |x| x.union(b)));
            }
            let els = match ite.else_expr {
                Some(els) => compute_float_bounds(env, els),
                None => return FloatBounds::invalid(),
            };
            match acc {
                Some(x) => x.union(els),
                None => els,
            }
        }
        ExprKind::Call(c) => match (&*c.name, c.args.as_slice()) {
            ("int2float", [x]) => {
                let b = compute_int_bounds(env, *x);
                if b.valid {
                    FloatBounds::new(b.l.to_float(), b.u.to_float())
                } else {
                    FloatBounds::invalid()
                }
            }
            ("abs", [x]) => {
                let b = compute_float_bounds(env, *x);
                if !b.valid {
                    return FloatBounds::invalid();
                }
                let (al, au) = (
                    FloatVal::new(b.l.value().abs()),
                    FloatVal::new(b.u.value().abs()),
                );
                if b.l <= FloatVal::ZERO && b.u >= FloatVal::ZERO {
                    FloatBounds::new(FloatVal::ZERO, al.max(au))
                } else {
                    FloatBounds::new(al.min(au), al.max(au))
                }
            }
            ("lin_exp", [coeffs, vars, constant]) => {
                lin_exp_float_bounds(env, *coeffs, *vars, Some(*constant))
            }
            ("sum", [arr]) => lin_exp_float_bounds(env, *arr, *arr, None),
            _ => {
                let f = match c.decl.or_else(|| env.match_fn(&c.name, &c.args)) {
                    Some(f) => f,
                    None => return FloatBounds::invalid(),
                };
                match env.functions[f].ret.domain {
                    Some(dom) => match crate::eval::eval_floatset(env, dom) {
                        Ok(s) => match (s.min(), s.max()) {
                            (Some(l), Some(u)) => FloatBounds::new(l, u),
                            _ => FloatBounds::invalid(),
                        },
                        Err(_) => FloatBounds::invalid(),
                    },
                    None => FloatBounds::invalid(),
                }
            }
        },
        _ => FloatBounds::invalid(),
    }
}

fn lin_exp_float_bounds(
    env: &mut Env,
    coeffs: ExprId,
    vars: ExprId,
    constant: Option<ExprId>,
) -> FloatBounds {
    let is_sum = constant.is_none();
    let vars_al = match crate::eval::eval_array_lit(env, vars) {
        Ok(al) => al,
        Err(_) => return FloatBounds::invalid(),
    };
    let elems = match env.kind(vars_al) {
        ExprKind::ArrayLit(al) => al.elems,
        _ => return FloatBounds::invalid(),
    };
    let cs: Vec<FloatVal> = if is_sum {
        vec![FloatVal::new(1.0); elems.len()]
    } else {
        let al = match crate::eval::eval_array_lit(env, coeffs) {
            Ok(al) => al,
            Err(_) => return FloatBounds::invalid(),
        };
        let celems = match env.kind(al) {
            ExprKind::ArrayLit(al) => al.elems,
            _ => return FloatBounds::invalid(),
        };
        let mut cs = Vec::with_capacity(celems.len());
        for c in celems {
            match eval_float(env, c) {
                Ok(v) => cs.push(v),
                Err(_) => return FloatBounds::invalid(),
            }
        }
        cs
    };
    if cs.len() != elems.len() {
        return FloatBounds::invalid();
    }
    let mut lo = FloatVal::ZERO;
    let mut hi = FloatVal::ZERO;
    for (&c, &x) in cs.iter().zip(elems.iter()) {
        let b = compute_float_bounds(env, x);
        if !b.valid {
            return FloatBounds::invalid();
        }
        let (cl, cu) = if c >= FloatVal::ZERO { (b.l, b.u) } else { (b.u, b.l) };
        lo = lo + c * cl;
        hi = hi + c * cu;
    }
    if let Some(k) = constant {
        match eval_float(env, k) {
            Ok(v) => {
                lo = lo + v;
                hi = hi + v;
            }
            Err(_) => return FloatBounds::invalid(),
        }
    }
    FloatBounds::new(lo, hi)
}

// ── Set-of-int bounds ───────────────────────────────────────────────────────

/// Upper-bound set of a (possibly var) set expression, or None when no
/// bound can be determined.
pub fn compute_intset_bounds(env: &mut Env, e: ExprId) -> Option<Rc<IntSetVal>> {
    let ty = env.ty(e);
    if ty.is_par() && !ty.cv {
        return eval_intset(env, e).ok();
    }
    match env.kind(e) {
        ExprKind::Id(Ident { decl: Some(d), .. }) => {
            if let Some(def) = env.decls[d].e {
                if let Some(b) = compute_intset_bounds(env, def) {
                    return Some(b);
                }
            }
            let dom = env.decls[d].ti.domain?;
            eval_intset(env, dom).ok()
        }
        ExprKind::SetLit(sl) => {
            if let Some(isv) = sl.isv {
                return Some(isv);
            }
            // Union of element bounds.
            let mut acc = IntSetVal::empty();
            for el in sl.elems {
                let b = compute_int_bounds(env, el);
                if !b.valid {
                    return None;
                }
                acc = acc.union(&IntSetVal::from_range(b.l, b.u));
            }
            Some(Rc::new(acc))
        }
        ExprKind::BinOp { op, lhs, rhs } => {
            let a = compute_intset_bounds(env, lhs);
            let b = compute_intset_bounds(env, rhs);
            use BinOpKind::*;
            match op {
                Union => Some(Rc::new(a?.union(b?.as_ref()))),
                Intersect => match (a, b) {
                    (Some(a), Some(b)) => Some(Rc::new(a.intersect(&b))),
                    (Some(a), None) => Some(a),
                    (None, Some(b)) => Some(b),
                    (None, None) => None,
                },
                Diff => a,
                DotDot => {
                    let la = compute_int_bounds(env, lhs);
                    let ub = compute_int_bounds(env, rhs);
                    if la.valid && ub.valid {
                        Some(Rc::new(IntSetVal::from_range(la.l, ub.u)))
                    } else {
                        None
                    }
                }
                _ => None,
            }
        }
        _ => None,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Location, TypeInst};
    use crate::ty::Type;

    fn var_with_domain(env: &mut Env, lo: i64, hi: i64) -> crate::id::DeclId {
        let l = env.int_lit(IntVal::Int(lo));
        let h = env.int_lit(IntVal::Int(hi));
        let dom = env.new_expr(
            ExprKind::BinOp {
                op: BinOpKind::DotDot,
                lhs: l,
                rhs: h,
            },
            Type::par_set_int(),
            Location::unknown(),
        );
        env.new_decl(
            TypeInst::with_domain(Type::var_int(), dom),
            "v".into(),
            None,
            Location::unknown(),
        )
    }

    #[test]
    fn identifier_bounds_from_domain() {
        let mut env = Env::default();
        let d = var_with_domain(&mut env, 0, 10);
        let id = env.id_expr(d);
        let b = compute_int_bounds(&mut env, id);
        assert!(b.valid);
        assert_eq!((b.l, b.u), (IntVal::Int(0), IntVal::Int(10)));
    }

    #[test]
    fn addition_and_multiplication_corners() {
        let mut env = Env::default();
        let dx = var_with_domain(&mut env, -2, 3);
        let dy = var_with_domain(&mut env, 4, 5);
        let x = env.id_expr(dx);
        let y = env.id_expr(dy);
        let plus = env.new_expr(
            ExprKind::BinOp {
                op: BinOpKind::Plus,
                lhs: x,
                rhs: y,
            },
            Type::var_int(),
            Location::unknown(),
        );
        let b = compute_int_bounds(&mut env, plus);
        assert_eq!((b.l, b.u), (IntVal::Int(2), IntVal::Int(8)));
        let x2 = env.id_expr(dx);
        let y2 = env.id_expr(dy);
        let mult = env.new_expr(
            ExprKind::BinOp {
                op: BinOpKind::Mult,
                lhs: x2,
                rhs: y2,
            },
            Type::var_int(),
            Location::unknown(),
        );
        let b = compute_int_bounds(&mut env, mult);
        assert_eq!((b.l, b.u), (IntVal::Int(-10), IntVal::Int(15)));
    }

    #[test]
    fn division_replaces_zero_corners() {
        let mut env = Env::default();
        let dx = var_with_domain(&mut env, 10, 20);
        let dy = var_with_domain(&mut env, 0, 5);
        let x = env.id_expr(dx);
        let y = env.id_expr(dy);
        let div = env.new_expr(
            ExprKind::BinOp {
                op: BinOpKind::IDiv,
                lhs: x,
                rhs: y,
            },
            Type::var_int(),
            Location::unknown(),
        );
        let b = compute_int_bounds(&mut env, div);
        assert!(b.valid);
        assert_eq!((b.l, b.u), (IntVal::Int(2), IntVal::Int(20)));
    }

    #[test]
    fn lin_exp_dot_product() {
        let mut env = Env::default();
        let dx = var_with_domain(&mut env, 0, 10);
        let dy = var_with_domain(&mut env, 0, 10);
        let x = env.id_expr(dx);
        let y = env.id_expr(dy);
        let c2 = env.int_lit(IntVal::Int(2));
        let c1 = env.int_lit(IntVal::Int(1));
        let k = env.int_lit(IntVal::ZERO);
        let coeffs_ty = env.types.array_type(Type::par_int(), &[0]);
        let vars_ty = env.types.array_type(Type::var_int(), &[0]);
        let coeffs = env.new_expr(
            ExprKind::ArrayLit(crate::ast::ArrayLit::new_1d(vec![c2, c1])),
            coeffs_ty,
            Location::unknown(),
        );
        let vars = env.new_expr(
            ExprKind::ArrayLit(crate::ast::ArrayLit::new_1d(vec![x, y])),
            vars_ty,
            Location::unknown(),
        );
        let call = env.new_expr(
            ExprKind::Call(crate::ast::Call {
                name: "lin_exp".into(),
                args: vec![coeffs, vars, k],
                decl: None,
            }),
            Type::var_int(),
            Location::unknown(),
        );
        let b = compute_int_bounds(&mut env, call);
        assert!(b.valid);
        assert_eq!((b.l, b.u), (IntVal::Int(0), IntVal::Int(30)));
    }

    #[test]
    fn uncovered_forms_are_invalid() {
        let mut env = Env::default();
        let s = env.str_lit("hi");
        let b = compute_int_bounds(&mut env, s);
        assert!(!b.valid);
        assert_eq!((b.l, b.u), (IntVal::ZERO, IntVal::ZERO));
    }

    #[test]
    fn var_set_bounds_from_domain() {
        let mut env = Env::default();
        let one = env.int_lit(IntVal::Int(1));
        let five = env.int_lit(IntVal::Int(5));
        let dom = env.new_expr(
            ExprKind::BinOp {
                op: BinOpKind::DotDot,
                lhs: one,
                rhs: five,
            },
            Type::par_set_int(),
            Location::unknown(),
        );
        let d = env.new_decl(
            TypeInst::with_domain(Type::var_set_int(), dom),
            "S".into(),
            None,
            Location::unknown(),
        );
        let id = env.id_expr(d);
        let b = compute_intset_bounds(&mut env, id).unwrap();
        assert_eq!(*b, IntSetVal::from_range(IntVal::Int(1), IntVal::Int(5)));
    }
}
