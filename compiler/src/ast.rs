// ast.rs — Expression and item nodes of the Tern model representation
//
// Nodes are stored in arenas owned by the environment and referenced by
// typed indices (see id.rs). The expression graph is a DAG; the only cycles
// in the user-facing constraint graph run through `Id -> VarDecl ->
// defining expression`, and those are broken here because an `Id` stores a
// `DeclId` that structural traversal never follows.

use std::hash::{Hash, Hasher};
use std::rc::Rc;

use rustc_hash::FxHasher;
use smallvec::SmallVec;

use crate::arena::Arena;
use crate::id::{DeclId, ExprId, FnId, ItemId};
use crate::ty::Type;
use crate::val::{FloatSetVal, FloatVal, IntSetVal, IntVal};

// ── Locations ───────────────────────────────────────────────────────────────

/// A source position. Introduced nodes keep the position of the construct
/// they were derived from, with the `introduced` flag set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub file: Rc<str>,
    pub line: u32,
    pub column: u32,
    pub introduced: bool,
}

impl Location {
    pub fn new(file: Rc<str>, line: u32, column: u32) -> Self {
        Location {
            file,
            line,
            column,
            introduced: false,
        }
    }

    pub fn unknown() -> Self {
        Location::new("".into(), 0, 0)
    }

    pub fn introduce(&self) -> Self {
        let mut loc = self.clone();
        loc.introduced = true;
        loc
    }

    pub fn is_unknown(&self) -> bool {
        self.file.is_empty() && self.line == 0
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unknown() {
            write!(f, "<unknown>")
        } else {
            write!(f, "{}:{}.{}", self.file, self.line, self.column)
        }
    }
}

// ── Annotations ─────────────────────────────────────────────────────────────

/// Annotation set on a node or declaration. Atom annotations (`::pos`,
/// `::output_var`, ...) are interned names; structured annotations
/// (`::defines_var(x)`, path annotations) are expressions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    pub idents: Vec<Rc<str>>,
    pub exprs: Vec<ExprId>,
}

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.idents.iter().any(|a| &**a == name)
    }

    pub fn add(&mut self, name: Rc<str>) {
        if !self.contains(&name) {
            self.idents.push(name);
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.idents.retain(|a| &**a != name);
    }

    pub fn add_expr(&mut self, e: ExprId) {
        if !self.exprs.contains(&e) {
            self.exprs.push(e);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.idents.is_empty() && self.exprs.is_empty()
    }

    pub fn clear(&mut self) {
        self.idents.clear();
        self.exprs.clear();
    }
}

// ── Operators ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOpKind {
    Plus,
    Minus,
    Mult,
    Div,
    IDiv,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Subset,
    Superset,
    Union,
    Diff,
    SymDiff,
    Intersect,
    DotDot,
    PlusPlus,
    And,
    Or,
    Xor,
    Impl,
    RImpl,
    Equiv,
}

impl BinOpKind {
    pub fn op_str(self) -> &'static str {
        use BinOpKind::*;
        match self {
            Plus => "+",
            Minus => "-",
            Mult => "*",
            Div => "/",
            IDiv => "div",
            Mod => "mod",
            Pow => "^",
            Eq => "=",
            Ne => "!=",
            Lt => "<",
            Le => "<=",
            Gt => ">",
            Ge => ">=",
            In => "in",
            Subset => "subset",
            Superset => "superset",
            Union => "union",
            Diff => "diff",
            SymDiff => "symdiff",
            Intersect => "intersect",
            DotDot => "..",
            PlusPlus => "++",
            And => "/\\",
            Or => "\\/",
            Xor => "xor",
            Impl => "->",
            RImpl => "<-",
            Equiv => "<->",
        }
    }

    pub fn is_logical(self) -> bool {
        use BinOpKind::*;
        matches!(self, And | Or | Xor | Impl | RImpl | Equiv)
    }

    pub fn is_comparison(self) -> bool {
        use BinOpKind::*;
        matches!(self, Eq | Ne | Lt | Le | Gt | Ge)
    }

    /// Mirror a comparison across swapped operands (`a > b` to `b < a`).
    pub fn swapped(self) -> BinOpKind {
        use BinOpKind::*;
        match self {
            Lt => Gt,
            Le => Ge,
            Gt => Lt,
            Ge => Le,
            Impl => RImpl,
            RImpl => Impl,
            other => other,
        }
    }

    /// Negation of a comparison (`a < b` to `a >= b`).
    pub fn negated(self) -> Option<BinOpKind> {
        use BinOpKind::*;
        Some(match self {
            Eq => Ne,
            Ne => Eq,
            Lt => Ge,
            Le => Gt,
            Gt => Le,
            Ge => Lt,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOpKind {
    Not,
    Minus,
    Plus,
}

impl UnOpKind {
    pub fn op_str(self) -> &'static str {
        match self {
            UnOpKind::Not => "not",
            UnOpKind::Minus => "-",
            UnOpKind::Plus => "+",
        }
    }
}

// ── Expressions ─────────────────────────────────────────────────────────────

/// An expression node: kind plus the location, type, and annotations every
/// node carries.
#[derive(Debug, Clone)]
pub struct ExprNode {
    pub kind: ExprKind,
    pub ty: Type,
    pub loc: Location,
    pub ann: Annotations,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    IntLit(IntVal),
    FloatLit(FloatVal),
    BoolLit(bool),
    StringLit(Rc<str>),
    /// The absent value `<>` of an opt type.
    Absent,
    SetLit(SetLit),
    ArrayLit(ArrayLit),
    Id(Ident),
    /// `_` — a fresh anonymous decision variable.
    AnonVar,
    Comprehension(Box<Comprehension>),
    ArrayAccess {
        array: ExprId,
        idx: Vec<ExprId>,
    },
    /// Tuple/record field projection; `field` is the 0-based index into the
    /// sorted field list of the carrier's registered type.
    FieldAccess {
        base: ExprId,
        field: u32,
    },
    Ite(Box<Ite>),
    BinOp {
        op: BinOpKind,
        lhs: ExprId,
        rhs: ExprId,
    },
    UnOp {
        op: UnOpKind,
        expr: ExprId,
    },
    Call(Call),
    Let(Box<Let>),
    /// A type-inst occurring in expression position (array ranges in
    /// signatures); also the payload of every VarDecl.
    TypeInst(TypeInst),
    /// A type-inst variable `$T` inside a polymorphic signature.
    TiId(Rc<str>),
}

/// A set literal: either an evaluated value or a syntactic element list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SetLit {
    pub isv: Option<Rc<IntSetVal>>,
    pub fsv: Option<Rc<FloatSetVal>>,
    pub elems: Vec<ExprId>,
}

impl SetLit {
    pub fn from_isv(isv: Rc<IntSetVal>) -> Self {
        SetLit {
            isv: Some(isv),
            fsv: None,
            elems: Vec::new(),
        }
    }

    pub fn from_fsv(fsv: Rc<FloatSetVal>) -> Self {
        SetLit {
            isv: None,
            fsv: Some(fsv),
            elems: Vec::new(),
        }
    }
}

/// An array literal. Rectangular; `dims` holds the inclusive index bounds
/// per dimension. Tuple and record literals reuse this node with the
/// carrier type on the owning ExprNode identifying the field shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayLit {
    pub elems: Vec<ExprId>,
    pub dims: SmallVec<[(i64, i64); 2]>,
    /// Set once the literal has been lowered to flat form.
    pub flat: bool,
}

impl ArrayLit {
    pub fn new_1d(elems: Vec<ExprId>) -> Self {
        let n = elems.len() as i64;
        ArrayLit {
            elems,
            dims: SmallVec::from_slice(&[(1, n)]),
            flat: false,
        }
    }

    pub fn with_dims(elems: Vec<ExprId>, dims: Vec<(i64, i64)>) -> Self {
        ArrayLit {
            elems,
            dims: SmallVec::from_vec(dims),
            flat: false,
        }
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn min(&self, dim: usize) -> i64 {
        self.dims[dim].0
    }

    pub fn max(&self, dim: usize) -> i64 {
        self.dims[dim].1
    }

    pub fn dim_size(&self, dim: usize) -> i64 {
        let (lo, hi) = self.dims[dim];
        if hi < lo {
            0
        } else {
            hi - lo + 1
        }
    }
}

/// An identifier; `decl` is a by-reference handle that structural traversal
/// does not follow.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: Rc<str>,
    pub decl: Option<DeclId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub body: ExprId,
    pub gens: Vec<Generator>,
    pub set: bool,
}

/// One generator `i, j in e where c`. An `in_expr` of None is an assignment
/// generator whose single declaration carries its own defining expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Generator {
    pub decls: Vec<DeclId>,
    pub in_expr: Option<ExprId>,
    pub where_expr: Option<ExprId>,
}

/// If-then-elseif-else chain. `else_expr` may be absent only when the
/// branches yield bool (missing else defaults to true).
#[derive(Debug, Clone, PartialEq)]
pub struct Ite {
    pub branches: Vec<(ExprId, ExprId)>,
    pub else_expr: Option<ExprId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: Rc<str>,
    pub args: Vec<ExprId>,
    pub decl: Option<FnId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Let {
    pub items: Vec<LetItem>,
    pub body: ExprId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LetItem {
    Decl(DeclId),
    Constraint(ExprId),
}

/// Declared type plus index ranges and an optional domain expression.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeInst {
    pub ty: Type,
    pub ranges: Vec<ExprId>,
    pub domain: Option<ExprId>,
}

impl TypeInst {
    pub fn plain(ty: Type) -> Self {
        TypeInst {
            ty,
            ranges: Vec::new(),
            domain: None,
        }
    }

    pub fn with_domain(ty: Type, domain: ExprId) -> Self {
        TypeInst {
            ty,
            ranges: Vec::new(),
            domain: Some(domain),
        }
    }
}

// ── Variable declarations ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct VarDeclData {
    pub ti: TypeInst,
    pub name: Rc<str>,
    /// Defining expression, if any.
    pub e: Option<ExprId>,
    pub ann: Annotations,
    /// Self, or the flat-model declaration this one was unified with.
    pub flat: Option<DeclId>,
    pub introduced: bool,
    pub toplevel: bool,
    /// Set once the defining expression has been replaced by its canonical
    /// literal form by the evaluator.
    pub evaluated: bool,
    pub removed: bool,
    pub loc: Location,
    /// Item in the flat model owning this declaration, when flat.
    pub item: Option<ItemId>,
}

impl VarDeclData {
    pub fn ty(&self) -> Type {
        self.ti.ty
    }
}

// ── Items ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ItemData {
    pub kind: ItemKind,
    pub loc: Location,
    pub removed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    Include(Rc<str>),
    VarDecl(DeclId),
    Assign {
        name: Rc<str>,
        e: ExprId,
        decl: Option<DeclId>,
    },
    Constraint(ExprId),
    Solve {
        goal: SolveGoal,
        ann: Annotations,
    },
    Output(ExprId),
    Function(FnId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SolveGoal {
    Satisfy,
    Minimize(ExprId),
    Maximize(ExprId),
}

// ── Functions ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FunctionData {
    pub name: Rc<str>,
    /// Parameter declarations; empty for builtins, which carry only types.
    pub params: Vec<DeclId>,
    /// Parameter types used for overload matching.
    pub param_tys: Vec<Type>,
    /// Codomain; its domain expression (when present) supplies call bounds.
    pub ret: TypeInst,
    pub body: Option<ExprId>,
    pub ann: Annotations,
    pub builtin: bool,
    pub loc: Location,
}

// ── Structural hashing and equality ─────────────────────────────────────────
//
// Used for CSE keys. Id nodes hash by their declaration handle (falling back
// to the name) and are never followed, so hashing terminates on cyclic
// constraint graphs.

pub fn expr_hash(exprs: &Arena<ExprId, ExprNode>, e: ExprId) -> u64 {
    let mut h = FxHasher::default();
    hash_rec(exprs, e, &mut h);
    h.finish()
}

fn hash_rec(exprs: &Arena<ExprId, ExprNode>, e: ExprId, h: &mut FxHasher) {
    use ExprKind::*;
    let node = &exprs[e];
    std::mem::discriminant(&node.kind).hash(h);
    match &node.kind {
        IntLit(v) => v.hash(h),
        FloatLit(v) => v.hash(h),
        BoolLit(v) => v.hash(h),
        StringLit(s) => s.hash(h),
        Absent => {}
        SetLit(sl) => {
            if let Some(isv) = &sl.isv {
                for r in isv.ranges() {
                    r.hash(h);
                }
            } else if let Some(fsv) = &sl.fsv {
                for r in fsv.ranges() {
                    r.hash(h);
                }
            } else {
                for &el in &sl.elems {
                    hash_rec(exprs, el, h);
                }
            }
        }
        ArrayLit(al) => {
            al.dims.hash(h);
            for &el in &al.elems {
                hash_rec(exprs, el, h);
            }
        }
        Id(id) => match id.decl {
            Some(d) => d.hash(h),
            None => id.name.hash(h),
        },
        AnonVar => e.hash(h),
        Comprehension(c) => {
            c.set.hash(h);
            hash_rec(exprs, c.body, h);
            for g in &c.gens {
                g.decls.hash(h);
                if let Some(i) = g.in_expr {
                    hash_rec(exprs, i, h);
                }
                if let Some(w) = g.where_expr {
                    hash_rec(exprs, w, h);
                }
            }
        }
        ArrayAccess { array, idx } => {
            hash_rec(exprs, *array, h);
            for &i in idx {
                hash_rec(exprs, i, h);
            }
        }
        FieldAccess { base, field } => {
            hash_rec(exprs, *base, h);
            field.hash(h);
        }
        Ite(ite) => {
            for &(c, t) in &ite.branches {
                hash_rec(exprs, c, h);
                hash_rec(exprs, t, h);
            }
            if let Some(els) = ite.else_expr {
                hash_rec(exprs, els, h);
            }
        }
        BinOp { op, lhs, rhs } => {
            op.hash(h);
            hash_rec(exprs, *lhs, h);
            hash_rec(exprs, *rhs, h);
        }
        UnOp { op, expr } => {
            op.hash(h);
            hash_rec(exprs, *expr, h);
        }
        Call(c) => {
            c.name.hash(h);
            for &a in &c.args {
                hash_rec(exprs, a, h);
            }
        }
        Let(l) => {
            for item in &l.items {
                match item {
                    LetItem::Decl(d) => d.hash(h),
                    LetItem::Constraint(c) => hash_rec(exprs, *c, h),
                }
            }
            hash_rec(exprs, l.body, h);
        }
        TypeInst(ti) => {
            ti.ty.hash(h);
            for &r in &ti.ranges {
                hash_rec(exprs, r, h);
            }
            if let Some(d) = ti.domain {
                hash_rec(exprs, d, h);
            }
        }
        TiId(s) => s.hash(h),
    }
}

/// Structural equality, including operand order; Ids compare by declaration
/// handle (or name when unresolved) without following it.
pub fn expr_equal(exprs: &Arena<ExprId, ExprNode>, a: ExprId, b: ExprId) -> bool {
    use ExprKind::*;
    if a == b {
        return true;
    }
    let (na, nb) = (&exprs[a], &exprs[b]);
    match (&na.kind, &nb.kind) {
        (IntLit(x), IntLit(y)) => x == y,
        (FloatLit(x), FloatLit(y)) => x == y,
        (BoolLit(x), BoolLit(y)) => x == y,
        (StringLit(x), StringLit(y)) => x == y,
        (Absent, Absent) => true,
        (SetLit(x), SetLit(y)) => match (&x.isv, &y.isv, &x.fsv, &y.fsv) {
            (Some(ix), Some(iy), _, _) => ix == iy,
            (_, _, Some(fx), Some(fy)) => fx == fy,
            (None, None, None, None) => {
                x.elems.len() == y.elems.len()
                    && x.elems
                        .iter()
                        .zip(y.elems.iter())
                        .all(|(&p, &q)| expr_equal(exprs, p, q))
            }
            _ => false,
        },
        (ArrayLit(x), ArrayLit(y)) => {
            x.dims == y.dims
                && x.elems.len() == y.elems.len()
                && x.elems
                    .iter()
                    .zip(y.elems.iter())
                    .all(|(&p, &q)| expr_equal(exprs, p, q))
        }
        (Id(x), Id(y)) => match (x.decl, y.decl) {
            (Some(dx), Some(dy)) => dx == dy,
            (None, None) => x.name == y.name,
            _ => false,
        },
        (ArrayAccess { array: xa, idx: xi }, ArrayAccess { array: ya, idx: yi }) => {
            expr_equal(exprs, *xa, *ya)
                && xi.len() == yi.len()
                && xi
                    .iter()
                    .zip(yi.iter())
                    .all(|(&p, &q)| expr_equal(exprs, p, q))
        }
        (
            FieldAccess {
                base: xb,
                field: xf,
            },
            FieldAccess {
                base: yb,
                field: yf,
            },
        ) => xf == yf && expr_equal(exprs, *xb, *yb),
        (
            BinOp {
                op: xo,
                lhs: xl,
                rhs: xr,
            },
            BinOp {
                op: yo,
                lhs: yl,
                rhs: yr,
            },
        ) => xo == yo && expr_equal(exprs, *xl, *yl) && expr_equal(exprs, *xr, *yr),
        (UnOp { op: xo, expr: xe }, UnOp { op: yo, expr: ye }) => {
            xo == yo && expr_equal(exprs, *xe, *ye)
        }
        (Call(x), Call(y)) => {
            x.name == y.name
                && x.args.len() == y.args.len()
                && x.args
                    .iter()
                    .zip(y.args.iter())
                    .all(|(&p, &q)| expr_equal(exprs, p, q))
        }
        (Ite(x), Ite(y)) => {
            x.branches.len() == y.branches.len()
                && x.branches
                    .iter()
                    .zip(y.branches.iter())
                    .all(|(&(pc, pt), &(qc, qt))| {
                        expr_equal(exprs, pc, qc) && expr_equal(exprs, pt, qt)
                    })
                && match (x.else_expr, y.else_expr) {
                    (Some(p), Some(q)) => expr_equal(exprs, p, q),
                    (None, None) => true,
                    _ => false,
                }
        }
        _ => false,
    }
}

impl ExprKind {
    /// Push the direct child expressions onto `out`. Declarations referenced
    /// by Id nodes or let items are not children.
    pub fn children(&self, out: &mut Vec<ExprId>) {
        use ExprKind::*;
        match self {
            IntLit(_) | FloatLit(_) | BoolLit(_) | StringLit(_) | Absent | Id(_) | AnonVar
            | TiId(_) => {}
            SetLit(sl) => out.extend(&sl.elems),
            ArrayLit(al) => out.extend(&al.elems),
            Comprehension(c) => {
                out.push(c.body);
                for g in &c.gens {
                    out.extend(g.in_expr);
                    out.extend(g.where_expr);
                }
            }
            ArrayAccess { array, idx } => {
                out.push(*array);
                out.extend(idx);
            }
            FieldAccess { base, .. } => out.push(*base),
            Ite(ite) => {
                for &(c, t) in &ite.branches {
                    out.push(c);
                    out.push(t);
                }
                out.extend(ite.else_expr);
            }
            BinOp { lhs, rhs, .. } => {
                out.push(*lhs);
                out.push(*rhs);
            }
            UnOp { expr, .. } => out.push(*expr),
            Call(c) => out.extend(&c.args),
            Let(l) => {
                for item in &l.items {
                    if let LetItem::Constraint(c) = item {
                        out.push(*c);
                    }
                }
                out.push(l.body);
            }
            TypeInst(ti) => {
                out.extend(&ti.ranges);
                out.extend(ti.domain);
            }
        }
    }
}
