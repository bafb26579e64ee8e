// print.rs — Canonical textual form of models and expressions
//
// Two modes share one code path: compact (width 0) emits canonical text with
// no line breaking; pretty mode lays out a document tree with a configurable
// width (default 80) and 4-space indentation, then runs a break-simplification
// pass that joins adjacent lines while the joined line still fits.
//
// Binary operators print through a 12-class precedence table; children are
// parenthesized only when their class binds looser (or equally, against the
// operator's associativity).

use std::fmt::Write;

use crate::ast::{
    Annotations, ArrayLit, BinOpKind, ExprKind, Ident, ItemKind, LetItem, SolveGoal, TypeInst,
    UnOpKind,
};
use crate::env::Env;
use crate::id::{DeclId, ExprId, FnId, ItemId};
use crate::model::Model;
use crate::ty::{BaseType, Inst, Type};

pub const DEFAULT_WIDTH: usize = 80;
const INDENT: usize = 4;

// ── Precedence ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Left,
    Right,
    None,
}

/// Precedence class of a binary operator; lower binds tighter.
fn precedence(op: BinOpKind) -> (u32, Assoc) {
    use BinOpKind::*;
    match op {
        Equiv => (1200, Assoc::Left),
        Impl | RImpl => (1100, Assoc::Left),
        Or | Xor => (1000, Assoc::Left),
        And => (900, Assoc::Left),
        Lt | Le | Gt | Ge | Eq | Ne => (800, Assoc::None),
        In | Subset | Superset => (700, Assoc::None),
        Union | Diff | SymDiff => (600, Assoc::Left),
        DotDot => (500, Assoc::None),
        Plus | Minus => (400, Assoc::Left),
        Mult | IDiv | Mod | Div | Intersect => (300, Assoc::Left),
        Pow => (200, Assoc::Right),
        PlusPlus => (200, Assoc::Right),
    }
}

fn expr_precedence(env: &Env, e: ExprId) -> u32 {
    match &env.exprs[e].kind {
        ExprKind::BinOp { op, .. } => precedence(*op).0,
        ExprKind::Let(_) => 1300,
        _ => 0,
    }
}

// ── Document engine ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Doc {
    Text(String),
    /// A newline in broken mode, a single space in flat mode.
    Line,
    /// A newline in broken mode, nothing in flat mode.
    SoftLine,
    Concat(Vec<Doc>),
    /// Flattened onto one line when it fits within the remaining width.
    Group(Box<Doc>),
    Indent(Box<Doc>),
}

fn text(s: impl Into<String>) -> Doc {
    Doc::Text(s.into())
}

fn concat(docs: Vec<Doc>) -> Doc {
    Doc::Concat(docs)
}

fn group(d: Doc) -> Doc {
    Doc::Group(Box::new(d))
}

fn indent(d: Doc) -> Doc {
    Doc::Indent(Box::new(d))
}

fn flat_len(d: &Doc) -> usize {
    match d {
        Doc::Text(s) => s.len(),
        Doc::Line => 1,
        Doc::SoftLine => 0,
        Doc::Concat(ds) => ds.iter().map(flat_len).sum(),
        Doc::Group(d) | Doc::Indent(d) => flat_len(d),
    }
}

fn render_flat(d: &Doc, out: &mut String) {
    match d {
        Doc::Text(s) => out.push_str(s),
        Doc::Line => out.push(' '),
        Doc::SoftLine => {}
        Doc::Concat(ds) => {
            for d in ds {
                render_flat(d, out);
            }
        }
        Doc::Group(d) | Doc::Indent(d) => render_flat(d, out),
    }
}

fn render(d: &Doc, width: usize, ind: usize, col: &mut usize, out: &mut String) {
    match d {
        Doc::Text(s) => {
            out.push_str(s);
            *col += s.len();
        }
        Doc::Line | Doc::SoftLine => {
            out.push('\n');
            out.push_str(&" ".repeat(ind));
            *col = ind;
        }
        Doc::Concat(ds) => {
            for d in ds {
                render(d, width, ind, col, out);
            }
        }
        Doc::Group(inner) => {
            if *col + flat_len(inner) <= width {
                render_flat(inner, out);
                *col += flat_len(inner);
            } else {
                render(inner, width, ind, col, out);
            }
        }
        Doc::Indent(inner) => render(inner, width, ind + INDENT, col, out),
    }
}

/// Join a line into its successor while the joined length still fits.
/// Lines ending an item (`;`) stay as written.
fn simplify_breaks(s: &str, width: usize) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in s.lines() {
        if let Some(prev) = out.last_mut() {
            let joined_len = prev.trim_end().len() + 1 + line.trim_start().len();
            if !prev.trim_end().ends_with(';')
                && !prev.trim().is_empty()
                && !line.trim().is_empty()
                && joined_len <= width
            {
                let joined = format!("{} {}", prev.trim_end(), line.trim_start());
                *prev = joined;
                continue;
            }
        }
        out.push(line.to_string());
    }
    let mut s = out.join("\n");
    s.push('\n');
    s
}

fn render_doc(d: &Doc, width: usize) -> String {
    if width == 0 {
        let mut out = String::new();
        render_flat(d, &mut out);
        out
    } else {
        let mut out = String::new();
        let mut col = 0;
        render(d, width, 0, &mut col, &mut out);
        simplify_breaks(&out, width)
    }
}

// ── Expression printing ─────────────────────────────────────────────────────

struct Printer<'a> {
    env: &'a Env,
}

impl<'a> Printer<'a> {
    fn expr(&self, e: ExprId) -> Doc {
        let node = &self.env.exprs[e];
        match &node.kind {
            ExprKind::IntLit(v) => {
                // Enum-typed literals print as the member name.
                if node.ty.type_id != 0 && node.ty.bt == BaseType::Int {
                    if let Some(i) = v.to_i64() {
                        if let Some(m) = self.env.types.enum_member(node.ty.type_id, i) {
                            return text(m.to_string());
                        }
                    }
                }
                text(format!("{v}"))
            }
            ExprKind::FloatLit(v) => text(format!("{v}")),
            ExprKind::BoolLit(b) => text(if *b { "true" } else { "false" }),
            ExprKind::StringLit(s) => text(format!("\"{}\"", escape_string(s))),
            ExprKind::Absent => text("<>"),
            ExprKind::SetLit(sl) => {
                if let Some(isv) = &sl.isv {
                    return text(format!("{isv}"));
                }
                if let Some(fsv) = &sl.fsv {
                    return text(format!("{fsv}"));
                }
                self.brace_list(&sl.elems)
            }
            ExprKind::ArrayLit(al) => self.array_lit(e, al),
            ExprKind::Id(Ident { name, .. }) => text(name.to_string()),
            ExprKind::AnonVar => text("_"),
            ExprKind::Comprehension(c) => {
                let (open, close) = if c.set { ("{ ", " }") } else { ("[", "]") };
                let mut parts = vec![text(open), self.expr(c.body), text(" | ")];
                for (i, g) in c.gens.iter().enumerate() {
                    if i > 0 {
                        parts.push(text(", "));
                    }
                    let names: Vec<String> = g
                        .decls
                        .iter()
                        .map(|&d| self.env.decls[d].name.to_string())
                        .collect();
                    parts.push(text(names.join(", ")));
                    if let Some(in_e) = g.in_expr {
                        parts.push(text(" in "));
                        parts.push(self.expr(in_e));
                    } else if let Some(def) = g.decls.first().and_then(|&d| self.env.decls[d].e) {
                        parts.push(text(" = "));
                        parts.push(self.expr(def));
                    }
                    if let Some(w) = g.where_expr {
                        parts.push(text(" where "));
                        parts.push(self.expr(w));
                    }
                }
                parts.push(text(close));
                group(concat(parts))
            }
            ExprKind::ArrayAccess { array, idx } => {
                let mut parts = vec![self.expr(*array), text("[")];
                for (i, &ix) in idx.iter().enumerate() {
                    if i > 0 {
                        parts.push(text(", "));
                    }
                    parts.push(self.expr(ix));
                }
                parts.push(text("]"));
                concat(parts)
            }
            ExprKind::FieldAccess { base, field } => {
                let base_ty = self.env.ty(*base);
                let label = if base_ty.bt == BaseType::Record && base_ty.type_id != 0 {
                    let fields = self.env.types.record_fields(base_ty.type_id);
                    fields
                        .get(*field as usize)
                        .map(|(n, _)| n.to_string())
                        .unwrap_or_else(|| (field + 1).to_string())
                } else {
                    (field + 1).to_string()
                };
                concat(vec![self.expr(*base), text(format!(".{label}"))])
            }
            ExprKind::Ite(ite) => {
                let mut parts = Vec::new();
                for (i, &(c, t)) in ite.branches.iter().enumerate() {
                    parts.push(text(if i == 0 { "if " } else { " elseif " }));
                    parts.push(self.expr(c));
                    parts.push(text(" then "));
                    parts.push(indent(concat(vec![Doc::SoftLine, self.expr(t)])));
                }
                if let Some(els) = ite.else_expr {
                    parts.push(text(" else "));
                    parts.push(indent(concat(vec![Doc::SoftLine, self.expr(els)])));
                }
                parts.push(text(" endif"));
                group(concat(parts))
            }
            ExprKind::BinOp { op, lhs, rhs } => {
                let (prec, assoc) = precedence(*op);
                let pl = expr_precedence(self.env, *lhs);
                let pr = expr_precedence(self.env, *rhs);
                let left_needs = pl > prec || (pl == prec && assoc != Assoc::Left);
                let right_needs = pr > prec || (pr == prec && assoc != Assoc::Right);
                let mut parts = Vec::new();
                parts.push(self.maybe_paren(*lhs, left_needs));
                if *op == BinOpKind::DotDot {
                    parts.push(text(".."));
                } else {
                    parts.push(text(format!(" {}", op.op_str())));
                    parts.push(Doc::Line);
                }
                parts.push(self.maybe_paren(*rhs, right_needs));
                group(concat(parts))
            }
            ExprKind::UnOp { op, expr } => {
                let inner = expr_precedence(self.env, *expr) > 0;
                match op {
                    UnOpKind::Not => concat(vec![text("not "), self.maybe_paren(*expr, inner)]),
                    UnOpKind::Minus => concat(vec![text("-"), self.maybe_paren(*expr, inner)]),
                    UnOpKind::Plus => self.expr(*expr),
                }
            }
            ExprKind::Call(c) => {
                let mut parts = vec![text(format!("{}(", c.name))];
                for (i, &a) in c.args.iter().enumerate() {
                    if i > 0 {
                        parts.push(text(", "));
                    }
                    parts.push(self.expr(a));
                }
                parts.push(text(")"));
                group(concat(parts))
            }
            ExprKind::Let(l) => {
                let mut items = Vec::new();
                for (i, item) in l.items.iter().enumerate() {
                    if i > 0 {
                        items.push(text(", "));
                        items.push(Doc::SoftLine);
                    }
                    match item {
                        LetItem::Decl(d) => items.push(self.var_decl_inline(*d)),
                        LetItem::Constraint(c) => {
                            items.push(text("constraint "));
                            items.push(self.expr(*c));
                        }
                    }
                }
                group(concat(vec![
                    text("let { "),
                    indent(concat(items)),
                    text(" } in "),
                    indent(concat(vec![Doc::SoftLine, self.expr(l.body)])),
                ]))
            }
            ExprKind::TypeInst(ti) => text(self.type_inst_str(ti)),
            ExprKind::TiId(s) => text(format!("${s}")),
        }
    }

    fn maybe_paren(&self, e: ExprId, needed: bool) -> Doc {
        if needed {
            concat(vec![text("("), self.expr(e), text(")")])
        } else {
            self.expr(e)
        }
    }

    fn brace_list(&self, elems: &[ExprId]) -> Doc {
        let mut parts = vec![text("{")];
        for (i, &el) in elems.iter().enumerate() {
            if i > 0 {
                parts.push(text(", "));
            }
            parts.push(self.expr(el));
        }
        parts.push(text("}"));
        group(concat(parts))
    }

    fn array_lit(&self, e: ExprId, al: &ArrayLit) -> Doc {
        let ty = self.env.ty(e);
        // Tuple/record carriers print in parenthesis form.
        if ty.is_struct() {
            let mut parts = vec![text("(")];
            if ty.bt == BaseType::Record && ty.type_id != 0 {
                let fields = self.env.types.record_fields(ty.type_id);
                for (i, &el) in al.elems.iter().enumerate() {
                    if i > 0 {
                        parts.push(text(", "));
                    }
                    if let Some((name, _)) = fields.get(i) {
                        parts.push(text(format!("{name}: ")));
                    }
                    parts.push(self.expr(el));
                }
            } else {
                for (i, &el) in al.elems.iter().enumerate() {
                    if i > 0 {
                        parts.push(text(", "));
                    }
                    parts.push(self.expr(el));
                }
                // One-element tuples keep a trailing comma.
                if al.elems.len() == 1 {
                    parts.push(text(","));
                }
            }
            parts.push(text(")"));
            return group(concat(parts));
        }
        if al.dims.len() == 2 {
            // 2-D literals print in [| row | row |] form.
            let cols = al.dim_size(1) as usize;
            let mut parts = vec![text("[|")];
            for (r, row) in al.elems.chunks(cols.max(1)).enumerate() {
                if r > 0 {
                    parts.push(text(" | "));
                }
                for (i, &el) in row.iter().enumerate() {
                    if i > 0 {
                        parts.push(text(", "));
                    }
                    parts.push(self.expr(el));
                }
            }
            parts.push(text("|]"));
            return group(concat(parts));
        }
        let mut parts = vec![text("[")];
        for (i, &el) in al.elems.iter().enumerate() {
            if i > 0 {
                parts.push(text(", "));
            }
            parts.push(self.expr(el));
        }
        parts.push(text("]"));
        group(concat(parts))
    }

    // ── Types and declarations ─────────────────────────────────────────

    fn base_type_str(&self, ty: Type) -> String {
        match ty.bt {
            BaseType::Bool => "bool".to_string(),
            BaseType::Int => {
                if ty.type_id != 0 {
                    self.env.types.enum_info(ty.type_id).name.to_string()
                } else {
                    "int".to_string()
                }
            }
            BaseType::Float => "float".to_string(),
            BaseType::String => "string".to_string(),
            BaseType::Ann => "ann".to_string(),
            BaseType::Bot => "bot".to_string(),
            BaseType::Top => "any".to_string(),
            BaseType::Tuple => {
                let fields = self.env.types.tuple_fields(ty.type_id);
                let inner: Vec<String> = fields
                    .iter()
                    .map(|f| self.type_inst_str(&TypeInst::plain(*f)))
                    .collect();
                format!("tuple({})", inner.join(", "))
            }
            BaseType::Record => {
                let fields = self.env.types.record_fields(ty.type_id);
                let inner: Vec<String> = fields
                    .iter()
                    .map(|(n, f)| format!("{}: {}", self.type_inst_str(&TypeInst::plain(*f)), n))
                    .collect();
                format!("record({})", inner.join(", "))
            }
        }
    }

    fn type_inst_str(&self, ti: &TypeInst) -> String {
        let ty = ti.ty;
        let mut out = String::new();
        if ty.dim > 0 {
            let ranges: Vec<String> = if ti.ranges.is_empty() {
                (0..ty.dim).map(|_| "int".to_string()).collect()
            } else {
                ti.ranges
                    .iter()
                    .map(|&r| print_expr_compact_env(self.env, r))
                    .collect()
            };
            let _ = write!(out, "array [{}] of ", ranges.join(", "));
        }
        let elem = if ty.dim != 0 {
            ty.elem_type(&self.env.types)
        } else {
            ty
        };
        if elem.is_var() {
            out.push_str("var ");
        }
        if elem.opt {
            out.push_str("opt ");
        }
        if elem.set {
            out.push_str("set of ");
        }
        match ti.domain {
            Some(dom) => out.push_str(&print_expr_compact_env(self.env, dom)),
            None => out.push_str(&self.base_type_str(elem)),
        }
        out
    }

    fn annotations(&self, ann: &Annotations) -> Doc {
        let mut parts = Vec::new();
        for a in &ann.idents {
            parts.push(text(format!(" :: {a}")));
        }
        for &e in &ann.exprs {
            parts.push(text(" :: "));
            parts.push(self.expr(e));
        }
        concat(parts)
    }

    fn var_decl_inline(&self, d: DeclId) -> Doc {
        let data = &self.env.decls[d];
        let mut parts = vec![text(format!(
            "{}: {}",
            self.type_inst_str(&data.ti),
            data.name
        ))];
        parts.push(self.annotations(&data.ann));
        if let Some(e) = data.e {
            parts.push(text(" = "));
            parts.push(self.expr(e));
        }
        concat(parts)
    }

    fn function_item(&self, f: FnId) -> Doc {
        let data = &self.env.functions[f];
        let ret = self.type_inst_str(&data.ret);
        let params: Vec<String> = if data.params.is_empty() {
            data.param_tys
                .iter()
                .map(|t| self.type_inst_str(&TypeInst::plain(*t)))
                .collect()
        } else {
            data.params
                .iter()
                .map(|&p| {
                    format!(
                        "{}: {}",
                        self.type_inst_str(&self.env.decls[p].ti),
                        self.env.decls[p].name
                    )
                })
                .collect()
        };
        let head = format!("function {ret}: {}({})", data.name, params.join(", "));
        match data.body {
            Some(b) => group(concat(vec![
                text(head),
                text(" = "),
                indent(concat(vec![Doc::SoftLine, self.expr(b)])),
                text(";"),
            ])),
            None => text(format!("{head};")),
        }
    }

    fn item(&self, i: ItemId) -> Doc {
        let data = &self.env.items[i];
        match &data.kind {
            ItemKind::Include(f) => text(format!("include \"{}\";", escape_string(f))),
            ItemKind::VarDecl(d) => concat(vec![self.var_decl_inline(*d), text(";")]),
            ItemKind::Assign { name, e, .. } => group(concat(vec![
                text(format!("{name} = ")),
                self.expr(*e),
                text(";"),
            ])),
            ItemKind::Constraint(e) => group(concat(vec![
                text("constraint "),
                indent(concat(vec![Doc::SoftLine, self.expr(*e)])),
                text(";"),
            ])),
            ItemKind::Solve { goal, ann } => {
                let mut parts = vec![text("solve")];
                parts.push(self.annotations(ann));
                match goal {
                    SolveGoal::Satisfy => parts.push(text(" satisfy;")),
                    SolveGoal::Minimize(e) => {
                        parts.push(text(" minimize "));
                        parts.push(self.expr(*e));
                        parts.push(text(";"));
                    }
                    SolveGoal::Maximize(e) => {
                        parts.push(text(" maximize "));
                        parts.push(self.expr(*e));
                        parts.push(text(";"));
                    }
                }
                group(concat(parts))
            }
            ItemKind::Output(e) => group(concat(vec![text("output "), self.expr(*e), text(";")])),
            ItemKind::Function(f) => self.function_item(*f),
        }
    }
}

/// The model textual form escapes `"` and `\` only.
fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}

// ── Public entry points ─────────────────────────────────────────────────────

pub fn print_expr(env: &Env, e: ExprId, width: usize) -> String {
    let p = Printer { env };
    render_doc(&p.expr(e), width)
}

pub fn print_expr_compact(env: &Env, e: ExprId) -> String {
    print_expr(env, e, 0)
}

fn print_expr_compact_env(env: &Env, e: ExprId) -> String {
    let p = Printer { env };
    let mut out = String::new();
    render_flat(&p.expr(e), &mut out);
    out
}

pub fn print_item(env: &Env, i: ItemId, width: usize) -> String {
    let p = Printer { env };
    render_doc(&p.item(i), width)
}

/// Print all live items of a model in insertion order.
pub fn print_model(env: &Env, model: &Model, width: usize) -> String {
    let p = Printer { env };
    let mut out = String::new();
    for &i in &model.items {
        if env.items[i].removed {
            continue;
        }
        let rendered = render_doc(&p.item(i), width);
        out.push_str(rendered.trim_end());
        out.push('\n');
    }
    out
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Location;
    use crate::val::{IntSetVal, IntVal};
    use std::rc::Rc;

    #[test]
    fn precedence_parenthesizes_looser_children() {
        let mut env = Env::default();
        let a = env.int_lit(IntVal::Int(1));
        let b = env.int_lit(IntVal::Int(2));
        let c = env.int_lit(IntVal::Int(3));
        let plus = env.new_expr(
            ExprKind::BinOp {
                op: BinOpKind::Plus,
                lhs: a,
                rhs: b,
            },
            Type::par_int(),
            Location::unknown(),
        );
        let mult = env.new_expr(
            ExprKind::BinOp {
                op: BinOpKind::Mult,
                lhs: plus,
                rhs: c,
            },
            Type::par_int(),
            Location::unknown(),
        );
        assert_eq!(print_expr_compact(&env, mult), "(1 + 2) * 3");
        let mult2 = env.new_expr(
            ExprKind::BinOp {
                op: BinOpKind::Mult,
                lhs: b,
                rhs: c,
            },
            Type::par_int(),
            Location::unknown(),
        );
        let plus2 = env.new_expr(
            ExprKind::BinOp {
                op: BinOpKind::Plus,
                lhs: a,
                rhs: mult2,
            },
            Type::par_int(),
            Location::unknown(),
        );
        assert_eq!(print_expr_compact(&env, plus2), "1 + 2 * 3");
    }

    #[test]
    fn set_and_range_printing() {
        let mut env = Env::default();
        let s = env.intset_lit(
            Rc::new(IntSetVal::from_range(IntVal::Int(1), IntVal::Int(10))),
            Location::unknown(),
        );
        assert_eq!(print_expr_compact(&env, s), "1..10");
        let s2 = env.intset_lit(
            Rc::new(IntSetVal::from_ranges(vec![
                (IntVal::Int(1), IntVal::Int(2)),
                (IntVal::Int(5), IntVal::Int(5)),
            ])),
            Location::unknown(),
        );
        assert_eq!(print_expr_compact(&env, s2), "{1..2, 5}");
    }

    #[test]
    fn tuple_and_record_literals() {
        let mut env = Env::default();
        let one = env.int_lit(IntVal::Int(1));
        let t = env.bool_lit(true);
        let tup_id = env
            .types
            .register_tuple_type(vec![Type::par_int(), Type::par_bool()]);
        let tup_ty = Type::new(BaseType::Tuple, Inst::Par).with_type_id(tup_id);
        let tup = env.new_expr(
            ExprKind::ArrayLit(ArrayLit::new_1d(vec![one, t])),
            tup_ty,
            Location::unknown(),
        );
        assert_eq!(print_expr_compact(&env, tup), "(1, true)");

        let one_tup_id = env.types.register_tuple_type(vec![Type::par_int()]);
        let one_tup_ty = Type::new(BaseType::Tuple, Inst::Par).with_type_id(one_tup_id);
        let single = env.new_expr(
            ExprKind::ArrayLit(ArrayLit::new_1d(vec![one])),
            one_tup_ty,
            Location::unknown(),
        );
        assert_eq!(print_expr_compact(&env, single), "(1,)");

        let rec_id = env.types.register_record_type(vec![
            ("b".into(), Type::par_bool()),
            ("a".into(), Type::par_int()),
        ]);
        let rec_ty = Type::new(BaseType::Record, Inst::Par).with_type_id(rec_id);
        let rec = env.new_expr(
            ExprKind::ArrayLit(ArrayLit::new_1d(vec![one, t])),
            rec_ty,
            Location::unknown(),
        );
        // Fields sorted by name: a before b.
        assert_eq!(print_expr_compact(&env, rec), "(a: 1, b: true)");
    }

    #[test]
    fn two_dimensional_array_form() {
        let mut env = Env::default();
        let elems: Vec<ExprId> = (1..=6).map(|i| env.int_lit(IntVal::Int(i))).collect();
        let ty = env.types.array_type(Type::par_int(), &[0, 0]);
        let al = env.new_expr(
            ExprKind::ArrayLit(ArrayLit::with_dims(elems, vec![(1, 2), (1, 3)])),
            ty,
            Location::unknown(),
        );
        assert_eq!(print_expr_compact(&env, al), "[|1, 2, 3 | 4, 5, 6|]");
    }

    #[test]
    fn string_escaping() {
        let mut env = Env::default();
        let s = env.str_lit("a\"b\\c");
        assert_eq!(print_expr_compact(&env, s), "\"a\\\"b\\\\c\"");
    }

    #[test]
    fn pretty_mode_respects_width() {
        let mut env = Env::default();
        let mut acc = env.int_lit(IntVal::Int(1));
        for i in 2..=20 {
            let next = env.int_lit(IntVal::Int(i));
            acc = env.new_expr(
                ExprKind::BinOp {
                    op: BinOpKind::Plus,
                    lhs: acc,
                    rhs: next,
                },
                Type::par_int(),
                Location::unknown(),
            );
        }
        let compact = print_expr_compact(&env, acc);
        assert!(!compact.contains('\n'));
        let pretty = print_expr(&env, acc, 20);
        for line in pretty.lines() {
            assert!(line.len() <= 20, "line too long: {line:?}");
        }
    }

    #[test]
    fn enum_literals_print_member_names() {
        let mut env = Env::default();
        let colors = env
            .types
            .register_enum("Colors".into(), vec!["R".into(), "G".into(), "B".into()]);
        let ty = Type::par_int().with_type_id(colors);
        let v = env.int_lit_typed(IntVal::Int(2), ty);
        assert_eq!(print_expr_compact(&env, v), "G");
    }
}
