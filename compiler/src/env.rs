// env.rs — The per-compilation environment
//
// One Env coordinates a single compilation: it owns the node arenas, the
// source and flat models, the structural-type interner, the CSE map, the
// variable-occurrence index, the source-path store for multi-pass
// unification, the warning buffer, and the flattening options. It is not
// shareable; concurrent compilations each own a distinct Env.

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::arena::Arena;
use crate::ast::{
    expr_equal, expr_hash, Annotations, ArrayLit, Call, ExprKind, ExprNode, FunctionData, Ident,
    ItemData, ItemKind, LetItem, Location, SetLit, SolveGoal, TypeInst, VarDeclData,
};
use crate::diag::{CompileError, Result, StackFrame, Warning, MAX_STACK_FRAMES, MAX_WARNINGS};
use crate::id::{DeclId, ExprId, FnId, ItemId};
use crate::model::{register_builtins, Constants, Model, ReifyMap};
use crate::opts::FlatteningOptions;
use crate::timing::TimingRegistry;
use crate::ty::{BaseType, Type, TypeRegistry};
use crate::val::{FloatSetVal, FloatVal, IntSetVal, IntVal};

/// One CSE bucket entry: the keyed expression and its flat result pair.
#[derive(Debug, Clone, Copy)]
pub struct CseEntry {
    pub key: ExprId,
    pub r: ExprId,
    pub b: ExprId,
}

#[derive(Debug, Clone, Copy)]
struct PathEntry {
    decl: DeclId,
    pass_no: u32,
}

pub struct Env {
    pub exprs: Arena<ExprId, ExprNode>,
    pub decls: Arena<DeclId, VarDeclData>,
    pub items: Arena<ItemId, ItemData>,
    pub functions: Arena<FnId, FunctionData>,
    pub model: Model,
    pub flat: Model,
    pub types: TypeRegistry,
    pub consts: Constants,
    pub reify: ReifyMap,
    pub opts: FlatteningOptions,
    pub timing: TimingRegistry,
    pub rng: StdRng,
    /// Call stack used for diagnostics and path annotations.
    pub call_stack: Vec<StackFrame>,
    /// Set by `fail()`; the model is known unsatisfiable.
    pub failed: bool,
    /// Current flattening pass (multi-pass unification).
    pub pass_no: u32,

    warnings: Vec<Warning>,
    warnings_suppressed: bool,
    cancel: Arc<AtomicBool>,
    cse: FxHashMap<u64, Vec<CseEntry>>,
    occ: FxHashMap<DeclId, i64>,
    /// Evaluated result of the half-reification library hook, per pass.
    half_reify_hook: Option<bool>,
    /// The constraint item defining each introduced variable, if any.
    definitions: FxHashMap<DeclId, ItemId>,
    paths: FxHashMap<String, PathEntry>,
    reverse_mappers: FxHashMap<DeclId, Rc<str>>,
    strings: FxHashSet<Rc<str>>,
    int_lits: FxHashMap<IntVal, ExprId>,
    float_lits: FxHashMap<FloatVal, ExprId>,
    str_lits: FxHashMap<Rc<str>, ExprId>,
    introduced_counter: u32,
}

impl Env {
    pub fn new(opts: FlatteningOptions) -> Self {
        let mut exprs = Arena::with_capacity(1024);
        let mut decls = Arena::new();
        let mut functions = Arena::new();
        let model = Model::new();
        let mut flat = Model::new();
        let consts = Constants::new(&mut exprs, &mut decls);
        let reify = register_builtins(&mut functions, &mut flat);
        let detailed_timing = opts.detailed_timing;
        let seed = opts.random_seed;
        Env {
            exprs,
            decls,
            items: Arena::new(),
            functions,
            model,
            flat,
            types: TypeRegistry::new(),
            consts,
            reify,
            opts,
            timing: TimingRegistry::new(detailed_timing),
            rng: StdRng::seed_from_u64(seed),
            call_stack: Vec::new(),
            failed: false,
            pass_no: 0,
            warnings: Vec::new(),
            warnings_suppressed: false,
            cancel: Arc::new(AtomicBool::new(false)),
            cse: FxHashMap::default(),
            occ: FxHashMap::default(),
            half_reify_hook: None,
            definitions: FxHashMap::default(),
            paths: FxHashMap::default(),
            reverse_mappers: FxHashMap::default(),
            strings: FxHashSet::default(),
            int_lits: FxHashMap::default(),
            float_lits: FxHashMap::default(),
            str_lits: FxHashMap::default(),
            introduced_counter: 0,
        }
    }

    // ── Cancellation ───────────────────────────────────────────────────

    /// Handle external callers may set to request a cooperative stop.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// The only suspension point: called at item traversal and call entry.
    pub fn check_cancel(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(CompileError::Cancelled)
        } else {
            Ok(())
        }
    }

    // ── Interning and literal construction ─────────────────────────────

    pub fn intern(&mut self, s: &str) -> Rc<str> {
        if let Some(existing) = self.strings.get(s) {
            return existing.clone();
        }
        let rc: Rc<str> = s.into();
        self.strings.insert(rc.clone());
        rc
    }

    pub fn new_expr(&mut self, kind: ExprKind, ty: Type, loc: Location) -> ExprId {
        self.exprs.alloc(ExprNode {
            kind,
            ty,
            loc,
            ann: Annotations::new(),
        })
    }

    /// Hash-consed integer literal.
    pub fn int_lit(&mut self, v: IntVal) -> ExprId {
        if let Some(&e) = self.int_lits.get(&v) {
            return e;
        }
        let e = self.new_expr(
            ExprKind::IntLit(v.clone()),
            Type::par_int(),
            Location::unknown(),
        );
        self.int_lits.insert(v, e);
        e
    }

    pub fn int_lit_typed(&mut self, v: IntVal, ty: Type) -> ExprId {
        if ty == Type::par_int() {
            return self.int_lit(v);
        }
        self.new_expr(ExprKind::IntLit(v), ty, Location::unknown())
    }

    pub fn float_lit(&mut self, v: FloatVal) -> ExprId {
        if let Some(&e) = self.float_lits.get(&v) {
            return e;
        }
        let e = self.new_expr(ExprKind::FloatLit(v), Type::par_float(), Location::unknown());
        self.float_lits.insert(v, e);
        e
    }

    pub fn bool_lit(&mut self, v: bool) -> ExprId {
        if v {
            self.consts.lit_true
        } else {
            self.consts.lit_false
        }
    }

    pub fn str_lit(&mut self, s: &str) -> ExprId {
        let rc = self.intern(s);
        if let Some(&e) = self.str_lits.get(&rc) {
            return e;
        }
        let e = self.new_expr(
            ExprKind::StringLit(rc.clone()),
            Type::par_string(),
            Location::unknown(),
        );
        self.str_lits.insert(rc, e);
        e
    }

    pub fn intset_lit(&mut self, isv: Rc<IntSetVal>, loc: Location) -> ExprId {
        self.new_expr(
            ExprKind::SetLit(SetLit::from_isv(isv)),
            Type::par_set_int(),
            loc,
        )
    }

    pub fn floatset_lit(&mut self, fsv: Rc<FloatSetVal>, loc: Location) -> ExprId {
        self.new_expr(
            ExprKind::SetLit(SetLit::from_fsv(fsv)),
            Type::par_set_float(),
            loc,
        )
    }

    /// Identifier expression referring to `decl`.
    pub fn id_expr(&mut self, decl: DeclId) -> ExprId {
        let name = self.decls[decl].name.clone();
        let ty = self.decls[decl].ty();
        let loc = self.decls[decl].loc.clone();
        self.new_expr(ExprKind::Id(Ident { name, decl: Some(decl) }), ty, loc)
    }

    pub fn call_expr(&mut self, name: Rc<str>, args: Vec<ExprId>, ty: Type, loc: Location) -> ExprId {
        let decl = self.match_fn(&name, &args);
        self.new_expr(ExprKind::Call(Call { name, args, decl }), ty, loc)
    }

    pub fn ty(&self, e: ExprId) -> Type {
        self.exprs[e].ty
    }

    pub fn loc(&self, e: ExprId) -> Location {
        self.exprs[e].loc.clone()
    }

    /// Clone of a node's kind; used where dispatch must not hold a borrow.
    pub fn kind(&self, e: ExprId) -> ExprKind {
        self.exprs[e].kind.clone()
    }

    pub fn is_bool_lit(&self, e: ExprId) -> Option<bool> {
        match self.exprs[e].kind {
            ExprKind::BoolLit(b) => Some(b),
            _ => None,
        }
    }

    /// Resolve through identifier indirection: follows `Id -> decl -> e()`
    /// chains, stopping at the first non-identifier or on revisit.
    pub fn resolve_id(&self, mut e: ExprId) -> ExprId {
        let mut seen: Vec<DeclId> = Vec::new();
        loop {
            let d = match &self.exprs[e].kind {
                ExprKind::Id(Ident { decl: Some(d), .. }) => *d,
                _ => return e,
            };
            if seen.contains(&d) {
                return e;
            }
            seen.push(d);
            match self.decls[d].e {
                Some(def) => e = def,
                None => return e,
            }
        }
    }

    /// The declaration an identifier expression points at, if any.
    pub fn decl_of(&self, e: ExprId) -> Option<DeclId> {
        match &self.exprs[e].kind {
            ExprKind::Id(Ident { decl, .. }) => *decl,
            _ => None,
        }
    }

    // ── Declarations and items ─────────────────────────────────────────

    pub fn new_decl(&mut self, ti: TypeInst, name: Rc<str>, e: Option<ExprId>, loc: Location) -> DeclId {
        self.decls.alloc(VarDeclData {
            ti,
            name,
            e,
            ann: Annotations::new(),
            flat: None,
            introduced: false,
            toplevel: false,
            evaluated: false,
            removed: false,
            loc,
            item: None,
        })
    }

    /// Fresh introduced declaration in the flat model, with a stable
    /// `X_INTRODUCED_<n>_` name and a VarDecl item appended.
    pub fn new_flat_decl(&mut self, ti: TypeInst, loc: Location) -> DeclId {
        let name = self.intern(&format!("X_INTRODUCED_{}_", self.introduced_counter));
        self.introduced_counter += 1;
        let d = self.decls.alloc(VarDeclData {
            ti,
            name,
            e: None,
            ann: Annotations::new(),
            flat: None,
            introduced: true,
            toplevel: true,
            evaluated: false,
            removed: false,
            loc: loc.introduce(),
            item: None,
        });
        self.decls[d].flat = Some(d);
        let item = self.add_flat_item(ItemKind::VarDecl(d), loc.introduce());
        self.decls[d].item = Some(item);
        d
    }

    pub fn add_source_item(&mut self, kind: ItemKind, loc: Location) -> ItemId {
        let id = self.items.alloc(ItemData {
            kind: kind.clone(),
            loc,
            removed: false,
        });
        self.model.push_item(id, &kind);
        id
    }

    pub fn add_flat_item(&mut self, kind: ItemKind, loc: Location) -> ItemId {
        let id = self.items.alloc(ItemData {
            kind: kind.clone(),
            loc,
            removed: false,
        });
        self.flat.push_item(id, &kind);
        self.adjust_occurrences(id, 1);
        id
    }

    pub fn mark_item_removed(&mut self, item: ItemId) {
        if self.items[item].removed {
            return;
        }
        self.items[item].removed = true;
        self.adjust_occurrences(item, -1);
        if let ItemKind::VarDecl(d) = self.items[item].kind {
            self.decls[d].removed = true;
        }
    }

    pub fn occurrences(&self, d: DeclId) -> i64 {
        self.occ.get(&d).copied().unwrap_or(0)
    }

    pub fn note_definition(&mut self, d: DeclId, item: ItemId) {
        self.definitions.insert(d, item);
    }

    pub fn definition_of(&self, d: DeclId) -> Option<ItemId> {
        self.definitions.get(&d).copied()
    }

    /// Adjust occurrence counts for every Id reachable from `e`. Used when a
    /// declaration's RHS is installed or cleared after its item was added.
    pub fn adjust_expr_occurrences(&mut self, e: ExprId, delta: i64) {
        self.walk_occurrences(vec![e], delta);
    }

    /// Walk an item's expressions, adding `delta` for every Id reference.
    fn adjust_occurrences(&mut self, item: ItemId, delta: i64) {
        let mut roots: Vec<ExprId> = Vec::new();
        let mut decl_roots: Vec<DeclId> = Vec::new();
        match &self.items[item].kind {
            ItemKind::VarDecl(d) => decl_roots.push(*d),
            ItemKind::Assign { e, .. } => roots.push(*e),
            ItemKind::Constraint(e) => roots.push(*e),
            ItemKind::Solve { goal, ann } => {
                match goal {
                    SolveGoal::Minimize(e) | SolveGoal::Maximize(e) => roots.push(*e),
                    SolveGoal::Satisfy => {}
                }
                roots.extend(&ann.exprs);
            }
            ItemKind::Output(e) => roots.push(*e),
            ItemKind::Include(_) | ItemKind::Function(_) => {}
        }
        for d in decl_roots {
            let data = &self.decls[d];
            roots.extend(&data.ti.ranges);
            roots.extend(data.ti.domain);
            roots.extend(data.e);
            roots.extend(&data.ann.exprs);
        }
        self.walk_occurrences(roots, delta);
    }

    fn walk_occurrences(&mut self, roots: Vec<ExprId>, delta: i64) {
        let dv = self.consts.ids.defines_var.clone();
        let mut stack = roots;
        let mut visited: FxHashSet<ExprId> = FxHashSet::default();
        while let Some(e) = stack.pop() {
            if !visited.insert(e) {
                continue;
            }
            let kind = self.exprs[e].kind.clone();
            if let ExprKind::Id(Ident { decl: Some(d), .. }) = &kind {
                *self.occ.entry(*d).or_insert(0) += delta;
            }
            let mut children = Vec::new();
            self.exprs[e].kind.children(&mut children);
            // Let declarations contribute their payload expressions too.
            if let ExprKind::Let(l) = &kind {
                for it in &l.items {
                    if let LetItem::Decl(d) = it {
                        let data = &self.decls[*d];
                        children.extend(&data.ti.ranges);
                        children.extend(data.ti.domain);
                        children.extend(data.e);
                    }
                }
            }
            // References from defines_var annotations do not keep a
            // variable alive, and neither does the defining call's own
            // mention of the defined variable; compensate for both.
            let ann_exprs = self.exprs[e].ann.exprs.clone();
            for a in ann_exprs {
                let defined: Option<DeclId> = match &self.exprs[a].kind {
                    ExprKind::Call(c) if c.name == dv => c
                        .args
                        .first()
                        .and_then(|&arg| match &self.exprs[arg].kind {
                            ExprKind::Id(Ident { decl, .. }) => *decl,
                            _ => None,
                        }),
                    _ => None,
                };
                match defined {
                    Some(x) => *self.occ.entry(x).or_insert(0) -= delta,
                    None => children.push(a),
                }
            }
            stack.extend(children);
        }
    }

    // ── Function lookup ────────────────────────────────────────────────

    /// Match a call against registered overloads, source model first.
    pub fn match_fn(&self, name: &str, args: &[ExprId]) -> Option<FnId> {
        let arg_tys: Vec<Type> = args.iter().map(|&a| self.ty(a)).collect();
        for table in [&self.model, &self.flat] {
            for &f in table.overloads(name) {
                let data = &self.functions[f];
                let params: Vec<Type> = if data.params.is_empty() {
                    data.param_tys.clone()
                } else {
                    data.params.iter().map(|&p| self.decls[p].ty()).collect()
                };
                if params.len() == arg_tys.len()
                    && arg_tys
                        .iter()
                        .zip(params.iter())
                        .all(|(a, p)| a.is_subtype_of(*p, &self.types))
                {
                    return Some(f);
                }
            }
        }
        None
    }

    // ── CSE map ────────────────────────────────────────────────────────

    /// Look up a structurally equal expression flattened earlier. Entries
    /// whose backing declaration was removed are dropped lazily here.
    pub fn cse_find(&mut self, e: ExprId) -> Option<(ExprId, ExprId)> {
        let h = expr_hash(&self.exprs, e);
        let bucket = self.cse.get_mut(&h)?;
        let mut live = Vec::new();
        let mut hit = None;
        for entry in bucket.iter() {
            let backing_removed = match self.exprs[entry.r].kind {
                ExprKind::Id(Ident { decl: Some(d), .. }) => self.decls[d].removed,
                _ => false,
            };
            if backing_removed {
                continue;
            }
            live.push(*entry);
            if hit.is_none() && expr_equal(&self.exprs, entry.key, e) {
                hit = Some((entry.r, entry.b));
            }
        }
        *bucket = live;
        hit
    }

    pub fn cse_insert(&mut self, key: ExprId, r: ExprId, b: ExprId) {
        let h = expr_hash(&self.exprs, key);
        self.cse
            .entry(h)
            .or_default()
            .push(CseEntry { key, r, b });
    }

    // ── Source paths (multi-pass unification) ──────────────────────────

    /// Canonical path of the current call stack, innermost frame last.
    pub fn current_path(&self) -> String {
        let frames: &[StackFrame] = if self.opts.only_toplevel_paths {
            &self.call_stack[..self.call_stack.len().min(1)]
        } else {
            &self.call_stack
        };
        let mut out = String::new();
        for f in frames {
            if !out.is_empty() {
                out.push(';');
            }
            out.push_str(&format!("{}", f.loc));
        }
        out
    }

    /// Look up the flat variable previously introduced for `path`. A hit in
    /// the same pass is reused outright; a hit from an earlier pass yields
    /// the old declaration so tightened bounds can be copied to a fresh one.
    pub fn path_lookup(&self, path: &str) -> Option<(DeclId, bool)> {
        self.paths
            .get(path)
            .map(|e| (e.decl, e.pass_no == self.pass_no))
    }

    pub fn path_register(&mut self, path: String, decl: DeclId) {
        let pass_no = self.pass_no;
        self.paths.insert(path, PathEntry { decl, pass_no });
    }

    pub fn start_pass(&mut self) {
        self.pass_no += 1;
        self.cse.clear();
        self.half_reify_hook = None;
    }

    /// Cached hook verdict; None until the hook has been evaluated this pass.
    pub fn half_reify_hook_cached(&self) -> Option<bool> {
        self.half_reify_hook
    }

    pub fn cache_half_reify_hook(&mut self, allowed: bool) {
        self.half_reify_hook = Some(allowed);
    }

    // ── Reverse mappers ────────────────────────────────────────────────

    pub fn register_reverse_mapper(&mut self, decl: DeclId, mapper: Rc<str>) {
        self.reverse_mappers.insert(decl, mapper);
    }

    pub fn has_reverse_mapper(&self, decl: DeclId) -> bool {
        self.reverse_mappers.contains_key(&decl)
    }

    // ── Warnings and call stack ────────────────────────────────────────

    pub fn warn(&mut self, loc: Location, msg: impl Into<String>) {
        let msg = msg.into();
        log::warn!("{loc}: {msg}");
        if self.warnings.len() >= MAX_WARNINGS {
            if !self.warnings_suppressed {
                self.warnings_suppressed = true;
                self.warnings
                    .push(Warning::new(Location::unknown(), "further warnings suppressed"));
            }
            return;
        }
        let frames: Vec<StackFrame> = self
            .call_stack
            .iter()
            .rev()
            .take(MAX_STACK_FRAMES)
            .cloned()
            .collect();
        self.warnings.push(Warning::new(loc, msg).with_stack(frames));
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn push_call_frame(&mut self, desc: impl Into<String>, loc: Location) {
        self.call_stack.push(StackFrame {
            desc: desc.into(),
            loc,
        });
    }

    pub fn pop_call_frame(&mut self) {
        self.call_stack.pop();
    }

    // ── Failure ────────────────────────────────────────────────────────

    /// Mark the model inconsistent: every flat item is removed, the skeleton
    /// `constraint false; solve satisfy;` is appended, and the output item
    /// is dropped unless the options ask to keep it. Returns the exception
    /// value to raise so callers can `return Err(env.fail(..))`.
    pub fn fail(&mut self, msg: &str, loc: Location) -> CompileError {
        if !self.failed {
            self.failed = true;
            self.warn(loc, msg.to_string());
            let keep_output = self.opts.keep_output_in_fzn;
            let output_item = self.flat.output_item;
            for item in self.flat.items.clone() {
                if keep_output && Some(item) == output_item {
                    continue;
                }
                self.mark_item_removed(item);
            }
            let f = self.consts.lit_false;
            self.add_flat_item(ItemKind::Constraint(f), Location::unknown());
            self.add_flat_item(
                ItemKind::Solve {
                    goal: SolveGoal::Satisfy,
                    ann: Annotations::new(),
                },
                Location::unknown(),
            );
        }
        CompileError::ModelInconsistent
    }

    // ── Dummy values ───────────────────────────────────────────────────

    /// The dummy value of a type, substituted when an expression turns out
    /// undefined in a non-boolean context (its witness is false).
    pub fn create_dummy(&mut self, ty: Type) -> ExprId {
        if ty.opt {
            return self.consts.absent;
        }
        if ty.dim != 0 {
            let e = self.new_expr(
                ExprKind::ArrayLit(ArrayLit::with_dims(vec![], vec![(1, 0)])),
                ty,
                Location::unknown(),
            );
            return e;
        }
        if ty.set {
            return self.intset_lit(Rc::new(IntSetVal::empty()), Location::unknown());
        }
        match ty.bt {
            BaseType::Bool => self.bool_lit(false),
            BaseType::Int => self.int_lit(IntVal::ZERO),
            BaseType::Float => self.float_lit(FloatVal::ZERO),
            BaseType::String => self.str_lit(""),
            BaseType::Tuple | BaseType::Record => {
                let fields: Vec<Type> = match ty.bt {
                    BaseType::Tuple => self.types.tuple_fields(ty.type_id).to_vec(),
                    _ => self
                        .types
                        .record_fields(ty.type_id)
                        .iter()
                        .map(|(_, t)| *t)
                        .collect(),
                };
                let elems: Vec<ExprId> = fields.into_iter().map(|t| self.create_dummy(t)).collect();
                self.new_expr(
                    ExprKind::ArrayLit(ArrayLit::new_1d(elems)),
                    ty,
                    Location::unknown(),
                )
            }
            _ => self.bool_lit(false),
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Env::new(FlatteningOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_interning_shares_nodes() {
        let mut env = Env::default();
        let a = env.int_lit(IntVal::Int(42));
        let b = env.int_lit(IntVal::Int(42));
        let c = env.int_lit(IntVal::Int(43));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(env.bool_lit(true), env.consts.lit_true);
    }

    #[test]
    fn introduced_names_are_stable() {
        let mut env = Env::default();
        let d0 = env.new_flat_decl(TypeInst::plain(Type::var_int()), Location::unknown());
        let d1 = env.new_flat_decl(TypeInst::plain(Type::var_int()), Location::unknown());
        assert_eq!(&*env.decls[d0].name, "X_INTRODUCED_0_");
        assert_eq!(&*env.decls[d1].name, "X_INTRODUCED_1_");
    }

    #[test]
    fn occurrence_counting_tracks_flat_items() {
        let mut env = Env::default();
        let d = env.new_flat_decl(TypeInst::plain(Type::var_int()), Location::unknown());
        let id = env.id_expr(d);
        let zero = env.int_lit(IntVal::ZERO);
        let c = env.call_expr("int_le".into(), vec![zero, id], Type::var_bool(), Location::unknown());
        let item = env.add_flat_item(ItemKind::Constraint(c), Location::unknown());
        assert_eq!(env.occurrences(d), 1);
        env.mark_item_removed(item);
        assert_eq!(env.occurrences(d), 0);
    }

    #[test]
    fn cse_hit_requires_structural_equality() {
        let mut env = Env::default();
        let dx = env.new_flat_decl(TypeInst::plain(Type::var_int()), Location::unknown());
        let dy = env.new_flat_decl(TypeInst::plain(Type::var_int()), Location::unknown());
        let x = env.id_expr(dx);
        let y = env.id_expr(dy);
        let k1 = env.call_expr("int_lt".into(), vec![x, y], Type::var_bool(), Location::unknown());
        let k2 = env.call_expr("int_lt".into(), vec![x, y], Type::var_bool(), Location::unknown());
        let k3 = env.call_expr("int_lt".into(), vec![y, x], Type::var_bool(), Location::unknown());
        let r = env.id_expr(dx);
        let t = env.consts.lit_true;
        env.cse_insert(k1, r, t);
        assert!(env.cse_find(k2).is_some());
        assert!(env.cse_find(k3).is_none());
    }

    #[test]
    fn cse_entries_invalidate_when_backing_decl_removed() {
        let mut env = Env::default();
        let d = env.new_flat_decl(TypeInst::plain(Type::var_bool()), Location::unknown());
        let dx = env.new_flat_decl(TypeInst::plain(Type::var_int()), Location::unknown());
        let x = env.id_expr(dx);
        let zero = env.int_lit(IntVal::ZERO);
        let key = env.call_expr("int_lt".into(), vec![zero, x], Type::var_bool(), Location::unknown());
        let r = env.id_expr(d);
        let t = env.consts.lit_true;
        env.cse_insert(key, r, t);
        assert!(env.cse_find(key).is_some());
        let item = env.decls[d].item.unwrap();
        env.mark_item_removed(item);
        assert!(env.cse_find(key).is_none());
    }

    #[test]
    fn fail_produces_post_fail_skeleton() {
        let mut env = Env::default();
        let d = env.new_flat_decl(TypeInst::plain(Type::var_int()), Location::unknown());
        let _ = d;
        let err = env.fail("expression evaluated to false", Location::unknown());
        assert_eq!(err, CompileError::ModelInconsistent);
        assert!(env.failed);
        // Every live flat item is the skeleton.
        let live: Vec<&ItemKind> = env
            .flat
            .items
            .iter()
            .filter(|&&i| !env.items[i].removed)
            .map(|&i| &env.items[i].kind)
            .collect();
        assert_eq!(live.len(), 2);
        assert!(matches!(live[0], ItemKind::Constraint(e) if *e == env.consts.lit_false));
        assert!(matches!(
            live[1],
            ItemKind::Solve {
                goal: SolveGoal::Satisfy,
                ..
            }
        ));
    }

    #[test]
    fn warning_buffer_is_bounded() {
        let mut env = Env::default();
        for i in 0..30 {
            env.warn(Location::unknown(), format!("w{i}"));
        }
        assert_eq!(env.warnings().len(), MAX_WARNINGS + 1);
        assert!(env
            .warnings()
            .last()
            .unwrap()
            .msg
            .contains("further warnings suppressed"));
    }

    #[test]
    fn dummy_values_by_type() {
        let mut env = Env::default();
        let d = env.create_dummy(Type::par_int());
        assert!(matches!(env.exprs[d].kind, ExprKind::IntLit(IntVal::Int(0))));
        let d = env.create_dummy(Type::par_int().with_opt(true));
        assert!(matches!(env.exprs[d].kind, ExprKind::Absent));
        let d = env.create_dummy(Type::par_set_int());
        assert!(matches!(env.exprs[d].kind, ExprKind::SetLit(_)));
    }
}
