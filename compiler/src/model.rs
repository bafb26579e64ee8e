// model.rs — Model item sequence, constants pool, and the reification map
//
// A Model is an ordered list of item ids plus a name-indexed function
// registry. Two instances exist per compilation: the source model and the
// flat model the flattener appends to. Both share the environment's arenas.

use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::arena::Arena;
use crate::ast::{
    Annotations, ExprKind, ExprNode, ItemData, ItemKind, Location, TypeInst, VarDeclData,
};
use crate::id::{DeclId, ExprId, FnId, ItemId};
use crate::ty::Type;

// ── Model ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Model {
    pub items: Vec<ItemId>,
    /// Overload lists per function name, in registration order.
    pub functions: FxHashMap<Rc<str>, Vec<FnId>>,
    pub solve_item: Option<ItemId>,
    pub output_item: Option<ItemId>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_item(&mut self, id: ItemId, kind: &ItemKind) {
        match kind {
            ItemKind::Solve { .. } => self.solve_item = Some(id),
            ItemKind::Output(_) => self.output_item = Some(id),
            _ => {}
        }
        self.items.push(id);
    }

    pub fn register_function(&mut self, name: Rc<str>, f: FnId) {
        self.functions.entry(name).or_default().push(f);
    }

    pub fn overloads(&self, name: &str) -> &[FnId] {
        self.functions.get(name).map_or(&[], |v| v.as_slice())
    }

    /// Drop removed items from the ordered list. The single physical
    /// compaction pass; node storage itself is released with the arenas.
    pub fn compact(&mut self, items: &Arena<ItemId, ItemData>) {
        self.items.retain(|&i| !items[i].removed);
    }
}

// ── Reification map ─────────────────────────────────────────────────────────

/// Maps base predicate names to their fully-reified (`_reif`) and
/// half-reified (`_imp`) equivalents, and records which variants exist.
#[derive(Debug, Default)]
pub struct ReifyMap {
    reif: FxHashMap<Rc<str>, Rc<str>>,
    has_reif: FxHashSet<Rc<str>>,
    has_imp: FxHashSet<Rc<str>>,
}

impl ReifyMap {
    /// Reified name for `id`: a registered special case, or `id` + `_reif`.
    pub fn reified(&self, id: &Rc<str>) -> Rc<str> {
        if let Some(r) = self.reif.get(id) {
            return r.clone();
        }
        format!("{id}_reif").into()
    }

    pub fn half_reified(&self, id: &Rc<str>) -> Rc<str> {
        format!("{id}_imp").into()
    }

    pub fn has_reified(&self, id: &str) -> bool {
        self.has_reif.contains(id)
    }

    pub fn has_half_reified(&self, id: &str) -> bool {
        self.has_imp.contains(id)
    }

    fn insert(&mut self, base: Rc<str>, reif: bool, imp: bool) {
        if reif {
            self.has_reif.insert(base.clone());
        }
        if imp {
            self.has_imp.insert(base);
        }
    }

    fn insert_special(&mut self, base: Rc<str>, target: Rc<str>) {
        self.has_reif.insert(base.clone());
        self.reif.insert(base, target);
    }
}

// ── Constants pool ──────────────────────────────────────────────────────────

/// Interned names used throughout flattening.
#[derive(Debug, Clone)]
pub struct ConstantIds {
    pub ctx_root: Rc<str>,
    pub ctx_pos: Rc<str>,
    pub ctx_neg: Rc<str>,
    pub ctx_mix: Rc<str>,
    pub defines_var: Rc<str>,
    pub is_defined_var: Rc<str>,
    pub output_var: Rc<str>,
    pub promise_total: Rc<str>,
    pub maybe_partial: Rc<str>,
    pub computed_domain: Rc<str>,
    pub mzn_path: Rc<str>,
    pub forall: Rc<str>,
    pub exists: Rc<str>,
    pub clause: Rc<str>,
    pub sum: Rc<str>,
    pub lin_exp: Rc<str>,
    pub bool2int: Rc<str>,
    pub int2float: Rc<str>,
    pub element: Rc<str>,
    pub if_then_else: Rc<str>,
    pub set_in: Rc<str>,
    pub mzn_set_in_internal: Rc<str>,
    pub int_lin_eq: Rc<str>,
    pub float_lin_eq: Rc<str>,
    pub bool_clause: Rc<str>,
    pub bool_clause_reif: Rc<str>,
    pub array_bool_and: Rc<str>,
    pub array_bool_and_imp: Rc<str>,
    pub array_bool_or: Rc<str>,
    pub bool_not: Rc<str>,
    pub bool_eq: Rc<str>,
    pub ub: Rc<str>,
    pub float_dom: Rc<str>,
    pub int_le: Rc<str>,
    pub deopt: Rc<str>,
    pub occurs: Rc<str>,
}

impl ConstantIds {
    fn new() -> Self {
        ConstantIds {
            ctx_root: "ctx_root".into(),
            ctx_pos: "ctx_pos".into(),
            ctx_neg: "ctx_neg".into(),
            ctx_mix: "ctx_mix".into(),
            defines_var: "defines_var".into(),
            is_defined_var: "is_defined_var".into(),
            output_var: "output_var".into(),
            promise_total: "promise_total".into(),
            maybe_partial: "maybe_partial".into(),
            computed_domain: "computed_domain".into(),
            mzn_path: "mzn_path".into(),
            forall: "forall".into(),
            exists: "exists".into(),
            clause: "clause".into(),
            sum: "sum".into(),
            lin_exp: "lin_exp".into(),
            bool2int: "bool2int".into(),
            int2float: "int2float".into(),
            element: "element".into(),
            if_then_else: "if_then_else".into(),
            set_in: "set_in".into(),
            mzn_set_in_internal: "mzn_set_in_internal".into(),
            int_lin_eq: "int_lin_eq".into(),
            float_lin_eq: "float_lin_eq".into(),
            bool_clause: "bool_clause".into(),
            bool_clause_reif: "bool_clause_reif".into(),
            array_bool_and: "array_bool_and".into(),
            array_bool_and_imp: "array_bool_and_imp".into(),
            array_bool_or: "array_bool_or".into(),
            bool_not: "bool_not".into(),
            bool_eq: "bool_eq".into(),
            ub: "ub".into(),
            float_dom: "float_dom".into(),
            int_le: "int_le".into(),
            deopt: "deopt".into(),
            occurs: "occurs".into(),
        }
    }
}

/// Shared literal nodes and sentinel declarations. `var_true` passed as a
/// binding target means "root context, result must hold".
#[derive(Debug)]
pub struct Constants {
    pub lit_true: ExprId,
    pub lit_false: ExprId,
    pub absent: ExprId,
    pub var_true: DeclId,
    pub var_false: DeclId,
    pub ids: ConstantIds,
}

impl Constants {
    pub fn new(
        exprs: &mut Arena<ExprId, ExprNode>,
        decls: &mut Arena<DeclId, VarDeclData>,
    ) -> Self {
        let mut lit = |kind: ExprKind, ty: Type| {
            exprs.alloc(ExprNode {
                kind,
                ty,
                loc: Location::unknown(),
                ann: Annotations::new(),
            })
        };
        let lit_true = lit(ExprKind::BoolLit(true), Type::par_bool());
        let lit_false = lit(ExprKind::BoolLit(false), Type::par_bool());
        let absent = lit(ExprKind::Absent, Type::bot().with_opt(true));

        let mut sentinel = |name: &str, e: ExprId| {
            decls.alloc(VarDeclData {
                ti: TypeInst::plain(Type::var_bool()),
                name: name.into(),
                e: Some(e),
                ann: Annotations::new(),
                flat: None,
                introduced: true,
                toplevel: true,
                evaluated: false,
                removed: false,
                loc: Location::unknown(),
                item: None,
            })
        };
        let var_true = sentinel("true", lit_true);
        let var_false = sentinel("false", lit_false);
        // Sentinels are their own flat representatives.
        decls[var_true].flat = Some(var_true);
        decls[var_false].flat = Some(var_false);

        Constants {
            lit_true,
            lit_false,
            absent,
            var_true,
            var_false,
            ids: ConstantIds::new(),
        }
    }
}

// ── Builtin registry ────────────────────────────────────────────────────────

/// A primitive predicate/function the flat model may call directly.
struct Builtin {
    name: &'static str,
    params: &'static [Type],
    ret: Type,
    /// Whether `_reif` / `_imp` forms exist in the solver library.
    reif: bool,
    imp: bool,
}

const PAR_INT: Type = Type::par_int();
const VAR_INT: Type = Type::var_int();
const VAR_BOOL: Type = Type::var_bool();
const PAR_BOOL: Type = Type::par_bool();
const VAR_FLOAT: Type = Type::var_float();
const PAR_FLOAT: Type = Type::par_float();

const fn arr(t: Type) -> Type {
    t.with_dim(1)
}

#[rustfmt::skip]
const BUILTINS: &[Builtin] = &[
    // Integer comparisons and arithmetic.
    Builtin { name: "int_eq",     params: &[VAR_INT, VAR_INT],           ret: VAR_BOOL, reif: true,  imp: true },
    Builtin { name: "int_ne",     params: &[VAR_INT, VAR_INT],           ret: VAR_BOOL, reif: true,  imp: true },
    Builtin { name: "int_le",     params: &[VAR_INT, VAR_INT],           ret: VAR_BOOL, reif: true,  imp: true },
    Builtin { name: "int_lt",     params: &[VAR_INT, VAR_INT],           ret: VAR_BOOL, reif: true,  imp: true },
    Builtin { name: "int_lin_eq", params: &[arr(PAR_INT), arr(VAR_INT), PAR_INT], ret: VAR_BOOL, reif: true, imp: true },
    Builtin { name: "int_lin_le", params: &[arr(PAR_INT), arr(VAR_INT), PAR_INT], ret: VAR_BOOL, reif: true, imp: true },
    Builtin { name: "int_lin_ne", params: &[arr(PAR_INT), arr(VAR_INT), PAR_INT], ret: VAR_BOOL, reif: true, imp: false },
    Builtin { name: "int_abs",    params: &[VAR_INT, VAR_INT],           ret: VAR_BOOL, reif: false, imp: false },
    Builtin { name: "int_times",  params: &[VAR_INT, VAR_INT, VAR_INT],  ret: VAR_BOOL, reif: false, imp: false },
    Builtin { name: "int_div",    params: &[VAR_INT, VAR_INT, VAR_INT],  ret: VAR_BOOL, reif: false, imp: false },
    Builtin { name: "int_mod",    params: &[VAR_INT, VAR_INT, VAR_INT],  ret: VAR_BOOL, reif: false, imp: false },
    Builtin { name: "int_pow",    params: &[VAR_INT, VAR_INT, VAR_INT],  ret: VAR_BOOL, reif: false, imp: false },
    Builtin { name: "int_min",    params: &[VAR_INT, VAR_INT, VAR_INT],  ret: VAR_BOOL, reif: false, imp: false },
    Builtin { name: "int_max",    params: &[VAR_INT, VAR_INT, VAR_INT],  ret: VAR_BOOL, reif: false, imp: false },
    // Booleans.
    Builtin { name: "bool_eq",    params: &[VAR_BOOL, VAR_BOOL],         ret: VAR_BOOL, reif: true,  imp: true },
    Builtin { name: "bool_not",   params: &[VAR_BOOL, VAR_BOOL],         ret: VAR_BOOL, reif: false, imp: false },
    Builtin { name: "bool_clause", params: &[arr(VAR_BOOL), arr(VAR_BOOL)], ret: VAR_BOOL, reif: true, imp: true },
    Builtin { name: "array_bool_and", params: &[arr(VAR_BOOL), VAR_BOOL], ret: VAR_BOOL, reif: false, imp: true },
    Builtin { name: "array_bool_or",  params: &[arr(VAR_BOOL), VAR_BOOL], ret: VAR_BOOL, reif: false, imp: false },
    Builtin { name: "bool2int",   params: &[VAR_BOOL, VAR_INT],          ret: VAR_BOOL, reif: false, imp: false },
    // Sets.
    Builtin { name: "set_in",     params: &[VAR_INT, Type::par_set_int()], ret: VAR_BOOL, reif: true, imp: true },
    Builtin { name: "mzn_set_in_internal", params: &[VAR_INT, Type::par_set_int()], ret: VAR_BOOL, reif: true, imp: false },
    // Floats.
    Builtin { name: "float_eq",   params: &[VAR_FLOAT, VAR_FLOAT],       ret: VAR_BOOL, reif: true,  imp: true },
    Builtin { name: "float_le",   params: &[VAR_FLOAT, VAR_FLOAT],       ret: VAR_BOOL, reif: true,  imp: true },
    Builtin { name: "float_lt",   params: &[VAR_FLOAT, VAR_FLOAT],       ret: VAR_BOOL, reif: true,  imp: true },
    Builtin { name: "float_lin_eq", params: &[arr(PAR_FLOAT), arr(VAR_FLOAT), PAR_FLOAT], ret: VAR_BOOL, reif: true, imp: true },
    Builtin { name: "float_lin_le", params: &[arr(PAR_FLOAT), arr(VAR_FLOAT), PAR_FLOAT], ret: VAR_BOOL, reif: true, imp: true },
    Builtin { name: "float_dom",  params: &[VAR_FLOAT, arr(PAR_FLOAT)],  ret: VAR_BOOL, reif: false, imp: false },
    Builtin { name: "float_times", params: &[VAR_FLOAT, VAR_FLOAT, VAR_FLOAT], ret: VAR_BOOL, reif: false, imp: false },
    Builtin { name: "float_div",  params: &[VAR_FLOAT, VAR_FLOAT, VAR_FLOAT], ret: VAR_BOOL, reif: false, imp: false },
    // Element family; index computation is delegated to these.
    Builtin { name: "array_int_element",   params: &[VAR_INT, arr(PAR_INT), VAR_INT],     ret: VAR_BOOL, reif: false, imp: false },
    Builtin { name: "array_var_int_element", params: &[VAR_INT, arr(VAR_INT), VAR_INT],   ret: VAR_BOOL, reif: false, imp: false },
    Builtin { name: "array_bool_element",  params: &[VAR_INT, arr(PAR_BOOL), VAR_BOOL],   ret: VAR_BOOL, reif: false, imp: false },
    Builtin { name: "array_var_bool_element", params: &[VAR_INT, arr(VAR_BOOL), VAR_BOOL], ret: VAR_BOOL, reif: false, imp: false },
    Builtin { name: "array_float_element", params: &[VAR_INT, arr(PAR_FLOAT), VAR_FLOAT], ret: VAR_BOOL, reif: false, imp: false },
    Builtin { name: "array_var_float_element", params: &[VAR_INT, arr(VAR_FLOAT), VAR_FLOAT], ret: VAR_BOOL, reif: false, imp: false },
    // Conditionals on variable conditions.
    Builtin { name: "if_then_else_int",   params: &[arr(VAR_BOOL), arr(VAR_INT), VAR_INT],     ret: VAR_BOOL, reif: false, imp: false },
    Builtin { name: "if_then_else_float", params: &[arr(VAR_BOOL), arr(VAR_FLOAT), VAR_FLOAT], ret: VAR_BOOL, reif: false, imp: false },
    Builtin { name: "if_then_else_bool",  params: &[arr(VAR_BOOL), arr(VAR_BOOL), VAR_BOOL],   ret: VAR_BOOL, reif: false, imp: false },
];

/// Register the primitive library into `model` and build the reify map.
pub fn register_builtins(
    functions: &mut Arena<FnId, crate::ast::FunctionData>,
    model: &mut Model,
) -> ReifyMap {
    let mut reify = ReifyMap::default();
    for b in BUILTINS {
        let name: Rc<str> = b.name.into();
        let f = functions.alloc(crate::ast::FunctionData {
            name: name.clone(),
            params: Vec::new(),
            param_tys: b.params.to_vec(),
            ret: TypeInst::plain(b.ret),
            body: None,
            ann: Annotations::new(),
            builtin: true,
            loc: Location::unknown(),
        });
        model.register_function(name.clone(), f);
        reify.insert(name, b.reif, b.imp);
    }
    // Comprehension-level predicates reify onto their clause forms.
    reify.insert_special("clause".into(), "bool_clause_reif".into());
    reify.insert_special("forall".into(), "forall_reif".into());
    reify.insert_special("exists".into(), "exists_reif".into());
    // bool_not is its own negation.
    reify.insert_special("bool_not".into(), "bool_not".into());
    reify
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reify_map_defaults_append_suffix() {
        let m = ReifyMap::default();
        assert_eq!(&*m.reified(&Rc::from("int_lt")), "int_lt_reif");
        assert_eq!(&*m.half_reified(&Rc::from("int_lt")), "int_lt_imp");
    }

    #[test]
    fn builtins_register_overloads_and_variants() {
        let mut functions = Arena::new();
        let mut model = Model::new();
        let reify = register_builtins(&mut functions, &mut model);
        assert_eq!(model.overloads("int_lt").len(), 1);
        assert!(reify.has_reified("int_lt"));
        assert!(reify.has_half_reified("int_lt"));
        assert!(!reify.has_half_reified("int_lin_ne"));
        assert_eq!(&*reify.reified(&Rc::from("clause")), "bool_clause_reif");
    }

    #[test]
    fn compact_drops_removed_items() {
        let mut items: Arena<ItemId, ItemData> = Arena::new();
        let mut model = Model::new();
        let a = items.alloc(ItemData {
            kind: ItemKind::Include("stdlib.tn".into()),
            loc: Location::unknown(),
            removed: false,
        });
        let b = items.alloc(ItemData {
            kind: ItemKind::Include("gone.tn".into()),
            loc: Location::unknown(),
            removed: true,
        });
        model.push_item(a, &items[a].kind.clone());
        model.push_item(b, &items[b].kind.clone());
        model.compact(&items);
        assert_eq!(model.items, vec![a]);
    }
}
