// ty.rs — Compact type values and the structural-type interner
//
// A `Type` is a small Copy value: base kind, set/opt flags, array rank,
// par/var instantiation, a contains-var flag, and a 32-bit interned id that
// names an enum, a tuple shape, a record shape, or (for arrays) an entry in
// the array-enum table pairing per-dimension enum ids with the element id.
// The shapes themselves live in side tables owned by the TypeRegistry.

use std::rc::Rc;

use rustc_hash::FxHashMap;

// ── Type ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Bot,
    Bool,
    Int,
    Float,
    String,
    Ann,
    Tuple,
    Record,
    Top,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Inst {
    Par,
    Var,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Type {
    pub bt: BaseType,
    pub inst: Inst,
    /// Set-of flag. Only meaningful with `dim == 0`.
    pub set: bool,
    /// Optional flag; an opt value may be absent (`<>`).
    pub opt: bool,
    /// Array rank; 0 for scalars, -1 matches any rank in signatures.
    pub dim: i8,
    /// Interned enum / tuple / record / array-enum id; 0 when plain.
    pub type_id: u32,
    /// Whether an expression of this type can contain decision variables
    /// even when the top-level inst is par (e.g. a par-typed if over vars).
    pub cv: bool,
}

impl Type {
    pub const fn new(bt: BaseType, inst: Inst) -> Type {
        Type {
            bt,
            inst,
            set: false,
            opt: false,
            dim: 0,
            type_id: 0,
            cv: matches!(inst, Inst::Var),
        }
    }

    pub const fn par_int() -> Type {
        Type::new(BaseType::Int, Inst::Par)
    }
    pub const fn var_int() -> Type {
        Type::new(BaseType::Int, Inst::Var)
    }
    pub const fn par_bool() -> Type {
        Type::new(BaseType::Bool, Inst::Par)
    }
    pub const fn var_bool() -> Type {
        Type::new(BaseType::Bool, Inst::Var)
    }
    pub const fn par_float() -> Type {
        Type::new(BaseType::Float, Inst::Par)
    }
    pub const fn var_float() -> Type {
        Type::new(BaseType::Float, Inst::Var)
    }
    pub const fn par_string() -> Type {
        Type::new(BaseType::String, Inst::Par)
    }
    pub const fn ann() -> Type {
        Type::new(BaseType::Ann, Inst::Par)
    }
    pub const fn bot() -> Type {
        Type::new(BaseType::Bot, Inst::Par)
    }
    pub const fn top() -> Type {
        Type::new(BaseType::Top, Inst::Par)
    }

    pub const fn par_set_int() -> Type {
        Type::par_int().with_set(true)
    }
    pub const fn var_set_int() -> Type {
        Type::var_int().with_set(true)
    }
    pub const fn par_set_float() -> Type {
        Type::par_float().with_set(true)
    }

    pub const fn with_dim(mut self, dim: i8) -> Type {
        self.dim = dim;
        self
    }
    pub const fn with_set(mut self, set: bool) -> Type {
        self.set = set;
        self
    }
    pub const fn with_opt(mut self, opt: bool) -> Type {
        self.opt = opt;
        self
    }
    pub const fn with_inst(mut self, inst: Inst) -> Type {
        self.inst = inst;
        if matches!(inst, Inst::Var) {
            self.cv = true;
        }
        self
    }
    pub const fn with_type_id(mut self, id: u32) -> Type {
        self.type_id = id;
        self
    }
    pub const fn with_cv(mut self, cv: bool) -> Type {
        self.cv = cv;
        self
    }

    pub fn is_par(self) -> bool {
        matches!(self.inst, Inst::Par)
    }
    pub fn is_var(self) -> bool {
        matches!(self.inst, Inst::Var)
    }
    pub fn is_bool(self) -> bool {
        self.bt == BaseType::Bool && !self.set && self.dim == 0
    }
    pub fn is_int(self) -> bool {
        self.bt == BaseType::Int && !self.set && self.dim == 0
    }
    pub fn is_float(self) -> bool {
        self.bt == BaseType::Float && !self.set && self.dim == 0
    }
    pub fn is_string(self) -> bool {
        self.bt == BaseType::String && !self.set && self.dim == 0
    }
    pub fn is_set(self) -> bool {
        self.set && self.dim == 0
    }
    pub fn is_int_set(self) -> bool {
        self.is_set() && matches!(self.bt, BaseType::Int | BaseType::Bot)
    }
    pub fn is_bool_set(self) -> bool {
        self.is_set() && self.bt == BaseType::Bool
    }
    pub fn is_float_set(self) -> bool {
        self.is_set() && self.bt == BaseType::Float
    }
    pub fn is_array(self) -> bool {
        self.dim != 0
    }
    pub fn is_struct(self) -> bool {
        matches!(self.bt, BaseType::Tuple | BaseType::Record) && self.dim == 0
    }
    pub fn is_ann(self) -> bool {
        self.bt == BaseType::Ann
    }
    pub fn is_bot(self) -> bool {
        self.bt == BaseType::Bot
    }

    /// The scalar/set type obtained by stripping the array rank.
    pub fn elem_type(self, reg: &TypeRegistry) -> Type {
        if self.dim == 0 {
            return self;
        }
        let mut t = self.with_dim(0);
        if self.type_id != 0 {
            t.type_id = reg.array_enum_elem(self.type_id);
        }
        t
    }
}

// ── Subtyping and common type ───────────────────────────────────────────────

fn base_subtype(a: BaseType, b: BaseType) -> bool {
    use BaseType::*;
    a == b
        || a == Bot
        || b == Top
        || matches!((a, b), (Bool, Int) | (Bool, Float) | (Int, Float))
}

fn base_join(a: BaseType, b: BaseType) -> Option<BaseType> {
    if base_subtype(a, b) {
        Some(b)
    } else if base_subtype(b, a) {
        Some(a)
    } else {
        None
    }
}

impl Type {
    /// Subtype test in the coercion lattice: bot below everything, par below
    /// var, non-opt below opt, bool below int below float, structural types
    /// elementwise with equal arity (records: equal sorted field names).
    pub fn is_subtype_of(self, other: Type, reg: &TypeRegistry) -> bool {
        if other.bt == BaseType::Top {
            return self.set == other.set && (other.dim == -1 || self.dim == other.dim);
        }
        if other.dim != -1 && self.dim != other.dim {
            return false;
        }
        if self.set != other.set {
            return false;
        }
        if self.is_var() && other.is_par() {
            return false;
        }
        if self.opt && !other.opt {
            return false;
        }
        if self.bt == BaseType::Bot {
            return true;
        }
        if self.is_struct() || other.is_struct() {
            if self.bt != other.bt {
                return false;
            }
            return reg.struct_subtype(self, other);
        }
        if !base_subtype(self.bt, other.bt) {
            return false;
        }
        // Enum-distinct ints only coerce to the same enum or to plain int.
        let sid = reg.scalar_type_id(self);
        let oid = reg.scalar_type_id(other);
        oid == 0 || sid == oid
    }

    /// Least common supertype, or `bot()` if none exists.
    pub fn common_type(self, other: Type, reg: &TypeRegistry) -> Type {
        if self.is_subtype_of(other, reg) {
            return other.with_cv(self.cv || other.cv);
        }
        if other.is_subtype_of(self, reg) {
            return self.with_cv(self.cv || other.cv);
        }
        if self.dim != other.dim || self.set != other.set {
            return Type::bot();
        }
        if self.is_struct() || other.is_struct() {
            return reg.struct_common_type(self, other);
        }
        let bt = match base_join(self.bt, other.bt) {
            Some(bt) => bt,
            None => return Type::bot(),
        };
        let inst = if self.is_var() || other.is_var() {
            Inst::Var
        } else {
            Inst::Par
        };
        let sid = reg.scalar_type_id(self);
        let oid = reg.scalar_type_id(other);
        let mut t = Type::new(bt, inst)
            .with_set(self.set)
            .with_opt(self.opt || other.opt)
            .with_cv(self.cv || other.cv);
        let elem_id = if sid == oid { sid } else { 0 };
        if self.dim != 0 {
            // Rebuild the array-enum entry; disagreeing dimensions fall
            // back to plain int index sets.
            let da = reg.array_enum_dims(self.type_id, self.dim);
            let db = reg.array_enum_dims(other.type_id, other.dim);
            let dims: Vec<u32> = da
                .iter()
                .zip(db.iter())
                .map(|(x, y)| if x == y { *x } else { 0 })
                .collect();
            t = t.with_dim(self.dim);
            t.type_id = if dims.iter().all(|&d| d == 0) && elem_id == 0 {
                0
            } else {
                reg_register_array_enum_shim(reg, &dims, elem_id)
            };
        } else {
            t.type_id = elem_id;
        }
        t
    }
}

// common_type is a read-mostly operation, but rebuilding a merged array-enum
// entry may intern a new row. The registry uses interior mutability for that
// one table so common_type can keep a shared receiver.
fn reg_register_array_enum_shim(reg: &TypeRegistry, dims: &[u32], elem: u32) -> u32 {
    reg.intern_array_enum(dims, elem)
}

// ── Registry ────────────────────────────────────────────────────────────────

/// One user-declared enumerated type.
#[derive(Debug, Clone)]
pub struct EnumInfo {
    pub name: Rc<str>,
    /// Member names in declaration order; ordinal i corresponds to value i+1.
    pub members: Vec<Rc<str>>,
}

/// Side tables backing `Type::type_id`. Ids are 1-based; 0 means "plain".
#[derive(Debug, Default)]
pub struct TypeRegistry {
    tuples: Vec<Rc<[Type]>>,
    tuple_lookup: FxHashMap<Vec<Type>, u32>,
    records: Vec<Rc<[(Rc<str>, Type)]>>,
    record_lookup: FxHashMap<Vec<(Rc<str>, Type)>, u32>,
    array_enums: std::cell::RefCell<ArrayEnumTable>,
    enums: Vec<EnumInfo>,
    enum_lookup: FxHashMap<Rc<str>, u32>,
}

#[derive(Debug, Default)]
struct ArrayEnumTable {
    rows: Vec<Rc<[u32]>>,
    lookup: FxHashMap<Vec<u32>, u32>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a tuple shape; returns its 1-based id.
    pub fn register_tuple_type(&mut self, fields: Vec<Type>) -> u32 {
        if let Some(&id) = self.tuple_lookup.get(&fields) {
            return id;
        }
        let id = (self.tuples.len() + 1) as u32;
        self.tuples.push(fields.clone().into());
        self.tuple_lookup.insert(fields, id);
        id
    }

    /// Intern a record shape. Fields are stored sorted by name; callers must
    /// sort their literals with the same order (see `sort_record_fields`).
    pub fn register_record_type(&mut self, mut fields: Vec<(Rc<str>, Type)>) -> u32 {
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        if let Some(&id) = self.record_lookup.get(&fields) {
            return id;
        }
        let id = (self.records.len() + 1) as u32;
        self.records.push(fields.clone().into());
        self.record_lookup.insert(fields, id);
        id
    }

    pub fn register_enum(&mut self, name: Rc<str>, members: Vec<Rc<str>>) -> u32 {
        if let Some(&id) = self.enum_lookup.get(&name) {
            return id;
        }
        let id = (self.enums.len() + 1) as u32;
        self.enum_lookup.insert(name.clone(), id);
        self.enums.push(EnumInfo { name, members });
        id
    }

    /// Intern `[dim_enum_0, ..., dim_enum_{n-1}, elem_id]`; the returned id
    /// is what an array type's `type_id` stores when any entry is nonzero.
    pub fn intern_array_enum(&self, dims: &[u32], elem: u32) -> u32 {
        let mut row: Vec<u32> = dims.to_vec();
        row.push(elem);
        let mut table = self.array_enums.borrow_mut();
        if let Some(&id) = table.lookup.get(&row) {
            return id;
        }
        let id = (table.rows.len() + 1) as u32;
        table.rows.push(row.clone().into());
        table.lookup.insert(row, id);
        id
    }

    /// Array type over `elem` with `dims` index enum ids. Arrays of arrays
    /// are not representable; the canonical form is one flat array plus
    /// per-dimension index sets, so a ranked element type yields `bot`.
    pub fn array_type(&self, elem: Type, dim_enum_ids: &[u32]) -> Type {
        if elem.dim != 0 {
            return Type::bot();
        }
        let dim = dim_enum_ids.len() as i8;
        let mut t = elem.with_dim(dim);
        if dim_enum_ids.iter().any(|&d| d != 0) || elem.type_id != 0 {
            t.type_id = self.intern_array_enum(dim_enum_ids, elem.type_id);
        } else {
            t.type_id = 0;
        }
        t
    }

    pub fn tuple_fields(&self, id: u32) -> Rc<[Type]> {
        self.tuples[(id - 1) as usize].clone()
    }

    pub fn record_fields(&self, id: u32) -> Rc<[(Rc<str>, Type)]> {
        self.records[(id - 1) as usize].clone()
    }

    pub fn enum_info(&self, id: u32) -> &EnumInfo {
        &self.enums[(id - 1) as usize]
    }

    pub fn lookup_enum(&self, name: &str) -> Option<u32> {
        self.enum_lookup.get(name).copied()
    }

    /// The enum member name for 1-based ordinal `ord`, if in range.
    pub fn enum_member(&self, enum_id: u32, ord: i64) -> Option<Rc<str>> {
        let info = self.enum_info(enum_id);
        if ord >= 1 && (ord as usize) <= info.members.len() {
            Some(info.members[(ord - 1) as usize].clone())
        } else {
            None
        }
    }

    pub fn lookup_enum_member(&self, enum_id: u32, name: &str) -> Option<i64> {
        let info = self.enum_info(enum_id);
        info.members
            .iter()
            .position(|m| &**m == name)
            .map(|i| (i + 1) as i64)
    }

    /// Element type id of an interned array-enum row.
    pub fn array_enum_elem(&self, id: u32) -> u32 {
        if id == 0 {
            return 0;
        }
        let table = self.array_enums.borrow();
        *table.rows[(id - 1) as usize].last().unwrap()
    }

    /// Per-dimension enum ids of an array type (all zeros when uninterned).
    pub fn array_enum_dims(&self, id: u32, dim: i8) -> Vec<u32> {
        if id == 0 {
            return vec![0; dim.max(0) as usize];
        }
        let table = self.array_enums.borrow();
        let row = &table.rows[(id - 1) as usize];
        row[..row.len() - 1].to_vec()
    }

    /// The scalar-level type id of `t` (resolving through the array table).
    fn scalar_type_id(&self, t: Type) -> u32 {
        if t.dim != 0 {
            self.array_enum_elem(t.type_id)
        } else {
            t.type_id
        }
    }

    fn struct_subtype(&self, a: Type, b: Type) -> bool {
        let aid = self.scalar_type_id(a);
        let bid = self.scalar_type_id(b);
        if aid == 0 || bid == 0 {
            return false;
        }
        match a.bt {
            BaseType::Tuple => {
                let fa = self.tuple_fields(aid);
                let fb = self.tuple_fields(bid);
                fa.len() == fb.len()
                    && fa
                        .iter()
                        .zip(fb.iter())
                        .all(|(x, y)| x.is_subtype_of(*y, self))
            }
            BaseType::Record => {
                let fa = self.record_fields(aid);
                let fb = self.record_fields(bid);
                fa.len() == fb.len()
                    && fa
                        .iter()
                        .zip(fb.iter())
                        .all(|((na, ta), (nb, tb))| na == nb && ta.is_subtype_of(*tb, self))
            }
            _ => false,
        }
    }

    fn struct_common_type(&self, a: Type, b: Type) -> Type {
        if a.bt != b.bt {
            return Type::bot();
        }
        let aid = self.scalar_type_id(a);
        let bid = self.scalar_type_id(b);
        if aid == 0 || bid == 0 {
            return Type::bot();
        }
        // Equal arity is required; records additionally need equal names.
        // The merged shape has to be interned, which needs &mut self, so
        // common structural types are only computed between registered
        // shapes that already coincide fieldwise.
        match a.bt {
            BaseType::Tuple => {
                let fa = self.tuple_fields(aid);
                let fb = self.tuple_fields(bid);
                if fa.len() != fb.len() {
                    return Type::bot();
                }
                if fa
                    .iter()
                    .zip(fb.iter())
                    .all(|(x, y)| x.common_type(*y, self) != Type::bot())
                    && aid == bid
                {
                    a.with_cv(a.cv || b.cv)
                } else {
                    Type::bot()
                }
            }
            BaseType::Record => {
                let fa = self.record_fields(aid);
                let fb = self.record_fields(bid);
                if fa.len() != fb.len()
                    || fa.iter().zip(fb.iter()).any(|((na, _), (nb, _))| na != nb)
                {
                    return Type::bot();
                }
                if aid == bid {
                    a.with_cv(a.cv || b.cv)
                } else {
                    Type::bot()
                }
            }
            _ => Type::bot(),
        }
    }
}

/// Sort a record literal's (name, payload) pairs into registration order.
pub fn sort_record_fields<T>(fields: &mut Vec<(Rc<str>, T)>) {
    fields.sort_by(|a, b| a.0.cmp(&b.0));
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_subtyping() {
        let reg = TypeRegistry::new();
        assert!(Type::par_int().is_subtype_of(Type::var_int(), &reg));
        assert!(Type::par_bool().is_subtype_of(Type::par_int(), &reg));
        assert!(Type::par_int().is_subtype_of(Type::par_float(), &reg));
        assert!(!Type::var_int().is_subtype_of(Type::par_int(), &reg));
        assert!(!Type::par_float().is_subtype_of(Type::par_int(), &reg));
        assert!(Type::bot().is_subtype_of(Type::var_set_int().with_set(false), &reg));
        assert!(Type::par_int()
            .is_subtype_of(Type::par_int().with_opt(true), &reg));
    }

    #[test]
    fn common_type_joins() {
        let reg = TypeRegistry::new();
        let t = Type::par_int().common_type(Type::var_int(), &reg);
        assert_eq!(t.inst, Inst::Var);
        let t = Type::par_int().common_type(Type::par_float(), &reg);
        assert_eq!(t.bt, BaseType::Float);
        let t = Type::par_int().common_type(Type::par_string(), &reg);
        assert!(t.is_bot());
    }

    #[test]
    fn tuple_interning_is_stable() {
        let mut reg = TypeRegistry::new();
        let a = reg.register_tuple_type(vec![Type::par_int(), Type::par_bool()]);
        let b = reg.register_tuple_type(vec![Type::par_int(), Type::par_bool()]);
        let c = reg.register_tuple_type(vec![Type::par_bool()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, 1);
    }

    #[test]
    fn record_fields_sorted_on_registration() {
        let mut reg = TypeRegistry::new();
        let id = reg.register_record_type(vec![
            ("s".into(), Type::par_string()),
            ("a".into(), Type::par_int()),
        ]);
        let fields = reg.record_fields(id);
        assert_eq!(&*fields[0].0, "a");
        assert_eq!(&*fields[1].0, "s");
    }

    #[test]
    fn array_of_array_is_rejected() {
        let reg = TypeRegistry::new();
        let arr = reg.array_type(Type::var_int(), &[0]);
        assert_eq!(arr.dim, 1);
        let nested = reg.array_type(arr, &[0]);
        assert!(nested.is_bot());
    }

    #[test]
    fn array_enum_ids_fall_back_on_disagreement() {
        let mut reg = TypeRegistry::new();
        let colors = reg.register_enum("Colors".into(), vec!["R".into(), "G".into()]);
        let days = reg.register_enum("Days".into(), vec!["Mon".into()]);
        let a = reg.array_type(Type::par_int(), &[colors]);
        let b = reg.array_type(Type::par_int(), &[days]);
        let j = a.common_type(b, &reg);
        assert_eq!(j.dim, 1);
        assert_eq!(reg.array_enum_dims(j.type_id, 1), vec![0]);
    }

    #[test]
    fn enum_member_lookup() {
        let mut reg = TypeRegistry::new();
        let id = reg.register_enum("Colors".into(), vec!["R".into(), "G".into(), "B".into()]);
        assert_eq!(reg.lookup_enum_member(id, "G"), Some(2));
        assert_eq!(reg.enum_member(id, 3).as_deref(), Some("B"));
        assert_eq!(reg.enum_member(id, 4), None);
    }
}
