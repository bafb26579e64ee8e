// json.rs — Type-directed JSON data loader
//
// Parses RFC 8259 JSON (plus the model-data extensions: enum objects, `set`
// objects with range pairs, keyed enum-indexed arrays) into assignment items
// for known top-level declarations. Parsing is directed by the target
// declaration's TypeInst, carried through nested arrays, tuples, records,
// sets, and enums, so the same JSON shape can produce different literals at
// different typed positions.

use std::rc::Rc;

use logos::Logos;

use crate::ast::{
    ArrayLit, Call, ExprKind, Ident, ItemKind, Location, SetLit, TypeInst,
};
use crate::diag::{CompileError, Result};
use crate::env::Env;
use crate::id::{DeclId, ExprId, ItemId};
use crate::ty::{BaseType, Type};
use crate::val::{FloatVal, IntSetVal, IntVal};

// ── Lexer ───────────────────────────────────────────────────────────────────

fn lex_string(lex: &mut logos::Lexer<'_, Token>) -> String {
    let raw = lex.slice();
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            // Unknown escapes are kept verbatim, prefixed by the backslash.
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn lex_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn lex_float(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token {
    #[token("{")]
    ObjOpen,
    #[token("}")]
    ObjClose,
    #[token("[")]
    ListOpen,
    #[token("]")]
    ListClose,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[regex(r"-?[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", lex_float)]
    #[regex(r"-?[0-9]+[eE][+-]?[0-9]+", lex_float)]
    Float(f64),
    #[regex(r"-?[0-9]+", lex_int)]
    Int(i64),
    #[regex(r#""([^"\\]|\\.)*""#, lex_string)]
    Str(String),
}

// ── Parser ──────────────────────────────────────────────────────────────────

struct JsonParser<'a> {
    env: &'a mut Env,
    tokens: Vec<(Token, usize)>,
    pos: usize,
    filename: Rc<str>,
    line_starts: Vec<usize>,
}

impl<'a> JsonParser<'a> {
    fn new(env: &'a mut Env, text: &str, filename: &str) -> Result<Self> {
        let file: Rc<str> = env.intern(filename);
        let line_starts: Vec<usize> = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        let mut tokens = Vec::new();
        let mut lexer = Token::lexer(text);
        while let Some(tok) = lexer.next() {
            let off = lexer.span().start;
            match tok {
                Ok(t) => tokens.push((t, off)),
                Err(()) => {
                    let loc = loc_at(&file, &line_starts, off);
                    return Err(CompileError::json(
                        loc,
                        format!("unrecognized token '{}'", lexer.slice()),
                    ));
                }
            }
        }
        Ok(JsonParser {
            env,
            tokens,
            pos: 0,
            filename: file,
            line_starts,
        })
    }

    fn here(&self) -> Location {
        let off = self
            .tokens
            .get(self.pos)
            .map(|&(_, o)| o)
            .unwrap_or_else(|| self.tokens.last().map(|&(_, o)| o).unwrap_or(0));
        loc_at(&self.filename, &self.line_starts, off)
    }

    fn err(&self, msg: impl Into<String>) -> CompileError {
        CompileError::json(self.here(), msg)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Result<Token> {
        let t = self
            .tokens
            .get(self.pos)
            .map(|(t, _)| t.clone())
            .ok_or_else(|| self.err("unexpected end of input"))?;
        self.pos += 1;
        Ok(t)
    }

    fn expect(&mut self, t: Token) -> Result<()> {
        let got = self.next()?;
        if got == t {
            Ok(())
        } else {
            Err(self.err(format!("expected {t:?}, found {got:?}")))
        }
    }

    fn eat(&mut self, t: &Token) -> bool {
        if self.peek() == Some(t) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_string(&mut self) -> Result<String> {
        match self.next()? {
            Token::Str(s) => Ok(s),
            got => Err(self.err(format!("expected string, found {got:?}"))),
        }
    }

    // ── Top level ──────────────────────────────────────────────────────

    /// `{ "name": value, ... }`, one assignment item per known declaration.
    fn parse_data(&mut self) -> Result<Vec<ItemId>> {
        self.expect(Token::ObjOpen)?;
        let mut out = Vec::new();
        if self.eat(&Token::ObjClose) {
            return Ok(out);
        }
        loop {
            let loc = self.here();
            let name = self.expect_string()?;
            self.expect(Token::Colon)?;
            match self.find_toplevel_decl(&name) {
                Some(decl) => {
                    let ti = self.env.decls[decl].ti.clone();
                    let e = self.parse_value(Some(&ti))?;
                    let interned = self.env.intern(&name);
                    let item = self.env.add_source_item(
                        ItemKind::Assign {
                            name: interned,
                            e,
                            decl: Some(decl),
                        },
                        loc,
                    );
                    out.push(item);
                }
                None => {
                    self.env
                        .warn(loc, format!("ignoring data for unknown variable '{name}'"));
                    self.skip_value()?;
                }
            }
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(Token::ObjClose)?;
            break;
        }
        if self.pos != self.tokens.len() {
            return Err(self.err("trailing content after top-level object"));
        }
        Ok(out)
    }

    fn find_toplevel_decl(&self, name: &str) -> Option<DeclId> {
        for &i in &self.env.model.items {
            if let ItemKind::VarDecl(d) = self.env.items[i].kind {
                if &*self.env.decls[d].name == name {
                    return Some(d);
                }
            }
        }
        None
    }

    fn skip_value(&mut self) -> Result<()> {
        let mut depth = 0usize;
        loop {
            match self.next()? {
                Token::ObjOpen | Token::ListOpen => depth += 1,
                Token::ObjClose | Token::ListClose => depth = depth.saturating_sub(1),
                _ => {}
            }
            if depth == 0 {
                return Ok(());
            }
        }
    }

    // ── Values ─────────────────────────────────────────────────────────

    fn parse_value(&mut self, ti: Option<&TypeInst>) -> Result<ExprId> {
        let ty = ti.map(|t| t.ty);
        match self.peek().cloned() {
            Some(Token::Int(v)) => {
                self.pos += 1;
                let lit_ty = match ty {
                    Some(t) if t.is_float() => return Ok(self.env.float_lit(FloatVal::new(v as f64))),
                    Some(t) if t.dim == 0 && t.bt == BaseType::Int => {
                        Type::par_int().with_type_id(t.type_id)
                    }
                    _ => Type::par_int(),
                };
                Ok(self.env.int_lit_typed(IntVal::Int(v), lit_ty))
            }
            Some(Token::Float(v)) => {
                self.pos += 1;
                Ok(self.env.float_lit(FloatVal::new(v)))
            }
            Some(Token::True) => {
                self.pos += 1;
                Ok(self.env.bool_lit(true))
            }
            Some(Token::False) => {
                self.pos += 1;
                Ok(self.env.bool_lit(false))
            }
            Some(Token::Null) => {
                self.pos += 1;
                Ok(self.env.consts.absent)
            }
            Some(Token::Str(s)) => {
                self.pos += 1;
                // A string at an enum-typed position is an identifier.
                if let Some(t) = ty {
                    if t.dim == 0 && t.bt == BaseType::Int && t.type_id != 0 {
                        return Ok(self.enum_ident(&s, t));
                    }
                }
                Ok(self.env.str_lit(&s))
            }
            Some(Token::ListOpen) => self.parse_list(ti),
            Some(Token::ObjOpen) => self.parse_object(ti),
            Some(t) => Err(self.err(format!("unexpected {t:?}"))),
            None => Err(self.err("unexpected end of input")),
        }
    }

    /// An identifier node for an enum member (never a StringLit). When the
    /// member is known, a synthetic declaration binds it to its ordinal so
    /// the evaluator can resolve it.
    fn enum_ident(&mut self, name: &str, ty: Type) -> ExprId {
        let interned = self.env.intern(name);
        let decl = self
            .env
            .types
            .lookup_enum_member(ty.type_id, name)
            .map(|ord| {
                let lit = self.env.int_lit_typed(IntVal::Int(ord), ty);
                let d = self.env.new_decl(
                    TypeInst::plain(ty),
                    interned.clone(),
                    Some(lit),
                    Location::unknown(),
                );
                self.env.decls[d].evaluated = true;
                d
            });
        self.env.new_expr(
            ExprKind::Id(Ident {
                name: interned,
                decl,
            }),
            ty,
            self.here(),
        )
    }

    /// An identifier for the whole enum, bound to its 1..card range set.
    fn enum_range_ident(&mut self, enum_id: u32, loc: Location) -> ExprId {
        let info = self.env.types.enum_info(enum_id).clone();
        let set_ty = Type::par_set_int().with_type_id(enum_id);
        let isv = Rc::new(IntSetVal::from_range(
            IntVal::ONE,
            IntVal::Int(info.members.len() as i64),
        ));
        let lit = self.env.intset_lit(isv, loc.clone());
        self.env.exprs[lit].ty = set_ty;
        let d = self.env.new_decl(
            TypeInst::plain(set_ty),
            info.name.clone(),
            Some(lit),
            Location::unknown(),
        );
        self.env.decls[d].evaluated = true;
        self.env.new_expr(
            ExprKind::Id(Ident {
                name: info.name,
                decl: Some(d),
            }),
            set_ty,
            loc,
        )
    }

    // ── Lists ──────────────────────────────────────────────────────────

    fn parse_list(&mut self, ti: Option<&TypeInst>) -> Result<ExprId> {
        let loc = self.here();
        match ti {
            Some(t) if t.ty.is_set() => self.parse_set_list(t.ty),
            Some(t) if t.ty.is_struct() => self.parse_tuple_list(t.ty),
            Some(t) if t.ty.dim != 0 => self.parse_array(t, loc),
            _ => {
                let plain = TypeInst::plain(
                    self.env.types.array_type(Type::bot(), &[0]),
                );
                self.parse_array(&plain, loc)
            }
        }
    }

    /// A JSON array at an array-typed position. Nested arrays flatten in
    /// row-major order; declared ranges coerce the result through an
    /// `arrayNd(range_1, ..., range_n, flat)` call. At most one declared
    /// range may be elided; it is computed from the total size.
    fn parse_array(&mut self, ti: &TypeInst, loc: Location) -> Result<ExprId> {
        let dim = ti.ty.dim.max(1) as usize;
        let elem_ty = ti.ty.elem_type(&self.env.types);
        let elem_ti = TypeInst::plain(elem_ty);
        let mut shape: Vec<usize> = Vec::new();
        let mut flat: Vec<ExprId> = Vec::new();
        self.parse_array_level(&elem_ti, dim, 0, &mut shape, &mut flat)?;
        while shape.len() < dim {
            shape.push(if flat.is_empty() { 0 } else { 1 });
        }

        let flat_ty = self.env.types.array_type(elem_ty, &[0]);
        let flat_al = self.env.new_expr(
            ExprKind::ArrayLit(ArrayLit::new_1d(flat)),
            flat_ty,
            loc.clone(),
        );
        if ti.ranges.is_empty() && dim == 1 {
            return Ok(flat_al);
        }

        // Collect declared ranges; a missing one is elided and recomputed.
        // Declarations with no ranges at all default every dimension to
        // 1-based.
        let declared = !ti.ranges.is_empty();
        let mut args: Vec<ExprId> = Vec::new();
        let mut elided = 0;
        for d in 0..dim {
            match ti.ranges.get(d) {
                Some(&r) if !matches!(self.env.exprs[r].kind, ExprKind::TiId(_)) => args.push(r),
                _ => {
                    if declared {
                        elided += 1;
                    }
                    if elided > 1 {
                        return Err(CompileError::json(
                            loc,
                            "at most one array range may be elided",
                        ));
                    }
                    let size = IntVal::Int(shape[d] as i64);
                    let one = self.env.int_lit(IntVal::ONE);
                    let n = self.env.int_lit(size);
                    let range = self.env.new_expr(
                        ExprKind::BinOp {
                            op: crate::ast::BinOpKind::DotDot,
                            lhs: one,
                            rhs: n,
                        },
                        Type::par_set_int(),
                        loc.clone(),
                    );
                    args.push(range);
                }
            }
        }
        args.push(flat_al);
        let name = match dim {
            1 => "array1d",
            2 => "array2d",
            _ => "arrayNd",
        };
        let call_name = self.env.intern(name);
        Ok(self
            .env
            .call_expr(call_name, args, ti.ty, loc))
    }

    fn parse_array_level(
        &mut self,
        elem_ti: &TypeInst,
        dim: usize,
        level: usize,
        shape: &mut Vec<usize>,
        flat: &mut Vec<ExprId>,
    ) -> Result<()> {
        self.expect(Token::ListOpen)?;
        let mut count = 0usize;
        if self.eat(&Token::ListClose) {
            if shape.len() <= level {
                shape.push(0);
            }
            return Ok(());
        }
        loop {
            if level + 1 < dim {
                self.parse_array_level(elem_ti, dim, level + 1, shape, flat)?;
            } else {
                flat.push(self.parse_value(Some(elem_ti))?);
            }
            count += 1;
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(Token::ListClose)?;
            break;
        }
        if shape.len() <= level {
            shape.push(count);
        } else if shape[level] != count {
            return Err(self.err("ragged array in data input"));
        }
        Ok(())
    }

    /// A JSON array at a tuple position: per-field element types. A record
    /// position requires an object with field-named keys instead.
    fn parse_tuple_list(&mut self, ty: Type) -> Result<ExprId> {
        if ty.bt == BaseType::Record {
            return Err(self.err("record values require an object with field names"));
        }
        let fields = self.env.types.tuple_fields(ty.type_id);
        let loc = self.here();
        self.expect(Token::ListOpen)?;
        let mut elems = Vec::new();
        for (i, &fty) in fields.iter().enumerate() {
            if i > 0 {
                self.expect(Token::Comma)?;
            }
            let fti = TypeInst::plain(fty);
            elems.push(self.parse_value(Some(&fti))?);
        }
        self.expect(Token::ListClose)?;
        Ok(self
            .env
            .new_expr(ExprKind::ArrayLit(ArrayLit::new_1d(elems)), ty, loc))
    }

    /// A plain JSON list at a set position becomes a set literal.
    fn parse_set_list(&mut self, ty: Type) -> Result<ExprId> {
        let loc = self.here();
        self.expect(Token::ListOpen)?;
        let mut elems = Vec::new();
        if !self.eat(&Token::ListClose) {
            let elem_ti = TypeInst::plain(
                Type::new(ty.bt, crate::ty::Inst::Par).with_type_id(ty.type_id),
            );
            loop {
                elems.push(self.parse_value(Some(&elem_ti))?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(Token::ListClose)?;
                break;
            }
        }
        Ok(self.env.new_expr(
            ExprKind::SetLit(SetLit {
                isv: None,
                fsv: None,
                elems,
            }),
            ty,
            loc,
        ))
    }

    // ── Objects ────────────────────────────────────────────────────────

    fn parse_object(&mut self, ti: Option<&TypeInst>) -> Result<ExprId> {
        let ty = ti.map(|t| t.ty);
        // `{"set": [...]}` parses a set literal with range pairs.
        // Enum positions recognize the keys `e`, `c`, and `i`.
        // Record positions require field-named keys. Enum-indexed arrays
        // accept member-named keys.
        let loc = self.here();
        self.expect(Token::ObjOpen)?;
        let first_key = self.expect_string()?;
        self.expect(Token::Colon)?;
        match first_key.as_str() {
            "set" => {
                let e = self.parse_set_object(ty, loc)?;
                self.expect(Token::ObjClose)?;
                Ok(e)
            }
            "e" if is_enum_pos(ty) => {
                let name = self.expect_string()?;
                self.expect(Token::ObjClose)?;
                Ok(self.enum_ident(&name, ty.unwrap()))
            }
            "c" if is_enum_pos(ty) => {
                let ctor = self.expect_string()?;
                self.expect(Token::Comma)?;
                let arg_key = self.expect_string()?;
                if arg_key != "e" && arg_key != "i" {
                    return Err(self.err("constructor object requires an 'e' or 'i' argument"));
                }
                self.expect(Token::Colon)?;
                let arg = self.parse_value(None)?;
                self.expect(Token::ObjClose)?;
                let name = self.env.intern(&ctor);
                Ok(self.env.call_expr(name, vec![arg], ty.unwrap(), loc))
            }
            "i" if is_enum_pos(ty) => {
                let v = match self.next()? {
                    Token::Int(v) => v,
                    got => return Err(self.err(format!("expected int after 'i', found {got:?}"))),
                };
                self.expect(Token::ObjClose)?;
                let t = ty.unwrap();
                let enum_id_expr = self.enum_range_ident(t.type_id, loc.clone());
                let iv = self.env.int_lit(IntVal::Int(v));
                let to_enum = self.env.intern("to_enum");
                Ok(self.env.call_expr(to_enum, vec![enum_id_expr, iv], t, loc))
            }
            _ => match ty {
                Some(t) if t.bt == BaseType::Record && t.dim == 0 => {
                    self.parse_record_object(t, first_key, loc)
                }
                Some(t) if t.dim != 0 && enum_dim(self.env, t).is_some() => {
                    self.parse_enum_keyed_array(t, first_key, loc)
                }
                _ => Err(self.err(format!("unexpected object key '{first_key}'"))),
            },
        }
    }

    /// `{"set": [1, [3, 5], 9]}`; contained pairs denote inclusive ranges
    /// and are unioned into the result.
    fn parse_set_object(&mut self, ty: Option<Type>, loc: Location) -> Result<ExprId> {
        self.expect(Token::ListOpen)?;
        let mut acc = IntSetVal::empty();
        if !self.eat(&Token::ListClose) {
            loop {
                match self.next()? {
                    Token::Int(v) => {
                        acc = acc.union(&IntSetVal::from_range(IntVal::Int(v), IntVal::Int(v)));
                    }
                    Token::ListOpen => {
                        let lo = match self.next()? {
                            Token::Int(v) => v,
                            got => return Err(self.err(format!("expected range min, found {got:?}"))),
                        };
                        self.expect(Token::Comma)?;
                        let hi = match self.next()? {
                            Token::Int(v) => v,
                            got => return Err(self.err(format!("expected range max, found {got:?}"))),
                        };
                        self.expect(Token::ListClose)?;
                        acc = acc.union(&IntSetVal::from_range(IntVal::Int(lo), IntVal::Int(hi)));
                    }
                    got => return Err(self.err(format!("unexpected set element {got:?}"))),
                }
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(Token::ListClose)?;
                break;
            }
        }
        let lit = self.env.intset_lit(Rc::new(acc), loc);
        if let Some(t) = ty {
            if t.is_set() {
                self.env.exprs[lit].ty = Type::par_set_int().with_type_id(t.type_id);
            }
        }
        Ok(lit)
    }

    fn parse_record_object(&mut self, ty: Type, first_key: String, loc: Location) -> Result<ExprId> {
        let fields = self.env.types.record_fields(ty.type_id);
        let mut values: Vec<Option<ExprId>> = vec![None; fields.len()];
        let mut key = first_key;
        loop {
            let idx = fields
                .iter()
                .position(|(n, _)| **n == *key)
                .ok_or_else(|| self.err(format!("unknown record field '{key}'")))?;
            let fti = TypeInst::plain(fields[idx].1);
            values[idx] = Some(self.parse_value(Some(&fti))?);
            if self.eat(&Token::Comma) {
                key = self.expect_string()?;
                self.expect(Token::Colon)?;
                continue;
            }
            self.expect(Token::ObjClose)?;
            break;
        }
        let elems: Vec<ExprId> = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| v.ok_or_else(|| self.err(format!("missing record field '{}'", fields[i].0))))
            .collect::<Result<_>>()?;
        Ok(self
            .env
            .new_expr(ExprKind::ArrayLit(ArrayLit::new_1d(elems)), ty, loc))
    }

    /// `{"R": 10, "G": 20}` at an `array[Enum] of t` position: one value per
    /// member, ordered by ordinal, coerced through `array1d(Enum, [...])`.
    fn parse_enum_keyed_array(&mut self, ty: Type, first_key: String, loc: Location) -> Result<ExprId> {
        let enum_id = enum_dim(self.env, ty).unwrap();
        let info = self.env.types.enum_info(enum_id).clone();
        let elem_ty = ty.elem_type(&self.env.types);
        let elem_ti = TypeInst::plain(elem_ty);
        let mut values: Vec<Option<ExprId>> = vec![None; info.members.len()];
        let mut key = first_key;
        loop {
            let ord = self
                .env
                .types
                .lookup_enum_member(enum_id, &key)
                .ok_or_else(|| self.err(format!("'{key}' is not a member of {}", info.name)))?;
            values[(ord - 1) as usize] = Some(self.parse_value(Some(&elem_ti))?);
            if self.eat(&Token::Comma) {
                key = self.expect_string()?;
                self.expect(Token::Colon)?;
                continue;
            }
            self.expect(Token::ObjClose)?;
            break;
        }
        let elems: Vec<ExprId> = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                v.ok_or_else(|| self.err(format!("missing value for {}", info.members[i])))
            })
            .collect::<Result<_>>()?;
        let flat_ty = self.env.types.array_type(elem_ty, &[0]);
        let flat = self
            .env
            .new_expr(ExprKind::ArrayLit(ArrayLit::new_1d(elems)), flat_ty, loc.clone());
        let index_id = self.enum_range_ident(enum_id, loc.clone());
        let array1d = self.env.intern("array1d");
        Ok(self.env.call_expr(array1d, vec![index_id, flat], ty, loc))
    }
}

fn is_enum_pos(ty: Option<Type>) -> bool {
    matches!(ty, Some(t) if t.dim == 0 && t.bt == BaseType::Int && t.type_id != 0)
}

/// The enum id of a 1-dimensional enum-indexed array type, if any.
fn enum_dim(env: &Env, ty: Type) -> Option<u32> {
    if ty.dim != 1 {
        return None;
    }
    let dims = env.types.array_enum_dims(ty.type_id, ty.dim);
    match dims.first() {
        Some(&id) if id != 0 => Some(id),
        _ => None,
    }
}

fn loc_at(file: &Rc<str>, line_starts: &[usize], off: usize) -> Location {
    let line = line_starts.partition_point(|&s| s <= off);
    let col = off - line_starts[line - 1] + 1;
    Location::new(file.clone(), line as u32, col as u32)
}

/// Parse `text` as JSON model data, creating one assignment item per known
/// top-level declaration mentioned in the outer object.
pub fn load_json_data(env: &mut Env, text: &str, filename: &str) -> Result<Vec<ItemId>> {
    let mut parser = JsonParser::new(env, text, filename)?;
    parser.parse_data()
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{eval_int, eval_intset};

    fn declare(env: &mut Env, name: &str, ti: TypeInst) -> DeclId {
        let interned = env.intern(name);
        let d = env.new_decl(ti, interned, None, Location::unknown());
        env.decls[d].toplevel = true;
        env.add_source_item(ItemKind::VarDecl(d), Location::unknown());
        d
    }

    #[test]
    fn scalar_assignment() {
        let mut env = Env::default();
        declare(&mut env, "n", TypeInst::plain(Type::par_int()));
        let items = load_json_data(&mut env, r#"{ "n": 42 }"#, "data.json").unwrap();
        assert_eq!(items.len(), 1);
        let e = match env.items[items[0]].kind {
            ItemKind::Assign { e, .. } => e,
            _ => panic!("expected assignment"),
        };
        assert_eq!(eval_int(&mut env, e).unwrap(), IntVal::Int(42));
    }

    #[test]
    fn set_object_with_range_pairs() {
        let mut env = Env::default();
        declare(&mut env, "s", TypeInst::plain(Type::par_set_int()));
        let items =
            load_json_data(&mut env, r#"{ "s": { "set": [1, [3, 5], 9] } }"#, "data.json").unwrap();
        let e = match env.items[items[0]].kind {
            ItemKind::Assign { e, .. } => e,
            _ => panic!(),
        };
        let s = eval_intset(&mut env, e).unwrap();
        assert_eq!(
            *s,
            IntSetVal::from_ranges(vec![
                (IntVal::Int(1), IntVal::Int(1)),
                (IntVal::Int(3), IntVal::Int(5)),
                (IntVal::Int(9), IntVal::Int(9)),
            ])
        );
    }

    #[test]
    fn string_escapes() {
        let mut env = Env::default();
        declare(&mut env, "s", TypeInst::plain(Type::par_string()));
        let items = load_json_data(
            &mut env,
            r#"{ "s": "a\nb\t\"q\"\\z\qkeep" }"#,
            "data.json",
        )
        .unwrap();
        let e = match env.items[items[0]].kind {
            ItemKind::Assign { e, .. } => e,
            _ => panic!(),
        };
        match env.kind(e) {
            ExprKind::StringLit(s) => assert_eq!(&*s, "a\nb\t\"q\"\\z\\qkeep"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn unknown_variable_is_skipped_with_warning() {
        let mut env = Env::default();
        declare(&mut env, "n", TypeInst::plain(Type::par_int()));
        let items =
            load_json_data(&mut env, r#"{ "ghost": [1, 2, 3], "n": 7 }"#, "data.json").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(env.warnings().len(), 1);
    }

    #[test]
    fn lex_error_reports_location() {
        let mut env = Env::default();
        let err = load_json_data(&mut env, "{ @ }", "bad.json").unwrap_err();
        match err {
            CompileError::Json { loc, .. } => {
                assert_eq!(loc.line, 1);
                assert_eq!(loc.column, 3);
            }
            other => panic!("expected JSON error, got {other:?}"),
        }
    }
}
