//! Expression evaluation: values, places, types and operators.

use super::{Frame, Machine, Place, VmError, pack};
use crate::ast::{AddressCategory, BinaryOp, Expr, KeyValue, LitKind, Name, NameExpr, NodeId, UnaryOp};
use crate::object::{Handle, MapKey, ObjectBody, Value};
use crate::preprocess::{FieldDef, FuncSig, MethodSig, Type, TypeRef, Universal};
use std::collections::BTreeMap;

impl Machine<'_, '_> {
    pub(super) fn eval(&mut self, frame: &Frame, id: NodeId) -> Result<Value, VmError> {
        self.step()?;
        let pkg = frame.pkg.clone();
        let Some(expr) = pkg.tree.expr(id) else {
            return Err(VmError::invalid(format!("{id} is not an expression")));
        };
        match expr {
            Expr::Name(n) => self.eval_name(frame, n),
            Expr::BasicLit { kind, value } => match kind {
                LitKind::Int => value
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| VmError::invalid(format!("bad integer literal {value}"))),
                LitKind::String => Ok(Value::String(value.clone())),
            },
            Expr::Binary { left, op, right } => match op {
                BinaryOp::LAnd => Ok(Value::Bool(self.eval_bool(frame, *left)? && self.eval_bool(frame, *right)?)),
                BinaryOp::LOr => Ok(Value::Bool(self.eval_bool(frame, *left)? || self.eval_bool(frame, *right)?)),
                _ => {
                    let l = self.eval(frame, *left)?;
                    let r = self.eval(frame, *right)?;
                    self.binary(*op, l, r)
                }
            },
            Expr::Unary { op, x } => match (op, self.eval(frame, *x)?) {
                (UnaryOp::Neg, Value::Int(n)) => n.checked_neg().map(Value::Int).ok_or(VmError::Overflow),
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (_, other) => Err(VmError::invalid(format!("bad unary operand of kind {}", other.kind()))),
            },
            Expr::Call {
                func,
                args,
                with_cross,
            } => {
                let callee = self.eval(frame, *func)?;
                let args = self.eval_args(frame, args)?;
                if let Value::Type(t) = callee {
                    let [arg] = <[Value; 1]>::try_from(args)
                        .map_err(|_| VmError::invalid("conversion takes exactly one argument"))?;
                    return self.convert(&t, arg);
                }
                Ok(pack(self.call(&callee, args, *with_cross)?))
            }
            Expr::Index { x, index } => {
                let base = self.eval(frame, *x)?;
                let index = self.eval(frame, *index)?;
                self.index_value(base, index)
            }
            Expr::Selector { x, path, .. } => {
                let path = path
                    .as_ref()
                    .ok_or_else(|| VmError::invalid("unresolved selector"))?;
                self.eval_selector(frame, *x, path.category, path.index, &path.name)
            }
            Expr::Slice { x, low, high } => {
                let base = self.eval(frame, *x)?;
                let low = self.eval_bound(frame, *low)?;
                let high = self.eval_bound(frame, *high)?;
                self.slice_value(base, low, high)
            }
            Expr::Star { x } => match self.eval(frame, *x)? {
                Value::Type(t) => Ok(Value::Type(Type::pointer_to(t))),
                ptr => self.deref(&ptr),
            },
            Expr::Ref { x } => self.eval_ref(frame, *x),
            Expr::TypeAssert { x, ty } => {
                let v = self.eval(frame, *x)?;
                let ty = self.eval_type(frame, *ty)?;
                if self.assert_type(&v, &ty)? {
                    Ok(v)
                } else {
                    Err(VmError::Panic(format!("interface conversion: {} is not {ty}", v.kind())))
                }
            }
            Expr::CompositeLit { ty, elts } => {
                let ty = self.eval_type(frame, *ty)?;
                self.composite(frame, &ty, elts)
            }
            Expr::FuncLit { captures, .. } => {
                let mut values = Vec::with_capacity(captures.len());
                for c in captures {
                    let place = self.locate(frame, c.source.depth, c.source.index)?;
                    values.push(self.load(&place)?);
                }
                let h = self.alloc(ObjectBody::Closure {
                    pkg_path: pkg.pkg_path.clone(),
                    decl: id,
                    parent: frame.loc.clone(),
                    captures: values,
                })?;
                Ok(Value::Closure(h))
            }
            e if e.is_type_expr() => Ok(Value::Type(self.eval_type(frame, id)?)),
            _ => Err(VmError::invalid(format!("cannot evaluate {id}"))),
        }
    }

    fn eval_bound(&mut self, frame: &Frame, bound: Option<NodeId>) -> Result<Option<i64>, VmError> {
        match bound {
            None => Ok(None),
            Some(b) => match self.eval(frame, b)? {
                Value::Int(n) => Ok(Some(n)),
                other => Err(VmError::invalid(format!("slice index of kind {}", other.kind()))),
            },
        }
    }

    // ----- names -----

    fn eval_name(&mut self, frame: &Frame, n: &NameExpr) -> Result<Value, VmError> {
        let path = n
            .path
            .as_ref()
            .ok_or_else(|| VmError::invalid(format!("unresolved name {}", n.name)))?;
        match path.category {
            AddressCategory::Universe => universe_value(path.index),
            AddressCategory::Block if path.is_blank() => Err(VmError::invalid("cannot use _ as a value")),
            AddressCategory::Block => {
                let place = self.locate(frame, path.depth, path.index)?;
                match self.load(&place)? {
                    Value::HeapItem(cell) => Ok(self.store.elem(cell, 0)?),
                    v => Ok(v),
                }
            }
            other => Err(VmError::invalid(format!("name {} has a {other} address", n.name))),
        }
    }

    fn name_place(&mut self, frame: &Frame, n: &NameExpr) -> Result<Place, VmError> {
        let path = n
            .path
            .as_ref()
            .ok_or_else(|| VmError::invalid(format!("unresolved name {}", n.name)))?;
        if path.is_blank() {
            return Ok(Place::Discard);
        }
        if path.category == AddressCategory::Universe {
            return Ok(Place::Fixed(universe_value(path.index)?));
        }
        let place = self.locate(frame, path.depth, path.index)?;
        Ok(match self.load(&place)? {
            Value::HeapItem(cell) => Place::Slot { base: cell, index: 0 },
            _ => place,
        })
    }

    /// Place an assignment target refers to. Expressions that are not
    /// addressable come back as [`Place::Fixed`].
    pub(super) fn eval_place(&mut self, frame: &Frame, id: NodeId) -> Result<Place, VmError> {
        let pkg = frame.pkg.clone();
        match pkg.tree.expr(id) {
            Some(Expr::Name(n)) => self.name_place(frame, n),
            Some(Expr::Selector { x, path: Some(path), .. }) => match path.category {
                AddressCategory::Block => {
                    let Value::Package(pkg_path) = self.eval(frame, *x)? else {
                        return Err(VmError::invalid("package member of a non-package"));
                    };
                    Ok(Place::Slot {
                        base: self.store.package(&pkg_path)?,
                        index: path.index as u32,
                    })
                }
                AddressCategory::Field | AddressCategory::Interface => {
                    let base = self.eval(frame, *x)?;
                    let h = self.struct_of(&base)?;
                    let index = match path.category {
                        AddressCategory::Field => path.index as u32,
                        _ => self.field_by_name(h, &path.name)?,
                    };
                    Ok(Place::Slot { base: h, index })
                }
                _ => Ok(Place::Fixed(self.eval(frame, id)?)),
            },
            Some(Expr::Index { x, index }) => {
                let base = self.eval(frame, *x)?;
                let index = self.eval(frame, *index)?;
                self.index_place(base, index)
            }
            Some(Expr::Star { x }) => match self.eval(frame, *x)? {
                Value::Pointer { base, index } => Ok(Place::Slot { base, index }),
                Value::Nil => Err(VmError::NilDereference),
                other => Err(VmError::invalid(format!("cannot dereference {}", other.kind()))),
            },
            _ => Ok(Place::Fixed(self.eval(frame, id)?)),
        }
    }

    fn index_place(&mut self, base: Value, index: Value) -> Result<Place, VmError> {
        match base {
            Value::Map(map) => {
                let key = MapKey::from_value(&index)
                    .ok_or_else(|| VmError::invalid(format!("invalid map key of kind {}", index.kind())))?;
                Ok(Place::MapEntry { map, key })
            }
            Value::Slice { list, offset, len } => {
                let i = checked_index(&index, len as usize)?;
                Ok(Place::Slot {
                    base: list,
                    index: offset + i,
                })
            }
            Value::Array(h) => {
                let len = self.store.len(h)?;
                let i = checked_index(&index, len)?;
                Ok(Place::Slot { base: h, index: i })
            }
            Value::Pointer { .. } => {
                let target = self.deref(&base)?;
                self.index_place(target, index)
            }
            Value::Nil => match index {
                Value::Int(i) => Err(VmError::IndexOutOfRange { index: i, len: 0 }),
                _ => Err(VmError::Panic("assignment to entry in nil map".into())),
            },
            other => Err(VmError::invalid(format!("cannot assign into {}", other.kind()))),
        }
    }

    // ----- selectors -----

    fn eval_selector(
        &mut self,
        frame: &Frame,
        x: NodeId,
        category: AddressCategory,
        index: u16,
        sel: &Name,
    ) -> Result<Value, VmError> {
        match category {
            AddressCategory::Block => {
                let Value::Package(pkg_path) = self.eval(frame, x)? else {
                    return Err(VmError::invalid("package member of a non-package"));
                };
                let h = self.store.package(&pkg_path)?;
                Ok(self.store.elem(h, index as u32)?)
            }
            AddressCategory::Field => {
                let base = self.eval(frame, x)?;
                let h = self.struct_of(&base)?;
                Ok(self.store.elem(h, index as u32)?)
            }
            AddressCategory::ValueMethod => {
                let recv = self.eval(frame, x)?;
                let r = self.type_ref_of(&recv)?;
                let method = self
                    .declared(&r)?
                    .methods
                    .get(index as usize)
                    .map(|m| m.decl)
                    .ok_or_else(|| VmError::invalid(format!("{r} has no method {sel}")))?;
                self.bind_method(recv, r, method, false)
            }
            AddressCategory::PointerMethod => {
                let place = self.eval_place(frame, x)?;
                let recv = self.load(&place)?;
                let recv = match (recv, &place) {
                    (ptr @ Value::Pointer { .. }, _) => ptr,
                    (_, Place::Slot { base, index }) => Value::Pointer {
                        base: *base,
                        index: *index,
                    },
                    (v, _) => self.box_value(v)?,
                };
                let r = self.type_ref_of(&recv)?;
                let method = self
                    .declared(&r)?
                    .methods
                    .get(index as usize)
                    .map(|m| m.decl)
                    .ok_or_else(|| VmError::invalid(format!("{r} has no method {sel}")))?;
                self.bind_method(recv, r, method, true)
            }
            AddressCategory::Interface | AddressCategory::Universe => {
                let recv = self.eval(frame, x)?;
                self.select_by_name(recv, sel)
            }
        }
    }

    /// Member lookup on the dynamic type: method first, then field.
    fn select_by_name(&mut self, recv: Value, sel: &Name) -> Result<Value, VmError> {
        if matches!(recv, Value::Nil) {
            return Err(VmError::NilDereference);
        }
        let r = self.type_ref_of(&recv).ok();
        if let Some(r) = r {
            let decl = self.declared(&r)?;
            if let Some((_, m)) = decl.method_index(sel) {
                let recv = match (m.pointer_receiver, recv) {
                    (true, ptr @ Value::Pointer { .. }) => ptr,
                    (true, v) => self.box_value(v)?,
                    (false, v) => v,
                };
                return self.bind_method(recv, r, m.decl, m.pointer_receiver);
            }
        }
        let h = self.struct_of(&recv)?;
        let index = self.field_by_name(h, sel)?;
        Ok(self.store.elem(h, index)?)
    }

    fn bind_method(&mut self, recv: Value, r: TypeRef, decl: NodeId, pointer: bool) -> Result<Value, VmError> {
        let recv = if pointer {
            recv
        } else {
            let v = match recv {
                Value::Pointer { .. } => self.deref(&recv)?,
                v => v,
            };
            self.copy_value(v)?
        };
        Ok(Value::Bound {
            recv: Box::new(recv),
            pkg_path: r.pkg_path,
            decl,
        })
    }

    fn box_value(&mut self, v: Value) -> Result<Value, VmError> {
        let v = self.copy_value(v)?;
        let cell = self.alloc(ObjectBody::HeapItem { value: v })?;
        Ok(Value::Pointer { base: cell, index: 0 })
    }

    /// Struct object behind a struct value or a pointer to one.
    fn struct_of(&mut self, v: &Value) -> Result<Handle, VmError> {
        match v {
            Value::Struct(h) => Ok(*h),
            Value::Pointer { .. } => match self.deref(v)? {
                Value::Struct(h) => Ok(h),
                other => Err(VmError::invalid(format!("pointer to {} has no fields", other.kind()))),
            },
            Value::Nil => Err(VmError::NilDereference),
            other => Err(VmError::invalid(format!("{} has no fields", other.kind()))),
        }
    }

    fn type_ref_of(&mut self, v: &Value) -> Result<TypeRef, VmError> {
        let h = self.struct_of(v)?;
        match self.store.body(h)? {
            ObjectBody::Struct { ty: Some(r), .. } => Ok(r.clone()),
            _ => Err(VmError::invalid("value of an unnamed type has no methods")),
        }
    }

    fn field_by_name(&mut self, h: Handle, name: &Name) -> Result<u32, VmError> {
        let r = match self.store.body(h)? {
            ObjectBody::Struct { ty: Some(r), .. } => r.clone(),
            _ => return Err(VmError::invalid(format!("field {name} of an unnamed struct"))),
        };
        self.declared(&r)?
            .field_index(name)
            .map(|(i, _)| i as u32)
            .ok_or_else(|| VmError::invalid(format!("{r} has no field or method {name}")))
    }

    // ----- pointers -----

    pub(super) fn deref(&mut self, v: &Value) -> Result<Value, VmError> {
        match v {
            Value::Pointer { base, index } => Ok(self.store.elem(*base, *index)?),
            Value::Nil => Err(VmError::NilDereference),
            other => Err(VmError::invalid(format!("cannot dereference {}", other.kind()))),
        }
    }

    fn eval_ref(&mut self, frame: &Frame, x: NodeId) -> Result<Value, VmError> {
        if let Some(Expr::CompositeLit { .. }) = frame.pkg.tree.expr(x) {
            let v = self.eval(frame, x)?;
            let cell = self.alloc(ObjectBody::HeapItem { value: v })?;
            return Ok(Value::Pointer { base: cell, index: 0 });
        }
        match self.eval_place(frame, x)? {
            Place::Slot { base, index } => Ok(Value::Pointer { base, index }),
            Place::MapEntry { .. } => Err(VmError::invalid("cannot take the address of a map entry")),
            Place::Fixed(_) | Place::Discard => Err(VmError::invalid("cannot take the address of this expression")),
        }
    }

    // ----- indexing and slicing -----

    fn index_value(&mut self, base: Value, index: Value) -> Result<Value, VmError> {
        match base {
            Value::Map(h) => {
                let key = MapKey::from_value(&index)
                    .ok_or_else(|| VmError::invalid(format!("invalid map key of kind {}", index.kind())))?;
                self.load(&Place::MapEntry { map: h, key })
            }
            Value::String(s) => {
                let i = checked_index(&index, s.len())?;
                Ok(Value::Int(s.as_bytes()[i as usize] as i64))
            }
            Value::Nil if !matches!(index, Value::Int(_)) => Ok(Value::Nil),
            other => {
                let place = self.index_place(other, index)?;
                self.load(&place)
            }
        }
    }

    /// `v, ok` forms: map lookups and type assertions. Returns `None` for
    /// any other expression.
    pub(super) fn eval_comma_ok(&mut self, frame: &Frame, id: NodeId) -> Result<Option<(Value, bool)>, VmError> {
        let pkg = frame.pkg.clone();
        match pkg.tree.expr(id) {
            Some(Expr::Index { x, index }) => {
                let base = self.eval(frame, *x)?;
                let Value::Map(h) = base else {
                    let index = self.eval(frame, *index)?;
                    return Ok(Some((self.index_value(base, index)?, true)));
                };
                let index = self.eval(frame, *index)?;
                let key = MapKey::from_value(&index)
                    .ok_or_else(|| VmError::invalid(format!("invalid map key of kind {}", index.kind())))?;
                match self.store.map_get(h, &key)? {
                    Some(v) => Ok(Some((v, true))),
                    None => {
                        let ty = self.store.map_value_type(h)?;
                        Ok(Some((self.zero(&ty)?, false)))
                    }
                }
            }
            Some(Expr::TypeAssert { x, ty }) => {
                let v = self.eval(frame, *x)?;
                let ty = self.eval_type(frame, *ty)?;
                if self.assert_type(&v, &ty)? {
                    Ok(Some((v, true)))
                } else {
                    Ok(Some((self.zero(&ty)?, false)))
                }
            }
            _ => Ok(None),
        }
    }

    fn slice_value(&mut self, base: Value, low: Option<i64>, high: Option<i64>) -> Result<Value, VmError> {
        match base {
            Value::Slice { list, offset, len } => {
                let cap = self.store.len(list)? - offset as usize;
                let (lo, hi) = bounds(low, high, len as usize, cap)?;
                Ok(Value::Slice {
                    list,
                    offset: offset + lo as u32,
                    len: (hi - lo) as u32,
                })
            }
            Value::String(s) => {
                let (lo, hi) = bounds(low, high, s.len(), s.len())?;
                s.get(lo..hi)
                    .map(|sub| Value::String(sub.to_string()))
                    .ok_or_else(|| VmError::invalid("string slice splits a character"))
            }
            Value::Nil => {
                bounds(low, high, 0, 0)?;
                Ok(Value::Nil)
            }
            Value::Pointer { .. } => {
                let target = self.deref(&base)?;
                self.slice_value(target, low, high)
            }
            other => Err(VmError::invalid(format!("cannot slice {}", other.kind()))),
        }
    }

    // ----- composites and types -----

    fn composite(&mut self, frame: &Frame, ty: &Type, elts: &[KeyValue]) -> Result<Value, VmError> {
        let (named, underlying) = match ty {
            Type::Named(r) => (Some(r.clone()), self.declared(r)?.underlying),
            t => (None, t.clone()),
        };
        match underlying {
            Type::Struct(fields) => {
                let Value::Struct(h) = self.zero_struct(named, &fields)? else {
                    return Err(VmError::invalid("struct zero value"));
                };
                for (i, kv) in elts.iter().enumerate() {
                    let index = match kv.key {
                        Some(k) => frame
                            .pkg
                            .tree
                            .name_expr(k)
                            .and_then(|n| n.path.as_ref())
                            .map(|p| p.index as u32)
                            .ok_or_else(|| VmError::invalid("struct literal key is not a field name"))?,
                        None => i as u32,
                    };
                    let v = self.eval(frame, kv.value)?;
                    let v = self.copy_value(v)?;
                    self.store.set_elem(h, index, v)?;
                }
                Ok(Value::Struct(h))
            }
            Type::Array(n, elt) => {
                if elts.len() > n as usize {
                    return Err(VmError::IndexOutOfRange {
                        index: elts.len() as i64 - 1,
                        len: n as usize,
                    });
                }
                let mut elems = self.composite_elems(frame, elts)?;
                while elems.len() < n as usize {
                    elems.push(self.zero(&elt)?);
                }
                Ok(Value::Array(self.alloc(ObjectBody::Array { elems })?))
            }
            Type::Slice(_) => {
                let elems = self.composite_elems(frame, elts)?;
                let len = elems.len() as u32;
                let list = self.alloc(ObjectBody::List { elems })?;
                Ok(Value::Slice { list, offset: 0, len })
            }
            Type::Map(_, value_ty) => {
                let mut entries = BTreeMap::new();
                for kv in elts {
                    let Some(k) = kv.key else {
                        return Err(VmError::invalid("map literal entry without a key"));
                    };
                    let k = self.eval(frame, k)?;
                    let key = MapKey::from_value(&k)
                        .ok_or_else(|| VmError::invalid(format!("invalid map key of kind {}", k.kind())))?;
                    let v = self.eval(frame, kv.value)?;
                    entries.insert(key, self.copy_value(v)?);
                }
                Ok(Value::Map(self.alloc(ObjectBody::Map {
                    value_ty: *value_ty,
                    entries,
                })?))
            }
            other => Err(VmError::invalid(format!("invalid composite literal type {other}"))),
        }
    }

    fn composite_elems(&mut self, frame: &Frame, elts: &[KeyValue]) -> Result<Vec<Value>, VmError> {
        let mut elems = Vec::with_capacity(elts.len());
        for kv in elts {
            if kv.key.is_some() {
                return Err(VmError::invalid("indexed elements in list literals are not supported"));
            }
            let v = self.eval(frame, kv.value)?;
            elems.push(self.copy_value(v)?);
        }
        Ok(elems)
    }

    /// Evaluates a type expression.
    pub(super) fn eval_type(&mut self, frame: &Frame, id: NodeId) -> Result<Type, VmError> {
        let pkg = frame.pkg.clone();
        let Some(expr) = pkg.tree.expr(id) else {
            return Err(VmError::invalid(format!("{id} is not a type")));
        };
        Ok(match expr {
            Expr::Name(_) | Expr::Selector { .. } => match self.eval(frame, id)? {
                Value::Type(t) => t,
                other => return Err(VmError::invalid(format!("{} is not a type", other.kind()))),
            },
            Expr::Star { x } => Type::pointer_to(self.eval_type(frame, *x)?),
            Expr::FieldType { ty, .. } => self.eval_type(frame, *ty)?,
            Expr::ArrayType { len, elt } => Type::Array(*len, Box::new(self.eval_type(frame, *elt)?)),
            Expr::SliceType { elt } => Type::slice_of(self.eval_type(frame, *elt)?),
            Expr::MapType { key, value } => Type::Map(
                Box::new(self.eval_type(frame, *key)?),
                Box::new(self.eval_type(frame, *value)?),
            ),
            Expr::FuncType { params, results } => Type::Func(self.eval_sig(frame, params, results)?),
            Expr::StructType { fields } => {
                let mut defs = Vec::with_capacity(fields.len());
                for &f in fields {
                    let Some(Expr::FieldType { name: Some(name), ty }) = pkg.tree.expr(f) else {
                        return Err(VmError::invalid("embedded fields are not supported"));
                    };
                    defs.push(FieldDef {
                        name: name.clone(),
                        ty: self.eval_type(frame, *ty)?,
                    });
                }
                Type::Struct(defs)
            }
            Expr::InterfaceType { methods } => {
                let mut sigs = Vec::with_capacity(methods.len());
                for &m in methods {
                    let Some(Expr::FieldType { name: Some(name), ty }) = pkg.tree.expr(m) else {
                        return Err(VmError::invalid("embedded interfaces are not supported"));
                    };
                    let Type::Func(sig) = self.eval_type(frame, *ty)? else {
                        return Err(VmError::invalid("interface method without a signature"));
                    };
                    sigs.push(MethodSig {
                        name: name.clone(),
                        sig,
                    });
                }
                Type::Interface(sigs)
            }
            _ => return Err(VmError::invalid(format!("{id} is not a type expression"))),
        })
    }

    fn eval_sig(&mut self, frame: &Frame, params: &[NodeId], results: &[NodeId]) -> Result<FuncSig, VmError> {
        Ok(FuncSig {
            params: params
                .iter()
                .map(|&p| self.eval_type(frame, p))
                .collect::<Result<_, _>>()?,
            results: results
                .iter()
                .map(|&r| self.eval_type(frame, r))
                .collect::<Result<_, _>>()?,
        })
    }

    fn convert(&mut self, ty: &Type, v: Value) -> Result<Value, VmError> {
        let underlying = match ty {
            Type::Named(r) => self.declared(r)?.underlying,
            t => t.clone(),
        };
        match (&underlying, v) {
            (Type::Int, v @ Value::Int(_)) | (Type::Bool, v @ Value::Bool(_)) | (Type::String, v @ Value::String(_)) => {
                Ok(v)
            }
            (Type::String, Value::Int(n)) => Ok(Value::String(
                u32::try_from(n)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or(char::REPLACEMENT_CHARACTER)
                    .to_string(),
            )),
            (Type::Struct(_), Value::Struct(h)) => {
                let (_, fields) = aggregate_parts(self.store.body(h)?);
                let fields = fields
                    .into_iter()
                    .map(|f| self.copy_value(f))
                    .collect::<Result<_, _>>()?;
                let named = match ty {
                    Type::Named(r) => Some(r.clone()),
                    _ => None,
                };
                Ok(Value::Struct(self.alloc(ObjectBody::Struct { ty: named, fields })?))
            }
            (Type::Any | Type::Interface(_), v) => Ok(v),
            (Type::Slice(_), v @ (Value::Slice { .. } | Value::Nil))
            | (Type::Map(..), v @ (Value::Map(_) | Value::Nil))
            | (Type::Pointer(_), v @ (Value::Pointer { .. } | Value::Nil))
            | (Type::Func(_), v @ (Value::Closure(_) | Value::Func { .. } | Value::Bound { .. } | Value::Nil)) => Ok(v),
            (t, v) => Err(VmError::invalid(format!("cannot convert {} to {t}", v.kind()))),
        }
    }

    // ----- operators -----

    pub(super) fn binary(&mut self, op: BinaryOp, l: Value, r: Value) -> Result<Value, VmError> {
        match op {
            BinaryOp::Eql => return Ok(Value::Bool(self.values_equal(&l, &r)?)),
            BinaryOp::Neq => return Ok(Value::Bool(!self.values_equal(&l, &r)?)),
            _ => {}
        }
        match (l, r) {
            (Value::Int(a), Value::Int(b)) => {
                let checked = |v: Option<i64>| v.map(Value::Int).ok_or(VmError::Overflow);
                match op {
                    BinaryOp::Add => checked(a.checked_add(b)),
                    BinaryOp::Sub => checked(a.checked_sub(b)),
                    BinaryOp::Mul => checked(a.checked_mul(b)),
                    BinaryOp::Quo if b == 0 => Err(VmError::DivisionByZero),
                    BinaryOp::Quo => checked(a.checked_div(b)),
                    BinaryOp::Rem if b == 0 => Err(VmError::DivisionByZero),
                    BinaryOp::Rem => checked(a.checked_rem(b)),
                    _ => compare(op, a.cmp(&b)),
                }
            }
            (Value::String(a), Value::String(b)) => match op {
                BinaryOp::Add => Ok(Value::String(a + &b)),
                _ => compare(op, a.cmp(&b)),
            },
            (Value::Bool(a), Value::Bool(b)) => match op {
                BinaryOp::LAnd => Ok(Value::Bool(a && b)),
                BinaryOp::LOr => Ok(Value::Bool(a || b)),
                _ => Err(VmError::invalid(format!("operator {op} not defined on bool"))),
            },
            (l, r) => Err(VmError::invalid(format!(
                "mismatched operands {} {op} {}",
                l.kind(),
                r.kind()
            ))),
        }
    }

    pub(super) fn values_equal(&mut self, l: &Value, r: &Value) -> Result<bool, VmError> {
        Ok(match (l, r) {
            (Value::Nil, Value::Nil) => true,
            (Value::Nil, _) | (_, Value::Nil) => false,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) | (Value::Array(a), Value::Array(b)) => {
                if a == b {
                    return Ok(true);
                }
                let (ta, ea) = aggregate_parts(self.store.body(*a)?);
                let (tb, eb) = aggregate_parts(self.store.body(*b)?);
                if ta != tb || ea.len() != eb.len() {
                    return Ok(false);
                }
                for (x, y) in ea.iter().zip(&eb) {
                    if !self.values_equal(x, y)? {
                        return Ok(false);
                    }
                }
                true
            }
            (Value::Map(a), Value::Map(b)) | (Value::Closure(a), Value::Closure(b)) => a == b,
            (Value::Pointer { base: a, index: i }, Value::Pointer { base: b, index: j }) => a == b && i == j,
            (Value::Slice { .. }, Value::Slice { .. }) => {
                return Err(VmError::invalid("slices can only be compared to nil"));
            }
            (Value::Func { .. }, Value::Func { .. })
            | (Value::Type(_), Value::Type(_))
            | (Value::Package(_), Value::Package(_))
            | (Value::Builtin(_), Value::Builtin(_)) => l == r,
            _ => false,
        })
    }

    /// Whether `v` has dynamic type `ty`.
    pub(super) fn assert_type(&mut self, v: &Value, ty: &Type) -> Result<bool, VmError> {
        Ok(match ty {
            Type::Any => !matches!(v, Value::Nil),
            Type::Bool => matches!(v, Value::Bool(_)),
            Type::Int => matches!(v, Value::Int(_)),
            Type::String => matches!(v, Value::String(_)),
            Type::Named(r) => match self.declared(r)?.underlying {
                Type::Struct(_) => match v {
                    Value::Struct(h) => self.struct_type(*h)?.as_ref() == Some(r),
                    _ => false,
                },
                Type::Interface(methods) => self.implements(v, &methods)?,
                underlying => self.assert_type(v, &underlying)?,
            },
            Type::Pointer(inner) => match (v, inner.as_ref()) {
                (Value::Pointer { .. }, Type::Named(r)) => match self.deref(v)? {
                    Value::Struct(h) => self.struct_type(h)?.as_ref() == Some(r),
                    _ => false,
                },
                (Value::Pointer { .. }, _) => true,
                _ => false,
            },
            Type::Interface(methods) => self.implements(v, methods)?,
            Type::Slice(_) => matches!(v, Value::Slice { .. }),
            Type::Array(..) => matches!(v, Value::Array(_)),
            Type::Map(..) => matches!(v, Value::Map(_)),
            Type::Func(_) => matches!(v, Value::Closure(_) | Value::Func { .. } | Value::Bound { .. }),
            Type::Struct(_) => match v {
                Value::Struct(h) => self.struct_type(*h)?.is_none(),
                _ => false,
            },
            _ => false,
        })
    }

    fn struct_type(&mut self, h: Handle) -> Result<Option<TypeRef>, VmError> {
        match self.store.body(h)? {
            ObjectBody::Struct { ty, .. } => Ok(ty.clone()),
            _ => Ok(None),
        }
    }

    /// Method-set check: a struct value has its value methods, a pointer
    /// to one has all of them.
    fn implements(&mut self, v: &Value, methods: &[MethodSig]) -> Result<bool, VmError> {
        if matches!(v, Value::Nil) {
            return Ok(false);
        }
        if methods.is_empty() {
            return Ok(true);
        }
        let all = matches!(v, Value::Pointer { .. });
        let Ok(r) = self.type_ref_of(v) else {
            return Ok(false);
        };
        let decl = self.declared(&r)?;
        Ok(methods.iter().all(|want| {
            decl.methods
                .iter()
                .any(|m| m.name == want.name && (all || !m.pointer_receiver))
        }))
    }
}

fn universe_value(index: u16) -> Result<Value, VmError> {
    let u = Universal::from_index(index).ok_or_else(|| VmError::invalid(format!("no universe name at {index}")))?;
    Ok(match u {
        Universal::Bool => Value::Type(Type::Bool),
        Universal::Int => Value::Type(Type::Int),
        Universal::String => Value::Type(Type::String),
        Universal::Any => Value::Type(Type::Any),
        Universal::True => Value::Bool(true),
        Universal::False => Value::Bool(false),
        Universal::Nil => Value::Nil,
        builtin => Value::Builtin(builtin),
    })
}

fn checked_index(index: &Value, len: usize) -> Result<u32, VmError> {
    let Value::Int(i) = index else {
        return Err(VmError::invalid(format!("index of kind {}", index.kind())));
    };
    if *i < 0 || *i as usize >= len {
        return Err(VmError::IndexOutOfRange { index: *i, len });
    }
    Ok(*i as u32)
}

fn bounds(low: Option<i64>, high: Option<i64>, len: usize, cap: usize) -> Result<(usize, usize), VmError> {
    let lo = low.unwrap_or(0);
    let hi = high.unwrap_or(len as i64);
    if hi < 0 || hi as usize > cap {
        return Err(VmError::IndexOutOfRange { index: hi, len: cap });
    }
    if lo < 0 || lo > hi {
        return Err(VmError::IndexOutOfRange {
            index: lo,
            len: hi as usize,
        });
    }
    Ok((lo as usize, hi as usize))
}

fn compare(op: BinaryOp, ord: std::cmp::Ordering) -> Result<Value, VmError> {
    use std::cmp::Ordering::*;
    Ok(Value::Bool(match op {
        BinaryOp::Lss => ord == Less,
        BinaryOp::Gtr => ord == Greater,
        BinaryOp::Leq => ord != Greater,
        BinaryOp::Geq => ord != Less,
        _ => return Err(VmError::invalid(format!("operator {op} not defined here"))),
    }))
}

fn aggregate_parts(body: &ObjectBody<Handle>) -> (Option<TypeRef>, Vec<Value>) {
    match body {
        ObjectBody::Struct { ty, fields } => (ty.clone(), fields.clone()),
        ObjectBody::Array { elems } => (None, elems.clone()),
        _ => (None, Vec::new()),
    }
}
