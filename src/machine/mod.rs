//! Reference tree-walking evaluator.
//!
//! The machine runs preprocessed packages directly off their program
//! trees. Every name carries the address the resolver gave it, so a lookup
//! is a walk of `depth - 1` parent links from the current block object.
//! Blocks, closures, composites and heap items all live in the
//! transaction's [`ObjectStore`], which is what makes state reachable from
//! a package persist when the transaction finalizes.
//!
//! Realm rules are enforced here: crossing calls push the callee's realm,
//! and every write into a real object is checked against the current realm
//! before it happens.

mod builtins;
pub mod errors;
mod eval;
mod exec;
pub mod gas;

#[cfg(test)]
mod tests;

pub use errors::{ErrorClass, VmError};
pub use gas::{GasCategory, GasMeter, GasProfile, GasSchedule};

use crate::ast::{Decl, Expr, Name, NodeId, ScopeId};
use crate::debug;
use crate::object::{BlockParent, Handle, MapKey, ObjectBody, ObjectStore, Value};
use crate::preprocess::{CompiledPackage, DeclaredType, PackageGetter, Type, TypeRef};
use crate::realm::{Realm, RealmStack, check_call_form};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Where evaluation currently is: a package and its innermost block.
///
/// `File` is the top level of one file, where package value declarations
/// are evaluated. Above a file scope sits the package object.
#[derive(Clone)]
struct Frame {
    pkg: Arc<CompiledPackage>,
    loc: BlockParent<Handle>,
}

/// Outcome of executing a statement.
#[derive(Debug)]
enum Flow {
    Normal,
    Break(u8),
    Continue(u8),
    Return(Vec<Value>),
}

/// An assignable location.
#[derive(Clone, Debug)]
enum Place {
    Slot { base: Handle, index: u32 },
    MapEntry { map: Handle, key: MapKey },
    /// Readable but not assignable, such as an import.
    Fixed(Value),
    /// The blank identifier.
    Discard,
}

/// A call scheduled by `defer`.
struct Deferred {
    callee: Value,
    args: Vec<Value>,
    with_cross: bool,
}

/// Evaluator state for one transaction.
pub struct Machine<'m, 'a> {
    store: &'m mut ObjectStore<'a>,
    getter: &'m dyn PackageGetter,
    /// Packages instantiated by this machine that the getter does not know yet.
    local: BTreeMap<String, Arc<CompiledPackage>>,
    realms: RealmStack,
    gas: GasMeter,
    max_call_depth: usize,
    depth: usize,
    defers: Vec<Vec<Deferred>>,
    read_charged: u64,
}

impl<'m, 'a> Machine<'m, 'a> {
    pub fn new(
        store: &'m mut ObjectStore<'a>,
        getter: &'m dyn PackageGetter,
        origin: Realm,
        gas: GasMeter,
        max_call_depth: usize,
    ) -> Self {
        Self {
            store,
            getter,
            local: BTreeMap::new(),
            realms: RealmStack::new(origin),
            gas,
            max_call_depth,
            depth: 0,
            defers: Vec::new(),
            read_charged: 0,
        }
    }

    pub fn realms(&self) -> &RealmStack {
        &self.realms
    }

    pub fn gas(&self) -> &GasMeter {
        &self.gas
    }

    pub fn gas_used(&self) -> u64 {
        self.gas.used()
    }

    /// Ends execution and hands the meter back for finalization charges.
    pub fn into_gas(self) -> GasMeter {
        self.gas
    }

    // ----- packages -----

    fn package(&self, pkg_path: &str) -> Result<Arc<CompiledPackage>, VmError> {
        if let Some(pkg) = self.local.get(pkg_path) {
            return Ok(pkg.clone());
        }
        self.getter
            .get_package(pkg_path)
            .ok_or_else(|| VmError::UnknownPackage(pkg_path.to_string()))
    }

    fn declared(&self, r: &TypeRef) -> Result<DeclaredType, VmError> {
        self.package(&r.pkg_path)?
            .types
            .get(&r.name)
            .cloned()
            .ok_or_else(|| VmError::invalid(format!("unknown type {r}")))
    }

    /// Creates the package object, evaluates top-level declarations, runs
    /// `init` and makes the package the root of its persisted state.
    ///
    /// Returns [`VmError::PackageExists`] if the path is already taken.
    pub fn instantiate(&mut self, pkg: Arc<CompiledPackage>) -> Result<Handle, VmError> {
        let pkg_path = pkg.pkg_path.clone();
        if self.store.has_package(&pkg_path)? {
            return Err(VmError::PackageExists(pkg_path));
        }
        self.local.insert(pkg_path.clone(), pkg.clone());

        let mut slots = vec![Value::Nil; pkg.num_names(pkg.package_scope)];
        for file in pkg.files() {
            let Some(f) = pkg.tree.file(file) else {
                continue;
            };
            for &d in &f.decls {
                match pkg.tree.decl(d) {
                    Some(Decl::Func { name, recv: None, .. }) => {
                        if let Some(i) = pkg.package_slot(name) {
                            slots[i as usize] = Value::Func {
                                pkg_path: pkg_path.clone(),
                                decl: d,
                            };
                        }
                    }
                    Some(Decl::Type { name, .. }) => {
                        if let Some(i) = pkg.package_slot(name)
                            && let Some(Type::TypeName(t)) = pkg
                                .scopes
                                .slot(pkg.package_scope, i)
                                .and_then(|s| s.ty.clone())
                        {
                            slots[i as usize] = Value::Type(*t);
                        }
                    }
                    _ => {}
                }
            }
        }
        let h = self.alloc(ObjectBody::Package {
            pkg_path: pkg_path.clone(),
            slots,
        })?;
        self.store.register_package(&pkg_path, h);

        for file in pkg.files() {
            let frame = Frame {
                pkg: pkg.clone(),
                loc: BlockParent::File(file),
            };
            let decls = pkg.tree.file(file).map(|f| f.decls.clone()).unwrap_or_default();
            for d in decls {
                if let Some(Decl::Value {
                    names, ty, values, ..
                }) = pkg.tree.decl(d)
                {
                    self.exec_value_decl(&frame, names, *ty, values)?;
                }
            }
        }

        let init = Name::from("init");
        if let Some(decl) = pkg.func_decl(&init) {
            let is_crossing = matches!(pkg.tree.decl(decl), Some(Decl::Func { is_crossing: true, .. }));
            let callee = Value::Func {
                pkg_path: pkg_path.clone(),
                decl,
            };
            self.call(&callee, Vec::new(), is_crossing)?;
        }

        let id = self.store.make_package_real(h)?;
        debug!("instantiated {} as {}", pkg_path, id);
        Ok(h)
    }

    // ----- calls -----

    /// Calls the top-level function `func` of a package.
    pub fn call_function(
        &mut self,
        pkg_path: &str,
        func: &Name,
        args: Vec<Value>,
        with_cross: bool,
    ) -> Result<Vec<Value>, VmError> {
        let pkg = self.package(pkg_path)?;
        let decl = pkg.func_decl(func).ok_or_else(|| VmError::InvalidCall {
            reason: format!("{pkg_path} has no function {func}"),
        })?;
        let callee = Value::Func {
            pkg_path: pkg_path.to_string(),
            decl,
        };
        self.call(&callee, args, with_cross)
    }

    /// Calls a function value with a plain call.
    pub fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> Result<Vec<Value>, VmError> {
        self.call(callee, args, false)
    }

    fn call(&mut self, callee: &Value, args: Vec<Value>, with_cross: bool) -> Result<Vec<Value>, VmError> {
        match callee {
            Value::Func { pkg_path, decl } => self.call_decl(pkg_path, *decl, None, args, with_cross),
            Value::Bound { recv, pkg_path, decl } => {
                self.call_decl(pkg_path, *decl, Some((**recv).clone()), args, with_cross)
            }
            Value::Closure(h) => {
                let ObjectBody::Closure {
                    pkg_path,
                    decl,
                    parent,
                    captures,
                } = self.store.body(*h)?.clone()
                else {
                    return Err(VmError::invalid("closure handle does not hold a closure"));
                };
                check_call_form(&Name::from("func literal"), false, with_cross)?;
                let pkg = self.package(&pkg_path)?;
                let Some(Expr::FuncLit { captures: bindings, .. }) = pkg.tree.expr(decl) else {
                    return Err(VmError::invalid("closure does not point at a function literal"));
                };
                let bound: Vec<(u16, Value)> = bindings.iter().map(|c| c.slot).zip(captures).collect();
                self.invoke(pkg, decl, parent, None, args, &bound)
            }
            Value::Builtin(u) => {
                if with_cross {
                    return Err(VmError::InvalidCall {
                        reason: format!("builtin {} cannot be called across realms", u.name()),
                    });
                }
                Ok(vec![self.call_builtin(*u, args)?])
            }
            Value::Nil => Err(VmError::NilDereference),
            other => Err(VmError::InvalidCall {
                reason: format!("cannot call a value of kind {}", other.kind()),
            }),
        }
    }

    fn call_decl(
        &mut self,
        pkg_path: &str,
        decl: NodeId,
        recv: Option<Value>,
        args: Vec<Value>,
        with_cross: bool,
    ) -> Result<Vec<Value>, VmError> {
        let pkg = self.package(pkg_path)?;
        let Some(Decl::Func { name, is_crossing, .. }) = pkg.tree.decl(decl) else {
            return Err(VmError::invalid(format!("{decl} is not a function declaration")));
        };
        check_call_form(name, *is_crossing, with_cross)?;
        let file = self.file_of(&pkg, decl)?;
        let crossing = with_cross && *is_crossing;
        if crossing {
            self.realms.cross_into(pkg_path)?;
            debug!("crossing into {} for {}", pkg_path, name);
        }
        let result = self.invoke(pkg, decl, BlockParent::File(file), recv, args, &[]);
        if crossing {
            self.realms.exit();
        }
        result
    }

    /// File node enclosing a top-level function declaration.
    fn file_of(&self, pkg: &CompiledPackage, decl: NodeId) -> Result<NodeId, VmError> {
        let scope = self.scope_of(pkg, decl)?;
        let file_scope = pkg
            .scopes
            .get(scope)
            .parent
            .ok_or_else(|| VmError::invalid("function scope without a parent"))?;
        Ok(pkg.scopes.get(file_scope).source)
    }

    fn scope_of(&self, pkg: &CompiledPackage, node: NodeId) -> Result<ScopeId, VmError> {
        pkg.scope_of(node)
            .ok_or_else(|| VmError::invalid(format!("node {node} has no scope")))
    }

    /// Runs a function body in a fresh block.
    ///
    /// Returns [`VmError::CallDepthExceeded`] past the configured depth.
    fn invoke(
        &mut self,
        pkg: Arc<CompiledPackage>,
        node: NodeId,
        parent: BlockParent<Handle>,
        recv: Option<Value>,
        args: Vec<Value>,
        captures: &[(u16, Value)],
    ) -> Result<Vec<Value>, VmError> {
        if self.depth >= self.max_call_depth {
            return Err(VmError::CallDepthExceeded {
                limit: self.max_call_depth,
            });
        }
        self.gas.charge_units(GasCategory::Call, 1)?;

        let (params, body) = match (pkg.tree.decl(node), pkg.tree.expr(node)) {
            (Some(Decl::Func { ty, body, .. }), _) | (_, Some(Expr::FuncLit { ty, body, .. })) => {
                match pkg.tree.expr(*ty) {
                    Some(Expr::FuncType { params, .. }) => (params.len(), body.clone()),
                    _ => return Err(VmError::invalid("function without a function type")),
                }
            }
            _ => return Err(VmError::invalid(format!("{node} is not a function"))),
        };
        let args = spread(args, params);
        if args.len() != params {
            return Err(VmError::InvalidCall {
                reason: format!("wrong argument count: have {}, want {params}", args.len()),
            });
        }

        let scope = self.scope_of(&pkg, node)?;
        let mut slots = vec![Value::Nil; pkg.num_names(scope)];
        let mut next = 0;
        if let Some(recv) = recv {
            slots[0] = recv;
            next = 1;
        }
        for (i, arg) in args.into_iter().enumerate() {
            slots[next + i] = self.copy_value(arg)?;
        }
        for (slot, value) in captures {
            if let Some(s) = slots.get_mut(*slot as usize) {
                *s = value.clone();
            }
        }
        let block = self.alloc(ObjectBody::Block {
            pkg_path: pkg.pkg_path.clone(),
            source: node,
            parent,
            slots,
        })?;
        let frame = Frame {
            pkg,
            loc: BlockParent::Block(block),
        };

        self.depth += 1;
        self.defers.push(Vec::new());
        let outcome = self.exec_list(&frame, &body);
        let deferred = self.defers.pop().unwrap_or_default();
        let outcome = outcome.and_then(|flow| {
            for d in deferred.into_iter().rev() {
                self.call(&d.callee, d.args, d.with_cross)?;
            }
            Ok(flow)
        });
        self.depth -= 1;

        match outcome? {
            Flow::Return(values) => Ok(values),
            Flow::Normal => Ok(Vec::new()),
            Flow::Break(_) | Flow::Continue(_) => Err(VmError::invalid("branch escaped its function")),
        }
    }

    // ----- blocks and places -----

    fn alloc(&mut self, body: ObjectBody<Handle>) -> Result<Handle, VmError> {
        self.gas
            .charge_units(GasCategory::Allocation, body.num_slots().max(1) as u64)?;
        Ok(self.store.alloc(body))
    }

    /// Opens the block of a scope-bearing node below `frame`.
    fn enter_block(&mut self, frame: &Frame, node: NodeId) -> Result<Frame, VmError> {
        let scope = self.scope_of(&frame.pkg, node)?;
        let block = self.alloc(ObjectBody::Block {
            pkg_path: frame.pkg.pkg_path.clone(),
            source: node,
            parent: frame.loc.clone(),
            slots: vec![Value::Nil; frame.pkg.num_names(scope)],
        })?;
        Ok(Frame {
            pkg: frame.pkg.clone(),
            loc: BlockParent::Block(block),
        })
    }

    fn frame_block(&self, frame: &Frame) -> Result<Handle, VmError> {
        match frame.loc {
            BlockParent::Block(h) => Ok(h),
            BlockParent::File(_) => Err(VmError::invalid("statement outside of a block")),
        }
    }

    /// Location `depth` blocks up from `frame`; depth 1 is the frame itself.
    fn locate(&mut self, frame: &Frame, depth: u8, index: u16) -> Result<Place, VmError> {
        enum Loc {
            At(BlockParent<Handle>),
            Package,
        }
        let mut loc = Loc::At(frame.loc.clone());
        for _ in 1..depth {
            loc = match loc {
                Loc::At(BlockParent::Block(h)) => match self.store.body(h)? {
                    ObjectBody::Block { parent, .. } => Loc::At(parent.clone()),
                    other => {
                        return Err(VmError::invalid(format!("{} object in a block chain", other.kind())));
                    }
                },
                Loc::At(BlockParent::File(_)) => Loc::Package,
                Loc::Package => return Err(VmError::invalid("address reaches above the package")),
            };
        }
        match loc {
            Loc::At(BlockParent::Block(base)) => Ok(Place::Slot {
                base,
                index: index as u32,
            }),
            Loc::At(BlockParent::File(file)) => {
                let scope = self.scope_of(&frame.pkg, file)?;
                match frame.pkg.scopes.slot(scope, index).and_then(|s| s.ty.clone()) {
                    Some(Type::Package(path)) => Ok(Place::Fixed(Value::Package(path))),
                    _ => Err(VmError::invalid("file scope slot is not an import")),
                }
            }
            Loc::Package => Ok(Place::Slot {
                base: self.store.package(&frame.pkg.pkg_path)?,
                index: index as u32,
            }),
        }
    }

    fn load(&mut self, place: &Place) -> Result<Value, VmError> {
        match place {
            Place::Slot { base, index } => Ok(self.store.elem(*base, *index)?),
            Place::MapEntry { map, key } => match self.store.map_get(*map, key)? {
                Some(v) => Ok(v),
                None => {
                    let ty = self.store.map_value_type(*map)?;
                    self.zero(&ty)
                }
            },
            Place::Fixed(v) => Ok(v.clone()),
            Place::Discard => Err(VmError::invalid("cannot use _ as a value")),
        }
    }

    /// Stores `value` at `place`. Writes into real objects require the
    /// current realm to own them.
    fn store_at(&mut self, place: &Place, value: Value) -> Result<(), VmError> {
        match place {
            Place::Slot { base, index } => {
                self.check_write(*base)?;
                self.store.set_elem(*base, *index, value)?;
            }
            Place::MapEntry { map, key } => {
                self.check_write(*map)?;
                self.store.map_set(*map, key.clone(), value)?;
            }
            Place::Fixed(_) => return Err(VmError::invalid("cannot assign to this expression")),
            Place::Discard => {}
        }
        Ok(())
    }

    fn check_write(&mut self, h: Handle) -> Result<(), VmError> {
        if let Some(id) = self.store.object_id(h) {
            self.realms.check_mutation(&id)?;
        }
        Ok(())
    }

    /// Copies structs and arrays, which have value semantics. Other values
    /// are shared.
    fn copy_value(&mut self, v: Value) -> Result<Value, VmError> {
        match v {
            Value::Struct(h) => {
                let ObjectBody::Struct { ty, fields } = self.store.body(h)?.clone() else {
                    return Err(VmError::invalid("struct value without a struct object"));
                };
                let fields = fields
                    .into_iter()
                    .map(|f| self.copy_value(f))
                    .collect::<Result<_, _>>()?;
                Ok(Value::Struct(self.alloc(ObjectBody::Struct { ty, fields })?))
            }
            Value::Array(h) => {
                let ObjectBody::Array { elems } = self.store.body(h)?.clone() else {
                    return Err(VmError::invalid("array value without an array object"));
                };
                let elems = elems
                    .into_iter()
                    .map(|e| self.copy_value(e))
                    .collect::<Result<_, _>>()?;
                Ok(Value::Array(self.alloc(ObjectBody::Array { elems })?))
            }
            other => Ok(other),
        }
    }

    /// Zero value of `ty`.
    fn zero(&mut self, ty: &Type) -> Result<Value, VmError> {
        Ok(match ty {
            Type::Int => Value::Int(0),
            Type::Bool => Value::Bool(false),
            Type::String => Value::String(String::new()),
            Type::Named(r) => match self.declared(r)?.underlying {
                Type::Struct(fields) => self.zero_struct(Some(r.clone()), &fields)?,
                other => self.zero(&other)?,
            },
            Type::Struct(fields) => self.zero_struct(None, fields)?,
            Type::Array(n, elt) => {
                let elems = (0..*n).map(|_| self.zero(elt)).collect::<Result<_, _>>()?;
                Value::Array(self.alloc(ObjectBody::Array { elems })?)
            }
            _ => Value::Nil,
        })
    }

    fn zero_struct(&mut self, ty: Option<TypeRef>, fields: &[crate::preprocess::FieldDef]) -> Result<Value, VmError> {
        let fields = fields
            .iter()
            .map(|f| self.zero(&f.ty))
            .collect::<Result<_, _>>()?;
        Ok(Value::Struct(self.alloc(ObjectBody::Struct { ty, fields })?))
    }

    /// Charges one evaluation step plus any store reads since the last charge.
    fn step(&mut self) -> Result<(), VmError> {
        self.gas.charge_units(GasCategory::Step, 1)?;
        let read = self.store.bytes_read();
        if read > self.read_charged {
            let delta = read - self.read_charged;
            self.read_charged = read;
            self.gas.charge_units(GasCategory::StoreRead, delta)?;
        }
        Ok(())
    }
}

/// A single tuple argument fills every parameter.
fn spread(args: Vec<Value>, params: usize) -> Vec<Value> {
    match <[Value; 1]>::try_from(args) {
        Ok([Value::Tuple(items)]) if items.len() == params && params != 1 => items,
        Ok([single]) => vec![single],
        Err(args) => args,
    }
}

/// Packs call results into one value.
fn pack(mut results: Vec<Value>) -> Value {
    match results.len() {
        1 => results.remove(0),
        _ => Value::Tuple(results),
    }
}
