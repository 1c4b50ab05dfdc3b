//! Three-pass resolution of one package.
//!
//! 1. Predefine every top-level name so declarations can refer to each
//!    other in any order.
//! 2. Define types, method sets, function signatures and package values.
//! 3. Resolve function bodies.
//!
//! Every name and selector node gets its [`Address`]; every block node gets
//! its scope. Name occurrences are recorded for the escape pass.

use super::errors::ProgramError;
use super::scope::{ScopeKind, ScopeTable};
use super::types::{DeclaredType, FieldDef, FuncSig, MethodEntry, MethodSig, Type, TypeRef};
use super::universe::Universal;
use super::{PackageGetter, PreprocessOptions};
use crate::ast::{
    Address, AddressCategory, AttrKey, AttrValue, BranchOp, Decl, Expr, Keying, LitKind, NameKind,
    Name, NodeId, NodeKind, ProgramTree, ScopeId, Stmt, UnaryOp,
};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TargetKind {
    Loop,
    Switch,
}

#[derive(Clone, Debug)]
struct BranchTarget {
    label: Option<Name>,
    kind: TargetKind,
}

/// A name occurrence bound to a block slot.
#[derive(Clone, Debug)]
pub(super) struct NameUse {
    pub node: NodeId,
    /// Scope the occurrence was resolved from.
    pub scope: ScopeId,
    pub declaring: ScopeId,
    pub index: u16,
    /// Statement that defines the name, for defining occurrences.
    pub define_site: Option<NodeId>,
}

#[derive(Debug, Default)]
pub(super) struct Resolution {
    pub uses: Vec<NameUse>,
}

pub(super) struct Resolver<'a> {
    pub tree: ProgramTree,
    pub scopes: ScopeTable,
    pub types: BTreeMap<Name, DeclaredType>,
    pub resolution: Resolution,
    pub pkg_scope: ScopeId,
    getter: &'a dyn PackageGetter,
    options: PreprocessOptions,
    pkg_path: String,
    type_decls: BTreeSet<Name>,
    branches: Vec<BranchTarget>,
    results: Vec<usize>,
    crossing_marker: Option<NodeId>,
}

/// `crossing()` as an expression statement.
fn crossing_call(tree: &ProgramTree, stmt: NodeId) -> Option<NodeId> {
    let Some(Stmt::Expr { x }) = tree.stmt(stmt) else {
        return None;
    };
    match tree.expr(*x)? {
        Expr::Call { func, args, .. } if args.is_empty() => {
            let callee = tree.name_expr(*func)?;
            (callee.name.as_str() == Universal::Crossing.name()).then_some(*x)
        }
        _ => None,
    }
}

impl<'a> Resolver<'a> {
    pub fn new(tree: ProgramTree, getter: &'a dyn PackageGetter, options: PreprocessOptions) -> Self {
        let pkg_path = tree.pkg_path.clone();
        Self {
            tree,
            scopes: ScopeTable::new(),
            types: BTreeMap::new(),
            resolution: Resolution::default(),
            pkg_scope: ScopeId(0),
            getter,
            options,
            pkg_path,
            type_decls: BTreeSet::new(),
            branches: Vec::new(),
            results: Vec::new(),
            crossing_marker: None,
        }
    }

    fn line(&self, id: NodeId) -> u32 {
        self.tree.get(id).map(|n| n.attrs.line).unwrap_or(0)
    }

    fn malformed(node: NodeId, reason: &'static str) -> ProgramError {
        ProgramError::MalformedTree { node, reason }
    }

    fn type_error(&self, id: NodeId, reason: impl Into<String>) -> ProgramError {
        ProgramError::TypeError {
            line: self.line(id),
            reason: reason.into(),
        }
    }

    fn expr_of(&self, id: NodeId) -> Result<Expr, ProgramError> {
        self.tree
            .expr(id)
            .cloned()
            .ok_or_else(|| Self::malformed(id, "expected an expression"))
    }

    fn stmt_of(&self, id: NodeId) -> Result<Stmt, ProgramError> {
        self.tree
            .stmt(id)
            .cloned()
            .ok_or_else(|| Self::malformed(id, "expected a statement"))
    }

    fn decl_of(&self, id: NodeId) -> Result<Decl, ProgramError> {
        self.tree
            .decl(id)
            .cloned()
            .ok_or_else(|| Self::malformed(id, "expected a declaration"))
    }

    fn name_of(&self, id: NodeId) -> Result<Name, ProgramError> {
        self.tree
            .name_expr(id)
            .map(|n| n.name.clone())
            .ok_or_else(|| Self::malformed(id, "expected a name"))
    }

    fn set_scope(&mut self, id: NodeId, scope: ScopeId) {
        if let Some(node) = self.tree.get_mut(id) {
            node.scope = Some(scope);
        }
    }

    fn mark(&mut self, id: NodeId, key: AttrKey) {
        if let Some(node) = self.tree.get_mut(id) {
            node.attrs.set(key, AttrValue::Flag);
        }
    }

    fn set_name(&mut self, id: NodeId, path: Address, kind: NameKind) {
        if let Some(n) = self.tree.name_expr_mut(id) {
            n.path = Some(path);
            n.kind = kind;
        }
    }

    /// Declared type behind a reference, from this package or an import.
    fn declared(&self, r: &TypeRef) -> Option<DeclaredType> {
        if r.pkg_path == self.pkg_path {
            self.types.get(&r.name).cloned()
        } else {
            self.getter
                .get_package(&r.pkg_path)
                .and_then(|p| p.types.get(&r.name).cloned())
        }
    }

    fn underlying(&self, ty: &Type) -> Type {
        let mut current = ty.clone();
        for _ in 0..16 {
            match &current {
                Type::Named(r) => match self.declared(r) {
                    Some(d) => current = d.underlying,
                    None => return Type::Any,
                },
                _ => break,
            }
        }
        current
    }

    // ----- entry point -----

    pub fn run(&mut self) -> Result<(), ProgramError> {
        let root = self
            .tree
            .root()
            .ok_or_else(|| Self::malformed(NodeId(0), "missing package root"))?;
        let pkg = self
            .tree
            .package()
            .cloned()
            .ok_or_else(|| Self::malformed(root, "root is not a package"))?;
        crate::ast::validate_pkg_path(&pkg.pkg_path)?;
        crate::ast::validate_pkg_name(pkg.pkg_name.as_str())?;

        self.pkg_scope = self.scopes.push(ScopeKind::Package, root, None);
        self.set_scope(root, self.pkg_scope);

        let mut files = Vec::with_capacity(pkg.files.len());
        for &file_id in &pkg.files {
            let file = self
                .tree
                .file(file_id)
                .cloned()
                .ok_or_else(|| Self::malformed(file_id, "expected a file"))?;
            if file.pkg_name != pkg.pkg_name {
                return Err(ProgramError::PackageNameMismatch {
                    file: file.name,
                    found: file.pkg_name,
                    expected: pkg.pkg_name,
                });
            }
            let scope = self.scopes.push(ScopeKind::File, file_id, Some(self.pkg_scope));
            self.set_scope(file_id, scope);
            files.push((scope, file.decls));
        }

        let upgrades = self.predefine_pass(&files)?;
        self.define_pass(&files, &upgrades)?;
        self.body_pass(&files)
    }

    // ----- pass 1 -----

    fn predefine_pass(&mut self, files: &[(ScopeId, Vec<NodeId>)]) -> Result<BTreeSet<NodeId>, ProgramError> {
        let mut seen: BTreeMap<Name, NodeId> = BTreeMap::new();
        let mut upgrades = BTreeSet::new();
        let mut imports = Vec::new();

        for (file_scope, decls) in files {
            for &id in decls {
                match self.decl_of(id)? {
                    Decl::Import { name, pkg_path } => {
                        if self.getter.get_package(&pkg_path).is_none() {
                            return Err(ProgramError::UnknownImport(pkg_path));
                        }
                        self.scopes
                            .define(*file_scope, &name, Type::Package(pkg_path), true)?;
                        imports.push((name, id));
                    }
                    Decl::Func {
                        name,
                        recv: None,
                        body,
                        ..
                    } => {
                        if let Some(&prev) = seen.get(&name) {
                            let prev_is_func =
                                matches!(self.tree.decl(prev), Some(Decl::Func { recv: None, .. }));
                            if !(self.options.allow_function_upgrades && prev_is_func) {
                                return Err(ProgramError::Redeclared {
                                    name,
                                    line: self.line(id),
                                });
                            }
                            upgrades.insert(id);
                        }
                        seen.insert(name.clone(), id);
                        self.scopes.predefine(self.pkg_scope, false, &name)?;
                        self.set_crossing_flag(id, &body);
                    }
                    Decl::Func {
                        recv: Some(_),
                        body,
                        ..
                    } => self.set_crossing_flag(id, &body),
                    Decl::Value {
                        names, is_const, ..
                    } => {
                        for name_id in names {
                            let name = self.name_of(name_id)?;
                            if name.is_blank() {
                                continue;
                            }
                            if seen.insert(name.clone(), id).is_some() {
                                return Err(ProgramError::Redeclared {
                                    name,
                                    line: self.line(name_id),
                                });
                            }
                            self.scopes.predefine(self.pkg_scope, is_const, &name)?;
                            self.mark(name_id, AttrKey::Predefined);
                        }
                    }
                    Decl::Type { name, is_alias, .. } => {
                        if seen.insert(name.clone(), id).is_some() {
                            return Err(ProgramError::Redeclared {
                                name,
                                line: self.line(id),
                            });
                        }
                        self.scopes.predefine(self.pkg_scope, false, &name)?;
                        if !is_alias {
                            self.type_decls.insert(name);
                        }
                    }
                }
                self.mark(id, AttrKey::Predefined);
            }
        }

        for (name, id) in imports {
            if seen.contains_key(&name) {
                return Err(ProgramError::Redeclared {
                    name,
                    line: self.line(id),
                });
            }
        }
        Ok(upgrades)
    }

    fn set_crossing_flag(&mut self, id: NodeId, body: &[NodeId]) {
        let crossing = body
            .first()
            .is_some_and(|&first| crossing_call(&self.tree, first).is_some());
        if let Some(node) = self.tree.get_mut(id)
            && let NodeKind::Decl(Decl::Func { is_crossing, .. }) = &mut node.kind
        {
            *is_crossing = crossing;
        }
    }

    // ----- pass 2 -----

    fn define_pass(
        &mut self,
        files: &[(ScopeId, Vec<NodeId>)],
        upgrades: &BTreeSet<NodeId>,
    ) -> Result<(), ProgramError> {
        // Types first so signatures and values can name them.
        for (file_scope, decls) in files {
            for &id in decls {
                if let Decl::Type { name, ty, is_alias } = self.decl_of(id)? {
                    let t = self.eval_type(*file_scope, ty)?;
                    if is_alias {
                        self.scopes
                            .define(self.pkg_scope, &name, Type::TypeName(Box::new(t)), false)?;
                    } else {
                        let named = Type::Named(TypeRef {
                            pkg_path: self.pkg_path.clone(),
                            name: name.clone(),
                        });
                        self.scopes
                            .define(self.pkg_scope, &name, Type::TypeName(Box::new(named)), false)?;
                        self.types.insert(
                            name,
                            DeclaredType {
                                underlying: t,
                                methods: Vec::new(),
                            },
                        );
                    }
                }
            }
        }
        self.flatten_underlying();

        for (file_scope, decls) in files {
            for &id in decls {
                if let Decl::Func {
                    name,
                    recv: Some(recv),
                    ty,
                    ..
                } = self.decl_of(id)?
                {
                    self.define_method(*file_scope, id, &name, recv, ty)?;
                }
            }
        }

        for (file_scope, decls) in files {
            for &id in decls {
                if let Decl::Func {
                    name, recv: None, ty, ..
                } = self.decl_of(id)?
                {
                    let sig = self.func_sig(*file_scope, ty)?;
                    if upgrades.contains(&id) {
                        self.scopes
                            .redefine_function(self.pkg_scope, &name, Type::Func(sig))?;
                    } else {
                        self.scopes
                            .define(self.pkg_scope, &name, Type::Func(sig), false)?;
                    }
                }
            }
        }

        for (file_scope, decls) in files {
            for &id in decls {
                if let Decl::Value {
                    names,
                    ty,
                    values,
                    is_const,
                } = self.decl_of(id)?
                {
                    let types = self.value_decl_types(*file_scope, id, &names, ty, &values)?;
                    for (name_id, t) in names.iter().zip(types) {
                        let name = self.name_of(*name_id)?;
                        if name.is_blank() {
                            self.set_name(*name_id, Address::blank(), NameKind::Define);
                            continue;
                        }
                        self.scopes.define(self.pkg_scope, &name, t, is_const)?;
                        let line = self.line(*name_id);
                        let addr = self.scopes.resolve(*file_scope, &name, line)?;
                        self.set_name(*name_id, addr, NameKind::Define);
                    }
                    self.mark(id, AttrKey::Preprocessed);
                }
            }
        }
        Ok(())
    }

    /// Replaces `type A B` underlying types with B's underlying type.
    fn flatten_underlying(&mut self) {
        let names: Vec<Name> = self.types.keys().cloned().collect();
        for name in names {
            let Some(decl) = self.types.get(&name) else {
                continue;
            };
            if matches!(decl.underlying, Type::Named(_)) {
                let flat = self.underlying(&decl.underlying);
                if let Some(decl) = self.types.get_mut(&name) {
                    decl.underlying = flat;
                }
            }
        }
    }

    fn define_method(
        &mut self,
        file_scope: ScopeId,
        id: NodeId,
        name: &Name,
        recv: NodeId,
        ty: NodeId,
    ) -> Result<(), ProgramError> {
        let invalid = |reason: &str| ProgramError::InvalidMethodReceiver {
            method: name.clone(),
            reason: reason.to_string(),
        };
        let Expr::FieldType { ty: recv_ty, .. } = self.expr_of(recv)? else {
            return Err(Self::malformed(recv, "receiver must be a field"));
        };
        let (type_node, pointer_receiver) = match self.expr_of(recv_ty)? {
            Expr::Star { x } => (x, true),
            Expr::Name(_) => (recv_ty, false),
            _ => return Err(invalid("receiver must be a named type or a pointer to one")),
        };
        let type_name = match self.expr_of(type_node)? {
            Expr::Name(n) => n.name,
            _ => return Err(invalid("receiver must be a named type or a pointer to one")),
        };
        // Sets the address on the receiver type name.
        self.eval_type(file_scope, recv_ty)?;
        let Some(decl) = self.types.get(&type_name) else {
            return Err(invalid(&format!("{type_name} is not a type declared in this package")));
        };
        match decl.underlying {
            Type::Pointer(_) => return Err(invalid(&format!("{type_name} is a pointer type"))),
            Type::Interface(_) => return Err(invalid(&format!("{type_name} is an interface type"))),
            _ => {}
        }
        if decl.method_index(name).is_some() || decl.field_index(name).is_some() {
            return Err(ProgramError::Redeclared {
                name: name.clone(),
                line: self.line(id),
            });
        }
        let sig = self.func_sig(file_scope, ty)?;
        if let Some(decl) = self.types.get_mut(&type_name) {
            decl.methods.push(MethodEntry {
                name: name.clone(),
                decl: id,
                pointer_receiver,
                sig,
            });
        }
        Ok(())
    }

    fn value_decl_types(
        &mut self,
        scope: ScopeId,
        id: NodeId,
        names: &[NodeId],
        ty: Option<NodeId>,
        values: &[NodeId],
    ) -> Result<Vec<Type>, ProgramError> {
        let declared = ty.map(|t| self.eval_type(scope, t)).transpose()?;
        let inferred = if values.is_empty() {
            None
        } else {
            Some(self.rhs_types(scope, id, names.len(), values)?)
        };
        match (declared, inferred) {
            (Some(t), _) => Ok(vec![t; names.len()]),
            (None, Some(types)) => {
                for t in &types {
                    if *t == Type::Nil {
                        return Err(self.type_error(id, "use of untyped nil"));
                    }
                }
                Ok(types)
            }
            (None, None) => Err(self.type_error(id, "missing type or initial value")),
        }
    }

    /// Types of the values assigned to `n` names.
    fn rhs_types(
        &mut self,
        scope: ScopeId,
        id: NodeId,
        n: usize,
        values: &[NodeId],
    ) -> Result<Vec<Type>, ProgramError> {
        if values.len() == 1 && n > 1 {
            let value = values[0];
            let t = self.resolve_expr(scope, value)?;
            return match t {
                Type::Tuple(items) if items.len() == n => Ok(items),
                elem if n == 2 && self.is_comma_ok(value) => Ok(vec![elem, Type::Bool]),
                _ => Err(ProgramError::AssignmentMismatch {
                    line: self.line(id),
                    lhs: n,
                    rhs: 1,
                }),
            };
        }
        if values.len() != n {
            return Err(ProgramError::AssignmentMismatch {
                line: self.line(id),
                lhs: n,
                rhs: values.len(),
            });
        }
        let mut types = Vec::with_capacity(n);
        for &v in values {
            let t = self.resolve_expr(scope, v)?;
            if matches!(&t, Type::Tuple(items) if items.len() != 1) {
                return Err(self.type_error(v, "multiple-value or void call used as a value"));
            }
            types.push(t);
        }
        Ok(types)
    }

    /// `m[k]` and `x.(T)` produce a second boolean result.
    fn is_comma_ok(&self, id: NodeId) -> bool {
        matches!(self.tree.expr(id), Some(Expr::Index { .. } | Expr::TypeAssert { .. }))
    }

    // ----- pass 3 -----

    fn body_pass(&mut self, files: &[(ScopeId, Vec<NodeId>)]) -> Result<(), ProgramError> {
        for (file_scope, decls) in files {
            for &id in decls {
                if let Decl::Func {
                    recv, ty, body, ..
                } = self.decl_of(id)?
                {
                    self.resolve_function(ScopeKind::Func, id, *file_scope, recv, ty, &body)?;
                    self.mark(id, AttrKey::Preprocessed);
                }
            }
        }
        Ok(())
    }

    /// Opens the function scope, binds receiver and parameters to the first
    /// slots in order, and resolves the body.
    fn resolve_function(
        &mut self,
        kind: ScopeKind,
        node: NodeId,
        parent: ScopeId,
        recv: Option<NodeId>,
        ty: NodeId,
        body: &[NodeId],
    ) -> Result<ScopeId, ProgramError> {
        let sig = self.func_sig(parent, ty)?;
        let scope = self.scopes.push(kind, node, Some(parent));
        self.set_scope(node, scope);

        if let Some(recv) = recv {
            let Expr::FieldType { name, ty: recv_ty } = self.expr_of(recv)? else {
                return Err(Self::malformed(recv, "receiver must be a field"));
            };
            let t = self.eval_type(parent, recv_ty)?;
            let name = name
                .filter(|n| !n.is_blank())
                .unwrap_or_else(|| Name::new(".recv"));
            self.scopes.define(scope, &name, t, false)?;
        }
        let Expr::FuncType { params, .. } = self.expr_of(ty)? else {
            return Err(Self::malformed(ty, "expected a function type"));
        };
        for (i, (&param, t)) in params.iter().zip(sig.params.iter()).enumerate() {
            let name = match self.expr_of(param)? {
                Expr::FieldType { name: Some(n), .. } if !n.is_blank() => n,
                _ => Name::new(format!(".arg{i}")),
            };
            if self.scopes.get(scope).local_index(&name).is_some() {
                return Err(ProgramError::Redeclared {
                    name,
                    line: self.line(param),
                });
            }
            self.scopes.define(scope, &name, t.clone(), false)?;
        }

        let marker = match (kind, body.first()) {
            (ScopeKind::Func, Some(&first)) => crossing_call(&self.tree, first),
            _ => None,
        };
        let saved_marker = std::mem::replace(&mut self.crossing_marker, marker);
        let saved_branches = std::mem::take(&mut self.branches);
        self.results.push(sig.results.len());

        let outcome = body.iter().try_for_each(|&s| self.resolve_stmt(scope, s));

        self.results.pop();
        self.branches = saved_branches;
        self.crossing_marker = saved_marker;
        outcome?;
        Ok(scope)
    }

    fn func_sig(&mut self, scope: ScopeId, ty: NodeId) -> Result<FuncSig, ProgramError> {
        let Expr::FuncType { params, results } = self.expr_of(ty)? else {
            return Err(Self::malformed(ty, "expected a function type"));
        };
        let params = params
            .iter()
            .map(|&p| self.eval_type(scope, p))
            .collect::<Result<_, _>>()?;
        let results = results
            .iter()
            .map(|&r| self.eval_type(scope, r))
            .collect::<Result<_, _>>()?;
        Ok(FuncSig { params, results })
    }

    // ----- types -----

    fn eval_type(&mut self, scope: ScopeId, id: NodeId) -> Result<Type, ProgramError> {
        match self.expr_of(id)? {
            Expr::Name(n) => {
                let line = self.line(id);
                let addr = self.scopes.resolve(scope, &n.name, line)?;
                let ty = match addr.category {
                    AddressCategory::Universe => Universal::from_index(addr.index)
                        .map(Universal::static_type)
                        .unwrap_or(Type::Any),
                    _ => {
                        let declaring = self
                            .scopes
                            .declaring_scope(scope, &addr)
                            .ok_or_else(|| self.type_error(id, format!("{} is not a type", n.name)))?;
                        if declaring == self.pkg_scope && self.type_decls.contains(&n.name) {
                            Type::TypeName(Box::new(Type::Named(TypeRef {
                                pkg_path: self.pkg_path.clone(),
                                name: n.name.clone(),
                            })))
                        } else {
                            self.scopes
                                .slot(declaring, addr.index)
                                .and_then(|s| s.ty.clone())
                                .ok_or(ProgramError::UsedBeforeDefined {
                                    name: n.name.clone(),
                                    line: self.line(id),
                                })?
                        }
                    }
                };
                self.set_name(id, addr, NameKind::Normal);
                match ty {
                    Type::TypeName(t) => Ok(*t),
                    _ => Err(self.type_error(id, format!("{} is not a type", n.name))),
                }
            }
            Expr::Selector { x, sel, .. } => match self.resolve_selector(scope, id, x, &sel)? {
                Type::TypeName(t) => Ok(*t),
                _ => Err(self.type_error(id, format!("{sel} is not a type"))),
            },
            Expr::Star { x } => Ok(Type::pointer_to(self.eval_type(scope, x)?)),
            Expr::SliceType { elt } => Ok(Type::slice_of(self.eval_type(scope, elt)?)),
            Expr::ArrayType { len, elt } => Ok(Type::Array(len, Box::new(self.eval_type(scope, elt)?))),
            Expr::MapType { key, value } => Ok(Type::Map(
                Box::new(self.eval_type(scope, key)?),
                Box::new(self.eval_type(scope, value)?),
            )),
            Expr::FuncType { .. } => Ok(Type::Func(self.func_sig(scope, id)?)),
            Expr::FieldType { ty, .. } => self.eval_type(scope, ty),
            Expr::StructType { fields } => {
                let mut defs: Vec<FieldDef> = Vec::with_capacity(fields.len());
                for field in fields {
                    let Expr::FieldType { name, ty } = self.expr_of(field)? else {
                        return Err(Self::malformed(field, "expected a field"));
                    };
                    let Some(name) = name else {
                        return Err(ProgramError::Unsupported {
                            what: "embedded fields",
                            line: self.line(field),
                        });
                    };
                    if defs.iter().any(|d| d.name == name) {
                        return Err(ProgramError::Redeclared {
                            name,
                            line: self.line(field),
                        });
                    }
                    let ty = self.eval_type(scope, ty)?;
                    defs.push(FieldDef { name, ty });
                }
                Ok(Type::Struct(defs))
            }
            Expr::InterfaceType { methods } => {
                let mut sigs = Vec::with_capacity(methods.len());
                for m in methods {
                    let Expr::FieldType { name: Some(name), ty } = self.expr_of(m)? else {
                        return Err(ProgramError::Unsupported {
                            what: "embedded interfaces",
                            line: self.line(m),
                        });
                    };
                    let sig = self.func_sig(scope, ty)?;
                    sigs.push(MethodSig { name, sig });
                }
                Ok(Type::Interface(sigs))
            }
            _ => Err(self.type_error(id, "expression is not a type")),
        }
    }

    // ----- statements -----

    fn resolve_stmt(&mut self, scope: ScopeId, id: NodeId) -> Result<(), ProgramError> {
        let stmt = self.stmt_of(id)?;
        match stmt {
            Stmt::Assign { lhs, op, rhs } => self.resolve_assign(scope, id, &lhs, op, &rhs)?,
            Stmt::Block { body } => {
                let inner = self.scopes.push(ScopeKind::Block, id, Some(scope));
                self.set_scope(id, inner);
                for s in body {
                    self.resolve_stmt(inner, s)?;
                }
            }
            Stmt::Branch { op, label, .. } => {
                let depth = self.branch_depth(id, op, label.as_ref())?;
                if let Some(node) = self.tree.get_mut(id)
                    && let NodeKind::Stmt(Stmt::Branch { depth: d, .. }) = &mut node.kind
                {
                    *d = depth;
                }
            }
            Stmt::Decl { decls } => {
                for d in decls {
                    self.resolve_local_decl(scope, d)?;
                }
            }
            Stmt::Defer { call } => {
                if !matches!(self.tree.expr(call), Some(Expr::Call { .. })) {
                    return Err(self.type_error(id, "defer requires a function call"));
                }
                self.resolve_expr(scope, call)?;
            }
            Stmt::Empty => {}
            Stmt::Expr { x } => {
                self.resolve_expr(scope, x)?;
            }
            Stmt::For {
                init,
                cond,
                post,
                body,
                ..
            } => {
                let inner = self.scopes.push(ScopeKind::For, id, Some(scope));
                self.set_scope(id, inner);
                if let Some(init) = init {
                    self.resolve_stmt(inner, init)?;
                }
                let loop_vars = self.scopes.get(inner).num_names() as u16;
                if let Some(cond) = cond {
                    self.resolve_expr(inner, cond)?;
                }
                if let Some(post) = post {
                    self.resolve_stmt(inner, post)?;
                }
                self.with_target(id, TargetKind::Loop, |r| {
                    body.iter().try_for_each(|&s| r.resolve_stmt(inner, s))
                })?;
                if let Some(node) = self.tree.get_mut(id)
                    && let NodeKind::Stmt(Stmt::For { loop_vars: lv, .. }) = &mut node.kind
                {
                    *lv = loop_vars;
                }
            }
            Stmt::If {
                init,
                cond,
                then,
                els,
            } => {
                let inner = self.scopes.push(ScopeKind::If, id, Some(scope));
                self.set_scope(id, inner);
                if let Some(init) = init {
                    self.resolve_stmt(inner, init)?;
                }
                self.resolve_expr(inner, cond)?;
                self.resolve_stmt(inner, then)?;
                if let Some(els) = els {
                    self.resolve_stmt(inner, els)?;
                }
            }
            Stmt::IfCase { body } => {
                let inner = self.scopes.push(ScopeKind::IfCase, id, Some(scope));
                self.set_scope(id, inner);
                for s in body {
                    self.resolve_stmt(inner, s)?;
                }
            }
            Stmt::IncDec { x, .. } => {
                self.resolve_lhs(scope, x)?;
            }
            Stmt::Range {
                x,
                key,
                value,
                define,
                body,
            } => {
                let inner = self.scopes.push(ScopeKind::Range, id, Some(scope));
                self.set_scope(id, inner);
                let xt = self.resolve_expr(inner, x)?;
                let (kt, vt) = match self.underlying(&xt) {
                    Type::Slice(e) | Type::Array(_, e) => (Type::Int, *e),
                    Type::Map(k, v) => (*k, *v),
                    Type::String => (Type::Int, Type::Int),
                    Type::Int => {
                        if value.is_some() {
                            return Err(self.type_error(id, "range over int permits only one iteration variable"));
                        }
                        (Type::Int, Type::Any)
                    }
                    Type::Any => (Type::Any, Type::Any),
                    other => return Err(self.type_error(id, format!("cannot range over {other}"))),
                };
                for (var, t) in [(key, kt), (value, vt)] {
                    let Some(var) = var else { continue };
                    if define {
                        self.define_name(inner, var, t, false, id)?;
                    } else {
                        self.resolve_lhs(inner, var)?;
                    }
                }
                self.with_target(id, TargetKind::Loop, |r| {
                    body.iter().try_for_each(|&s| r.resolve_stmt(inner, s))
                })?;
            }
            Stmt::Return { results } => {
                let expected = self.results.last().copied().unwrap_or(0);
                let mut got = 0;
                for &r in &results {
                    got += match self.resolve_expr(scope, r)? {
                        Type::Tuple(items) if results.len() == 1 => items.len(),
                        _ => 1,
                    };
                }
                if got != expected {
                    return Err(self.type_error(
                        id,
                        format!("wrong number of return values: have {got}, want {expected}"),
                    ));
                }
            }
            Stmt::Switch { init, x, clauses } => {
                let inner = self.scopes.push(ScopeKind::Switch, id, Some(scope));
                self.set_scope(id, inner);
                if let Some(init) = init {
                    self.resolve_stmt(inner, init)?;
                }
                if let Some(x) = x {
                    self.resolve_expr(inner, x)?;
                }
                let mut defaults = 0;
                for &clause in &clauses {
                    let Stmt::SwitchClause { cases, body } = self.stmt_of(clause)? else {
                        return Err(Self::malformed(clause, "expected a switch clause"));
                    };
                    if cases.is_empty() {
                        defaults += 1;
                        if defaults > 1 {
                            return Err(self.type_error(clause, "multiple defaults in switch"));
                        }
                    }
                    for case in cases {
                        self.resolve_expr(inner, case)?;
                    }
                    let clause_scope = self.scopes.push(ScopeKind::SwitchClause, clause, Some(inner));
                    self.set_scope(clause, clause_scope);
                    self.with_target(id, TargetKind::Switch, |r| {
                        body.iter().try_for_each(|&s| r.resolve_stmt(clause_scope, s))
                    })?;
                    self.mark(clause, AttrKey::Preprocessed);
                }
            }
            Stmt::SwitchClause { .. } => {
                return Err(Self::malformed(id, "switch clause outside of a switch"));
            }
        }
        self.mark(id, AttrKey::Preprocessed);
        Ok(())
    }

    fn with_target(
        &mut self,
        id: NodeId,
        kind: TargetKind,
        f: impl FnOnce(&mut Self) -> Result<(), ProgramError>,
    ) -> Result<(), ProgramError> {
        let label = self.tree.get(id).and_then(|n| n.attrs.label.clone());
        self.branches.push(BranchTarget { label, kind });
        let outcome = f(self);
        self.branches.pop();
        outcome
    }

    /// Number of intervening targets between a branch and the one it exits.
    /// `continue` skips switches, so only loops are counted for it.
    fn branch_depth(&self, id: NodeId, op: BranchOp, label: Option<&Name>) -> Result<u8, ProgramError> {
        let op_name = match op {
            BranchOp::Break => "break",
            BranchOp::Continue => "continue",
        };
        let counts = |t: &BranchTarget| op == BranchOp::Break || t.kind == TargetKind::Loop;
        let mut depth: u8 = 0;
        for target in self.branches.iter().rev() {
            let matches = match label {
                Some(l) => target.label.as_ref() == Some(l),
                None => counts(target),
            };
            if matches {
                if op == BranchOp::Continue && target.kind != TargetKind::Loop {
                    return Err(self.type_error(id, "continue target is not a loop"));
                }
                return Ok(depth);
            }
            if counts(target) {
                depth = depth.saturating_add(1);
            }
        }
        match label {
            Some(l) => Err(ProgramError::UnknownLabel {
                label: l.clone(),
                line: self.line(id),
            }),
            None => Err(ProgramError::BranchOutsideLoop {
                op: op_name,
                line: self.line(id),
            }),
        }
    }

    fn resolve_assign(
        &mut self,
        scope: ScopeId,
        id: NodeId,
        lhs: &[NodeId],
        op: crate::ast::AssignOp,
        rhs: &[NodeId],
    ) -> Result<(), ProgramError> {
        use crate::ast::AssignOp;
        match op {
            AssignOp::Define => {
                let types = self.rhs_types(scope, id, lhs.len(), rhs)?;
                for (&name_id, t) in lhs.iter().zip(types) {
                    if t == Type::Nil {
                        return Err(self.type_error(id, "use of untyped nil"));
                    }
                    self.define_name(scope, name_id, t, false, id)?;
                }
            }
            AssignOp::Assign => {
                if !(lhs.len() == rhs.len() || rhs.len() == 1) {
                    return Err(ProgramError::AssignmentMismatch {
                        line: self.line(id),
                        lhs: lhs.len(),
                        rhs: rhs.len(),
                    });
                }
                self.rhs_types(scope, id, lhs.len(), rhs)?;
                for &target in lhs {
                    self.resolve_lhs(scope, target)?;
                }
            }
            AssignOp::AddAssign | AssignOp::SubAssign | AssignOp::MulAssign => {
                if lhs.len() != 1 || rhs.len() != 1 {
                    return Err(ProgramError::AssignmentMismatch {
                        line: self.line(id),
                        lhs: lhs.len(),
                        rhs: rhs.len(),
                    });
                }
                self.resolve_expr(scope, rhs[0])?;
                self.resolve_lhs(scope, lhs[0])?;
            }
        }
        Ok(())
    }

    fn resolve_local_decl(&mut self, scope: ScopeId, id: NodeId) -> Result<(), ProgramError> {
        match self.decl_of(id)? {
            Decl::Value {
                names,
                ty,
                values,
                is_const,
            } => {
                let types = self.value_decl_types(scope, id, &names, ty, &values)?;
                for (name_id, t) in names.into_iter().zip(types) {
                    self.define_name(scope, name_id, t, is_const, id)?;
                }
            }
            Decl::Type { .. } => {
                return Err(ProgramError::Unsupported {
                    what: "local type declarations",
                    line: self.line(id),
                });
            }
            Decl::Func { .. } | Decl::Import { .. } => {
                return Err(Self::malformed(id, "declaration not allowed in a function body"));
            }
        }
        self.mark(id, AttrKey::Preprocessed);
        Ok(())
    }

    /// Declares the name node `name_id` in `scope`.
    fn define_name(
        &mut self,
        scope: ScopeId,
        name_id: NodeId,
        ty: Type,
        is_const: bool,
        site: NodeId,
    ) -> Result<(), ProgramError> {
        let name = self.name_of(name_id)?;
        if name.is_blank() {
            self.set_name(name_id, Address::blank(), NameKind::Define);
            return Ok(());
        }
        let defined = self
            .scopes
            .get(scope)
            .local_index(&name)
            .and_then(|i| self.scopes.slot(scope, i))
            .is_some_and(|slot| slot.ty.is_some());
        let index = self.scopes.define(scope, &name, ty, is_const)?;
        // Redeclaring a name of this scope assigns the existing variable.
        let (kind, define_site) = if defined {
            (NameKind::Normal, None)
        } else {
            (NameKind::Define, Some(site))
        };
        self.set_name(name_id, Address::block(1, index, name), kind);
        self.resolution.uses.push(NameUse {
            node: name_id,
            scope,
            declaring: scope,
            index,
            define_site,
        });
        Ok(())
    }

    /// Resolves an assignment target.
    fn resolve_lhs(&mut self, scope: ScopeId, id: NodeId) -> Result<Type, ProgramError> {
        match self.expr_of(id)? {
            Expr::Name(n) if n.name.is_blank() => {
                self.set_name(id, Address::blank(), NameKind::Normal);
                Ok(Type::Any)
            }
            Expr::Name(n) => {
                let t = self.resolve_expr(scope, id)?;
                if let Some(addr) = self.tree.name_expr(id).and_then(|ne| ne.path.clone()) {
                    let is_const = match addr.category {
                        AddressCategory::Universe => true,
                        _ => self
                            .scopes
                            .declaring_scope(scope, &addr)
                            .and_then(|s| self.scopes.slot(s, addr.index))
                            .is_some_and(|slot| slot.is_const),
                    };
                    if is_const {
                        return Err(self.type_error(id, format!("cannot assign to {}", n.name)));
                    }
                }
                Ok(t)
            }
            Expr::Index { .. } | Expr::Selector { .. } | Expr::Star { .. } => self.resolve_expr(scope, id),
            _ => Err(self.type_error(id, "cannot assign to expression")),
        }
    }

    // ----- expressions -----

    fn universal_callee(&self, func: NodeId) -> Option<Universal> {
        let path = self.tree.name_expr(func)?.path.as_ref()?;
        if path.category == AddressCategory::Universe {
            Universal::from_index(path.index)
        } else {
            None
        }
    }

    fn resolve_expr(&mut self, scope: ScopeId, id: NodeId) -> Result<Type, ProgramError> {
        let ty = match self.expr_of(id)? {
            Expr::Name(n) => self.resolve_name(scope, id, &n.name)?,
            Expr::BasicLit { kind, value } => match kind {
                LitKind::Int => {
                    if value.parse::<i64>().is_err() {
                        return Err(self.type_error(id, format!("invalid integer literal {value}")));
                    }
                    Type::Int
                }
                LitKind::String => Type::String,
            },
            Expr::Binary { left, op, right } => {
                let lt = self.resolve_expr(scope, left)?;
                let rt = self.resolve_expr(scope, right)?;
                if op.is_comparison() || op.is_logical() {
                    Type::Bool
                } else if lt == Type::Any || lt == Type::Nil {
                    rt
                } else {
                    lt
                }
            }
            Expr::Unary { op, x } => {
                let t = self.resolve_expr(scope, x)?;
                match op {
                    UnaryOp::Not => Type::Bool,
                    UnaryOp::Neg => t,
                }
            }
            Expr::Call {
                func,
                args,
                with_cross,
            } => self.resolve_call(scope, id, func, &args, with_cross)?,
            Expr::Index { x, index } => {
                let xt = self.resolve_expr(scope, x)?;
                self.resolve_expr(scope, index)?;
                match self.underlying(&xt) {
                    Type::TypeName(_) => {
                        return Err(ProgramError::Unsupported {
                            what: "generic instantiation",
                            line: self.line(id),
                        });
                    }
                    u => u.elem().cloned().unwrap_or(Type::Any),
                }
            }
            Expr::Selector { x, sel, .. } => self.resolve_selector(scope, id, x, &sel)?,
            Expr::Slice { x, low, high } => {
                let xt = self.resolve_expr(scope, x)?;
                for bound in low.into_iter().chain(high) {
                    self.resolve_expr(scope, bound)?;
                }
                match self.underlying(&xt) {
                    Type::Slice(e) | Type::Array(_, e) => Type::Slice(e),
                    Type::Pointer(inner) => match *inner {
                        Type::Array(_, e) => Type::Slice(e),
                        _ => Type::Any,
                    },
                    Type::String => Type::String,
                    _ => Type::Any,
                }
            }
            Expr::Star { x } => match self.resolve_expr(scope, x)? {
                Type::TypeName(t) => Type::TypeName(Box::new(Type::pointer_to(*t))),
                Type::Pointer(t) => *t,
                Type::Any => Type::Any,
                other => return Err(self.type_error(id, format!("cannot dereference {other}"))),
            },
            Expr::Ref { x } => {
                if !matches!(
                    self.tree.expr(x),
                    Some(Expr::Name(_) | Expr::Selector { .. } | Expr::Index { .. } | Expr::CompositeLit { .. })
                ) {
                    return Err(self.type_error(id, "cannot take the address of expression"));
                }
                Type::pointer_to(self.resolve_expr(scope, x)?)
            }
            Expr::TypeAssert { x, ty } => {
                self.resolve_expr(scope, x)?;
                self.eval_type(scope, ty)?
            }
            Expr::CompositeLit { ty, elts } => {
                let lit_ty = self.eval_type(scope, ty)?;
                let keying = self
                    .tree
                    .expr(id)
                    .and_then(Expr::keying)
                    .unwrap_or(Keying::Empty);
                if keying == Keying::Mixed {
                    return Err(ProgramError::MixedCompositeKeys { line: self.line(id) });
                }
                match self.underlying(&lit_ty) {
                    Type::Struct(fields) => {
                        if keying == Keying::Unkeyed && elts.len() != fields.len() {
                            return Err(self.type_error(id, format!("wrong number of values in {lit_ty} literal")));
                        }
                        for kv in elts {
                            if let Some(key) = kv.key {
                                let field = self.name_of(key)?;
                                let Some(i) = fields.iter().position(|f| f.name == field) else {
                                    return Err(ProgramError::UnknownField {
                                        ty: lit_ty.to_string(),
                                        field,
                                        line: self.line(key),
                                    });
                                };
                                self.set_name(key, Address::field(i as u16, field), NameKind::Normal);
                            }
                            self.resolve_expr(scope, kv.value)?;
                        }
                    }
                    Type::Slice(_) | Type::Array(..) => {
                        if keying == Keying::Keyed {
                            return Err(ProgramError::Unsupported {
                                what: "indexed composite elements",
                                line: self.line(id),
                            });
                        }
                        for kv in elts {
                            self.resolve_expr(scope, kv.value)?;
                        }
                    }
                    Type::Map(..) => {
                        if keying == Keying::Unkeyed {
                            return Err(self.type_error(id, "missing key in map literal"));
                        }
                        for kv in elts {
                            if let Some(key) = kv.key {
                                self.resolve_expr(scope, key)?;
                            }
                            self.resolve_expr(scope, kv.value)?;
                        }
                    }
                    other => return Err(self.type_error(id, format!("invalid composite literal type {other}"))),
                }
                lit_ty
            }
            Expr::FuncLit { ty, body, .. } => {
                let sig = self.func_sig(scope, ty)?;
                self.resolve_function(ScopeKind::FuncLit, id, scope, None, ty, &body)?;
                Type::Func(sig)
            }
            Expr::FieldType { .. }
            | Expr::ArrayType { .. }
            | Expr::SliceType { .. }
            | Expr::MapType { .. }
            | Expr::FuncType { .. }
            | Expr::StructType { .. }
            | Expr::InterfaceType { .. } => Type::TypeName(Box::new(self.eval_type(scope, id)?)),
        };
        self.mark(id, AttrKey::Preprocessed);
        Ok(ty)
    }

    fn resolve_name(&mut self, scope: ScopeId, id: NodeId, name: &Name) -> Result<Type, ProgramError> {
        if name.is_blank() {
            return Err(self.type_error(id, "cannot use _ as value"));
        }
        let line = self.line(id);
        let addr = self.scopes.resolve(scope, name, line)?;
        let ty = match addr.category {
            AddressCategory::Universe => Universal::from_index(addr.index)
                .map(Universal::static_type)
                .unwrap_or(Type::Any),
            _ => {
                let declaring = self
                    .scopes
                    .declaring_scope(scope, &addr)
                    .ok_or_else(|| Self::malformed(id, "address outside scope chain"))?;
                let ty = match self.scopes.slot(declaring, addr.index).and_then(|s| s.ty.clone()) {
                    Some(t) => t,
                    None if declaring == self.pkg_scope && self.type_decls.contains(name) => {
                        Type::TypeName(Box::new(Type::Named(TypeRef {
                            pkg_path: self.pkg_path.clone(),
                            name: name.clone(),
                        })))
                    }
                    None => {
                        return Err(ProgramError::UsedBeforeDefined {
                            name: name.clone(),
                            line: self.line(id),
                        });
                    }
                };
                self.resolution.uses.push(NameUse {
                    node: id,
                    scope,
                    declaring,
                    index: addr.index,
                    define_site: None,
                });
                ty
            }
        };
        self.set_name(id, addr, NameKind::Normal);
        Ok(ty)
    }

    fn resolve_call(
        &mut self,
        scope: ScopeId,
        id: NodeId,
        func: NodeId,
        args: &[NodeId],
        with_cross: bool,
    ) -> Result<Type, ProgramError> {
        let func_ty = self.resolve_expr(scope, func)?;
        let line = self.line(id);
        let cross_error = |reason: &str| ProgramError::InvalidCrossCall {
            line,
            reason: reason.to_string(),
        };

        if let Some(builtin) = self.universal_callee(func) {
            match builtin {
                Universal::Crossing => {
                    if self.crossing_marker != Some(id) {
                        return Err(ProgramError::MisplacedCrossing { line: self.line(id) });
                    }
                    return Ok(Type::Tuple(Vec::new()));
                }
                Universal::Cross => {
                    return Err(cross_error("cross must wrap the callee as cross(fn)(args...)"));
                }
                u if u.is_builtin_func() => {
                    if with_cross {
                        return Err(cross_error("builtins cannot be called across realms"));
                    }
                    if let Some(n) = u.arity()
                        && n != args.len()
                    {
                        return Err(self.type_error(
                            id,
                            format!("{} expects {n} arguments, got {}", u.name(), args.len()),
                        ));
                    }
                    if u == Universal::Append && args.is_empty() {
                        return Err(self.type_error(id, "append expects a slice"));
                    }
                    let mut arg_types = Vec::with_capacity(args.len());
                    for &a in args {
                        arg_types.push(self.resolve_expr(scope, a)?);
                    }
                    return Ok(u.call_result(&arg_types));
                }
                _ => {}
            }
        }

        let mut arg_types = Vec::with_capacity(args.len());
        for &a in args {
            arg_types.push(self.resolve_expr(scope, a)?);
        }
        match func_ty {
            Type::TypeName(t) => {
                if with_cross {
                    return Err(cross_error("conversions cannot be crossing calls"));
                }
                if args.len() != 1 {
                    return Err(self.type_error(id, "conversion takes exactly one argument"));
                }
                Ok(*t)
            }
            Type::Func(sig) => {
                let spread = matches!(arg_types.as_slice(), [Type::Tuple(items)] if items.len() == sig.params.len());
                if args.len() != sig.params.len() && !spread {
                    return Err(self.type_error(
                        id,
                        format!("wrong argument count: have {}, want {}", args.len(), sig.params.len()),
                    ));
                }
                Ok(sig.result_type())
            }
            Type::Any => Ok(Type::Any),
            other if with_cross => Err(cross_error(&format!("cannot cross-call {other}"))),
            other => Err(self.type_error(id, format!("cannot call non-function {other}"))),
        }
    }

    fn resolve_selector(&mut self, scope: ScopeId, id: NodeId, x: NodeId, sel: &Name) -> Result<Type, ProgramError> {
        let xt = self.resolve_expr(scope, x)?;
        let line = self.line(id);
        let (addr, ty) = match &xt {
            Type::Package(path) => {
                let pkg = self
                    .getter
                    .get_package(path)
                    .ok_or_else(|| ProgramError::UnknownImport(path.clone()))?;
                if !sel.is_exported() {
                    return Err(ProgramError::Unexported {
                        name: sel.clone(),
                        pkg_path: path.clone(),
                        line,
                    });
                }
                let pkg_scope = pkg.scopes.get(pkg.package_scope);
                let index = pkg_scope.local_index(sel).ok_or_else(|| ProgramError::InvalidSelector {
                    ty: xt.to_string(),
                    sel: sel.clone(),
                    line,
                })?;
                let ty = pkg_scope.slots[index as usize].ty.clone().unwrap_or(Type::Any);
                (Address::block(1, index, sel.clone()), ty)
            }
            _ => self.member(&xt, sel, line)?,
        };
        if let Some(node) = self.tree.get_mut(id)
            && let NodeKind::Expr(Expr::Selector { path, .. }) = &mut node.kind
        {
            *path = Some(addr);
        }
        Ok(ty)
    }

    /// Field, method or interface method `sel` of a value of type `xt`.
    fn member(&self, xt: &Type, sel: &Name, line: u32) -> Result<(Address, Type), ProgramError> {
        let base = match xt {
            Type::Pointer(inner) => inner.as_ref(),
            t => t,
        };
        let not_found = || ProgramError::InvalidSelector {
            ty: xt.to_string(),
            sel: sel.clone(),
            line,
        };
        let in_struct = |fields: &[FieldDef]| {
            fields
                .iter()
                .position(|f| &f.name == sel)
                .map(|i| (Address::field(i as u16, sel.clone()), fields[i].ty.clone()))
        };
        let in_interface = |methods: &[MethodSig]| {
            methods
                .iter()
                .find(|m| &m.name == sel)
                .map(|m| (Address::interface(sel.clone()), Type::Func(m.sig.clone())))
        };
        match base {
            Type::Named(r) => {
                let decl = self.declared(r).ok_or_else(not_found)?;
                if let Some((i, f)) = decl.field_index(sel) {
                    return Ok((Address::field(i, sel.clone()), f.ty.clone()));
                }
                if let Some((i, m)) = decl.method_index(sel) {
                    return Ok((
                        Address::method(m.pointer_receiver, i, sel.clone()),
                        Type::Func(m.sig.clone()),
                    ));
                }
                match &decl.underlying {
                    Type::Interface(methods) => in_interface(methods).ok_or_else(not_found),
                    _ => Err(not_found()),
                }
            }
            Type::Struct(fields) => in_struct(fields).ok_or_else(not_found),
            Type::Interface(methods) => in_interface(methods).ok_or_else(not_found),
            // Unknown static type: look the member up by name at run time.
            Type::Any => Ok((Address::interface(sel.clone()), Type::Any)),
            _ => Err(not_found()),
        }
    }
}
