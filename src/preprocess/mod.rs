//! Static preprocessing: scopes, name resolution and escape analysis.
//!
//! [`preprocess`] takes a package's [`ProgramTree`] and produces a
//! [`CompiledPackage`] in which every name carries its resolved address,
//! every block node its scope, and every loop-local binding captured by a
//! closure is boxed. Any static error rejects the package.

pub mod errors;
mod escape;
mod resolver;
pub mod scope;
pub mod types;
pub mod universe;

pub use errors::ProgramError;
pub use scope::{Scope, ScopeKind, ScopeTable, Slot, Upgrade};
pub use types::{DeclaredType, FieldDef, FuncSig, MethodEntry, MethodSig, Type, TypeRef};
pub use universe::Universal;

use crate::ast::{Decl, Expr, Name, NodeId, NodeKind, ProgramTree, ScopeId, is_realm_path};
use crate::debug;
use realmvm_derive::BinaryCodec;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Source of already compiled packages for imports.
pub trait PackageGetter {
    fn get_package(&self, pkg_path: &str) -> Option<Arc<CompiledPackage>>;
}

impl PackageGetter for BTreeMap<String, Arc<CompiledPackage>> {
    fn get_package(&self, pkg_path: &str) -> Option<Arc<CompiledPackage>> {
        self.get(pkg_path).cloned()
    }
}

/// Getter for packages without imports.
pub struct NoImports;

impl PackageGetter for NoImports {
    fn get_package(&self, _pkg_path: &str) -> Option<Arc<CompiledPackage>> {
        None
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PreprocessOptions {
    /// A later top-level function may replace an earlier one with the same
    /// signature instead of being rejected as a redeclaration.
    pub allow_function_upgrades: bool,
}

/// A preprocessed package, immutable and shared across transactions.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct CompiledPackage {
    pub pkg_path: String,
    pub pkg_name: Name,
    pub tree: ProgramTree,
    pub scopes: ScopeTable,
    pub types: BTreeMap<Name, DeclaredType>,
    pub package_scope: ScopeId,
}

impl CompiledPackage {
    pub fn is_realm(&self) -> bool {
        is_realm_path(&self.pkg_path)
    }

    pub fn scope_of(&self, node: NodeId) -> Option<ScopeId> {
        self.tree.scope_of(node)
    }

    pub fn num_names(&self, scope: ScopeId) -> usize {
        self.scopes.get(scope).num_names()
    }

    pub fn files(&self) -> Vec<NodeId> {
        self.tree
            .package()
            .map(|p| p.files.clone())
            .unwrap_or_default()
    }

    /// Slot of a package-level name.
    pub fn package_slot(&self, name: &Name) -> Option<u16> {
        self.scopes.get(self.package_scope).local_index(name)
    }

    /// Top-level function declaration; the last one wins after an upgrade.
    pub fn func_decl(&self, name: &Name) -> Option<NodeId> {
        let mut found = None;
        for file in self.files() {
            let Some(f) = self.tree.file(file) else {
                continue;
            };
            for &d in &f.decls {
                if let Some(Decl::Func { name: n, recv: None, .. }) = self.tree.decl(d)
                    && n == name
                {
                    found = Some(d);
                }
            }
        }
        found
    }

    /// Method declaration of a declared type.
    pub fn method_decl(&self, type_name: &Name, method: &Name) -> Option<&MethodEntry> {
        self.types
            .get(type_name)?
            .methods
            .iter()
            .find(|m| &m.name == method)
    }
}

/// Preprocesses one package.
pub fn preprocess(
    tree: ProgramTree,
    getter: &dyn PackageGetter,
    options: PreprocessOptions,
) -> Result<CompiledPackage, ProgramError> {
    let mut r = resolver::Resolver::new(tree, getter, options);
    r.run()?;
    escape::analyze(&mut r.tree, &mut r.scopes, &r.resolution)?;
    validate_addresses(&r.tree)?;

    for up in r.scopes.upgrades() {
        debug!("{}: function {} upgraded", r.tree.pkg_path, up.previous.name);
    }
    r.scopes.commit_upgrades();

    let pkg_name = r
        .tree
        .package()
        .map(|p| p.pkg_name.clone())
        .unwrap_or_default();
    debug!(
        "preprocessed {}: {} nodes, {} scopes",
        r.tree.pkg_path,
        r.tree.len(),
        r.scopes.len()
    );
    Ok(CompiledPackage {
        pkg_path: r.tree.pkg_path.clone(),
        pkg_name,
        tree: r.tree,
        scopes: r.scopes,
        types: r.types,
        package_scope: r.pkg_scope,
    })
}

fn validate_addresses(tree: &ProgramTree) -> Result<(), ProgramError> {
    let Some(root) = tree.root() else {
        return Ok(());
    };
    let mut result = Ok(());
    tree.walk(root, &mut |_, node| {
        if result.is_err() {
            return;
        }
        let path = match &node.kind {
            NodeKind::Expr(Expr::Name(n)) => n.path.as_ref(),
            NodeKind::Expr(Expr::Selector { path, .. }) => path.as_ref(),
            NodeKind::Expr(Expr::FuncLit { captures, .. }) => {
                result = captures
                    .iter()
                    .try_for_each(|c| c.source.validate())
                    .map_err(ProgramError::from);
                None
            }
            _ => None,
        };
        if let Some(path) = path {
            result = path.validate().map_err(ProgramError::from);
        }
    });
    result
}
