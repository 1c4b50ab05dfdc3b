//! Heap-escape analysis for loop-local bindings captured by closures.
//!
//! A binding declared inside a `for`/`range` body (including the loop's own
//! init variables) and referenced from a function literal is boxed into a
//! heap item. Each iteration defines a fresh item, so closures created in
//! different iterations see different values.
//!
//! For every boxed binding:
//! - defining occurrences become [`NameKind::HeapDefine`] and the defining
//!   statement lists the name under [`AttrKey::HeapDefines`];
//! - uses in the declaring function become [`NameKind::HeapUse`];
//! - every function literal between a use and the declaration gets a
//!   capture slot, and the literal lists the name under
//!   [`AttrKey::HeapUses`];
//! - uses inside a closure become [`NameKind::HeapClosure`] and address the
//!   innermost closure's capture slot.
//!
//! Bindings that are not loop-local are left alone: they are reached
//! through the closure's parent block, and every call creates a fresh
//! block, so no two closures can share one by accident.

use super::errors::ProgramError;
use super::resolver::Resolution;
use super::scope::{ScopeKind, ScopeTable};
use crate::ast::{Address, AddressError, AttrKey, Capture, Expr, MAX_VALUE_PATH_DEPTH, Name, NameKind, NodeId, NodeKind, ProgramTree, ScopeId};
use std::collections::{BTreeMap, BTreeSet};

/// Function literal scopes strictly between `from` and its ancestor `to`,
/// innermost first.
fn closures_between(scopes: &ScopeTable, from: ScopeId, to: ScopeId) -> Vec<ScopeId> {
    let mut out = Vec::new();
    let mut current = Some(from);
    while let Some(id) = current {
        if id == to {
            break;
        }
        if scopes.get(id).kind == ScopeKind::FuncLit {
            out.push(id);
        }
        current = scopes.get(id).parent;
    }
    out
}

/// Address depth of `to` seen from `from` (1 when equal).
fn depth_between(scopes: &ScopeTable, from: ScopeId, to: ScopeId, name: &Name) -> Result<u8, ProgramError> {
    let mut depth: u8 = 1;
    let mut current = from;
    while current != to {
        current = scopes.get(current).parent.ok_or(ProgramError::MalformedTree {
            node: scopes.get(from).source,
            reason: "capture source is not an enclosing scope",
        })?;
        if depth == MAX_VALUE_PATH_DEPTH {
            return Err(AddressError::TooDeep {
                name: name.clone(),
                depth: depth.saturating_add(1),
            }
            .into());
        }
        depth += 1;
    }
    Ok(depth)
}

fn set_name(tree: &mut ProgramTree, id: NodeId, path: Option<Address>, kind: NameKind) {
    if let Some(n) = tree.name_expr_mut(id) {
        if let Some(path) = path {
            n.path = Some(path);
        }
        n.kind = kind;
    }
}

pub(super) fn analyze(
    tree: &mut ProgramTree,
    scopes: &mut ScopeTable,
    resolution: &Resolution,
) -> Result<(), ProgramError> {
    let mut boxed: BTreeSet<(ScopeId, u16)> = BTreeSet::new();
    for u in &resolution.uses {
        if u.define_site.is_none()
            && !closures_between(scopes, u.scope, u.declaring).is_empty()
            && scopes.is_loop_local(u.declaring)
        {
            boxed.insert((u.declaring, u.index));
        }
    }
    for &(scope, index) in &boxed {
        scopes.set_heap_item(scope, index);
    }

    // (closure scope, declaring scope, slot) -> capture slot
    let mut capture_slots: BTreeMap<(ScopeId, ScopeId, u16), u16> = BTreeMap::new();

    for u in &resolution.uses {
        if !boxed.contains(&(u.declaring, u.index)) {
            continue;
        }
        let Some(name) = tree.name_expr(u.node).map(|n| n.name.clone()) else {
            continue;
        };
        if let Some(site) = u.define_site {
            set_name(tree, u.node, None, NameKind::HeapDefine);
            if let Some(node) = tree.get_mut(site) {
                node.attrs.add_name(AttrKey::HeapDefines, &name);
            }
            continue;
        }
        let chain = closures_between(scopes, u.scope, u.declaring);
        if chain.is_empty() {
            set_name(tree, u.node, None, NameKind::HeapUse);
            continue;
        }

        // Thread the cell from the declaring scope into each closure,
        // outermost first.
        let mut source_scope = u.declaring;
        let mut source_index = u.index;
        for &lit_scope in chain.iter().rev() {
            let key = (lit_scope, u.declaring, u.index);
            let slot = match capture_slots.get(&key) {
                Some(&slot) => slot,
                None => {
                    let ty = scopes.slot(u.declaring, u.index).and_then(|s| s.ty.clone());
                    let slot = scopes.push_capture(lit_scope, &name, ty)?;
                    let lit_node = scopes.get(lit_scope).source;
                    let parent = scopes.get(lit_scope).parent.ok_or(ProgramError::MalformedTree {
                        node: lit_node,
                        reason: "function literal without an enclosing scope",
                    })?;
                    let depth = depth_between(scopes, parent, source_scope, &name)?;
                    let capture = Capture {
                        name: name.clone(),
                        source: Address::block(depth, source_index, name.clone()),
                        slot,
                    };
                    if let Some(node) = tree.get_mut(lit_node) {
                        node.attrs.add_name(AttrKey::HeapUses, &name);
                        if let NodeKind::Expr(Expr::FuncLit { captures, .. }) = &mut node.kind {
                            captures.push(capture);
                        }
                    }
                    capture_slots.insert(key, slot);
                    slot
                }
            };
            source_scope = lit_scope;
            source_index = slot;
        }
        let depth = depth_between(scopes, u.scope, source_scope, &name)?;
        set_name(
            tree,
            u.node,
            Some(Address::block(depth, source_index, name)),
            NameKind::HeapClosure,
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::TreeBuilder;
    use crate::utils::test_utils::utils::{compile, loop_closures};

    #[test]
    fn body_local_capture_is_boxed() {
        let fx = loop_closures("gno.land/r/demo/loops", false);
        let pkg = compile(fx.tree);

        assert_eq!(pkg.tree.name_expr(fx.z_def).unwrap().kind, NameKind::HeapDefine);
        assert_eq!(pkg.tree.name_expr(fx.i_read).unwrap().kind, NameKind::Normal);

        let Some(Expr::FuncLit { captures, .. }) = pkg.tree.expr(fx.lit) else {
            panic!("expected a function literal");
        };
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].source, Address::block(1, 1, Name::from("z")));

        let z_use = pkg.tree.name_expr(fx.z_use).unwrap();
        assert_eq!(z_use.kind, NameKind::HeapClosure);
        assert_eq!(z_use.path, Some(Address::block(1, captures[0].slot, Name::from("z"))));

        let for_scope = pkg.scope_of(fx.loop_stmt).unwrap();
        assert!(!pkg.scopes.slot(for_scope, 0).unwrap().heap_item);
        assert!(pkg.scopes.slot(for_scope, 1).unwrap().heap_item);
        assert_eq!(
            pkg.tree.get(fx.lit).unwrap().attrs.names(AttrKey::HeapUses),
            &[Name::from("z")]
        );
    }

    #[test]
    fn captured_loop_variable_is_boxed_per_iteration() {
        let fx = loop_closures("gno.land/r/demo/loops", true);
        let pkg = compile(fx.tree);

        let for_scope = pkg.scope_of(fx.loop_stmt).unwrap();
        assert!(pkg.scopes.slot(for_scope, 0).unwrap().heap_item);
        assert_eq!(pkg.tree.name_expr(fx.i_cond).unwrap().kind, NameKind::HeapUse);
        assert_eq!(pkg.tree.name_expr(fx.i_read).unwrap().kind, NameKind::HeapUse);
        assert_eq!(pkg.tree.name_expr(fx.z_use).unwrap().kind, NameKind::HeapClosure);
        assert!(matches!(
            pkg.tree.stmt(fx.loop_stmt),
            Some(crate::ast::Stmt::For { loop_vars: 1, .. })
        ));
    }

    #[test]
    fn short_redeclaration_of_boxed_name_reuses_its_cell() {
        // for { a, v := 0, 1; f := func() int { return v }; b, v := 2, 3 }
        let mut b = TreeBuilder::new("gno.land/r/demo/redeclare");
        let a = b.name("a");
        let v_def = b.name("v");
        let zero = b.int(0);
        let one = b.int(1);
        let first = b.define(vec![a, v_def], vec![zero, one]);
        let v_use = b.name("v");
        let ret = b.ret(vec![v_use]);
        let int_t = b.name("int");
        let lit = b.func_lit(vec![], vec![int_t], vec![ret]);
        let f = b.name("f");
        let def_f = b.define(vec![f], vec![lit]);
        let c = b.name("c");
        let v_again = b.name("v");
        let two = b.int(2);
        let three = b.int(3);
        let second = b.define(vec![c, v_again], vec![two, three]);
        let lp = b.for_loop(None, None, None, vec![first, def_f, second]);
        let func = b.func_decl("F", vec![], vec![], vec![lp]);
        let pkg = compile(b.finish("redeclare", vec![func]));

        assert_eq!(pkg.tree.name_expr(v_def).unwrap().kind, NameKind::HeapDefine);
        assert_eq!(pkg.tree.name_expr(v_again).unwrap().kind, NameKind::HeapUse);
        assert_eq!(pkg.tree.name_expr(c).unwrap().kind, NameKind::Define);
        assert!(pkg.tree.get(second).unwrap().attrs.names(AttrKey::HeapDefines).is_empty());
    }

    #[test]
    fn non_loop_capture_is_not_boxed() {
        let mut b = TreeBuilder::new("gno.land/r/demo/plain");
        let x = b.name("x");
        let one = b.int(1);
        let def_x = b.define(vec![x], vec![one]);
        let x_use = b.name("x");
        let ret = b.ret(vec![x_use]);
        let int_t = b.name("int");
        let lit = b.func_lit(vec![], vec![int_t], vec![ret]);
        let f = b.name("f");
        let def_f = b.define(vec![f], vec![lit]);
        let func = b.func_decl("F", vec![], vec![], vec![def_x, def_f]);
        let pkg = compile(b.finish("plain", vec![func]));

        assert_eq!(pkg.tree.name_expr(x).unwrap().kind, NameKind::Define);
        let use_expr = pkg.tree.name_expr(x_use).unwrap();
        assert_eq!(use_expr.kind, NameKind::Normal);
        assert_eq!(use_expr.path, Some(Address::block(2, 0, Name::from("x"))));
        assert!(matches!(
            pkg.tree.expr(lit),
            Some(Expr::FuncLit { captures, .. }) if captures.is_empty()
        ));
    }

    #[test]
    fn nested_closures_thread_the_cell() {
        // for _, v := range items { fs = append(fs, func() func() int { return func() int { return v } }) }
        let mut b = TreeBuilder::new("gno.land/r/demo/nested");
        let int_a = b.name("int");
        let items_ty = b.slice_type(int_a);
        let items_lit = b.composite(items_ty, vec![]);
        let items = b.name("items");
        let def_items = b.define(vec![items], vec![items_lit]);

        let v_use = b.name("v");
        let inner_ret = b.ret(vec![v_use]);
        let int_b = b.name("int");
        let inner = b.func_lit(vec![], vec![int_b], vec![inner_ret]);
        let outer_ret = b.ret(vec![inner]);
        let int_c = b.name("int");
        let inner_ty = b.func_type(vec![], vec![int_c]);
        let outer = b.func_lit(vec![], vec![inner_ty], vec![outer_ret]);
        let g = b.name("g");
        let def_g = b.define(vec![g], vec![outer]);
        let g_use = b.name("g");
        let discard = b.name("_");
        let keep = b.assign(vec![discard], vec![g_use]);

        let key = b.name("_");
        let v = b.name("v");
        let items_use = b.name("items");
        let range = b.range(items_use, Some(key), Some(v), vec![def_g, keep]);
        let func = b.func_decl("F", vec![], vec![], vec![def_items, range]);
        let pkg = compile(b.finish("nested", vec![func]));

        assert_eq!(pkg.tree.name_expr(v).unwrap().kind, NameKind::HeapDefine);
        let Some(Expr::FuncLit { captures: outer_caps, .. }) = pkg.tree.expr(outer) else {
            panic!("expected outer literal");
        };
        let Some(Expr::FuncLit { captures: inner_caps, .. }) = pkg.tree.expr(inner) else {
            panic!("expected inner literal");
        };
        assert_eq!(outer_caps.len(), 1);
        assert_eq!(inner_caps.len(), 1);
        // v is slot 0 of the range scope (the blank key takes no slot).
        assert_eq!(outer_caps[0].source, Address::block(1, 0, Name::from("v")));
        assert_eq!(
            inner_caps[0].source,
            Address::block(1, outer_caps[0].slot, Name::from("v"))
        );
        assert_eq!(
            pkg.tree.name_expr(v_use).unwrap().path,
            Some(Address::block(1, inner_caps[0].slot, Name::from("v")))
        );
    }
}
