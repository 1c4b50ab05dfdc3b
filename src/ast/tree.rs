//! Arena holding every node of one package.

use super::decl::{Decl, FileNode, PackageNode};
use super::expr::{Expr, NameExpr};
use super::node::{Attributes, Location, NodeId, ScopeId};
use super::stmt::Stmt;
use realmvm_derive::BinaryCodec;

#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub enum NodeKind {
    Expr(Expr),
    Stmt(Stmt),
    Decl(Decl),
    File(FileNode),
    Package(PackageNode),
}

#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct Node {
    pub attrs: Attributes,
    pub kind: NodeKind,
    /// Scope opened by this node, for block nodes once preprocessed.
    pub scope: Option<ScopeId>,
}

impl Node {
    pub fn expr(&self) -> Option<&Expr> {
        match &self.kind {
            NodeKind::Expr(e) => Some(e),
            _ => None,
        }
    }

    pub fn stmt(&self) -> Option<&Stmt> {
        match &self.kind {
            NodeKind::Stmt(s) => Some(s),
            _ => None,
        }
    }

    pub fn decl(&self) -> Option<&Decl> {
        match &self.kind {
            NodeKind::Decl(d) => Some(d),
            _ => None,
        }
    }

    /// Nodes that open a lexical scope.
    pub fn is_block_node(&self) -> bool {
        match &self.kind {
            NodeKind::Expr(e) => matches!(e, Expr::FuncLit { .. }),
            NodeKind::Stmt(s) => matches!(
                s,
                Stmt::Block { .. }
                    | Stmt::For { .. }
                    | Stmt::If { .. }
                    | Stmt::IfCase { .. }
                    | Stmt::Range { .. }
                    | Stmt::Switch { .. }
                    | Stmt::SwitchClause { .. }
            ),
            NodeKind::Decl(d) => matches!(d, Decl::Func { .. }),
            NodeKind::File(_) | NodeKind::Package(_) => true,
        }
    }

    pub fn children(&self) -> Vec<NodeId> {
        match &self.kind {
            NodeKind::Expr(e) => e.children(),
            NodeKind::Stmt(s) => s.children(),
            NodeKind::Decl(d) => d.children(),
            NodeKind::File(f) => f.decls.clone(),
            NodeKind::Package(p) => p.files.clone(),
        }
    }
}

/// All nodes of one package, addressed by [`NodeId`].
///
/// Nodes refer to each other only by id, so the tree can be encoded as a
/// flat record list and shared read-only across transactions.
#[derive(Clone, Debug, Default, PartialEq, Eq, BinaryCodec)]
pub struct ProgramTree {
    pub pkg_path: String,
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl ProgramTree {
    pub fn new(pkg_path: impl Into<String>) -> Self {
        Self {
            pkg_path: pkg_path.into(),
            nodes: Vec::new(),
            root: None,
        }
    }

    pub fn add(&mut self, kind: NodeKind, attrs: Attributes) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            attrs,
            kind,
            scope: None,
        });
        id
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())
    }

    pub fn expr(&self, id: NodeId) -> Option<&Expr> {
        self.get(id).and_then(Node::expr)
    }

    pub fn stmt(&self, id: NodeId) -> Option<&Stmt> {
        self.get(id).and_then(Node::stmt)
    }

    pub fn decl(&self, id: NodeId) -> Option<&Decl> {
        self.get(id).and_then(Node::decl)
    }

    pub fn name_expr(&self, id: NodeId) -> Option<&NameExpr> {
        match self.expr(id)? {
            Expr::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn name_expr_mut(&mut self, id: NodeId) -> Option<&mut NameExpr> {
        match &mut self.get_mut(id)?.kind {
            NodeKind::Expr(Expr::Name(n)) => Some(n),
            _ => None,
        }
    }

    pub fn package(&self) -> Option<&PackageNode> {
        match &self.get(self.root?)?.kind {
            NodeKind::Package(p) => Some(p),
            _ => None,
        }
    }

    pub fn file(&self, id: NodeId) -> Option<&FileNode> {
        match &self.get(id)?.kind {
            NodeKind::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn scope_of(&self, id: NodeId) -> Option<ScopeId> {
        self.get(id)?.scope
    }

    pub fn location(&self, id: NodeId, file: &str) -> Location {
        let (line, column) = self
            .get(id)
            .map(|n| (n.attrs.line, n.attrs.column))
            .unwrap_or_default();
        Location {
            pkg_path: self.pkg_path.clone(),
            file: file.to_string(),
            line,
            column,
        }
    }

    /// Visits `id` and all of its descendants in pre-order.
    pub fn walk(&self, id: NodeId, visit: &mut impl FnMut(NodeId, &Node)) {
        let Some(node) = self.get(id) else {
            return;
        };
        visit(id, node);
        for child in node.children() {
            self.walk(child, visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::TreeBuilder;
    use crate::types::encoding::{Decode, Encode};

    #[test]
    fn tree_encoding_round_trip_drops_ephemeral_attrs() {
        let mut b = TreeBuilder::new("gno.land/r/demo/t");
        let x = b.name("x");
        let one = b.int(1);
        let def = b.define(vec![x], vec![one]);
        let body = b.func_decl("F", vec![], vec![], vec![def]);
        let tree = b.finish("t", vec![body]);

        let mut annotated = tree.clone();
        annotated
            .get_mut(def)
            .unwrap()
            .attrs
            .set(crate::ast::AttrKey::Preprocessed, crate::ast::AttrValue::Flag);

        let decoded = ProgramTree::from_bytes(&annotated.to_bytes()).unwrap();
        assert_eq!(decoded, tree);
        assert!(decoded.package().is_some());
    }

    #[test]
    fn walk_visits_descendants() {
        let mut b = TreeBuilder::new("gno.land/p/demo/w");
        let l = b.int(1);
        let r = b.int(2);
        let sum = b.binary(l, crate::ast::BinaryOp::Add, r);
        let ret = b.ret(vec![sum]);
        let f = b.func_decl("Sum", vec![], vec![], vec![ret]);
        let tree = b.finish("w", vec![f]);

        let mut seen = Vec::new();
        tree.walk(f, &mut |id, _| seen.push(id));
        assert!(seen.contains(&l) && seen.contains(&r) && seen.contains(&sum));
        assert_eq!(seen[0], f);
    }
}
