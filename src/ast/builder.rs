//! Programmatic construction of program trees.
//!
//! The ingestion collaborator produces trees from source text; the builder
//! is what it (and the tests) use to populate the arena node by node.

use super::decl::{Decl, FileNode, PackageNode};
use super::expr::{BinaryOp, Capture, Expr, KeyValue, LitKind, NameExpr, NameKind, UnaryOp};
use super::node::{Attributes, Name, NodeId};
use super::stmt::{AssignOp, BranchOp, IncDecOp, Stmt};
use super::tree::{NodeKind, ProgramTree};

/// Incrementally builds one package's [`ProgramTree`].
pub struct TreeBuilder {
    tree: ProgramTree,
    pkg_name: Name,
    line: u32,
}

impl TreeBuilder {
    /// Starts a package; the package name defaults to the last path segment.
    pub fn new(pkg_path: &str) -> Self {
        let pkg_name = pkg_path.rsplit('/').next().unwrap_or(pkg_path);
        Self {
            tree: ProgramTree::new(pkg_path),
            pkg_name: Name::from(pkg_name),
            line: 1,
        }
    }

    pub fn with_pkg_name(mut self, name: &str) -> Self {
        self.pkg_name = Name::from(name);
        self
    }

    /// Sets the line recorded on subsequently built nodes.
    pub fn line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = self.tree.add(kind, Attributes::at(self.line, 1));
        self.line += 1;
        id
    }

    fn expr(&mut self, e: Expr) -> NodeId {
        self.push(NodeKind::Expr(e))
    }

    fn stmt(&mut self, s: Stmt) -> NodeId {
        self.push(NodeKind::Stmt(s))
    }

    fn decl(&mut self, d: Decl) -> NodeId {
        self.push(NodeKind::Decl(d))
    }

    /// Attaches a label to a statement (for labeled break/continue).
    pub fn label(&mut self, id: NodeId, label: &str) -> NodeId {
        if let Some(node) = self.tree.get_mut(id) {
            node.attrs.label = Some(Name::from(label));
        }
        id
    }

    // Expressions.

    pub fn name(&mut self, name: &str) -> NodeId {
        self.expr(Expr::Name(NameExpr {
            name: Name::from(name),
            path: None,
            kind: NameKind::Normal,
        }))
    }

    pub fn int(&mut self, v: i64) -> NodeId {
        self.expr(Expr::BasicLit {
            kind: LitKind::Int,
            value: v.to_string(),
        })
    }

    pub fn str_lit(&mut self, s: &str) -> NodeId {
        self.expr(Expr::BasicLit {
            kind: LitKind::String,
            value: s.to_string(),
        })
    }

    pub fn binary(&mut self, left: NodeId, op: BinaryOp, right: NodeId) -> NodeId {
        self.expr(Expr::Binary { left, op, right })
    }

    pub fn unary(&mut self, op: UnaryOp, x: NodeId) -> NodeId {
        self.expr(Expr::Unary { op, x })
    }

    pub fn call(&mut self, func: NodeId, args: Vec<NodeId>) -> NodeId {
        self.expr(Expr::Call {
            func,
            args,
            with_cross: false,
        })
    }

    /// `cross(func)(args...)`.
    pub fn cross_call(&mut self, func: NodeId, args: Vec<NodeId>) -> NodeId {
        self.expr(Expr::Call {
            func,
            args,
            with_cross: true,
        })
    }

    /// Calls a name directly: `name(args...)`.
    pub fn call_name(&mut self, name: &str, args: Vec<NodeId>) -> NodeId {
        let f = self.name(name);
        self.call(f, args)
    }

    pub fn selector(&mut self, x: NodeId, sel: &str) -> NodeId {
        self.expr(Expr::Selector {
            x,
            sel: Name::from(sel),
            path: None,
        })
    }

    pub fn index(&mut self, x: NodeId, index: NodeId) -> NodeId {
        self.expr(Expr::Index { x, index })
    }

    pub fn slice_expr(&mut self, x: NodeId, low: Option<NodeId>, high: Option<NodeId>) -> NodeId {
        self.expr(Expr::Slice { x, low, high })
    }

    pub fn star(&mut self, x: NodeId) -> NodeId {
        self.expr(Expr::Star { x })
    }

    pub fn ref_of(&mut self, x: NodeId) -> NodeId {
        self.expr(Expr::Ref { x })
    }

    pub fn type_assert(&mut self, x: NodeId, ty: NodeId) -> NodeId {
        self.expr(Expr::TypeAssert { x, ty })
    }

    pub fn composite(&mut self, ty: NodeId, elts: Vec<NodeId>) -> NodeId {
        let elts = elts
            .into_iter()
            .map(|value| KeyValue { key: None, value })
            .collect();
        self.expr(Expr::CompositeLit { ty, elts })
    }

    pub fn composite_keyed(&mut self, ty: NodeId, elts: Vec<(NodeId, NodeId)>) -> NodeId {
        let elts = elts
            .into_iter()
            .map(|(key, value)| KeyValue {
                key: Some(key),
                value,
            })
            .collect();
        self.expr(Expr::CompositeLit { ty, elts })
    }

    /// Composite literal with explicit per-element keys (possibly mixed).
    pub fn composite_raw(&mut self, ty: NodeId, elts: Vec<KeyValue>) -> NodeId {
        self.expr(Expr::CompositeLit { ty, elts })
    }

    pub fn func_lit(
        &mut self,
        params: Vec<(&str, NodeId)>,
        results: Vec<NodeId>,
        body: Vec<NodeId>,
    ) -> NodeId {
        let ty = self.func_type(params, results);
        self.expr(Expr::FuncLit {
            ty,
            body,
            captures: Vec::<Capture>::new(),
        })
    }

    // Type expressions.

    pub fn field(&mut self, name: Option<&str>, ty: NodeId) -> NodeId {
        self.expr(Expr::FieldType {
            name: name.map(Name::from),
            ty,
        })
    }

    pub fn func_type(&mut self, params: Vec<(&str, NodeId)>, results: Vec<NodeId>) -> NodeId {
        let params = params
            .into_iter()
            .map(|(n, ty)| self.field(Some(n), ty))
            .collect();
        let results = results
            .into_iter()
            .map(|ty| self.field(None, ty))
            .collect();
        self.expr(Expr::FuncType { params, results })
    }

    pub fn struct_type(&mut self, fields: Vec<(&str, NodeId)>) -> NodeId {
        let fields = fields
            .into_iter()
            .map(|(n, ty)| self.field(Some(n), ty))
            .collect();
        self.expr(Expr::StructType { fields })
    }

    pub fn interface_type(&mut self, methods: Vec<(&str, NodeId)>) -> NodeId {
        let methods = methods
            .into_iter()
            .map(|(n, ty)| self.field(Some(n), ty))
            .collect();
        self.expr(Expr::InterfaceType { methods })
    }

    pub fn slice_type(&mut self, elt: NodeId) -> NodeId {
        self.expr(Expr::SliceType { elt })
    }

    pub fn array_type(&mut self, len: u32, elt: NodeId) -> NodeId {
        self.expr(Expr::ArrayType { len, elt })
    }

    pub fn map_type(&mut self, key: NodeId, value: NodeId) -> NodeId {
        self.expr(Expr::MapType { key, value })
    }

    pub fn ptr_type(&mut self, elt: NodeId) -> NodeId {
        self.star(elt)
    }

    // Statements.

    pub fn define(&mut self, lhs: Vec<NodeId>, rhs: Vec<NodeId>) -> NodeId {
        self.stmt(Stmt::Assign {
            lhs,
            op: AssignOp::Define,
            rhs,
        })
    }

    pub fn assign(&mut self, lhs: Vec<NodeId>, rhs: Vec<NodeId>) -> NodeId {
        self.stmt(Stmt::Assign {
            lhs,
            op: AssignOp::Assign,
            rhs,
        })
    }

    pub fn op_assign(&mut self, lhs: NodeId, op: AssignOp, rhs: NodeId) -> NodeId {
        self.stmt(Stmt::Assign {
            lhs: vec![lhs],
            op,
            rhs: vec![rhs],
        })
    }

    pub fn expr_stmt(&mut self, x: NodeId) -> NodeId {
        self.stmt(Stmt::Expr { x })
    }

    /// The `crossing()` marker statement.
    pub fn crossing(&mut self) -> NodeId {
        let call = self.call_name("crossing", vec![]);
        self.expr_stmt(call)
    }

    pub fn ret(&mut self, results: Vec<NodeId>) -> NodeId {
        self.stmt(Stmt::Return { results })
    }

    pub fn block(&mut self, body: Vec<NodeId>) -> NodeId {
        self.stmt(Stmt::Block { body })
    }

    pub fn inc(&mut self, x: NodeId) -> NodeId {
        self.stmt(Stmt::IncDec {
            x,
            op: IncDecOp::Inc,
        })
    }

    pub fn dec(&mut self, x: NodeId) -> NodeId {
        self.stmt(Stmt::IncDec {
            x,
            op: IncDecOp::Dec,
        })
    }

    pub fn for_loop(
        &mut self,
        init: Option<NodeId>,
        cond: Option<NodeId>,
        post: Option<NodeId>,
        body: Vec<NodeId>,
    ) -> NodeId {
        self.stmt(Stmt::For {
            init,
            cond,
            post,
            body,
            loop_vars: 0,
        })
    }

    pub fn range(
        &mut self,
        x: NodeId,
        key: Option<NodeId>,
        value: Option<NodeId>,
        body: Vec<NodeId>,
    ) -> NodeId {
        self.stmt(Stmt::Range {
            x,
            key,
            value,
            define: true,
            body,
        })
    }

    pub fn if_stmt(
        &mut self,
        init: Option<NodeId>,
        cond: NodeId,
        then: Vec<NodeId>,
        els: Option<Vec<NodeId>>,
    ) -> NodeId {
        let then = self.stmt(Stmt::IfCase { body: then });
        let els = els.map(|body| self.stmt(Stmt::IfCase { body }));
        self.stmt(Stmt::If {
            init,
            cond,
            then,
            els,
        })
    }

    /// `clauses` are `(cases, body)`; empty cases is `default`.
    pub fn switch(
        &mut self,
        init: Option<NodeId>,
        x: Option<NodeId>,
        clauses: Vec<(Vec<NodeId>, Vec<NodeId>)>,
    ) -> NodeId {
        let clauses = clauses
            .into_iter()
            .map(|(cases, body)| self.stmt(Stmt::SwitchClause { cases, body }))
            .collect();
        self.stmt(Stmt::Switch { init, x, clauses })
    }

    pub fn brk(&mut self, label: Option<&str>) -> NodeId {
        self.stmt(Stmt::Branch {
            op: BranchOp::Break,
            label: label.map(Name::from),
            depth: 0,
        })
    }

    pub fn cont(&mut self, label: Option<&str>) -> NodeId {
        self.stmt(Stmt::Branch {
            op: BranchOp::Continue,
            label: label.map(Name::from),
            depth: 0,
        })
    }

    pub fn defer(&mut self, call: NodeId) -> NodeId {
        self.stmt(Stmt::Defer { call })
    }

    /// `var a, b T = v1, v2` inside a function body.
    pub fn var_stmt(&mut self, names: &[&str], ty: Option<NodeId>, values: Vec<NodeId>) -> NodeId {
        let decl = self.var(names, ty, values);
        self.stmt(Stmt::Decl { decls: vec![decl] })
    }

    // Declarations.

    pub fn var(&mut self, names: &[&str], ty: Option<NodeId>, values: Vec<NodeId>) -> NodeId {
        self.value_decl(names, ty, values, false)
    }

    pub fn const_decl(&mut self, names: &[&str], ty: Option<NodeId>, values: Vec<NodeId>) -> NodeId {
        self.value_decl(names, ty, values, true)
    }

    fn value_decl(
        &mut self,
        names: &[&str],
        ty: Option<NodeId>,
        values: Vec<NodeId>,
        is_const: bool,
    ) -> NodeId {
        let names = names.iter().map(|n| self.name(n)).collect();
        self.decl(Decl::Value {
            names,
            ty,
            values,
            is_const,
        })
    }

    pub fn type_decl(&mut self, name: &str, ty: NodeId) -> NodeId {
        self.decl(Decl::Type {
            name: Name::from(name),
            ty,
            is_alias: false,
        })
    }

    pub fn import(&mut self, name: &str, pkg_path: &str) -> NodeId {
        self.decl(Decl::Import {
            name: Name::from(name),
            pkg_path: pkg_path.to_string(),
        })
    }

    pub fn func_decl(
        &mut self,
        name: &str,
        params: Vec<(&str, NodeId)>,
        results: Vec<NodeId>,
        body: Vec<NodeId>,
    ) -> NodeId {
        let ty = self.func_type(params, results);
        self.decl(Decl::Func {
            name: Name::from(name),
            recv: None,
            ty,
            body,
            is_crossing: false,
        })
    }

    pub fn method_decl(
        &mut self,
        recv: (&str, NodeId),
        name: &str,
        params: Vec<(&str, NodeId)>,
        results: Vec<NodeId>,
        body: Vec<NodeId>,
    ) -> NodeId {
        let recv = self.field(Some(recv.0), recv.1);
        let ty = self.func_type(params, results);
        self.decl(Decl::Func {
            name: Name::from(name),
            recv: Some(recv),
            ty,
            body,
            is_crossing: false,
        })
    }

    // Files and packages.

    pub fn file(&mut self, name: &str, decls: Vec<NodeId>) -> NodeId {
        let pkg_name = self.pkg_name.clone();
        self.push(NodeKind::File(FileNode {
            name: name.to_string(),
            pkg_name,
            decls,
        }))
    }

    /// Wraps already built files into the package root and returns the tree.
    pub fn finish_files(mut self, files: Vec<NodeId>) -> ProgramTree {
        let root = self.push(NodeKind::Package(PackageNode {
            pkg_path: self.tree.pkg_path.clone(),
            pkg_name: self.pkg_name.clone(),
            files,
        }));
        self.tree.set_root(root);
        self.tree
    }

    /// Single-file package.
    pub fn finish(mut self, file_name: &str, decls: Vec<NodeId>) -> ProgramTree {
        let file = self.file(&format!("{file_name}.gno"), decls);
        self.finish_files(vec![file])
    }
}
