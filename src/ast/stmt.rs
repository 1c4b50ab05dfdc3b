//! Statement nodes.

use super::node::{Name, NodeId};
use realmvm_derive::BinaryCodec;

#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec)]
pub enum AssignOp {
    Assign,
    Define,
    AddAssign,
    SubAssign,
    MulAssign,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec)]
pub enum IncDecOp {
    Inc,
    Dec,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec)]
pub enum BranchOp {
    Break,
    Continue,
}

#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub enum Stmt {
    Assign {
        lhs: Vec<NodeId>,
        op: AssignOp,
        rhs: Vec<NodeId>,
    },
    Block {
        body: Vec<NodeId>,
    },
    /// `depth` counts the enclosing breakable statements (loops only, for
    /// `continue`) between this branch and its target; set by the resolver.
    Branch {
        op: BranchOp,
        label: Option<Name>,
        depth: u8,
    },
    Decl {
        decls: Vec<NodeId>,
    },
    Defer {
        call: NodeId,
    },
    Empty,
    Expr {
        x: NodeId,
    },
    /// `loop_vars` is the number of names the init statement declared;
    /// those slots get a fresh cell per iteration when boxed.
    For {
        init: Option<NodeId>,
        cond: Option<NodeId>,
        post: Option<NodeId>,
        body: Vec<NodeId>,
        loop_vars: u16,
    },
    If {
        init: Option<NodeId>,
        cond: NodeId,
        then: NodeId,
        els: Option<NodeId>,
    },
    IfCase {
        body: Vec<NodeId>,
    },
    IncDec {
        x: NodeId,
        op: IncDecOp,
    },
    Range {
        x: NodeId,
        key: Option<NodeId>,
        value: Option<NodeId>,
        define: bool,
        body: Vec<NodeId>,
    },
    Return {
        results: Vec<NodeId>,
    },
    Switch {
        init: Option<NodeId>,
        x: Option<NodeId>,
        clauses: Vec<NodeId>,
    },
    /// A clause with no cases is `default`.
    SwitchClause {
        cases: Vec<NodeId>,
        body: Vec<NodeId>,
    },
}

impl Stmt {
    pub fn is_loop(&self) -> bool {
        matches!(self, Stmt::For { .. } | Stmt::Range { .. })
    }

    pub fn is_breakable(&self) -> bool {
        matches!(self, Stmt::For { .. } | Stmt::Range { .. } | Stmt::Switch { .. })
    }

    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Stmt::Assign { lhs, rhs, .. } => lhs.iter().chain(rhs).copied().collect(),
            Stmt::Block { body } | Stmt::IfCase { body } => body.clone(),
            Stmt::Branch { .. } | Stmt::Empty => Vec::new(),
            Stmt::Decl { decls } => decls.clone(),
            Stmt::Defer { call } => vec![*call],
            Stmt::Expr { x } => vec![*x],
            Stmt::For {
                init,
                cond,
                post,
                body,
                ..
            } => init
                .iter()
                .chain(cond.iter())
                .chain(post.iter())
                .chain(body)
                .copied()
                .collect(),
            Stmt::If {
                init,
                cond,
                then,
                els,
            } => init
                .iter()
                .chain([cond, then])
                .chain(els.iter())
                .copied()
                .collect(),
            Stmt::IncDec { x, .. } => vec![*x],
            Stmt::Range {
                x,
                key,
                value,
                body,
                ..
            } => std::iter::once(x)
                .chain(key.iter())
                .chain(value.iter())
                .chain(body)
                .copied()
                .collect(),
            Stmt::Return { results } => results.clone(),
            Stmt::Switch { init, x, clauses } => init
                .iter()
                .chain(x.iter())
                .chain(clauses)
                .copied()
                .collect(),
            Stmt::SwitchClause { cases, body } => cases.iter().chain(body).copied().collect(),
        }
    }
}
