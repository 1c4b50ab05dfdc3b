//! Expression nodes, including type expressions.

use super::node::{Name, NodeId};
use super::path::Address;
use realmvm_derive::BinaryCodec;
use std::fmt;

/// How a name expression reaches its value at run time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, BinaryCodec)]
pub enum NameKind {
    /// Plain slot read or write.
    #[default]
    Normal,
    /// Left-hand side of `:=` or a `var` declaration.
    Define,
    /// Define of a boxed name: allocates a fresh heap item.
    HeapDefine,
    /// Use of a boxed name in its declaring function: goes through the cell.
    HeapUse,
    /// Use of a boxed name inside a capturing closure: the address points at
    /// the closure's capture slot.
    HeapClosure,
}

#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct NameExpr {
    pub name: Name,
    pub path: Option<Address>,
    pub kind: NameKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec)]
pub enum LitKind {
    Int,
    String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Quo,
    Rem,
    Eql,
    Neq,
    Lss,
    Gtr,
    Leq,
    Geq,
    LAnd,
    LOr,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eql | BinaryOp::Neq | BinaryOp::Lss | BinaryOp::Gtr | BinaryOp::Leq | BinaryOp::Geq
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::LAnd | BinaryOp::LOr)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Quo => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eql => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Lss => "<",
            BinaryOp::Gtr => ">",
            BinaryOp::Leq => "<=",
            BinaryOp::Geq => ">=",
            BinaryOp::LAnd => "&&",
            BinaryOp::LOr => "||",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// One element of a composite literal; `key` is a field name, index or map key.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct KeyValue {
    pub key: Option<NodeId>,
    pub value: NodeId,
}

/// A boxed name a closure captures when it is created.
///
/// `source` is resolved from the scope enclosing the closure literal;
/// `slot` is the index in the closure's own scope the cell is bound to.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct Capture {
    pub name: Name,
    pub source: Address,
    pub slot: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub enum Expr {
    Name(NameExpr),
    BasicLit {
        kind: LitKind,
        value: String,
    },
    Binary {
        left: NodeId,
        op: BinaryOp,
        right: NodeId,
    },
    Unary {
        op: UnaryOp,
        x: NodeId,
    },
    /// `with_cross` marks the `cross(f)(args)` form; `func` is then `f`.
    Call {
        func: NodeId,
        args: Vec<NodeId>,
        with_cross: bool,
    },
    Index {
        x: NodeId,
        index: NodeId,
    },
    Selector {
        x: NodeId,
        sel: Name,
        path: Option<Address>,
    },
    Slice {
        x: NodeId,
        low: Option<NodeId>,
        high: Option<NodeId>,
    },
    /// Dereference, or pointer type in type position.
    Star {
        x: NodeId,
    },
    Ref {
        x: NodeId,
    },
    TypeAssert {
        x: NodeId,
        ty: NodeId,
    },
    CompositeLit {
        ty: NodeId,
        elts: Vec<KeyValue>,
    },
    FuncLit {
        ty: NodeId,
        body: Vec<NodeId>,
        captures: Vec<Capture>,
    },
    FieldType {
        name: Option<Name>,
        ty: NodeId,
    },
    ArrayType {
        len: u32,
        elt: NodeId,
    },
    SliceType {
        elt: NodeId,
    },
    MapType {
        key: NodeId,
        value: NodeId,
    },
    FuncType {
        params: Vec<NodeId>,
        results: Vec<NodeId>,
    },
    StructType {
        fields: Vec<NodeId>,
    },
    InterfaceType {
        methods: Vec<NodeId>,
    },
}

/// Keyed-ness of a composite literal's elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keying {
    Empty,
    Keyed,
    Unkeyed,
    Mixed,
}

impl Expr {
    /// Classifies a composite literal's elements.
    ///
    /// Returns `None` for any other expression.
    pub fn keying(&self) -> Option<Keying> {
        let Expr::CompositeLit { elts, .. } = self else {
            return None;
        };
        let keyed = elts.iter().filter(|kv| kv.key.is_some()).count();
        Some(match (elts.len(), keyed) {
            (0, _) => Keying::Empty,
            (n, k) if k == n => Keying::Keyed,
            (_, 0) => Keying::Unkeyed,
            _ => Keying::Mixed,
        })
    }

    pub fn is_type_expr(&self) -> bool {
        matches!(
            self,
            Expr::FieldType { .. }
                | Expr::ArrayType { .. }
                | Expr::SliceType { .. }
                | Expr::MapType { .. }
                | Expr::FuncType { .. }
                | Expr::StructType { .. }
                | Expr::InterfaceType { .. }
        )
    }

    /// Direct child node ids in evaluation order.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Expr::Name(_) | Expr::BasicLit { .. } => Vec::new(),
            Expr::Binary { left, right, .. } => vec![*left, *right],
            Expr::Unary { x, .. } | Expr::Star { x } | Expr::Ref { x } => vec![*x],
            Expr::Selector { x, .. } => vec![*x],
            Expr::Call { func, args, .. } => {
                let mut out = vec![*func];
                out.extend(args);
                out
            }
            Expr::Index { x, index } => vec![*x, *index],
            Expr::Slice { x, low, high } => {
                let mut out = vec![*x];
                out.extend(low.iter().chain(high.iter()));
                out
            }
            Expr::TypeAssert { x, ty } => vec![*x, *ty],
            Expr::CompositeLit { ty, elts } => {
                let mut out = vec![*ty];
                for kv in elts {
                    out.extend(kv.key);
                    out.push(kv.value);
                }
                out
            }
            Expr::FuncLit { ty, body, .. } => {
                let mut out = vec![*ty];
                out.extend(body);
                out
            }
            Expr::FieldType { ty, .. } => vec![*ty],
            Expr::ArrayType { elt, .. } | Expr::SliceType { elt } => vec![*elt],
            Expr::MapType { key, value } => vec![*key, *value],
            Expr::FuncType { params, results } => params.iter().chain(results).copied().collect(),
            Expr::StructType { fields } => fields.clone(),
            Expr::InterfaceType { methods } => methods.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(elts: Vec<KeyValue>) -> Expr {
        Expr::CompositeLit {
            ty: NodeId(0),
            elts,
        }
    }

    #[test]
    fn composite_keying() {
        let keyed = KeyValue {
            key: Some(NodeId(1)),
            value: NodeId(2),
        };
        let plain = KeyValue {
            key: None,
            value: NodeId(3),
        };
        assert_eq!(lit(vec![]).keying(), Some(Keying::Empty));
        assert_eq!(lit(vec![keyed.clone()]).keying(), Some(Keying::Keyed));
        assert_eq!(lit(vec![plain.clone()]).keying(), Some(Keying::Unkeyed));
        assert_eq!(lit(vec![keyed, plain]).keying(), Some(Keying::Mixed));
        assert_eq!(Expr::Star { x: NodeId(0) }.keying(), None);
    }

    #[test]
    fn call_children_order() {
        let call = Expr::Call {
            func: NodeId(1),
            args: vec![NodeId(2), NodeId(3)],
            with_cross: false,
        };
        assert_eq!(call.children(), vec![NodeId(1), NodeId(2), NodeId(3)]);
    }
}
