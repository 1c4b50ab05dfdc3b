//! Static types as far as preprocessing needs them.
//!
//! The resolver only needs enough typing to check redefinitions and to
//! route selectors to fields, methods, interfaces or package members.
//! Anything it cannot determine is [`Type::Any`].

use crate::ast::{Name, NodeId};
use realmvm_derive::BinaryCodec;
use std::fmt;

/// Reference to a declared (named) type.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BinaryCodec)]
pub struct TypeRef {
    pub pkg_path: String,
    pub name: Name,
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pkg_path.rsplit('/').next() {
            Some(pkg) => write!(f, "{}.{}", pkg, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct FuncSig {
    pub params: Vec<Type>,
    pub results: Vec<Type>,
}

impl FuncSig {
    /// Type of a call expression.
    pub fn result_type(&self) -> Type {
        match self.results.as_slice() {
            [single] => single.clone(),
            many => Type::Tuple(many.to_vec()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct FieldDef {
    pub name: Name,
    pub ty: Type,
}

#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct MethodSig {
    pub name: Name,
    pub sig: FuncSig,
}

#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub enum Type {
    Any,
    Bool,
    Int,
    String,
    /// Type of the untyped `nil`.
    Nil,
    Slice(Box<Type>),
    Array(u32, Box<Type>),
    Map(Box<Type>, Box<Type>),
    Pointer(Box<Type>),
    Func(FuncSig),
    Struct(Vec<FieldDef>),
    Interface(Vec<MethodSig>),
    Named(TypeRef),
    /// Multiple results of a call.
    Tuple(Vec<Type>),
    /// The slot names a type rather than holding a value.
    TypeName(Box<Type>),
    /// The slot is an import of the package at this path.
    Package(String),
    /// The slot is a universe builtin function.
    Builtin,
}

impl Type {
    pub fn slice_of(elt: Type) -> Type {
        Type::Slice(Box::new(elt))
    }

    pub fn pointer_to(elt: Type) -> Type {
        Type::Pointer(Box::new(elt))
    }

    /// Element type produced by indexing, if the type is indexable.
    pub fn elem(&self) -> Option<&Type> {
        match self {
            Type::Slice(e) | Type::Array(_, e) => Some(e),
            Type::Map(_, v) => Some(v),
            Type::String => Some(&Type::Int),
            Type::Pointer(inner) => match inner.as_ref() {
                Type::Array(_, e) => Some(e),
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether a value of this type is a struct or array held by value.
    pub fn is_value_aggregate(&self) -> bool {
        matches!(self, Type::Struct(_) | Type::Array(..))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Any => write!(f, "any"),
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::String => write!(f, "string"),
            Type::Nil => write!(f, "nil"),
            Type::Slice(e) => write!(f, "[]{e}"),
            Type::Array(n, e) => write!(f, "[{n}]{e}"),
            Type::Map(k, v) => write!(f, "map[{k}]{v}"),
            Type::Pointer(e) => write!(f, "*{e}"),
            Type::Func(sig) => {
                write!(f, "func(")?;
                write_list(f, &sig.params)?;
                write!(f, ")")?;
                match sig.results.as_slice() {
                    [] => Ok(()),
                    [one] => write!(f, " {one}"),
                    many => {
                        write!(f, " (")?;
                        write_list(f, many)?;
                        write!(f, ")")
                    }
                }
            }
            Type::Struct(fields) => {
                write!(f, "struct{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{} {}", field.name, field.ty)?;
                }
                write!(f, "}}")
            }
            Type::Interface(methods) => {
                write!(f, "interface{{")?;
                for (i, m) in methods.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", m.name)?;
                }
                write!(f, "}}")
            }
            Type::Named(r) => write!(f, "{r}"),
            Type::Tuple(items) => {
                write!(f, "(")?;
                write_list(f, items)?;
                write!(f, ")")
            }
            Type::TypeName(t) => write!(f, "type {t}"),
            Type::Package(p) => write!(f, "package {p}"),
            Type::Builtin => write!(f, "builtin"),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Type]) -> fmt::Result {
    for (i, t) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{t}")?;
    }
    Ok(())
}

/// A method in a declared type's method set.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct MethodEntry {
    pub name: Name,
    pub decl: NodeId,
    pub pointer_receiver: bool,
    pub sig: FuncSig,
}

/// Underlying type and method set of a package-level `type` declaration.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct DeclaredType {
    pub underlying: Type,
    pub methods: Vec<MethodEntry>,
}

impl DeclaredType {
    pub fn method_index(&self, name: &Name) -> Option<(u16, &MethodEntry)> {
        self.methods
            .iter()
            .enumerate()
            .find(|(_, m)| &m.name == name)
            .map(|(i, m)| (i as u16, m))
    }

    pub fn field_index(&self, name: &Name) -> Option<(u16, &FieldDef)> {
        match &self.underlying {
            Type::Struct(fields) => fields
                .iter()
                .enumerate()
                .find(|(_, f)| &f.name == name)
                .map(|(i, f)| (i as u16, f)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_types() {
        let sig = FuncSig {
            params: vec![Type::Int, Type::slice_of(Type::String)],
            results: vec![Type::Bool],
        };
        assert_eq!(Type::Func(sig).to_string(), "func(int, []string) bool");
        let named = Type::Named(TypeRef {
            pkg_path: "gno.land/r/demo/counter".into(),
            name: Name::from("Item"),
        });
        assert_eq!(Type::pointer_to(named).to_string(), "*counter.Item");
    }

    #[test]
    fn result_type_collapses_single() {
        let one = FuncSig {
            params: vec![],
            results: vec![Type::Int],
        };
        assert_eq!(one.result_type(), Type::Int);
        let none = FuncSig {
            params: vec![],
            results: vec![],
        };
        assert_eq!(none.result_type(), Type::Tuple(vec![]));
    }

    #[test]
    fn elem_of_indexables() {
        assert_eq!(Type::slice_of(Type::Bool).elem(), Some(&Type::Bool));
        assert_eq!(Type::String.elem(), Some(&Type::Int));
        assert_eq!(Type::Int.elem(), None);
    }
}
