//! The fixed outermost scope: builtin types, constants and functions.

use super::types::Type;
use crate::ast::Name;
use realmvm_derive::BinaryCodec;

/// Every universe name. The discriminant is the address index.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BinaryCodec)]
pub enum Universal {
    Bool = 0,
    Int = 1,
    String = 2,
    Any = 3,
    True = 4,
    False = 5,
    Nil = 6,
    Len = 7,
    Append = 8,
    Panic = 9,
    Cross = 10,
    Crossing = 11,
    CurrentRealm = 12,
    PreviousRealm = 13,
    SendCoins = 14,
    BalanceOf = 15,
}

impl Universal {
    pub const ALL: [Universal; 16] = [
        Universal::Bool,
        Universal::Int,
        Universal::String,
        Universal::Any,
        Universal::True,
        Universal::False,
        Universal::Nil,
        Universal::Len,
        Universal::Append,
        Universal::Panic,
        Universal::Cross,
        Universal::Crossing,
        Universal::CurrentRealm,
        Universal::PreviousRealm,
        Universal::SendCoins,
        Universal::BalanceOf,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Universal::Bool => "bool",
            Universal::Int => "int",
            Universal::String => "string",
            Universal::Any => "any",
            Universal::True => "true",
            Universal::False => "false",
            Universal::Nil => "nil",
            Universal::Len => "len",
            Universal::Append => "append",
            Universal::Panic => "panic",
            Universal::Cross => "cross",
            Universal::Crossing => "crossing",
            Universal::CurrentRealm => "currentRealm",
            Universal::PreviousRealm => "previousRealm",
            Universal::SendCoins => "sendCoins",
            Universal::BalanceOf => "balanceOf",
        }
    }

    pub fn lookup(name: &Name) -> Option<Universal> {
        Self::ALL.into_iter().find(|u| u.name() == name.as_str())
    }

    pub fn from_index(index: u16) -> Option<Universal> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u16 {
        self as u16
    }

    pub fn is_builtin_func(self) -> bool {
        self.index() >= Universal::Len.index()
    }

    /// Static type of the name as seen by the resolver.
    pub fn static_type(self) -> Type {
        match self {
            Universal::Bool => Type::TypeName(Box::new(Type::Bool)),
            Universal::Int => Type::TypeName(Box::new(Type::Int)),
            Universal::String => Type::TypeName(Box::new(Type::String)),
            Universal::Any => Type::TypeName(Box::new(Type::Any)),
            Universal::True | Universal::False => Type::Bool,
            Universal::Nil => Type::Nil,
            _ => Type::Builtin,
        }
    }

    /// Result type of calling a builtin with arguments of the given types.
    pub fn call_result(self, args: &[Type]) -> Type {
        match self {
            Universal::Len | Universal::BalanceOf => Type::Int,
            Universal::Append => args.first().cloned().unwrap_or(Type::Any),
            Universal::CurrentRealm | Universal::PreviousRealm => Type::String,
            Universal::Panic | Universal::Crossing | Universal::SendCoins => Type::Tuple(Vec::new()),
            _ => Type::Any,
        }
    }

    /// Signature check for builtins with a fixed arity.
    pub fn arity(self) -> Option<usize> {
        match self {
            Universal::Len | Universal::Panic | Universal::BalanceOf => Some(1),
            Universal::Crossing | Universal::CurrentRealm | Universal::PreviousRealm => Some(0),
            Universal::SendCoins => Some(3),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_match_table() {
        for (i, u) in Universal::ALL.iter().enumerate() {
            assert_eq!(u.index() as usize, i);
            assert_eq!(Universal::from_index(i as u16), Some(*u));
            assert_eq!(Universal::lookup(&Name::from(u.name())), Some(*u));
        }
        assert_eq!(Universal::from_index(99), None);
    }

    #[test]
    fn builtin_classification() {
        assert!(Universal::Len.is_builtin_func());
        assert!(Universal::Crossing.is_builtin_func());
        assert!(!Universal::True.is_builtin_func());
        assert_eq!(Universal::Int.static_type(), Type::TypeName(Box::new(Type::Int)));
    }
}
