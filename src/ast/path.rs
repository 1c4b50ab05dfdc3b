//! Resolved addresses of name references.
//!
//! The resolver stores an [`Address`] on every name and selector node. The
//! address stays fixed for the lifetime of the compiled program, and the
//! evaluator uses it to find a value without any name lookup.

use super::node::Name;
use realmvm_derive::{BinaryCodec, Error};
use std::fmt;

/// Deepest scope chain an address may walk.
pub const MAX_VALUE_PATH_DEPTH: u8 = 127;

/// What an address indexes into.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BinaryCodec)]
pub enum AddressCategory {
    /// Builtin from the universe scope.
    Universe = 0x00,
    /// Slot of a lexical block, `depth` scopes up.
    Block = 0x01,
    /// Field of a record value.
    Field = 0x02,
    /// Method with a value receiver.
    ValueMethod = 0x03,
    /// Method with a pointer receiver.
    PointerMethod = 0x04,
    /// Method looked up by name on the dynamic type.
    Interface = 0x05,
}

impl fmt::Display for AddressCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AddressCategory::Universe => "universe",
            AddressCategory::Block => "block",
            AddressCategory::Field => "field",
            AddressCategory::ValueMethod => "value-method",
            AddressCategory::PointerMethod => "pointer-method",
            AddressCategory::Interface => "interface",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("{category} address {name} must have depth {expected}, got {depth}")]
    WrongDepth {
        category: AddressCategory,
        name: Name,
        expected: u8,
        depth: u8,
    },
    #[error("address {name} exceeds maximum depth ({depth} > 127)")]
    TooDeep { name: Name, depth: u8 },
    #[error("interface address requires a method name")]
    MissingName,
}

/// A resolved `(category, depth, index)` location plus the source name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BinaryCodec)]
pub struct Address {
    pub category: AddressCategory,
    pub depth: u8,
    pub index: u16,
    pub name: Name,
}

impl Address {
    pub fn block(depth: u8, index: u16, name: Name) -> Self {
        Self {
            category: AddressCategory::Block,
            depth,
            index,
            name,
        }
    }

    pub fn universe(index: u16, name: Name) -> Self {
        Self {
            category: AddressCategory::Universe,
            depth: 0,
            index,
            name,
        }
    }

    pub fn field(index: u16, name: Name) -> Self {
        Self {
            category: AddressCategory::Field,
            depth: 0,
            index,
            name,
        }
    }

    pub fn method(pointer_receiver: bool, index: u16, name: Name) -> Self {
        Self {
            category: if pointer_receiver {
                AddressCategory::PointerMethod
            } else {
                AddressCategory::ValueMethod
            },
            depth: 0,
            index,
            name,
        }
    }

    pub fn interface(name: Name) -> Self {
        Self {
            category: AddressCategory::Interface,
            depth: 0,
            index: 0,
            name,
        }
    }

    /// The blank identifier resolves here and is never stored.
    pub fn blank() -> Self {
        Self::block(0, 0, Name::from(Name::BLANK))
    }

    pub fn is_blank(&self) -> bool {
        self.category == AddressCategory::Block && self.depth == 0
    }

    /// Checks the depth rules of each category.
    pub fn validate(&self) -> Result<(), AddressError> {
        if self.depth > MAX_VALUE_PATH_DEPTH {
            return Err(AddressError::TooDeep {
                name: self.name.clone(),
                depth: self.depth,
            });
        }
        let expected = match self.category {
            AddressCategory::Block => return Ok(()),
            AddressCategory::Field => {
                if self.depth > 1 {
                    return Err(AddressError::WrongDepth {
                        category: self.category,
                        name: self.name.clone(),
                        expected: 1,
                        depth: self.depth,
                    });
                }
                return Ok(());
            }
            AddressCategory::Interface if self.name.as_str().is_empty() => {
                return Err(AddressError::MissingName);
            }
            AddressCategory::Universe
            | AddressCategory::ValueMethod
            | AddressCategory::PointerMethod
            | AddressCategory::Interface => 0,
        };
        if self.depth != expected {
            return Err(AddressError::WrongDepth {
                category: self.category,
                name: self.name.clone(),
                expected,
                depth: self.depth,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}:{}]({})", self.category, self.depth, self.index, self.name)
    }
}
