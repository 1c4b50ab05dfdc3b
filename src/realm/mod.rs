//! Realms: who code runs as, and what it may mutate.
//!
//! A crossing call pushes the callee's realm; plain calls leave the stack
//! alone, so the current realm only changes at crossing boundaries. Objects
//! persisted by a package carry that package's [`PkgId`]; mutating one is
//! only allowed while the package's own realm is current.

pub mod banker;

pub use banker::Banker;

use crate::ast::{Name, is_realm_path};
use crate::object::ObjectId;
use crate::types::address::{Address, PkgId};
use realmvm_derive::Error;
use std::fmt;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RealmError {
    #[error("{func} is a crossing function and must be called as cross({func})(...)")]
    CrossingRequired { func: Name },
    #[error("{func} does not declare crossing() and cannot be called with cross")]
    NotCrossing { func: Name },
    #[error("cannot cross into {0}: not a realm package")]
    NotARealm(String),
    #[error("realm {realm} cannot modify object {object} owned by package {owner}")]
    UnauthorizedMutation { object: ObjectId, owner: PkgId, realm: String },
    #[error("no previous realm at the origin of the call")]
    NoPreviousRealm,
    #[error("realm {realm} cannot spend from {from}")]
    UnauthorizedSpend { from: Address, realm: Address },
    #[error("insufficient funds in {address}: balance {balance}, need {amount}")]
    InsufficientFunds { address: Address, balance: u64, amount: u64 },
    #[error("invalid amount {0}")]
    InvalidAmount(i64),
    #[error("balance overflow in {0}")]
    BalanceOverflow(Address),
}

/// An execution and ownership domain.
///
/// User realms are plain accounts. Code realms belong to a package and
/// their address is derived from its path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Realm {
    pub address: Address,
    pub pkg_path: Option<String>,
}

impl Realm {
    pub fn user(address: Address) -> Self {
        Self {
            address,
            pkg_path: None,
        }
    }

    pub fn code(pkg_path: &str) -> Self {
        Self {
            address: Address::from_pkg_path(pkg_path),
            pkg_path: Some(pkg_path.to_string()),
        }
    }

    pub fn is_user(&self) -> bool {
        self.pkg_path.is_none()
    }

    /// Object namespace this realm may write to.
    pub fn pkg_id(&self) -> Option<PkgId> {
        self.pkg_path.as_deref().map(PkgId::from_pkg_path)
    }
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pkg_path {
            Some(path) => write!(f, "{path}"),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Checks a call's form against the callee's declaration.
pub fn check_call_form(func: &Name, declares_crossing: bool, with_cross: bool) -> Result<(), RealmError> {
    match (declares_crossing, with_cross) {
        (true, false) => Err(RealmError::CrossingRequired { func: func.clone() }),
        (false, true) => Err(RealmError::NotCrossing { func: func.clone() }),
        _ => Ok(()),
    }
}

/// Realms entered by crossing calls, origin first.
#[derive(Clone, Debug)]
pub struct RealmStack {
    frames: Vec<Realm>,
}

impl RealmStack {
    pub fn new(origin: Realm) -> Self {
        Self { frames: vec![origin] }
    }

    pub fn current(&self) -> &Realm {
        // The origin is never popped.
        &self.frames[self.frames.len() - 1]
    }

    pub fn previous(&self) -> Result<&Realm, RealmError> {
        let n = self.frames.len();
        if n < 2 {
            return Err(RealmError::NoPreviousRealm);
        }
        Ok(&self.frames[n - 2])
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Enters the realm of `pkg_path` for a crossing call.
    pub fn cross_into(&mut self, pkg_path: &str) -> Result<(), RealmError> {
        if !is_realm_path(pkg_path) {
            return Err(RealmError::NotARealm(pkg_path.to_string()));
        }
        self.frames.push(Realm::code(pkg_path));
        Ok(())
    }

    /// Leaves the innermost crossing frame. The origin stays.
    pub fn exit(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Rejects a write to an object not owned by the current realm.
    pub fn check_mutation(&self, object: &ObjectId) -> Result<(), RealmError> {
        let current = self.current();
        if current.pkg_id() == Some(object.pkg_id) {
            return Ok(());
        }
        Err(RealmError::UnauthorizedMutation {
            object: *object,
            owner: object.pkg_id,
            realm: current.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNTER: &str = "gno.land/r/demo/counter";
    const WALLET: &str = "gno.land/r/demo/wallet";

    #[test]
    fn current_and_previous_follow_crossings() {
        let alice = Realm::user(Address::from_seed("alice"));
        let mut stack = RealmStack::new(alice.clone());
        assert_eq!(stack.current(), &alice);
        assert_eq!(stack.previous(), Err(RealmError::NoPreviousRealm));

        stack.cross_into(COUNTER).unwrap();
        assert_eq!(stack.current().address, Address::from_pkg_path(COUNTER));
        assert_eq!(stack.previous().unwrap(), &alice);

        stack.cross_into(WALLET).unwrap();
        assert_eq!(stack.current().pkg_path.as_deref(), Some(WALLET));
        assert_eq!(stack.previous().unwrap().pkg_path.as_deref(), Some(COUNTER));

        stack.exit();
        stack.exit();
        stack.exit();
        assert_eq!(stack.current(), &alice);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn only_realm_packages_can_be_entered() {
        let mut stack = RealmStack::new(Realm::user(Address::from_seed("bob")));
        assert_eq!(
            stack.cross_into("gno.land/p/demo/avl"),
            Err(RealmError::NotARealm("gno.land/p/demo/avl".into()))
        );
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn mutation_requires_owning_realm() {
        let object = ObjectId::new(PkgId::from_pkg_path(COUNTER), 3);
        let mut stack = RealmStack::new(Realm::user(Address::from_seed("carol")));
        assert!(matches!(
            stack.check_mutation(&object),
            Err(RealmError::UnauthorizedMutation { .. })
        ));
        stack.cross_into(WALLET).unwrap();
        assert!(stack.check_mutation(&object).is_err());
        stack.cross_into(COUNTER).unwrap();
        assert_eq!(stack.check_mutation(&object), Ok(()));
    }

    #[test]
    fn call_form_must_match_declaration() {
        let f = Name::from("Inc");
        assert!(check_call_form(&f, true, true).is_ok());
        assert!(check_call_form(&f, false, false).is_ok());
        assert_eq!(
            check_call_form(&f, true, false),
            Err(RealmError::CrossingRequired { func: f.clone() })
        );
        assert_eq!(check_call_form(&f, false, true), Err(RealmError::NotCrossing { func: f }));
    }
}
