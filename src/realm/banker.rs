//! Native coin balances, kept per address in the backing store.

use super::{RealmError, RealmStack};
use crate::machine::VmError;
use crate::object::{StoreError, keys};
use crate::storage::KvStore;
use crate::types::address::Address;
use crate::types::encoding::{Decode, Encode};

pub struct Banker<'a> {
    kv: &'a mut dyn KvStore,
}

impl<'a> Banker<'a> {
    pub fn new(kv: &'a mut dyn KvStore) -> Self {
        Self { kv }
    }

    pub fn balance(&self, address: &Address) -> Result<u64, StoreError> {
        match self.kv.get(&keys::balance(address)) {
            Some(bytes) => Ok(u64::from_bytes(&bytes)?),
            None => Ok(0),
        }
    }

    pub fn set_balance(&mut self, address: &Address, amount: u64) {
        if amount == 0 {
            self.kv.delete(&keys::balance(address));
        } else {
            self.kv.put(&keys::balance(address), amount.to_bytes());
        }
    }

    /// Moves `amount` from `from` to `to`. Only the current realm may spend
    /// its own coins.
    pub fn send_coins(&mut self, realms: &RealmStack, from: &Address, to: &Address, amount: i64) -> Result<(), VmError> {
        let current = realms.current().address;
        if *from != current {
            return Err(RealmError::UnauthorizedSpend { from: *from, realm: current }.into());
        }
        let amount = u64::try_from(amount).map_err(|_| RealmError::InvalidAmount(amount))?;
        let balance = self.balance(from)?;
        if balance < amount {
            return Err(RealmError::InsufficientFunds {
                address: *from,
                balance,
                amount,
            }
            .into());
        }
        if from == to {
            return Ok(());
        }
        let credited = self
            .balance(to)?
            .checked_add(amount)
            .ok_or(RealmError::BalanceOverflow(*to))?;
        self.set_balance(from, balance - amount);
        self.set_balance(to, credited);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realm::Realm;
    use crate::storage::{MemStore, Overlay};

    const BANK: &str = "gno.land/r/demo/bank";

    #[test]
    fn current_realm_can_spend_its_coins() {
        let base = MemStore::new();
        let mut overlay = Overlay::new(&base);
        let mut banker = Banker::new(&mut overlay);
        let bank = Address::from_pkg_path(BANK);
        let alice = Address::from_seed("alice");
        banker.set_balance(&bank, 100);

        let mut realms = RealmStack::new(Realm::user(alice));
        realms.cross_into(BANK).unwrap();
        banker.send_coins(&realms, &bank, &alice, 40).unwrap();
        assert_eq!(banker.balance(&bank).unwrap(), 60);
        assert_eq!(banker.balance(&alice).unwrap(), 40);
    }

    #[test]
    fn spending_another_realms_coins_is_rejected() {
        let base = MemStore::new();
        let mut overlay = Overlay::new(&base);
        let mut banker = Banker::new(&mut overlay);
        let bank = Address::from_pkg_path(BANK);
        let mallory = Address::from_seed("mallory");
        banker.set_balance(&bank, 100);

        let realms = RealmStack::new(Realm::user(mallory));
        let err = banker.send_coins(&realms, &bank, &mallory, 10).unwrap_err();
        assert!(matches!(err, VmError::Realm(RealmError::UnauthorizedSpend { .. })));
        assert_eq!(banker.balance(&bank).unwrap(), 100);
    }

    #[test]
    fn overdraft_and_negative_amounts_are_rejected() {
        let base = MemStore::new();
        let mut overlay = Overlay::new(&base);
        let mut banker = Banker::new(&mut overlay);
        let alice = Address::from_seed("alice");
        let bob = Address::from_seed("bob");
        banker.set_balance(&alice, 5);
        let realms = RealmStack::new(Realm::user(alice));

        assert!(matches!(
            banker.send_coins(&realms, &alice, &bob, 6),
            Err(VmError::Realm(RealmError::InsufficientFunds { balance: 5, amount: 6, .. }))
        ));
        assert!(matches!(
            banker.send_coins(&realms, &alice, &bob, -1),
            Err(VmError::Realm(RealmError::InvalidAmount(-1)))
        ));
        assert_eq!(banker.balance(&bob).unwrap(), 0);
    }
}
