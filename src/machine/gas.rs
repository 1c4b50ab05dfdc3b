use super::errors::VmError;

/// Number of gas categories tracked by [`GasProfile`].
const GAS_CATEGORY_COUNT: usize = 8;

/// Categories of gas consumption for profiling and debugging.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum GasCategory {
    /// Flat cost of every transaction.
    Intrinsic = 0,
    /// Package deployment, per program-tree node.
    Deploy = 1,
    /// One evaluation step (expression or statement).
    Step = 2,
    /// Loading a persisted object, per byte.
    StoreRead = 3,
    /// Saving an object at finalization, per byte.
    StoreWrite = 4,
    /// Allocating a heap object, per slot.
    Allocation = 5,
    /// Function call overhead.
    Call = 6,
    /// Builtins that touch realm or bank state.
    Builtin = 7,
}

impl GasCategory {
    pub const fn as_str(&self) -> &'static str {
        match self {
            GasCategory::Intrinsic => "Intrinsic",
            GasCategory::Deploy => "Deployment",
            GasCategory::Step => "Step",
            GasCategory::StoreRead => "Store Read",
            GasCategory::StoreWrite => "Store Write",
            GasCategory::Allocation => "Allocation",
            GasCategory::Call => "Call",
            GasCategory::Builtin => "Builtin",
        }
    }

    /// All categories in discriminant order.
    const ALL: [GasCategory; GAS_CATEGORY_COUNT] = [
        GasCategory::Intrinsic,
        GasCategory::Deploy,
        GasCategory::Step,
        GasCategory::StoreRead,
        GasCategory::StoreWrite,
        GasCategory::Allocation,
        GasCategory::Call,
        GasCategory::Builtin,
    ];
}

/// Unit price of each category.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GasSchedule {
    pub intrinsic: u64,
    pub deploy_per_node: u64,
    pub step: u64,
    pub read_per_byte: u64,
    pub write_per_byte: u64,
    pub alloc_per_slot: u64,
    pub call: u64,
    pub builtin: u64,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            intrinsic: 1_000,
            deploy_per_node: 10,
            step: 1,
            read_per_byte: 1,
            write_per_byte: 3,
            alloc_per_slot: 2,
            call: 10,
            builtin: 50,
        }
    }
}

/// Gas consumption profile for debugging and optimization.
///
/// Backed by a flat array indexed by [`GasCategory`] discriminant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GasProfile {
    counts: [u64; GAS_CATEGORY_COUNT],
}

impl GasProfile {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn add(&mut self, category: GasCategory, amount: u64) {
        let slot = &mut self.counts[category as usize];
        *slot = slot.saturating_add(amount);
    }

    pub fn total(&self) -> u64 {
        self.counts
            .iter()
            .fold(0u64, |acc, &v| acc.saturating_add(v))
    }

    pub fn get(&self, category: GasCategory) -> u64 {
        self.counts[category as usize]
    }

    /// Iterates over all categories and their gas costs.
    pub fn iter(&self) -> impl Iterator<Item = (GasCategory, u64)> {
        GasCategory::ALL.into_iter().zip(self.counts)
    }
}

/// Maximum cumulative gas allowed for all transactions in a block.
pub const BLOCK_GAS_LIMIT: u64 = 30_000_000;

/// Per-transaction gas accounting.
///
/// Exhaustion is the transaction's cancellation signal: once a charge
/// fails, every later charge fails too and the transaction unwinds.
#[derive(Clone, Debug)]
pub struct GasMeter {
    limit: u64,
    used: u64,
    schedule: GasSchedule,
    profile: GasProfile,
}

impl GasMeter {
    pub fn new(limit: u64, schedule: GasSchedule) -> Self {
        Self {
            limit,
            used: 0,
            schedule,
            profile: GasProfile::new(),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    pub fn profile(&self) -> &GasProfile {
        &self.profile
    }

    pub fn schedule(&self) -> &GasSchedule {
        &self.schedule
    }

    /// Charges `amount` units to `category`.
    pub fn charge(&mut self, category: GasCategory, amount: u64) -> Result<(), VmError> {
        let next = self.used.saturating_add(amount);
        if next > self.limit {
            self.used = self.limit;
            return Err(VmError::OutOfGas {
                used: next,
                limit: self.limit,
            });
        }
        self.used = next;
        self.profile.add(category, amount);
        Ok(())
    }

    /// Charges `units` times the scheduled price of `category`.
    pub fn charge_units(&mut self, category: GasCategory, units: u64) -> Result<(), VmError> {
        let price = match category {
            GasCategory::Intrinsic => self.schedule.intrinsic,
            GasCategory::Deploy => self.schedule.deploy_per_node,
            GasCategory::Step => self.schedule.step,
            GasCategory::StoreRead => self.schedule.read_per_byte,
            GasCategory::StoreWrite => self.schedule.write_per_byte,
            GasCategory::Allocation => self.schedule.alloc_per_slot,
            GasCategory::Call => self.schedule.call,
            GasCategory::Builtin => self.schedule.builtin,
        };
        self.charge(category, price.saturating_mul(units))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_accumulates_per_category() {
        let mut p = GasProfile::new();
        p.add(GasCategory::Step, 5);
        p.add(GasCategory::Step, 7);
        p.add(GasCategory::StoreWrite, 30);
        assert_eq!(p.get(GasCategory::Step), 12);
        assert_eq!(p.total(), 42);
        let nonzero: Vec<_> = p.iter().filter(|(_, v)| *v > 0).map(|(c, _)| c).collect();
        assert_eq!(nonzero, vec![GasCategory::Step, GasCategory::StoreWrite]);
    }

    #[test]
    fn meter_stops_at_limit() {
        let mut m = GasMeter::new(100, GasSchedule::default());
        m.charge(GasCategory::Step, 60).unwrap();
        let err = m.charge(GasCategory::Step, 50).unwrap_err();
        assert!(matches!(err, VmError::OutOfGas { used: 110, limit: 100 }));
        assert_eq!(m.used(), 100);
        assert!(m.charge(GasCategory::Step, 1).is_err());
    }

    #[test]
    fn charge_units_uses_schedule() {
        let mut m = GasMeter::new(1_000, GasSchedule::default());
        m.charge_units(GasCategory::StoreWrite, 10).unwrap();
        assert_eq!(m.used(), 30);
        assert_eq!(m.profile().get(GasCategory::StoreWrite), 30);
    }
}
