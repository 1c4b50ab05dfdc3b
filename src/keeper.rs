//! Transaction boundary.
//!
//! Every message runs against its own [`Overlay`] on top of the shared
//! backing store. A successful transaction finalizes the object store and
//! hands all of its writes to the backing store in one batch; a failed one
//! drops the overlay, leaving the store exactly as it was.

use crate::ast::{Name, ProgramTree};
use crate::config::VmConfig;
use crate::machine::{GasCategory, GasMeter, Machine, VmError};
use crate::object::{ObjectStore, StoreError, Value, keys};
use crate::preprocess::{CompiledPackage, PackageGetter, PreprocessOptions, preprocess};
use crate::realm::{Banker, Realm};
use crate::storage::{BackingStore, KvStore, Overlay};
use crate::types::address::Address;
use crate::types::encoding::{Decode, Encode};
use crate::{debug, info, warn};
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Argument of a [`CallMsg`]. Only primitive values cross the transaction
/// boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Primitive {
    Int(i64),
    String(String),
    Bool(bool),
}

impl From<Primitive> for Value {
    fn from(p: Primitive) -> Self {
        match p {
            Primitive::Int(n) => Value::Int(n),
            Primitive::String(s) => Value::String(s),
            Primitive::Bool(b) => Value::Bool(b),
        }
    }
}

/// A call of an exported top-level function.
#[derive(Clone, Debug)]
pub struct CallMsg {
    pub caller: Address,
    pub pkg_path: String,
    pub func: String,
    pub args: Vec<Primitive>,
    /// Calls in crossing form, `cross(fn)(args)`.
    pub cross: bool,
}

impl CallMsg {
    pub fn new(caller: Address, pkg_path: &str, func: &str) -> Self {
        Self {
            caller,
            pkg_path: pkg_path.to_string(),
            func: func.to_string(),
            args: Vec::new(),
            cross: false,
        }
    }

    pub fn with_args(mut self, args: Vec<Primitive>) -> Self {
        self.args = args;
        self
    }

    pub fn crossing(mut self) -> Self {
        self.cross = true;
        self
    }
}

/// Outcome of one transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub success: bool,
    pub gas_used: u64,
    /// Rendered return values.
    pub results: Vec<String>,
    pub error: Option<VmError>,
}

impl Receipt {
    fn ok(gas_used: u64, results: Vec<String>) -> Self {
        Self {
            success: true,
            gas_used,
            results,
            error: None,
        }
    }

    fn failed(gas_used: u64, error: VmError) -> Self {
        Self {
            success: false,
            gas_used,
            results: Vec::new(),
            error: Some(error),
        }
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            None => write!(f, "ok gas={} results=[{}]", self.gas_used, self.results.join(", ")),
            Some(e) => write!(f, "failed gas={}: {e}", self.gas_used),
        }
    }
}

/// Optimistic attempts before a transaction runs with commits held off.
const COMMIT_ATTEMPTS: usize = 4;

/// Runs transactions against a shared backing store.
///
/// Transactions execute concurrently on their own overlays. A commit takes
/// the commit lock and first checks that every value the transaction read
/// is still current; if not, the transaction is run again on a fresh
/// overlay. After [`COMMIT_ATTEMPTS`] conflicts it runs while holding the
/// lock, so it always completes.
///
/// Preprocessed packages are cached across transactions; a package enters
/// the cache only once its deployment has committed.
pub struct Keeper<S: BackingStore> {
    store: S,
    packages: DashMap<String, Arc<CompiledPackage>>,
    commits: Mutex<()>,
    config: VmConfig,
}

impl<S: BackingStore> Keeper<S> {
    pub fn new(store: S, config: VmConfig) -> Self {
        Self {
            store,
            packages: DashMap::new(),
            commits: Mutex::new(()),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Number of preprocessed packages held in memory.
    pub fn cached_packages(&self) -> usize {
        self.packages.len()
    }

    fn meter(&self) -> GasMeter {
        GasMeter::new(self.config.max_gas_per_tx, self.config.gas.clone())
    }

    fn lock_commits(&self) -> MutexGuard<'_, ()> {
        self.commits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deploys a package: preprocesses it, instantiates its declarations,
    /// runs `init` and persists the result with `creator` as the origin.
    pub fn add_package(&self, creator: &Address, tree: ProgramTree) -> Receipt {
        let pkg_path = tree.pkg_path.clone();
        let mut gas = self.meter();
        let pkg = match self.prepare(&mut gas, tree) {
            Ok(pkg) => Arc::new(pkg),
            Err(e) => return self.discard("add_package", &pkg_path, gas.used(), e),
        };

        let code = pkg.to_bytes();
        let code_key = keys::package_code(&pkg_path);
        let (gas, outcome) = self.commit_with(&pkg_path, |overlay| {
            // Read through the overlay so a concurrent deployment conflicts.
            if overlay.get(&code_key).is_some() {
                return (gas.clone(), Err(VmError::PackageExists(pkg_path.clone())));
            }
            let (mut gas, outcome) = self.execute(overlay, Realm::user(*creator), gas.clone(), |m| {
                m.instantiate(pkg.clone())?;
                Ok(Vec::new())
            });
            let outcome = outcome.and_then(|results| {
                gas.charge_units(GasCategory::StoreWrite, code.len() as u64)?;
                overlay.put(&code_key, code.clone());
                Ok(results)
            });
            (gas, outcome)
        });
        match outcome {
            Ok((results, writes)) => {
                self.packages.insert(pkg_path.clone(), pkg);
                info!(
                    "deployed {} by {}: gas={} writes={}",
                    pkg_path,
                    creator,
                    gas.used(),
                    writes
                );
                Receipt::ok(gas.used(), results)
            }
            Err(e) => self.discard("add_package", &pkg_path, gas.used(), e),
        }
    }

    fn prepare(&self, gas: &mut GasMeter, tree: ProgramTree) -> Result<CompiledPackage, VmError> {
        gas.charge_units(GasCategory::Intrinsic, 1)?;
        gas.charge_units(GasCategory::Deploy, tree.len() as u64)?;
        if self.get_package(&tree.pkg_path).is_some() {
            return Err(VmError::PackageExists(tree.pkg_path));
        }
        Ok(preprocess(tree, self, PreprocessOptions::default())?)
    }

    /// Runs an exported function and commits its effects.
    pub fn call(&self, msg: CallMsg) -> Receipt {
        self.run_call(msg, true)
    }

    /// Runs an exported function and discards its effects.
    pub fn query(&self, msg: CallMsg) -> Receipt {
        self.run_call(msg, false)
    }

    fn run_call<'s>(&'s self, msg: CallMsg, commit: bool) -> Receipt {
        let op = if commit { "call" } else { "query" };
        let target = format!("{}.{}", msg.pkg_path, msg.func);
        let mut gas = self.meter();
        if let Err(e) = gas.charge_units(GasCategory::Intrinsic, 1) {
            return self.discard(op, &target, gas.used(), e);
        }
        let func = Name::from(msg.func.as_str());
        if !func.is_exported() {
            let e = VmError::InvalidCall {
                reason: format!("{func} is not exported"),
            };
            return self.discard(op, &target, gas.used(), e);
        }

        let args: Vec<Value> = msg.args.into_iter().map(Value::from).collect();
        let run = |overlay: &mut Overlay<'s>| {
            self.execute(overlay, Realm::user(msg.caller), gas.clone(), |m| {
                let values = m.call_function(&msg.pkg_path, &func, args.clone(), msg.cross)?;
                values.iter().map(|v| m.render(v)).collect()
            })
        };
        if !commit {
            let mut overlay = Overlay::new(&self.store);
            let (gas, outcome) = run(&mut overlay);
            return match outcome {
                Ok(results) => {
                    debug!("query {}: gas={} discarded={}", target, gas.used(), overlay.len());
                    Receipt::ok(gas.used(), results)
                }
                Err(e) => self.discard(op, &target, gas.used(), e),
            };
        }
        let (gas, outcome) = self.commit_with(&target, run);
        match outcome {
            Ok((results, writes)) => {
                info!("{} by {}: gas={} writes={}", target, msg.caller, gas.used(), writes);
                Receipt::ok(gas.used(), results)
            }
            Err(e) => self.discard(op, &target, gas.used(), e),
        }
    }

    /// Runs `run` on fresh overlays until its writes commit without a
    /// conflict, and returns its results with the number of keys written.
    /// A failed run is returned as is and nothing is committed.
    fn commit_with<'s, F>(&'s self, target: &str, mut run: F) -> (GasMeter, Result<(Vec<String>, usize), VmError>)
    where
        F: FnMut(&mut Overlay<'s>) -> (GasMeter, Result<Vec<String>, VmError>),
    {
        for attempt in 1..=COMMIT_ATTEMPTS {
            let mut overlay = Overlay::new(&self.store);
            let (gas, outcome) = run(&mut overlay);
            let results = match outcome {
                Ok(results) => results,
                Err(e) => return (gas, Err(e)),
            };
            let _guard = self.lock_commits();
            match overlay.first_conflict() {
                None => {
                    let writes = overlay.commit();
                    return (gas, Ok((results, writes)));
                }
                Some(key) => debug!(
                    "{} conflicted on attempt {} ({} reads, key {:02x?})",
                    target,
                    attempt,
                    overlay.reads(),
                    key
                ),
            }
        }

        warn!("{} retried {} times, running with commits held", target, COMMIT_ATTEMPTS);
        let _guard = self.lock_commits();
        let mut overlay = Overlay::new(&self.store);
        let (gas, outcome) = run(&mut overlay);
        (gas, outcome.map(|results| (results, overlay.commit())))
    }

    /// Runs `body` on a fresh machine, then finalizes the object store and
    /// charges for what it wrote. The overlay holds every write on success.
    fn execute<'s, F>(
        &'s self,
        overlay: &mut Overlay<'s>,
        origin: Realm,
        gas: GasMeter,
        body: F,
    ) -> (GasMeter, Result<Vec<String>, VmError>)
    where
        F: FnOnce(&mut Machine<'_, '_>) -> Result<Vec<String>, VmError>,
    {
        let mut objects = ObjectStore::new(overlay);
        let mut machine = Machine::new(&mut objects, self, origin, gas, self.config.max_call_depth);
        let result = body(&mut machine);
        let mut gas = machine.into_gas();
        let outcome = result.and_then(|results| {
            let stats = objects.finalize()?;
            gas.charge_units(GasCategory::StoreWrite, stats.bytes_written)?;
            debug!(
                "finalized: saved={} deleted={} bytes={}",
                stats.saved, stats.deleted, stats.bytes_written
            );
            Ok(results)
        });
        (gas, outcome)
    }

    fn discard(&self, op: &str, target: &str, gas_used: u64, error: VmError) -> Receipt {
        warn!("{} {} discarded ({:?}): {}", op, target, error.class(), error);
        Receipt::failed(gas_used, error)
    }

    /// Credits an address outside of any transaction, as genesis does.
    pub fn set_balance(&self, address: &Address, amount: u64) {
        let mut overlay = Overlay::new(&self.store);
        Banker::new(&mut overlay).set_balance(address, amount);
        let _guard = self.lock_commits();
        overlay.commit();
    }

    pub fn balance(&self, address: &Address) -> Result<u64, StoreError> {
        let mut overlay = Overlay::new(&self.store);
        Banker::new(&mut overlay).balance(address)
    }
}

impl<S: BackingStore> PackageGetter for Keeper<S> {
    fn get_package(&self, pkg_path: &str) -> Option<Arc<CompiledPackage>> {
        if let Some(pkg) = self.packages.get(pkg_path) {
            return Some(pkg.clone());
        }
        let bytes = self.store.get(&keys::package_code(pkg_path))?;
        match CompiledPackage::from_bytes(&bytes) {
            Ok(pkg) => {
                let pkg = Arc::new(pkg);
                self.packages.insert(pkg_path.to_string(), pkg.clone());
                Some(pkg)
            }
            Err(e) => {
                warn!("package {} has corrupt code: {}", pkg_path, e);
                None
            }
        }
    }
}
