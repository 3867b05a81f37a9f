//! Per-run execution state.

use std::cell::RefCell;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::accounts::AccountsManager;
use crate::config::{Config, EnvProvider, ProcessEnv};
use crate::error::OpsResult;
use crate::ledger::{FinalityPolicy, LedgerGateway};
use crate::scenario::ScenarioStore;
use crate::smart_value::Resolver;

/// Everything steps read from and write to during a run.
///
/// One context is built per run and passed explicitly to every step and
/// check; there is no process-wide state.
pub struct ExecutionContext {
    config: Config,
    store: ScenarioStore,
    gateway: Arc<dyn LedgerGateway>,
    env: Box<dyn EnvProvider>,
    accounts: AccountsManager,
    rng: RefCell<StdRng>,
    finality: FinalityPolicy,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("network", &self.config.network())
            .field("store", &self.store)
            .field("accounts", &self.accounts)
            .field("finality", &self.finality)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Creates a context reading the process environment, with finality
    /// settings taken from the configuration and an entropy-seeded
    /// formula generator.
    ///
    /// # Errors
    ///
    /// Returns a resolution error if the timing options are malformed.
    pub fn new(config: Config, store: ScenarioStore, gateway: Arc<dyn LedgerGateway>) -> OpsResult<Self> {
        let finality = FinalityPolicy::from_config(&config)?;
        Ok(Self {
            config,
            store,
            gateway,
            env: Box::new(ProcessEnv),
            accounts: AccountsManager::new(),
            rng: RefCell::new(StdRng::from_entropy()),
            finality,
        })
    }

    /// Replaces the environment provider.
    #[must_use]
    pub fn with_env(mut self, env: impl EnvProvider + 'static) -> Self {
        self.env = Box::new(env);
        self
    }

    /// Seeds the formula generator.
    #[must_use]
    pub fn with_seed(self, seed: u64) -> Self {
        self.reseed(seed);
        self
    }

    /// Overrides the finality policy.
    #[must_use]
    pub const fn with_finality(mut self, finality: FinalityPolicy) -> Self {
        self.finality = finality;
        self
    }

    /// Reseeds the formula generator.
    pub fn reseed(&self, seed: u64) {
        *self.rng.borrow_mut() = StdRng::seed_from_u64(seed);
    }

    /// Resolver over the current state; `%` lookups need a loaded scenario.
    #[must_use]
    pub fn resolver(&self) -> Resolver<'_> {
        let resolver = Resolver::new(&self.config, self.env.as_ref(), &self.rng);
        match self.store.scenario() {
            Ok(scenario) => resolver.with_scenario(scenario),
            Err(_) => resolver,
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Active network name.
    #[must_use]
    pub fn network(&self) -> &str {
        self.config.network()
    }

    /// The scenario store.
    #[must_use]
    pub const fn store(&self) -> &ScenarioStore {
        &self.store
    }

    /// The scenario store, mutably.
    pub fn store_mut(&mut self) -> &mut ScenarioStore {
        &mut self.store
    }

    /// The ledger gateway.
    #[must_use]
    pub fn gateway(&self) -> &dyn LedgerGateway {
        self.gateway.as_ref()
    }

    /// Signing accounts.
    #[must_use]
    pub const fn accounts(&self) -> &AccountsManager {
        &self.accounts
    }

    /// Signing accounts, mutably.
    pub fn accounts_mut(&mut self) -> &mut AccountsManager {
        &mut self.accounts
    }

    /// Reserves the next nonce of a signing account, syncing it from the
    /// gateway on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the account is unknown or the gateway fails.
    pub fn next_nonce(&mut self, designation: &str) -> OpsResult<u64> {
        self.accounts
            .get_nonce_then_increment(designation, self.gateway.as_ref())
    }

    /// Finality settings used by transaction steps.
    #[must_use]
    pub const fn finality(&self) -> &FinalityPolicy {
        &self.finality
    }

    /// Consumes the context and returns the store.
    #[must_use]
    pub fn into_store(self) -> ScenarioStore {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapEnv;
    use crate::ledger::MemoryLedger;
    use crate::smart_value::{IntKind, SmartValue, StrKind};
    use crate::value::Value;

    fn context(root: &std::path::Path) -> ExecutionContext {
        let config = Config::builtin("devnet").unwrap();
        let store = ScenarioStore::open(root, "devnet").unwrap();
        ExecutionContext::new(config, store, Arc::new(MemoryLedger::new()))
            .unwrap()
            .with_env(MapEnv::new().with("HOME", "foo"))
    }

    #[test]
    fn test_resolver_sees_loaded_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        assert!(SmartValue::<StrKind>::resolve("%{suffix}", &ctx.resolver()).is_err());

        ctx.store_mut().create("demo", false).unwrap();
        ctx.store_mut().set_value("suffix", Value::from("bar")).unwrap();
        let text = SmartValue::<StrKind>::resolve("${HOME}_%{suffix}", &ctx.resolver()).unwrap();
        assert_eq!(text, "foo_bar");
    }

    #[test]
    fn test_reseed_makes_formulas_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).with_seed(42);
        let first = SmartValue::<IntKind>::resolve("={randint(0, 1000000)}", &ctx.resolver()).unwrap();
        ctx.reseed(42);
        let second = SmartValue::<IntKind>::resolve("={randint(0, 1000000)}", &ctx.resolver()).unwrap();
        assert_eq!(first, second);
    }
}
