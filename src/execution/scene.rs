//! Scene loading and execution.
//!
//! A scene is a YAML document listing the networks and scenarios it may
//! run on, the accounts and external contracts it needs and an ordered
//! list of steps:
//!
//! ```yaml
//! allowed_networks: [devnet, localnet]
//! allowed_scenario: ["integration_.*"]
//! accounts:
//!   - account_name: owner
//!     pem_path: ./wallets/owner.pem
//! external_contracts:
//!   router: erd1qqqqqqqqqqqqqpgq...
//! steps:
//!   - type: ContractDeploy
//!     sender: owner
//!     ...
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, info};
use serde::Deserialize;

use super::cached_regex;
use super::context::ExecutionContext;
use super::registry::build_step;
use super::steps::{run_step, Step};
use crate::address::Address;
use crate::error::{DataError, OpsResult, StepError};
use crate::scenario::EntityData;
use crate::value::{Value, ValueMap};

/// Networks a scene may run on when it does not say otherwise.
pub const DEFAULT_ALLOWED_NETWORKS: [&str; 4] = ["devnet", "testnet", "localnet", "chain-simulator"];

fn default_networks() -> Vec<String> {
    DEFAULT_ALLOWED_NETWORKS.iter().map(|n| (*n).to_string()).collect()
}

fn default_scenarios() -> Vec<String> {
    vec![".*".to_string()]
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SceneDocument {
    #[serde(default = "default_networks")]
    allowed_networks: Vec<String>,
    #[serde(default = "default_scenarios")]
    allowed_scenario: Vec<String>,
    #[serde(default)]
    accounts: Vec<ValueMap>,
    #[serde(default)]
    external_contracts: IndexMap<String, String>,
    #[serde(default)]
    steps: Vec<Value>,
}

impl Default for SceneDocument {
    fn default() -> Self {
        Self {
            allowed_networks: default_networks(),
            allowed_scenario: default_scenarios(),
            accounts: Vec::new(),
            external_contracts: IndexMap::new(),
            steps: Vec::new(),
        }
    }
}

/// Where a scene account comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountSource {
    /// A signing account read from a PEM file.
    Pem { name: String, path: PathBuf },
    /// Every PEM file of a directory; the sorted account names are saved
    /// under `name` when given.
    Folder { name: Option<String>, path: PathBuf },
    /// A known address without a key. Contract addresses are imported as
    /// external contracts.
    Address { id: String, address: Address },
}

impl AccountSource {
    fn parse(entry: &ValueMap, scene: &Path) -> OpsResult<Self> {
        let invalid = |reason: String| StepError::InvalidScene {
            path: scene.display().to_string(),
            reason,
        };
        let text = |keys: &[&str]| keys.iter().find_map(|k| entry.get(*k).and_then(Value::as_str).map(str::to_string));

        if entry.contains_key("ledger_indices") || entry.contains_key("ledger_index") {
            return Err(invalid("hardware wallet accounts are not supported".to_string()).into());
        }
        if let Some(path) = text(&["folder_path"]) {
            return Ok(Self::Folder {
                name: text(&["name"]),
                path: PathBuf::from(path),
            });
        }
        if let Some(path) = text(&["pem_path"]) {
            let name = text(&["account_name", "account_id"])
                .ok_or_else(|| invalid(format!("account {} is missing 'account_name'", Value::Map(entry.clone()))))?;
            return Ok(Self::Pem {
                name,
                path: PathBuf::from(path),
            });
        }
        let id = text(&["account_id", "contract_id", "account_name"])
            .ok_or_else(|| invalid(format!("account {} is missing 'account_id'", Value::Map(entry.clone()))))?;
        let bech32 = text(&["address", "bech32"])
            .ok_or_else(|| invalid(format!("account {id} is missing 'address'")))?;
        Ok(Self::Address {
            id,
            address: Address::from_bech32(&bech32)?,
        })
    }
}

/// A loaded scene, ready to run.
///
/// Steps are built when the scene is loaded, so definition errors surface
/// before anything is written.
#[derive(Debug, Clone)]
pub struct Scene {
    path: PathBuf,
    allowed_networks: Vec<String>,
    allowed_scenario: Vec<String>,
    accounts: Vec<AccountSource>,
    external_contracts: Vec<(String, Address)>,
    steps: Vec<Step>,
}

impl Scene {
    /// Reads a scene file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error, `InvalidScene` for a malformed document and
    /// step definition errors.
    pub fn load(path: &Path) -> OpsResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| DataError::io(path, &e))?;
        Self::from_yaml_str(&text, path)
    }

    /// Parses a scene document; `path` is only used in messages.
    ///
    /// # Errors
    ///
    /// Returns `InvalidScene` for a malformed document and step definition
    /// errors.
    pub fn from_yaml_str(text: &str, path: &Path) -> OpsResult<Self> {
        let document: SceneDocument = if text.trim().is_empty() {
            SceneDocument::default()
        } else {
            serde_yaml::from_str(text).map_err(|e| StepError::InvalidScene {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        };

        let accounts = document
            .accounts
            .iter()
            .map(|entry| AccountSource::parse(entry, path))
            .collect::<OpsResult<Vec<_>>>()?;
        let external_contracts = document
            .external_contracts
            .into_iter()
            .map(|(id, bech32)| Ok((id, Address::from_bech32(&bech32)?)))
            .collect::<OpsResult<Vec<_>>>()?;
        let mut steps = Vec::with_capacity(document.steps.len());
        for definition in document.steps {
            steps.extend(build_step(definition)?);
        }

        Ok(Self {
            path: path.to_path_buf(),
            allowed_networks: document.allowed_networks,
            allowed_scenario: document.allowed_scenario,
            accounts,
            external_contracts,
            steps,
        })
    }

    /// Scene file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The built steps, skipped ones excluded.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Checks the allow-lists against a network and a scenario name.
    ///
    /// Scenario patterns are anchored at the start of the name.
    ///
    /// # Errors
    ///
    /// Returns `NetworkNotAllowed`, `ScenarioNotAllowed`, or a parsing error
    /// for an invalid pattern.
    pub fn check_allowed(&self, network: &str, scenario: &str) -> OpsResult<()> {
        let scene = self.path.display().to_string();
        if !self.allowed_networks.iter().any(|n| n.eq_ignore_ascii_case(network)) {
            return Err(StepError::NetworkNotAllowed {
                network: network.to_string(),
                scene,
            }
            .into());
        }
        for pattern in &self.allowed_scenario {
            if cached_regex(&format!("^(?:{pattern})"))?.is_match(scenario) {
                return Ok(());
            }
        }
        Err(StepError::ScenarioNotAllowed {
            scenario: scenario.to_string(),
            scene,
        }
        .into())
    }

    /// Runs the scene against the loaded scenario.
    ///
    /// # Errors
    ///
    /// Returns allow-list errors before any change is made, then the first
    /// error raised by an account, a contract import or a step.
    pub fn execute(&self, ctx: &mut ExecutionContext) -> OpsResult<()> {
        let scenario = ctx.store().scenario()?.name.clone();
        self.check_allowed(ctx.network(), &scenario)?;
        info!("executing scene {} in scenario {scenario}", self.path.display());

        for account in &self.accounts {
            register_account(ctx, account)?;
        }
        for (id, address) in &self.external_contracts {
            if ctx.store_mut().upsert_external_entity(id, *address)? {
                debug!("imported external contract {id} at {address}");
            }
        }

        let mut steps = self.steps.clone();
        for step in &mut steps {
            run_step(step, ctx)?;
        }
        Ok(())
    }
}

fn register_account(ctx: &mut ExecutionContext, account: &AccountSource) -> OpsResult<()> {
    match account {
        AccountSource::Pem { name, path } => {
            let address = ctx.accounts_mut().load_pem(path, Some(name))?.address();
            ctx.store_mut().add_entity(EntityData::account(name.clone(), address))?;
        }
        AccountSource::Folder { name, path } => {
            let names = ctx.accounts_mut().load_folder(path)?;
            for account_name in &names {
                let address = ctx.accounts().get(account_name)?.address();
                ctx.store_mut()
                    .add_entity(EntityData::account(account_name.clone(), address))?;
            }
            if let Some(name) = name {
                let listed = names.into_iter().map(Value::from).collect();
                ctx.store_mut().set_value(name, Value::List(listed))?;
            }
        }
        AccountSource::Address { id, address } if address.is_smart_contract() => {
            ctx.store_mut().upsert_external_entity(id, *address)?;
        }
        AccountSource::Address { id, address } => {
            ctx.store_mut().add_entity(EntityData::account(id.clone(), *address))?;
        }
    }
    Ok(())
}

/// Runs a scene file, or every file of a directory in name order.
///
/// # Errors
///
/// Returns the first error of the scenes.
pub fn execute_path(ctx: &mut ExecutionContext, path: &Path) -> OpsResult<()> {
    if !path.is_dir() {
        return Scene::load(path)?.execute(ctx);
    }
    let entries = fs::read_dir(path).map_err(|e| DataError::io(path, &e))?;
    let mut files = Vec::new();
    for entry in entries {
        let file = entry.map_err(|e| DataError::io(path, &e))?.path();
        if file.is_file() {
            files.push(file);
        }
    }
    files.sort();
    info!("executing {} scene(s) from {}", files.len(), path.display());
    for file in files {
        Scene::load(&file)?.execute(ctx)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::error::OpsError;
    use crate::ledger::MemoryLedger;
    use crate::scenario::ScenarioStore;

    fn context(root: &Path, network: &str, scenario: &str) -> ExecutionContext {
        let config = Config::builtin(network).unwrap();
        let mut store = ScenarioStore::open(root, network).unwrap();
        store.create(scenario, false).unwrap();
        ExecutionContext::new(config, store, Arc::new(MemoryLedger::new())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let scene = Scene::from_yaml_str("", Path::new("empty.yaml")).unwrap();
        assert!(scene.check_allowed("devnet", "anything").is_ok());
        assert!(scene.check_allowed("chain-simulator", "anything").is_ok());
        let err = scene.check_allowed("mainnet", "anything").unwrap_err();
        assert!(matches!(err, OpsError::Step(StepError::NetworkNotAllowed { .. })));
    }

    #[test]
    fn test_scenario_patterns_anchor_at_start() {
        let scene = Scene::from_yaml_str("allowed_scenario: ['integration_.*']", Path::new("s.yaml")).unwrap();
        assert!(scene.check_allowed("devnet", "integration_42").is_ok());
        let err = scene.check_allowed("devnet", "my_integration_42").unwrap_err();
        assert!(matches!(err, OpsError::Step(StepError::ScenarioNotAllowed { .. })));
    }

    #[test]
    fn test_disallowed_scene_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), "devnet", "prod_like");
        let scene = Scene::from_yaml_str(
            "allowed_scenario: ['test_.*']
steps:
  - type: SetVars
    variables: {touched: true}",
            Path::new("guarded.yaml"),
        )
        .unwrap();
        assert!(scene.execute(&mut ctx).is_err());
        assert!(ctx.store().get_value("touched").is_err());
    }

    #[test]
    fn test_invalid_documents() {
        let unknown = Scene::from_yaml_str("stepz: []", Path::new("typo.yaml")).unwrap_err();
        assert!(matches!(unknown, OpsError::Step(StepError::InvalidScene { .. })));

        let ledger = Scene::from_yaml_str("accounts: [{account_name: a, ledger_indices: [0]}]", Path::new("l.yaml"))
            .unwrap_err();
        assert!(format!("{ledger}").contains("hardware wallet"));

        let bad_step = Scene::from_yaml_str("steps: [{type: Teleport}]", Path::new("t.yaml")).unwrap_err();
        assert!(matches!(bad_step, OpsError::Step(StepError::UnknownStep { .. })));
    }

    #[test]
    fn test_address_accounts_and_external_contracts() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), "devnet", "imports");
        let user = Address::from_bytes([4; 32]);
        let mut contract_bytes = [5; 32];
        contract_bytes[..8].fill(0);
        let contract = Address::from_bytes(contract_bytes);
        let yaml = format!(
            "accounts:
  - account_id: carol
    address: {}
  - contract_id: pool
    bech32: {}
external_contracts:
  router: {}",
            user.to_bech32(),
            contract.to_bech32(),
            contract.to_bech32()
        );
        let scene = Scene::from_yaml_str(&yaml, Path::new("conflict.yaml")).unwrap();
        let mut conflicting = context(&dir.path().join("other"), "devnet", "conflict");
        let err = scene.execute(&mut conflicting).unwrap_err();
        assert!(matches!(err, OpsError::Data(DataError::AddressConflict { .. })));

        let yaml = format!(
            "accounts:
  - account_id: carol
    address: {}
external_contracts:
  router: {}",
            user.to_bech32(),
            contract.to_bech32()
        );
        let scene = Scene::from_yaml_str(&yaml, Path::new("imports.yaml")).unwrap();
        scene.execute(&mut ctx).unwrap();
        let scenario = ctx.store().scenario().unwrap();
        assert!(matches!(scenario.entity("carol"), Some(EntityData::Account(_))));
        assert!(matches!(scenario.entity("router"), Some(EntityData::ExternalContract(_))));

        // running again keeps the imports and their saved values
        ctx.store_mut().set_value("router.fee", Value::Int(3)).unwrap();
        scene.execute(&mut ctx).unwrap();
        assert_eq!(ctx.store().get_value("router.fee").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_directory_runs_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let scenes = dir.path().join("scenes");
        fs::create_dir(&scenes).unwrap();
        fs::write(scenes.join("02_second.yaml"), "steps: [{type: SetVars, variables: {order: '%{order}b'}}]").unwrap();
        fs::write(scenes.join("01_first.yaml"), "steps: [{type: SetVars, variables: {order: a}}]").unwrap();

        let mut ctx = context(&dir.path().join("data"), "devnet", "ordered");
        execute_path(&mut ctx, &scenes).unwrap();
        assert_eq!(ctx.store().get_value("order").unwrap(), Value::from("ab"));
    }
}
