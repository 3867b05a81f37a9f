//! File-backed scenario store with checkpoints.
//!
//! Layout under the data root:
//!
//! ```text
//! <root>/VERSION
//! <root>/<network>/scenarios/<name>/current/data.json
//! <root>/<network>/scenarios/<name>/checkpoints/<checkpoint>/data.json
//! ```
//!
//! A store holds at most one loaded scenario. Every mutation goes through
//! the store, bumps `last_update_time` and rewrites the current document.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::address::Address;
use crate::config::Config;
use crate::error::{DataError, OpsResult};
use crate::scenario::codec;
use crate::scenario::document::{now_timestamp, Scenario};
use crate::scenario::entity::{EntityData, TokenData};
use crate::scenario::migration::{self, DOCUMENT_FILE};
use crate::value::Value;

const SCENARIOS_DIR: &str = "scenarios";
const CURRENT_DIR: &str = "current";
const CHECKPOINTS_DIR: &str = "checkpoints";

fn validate_name(name: &str) -> OpsResult<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(DataError::InvalidName {
            name: name.to_string(),
        }
        .into())
    }
}

fn list_dirs(dir: &Path) -> OpsResult<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| DataError::io(dir, &e))? {
        let entry = entry.map_err(|e| DataError::io(dir, &e))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Scenario persistence for one network.
#[derive(Debug)]
pub struct ScenarioStore {
    root: PathBuf,
    network: String,
    loaded: Option<Scenario>,
}

impl ScenarioStore {
    /// Opens the data root, migrating it to the latest layout first.
    ///
    /// # Errors
    ///
    /// Returns a data error if the root cannot be created or migrated.
    pub fn open(root: impl Into<PathBuf>, network: impl Into<String>) -> OpsResult<Self> {
        let root = root.into();
        migration::ensure_current(&root)?;
        Ok(Self {
            root,
            network: network.into(),
            loaded: None,
        })
    }

    /// Opens the data root named by `DATA_PATH` for the configured network.
    ///
    /// # Errors
    ///
    /// See [`ScenarioStore::open`].
    pub fn from_config(config: &Config) -> OpsResult<Self> {
        Self::open(config.data_path()?, config.network())
    }

    /// Data root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Network this store reads and writes.
    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }

    fn scenarios_dir(&self) -> PathBuf {
        self.root.join(&self.network).join(SCENARIOS_DIR)
    }

    fn scenario_dir(&self, name: &str) -> PathBuf {
        self.scenarios_dir().join(name)
    }

    fn current_path(&self, name: &str) -> PathBuf {
        self.scenario_dir(name).join(CURRENT_DIR).join(DOCUMENT_FILE)
    }

    fn checkpoint_path(&self, name: &str, checkpoint: &str) -> PathBuf {
        self.scenario_dir(name)
            .join(CHECKPOINTS_DIR)
            .join(checkpoint)
            .join(DOCUMENT_FILE)
    }

    /// Returns true if a current document exists for `name`.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.current_path(name).is_file()
    }

    /// Names of every stored scenario on this network.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be listed.
    pub fn list_scenarios(&self) -> OpsResult<Vec<String>> {
        list_dirs(&self.scenarios_dir())
    }

    /// Names of the checkpoints of a scenario.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be listed.
    pub fn list_checkpoints(&self, name: &str) -> OpsResult<Vec<String>> {
        validate_name(name)?;
        list_dirs(&self.scenario_dir(name).join(CHECKPOINTS_DIR))
    }

    /// Returns true if a scenario is loaded.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn ensure_unloaded(&self) -> OpsResult<()> {
        match &self.loaded {
            Some(s) => Err(DataError::ScenarioAlreadyLoaded { name: s.name.clone() }.into()),
            None => Ok(()),
        }
    }

    /// Creates and loads a new scenario.
    ///
    /// # Errors
    ///
    /// Returns `ScenarioAlreadyLoaded`, or `ScenarioAlreadyExists` when the
    /// name is taken and `overwrite` is false.
    pub fn create(&mut self, name: &str, overwrite: bool) -> OpsResult<()> {
        validate_name(name)?;
        self.ensure_unloaded()?;
        if self.scenario_dir(name).exists() {
            if !overwrite {
                return Err(DataError::ScenarioAlreadyExists {
                    name: name.to_string(),
                    network: self.network.clone(),
                }
                .into());
            }
            self.remove_scenario_dir(name)?;
        }
        let scenario = Scenario::new(name, self.network.clone());
        codec::write_document(&self.current_path(name), &scenario)?;
        info!("created scenario {name} on {}", self.network);
        self.loaded = Some(scenario);
        Ok(())
    }

    /// Loads a scenario's current document, or one of its checkpoints.
    ///
    /// Loading a checkpoint leaves the current document untouched until the
    /// next write.
    ///
    /// # Errors
    ///
    /// Returns `ScenarioAlreadyLoaded`, `UnknownScenario` or
    /// `UnknownCheckpoint`.
    pub fn load(&mut self, name: &str, checkpoint: Option<&str>) -> OpsResult<()> {
        validate_name(name)?;
        self.ensure_unloaded()?;
        if !self.exists(name) {
            return Err(DataError::UnknownScenario {
                name: name.to_string(),
                network: self.network.clone(),
            }
            .into());
        }
        let scenario = match checkpoint {
            None => codec::read_document(&self.current_path(name))?,
            Some(cp) => self.read_checkpoint(name, cp)?,
        };
        debug!("loaded scenario {name} (checkpoint {checkpoint:?})");
        self.loaded = Some(scenario);
        Ok(())
    }

    /// Loads a scenario, creating it when missing.
    ///
    /// # Errors
    ///
    /// See [`ScenarioStore::load`] and [`ScenarioStore::create`].
    pub fn load_or_create(&mut self, name: &str) -> OpsResult<()> {
        if self.exists(name) {
            self.load(name, None)
        } else {
            self.create(name, false)
        }
    }

    /// Releases the loaded scenario.
    pub fn unload(&mut self) -> Option<Scenario> {
        self.loaded.take()
    }

    /// The loaded scenario.
    ///
    /// # Errors
    ///
    /// Returns `UnloadedScenario` if nothing is loaded.
    pub fn scenario(&self) -> OpsResult<&Scenario> {
        self.loaded.as_ref().ok_or_else(|| DataError::UnloadedScenario.into())
    }

    /// Writes the loaded scenario to its current document.
    ///
    /// # Errors
    ///
    /// Returns `UnloadedScenario` or an I/O error.
    pub fn save(&self) -> OpsResult<()> {
        let scenario = self.scenario()?;
        codec::write_document(&self.current_path(&scenario.name), scenario)
    }

    fn mutate<R>(&mut self, f: impl FnOnce(&mut Scenario) -> OpsResult<R>) -> OpsResult<R> {
        let scenario = self.loaded.as_mut().ok_or(DataError::UnloadedScenario)?;
        let result = f(scenario)?;
        self.save()?;
        Ok(result)
    }

    /// Reads a value of the loaded scenario.
    ///
    /// # Errors
    ///
    /// Returns `UnloadedScenario` or `WrongDataKeyPath`.
    pub fn get_value(&self, path: &str) -> OpsResult<Value> {
        self.scenario()?.get_value(path)
    }

    /// Writes a value and persists.
    ///
    /// # Errors
    ///
    /// Returns `UnloadedScenario`, `WrongDataKeyPath` or an I/O error.
    pub fn set_value(&mut self, path: &str, value: Value) -> OpsResult<()> {
        self.mutate(|s| s.set_value(path, value))
    }

    /// Writes a saved value of one entity and persists.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity`, `WrongDataKeyPath` or an I/O error.
    pub fn set_entity_value(&mut self, designation: &str, path: &str, value: Value) -> OpsResult<()> {
        self.mutate(|s| s.set_entity_value(designation, path, value))
    }

    /// Writes a saved value of one token and persists.
    ///
    /// # Errors
    ///
    /// Returns `UnknownToken`, `WrongDataKeyPath` or an I/O error.
    pub fn set_token_value(&mut self, name: &str, path: &str, value: Value) -> OpsResult<()> {
        self.mutate(|s| s.set_token_value(name, path, value))
    }

    /// Registers an entity and persists.
    ///
    /// # Errors
    ///
    /// Returns `EntityAlreadyExists`, `AddressConflict` or an I/O error.
    pub fn add_entity(&mut self, entity: EntityData) -> OpsResult<bool> {
        self.mutate(|s| s.add_entity(entity))
    }

    /// Imports or re-points an external contract and persists.
    ///
    /// # Errors
    ///
    /// Returns `AddressConflict` or an I/O error.
    pub fn upsert_external_entity(&mut self, id: &str, address: Address) -> OpsResult<bool> {
        self.mutate(|s| s.upsert_external_contract(id, address))
    }

    /// Records a contract upgrade and persists.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity` or an I/O error.
    pub fn update_contract(&mut self, designation: &str, code_hash: &str) -> OpsResult<()> {
        let now = now_timestamp();
        self.mutate(|s| s.record_contract_upgrade(designation, code_hash, now))
    }

    /// Registers a token and persists.
    ///
    /// # Errors
    ///
    /// Returns `TokenAlreadyExists` or an I/O error.
    pub fn add_token(&mut self, token: TokenData) -> OpsResult<()> {
        self.mutate(|s| s.add_token(token))
    }

    fn read_checkpoint(&self, name: &str, checkpoint: &str) -> OpsResult<Scenario> {
        validate_name(checkpoint)?;
        let path = self.checkpoint_path(name, checkpoint);
        if !path.is_file() {
            return Err(DataError::UnknownCheckpoint {
                scenario: name.to_string(),
                checkpoint: checkpoint.to_string(),
            }
            .into());
        }
        codec::read_document(&path)
    }

    /// Saves the loaded scenario, then snapshots it as `checkpoint`.
    ///
    /// # Errors
    ///
    /// Returns `UnloadedScenario` or an I/O error.
    pub fn create_checkpoint(&self, checkpoint: &str) -> OpsResult<()> {
        validate_name(checkpoint)?;
        self.save()?;
        let name = &self.scenario()?.name;
        let bytes = codec::read_file(&self.current_path(name))?;
        codec::write_atomic(&self.checkpoint_path(name, checkpoint), &bytes)?;
        info!("created checkpoint {checkpoint} of scenario {name}");
        Ok(())
    }

    /// Replaces the in-memory scenario with a checkpoint's content.
    ///
    /// # Errors
    ///
    /// Returns `UnloadedScenario` or `UnknownCheckpoint`.
    pub fn restore_checkpoint(&mut self, checkpoint: &str) -> OpsResult<()> {
        let name = self.scenario()?.name.clone();
        let restored = self.read_checkpoint(&name, checkpoint)?;
        info!("restored checkpoint {checkpoint} of scenario {name}");
        self.loaded = Some(restored);
        Ok(())
    }

    /// Deletes one checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCheckpoint` or an I/O error.
    pub fn delete_checkpoint(&self, name: &str, checkpoint: &str) -> OpsResult<()> {
        validate_name(name)?;
        validate_name(checkpoint)?;
        let dir = self.scenario_dir(name).join(CHECKPOINTS_DIR).join(checkpoint);
        if !dir.is_dir() {
            return Err(DataError::UnknownCheckpoint {
                scenario: name.to_string(),
                checkpoint: checkpoint.to_string(),
            }
            .into());
        }
        fs::remove_dir_all(&dir).map_err(|e| DataError::io(&dir, &e).into())
    }

    /// Deletes every checkpoint of a scenario.
    ///
    /// # Errors
    ///
    /// Returns an I/O error.
    pub fn delete_all_checkpoints(&self, name: &str) -> OpsResult<()> {
        validate_name(name)?;
        let dir = self.scenario_dir(name).join(CHECKPOINTS_DIR);
        if dir.is_dir() {
            fs::remove_dir_all(&dir).map_err(|e| DataError::io(&dir, &e))?;
        }
        Ok(())
    }

    fn remove_scenario_dir(&self, name: &str) -> OpsResult<()> {
        let dir = self.scenario_dir(name);
        fs::remove_dir_all(&dir).map_err(|e| DataError::io(&dir, &e).into())
    }

    /// Deletes a scenario with all its checkpoints, unloading it if needed.
    ///
    /// # Errors
    ///
    /// Returns `UnknownScenario` or an I/O error.
    pub fn delete_scenario(&mut self, name: &str) -> OpsResult<()> {
        validate_name(name)?;
        if !self.scenario_dir(name).is_dir() {
            return Err(DataError::UnknownScenario {
                name: name.to_string(),
                network: self.network.clone(),
            }
            .into());
        }
        if self.loaded.as_ref().is_some_and(|s| s.name == name) {
            self.loaded = None;
        }
        self.remove_scenario_dir(name)?;
        info!("deleted scenario {name} on {}", self.network);
        Ok(())
    }

    /// Copies the current document of `source` into a new scenario.
    ///
    /// # Errors
    ///
    /// Returns `UnknownScenario`, `ScenarioAlreadyExists` (unless
    /// `overwrite`) or an I/O error.
    pub fn clone_scenario(&self, source: &str, destination: &str, overwrite: bool) -> OpsResult<()> {
        validate_name(source)?;
        validate_name(destination)?;
        if !self.exists(source) {
            return Err(DataError::UnknownScenario {
                name: source.to_string(),
                network: self.network.clone(),
            }
            .into());
        }
        if self.scenario_dir(destination).exists() {
            if !overwrite {
                return Err(DataError::ScenarioAlreadyExists {
                    name: destination.to_string(),
                    network: self.network.clone(),
                }
                .into());
            }
            self.remove_scenario_dir(destination)?;
        }
        let mut copy: Scenario = codec::read_document(&self.current_path(source))?;
        copy.name = destination.to_string();
        copy.touch();
        codec::write_document(&self.current_path(destination), &copy)?;
        info!("cloned scenario {source} into {destination}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpsError;

    fn store() -> (tempfile::TempDir, ScenarioStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ScenarioStore::open(dir.path().join("data"), "devnet").unwrap();
        (dir, store)
    }

    #[test]
    fn test_single_load_discipline() {
        let (_dir, mut store) = store();
        assert!(matches!(
            store.scenario().unwrap_err(),
            OpsError::Data(DataError::UnloadedScenario)
        ));
        store.create("first", false).unwrap();
        let err = store.load("first", None).unwrap_err();
        assert!(matches!(err, OpsError::Data(DataError::ScenarioAlreadyLoaded { .. })));
        let err = store.create("second", false).unwrap_err();
        assert!(matches!(err, OpsError::Data(DataError::ScenarioAlreadyLoaded { .. })));

        store.unload();
        store.load("first", None).unwrap();
        assert_eq!(store.scenario().unwrap().name, "first");
    }

    #[test]
    fn test_mutations_are_persisted() {
        let (_dir, mut store) = store();
        store.create("demo", false).unwrap();
        store.set_value("a.b[0]", Value::Int(1)).unwrap();
        store.unload();

        store.load("demo", None).unwrap();
        assert_eq!(store.get_value("a.b[0]").unwrap(), Value::Int(1));
    }

    #[test]
    fn test_unknown_scenario_and_existing_scenario() {
        let (_dir, mut store) = store();
        assert!(matches!(
            store.load("ghost", None).unwrap_err(),
            OpsError::Data(DataError::UnknownScenario { .. })
        ));
        store.create("demo", false).unwrap();
        store.unload();
        assert!(matches!(
            store.create("demo", false).unwrap_err(),
            OpsError::Data(DataError::ScenarioAlreadyExists { .. })
        ));
        store.create("demo", true).unwrap();
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        let (_dir, mut store) = store();
        for bad in ["", "..", "a/b"] {
            assert!(store.create(bad, false).is_err());
        }
    }

    #[test]
    fn test_checkpoint_listing_and_deletion() {
        let (_dir, mut store) = store();
        store.create("demo", false).unwrap();
        store.create_checkpoint("b").unwrap();
        store.create_checkpoint("a").unwrap();
        assert_eq!(store.list_checkpoints("demo").unwrap(), vec!["a", "b"]);
        store.delete_checkpoint("demo", "a").unwrap();
        assert_eq!(store.list_checkpoints("demo").unwrap(), vec!["b"]);
        assert!(store.delete_checkpoint("demo", "a").is_err());
        store.delete_all_checkpoints("demo").unwrap();
        assert!(store.list_checkpoints("demo").unwrap().is_empty());
    }

    #[test]
    fn test_clone_and_delete() {
        let (_dir, mut store) = store();
        store.create("src", false).unwrap();
        store.set_value("x", Value::from("y")).unwrap();
        store.clone_scenario("src", "dst", false).unwrap();
        assert_eq!(store.list_scenarios().unwrap(), vec!["dst", "src"]);

        store.delete_scenario("src").unwrap();
        assert!(!store.is_loaded());
        store.load("dst", None).unwrap();
        assert_eq!(store.get_value("x").unwrap(), Value::from("y"));
        assert_eq!(store.scenario().unwrap().name, "dst");
    }

    #[test]
    fn test_networks_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let mut devnet = ScenarioStore::open(dir.path(), "devnet").unwrap();
        devnet.create("demo", false).unwrap();
        let testnet = ScenarioStore::open(dir.path(), "testnet").unwrap();
        assert!(!testnet.exists("demo"));
        assert!(testnet.list_scenarios().unwrap().is_empty());
    }
}
