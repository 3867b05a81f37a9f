//! The scenario document: entities, tokens and free-form values of one run.

use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{DataError, OpsResult};
use crate::path::{self, KeyPath, PathSegment};
use crate::scenario::entity::{EntityData, TokenData};
use crate::value::Value;

/// Current unix time in seconds.
#[must_use]
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Named execution context holding every entity and variable of a run.
///
/// Reads route through [`Scenario::get_value`]: when the root segment of a
/// multi-segment path names an entity or a token, the rest of the path is
/// resolved against that entity; otherwise the scenario's own tree is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub network: String,
    pub creation_time: i64,
    pub last_update_time: i64,
    #[serde(default)]
    entities: IndexMap<String, EntityData>,
    #[serde(default)]
    tokens: IndexMap<String, TokenData>,
    #[serde(default = "Value::empty_map")]
    saved_values: Value,
}

impl Scenario {
    /// Creates an empty scenario.
    #[must_use]
    pub fn new(name: impl Into<String>, network: impl Into<String>) -> Self {
        let now = now_timestamp();
        Self {
            name: name.into(),
            network: network.into(),
            creation_time: now,
            last_update_time: now,
            entities: IndexMap::new(),
            tokens: IndexMap::new(),
            saved_values: Value::empty_map(),
        }
    }

    /// Marks the document as modified.
    pub fn touch(&mut self) {
        self.last_update_time = now_timestamp().max(self.last_update_time);
    }

    /// Entities keyed by id.
    #[must_use]
    pub const fn entities(&self) -> &IndexMap<String, EntityData> {
        &self.entities
    }

    /// Tokens keyed by name.
    #[must_use]
    pub const fn tokens(&self) -> &IndexMap<String, TokenData> {
        &self.tokens
    }

    /// The scenario's own free-form tree.
    #[must_use]
    pub const fn saved_values(&self) -> &Value {
        &self.saved_values
    }

    fn id_of_address(&self, address: &Address) -> Option<&str> {
        self.entities
            .values()
            .find(|e| e.address() == *address)
            .map(EntityData::id)
    }

    fn entity_key(&self, designation: &str) -> Option<String> {
        if self.entities.contains_key(designation) {
            return Some(designation.to_string());
        }
        let address = Address::from_bech32(designation).ok()?;
        self.id_of_address(&address).map(str::to_string)
    }

    /// Finds an entity by id or by bech32 address.
    #[must_use]
    pub fn entity(&self, designation: &str) -> Option<&EntityData> {
        self.entity_key(designation).and_then(|k| self.entities.get(&k))
    }

    /// Finds a token by name.
    #[must_use]
    pub fn token(&self, name: &str) -> Option<&TokenData> {
        self.tokens.get(name)
    }

    /// Address of an entity designated by id or address.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity` if no entity matches.
    pub fn entity_address(&self, designation: &str) -> OpsResult<Address> {
        self.entity(designation)
            .map(EntityData::address)
            .ok_or_else(|| {
                DataError::UnknownEntity {
                    designation: designation.to_string(),
                }
                .into()
            })
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "name" => Some(Value::from(self.name.as_str())),
            "network" => Some(Value::from(self.network.as_str())),
            "creation_time" => Some(Value::from(self.creation_time)),
            "last_update_time" => Some(Value::from(self.last_update_time)),
            _ => None,
        }
    }

    /// Reads the value at `path`.
    ///
    /// # Errors
    ///
    /// Returns a parsing error for malformed paths and `WrongDataKeyPath`
    /// when nothing exists there.
    pub fn get_value(&self, path: &str) -> OpsResult<Value> {
        let parsed = KeyPath::parse(path)?;
        self.get_parsed(&parsed)
    }

    /// Reads the value at an already parsed path.
    ///
    /// # Errors
    ///
    /// Returns `WrongDataKeyPath` when nothing exists there.
    pub fn get_parsed(&self, path: &KeyPath) -> OpsResult<Value> {
        if path.len() > 1 {
            if let Some(root) = path.root_key() {
                if let Some(entity) = self.entity(root) {
                    return entity.get_value(&path.tail());
                }
                if let Some(token) = self.tokens.get(root) {
                    return token.get_value(&path.tail());
                }
            }
        }
        match path::get_value(&self.saved_values, path) {
            Ok(value) => Ok(value.clone()),
            Err(e) => match path.segments() {
                [PathSegment::Key(name)] => self.attribute(name).ok_or(e),
                _ => Err(e),
            },
        }
    }

    /// Writes `value` at `path`, routing to entities and tokens like
    /// [`Scenario::get_value`].
    ///
    /// # Errors
    ///
    /// Returns `WrongDataKeyPath` on malformed paths or kind mismatches.
    pub fn set_value(&mut self, path: &str, value: Value) -> OpsResult<()> {
        let parsed = KeyPath::parse(path)?;
        if parsed.len() > 1 {
            if let Some(root) = parsed.root_key() {
                if let Some(key) = self.entity_key(root) {
                    if let Some(entity) = self.entities.get_mut(&key) {
                        entity.set_value(&parsed.tail(), value)?;
                        self.touch();
                        return Ok(());
                    }
                }
                if let Some(token) = self.tokens.get_mut(root) {
                    token.set_value(&parsed.tail(), value)?;
                    self.touch();
                    return Ok(());
                }
            }
        }
        path::set_value(&mut self.saved_values, &parsed, value)?;
        self.touch();
        Ok(())
    }

    /// Writes a saved value of one entity.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity` or `WrongDataKeyPath`.
    pub fn set_entity_value(&mut self, designation: &str, path: &str, value: Value) -> OpsResult<()> {
        let parsed = KeyPath::parse(path)?;
        let key = self.entity_key(designation).ok_or_else(|| DataError::UnknownEntity {
            designation: designation.to_string(),
        })?;
        if let Some(entity) = self.entities.get_mut(&key) {
            entity.set_value(&parsed, value)?;
        }
        self.touch();
        Ok(())
    }

    /// Writes a saved value of one token.
    ///
    /// # Errors
    ///
    /// Returns `UnknownToken` or `WrongDataKeyPath`.
    pub fn set_token_value(&mut self, name: &str, path: &str, value: Value) -> OpsResult<()> {
        let parsed = KeyPath::parse(path)?;
        let token = self
            .tokens
            .get_mut(name)
            .ok_or_else(|| DataError::UnknownToken { name: name.to_string() })?;
        token.set_value(&parsed, value)?;
        self.touch();
        Ok(())
    }

    /// Registers an entity.
    ///
    /// Returns `false` when the same (id, address) pair is already
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns `EntityAlreadyExists` for a known id bound to another address
    /// and `AddressConflict` for a known address bound to another id.
    pub fn add_entity(&mut self, entity: EntityData) -> OpsResult<bool> {
        if let Some(existing) = self.entities.get(entity.id()) {
            if existing.address() == entity.address() {
                return Ok(false);
            }
            return Err(DataError::EntityAlreadyExists {
                id: entity.id().to_string(),
                address: existing.address().to_bech32(),
            }
            .into());
        }
        if let Some(existing_id) = self.id_of_address(&entity.address()) {
            return Err(DataError::AddressConflict {
                address: entity.address().to_bech32(),
                existing_id: existing_id.to_string(),
                new_id: entity.id().to_string(),
            }
            .into());
        }
        self.entities.insert(entity.id().to_string(), entity);
        self.touch();
        Ok(true)
    }

    /// Imports an external contract, or moves an existing entity to a new
    /// address while keeping its saved values.
    ///
    /// # Errors
    ///
    /// Returns `AddressConflict` if the address belongs to another id.
    pub fn upsert_external_contract(&mut self, id: &str, address: Address) -> OpsResult<bool> {
        if let Some(existing_id) = self.id_of_address(&address) {
            if existing_id == id {
                return Ok(false);
            }
            return Err(DataError::AddressConflict {
                address: address.to_bech32(),
                existing_id: existing_id.to_string(),
                new_id: id.to_string(),
            }
            .into());
        }
        match self.entities.get_mut(id) {
            Some(entity) => entity.set_address(address),
            None => {
                self.entities
                    .insert(id.to_string(), EntityData::external_contract(id, address));
            }
        }
        self.touch();
        Ok(true)
    }

    /// Refreshes the code hash and upgrade time of a deployed contract.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity` if the designation is not a deployed contract.
    pub fn record_contract_upgrade(&mut self, designation: &str, code_hash: &str, time: i64) -> OpsResult<()> {
        let unknown = || DataError::UnknownEntity {
            designation: designation.to_string(),
        };
        let key = self.entity_key(designation).ok_or_else(unknown)?;
        match self.entities.get_mut(&key) {
            Some(EntityData::Contract(contract)) => {
                contract.code_hash = code_hash.to_string();
                contract.last_upgrade_time = time;
            }
            _ => return Err(unknown().into()),
        }
        self.touch();
        Ok(())
    }

    /// Registers a token.
    ///
    /// # Errors
    ///
    /// Returns `TokenAlreadyExists` if the name is taken.
    pub fn add_token(&mut self, token: TokenData) -> OpsResult<()> {
        if self.tokens.contains_key(&token.name) {
            return Err(DataError::TokenAlreadyExists { name: token.name }.into());
        }
        self.tokens.insert(token.name.clone(), token);
        self.touch();
        Ok(())
    }
}
