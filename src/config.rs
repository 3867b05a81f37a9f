//! Per-network configuration and environment providers.
//!
//! Configuration is a set of named sections, one per network plus a
//! `default` section every network falls back to. Option names are
//! case-insensitive and stored upper-cased.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use indexmap::IndexMap;
use log::debug;

use crate::error::{OpsError, OpsResult, ResolutionError};
use crate::value::Value;

/// Name of the fallback section.
pub const DEFAULT_SECTION: &str = "default";

/// Environment variable pointing at a configuration file.
pub const CONFIG_ENV_VAR: &str = "SCENEOPS_CONFIG";

/// Configuration file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "sceneops_config.yaml";

const BUILTIN_CONFIG: &str = include_str!("default_config.yaml");

type Section = IndexMap<String, String>;

/// Source of `$name` lookups.
pub trait EnvProvider: Send + Sync {
    /// Returns the value of the variable, if set.
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvProvider for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// A fixed set of variables.
#[derive(Debug, Default, Clone)]
pub struct MapEnv {
    vars: IndexMap<String, String>,
}

impl MapEnv {
    /// Creates an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Sets a variable.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }
}

impl EnvProvider for MapEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// Network-scoped configuration.
#[derive(Debug, Clone)]
pub struct Config {
    network: String,
    sections: IndexMap<String, Section>,
}

fn parse_sections(text: &str) -> OpsResult<IndexMap<String, Section>> {
    let raw: Value = serde_yaml::from_str(text)
        .map_err(|e| OpsError::config(format!("invalid configuration document: {e}")))?;
    let mut sections = IndexMap::new();
    match raw {
        Value::Null => {}
        Value::Map(map) => {
            for (name, options) in map {
                let mut section = Section::new();
                match options {
                    Value::Null => {}
                    Value::Map(options) => {
                        for (option, value) in options {
                            section.insert(option.to_ascii_uppercase(), value.to_string());
                        }
                    }
                    other => {
                        return Err(OpsError::config(format!(
                            "section '{name}' must be a mapping, found a {}",
                            other.type_name()
                        )))
                    }
                }
                sections.insert(name, section);
            }
        }
        other => {
            return Err(OpsError::config(format!(
                "configuration must be a mapping of sections, found a {}",
                other.type_name()
            )))
        }
    }
    Ok(sections)
}

impl Config {
    /// Built-in configuration for `network`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the embedded defaults are malformed.
    pub fn builtin(network: impl Into<String>) -> OpsResult<Self> {
        Ok(Self {
            network: network.into(),
            sections: parse_sections(BUILTIN_CONFIG)?,
        })
    }

    /// Built-in configuration overlaid with a YAML document.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the document is not a mapping of
    /// sections.
    pub fn from_yaml_str(text: &str, network: impl Into<String>) -> OpsResult<Self> {
        let mut config = Self::builtin(network)?;
        for (name, section) in parse_sections(text)? {
            config.sections.entry(name).or_default().extend(section);
        }
        Ok(config)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>, network: impl Into<String>) -> OpsResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| OpsError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml_str(&text, network)
    }

    /// Locates the configuration for `network`: the file named by
    /// `SCENEOPS_CONFIG`, then `./sceneops_config.yaml`, then the built-in
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a located file is invalid.
    pub fn discover(network: impl Into<String>, env: &dyn EnvProvider) -> OpsResult<Self> {
        let network = network.into();
        if let Some(path) = env.var(CONFIG_ENV_VAR) {
            debug!("loading configuration from {path} ({CONFIG_ENV_VAR})");
            return Self::from_path(path, network);
        }
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.is_file() {
            debug!("loading configuration from {}", local.display());
            return Self::from_path(local, network);
        }
        Self::builtin(network)
    }

    /// Active network name.
    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Looks up an option in the network section, then in `default`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownConfigOption` if neither section defines it.
    pub fn get(&self, option: &str) -> OpsResult<&str> {
        let key = option.to_ascii_uppercase();
        [self.network.as_str(), DEFAULT_SECTION]
            .iter()
            .filter_map(|section| self.sections.get(*section))
            .find_map(|section| section.get(&key))
            .map(String::as_str)
            .ok_or_else(|| {
                ResolutionError::UnknownConfigOption {
                    option: key,
                    network: self.network.clone(),
                }
                .into()
            })
    }

    /// Looks up and parses an option.
    ///
    /// # Errors
    ///
    /// Returns `UnknownConfigOption` if it is missing or a configuration
    /// error if it does not parse.
    pub fn get_parsed<T: FromStr>(&self, option: &str) -> OpsResult<T>
    where
        T::Err: std::fmt::Display,
    {
        let raw = self.get(option)?;
        raw.trim().parse().map_err(|e| {
            OpsError::config(format!("option {} has invalid value '{raw}': {e}", option.to_ascii_uppercase()))
        })
    }

    /// Overrides an option for the active network.
    pub fn set(&mut self, option: &str, value: impl Into<String>) {
        self.sections
            .entry(self.network.clone())
            .or_default()
            .insert(option.to_ascii_uppercase(), value.into());
    }

    /// Every option visible from the active network, network values first.
    #[must_use]
    pub fn options(&self) -> IndexMap<String, String> {
        let mut merged = IndexMap::new();
        for section in [self.network.as_str(), DEFAULT_SECTION] {
            if let Some(options) = self.sections.get(section) {
                for (k, v) in options {
                    merged.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
        }
        merged
    }

    /// Known network sections.
    pub fn networks(&self) -> impl Iterator<Item = &str> {
        self.sections
            .keys()
            .map(String::as_str)
            .filter(|name| *name != DEFAULT_SECTION)
    }

    fn seconds(&self, option: &str) -> OpsResult<Duration> {
        let secs: f64 = self.get_parsed(option)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(OpsError::config(format!("option {option} must be a non-negative number of seconds")));
        }
        Ok(Duration::from_secs_f64(secs))
    }

    /// Overall budget for awaiting transaction finality.
    ///
    /// # Errors
    ///
    /// Returns an error if the option is missing or malformed.
    pub fn tx_timeout(&self) -> OpsResult<Duration> {
        self.seconds("TX_TIMEOUT")
    }

    /// Interval between two finality polls.
    ///
    /// # Errors
    ///
    /// Returns an error if the option is missing or malformed.
    pub fn tx_refresh_period(&self) -> OpsResult<Duration> {
        self.seconds("TX_REFRESH_PERIOD")
    }

    /// Retries allowed for a single read while polling.
    ///
    /// # Errors
    ///
    /// Returns an error if the option is missing or malformed.
    pub fn tx_read_retries(&self) -> OpsResult<u32> {
        self.get_parsed("TX_READ_RETRIES")
    }

    /// Gas price attached to every transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the option is missing or malformed.
    pub fn gas_price(&self) -> OpsResult<u64> {
        self.get_parsed("GAS_PRICE")
    }

    /// Chain identifier signed into every transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the option is missing.
    pub fn chain_id(&self) -> OpsResult<&str> {
        self.get("CHAIN")
    }

    /// Root folder of scenario data.
    ///
    /// # Errors
    ///
    /// Returns an error if the option is missing.
    pub fn data_path(&self) -> OpsResult<PathBuf> {
        self.get("DATA_PATH").map(PathBuf::from)
    }

    /// Minimum interval between two bulk gateway reads.
    ///
    /// # Errors
    ///
    /// Returns an error if the option is malformed.
    pub fn min_call_interval(&self) -> OpsResult<Duration> {
        match self.get_parsed::<u64>("MIN_CALL_INTERVAL_MS") {
            Ok(ms) => Ok(Duration::from_millis(ms)),
            Err(OpsError::Resolution(ResolutionError::UnknownConfigOption { .. })) => Ok(Duration::ZERO),
            Err(e) => Err(e),
        }
    }

    /// Checks timing options.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a zero refresh period or any
    /// malformed timing option.
    pub fn validate(self) -> OpsResult<Self> {
        let refresh = self.tx_refresh_period()?;
        if refresh.is_zero() {
            return Err(OpsError::config("TX_REFRESH_PERIOD must be strictly positive"));
        }
        self.tx_timeout()?;
        self.tx_read_retries()?;
        self.gas_price()?;
        Ok(self)
    }
}
