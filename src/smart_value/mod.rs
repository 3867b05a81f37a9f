//! Smart values: declarative fields resolved at run time.
//!
//! A smart value starts as a raw [`Value`] that may contain symbolic
//! references:
//!
//! - `$NAME` / `${NAME}`: environment variable
//! - `&option` / `&{option}`: configuration option of the active network
//! - `%path` / `%{path}`: scenario lookup through the path grammar
//! - `={expr}`: sandboxed formula
//!
//! [`SmartValue::evaluate`] applies substitution passes until a fixed point
//! is reached, then coerces the result into the output type of its
//! [`SmartKind`]. Every intermediate value is kept for diagnostics.
//!
//! # Examples
//!
//! ```
//! use std::cell::RefCell;
//! use rand::SeedableRng;
//! use sceneops::config::{Config, MapEnv};
//! use sceneops::smart_value::{IntKind, Resolver, SmartValue};
//!
//! let config = Config::builtin("devnet").unwrap();
//! let env = MapEnv::new().with("COUNT", "4");
//! let rng = RefCell::new(rand::rngs::StdRng::seed_from_u64(0));
//! let resolver = Resolver::new(&config, &env, &rng);
//!
//! let mut value = SmartValue::<IntKind>::new("={${COUNT} * 2}");
//! value.evaluate(&resolver).unwrap();
//! assert_eq!(*value.get().unwrap(), 8);
//! ```

pub mod formula;
mod kinds;
mod resolver;
mod transfers;

use std::fmt;
use std::iter;

pub use kinds::{
    AddressKind, AddressesKind, AnyKind, BoolKind, BytesKind, FloatKind, IntKind, ListKind, MapKind,
    OnChainTransferKind, OnChainTransfersKind, PathKind, RawListKind, RawMapKind, ResultsSaveKeysKind,
    StrKind, TokenRefKind, TokenTransferKind, TokenTransfersKind,
};
pub use resolver::{Resolver, Traversal, SIGILS};
pub use transfers::{OnChainTransfer, ResultsSaveKeys, TokenRef, TokenTransfer, NATIVE_TOKEN};

use crate::error::{OpsResult, ResolutionError};
use crate::value::Value;

/// Hard cap on substitution passes for one evaluation.
pub const MAX_RESOLUTION_PASSES: usize = 1000;

/// Target type of a smart value.
pub trait SmartKind {
    /// Evaluated type.
    type Output: Clone + fmt::Debug;

    /// Name used in diagnostics.
    const NAME: &'static str;

    /// How far substitution descends into containers.
    const TRAVERSAL: Traversal = Traversal::Deep;

    /// Coerces a fully substituted value into the output type.
    ///
    /// # Errors
    ///
    /// Returns a parsing error if the value cannot be converted.
    fn enforce(value: Value, resolver: &Resolver<'_>) -> OpsResult<Self::Output>;

    /// Renders an output back as a value, for diagnostic traces.
    ///
    /// Kinds without a faithful value form return `None`.
    fn describe(output: &Self::Output) -> Option<Value>;
}

/// A declarative field and its resolution trace.
pub struct SmartValue<K: SmartKind> {
    raw: Value,
    chain: Vec<Value>,
    evaluated: Option<K::Output>,
}

impl<K: SmartKind> Clone for SmartValue<K> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            chain: self.chain.clone(),
            evaluated: self.evaluated.clone(),
        }
    }
}

impl<K: SmartKind> fmt::Debug for SmartValue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmartValue")
            .field("kind", &K::NAME)
            .field("raw", &self.raw)
            .field("chain", &self.chain)
            .field("evaluated", &self.evaluated)
            .finish()
    }
}

impl<K: SmartKind> SmartValue<K> {
    /// Wraps a raw value.
    #[must_use]
    pub fn new(raw: impl Into<Value>) -> Self {
        Self {
            raw: raw.into(),
            chain: Vec::new(),
            evaluated: None,
        }
    }

    /// Evaluates a raw value in one go.
    ///
    /// # Errors
    ///
    /// See [`SmartValue::evaluate`].
    pub fn resolve(raw: impl Into<Value>, resolver: &Resolver<'_>) -> OpsResult<K::Output> {
        let mut value = Self::new(raw);
        value.evaluate(resolver)?;
        value.into_evaluated()
    }

    /// The value as written by the author.
    #[must_use]
    pub const fn raw(&self) -> &Value {
        &self.raw
    }

    /// Intermediate values of the last evaluation, oldest first.
    #[must_use]
    pub fn chain(&self) -> &[Value] {
        &self.chain
    }

    /// Returns true once [`SmartValue::evaluate`] succeeded.
    #[must_use]
    pub const fn is_evaluated(&self) -> bool {
        self.evaluated.is_some()
    }

    /// Resolves the raw value. Evaluating again starts from scratch.
    ///
    /// # Errors
    ///
    /// Returns `ResolutionError::Evaluation` wrapping the failure together
    /// with the raw value and the partial chain. `MaxIteration` is raised
    /// after [`MAX_RESOLUTION_PASSES`] passes without reaching a fixed point.
    pub fn evaluate(&mut self, resolver: &Resolver<'_>) -> OpsResult<()> {
        self.chain.clear();
        self.evaluated = None;
        match self.run(resolver) {
            Ok(output) => {
                self.evaluated = Some(output);
                Ok(())
            }
            Err(source) => Err(ResolutionError::Evaluation {
                raw: self.raw.repr(),
                chain: self.chain_text(),
                source: Box::new(source),
            }
            .into()),
        }
    }

    fn run(&mut self, resolver: &Resolver<'_>) -> OpsResult<K::Output> {
        let mut current = self.raw.clone();
        let mut passes = 0;
        while let Some(next) = resolver.resolve_pass(&current, K::TRAVERSAL)? {
            if next == current {
                break;
            }
            passes += 1;
            if passes > MAX_RESOLUTION_PASSES {
                return Err(ResolutionError::MaxIteration {
                    max: MAX_RESOLUTION_PASSES,
                    raw: self.raw.repr(),
                }
                .into());
            }
            self.chain.push(next.clone());
            current = next;
        }

        let unescaped = resolver::unescape_value(&current, K::TRAVERSAL);
        if unescaped != current {
            self.chain.push(unescaped.clone());
            current = unescaped;
        }

        let output = K::enforce(current.clone(), resolver)?;
        if let Some(described) = K::describe(&output) {
            if described != current {
                self.chain.push(described);
            }
        }
        Ok(output)
    }

    fn chain_text(&self) -> String {
        iter::once(&self.raw)
            .chain(&self.chain)
            .map(Value::repr)
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// The evaluated value.
    ///
    /// # Errors
    ///
    /// Returns `NotEvaluated` before a successful evaluation.
    pub fn get(&self) -> OpsResult<&K::Output> {
        self.evaluated.as_ref().ok_or_else(|| {
            ResolutionError::NotEvaluated {
                raw: self.raw.repr(),
            }
            .into()
        })
    }

    /// Consumes the smart value and returns its evaluated value.
    ///
    /// # Errors
    ///
    /// Returns `NotEvaluated` before a successful evaluation.
    pub fn into_evaluated(self) -> OpsResult<K::Output> {
        let raw = self.raw;
        self.evaluated
            .ok_or_else(|| ResolutionError::NotEvaluated { raw: raw.repr() }.into())
    }

    /// Renders `final (raw -> step -> ...)`.
    ///
    /// Steps equal to the final value or to their predecessor are left out,
    /// and so are the parentheses when nothing remains.
    ///
    /// # Errors
    ///
    /// Returns `NotEvaluated` before a successful evaluation.
    pub fn evaluation_string(&self) -> OpsResult<String> {
        let output = self.get()?;
        let final_text = K::describe(output).map_or_else(|| format!("{output:?}"), |v| v.to_string());
        let mut steps: Vec<String> = Vec::new();
        for value in iter::once(&self.raw).chain(&self.chain) {
            let text = formula::unescape(&value.to_string());
            if text == final_text || steps.last() == Some(&text) {
                continue;
            }
            steps.push(text);
        }
        if steps.is_empty() {
            Ok(final_text)
        } else {
            Ok(format!("{final_text} ({})", steps.join(" -> ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::config::{Config, MapEnv};
    use crate::error::OpsError;
    use crate::address::Address;
    use crate::scenario::{EntityData, Scenario, TokenData, TokenKind};

    struct Fixture {
        scenario: Scenario,
        config: Config,
        env: MapEnv,
        rng: RefCell<StdRng>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut scenario = Scenario::new("unit", "devnet");
            scenario.set_value("suffix", Value::from("bar")).unwrap();
            scenario.set_value("my_test_key", Value::from("my_test_value")).unwrap();
            scenario.set_value("usdt", Value::from("bob_token")).unwrap();
            scenario
                .add_token(TokenData::new("bob_token", "BOBT", "BOBT-123456", TokenKind::Fungible))
                .unwrap();
            scenario
                .add_entity(EntityData::account("alice", Address::from_bytes([7; 32])))
                .unwrap();
            Self {
                scenario,
                config: Config::builtin("devnet").unwrap(),
                env: MapEnv::new().with("HOME", "foo").with("MXOPS_TEST", "42"),
                rng: RefCell::new(StdRng::seed_from_u64(7)),
            }
        }

        fn resolver(&self) -> Resolver<'_> {
            Resolver::new(&self.config, &self.env, &self.rng).with_scenario(&self.scenario)
        }
    }

    #[test]
    fn test_plain_string_has_empty_chain() {
        let fx = Fixture::new();
        let mut value = SmartValue::<StrKind>::new("no symbols here");
        value.evaluate(&fx.resolver()).unwrap();
        assert_eq!(value.get().unwrap(), "no symbols here");
        assert!(value.chain().is_empty());
        assert_eq!(value.evaluation_string().unwrap(), "no symbols here");
    }

    #[test]
    fn test_get_before_evaluate_fails() {
        let value = SmartValue::<IntKind>::new(5);
        let err = value.get().unwrap_err();
        assert!(matches!(err, OpsError::Resolution(ResolutionError::NotEvaluated { .. })));
        assert!(value.evaluation_string().is_err());
    }

    #[test]
    fn test_env_and_scenario_composition() {
        let fx = Fixture::new();
        let resolved = SmartValue::<StrKind>::resolve("${HOME}_%{suffix}", &fx.resolver()).unwrap();
        assert_eq!(resolved, "foo_bar");
    }

    #[test]
    fn test_nested_reference() {
        let fx = Fixture::new();
        let mut value = SmartValue::<StrKind>::new("%{%{usdt}.identifier}");
        value.evaluate(&fx.resolver()).unwrap();
        assert_eq!(value.get().unwrap(), "BOBT-123456");
        assert_eq!(
            value.evaluation_string().unwrap(),
            "BOBT-123456 (%{%{usdt}.identifier} -> %{bob_token.identifier})"
        );
    }

    #[test]
    fn test_type_coercion_is_traced() {
        let fx = Fixture::new();
        let mut value = SmartValue::<IntKind>::new("$MXOPS_TEST");
        value.evaluate(&fx.resolver()).unwrap();
        assert_eq!(*value.get().unwrap(), 42);
        assert_eq!(value.chain().last(), Some(&Value::Int(42)));
        assert_eq!(value.evaluation_string().unwrap(), "42 ($MXOPS_TEST)");
    }

    #[test]
    fn test_reference_cycle_hits_iteration_cap() {
        let mut fx = Fixture::new();
        fx.scenario.set_value("a", Value::from("%b")).unwrap();
        fx.scenario.set_value("b", Value::from("%a")).unwrap();
        let err = SmartValue::<AnyKind>::resolve("%a", &fx.resolver()).unwrap_err();
        assert!(matches!(
            err.root_cause(),
            OpsError::Resolution(ResolutionError::MaxIteration { max: MAX_RESOLUTION_PASSES, .. })
        ));
    }

    #[test]
    fn test_failure_keeps_partial_chain() {
        let fx = Fixture::new();
        let err = SmartValue::<StrKind>::resolve("%{missing_${HOME}}", &fx.resolver()).unwrap_err();
        match err {
            OpsError::Resolution(ResolutionError::Evaluation { raw, chain, source }) => {
                assert_eq!(raw, "\"%{missing_${HOME}}\"");
                assert!(chain.contains("%{missing_foo}"));
                assert!(matches!(
                    *source,
                    OpsError::Resolution(ResolutionError::WrongDataKeyPath { .. })
                ));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_escaped_symbols_survive_until_the_end() {
        let fx = Fixture::new();
        let resolved = SmartValue::<StrKind>::resolve("100 \\% of \\${HOME} is ${HOME}", &fx.resolver()).unwrap();
        assert_eq!(resolved, "100 % of ${HOME} is foo");
    }

    #[test]
    fn test_reevaluation_starts_over() {
        let mut fx = Fixture::new();
        let mut value = SmartValue::<StrKind>::new("%suffix");
        value.evaluate(&fx.resolver()).unwrap();
        assert_eq!(value.get().unwrap(), "bar");
        fx.scenario.set_value("suffix", Value::from("baz")).unwrap();
        value.evaluate(&fx.resolver()).unwrap();
        assert_eq!(value.get().unwrap(), "baz");
        assert_eq!(value.chain().len(), 1);
    }
}
