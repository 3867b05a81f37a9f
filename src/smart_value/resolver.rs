//! One substitution pass over raw values.

use std::borrow::Cow;
use std::cell::RefCell;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::rngs::StdRng;

use crate::config::{Config, EnvProvider};
use crate::error::{DataError, OpsResult, ResolutionError};
use crate::scenario::Scenario;
use crate::smart_value::formula;
use crate::value::{Value, ValueMap, BYTES_MARKER};

/// Characters introducing a symbolic expression.
pub const SIGILS: [u8; 4] = [b'$', b'&', b'%', b'='];

const HEX_PREFIX: &str = "0x";

/// How far a pass descends into containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    /// Strings inside lists and maps (keys included) are resolved too.
    Deep,
    /// Only a top-level string is resolved; containers are left as is.
    Shallow,
}

/// Everything a substitution pass reads from.
#[derive(Clone, Copy)]
pub struct Resolver<'a> {
    scenario: Option<&'a Scenario>,
    config: &'a Config,
    env: &'a dyn EnvProvider,
    rng: &'a RefCell<StdRng>,
}

impl<'a> Resolver<'a> {
    /// Creates a resolver without a loaded scenario; `%` lookups fail.
    #[must_use]
    pub fn new(config: &'a Config, env: &'a dyn EnvProvider, rng: &'a RefCell<StdRng>) -> Self {
        Self {
            scenario: None,
            config,
            env,
            rng,
        }
    }

    /// Attaches the scenario used by `%` lookups and address resolution.
    #[must_use]
    pub const fn with_scenario(mut self, scenario: &'a Scenario) -> Self {
        self.scenario = Some(scenario);
        self
    }

    /// The loaded scenario.
    ///
    /// # Errors
    ///
    /// Returns `UnloadedScenario` when none is attached.
    pub fn scenario(&self) -> OpsResult<&'a Scenario> {
        self.scenario.ok_or_else(|| DataError::UnloadedScenario.into())
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &'a Config {
        self.config
    }

    /// Applies one substitution pass.
    ///
    /// Returns `None` when nothing was substituted.
    ///
    /// # Errors
    ///
    /// Propagates lookup, formula and syntax errors.
    pub fn resolve_pass(&self, value: &Value, traversal: Traversal) -> OpsResult<Option<Value>> {
        match (value, traversal) {
            (Value::String(text), _) => self.resolve_string(text),
            (Value::List(items), Traversal::Deep) => {
                let mut changed = false;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match self.resolve_pass(item, traversal)? {
                        Some(next) => {
                            changed = true;
                            out.push(next);
                        }
                        None => out.push(item.clone()),
                    }
                }
                Ok(changed.then_some(Value::List(out)))
            }
            (Value::Map(map), Traversal::Deep) => {
                let mut changed = false;
                let mut out = ValueMap::with_capacity(map.len());
                for (key, item) in map {
                    let key = match self.resolve_string(key)? {
                        Some(Value::String(s)) => {
                            changed = true;
                            s
                        }
                        Some(other) => {
                            changed = true;
                            other.to_string()
                        }
                        None => key.clone(),
                    };
                    let item = match self.resolve_pass(item, traversal)? {
                        Some(next) => {
                            changed = true;
                            next
                        }
                        None => item.clone(),
                    };
                    out.insert(key, item);
                }
                Ok(changed.then_some(Value::Map(out)))
            }
            _ => Ok(None),
        }
    }

    /// Applies one substitution to a string: the rightmost unescaped
    /// `X{...}` expression is replaced by its value.
    ///
    /// # Errors
    ///
    /// Propagates lookup, formula and syntax errors.
    pub fn resolve_string(&self, text: &str) -> OpsResult<Option<Value>> {
        if let Some(encoded) = text.strip_prefix(BYTES_MARKER) {
            return BASE64
                .decode(encoded)
                .map(|bytes| Some(Value::Bytes(bytes)))
                .map_err(|e| ResolutionError::parsing(format!("invalid base64 in '{text}': {e}")).into());
        }
        if let Some(digits) = text.strip_prefix(HEX_PREFIX) {
            return hex::decode(digits)
                .map(|bytes| Some(Value::Bytes(bytes)))
                .map_err(|e| ResolutionError::parsing(format!("invalid hex in '{text}': {e}")).into());
        }

        let text = force_bracket(text);
        let Some(start) = rightmost_expression(&text) else {
            return Ok(None);
        };
        let open = start + 1;
        let close = closing_position(&text, open)?;
        let inner = &text[open + 1..close];

        if let Cow::Owned(bracketed) = force_bracket(inner) {
            return Ok(Some(Value::String(format!(
                "{}{bracketed}{}",
                &text[..=open],
                &text[close..]
            ))));
        }

        let value = self.lookup(text.as_bytes()[start], inner)?;
        if start == 0 && close == text.len() - 1 {
            Ok(Some(value))
        } else {
            Ok(Some(Value::String(format!(
                "{}{value}{}",
                &text[..start],
                &text[close + 1..]
            ))))
        }
    }

    fn lookup(&self, sigil: u8, inner: &str) -> OpsResult<Value> {
        match sigil {
            b'%' => self.scenario()?.get_value(inner),
            b'&' => self.config.get(inner).map(Value::from),
            b'$' => self.env.var(inner).map(Value::from).ok_or_else(|| {
                ResolutionError::UnknownVariable {
                    name: inner.to_string(),
                }
                .into()
            }),
            b'=' => formula::evaluate(inner, &mut self.rng.borrow_mut()),
            other => Err(ResolutionError::parsing(format!("unknown symbol '{}'", char::from(other))).into()),
        }
    }
}

fn is_escaped(bytes: &[u8], index: usize) -> bool {
    index > 0 && bytes[index - 1] == b'\\'
}

/// Wraps a leading bare sigil and the rest of the text in braces.
fn force_bracket(text: &str) -> Cow<'_, str> {
    let bytes = text.as_bytes();
    match bytes {
        [sigil, next, ..] if SIGILS.contains(sigil) && *next != b'{' && *next != b'\n' => {
            Cow::Owned(format!("{}{{{}}}", char::from(*sigil), &text[1..]))
        }
        _ => Cow::Borrowed(text),
    }
}

/// Byte index of the rightmost unescaped sigil directly followed by `{`.
fn rightmost_expression(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    (0..bytes.len().saturating_sub(1))
        .rev()
        .find(|&i| SIGILS.contains(&bytes[i]) && bytes[i + 1] == b'{' && !is_escaped(bytes, i))
}

/// Position of the `}` matching the `{` at `open`, honouring nesting and
/// backslash escapes.
fn closing_position(text: &str, open: usize) -> OpsResult<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    for i in open..bytes.len() {
        if i > open && is_escaped(bytes, i) {
            continue;
        }
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(ResolutionError::ClosingCharNotFound {
        closing: '}',
        position: open,
        text: text.to_string(),
    }
    .into())
}

/// Removes escape backslashes once resolution reached its fixed point.
pub(crate) fn unescape_value(value: &Value, traversal: Traversal) -> Value {
    match (value, traversal) {
        (Value::String(text), _) => Value::String(formula::unescape(text)),
        (Value::List(items), Traversal::Deep) => {
            Value::List(items.iter().map(|v| unescape_value(v, traversal)).collect())
        }
        (Value::Map(map), Traversal::Deep) => Value::Map(
            map.iter()
                .map(|(k, v)| (formula::unescape(k), unescape_value(v, traversal)))
                .collect(),
        ),
        (other, _) => other.clone(),
    }
}
