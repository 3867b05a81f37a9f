//! Reading step and check definitions into smart fields.

use crate::error::{OpsResult, StepError};
use crate::smart_value::{SmartKind, SmartValue};
use crate::value::{Value, ValueMap};

/// Consumes the fields of one definition.
///
/// Every read removes the field; [`FieldReader::finish`] rejects whatever
/// was left over, so misspelled fields fail loudly.
#[derive(Debug)]
pub struct FieldReader {
    tag: String,
    fields: ValueMap,
}

impl FieldReader {
    /// Wraps the fields of a definition of type `tag`.
    #[must_use]
    pub fn new(tag: impl Into<String>, fields: ValueMap) -> Self {
        Self {
            tag: tag.into(),
            fields,
        }
    }

    /// The definition type, as written.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Removes a field; an explicit `null` counts as absent.
    pub fn take(&mut self, name: &str) -> Option<Value> {
        self.fields.shift_remove(name).filter(|v| !v.is_null())
    }

    /// A field that must be present.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStepDefinition` if the field is missing.
    pub fn required<K: SmartKind>(&mut self, name: &str) -> OpsResult<SmartValue<K>> {
        self.take(name)
            .map(SmartValue::new)
            .ok_or_else(|| StepError::invalid(&self.tag, format!("missing required field '{name}'")).into())
    }

    /// A field that may be absent.
    pub fn optional<K: SmartKind>(&mut self, name: &str) -> Option<SmartValue<K>> {
        self.take(name).map(SmartValue::new)
    }

    /// A field falling back to `default` when absent.
    pub fn with_default<K: SmartKind>(&mut self, name: &str, default: impl Into<Value>) -> SmartValue<K> {
        SmartValue::new(self.take(name).unwrap_or_else(|| default.into()))
    }

    /// Fails on fields nobody read.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStepDefinition` listing the unexpected fields.
    pub fn finish(self) -> OpsResult<()> {
        if self.fields.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = self.fields.keys().map(String::as_str).collect();
        Err(StepError::invalid(self.tag, format!("unexpected field(s): {}", names.join(", "))).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpsError;
    use crate::smart_value::{IntKind, StrKind};

    fn reader(pairs: &[(&str, Value)]) -> FieldReader {
        let fields = pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect();
        FieldReader::new("Wait", fields)
    }

    #[test]
    fn test_required_and_defaults() {
        let mut fields = reader(&[("for_seconds", Value::Int(2)), ("note", Value::Null)]);
        let seconds: SmartValue<IntKind> = fields.required("for_seconds").unwrap();
        assert_eq!(seconds.raw(), &Value::Int(2));
        assert!(fields.optional::<StrKind>("note").is_none());
        let label: SmartValue<StrKind> = fields.with_default("label", "none");
        assert_eq!(label.raw(), &Value::from("none"));
        assert!(fields.finish().is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let mut fields = reader(&[]);
        let err = fields.required::<IntKind>("for_seconds").unwrap_err();
        assert!(matches!(err, OpsError::Step(StepError::InvalidStepDefinition { .. })));
        assert!(format!("{err}").contains("for_seconds"));
    }

    #[test]
    fn test_leftover_fields_are_rejected() {
        let fields = reader(&[("for_secs", Value::Int(2))]);
        let err = fields.finish().unwrap_err();
        assert!(format!("{err}").contains("for_secs"));
    }
}
