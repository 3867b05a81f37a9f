//! Tag to constructor tables for steps and checks.

use std::collections::HashMap;
use std::sync::OnceLock;

use log::debug;

use super::checks::{Check, FailCheck, LogCheck, SuccessCheck, TransfersCheck};
use super::fields::FieldReader;
use super::steps::{
    AssertStep, ContractQueryStep, LogStep, LoopStep, SceneStep, SetSeedStep, SetVarsStep, Step, WaitStep,
};
use super::transaction::{
    ContractCallStep, ContractDeployStep, ContractUpgradeStep, FungibleMintStep, ManageTokenRolesStep,
    NonFungibleMintStep, TokenIssueStep, TransferStep,
};
use crate::error::{OpsResult, ResolutionError, StepError};
use crate::smart_value::{Resolver, SmartKind, Traversal};
use crate::value::{Value, ValueMap};

type StepConstructor = fn(FieldReader) -> OpsResult<Step>;
type CheckConstructor = fn(FieldReader) -> OpsResult<Check>;

static STEPS: OnceLock<HashMap<&'static str, StepConstructor>> = OnceLock::new();
static CHECKS: OnceLock<HashMap<&'static str, CheckConstructor>> = OnceLock::new();

fn steps() -> &'static HashMap<&'static str, StepConstructor> {
    STEPS.get_or_init(|| {
        HashMap::from([
            ("ContractDeploy", ContractDeployStep::from_fields as StepConstructor),
            ("ContractUpgrade", ContractUpgradeStep::from_fields as StepConstructor),
            ("ContractCall", ContractCallStep::from_fields as StepConstructor),
            ("ContractQuery", ContractQueryStep::from_fields as StepConstructor),
            ("Transfer", TransferStep::from_fields as StepConstructor),
            ("FungibleIssue", TokenIssueStep::fungible as StepConstructor),
            ("NonFungibleIssue", TokenIssueStep::non_fungible as StepConstructor),
            ("SemiFungibleIssue", TokenIssueStep::semi_fungible as StepConstructor),
            ("MetaIssue", TokenIssueStep::meta as StepConstructor),
            ("FungibleMint", FungibleMintStep::from_fields as StepConstructor),
            ("NonFungibleMint", NonFungibleMintStep::non_fungible as StepConstructor),
            ("SemiFungibleMint", NonFungibleMintStep::semi_fungible as StepConstructor),
            ("MetaMint", NonFungibleMintStep::meta as StepConstructor),
            ("ManageFungibleTokenRoles", ManageTokenRolesStep::fungible as StepConstructor),
            ("ManageNonFungibleTokenRoles", ManageTokenRolesStep::non_fungible as StepConstructor),
            ("ManageSemiFungibleTokenRoles", ManageTokenRolesStep::semi_fungible as StepConstructor),
            ("ManageMetaTokenRoles", ManageTokenRolesStep::meta as StepConstructor),
            ("Loop", LoopStep::from_fields as StepConstructor),
            ("Scene", SceneStep::from_fields as StepConstructor),
            ("SetVars", SetVarsStep::from_fields as StepConstructor),
            ("Wait", WaitStep::from_fields as StepConstructor),
            ("Log", LogStep::from_fields as StepConstructor),
            ("Assert", AssertStep::from_fields as StepConstructor),
            ("SetSeed", SetSeedStep::from_fields as StepConstructor),
        ])
    })
}

fn checks() -> &'static HashMap<&'static str, CheckConstructor> {
    CHECKS.get_or_init(|| {
        HashMap::from([
            ("Success", SuccessCheck::from_fields as CheckConstructor),
            ("Fail", FailCheck::from_fields as CheckConstructor),
            ("Transfers", TransfersCheck::from_fields as CheckConstructor),
            ("Log", LogCheck::from_fields as CheckConstructor),
        ])
    })
}

/// Registered step tags, sorted, without the optional `Step` suffix.
#[must_use]
pub fn step_tags() -> Vec<&'static str> {
    let mut tags: Vec<&'static str> = steps().keys().copied().collect();
    tags.sort_unstable();
    tags
}

/// Registered check tags, sorted, without the optional `Check` suffix.
#[must_use]
pub fn check_tags() -> Vec<&'static str> {
    let mut tags: Vec<&'static str> = checks().keys().copied().collect();
    tags.sort_unstable();
    tags
}

/// Splits a definition into its tag, its skip flag and its remaining fields.
fn split_definition(definition: Value, what: &str) -> OpsResult<(String, bool, ValueMap)> {
    let Value::Map(mut fields) = definition else {
        return Err(StepError::invalid(
            what,
            format!("a {what} definition must be a map, got {}", definition.repr()),
        )
        .into());
    };
    let tag = match fields.shift_remove("type") {
        Some(Value::String(tag)) => tag,
        Some(other) => {
            return Err(StepError::invalid(what, format!("'type' must be a string, got {}", other.repr())).into())
        }
        None => return Err(StepError::invalid(what, "missing required field 'type'").into()),
    };
    let skip = match fields.shift_remove("skip") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(skip)) => skip,
        Some(other) => {
            return Err(StepError::invalid(&tag, format!("'skip' must be a boolean, got {}", other.repr())).into())
        }
    };
    Ok((tag, skip, fields))
}

/// Builds a step from its definition map.
///
/// The `Step` suffix of the tag is optional. Returns `Ok(None)` for a
/// definition flagged `skip: true`.
///
/// # Errors
///
/// Returns `UnknownStep` for an unregistered tag and
/// `InvalidStepDefinition` for a malformed definition.
pub fn build_step(definition: Value) -> OpsResult<Option<Step>> {
    let (tag, skip, fields) = split_definition(definition, "step")?;
    let name = tag.strip_suffix("Step").unwrap_or(&tag);
    let constructor = steps()
        .get(name)
        .ok_or_else(|| StepError::UnknownStep { tag: tag.clone() })?;
    if skip {
        debug!("skipping {tag}");
        return Ok(None);
    }
    constructor(FieldReader::new(tag, fields)).map(Some)
}

/// Builds a check from its definition map.
///
/// The `Check` suffix of the tag is optional. Returns `Ok(None)` for a
/// definition flagged `skip: true`.
///
/// # Errors
///
/// Returns `UnknownStep` for an unregistered tag and
/// `InvalidStepDefinition` for a malformed definition.
pub fn build_check(definition: Value) -> OpsResult<Option<Check>> {
    let (tag, skip, fields) = split_definition(definition, "check")?;
    let name = tag.strip_suffix("Check").unwrap_or(&tag);
    let constructor = checks()
        .get(name)
        .ok_or_else(|| StepError::UnknownStep { tag: tag.clone() })?;
    if skip {
        debug!("skipping {tag}");
        return Ok(None);
    }
    constructor(FieldReader::new(tag, fields)).map(Some)
}

fn expect_list(value: Value, what: &str) -> OpsResult<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items),
        other => Err(ResolutionError::parsing(format!("{what} must be a list, got {}", other.repr())).into()),
    }
}

/// A nested step definition. Its own fields stay unresolved.
#[derive(Debug, Clone, Copy)]
pub struct StepKind;

impl SmartKind for StepKind {
    type Output = Option<Step>;
    const NAME: &'static str = "step";
    const TRAVERSAL: Traversal = Traversal::Shallow;

    fn enforce(value: Value, _resolver: &Resolver<'_>) -> OpsResult<Self::Output> {
        build_step(value)
    }

    fn describe(_output: &Self::Output) -> Option<Value> {
        None
    }
}

/// A list of nested step definitions; skipped ones are dropped.
#[derive(Debug, Clone, Copy)]
pub struct StepsKind;

impl SmartKind for StepsKind {
    type Output = Vec<Step>;
    const NAME: &'static str = "steps";
    const TRAVERSAL: Traversal = Traversal::Shallow;

    fn enforce(value: Value, _resolver: &Resolver<'_>) -> OpsResult<Self::Output> {
        let mut built = Vec::new();
        for definition in expect_list(value, "steps")? {
            built.extend(build_step(definition)?);
        }
        Ok(built)
    }

    fn describe(_output: &Self::Output) -> Option<Value> {
        None
    }
}

/// A nested check definition.
#[derive(Debug, Clone, Copy)]
pub struct CheckKind;

impl SmartKind for CheckKind {
    type Output = Option<Check>;
    const NAME: &'static str = "check";
    const TRAVERSAL: Traversal = Traversal::Shallow;

    fn enforce(value: Value, _resolver: &Resolver<'_>) -> OpsResult<Self::Output> {
        build_check(value)
    }

    fn describe(_output: &Self::Output) -> Option<Value> {
        None
    }
}

/// A list of nested check definitions; skipped ones are dropped.
#[derive(Debug, Clone, Copy)]
pub struct ChecksKind;

impl SmartKind for ChecksKind {
    type Output = Vec<Check>;
    const NAME: &'static str = "checks";
    const TRAVERSAL: Traversal = Traversal::Shallow;

    fn enforce(value: Value, _resolver: &Resolver<'_>) -> OpsResult<Self::Output> {
        let mut built = Vec::new();
        for definition in expect_list(value, "checks")? {
            built.extend(build_check(definition)?);
        }
        Ok(built)
    }

    fn describe(_output: &Self::Output) -> Option<Value> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpsError;

    fn definition(pairs: &[(&str, Value)]) -> Value {
        Value::Map(pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect())
    }

    #[test]
    fn test_suffix_is_optional() {
        let short = build_step(definition(&[("type", "Wait".into()), ("for_seconds", 0.into())])).unwrap();
        let long = build_step(definition(&[("type", "WaitStep".into()), ("for_seconds", 0.into())])).unwrap();
        assert_eq!(short.unwrap().type_name(), "Wait");
        assert_eq!(long.unwrap().type_name(), "Wait");

        let check = build_check(definition(&[("type", "SuccessCheck".into())])).unwrap();
        assert_eq!(check.unwrap().type_name(), "SuccessCheck");
    }

    #[test]
    fn test_unknown_tag() {
        let err = build_step(definition(&[("type", "Teleport".into())])).unwrap_err();
        assert!(matches!(err, OpsError::Step(StepError::UnknownStep { ref tag }) if tag == "Teleport"));
        // checks and steps live in separate tables
        assert!(build_check(definition(&[("type", "Wait".into())])).is_err());
    }

    #[test]
    fn test_skip_drops_the_definition() {
        let skipped = build_step(definition(&[("type", "Wait".into()), ("skip", true.into())])).unwrap();
        assert!(skipped.is_none());
        let err = build_step(definition(&[("type", "Wait".into()), ("skip", "yes".into())])).unwrap_err();
        assert!(matches!(err, OpsError::Step(StepError::InvalidStepDefinition { .. })));
    }

    #[test]
    fn test_malformed_definitions() {
        assert!(build_step(Value::from("Wait")).is_err());
        assert!(build_step(definition(&[("for_seconds", 1.into())])).is_err());
        let err = build_step(definition(&[("type", "Wait".into()), ("for_secs", 1.into())])).unwrap_err();
        assert!(format!("{err}").contains("for_secs"));
    }

    #[test]
    fn test_tags_are_listed() {
        let tags = step_tags();
        assert!(tags.contains(&"ContractDeploy"));
        assert!(tags.contains(&"Loop"));
        assert_eq!(check_tags(), vec!["Fail", "Log", "Success", "Transfers"]);
    }

    #[test]
    fn test_token_management_tags_keep_their_kind() {
        for tag in [
            "ManageFungibleTokenRoles",
            "ManageNonFungibleTokenRoles",
            "ManageSemiFungibleTokenRoles",
            "ManageMetaTokenRoles",
        ] {
            let step = build_step(definition(&[
                ("type", tag.into()),
                ("sender", "alice".into()),
                ("is_set", true.into()),
                ("token_identifier", "TOK-abcdef".into()),
                ("target", "alice".into()),
                ("roles", Value::List(vec!["esdt_transfer_role".into()])),
            ]))
            .unwrap()
            .unwrap();
            assert_eq!(step.type_name(), tag);
        }
        for tag in ["NonFungibleMint", "SemiFungibleMint", "MetaMint"] {
            let step = build_step(definition(&[
                ("type", format!("{tag}Step").into()),
                ("sender", "alice".into()),
                ("token_identifier", "TOK-abcdef".into()),
                ("amount", 1.into()),
            ]))
            .unwrap()
            .unwrap();
            assert_eq!(step.type_name(), tag);
        }
        let err = build_step(definition(&[("type", "ManageMetaTokenRoles".into()), ("sender", "alice".into())]))
            .unwrap_err();
        assert!(format!("{err}").contains("is_set"));
    }
}
