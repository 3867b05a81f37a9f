//! Step and check engine, plus the scene orchestrator.
//!
//! Definitions are plain maps tagged by `type`. The [`registry`] turns them
//! into [`Step`] and [`Check`] values whose fields are smart values; each
//! step resolves its fields right before running, against the
//! [`ExecutionContext`] threaded through the whole run.

mod checks;
mod context;
mod fields;
mod registry;
mod scene;
mod steps;
mod transaction;

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

pub use checks::{Check, FailCheck, LogCheck, SuccessCheck, TransfersCheck, TransfersCondition};
pub use context::ExecutionContext;
pub use fields::FieldReader;
pub use registry::{build_check, build_step, check_tags, step_tags, CheckKind, ChecksKind, StepKind, StepsKind};
pub use scene::{execute_path, AccountSource, Scene, DEFAULT_ALLOWED_NETWORKS};
pub use steps::{
    AssertStep, ContractQueryStep, LogStep, LoopCursor, LoopStep, SceneStep, SetSeedStep, SetVarsStep, Step,
    WaitStep,
};
pub use transaction::{
    encode_argument, ContractCallStep, ContractDeployStep, ContractUpgradeStep, FungibleMintStep, ManageTokenRolesStep,
    NonFungibleMintStep, TokenIssueStep, TransferStep, ISSUE_COST,
};

use crate::error::{OpsError, OpsResult, ResolutionError};

const REGEX_CACHE_MAX: usize = 256;

static REGEX_CACHE: OnceLock<RwLock<HashMap<String, regex::Regex>>> = OnceLock::new();

/// Compiles `pattern` once and serves clones afterwards.
pub(crate) fn cached_regex(pattern: &str) -> OpsResult<regex::Regex> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    {
        let guard = cache
            .read()
            .map_err(|_| OpsError::internal("regex cache lock poisoned"))?;
        if let Some(re) = guard.get(pattern) {
            return Ok(re.clone());
        }
    }

    let compiled = regex::Regex::new(pattern)
        .map_err(|e| ResolutionError::parsing(format!("invalid regex '{pattern}': {e}")))?;

    let mut guard = cache
        .write()
        .map_err(|_| OpsError::internal("regex cache lock poisoned"))?;
    if guard.len() >= REGEX_CACHE_MAX {
        guard.clear();
    }
    guard
        .entry(pattern.to_string())
        .or_insert_with(|| compiled.clone());
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_regex_reuses_and_rejects() {
        let first = cached_regex("^ab+c$").unwrap();
        let second = cached_regex("^ab+c$").unwrap();
        assert_eq!(first.as_str(), second.as_str());
        assert!(second.is_match("abbbc"));

        let err = cached_regex("(unclosed").unwrap_err();
        assert!(matches!(err, OpsError::Resolution(ResolutionError::Parsing { .. })));
    }
}
