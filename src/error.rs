//! Error types for sceneops.
//!
//! Errors are grouped by the component that raises them. Resolution and
//! data-store errors are authoring mistakes and are never retried; only
//! gateway network failures are retryable.

use std::path::Path;

use thiserror::Error;

use crate::execution::Check;
use crate::ledger::OnChainTransaction;

/// Errors raised while resolving smart values, paths and formulas.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("Parsing error: {message}")]
    Parsing {
        message: String,
    },

    #[error("Unknown environment variable '{name}'")]
    UnknownVariable {
        name: String,
    },

    #[error("Unknown config option '{option}' for network '{network}'")]
    UnknownConfigOption {
        option: String,
        network: String,
    },

    #[error("Wrong data key path '{path}': {reason}")]
    WrongDataKeyPath {
        path: String,
        reason: String,
    },

    #[error("Maximum of {max} resolution passes exceeded while evaluating {raw}")]
    MaxIteration {
        max: usize,
        raw: String,
    },

    #[error("No closing '{closing}' for the expression at position {position} in '{text}'")]
    ClosingCharNotFound {
        closing: char,
        position: usize,
        text: String,
    },

    #[error("Smart value {raw} has not been evaluated")]
    NotEvaluated {
        raw: String,
    },

    #[error("Formula error in '{formula}': {reason}")]
    Formula {
        formula: String,
        reason: String,
    },

    #[error("Failed to evaluate {raw} (chain: {chain}): {source}")]
    Evaluation {
        raw: String,
        chain: String,
        source: Box<OpsError>,
    },
}

impl ResolutionError {
    /// Creates a parsing error.
    #[must_use]
    pub fn parsing(message: impl Into<String>) -> Self {
        Self::Parsing {
            message: message.into(),
        }
    }

    /// Creates a wrong data key path error.
    #[must_use]
    pub fn wrong_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WrongDataKeyPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the scenario data store.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("No scenario is loaded")]
    UnloadedScenario,

    #[error("Scenario '{name}' is already loaded")]
    ScenarioAlreadyLoaded {
        name: String,
    },

    #[error("Scenario '{name}' does not exist on network '{network}'")]
    UnknownScenario {
        name: String,
        network: String,
    },

    #[error("Scenario '{name}' already exists on network '{network}'")]
    ScenarioAlreadyExists {
        name: String,
        network: String,
    },

    #[error("Checkpoint '{checkpoint}' does not exist for scenario '{scenario}'")]
    UnknownCheckpoint {
        scenario: String,
        checkpoint: String,
    },

    #[error("Entity '{id}' already exists with address {address}")]
    EntityAlreadyExists {
        id: String,
        address: String,
    },

    #[error("Address {address} is already bound to '{existing_id}', cannot bind it to '{new_id}'")]
    AddressConflict {
        address: String,
        existing_id: String,
        new_id: String,
    },

    #[error("Unknown entity '{designation}'")]
    UnknownEntity {
        designation: String,
    },

    #[error("Token '{name}' already exists")]
    TokenAlreadyExists {
        name: String,
    },

    #[error("Unknown token '{name}'")]
    UnknownToken {
        name: String,
    },

    #[error("Invalid scenario or checkpoint name '{name}'")]
    InvalidName {
        name: String,
    },

    #[error("Unsupported data version '{version}'")]
    UnsupportedVersion {
        version: String,
    },

    #[error("No migration registered from data version '{from}' (latest is '{latest}')")]
    MissingMigration {
        from: String,
        latest: String,
    },

    #[error("I/O error on {path}: {message}")]
    Io {
        path: String,
        message: String,
    },

    #[error("Codec error: {message}")]
    Codec {
        message: String,
    },
}

impl DataError {
    /// Creates an I/O error bound to a filesystem path.
    #[must_use]
    pub fn io(path: &Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    /// Creates a codec error.
    #[must_use]
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }
}

/// Context carried by a failed post-condition.
#[derive(Debug)]
pub struct CheckFailure {
    /// The check that did not pass.
    pub check: Check,
    /// The finalized transaction the check was run against.
    pub transaction: OnChainTransaction,
    /// Human-readable reason.
    pub reason: String,
}

/// Errors raised by the step, check and scene machinery.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Unknown step or check type '{tag}'")]
    UnknownStep {
        tag: String,
    },

    #[error("Invalid definition for '{tag}': {reason}")]
    InvalidStepDefinition {
        tag: String,
        reason: String,
    },

    #[error("{} failed on transaction {}: {}", .0.check.type_name(), .0.transaction.hash, .0.reason)]
    CheckFailed(Box<CheckFailure>),

    #[error("Invalid scene {path}: {reason}")]
    InvalidScene {
        path: String,
        reason: String,
    },

    #[error("Network '{network}' is not allowed by scene {scene}")]
    NetworkNotAllowed {
        network: String,
        scene: String,
    },

    #[error("Scenario '{scenario}' is not allowed by scene {scene}")]
    ScenarioNotAllowed {
        scenario: String,
        scene: String,
    },

    #[error("Assertion failed: {expression} evaluated to {value}")]
    AssertionFailed {
        expression: String,
        value: String,
    },
}

impl StepError {
    /// Creates an invalid definition error.
    #[must_use]
    pub fn invalid(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidStepDefinition {
            tag: tag.into(),
            reason: reason.into(),
        }
    }
}

/// Chain-level transaction outcomes and signing failures.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Transaction {hash} failed with status '{status}'")]
    Failed {
        hash: String,
        status: String,
    },

    #[error("Transaction {hash} is invalid")]
    Invalid {
        hash: String,
    },

    #[error("Smart contract execution error in transaction {hash}: {message}")]
    SmartContractExecution {
        hash: String,
        message: String,
    },

    #[error("Internal VM execution error in transaction {hash}: {message}")]
    InternalVmExecution {
        hash: String,
        message: String,
    },

    #[error("Execution error in transaction {hash}: {message}")]
    Execution {
        hash: String,
        message: String,
    },

    #[error("Transaction {hash} was not finalized after {waited_ms}ms")]
    Unfinalized {
        hash: String,
        waited_ms: u128,
    },

    #[error("Signing failed: {message}")]
    Signing {
        message: String,
    },

    #[error("No signing account for '{designation}'")]
    UnknownSigner {
        designation: String,
    },
}

/// Errors reported by a ledger gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway network error: {message}")]
    Network {
        message: String,
    },

    #[error("Transaction {hash} not found")]
    NotFound {
        hash: String,
    },

    #[error("Gateway rejected the request: {message}")]
    Rejected {
        message: String,
    },
}

/// Top-level error type for sceneops.
#[derive(Debug, Error)]
pub enum OpsError {
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Step error: {0}")]
    Step(#[from] StepError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Configuration error: {message}")]
    Config {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl OpsError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if this is a resolution error.
    #[must_use]
    pub const fn is_resolution(&self) -> bool {
        matches!(self, Self::Resolution(_))
    }

    /// Returns true if this is a data store error.
    #[must_use]
    pub const fn is_data(&self) -> bool {
        matches!(self, Self::Data(_))
    }

    /// Returns true if this is a step error.
    #[must_use]
    pub const fn is_step(&self) -> bool {
        matches!(self, Self::Step(_))
    }

    /// Returns true if this is a transaction error.
    #[must_use]
    pub const fn is_transaction(&self) -> bool {
        matches!(self, Self::Transaction(_))
    }

    /// Returns true if this is a gateway error.
    #[must_use]
    pub const fn is_gateway(&self) -> bool {
        matches!(self, Self::Gateway(_))
    }

    /// Returns true if this error is retryable.
    ///
    /// Only transient gateway failures qualify; everything else is an
    /// authoring error or a definitive chain outcome.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Gateway(GatewayError::Network { .. }))
    }

    /// Strips smart value evaluation context and returns the underlying error.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        let mut current = self;
        while let Self::Resolution(ResolutionError::Evaluation { source, .. }) = current {
            current = source;
        }
        current
    }
}

/// Result type alias for sceneops operations.
pub type OpsResult<T> = Result<T, OpsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_error_unknown_variable() {
        let err = ResolutionError::UnknownVariable {
            name: "HOME".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("HOME"));
        assert!(msg.contains("Unknown environment variable"));
    }

    #[test]
    fn test_resolution_error_wrong_path() {
        let err = ResolutionError::wrong_path("a.b[2]", "Expected a list but found a string");
        let msg = format!("{err}");
        assert!(msg.contains("a.b[2]"));
        assert!(msg.contains("Expected a list"));
    }

    #[test]
    fn test_data_error_address_conflict() {
        let err = DataError::AddressConflict {
            address: "erd1xyz".to_string(),
            existing_id: "alice".to_string(),
            new_id: "bob".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("alice"));
        assert!(msg.contains("bob"));
    }

    #[test]
    fn test_transaction_error_unfinalized() {
        let err = TransactionError::Unfinalized {
            hash: "abcd".to_string(),
            waited_ms: 5000,
        };
        let msg = format!("{err}");
        assert!(msg.contains("abcd"));
        assert!(msg.contains("5000ms"));
    }

    #[test]
    fn test_ops_error_from_groups() {
        let err: OpsError = ResolutionError::parsing("bad").into();
        assert!(err.is_resolution());
        let err: OpsError = DataError::UnloadedScenario.into();
        assert!(err.is_data());
        let err: OpsError = StepError::UnknownStep { tag: "Nope".to_string() }.into();
        assert!(err.is_step());
        let err: OpsError = TransactionError::Invalid { hash: "h".to_string() }.into();
        assert!(err.is_transaction());
    }

    #[test]
    fn test_ops_error_retryable() {
        let err: OpsError = GatewayError::Network {
            message: "connection reset".to_string(),
        }
        .into();
        assert!(err.is_gateway());
        assert!(err.is_retryable());

        let err: OpsError = GatewayError::NotFound { hash: "h".to_string() }.into();
        assert!(!err.is_retryable());

        let err: OpsError = TransactionError::Unfinalized {
            hash: "h".to_string(),
            waited_ms: 1,
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_root_cause_unwraps_evaluation_context() {
        let inner: OpsError = ResolutionError::UnknownVariable {
            name: "X".to_string(),
        }
        .into();
        let outer: OpsError = ResolutionError::Evaluation {
            raw: "\"$X\"".to_string(),
            chain: "\"$X\"".to_string(),
            source: Box::new(inner),
        }
        .into();
        assert!(matches!(
            outer.root_cause(),
            OpsError::Resolution(ResolutionError::UnknownVariable { .. })
        ));
        assert!(format!("{outer}").contains("$X"));
    }
}
