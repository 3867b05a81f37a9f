//! Post-conditions run against finalized transactions.

use log::debug;

use super::cached_regex;
use super::fields::FieldReader;
use crate::error::{CheckFailure, OpsResult, StepError};
use crate::ledger::{get_on_chain_transfers, raise_on_errors, Event, OnChainTransaction};
use crate::smart_value::{
    AddressKind, BoolKind, OnChainTransfer, OnChainTransfersKind, RawListKind, Resolver, SmartValue, StrKind,
};
use crate::value::Value;

/// A post-condition.
#[derive(Debug, Clone)]
pub enum Check {
    Success(SuccessCheck),
    Fail(FailCheck),
    Transfers(TransfersCheck),
    Log(LogCheck),
}

impl Check {
    /// Name used in logs and errors.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Success(_) => "SuccessCheck",
            Self::Fail(_) => "FailCheck",
            Self::Transfers(_) => "TransfersCheck",
            Self::Log(_) => "LogCheck",
        }
    }

    /// The default check of transaction steps.
    #[must_use]
    pub const fn success() -> Self {
        Self::Success(SuccessCheck)
    }

    /// Resolves the smart fields of the check.
    ///
    /// # Errors
    ///
    /// Propagates resolution errors.
    pub fn evaluate(&mut self, resolver: &Resolver<'_>) -> OpsResult<()> {
        match self {
            Self::Success(_) | Self::Fail(_) => Ok(()),
            Self::Transfers(check) => check.evaluate(resolver),
            Self::Log(check) => check.evaluate(resolver),
        }
    }

    /// Runs an evaluated check; `Ok(None)` means it passed, `Ok(Some(reason))`
    /// that it did not.
    ///
    /// # Errors
    ///
    /// Returns an error if a field was not evaluated or a pattern is invalid.
    pub fn verify(&self, tx: &OnChainTransaction) -> OpsResult<Option<String>> {
        match self {
            Self::Success(_) => Ok(raise_on_errors(tx).err().map(|e| e.to_string())),
            Self::Fail(_) => Ok(raise_on_errors(tx)
                .is_ok()
                .then(|| format!("transaction {} was expected to fail", tx.hash))),
            Self::Transfers(check) => check.verify(tx),
            Self::Log(check) => check.verify(tx),
        }
    }

    /// Evaluates then verifies the check.
    ///
    /// # Errors
    ///
    /// Returns `CheckFailed` carrying the check and the transaction when the
    /// check does not pass.
    pub fn raise_on_failure(&mut self, resolver: &Resolver<'_>, tx: &OnChainTransaction) -> OpsResult<()> {
        self.evaluate(resolver)?;
        match self.verify(tx)? {
            None => {
                debug!("{} passed on transaction {}", self.type_name(), tx.hash);
                Ok(())
            }
            Some(reason) => Err(StepError::CheckFailed(Box::new(CheckFailure {
                check: self.clone(),
                transaction: tx.clone(),
                reason,
            }))
            .into()),
        }
    }
}

/// Passes when the transaction succeeded without error events.
#[derive(Debug, Clone, Copy)]
pub struct SuccessCheck;

impl SuccessCheck {
    pub(crate) fn from_fields(fields: FieldReader) -> OpsResult<Check> {
        fields.finish()?;
        Ok(Check::Success(Self))
    }
}

/// Passes when the transaction failed.
#[derive(Debug, Clone, Copy)]
pub struct FailCheck;

impl FailCheck {
    pub(crate) fn from_fields(fields: FieldReader) -> OpsResult<Check> {
        fields.finish()?;
        Ok(Check::Fail(Self))
    }
}

/// How expected transfers are compared with the executed ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransfersCondition {
    /// Same transfers, no more no fewer.
    Exact,
    /// Every expected transfer happened, others may have too.
    Included,
}

impl TransfersCondition {
    fn parse(text: &str) -> OpsResult<Self> {
        match text {
            "exact" => Ok(Self::Exact),
            "included" => Ok(Self::Included),
            other => Err(StepError::invalid(
                "TransfersCheck",
                format!("condition must be 'exact' or 'included', got '{other}'"),
            )
            .into()),
        }
    }
}

/// Compares the expected transfers with the executed ones.
#[derive(Debug, Clone)]
pub struct TransfersCheck {
    expected_transfers: SmartValue<OnChainTransfersKind>,
    condition: SmartValue<StrKind>,
    include_gas_refund: SmartValue<BoolKind>,
}

impl TransfersCheck {
    pub(crate) fn from_fields(mut fields: FieldReader) -> OpsResult<Check> {
        let check = Self {
            expected_transfers: fields.required("expected_transfers")?,
            condition: fields.with_default("condition", "exact"),
            include_gas_refund: fields.with_default("include_gas_refund", false),
        };
        fields.finish()?;
        Ok(Check::Transfers(check))
    }

    fn evaluate(&mut self, resolver: &Resolver<'_>) -> OpsResult<()> {
        self.expected_transfers.evaluate(resolver)?;
        self.condition.evaluate(resolver)?;
        self.include_gas_refund.evaluate(resolver)
    }

    fn verify(&self, tx: &OnChainTransaction) -> OpsResult<Option<String>> {
        let condition = TransfersCondition::parse(self.condition.get()?)?;
        let actual = get_on_chain_transfers(tx, *self.include_gas_refund.get()?);
        Ok(compare_transfers(self.expected_transfers.get()?, actual, condition))
    }
}

/// Matches expected transfers one for one against the actual ones.
///
/// Each expected transfer consumes the first equal actual transfer, so
/// duplicates must appear as many times on both sides.
fn compare_transfers(
    expected: &[OnChainTransfer],
    mut actual: Vec<OnChainTransfer>,
    condition: TransfersCondition,
) -> Option<String> {
    let mut missing = Vec::new();
    for transfer in expected {
        match actual.iter().position(|candidate| candidate == transfer) {
            Some(index) => {
                actual.remove(index);
            }
            None => missing.push(transfer.to_string()),
        }
    }
    if !missing.is_empty() {
        return Some(format!("missing transfers: {}", missing.join("; ")));
    }
    if condition == TransfersCondition::Exact && !actual.is_empty() {
        let extra: Vec<String> = actual.iter().map(ToString::to_string).collect();
        return Some(format!("unexpected transfers: {}", extra.join("; ")));
    }
    None
}

/// Looks for an event by identifier, optionally matching its emitter,
/// topics and data against regex patterns.
#[derive(Debug, Clone)]
pub struct LogCheck {
    identifier: SmartValue<StrKind>,
    emitter: Option<SmartValue<AddressKind>>,
    topics: Option<SmartValue<RawListKind>>,
    data: Option<SmartValue<StrKind>>,
}

impl LogCheck {
    pub(crate) fn from_fields(mut fields: FieldReader) -> OpsResult<Check> {
        let check = Self {
            identifier: fields.required("identifier")?,
            emitter: fields.optional("emitter"),
            topics: fields.optional("topics"),
            data: fields.optional("data"),
        };
        fields.finish()?;
        Ok(Check::Log(check))
    }

    fn evaluate(&mut self, resolver: &Resolver<'_>) -> OpsResult<()> {
        self.identifier.evaluate(resolver)?;
        if let Some(emitter) = &mut self.emitter {
            emitter.evaluate(resolver)?;
        }
        if let Some(topics) = &mut self.topics {
            topics.evaluate(resolver)?;
        }
        if let Some(data) = &mut self.data {
            data.evaluate(resolver)?;
        }
        Ok(())
    }

    fn verify(&self, tx: &OnChainTransaction) -> OpsResult<Option<String>> {
        let identifier = self.identifier.get()?;
        for event in tx.events.iter().filter(|e| &e.identifier == identifier) {
            if self.matches(event)? {
                return Ok(None);
            }
        }
        Ok(Some(format!("no matching '{identifier}' event")))
    }

    fn matches(&self, event: &Event) -> OpsResult<bool> {
        if let Some(emitter) = &self.emitter {
            if event.address != *emitter.get()? {
                return Ok(false);
            }
        }
        if let Some(topics) = &self.topics {
            let patterns = topics.get()?;
            if patterns.len() > event.topics.len() {
                return Ok(false);
            }
            for (pattern, topic) in patterns.iter().zip(&event.topics) {
                let pattern = match pattern {
                    Value::String(pattern) => pattern.clone(),
                    other => other.to_string(),
                };
                if !cached_regex(&pattern)?.is_match(&readable(topic)) {
                    return Ok(false);
                }
            }
        }
        if let Some(data) = &self.data {
            if !cached_regex(data.get()?)?.is_match(&readable(&event.data)) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Topic or data as text when it is valid UTF-8, as hex otherwise.
fn readable(bytes: &[u8]) -> String {
    std::str::from_utf8(bytes).map_or_else(|_| hex::encode(bytes), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::address::Address;
    use crate::config::{Config, MapEnv};
    use crate::error::OpsError;
    use crate::ledger::{ContractResult, TxStatus};
    use crate::smart_value::TokenRef;
    use crate::value::ValueMap;

    fn alice() -> Address {
        Address::from_bytes([1; 32])
    }

    fn bob() -> Address {
        Address::from_bytes([2; 32])
    }

    fn transfer(amount: u128) -> OnChainTransfer {
        OnChainTransfer {
            sender: alice(),
            receiver: bob(),
            token: TokenRef::native(),
            amount,
        }
    }

    fn tx(status: TxStatus, events: Vec<Event>, results: Vec<ContractResult>) -> OnChainTransaction {
        OnChainTransaction {
            hash: "h".to_string(),
            sender: alice(),
            receiver: bob(),
            value: 0,
            data: Vec::new(),
            status,
            timestamp: 0,
            results,
            events,
        }
    }

    fn with_resolver<T>(f: impl FnOnce(&Resolver<'_>) -> T) -> T {
        let config = Config::builtin("devnet").unwrap();
        let env = MapEnv::new();
        let rng = RefCell::new(StdRng::seed_from_u64(0));
        f(&Resolver::new(&config, &env, &rng))
    }

    fn build(tag: &str, pairs: &[(&str, Value)]) -> Check {
        let fields: ValueMap = pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect();
        let reader = FieldReader::new(tag, fields);
        match tag {
            "Transfers" => TransfersCheck::from_fields(reader),
            "Log" => LogCheck::from_fields(reader),
            _ => SuccessCheck::from_fields(reader),
        }
        .unwrap()
    }

    #[test]
    fn test_compare_transfers_multiset() {
        let actual = vec![transfer(1), transfer(1), transfer(2)];
        assert!(compare_transfers(&[transfer(1), transfer(1), transfer(2)], actual.clone(), TransfersCondition::Exact).is_none());
        assert!(compare_transfers(&[transfer(1), transfer(2)], actual.clone(), TransfersCondition::Exact).is_some());
        assert!(compare_transfers(&[transfer(1), transfer(2)], actual.clone(), TransfersCondition::Included).is_none());
        let reason = compare_transfers(&[transfer(2), transfer(2)], actual, TransfersCondition::Included).unwrap();
        assert!(reason.contains("missing"));
    }

    #[test]
    fn test_success_and_fail_checks() {
        let failed = tx(TxStatus::Failed, Vec::new(), Vec::new());
        let ok = tx(TxStatus::Success, Vec::new(), Vec::new());
        assert!(Check::success().verify(&ok).unwrap().is_none());
        assert!(Check::success().verify(&failed).unwrap().is_some());
        assert!(Check::Fail(FailCheck).verify(&failed).unwrap().is_none());
        assert!(Check::Fail(FailCheck).verify(&ok).unwrap().is_some());
    }

    #[test]
    fn test_transfers_check_raises_check_failed() {
        let expected = Value::List(vec![Value::List(vec![
            Value::from(alice().to_bech32()),
            Value::from(bob().to_bech32()),
            Value::from("EGLD"),
            Value::Int(5),
        ])]);
        let mut check = build("Transfers", &[("expected_transfers", expected)]);
        let mut paid = tx(TxStatus::Success, Vec::new(), Vec::new());
        paid.value = 5;
        with_resolver(|r| check.raise_on_failure(r, &paid)).unwrap();

        paid.value = 6;
        let err = with_resolver(|r| check.raise_on_failure(r, &paid)).unwrap_err();
        let OpsError::Step(StepError::CheckFailed(failure)) = err else {
            panic!("expected CheckFailed");
        };
        assert_eq!(failure.check.type_name(), "TransfersCheck");
        assert_eq!(failure.transaction.value, 6);
    }

    #[test]
    fn test_log_check_patterns() {
        let event = Event::new("swap", bob(), vec![b"WEGLD-abcdef".to_vec(), vec![0xff, 0x01]]).with_data("done");
        let swapped = tx(TxStatus::Success, vec![event], Vec::new());

        let topics = Value::List(vec![Value::from("^WEGLD-"), Value::from("ff01")]);
        let mut check = build("Log", &[("identifier", Value::from("swap")), ("topics", topics), ("data", Value::from("do.e"))]);
        assert!(with_resolver(|r| check.raise_on_failure(r, &swapped)).is_ok());

        let mut check = build("Log", &[("identifier", Value::from("swap")), ("data", Value::from("^fail"))]);
        assert!(with_resolver(|r| check.raise_on_failure(r, &swapped)).is_err());

        let mut check = build("Log", &[("identifier", Value::from("deposit"))]);
        assert!(with_resolver(|r| check.raise_on_failure(r, &swapped)).is_err());
    }

    #[test]
    fn test_invalid_condition() {
        let mut check = build(
            "Transfers",
            &[("expected_transfers", Value::List(Vec::new())), ("condition", Value::from("some"))],
        );
        let ok = tx(TxStatus::Success, Vec::new(), Vec::new());
        assert!(with_resolver(|r| check.raise_on_failure(r, &ok)).is_err());
    }
}
