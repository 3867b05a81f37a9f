//! Waiting for transactions to be final and turning failures into errors.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::transaction::{OnChainTransaction, TxStatus};
use super::{LedgerGateway, TxPoll};
use crate::config::Config;
use crate::error::{OpsResult, TransactionError};

/// How long and how often to poll for finality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalityPolicy {
    /// Total time to wait before giving up.
    pub timeout: Duration,
    /// Pause between two polls.
    pub refresh: Duration,
    /// Extra attempts allowed per poll on transient gateway errors.
    pub read_retries: u32,
}

impl Default for FinalityPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            refresh: Duration::from_secs(1),
            read_retries: 3,
        }
    }
}

impl FinalityPolicy {
    /// Reads the policy from the network configuration.
    ///
    /// # Errors
    ///
    /// Returns a resolution error if an option is missing or malformed.
    pub fn from_config(config: &Config) -> OpsResult<Self> {
        Ok(Self {
            timeout: config.tx_timeout()?,
            refresh: config.tx_refresh_period()?,
            read_retries: config.tx_read_retries()?,
        })
    }

    /// Number of polls made before timing out (at least one).
    #[must_use]
    pub fn periods(&self) -> u128 {
        if self.refresh.is_zero() {
            return 1;
        }
        (self.timeout.as_millis() / self.refresh.as_millis()).max(1)
    }
}

/// Polls the gateway until the transaction is final.
///
/// Transient gateway errors are retried up to `read_retries` times per poll;
/// other errors are returned immediately.
///
/// # Errors
///
/// Returns [`TransactionError::Unfinalized`] once the timeout elapses, or
/// the first non-retryable gateway error.
pub fn await_finality(
    gateway: &dyn LedgerGateway,
    hash: &str,
    policy: &FinalityPolicy,
) -> OpsResult<OnChainTransaction> {
    let started = Instant::now();
    for _ in 0..policy.periods() {
        thread::sleep(policy.refresh);
        if let TxPoll::Finalized(tx) = poll_with_retries(gateway, hash, policy.read_retries)? {
            debug!("transaction {hash} finalized with status {}", tx.status.as_str());
            return Ok(tx);
        }
    }
    Err(TransactionError::Unfinalized {
        hash: hash.to_string(),
        waited_ms: started.elapsed().as_millis(),
    }
    .into())
}

fn poll_with_retries(gateway: &dyn LedgerGateway, hash: &str, retries: u32) -> OpsResult<TxPoll> {
    let mut attempt = 0;
    loop {
        match gateway.get_status(hash) {
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                warn!("reading transaction {hash} failed (attempt {attempt}/{retries}): {e}");
            }
            other => return other,
        }
    }
}

/// Turns the failure modes of a finalized transaction into errors.
///
/// # Errors
///
/// Returns the matching [`TransactionError`] when the status is not a
/// success or when an error event was emitted.
pub fn raise_on_errors(tx: &OnChainTransaction) -> OpsResult<()> {
    let hash = || tx.hash.clone();
    let err = match tx.status {
        TxStatus::Success => None,
        TxStatus::Invalid => Some(TransactionError::Invalid { hash: hash() }),
        TxStatus::Failed => Some(TransactionError::Failed {
            hash: hash(),
            status: tx.status.as_str().to_string(),
        }),
        TxStatus::Pending => Some(TransactionError::Unfinalized {
            hash: hash(),
            waited_ms: 0,
        }),
    };
    if let Some(err) = err {
        return Err(err.into());
    }

    let event_error = tx.events.iter().find_map(|event| {
        let message = event_message(event);
        match event.identifier.as_str() {
            "InternalVmExecutionError" => Some(TransactionError::SmartContractExecution { hash: hash(), message }),
            "internalVMErrors" => Some(TransactionError::InternalVmExecution { hash: hash(), message }),
            "signalError" => Some(TransactionError::Execution { hash: hash(), message }),
            _ => None,
        }
    });
    match event_error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn event_message(event: &super::Event) -> String {
    let topics: Vec<String> = event
        .topics
        .iter()
        .map(|t| String::from_utf8_lossy(t).into_owned())
        .collect();
    let data = String::from_utf8_lossy(&event.data);
    if data.is_empty() {
        topics.join(" ")
    } else {
        format!("{} {data}", topics.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::SigningAccount;
    use crate::address::Address;
    use crate::error::OpsError;
    use crate::ledger::{Event, MemoryLedger, Transaction};

    fn fast_policy() -> FinalityPolicy {
        FinalityPolicy {
            timeout: Duration::from_millis(20),
            refresh: Duration::from_millis(1),
            read_retries: 2,
        }
    }

    fn finalized(status: TxStatus, events: Vec<Event>) -> OnChainTransaction {
        OnChainTransaction {
            hash: "abc".to_string(),
            sender: Address::zero(),
            receiver: Address::zero(),
            value: 0,
            data: Vec::new(),
            status,
            timestamp: 0,
            results: Vec::new(),
            events,
        }
    }

    fn submit_transfer(ledger: &MemoryLedger) -> String {
        let account = SigningAccount::from_secret("alice", [1; 32]);
        ledger.fund(&account.address(), 10);
        let mut tx = Transaction::new(account.address(), Address::from_bytes([9; 32]), 1, Vec::new());
        account.sign(&mut tx).unwrap();
        ledger.submit(&tx).unwrap()
    }

    #[test]
    fn test_periods() {
        assert_eq!(fast_policy().periods(), 20);
        let policy = FinalityPolicy {
            timeout: Duration::ZERO,
            refresh: Duration::from_secs(1),
            read_retries: 0,
        };
        assert_eq!(policy.periods(), 1);
    }

    #[test]
    fn test_await_pending_then_final() {
        let ledger = MemoryLedger::new().with_pending_polls(3);
        let hash = submit_transfer(&ledger);
        let tx = await_finality(&ledger, &hash, &fast_policy()).unwrap();
        assert_eq!(tx.status, TxStatus::Success);
    }

    #[test]
    fn test_await_times_out() {
        let ledger = MemoryLedger::new().with_pending_polls(1000);
        let hash = submit_transfer(&ledger);
        let err = await_finality(&ledger, &hash, &fast_policy()).unwrap_err();
        assert!(matches!(err, OpsError::Transaction(TransactionError::Unfinalized { .. })));
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let ledger = MemoryLedger::new();
        let hash = submit_transfer(&ledger);
        ledger.fail_next_reads(2);
        assert!(await_finality(&ledger, &hash, &fast_policy()).is_ok());

        ledger.fail_next_reads(10);
        let err = await_finality(&ledger, &hash, &fast_policy()).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_raise_on_errors() {
        assert!(raise_on_errors(&finalized(TxStatus::Success, Vec::new())).is_ok());
        assert!(matches!(
            raise_on_errors(&finalized(TxStatus::Invalid, Vec::new())),
            Err(OpsError::Transaction(TransactionError::Invalid { .. }))
        ));
        assert!(matches!(
            raise_on_errors(&finalized(TxStatus::Failed, Vec::new())),
            Err(OpsError::Transaction(TransactionError::Failed { .. }))
        ));

        let signal = Event::new("signalError", Address::zero(), vec![b"bad amount".to_vec()]);
        let err = raise_on_errors(&finalized(TxStatus::Success, vec![signal])).unwrap_err();
        assert!(matches!(err, OpsError::Transaction(TransactionError::Execution { ref message, .. }) if message == "bad amount"));

        let vm = Event::new("internalVMErrors", Address::zero(), Vec::new());
        assert!(matches!(
            raise_on_errors(&finalized(TxStatus::Success, vec![vm])),
            Err(OpsError::Transaction(TransactionError::InternalVmExecution { .. }))
        ));
    }
}
