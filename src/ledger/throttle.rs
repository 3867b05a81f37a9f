//! Minimum-interval throttling of gateway calls.

use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::trace;

use super::transaction::Transaction;
use super::{LedgerGateway, TxPoll};
use crate::address::Address;
use crate::config::Config;
use crate::error::OpsResult;
use crate::value::Value;

/// Blocks callers until a minimum interval has elapsed since the previous
/// call.
#[derive(Debug)]
pub struct RateThrottle {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateThrottle {
    /// Creates a throttle; a zero interval never blocks.
    #[must_use]
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Minimum interval between two calls.
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Sleeps as long as needed, then records the call.
    pub fn wait(&self) {
        let mut last_call = self.last_call.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let pause = self.min_interval - elapsed;
                trace!("throttling gateway call for {}ms", pause.as_millis());
                thread::sleep(pause);
            }
        }
        *last_call = Some(Instant::now());
    }
}

/// A gateway whose every call goes through a [`RateThrottle`].
#[derive(Debug)]
pub struct ThrottledLedger<G> {
    inner: G,
    throttle: RateThrottle,
}

impl<G: LedgerGateway> ThrottledLedger<G> {
    /// Wraps `inner` with the given minimum interval.
    #[must_use]
    pub const fn new(inner: G, min_interval: Duration) -> Self {
        Self {
            inner,
            throttle: RateThrottle::new(min_interval),
        }
    }

    /// Wraps `inner` with the `MIN_CALL_INTERVAL_MS` of the configuration.
    ///
    /// # Errors
    ///
    /// Returns a resolution error if the option is malformed.
    pub fn from_config(inner: G, config: &Config) -> OpsResult<Self> {
        Ok(Self::new(inner, config.min_call_interval()?))
    }

    /// The wrapped gateway.
    #[must_use]
    pub const fn inner(&self) -> &G {
        &self.inner
    }
}

impl<G: LedgerGateway> LedgerGateway for ThrottledLedger<G> {
    fn submit(&self, tx: &Transaction) -> OpsResult<String> {
        self.throttle.wait();
        self.inner.submit(tx)
    }

    fn get_status(&self, hash: &str) -> OpsResult<TxPoll> {
        self.throttle.wait();
        self.inner.get_status(hash)
    }

    fn query_state(&self, contract: &Address, function: &str, args: &[Vec<u8>]) -> OpsResult<Vec<Value>> {
        self.throttle.wait();
        self.inner.query_state(contract, function, args)
    }

    fn account_nonce(&self, address: &Address) -> OpsResult<u64> {
        self.throttle.wait();
        self.inner.account_nonce(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;

    #[test]
    fn test_throttle_spaces_calls() {
        let throttle = RateThrottle::new(Duration::from_millis(20));
        let started = Instant::now();
        throttle.wait();
        throttle.wait();
        throttle.wait();
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_zero_interval_does_not_block() {
        let throttle = RateThrottle::new(Duration::ZERO);
        let started = Instant::now();
        for _ in 0..100 {
            throttle.wait();
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_throttled_ledger_delegates() {
        let ledger = ThrottledLedger::new(MemoryLedger::new(), Duration::from_millis(1));
        let address = Address::from_bytes([3; 32]);
        assert_eq!(ledger.account_nonce(&address).unwrap(), 0);
        assert!(ledger.query_state(&address, "anything", &[]).unwrap().is_empty());
        assert_eq!(ledger.inner().balance(&address), 0);
    }
}
