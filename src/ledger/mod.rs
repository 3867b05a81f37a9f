//! Ledger gateway abstraction.
//!
//! Steps talk to the chain only through [`LedgerGateway`]. The crate ships
//! an in-process [`MemoryLedger`] used by the CLI and the test suite, and a
//! [`ThrottledLedger`] wrapper enforcing a minimum interval between calls.

mod finality;
mod memory;
mod throttle;
mod transaction;
mod transfers;

pub use finality::{await_finality, raise_on_errors, FinalityPolicy};
pub use memory::{CallHandler, CallRequest, MemoryLedger, QueryHandler};
pub use throttle::{RateThrottle, ThrottledLedger};
pub use transaction::{
    call_data, encode_signed, encode_unsigned, ContractResult, Event, OnChainTransaction, Transaction, TxStatus,
    ARG_SEPARATOR, TRANSACTION_VERSION, WASM_VM,
};
pub use transfers::get_on_chain_transfers;

use crate::address::Address;
use crate::error::OpsResult;
use crate::value::Value;

/// Result of polling a submitted transaction.
#[derive(Debug, Clone)]
pub enum TxPoll {
    /// The transaction is known but not yet final.
    Pending,
    /// The transaction reached a final status.
    Finalized(OnChainTransaction),
}

/// Access to a ledger.
///
/// Implementations must be thread-safe; the engine itself calls them
/// sequentially.
pub trait LedgerGateway: Send + Sync {
    /// Submits a signed transaction and returns its hash.
    ///
    /// # Errors
    ///
    /// Returns a gateway error if the transaction is rejected or the
    /// gateway cannot be reached.
    fn submit(&self, tx: &Transaction) -> OpsResult<String>;

    /// Polls the status of a submitted transaction.
    ///
    /// # Errors
    ///
    /// Returns a gateway error if the hash is unknown or the gateway cannot
    /// be reached.
    fn get_status(&self, hash: &str) -> OpsResult<TxPoll>;

    /// Calls a read-only contract view.
    ///
    /// # Errors
    ///
    /// Returns a gateway error if the view fails.
    fn query_state(&self, contract: &Address, function: &str, args: &[Vec<u8>]) -> OpsResult<Vec<Value>>;

    /// Returns the next nonce expected for an account.
    ///
    /// # Errors
    ///
    /// Returns a gateway error if the gateway cannot be reached.
    fn account_nonce(&self, address: &Address) -> OpsResult<u64>;
}
