//! Scenario data store.
//!
//! A scenario is the persistent memory of scene runs on one network: the
//! accounts, contracts and tokens they created plus any value a step chose
//! to keep. Documents are versioned JSON files with named checkpoints.

pub mod codec;
mod document;
mod entity;
pub mod migration;
mod store;

pub use document::{now_timestamp, Scenario};
pub use entity::{AccountData, ContractData, EntityData, ExternalContractData, TokenData, TokenKind};
pub use store::ScenarioStore;
