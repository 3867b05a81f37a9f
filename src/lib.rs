//! # sceneops - Declarative scenes for blockchain automation
//!
//! sceneops runs YAML *scenes*: ordered lists of steps that deploy and call
//! contracts, move tokens, issue tokens and check what the chain did. State
//! produced along the way (contract addresses, token identifiers, query
//! results, free-form variables) is kept in a persistent, checkpointable
//! *scenario* that later steps read back through symbolic references.
//!
//! ## Core Concepts
//!
//! - **Smart value**: a declarative field such as `"%{my_contract.address}"`,
//!   `"${HOME}"`, `"&gas_price"` or `"={%{amount} * 2}"`, resolved right before
//!   the step that owns it runs
//! - **Scenario**: named, versioned document of entities, tokens and values,
//!   stored per network with checkpoints
//! - **Step / Check**: typed actions built from `type`-tagged definitions, and
//!   post-conditions verified against finalized transactions
//! - **Scene**: a file of steps guarded by network and scenario allow-lists
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sceneops::{execute_path, Config, ExecutionContext, MemoryLedger, ScenarioStore};
//!
//! let config = Config::builtin("devnet")?;
//! let mut store = ScenarioStore::from_config(&config)?;
//! store.load_or_create("integration")?;
//!
//! let mut ctx = ExecutionContext::new(config, store, Arc::new(MemoryLedger::new()))?;
//! execute_path(&mut ctx, "scenes/".as_ref())?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod address;
pub mod config;
pub mod error;
pub mod path;
pub mod value;

// Resolution and persistence
pub mod scenario;
pub mod smart_value;

// Chain access and execution
pub mod accounts;
pub mod execution;
pub mod ledger;

pub use accounts::{AccountsManager, SigningAccount};
pub use address::Address;
pub use config::{Config, EnvProvider, MapEnv, ProcessEnv};
pub use error::{OpsError, OpsResult};
pub use execution::{build_check, build_step, execute_path, Check, ExecutionContext, Scene, Step};
pub use ledger::{LedgerGateway, MemoryLedger, OnChainTransaction, ThrottledLedger, Transaction, TxStatus};
pub use path::KeyPath;
pub use scenario::{EntityData, Scenario, ScenarioStore, TokenData, TokenKind};
pub use smart_value::{Resolver, SmartKind, SmartValue};
pub use value::{Value, ValueMap};
