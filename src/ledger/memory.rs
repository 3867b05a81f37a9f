//! In-process ledger.
//!
//! `MemoryLedger` executes transactions synchronously at submission and keeps
//! every account, contract and transaction in memory. It understands the
//! subset of the chain protocol the built-in steps produce: native and ESDT
//! transfers, contract deployment and upgrade, token issuance and special
//! roles on the system contract, local mints, non-fungible creations and
//! contract calls. Mints of tokens issued on this ledger require the matching
//! role; tokens funded directly are not checked. Contract logic is supplied by
//! registered call and query handlers keyed by function name; functions
//! without a handler succeed without returning data.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use log::{debug, info};

use super::transaction::{
    encode_unsigned, ContractResult, Event, OnChainTransaction, Transaction, TxStatus, ARG_SEPARATOR, WASM_VM,
};
use super::{LedgerGateway, TxPoll};
use crate::address::{Address, ESDT_SYSTEM_CONTRACT};
use crate::error::{GatewayError, OpsError, OpsResult};
use crate::scenario::now_timestamp;
use crate::smart_value::{TokenRef, TokenTransfer, NATIVE_TOKEN};
use crate::value::Value;

/// Seconds between two simulated blocks.
const BLOCK_TIME: i64 = 6;

const MULTI_TRANSFER_NATIVE: &str = "EGLD-000000";

/// A contract call as seen by a [`CallHandler`].
#[derive(Debug)]
pub struct CallRequest<'a> {
    pub caller: Address,
    pub contract: Address,
    pub function: &'a str,
    pub args: &'a [Vec<u8>],
    pub value: u128,
    pub transfers: &'a [TokenTransfer],
}

/// Contract endpoint logic: returns the raw results or an error message.
pub type CallHandler = Box<dyn Fn(&CallRequest<'_>) -> Result<Vec<Vec<u8>>, String> + Send + Sync>;

/// Contract view logic: receives the contract and the raw arguments.
pub type QueryHandler = Box<dyn Fn(&Address, &[Vec<u8>]) -> Result<Vec<Value>, String> + Send + Sync>;

fn lock_err(context: &'static str) -> OpsError {
    OpsError::internal(format!("poisoned lock: {context}"))
}

fn rejected(message: impl Into<String>) -> OpsError {
    GatewayError::Rejected {
        message: message.into(),
    }
    .into()
}

#[derive(Debug, Clone, Default)]
struct AccountState {
    nonce: u64,
    balance: u128,
    tokens: HashMap<TokenRef, u128>,
}

#[derive(Debug, Clone)]
struct TokenState {
    owner: Address,
    roles: HashMap<Address, BTreeSet<String>>,
    last_nonce: u64,
}

impl TokenState {
    fn require_role(&self, holder: &Address, role: &str, identifier: &str) -> Result<(), String> {
        if self.roles.get(holder).is_some_and(|roles| roles.contains(role)) {
            Ok(())
        } else {
            Err(format!("{holder} does not have the {role} role on {identifier}"))
        }
    }
}

#[derive(Debug, Clone)]
struct ContractState {
    owner: Address,
    code_hash: String,
}

#[derive(Debug)]
struct StoredTx {
    tx: OnChainTransaction,
    pending_polls: u32,
}

#[derive(Debug, Default)]
struct Outcome {
    events: Vec<Event>,
    results: Vec<ContractResult>,
}

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<Address, AccountState>,
    contracts: HashMap<Address, ContractState>,
    tokens: HashMap<String, TokenState>,
    transactions: HashMap<String, StoredTx>,
    initial_balance: u128,
    failing_reads: u32,
    clock: i64,
}

/// Deterministic in-memory [`LedgerGateway`].
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
    calls: RwLock<HashMap<String, CallHandler>>,
    queries: RwLock<HashMap<String, QueryHandler>>,
    pending_polls: u32,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLedger")
            .field("pending_polls", &self.pending_polls)
            .finish_non_exhaustive()
    }
}

impl MemoryLedger {
    /// Creates an empty ledger whose clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LedgerState {
                clock: now_timestamp(),
                ..LedgerState::default()
            }),
            calls: RwLock::new(HashMap::new()),
            queries: RwLock::new(HashMap::new()),
            pending_polls: 0,
        }
    }

    /// Number of polls reporting `Pending` before a transaction is final.
    #[must_use]
    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Native balance granted to every account on first use.
    #[must_use]
    pub fn with_initial_balance(self, amount: u128) -> Self {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .initial_balance = amount;
        self
    }

    /// Makes the next `count` status reads fail with a transient error.
    pub fn fail_next_reads(&self, count: u32) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).failing_reads = count;
    }

    /// Registers the logic run when any contract endpoint named `function`
    /// is called.
    pub fn register_call<F>(&self, function: impl Into<String>, handler: F)
    where
        F: Fn(&CallRequest<'_>) -> Result<Vec<Vec<u8>>, String> + Send + Sync + 'static,
    {
        self.calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(function.into(), Box::new(handler));
    }

    /// Registers the logic answering views named `function`.
    pub fn register_query<F>(&self, function: impl Into<String>, handler: F)
    where
        F: Fn(&Address, &[Vec<u8>]) -> Result<Vec<Value>, String> + Send + Sync + 'static,
    {
        self.queries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(function.into(), Box::new(handler));
    }

    /// Credits native tokens to an account.
    pub fn fund(&self, address: &Address, amount: u128) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.account_mut(*address).balance += amount;
    }

    /// Credits an ESDT balance to an account.
    pub fn fund_token(&self, address: &Address, token: TokenRef, amount: u128) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state.account_mut(*address).tokens.entry(token).or_default() += amount;
    }

    /// Native balance of an account.
    #[must_use]
    pub fn balance(&self, address: &Address) -> u128 {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .accounts
            .get(address)
            .map_or(state.initial_balance, |a| a.balance)
    }

    /// ESDT balance of an account.
    #[must_use]
    pub fn token_balance(&self, address: &Address, token: &TokenRef) -> u128 {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .accounts
            .get(address)
            .and_then(|a| a.tokens.get(token).copied())
            .unwrap_or_default()
    }

    /// Code hash of a deployed contract.
    #[must_use]
    pub fn code_hash(&self, contract: &Address) -> Option<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.contracts.get(contract).map(|c| c.code_hash.clone())
    }

    /// A stored transaction, final or not.
    #[must_use]
    pub fn transaction(&self, hash: &str) -> Option<OnChainTransaction> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.transactions.get(hash).map(|stored| stored.tx.clone())
    }

    fn verify_signature(tx: &Transaction) -> OpsResult<()> {
        let raw = tx
            .signature
            .as_deref()
            .ok_or_else(|| rejected("transaction is not signed"))?;
        let key = VerifyingKey::from_bytes(tx.sender.as_bytes())
            .map_err(|e| rejected(format!("sender {} is not a public key: {e}", tx.sender)))?;
        let signature = Signature::from_slice(raw).map_err(|e| rejected(format!("malformed signature: {e}")))?;
        key.verify(&tx.signing_payload()?, &signature)
            .map_err(|_| rejected(format!("invalid signature for sender {}", tx.sender)))
    }
}

impl LedgerGateway for MemoryLedger {
    fn submit(&self, tx: &Transaction) -> OpsResult<String> {
        Self::verify_signature(tx)?;
        let hash = tx.hash()?;
        let calls = self.calls.read().map_err(|_| lock_err("calls"))?;
        let mut state = self.state.write().map_err(|_| lock_err("state"))?;

        if state.transactions.contains_key(&hash) {
            return Err(rejected(format!("transaction {hash} was already submitted")));
        }
        let sender = state.account_mut(tx.sender);
        if tx.nonce != sender.nonce {
            return Err(rejected(format!(
                "invalid nonce {} for {}, expected {}",
                tx.nonce, tx.sender, sender.nonce
            )));
        }
        if tx.value > sender.balance {
            return Err(rejected(format!("insufficient funds for {}", tx.sender)));
        }
        sender.nonce += 1;

        let snapshot = (state.accounts.clone(), state.contracts.clone(), state.tokens.clone());
        let (status, outcome) = match state.execute(tx, &hash, &calls) {
            Ok(outcome) => (TxStatus::Success, outcome),
            Err(message) => {
                debug!("transaction {hash} failed: {message}");
                state.accounts = snapshot.0;
                state.contracts = snapshot.1;
                state.tokens = snapshot.2;
                let event = Event::new("signalError", tx.sender, vec![message.into_bytes()]);
                (
                    TxStatus::Failed,
                    Outcome {
                        events: vec![event],
                        results: Vec::new(),
                    },
                )
            }
        };

        state.clock += BLOCK_TIME;
        let on_chain = OnChainTransaction {
            hash: hash.clone(),
            sender: tx.sender,
            receiver: tx.receiver,
            value: tx.value,
            data: tx.data.clone(),
            status,
            timestamp: state.clock,
            results: outcome.results,
            events: outcome.events,
        };
        state.transactions.insert(
            hash.clone(),
            StoredTx {
                tx: on_chain,
                pending_polls: self.pending_polls,
            },
        );
        info!("transaction {hash} executed with status {}", status.as_str());
        Ok(hash)
    }

    fn get_status(&self, hash: &str) -> OpsResult<TxPoll> {
        let mut state = self.state.write().map_err(|_| lock_err("state"))?;
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(GatewayError::Network {
                message: "simulated read failure".to_string(),
            }
            .into());
        }
        let stored = state
            .transactions
            .get_mut(hash)
            .ok_or_else(|| GatewayError::NotFound { hash: hash.to_string() })?;
        if stored.pending_polls > 0 {
            stored.pending_polls -= 1;
            return Ok(TxPoll::Pending);
        }
        Ok(TxPoll::Finalized(stored.tx.clone()))
    }

    fn query_state(&self, contract: &Address, function: &str, args: &[Vec<u8>]) -> OpsResult<Vec<Value>> {
        let queries = self.queries.read().map_err(|_| lock_err("queries"))?;
        match queries.get(function) {
            Some(handler) => handler(contract, args).map_err(rejected),
            None => {
                debug!("no view registered for {function}, returning no data");
                Ok(Vec::new())
            }
        }
    }

    fn account_nonce(&self, address: &Address) -> OpsResult<u64> {
        let state = self.state.read().map_err(|_| lock_err("state"))?;
        Ok(state.accounts.get(address).map_or(0, |a| a.nonce))
    }
}

impl LedgerState {
    fn account_mut(&mut self, address: Address) -> &mut AccountState {
        let initial = self.initial_balance;
        self.accounts.entry(address).or_insert_with(|| AccountState {
            balance: initial,
            ..AccountState::default()
        })
    }

    fn move_native(&mut self, from: Address, to: Address, amount: u128) -> Result<(), String> {
        let source = self.account_mut(from);
        if source.balance < amount {
            return Err(format!("insufficient funds for {from}"));
        }
        source.balance -= amount;
        self.account_mut(to).balance += amount;
        Ok(())
    }

    fn move_token(&mut self, from: Address, to: Address, transfer: &TokenTransfer) -> Result<(), String> {
        if transfer.token.is_native() {
            return self.move_native(from, to, transfer.amount);
        }
        let source = self.account_mut(from).tokens.entry(transfer.token.clone()).or_default();
        if *source < transfer.amount {
            return Err(format!("insufficient funds of {} for {from}", transfer.token));
        }
        *source -= transfer.amount;
        *self.account_mut(to).tokens.entry(transfer.token.clone()).or_default() += transfer.amount;
        Ok(())
    }

    fn execute(&mut self, tx: &Transaction, hash: &str, calls: &HashMap<String, CallHandler>) -> Result<Outcome, String> {
        let mut outcome = Outcome::default();
        let data = tx.data_text();
        let (function, raw_args) = match data.split_once(ARG_SEPARATOR) {
            Some((function, rest)) => (function, Some(rest)),
            None => (data.as_str(), None),
        };

        if tx.receiver == Address::zero() {
            let contract = contract_address(&tx.sender, tx.nonce);
            self.move_native(tx.sender, contract, tx.value)?;
            self.deploy(tx.sender, contract, function, &decode_args(raw_args)?, &mut outcome)?;
            return Ok(outcome);
        }

        self.move_native(tx.sender, tx.receiver, tx.value)?;
        if tx.receiver == ESDT_SYSTEM_CONTRACT {
            self.system_call(tx.sender, hash, function, &decode_args(raw_args)?, &mut outcome)?;
        } else if tx.receiver == tx.sender {
            self.builtin_call(tx.sender, function, &decode_args(raw_args)?, calls, &mut outcome)?;
        } else if function == "ESDTTransfer" {
            let args = decode_args(raw_args)?;
            let transfer = TokenTransfer::new(TokenRef::new(text(arg(&args, 0)?)?, 0), uint(arg(&args, 1)?)?);
            self.move_token(tx.sender, tx.receiver, &transfer)?;
            if let Some(endpoint) = args.get(2) {
                let endpoint = text(endpoint)?;
                invoke(
                    &CallRequest {
                        caller: tx.sender,
                        contract: tx.receiver,
                        function: &endpoint,
                        args: &args[3..],
                        value: 0,
                        transfers: std::slice::from_ref(&transfer),
                    },
                    calls,
                    &mut outcome,
                )?;
            }
        } else if function == "upgradeContract" {
            self.upgrade(tx.sender, tx.receiver, &decode_args(raw_args)?, &mut outcome)?;
        } else if tx.receiver.is_smart_contract() && !function.is_empty() {
            invoke(
                &CallRequest {
                    caller: tx.sender,
                    contract: tx.receiver,
                    function,
                    args: &decode_args(raw_args)?,
                    value: tx.value,
                    transfers: &[],
                },
                calls,
                &mut outcome,
            )?;
        }
        Ok(outcome)
    }

    fn deploy(
        &mut self,
        owner: Address,
        contract: Address,
        code_hex: &str,
        args: &[Vec<u8>],
        outcome: &mut Outcome,
    ) -> Result<(), String> {
        let code = hex::decode(code_hex).map_err(|e| format!("invalid contract code: {e}"))?;
        if args.first().map(hex::encode).as_deref() != Some(WASM_VM) {
            return Err("deployment must target the WASM VM".to_string());
        }
        let code_hash = blake3::hash(&code).to_hex().to_string();
        self.contracts.insert(contract, ContractState { owner, code_hash });
        outcome.events.push(Event::new(
            "SCDeploy",
            contract,
            vec![contract.as_bytes().to_vec(), owner.as_bytes().to_vec()],
        ));
        Ok(())
    }

    fn upgrade(&mut self, caller: Address, contract: Address, args: &[Vec<u8>], outcome: &mut Outcome) -> Result<(), String> {
        let code = arg(args, 0)?;
        let state = self
            .contracts
            .get_mut(&contract)
            .ok_or_else(|| format!("no contract deployed at {contract}"))?;
        if state.owner != caller {
            return Err(format!("upgrade of {contract} is allowed only for its owner"));
        }
        state.code_hash = blake3::hash(code).to_hex().to_string();
        outcome
            .events
            .push(Event::new("SCUpgrade", contract, vec![contract.as_bytes().to_vec()]));
        Ok(())
    }

    fn system_call(
        &mut self,
        caller: Address,
        hash: &str,
        function: &str,
        args: &[Vec<u8>],
        outcome: &mut Outcome,
    ) -> Result<(), String> {
        let kind = match function {
            "setSpecialRole" => return self.special_roles(caller, true, args, outcome),
            "unSetSpecialRole" => return self.special_roles(caller, false, args, outcome),
            "issue" => "FungibleESDT",
            "issueSemiFungible" => "SemiFungibleESDT",
            "issueNonFungible" => "NonFungibleESDT",
            "registerMetaESDT" => "MetaESDT",
            other => return Err(format!("invalid function {other} on the ESDT system contract")),
        };
        let name = arg(args, 0)?;
        let ticker = text(arg(args, 1)?)?;
        let digest = blake3::hash(hash.as_bytes()).to_hex();
        let identifier = format!("{ticker}-{}", &digest[..6]);
        self.tokens.insert(
            identifier.clone(),
            TokenState {
                owner: caller,
                roles: HashMap::new(),
                last_nonce: 0,
            },
        );

        if function == "issue" {
            let supply = uint(arg(args, 2)?)?;
            *self
                .account_mut(caller)
                .tokens
                .entry(TokenRef::new(identifier.clone(), 0))
                .or_default() += supply;
            outcome.results.push(ContractResult {
                sender: ESDT_SYSTEM_CONTRACT,
                receiver: caller,
                value: 0,
                data: format!("ESDTTransfer@{}@{}", hex::encode(&identifier), hex::encode(&args[2])),
                is_refund: false,
            });
        }
        outcome.events.push(Event::new(
            function,
            ESDT_SYSTEM_CONTRACT,
            vec![
                identifier.clone().into_bytes(),
                name.clone(),
                ticker.into_bytes(),
                kind.as_bytes().to_vec(),
            ],
        ));
        info!("issued token {identifier}");
        Ok(())
    }

    fn special_roles(&mut self, caller: Address, is_set: bool, args: &[Vec<u8>], outcome: &mut Outcome) -> Result<(), String> {
        let identifier = text(arg(args, 0)?)?;
        let target = address(arg(args, 1)?)?;
        let roles = args[2..].iter().map(|role| text(role)).collect::<Result<Vec<_>, _>>()?;
        if roles.is_empty() {
            return Err("no role given".to_string());
        }
        let token = self
            .tokens
            .get_mut(&identifier)
            .ok_or_else(|| format!("token {identifier} does not exist"))?;
        if token.owner != caller {
            return Err(format!("only the owner of {identifier} can manage its roles"));
        }
        let held = token.roles.entry(target).or_default();
        for role in &roles {
            if is_set {
                held.insert(role.clone());
            } else {
                held.remove(role);
            }
        }
        let mut topics = vec![identifier.clone().into_bytes(), Vec::new(), Vec::new(), target.as_bytes().to_vec()];
        topics.extend(roles.iter().map(|role| role.clone().into_bytes()));
        let event = if is_set { "ESDTSetRole" } else { "ESDTUnSetRole" };
        outcome.events.push(Event::new(event, ESDT_SYSTEM_CONTRACT, topics));
        debug!("{event} {} on {identifier} for {target}", roles.join(", "));
        Ok(())
    }

    fn builtin_call(
        &mut self,
        caller: Address,
        function: &str,
        args: &[Vec<u8>],
        calls: &HashMap<String, CallHandler>,
        outcome: &mut Outcome,
    ) -> Result<(), String> {
        match function {
            "ESDTLocalMint" => {
                let identifier = text(arg(args, 0)?)?;
                if let Some(state) = self.tokens.get(&identifier) {
                    state.require_role(&caller, "ESDTRoleLocalMint", &identifier)?;
                }
                let token = TokenRef::new(identifier, 0);
                let amount = uint(arg(args, 1)?)?;
                *self.account_mut(caller).tokens.entry(token).or_default() += amount;
                outcome.events.push(Event::new(
                    "ESDTLocalMint",
                    caller,
                    vec![args[0].clone(), Vec::new(), args[1].clone()],
                ));
                Ok(())
            }
            "ESDTNFTCreate" => {
                let identifier = text(arg(args, 0)?)?;
                let amount = uint(arg(args, 1)?)?;
                if amount == 0 {
                    return Err("cannot create a nonce with a zero supply".to_string());
                }
                let state = self
                    .tokens
                    .get_mut(&identifier)
                    .ok_or_else(|| format!("token {identifier} does not exist"))?;
                state.require_role(&caller, "ESDTRoleNFTCreate", &identifier)?;
                state.last_nonce += 1;
                let nonce = state.last_nonce;
                *self
                    .account_mut(caller)
                    .tokens
                    .entry(TokenRef::new(identifier, nonce))
                    .or_default() += amount;
                outcome.events.push(Event::new(
                    "ESDTNFTCreate",
                    caller,
                    vec![args[0].clone(), encode_unsigned(u128::from(nonce)), args[1].clone()],
                ));
                Ok(())
            }
            "ESDTNFTTransfer" => {
                let nonce = u64::try_from(uint(arg(args, 1)?)?).map_err(|e| e.to_string())?;
                let transfer = TokenTransfer::new(TokenRef::new(text(arg(args, 0)?)?, nonce), uint(arg(args, 2)?)?);
                let receiver = address(arg(args, 3)?)?;
                self.move_token(caller, receiver, &transfer)?;
                outcome.results.push(ContractResult {
                    sender: caller,
                    receiver,
                    value: 0,
                    data: format!(
                        "ESDTNFTTransfer@{}@{}@{}",
                        hex::encode(&args[0]),
                        hex::encode(&args[1]),
                        hex::encode(&args[2])
                    ),
                    is_refund: false,
                });
                forward_call(caller, receiver, &args[4..], &[transfer], calls, outcome)
            }
            "MultiESDTNFTTransfer" => {
                let receiver = address(arg(args, 0)?)?;
                let count = usize::try_from(uint(arg(args, 1)?)?).map_err(|e| e.to_string())?;
                let mut transfers = Vec::with_capacity(count);
                for i in 0..count {
                    let base = 2 + 3 * i;
                    let mut identifier = text(arg(args, base)?)?;
                    if identifier == MULTI_TRANSFER_NATIVE {
                        identifier = NATIVE_TOKEN.to_string();
                    }
                    let nonce = u64::try_from(uint(arg(args, base + 1)?)?).map_err(|e| e.to_string())?;
                    let transfer = TokenTransfer::new(TokenRef::new(identifier, nonce), uint(arg(args, base + 2)?)?);
                    self.move_token(caller, receiver, &transfer)?;
                    transfers.push(transfer);
                }
                let rest = args.get(2 + 3 * count..).unwrap_or_default();
                forward_call(caller, receiver, rest, &transfers, calls, outcome)
            }
            _ => Ok(()),
        }
    }
}

fn forward_call(
    caller: Address,
    contract: Address,
    rest: &[Vec<u8>],
    transfers: &[TokenTransfer],
    calls: &HashMap<String, CallHandler>,
    outcome: &mut Outcome,
) -> Result<(), String> {
    let Some((endpoint, args)) = rest.split_first() else {
        return Ok(());
    };
    let endpoint = text(endpoint)?;
    invoke(
        &CallRequest {
            caller,
            contract,
            function: &endpoint,
            args,
            value: 0,
            transfers,
        },
        calls,
        outcome,
    )
}

fn invoke(request: &CallRequest<'_>, calls: &HashMap<String, CallHandler>, outcome: &mut Outcome) -> Result<(), String> {
    let returned = match calls.get(request.function) {
        Some(handler) => handler(request)?,
        None => Vec::new(),
    };
    let mut data = String::from("@6f6b");
    for part in &returned {
        data.push(ARG_SEPARATOR);
        data.push_str(&hex::encode(part));
    }
    outcome.results.push(ContractResult {
        sender: request.contract,
        receiver: request.caller,
        value: 0,
        data,
        is_refund: false,
    });
    Ok(())
}

/// Address of the contract deployed by `owner` with `nonce`.
fn contract_address(owner: &Address, nonce: u64) -> Address {
    let mut hasher = blake3::Hasher::new();
    hasher.update(owner.as_bytes());
    hasher.update(&nonce.to_le_bytes());
    let mut bytes = *hasher.finalize().as_bytes();
    bytes[..8].fill(0);
    Address::from_bytes(bytes)
}

fn decode_args(raw: Option<&str>) -> Result<Vec<Vec<u8>>, String> {
    raw.map_or_else(
        || Ok(Vec::new()),
        |raw| {
            raw.split(ARG_SEPARATOR)
                .map(|part| hex::decode(part).map_err(|e| format!("invalid argument '{part}': {e}")))
                .collect()
        },
    )
}

fn arg(args: &[Vec<u8>], index: usize) -> Result<&Vec<u8>, String> {
    args.get(index).ok_or_else(|| format!("missing argument {index}"))
}

fn text(bytes: &[u8]) -> Result<String, String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| e.to_string())
}

fn uint(bytes: &[u8]) -> Result<u128, String> {
    if bytes.len() > 16 {
        return Err(format!("integer of {} bytes is too large", bytes.len()));
    }
    Ok(bytes.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b)))
}

fn address(bytes: &[u8]) -> Result<Address, String> {
    Address::from_slice(bytes).map_err(|e| e.to_string())
}
