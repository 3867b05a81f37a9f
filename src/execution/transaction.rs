//! Steps that sign and submit a transaction.
//!
//! Every transaction step goes through [`run_transaction`]: resolve the
//! fields, build the unsigned transaction, reserve the sender nonce, sign,
//! submit, then either wait for finality and run the checks or return right
//! away when no check is attached. A post-transaction hook finally lets the
//! step record what the transaction created.

use std::fs;
use std::path::Path;

use log::{info, warn};

use super::checks::Check;
use super::context::ExecutionContext;
use super::fields::FieldReader;
use super::registry::ChecksKind;
use super::steps::Step;
use crate::address::{Address, ESDT_SYSTEM_CONTRACT};
use crate::error::{DataError, OpsResult, ResolutionError, StepError};
use crate::ledger::{
    await_finality, call_data, encode_signed, encode_unsigned, OnChainTransaction, Transaction, TxStatus, WASM_VM,
};
use crate::scenario::{EntityData, TokenData, TokenKind};
use crate::smart_value::{
    AddressKind, BoolKind, BytesKind, IntKind, ListKind, PathKind, ResultsSaveKeys, ResultsSaveKeysKind, Resolver, SmartValue,
    StrKind, TokenTransfer, TokenTransfersKind,
};
use crate::value::{Value, ValueMap};

/// Native amount paid to the system contract for a token issuance.
pub const ISSUE_COST: u128 = 50_000_000_000_000_000;

const BASE_GAS: u64 = 50_000;
const GAS_PER_DATA_BYTE: u64 = 1_500;
const ESDT_TRANSFER_GAS: u64 = 200_000;
const ISSUE_GAS: u64 = 60_000_000;
const LOCAL_MINT_GAS: u64 = 300_000;
const STORE_GAS_PER_BYTE: u64 = 50_000;
const SPECIAL_ROLE_GAS: u64 = 60_000_000;

/// Highest royalties, in hundredths of a percent.
const MAX_ROYALTIES: i128 = 10_000;

/// Identifier of native value inside multi-token transfer data.
const MULTI_TRANSFER_NATIVE: &str = "EGLD-000000";

/// Fields shared by every transaction step.
#[derive(Debug, Clone)]
pub(crate) struct TransactionFields {
    sender: SmartValue<StrKind>,
    checks: SmartValue<ChecksKind>,
}

impl TransactionFields {
    fn read(fields: &mut FieldReader) -> OpsResult<Self> {
        let mut success = ValueMap::new();
        success.insert("type".to_string(), Value::from("Success"));
        Ok(Self {
            sender: fields.required("sender")?,
            checks: fields.with_default("checks", Value::List(vec![Value::Map(success)])),
        })
    }

    fn evaluate(&mut self, resolver: &Resolver<'_>) -> OpsResult<()> {
        self.sender.evaluate(resolver)?;
        self.checks.evaluate(resolver)
    }
}

/// A step whose effect is a single signed transaction.
pub(crate) trait TransactionStep {
    fn common(&self) -> &TransactionFields;

    fn common_mut(&mut self) -> &mut TransactionFields;

    /// Resolves the step specific fields.
    fn evaluate_fields(&mut self, resolver: &Resolver<'_>) -> OpsResult<()>;

    /// Builds the unsigned transaction; nonce, gas price and chain id are
    /// filled in afterwards.
    fn build_transaction(&mut self, sender: Address) -> OpsResult<Transaction>;

    /// Runs after submission. `tx` is `None` when no check was attached and
    /// the transaction was not awaited.
    fn post_transaction(&mut self, _ctx: &mut ExecutionContext, _tx: Option<&OnChainTransaction>) -> OpsResult<()> {
        Ok(())
    }
}

pub(crate) fn run_transaction<S: TransactionStep>(step: &mut S, ctx: &mut ExecutionContext) -> OpsResult<()> {
    {
        let resolver = ctx.resolver();
        step.common_mut().evaluate(&resolver)?;
        step.evaluate_fields(&resolver)?;
    }
    let designation = step.common().sender.get()?.clone();
    let sender = ctx.accounts().get(&designation)?.address();

    let mut tx = step.build_transaction(sender)?;
    tx.gas_price = ctx.config().gas_price()?;
    tx.chain_id = ctx.config().chain_id()?.to_string();
    tx.nonce = ctx.next_nonce(&designation)?;
    ctx.accounts().sign(&designation, &mut tx)?;

    let hash = ctx.gateway().submit(&tx)?;
    let mut checks: Vec<Check> = step.common().checks.get()?.clone();
    if checks.is_empty() {
        info!("transaction {hash} sent without checks");
        return step.post_transaction(ctx, None);
    }

    let on_chain = await_finality(ctx.gateway(), &hash, ctx.finality())?;
    for check in &mut checks {
        check.raise_on_failure(&ctx.resolver(), &on_chain)?;
    }
    info!("transaction {hash} passed {} check(s)", checks.len());
    step.post_transaction(ctx, Some(&on_chain))
}

/// Encodes a call argument into its binary form.
///
/// Non-negative ints use the minimal unsigned encoding, negative ints two's
/// complement, booleans `01`/empty, bech32 strings the address bytes and
/// other strings their UTF-8 bytes.
///
/// # Errors
///
/// Returns a parsing error for floats, nulls, lists and maps.
pub fn encode_argument(value: &Value) -> OpsResult<Vec<u8>> {
    match value {
        Value::Int(n) if *n >= 0 => Ok(encode_unsigned(n.unsigned_abs())),
        Value::Int(n) => Ok(encode_signed(*n)),
        Value::Bool(b) => Ok(if *b { vec![1] } else { Vec::new() }),
        Value::String(text) => match Address::from_bech32(text) {
            Ok(address) if text.starts_with("erd1") => Ok(address.as_bytes().to_vec()),
            _ => Ok(text.as_bytes().to_vec()),
        },
        Value::Bytes(bytes) => Ok(bytes.clone()),
        other => Err(ResolutionError::parsing(format!(
            "cannot encode the {} argument {} into call data",
            other.type_name(),
            other.repr()
        ))
        .into()),
    }
}

fn encode_arguments(values: &[Value]) -> OpsResult<Vec<Vec<u8>>> {
    values.iter().map(encode_argument).collect()
}

fn non_negative_u128(value: i128, field: &str) -> OpsResult<u128> {
    u128::try_from(value)
        .map_err(|_| ResolutionError::parsing(format!("{field} must not be negative, got {value}")).into())
}

fn gas(value: i128) -> OpsResult<u64> {
    u64::try_from(value).map_err(|_| ResolutionError::parsing(format!("invalid gas limit {value}")).into())
}

fn default_gas(data: &[u8], transfers: usize) -> u64 {
    let data_gas = GAS_PER_DATA_BYTE.saturating_mul(data.len() as u64);
    let transfer_gas = ESDT_TRANSFER_GAS.saturating_mul(transfers as u64);
    BASE_GAS.saturating_add(data_gas).saturating_add(transfer_gas)
}

/// Receiver, native value and data of a transfer, optionally followed by a
/// contract call.
struct Payload {
    receiver: Address,
    value: u128,
    data: Vec<u8>,
    token_count: usize,
}

fn transfer_payload(
    sender: Address,
    receiver: Address,
    value: u128,
    transfers: &[TokenTransfer],
    call: Option<(&str, &[Vec<u8>])>,
) -> OpsResult<Payload> {
    let mut native = value;
    let mut tokens: Vec<&TokenTransfer> = Vec::new();
    for transfer in transfers {
        if transfer.token.is_native() {
            native = native.checked_add(transfer.amount).ok_or_else(|| {
                ResolutionError::parsing(format!(
                    "native amount overflows: {native} + {} exceeds {}",
                    transfer.amount,
                    u128::MAX
                ))
            })?;
        } else {
            tokens.push(transfer);
        }
    }
    let append_call = |args: &mut Vec<Vec<u8>>| {
        if let Some((function, call_args)) = call {
            args.push(function.as_bytes().to_vec());
            args.extend(call_args.iter().cloned());
        }
    };

    let payload = match tokens.as_slice() {
        [] => Payload {
            receiver,
            value: native,
            data: call.map(|(function, args)| call_data(function, args)).unwrap_or_default(),
            token_count: 0,
        },
        [single] if native == 0 && single.token.nonce == 0 => {
            let mut args = vec![single.token.identifier.as_bytes().to_vec(), encode_unsigned(single.amount)];
            append_call(&mut args);
            Payload {
                receiver,
                value: 0,
                data: call_data("ESDTTransfer", &args),
                token_count: 1,
            }
        }
        [single] if native == 0 => {
            let mut args = vec![
                single.token.identifier.as_bytes().to_vec(),
                encode_unsigned(u128::from(single.token.nonce)),
                encode_unsigned(single.amount),
                receiver.as_bytes().to_vec(),
            ];
            append_call(&mut args);
            Payload {
                receiver: sender,
                value: 0,
                data: call_data("ESDTNFTTransfer", &args),
                token_count: 1,
            }
        }
        _ => {
            let mut items: Vec<(String, u64, u128)> = tokens
                .iter()
                .map(|t| (t.token.identifier.clone(), t.token.nonce, t.amount))
                .collect();
            if native > 0 {
                items.push((MULTI_TRANSFER_NATIVE.to_string(), 0, native));
            }
            let mut args = vec![receiver.as_bytes().to_vec(), encode_unsigned(items.len() as u128)];
            for (identifier, nonce, amount) in &items {
                args.push(identifier.as_bytes().to_vec());
                args.push(encode_unsigned(u128::from(*nonce)));
                args.push(encode_unsigned(*amount));
            }
            append_call(&mut args);
            Payload {
                receiver: sender,
                value: 0,
                data: call_data("MultiESDTNFTTransfer", &args),
                token_count: items.len(),
            }
        }
    };
    Ok(payload)
}

/// Saves call or query results into the saved values of `contract`.
pub(crate) fn save_results(
    ctx: &mut ExecutionContext,
    contract: Address,
    keys: Option<&ResultsSaveKeys>,
    results: &[Value],
    log_results: bool,
) -> OpsResult<()> {
    if log_results {
        let rendered: Vec<String> = results.iter().map(Value::repr).collect();
        info!("results of {contract}: [{}]", rendered.join(", "));
    }
    let Some(keys) = keys else {
        return Ok(());
    };
    let designation = contract.to_bech32();
    for (key, value) in keys.to_save(results)? {
        ctx.store_mut().set_entity_value(&designation, &key, value)?;
    }
    Ok(())
}

fn code_metadata(upgradeable: bool, readable: bool, payable: bool, payable_by_sc: bool) -> Vec<u8> {
    let mut first = 0u8;
    let mut second = 0u8;
    if upgradeable {
        first |= 0x01;
    }
    if readable {
        first |= 0x04;
    }
    if payable {
        second |= 0x02;
    }
    if payable_by_sc {
        second |= 0x04;
    }
    vec![first, second]
}

fn read_code(path: &Path) -> OpsResult<(Vec<u8>, String)> {
    let code = fs::read(path).map_err(|e| DataError::io(path, &e))?;
    let hash = blake3::hash(&code).to_hex().to_string();
    Ok((code, hash))
}

/// Contract code, flags and constructor arguments shared by deployment and
/// upgrade.
#[derive(Debug, Clone)]
struct CodeFields {
    wasm_path: SmartValue<PathKind>,
    gas_limit: SmartValue<IntKind>,
    upgradeable: SmartValue<BoolKind>,
    readable: SmartValue<BoolKind>,
    payable: SmartValue<BoolKind>,
    payable_by_sc: SmartValue<BoolKind>,
    arguments: SmartValue<ListKind>,
}

impl CodeFields {
    fn read(fields: &mut FieldReader) -> OpsResult<Self> {
        Ok(Self {
            wasm_path: fields.required("wasm_path")?,
            gas_limit: fields.required("gas_limit")?,
            upgradeable: fields.with_default("upgradeable", true),
            readable: fields.with_default("readable", true),
            payable: fields.with_default("payable", false),
            payable_by_sc: fields.with_default("payable_by_sc", false),
            arguments: fields.with_default("arguments", Value::List(Vec::new())),
        })
    }

    fn evaluate(&mut self, resolver: &Resolver<'_>) -> OpsResult<()> {
        self.wasm_path.evaluate(resolver)?;
        self.gas_limit.evaluate(resolver)?;
        self.upgradeable.evaluate(resolver)?;
        self.readable.evaluate(resolver)?;
        self.payable.evaluate(resolver)?;
        self.payable_by_sc.evaluate(resolver)?;
        self.arguments.evaluate(resolver)
    }

    /// Code, its hash, and the `code@vm@metadata@args` arguments.
    fn payload(&self, with_vm: bool) -> OpsResult<(Vec<u8>, String, Vec<Vec<u8>>)> {
        let (code, code_hash) = read_code(self.wasm_path.get()?)?;
        let mut args = Vec::new();
        if with_vm {
            args.push(hex::decode(WASM_VM).map_err(|e| ResolutionError::parsing(e.to_string()))?);
        }
        args.push(code_metadata(
            *self.upgradeable.get()?,
            *self.readable.get()?,
            *self.payable.get()?,
            *self.payable_by_sc.get()?,
        ));
        args.extend(encode_arguments(self.arguments.get()?)?);
        Ok((code, code_hash, args))
    }
}

/// Deploys a contract and registers it in the scenario.
#[derive(Debug, Clone)]
pub struct ContractDeployStep {
    common: TransactionFields,
    contract_id: SmartValue<StrKind>,
    code: CodeFields,
    code_hash: Option<String>,
}

impl ContractDeployStep {
    pub(crate) fn from_fields(mut fields: FieldReader) -> OpsResult<Step> {
        let step = Self {
            common: TransactionFields::read(&mut fields)?,
            contract_id: fields.required("contract_id")?,
            code: CodeFields::read(&mut fields)?,
            code_hash: None,
        };
        fields.finish()?;
        Ok(Step::ContractDeploy(step))
    }

    /// Runs the deployment.
    ///
    /// # Errors
    ///
    /// Propagates resolution, signing, gateway, check and store errors.
    pub fn execute(&mut self, ctx: &mut ExecutionContext) -> OpsResult<()> {
        run_transaction(self, ctx)
    }
}

impl TransactionStep for ContractDeployStep {
    fn common(&self) -> &TransactionFields {
        &self.common
    }

    fn common_mut(&mut self) -> &mut TransactionFields {
        &mut self.common
    }

    fn evaluate_fields(&mut self, resolver: &Resolver<'_>) -> OpsResult<()> {
        self.contract_id.evaluate(resolver)?;
        self.code.evaluate(resolver)
    }

    fn build_transaction(&mut self, sender: Address) -> OpsResult<Transaction> {
        let (code, code_hash, args) = self.code.payload(true)?;
        info!(
            "deploying contract {} from {}",
            self.contract_id.evaluation_string()?,
            self.common.sender.evaluation_string()?
        );
        self.code_hash = Some(code_hash);
        let mut tx = Transaction::new(sender, Address::zero(), 0, call_data(&hex::encode(code), &args));
        tx.gas_limit = gas(*self.code.gas_limit.get()?)?;
        Ok(tx)
    }

    fn post_transaction(&mut self, ctx: &mut ExecutionContext, tx: Option<&OnChainTransaction>) -> OpsResult<()> {
        let contract_id = self.contract_id.get()?.clone();
        let Some(tx) = tx else {
            warn!("deployment of {contract_id} was not awaited, the contract is not registered");
            return Ok(());
        };
        let address = tx
            .find_event("SCDeploy")
            .and_then(|event| event.topics.first())
            .ok_or_else(|| ResolutionError::parsing(format!("no SCDeploy event in transaction {}", tx.hash)))?;
        let address = Address::from_slice(address)?;
        let code_hash = self.code_hash.clone().unwrap_or_default();
        info!("contract {contract_id} deployed at {address}");
        ctx.store_mut()
            .add_entity(EntityData::contract(contract_id, address, code_hash, tx.timestamp))?;
        Ok(())
    }
}

/// Upgrades the code of a deployed contract.
#[derive(Debug, Clone)]
pub struct ContractUpgradeStep {
    common: TransactionFields,
    contract: SmartValue<AddressKind>,
    code: CodeFields,
    code_hash: Option<String>,
}

impl ContractUpgradeStep {
    pub(crate) fn from_fields(mut fields: FieldReader) -> OpsResult<Step> {
        let step = Self {
            common: TransactionFields::read(&mut fields)?,
            contract: fields.required("contract")?,
            code: CodeFields::read(&mut fields)?,
            code_hash: None,
        };
        fields.finish()?;
        Ok(Step::ContractUpgrade(step))
    }

    /// Runs the upgrade.
    ///
    /// # Errors
    ///
    /// Propagates resolution, signing, gateway, check and store errors.
    pub fn execute(&mut self, ctx: &mut ExecutionContext) -> OpsResult<()> {
        run_transaction(self, ctx)
    }
}

impl TransactionStep for ContractUpgradeStep {
    fn common(&self) -> &TransactionFields {
        &self.common
    }

    fn common_mut(&mut self) -> &mut TransactionFields {
        &mut self.common
    }

    fn evaluate_fields(&mut self, resolver: &Resolver<'_>) -> OpsResult<()> {
        self.contract.evaluate(resolver)?;
        self.code.evaluate(resolver)
    }

    fn build_transaction(&mut self, sender: Address) -> OpsResult<Transaction> {
        let (code, code_hash, mut args) = self.code.payload(false)?;
        info!("upgrading contract {}", self.contract.evaluation_string()?);
        self.code_hash = Some(code_hash);
        args.insert(0, code);
        let mut tx = Transaction::new(sender, *self.contract.get()?, 0, call_data("upgradeContract", &args));
        tx.gas_limit = gas(*self.code.gas_limit.get()?)?;
        Ok(tx)
    }

    fn post_transaction(&mut self, ctx: &mut ExecutionContext, tx: Option<&OnChainTransaction>) -> OpsResult<()> {
        let contract = self.contract.get()?.to_bech32();
        if tx.is_none() {
            warn!("upgrade of {contract} was not awaited, the scenario is left unchanged");
            return Ok(());
        }
        let is_ours = matches!(
            ctx.store().scenario()?.entity(&contract),
            Some(EntityData::Contract(_))
        );
        if !is_ours {
            info!("upgraded contract {contract} is not tracked by the scenario");
            return Ok(());
        }
        let code_hash = self.code_hash.clone().unwrap_or_default();
        ctx.store_mut().update_contract(&contract, &code_hash)
    }
}

/// Calls a contract endpoint, optionally paying it with tokens.
#[derive(Debug, Clone)]
pub struct ContractCallStep {
    common: TransactionFields,
    contract: SmartValue<AddressKind>,
    endpoint: SmartValue<StrKind>,
    gas_limit: SmartValue<IntKind>,
    arguments: SmartValue<ListKind>,
    value: SmartValue<IntKind>,
    esdt_transfers: SmartValue<TokenTransfersKind>,
    log_results: SmartValue<BoolKind>,
    results_save_keys: Option<SmartValue<ResultsSaveKeysKind>>,
}

impl ContractCallStep {
    pub(crate) fn from_fields(mut fields: FieldReader) -> OpsResult<Step> {
        let step = Self {
            common: TransactionFields::read(&mut fields)?,
            contract: fields.required("contract")?,
            endpoint: fields.required("endpoint")?,
            gas_limit: fields.required("gas_limit")?,
            arguments: fields.with_default("arguments", Value::List(Vec::new())),
            value: fields.with_default("value", 0),
            esdt_transfers: fields.with_default("esdt_transfers", Value::List(Vec::new())),
            log_results: fields.with_default("log_results", true),
            results_save_keys: fields.optional("results_save_keys"),
        };
        fields.finish()?;
        Ok(Step::ContractCall(step))
    }

    /// Runs the call.
    ///
    /// # Errors
    ///
    /// Propagates resolution, signing, gateway, check and store errors.
    pub fn execute(&mut self, ctx: &mut ExecutionContext) -> OpsResult<()> {
        run_transaction(self, ctx)
    }
}

impl TransactionStep for ContractCallStep {
    fn common(&self) -> &TransactionFields {
        &self.common
    }

    fn common_mut(&mut self) -> &mut TransactionFields {
        &mut self.common
    }

    fn evaluate_fields(&mut self, resolver: &Resolver<'_>) -> OpsResult<()> {
        self.contract.evaluate(resolver)?;
        self.endpoint.evaluate(resolver)?;
        self.gas_limit.evaluate(resolver)?;
        self.arguments.evaluate(resolver)?;
        self.value.evaluate(resolver)?;
        self.esdt_transfers.evaluate(resolver)?;
        self.log_results.evaluate(resolver)?;
        if let Some(keys) = &mut self.results_save_keys {
            keys.evaluate(resolver)?;
        }
        Ok(())
    }

    fn build_transaction(&mut self, sender: Address) -> OpsResult<Transaction> {
        let endpoint = self.endpoint.get()?;
        let args = encode_arguments(self.arguments.get()?)?;
        info!(
            "calling {endpoint} on {} from {}",
            self.contract.evaluation_string()?,
            self.common.sender.evaluation_string()?
        );
        let payload = transfer_payload(
            sender,
            *self.contract.get()?,
            non_negative_u128(*self.value.get()?, "value")?,
            self.esdt_transfers.get()?,
            Some((endpoint.as_str(), args.as_slice())),
        )?;
        let mut tx = Transaction::new(sender, payload.receiver, payload.value, payload.data);
        tx.gas_limit = gas(*self.gas_limit.get()?)?;
        Ok(tx)
    }

    fn post_transaction(&mut self, ctx: &mut ExecutionContext, tx: Option<&OnChainTransaction>) -> OpsResult<()> {
        let Some(tx) = tx else {
            return Ok(());
        };
        let results: Vec<Value> = tx.return_data().into_iter().map(Value::Bytes).collect();
        let keys = self.results_save_keys.as_ref().map(SmartValue::get).transpose()?;
        save_results(ctx, *self.contract.get()?, keys, &results, *self.log_results.get()?)
    }
}

/// Sends native value and tokens to an address.
#[derive(Debug, Clone)]
pub struct TransferStep {
    common: TransactionFields,
    receiver: SmartValue<AddressKind>,
    value: SmartValue<IntKind>,
    transfers: SmartValue<TokenTransfersKind>,
    gas_limit: Option<SmartValue<IntKind>>,
}

impl TransferStep {
    pub(crate) fn from_fields(mut fields: FieldReader) -> OpsResult<Step> {
        let step = Self {
            common: TransactionFields::read(&mut fields)?,
            receiver: fields.required("receiver")?,
            value: fields.with_default("value", 0),
            transfers: fields.with_default("transfers", Value::List(Vec::new())),
            gas_limit: fields.optional("gas_limit"),
        };
        fields.finish()?;
        Ok(Step::Transfer(step))
    }

    /// Runs the transfer.
    ///
    /// # Errors
    ///
    /// Propagates resolution, signing, gateway and check errors.
    pub fn execute(&mut self, ctx: &mut ExecutionContext) -> OpsResult<()> {
        run_transaction(self, ctx)
    }
}

impl TransactionStep for TransferStep {
    fn common(&self) -> &TransactionFields {
        &self.common
    }

    fn common_mut(&mut self) -> &mut TransactionFields {
        &mut self.common
    }

    fn evaluate_fields(&mut self, resolver: &Resolver<'_>) -> OpsResult<()> {
        self.receiver.evaluate(resolver)?;
        self.value.evaluate(resolver)?;
        self.transfers.evaluate(resolver)?;
        if let Some(gas_limit) = &mut self.gas_limit {
            gas_limit.evaluate(resolver)?;
        }
        Ok(())
    }

    fn build_transaction(&mut self, sender: Address) -> OpsResult<Transaction> {
        info!(
            "sending {} and {} from {} to {}",
            self.value.evaluation_string()?,
            self.transfers.evaluation_string()?,
            self.common.sender.evaluation_string()?,
            self.receiver.evaluation_string()?
        );
        let payload = transfer_payload(
            sender,
            *self.receiver.get()?,
            non_negative_u128(*self.value.get()?, "value")?,
            self.transfers.get()?,
            None,
        )?;
        let gas_limit = match &self.gas_limit {
            Some(gas_limit) => gas(*gas_limit.get()?)?,
            None => default_gas(&payload.data, payload.token_count),
        };
        let mut tx = Transaction::new(sender, payload.receiver, payload.value, payload.data);
        tx.gas_limit = gas_limit;
        Ok(tx)
    }
}

/// Issues a new token through the system contract and registers it.
#[derive(Debug, Clone)]
pub struct TokenIssueStep {
    common: TransactionFields,
    kind: TokenKind,
    token_name: SmartValue<StrKind>,
    token_ticker: SmartValue<StrKind>,
    initial_supply: Option<SmartValue<IntKind>>,
    num_decimals: Option<SmartValue<IntKind>>,
    properties: Vec<(&'static str, SmartValue<BoolKind>)>,
}

const FUNGIBLE_PROPERTIES: [(&str, &str); 6] = [
    ("can_freeze", "canFreeze"),
    ("can_wipe", "canWipe"),
    ("can_pause", "canPause"),
    ("can_change_owner", "canChangeOwner"),
    ("can_upgrade", "canUpgrade"),
    ("can_add_special_roles", "canAddSpecialRoles"),
];

const NFT_CREATE_ROLE_PROPERTY: (&str, &str) = ("can_transfer_nft_create_role", "canTransferNFTCreateRole");

impl TokenIssueStep {
    fn read(mut fields: FieldReader, kind: TokenKind) -> OpsResult<Step> {
        let common = TransactionFields::read(&mut fields)?;
        let token_name = fields.required("token_name")?;
        let token_ticker = fields.required("token_ticker")?;
        let initial_supply = match kind {
            TokenKind::Fungible => Some(fields.required("initial_supply")?),
            _ => None,
        };
        let num_decimals = match kind {
            TokenKind::Fungible | TokenKind::Meta => Some(fields.required("num_decimals")?),
            _ => None,
        };
        let mut names: Vec<(&str, &str)> = FUNGIBLE_PROPERTIES.to_vec();
        if kind != TokenKind::Fungible {
            names.push(NFT_CREATE_ROLE_PROPERTY);
        }
        let properties = names
            .into_iter()
            .map(|(field, property)| (property, fields.with_default(field, false)))
            .collect();
        let step = Self {
            common,
            kind,
            token_name,
            token_ticker,
            initial_supply,
            num_decimals,
            properties,
        };
        fields.finish()?;
        Ok(Step::TokenIssue(step))
    }

    pub(crate) fn fungible(fields: FieldReader) -> OpsResult<Step> {
        Self::read(fields, TokenKind::Fungible)
    }

    pub(crate) fn non_fungible(fields: FieldReader) -> OpsResult<Step> {
        Self::read(fields, TokenKind::NonFungible)
    }

    pub(crate) fn semi_fungible(fields: FieldReader) -> OpsResult<Step> {
        Self::read(fields, TokenKind::SemiFungible)
    }

    pub(crate) fn meta(fields: FieldReader) -> OpsResult<Step> {
        Self::read(fields, TokenKind::Meta)
    }

    /// Kind of the issued token.
    #[must_use]
    pub const fn kind(&self) -> TokenKind {
        self.kind
    }

    const fn function(&self) -> &'static str {
        match self.kind {
            TokenKind::Fungible => "issue",
            TokenKind::SemiFungible => "issueSemiFungible",
            TokenKind::NonFungible => "issueNonFungible",
            TokenKind::Meta => "registerMetaESDT",
        }
    }

    /// Runs the issuance.
    ///
    /// # Errors
    ///
    /// Propagates resolution, signing, gateway, check and store errors.
    pub fn execute(&mut self, ctx: &mut ExecutionContext) -> OpsResult<()> {
        run_transaction(self, ctx)
    }
}

impl TransactionStep for TokenIssueStep {
    fn common(&self) -> &TransactionFields {
        &self.common
    }

    fn common_mut(&mut self) -> &mut TransactionFields {
        &mut self.common
    }

    fn evaluate_fields(&mut self, resolver: &Resolver<'_>) -> OpsResult<()> {
        self.token_name.evaluate(resolver)?;
        self.token_ticker.evaluate(resolver)?;
        if let Some(supply) = &mut self.initial_supply {
            supply.evaluate(resolver)?;
        }
        if let Some(decimals) = &mut self.num_decimals {
            decimals.evaluate(resolver)?;
        }
        for (_, property) in &mut self.properties {
            property.evaluate(resolver)?;
        }
        Ok(())
    }

    fn build_transaction(&mut self, sender: Address) -> OpsResult<Transaction> {
        info!(
            "issuing {} token {} for {}",
            self.kind.as_str(),
            self.token_name.evaluation_string()?,
            self.common.sender.evaluation_string()?
        );
        let mut args = vec![
            self.token_name.get()?.as_bytes().to_vec(),
            self.token_ticker.get()?.as_bytes().to_vec(),
        ];
        if let Some(supply) = &self.initial_supply {
            args.push(encode_unsigned(non_negative_u128(*supply.get()?, "initial_supply")?));
        }
        if let Some(decimals) = &self.num_decimals {
            args.push(encode_unsigned(non_negative_u128(*decimals.get()?, "num_decimals")?));
        }
        for (property, enabled) in &self.properties {
            args.push(property.as_bytes().to_vec());
            let flag: &[u8] = if *enabled.get()? { b"true" } else { b"false" };
            args.push(flag.to_vec());
        }
        let mut tx = Transaction::new(sender, ESDT_SYSTEM_CONTRACT, ISSUE_COST, call_data(self.function(), &args));
        tx.gas_limit = ISSUE_GAS;
        Ok(tx)
    }

    fn post_transaction(&mut self, ctx: &mut ExecutionContext, tx: Option<&OnChainTransaction>) -> OpsResult<()> {
        let name = self.token_name.get()?.clone();
        let Some(tx) = tx else {
            warn!("issuance of {name} was not awaited, the token is not registered");
            return Ok(());
        };
        let identifier = tx
            .find_event(self.function())
            .and_then(|event| event.topics.first())
            .map(|topic| String::from_utf8_lossy(topic).into_owned())
            .ok_or_else(|| {
                ResolutionError::parsing(format!("no {} event in transaction {}", self.function(), tx.hash))
            })?;
        info!("newly issued token {name} got the identifier {identifier}");
        let ticker = self.token_ticker.get()?.clone();
        ctx.store_mut()
            .add_token(TokenData::new(name, ticker, identifier, self.kind))
    }
}

/// Mints additional supply of a fungible token held by the sender.
#[derive(Debug, Clone)]
pub struct FungibleMintStep {
    common: TransactionFields,
    token_identifier: SmartValue<StrKind>,
    amount: SmartValue<IntKind>,
}

impl FungibleMintStep {
    pub(crate) fn from_fields(mut fields: FieldReader) -> OpsResult<Step> {
        let step = Self {
            common: TransactionFields::read(&mut fields)?,
            token_identifier: fields.required("token_identifier")?,
            amount: fields.required("amount")?,
        };
        fields.finish()?;
        Ok(Step::FungibleMint(step))
    }

    /// Runs the mint.
    ///
    /// # Errors
    ///
    /// Propagates resolution, signing, gateway and check errors.
    pub fn execute(&mut self, ctx: &mut ExecutionContext) -> OpsResult<()> {
        run_transaction(self, ctx)
    }
}

impl TransactionStep for FungibleMintStep {
    fn common(&self) -> &TransactionFields {
        &self.common
    }

    fn common_mut(&mut self) -> &mut TransactionFields {
        &mut self.common
    }

    fn evaluate_fields(&mut self, resolver: &Resolver<'_>) -> OpsResult<()> {
        self.token_identifier.evaluate(resolver)?;
        self.amount.evaluate(resolver)
    }

    fn build_transaction(&mut self, sender: Address) -> OpsResult<Transaction> {
        info!(
            "minting {} of {}",
            self.amount.evaluation_string()?,
            self.token_identifier.evaluation_string()?
        );
        let args = [
            self.token_identifier.get()?.as_bytes().to_vec(),
            encode_unsigned(non_negative_u128(*self.amount.get()?, "amount")?),
        ];
        let mut tx = Transaction::new(sender, sender, 0, call_data("ESDTLocalMint", &args));
        tx.gas_limit = LOCAL_MINT_GAS;
        Ok(tx)
    }
}

/// Role names accepted in scenes and their on-chain spelling.
const FUNGIBLE_ROLES: &[(&str, &str)] = &[
    ("local_mint", "ESDTRoleLocalMint"),
    ("local_burn", "ESDTRoleLocalBurn"),
    ("esdt_transfer_role", "ESDTTransferRole"),
];

const NON_FUNGIBLE_ROLES: &[(&str, &str)] = &[
    ("nft_create", "ESDTRoleNFTCreate"),
    ("nft_burn", "ESDTRoleNFTBurn"),
    ("nft_update_attributes", "ESDTRoleNFTUpdateAttributes"),
    ("nft_add_uri", "ESDTRoleNFTAddURI"),
    ("esdt_transfer_role", "ESDTTransferRole"),
    ("nft_update", "ESDTRoleNFTUpdate"),
    ("esdt_modify_royalties", "ESDTRoleModifyRoyalties"),
    ("esdt_set_new_uri", "ESDTRoleSetNewURI"),
    ("esdt_modify_creator", "ESDTRoleModifyCreator"),
    ("nft_recreate", "ESDTRoleNFTRecreate"),
];

// semi-fungible and meta tokens share this set
const SEMI_FUNGIBLE_ROLES: &[(&str, &str)] = &[
    ("nft_create", "ESDTRoleNFTCreate"),
    ("nft_burn", "ESDTRoleNFTBurn"),
    ("nft_add_quantity", "ESDTRoleNFTAddQuantity"),
    ("esdt_transfer_role", "ESDTTransferRole"),
    ("nft_update", "ESDTRoleNFTUpdate"),
    ("esdt_modify_royalties", "ESDTRoleModifyRoyalties"),
    ("esdt_set_new_uri", "ESDTRoleSetNewURI"),
    ("esdt_modify_creator", "ESDTRoleModifyCreator"),
    ("nft_recreate", "ESDTRoleNFTRecreate"),
];

/// Sets or unsets special roles of an address on a token.
///
/// Roles are given by their scene name (`local_mint`) or their on-chain
/// name (`ESDTRoleLocalMint`); the accepted set depends on the token kind.
#[derive(Debug, Clone)]
pub struct ManageTokenRolesStep {
    common: TransactionFields,
    kind: TokenKind,
    is_set: SmartValue<BoolKind>,
    token_identifier: SmartValue<StrKind>,
    target: SmartValue<AddressKind>,
    roles: SmartValue<ListKind>,
}

impl ManageTokenRolesStep {
    fn read(mut fields: FieldReader, kind: TokenKind) -> OpsResult<Step> {
        let step = Self {
            common: TransactionFields::read(&mut fields)?,
            kind,
            is_set: fields.required("is_set")?,
            token_identifier: fields.required("token_identifier")?,
            target: fields.required("target")?,
            roles: fields.required("roles")?,
        };
        fields.finish()?;
        Ok(Step::ManageTokenRoles(step))
    }

    pub(crate) fn fungible(fields: FieldReader) -> OpsResult<Step> {
        Self::read(fields, TokenKind::Fungible)
    }

    pub(crate) fn non_fungible(fields: FieldReader) -> OpsResult<Step> {
        Self::read(fields, TokenKind::NonFungible)
    }

    pub(crate) fn semi_fungible(fields: FieldReader) -> OpsResult<Step> {
        Self::read(fields, TokenKind::SemiFungible)
    }

    pub(crate) fn meta(fields: FieldReader) -> OpsResult<Step> {
        Self::read(fields, TokenKind::Meta)
    }

    /// Kind of the token whose roles are managed.
    #[must_use]
    pub const fn kind(&self) -> TokenKind {
        self.kind
    }

    const fn allowed_roles(&self) -> &'static [(&'static str, &'static str)] {
        match self.kind {
            TokenKind::Fungible => FUNGIBLE_ROLES,
            TokenKind::NonFungible => NON_FUNGIBLE_ROLES,
            TokenKind::SemiFungible | TokenKind::Meta => SEMI_FUNGIBLE_ROLES,
        }
    }

    const fn tag(&self) -> &'static str {
        match self.kind {
            TokenKind::Fungible => "ManageFungibleTokenRoles",
            TokenKind::NonFungible => "ManageNonFungibleTokenRoles",
            TokenKind::SemiFungible => "ManageSemiFungibleTokenRoles",
            TokenKind::Meta => "ManageMetaTokenRoles",
        }
    }

    /// On-chain names of the requested roles, in the given order.
    fn on_chain_roles(&self) -> OpsResult<Vec<&'static str>> {
        let allowed = self.allowed_roles();
        let mut out = Vec::new();
        for role in self.roles.get()? {
            let Value::String(name) = role else {
                return Err(
                    StepError::invalid(self.tag(), format!("a role must be a string, got {}", role.repr())).into(),
                );
            };
            let Some((_, on_chain)) = allowed
                .iter()
                .find(|(short, long)| name.as_str() == *short || name.as_str() == *long)
            else {
                let names: Vec<&str> = allowed.iter().map(|(short, _)| *short).collect();
                return Err(StepError::invalid(
                    self.tag(),
                    format!("role {name} is not in the allowed roles [{}]", names.join(", ")),
                )
                .into());
            };
            if !out.contains(on_chain) {
                out.push(*on_chain);
            }
        }
        Ok(out)
    }

    /// Runs the role update.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStepDefinition` for roles outside the allowed set and
    /// propagates resolution, signing, gateway and check errors.
    pub fn execute(&mut self, ctx: &mut ExecutionContext) -> OpsResult<()> {
        run_transaction(self, ctx)
    }
}

impl TransactionStep for ManageTokenRolesStep {
    fn common(&self) -> &TransactionFields {
        &self.common
    }

    fn common_mut(&mut self) -> &mut TransactionFields {
        &mut self.common
    }

    fn evaluate_fields(&mut self, resolver: &Resolver<'_>) -> OpsResult<()> {
        self.is_set.evaluate(resolver)?;
        self.token_identifier.evaluate(resolver)?;
        self.target.evaluate(resolver)?;
        self.roles.evaluate(resolver)
    }

    fn build_transaction(&mut self, sender: Address) -> OpsResult<Transaction> {
        let roles = self.on_chain_roles()?;
        let (function, verb) = if *self.is_set.get()? {
            ("setSpecialRole", "setting")
        } else {
            ("unSetSpecialRole", "unsetting")
        };
        info!(
            "{verb} roles {} on the token {} for {}",
            self.roles.evaluation_string()?,
            self.token_identifier.evaluation_string()?,
            self.target.evaluation_string()?
        );
        let mut args = vec![
            self.token_identifier.get()?.as_bytes().to_vec(),
            self.target.get()?.as_bytes().to_vec(),
        ];
        args.extend(roles.iter().map(|role| role.as_bytes().to_vec()));
        let data = call_data(function, &args);
        let gas_limit = SPECIAL_ROLE_GAS.saturating_add(GAS_PER_DATA_BYTE.saturating_mul(data.len() as u64));
        let mut tx = Transaction::new(sender, ESDT_SYSTEM_CONTRACT, 0, data);
        tx.gas_limit = gas_limit;
        Ok(tx)
    }
}

/// Creates a new nonce of a non-fungible, semi-fungible or meta token held
/// by the sender.
#[derive(Debug, Clone)]
pub struct NonFungibleMintStep {
    common: TransactionFields,
    kind: TokenKind,
    token_identifier: SmartValue<StrKind>,
    amount: SmartValue<IntKind>,
    name: SmartValue<StrKind>,
    royalties: SmartValue<IntKind>,
    hash: SmartValue<StrKind>,
    attributes: SmartValue<BytesKind>,
    uris: SmartValue<ListKind>,
}

impl NonFungibleMintStep {
    fn read(mut fields: FieldReader, kind: TokenKind) -> OpsResult<Step> {
        let step = Self {
            common: TransactionFields::read(&mut fields)?,
            kind,
            token_identifier: fields.required("token_identifier")?,
            amount: fields.required("amount")?,
            name: fields.with_default("name", ""),
            royalties: fields.with_default("royalties", 0),
            hash: fields.with_default("hash", ""),
            attributes: fields.with_default("attributes", ""),
            uris: fields.with_default("uris", Value::List(Vec::new())),
        };
        fields.finish()?;
        Ok(Step::NonFungibleMint(step))
    }

    pub(crate) fn non_fungible(fields: FieldReader) -> OpsResult<Step> {
        Self::read(fields, TokenKind::NonFungible)
    }

    pub(crate) fn semi_fungible(fields: FieldReader) -> OpsResult<Step> {
        Self::read(fields, TokenKind::SemiFungible)
    }

    pub(crate) fn meta(fields: FieldReader) -> OpsResult<Step> {
        Self::read(fields, TokenKind::Meta)
    }

    /// Kind of the minted token.
    #[must_use]
    pub const fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Runs the mint.
    ///
    /// # Errors
    ///
    /// Propagates resolution, signing, gateway and check errors.
    pub fn execute(&mut self, ctx: &mut ExecutionContext) -> OpsResult<()> {
        run_transaction(self, ctx)
    }
}

impl TransactionStep for NonFungibleMintStep {
    fn common(&self) -> &TransactionFields {
        &self.common
    }

    fn common_mut(&mut self) -> &mut TransactionFields {
        &mut self.common
    }

    fn evaluate_fields(&mut self, resolver: &Resolver<'_>) -> OpsResult<()> {
        self.token_identifier.evaluate(resolver)?;
        self.amount.evaluate(resolver)?;
        self.name.evaluate(resolver)?;
        self.royalties.evaluate(resolver)?;
        self.hash.evaluate(resolver)?;
        self.attributes.evaluate(resolver)?;
        self.uris.evaluate(resolver)
    }

    fn build_transaction(&mut self, sender: Address) -> OpsResult<Transaction> {
        info!(
            "minting a new nonce with a supply of {} for the token {}",
            self.amount.evaluation_string()?,
            self.token_identifier.evaluation_string()?
        );
        let royalties = *self.royalties.get()?;
        if !(0..=MAX_ROYALTIES).contains(&royalties) {
            return Err(ResolutionError::parsing(format!(
                "royalties must be between 0 and {MAX_ROYALTIES}, got {royalties}"
            ))
            .into());
        }
        let mut args = vec![
            self.token_identifier.get()?.as_bytes().to_vec(),
            encode_unsigned(non_negative_u128(*self.amount.get()?, "amount")?),
            self.name.get()?.as_bytes().to_vec(),
            encode_unsigned(royalties.unsigned_abs()),
            self.hash.get()?.as_bytes().to_vec(),
            self.attributes.get()?.clone(),
        ];
        let uris = self.uris.get()?;
        if uris.is_empty() {
            args.push(Vec::new());
        }
        for uri in uris {
            args.push(match uri {
                Value::String(text) => text.as_bytes().to_vec(),
                other => other.to_string().into_bytes(),
            });
        }
        let data = call_data("ESDTNFTCreate", &args);
        let per_byte = GAS_PER_DATA_BYTE.saturating_add(STORE_GAS_PER_BYTE);
        let gas_limit = LOCAL_MINT_GAS.saturating_add(per_byte.saturating_mul(data.len() as u64));
        let mut tx = Transaction::new(sender, sender, 0, data);
        tx.gas_limit = gas_limit;
        Ok(tx)
    }

    fn post_transaction(&mut self, _ctx: &mut ExecutionContext, tx: Option<&OnChainTransaction>) -> OpsResult<()> {
        // a failure accepted by a Fail check created nothing
        let Some(tx) = tx.filter(|tx| tx.status == TxStatus::Success) else {
            return Ok(());
        };
        let nonce = tx
            .find_event("ESDTNFTCreate")
            .and_then(|event| event.topics.get(1))
            .map(|topic| topic.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b)))
            .ok_or_else(|| ResolutionError::parsing(format!("no ESDTNFTCreate event in transaction {}", tx.hash)))?;
        info!("newly created nonce of {} is {nonce}", self.token_identifier.get()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smart_value::TokenRef;

    fn address(byte: u8) -> Address {
        Address::from_bytes([byte; 32])
    }

    #[test]
    fn test_encode_argument() {
        assert_eq!(encode_argument(&Value::Int(0)).unwrap(), Vec::<u8>::new());
        assert_eq!(encode_argument(&Value::Int(256)).unwrap(), vec![1, 0]);
        assert_eq!(encode_argument(&Value::Int(-1)).unwrap(), vec![0xff]);
        assert_eq!(encode_argument(&Value::Bool(true)).unwrap(), vec![1]);
        assert_eq!(encode_argument(&Value::from("abc")).unwrap(), b"abc".to_vec());
        let bech32 = address(7).to_bech32();
        assert_eq!(encode_argument(&Value::from(bech32)).unwrap(), vec![7; 32]);
        assert!(encode_argument(&Value::Float(1.5)).is_err());
        assert!(encode_argument(&Value::List(Vec::new())).is_err());
    }

    #[test]
    fn test_code_metadata_flags() {
        assert_eq!(code_metadata(true, true, false, false), vec![0x05, 0x00]);
        assert_eq!(code_metadata(true, true, true, true), vec![0x05, 0x06]);
        assert_eq!(code_metadata(false, false, false, true), vec![0x00, 0x04]);
    }

    #[test]
    fn test_transfer_payload_shapes() {
        let (alice, bob) = (address(1), address(2));

        let native = transfer_payload(alice, bob, 5, &[], None).unwrap();
        assert_eq!((native.receiver, native.value), (bob, 5));
        assert!(native.data.is_empty());

        let fungible = [TokenTransfer::new(TokenRef::new("ABC-123456", 0), 10)];
        let no_args: Vec<Vec<u8>> = Vec::new();
        let single = transfer_payload(alice, bob, 0, &fungible, Some(("deposit", no_args.as_slice()))).unwrap();
        assert_eq!(single.receiver, bob);
        assert_eq!(
            String::from_utf8(single.data).unwrap(),
            format!("ESDTTransfer@{}@0a@{}", hex::encode("ABC-123456"), hex::encode("deposit"))
        );

        let nft = [TokenTransfer::new(TokenRef::new("NFT-123456", 3), 1)];
        let nft_payload = transfer_payload(alice, bob, 0, &nft, None).unwrap();
        assert_eq!(nft_payload.receiver, alice);
        assert!(String::from_utf8(nft_payload.data).unwrap().starts_with("ESDTNFTTransfer@"));

        let multi = transfer_payload(alice, bob, 7, &fungible, None).unwrap();
        assert_eq!((multi.receiver, multi.value, multi.token_count), (alice, 0, 2));
        let data = String::from_utf8(multi.data).unwrap();
        assert!(data.starts_with(&format!("MultiESDTNFTTransfer@{}@02@", bob.to_hex())));
        assert!(data.contains(&hex::encode(MULTI_TRANSFER_NATIVE)));
    }

    #[test]
    fn test_native_token_transfers_fold_into_value() {
        let transfers = [TokenTransfer::new(TokenRef::native(), 3)];
        let payload = transfer_payload(address(1), address(2), 2, &transfers, None).unwrap();
        assert_eq!(payload.value, 5);
        assert_eq!(payload.token_count, 0);
    }

    #[test]
    fn test_native_amount_overflow_is_an_error() {
        let transfers = [
            TokenTransfer::new(TokenRef::native(), u128::MAX),
            TokenTransfer::new(TokenRef::native(), u128::MAX),
        ];
        let err = transfer_payload(address(1), address(2), 0, &transfers, None).err().unwrap();
        assert!(err.is_resolution());
        assert!(err.to_string().contains("overflows"));

        let single = [TokenTransfer::new(TokenRef::native(), 1)];
        assert!(transfer_payload(address(1), address(2), u128::MAX, &single, None).is_err());
    }

    #[test]
    fn test_issue_definition_requires_kind_fields() {
        let mut fields = ValueMap::new();
        fields.insert("sender".to_string(), Value::from("alice"));
        fields.insert("token_name".to_string(), Value::from("Bob"));
        fields.insert("token_ticker".to_string(), Value::from("BOB"));
        assert!(TokenIssueStep::fungible(FieldReader::new("FungibleIssue", fields.clone())).is_err());
        let step = TokenIssueStep::non_fungible(FieldReader::new("NonFungibleIssue", fields.clone())).unwrap();
        assert_eq!(step.type_name(), "NonFungibleIssue");

        fields.insert("initial_supply".to_string(), Value::Int(1_000));
        fields.insert("num_decimals".to_string(), Value::Int(2));
        fields.insert("can_freeze".to_string(), Value::Bool(true));
        assert!(TokenIssueStep::fungible(FieldReader::new("FungibleIssue", fields)).is_ok());
    }
}
