//! Extraction of the token movements performed by a finalized transaction.

use log::trace;

use super::transaction::{OnChainTransaction, ARG_SEPARATOR};
use crate::address::Address;
use crate::smart_value::{OnChainTransfer, TokenRef, NATIVE_TOKEN};

const ESDT_TRANSFER: &str = "ESDTTransfer";
const NFT_TRANSFER: &str = "ESDTNFTTransfer";
const MULTI_TRANSFER: &str = "MultiESDTNFTTransfer";

/// Name of the native token inside multi transfers.
const MULTI_TRANSFER_NATIVE: &str = "EGLD-000000";

/// Lists the transfers executed by a transaction and its contract results.
///
/// Gas refunds are skipped unless `include_refund` is set.
#[must_use]
pub fn get_on_chain_transfers(tx: &OnChainTransaction, include_refund: bool) -> Vec<OnChainTransfer> {
    let mut transfers = Vec::new();
    let data = tx.data_text();
    if tx.value != 0 {
        transfers.push(native(tx.sender, tx.receiver, tx.value));
    } else if tx.sender != tx.receiver && data.starts_with(ESDT_TRANSFER) {
        transfers.extend(parse_esdt_transfer(tx.sender, tx.receiver, &data));
    } else if data.starts_with(MULTI_TRANSFER) {
        transfers.extend(parse_multi_transfer(tx.sender, &data).unwrap_or_default());
    }

    for result in &tx.results {
        if result.value != 0 && (include_refund || !result.is_refund) {
            transfers.push(native(result.sender, result.receiver, result.value));
        } else if !result.data.is_empty() {
            transfers.extend(transfers_from_data(result.sender, result.receiver, &result.data));
        }
    }
    trace!("transaction {} moved {} transfers", tx.hash, transfers.len());
    transfers
}

fn native(sender: Address, receiver: Address, amount: u128) -> OnChainTransfer {
    OnChainTransfer {
        sender,
        receiver,
        token: TokenRef::native(),
        amount,
    }
}

fn transfers_from_data(sender: Address, receiver: Address, data: &str) -> Vec<OnChainTransfer> {
    if let Some(transfer) = parse_esdt_transfer(sender, receiver, data) {
        return vec![transfer];
    }
    if let Some(transfer) = parse_nft_transfer(sender, receiver, data) {
        return vec![transfer];
    }
    parse_multi_transfer(sender, data).unwrap_or_default()
}

/// Arguments following `function@`, or `None` if the data calls another function.
fn arguments<'a>(data: &'a str, function: &str) -> Option<Vec<&'a str>> {
    let rest = data.strip_prefix(function)?.strip_prefix(ARG_SEPARATOR)?;
    Some(rest.split(ARG_SEPARATOR).collect())
}

fn hex_text(arg: &str) -> Option<String> {
    String::from_utf8(hex::decode(arg).ok()?).ok()
}

fn hex_uint(arg: &str) -> Option<u128> {
    if arg.is_empty() {
        return Some(0);
    }
    u128::from_str_radix(arg, 16).ok()
}

fn parse_esdt_transfer(sender: Address, receiver: Address, data: &str) -> Option<OnChainTransfer> {
    let args = arguments(data, ESDT_TRANSFER)?;
    let identifier = hex_text(args.first()?)?;
    let amount = hex_uint(args.get(1)?)?;
    Some(OnChainTransfer {
        sender,
        receiver,
        token: TokenRef::new(identifier, 0),
        amount,
    })
}

fn parse_nft_transfer(sender: Address, receiver: Address, data: &str) -> Option<OnChainTransfer> {
    let args = arguments(data, NFT_TRANSFER)?;
    let identifier = hex_text(args.first()?)?;
    let nonce = u64::try_from(hex_uint(args.get(1)?)?).ok()?;
    let amount = hex_uint(args.get(2)?)?;
    Some(OnChainTransfer {
        sender,
        receiver,
        token: TokenRef::new(identifier, nonce),
        amount,
    })
}

fn parse_multi_transfer(sender: Address, data: &str) -> Option<Vec<OnChainTransfer>> {
    let args = arguments(data, MULTI_TRANSFER)?;
    let receiver = Address::from_slice(&hex::decode(args.first()?).ok()?).ok()?;
    let count = usize::try_from(hex_uint(args.get(1)?)?).ok()?;
    let details = args.get(2..)?;
    let mut transfers = Vec::with_capacity(count);
    for i in 0..count {
        let chunk = details.get(3 * i..3 * (i + 1))?;
        let mut identifier = hex_text(chunk[0])?;
        if identifier == MULTI_TRANSFER_NATIVE {
            identifier = NATIVE_TOKEN.to_string();
        }
        let nonce = u64::try_from(hex_uint(chunk[1])?).ok()?;
        let amount = hex_uint(chunk[2])?;
        transfers.push(OnChainTransfer {
            sender,
            receiver,
            token: TokenRef::new(identifier, nonce),
            amount,
        });
    }
    Some(transfers)
}
