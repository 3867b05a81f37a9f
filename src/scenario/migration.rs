//! Versioned on-disk layout and document migrations.
//!
//! The data root carries a `VERSION` marker. When it names an older
//! version, every stored document (current and checkpoints, all networks)
//! is upgraded through the registered chain before any other access, then
//! the marker is rewritten. A version with no complete path to
//! [`LATEST_VERSION`] is fatal.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde_json::{json, Map, Value as Json};

use crate::error::{DataError, OpsResult};
use crate::scenario::codec;

/// Version written by this crate.
pub const LATEST_VERSION: &str = "v2";

/// Version of unmarked data roots holding legacy documents.
pub const LEGACY_VERSION: &str = "v1";

/// Name of the marker file in the data root.
pub const VERSION_FILE: &str = "VERSION";

/// Name of every stored document file.
pub const DOCUMENT_FILE: &str = "data.json";

/// One pure upgrade step between two consecutive versions.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub from: &'static str,
    pub to: &'static str,
    /// True when a document still has the `from` shape.
    pub applies: fn(&Json) -> bool,
    pub migrate: fn(Json) -> OpsResult<Json>,
}

/// Registered migrations, in order.
pub const MIGRATIONS: &[Migration] = &[Migration {
    from: "v1",
    to: "v2",
    applies: is_v1_document,
    migrate: migrate_v1_to_v2,
}];

/// Computes the ordered migrations leading from `from` to the latest version.
///
/// # Errors
///
/// Returns `UnsupportedVersion` for unknown versions and `MissingMigration`
/// when the chain is broken.
pub fn plan(from: &str, migrations: &'static [Migration]) -> OpsResult<Vec<&'static Migration>> {
    let known = from == LATEST_VERSION || migrations.iter().any(|m| m.from == from || m.to == from);
    if !known {
        return Err(DataError::UnsupportedVersion {
            version: from.to_string(),
        }
        .into());
    }

    let mut steps = Vec::new();
    let mut current = from;
    while current != LATEST_VERSION {
        let Some(step) = migrations.iter().find(|m| m.from == current) else {
            return Err(DataError::MissingMigration {
                from: current.to_string(),
                latest: LATEST_VERSION.to_string(),
            }
            .into());
        };
        if steps.len() > migrations.len() {
            return Err(DataError::MissingMigration {
                from: current.to_string(),
                latest: LATEST_VERSION.to_string(),
            }
            .into());
        }
        steps.push(step);
        current = step.to;
    }
    Ok(steps)
}

fn collect_documents(dir: &Path, out: &mut Vec<PathBuf>) -> OpsResult<()> {
    let entries = fs::read_dir(dir).map_err(|e| DataError::io(dir, &e))?;
    for entry in entries {
        let entry = entry.map_err(|e| DataError::io(dir, &e))?;
        let path = entry.path();
        if path.is_dir() {
            collect_documents(&path, out)?;
        } else if path.file_name().is_some_and(|n| n == DOCUMENT_FILE) {
            out.push(path);
        }
    }
    Ok(())
}

/// Guesses the version of an unmarked data root from its documents.
fn detect_version(documents: &[PathBuf]) -> OpsResult<&'static str> {
    for path in documents {
        let doc: Json = codec::read_document(path)?;
        if is_v1_document(&doc) {
            return Ok(LEGACY_VERSION);
        }
    }
    Ok(LATEST_VERSION)
}

/// Reads the version marker of a data root.
///
/// # Errors
///
/// Returns an I/O error if the marker exists but cannot be read.
pub fn read_version(root: &Path) -> OpsResult<Option<String>> {
    let marker = root.join(VERSION_FILE);
    if !marker.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(&marker).map_err(|e| DataError::io(&marker, &e))?;
    Ok(Some(text.trim().to_string()))
}

/// Brings a data root up to [`LATEST_VERSION`].
///
/// # Errors
///
/// Returns a data error for unsupported versions, broken migration chains,
/// undecodable documents or I/O failures.
pub fn ensure_current(root: &Path) -> OpsResult<()> {
    ensure_current_with(root, MIGRATIONS)
}

/// [`ensure_current`] with an explicit migration chain.
///
/// # Errors
///
/// See [`ensure_current`].
pub fn ensure_current_with(root: &Path, migrations: &'static [Migration]) -> OpsResult<()> {
    fs::create_dir_all(root).map_err(|e| DataError::io(root, &e))?;

    let mut documents = Vec::new();
    collect_documents(root, &mut documents)?;
    documents.sort();

    let version = match read_version(root)? {
        Some(v) => v,
        None => detect_version(&documents)?.to_string(),
    };

    let steps = plan(&version, migrations)?;
    if !steps.is_empty() {
        info!(
            "migrating {} scenario documents in {} from {version} to {LATEST_VERSION}",
            documents.len(),
            root.display()
        );
        // an interrupted run leaves some documents already upgraded
        for path in &documents {
            let mut doc: Json = codec::read_document(path)?;
            let mut changed = false;
            for step in &steps {
                if (step.applies)(&doc) {
                    doc = (step.migrate)(doc)?;
                    changed = true;
                }
            }
            if changed {
                codec::write_document(path, &doc)?;
            }
        }
    }

    if version != LATEST_VERSION || !root.join(VERSION_FILE).exists() {
        codec::write_atomic(&root.join(VERSION_FILE), LATEST_VERSION.as_bytes())?;
    }
    Ok(())
}

fn field<'a>(object: &'a Map<String, Json>, key: &str) -> OpsResult<&'a Json> {
    object
        .get(key)
        .ok_or_else(|| DataError::codec(format!("legacy document is missing '{key}'")).into())
}

fn legacy_token_kind(raw: &Json) -> OpsResult<&'static str> {
    let text = raw.as_str().unwrap_or_default().to_ascii_lowercase().replace(['-', ' '], "_");
    Ok(match text.as_str() {
        "fungible" | "fungibleesdt" | "fungible_esdt" => "fungible",
        "semi_fungible" | "semifungible" | "semifungibleesdt" | "sft" => "semi_fungible",
        "non_fungible" | "nonfungible" | "nonfungibleesdt" | "nft" => "non_fungible",
        "meta" | "metaesdt" | "meta_esdt" => "meta",
        other => return Err(DataError::codec(format!("unknown legacy token type '{other}'")).into()),
    })
}

fn is_v1_document(doc: &Json) -> bool {
    doc.get("accounts_data").is_some()
}

/// `v1` stored entities in `accounts_data` keyed by address with
/// `__class__` tags; `v2` keys them by id with a `kind` tag.
fn migrate_v1_to_v2(doc: Json) -> OpsResult<Json> {
    let Json::Object(old) = doc else {
        return Err(DataError::codec("legacy document is not an object").into());
    };
    if !old.contains_key("accounts_data") {
        return Err(DataError::codec("document has no 'accounts_data', it is not a v1 document").into());
    }

    let mut entities = Map::new();
    if let Some(Json::Object(accounts)) = old.get("accounts_data") {
        for entry in accounts.values() {
            let Json::Object(entry) = entry else {
                return Err(DataError::codec("legacy account entry is not an object").into());
            };
            let id = field(entry, "account_id")?.clone();
            let address = field(entry, "bech32")?.clone();
            let saved_values = entry.get("saved_values").cloned().unwrap_or_else(|| json!({}));
            let class = field(entry, "__class__")?.as_str().unwrap_or_default();
            let migrated = match class {
                "AccountData" | "PemAccountData" | "LedgerAccountData" => json!({
                    "kind": "account",
                    "id": id,
                    "address": address,
                    "saved_values": saved_values,
                }),
                "InternalContractData" => json!({
                    "kind": "contract",
                    "id": id,
                    "address": address,
                    "code_hash": field(entry, "code_hash")?,
                    "deploy_time": field(entry, "deploy_time")?,
                    "last_upgrade_time": field(entry, "last_upgrade_time")?,
                    "saved_values": saved_values,
                }),
                "ExternalContractData" => json!({
                    "kind": "external_contract",
                    "id": id,
                    "address": address,
                    "saved_values": saved_values,
                }),
                other => {
                    return Err(DataError::codec(format!("unknown legacy entity class '{other}'")).into())
                }
            };
            let key = id
                .as_str()
                .ok_or_else(|| DataError::codec("legacy account_id is not a string"))?
                .to_string();
            entities.insert(key, migrated);
        }
    }

    let mut tokens = Map::new();
    if let Some(Json::Object(old_tokens)) = old.get("tokens_data") {
        for (name, entry) in old_tokens {
            let Json::Object(entry) = entry else {
                return Err(DataError::codec("legacy token entry is not an object").into());
            };
            tokens.insert(
                name.clone(),
                json!({
                    "name": field(entry, "name")?,
                    "ticker": field(entry, "ticker")?,
                    "identifier": field(entry, "identifier")?,
                    "type": legacy_token_kind(field(entry, "type")?)?,
                    "saved_values": entry.get("saved_values").cloned().unwrap_or_else(|| json!({})),
                }),
            );
        }
    }

    Ok(json!({
        "name": field(&old, "name")?,
        "network": field(&old, "network")?,
        "creation_time": field(&old, "creation_time")?,
        "last_update_time": field(&old, "last_update_time")?,
        "entities": entities,
        "tokens": tokens,
        "saved_values": old.get("saved_values").cloned().unwrap_or_else(|| json!({})),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpsError;

    fn always(_: &Json) -> bool {
        true
    }

    fn broken(_: Json) -> OpsResult<Json> {
        Err(DataError::codec("never called").into())
    }

    static GAPPED: &[Migration] = &[Migration {
        from: "v0",
        to: "v1",
        applies: always,
        migrate: broken,
    }];

    #[test]
    fn test_plan_from_legacy() {
        let steps = plan("v1", MIGRATIONS).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].to, LATEST_VERSION);
        assert!(plan(LATEST_VERSION, MIGRATIONS).unwrap().is_empty());
    }

    #[test]
    fn test_plan_rejects_unknown_and_gaps() {
        assert!(matches!(
            plan("v99", MIGRATIONS).unwrap_err(),
            OpsError::Data(DataError::UnsupportedVersion { .. })
        ));
        assert!(matches!(
            plan("v0", GAPPED).unwrap_err(),
            OpsError::Data(DataError::MissingMigration { .. })
        ));
    }

    #[test]
    fn test_fresh_root_gets_latest_marker() {
        let dir = tempfile::tempdir().unwrap();
        ensure_current(dir.path()).unwrap();
        assert_eq!(read_version(dir.path()).unwrap().as_deref(), Some(LATEST_VERSION));
    }

    #[test]
    fn test_unknown_marker_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(VERSION_FILE), "v42").unwrap();
        assert!(ensure_current(dir.path()).is_err());
    }

    #[test]
    fn test_migrate_v1_document() {
        let legacy = json!({
            "name": "old",
            "network": "devnet",
            "creation_time": 1,
            "last_update_time": 2,
            "saved_values": {"x": 1},
            "account_id_to_bech32": {},
            "accounts_data": {
                "erd1a": {"__class__": "AccountData", "account_id": "alice", "bech32": "erd1a", "saved_values": {}},
                "erd1c": {
                    "__class__": "InternalContractData", "account_id": "c", "bech32": "erd1c",
                    "code_hash": "h", "deploy_time": 10, "last_upgrade_time": 11, "saved_values": {"k": "v"}
                }
            },
            "tokens_data": {
                "tok": {"__class__": "TokenData", "name": "tok", "ticker": "TOK", "identifier": "TOK-abcdef", "type": "fungible"}
            }
        });
        let migrated = migrate_v1_to_v2(legacy).unwrap();
        assert_eq!(migrated["entities"]["alice"]["kind"], "account");
        assert_eq!(migrated["entities"]["c"]["kind"], "contract");
        assert_eq!(migrated["entities"]["c"]["deploy_time"], 10);
        assert_eq!(migrated["entities"]["c"]["saved_values"]["k"], "v");
        assert_eq!(migrated["tokens"]["tok"]["type"], "fungible");
        assert_eq!(migrated["saved_values"]["x"], 1);
    }

    #[test]
    fn test_v2_document_is_not_migrated_twice() {
        let err = migrate_v1_to_v2(json!({"name": "a", "entities": {}})).unwrap_err();
        assert!(matches!(err, OpsError::Data(DataError::Codec { .. })));
    }

    #[test]
    fn test_unmarked_root_with_mixed_versions() {
        let dir = tempfile::tempdir().unwrap();
        let current = json!({
            "name": "a",
            "network": "devnet",
            "creation_time": 1,
            "last_update_time": 2,
            "entities": {"alice": {"kind": "account", "id": "alice", "address": "erd1a", "saved_values": {}}},
            "tokens": {"tok": {"name": "tok", "ticker": "TOK", "identifier": "TOK-abcdef", "type": "fungible", "saved_values": {}}},
            "saved_values": {"kept": true}
        });
        let legacy = json!({
            "name": "b",
            "network": "devnet",
            "creation_time": 1,
            "last_update_time": 2,
            "saved_values": {},
            "accounts_data": {
                "erd1b": {"__class__": "AccountData", "account_id": "bob", "bech32": "erd1b", "saved_values": {}}
            },
            "tokens_data": {}
        });
        let a = dir.path().join("devnet").join("a").join(DOCUMENT_FILE);
        let b = dir.path().join("devnet").join("b").join(DOCUMENT_FILE);
        codec::write_document(&a, &current).unwrap();
        codec::write_document(&b, &legacy).unwrap();

        ensure_current(dir.path()).unwrap();

        let a_after: Json = codec::read_document(&a).unwrap();
        assert_eq!(a_after, current);
        let b_after: Json = codec::read_document(&b).unwrap();
        assert_eq!(b_after["entities"]["bob"]["kind"], "account");
        assert!(b_after.get("accounts_data").is_none());
        assert_eq!(read_version(dir.path()).unwrap().as_deref(), Some(LATEST_VERSION));

        // a second pass over the same root is a no-op
        fs::remove_file(dir.path().join(VERSION_FILE)).unwrap();
        ensure_current(dir.path()).unwrap();
        assert_eq!(codec::read_document::<Json>(&a).unwrap(), current);
        assert_eq!(codec::read_document::<Json>(&b).unwrap(), b_after);
    }
}
