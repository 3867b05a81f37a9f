use std::sync::Arc;

use sceneops::error::ResolutionError;
use sceneops::scenario::{EntityData, TokenData, TokenKind};
use sceneops::smart_value::{AddressKind, AnyKind, IntKind, StrKind, TokenTransfersKind};
use sceneops::{Address, Config, ExecutionContext, MapEnv, MemoryLedger, OpsError, ScenarioStore, SmartValue, Value};

fn context(root: &std::path::Path) -> ExecutionContext {
    let config = Config::builtin("devnet").unwrap();
    let mut store = ScenarioStore::open(root, "devnet").unwrap();
    store.create("values", false).unwrap();
    store.set_value("amount", Value::Int(21)).unwrap();
    store.set_value("token_alias", Value::from("usd")).unwrap();
    store.set_value("foo", Value::from("bar")).unwrap();
    store
        .add_token(TokenData::new("usd", "USD", "USD-a1b2c3", TokenKind::Fungible))
        .unwrap();
    store
        .add_entity(EntityData::account("alice", Address::from_bytes([7; 32])))
        .unwrap();
    ExecutionContext::new(config, store, Arc::new(MemoryLedger::new()))
        .unwrap()
        .with_env(MapEnv::new().with("HOME", "foo").with("FACTOR", "3"))
}

#[test]
fn the_four_sources_compose() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let r = ctx.resolver();

    assert_eq!(SmartValue::<IntKind>::resolve("={%{amount} * ${FACTOR}}", &r).unwrap(), 63);
    assert_eq!(SmartValue::<StrKind>::resolve("&chain", &r).unwrap(), "D");
    assert_eq!(
        SmartValue::<StrKind>::resolve("%{%{token_alias}.identifier}", &r).unwrap(),
        "USD-a1b2c3"
    );
    assert_eq!(SmartValue::<StrKind>::resolve("${HOME}/%{token_alias}", &r).unwrap(), "foo/usd");
    assert_eq!(SmartValue::<StrKind>::resolve("%{$HOME}_suffix", &r).unwrap(), "bar_suffix");
    assert_eq!(
        SmartValue::<AddressKind>::resolve("alice", &r).unwrap(),
        Address::from_bytes([7; 32])
    );
}

#[test]
fn values_written_by_one_step_are_read_by_the_next() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(dir.path());
    let mut doubled = SmartValue::<IntKind>::new("={%{amount} * 2}");
    doubled.evaluate(&ctx.resolver()).unwrap();
    assert_eq!(*doubled.get().unwrap(), 42);

    ctx.store_mut().set_value("amount", Value::Int(50)).unwrap();
    doubled.evaluate(&ctx.resolver()).unwrap();
    assert_eq!(*doubled.get().unwrap(), 100);
    assert_eq!(doubled.evaluation_string().unwrap(), "100 (={%{amount} * 2} -> ={50 * 2})");
}

#[test]
fn nested_structures_resolve_deeply() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let raw: serde_yaml::Value = serde_yaml::from_str("{'%{token_alias}_total': ['%amount', {home: $HOME}]}").unwrap();
    let resolved = SmartValue::<AnyKind>::resolve(Value::from(raw), &ctx.resolver()).unwrap();
    let expected: serde_yaml::Value = serde_yaml::from_str("{usd_total: [21, {home: foo}]}").unwrap();
    assert_eq!(resolved, Value::from(expected));

    let transfers = SmartValue::<TokenTransfersKind>::resolve(
        Value::List(vec![Value::List(vec![
            Value::from("%{usd.identifier}"),
            Value::from("={%{amount} + 1}"),
        ])]),
        &ctx.resolver(),
    )
    .unwrap();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].token.identifier, "USD-a1b2c3");
    assert_eq!(transfers[0].amount, 22);
}

#[test]
fn seeded_formulas_are_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path()).with_seed(11);
    let first: Vec<i128> = (0..5)
        .map(|_| SmartValue::<IntKind>::resolve("={randint(1, 1000)}", &ctx.resolver()).unwrap())
        .collect();
    ctx.reseed(11);
    let second: Vec<i128> = (0..5)
        .map(|_| SmartValue::<IntKind>::resolve("={randint(1, 1000)}", &ctx.resolver()).unwrap())
        .collect();
    assert_eq!(first, second);
    assert!(first.iter().all(|v| (1..1000).contains(v)));
}

#[test]
fn lookup_failures_name_the_missing_piece() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let r = ctx.resolver();

    let err = SmartValue::<StrKind>::resolve("$NOT_SET", &r).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        OpsError::Resolution(ResolutionError::UnknownVariable { name }) if name == "NOT_SET"
    ));

    let err = SmartValue::<StrKind>::resolve("&no_such_option", &r).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        OpsError::Resolution(ResolutionError::UnknownConfigOption { .. })
    ));

    let err = SmartValue::<IntKind>::resolve("%{usd.identifier}", &r).unwrap_err();
    assert!(err.is_resolution());
}
