use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::SeedableRng;

use sceneops::scenario::{EntityData, Scenario, TokenData, TokenKind};
use sceneops::smart_value::{AnyKind, IntKind, StrKind};
use sceneops::{
    Address, Config, ExecutionContext, MapEnv, MemoryLedger, Resolver, Scene, ScenarioStore, SmartValue, Value,
};

fn seeded_scenario() -> Scenario {
    let mut scenario = Scenario::new("bench", "devnet");
    // 256 values so lookups walk a realistically sized map.
    for i in 0..256 {
        scenario.set_value(&format!("value_{i}"), Value::Int(i)).unwrap();
    }
    scenario.set_value("alias", Value::from("usd")).unwrap();
    scenario
        .add_token(TokenData::new("usd", "USD", "USD-a1b2c3", TokenKind::Fungible))
        .unwrap();
    scenario
        .add_entity(EntityData::account("alice", Address::from_bytes([7; 32])))
        .unwrap();
    scenario
}

fn bench_resolution(c: &mut Criterion) {
    let scenario = seeded_scenario();
    let config = Config::builtin("devnet").unwrap();
    let env = MapEnv::new().with("HOME", "/home/bench");
    let rng = RefCell::new(StdRng::seed_from_u64(1));
    let resolver = Resolver::new(&config, &env, &rng).with_scenario(&scenario);

    let mut group = c.benchmark_group("resolution");
    group.throughput(Throughput::Elements(1));

    group.bench_function("plain_string", |b| {
        b.iter(|| SmartValue::<StrKind>::resolve("no symbols at all", &resolver).unwrap());
    });
    group.bench_function("nested_lookup", |b| {
        b.iter(|| SmartValue::<StrKind>::resolve("%{%{alias}.identifier}", &resolver).unwrap());
    });
    group.bench_function("formula", |b| {
        b.iter(|| SmartValue::<IntKind>::resolve("={%{value_12} * %{value_200} + 7}", &resolver).unwrap());
    });
    group.bench_function("deep_list", |b| {
        let raw = Value::List((0..64).map(|i| Value::from(format!("%value_{i}"))).collect());
        b.iter(|| SmartValue::<AnyKind>::resolve(raw.clone(), &resolver).unwrap());
    });

    group.finish();
}

fn bench_scene_loop(c: &mut Criterion) {
    let yaml = "steps:
  - type: Loop
    var_name: i
    var_start: 0
    var_end: 50
    steps:
      - type: SetVars
        variables:
          counter_%{i}: '={%{i} * 2}'";
    let scene = Scene::from_yaml_str(yaml, Path::new("bench.yaml")).unwrap();

    c.bench_function("scene/loop_set_vars", |b| {
        b.iter_batched(
            || {
                // Fresh scenario per batch so documents do not grow between samples.
                let dir = tempfile::tempdir().unwrap();
                let mut store = ScenarioStore::open(dir.path(), "devnet").unwrap();
                store.create("bench", false).unwrap();
                let config = Config::builtin("devnet").unwrap();
                let ctx = ExecutionContext::new(config, store, Arc::new(MemoryLedger::new())).unwrap();
                (dir, ctx)
            },
            |(_dir, mut ctx)| scene.execute(&mut ctx).unwrap(),
            BatchSize::PerIteration,
        );
    });
}

criterion_group!(resolution, bench_resolution, bench_scene_loop);
criterion_main!(resolution);
