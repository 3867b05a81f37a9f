use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sceneops::error::StepError;
use sceneops::ledger::{CallRequest, FinalityPolicy};
use sceneops::{
    execute_path, Address, Config, ExecutionContext, LedgerGateway, MemoryLedger, OpsError, ScenarioStore,
    SigningAccount, Value,
};

const BALANCE: u128 = 1_000_000_000_000_000_000_000;
const WASM: &[u8] = b"\0asm\x01\0\0\0adder";

fn fast_finality() -> FinalityPolicy {
    FinalityPolicy {
        timeout: Duration::from_secs(5),
        refresh: Duration::from_millis(1),
        read_retries: 0,
    }
}

fn ledger() -> Arc<MemoryLedger> {
    let ledger = MemoryLedger::new().with_initial_balance(BALANCE);
    ledger.register_call("add", |request: &CallRequest<'_>| {
        request
            .args
            .first()
            .cloned()
            .map(|arg| vec![arg])
            .ok_or_else(|| "missing argument".to_string())
    });
    ledger.register_call("explode", |_: &CallRequest<'_>| Err("boom".to_string()));
    Arc::new(ledger)
}

fn context(root: &Path, scenario: &str, ledger: &Arc<MemoryLedger>) -> ExecutionContext {
    let config = Config::builtin("devnet").unwrap();
    let mut store = ScenarioStore::open(root.join("data"), "devnet").unwrap();
    store.load_or_create(scenario).unwrap();
    let gateway: Arc<dyn LedgerGateway> = ledger.clone();
    ExecutionContext::new(config, store, gateway)
        .unwrap()
        .with_finality(fast_finality())
        .with_seed(1)
}

struct Workspace {
    _dir: tempfile::TempDir,
    root: PathBuf,
    owner: SigningAccount,
    bob: Address,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let owner = SigningAccount::from_secret("owner", [3; 32]);
        fs::write(root.join("owner.pem"), owner.to_pem()).unwrap();
        fs::write(root.join("adder.wasm"), WASM).unwrap();
        Self {
            _dir: dir,
            root,
            owner,
            bob: Address::from_bytes([9; 32]),
        }
    }

    fn scene(&self, name: &str, steps: &str) -> PathBuf {
        let text = format!(
            "allowed_networks: [devnet]
allowed_scenario: ['e2e_.*']
accounts:
  - account_name: owner
    pem_path: {}
  - account_id: bob
    address: {}
steps:
{steps}",
            self.root.join("owner.pem").display(),
            self.bob.to_bech32(),
        );
        let path = self.root.join(name);
        fs::write(&path, text).unwrap();
        path
    }
}

#[test]
fn full_scene_deploys_calls_transfers_issues_and_loops() {
    let ws = Workspace::new();
    let ledger = ledger();
    let scene = ws.scene(
        "main.yaml",
        &format!(
            "  - type: ContractDeploy
    sender: owner
    wasm_path: {}
    contract_id: adder
    gas_limit: 10000000
    arguments: [0]
  - type: ContractCall
    sender: owner
    contract: adder
    endpoint: add
    gas_limit: 5000000
    arguments: [5]
    results_save_keys: [last_added]
  - type: Transfer
    sender: owner
    receiver: bob
    value: 1000
    checks:
      - type: Success
      - type: Transfers
        expected_transfers:
          - [owner, bob, EGLD, 1000]
  - type: FungibleIssue
    sender: owner
    token_name: BobToken
    token_ticker: BOBT
    initial_supply: 1000000
    num_decimals: 6
  - type: Loop
    var_name: i
    var_start: 0
    var_end: 3
    steps:
      - type: SetVars
        variables:
          counter_%{{i}}: '={{%{{i}} + 1}}'
",
            ws.root.join("adder.wasm").display()
        ),
    );

    let mut ctx = context(&ws.root, "e2e_full", &ledger);
    execute_path(&mut ctx, &scene).unwrap();

    let store = ctx.store();
    let address = match store.get_value("adder.address").unwrap() {
        Value::String(bech32) => Address::from_bech32(&bech32).unwrap(),
        other => panic!("unexpected address value {other:?}"),
    };
    let code_hash = blake3::hash(WASM).to_hex().to_string();
    assert_eq!(ledger.code_hash(&address), Some(code_hash.clone()));
    assert_eq!(store.get_value("adder.code_hash").unwrap(), Value::from(code_hash.as_str()));
    assert!(matches!(store.get_value("adder.deploy_time").unwrap(), Value::Int(t) if t > 0));
    assert_eq!(store.get_value("adder.last_added").unwrap(), Value::Bytes(vec![5]));

    assert_eq!(ledger.balance(&ws.bob), BALANCE + 1000);

    let identifier = store.get_value("BobToken.identifier").unwrap();
    let Value::String(identifier) = identifier else {
        panic!("identifier is not a string");
    };
    assert!(identifier.starts_with("BOBT-"));
    assert_eq!(identifier.len(), "BOBT-".len() + 6);

    for i in 0..3 {
        assert_eq!(store.get_value(&format!("counter_{i}")).unwrap(), Value::Int(i + 1));
    }

    // deploy, call, transfer and issue
    assert_eq!(ledger.account_nonce(&ws.owner.address()).unwrap(), 4);
}

#[test]
fn roles_gate_non_fungible_mints() {
    let ws = Workspace::new();
    let ledger = ledger();
    let scene = ws.scene(
        "nft.yaml",
        "  - type: NonFungibleIssue
    sender: owner
    token_name: Art
    token_ticker: ART
  - type: NonFungibleMint
    sender: owner
    token_identifier: '%{Art.identifier}'
    amount: 1
    checks:
      - type: Fail
  - type: ManageNonFungibleTokenRoles
    sender: owner
    is_set: true
    token_identifier: '%{Art.identifier}'
    target: owner
    roles: [nft_create, ESDTTransferRole]
  - type: Loop
    var_name: i
    var_start: 0
    var_end: 2
    steps:
      - type: NonFungibleMint
        sender: owner
        token_identifier: '%{Art.identifier}'
        amount: 1
        name: 'Art #%{i}'
        royalties: 500
        attributes: 'metadata:%{i}'
        uris: ['https://example.org/%{i}.png']
  - type: ManageNonFungibleTokenRoles
    sender: owner
    is_set: false
    token_identifier: '%{Art.identifier}'
    target: owner
    roles: [nft_create]
",
    );

    let mut ctx = context(&ws.root, "e2e_nft", &ledger);
    execute_path(&mut ctx, &scene).unwrap();

    let Value::String(identifier) = ctx.store().get_value("Art.identifier").unwrap() else {
        panic!("identifier is not a string");
    };
    let owner = ws.owner.address();
    for nonce in 1..=2 {
        let token = sceneops::smart_value::TokenRef::new(identifier.clone(), nonce);
        assert_eq!(ledger.token_balance(&owner, &token), 1);
    }
    // issue, refused mint, set, two mints, unset
    assert_eq!(ledger.account_nonce(&owner).unwrap(), 6);

    let bad_role = ws.scene(
        "bad_role.yaml",
        "  - type: ManageFungibleTokenRoles
    sender: owner
    is_set: true
    token_identifier: '%{Art.identifier}'
    target: owner
    roles: [nft_create]
",
    );
    drop(ctx);
    let mut ctx = context(&ws.root, "e2e_nft", &ledger);
    let err = execute_path(&mut ctx, &bad_role).unwrap_err();
    assert!(matches!(err.root_cause(), OpsError::Step(StepError::InvalidStepDefinition { .. })));
    assert_eq!(ledger.account_nonce(&owner).unwrap(), 6);
}

#[test]
fn state_survives_a_new_run_and_nonces_resync() {
    let ws = Workspace::new();
    let ledger = ledger();
    let deploy = ws.scene(
        "01_deploy.yaml",
        &format!(
            "  - type: ContractDeploy
    sender: owner
    wasm_path: {}
    contract_id: adder
    gas_limit: 10000000
",
            ws.root.join("adder.wasm").display()
        ),
    );
    let mut ctx = context(&ws.root, "e2e_resume", &ledger);
    execute_path(&mut ctx, &deploy).unwrap();
    drop(ctx);

    let call = ws.scene(
        "02_call.yaml",
        "  - type: ContractCall
    sender: owner
    contract: adder
    endpoint: add
    gas_limit: 5000000
    arguments: [7]
    results_save_keys: [last_added]
",
    );
    let mut ctx = context(&ws.root, "e2e_resume", &ledger);
    execute_path(&mut ctx, &call).unwrap();
    assert_eq!(ctx.store().get_value("adder.last_added").unwrap(), Value::Bytes(vec![7]));
    assert_eq!(ledger.account_nonce(&ws.owner.address()).unwrap(), 2);
}

#[test]
fn failed_call_stops_the_scene() {
    let ws = Workspace::new();
    let ledger = ledger();
    let scene = ws.scene(
        "failing.yaml",
        &format!(
            "  - type: ContractDeploy
    sender: owner
    wasm_path: {}
    contract_id: adder
    gas_limit: 10000000
  - type: ContractCall
    sender: owner
    contract: adder
    endpoint: explode
    gas_limit: 5000000
  - type: SetVars
    variables:
      reached: true
",
            ws.root.join("adder.wasm").display()
        ),
    );
    let mut ctx = context(&ws.root, "e2e_failing", &ledger);
    let err = execute_path(&mut ctx, &scene).unwrap_err();
    assert!(err.is_step() || err.is_transaction(), "unexpected error {err}");
    assert!(ctx.store().get_value("adder.address").is_ok());
    assert!(ctx.store().get_value("reached").is_err());
}

#[test]
fn expected_failure_is_accepted_by_a_fail_check() {
    let ws = Workspace::new();
    let ledger = ledger();
    let scene = ws.scene(
        "expected_failure.yaml",
        &format!(
            "  - type: ContractDeploy
    sender: owner
    wasm_path: {}
    contract_id: adder
    gas_limit: 10000000
  - type: ContractCall
    sender: owner
    contract: adder
    endpoint: explode
    gas_limit: 5000000
    checks:
      - type: Fail
  - type: SetVars
    variables:
      reached: true
",
            ws.root.join("adder.wasm").display()
        ),
    );
    let mut ctx = context(&ws.root, "e2e_expected", &ledger);
    execute_path(&mut ctx, &scene).unwrap();
    assert_eq!(ctx.store().get_value("reached").unwrap(), Value::Bool(true));
}

#[test]
fn mismatching_transfers_check_reports_the_transaction() {
    let ws = Workspace::new();
    let ledger = ledger();
    let scene = ws.scene(
        "transfer.yaml",
        "  - type: Transfer
    sender: owner
    receiver: bob
    value: 1000
    checks:
      - type: Transfers
        expected_transfers:
          - sender: owner
            receiver: bob
            identifier: EGLD
            amount: 999
",
    );
    let mut ctx = context(&ws.root, "e2e_transfers", &ledger);
    let err = execute_path(&mut ctx, &scene).unwrap_err();
    match err {
        OpsError::Step(StepError::CheckFailed(failure)) => {
            assert_eq!(failure.transaction.value, 1000);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn scenario_outside_the_allow_list_is_refused() {
    let ws = Workspace::new();
    let ledger = ledger();
    let scene = ws.scene("guarded.yaml", "  - type: SetVars\n    variables: {touched: true}\n");
    let mut ctx = context(&ws.root, "production", &ledger);
    let err = execute_path(&mut ctx, &scene).unwrap_err();
    assert!(matches!(err, OpsError::Step(StepError::ScenarioNotAllowed { .. })));
    assert!(ctx.store().get_value("touched").is_err());
    assert!(ctx.store().get_value("owner.address").is_err());
}
