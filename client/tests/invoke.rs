use avalon_client::prelude::*;
use eyre::Result;
use serde_json::{json, Value};
use test_ledger::{TestLedger, WORKER_ACTIVE};

fn worker(id: &str) -> Value {
    json!({
        "workerID": id,
        "workerType": 1,
        "organizationID": "org1",
        "applicationTypeId": ["a1", "a2", "a3"],
        "details": "x",
    })
}

#[test]
fn registered_worker_can_be_queried() -> Result<()> {
    let client = Client::new(TestLedger::with_registry());

    let registered = client.invoke([worker("ID1")], "registry", "workerRegister", "1.0", false)?;
    assert_eq!(registered.status, InvocationResponse::STATUS_OK);

    let found = client.query(["ID1"], "registry")?;
    assert!(found.is_success());
    let found: Value = found.payload_json()?;
    assert_eq!(found["workerID"], "ID1");
    assert_eq!(found["status"], WORKER_ACTIVE);
    Ok(())
}

#[test]
fn query_only_calls_leave_the_ledger_untouched() -> Result<()> {
    let ledger = TestLedger::with_registry();
    let client = Client::new(&ledger);

    let simulated = client.invoke([worker("ID1")], "registry", "workerRegister", "", true)?;
    assert!(simulated.is_success());
    assert!(ledger.state_of("registry").is_empty());
    assert_eq!(ledger.height(), 0);
    assert!(ledger.emitted().is_empty());

    let missing = client.query(["ID1"], "registry")?;
    assert_eq!(missing.status, InvocationResponse::STATUS_CHAINCODE_ERROR);
    assert_eq!(missing.message, "WorkerID 'ID1' does not exist");
    assert_eq!(ledger.counters().submits, 0);
    Ok(())
}

#[test]
fn endorsement_failure_is_a_failed_response() -> Result<()> {
    let ledger = TestLedger::with_registry();
    let client = Client::new(&ledger);

    ledger.fail_next_endorsement("endorsement policy not satisfied");
    let refused = client.invoke([worker("ID1")], "registry", "workerRegister", "", false)?;
    assert_eq!(refused.status, InvocationResponse::STATUS_CHAINCODE_ERROR);
    assert!(refused.message.contains("endorsement policy not satisfied"));
    assert_eq!(ledger.counters().commits, 0);

    ledger.set_unreachable(true);
    let unreachable = client.query(["ID1"], "registry")?;
    assert_eq!(unreachable.status, InvocationResponse::STATUS_UNAVAILABLE);
    assert!(!unreachable.message.is_empty());
    Ok(())
}

#[test]
fn setup_failure_aborts_the_call() {
    let ledger = TestLedger::with_registry();
    ledger.set_setup_failure("channel `nochannel` does not exist");
    let client = Client::new(&ledger);

    let err = client.query(["ID1"], "registry").unwrap_err();
    assert!(matches!(err, InvokeError::Setup(LedgerError::Setup(_))));
}

#[test]
fn chaincode_errors_keep_their_message() -> Result<()> {
    let client = Client::new(TestLedger::with_registry());
    let response = client.invoke(["W9", "2"], "registry", "workerSetStatus", "", false)?;
    assert_eq!(response.status, InvocationResponse::STATUS_CHAINCODE_ERROR);
    assert_eq!(response.message, "Worker with ID 'W9' does not exist");

    let unknown = client.invoke(["x"], "nosuchcc", "query", "", true)?;
    assert_eq!(unknown.status, InvocationResponse::STATUS_CHAINCODE_ERROR);
    Ok(())
}

#[test]
fn batch_runs_every_call() -> Result<()> {
    let ledger = TestLedger::with_registry();
    let client = Client::new(&ledger);

    let calls = ["W1", "W2", "W3"].map(|id| {
        ChaincodeCall::new("registry", "workerRegister").with_args([id, "1", "org1", "a1", "x"])
    });
    let mut responses = client.invoke_all(calls)?;
    responses.extend(client.invoke_all([
        ChaincodeCall::new("registry", "workerSetStatus").with_args(["W9", "2"]),
        ChaincodeCall::new("registry", "workerSetStatus").with_args(["W2", "2"]),
    ])?);

    let statuses: Vec<_> = responses.iter().map(|response| response.status).collect();
    assert_eq!(statuses, vec![200, 200, 200, 500, 200]);
    assert_eq!(ledger.height(), 4);
    Ok(())
}
