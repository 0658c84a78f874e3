//! In-memory ledger for tests.
//!
//! [`TestLedger`] runs chaincode written against [`Stub`] inside the test
//! process. Submitted calls commit one block each and publish their event;
//! evaluated calls run on a scratch copy of the world state that is thrown
//! away afterwards.

mod registry;

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use avalon_client::{
    data_model::{ChaincodeCall, ChaincodeEvent, EventFilter, InvocationResponse},
    ledger::{EventSource, EventStream, Ledger, LedgerError},
};
use avalon_logger::prelude::*;
use futures_util::{future, stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

pub use self::registry::{
    RegistryChaincode, Worker, DEFAULT_PAGE_SIZE, OBJECT_TYPE, WORKER_ACTIVE,
    WORKER_COMPROMISED, WORKER_DECOMMISSIONED, WORKER_OFFLINE,
};

const EVENT_CAPACITY: usize = 1024;

/// Separator of composite key parts
const KEY_SEPARATOR: char = '\u{0}';

/// Chaincode runnable by the [`TestLedger`].
pub trait Chaincode: Send + Sync {
    /// Run `method` with `args` against `stub`.
    fn invoke(&self, stub: &mut Stub<'_>, method: &str, args: &[String]) -> InvocationResponse;
}

/// View of one chaincode's world state during a single invocation.
#[derive(Debug)]
pub struct Stub<'state> {
    state: &'state mut BTreeMap<String, String>,
    event: Option<(String, String)>,
}

impl<'state> Stub<'state> {
    fn new(state: &'state mut BTreeMap<String, String>) -> Self {
        Self { state, event: None }
    }

    /// Value stored under `key`
    pub fn get_state(&self, key: &str) -> Option<&str> {
        self.state.get(key).map(String::as_str)
    }

    /// Store `value` under `key`
    pub fn put_state(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.state.insert(key.into(), value.into());
    }

    /// Key made of `object_type` followed by `attrs`. Keys sharing a prefix
    /// of attributes sort next to each other.
    pub fn create_composite_key(object_type: &str, attrs: &[impl AsRef<str>]) -> String {
        let mut key = String::from(KEY_SEPARATOR);
        key.push_str(object_type);
        key.push(KEY_SEPARATOR);
        for attr in attrs {
            key.push_str(attr.as_ref());
            key.push(KEY_SEPARATOR);
        }
        key
    }

    /// Up to `page_size` entries whose composite key starts with
    /// `object_type` and `attrs`, beginning at `bookmark`.
    ///
    /// Returns the entries in key order and the bookmark of the next page,
    /// empty when nothing follows.
    pub fn partial_composite_key_page(
        &self,
        object_type: &str,
        attrs: &[impl AsRef<str>],
        page_size: usize,
        bookmark: &str,
    ) -> (Vec<(String, String)>, String) {
        let prefix = Self::create_composite_key(object_type, attrs);
        let start = bookmark.max(prefix.as_str()).to_owned();
        let mut matching = self
            .state
            .range(start..)
            .take_while(|(key, _)| key.starts_with(&prefix));
        let page = matching
            .by_ref()
            .take(page_size.max(1))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let next = matching.next().map(|(key, _)| key.clone()).unwrap_or_default();
        (page, next)
    }

    /// Publish `payload` as event `name` once the transaction commits.
    /// Only the last event of a transaction is kept.
    pub fn set_event(&mut self, name: impl Into<String>, payload: impl Into<String>) {
        self.event = Some((name.into(), payload.into()));
    }
}

/// Number of calls seen by a [`TestLedger`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Calls to [`Ledger::submit`]
    pub submits: usize,
    /// Calls to [`Ledger::evaluate`]
    pub evaluates: usize,
    /// Committed transactions
    pub commits: usize,
}

#[derive(Default)]
struct Faults {
    setup: Option<String>,
    unreachable: bool,
    next_endorsement: Option<String>,
}

struct Inner {
    chaincodes: BTreeMap<String, Arc<dyn Chaincode>>,
    state: BTreeMap<String, BTreeMap<String, String>>,
    height: u64,
    history: Vec<ChaincodeEvent>,
    counters: Counters,
    faults: Faults,
    events: Option<broadcast::Sender<ChaincodeEvent>>,
}

/// Single-peer ledger living in memory.
pub struct TestLedger {
    inner: Mutex<Inner>,
}

impl Default for TestLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TestLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("TestLedger")
            .field("chaincodes", &inner.chaincodes.keys().collect::<Vec<_>>())
            .field("height", &inner.height)
            .field("counters", &inner.counters)
            .finish_non_exhaustive()
    }
}

impl TestLedger {
    /// Ledger without chaincode
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                chaincodes: BTreeMap::new(),
                state: BTreeMap::new(),
                height: 0,
                history: Vec::new(),
                counters: Counters::default(),
                faults: Faults::default(),
                events: Some(events),
            }),
        }
    }

    /// Ledger with the work registry deployed as `registry`
    pub fn with_registry() -> Self {
        let ledger = Self::new();
        ledger.deploy("registry", RegistryChaincode::default());
        ledger
    }

    /// Install `chaincode` under `name`, replacing any previous one. The
    /// world state of `name` is kept.
    pub fn deploy(&self, name: impl Into<String>, chaincode: impl Chaincode + 'static) {
        self.lock().chaincodes.insert(name.into(), Arc::new(chaincode));
    }

    /// Calls seen so far
    pub fn counters(&self) -> Counters {
        self.lock().counters
    }

    /// Number of committed blocks
    pub fn height(&self) -> u64 {
        self.lock().height
    }

    /// Snapshot of the world state of `chaincode`
    pub fn state_of(&self, chaincode: &str) -> BTreeMap<String, String> {
        self.lock().state.get(chaincode).cloned().unwrap_or_default()
    }

    /// Every event committed so far
    pub fn emitted(&self) -> Vec<ChaincodeEvent> {
        self.lock().history.clone()
    }

    /// Refuse endorsement of the next call with `message`
    pub fn fail_next_endorsement(&self, message: impl Into<String>) {
        self.lock().faults.next_endorsement = Some(message.into());
    }

    /// Make the peer unreachable until reset
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().faults.unreachable = unreachable;
    }

    /// Fail every call as if the session could not be set up
    pub fn set_setup_failure(&self, message: impl Into<String>) {
        self.lock().faults.setup = Some(message.into());
    }

    /// End every open event stream. Later subscriptions only replay history.
    pub fn close_event_streams(&self) {
        self.lock().events = None;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn execute(&self, call: &ChaincodeCall, commit: bool) -> Result<InvocationResponse, LedgerError> {
        let mut inner = self.lock();
        if commit {
            inner.counters.submits += 1;
        } else {
            inner.counters.evaluates += 1;
        }
        inner.check_faults()?;
        if let Some(message) = inner.faults.next_endorsement.take() {
            return Err(LedgerError::Endorsement(message));
        }
        let Some(chaincode) = inner.chaincodes.get(&call.chaincode).cloned() else {
            return Err(LedgerError::Endorsement(format!(
                "chaincode `{}` is not installed",
                call.chaincode
            )));
        };

        let mut scratch = inner.state.get(&call.chaincode).cloned().unwrap_or_default();
        let (response, event) = {
            let mut stub = Stub::new(&mut scratch);
            let response = chaincode.invoke(&mut stub, &call.method, &call.wire_args());
            (response, stub.event)
        };
        if !commit || !response.is_success() {
            trace!(%call, status = response.status, "Discarding simulation");
            return Ok(response);
        }

        inner.state.insert(call.chaincode.clone(), scratch);
        inner.height += 1;
        inner.counters.commits += 1;
        let block = inner.height;
        debug!(%call, block, "Committed transaction");

        if let Some((event_name, payload)) = event {
            let event = ChaincodeEvent {
                chaincode: call.chaincode.clone(),
                event_name,
                payload,
                block_number: block,
                tx_id: format!("tx{block}"),
                status: "VALID".to_owned(),
            };
            if let Some(events) = &inner.events {
                // No subscriber is not an error
                let _ = events.send(event.clone());
            }
            inner.history.push(event);
        }
        Ok(response)
    }

    fn open_stream(&self, filter: &EventFilter) -> Result<EventStream, LedgerError> {
        let inner = self.lock();
        inner.check_faults()?;

        let replayed: Vec<_> = match filter.start_block {
            Some(_) => inner
                .history
                .iter()
                .filter(|event| filter.matches(event))
                .cloned()
                .map(Ok)
                .collect(),
            None => Vec::new(),
        };
        let replay = stream::iter(replayed);
        let Some(events) = &inner.events else {
            return Ok(replay.boxed());
        };

        let after = inner.height;
        let filter = filter.clone();
        let live = BroadcastStream::new(events.subscribe()).filter_map(move |item| {
            future::ready(match item {
                Ok(event) if event.block_number > after && filter.matches(&event) => Some(Ok(event)),
                Ok(_) => None,
                Err(err) => Some(Err(LedgerError::Protocol(err.to_string()))),
            })
        });
        Ok(replay.chain(live).boxed())
    }
}

impl Inner {
    fn check_faults(&self) -> Result<(), LedgerError> {
        if let Some(message) = &self.faults.setup {
            return Err(LedgerError::Setup(message.clone()));
        }
        if self.faults.unreachable {
            return Err(LedgerError::Unreachable("connection refused".to_owned()));
        }
        Ok(())
    }
}

impl Ledger for TestLedger {
    fn submit(&self, call: &ChaincodeCall) -> Result<InvocationResponse, LedgerError> {
        self.execute(call, true)
    }

    fn evaluate(&self, call: &ChaincodeCall) -> Result<InvocationResponse, LedgerError> {
        self.execute(call, false)
    }
}

#[async_trait::async_trait]
impl EventSource for TestLedger {
    async fn subscribe(&self, filter: &EventFilter) -> Result<EventStream, LedgerError> {
        self.open_stream(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts its calls in the world state and emits `bumped`.
    struct Counter;

    impl Chaincode for Counter {
        fn invoke(&self, stub: &mut Stub<'_>, method: &str, _args: &[String]) -> InvocationResponse {
            let current: u64 = stub.get_state("count").map_or(0, |count| count.parse().unwrap_or(0));
            match method {
                "bump" => {
                    stub.put_state("count", (current + 1).to_string());
                    stub.set_event("bumped", (current + 1).to_string());
                    InvocationResponse::success(None)
                }
                "get" => InvocationResponse::success(Some(current.to_string())),
                _ => InvocationResponse::failure(500, "Invalid invoke function name"),
            }
        }
    }

    fn ledger() -> TestLedger {
        let ledger = TestLedger::new();
        ledger.deploy("counter", Counter);
        ledger
    }

    #[test]
    fn evaluation_discards_writes() {
        let ledger = ledger();
        ledger.evaluate(&ChaincodeCall::new("counter", "bump")).unwrap();
        assert!(ledger.state_of("counter").is_empty());
        assert_eq!(ledger.height(), 0);
        assert!(ledger.emitted().is_empty());

        ledger.submit(&ChaincodeCall::new("counter", "bump")).unwrap();
        let get = ledger.evaluate(&ChaincodeCall::new("counter", "get")).unwrap();
        assert_eq!(get.payload.as_deref(), Some("1"));
        assert_eq!(
            ledger.counters(),
            Counters {
                submits: 1,
                evaluates: 2,
                commits: 1
            }
        );
    }

    #[test]
    fn failed_transactions_are_not_committed() {
        let ledger = ledger();
        let response = ledger.submit(&ChaincodeCall::new("counter", "nope")).unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(ledger.height(), 0);
        assert_eq!(ledger.counters().commits, 0);
    }

    #[test]
    fn committed_events_carry_their_block() {
        let ledger = ledger();
        for _ in 0..3 {
            ledger.submit(&ChaincodeCall::new("counter", "bump")).unwrap();
        }
        let blocks: Vec<_> = ledger.emitted().iter().map(|e| e.block_number).collect();
        assert_eq!(blocks, vec![1, 2, 3]);
        assert_eq!(ledger.emitted()[2].tx_id, "tx3");
        assert_eq!(ledger.emitted()[2].payload, "3");
    }

    #[test]
    fn faults_surface_as_ledger_errors() {
        let ledger = ledger();
        assert!(matches!(
            ledger.submit(&ChaincodeCall::new("missing", "bump")),
            Err(LedgerError::Endorsement(_))
        ));

        ledger.fail_next_endorsement("policy not satisfied");
        assert_eq!(
            ledger.submit(&ChaincodeCall::new("counter", "bump")),
            Err(LedgerError::Endorsement("policy not satisfied".to_owned()))
        );
        assert!(ledger.submit(&ChaincodeCall::new("counter", "bump")).is_ok());

        ledger.set_unreachable(true);
        assert!(matches!(
            ledger.evaluate(&ChaincodeCall::new("counter", "get")),
            Err(LedgerError::Unreachable(_))
        ));
        ledger.set_unreachable(false);

        ledger.set_setup_failure("channel `nochannel` not found");
        assert!(ledger.evaluate(&ChaincodeCall::new("counter", "get")).unwrap_err().is_fatal());
    }

    #[test]
    fn partial_keys_page_in_key_order() {
        let mut state = BTreeMap::new();
        let mut stub = Stub::new(&mut state);
        for (kind, id) in [("a", "3"), ("a", "1"), ("b", "2"), ("a", "2")] {
            stub.put_state(Stub::create_composite_key("Obj", &[kind, id]), id);
        }
        stub.put_state("plain", "x");

        let (first, bookmark) = stub.partial_composite_key_page("Obj", &["a"], 2, "");
        let ids: Vec<_> = first.iter().map(|(_, id)| id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(bookmark, Stub::create_composite_key("Obj", &["a", "3"]));

        let (second, bookmark) = stub.partial_composite_key_page("Obj", &["a"], 2, &bookmark);
        assert_eq!(second.len(), 1);
        assert_eq!(bookmark, "");

        let (all, _) = stub.partial_composite_key_page("Obj", &[] as &[&str], 10, "");
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn subscribers_get_history_then_live_events() {
        let ledger = ledger();
        ledger.submit(&ChaincodeCall::new("counter", "bump")).unwrap();
        ledger.submit(&ChaincodeCall::new("counter", "bump")).unwrap();

        let mut replaying = ledger
            .subscribe(&EventFilter::new("counter", "bumped").from_block(2))
            .await
            .unwrap();
        let mut live = ledger
            .subscribe(&EventFilter::new("counter", "bumped"))
            .await
            .unwrap();
        ledger.submit(&ChaincodeCall::new("counter", "bump")).unwrap();
        ledger.close_event_streams();

        let replayed: Vec<_> = replaying
            .by_ref()
            .map(|event| event.unwrap().block_number)
            .collect()
            .await;
        assert_eq!(replayed, vec![2, 3]);
        let live: Vec<_> = live.by_ref().map(|event| event.unwrap().block_number).collect().await;
        assert_eq!(live, vec![3]);
    }
}
