//! Client side of chaincode invocation: the invocation façade, the
//! lookup/lookupNext pagination protocol, event subscription and the
//! gateway transport they run on.

/// Module with the invocation façade itself
pub mod client;
pub mod context;
pub mod data_model;
pub mod events;
pub mod fixtures;
pub mod gateway;
/// Module with general communication primitives like an HTTP request builder.
pub mod http;
mod http_default;
pub mod ledger;
pub mod pagination;

pub use self::{
    client::{Client, InvokeError},
    context::{ConnectionContext, ContextError},
    gateway::Gateway,
    ledger::{EventSource, Ledger, LedgerError},
};

pub mod prelude {
    //! Re-exports of the most used types.

    pub use crate::{
        client::{Client, InvokeError},
        data_model::{Arg, ChaincodeCall, ChaincodeEvent, EventFilter, InvocationResponse},
        events::{EventListener, ListenReport, StopHandle, StopReason, SubscriptionState},
        fixtures::{FixtureGenerator, RandomFixtures},
        ledger::{EventSource, EventStream, Ledger, LedgerError},
        pagination::{Lookup, LookupCursor, PagedResult, PaginationError},
    };
}
