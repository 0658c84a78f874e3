//! Seam between the façade and whatever talks to the ledger network.
//!
//! [`Ledger`] is the SDK session reduced to its two operations: `submit`
//! (endorse, order and wait for commit) and `evaluate` (ask a single peer,
//! never commit). [`EventSource`] delivers chaincode events.

use std::{sync::Arc, time::Duration};

use futures_util::stream::BoxStream;

use crate::data_model::{ChaincodeCall, ChaincodeEvent, EventFilter, InvocationResponse};

/// Failures of the ledger session
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The session can't be used at all: unknown channel or peer, bad identity
    #[error("Ledger setup failed: {0}")]
    Setup(String),
    /// The peer or gateway could not be reached
    #[error("Peer unreachable: {0}")]
    Unreachable(String),
    /// TLS or authentication was refused
    #[error("TLS failure: {0}")]
    Tls(String),
    /// Endorsement was refused
    #[error("Endorsement failed: {0}")]
    Endorsement(String),
    /// No commit acknowledgment arrived in time
    #[error("Commit acknowledgment not received within {0:?}")]
    CommitTimeout(Duration),
    /// The reply could not be understood
    #[error("Malformed ledger reply: {0}")]
    Protocol(String),
}

impl LedgerError {
    /// Whether the error aborts the run instead of failing a single call
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Setup(_))
    }

    /// Whether the error comes from the transport rather than the chaincode
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::Tls(_) | Self::CommitTimeout(_) | Self::Protocol(_)
        )
    }
}

/// Blocking access to a channel on behalf of one user.
pub trait Ledger {
    /// Endorse, order and commit `call`, waiting for the commit acknowledgment.
    ///
    /// # Errors
    /// If the call never produced a chaincode response.
    fn submit(&self, call: &ChaincodeCall) -> Result<InvocationResponse, LedgerError>;

    /// Run `call` on a single peer without committing.
    ///
    /// # Errors
    /// If the call never produced a chaincode response.
    fn evaluate(&self, call: &ChaincodeCall) -> Result<InvocationResponse, LedgerError>;
}

impl<L: Ledger + ?Sized> Ledger for &L {
    fn submit(&self, call: &ChaincodeCall) -> Result<InvocationResponse, LedgerError> {
        (**self).submit(call)
    }

    fn evaluate(&self, call: &ChaincodeCall) -> Result<InvocationResponse, LedgerError> {
        (**self).evaluate(call)
    }
}

impl<L: Ledger + ?Sized> Ledger for Arc<L> {
    fn submit(&self, call: &ChaincodeCall) -> Result<InvocationResponse, LedgerError> {
        (**self).submit(call)
    }

    fn evaluate(&self, call: &ChaincodeCall) -> Result<InvocationResponse, LedgerError> {
        (**self).evaluate(call)
    }
}

/// Events in delivery order
pub type EventStream = BoxStream<'static, Result<ChaincodeEvent, LedgerError>>;

/// Source of chaincode events.
#[async_trait::async_trait]
pub trait EventSource {
    /// Open a subscription delivering the events selected by `filter`.
    ///
    /// # Errors
    /// If the subscription can't be opened.
    async fn subscribe(&self, filter: &EventFilter) -> Result<EventStream, LedgerError>;
}

#[async_trait::async_trait]
impl<S: EventSource + Send + Sync + ?Sized> EventSource for Arc<S> {
    async fn subscribe(&self, filter: &EventFilter) -> Result<EventStream, LedgerError> {
        (**self).subscribe(filter).await
    }
}
