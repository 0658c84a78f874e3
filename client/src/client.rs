//! Invocation façade: every chaincode call of the samples goes through
//! [`Client::invoke`].
use avalon_logger::prelude::*;

use crate::{
    data_model::{Arg, CallError, ChaincodeCall, InvocationResponse},
    ledger::{Ledger, LedgerError},
};

/// Method used by [`Client::query`]
pub const DEFAULT_QUERY_METHOD: &str = "query";

/// Errors that fail a call outright instead of producing a response
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// The call was rejected before reaching the ledger
    #[error("Invalid chaincode call")]
    InvalidCall(#[from] CallError),
    /// The ledger session is unusable
    #[error("Ledger setup failed")]
    Setup(#[source] LedgerError),
}

/// Client bound to one channel and one user through a [`Ledger`].
#[derive(Debug, Clone)]
pub struct Client<L> {
    ledger: L,
}

impl<L: Ledger> Client<L> {
    /// Wrap a ledger session
    pub fn new(ledger: L) -> Self {
        Self { ledger }
    }

    /// The underlying session
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Invoke `chaincode.method` with positional `args`.
    ///
    /// State-changing calls are submitted and wait for the commit
    /// acknowledgment; `query_only` calls are evaluated on a single peer.
    /// An empty `version` selects the latest one.
    ///
    /// Transport and endorsement failures come back as a failed
    /// [`InvocationResponse`] so batches can carry on.
    ///
    /// # Errors
    /// - [`InvokeError::InvalidCall`] if `chaincode` or `method` is empty
    /// - [`InvokeError::Setup`] if the ledger session is unusable
    pub fn invoke<A: Into<Arg>>(
        &self,
        args: impl IntoIterator<Item = A>,
        chaincode: &str,
        method: &str,
        version: &str,
        query_only: bool,
    ) -> Result<InvocationResponse, InvokeError> {
        let call = ChaincodeCall::new(chaincode, method)
            .with_version(version)
            .with_args(args)
            .query_only(query_only);
        self.invoke_call(&call)
    }

    /// Same as [`Self::invoke`] for a prebuilt call.
    ///
    /// # Errors
    /// See [`Self::invoke`].
    pub fn invoke_call(&self, call: &ChaincodeCall) -> Result<InvocationResponse, InvokeError> {
        call.validate()?;

        debug!(%call, args = ?call.wire_args(), query = call.is_query, "Invoking chaincode");
        let result = if call.is_query {
            self.ledger.evaluate(call)
        } else {
            self.ledger.submit(call)
        };

        let response = match result {
            Ok(response) => response,
            Err(err) if err.is_fatal() => {
                error!(%call, %err, "Ledger session is unusable");
                return Err(InvokeError::Setup(err));
            }
            Err(err) => {
                let status = if err.is_transport() {
                    InvocationResponse::STATUS_UNAVAILABLE
                } else {
                    InvocationResponse::STATUS_CHAINCODE_ERROR
                };
                InvocationResponse::failure(status, err.to_string())
            }
        };

        if response.is_success() {
            debug!(%call, "Chaincode call succeeded");
        } else {
            warn!(%call, status = response.status, message = %response.message, "Chaincode call failed");
        }
        Ok(response)
    }

    /// Evaluate the default lookup method (`query`) of `chaincode`.
    ///
    /// # Errors
    /// See [`Self::invoke`].
    pub fn query<A: Into<Arg>>(
        &self,
        args: impl IntoIterator<Item = A>,
        chaincode: &str,
    ) -> Result<InvocationResponse, InvokeError> {
        self.invoke(args, chaincode, DEFAULT_QUERY_METHOD, "", true)
    }

    /// Run `calls` in order, one response per call. Failed calls don't stop
    /// the batch.
    ///
    /// # Errors
    /// Stops at the first call [`Self::invoke_call`] rejects.
    pub fn invoke_all(
        &self,
        calls: impl IntoIterator<Item = ChaincodeCall>,
    ) -> Result<Vec<InvocationResponse>, InvokeError> {
        calls
            .into_iter()
            .map(|call| self.invoke_call(&call))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::VecDeque, time::Duration};

    use super::*;

    /// Replays scripted replies and records which path every call took.
    #[derive(Default)]
    struct Scripted {
        replies: RefCell<VecDeque<Result<InvocationResponse, LedgerError>>>,
        log: RefCell<Vec<(&'static str, ChaincodeCall)>>,
    }

    impl Scripted {
        fn reply(self, reply: Result<InvocationResponse, LedgerError>) -> Self {
            self.replies.borrow_mut().push_back(reply);
            self
        }

        fn next(&self, path: &'static str, call: &ChaincodeCall) -> Result<InvocationResponse, LedgerError> {
            self.log.borrow_mut().push((path, call.clone()));
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(InvocationResponse::success(None)))
        }
    }

    impl Ledger for Scripted {
        fn submit(&self, call: &ChaincodeCall) -> Result<InvocationResponse, LedgerError> {
            self.next("submit", call)
        }

        fn evaluate(&self, call: &ChaincodeCall) -> Result<InvocationResponse, LedgerError> {
            self.next("evaluate", call)
        }
    }

    #[test]
    fn query_only_calls_are_evaluated() {
        let client = Client::new(Scripted::default());
        client.invoke(["ID1"], "registry", "workerRetrieve", "", true).unwrap();
        client.invoke(["ID1", "x"], "registry", "workerUpdate", "", false).unwrap();
        client.query(["ID1"], "registry").unwrap();

        let log = client.ledger().log.borrow();
        let paths: Vec<_> = log.iter().map(|(path, call)| (*path, call.method.as_str())).collect();
        assert_eq!(
            paths,
            vec![
                ("evaluate", "workerRetrieve"),
                ("submit", "workerUpdate"),
                ("evaluate", "query"),
            ]
        );
    }

    #[test]
    fn empty_names_never_reach_the_ledger() {
        let client = Client::new(Scripted::default());
        assert_eq!(
            client.invoke(Vec::<Arg>::new(), "", "query", "", true),
            Err(InvokeError::InvalidCall(CallError::EmptyChaincode))
        );
        assert_eq!(
            client.invoke(Vec::<Arg>::new(), "registry", "", "", false),
            Err(InvokeError::InvalidCall(CallError::EmptyMethod))
        );
        assert!(client.ledger().log.borrow().is_empty());
    }

    #[test]
    fn per_call_failures_become_responses() {
        let ledger = Scripted::default()
            .reply(Err(LedgerError::Endorsement("policy not satisfied".to_owned())))
            .reply(Err(LedgerError::Unreachable("connection refused".to_owned())))
            .reply(Err(LedgerError::CommitTimeout(Duration::from_secs(30))));
        let client = Client::new(ledger);

        let endorsement = client.invoke(["a"], "registry", "workerRegister", "", false).unwrap();
        assert_eq!(endorsement.status, InvocationResponse::STATUS_CHAINCODE_ERROR);
        assert!(endorsement.message.contains("policy not satisfied"));

        let unreachable = client.invoke(["a"], "registry", "query", "", true).unwrap();
        assert_eq!(unreachable.status, InvocationResponse::STATUS_UNAVAILABLE);
        assert!(!unreachable.message.is_empty());

        let timeout = client.invoke(["a"], "registry", "workerRegister", "", false).unwrap();
        assert_eq!(timeout.status, InvocationResponse::STATUS_UNAVAILABLE);
    }

    #[test]
    fn setup_failures_fail_the_call() {
        let ledger = Scripted::default().reply(Err(LedgerError::Setup("no such channel".to_owned())));
        let client = Client::new(ledger);
        assert_eq!(
            client.invoke(["a"], "registry", "query", "", true),
            Err(InvokeError::Setup(LedgerError::Setup("no such channel".to_owned())))
        );
    }

    #[test]
    fn batches_continue_past_failed_calls() {
        let ledger = Scripted::default()
            .reply(Ok(InvocationResponse::failure(500, "Worker with ID 'x' does not exist")))
            .reply(Err(LedgerError::Unreachable("reset".to_owned())));
        let client = Client::new(ledger);

        let responses = client
            .invoke_all([
                ChaincodeCall::new("registry", "workerSetStatus").with_args(["x", "2"]),
                ChaincodeCall::new("registry", "workerSetStatus").with_args(["y", "2"]),
                ChaincodeCall::new("registry", "workerSetStatus").with_args(["z", "2"]),
            ])
            .unwrap();
        let statuses: Vec<_> = responses.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![500, 503, 200]);
    }
}
