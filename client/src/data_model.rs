//! Values crossing the chaincode invocation boundary.

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// One positional chaincode argument.
///
/// Chaincode receives every argument as a string; structured arguments are
/// JSON-encoded before they are sent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Arg {
    /// Plain string, sent verbatim
    Text(String),
    /// Structured value, sent compact-encoded
    Json(Value),
}

impl Arg {
    /// String handed to the chaincode
    pub fn to_wire(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Json(value) => value.to_string(),
        }
    }

    /// Interpret a command line argument.
    ///
    /// Objects and arrays are read as JSON5, so `{workerID: "ID1"}` is
    /// accepted; anything else, including malformed JSON, stays text and is
    /// left for the chaincode to reject.
    pub fn parse_cli(raw: &str) -> Self {
        let trimmed = raw.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(value) = json5::from_str::<Value>(raw) {
                return Self::Json(value);
            }
        }
        Self::Text(raw.to_owned())
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Json(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for Arg {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Arg {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&String> for Arg {
    fn from(text: &String) -> Self {
        Self::Text(text.clone())
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Reasons a [`ChaincodeCall`] is rejected before reaching the ledger
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallError {
    /// Chaincode name is empty
    #[error("Chaincode name must not be empty")]
    EmptyChaincode,
    /// Method name is empty
    #[error("Method name must not be empty")]
    EmptyMethod,
}

/// A single chaincode invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChaincodeCall {
    /// Target chaincode
    pub chaincode: String,
    /// Method to run
    pub method: String,
    /// Chaincode version, empty for the latest one
    pub version: String,
    /// Positional arguments
    pub args: Vec<Arg>,
    /// Evaluate against a single peer without committing
    pub is_query: bool,
}

impl ChaincodeCall {
    /// Construct a state-changing call without arguments
    pub fn new(chaincode: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            chaincode: chaincode.into(),
            method: method.into(),
            version: String::new(),
            args: Vec::new(),
            is_query: false,
        }
    }

    /// Set the chaincode version
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Replace the arguments
    #[must_use]
    pub fn with_args<A: Into<Arg>>(mut self, args: impl IntoIterator<Item = A>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Append one argument
    #[must_use]
    pub fn push_arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Mark the call as read-only
    #[must_use]
    pub fn query_only(mut self, is_query: bool) -> Self {
        self.is_query = is_query;
        self
    }

    /// Check the call can be sent.
    ///
    /// # Errors
    /// If the chaincode or method name is empty.
    pub fn validate(&self) -> Result<(), CallError> {
        if self.chaincode.trim().is_empty() {
            return Err(CallError::EmptyChaincode);
        }
        if self.method.trim().is_empty() {
            return Err(CallError::EmptyMethod);
        }
        Ok(())
    }

    /// Arguments as the chaincode receives them
    pub fn wire_args(&self) -> Vec<String> {
        self.args.iter().map(Arg::to_wire).collect()
    }
}

impl fmt::Display for ChaincodeCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.chaincode, self.method)?;
        if !self.version.is_empty() {
            write!(f, "@{}", self.version)?;
        }
        Ok(())
    }
}

/// Payload of a response could not be read
#[derive(thiserror::Error, Debug)]
pub enum PayloadError {
    /// The response carries no payload
    #[error("Response has no payload")]
    Missing,
    /// The payload is not the expected JSON document
    #[error("Failed to decode the response payload")]
    Json(#[from] serde_json::Error),
}

/// Normalized reply of the ledger
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InvocationResponse {
    /// Chaincode status, [`Self::STATUS_OK`] on success
    pub status: i32,
    /// Diagnostic, meaningful on failure
    #[serde(default)]
    pub message: String,
    /// JSON-encoded payload, meaningful on success
    #[serde(default)]
    pub payload: Option<String>,
}

impl InvocationResponse {
    /// Success
    pub const STATUS_OK: i32 = 200;
    /// The chaincode or its endorsement failed
    pub const STATUS_CHAINCODE_ERROR: i32 = 500;
    /// The ledger could not be reached or answered garbage
    pub const STATUS_UNAVAILABLE: i32 = 503;

    /// Successful response with an optional payload
    pub fn success(payload: Option<String>) -> Self {
        Self {
            status: Self::STATUS_OK,
            message: String::new(),
            payload,
        }
    }

    /// Failed response
    pub fn failure(status: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            payload: None,
        }
    }

    /// Whether the status is [`Self::STATUS_OK`]
    pub fn is_success(&self) -> bool {
        self.status == Self::STATUS_OK
    }

    /// Decode the payload.
    ///
    /// # Errors
    /// If the payload is absent or doesn't decode into `T`.
    pub fn payload_json<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        let payload = self.payload.as_deref().ok_or(PayloadError::Missing)?;
        Ok(serde_json::from_str(payload)?)
    }

    /// Payload as a JSON value; payloads that aren't JSON become strings.
    pub fn payload_value(&self) -> Option<Value> {
        self.payload.as_deref().map(|payload| {
            serde_json::from_str(payload).unwrap_or_else(|_| Value::String(payload.to_owned()))
        })
    }
}

/// Event emitted by a committed transaction
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaincodeEvent {
    /// Emitting chaincode
    pub chaincode: String,
    /// Name given by the chaincode
    pub event_name: String,
    /// Raw payload, JSON for the registry chaincode
    #[serde(default)]
    pub payload: String,
    /// Block holding the transaction
    pub block_number: u64,
    /// Transaction id
    pub tx_id: String,
    /// Validation code of the transaction
    #[serde(default)]
    pub status: String,
}

impl ChaincodeEvent {
    /// Payload as a JSON value, if it is one
    pub fn payload_value(&self) -> Option<Value> {
        serde_json::from_str(&self.payload).ok()
    }
}

/// Selects the events a subscription delivers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    /// Emitting chaincode
    pub chaincode: String,
    /// Event name
    pub event_name: String,
    /// First block of interest, the next block if absent
    pub start_block: Option<u64>,
}

impl EventFilter {
    /// Filter on `chaincode` events named `event_name`
    pub fn new(chaincode: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self {
            chaincode: chaincode.into(),
            event_name: event_name.into(),
            start_block: None,
        }
    }

    /// Replay from `block`
    #[must_use]
    pub fn from_block(mut self, block: u64) -> Self {
        self.start_block = Some(block);
        self
    }

    /// Whether `event` passes the filter
    pub fn matches(&self, event: &ChaincodeEvent) -> bool {
        event.chaincode == self.chaincode
            && event.event_name == self.event_name
            && self
                .start_block
                .map_or(true, |start| event.block_number >= start)
    }
}
