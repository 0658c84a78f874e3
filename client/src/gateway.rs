//! [`Ledger`] and [`EventSource`] over the REST/WebSocket gateway that
//! fronts the ledger SDK.
//!
//! - `POST {url}/channels/{channel}/chaincodes/{chaincode}/transactions` submits
//!   and waits for the commit
//! - `POST {url}/channels/{channel}/chaincodes/{chaincode}/queries` evaluates
//! - `GET {url}/channels/{channel}/events` upgrades to a web socket streaming
//!   JSON events
use std::time::Duration;

use avalon_config::BasicAuth;
use avalon_logger::prelude::*;
use base64::Engine as _;
use futures_util::{future, StreamExt};
use serde::Serialize;
use url::Url;

use crate::{
    data_model::{ChaincodeCall, ChaincodeEvent, EventFilter, InvocationResponse},
    http::{Headers, Method, RequestBuilder, Response, StatusCode},
    http_default::{self, DefaultRequestBuilder, WebSocketError, WebSocketMessage},
    ledger::{EventSource, EventStream, Ledger, LedgerError},
};

const APPLICATION_JSON: &str = "application/json";

/// Which gateway endpoint serves a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Endorse, order and commit
    Submit,
    /// Evaluate on a single peer
    Evaluate,
}

impl CallKind {
    fn path_segment(self) -> &'static str {
        match self {
            Self::Submit => "transactions",
            Self::Evaluate => "queries",
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CallRequest<'a> {
    method: &'a str,
    version: &'a str,
    args: Vec<String>,
    user: &'a str,
    peer: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit_timeout_ms: Option<u64>,
}

/// Session with the gateway for one channel, user and peer
#[derive(Debug, Clone)]
pub struct Gateway {
    base_url: Url,
    channel: String,
    user: String,
    peer: String,
    headers: Headers,
    commit_timeout: Duration,
}

impl Gateway {
    /// Session with the gateway at `base_url`
    pub fn new(
        base_url: Url,
        channel: impl Into<String>,
        user: impl Into<String>,
        peer: impl Into<String>,
    ) -> Self {
        Self {
            base_url,
            channel: channel.into(),
            user: user.into(),
            peer: peer.into(),
            headers: Headers::new(),
            commit_timeout: avalon_config::client::DEFAULT_COMMIT_TIMEOUT,
        }
    }

    /// Authenticate every request with `auth`
    #[must_use]
    pub fn with_basic_auth(mut self, auth: &BasicAuth) -> Self {
        let credentials = format!("{}:{}", auth.login, auth.password);
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        self.headers
            .insert(String::from("Authorization"), format!("Basic {}", encoded));
        self
    }

    /// How long a submit may wait for the commit acknowledgment
    #[must_use]
    pub fn with_commit_timeout(mut self, commit_timeout: Duration) -> Self {
        self.commit_timeout = commit_timeout;
        self
    }

    /// Append extra headers to every request
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Channel the session is bound to
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Peer the gateway is asked to use
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Build the request for `call` with any [`RequestBuilder`], e.g. to send
    /// it with another HTTP client. The reply is read with [`decode_reply`].
    ///
    /// # Errors
    /// If the endpoint URL can't be derived from the gateway URL.
    pub fn prepare_call<B: RequestBuilder>(
        &self,
        call: &ChaincodeCall,
        kind: CallKind,
    ) -> Result<B, LedgerError> {
        let url = self.endpoint(&["chaincodes", call.chaincode.as_str(), kind.path_segment()])?;
        let body = CallRequest {
            method: &call.method,
            version: &call.version,
            args: call.wire_args(),
            user: &self.user,
            peer: &self.peer,
            commit_timeout_ms: (kind == CallKind::Submit)
                .then(|| u64::try_from(self.commit_timeout.as_millis()).unwrap_or(u64::MAX)),
        };
        let body = serde_json::to_vec(&body).map_err(|err| LedgerError::Protocol(err.to_string()))?;

        let mut headers = self.headers.clone();
        headers.insert("Content-Type".to_owned(), APPLICATION_JSON.to_owned());
        Ok(B::new(Method::POST, url.as_str()).headers(headers).body(body))
    }

    /// URL of the event stream selected by `filter`.
    ///
    /// # Errors
    /// If the URL can't be derived from the gateway URL.
    pub fn events_url(&self, filter: &EventFilter) -> Result<Url, LedgerError> {
        let mut url = self.endpoint(&["events"])?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("chaincode", &filter.chaincode)
                .append_pair("event", &filter.event_name)
                .append_pair("peer", &self.peer);
            if let Some(start) = filter.start_block {
                query.append_pair("startBlock", &start.to_string());
            }
        }
        Ok(url)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, LedgerError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| LedgerError::Setup(format!("Gateway URL {} can't have a path", self.base_url)))?
            .pop_if_empty()
            .extend(["channels", self.channel.as_str()])
            .extend(segments);
        Ok(url)
    }

    fn send(&self, call: &ChaincodeCall, kind: CallKind) -> Result<InvocationResponse, LedgerError> {
        let request: DefaultRequestBuilder = self.prepare_call(call, kind)?;
        trace!(%call, ?kind, "Sending request to the gateway");
        let response = request
            .send()
            .map_err(|err| LedgerError::Unreachable(format!("{err:#}")))?;
        decode_reply(&response, self.commit_timeout)
    }
}

/// Turn a gateway reply into a chaincode response.
///
/// A 2xx reply carries the chaincode envelope; other statuses mean the
/// call never produced one.
///
/// # Errors
/// If the status is not 2xx or the envelope is malformed.
pub fn decode_reply(
    response: &Response<Vec<u8>>,
    commit_timeout: Duration,
) -> Result<InvocationResponse, LedgerError> {
    let status = response.status();
    if status.is_success() {
        return serde_json::from_slice(response.body()).map_err(|err| {
            LedgerError::Protocol(format!(
                "{err}; response body: {}",
                String::from_utf8_lossy(response.body())
            ))
        });
    }
    Err(classify_status(
        status,
        &String::from_utf8_lossy(response.body()),
        commit_timeout,
    ))
}

fn classify_status(status: StatusCode, body: &str, commit_timeout: Duration) -> LedgerError {
    let message = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    };
    match status {
        StatusCode::NOT_FOUND => LedgerError::Setup(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LedgerError::Tls(message),
        StatusCode::GATEWAY_TIMEOUT => LedgerError::CommitTimeout(commit_timeout),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => LedgerError::Unreachable(message),
        _ => LedgerError::Endorsement(message),
    }
}

impl Ledger for Gateway {
    fn submit(&self, call: &ChaincodeCall) -> Result<InvocationResponse, LedgerError> {
        self.send(call, CallKind::Submit)
    }

    fn evaluate(&self, call: &ChaincodeCall) -> Result<InvocationResponse, LedgerError> {
        self.send(call, CallKind::Evaluate)
    }
}

#[async_trait::async_trait]
impl EventSource for Gateway {
    async fn subscribe(&self, filter: &EventFilter) -> Result<EventStream, LedgerError> {
        let url = self.events_url(filter)?;
        let request = http_default::web_socket_request(url.as_str(), self.headers.clone())
            .map_err(|err| LedgerError::Setup(format!("{err:#}")))?;
        let (stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|err| self.connect_error(err))?;
        debug!(%url, "Event stream connected");
        Ok(stream
            .filter_map(|message| future::ready(decode_event(message)))
            .boxed())
    }
}

impl Gateway {
    fn connect_error(&self, err: WebSocketError) -> LedgerError {
        match err {
            WebSocketError::Http(response) => {
                let body = response.body().as_deref().unwrap_or_default();
                match StatusCode::from_u16(response.status().as_u16()) {
                    Ok(status) => {
                        classify_status(status, &String::from_utf8_lossy(body), self.commit_timeout)
                    }
                    Err(_) => LedgerError::Protocol(format!("Unexpected status {}", response.status())),
                }
            }
            other => LedgerError::Unreachable(other.to_string()),
        }
    }
}

fn decode_event(
    message: Result<WebSocketMessage, WebSocketError>,
) -> Option<Result<ChaincodeEvent, LedgerError>> {
    let event = match message {
        Ok(WebSocketMessage::Text(text)) => serde_json::from_str(&text),
        Ok(WebSocketMessage::Binary(bytes)) => serde_json::from_slice(&bytes),
        Ok(_) => return None,
        Err(WebSocketError::ConnectionClosed) => return None,
        Err(err) => return Some(Err(LedgerError::Unreachable(err.to_string()))),
    };
    Some(event.map_err(|err| LedgerError::Protocol(format!("Malformed event: {err}"))))
}
