use std::borrow::Borrow;

use attohttpc::{header::HeaderName, Response as AttoHttpResponse};
use eyre::{eyre, Error, Result, WrapErr};
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    handshake::client::Request as WebSocketRequest,
    http::{HeaderName as WsHeaderName, HeaderValue as WsHeaderValue},
};
pub use tokio_tungstenite::tungstenite::{Error as WebSocketError, Message as WebSocketMessage};

use crate::http::{transform_ws_url, Headers, Method, RequestBuilder, Response};

type Bytes = Vec<u8>;

/// Default request builder & sender implemented on top of `attohttpc` crate.
pub struct DefaultRequestBuilder {
    method: Method,
    url: String,
    params: Vec<(String, String)>,
    headers: Headers,
    body: Bytes,
}

impl DefaultRequestBuilder {
    /// Send the request and wait for the whole response.
    ///
    /// # Errors
    /// If the request can't be built or sent, or the response can't be read.
    pub fn send(self) -> Result<Response<Bytes>> {
        let Self {
            method,
            url,
            params,
            headers,
            body,
        } = self;

        let mut builder = attohttpc::RequestBuilder::try_new(method.clone(), &url)
            .wrap_err_with(|| format!("Invalid request URL {url}"))?
            .params(params)
            .bytes(body);
        for (h, v) in headers {
            let h = HeaderName::from_bytes(h.as_ref())
                .wrap_err_with(|| format!("Failed to parse header name {}", h))?;
            builder = builder.header(h, v);
        }

        let response = builder
            .send()
            .wrap_err_with(|| format!("Failed to send http {} request to {}", method, url))?;

        ClientResponse(response).try_into()
    }
}

impl RequestBuilder for DefaultRequestBuilder {
    fn new<U>(method: Method, url: U) -> Self
    where
        U: AsRef<str>,
    {
        Self {
            method,
            url: url.as_ref().to_owned(),
            params: Vec::new(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    fn params<P, K, V>(mut self, params: P) -> Self
    where
        P: IntoIterator,
        P::Item: Borrow<(K, V)>,
        K: AsRef<str>,
        V: ToString,
    {
        for param in params {
            let (k, v) = param.borrow();
            self.params.push((k.as_ref().to_owned(), v.to_string()));
        }
        self
    }

    fn headers(mut self, headers: Headers) -> Self {
        self.headers.extend(headers);
        self
    }

    fn body(mut self, data: Vec<u8>) -> Self {
        self.body = data;
        self
    }
}

/// Build the handshake request of a web socket connection to an `http(s)` URL.
///
/// # Errors
/// If the URL or a header is invalid.
pub fn web_socket_request<U>(uri: U, headers: Headers) -> Result<WebSocketRequest>
where
    U: AsRef<str>,
{
    let ws_uri = transform_ws_url(uri)?;
    let mut request = ws_uri
        .as_str()
        .into_client_request()
        .wrap_err("Failed to build web socket request")?;
    for (h, v) in headers {
        let name = WsHeaderName::from_bytes(h.as_bytes())
            .wrap_err_with(|| format!("Failed to parse header name {}", h))?;
        let value = WsHeaderValue::from_str(&v)
            .wrap_err_with(|| format!("Failed to parse value of header {}", h))?;
        request.headers_mut().insert(name, value);
    }
    Ok(request)
}

struct ClientResponse(AttoHttpResponse);

impl TryFrom<ClientResponse> for Response<Bytes> {
    type Error = Error;

    fn try_from(response: ClientResponse) -> Result<Self> {
        let ClientResponse(response) = response;
        let mut builder = Response::builder().status(response.status());
        let headers = builder
            .headers_mut()
            .ok_or_else(|| eyre!("Failed to get headers map reference."))?;
        for (key, value) in response.headers() {
            headers.insert(key, value.clone());
        }
        response
            .bytes()
            .wrap_err("Failed to get response as bytes")
            .and_then(|bytes| {
                builder
                    .body(bytes)
                    .wrap_err("Failed to construct response bytes body")
            })
    }
}
