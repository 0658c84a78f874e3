use std::{borrow::Borrow, collections::HashMap};

use eyre::{eyre, Result};
pub use http::{Method, Response, StatusCode};

/// Type alias for HTTP headers hash map
pub type Headers = HashMap<String, String>;

/// General trait for building http-requests.
///
/// To use custom builder with the gateway, you need to implement this trait
/// for some type and pass it to the gateway that will fill it.
pub trait RequestBuilder {
    /// Constructs a new builder with provided method and URL
    #[must_use]
    fn new<U>(method: Method, url: U) -> Self
    where
        U: AsRef<str>;

    /// Sets request's query params
    #[must_use]
    fn params<P, K, V>(self, params: P) -> Self
    where
        P: IntoIterator,
        P::Item: Borrow<(K, V)>,
        K: AsRef<str>,
        V: ToString;

    /// Sets request's headers
    #[must_use]
    fn headers(self, headers: Headers) -> Self;

    /// Sets request's body in bytes
    #[must_use]
    fn body(self, data: Vec<u8>) -> Self;
}

/// Turn an `http(s)://` URL into the matching `ws(s)://` one.
///
/// # Errors
/// If `uri` has no `http` or `https` scheme.
pub fn transform_ws_url<S>(uri: S) -> Result<String>
where
    S: AsRef<str>,
{
    let ws_uri = if let Some(https_uri) = uri.as_ref().strip_prefix("https://") {
        "wss://".to_owned() + https_uri
    } else if let Some(http_uri) = uri.as_ref().strip_prefix("http://") {
        "ws://".to_owned() + http_uri
    } else {
        return Err(eyre!("No schema in web socket uri provided"));
    };

    Ok(ws_uri)
}
