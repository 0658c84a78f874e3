//! Paginated chaincode queries.
//!
//! A lookup method returns at most one page of ids plus an opaque
//! `lookupTag`. The matching `<method>Next` method takes the same filter
//! arguments followed by the tag and returns the following page. A page
//! without a tag is the last one.

use std::collections::HashSet;

use avalon_logger::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    client::{Client, InvokeError},
    data_model::{Arg, ChaincodeCall},
    ledger::Ledger,
};

/// Suffix of the continuation method
pub const NEXT_SUFFIX: &str = "Next";

/// Failures of the pagination protocol
#[derive(Debug, displaydoc::Display, thiserror::Error)]
pub enum PaginationError {
    /// lookup call failed
    Invoke(#[from] InvokeError),
    /// lookup failed with status {status}: {message}
    Chaincode {
        /// Chaincode status
        status: i32,
        /// Chaincode diagnostic
        message: String,
    },
    /// lookup payload is not a page
    Decode(#[source] serde_json::Error),
    /// filter arguments differ from those of the lookup that issued the cursor
    FilterMismatch,
    /// cursor was issued by `{chaincode}.{method}`
    ForeignCursor {
        /// Chaincode that issued the cursor
        chaincode: String,
        /// Lookup method that issued the cursor
        method: String,
    },
    /// chaincode answered with a lookup tag it had already issued
    StalledCursor,
}

/// One page of a lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResult {
    /// Identifiers in chaincode order
    #[serde(default, deserialize_with = "null_as_default")]
    pub ids: Vec<String>,
    /// Continuation token, absent on the last page
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub lookup_tag: Option<String>,
    /// Count reported by the chaincode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

impl PagedResult {
    /// Whether no page follows this one
    pub fn is_last(&self) -> bool {
        self.lookup_tag.is_none()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// The registry chaincode emits an empty bookmark on its last page.
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|tag| !tag.is_empty()))
}

/// A lookup: method family plus filter arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// Target chaincode
    pub chaincode: String,
    /// Base lookup method, e.g. `workerLookUp`
    pub method: String,
    /// Chaincode version, empty for the latest one
    pub version: String,
    /// Filter arguments, repeated on every page
    pub filter: Vec<Arg>,
}

impl Lookup {
    /// Lookup with an empty filter
    pub fn new(chaincode: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            chaincode: chaincode.into(),
            method: method.into(),
            version: String::new(),
            filter: Vec::new(),
        }
    }

    /// Set the chaincode version
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Replace the filter arguments
    #[must_use]
    pub fn with_filter<A: Into<Arg>>(mut self, filter: impl IntoIterator<Item = A>) -> Self {
        self.filter = filter.into_iter().map(Into::into).collect();
        self
    }

    /// Continuation method, `<method>Next`
    pub fn next_method(&self) -> String {
        format!("{}{NEXT_SUFFIX}", self.method)
    }

    fn first_call(&self) -> ChaincodeCall {
        ChaincodeCall::new(&self.chaincode, &self.method)
            .with_version(&self.version)
            .with_args(self.filter.iter().cloned())
            .query_only(true)
    }

    fn next_call(&self, tag: &str) -> ChaincodeCall {
        ChaincodeCall::new(&self.chaincode, self.next_method())
            .with_version(&self.version)
            .with_args(self.filter.iter().cloned())
            .push_arg(tag)
            .query_only(true)
    }

    fn wire_filter(&self) -> Vec<String> {
        self.filter.iter().map(Arg::to_wire).collect()
    }
}

/// Position in a lookup, handed out with every page that has a successor.
///
/// Only valid with the lookup that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupCursor {
    chaincode: String,
    method: String,
    filter: Vec<String>,
    tag: String,
}

impl LookupCursor {
    fn issued_by(lookup: &Lookup, tag: String) -> Self {
        Self {
            chaincode: lookup.chaincode.clone(),
            method: lookup.method.clone(),
            filter: lookup.wire_filter(),
            tag,
        }
    }

    /// The chaincode's token, as received
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

/// Page plus the cursor to the next one, if any
pub type Page = (PagedResult, Option<LookupCursor>);

impl<L: Ledger> Client<L> {
    /// Fetch the first page of `lookup`.
    ///
    /// # Errors
    /// If the call fails or the payload is not a page.
    pub fn start_lookup(&self, lookup: &Lookup) -> Result<Page, PaginationError> {
        let page = self.fetch_page(&lookup.first_call())?;
        let cursor = page
            .lookup_tag
            .clone()
            .map(|tag| LookupCursor::issued_by(lookup, tag));
        Ok((page, cursor))
    }

    /// Fetch the page `cursor` points to.
    ///
    /// # Errors
    /// - [`PaginationError::ForeignCursor`] if `cursor` comes from another method family
    /// - [`PaginationError::FilterMismatch`] if the filter changed since `cursor` was issued
    /// - [`PaginationError::StalledCursor`] if the chaincode hands the same tag back
    /// - call and decoding failures as in [`Self::start_lookup`]
    pub fn continue_lookup(
        &self,
        lookup: &Lookup,
        cursor: LookupCursor,
    ) -> Result<Page, PaginationError> {
        if cursor.chaincode != lookup.chaincode || cursor.method != lookup.method {
            return Err(PaginationError::ForeignCursor {
                chaincode: cursor.chaincode,
                method: cursor.method,
            });
        }
        if cursor.filter != lookup.wire_filter() {
            return Err(PaginationError::FilterMismatch);
        }

        let page = self.fetch_page(&lookup.next_call(&cursor.tag))?;
        if page.lookup_tag.as_deref() == Some(cursor.tag.as_str()) {
            return Err(PaginationError::StalledCursor);
        }
        let next = page
            .lookup_tag
            .clone()
            .map(|tag| LookupCursor::issued_by(lookup, tag));
        Ok((page, next))
    }

    /// Iterate over the pages of `lookup`. The iterator ends after the last
    /// page or the first error.
    pub fn lookup_pages(&self, lookup: Lookup) -> LookupPages<'_, L> {
        LookupPages {
            client: self,
            lookup,
            state: PagesState::NotStarted,
            issued: HashSet::new(),
        }
    }

    /// Collect the ids of every page of `lookup`, in order.
    ///
    /// # Errors
    /// On the first failing page.
    pub fn lookup_all(&self, lookup: Lookup) -> Result<Vec<String>, PaginationError> {
        let mut ids = Vec::new();
        for page in self.lookup_pages(lookup) {
            ids.extend(page?.ids);
        }
        Ok(ids)
    }

    fn fetch_page(&self, call: &ChaincodeCall) -> Result<PagedResult, PaginationError> {
        let response = self.invoke_call(call)?;
        if !response.is_success() {
            return Err(PaginationError::Chaincode {
                status: response.status,
                message: response.message,
            });
        }
        let page: PagedResult = match response.payload.as_deref() {
            Some(payload) => serde_json::from_str(payload).map_err(PaginationError::Decode)?,
            None => PagedResult::default(),
        };
        debug!(%call, ids = page.ids.len(), last = page.is_last(), "Fetched page");
        Ok(page)
    }
}

enum PagesState {
    NotStarted,
    Next(LookupCursor),
    Done,
}

/// Iterator over the pages of a lookup, see [`Client::lookup_pages`]
pub struct LookupPages<'client, L> {
    client: &'client Client<L>,
    lookup: Lookup,
    state: PagesState,
    issued: HashSet<String>,
}

impl<L: Ledger> Iterator for LookupPages<'_, L> {
    type Item = Result<PagedResult, PaginationError>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = match std::mem::replace(&mut self.state, PagesState::Done) {
            PagesState::NotStarted => self.client.start_lookup(&self.lookup),
            PagesState::Next(cursor) => self.client.continue_lookup(&self.lookup, cursor),
            PagesState::Done => return None,
        };
        Some(result.and_then(|(page, cursor)| {
            if let Some(cursor) = cursor {
                // A tag seen before means the chaincode is cycling
                if !self.issued.insert(cursor.tag.clone()) {
                    return Err(PaginationError::StalledCursor);
                }
                self.state = PagesState::Next(cursor);
            }
            Ok(page)
        }))
    }
}

impl<L: Ledger> std::iter::FusedIterator for LookupPages<'_, L> {}
