//! The skill exchange: every workflow operation hangs off [`Exchange`].
//!
//! `Exchange` owns the document store and the blob store. The workflows live
//! in their own modules as further `impl` blocks (`tasks`, `swaps`,
//! `resources`, `teachings`, `rewards`). Nothing here caches state: each call
//! reads what it needs from the store and writes back through a single
//! [`Update`](crate::store::Update).

use crate::blob::BlobStore;
use crate::store::{self, decode, decode_all, Document, DocumentStore, Query, StoreError, Subscription};
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

// Collection names. Ratings and chat nest under a task.
pub const TASKS: &str = "tasks";
pub const SWAPS: &str = "swaps";
pub const RESOURCES: &str = "resources";
pub const TEACHINGS: &str = "teachings";
pub const RATINGS: &str = "ratings";
pub const CHAT: &str = "chat";

pub struct Exchange<S, B> {
    store: S,
    blobs: B,
    college: String,
}

impl<S: DocumentStore, B: BlobStore> Exchange<S, B> {
    pub fn new(store: S, blobs: B, college: impl Into<String>) -> Self {
        Exchange {
            store,
            blobs,
            college: college.into(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    pub fn college(&self) -> &str {
        &self.college
    }

    /// Fetch and decode one document, or `NotFound { kind, id }`.
    pub(crate) fn load<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
        kind: &'static str,
    ) -> Result<T, ExchangeError> {
        let doc = self
            .store
            .get(collection, id)?
            .ok_or_else(|| ExchangeError::NotFound { kind, id: id.to_string() })?;
        Ok(decode(&doc)?)
    }

    pub(crate) fn list<T: DeserializeOwned>(&self, query: &Query) -> Result<Vec<T>, ExchangeError> {
        let docs = self.store.query(query)?;
        Ok(decode_all(&docs)?)
    }
}

impl<S: DocumentStore + Clone, B: BlobStore> Exchange<S, B> {
    /// Standing, typed watch over `query`.
    pub fn feed<T: DeserializeOwned>(&self, query: Query) -> Feed<S, T> {
        Feed {
            sub: store::subscribe(&self.store, query),
            _entity: PhantomData,
        }
    }
}

// ── Feeds ──────────────────────────────────────────────────────

/// A [`Subscription`] that decodes each snapshot into entities.
pub struct Feed<S, T> {
    sub: Subscription<S>,
    _entity: PhantomData<fn() -> T>,
}

impl<S: DocumentStore, T: DeserializeOwned> Feed<S, T> {
    pub fn current(&self) -> Result<Vec<T>, ExchangeError> {
        Self::decode(self.sub.snapshot()?)
    }

    /// Resolves after the next change to the watched collection.
    pub async fn next(&mut self) -> Result<Vec<T>, ExchangeError> {
        let docs = self.sub.next().await?;
        Self::decode(docs)
    }

    pub fn cancel(self) {
        self.sub.cancel();
    }

    fn decode(docs: Vec<Document>) -> Result<Vec<T>, ExchangeError> {
        Ok(decode_all(&docs)?)
    }
}

// ── Shared helpers ─────────────────────────────────────────────

/// Trimmed `value`, or a validation error naming `what`.
pub(crate) fn required<'a>(value: &'a str, what: &str) -> Result<&'a str, ExchangeError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ExchangeError::Validation(format!("{what} is required")))
    } else {
        Ok(trimmed)
    }
}

/// `Some(trimmed)` unless blank.
pub(crate) fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Current time as a document value.
pub(crate) fn now_value() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// `{prefix}/{millis}_{name}` with everything outside `[A-Za-z0-9.]` in the
/// name replaced by `_`.
pub(crate) fn blob_key(prefix: &str, file_name: &str) -> String {
    let clean: String = file_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect();
    format!("{prefix}/{}_{clean}", Utc::now().timestamp_millis())
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Input rejected before any store call.
    Validation(String),
    NotFound { kind: &'static str, id: String },
    /// A compare-and-swap lost to a concurrent writer.
    Conflict(String),
    /// The entity is not in a state that allows this operation.
    InvalidTransition(String),
    Store(StoreError),
}

impl ExchangeError {
    /// Classify a store failure on a known entity.
    pub(crate) fn from_store(e: StoreError, kind: &'static str, id: &str) -> Self {
        match e {
            StoreError::NotFound { .. } => ExchangeError::NotFound { kind, id: id.to_string() },
            StoreError::PreconditionFailed { field } => ExchangeError::Conflict(format!(
                "{kind} {id} changed concurrently (`{field}`); reload and retry"
            )),
            other => ExchangeError::Store(other),
        }
    }
}

impl From<StoreError> for ExchangeError {
    fn from(e: StoreError) -> Self {
        ExchangeError::Store(e)
    }
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeError::Validation(e) => write!(f, "{e}"),
            ExchangeError::NotFound { kind, id } => write!(f, "{kind} {id} not found"),
            ExchangeError::Conflict(e) => write!(f, "conflict: {e}"),
            ExchangeError::InvalidTransition(e) => write!(f, "not allowed: {e}"),
            ExchangeError::Store(e) => write!(f, "store failure: {e}"),
        }
    }
}

impl std::error::Error for ExchangeError {}

// ── Test fixtures ──────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::local_store::LocalStore;

    pub type TestExchange = Exchange<LocalStore, MemoryBlobStore>;

    pub fn exchange() -> TestExchange {
        Exchange::new(
            LocalStore::in_memory(),
            MemoryBlobStore::new("http://localhost:3000/files"),
            "Chandigarh University",
        )
    }
}

// ── Tests ──────────────────────────────────────────────────────
