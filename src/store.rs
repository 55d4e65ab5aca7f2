//! Document store seam.
//!
//! Every entity lives as a JSON document in a named collection. Collections
//! may nest under a document (`tasks/{id}/ratings`). The workflow code only
//! talks to [`DocumentStore`]; `LocalStore` is the in-process implementation.
//!
//! Mutations are expressed as an [`Update`]: a list of field patches plus a
//! list of preconditions. A store applies the whole update atomically or not
//! at all, which is what the workflows use as their compare-and-swap.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use tokio::sync::broadcast;

pub type Fields = Map<String, Value>;

/// Field every store stamps on create. Strictly increasing per store.
pub const CREATED_AT: &str = "createdAt";

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.fields, path)
    }
}

// ── Queries ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub collection: String,
    pub order_by: Option<(String, Direction)>,
}

impl Query {
    pub fn collection(path: impl Into<String>) -> Self {
        Query { collection: path.into(), order_by: None }
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn newest_first(path: impl Into<String>) -> Self {
        Self::collection(path).order_by(CREATED_AT, Direction::Descending)
    }

    pub fn oldest_first(path: impl Into<String>) -> Self {
        Self::collection(path).order_by(CREATED_AT, Direction::Ascending)
    }

    /// Sort `docs` in place. Documents missing the field sort first.
    pub fn sort(&self, docs: &mut [Document]) {
        let Some((field, direction)) = &self.order_by else {
            return;
        };
        docs.sort_by(|a, b| {
            let ord = compare_values(a.get(field), b.get(field)).then_with(|| a.id.cmp(&b.id));
            match direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            }
        });
    }
}

/// Path of a collection nested under a document.
pub fn sub_collection(parent: &str, id: &str, name: &str) -> String {
    format!("{parent}/{id}/{name}")
}

// ── Updates ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    Set { field: String, value: Value },
    Unset { field: String },
    /// Append `value` unless an equal element is already present.
    ArrayUnion { field: String, value: Value },
    /// Remove every element equal to `value`.
    ArrayRemove { field: String, value: Value },
    Increment { field: String, by: i64 },
}

impl Patch {
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Patch::Set { field: field.into(), value: value.into() }
    }

    pub fn unset(field: impl Into<String>) -> Self {
        Patch::Unset { field: field.into() }
    }

    pub fn array_union(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Patch::ArrayUnion { field: field.into(), value: value.into() }
    }

    pub fn array_remove(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Patch::ArrayRemove { field: field.into(), value: value.into() }
    }

    pub fn increment(field: impl Into<String>, by: i64) -> Self {
        Patch::Increment { field: field.into(), by }
    }
}

/// `field` must currently equal `expected`. `Value::Null` matches an absent field.
#[derive(Debug, Clone, PartialEq)]
pub struct Precondition {
    pub field: String,
    pub expected: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub patches: Vec<Patch>,
    pub preconditions: Vec<Precondition>,
}

impl Update {
    pub fn new() -> Self {
        Update::default()
    }

    pub fn patch(mut self, patch: Patch) -> Self {
        self.patches.push(patch);
        self
    }

    pub fn require(mut self, field: impl Into<String>, expected: impl Into<Value>) -> Self {
        self.preconditions.push(Precondition { field: field.into(), expected: expected.into() });
        self
    }

    /// Check every precondition against `fields`, then apply every patch.
    /// `fields` is left untouched on any error.
    pub fn apply_to(&self, fields: &mut Fields) -> Result<(), StoreError> {
        for pre in &self.preconditions {
            let current = lookup(fields, &pre.field).unwrap_or(&Value::Null);
            if *current != pre.expected {
                return Err(StoreError::PreconditionFailed { field: pre.field.clone() });
            }
        }

        let mut root = Value::Object(fields.clone());
        for patch in &self.patches {
            apply_patch(&mut root, patch)?;
        }
        if let Value::Object(updated) = root {
            *fields = updated;
        }
        Ok(())
    }
}

// ── Change feed ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// What a store broadcasts after every committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub revision: u64,
    pub collection: String,
    pub id: String,
    pub kind: ChangeKind,
}

// ── The seam ───────────────────────────────────────────────────

pub trait DocumentStore: Send + Sync {
    /// Insert a new document. The store assigns the id and `createdAt`.
    fn create(&self, collection: &str, fields: Fields) -> Result<Document, StoreError>;

    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Apply `update` atomically. Returns the document as written.
    fn update(&self, collection: &str, id: &str, update: Update) -> Result<Document, StoreError>;

    fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Receiver for every change committed after this call.
    fn changes(&self) -> broadcast::Receiver<Change>;
}

/// Open a standing watch over `query`.
pub fn subscribe<S: DocumentStore + Clone>(store: &S, query: Query) -> Subscription<S> {
    Subscription {
        rx: store.changes(),
        store: store.clone(),
        query,
    }
}

/// A push-style view of one ordered query. Dropping it (or calling
/// [`Subscription::cancel`]) stops delivery.
pub struct Subscription<S> {
    store: S,
    query: Query,
    rx: broadcast::Receiver<Change>,
}

impl<S: DocumentStore> Subscription<S> {
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Current ordered contents of the watched collection.
    pub fn snapshot(&self) -> Result<Vec<Document>, StoreError> {
        self.store.query(&self.query)
    }

    /// Wait for the next change to the watched collection, then return a
    /// fresh snapshot. A lagging receiver skips straight to a snapshot.
    pub async fn next(&mut self) -> Result<Vec<Document>, StoreError> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.collection == self.query.collection => {
                    return self.snapshot();
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, collection = %self.query.collection, "subscription lagged");
                    return self.snapshot();
                }
                Err(broadcast::error::RecvError::Closed) => return Err(StoreError::Closed),
            }
        }
    }

    pub fn cancel(self) {
        tracing::debug!(collection = %self.query.collection, "subscription cancelled");
    }
}

// ── Typed documents ────────────────────────────────────────────

/// Serialize an entity into document fields. Its `id` field is dropped;
/// ids belong to the store.
pub fn encode<T: Serialize>(entity: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(entity).map_err(|e| StoreError::Codec(e.to_string()))? {
        Value::Object(mut fields) => {
            fields.remove("id");
            Ok(fields)
        }
        other => Err(StoreError::Codec(format!("expected an object, got {other}"))),
    }
}

/// Deserialize a document into an entity, exposing the document id as `id`.
pub fn decode<T: DeserializeOwned>(doc: &Document) -> Result<T, StoreError> {
    let mut fields = doc.fields.clone();
    fields.insert("id".to_string(), Value::String(doc.id.clone()));
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| StoreError::Codec(format!("document {}: {e}", doc.id)))
}

pub fn decode_all<T: DeserializeOwned>(docs: &[Document]) -> Result<Vec<T>, StoreError> {
    docs.iter().map(decode).collect()
}

// ── Field paths ────────────────────────────────────────────────

/// Resolve a dot-separated path. Segments index object keys or array positions.
pub fn lookup<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = fields.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn resolve_mut<'a>(root: &'a mut Value, path: &str, create: bool) -> Result<Option<&'a mut Value>, StoreError> {
    let mut current = root;
    for segment in path.split('.') {
        if segment.is_empty() {
            return Err(StoreError::InvalidPatch(format!("empty segment in `{path}`")));
        }
        if create && current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => {
                if create {
                    map.entry(segment.to_string()).or_insert(Value::Null)
                } else {
                    match map.get_mut(segment) {
                        Some(v) => v,
                        None => return Ok(None),
                    }
                }
            }
            Value::Array(items) => {
                let index: usize = segment.parse().map_err(|_| {
                    StoreError::InvalidPatch(format!("`{segment}` is not an array index in `{path}`"))
                })?;
                match items.get_mut(index) {
                    Some(v) => v,
                    None if create => {
                        return Err(StoreError::InvalidPatch(format!("index {index} out of range in `{path}`")))
                    }
                    None => return Ok(None),
                }
            }
            _ if create => {
                return Err(StoreError::InvalidPatch(format!("`{path}` passes through a scalar")))
            }
            _ => return Ok(None),
        };
    }
    Ok(Some(current))
}

fn target<'a>(root: &'a mut Value, field: &str) -> Result<&'a mut Value, StoreError> {
    resolve_mut(root, field, true)?
        .ok_or_else(|| StoreError::InvalidPatch(format!("cannot address `{field}`")))
}

fn apply_patch(root: &mut Value, patch: &Patch) -> Result<(), StoreError> {
    match patch {
        Patch::Set { field, value } => {
            *target(root, field)? = value.clone();
        }

        Patch::Unset { field } => {
            let (parent, leaf) = match field.rsplit_once('.') {
                Some((parent, leaf)) => (resolve_mut(root, parent, false)?, leaf),
                None => (Some(root), field.as_str()),
            };
            match parent {
                Some(Value::Object(map)) => {
                    map.remove(leaf);
                }
                Some(Value::Array(_)) => {
                    return Err(StoreError::InvalidPatch(format!("cannot unset array element `{field}`")))
                }
                _ => {}
            }
        }

        Patch::ArrayUnion { field, value } => {
            let slot = target(root, field)?;
            match slot {
                Value::Null => *slot = Value::Array(vec![value.clone()]),
                Value::Array(items) => {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
                _ => return Err(StoreError::InvalidPatch(format!("`{field}` is not an array"))),
            }
        }

        Patch::ArrayRemove { field, value } => match resolve_mut(root, field, false)? {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => items.retain(|item| item != value),
            Some(_) => return Err(StoreError::InvalidPatch(format!("`{field}` is not an array"))),
        },

        Patch::Increment { field, by } => {
            let slot = target(root, field)?;
            let next = match slot {
                Value::Null => Value::from(*by),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => Value::from(i.saturating_add(*by)),
                    None => Value::from(n.as_f64().unwrap_or(0.0) + *by as f64),
                },
                _ => return Err(StoreError::InvalidPatch(format!("`{field}` is not a number"))),
            };
            *slot = next;
        }
    }
    Ok(())
}

/// Absent sorts first. RFC 3339 strings compare as instants.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (
                chrono::DateTime::parse_from_rfc3339(x),
                chrono::DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound { collection: String, id: String },
    /// A precondition did not hold; nothing was written.
    PreconditionFailed { field: String },
    InvalidPatch(String),
    Codec(String),
    Persist(String),
    Io(String),
    /// The change feed is gone (store dropped).
    Closed,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound { collection, id } => write!(f, "{collection}/{id} not found"),
            StoreError::PreconditionFailed { field } => write!(f, "precondition failed on `{field}`"),
            StoreError::InvalidPatch(e) => write!(f, "invalid patch: {e}"),
            StoreError::Codec(e) => write!(f, "codec: {e}"),
            StoreError::Persist(e) => write!(f, "persist: {e}"),
            StoreError::Io(e) => write!(f, "io: {e}"),
            StoreError::Closed => write!(f, "change feed closed"),
        }
    }
}

impl std::error::Error for StoreError {}

// ── Tests ──────────────────────────────────────────────────────
