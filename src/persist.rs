//! LocalStore ↔ redb persistence.
//!
//! redb is a save file: loaded on boot, flushed on every mutation.
//! Never queried at runtime. The in-memory store is the runtime truth.
//!
//! Each row is a postcard-encoded [`StoredDocument`] keyed by
//! `{collection}/{id}`. The document body rides inside as JSON text, since
//! document fields are schemaless.

use crate::store::{Document, Fields};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "profile")]
use std::time::Instant;

const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredDocument {
    collection: String,
    id: String,
    body: String,
}

/// Everything the save file holds.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub documents: Vec<(String, Document)>,
    pub revision: u64,
}

/// Thin handle to the redb file. Cloneable (Arc inside).
#[derive(Clone)]
pub struct SaveFile {
    db: Arc<Database>,
}

impl SaveFile {
    /// Open (or create) the save file at the given path.
    /// Creates tables if they don't exist.
    pub fn open(path: &str) -> Result<Self, SaveFileError> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(DOCUMENTS)?;
            let _ = txn.open_table(META)?;
        }
        txn.commit()?;

        Ok(SaveFile { db: Arc::new(db) })
    }

    /// Load every document plus the revision counter. Called once at boot.
    pub fn load(&self) -> Result<Snapshot, SaveFileError> {
        let mut snapshot = Snapshot::default();
        let txn = self.db.begin_read()?;

        let documents = txn.open_table(DOCUMENTS)?;
        for entry in documents.iter()? {
            let (_, value) = entry?;
            let stored: StoredDocument = postcard::from_bytes(value.value())
                .map_err(|e| SaveFileError::Decode(e.to_string()))?;
            let fields: Fields = serde_json::from_str(&stored.body)
                .map_err(|e| SaveFileError::Decode(e.to_string()))?;
            snapshot.documents.push((
                stored.collection,
                Document { id: stored.id, fields },
            ));
        }

        let meta = txn.open_table(META)?;
        if let Some(rev_data) = meta.get("revision")? {
            if let Ok(bytes) = <[u8; 8]>::try_from(rev_data.value()) {
                snapshot.revision = u64::from_le_bytes(bytes);
            }
        }

        Ok(snapshot)
    }

    /// Write one document and the revision in a single transaction.
    pub fn put(&self, collection: &str, doc: &Document, revision: u64) -> Result<(), SaveFileError> {
        #[cfg(feature = "profile")]
        let start = Instant::now();

        let stored = StoredDocument {
            collection: collection.to_string(),
            id: doc.id.clone(),
            body: serde_json::to_string(&doc.fields)
                .map_err(|e| SaveFileError::Encode(e.to_string()))?,
        };
        let bytes = postcard::to_allocvec(&stored)
            .map_err(|e| SaveFileError::Encode(e.to_string()))?;

        let txn = self.db.begin_write()?;
        {
            let mut documents = txn.open_table(DOCUMENTS)?;
            let mut meta = txn.open_table(META)?;
            documents.insert(row_key(collection, &doc.id).as_str(), bytes.as_slice())?;
            meta.insert("revision", revision.to_le_bytes().as_slice())?;
        }
        txn.commit()?;

        #[cfg(feature = "profile")]
        tracing::debug!(elapsed_us = start.elapsed().as_micros() as u64, collection, "flushed document");
        Ok(())
    }

    /// Remove one document and bump the revision in a single transaction.
    pub fn remove(&self, collection: &str, id: &str, revision: u64) -> Result<(), SaveFileError> {
        #[cfg(feature = "profile")]
        let start = Instant::now();

        let txn = self.db.begin_write()?;
        {
            let mut documents = txn.open_table(DOCUMENTS)?;
            let mut meta = txn.open_table(META)?;
            documents.remove(row_key(collection, id).as_str())?;
            meta.insert("revision", revision.to_le_bytes().as_slice())?;
        }
        txn.commit()?;

        #[cfg(feature = "profile")]
        tracing::debug!(elapsed_us = start.elapsed().as_micros() as u64, collection, "flushed removal");
        Ok(())
    }
}

fn row_key(collection: &str, id: &str) -> String {
    format!("{collection}/{id}")
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SaveFileError {
    Redb(String),
    Decode(String),
    Encode(String),
}

// redb 2.x has many error types. Blanket them all into SaveFileError::Redb.
macro_rules! from_redb {
    ($($t:ty),*) => {
        $(impl From<$t> for SaveFileError {
            fn from(e: $t) -> Self { SaveFileError::Redb(e.to_string()) }
        })*
    };
}

from_redb!(
    redb::Error,
    redb::DatabaseError,
    redb::TableError,
    redb::TransactionError,
    redb::StorageError,
    redb::CommitError
);

impl std::fmt::Display for SaveFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveFileError::Redb(e) => write!(f, "redb: {e}"),
            SaveFileError::Decode(e) => write!(f, "decode: {e}"),
            SaveFileError::Encode(e) => write!(f, "encode: {e}"),
        }
    }
}

impl std::error::Error for SaveFileError {}

// ── Tests ──────────────────────────────────────────────────────
